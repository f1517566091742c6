//! Serving radio technologies and bearer restrictions

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Radio access technology reported by data registration
///
/// Discriminants are the technology indices used on the modem interface;
/// bit `index - 1` of a bearer bitmask selects the technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RadioTech {
    Gprs = 1,
    Edge = 2,
    Umts = 3,
    Is95a = 4,
    Is95b = 5,
    #[cfg_attr(feature = "serde", serde(rename = "1xrtt"))]
    OneXRtt = 6,
    Evdo0 = 7,
    EvdoA = 8,
    Hsdpa = 9,
    Hsupa = 10,
    Hspa = 11,
    EvdoB = 12,
    Ehrpd = 13,
    Lte = 14,
    #[cfg_attr(feature = "serde", serde(rename = "hspa+"))]
    HspaPlus = 15,
    Gsm = 16,
    TdScdma = 17,
    Iwlan = 18,
    #[cfg_attr(feature = "serde", serde(rename = "lte_ca"))]
    LteCa = 19,
}

impl RadioTech {
    /// All technologies in index order
    pub const ALL: [RadioTech; 19] = [
        RadioTech::Gprs,
        RadioTech::Edge,
        RadioTech::Umts,
        RadioTech::Is95a,
        RadioTech::Is95b,
        RadioTech::OneXRtt,
        RadioTech::Evdo0,
        RadioTech::EvdoA,
        RadioTech::Hsdpa,
        RadioTech::Hsupa,
        RadioTech::Hspa,
        RadioTech::EvdoB,
        RadioTech::Ehrpd,
        RadioTech::Lte,
        RadioTech::HspaPlus,
        RadioTech::Gsm,
        RadioTech::TdScdma,
        RadioTech::Iwlan,
        RadioTech::LteCa,
    ];

    /// Technology index on the modem interface (1-based)
    pub fn index(&self) -> u32 {
        *self as u32
    }

    /// Look up a technology by its modem index
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.index() == index)
    }

    /// Bit selecting this technology in a bearer bitmask
    pub fn bit(&self) -> u32 {
        1 << (self.index() - 1)
    }

    /// Name used in configuration and logs
    pub fn name(&self) -> &'static str {
        match self {
            RadioTech::Gprs => "gprs",
            RadioTech::Edge => "edge",
            RadioTech::Umts => "umts",
            RadioTech::Is95a => "is95a",
            RadioTech::Is95b => "is95b",
            RadioTech::OneXRtt => "1xrtt",
            RadioTech::Evdo0 => "evdo0",
            RadioTech::EvdoA => "evdoa",
            RadioTech::Hsdpa => "hsdpa",
            RadioTech::Hsupa => "hsupa",
            RadioTech::Hspa => "hspa",
            RadioTech::EvdoB => "evdob",
            RadioTech::Ehrpd => "ehrpd",
            RadioTech::Lte => "lte",
            RadioTech::HspaPlus => "hspa+",
            RadioTech::Gsm => "gsm",
            RadioTech::TdScdma => "tdscdma",
            RadioTech::Iwlan => "iwlan",
            RadioTech::LteCa => "lte_ca",
        }
    }

    /// Name under which TCP buffer overrides are looked up
    ///
    /// The EV-DO revisions share one entry, as do IS-95A/B and 1xRTT.
    pub fn tcp_buffer_group(&self) -> &'static str {
        match self {
            RadioTech::Evdo0 | RadioTech::EvdoA | RadioTech::EvdoB => "evdo",
            RadioTech::Is95a | RadioTech::Is95b | RadioTech::OneXRtt => "1xrtt",
            other => other.name(),
        }
    }

    /// Built-in TCP buffer sizes (`rmem min,def,max,wmem min,def,max`)
    pub fn default_tcp_buffer_sizes(&self) -> &'static str {
        match self {
            RadioTech::Gprs => "4092,8760,48000,4096,8760,48000",
            RadioTech::Edge => "4093,26280,70800,4096,16384,70800",
            RadioTech::Umts => "58254,349525,1048576,58254,349525,1048576",
            RadioTech::Is95a | RadioTech::Is95b | RadioTech::OneXRtt => {
                "16384,32768,131072,4096,16384,102400"
            }
            RadioTech::Evdo0 | RadioTech::EvdoA | RadioTech::EvdoB => {
                "4094,87380,262144,4096,16384,262144"
            }
            RadioTech::Hsdpa => "61167,367002,1101005,8738,52429,262114",
            RadioTech::Hsupa | RadioTech::Hspa => "40778,244668,734003,16777,100663,301990",
            RadioTech::Ehrpd => "131072,262144,1048576,4096,16384,524288",
            RadioTech::Lte => "524288,1048576,2097152,262144,524288,1048576",
            RadioTech::HspaPlus | RadioTech::Iwlan | RadioTech::LteCa => {
                "122334,734003,2202010,32040,192239,576717"
            }
            RadioTech::Gsm | RadioTech::TdScdma => "4096,87380,110208,4096,16384,110208",
        }
    }
}

impl fmt::Display for RadioTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RadioTech {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lower)
            .ok_or_else(|| ParseError::UnknownTech(s.to_string()))
    }
}

/// Set of radio technologies a profile may be used on
///
/// Zero means unrestricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct BearerBitmask(pub u32);

impl BearerBitmask {
    /// Bitmask that allows every technology
    pub const UNRESTRICTED: BearerBitmask = BearerBitmask(0);

    /// Build a bitmask allowing exactly the given technologies
    pub fn from_techs(techs: impl IntoIterator<Item = RadioTech>) -> Self {
        Self(techs.into_iter().fold(0, |mask, t| mask | t.bit()))
    }

    /// Whether no restriction applies
    pub fn is_unrestricted(&self) -> bool {
        self.0 == 0
    }

    /// Whether a session may run on the given serving technology
    ///
    /// An unknown serving technology is only acceptable to an unrestricted
    /// bitmask.
    pub fn supports(&self, tech: Option<RadioTech>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        match tech {
            Some(t) => self.0 & t.bit() != 0,
            None => false,
        }
    }

    /// Technologies selected by this bitmask
    pub fn techs(&self) -> impl Iterator<Item = RadioTech> + '_ {
        RadioTech::ALL
            .iter()
            .copied()
            .filter(move |t| self.0 & t.bit() != 0)
    }
}

impl fmt::Display for BearerBitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            return f.write_str("any");
        }
        let names: Vec<&str> = self.techs().map(|t| t.name()).collect();
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_index_round_trip() {
        for tech in RadioTech::ALL {
            assert_eq!(RadioTech::from_index(tech.index()), Some(tech));
        }
        assert_eq!(RadioTech::from_index(0), None);
        assert_eq!(RadioTech::from_index(20), None);
    }

    #[test]
    fn test_bit_positions() {
        assert_eq!(RadioTech::Gprs.bit(), 0b1);
        assert_eq!(RadioTech::Lte.bit(), 1 << 13);
        assert_eq!(RadioTech::Iwlan.bit(), 1 << 17);
    }

    #[test]
    fn test_unrestricted_supports_everything() {
        let mask = BearerBitmask::UNRESTRICTED;
        assert!(mask.supports(None));
        for tech in RadioTech::ALL {
            assert!(mask.supports(Some(tech)));
        }
    }

    #[test]
    fn test_restricted_mask() {
        let mask = BearerBitmask::from_techs([RadioTech::Lte, RadioTech::LteCa]);
        assert!(mask.supports(Some(RadioTech::Lte)));
        assert!(mask.supports(Some(RadioTech::LteCa)));
        assert!(!mask.supports(Some(RadioTech::Umts)));
        assert!(!mask.supports(None));
        assert_eq!(mask.to_string(), "lte|lte_ca");
    }

    #[test]
    fn test_tcp_buffer_groups() {
        assert_eq!(RadioTech::EvdoB.tcp_buffer_group(), "evdo");
        assert_eq!(RadioTech::Is95a.tcp_buffer_group(), "1xrtt");
        assert_eq!(RadioTech::Lte.tcp_buffer_group(), "lte");
        assert_eq!(
            RadioTech::Lte.default_tcp_buffer_sizes(),
            "524288,1048576,2097152,262144,524288,1048576"
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("hspa+".parse::<RadioTech>().unwrap(), RadioTech::HspaPlus);
        assert_eq!("LTE".parse::<RadioTech>().unwrap(), RadioTech::Lte);
        assert!("5g".parse::<RadioTech>().is_err());
    }

    proptest! {
        #[test]
        fn prop_mask_membership_matches_bits(bits in any::<u32>(), idx in 1u32..=19) {
            let tech = RadioTech::from_index(idx).unwrap();
            let mask = BearerBitmask(bits);
            let expected = bits == 0 || bits & (1 << (idx - 1)) != 0;
            prop_assert_eq!(mask.supports(Some(tech)), expected);
        }
    }
}
