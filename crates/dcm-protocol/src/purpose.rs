//! Logical network purposes

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// A logical category of network usage served by a cellular data session
///
/// The declaration order is the order in which bindings are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Purpose {
    /// Default internet route
    Default,
    /// Multimedia messaging
    Mms,
    /// Secure user plane location (assisted positioning)
    Supl,
    /// IP multimedia subsystem signaling
    Ims,
    /// Dial-up networking / tethering uplink
    Dun,
    /// Firmware over the air
    Fota,
    /// Initial attach
    Ia,
    /// XCAP supplementary service configuration
    Xcap,
    /// Cell broadcast
    Cbs,
    /// High priority mobile data
    Hipri,
    /// Emergency
    Ecc,
}

impl Purpose {
    /// All purposes, in reconcile order
    pub const ALL: [Purpose; 11] = [
        Purpose::Default,
        Purpose::Mms,
        Purpose::Supl,
        Purpose::Ims,
        Purpose::Dun,
        Purpose::Fota,
        Purpose::Ia,
        Purpose::Xcap,
        Purpose::Cbs,
        Purpose::Hipri,
        Purpose::Ecc,
    ];

    /// The APN type string used in profile configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Default => "default",
            Purpose::Mms => "mms",
            Purpose::Supl => "supl",
            Purpose::Ims => "ims",
            Purpose::Dun => "dun",
            Purpose::Fota => "fota",
            Purpose::Ia => "ia",
            Purpose::Xcap => "xcap",
            Purpose::Cbs => "cbs",
            Purpose::Hipri => "hipri",
            Purpose::Ecc => "ecc",
        }
    }

    /// Whether this is the default internet purpose
    pub fn is_default(&self) -> bool {
        matches!(self, Purpose::Default)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Purpose::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| ParseError::UnknownPurpose(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_purpose_names() {
        assert_eq!("default".parse::<Purpose>().unwrap(), Purpose::Default);
        assert_eq!("MMS".parse::<Purpose>().unwrap(), Purpose::Mms);
        assert_eq!(" ims ".parse::<Purpose>().unwrap(), Purpose::Ims);
        assert!(matches!(
            "wap".parse::<Purpose>(),
            Err(ParseError::UnknownPurpose(_))
        ));
    }

    #[test]
    fn test_names_round_trip_through_display() {
        for purpose in Purpose::ALL {
            assert_eq!(purpose.to_string().parse::<Purpose>().unwrap(), purpose);
        }
    }

    #[test]
    fn test_only_default_is_default() {
        assert!(Purpose::Default.is_default());
        assert_eq!(Purpose::ALL.iter().filter(|p| p.is_default()).count(), 1);
    }
}
