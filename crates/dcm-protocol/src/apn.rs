//! APN profiles and the sharing key

use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ProfileError};
use crate::purpose::Purpose;
use crate::tech::BearerBitmask;

/// Authentication method requested during setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum AuthType {
    /// No authentication
    None,
    /// PAP
    Pap,
    /// CHAP
    Chap,
    /// Let the network pick PAP or CHAP
    PapOrChap,
}

impl AuthType {
    /// Used when a profile does not name a valid method
    pub const DEFAULT: AuthType = AuthType::PapOrChap;

    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Pap => "pap",
            AuthType::Chap => "chap",
            AuthType::PapOrChap => "papOrChap",
        }
    }

    /// Value on the modem interface
    pub fn code(&self) -> u8 {
        match self {
            AuthType::None => 0,
            AuthType::Pap => 1,
            AuthType::Chap => 2,
            AuthType::PapOrChap => 3,
        }
    }
}

impl FromStr for AuthType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AuthType::None),
            "pap" => Ok(AuthType::Pap),
            "chap" => Ok(AuthType::Chap),
            "paporchap" => Ok(AuthType::PapOrChap),
            _ => Err(ParseError::UnknownAuthType(s.to_string())),
        }
    }
}

/// PDP protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum PdpType {
    /// IPv4 only
    Ip,
    /// IPv6 only
    Ipv6,
    /// Dual stack
    Ipv4v6,
}

impl PdpType {
    /// Used when a profile does not name a valid family
    pub const DEFAULT: PdpType = PdpType::Ip;

    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            PdpType::Ip => "IP",
            PdpType::Ipv6 => "IPV6",
            PdpType::Ipv4v6 => "IPV4V6",
        }
    }
}

impl fmt::Display for PdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdpType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IP" => Ok(PdpType::Ip),
            "IPV6" => Ok(PdpType::Ipv6),
            "IPV4V6" => Ok(PdpType::Ipv4v6),
            _ => Err(ParseError::UnknownPdpType(s.to_string())),
        }
    }
}

/// One configured connection profile
///
/// Immutable once read from configuration. Optional fields left unset fall
/// back to defaults when a setup request is built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ApnProfile {
    /// Access point name
    pub apn: String,
    /// User name (empty when unused)
    pub user: String,
    /// Password (empty when unused)
    pub password: String,
    /// Authentication method
    pub auth_type: Option<AuthType>,
    /// Protocol family on the home network
    pub protocol: Option<PdpType>,
    /// Protocol family while roaming
    pub roaming_protocol: Option<PdpType>,
    /// Serving technologies this profile may be used on
    pub bearer: BearerBitmask,
    /// Purposes this profile can serve, in declaration order
    pub purposes: Vec<Purpose>,
    /// Profile MTU, used when the link does not report one
    pub mtu: Option<u32>,
    /// HTTP proxy host
    pub proxy: Option<String>,
    /// HTTP proxy port
    pub port: Option<u16>,
    /// MMS center URL
    pub mmsc: Option<String>,
    /// MMS proxy host
    pub mms_proxy: Option<String>,
    /// MMS proxy port
    pub mms_port: Option<u16>,
}

impl ApnProfile {
    /// Create a profile for the given access point with no purposes
    pub fn new(apn: impl Into<String>) -> Self {
        Self {
            apn: apn.into(),
            ..Default::default()
        }
    }

    /// Set the purposes this profile serves
    pub fn with_purposes(mut self, purposes: impl IntoIterator<Item = Purpose>) -> Self {
        self.purposes.clear();
        for purpose in purposes {
            if !self.purposes.contains(&purpose) {
                self.purposes.push(purpose);
            }
        }
        self
    }

    /// Set the credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the authentication method
    pub fn with_auth(mut self, auth: AuthType) -> Self {
        self.auth_type = Some(auth);
        self
    }

    /// Set the home and roaming protocol families
    pub fn with_protocols(mut self, home: PdpType, roaming: PdpType) -> Self {
        self.protocol = Some(home);
        self.roaming_protocol = Some(roaming);
        self
    }

    /// Restrict the profile to a set of serving technologies
    pub fn with_bearer(mut self, bearer: BearerBitmask) -> Self {
        self.bearer = bearer;
        self
    }

    /// Set the profile MTU
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Check that the profile can be used at all
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.apn.trim().is_empty() {
            return Err(ProfileError::MissingApn);
        }
        if self.purposes.is_empty() {
            return Err(ProfileError::NoKnownPurpose {
                apn: self.apn.clone(),
            });
        }
        Ok(())
    }

    /// Whether the profile declares the given purpose
    pub fn serves(&self, purpose: Purpose) -> bool {
        self.purposes.contains(&purpose)
    }

    /// Fields whose equality lets two purposes share one session
    pub fn sharing_key(&self) -> SharingKey {
        SharingKey {
            apn: self.apn.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            auth_type: self.auth_type,
            protocol: self.protocol,
            roaming_protocol: self.roaming_protocol,
        }
    }

    /// Whether a session set up for `self` can also serve `other`
    pub fn shares_with(&self, other: &ApnProfile) -> bool {
        self.sharing_key() == other.sharing_key()
    }

    /// Authentication method to request, falling back to the default
    pub fn auth_or_default(&self) -> AuthType {
        self.auth_type.unwrap_or(AuthType::DEFAULT)
    }

    /// Protocol family to request given the current roaming status
    pub fn protocol_for(&self, roaming: bool) -> PdpType {
        let chosen = if roaming {
            self.roaming_protocol
        } else {
            self.protocol
        };
        chosen.unwrap_or(PdpType::DEFAULT)
    }
}

/// Sharing key of an APN profile
///
/// The bearer restriction is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharingKey {
    pub apn: String,
    pub user: String,
    pub password: String,
    pub auth_type: Option<AuthType>,
    pub protocol: Option<PdpType>,
    pub roaming_protocol: Option<PdpType>,
}

impl fmt::Display for SharingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.apn)
        } else {
            write!(f, "{}@{}", self.user, self.apn)
        }
    }
}

/// Pick the profile used for the initial attach
///
/// A valid profile declaring `ia` wins, then one declaring `default`, then
/// the first valid profile.
pub fn select_initial_attach(profiles: &[ApnProfile]) -> Option<&ApnProfile> {
    let valid = profiles.iter().filter(|p| p.validate().is_ok());
    let first = valid.clone().next();
    let mut default = None;
    let mut ia = None;
    for profile in valid {
        if profile.serves(Purpose::Ia) {
            ia = Some(profile);
        } else if profile.serves(Purpose::Default) {
            default = Some(profile);
        }
    }
    ia.or(default).or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tech::RadioTech;

    #[test]
    fn test_sharing_ignores_bearer_and_purposes() {
        let a = ApnProfile::new("internet").with_purposes([Purpose::Default]);
        let b = ApnProfile::new("internet")
            .with_purposes([Purpose::Supl])
            .with_bearer(BearerBitmask::from_techs([RadioTech::Lte]));
        assert!(a.shares_with(&b));
    }

    #[test]
    fn test_sharing_key_fields() {
        let base = ApnProfile::new("internet");
        assert!(!base.shares_with(&ApnProfile::new("mms")));
        assert!(!base.shares_with(&base.clone().with_credentials("u", "")));
        assert!(!base.shares_with(&base.clone().with_credentials("", "p")));
        assert!(!base.shares_with(&base.clone().with_auth(AuthType::Chap)));
        assert!(!base
            .shares_with(&base.clone().with_protocols(PdpType::Ip, PdpType::Ipv4v6)));
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            ApnProfile::new("").with_purposes([Purpose::Default]).validate(),
            Err(ProfileError::MissingApn)
        );
        assert!(matches!(
            ApnProfile::new("internet").validate(),
            Err(ProfileError::NoKnownPurpose { .. })
        ));
        assert!(ApnProfile::new("internet")
            .with_purposes([Purpose::Default])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_with_purposes_dedupes() {
        let p = ApnProfile::new("x").with_purposes([Purpose::Mms, Purpose::Mms, Purpose::Supl]);
        assert_eq!(p.purposes, vec![Purpose::Mms, Purpose::Supl]);
    }

    #[test]
    fn test_setup_defaults() {
        let p = ApnProfile::new("internet");
        assert_eq!(p.auth_or_default(), AuthType::PapOrChap);
        assert_eq!(p.protocol_for(false), PdpType::Ip);
        assert_eq!(p.protocol_for(true), PdpType::Ip);

        let p = p.with_protocols(PdpType::Ipv4v6, PdpType::Ip);
        assert_eq!(p.protocol_for(false), PdpType::Ipv4v6);
        assert_eq!(p.protocol_for(true), PdpType::Ip);
    }

    #[test]
    fn test_initial_attach_preference() {
        let default = ApnProfile::new("internet").with_purposes([Purpose::Default]);
        let mms = ApnProfile::new("mms").with_purposes([Purpose::Mms]);
        let ia = ApnProfile::new("attach").with_purposes([Purpose::Ia]);
        let invalid = ApnProfile::new("").with_purposes([Purpose::Ia]);

        let list = vec![mms.clone(), default.clone(), invalid.clone(), ia.clone()];
        assert_eq!(select_initial_attach(&list), Some(&ia));

        let list = vec![mms.clone(), default.clone(), invalid.clone()];
        assert_eq!(select_initial_attach(&list), Some(&default));

        let list = vec![invalid.clone(), mms.clone()];
        assert_eq!(select_initial_attach(&list), Some(&mms));

        assert_eq!(select_initial_attach(&[invalid]), None);
    }

    #[test]
    fn test_parse_auth_and_pdp() {
        assert_eq!("papOrChap".parse::<AuthType>().unwrap(), AuthType::PapOrChap);
        assert_eq!("CHAP".parse::<AuthType>().unwrap(), AuthType::Chap);
        assert!("notDefined".parse::<AuthType>().is_err());
        assert_eq!("ipv4v6".parse::<PdpType>().unwrap(), PdpType::Ipv4v6);
        assert!("PPP".parse::<PdpType>().is_err());
    }
}
