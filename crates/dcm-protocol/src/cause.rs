//! Setup failure causes and network retry hints

use std::fmt;
use std::time::Duration;

/// Why a setup request failed
///
/// Covers both request-level errors reported by the modem interface
/// (`RadioNotAvailable`, `InvalidParameter`, `GenericFailure`) and the
/// PDP fail causes reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailCause {
    /// Radio interface not available
    RadioNotAvailable,
    /// Request rejected as malformed by the modem interface
    InvalidParameter,
    /// Request failed without detail
    GenericFailure,
    /// Operator determined barring
    OperatorBarred,
    /// Insufficient resources
    InsufficientResources,
    /// Missing or unknown APN
    MissingUnknownApn,
    /// Unknown PDP address or type
    UnknownPdpAddressType,
    /// User authentication failed
    UserAuthentication,
    /// Activation rejected by GGSN
    ActivationRejectGgsn,
    /// Activation rejected, unspecified
    ActivationRejectUnspecified,
    /// Service option not supported
    ServiceOptionNotSupported,
    /// Requested service option not subscribed
    ServiceOptionNotSubscribed,
    /// Service option temporarily out of order
    ServiceOptionOutOfOrder,
    /// NSAPI already used
    NsapiInUse,
    /// Network congestion
    NetworkCongestion,
    /// PDP type IPv4 only allowed
    OnlyIpv4Allowed,
    /// PDP type IPv6 only allowed
    OnlyIpv6Allowed,
    /// Single address bearers only allowed
    OnlySingleBearerAllowed,
    /// Protocol errors
    ProtocolErrors,
    /// Voice registration failed
    VoiceRegistrationFail,
    /// Data registration failed
    DataRegistrationFail,
    /// Signal lost
    SignalLost,
    /// Preferred radio technology changed
    PreferredRadioTechChanged,
    /// Radio powered off
    RadioPowerOff,
    /// A tethered call is active
    TetheredCallActive,
    /// Any other cause code
    Other(i32),
}

impl FailCause {
    /// Decode a PDP fail cause code
    pub fn from_code(code: i32) -> Self {
        match code {
            0x08 => FailCause::OperatorBarred,
            0x16 => FailCause::NetworkCongestion,
            0x1A => FailCause::InsufficientResources,
            0x1B => FailCause::MissingUnknownApn,
            0x1C => FailCause::UnknownPdpAddressType,
            0x1D => FailCause::UserAuthentication,
            0x1E => FailCause::ActivationRejectGgsn,
            0x1F => FailCause::ActivationRejectUnspecified,
            0x20 => FailCause::ServiceOptionNotSupported,
            0x21 => FailCause::ServiceOptionNotSubscribed,
            0x22 => FailCause::ServiceOptionOutOfOrder,
            0x23 => FailCause::NsapiInUse,
            0x32 => FailCause::OnlyIpv4Allowed,
            0x33 => FailCause::OnlyIpv6Allowed,
            0x34 => FailCause::OnlySingleBearerAllowed,
            0x6F => FailCause::ProtocolErrors,
            -1 => FailCause::VoiceRegistrationFail,
            -2 => FailCause::DataRegistrationFail,
            -3 => FailCause::SignalLost,
            -4 => FailCause::PreferredRadioTechChanged,
            -5 => FailCause::RadioPowerOff,
            -6 => FailCause::TetheredCallActive,
            0xFFFF => FailCause::GenericFailure,
            other => FailCause::Other(other),
        }
    }

    /// Failures that retrying cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailCause::RadioNotAvailable
                | FailCause::InvalidParameter
                | FailCause::OperatorBarred
                | FailCause::MissingUnknownApn
                | FailCause::UnknownPdpAddressType
                | FailCause::UserAuthentication
                | FailCause::ActivationRejectGgsn
                | FailCause::ServiceOptionNotSupported
                | FailCause::ServiceOptionNotSubscribed
                | FailCause::NsapiInUse
                | FailCause::OnlyIpv4Allowed
                | FailCause::OnlyIpv6Allowed
                | FailCause::ProtocolErrors
                | FailCause::RadioPowerOff
                | FailCause::TetheredCallActive
        )
    }
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailCause::RadioNotAvailable => "RadioNotAvailable",
            FailCause::InvalidParameter => "InvalidParameter",
            FailCause::GenericFailure => "GenericFailure",
            FailCause::OperatorBarred => "OperatorBarred",
            FailCause::InsufficientResources => "InsufficientResources",
            FailCause::MissingUnknownApn => "MissingUnknownApn",
            FailCause::UnknownPdpAddressType => "UnknownPdpAddressType",
            FailCause::UserAuthentication => "UserAuthentication",
            FailCause::ActivationRejectGgsn => "ActivationRejectGgsn",
            FailCause::ActivationRejectUnspecified => "ActivationRejectUnspecified",
            FailCause::ServiceOptionNotSupported => "ServiceOptionNotSupported",
            FailCause::ServiceOptionNotSubscribed => "ServiceOptionNotSubscribed",
            FailCause::ServiceOptionOutOfOrder => "ServiceOptionOutOfOrder",
            FailCause::NsapiInUse => "NsapiInUse",
            FailCause::NetworkCongestion => "NetworkCongestion",
            FailCause::OnlyIpv4Allowed => "OnlyIpv4Allowed",
            FailCause::OnlyIpv6Allowed => "OnlyIpv6Allowed",
            FailCause::OnlySingleBearerAllowed => "OnlySingleBearerAllowed",
            FailCause::ProtocolErrors => "ProtocolErrors",
            FailCause::VoiceRegistrationFail => "VoiceRegistrationFail",
            FailCause::DataRegistrationFail => "DataRegistrationFail",
            FailCause::SignalLost => "SignalLost",
            FailCause::PreferredRadioTechChanged => "PreferredRadioTechChanged",
            FailCause::RadioPowerOff => "RadioPowerOff",
            FailCause::TetheredCallActive => "TetheredCallActive",
            FailCause::Other(code) => return write!(f, "Other({:#x})", code),
        };
        f.write_str(text)
    }
}

/// Network-suggested retry time attached to a setup failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuggestedRetry {
    /// No suggestion, use the backoff formula
    #[default]
    None,
    /// Retry after exactly this long
    After(Duration),
    /// The network asks for no retry at all
    Never,
}

impl SuggestedRetry {
    /// Raw value meaning "do not retry"
    pub const NEVER_MS: i64 = i32::MAX as i64;

    /// Decode the raw millisecond value from the modem
    ///
    /// Negative values carry no suggestion.
    pub fn from_millis(ms: i64) -> Self {
        if ms == Self::NEVER_MS {
            SuggestedRetry::Never
        } else if ms >= 0 {
            SuggestedRetry::After(Duration::from_millis(ms as u64))
        } else {
            SuggestedRetry::None
        }
    }
}
