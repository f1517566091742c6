//! Connection states and disconnect reasons

use std::fmt;

/// Lifecycle state of a data session as seen by its consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnState {
    /// Never set up, or state not known
    #[default]
    Unknown,
    /// Setup request in flight
    Connecting,
    /// Session up with link parameters
    Connected,
    /// Deactivate request in flight
    Disconnecting,
    /// Session down
    Disconnected,
}

impl ConnState {
    /// Disconnected or Unknown
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnState::Disconnected | ConnState::Unknown)
    }

    /// Connecting, Connected or Disconnecting
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Unknown => "unknown",
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
            ConnState::Disconnecting => "disconnecting",
            ConnState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why a purpose lost (or never got) its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DisconnectReason {
    /// The last user of a non-default purpose released it
    ApnDisabled,
    /// The profile list is being replaced
    ApnChanged,
    /// Mobile data or data roaming is switched off
    SettingDisabled,
    /// Wi-Fi took over the default route
    WifiConnected,
    /// The default data slot moved elsewhere
    ServiceIdChanged,
    /// The radio is shutting down
    RadioShutdown,
    /// Setup failed with a cause that retrying cannot fix
    PermanentFailure,
    /// Setup kept failing until the retry budget ran out
    RetryFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::ApnDisabled => "apn disabled",
            DisconnectReason::ApnChanged => "apn changed",
            DisconnectReason::SettingDisabled => "setting disabled",
            DisconnectReason::WifiConnected => "wifi connected",
            DisconnectReason::ServiceIdChanged => "service id changed",
            DisconnectReason::RadioShutdown => "radio shutdown",
            DisconnectReason::PermanentFailure => "permanent failure",
            DisconnectReason::RetryFailed => "retry failed",
        };
        f.write_str(name)
    }
}
