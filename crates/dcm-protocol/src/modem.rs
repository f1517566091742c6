//! Messages exchanged with the radio modem interface
//!
//! The manager sends [`ModemRequest`]s. The modem answers each request with
//! a [`ModemResponse`] and pushes unsolicited [`ModemIndication`]s.

use crate::apn::{AuthType, PdpType};
use crate::cause::{FailCause, SuggestedRetry};
use crate::ids::{CallId, ConnectionId};
use crate::tech::RadioTech;

/// Parameters of a setup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    /// Access point name
    pub apn: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Authentication method
    pub auth: AuthType,
    /// Protocol family, chosen by roaming status
    pub protocol: PdpType,
    /// Serving technology when the request was built
    pub tech: RadioTech,
}

/// Link parameters returned by a successful setup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetupSuccess {
    /// Session id assigned by the modem
    pub cid: CallId,
    /// Network interface name
    pub ifname: String,
    /// Addresses in `ip/prefix` form
    pub addresses: Vec<String>,
    /// Gateways
    pub gateways: Vec<String>,
    /// DNS servers
    pub dns_servers: Vec<String>,
    /// P-CSCF addresses
    pub pcscf: Vec<String>,
    /// Link MTU, if reported
    pub mtu: Option<u32>,
}

/// A failed setup request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupFailure {
    /// Failure cause
    pub cause: FailCause,
    /// Retry hint from the network
    pub retry: SuggestedRetry,
}

impl SetupFailure {
    /// Failure without a retry hint
    pub fn new(cause: FailCause) -> Self {
        Self {
            cause,
            retry: SuggestedRetry::None,
        }
    }

    /// Failure with a retry hint
    pub fn with_retry(cause: FailCause, retry: SuggestedRetry) -> Self {
        Self { cause, retry }
    }

    /// Whether this failure should not be retried
    pub fn is_final(&self) -> bool {
        self.retry == SuggestedRetry::Never || self.cause.is_permanent()
    }
}

/// Activity of a session in a data call list report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallActivity {
    /// Session is down
    #[default]
    Inactive,
    /// Session is up but the physical link is dormant
    Dormant,
    /// Session is up
    Up,
}

impl CallActivity {
    /// Dormant sessions still count as connected
    pub fn is_connected(&self) -> bool {
        !matches!(self, CallActivity::Inactive)
    }
}

/// One entry of an unsolicited data call list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataCallReport {
    /// Session id
    pub cid: CallId,
    /// Whether the session is still up
    pub activity: CallActivity,
    /// Network interface name
    pub ifname: String,
    /// Addresses in `ip/prefix` form
    pub addresses: Vec<String>,
    /// Gateways
    pub gateways: Vec<String>,
    /// DNS servers
    pub dns_servers: Vec<String>,
    /// P-CSCF addresses
    pub pcscf: Vec<String>,
    /// Link MTU, if reported
    pub mtu: Option<u32>,
}

impl From<&SetupSuccess> for DataCallReport {
    fn from(s: &SetupSuccess) -> Self {
        Self {
            cid: s.cid,
            activity: CallActivity::Up,
            ifname: s.ifname.clone(),
            addresses: s.addresses.clone(),
            gateways: s.gateways.clone(),
            dns_servers: s.dns_servers.clone(),
            pcscf: s.pcscf.clone(),
            mtu: s.mtu,
        }
    }
}

/// Data registration state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RegState {
    /// Not registered and not searching
    #[default]
    NotSearching,
    /// Searching for a network
    Searching,
    /// Registration denied
    Denied,
    /// Registered
    Registered,
}

/// Reported data registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataRegistration {
    /// Registration state
    pub state: RegState,
    /// Serving technology, if known
    pub tech: Option<RadioTech>,
    /// Whether the slot is roaming
    pub roaming: bool,
}

impl DataRegistration {
    /// Registered on the given technology
    pub fn registered(tech: RadioTech) -> Self {
        Self {
            state: RegState::Registered,
            tech: Some(tech),
            roaming: false,
        }
    }

    /// Same registration, roaming
    pub fn roaming(mut self) -> Self {
        self.roaming = true;
        self
    }

    /// Registered with a known serving technology
    pub fn is_ready(&self) -> bool {
        self.state == RegState::Registered && self.tech.is_some()
    }

    /// Serving technology when ready
    pub fn serving_tech(&self) -> Option<RadioTech> {
        if self.is_ready() {
            self.tech
        } else {
            None
        }
    }
}

/// Radio power state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioPower {
    /// Not reported yet
    #[default]
    Unknown,
    /// Powering on
    Enabling,
    /// On
    Enabled,
    /// Powering off
    Disabling,
    /// Off
    Disabled,
}

/// Reason passed with a deactivate request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeactivateReason {
    /// Regular deactivation
    #[default]
    None,
    /// The radio is being powered off
    RadioOff,
}

impl DeactivateReason {
    /// Value on the modem interface
    pub fn code(&self) -> u8 {
        match self {
            DeactivateReason::None => 0,
            DeactivateReason::RadioOff => 1,
        }
    }
}

/// Parameters for the initial attach APN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachApnParams {
    pub apn: String,
    pub protocol: PdpType,
    pub auth: AuthType,
    pub user: String,
    pub password: String,
}

/// Protocol configuration options pushed by the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcoData {
    /// Session the options belong to
    pub cid: CallId,
    /// Bearer protocol the options were received on
    pub bearer_proto: String,
    /// Option id
    pub pco_id: u32,
    /// Raw option contents
    pub contents: Vec<u8>,
}

/// Requests sent to the modem of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemRequest {
    /// Bring up a data session
    SetupDataCall {
        /// Local handle to echo back in the response
        conn: ConnectionId,
        /// Setup parameters
        params: SetupParams,
    },

    /// Tear down a data session
    DeactivateDataCall {
        /// Local handle to echo back in the response
        conn: ConnectionId,
        /// Session to tear down
        cid: CallId,
        /// Deactivate reason
        reason: DeactivateReason,
    },

    /// Configure the APN used for the initial attach
    SetInitialAttachApn(AttachApnParams),

    /// Attach to or detach from packet service
    SetDataRegistration {
        /// Attach when true
        attach: bool,
    },

    /// Power the radio on or off
    SetRadioPower {
        /// Power on when true
        on: bool,
    },
}

/// Confirmation of a [`ModemRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemResponse {
    /// Outcome of a setup request
    SetupDataCall {
        conn: ConnectionId,
        result: Result<SetupSuccess, SetupFailure>,
    },

    /// Outcome of a deactivate request
    DeactivateDataCall { conn: ConnectionId, success: bool },

    /// Outcome of a data registration request
    SetDataRegistration {
        attach: bool,
        result: Result<(), String>,
    },

    /// Outcome of a radio power request
    SetRadioPower { on: bool, result: Result<(), String> },
}

/// Anything the modem of one slot sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// Confirmation of an earlier request
    Response(ModemResponse),
    /// Unsolicited report
    Indication(ModemIndication),
}

/// Unsolicited reports from the modem of one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemIndication {
    /// Full list of sessions known to the modem
    DataCallListChanged(Vec<DataCallReport>),
    /// Data registration changed
    DataRegistrationChanged(DataRegistration),
    /// Radio power changed
    RadioPowerChanged(RadioPower),
    /// The modem restarted
    ModemRestart {
        /// Restart reason as reported
        reason: String,
    },
    /// Protocol configuration options received
    PcoUpdated(PcoData),
    /// SIM identity read from the card (None when absent)
    IccidChanged(Option<String>),
}
