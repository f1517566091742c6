//! Data Call Protocol Library
//!
//! This crate holds the vocabulary shared between the data call manager
//! and the radio modem interface that actually sets up packet data
//! sessions:
//!
//! - **Purposes**: logical network usages (default internet, MMS, SUPL, IMS, ...)
//! - **APN profiles**: connection parameters and the sharing key derived from them
//! - **Radio technologies**: serving technology indices, bearer bitmasks and
//!   per-technology TCP buffer defaults
//! - **Failure causes**: setup failure classification and retry hints
//! - **Modem messages**: requests sent to the modem and the indications and
//!   confirmations it sends back
//!
//! Nothing in here has behavior beyond classification and conversion; the
//! state machines live in `dcm-engine`.
//!
//! # Example
//!
//! ```rust
//! use dcm_protocol::{ApnProfile, Purpose, RadioTech};
//!
//! let ims = ApnProfile::new("ims").with_purposes([Purpose::Ims]);
//! let default = ApnProfile::new("ims").with_purposes([Purpose::Default]);
//!
//! // Same access point, same credentials: one session can serve both
//! assert!(ims.shares_with(&default));
//! assert!(ims.bearer.supports(Some(RadioTech::Lte)));
//! ```

pub mod apn;
pub mod cause;
pub mod error;
pub mod ids;
pub mod modem;
pub mod purpose;
pub mod state;
pub mod tech;

pub use apn::{select_initial_attach, ApnProfile, AuthType, PdpType, SharingKey};
pub use cause::{FailCause, SuggestedRetry};
pub use error::{ParseError, ProfileError};
pub use ids::{CallId, ConnectionId, SlotId};
pub use modem::{
    AttachApnParams, CallActivity, DataCallReport, DataRegistration, DeactivateReason, ModemEvent,
    ModemIndication, ModemRequest, ModemResponse, PcoData, RadioPower, RegState, SetupFailure,
    SetupParams, SetupSuccess,
};
pub use purpose::Purpose;
pub use state::{ConnState, DisconnectReason};
pub use tech::{BearerBitmask, RadioTech};
