//! Data Call Engine
//!
//! This crate manages the lifecycle of cellular packet data sessions for a
//! device with one or more SIM slots.
//!
//! # Architecture
//!
//! - **Connection**: one modem data call, shared by every purpose whose
//!   profile has the same sharing key. Owns setup, teardown and the retry
//!   schedule.
//! - **InterfaceBinding**: the per-purpose view (default, MMS, IMS, ...).
//!   Counts users and picks the connection that serves the purpose.
//! - **ConnectionSupervisor**: one per slot. Builds connections and bindings
//!   from the profile list and decides which purposes may be up given the
//!   radio, registration, data and roaming settings.
//! - **DataCallManager**: arbitrates the default data slot across
//!   supervisors and sequences shutdown.
//!
//! The engine performs no I/O. Every component queues [`Effect`]s and
//! [`DataCallEvent`]s; the [`actor`] carries them out over channels and
//! feeds modem confirmations back in.
//!
//! # Example
//!
//! ```rust
//! use dcm_engine::{DataCallManager, Effect, ManagerConfig};
//! use dcm_protocol::{ApnProfile, ModemRequest, Purpose, SlotId};
//!
//! let mut manager = DataCallManager::new(ManagerConfig::default());
//! let profile = ApnProfile::new("internet").with_purposes([Purpose::Default, Purpose::Mms]);
//! manager.apply_profile_list(SlotId(0), vec![profile]).unwrap();
//!
//! // The attach APN goes to the modem once the list is applied
//! let effects = manager.drain_effects();
//! assert!(effects.iter().any(|e| matches!(
//!     e,
//!     Effect::Modem { request: ModemRequest::SetInitialAttachApn(_), .. }
//! )));
//! ```

pub mod actor;
pub mod binding;
pub mod connection;
pub mod effects;
pub mod error;
pub mod events;
pub mod link;
pub mod manager;
pub mod retry;
pub mod settings;
pub mod state;
pub mod supervisor;

// Re-export actor types
pub use actor::{run_data_call_actor, ActorChannels, DataCallHandle, ManagerCommand, ProfileSource};

// Re-export engine types
pub use binding::{InterfaceBinding, InterfaceInfo};
pub use connection::Connection;
pub use manager::{
    DataCallManager, ManagerConfig, RoamingSetting, DEFAULT_SHUTDOWN_TIMEOUT_MS,
    DEFAULT_SWITCH_TIMEOUT_MS,
};
pub use supervisor::ConnectionSupervisor;

// Re-export effect and event types
pub use effects::{Effect, RoutingUpdate};
pub use events::{DataCallEvent, DataCallListener, ListenerId, ListenerRegistry};

pub use error::DataCallError;
pub use link::{InterfaceAddress, LinkInfo, TcpBufferTable};
pub use retry::RetryPolicy;
pub use settings::{ApnEntry, Settings, SettingsError, SlotConfig};
pub use state::{SimIdentity, SlotSettings};
