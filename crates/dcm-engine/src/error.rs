//! Error types for the data call engine

use dcm_protocol::{Purpose, SlotId};
use thiserror::Error;

/// Errors returned by the supervisor, the manager and the actor
#[derive(Debug, Error)]
pub enum DataCallError {
    /// Slot index outside the configured range
    #[error("slot {slot} out of range ({count} slots configured)")]
    InvalidSlot {
        /// Requested slot index
        slot: usize,
        /// Number of configured slots
        count: usize,
    },

    /// No binding exists for the purpose on this slot
    #[error("{slot} has no binding for purpose {purpose}")]
    NoBinding {
        /// Slot that was asked
        slot: SlotId,
        /// Purpose without a binding
        purpose: Purpose,
    },

    /// The default purpose follows the data enabled setting only
    #[error("the default purpose cannot be deactivated by request")]
    DefaultPurposeNotControllable,

    /// Shutdown has started, no further commands are accepted
    #[error("shutdown in progress")]
    ShuttingDown,

    /// The actor is gone
    #[error("data call actor channel closed")]
    ChannelClosed,
}
