//! Side effects requested by the engine
//!
//! The supervisor and the manager never talk to the modem, the routing
//! subsystem or a clock directly. They queue [`Effect`]s, and whoever drives
//! them (the actor, or a test) executes the effects and feeds the outcomes
//! back in.

use std::time::Duration;

use dcm_protocol::{ConnectionId, ModemRequest, Purpose, SlotId};

use crate::binding::InterfaceInfo;

/// Update for the routing subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingUpdate {
    /// A binding was created
    Register(InterfaceInfo),
    /// A registered binding changed
    Update(InterfaceInfo),
    /// A binding was removed
    Unregister {
        /// Slot of the binding
        slot: SlotId,
        /// Purpose of the binding
        purpose: Purpose,
    },
}

impl RoutingUpdate {
    /// Slot this update belongs to
    pub fn slot(&self) -> SlotId {
        match self {
            RoutingUpdate::Register(info) | RoutingUpdate::Update(info) => info.slot,
            RoutingUpdate::Unregister { slot, .. } => *slot,
        }
    }

    /// Purpose this update belongs to
    pub fn purpose(&self) -> Purpose {
        match self {
            RoutingUpdate::Register(info) | RoutingUpdate::Update(info) => info.purpose,
            RoutingUpdate::Unregister { purpose, .. } => *purpose,
        }
    }
}

/// Work for the driver of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a request to the modem of a slot
    Modem {
        /// Target slot
        slot: SlotId,
        /// Request
        request: ModemRequest,
    },

    /// Tell the routing subsystem about a binding
    Routing(RoutingUpdate),

    /// Arm (or re-arm) the retry timer of a connection
    StartRetryTimer {
        slot: SlotId,
        conn: ConnectionId,
        /// Echoed back when the timer fires
        generation: u64,
        delay: Duration,
    },

    /// Disarm the retry timer of a connection
    CancelRetryTimer { slot: SlotId, conn: ConnectionId },

    /// Read the stored profile lists and apply them
    FetchProfiles,

    /// Arm the deadline of a default slot switch
    StartSwitchTimer {
        /// Echoed back when the deadline passes
        generation: u64,
        timeout: Duration,
    },

    /// Arm the deadline of a shutdown
    StartShutdownTimer { timeout: Duration },
}
