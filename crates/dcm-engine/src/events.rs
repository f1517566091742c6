//! Events emitted to listeners
//!
//! Everything a listener can observe comes out as a [`DataCallEvent`]. The
//! actor forwards events over a channel and also dispatches them to
//! registered [`DataCallListener`]s.

use dcm_protocol::{ConnState, DisconnectReason, FailCause, Purpose, SlotId};
use tracing::debug;

/// Unified event enum for data call activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataCallEvent {
    // -------------------------------------------------------------------------
    // Binding lifecycle
    // -------------------------------------------------------------------------
    /// The state reported for a purpose changed
    ConnectionChanged {
        slot: SlotId,
        purpose: Purpose,
        state: ConnState,
        /// Disconnect reason, if one was recorded
        reason: Option<DisconnectReason>,
    },

    /// Protocol configuration options arrived for a purpose
    PcoUpdated {
        slot: SlotId,
        purpose: Purpose,
        bearer_proto: String,
        pco_id: u32,
        contents: Vec<u8>,
    },

    // -------------------------------------------------------------------------
    // Failures
    // -------------------------------------------------------------------------
    /// A setup request failed while the default purpose was attached
    DataCallError {
        slot: SlotId,
        /// Human readable description
        message: String,
    },

    /// Setup failed permanently for these purposes
    PermanentFailure {
        slot: SlotId,
        purposes: Vec<Purpose>,
        cause: Option<FailCause>,
    },

    /// Setup kept failing until the retry budget ran out
    RetryExhausted { slot: SlotId, purposes: Vec<Purpose> },

    // -------------------------------------------------------------------------
    // Slot and system level
    // -------------------------------------------------------------------------
    /// The default data slot changed
    DefaultSlotChanged {
        /// Previous slot (None at boot)
        from: Option<SlotId>,
        to: SlotId,
    },

    /// Every connection of a slot reached a terminal state after a teardown
    AllDataDisconnected { slot: SlotId },

    /// Every slot is torn down and powered off
    ShutdownComplete,
}

impl DataCallEvent {
    /// Whether this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DataCallEvent::DataCallError { .. }
                | DataCallEvent::PermanentFailure { .. }
                | DataCallEvent::RetryExhausted { .. }
        )
    }

    /// Slot this event belongs to, if any
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            DataCallEvent::ConnectionChanged { slot, .. }
            | DataCallEvent::PcoUpdated { slot, .. }
            | DataCallEvent::DataCallError { slot, .. }
            | DataCallEvent::PermanentFailure { slot, .. }
            | DataCallEvent::RetryExhausted { slot, .. }
            | DataCallEvent::AllDataDisconnected { slot } => Some(*slot),
            DataCallEvent::DefaultSlotChanged { to, .. } => Some(*to),
            DataCallEvent::ShutdownComplete => None,
        }
    }

    /// Call the matching listener method
    pub fn dispatch(&self, listener: &mut dyn DataCallListener) {
        match self {
            DataCallEvent::ConnectionChanged {
                slot,
                purpose,
                state,
                reason,
            } => listener.on_connection_changed(*slot, *purpose, *state, *reason),
            DataCallEvent::PcoUpdated {
                slot,
                purpose,
                bearer_proto,
                pco_id,
                contents,
            } => listener.on_pco_updated(*slot, *purpose, bearer_proto, *pco_id, contents),
            DataCallEvent::DataCallError { slot, message } => {
                listener.on_data_call_error(*slot, message)
            }
            DataCallEvent::PermanentFailure {
                slot,
                purposes,
                cause,
            } => listener.on_permanent_failure(*slot, purposes, *cause),
            DataCallEvent::RetryExhausted { slot, purposes } => {
                listener.on_retry_exhausted(*slot, purposes)
            }
            DataCallEvent::DefaultSlotChanged { from, to } => {
                listener.on_default_slot_changed(*from, *to)
            }
            DataCallEvent::AllDataDisconnected { slot } => listener.on_all_data_disconnected(*slot),
            DataCallEvent::ShutdownComplete => listener.on_shutdown_complete(),
        }
    }
}

/// Observer of data call events
///
/// Every method has an empty default so listeners only implement what they
/// care about.
pub trait DataCallListener: Send {
    /// The state reported for a purpose changed
    fn on_connection_changed(
        &mut self,
        _slot: SlotId,
        _purpose: Purpose,
        _state: ConnState,
        _reason: Option<DisconnectReason>,
    ) {
    }

    /// A setup failed while the default purpose was attached
    fn on_data_call_error(&mut self, _slot: SlotId, _message: &str) {}

    /// Setup failed permanently
    fn on_permanent_failure(
        &mut self,
        _slot: SlotId,
        _purposes: &[Purpose],
        _cause: Option<FailCause>,
    ) {
    }

    /// Retry budget exhausted
    fn on_retry_exhausted(&mut self, _slot: SlotId, _purposes: &[Purpose]) {}

    /// The default data slot changed
    fn on_default_slot_changed(&mut self, _from: Option<SlotId>, _to: SlotId) {}

    /// Protocol configuration options arrived
    fn on_pco_updated(
        &mut self,
        _slot: SlotId,
        _purpose: Purpose,
        _bearer_proto: &str,
        _pco_id: u32,
        _contents: &[u8],
    ) {
    }

    /// A slot finished tearing everything down
    fn on_all_data_disconnected(&mut self, _slot: SlotId) {}

    /// Shutdown finished
    fn on_shutdown_complete(&mut self) {}
}

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

/// Set of registered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<(ListenerId, Box<dyn DataCallListener>)>,
    next_id: u32,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn register(&mut self, listener: Box<dyn DataCallListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        debug!("listener {} registered", id.0);
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    /// Dispatch events to every listener, in registration order
    pub fn deliver(&mut self, events: &[DataCallEvent]) {
        for event in events {
            for (_, listener) in self.listeners.iter_mut() {
                event.dispatch(listener.as_mut());
            }
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
