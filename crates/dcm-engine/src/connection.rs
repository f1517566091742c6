//! One physical data session
//!
//! A [`Connection`] owns the lifecycle of a session set up for one sharing
//! key. Purposes attach to it and detach from it; the session comes up when
//! the first purpose attaches and goes down when the last one leaves.
//!
//! The state machine performs no I/O. Every method appends [`ConnAction`]s
//! to an output vector, and the supervisor turns those into modem requests,
//! retry timers and binding notifications. Modem confirmations come back in
//! through the `on_*` methods.
//!
//! ```text
//!   Unknown/Disconnected --attach--> Connecting --ok--> Connected
//!          ^      ^                      |                 |
//!          |      +-------fail-----------+          last detach
//!          |                                               v
//!          +-----------------deactivate result------- Disconnecting
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use dcm_protocol::{
    ApnProfile, CallId, ConnState, ConnectionId, DataCallReport, DataRegistration,
    DeactivateReason, DisconnectReason, FailCause, Purpose, SetupFailure, SetupParams,
    SetupSuccess, SharingKey, SuggestedRetry,
};
use tracing::{debug, info, warn};

use crate::link::{compare_links, LinkChange, LinkInfo, TcpBufferTable};
use crate::retry::RetryPolicy;

/// Slot-wide facts a connection needs to make decisions
#[derive(Debug, Clone, Copy)]
pub struct ConnContext<'a> {
    /// Current data registration of the slot
    pub registration: &'a DataRegistration,
    /// Retry policy
    pub retry: &'a RetryPolicy,
    /// TCP buffer sizes per technology
    pub tcp_buffers: &'a TcpBufferTable,
}

/// Side effects requested by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAction {
    /// Send a setup request to the modem
    Setup(SetupParams),
    /// Send a deactivate request to the modem
    Deactivate {
        /// Session to tear down
        cid: CallId,
        /// Reason for the modem
        reason: DeactivateReason,
    },
    /// Arm the retry timer
    StartRetryTimer {
        /// Time until the retry
        delay: Duration,
        /// Generation to echo back when the timer fires
        generation: u64,
    },
    /// Disarm the retry timer
    CancelRetryTimer,
    /// These purposes' bindings changed and must be reported now
    Notify(Vec<Purpose>),
    /// Report the binding at the end of the turn if it is still in `expect`
    NotifyDeferred {
        /// Binding to report
        purpose: Purpose,
        /// State the binding must still be in
        expect: ConnState,
    },
    /// Setup gave up for these purposes
    Failed {
        /// Purposes that were attached
        purposes: Vec<Purpose>,
        /// Permanent failure or retry exhaustion
        reason: DisconnectReason,
        /// Setup failure cause, when the network gave one
        cause: Option<FailCause>,
    },
    /// A setup request failed
    SetupError {
        /// Failure cause
        cause: FailCause,
    },
    /// The serving technology left the bearer set and these purposes were released
    Detached(Vec<Purpose>),
    /// State changed
    StateChanged(ConnState),
}

/// One physical data session and the purposes using it
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    profile: ApnProfile,
    key: SharingKey,
    candidates: BTreeSet<Purpose>,
    state: ConnState,
    link: LinkInfo,
    retry_count: u32,
    retry_generation: u64,
    retry_armed: bool,
    attached: BTreeSet<Purpose>,
}

impl Connection {
    /// Create a connection for the first profile with its sharing key
    pub fn new(id: ConnectionId, profile: ApnProfile) -> Self {
        let key = profile.sharing_key();
        let candidates = profile.purposes.iter().copied().collect();
        Self {
            id,
            profile,
            key,
            candidates,
            state: ConnState::Unknown,
            link: LinkInfo::default(),
            retry_count: 0,
            retry_generation: 0,
            retry_armed: false,
            attached: BTreeSet::new(),
        }
    }

    /// Local handle
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Profile used to set the session up
    pub fn profile(&self) -> &ApnProfile {
        &self.profile
    }

    /// Sharing key
    pub fn key(&self) -> &SharingKey {
        &self.key
    }

    /// Current state
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Link facts (empty unless connected, except the session id)
    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    /// Session id, if the modem assigned one
    pub fn cid(&self) -> Option<CallId> {
        self.link.cid
    }

    /// Retries scheduled since the last success or reset
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether a retry timer is armed
    pub fn retry_pending(&self) -> bool {
        self.retry_armed
    }

    /// Purposes any profile mapped to this connection declares
    pub fn candidates(&self) -> &BTreeSet<Purpose> {
        &self.candidates
    }

    /// Record another purpose declared by a profile sharing this session
    pub fn add_candidate(&mut self, purpose: Purpose) {
        self.candidates.insert(purpose);
    }

    /// Purposes currently attached
    pub fn attached(&self) -> impl Iterator<Item = Purpose> + '_ {
        self.attached.iter().copied()
    }

    /// Whether the purpose is attached
    pub fn is_attached(&self, purpose: Purpose) -> bool {
        self.attached.contains(&purpose)
    }

    /// Whether any purpose is attached
    pub fn has_attached(&self) -> bool {
        !self.attached.is_empty()
    }

    /// Whether the session may run on the serving technology
    pub fn is_compatible(&self, registration: &DataRegistration) -> bool {
        self.profile.bearer.supports(registration.serving_tech())
    }

    fn attached_list(&self) -> Vec<Purpose> {
        self.attached.iter().copied().collect()
    }

    fn set_state(&mut self, state: ConnState, out: &mut Vec<ConnAction>) {
        if self.state == state {
            return;
        }
        if self.state == ConnState::Connected {
            self.link.clear_details();
        }
        debug!("{} {} -> {}", self.id, self.state, state);
        self.state = state;
        out.push(ConnAction::StateChanged(state));
    }

    fn reset(&mut self, out: &mut Vec<ConnAction>) {
        self.set_state(ConnState::Disconnected, out);
        self.link.clear();
        self.retry_count = 0;
    }

    fn cancel_retry(&mut self, out: &mut Vec<ConnAction>) {
        if self.retry_armed {
            self.retry_armed = false;
            self.retry_generation += 1;
            out.push(ConnAction::CancelRetryTimer);
        }
    }

    fn setup(&mut self, ctx: &ConnContext<'_>, out: &mut Vec<ConnAction>) {
        let Some(tech) = ctx.registration.serving_tech() else {
            debug!("{} not registered, setup postponed", self.id);
            return;
        };
        let params = SetupParams {
            apn: self.profile.apn.clone(),
            user: self.profile.user.clone(),
            password: self.profile.password.clone(),
            auth: self.profile.auth_or_default(),
            protocol: self.profile.protocol_for(ctx.registration.roaming),
            tech,
        };
        info!(
            "{} setting up {} ({}, {}) on {}",
            self.id, self.key, params.protocol, params.auth.as_str(), tech
        );
        self.set_state(ConnState::Connecting, out);
        out.push(ConnAction::Setup(params));
    }

    fn deactivate(&mut self, reason: DeactivateReason, out: &mut Vec<ConnAction>) {
        let Some(cid) = self.link.cid else {
            warn!("{} has no session id to deactivate", self.id);
            self.reset(out);
            return;
        };
        info!("{} deactivating {}", self.id, cid);
        self.set_state(ConnState::Disconnecting, out);
        out.push(ConnAction::Deactivate { cid, reason });
    }

    fn schedule_retry(
        &mut self,
        suggested: SuggestedRetry,
        ctx: &ConnContext<'_>,
        out: &mut Vec<ConnAction>,
    ) {
        match ctx.retry.next_delay(self.retry_count, suggested) {
            Some(delay) => {
                self.retry_count += 1;
                self.retry_generation += 1;
                self.retry_armed = true;
                debug!(
                    "{} retry #{} in {:?}",
                    self.id, self.retry_count, delay
                );
                out.push(ConnAction::StartRetryTimer {
                    delay,
                    generation: self.retry_generation,
                });
            }
            None => {
                info!("{} gave up after {} retries", self.id, self.retry_count);
                self.retry_count = 0;
                out.push(ConnAction::Failed {
                    purposes: self.attached_list(),
                    reason: DisconnectReason::RetryFailed,
                    cause: None,
                });
            }
        }
    }

    /// Attach a purpose, setting the session up if needed
    pub fn attach(&mut self, purpose: Purpose, ctx: &ConnContext<'_>, out: &mut Vec<ConnAction>) {
        if self.attached.insert(purpose) {
            debug!("{} attached {}", self.id, purpose);
        }
        match self.state {
            ConnState::Connecting | ConnState::Disconnecting => {}
            ConnState::Connected => out.push(ConnAction::NotifyDeferred {
                purpose,
                expect: ConnState::Connected,
            }),
            ConnState::Disconnected | ConnState::Unknown => {
                self.cancel_retry(out);
                self.setup(ctx, out);
            }
        }
    }

    /// Detach a purpose, tearing the session down when it was the last one
    pub fn detach(&mut self, purpose: Purpose, reason: DeactivateReason, out: &mut Vec<ConnAction>) {
        if self.attached.remove(&purpose) {
            debug!("{} detached {}", self.id, purpose);
            if self.state.is_terminal() {
                if self.attached.is_empty() {
                    self.cancel_retry(out);
                    self.reset(out);
                }
                return;
            }
            out.push(ConnAction::NotifyDeferred {
                purpose,
                expect: ConnState::Disconnected,
            });
        }
        if self.attached.is_empty() && self.state == ConnState::Connected {
            self.deactivate(reason, out);
        }
    }

    /// Detach every purpose, returning the ones that were attached
    pub fn detach_all(&mut self, reason: DeactivateReason, out: &mut Vec<ConnAction>) -> Vec<Purpose> {
        let purposes = self.attached_list();
        for purpose in &purposes {
            self.detach(*purpose, reason, out);
        }
        purposes
    }

    /// Handle the modem's answer to a setup request
    pub fn on_setup_result(
        &mut self,
        result: Result<SetupSuccess, SetupFailure>,
        ctx: &ConnContext<'_>,
        out: &mut Vec<ConnAction>,
    ) {
        if self.state != ConnState::Connecting {
            warn!("{} setup result while {}, ignored", self.id, self.state);
            return;
        }
        match result {
            Err(failure) => {
                warn!("{} setup failed: {}", self.id, failure.cause);
                self.set_state(ConnState::Disconnected, out);
                if self.attached.is_empty() {
                    debug!("{} no longer requested", self.id);
                    return;
                }
                out.push(ConnAction::SetupError {
                    cause: failure.cause,
                });
                if failure.is_final() {
                    out.push(ConnAction::Failed {
                        purposes: self.attached_list(),
                        reason: DisconnectReason::PermanentFailure,
                        cause: Some(failure.cause),
                    });
                    return;
                }
                self.schedule_retry(failure.retry, ctx, out);
            }
            Ok(success) => {
                self.retry_count = 0;
                self.link.cid = Some(success.cid);
                if self.attached.is_empty() {
                    info!("{} came up with nobody attached", self.id);
                    self.deactivate(DeactivateReason::None, out);
                    return;
                }
                let mut link = LinkInfo::from_setup(&success);
                link.tcp_buffer_sizes = ctx
                    .registration
                    .serving_tech()
                    .map(|tech| ctx.tcp_buffers.sizes_for(tech));
                self.link = link;
                info!(
                    "{} connected on {} ({})",
                    self.id,
                    success.ifname,
                    success.addresses.join(", ")
                );
                self.set_state(ConnState::Connected, out);
                out.push(ConnAction::Notify(self.attached_list()));
            }
        }
    }

    /// Handle the modem's answer to a deactivate request
    ///
    /// A failed deactivate still counts as disconnected.
    pub fn on_deactivate_result(
        &mut self,
        success: bool,
        ctx: &ConnContext<'_>,
        out: &mut Vec<ConnAction>,
    ) {
        if self.state != ConnState::Disconnecting {
            warn!("{} deactivate result while {}, ignored", self.id, self.state);
            return;
        }
        if !success {
            warn!("{} deactivate failed, treating as disconnected", self.id);
        }
        self.reset(out);
        if self.has_attached() {
            self.setup(ctx, out);
            out.push(ConnAction::Notify(self.attached_list()));
        }
    }

    /// Handle this session's entry of a data call list
    ///
    /// `None` means the list did not mention the session.
    pub fn on_report(
        &mut self,
        report: Option<&DataCallReport>,
        ctx: &ConnContext<'_>,
        out: &mut Vec<ConnAction>,
    ) {
        if matches!(self.state, ConnState::Connecting | ConnState::Disconnecting) {
            debug!("{} report while {}, ignored", self.id, self.state);
            return;
        }

        let report = match report {
            Some(report) if report.activity.is_connected() => report,
            _ => {
                if self.state.is_terminal() {
                    return;
                }
                info!("{} dropped by the network", self.id);
                self.set_state(ConnState::Disconnected, out);
                out.push(ConnAction::Notify(self.attached_list()));
                self.reset(out);
                if self.attached.is_empty() {
                    return;
                }
                if !ctx.registration.is_ready() {
                    debug!("{} not registered, waiting before reconnecting", self.id);
                    return;
                }
                if self.is_compatible(ctx.registration) {
                    self.schedule_retry(SuggestedRetry::None, ctx, out);
                } else {
                    let released = self.detach_all(DeactivateReason::None, out);
                    out.push(ConnAction::Detached(released));
                }
                return;
            }
        };

        if self.state != ConnState::Connected {
            debug!("{} reported up while {}, ignored", self.id, self.state);
            return;
        }

        let updated = LinkInfo::from_report(report);
        match compare_links(&updated, &self.link) {
            LinkChange::Identical => {}
            LinkChange::Changed => {
                debug!("{} link parameters changed", self.id);
                self.link.apply_minor(&updated);
                out.push(ConnAction::Notify(self.attached_list()));
            }
            LinkChange::Deactivate => {
                info!("{} interface or address lost, tearing down", self.id);
                self.deactivate(DeactivateReason::None, out);
                out.push(ConnAction::Notify(self.attached_list()));
            }
        }
    }

    /// Re-evaluate after the serving technology changed
    pub fn on_serving_tech_changed(&mut self, ctx: &ConnContext<'_>, out: &mut Vec<ConnAction>) {
        if self.attached.is_empty() {
            return;
        }
        if !self.is_compatible(ctx.registration) {
            info!(
                "{} serving technology outside bearer {}, releasing purposes",
                self.id, self.profile.bearer
            );
            let released = self.detach_all(DeactivateReason::None, out);
            out.push(ConnAction::Detached(released));
            return;
        }
        if self.state == ConnState::Connected {
            let sizes = ctx
                .registration
                .serving_tech()
                .map(|tech| ctx.tcp_buffers.sizes_for(tech));
            if sizes != self.link.tcp_buffer_sizes {
                self.link.tcp_buffer_sizes = sizes;
                out.push(ConnAction::Notify(self.attached_list()));
            }
        }
    }

    /// Handle a retry timer firing
    ///
    /// Fires from a superseded or cancelled timer are ignored.
    pub fn on_retry_timer(&mut self, generation: u64, ctx: &ConnContext<'_>, out: &mut Vec<ConnAction>) {
        if !self.retry_armed || generation != self.retry_generation {
            debug!("{} stale retry timer ignored", self.id);
            return;
        }
        self.retry_armed = false;
        if !self.state.is_terminal() || self.attached.is_empty() {
            return;
        }
        self.setup(ctx, out);
    }

    /// Disarm timers before the connection is discarded
    pub fn retire(&mut self, out: &mut Vec<ConnAction>) {
        self.cancel_retry(out);
    }
}
