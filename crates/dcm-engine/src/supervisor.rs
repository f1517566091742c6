//! Per-slot connection supervisor
//!
//! A [`ConnectionSupervisor`] owns the connections and bindings of one SIM
//! slot. It builds them from the slot's profile list, sharing one connection
//! between profiles with equal sharing keys, and reconciles each binding's
//! desired state (enabled, settings, Wi-Fi, registration) with the actual
//! state of its connections.
//!
//! Every public method is one turn: it runs to completion, queues effects
//! and events, and finishes by running any reconciliation the turn asked
//! for and flushing deferred binding notifications.

use std::collections::{BTreeMap, BTreeSet};

use dcm_protocol::{
    select_initial_attach, ApnProfile, AttachApnParams, ConnState, ConnectionId, DataCallReport,
    DataRegistration, DeactivateReason, DisconnectReason, ModemRequest, PcoData, Purpose,
    RadioPower, RadioTech, SetupFailure, SetupSuccess, SlotId,
};
use tracing::{debug, info, warn};

use crate::binding::{InterfaceBinding, InterfaceInfo};
use crate::connection::{ConnAction, ConnContext, Connection};
use crate::effects::{Effect, RoutingUpdate};
use crate::error::DataCallError;
use crate::events::DataCallEvent;
use crate::link::TcpBufferTable;
use crate::retry::RetryPolicy;
use crate::state::{SimIdentity, SlotSettings};

/// Signals from a supervisor to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    /// A requested teardown of every connection finished
    AllDataDisconnected,
}

/// Connections and bindings of one SIM slot
#[derive(Debug)]
pub struct ConnectionSupervisor {
    slot: SlotId,
    retry: RetryPolicy,
    tcp_buffers: TcpBufferTable,

    connections: Vec<Connection>,
    bindings: BTreeMap<Purpose, InterfaceBinding>,
    next_conn_id: u32,
    profiles: Vec<ApnProfile>,
    pending_profiles: Option<Vec<ApnProfile>>,

    settings: SlotSettings,
    mobile_whitelist: BTreeSet<Purpose>,
    registration: DataRegistration,
    radio: RadioPower,
    wifi_active: bool,
    need_recover_after_reset: bool,
    deactivating_all: bool,
    shutting_down: bool,
    identity: SimIdentity,

    deferred: Vec<(Purpose, ConnState)>,
    reconcile_requested: bool,

    effects: Vec<Effect>,
    events: Vec<DataCallEvent>,
    signals: Vec<SupervisorSignal>,
}

impl ConnectionSupervisor {
    /// Create an empty supervisor for a slot
    pub fn new(slot: SlotId, retry: RetryPolicy, tcp_buffers: TcpBufferTable) -> Self {
        Self {
            slot,
            retry,
            tcp_buffers,
            connections: Vec::new(),
            bindings: BTreeMap::new(),
            next_conn_id: 1,
            profiles: Vec::new(),
            pending_profiles: None,
            settings: SlotSettings::default(),
            mobile_whitelist: BTreeSet::new(),
            registration: DataRegistration::default(),
            radio: RadioPower::Unknown,
            wifi_active: false,
            need_recover_after_reset: false,
            deactivating_all: false,
            shutting_down: false,
            identity: SimIdentity::default(),
            deferred: Vec::new(),
            reconcile_requested: false,
            effects: Vec::new(),
            events: Vec::new(),
            signals: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Slot this supervisor owns
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Current settings
    pub fn settings(&self) -> &SlotSettings {
        &self.settings
    }

    /// All connections
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connection by handle
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    /// Binding of a purpose
    pub fn binding(&self, purpose: Purpose) -> Option<&InterfaceBinding> {
        self.bindings.get(&purpose)
    }

    /// Purposes with a binding
    pub fn purposes(&self) -> impl Iterator<Item = Purpose> + '_ {
        self.bindings.keys().copied()
    }

    /// Profiles currently applied
    pub fn profiles(&self) -> &[ApnProfile] {
        &self.profiles
    }

    /// Whether a profile list waits for the current connections to drain
    pub fn has_pending_profiles(&self) -> bool {
        self.pending_profiles.is_some()
    }

    /// Last data registration
    pub fn registration(&self) -> &DataRegistration {
        &self.registration
    }

    /// Whether a teardown of every connection is in progress
    pub fn is_deactivating_all(&self) -> bool {
        self.deactivating_all
    }

    /// Whether every connection is Disconnected or Unknown
    pub fn all_data_disconnected(&self) -> bool {
        self.connections.iter().all(|c| c.state().is_terminal())
    }

    /// SIM identity of the slot
    pub fn identity(&self) -> &SimIdentity {
        &self.identity
    }

    /// State of a purpose, Unknown when it has no binding
    pub fn data_call_state(&self, purpose: Purpose) -> ConnState {
        self.bindings
            .get(&purpose)
            .map(|b| b.state(&self.connections))
            .unwrap_or(ConnState::Unknown)
    }

    /// Current snapshot of a binding
    pub fn interface_info(&self, purpose: Purpose) -> Option<InterfaceInfo> {
        self.bindings
            .get(&purpose)
            .map(|b| b.info(self.slot, &self.connections))
    }

    /// Take queued effects
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Take queued events
    pub fn drain_events(&mut self) -> Vec<DataCallEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take queued signals
    pub fn drain_signals(&mut self) -> Vec<SupervisorSignal> {
        std::mem::take(&mut self.signals)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Change the data enabled flag; reconciliation is up to the caller
    pub fn set_data_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    /// Change the roaming flag; reconciliation is up to the caller
    pub fn set_roaming_enabled(&mut self, enabled: bool) {
        self.settings.roaming_enabled = enabled;
    }

    /// Mark this slot as carrying the default data route or not
    pub fn set_default_slot(&mut self, is_default: bool) {
        self.settings.is_default_slot = is_default;
    }

    /// Non-default purposes allowed while mobile data is off
    pub fn set_mobile_whitelist(&mut self, purposes: impl IntoIterator<Item = Purpose>) {
        self.mobile_whitelist = purposes.into_iter().collect();
    }

    /// Record the ICCID stored from a previous run
    pub fn set_previous_iccid(&mut self, iccid: Option<String>) {
        self.identity.previous = iccid;
    }

    /// Record the ICCID read from the card
    pub fn set_current_iccid(&mut self, iccid: Option<String>) {
        self.identity.current = iccid;
    }

    fn is_data_allowed(&self, purpose: Purpose) -> bool {
        self.settings.enabled
            || (!purpose.is_default() && self.mobile_whitelist.contains(&purpose))
    }

    // =========================================================================
    // Profile list
    // =========================================================================

    /// Replace the profile list
    ///
    /// Connections are torn down first and the new list is applied once
    /// every connection is terminal. A list arriving while another one is
    /// pending replaces it.
    pub fn apply_profile_list(&mut self, profiles: Vec<ApnProfile>) {
        if self.shutting_down {
            warn!("{}: profile list ignored during shutdown", self.slot);
            return;
        }
        if self.pending_profiles.is_some() {
            debug!("{}: replacing pending profile list", self.slot);
            self.pending_profiles = Some(profiles);
            return;
        }
        info!("{}: new profile list with {} entries", self.slot, profiles.len());
        self.pending_profiles = Some(profiles);
        self.begin_deactivate_all(DisconnectReason::ApnChanged);
        self.end_turn();
    }

    fn rebuild(&mut self, profiles: Vec<ApnProfile>) {
        let mut actions = Vec::new();
        for conn in self.connections.iter_mut() {
            actions.clear();
            conn.retire(&mut actions);
            if actions.contains(&ConnAction::CancelRetryTimer) {
                self.effects.push(Effect::CancelRetryTimer {
                    slot: self.slot,
                    conn: conn.id(),
                });
            }
        }
        for purpose in self.bindings.keys() {
            self.effects.push(Effect::Routing(RoutingUpdate::Unregister {
                slot: self.slot,
                purpose: *purpose,
            }));
        }
        self.connections.clear();
        self.bindings.clear();
        self.deferred.clear();

        let mut applied = Vec::new();
        for profile in profiles {
            if let Err(e) = profile.validate() {
                warn!("{}: skipping profile: {}", self.slot, e);
                continue;
            }
            let index = match self
                .connections
                .iter()
                .position(|c| c.profile().shares_with(&profile))
            {
                Some(index) => index,
                None => {
                    let id = ConnectionId(self.next_conn_id);
                    self.next_conn_id += 1;
                    debug!("{}: {} for {}", self.slot, id, profile.sharing_key());
                    self.connections.push(Connection::new(id, profile.clone()));
                    self.connections.len() - 1
                }
            };
            let conn = &mut self.connections[index];
            for purpose in &profile.purposes {
                conn.add_candidate(*purpose);
                self.bindings
                    .entry(*purpose)
                    .or_insert_with(|| InterfaceBinding::new(*purpose))
                    .add_candidate(conn.id(), &profile);
            }
            applied.push(profile);
        }
        self.profiles = applied;

        if let Some(binding) = self.bindings.get_mut(&Purpose::Default) {
            binding.enable();
        }
        let slot = self.slot;
        for binding in self.bindings.values_mut() {
            let info = binding.info(slot, &self.connections);
            binding.set_last_reported(info.clone());
            self.effects.push(Effect::Routing(RoutingUpdate::Register(info)));
        }
        info!(
            "{}: {} connections serving {} purposes",
            self.slot,
            self.connections.len(),
            self.bindings.len()
        );
        self.send_initial_attach();
    }

    fn send_initial_attach(&mut self) {
        let Some(profile) = select_initial_attach(&self.profiles) else {
            debug!("{}: no profile for initial attach", self.slot);
            return;
        };
        let params = AttachApnParams {
            apn: profile.apn.clone(),
            protocol: profile.protocol_for(self.registration.roaming),
            auth: profile.auth_or_default(),
            user: profile.user.clone(),
            password: profile.password.clone(),
        };
        debug!("{}: initial attach APN {}", self.slot, params.apn);
        self.effects.push(Effect::Modem {
            slot: self.slot,
            request: ModemRequest::SetInitialAttachApn(params),
        });
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Enable a purpose and reconcile it
    pub fn setup_data_call_by_type(&mut self, purpose: Purpose) -> Result<(), DataCallError> {
        let Some(binding) = self.bindings.get_mut(&purpose) else {
            return Err(DataCallError::NoBinding {
                slot: self.slot,
                purpose,
            });
        };
        binding.enable();
        self.reconcile(purpose);
        self.end_turn();
        Ok(())
    }

    /// Release one use of a purpose
    ///
    /// The default purpose is refused. The binding is disconnected when its
    /// last user leaves.
    pub fn deactivate_data_call_by_type(&mut self, purpose: Purpose) -> Result<(), DataCallError> {
        let Some(binding) = self.bindings.get_mut(&purpose) else {
            return Err(DataCallError::NoBinding {
                slot: self.slot,
                purpose,
            });
        };
        if purpose.is_default() {
            return Err(DataCallError::DefaultPurposeNotControllable);
        }
        if binding.disable() {
            self.disconnect_binding(purpose, DisconnectReason::ApnDisabled);
        }
        self.end_turn();
        Ok(())
    }

    /// Reconcile every enabled binding
    pub fn update_all(&mut self) {
        self.reconcile_all();
        self.end_turn();
    }

    /// Tear down every enabled binding
    ///
    /// An [`SupervisorSignal::AllDataDisconnected`] follows once every
    /// connection is terminal, right away if none is active.
    pub fn deactivate_all(&mut self, reason: DisconnectReason) {
        self.begin_deactivate_all(reason);
        self.end_turn();
    }

    /// Stop reconnecting and tear everything down for power off
    pub fn begin_shutdown(&mut self) {
        info!("{}: shutting down", self.slot);
        self.shutting_down = true;
        self.begin_deactivate_all(DisconnectReason::RadioShutdown);
        self.end_turn();
    }

    /// Drop every connection and binding after power off
    pub fn finish_shutdown(&mut self) {
        self.pending_profiles = None;
        self.rebuild(Vec::new());
    }

    /// Report a change of Wi-Fi availability
    pub fn set_wifi_active(&mut self, active: bool) {
        if self.wifi_active == active {
            return;
        }
        self.wifi_active = active;
        self.reconcile_all();
        self.end_turn();
    }

    // =========================================================================
    // Modem confirmations
    // =========================================================================

    /// Result of a setup request
    pub fn on_setup_result(&mut self, conn: ConnectionId, result: Result<SetupSuccess, SetupFailure>) {
        self.drive(conn, |c, ctx, out| c.on_setup_result(result, ctx, out));
        self.end_turn();
    }

    /// Result of a deactivate request
    pub fn on_deactivate_result(&mut self, conn: ConnectionId, success: bool) {
        self.drive(conn, |c, ctx, out| c.on_deactivate_result(success, ctx, out));
        self.end_turn();
    }

    /// A retry timer fired
    pub fn on_retry_timer(&mut self, conn: ConnectionId, generation: u64) {
        self.drive(conn, |c, ctx, out| c.on_retry_timer(generation, ctx, out));
        self.end_turn();
    }

    // =========================================================================
    // Modem indications
    // =========================================================================

    /// Correlate a data call list with the connections by session id
    ///
    /// Connected connections missing from the list count as dropped.
    pub fn on_data_call_list(&mut self, reports: &[DataCallReport]) {
        let mut seen = BTreeSet::new();
        for report in reports {
            let Some(id) = self
                .connections
                .iter()
                .find(|c| c.cid() == Some(report.cid))
                .map(|c| c.id())
            else {
                debug!("{}: report for unknown {}", self.slot, report.cid);
                continue;
            };
            seen.insert(id);
            self.drive(id, |c, ctx, out| c.on_report(Some(report), ctx, out));
        }

        let missing: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.state() == ConnState::Connected && !seen.contains(&c.id()))
            .map(|c| c.id())
            .collect();
        for id in missing {
            warn!("{}: {} missing from data call list", self.slot, id);
            self.drive(id, |c, ctx, out| c.on_report(None, ctx, out));
        }
        self.end_turn();
    }

    /// Data registration changed
    ///
    /// Reports equal to the last one are ignored.
    pub fn on_data_registration(&mut self, registration: DataRegistration) {
        if registration == self.registration {
            return;
        }
        debug!(
            "{}: registration {:?} on {:?}{}",
            self.slot,
            registration.state,
            registration.tech,
            if registration.roaming { " (roaming)" } else { "" }
        );
        self.registration = registration;
        if registration.is_ready() {
            let ids: Vec<ConnectionId> = self.connections.iter().map(|c| c.id()).collect();
            for id in ids {
                self.drive(id, |c, ctx, out| c.on_serving_tech_changed(ctx, out));
            }
        }
        self.reconcile_all();
        self.end_turn();
    }

    /// Radio power changed
    pub fn on_radio_power(&mut self, power: RadioPower) {
        let was = self.radio;
        self.radio = power;
        if power == RadioPower::Enabled {
            if self.need_recover_after_reset {
                info!("{}: restoring data registration after modem restart", self.slot);
                self.need_recover_after_reset = false;
                self.effects.push(Effect::Modem {
                    slot: self.slot,
                    request: ModemRequest::SetDataRegistration {
                        attach: self.settings.is_default_slot,
                    },
                });
            }
            if was != RadioPower::Enabled {
                self.reconcile_all();
            }
        }
        self.end_turn();
    }

    /// The modem restarted; registration is restored on the next radio on
    pub fn on_modem_restart(&mut self, reason: &str) {
        warn!("{}: modem restarted: {}", self.slot, reason);
        self.need_recover_after_reset = true;
    }

    /// Route protocol configuration options to the purposes of their session
    ///
    /// Falls back to connecting connections when no connected one carries
    /// the session id.
    pub fn on_pco(&mut self, pco: &PcoData) {
        let mut targets: Vec<&Connection> = self
            .connections
            .iter()
            .filter(|c| c.state() == ConnState::Connected && c.cid() == Some(pco.cid))
            .collect();
        if targets.is_empty() {
            targets = self
                .connections
                .iter()
                .filter(|c| c.state() == ConnState::Connecting && c.has_attached())
                .collect();
        }
        if targets.is_empty() {
            debug!("{}: no connection for PCO on {}", self.slot, pco.cid);
            return;
        }
        for conn in targets {
            for purpose in conn.attached() {
                self.events.push(DataCallEvent::PcoUpdated {
                    slot: self.slot,
                    purpose,
                    bearer_proto: pco.bearer_proto.clone(),
                    pco_id: pco.pco_id,
                    contents: pco.contents.clone(),
                });
            }
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    fn reconcile_all(&mut self) {
        let enabled: Vec<Purpose> = self
            .bindings
            .values()
            .filter(|b| b.is_enabled())
            .map(|b| b.purpose())
            .collect();
        for purpose in enabled {
            self.reconcile(purpose);
        }
    }

    fn reconcile(&mut self, purpose: Purpose) {
        let Some(binding) = self.bindings.get(&purpose) else {
            debug!("{}: no binding for {}", self.slot, purpose);
            return;
        };
        if self.shutting_down {
            return;
        }
        if self.radio != RadioPower::Enabled && self.registration.tech != Some(RadioTech::Iwlan) {
            debug!("{}: radio not on, {} waits", self.slot, purpose);
            return;
        }
        if !self.registration.is_ready() {
            debug!("{}: not registered, {} waits", self.slot, purpose);
            return;
        }

        let connected = binding.state(&self.connections) == ConnState::Connected;
        if !self.is_data_allowed(purpose)
            || (self.registration.roaming && !self.settings.roaming_enabled)
        {
            self.disconnect_binding(purpose, DisconnectReason::SettingDisabled);
            return;
        }
        if purpose.is_default() && self.wifi_active {
            if connected {
                self.disconnect_binding(purpose, DisconnectReason::WifiConnected);
            }
            return;
        }
        if connected || self.pending_profiles.is_some() || self.deactivating_all {
            return;
        }
        self.connect_binding(purpose);
    }

    fn connect_binding(&mut self, purpose: Purpose) {
        let Some(binding) = self.bindings.get(&purpose) else {
            return;
        };
        match binding.select_compatible(&self.connections, &self.registration) {
            Some(id) => self.drive(id, |c, ctx, out| c.attach(purpose, ctx, out)),
            None => debug!(
                "{}: no connection for {} on {:?}",
                self.slot, purpose, self.registration.tech
            ),
        }
    }

    fn disconnect_binding(&mut self, purpose: Purpose, reason: DisconnectReason) {
        let Some(binding) = self.bindings.get_mut(&purpose) else {
            return;
        };
        binding.set_reason(Some(reason));
        let attached = binding.attached_candidates(&self.connections);
        if !attached.is_empty() {
            debug!("{}: disconnecting {} ({})", self.slot, purpose, reason);
        }
        let deactivate_reason = if reason == DisconnectReason::RadioShutdown {
            DeactivateReason::RadioOff
        } else {
            DeactivateReason::None
        };
        for id in attached {
            self.drive(id, |c, _, out| c.detach(purpose, deactivate_reason, out));
        }
    }

    fn begin_deactivate_all(&mut self, reason: DisconnectReason) {
        self.deactivating_all = true;
        let enabled: Vec<Purpose> = self
            .bindings
            .values()
            .filter(|b| b.is_enabled())
            .map(|b| b.purpose())
            .collect();
        for purpose in enabled {
            self.disconnect_binding(purpose, reason);
        }
    }

    fn on_all_disconnected(&mut self) {
        info!("{}: all data disconnected", self.slot);
        if let Some(profiles) = self.pending_profiles.take() {
            self.rebuild(profiles);
            self.reconcile_all();
        }
        self.events.push(DataCallEvent::AllDataDisconnected { slot: self.slot });
        self.signals.push(SupervisorSignal::AllDataDisconnected);
    }

    // =========================================================================
    // Turn plumbing
    // =========================================================================

    fn drive<F>(&mut self, id: ConnectionId, f: F)
    where
        F: FnOnce(&mut Connection, &ConnContext<'_>, &mut Vec<ConnAction>),
    {
        let Some(index) = self.connections.iter().position(|c| c.id() == id) else {
            debug!("{}: {} is gone, input dropped", self.slot, id);
            return;
        };
        let mut actions = Vec::new();
        let ctx = ConnContext {
            registration: &self.registration,
            retry: &self.retry,
            tcp_buffers: &self.tcp_buffers,
        };
        f(&mut self.connections[index], &ctx, &mut actions);
        self.apply_actions(id, actions);
    }

    fn apply_actions(&mut self, id: ConnectionId, actions: Vec<ConnAction>) {
        let slot = self.slot;
        for action in actions {
            match action {
                ConnAction::Setup(params) => self.effects.push(Effect::Modem {
                    slot,
                    request: ModemRequest::SetupDataCall { conn: id, params },
                }),
                ConnAction::Deactivate { cid, reason } => self.effects.push(Effect::Modem {
                    slot,
                    request: ModemRequest::DeactivateDataCall {
                        conn: id,
                        cid,
                        reason,
                    },
                }),
                ConnAction::StartRetryTimer { delay, generation } => {
                    self.effects.push(Effect::StartRetryTimer {
                        slot,
                        conn: id,
                        generation,
                        delay,
                    })
                }
                ConnAction::CancelRetryTimer => {
                    self.effects.push(Effect::CancelRetryTimer { slot, conn: id })
                }
                ConnAction::Notify(purposes) => {
                    for purpose in purposes {
                        self.report_binding(purpose);
                    }
                }
                ConnAction::NotifyDeferred { purpose, expect } => {
                    self.deferred.push((purpose, expect));
                }
                ConnAction::Failed {
                    purposes,
                    reason,
                    cause,
                } => {
                    for purpose in &purposes {
                        if let Some(binding) = self.bindings.get_mut(purpose) {
                            binding.set_reason(Some(reason));
                        }
                        self.report_binding(*purpose);
                    }
                    let event = match reason {
                        DisconnectReason::PermanentFailure => DataCallEvent::PermanentFailure {
                            slot,
                            purposes,
                            cause,
                        },
                        _ => DataCallEvent::RetryExhausted { slot, purposes },
                    };
                    self.events.push(event);
                }
                ConnAction::SetupError { cause } => {
                    let Some(conn) = self.connection(id) else {
                        continue;
                    };
                    if conn.is_attached(Purpose::Default) {
                        let message = format!("{} setup failed: {}", conn.key(), cause);
                        self.events.push(DataCallEvent::DataCallError { slot, message });
                    }
                }
                ConnAction::Detached(purposes) => {
                    debug!("{}: {:?} released by {}", slot, purposes, id);
                    self.reconcile_requested = true;
                }
                ConnAction::StateChanged(_) => {}
            }
        }
    }

    fn report_binding(&mut self, purpose: Purpose) {
        let slot = self.slot;
        let Some(binding) = self.bindings.get_mut(&purpose) else {
            return;
        };
        let info = binding.info(slot, &self.connections);
        let previous = binding.last_reported();
        if previous == Some(&info) {
            return;
        }
        let state_changed = previous.map(|p| p.state) != Some(info.state);
        binding.set_last_reported(info.clone());
        if state_changed {
            info!("{}: {} {}", slot, purpose, info.state);
            self.events.push(DataCallEvent::ConnectionChanged {
                slot,
                purpose,
                state: info.state,
                reason: info.reason,
            });
        }
        self.effects.push(Effect::Routing(RoutingUpdate::Update(info)));
    }

    fn end_turn(&mut self) {
        loop {
            if std::mem::take(&mut self.reconcile_requested) {
                self.reconcile_all();
                continue;
            }
            if self.deactivating_all && self.all_data_disconnected() {
                self.deactivating_all = false;
                self.on_all_disconnected();
                continue;
            }
            break;
        }
        for (purpose, expect) in std::mem::take(&mut self.deferred) {
            let state = self
                .bindings
                .get(&purpose)
                .map(|b| b.state(&self.connections));
            if state == Some(expect) {
                self.report_binding(purpose);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcm_protocol::{CallId, FailCause};

    fn supervisor() -> ConnectionSupervisor {
        let mut sup = ConnectionSupervisor::new(
            SlotId(0),
            RetryPolicy::default(),
            TcpBufferTable::default(),
        );
        sup.set_data_enabled(true);
        sup.set_default_slot(true);
        sup
    }

    fn online(sup: &mut ConnectionSupervisor) {
        sup.on_radio_power(RadioPower::Enabled);
        sup.on_data_registration(DataRegistration::registered(RadioTech::Lte));
    }

    fn setup_requests(effects: &[Effect]) -> Vec<(ConnectionId, String)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Modem {
                    request: ModemRequest::SetupDataCall { conn, params },
                    ..
                } => Some((*conn, params.apn.clone())),
                _ => None,
            })
            .collect()
    }

    fn success(cid: i32) -> SetupSuccess {
        SetupSuccess {
            cid: CallId(cid),
            ifname: format!("rmnet{cid}"),
            addresses: vec![format!("10.0.{cid}.2/24")],
            gateways: vec![format!("10.0.{cid}.1")],
            dns_servers: vec!["8.8.8.8".into()],
            pcscf: vec![],
            mtu: None,
        }
    }

    #[test]
    fn test_profile_list_builds_shared_connections() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default, Purpose::Supl]),
            ApnProfile::new("internet").with_purposes([Purpose::Mms]),
            ApnProfile::new("ims").with_purposes([Purpose::Ims]),
            ApnProfile::new("").with_purposes([Purpose::Fota]),
        ]);

        assert_eq!(sup.connections().len(), 2);
        assert_eq!(sup.purposes().count(), 4);
        assert!(sup.binding(Purpose::Fota).is_none());
        assert!(sup.binding(Purpose::Default).unwrap().is_enabled());
        assert!(!sup.binding(Purpose::Mms).unwrap().is_enabled());

        let effects = sup.drain_effects();
        let registered = effects
            .iter()
            .filter(|e| matches!(e, Effect::Routing(RoutingUpdate::Register(_))))
            .count();
        assert_eq!(registered, 4);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Modem {
                request: ModemRequest::SetInitialAttachApn(params),
                ..
            } if params.apn == "internet"
        )));
        assert_eq!(
            sup.drain_events(),
            vec![DataCallEvent::AllDataDisconnected { slot: SlotId(0) }]
        );
    }

    #[test]
    fn test_default_connects_when_online() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        sup.drain_effects();
        online(&mut sup);

        let setups = setup_requests(&sup.drain_effects());
        assert_eq!(setups.len(), 1);
        let conn = setups[0].0;
        assert_eq!(sup.data_call_state(Purpose::Default), ConnState::Connecting);

        sup.drain_events();
        sup.on_setup_result(conn, Ok(success(1)));
        assert_eq!(sup.data_call_state(Purpose::Default), ConnState::Connected);
        assert_eq!(
            sup.drain_events(),
            vec![DataCallEvent::ConnectionChanged {
                slot: SlotId(0),
                purpose: Purpose::Default,
                state: ConnState::Connected,
                reason: None,
            }]
        );
        let info = sup.interface_info(Purpose::Default).unwrap();
        assert_eq!(info.name.as_deref(), Some("rmnet1"));
    }

    #[test]
    fn test_deactivate_all_waits_for_teardown() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let conn = setup_requests(&sup.drain_effects())[0].0;
        sup.on_setup_result(conn, Ok(success(1)));
        sup.drain_effects();
        sup.drain_events();
        sup.drain_signals();

        sup.deactivate_all(DisconnectReason::ServiceIdChanged);
        assert!(sup.is_deactivating_all());
        assert!(sup.drain_effects().iter().any(|e| matches!(
            e,
            Effect::Modem {
                request: ModemRequest::DeactivateDataCall { cid: CallId(1), .. },
                ..
            }
        )));
        assert!(!sup
            .drain_events()
            .contains(&DataCallEvent::AllDataDisconnected { slot: SlotId(0) }));

        sup.on_deactivate_result(conn, false);
        assert!(!sup.is_deactivating_all());
        assert!(sup
            .drain_events()
            .contains(&DataCallEvent::AllDataDisconnected { slot: SlotId(0) }));
        assert_eq!(sup.drain_signals(), vec![SupervisorSignal::AllDataDisconnected]);
    }

    #[test]
    fn test_nothing_happens_before_registration() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        sup.drain_effects();
        sup.on_radio_power(RadioPower::Enabled);
        assert!(setup_requests(&sup.drain_effects()).is_empty());
    }

    #[test]
    fn test_unknown_purpose_requests() {
        let mut sup = supervisor();
        assert_eq!(sup.data_call_state(Purpose::Mms), ConnState::Unknown);
        assert!(matches!(
            sup.setup_data_call_by_type(Purpose::Mms),
            Err(DataCallError::NoBinding { .. })
        ));

        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        assert!(matches!(
            sup.deactivate_data_call_by_type(Purpose::Default),
            Err(DataCallError::DefaultPurposeNotControllable)
        ));
    }

    #[test]
    fn test_data_disabled_keeps_whitelisted_purpose() {
        let mut sup = supervisor();
        sup.set_data_enabled(false);
        sup.set_mobile_whitelist([Purpose::Mms]);
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default]),
            ApnProfile::new("mms").with_purposes([Purpose::Mms]),
        ]);
        online(&mut sup);
        assert!(setup_requests(&sup.drain_effects()).is_empty());

        sup.setup_data_call_by_type(Purpose::Mms).unwrap();
        let setups = setup_requests(&sup.drain_effects());
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].1, "mms");
    }

    #[test]
    fn test_roaming_without_permission_disconnects() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let conn = setup_requests(&sup.drain_effects())[0].0;
        sup.on_setup_result(conn, Ok(success(1)));

        sup.on_data_registration(DataRegistration::registered(RadioTech::Lte).roaming());
        assert_eq!(sup.data_call_state(Purpose::Default), ConnState::Disconnected);
        assert_eq!(
            sup.binding(Purpose::Default).unwrap().reason(),
            Some(DisconnectReason::SettingDisabled)
        );
        assert_eq!(
            sup.connection(conn).unwrap().state(),
            ConnState::Disconnecting
        );
    }

    #[test]
    fn test_wifi_takes_default_route() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let conn = setup_requests(&sup.drain_effects())[0].0;
        sup.on_setup_result(conn, Ok(success(1)));

        sup.set_wifi_active(true);
        assert_eq!(
            sup.binding(Purpose::Default).unwrap().reason(),
            Some(DisconnectReason::WifiConnected)
        );
        sup.on_deactivate_result(conn, true);
        assert_eq!(sup.data_call_state(Purpose::Default), ConnState::Disconnected);

        sup.drain_effects();
        sup.set_wifi_active(false);
        assert_eq!(setup_requests(&sup.drain_effects()).len(), 1);
    }

    #[test]
    fn test_permanent_failure_reported_once() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let conn = setup_requests(&sup.drain_effects())[0].0;
        sup.drain_events();

        sup.on_setup_result(
            conn,
            Err(SetupFailure::new(FailCause::MissingUnknownApn)),
        );
        let events = sup.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, DataCallEvent::DataCallError { .. })));
        assert!(events.contains(&DataCallEvent::PermanentFailure {
            slot: SlotId(0),
            purposes: vec![Purpose::Default],
            cause: Some(FailCause::MissingUnknownApn),
        }));
        assert_eq!(
            sup.binding(Purpose::Default).unwrap().reason(),
            Some(DisconnectReason::PermanentFailure)
        );
        assert!(!sup
            .drain_effects()
            .iter()
            .any(|e| matches!(e, Effect::StartRetryTimer { .. })));
    }

    #[test]
    fn test_stale_confirmation_after_rebuild_is_dropped() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let old = setup_requests(&sup.drain_effects())[0].0;

        // New list while the setup is in flight: waits for the old session
        sup.apply_profile_list(vec![
            ApnProfile::new("internet2").with_purposes([Purpose::Default])
        ]);
        assert!(sup.has_pending_profiles());

        sup.on_setup_result(old, Ok(success(1)));
        // Came up with nobody attached: torn down right away
        assert_eq!(sup.connection(old).unwrap().state(), ConnState::Disconnecting);
        sup.on_deactivate_result(old, true);

        assert!(!sup.has_pending_profiles());
        assert!(sup.connection(old).is_none());
        let setups = setup_requests(&sup.drain_effects());
        assert_eq!(setups.last().map(|s| s.1.as_str()), Some("internet2"));

        // A late confirmation for the retired handle changes nothing
        sup.on_deactivate_result(old, true);
        assert_eq!(sup.data_call_state(Purpose::Default), ConnState::Connecting);
    }

    #[test]
    fn test_pco_routed_by_session_id() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default])
        ]);
        online(&mut sup);
        let conn = setup_requests(&sup.drain_effects())[0].0;
        sup.on_setup_result(conn, Ok(success(4)));
        sup.drain_events();

        sup.on_pco(&PcoData {
            cid: CallId(4),
            bearer_proto: "IP".into(),
            pco_id: 0xFF00,
            contents: vec![1, 2],
        });
        assert_eq!(
            sup.drain_events(),
            vec![DataCallEvent::PcoUpdated {
                slot: SlotId(0),
                purpose: Purpose::Default,
                bearer_proto: "IP".into(),
                pco_id: 0xFF00,
                contents: vec![1, 2],
            }]
        );

        sup.on_pco(&PcoData {
            cid: CallId(9),
            bearer_proto: "IP".into(),
            pco_id: 1,
            contents: vec![],
        });
        assert!(sup.drain_events().is_empty());
    }

    #[test]
    fn test_pco_before_setup_result_goes_to_connecting() {
        let mut sup = supervisor();
        sup.apply_profile_list(vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default]),
            ApnProfile::new("mms").with_purposes([Purpose::Mms]),
        ]);
        online(&mut sup);
        let requests = setup_requests(&sup.drain_effects());
        assert_eq!(requests.len(), 1);
        sup.drain_events();

        // the session id is not known until the setup result arrives
        sup.on_pco(&PcoData {
            cid: CallId(7),
            bearer_proto: "IPV4V6".into(),
            pco_id: 0xFF01,
            contents: vec![3],
        });
        assert_eq!(
            sup.drain_events(),
            vec![DataCallEvent::PcoUpdated {
                slot: SlotId(0),
                purpose: Purpose::Default,
                bearer_proto: "IPV4V6".into(),
                pco_id: 0xFF01,
                contents: vec![3],
            }]
        );

        sup.on_setup_result(requests[0].0, Ok(success(7)));
        sup.drain_events();
        sup.on_pco(&PcoData {
            cid: CallId(8),
            bearer_proto: "IP".into(),
            pco_id: 1,
            contents: vec![],
        });
        assert!(sup.drain_events().is_empty());
    }

    #[test]
    fn test_modem_restart_restores_registration() {
        let mut sup = supervisor();
        sup.on_modem_restart("watchdog");
        sup.on_radio_power(RadioPower::Enabled);
        assert!(sup.drain_effects().contains(&Effect::Modem {
            slot: SlotId(0),
            request: ModemRequest::SetDataRegistration { attach: true },
        }));
        sup.on_radio_power(RadioPower::Disabled);
        sup.on_radio_power(RadioPower::Enabled);
        assert!(sup.drain_effects().is_empty());
    }
}
