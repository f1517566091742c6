//! Data call manager across SIM slots
//!
//! The [`DataCallManager`] owns one [`ConnectionSupervisor`] per slot and
//! arbitrates the default data slot. Moving the default role is a two-step
//! sequence: the old slot tears down everything first, and only once it
//! reports all data disconnected (or the switch deadline passes) does the
//! new slot get data enabled. At no point do two slots both hold the
//! default role with data enabled.
//!
//! Like the supervisor, the manager performs no I/O. Drive it with commands
//! and modem events, then execute the effects from [`DataCallManager::drain_effects`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use dcm_protocol::{
    ApnProfile, ConnState, ConnectionId, DisconnectReason, ModemEvent, ModemIndication,
    ModemRequest, ModemResponse, Purpose, SlotId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::binding::InterfaceInfo;
use crate::effects::Effect;
use crate::error::DataCallError;
use crate::events::DataCallEvent;
use crate::link::TcpBufferTable;
use crate::retry::RetryPolicy;
use crate::supervisor::{ConnectionSupervisor, SupervisorSignal};

/// Default deadline for the old slot's teardown during a switch
pub const DEFAULT_SWITCH_TIMEOUT_MS: u64 = 30_000;

/// Default deadline for every slot to tear down during shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Static configuration of the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of SIM slots
    pub slot_count: usize,
    /// Setup retry policy
    pub retry: RetryPolicy,
    /// Deadline for the old slot's teardown during a switch
    pub switch_timeout: Duration,
    /// Deadline for every slot's teardown during shutdown
    pub shutdown_timeout: Duration,
    /// Detach the old slot and attach the new one from packet service on a switch
    pub data_registration_on_demand: bool,
    /// TCP buffer size overrides keyed by technology group
    pub tcp_buffer_overrides: BTreeMap<String, String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            slot_count: 1,
            retry: RetryPolicy::default(),
            switch_timeout: Duration::from_millis(DEFAULT_SWITCH_TIMEOUT_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            data_registration_on_demand: false,
            tcp_buffer_overrides: BTreeMap::new(),
        }
    }
}

/// Data roaming setting, global or per slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoamingSetting {
    /// Same value on every slot
    All(bool),
    /// One value per slot index; missing entries leave the slot unchanged
    PerSlot(Vec<bool>),
}

impl Default for RoamingSetting {
    fn default() -> Self {
        RoamingSetting::All(false)
    }
}

impl RoamingSetting {
    /// Value for one slot, if the setting covers it
    pub fn for_slot(&self, slot: SlotId) -> Option<bool> {
        match self {
            RoamingSetting::All(enabled) => Some(*enabled),
            RoamingSetting::PerSlot(values) => values.get(slot.index()).copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotSwitch {
    from: SlotId,
    to: SlotId,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
struct ShutdownProgress {
    /// Slots not yet powered off, in power-off order
    queue: VecDeque<SlotId>,
    torn_down: BTreeSet<SlotId>,
    awaiting_power_off: BTreeSet<SlotId>,
    complete: bool,
}

/// Coordinator of every slot's supervisor
#[derive(Debug)]
pub struct DataCallManager {
    config: ManagerConfig,
    supervisors: Vec<ConnectionSupervisor>,
    designated_default: Option<SlotId>,
    active_default: Option<SlotId>,
    data_enabled: bool,
    switch: Option<SlotSwitch>,
    switch_generation: u64,
    pending_attach: Option<SlotId>,
    has_update_apn: bool,
    shutdown: Option<ShutdownProgress>,
    effects: Vec<Effect>,
    events: Vec<DataCallEvent>,
}

impl DataCallManager {
    /// Create a manager with one supervisor per configured slot
    pub fn new(config: ManagerConfig) -> Self {
        let supervisors = (0..config.slot_count)
            .map(|index| {
                ConnectionSupervisor::new(
                    SlotId(index),
                    config.retry,
                    TcpBufferTable::new(config.tcp_buffer_overrides.clone()),
                )
            })
            .collect();
        Self {
            config,
            supervisors,
            designated_default: None,
            active_default: None,
            data_enabled: false,
            switch: None,
            switch_generation: 0,
            pending_attach: None,
            has_update_apn: false,
            shutdown: None,
            effects: Vec::new(),
            events: Vec::new(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of slots
    pub fn slot_count(&self) -> usize {
        self.supervisors.len()
    }

    /// Supervisor of a slot
    pub fn supervisor(&self, slot: SlotId) -> Result<&ConnectionSupervisor, DataCallError> {
        self.check_slot(slot)?;
        Ok(&self.supervisors[slot.index()])
    }

    /// Slot chosen to carry default data
    pub fn designated_default_slot(&self) -> Option<SlotId> {
        self.designated_default
    }

    /// Slot currently carrying default data (lags the designated slot during a switch)
    pub fn active_default_slot(&self) -> Option<SlotId> {
        self.active_default
    }

    /// Whether a default slot switch waits for the old slot's teardown
    pub fn is_switching(&self) -> bool {
        self.switch.is_some()
    }

    /// Global mobile data setting
    pub fn data_enabled(&self) -> bool {
        self.data_enabled
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Whether shutdown finished
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.complete)
    }

    /// State of a purpose on a slot
    pub fn data_call_state(&self, slot: SlotId, purpose: Purpose) -> Result<ConnState, DataCallError> {
        Ok(self.supervisor(slot)?.data_call_state(purpose))
    }

    /// Snapshot of a purpose's binding on a slot
    pub fn interface_info(
        &self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<Option<InterfaceInfo>, DataCallError> {
        Ok(self.supervisor(slot)?.interface_info(purpose))
    }

    /// Take queued effects
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Take queued events
    pub fn drain_events(&mut self) -> Vec<DataCallEvent> {
        std::mem::take(&mut self.events)
    }

    fn check_slot(&self, slot: SlotId) -> Result<(), DataCallError> {
        if slot.index() < self.supervisors.len() {
            Ok(())
        } else {
            Err(DataCallError::InvalidSlot {
                slot: slot.index(),
                count: self.supervisors.len(),
            })
        }
    }

    fn ensure_running(&self) -> Result<(), DataCallError> {
        if self.shutdown.is_some() {
            Err(DataCallError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Replace the profile list of a slot
    pub fn apply_profile_list(
        &mut self,
        slot: SlotId,
        profiles: Vec<ApnProfile>,
    ) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        self.supervisors[slot.index()].apply_profile_list(profiles);
        self.collect();
        Ok(())
    }

    /// Set the purposes a slot may use while mobile data is off
    pub fn set_mobile_whitelist(
        &mut self,
        slot: SlotId,
        purposes: Vec<Purpose>,
    ) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        let sup = &mut self.supervisors[slot.index()];
        sup.set_mobile_whitelist(purposes);
        sup.update_all();
        self.collect();
        Ok(())
    }

    /// Change the global mobile data setting
    ///
    /// Applies to the active default slot. During a switch the value is
    /// recorded and applied to the new slot when the switch completes.
    pub fn set_data_enabled(&mut self, enabled: bool) -> Result<(), DataCallError> {
        self.ensure_running()?;
        if self.data_enabled == enabled {
            return Ok(());
        }
        info!("mobile data {}", if enabled { "enabled" } else { "disabled" });
        self.data_enabled = enabled;
        if self.switch.is_some() {
            debug!("default slot switch in flight, data setting applied on completion");
            return Ok(());
        }
        if let Some(slot) = self.active_default {
            let sup = &mut self.supervisors[slot.index()];
            sup.set_data_enabled(enabled);
            sup.update_all();
        }
        self.collect();
        Ok(())
    }

    /// Change the data roaming setting
    pub fn set_roaming_enabled(&mut self, setting: RoamingSetting) -> Result<(), DataCallError> {
        self.ensure_running()?;
        for sup in self.supervisors.iter_mut() {
            if let Some(enabled) = setting.for_slot(sup.slot()) {
                sup.set_roaming_enabled(enabled);
                sup.update_all();
            }
        }
        self.collect();
        Ok(())
    }

    /// Report whether Wi-Fi carries the default route
    pub fn set_wifi_active(&mut self, active: bool) -> Result<(), DataCallError> {
        self.ensure_running()?;
        for sup in self.supervisors.iter_mut() {
            sup.set_wifi_active(active);
        }
        self.collect();
        Ok(())
    }

    /// Enable a purpose on a slot
    pub fn setup_data_call_by_type(
        &mut self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        self.supervisors[slot.index()].setup_data_call_by_type(purpose)?;
        self.collect();
        Ok(())
    }

    /// Release one use of a purpose on a slot
    pub fn deactivate_data_call_by_type(
        &mut self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        self.supervisors[slot.index()].deactivate_data_call_by_type(purpose)?;
        self.collect();
        Ok(())
    }

    /// Tear down every enabled binding of a slot
    pub fn deactivate_all_data_calls(
        &mut self,
        slot: SlotId,
        reason: DisconnectReason,
    ) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        self.supervisors[slot.index()].deactivate_all(reason);
        self.collect();
        Ok(())
    }

    /// Record the ICCIDs stored from a previous run, indexed by slot
    pub fn set_previous_iccids(&mut self, iccids: Vec<Option<String>>) {
        for (sup, iccid) in self.supervisors.iter_mut().zip(iccids) {
            sup.set_previous_iccid(iccid);
        }
        self.check_iccid();
    }

    /// Move the default data role to another slot
    ///
    /// The first assignment takes effect immediately. Later ones wait for
    /// the old slot to tear down; a request arriving meanwhile retargets the
    /// pending switch.
    pub fn switch_default_slot(&mut self, slot: SlotId) -> Result<(), DataCallError> {
        self.ensure_running()?;
        self.check_slot(slot)?;
        if self.designated_default == Some(slot) {
            debug!("{} already designated for default data", slot);
            return Ok(());
        }
        self.designated_default = Some(slot);
        self.has_update_apn = false;

        if let Some(switch) = self.switch.as_mut() {
            info!("retargeting default slot switch {} -> {}", switch.from, slot);
            switch.to = slot;
        } else {
            match self.active_default {
                Some(old) => self.start_switch(old, slot),
                None => self.assign_first_default(slot),
            }
        }
        self.check_iccid();
        self.collect();
        Ok(())
    }

    fn assign_first_default(&mut self, slot: SlotId) {
        info!("default data slot is {}", slot);
        self.active_default = Some(slot);
        if self.config.data_registration_on_demand {
            self.effects.push(Effect::Modem {
                slot,
                request: ModemRequest::SetDataRegistration { attach: true },
            });
        }
        let sup = &mut self.supervisors[slot.index()];
        sup.set_default_slot(true);
        if self.data_enabled {
            sup.set_data_enabled(true);
            sup.update_all();
        }
        self.events.push(DataCallEvent::DefaultSlotChanged {
            from: None,
            to: slot,
        });
    }

    fn start_switch(&mut self, from: SlotId, to: SlotId) {
        self.switch_generation += 1;
        let generation = self.switch_generation;
        self.switch = Some(SlotSwitch {
            from,
            to,
            generation,
        });
        info!("switching default data slot {} -> {}", from, to);
        self.effects.push(Effect::StartSwitchTimer {
            generation,
            timeout: self.config.switch_timeout,
        });
        let sup = &mut self.supervisors[from.index()];
        if self.data_enabled {
            sup.set_data_enabled(false);
        }
        sup.deactivate_all(DisconnectReason::ServiceIdChanged);
    }

    fn complete_switch(&mut self) {
        let Some(SlotSwitch { from, to, .. }) = self.switch.take() else {
            return;
        };
        info!("default data slot {} -> {} complete", from, to);
        self.supervisors[from.index()].set_default_slot(false);

        let reattach = self.config.data_registration_on_demand && from != to;
        if reattach {
            self.effects.push(Effect::Modem {
                slot: from,
                request: ModemRequest::SetDataRegistration { attach: false },
            });
            self.effects.push(Effect::Modem {
                slot: to,
                request: ModemRequest::SetDataRegistration { attach: true },
            });
            self.pending_attach = Some(to);
        }

        let sup = &mut self.supervisors[to.index()];
        sup.set_default_slot(true);
        if self.data_enabled {
            sup.set_data_enabled(true);
        }
        if !reattach {
            sup.update_all();
        }
        self.active_default = Some(to);
        self.events.push(DataCallEvent::DefaultSlotChanged {
            from: Some(from),
            to,
        });
    }

    /// The deadline of a default slot switch passed
    ///
    /// Completes the switch even though the old slot has not reported all
    /// data disconnected. Stale deadlines are ignored.
    pub fn on_switch_deadline(&mut self, generation: u64) {
        match self.switch {
            Some(switch) if switch.generation == generation => {
                warn!(
                    "{} did not finish tearing down within {:?}, completing switch",
                    switch.from, self.config.switch_timeout
                );
                self.complete_switch();
                self.collect();
            }
            _ => debug!("stale switch deadline ignored"),
        }
    }

    /// Tear every slot down and power the radios off
    ///
    /// The active default slot goes first. Radios are powered off in that
    /// same order, each once its own teardown and every earlier slot's
    /// teardown has completed. If the shutdown deadline passes first, the
    /// remaining slots are powered off regardless. A failed power off still
    /// counts as down.
    pub fn shutdown_all(&mut self) {
        if self.shutdown.is_some() {
            debug!("shutdown already in progress");
            return;
        }
        self.switch = None;
        self.pending_attach = None;

        let mut order: Vec<SlotId> = self.active_default.into_iter().collect();
        order.extend(
            (0..self.supervisors.len())
                .map(SlotId)
                .filter(|slot| Some(*slot) != self.active_default),
        );
        info!("shutting down {} slots", order.len());
        self.shutdown = Some(ShutdownProgress {
            queue: order.iter().copied().collect(),
            ..Default::default()
        });
        if order.is_empty() {
            self.finish_shutdown();
            return;
        }
        self.effects.push(Effect::StartShutdownTimer {
            timeout: self.config.shutdown_timeout,
        });
        for slot in order {
            self.supervisors[slot.index()].begin_shutdown();
            self.collect();
        }
    }

    /// The shutdown deadline passed
    ///
    /// Slots still tearing down are treated as torn down: their radios are
    /// powered off in order and shutdown completes without waiting for the
    /// power-off confirmations.
    pub fn on_shutdown_deadline(&mut self) {
        let Some(progress) = self.shutdown.as_mut() else {
            debug!("shutdown deadline outside shutdown");
            return;
        };
        if progress.complete {
            return;
        }
        let pending: Vec<SlotId> = progress
            .queue
            .iter()
            .copied()
            .filter(|slot| !progress.torn_down.contains(slot))
            .collect();
        warn!(
            "shutdown deadline passed, forcing {:?} down ({} power offs unconfirmed)",
            pending,
            progress.awaiting_power_off.len()
        );
        progress.torn_down.extend(pending);
        self.power_off_in_order();
        self.finish_shutdown();
    }

    /// Power off queued slots from the front while their teardown is done
    fn power_off_in_order(&mut self) {
        let Some(progress) = self.shutdown.as_mut() else {
            return;
        };
        while let Some(&slot) = progress.queue.front() {
            if !progress.torn_down.contains(&slot) {
                debug!("{} still tearing down, holding later power offs", slot);
                break;
            }
            progress.queue.pop_front();
            info!("{} torn down, powering off", slot);
            progress.awaiting_power_off.insert(slot);
            self.effects.push(Effect::Modem {
                slot,
                request: ModemRequest::SetRadioPower { on: false },
            });
        }
    }

    fn finish_shutdown(&mut self) {
        if let Some(progress) = self.shutdown.as_mut() {
            progress.complete = true;
        }
        for sup in self.supervisors.iter_mut() {
            sup.finish_shutdown();
        }
        info!("all slots shut down");
        self.events.push(DataCallEvent::ShutdownComplete);
        self.collect();
    }

    // =========================================================================
    // Modem input
    // =========================================================================

    /// Feed a modem event of a slot
    pub fn on_modem_event(&mut self, slot: SlotId, event: ModemEvent) -> Result<(), DataCallError> {
        match event {
            ModemEvent::Response(response) => self.on_modem_response(slot, response),
            ModemEvent::Indication(indication) => self.on_modem_indication(slot, indication),
        }
    }

    /// Feed a confirmation from the modem of a slot
    pub fn on_modem_response(
        &mut self,
        slot: SlotId,
        response: ModemResponse,
    ) -> Result<(), DataCallError> {
        self.check_slot(slot)?;
        match response {
            ModemResponse::SetupDataCall { conn, result } => {
                self.supervisors[slot.index()].on_setup_result(conn, result)
            }
            ModemResponse::DeactivateDataCall { conn, success } => {
                self.supervisors[slot.index()].on_deactivate_result(conn, success)
            }
            ModemResponse::SetDataRegistration { attach, result } => {
                self.on_data_registration_result(slot, attach, result)
            }
            ModemResponse::SetRadioPower { on, result } => {
                self.on_radio_power_result(slot, on, result)
            }
        }
        self.collect();
        Ok(())
    }

    /// Feed an unsolicited report from the modem of a slot
    pub fn on_modem_indication(
        &mut self,
        slot: SlotId,
        indication: ModemIndication,
    ) -> Result<(), DataCallError> {
        self.check_slot(slot)?;
        let sup = &mut self.supervisors[slot.index()];
        match indication {
            ModemIndication::DataCallListChanged(reports) => sup.on_data_call_list(&reports),
            ModemIndication::DataRegistrationChanged(registration) => {
                sup.on_data_registration(registration)
            }
            ModemIndication::RadioPowerChanged(power) => sup.on_radio_power(power),
            ModemIndication::ModemRestart { reason } => sup.on_modem_restart(&reason),
            ModemIndication::PcoUpdated(pco) => sup.on_pco(&pco),
            ModemIndication::IccidChanged(iccid) => {
                sup.set_current_iccid(iccid);
                self.check_iccid();
            }
        }
        self.collect();
        Ok(())
    }

    /// A retry timer of a connection fired
    pub fn on_retry_timer(
        &mut self,
        slot: SlotId,
        conn: ConnectionId,
        generation: u64,
    ) -> Result<(), DataCallError> {
        self.check_slot(slot)?;
        self.supervisors[slot.index()].on_retry_timer(conn, generation);
        self.collect();
        Ok(())
    }

    fn on_data_registration_result(&mut self, slot: SlotId, attach: bool, result: Result<(), String>) {
        let awaited = attach && self.pending_attach == Some(slot);
        if awaited {
            self.pending_attach = None;
        }
        match result {
            Ok(()) => {
                debug!("{} data registration {}", slot, if attach { "attached" } else { "detached" });
                if awaited {
                    self.supervisors[slot.index()].update_all();
                }
            }
            Err(message) => {
                warn!("{} data registration request failed: {}", slot, message);
                self.events.push(DataCallEvent::DataCallError {
                    slot,
                    message: format!("data registration failed: {message}"),
                });
            }
        }
    }

    fn on_radio_power_result(&mut self, slot: SlotId, on: bool, result: Result<(), String>) {
        if on {
            debug!("{} radio on confirmed", slot);
            return;
        }
        let Some(progress) = self.shutdown.as_mut() else {
            debug!("{} radio off outside shutdown", slot);
            return;
        };
        if let Err(message) = result {
            warn!("{} radio off failed ({}), counting it as down", slot, message);
        }
        if !progress.awaiting_power_off.remove(&slot) {
            return;
        }
        if progress.queue.is_empty()
            && progress.awaiting_power_off.is_empty()
            && !progress.complete
        {
            self.finish_shutdown();
        }
    }

    fn check_iccid(&mut self) {
        let Some(slot) = self.designated_default else {
            debug!("default data slot not assigned yet");
            return;
        };
        if self.has_update_apn {
            return;
        }
        if self.supervisors[slot.index()].identity().is_confirmed() {
            info!("{} SIM unchanged, loading stored profiles", slot);
            self.has_update_apn = true;
            self.effects.push(Effect::FetchProfiles);
        }
    }

    // =========================================================================
    // Supervisor output
    // =========================================================================

    fn collect(&mut self) {
        loop {
            let mut signalled = Vec::new();
            for sup in self.supervisors.iter_mut() {
                self.effects.extend(sup.drain_effects());
                self.events.extend(sup.drain_events());
                for signal in sup.drain_signals() {
                    signalled.push((sup.slot(), signal));
                }
            }
            if signalled.is_empty() {
                break;
            }
            for (slot, signal) in signalled {
                match signal {
                    SupervisorSignal::AllDataDisconnected => self.on_all_disconnected(slot),
                }
            }
        }
    }

    fn on_all_disconnected(&mut self, slot: SlotId) {
        if self.switch.map(|s| s.from) == Some(slot) {
            self.complete_switch();
        }
        if let Some(progress) = self.shutdown.as_mut() {
            if !progress.complete && progress.torn_down.insert(slot) {
                self.power_off_in_order();
            }
        }
    }
}
