//! Data Call Actor
//!
//! This module runs a [`DataCallManager`] inside an async task. The manager
//! itself never performs I/O: the actor feeds it commands and modem events,
//! then carries out the effects it queues (modem requests, routing updates,
//! timers, profile fetches) and publishes the events it produces.
//!
//! # Architecture
//!
//! ```text
//!   ManagerCommand ──┐                    ┌──► modem request channel (per slot)
//!                    ├──► DataCallManager ├──► routing channel
//!  (SlotId, Modem) ──┤                    ├──► event channel + listeners
//!     timer fires ───┘                    └──► timer tasks
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dcm_engine::actor::{run_data_call_actor, ActorChannels, DataCallHandle};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(64);
//! let (modem_event_tx, modem_event_rx) = mpsc::channel(256);
//! tokio::spawn(run_data_call_actor(manager, settings, cmd_rx, modem_event_rx, channels));
//!
//! let handle = DataCallHandle::new(cmd_tx);
//! handle.setup_data_call(SlotId(0), Purpose::Mms).await?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use dcm_protocol::{
    ApnProfile, ConnState, ConnectionId, DisconnectReason, ModemEvent, ModemRequest, Purpose,
    SlotId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::binding::InterfaceInfo;
use crate::effects::{Effect, RoutingUpdate};
use crate::error::DataCallError;
use crate::events::{DataCallEvent, DataCallListener, ListenerId, ListenerRegistry};
use crate::manager::{DataCallManager, RoamingSetting};
use crate::settings::Settings;

/// Where stored profile lists come from when the manager asks for them
pub trait ProfileSource: Send {
    /// Profiles of a slot; None leaves the slot's list untouched
    fn profiles(&self, slot: SlotId) -> Option<Vec<ApnProfile>>;

    /// Purposes a slot may use while mobile data is off
    fn mobile_whitelist(&self, slot: SlotId) -> Vec<Purpose>;
}

impl ProfileSource for Settings {
    fn profiles(&self, slot: SlotId) -> Option<Vec<ApnProfile>> {
        self.slot_profiles(slot)
    }

    fn mobile_whitelist(&self, slot: SlotId) -> Vec<Purpose> {
        Settings::mobile_whitelist(self, slot)
    }
}

type Reply<T> = oneshot::Sender<Result<T, DataCallError>>;

/// Commands sent to the data call actor
pub enum ManagerCommand {
    /// Replace the profile list of a slot
    ApplyProfiles {
        slot: SlotId,
        profiles: Vec<ApnProfile>,
        response: Reply<()>,
    },

    /// Set the purposes a slot may use while mobile data is off
    SetMobileWhitelist {
        slot: SlotId,
        purposes: Vec<Purpose>,
        response: Reply<()>,
    },

    /// Change the global mobile data setting
    SetDataEnabled { enabled: bool, response: Reply<()> },

    /// Change the roaming setting
    SetRoamingEnabled {
        setting: RoamingSetting,
        response: Reply<()>,
    },

    /// Report whether Wi-Fi currently carries default traffic
    SetWifiActive { active: bool, response: Reply<()> },

    /// Move the default data role to another slot
    SwitchDefaultSlot { slot: SlotId, response: Reply<()> },

    /// Ask for a purpose to be brought up
    SetupDataCall {
        slot: SlotId,
        purpose: Purpose,
        response: Reply<()>,
    },

    /// Release a purpose
    DeactivateDataCall {
        slot: SlotId,
        purpose: Purpose,
        response: Reply<()>,
    },

    /// Tear down every enabled binding of a slot
    DeactivateAll {
        slot: SlotId,
        reason: DisconnectReason,
        response: Reply<()>,
    },

    /// ICCIDs stored from a previous run, indexed by slot
    SetPreviousIccids { iccids: Vec<Option<String>> },

    /// Query the state of a purpose
    QueryState {
        slot: SlotId,
        purpose: Purpose,
        response: Reply<ConnState>,
    },

    /// Query the interface snapshot of a purpose
    QueryInterface {
        slot: SlotId,
        purpose: Purpose,
        response: Reply<Option<InterfaceInfo>>,
    },

    /// Register a listener
    RegisterListener {
        listener: Box<dyn DataCallListener>,
        response: oneshot::Sender<ListenerId>,
    },

    /// Remove a listener
    UnregisterListener { id: ListenerId },

    /// Tear everything down, power the radios off, then stop the actor
    ///
    /// Answered once shutdown is complete.
    ShutdownAll { response: oneshot::Sender<()> },
}

/// Output channels of the actor
#[derive(Debug, Clone)]
pub struct ActorChannels {
    /// Modem request channel of each slot, indexed by slot
    pub modem: Vec<mpsc::Sender<ModemRequest>>,
    /// Routing subsystem
    pub routing: mpsc::Sender<RoutingUpdate>,
    /// Every event, in emission order
    pub events: mpsc::Sender<DataCallEvent>,
}

#[derive(Debug, Clone, Copy)]
enum TimerFired {
    Retry {
        slot: SlotId,
        conn: ConnectionId,
        generation: u64,
    },
    SwitchDeadline {
        generation: u64,
    },
    ShutdownDeadline,
}

/// Internal state for the data call actor
struct ActorState<S> {
    manager: DataCallManager,
    source: S,
    channels: ActorChannels,
    listeners: ListenerRegistry,
    retry_timers: HashMap<(SlotId, ConnectionId), JoinHandle<()>>,
    switch_timer: Option<JoinHandle<()>>,
    shutdown_timer: Option<JoinHandle<()>>,
    timer_tx: mpsc::Sender<TimerFired>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl<S: ProfileSource> ActorState<S> {
    fn spawn_timer(&self, delay: Duration, fired: TimerFired) -> JoinHandle<()> {
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(fired).await;
        })
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Modem { slot, request } => match self.channels.modem.get(slot.index()) {
                Some(tx) => {
                    debug!("{} -> modem: {:?}", slot, request);
                    if tx.send(request).await.is_err() {
                        warn!("{} modem channel closed, request dropped", slot);
                    }
                }
                None => warn!("no modem channel for {}", slot),
            },

            Effect::Routing(update) => {
                let _ = self.channels.routing.send(update).await;
            }

            Effect::StartRetryTimer {
                slot,
                conn,
                generation,
                delay,
            } => {
                debug!("{} {} retry in {:?}", slot, conn, delay);
                let handle = self.spawn_timer(
                    delay,
                    TimerFired::Retry {
                        slot,
                        conn,
                        generation,
                    },
                );
                if let Some(old) = self.retry_timers.insert((slot, conn), handle) {
                    old.abort();
                }
            }

            Effect::CancelRetryTimer { slot, conn } => {
                if let Some(old) = self.retry_timers.remove(&(slot, conn)) {
                    old.abort();
                }
            }

            Effect::FetchProfiles => {
                for index in 0..self.manager.slot_count() {
                    let slot = SlotId(index);
                    let whitelist = self.source.mobile_whitelist(slot);
                    if let Err(e) = self.manager.set_mobile_whitelist(slot, whitelist) {
                        debug!("{} whitelist not applied: {}", slot, e);
                    }
                    let Some(profiles) = self.source.profiles(slot) else {
                        debug!("{} has no stored profiles", slot);
                        continue;
                    };
                    info!("{} applying {} stored profiles", slot, profiles.len());
                    if let Err(e) = self.manager.apply_profile_list(slot, profiles) {
                        warn!("{} profiles not applied: {}", slot, e);
                    }
                }
            }

            Effect::StartSwitchTimer {
                generation,
                timeout,
            } => {
                let handle = self.spawn_timer(timeout, TimerFired::SwitchDeadline { generation });
                if let Some(old) = self.switch_timer.replace(handle) {
                    old.abort();
                }
            }

            Effect::StartShutdownTimer { timeout } => {
                debug!("shutdown deadline in {:?}", timeout);
                let handle = self.spawn_timer(timeout, TimerFired::ShutdownDeadline);
                if let Some(old) = self.shutdown_timer.replace(handle) {
                    old.abort();
                }
            }
        }
    }

    /// Carry out queued effects and publish queued events until both are empty
    async fn pump(&mut self) {
        loop {
            let effects = self.manager.drain_effects();
            let events = self.manager.drain_events();
            if effects.is_empty() && events.is_empty() {
                break;
            }
            for effect in effects {
                self.execute(effect).await;
            }
            self.listeners.deliver(&events);
            for event in events {
                let _ = self.channels.events.send(event).await;
            }
        }
    }

    fn handle_command(&mut self, cmd: ManagerCommand) {
        let manager = &mut self.manager;
        match cmd {
            ManagerCommand::ApplyProfiles {
                slot,
                profiles,
                response,
            } => {
                let _ = response.send(manager.apply_profile_list(slot, profiles));
            }
            ManagerCommand::SetMobileWhitelist {
                slot,
                purposes,
                response,
            } => {
                let _ = response.send(manager.set_mobile_whitelist(slot, purposes));
            }
            ManagerCommand::SetDataEnabled { enabled, response } => {
                let _ = response.send(manager.set_data_enabled(enabled));
            }
            ManagerCommand::SetRoamingEnabled { setting, response } => {
                let _ = response.send(manager.set_roaming_enabled(setting));
            }
            ManagerCommand::SetWifiActive { active, response } => {
                let _ = response.send(manager.set_wifi_active(active));
            }
            ManagerCommand::SwitchDefaultSlot { slot, response } => {
                let _ = response.send(manager.switch_default_slot(slot));
            }
            ManagerCommand::SetupDataCall {
                slot,
                purpose,
                response,
            } => {
                let _ = response.send(manager.setup_data_call_by_type(slot, purpose));
            }
            ManagerCommand::DeactivateDataCall {
                slot,
                purpose,
                response,
            } => {
                let _ = response.send(manager.deactivate_data_call_by_type(slot, purpose));
            }
            ManagerCommand::DeactivateAll {
                slot,
                reason,
                response,
            } => {
                let _ = response.send(manager.deactivate_all_data_calls(slot, reason));
            }
            ManagerCommand::SetPreviousIccids { iccids } => {
                manager.set_previous_iccids(iccids);
            }
            ManagerCommand::QueryState {
                slot,
                purpose,
                response,
            } => {
                let _ = response.send(manager.data_call_state(slot, purpose));
            }
            ManagerCommand::QueryInterface {
                slot,
                purpose,
                response,
            } => {
                let _ = response.send(manager.interface_info(slot, purpose));
            }
            ManagerCommand::RegisterListener { listener, response } => {
                let _ = response.send(self.listeners.register(listener));
            }
            ManagerCommand::UnregisterListener { id } => {
                if !self.listeners.unregister(id) {
                    debug!("listener {} was not registered", id.0);
                }
            }
            ManagerCommand::ShutdownAll { response } => {
                self.shutdown_waiters.push(response);
                manager.shutdown_all();
            }
        }
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        match fired {
            TimerFired::Retry {
                slot,
                conn,
                generation,
            } => {
                self.retry_timers.remove(&(slot, conn));
                if let Err(e) = self.manager.on_retry_timer(slot, conn, generation) {
                    warn!("retry timer for {} {}: {}", slot, conn, e);
                }
            }
            TimerFired::SwitchDeadline { generation } => {
                self.switch_timer = None;
                self.manager.on_switch_deadline(generation);
            }
            TimerFired::ShutdownDeadline => {
                self.shutdown_timer = None;
                self.manager.on_shutdown_deadline();
            }
        }
    }

    fn abort_timers(&mut self) {
        for (_, handle) in self.retry_timers.drain() {
            handle.abort();
        }
        for handle in [self.switch_timer.take(), self.shutdown_timer.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

/// Run the data call actor
///
/// Processes commands, modem events and timer fires one at a time until
/// shutdown completes or the command channel closes.
///
/// # Arguments
///
/// * `manager` - The engine to drive
/// * `source` - Stored profiles, read when the engine asks for them
/// * `cmd_rx` - Receiver for commands sent to the actor
/// * `modem_rx` - Confirmations and indications from every slot's modem
/// * `channels` - Where modem requests, routing updates and events go
pub async fn run_data_call_actor<S: ProfileSource>(
    manager: DataCallManager,
    source: S,
    mut cmd_rx: mpsc::Receiver<ManagerCommand>,
    mut modem_rx: mpsc::Receiver<(SlotId, ModemEvent)>,
    channels: ActorChannels,
) {
    let (timer_tx, mut timer_rx) = mpsc::channel(64);
    let mut state = ActorState {
        manager,
        source,
        channels,
        listeners: ListenerRegistry::new(),
        retry_timers: HashMap::new(),
        switch_timer: None,
        shutdown_timer: None,
        timer_tx,
        shutdown_waiters: Vec::new(),
    };
    info!(
        "Data call actor started ({} slots)",
        state.manager.slot_count()
    );

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                state.handle_command(cmd);
            }

            Some((slot, event)) = modem_rx.recv() => {
                if let Err(e) = state.manager.on_modem_event(slot, event) {
                    warn!("modem event dropped: {}", e);
                }
            }

            Some(fired) = timer_rx.recv() => {
                state.handle_timer(fired);
            }
        }

        state.pump().await;

        if state.manager.is_shut_down() {
            for waiter in state.shutdown_waiters.drain(..) {
                let _ = waiter.send(());
            }
            break;
        }
    }

    state.abort_timers();
    info!("Data call actor stopped");
}

/// Convenience wrapper around the command channel
#[derive(Debug, Clone)]
pub struct DataCallHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl DataCallHandle {
    /// Wrap a command sender
    pub fn new(cmd_tx: mpsc::Sender<ManagerCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ManagerCommand,
    ) -> Result<T, DataCallError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| DataCallError::ChannelClosed)?;
        rx.await.map_err(|_| DataCallError::ChannelClosed)?
    }

    async fn send(&self, cmd: ManagerCommand) -> Result<(), DataCallError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| DataCallError::ChannelClosed)
    }

    /// Replace the profile list of a slot
    pub async fn apply_profiles(
        &self,
        slot: SlotId,
        profiles: Vec<ApnProfile>,
    ) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::ApplyProfiles {
            slot,
            profiles,
            response,
        })
        .await
    }

    /// Set the purposes a slot may use while mobile data is off
    pub async fn set_mobile_whitelist(
        &self,
        slot: SlotId,
        purposes: Vec<Purpose>,
    ) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SetMobileWhitelist {
            slot,
            purposes,
            response,
        })
        .await
    }

    /// Change the global mobile data setting
    pub async fn set_data_enabled(&self, enabled: bool) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SetDataEnabled { enabled, response })
            .await
    }

    /// Change the roaming setting
    pub async fn set_roaming_enabled(&self, setting: RoamingSetting) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SetRoamingEnabled { setting, response })
            .await
    }

    /// Report whether Wi-Fi carries default traffic
    pub async fn set_wifi_active(&self, active: bool) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SetWifiActive { active, response })
            .await
    }

    /// Move the default data role to another slot
    pub async fn switch_default_slot(&self, slot: SlotId) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SwitchDefaultSlot { slot, response })
            .await
    }

    /// Ask for a purpose to be brought up
    pub async fn setup_data_call(&self, slot: SlotId, purpose: Purpose) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::SetupDataCall {
            slot,
            purpose,
            response,
        })
        .await
    }

    /// Release a purpose
    pub async fn deactivate_data_call(
        &self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::DeactivateDataCall {
            slot,
            purpose,
            response,
        })
        .await
    }

    /// Tear down every enabled binding of a slot
    pub async fn deactivate_all(
        &self,
        slot: SlotId,
        reason: DisconnectReason,
    ) -> Result<(), DataCallError> {
        self.request(|response| ManagerCommand::DeactivateAll {
            slot,
            reason,
            response,
        })
        .await
    }

    /// Record ICCIDs stored from a previous run
    pub async fn set_previous_iccids(&self, iccids: Vec<Option<String>>) -> Result<(), DataCallError> {
        self.send(ManagerCommand::SetPreviousIccids { iccids }).await
    }

    /// State of a purpose
    pub async fn data_call_state(
        &self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<ConnState, DataCallError> {
        self.request(|response| ManagerCommand::QueryState {
            slot,
            purpose,
            response,
        })
        .await
    }

    /// Interface snapshot of a purpose
    pub async fn interface_info(
        &self,
        slot: SlotId,
        purpose: Purpose,
    ) -> Result<Option<InterfaceInfo>, DataCallError> {
        self.request(|response| ManagerCommand::QueryInterface {
            slot,
            purpose,
            response,
        })
        .await
    }

    /// Register a listener
    pub async fn register_listener(
        &self,
        listener: Box<dyn DataCallListener>,
    ) -> Result<ListenerId, DataCallError> {
        let (response, rx) = oneshot::channel();
        self.send(ManagerCommand::RegisterListener { listener, response })
            .await?;
        rx.await.map_err(|_| DataCallError::ChannelClosed)
    }

    /// Remove a listener
    pub async fn unregister_listener(&self, id: ListenerId) -> Result<(), DataCallError> {
        self.send(ManagerCommand::UnregisterListener { id }).await
    }

    /// Shut everything down and wait for completion
    pub async fn shutdown_all(&self) -> Result<(), DataCallError> {
        let (response, rx) = oneshot::channel();
        self.send(ManagerCommand::ShutdownAll { response }).await?;
        rx.await.map_err(|_| DataCallError::ChannelClosed)
    }
}
