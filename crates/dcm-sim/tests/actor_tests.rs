//! End-to-end tests: data call actor against virtual modems
//!
//! These tests run the real actor loop with timers, channels and simulated
//! modems, and verify:
//! - Stored profiles are loaded once the SIM identity is confirmed
//! - Purposes come up, survive drops and honor suggested retry times
//! - Listeners and the event channel see the same events
//! - Default slot switching and shutdown complete end to end

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dcm_engine::{
    run_data_call_actor, ActorChannels, DataCallEvent, DataCallHandle, DataCallListener,
    DataCallManager, RoutingUpdate, Settings,
};
use dcm_protocol::{
    CallId, ConnState, FailCause, Purpose, SetupFailure, SlotId, SuggestedRetry,
};
use dcm_sim::{run_virtual_modem_task, VirtualModem, VirtualModemCommand, VirtualModemConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub struct Rig {
        pub handle: DataCallHandle,
        pub events: mpsc::Receiver<DataCallEvent>,
        pub routing: mpsc::Receiver<RoutingUpdate>,
        pub sims: Vec<mpsc::Sender<VirtualModemCommand>>,
        pub actor: JoinHandle<()>,
        pub seen: Vec<DataCallEvent>,
    }

    /// Example settings with one slot config per slot and matching ICCIDs
    pub fn settings(slots: usize) -> Settings {
        let mut settings = Settings::example();
        let template = settings.slots[0].clone();
        settings.slots = (0..slots)
            .map(|index| {
                let mut slot = template.clone();
                slot.previous_iccid = Some(format!("890{}", index + 1));
                slot
            })
            .collect();
        settings
    }

    pub fn start(settings: Settings) -> Rig {
        let slots = settings.slots.len();
        let manager = DataCallManager::new(settings.manager_config(slots));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (modem_event_tx, modem_event_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (routing_tx, routing_rx) = mpsc::channel(1024);

        let mut modem = Vec::new();
        let mut sims = Vec::new();
        for index in 0..slots {
            let (request_tx, request_rx) = mpsc::channel(64);
            let (sim_tx, sim_rx) = mpsc::channel(16);
            let config = VirtualModemConfig {
                iccid: Some(format!("890{}", index + 1)),
                ..Default::default()
            };
            tokio::spawn(run_virtual_modem_task(
                VirtualModem::from_config(SlotId(index), config),
                request_rx,
                sim_rx,
                modem_event_tx.clone(),
                None,
            ));
            modem.push(request_tx);
            sims.push(sim_tx);
        }

        let channels = ActorChannels {
            modem,
            routing: routing_tx,
            events: event_tx,
        };
        let actor = tokio::spawn(run_data_call_actor(
            manager,
            settings,
            cmd_rx,
            modem_event_rx,
            channels,
        ));

        Rig {
            handle: DataCallHandle::new(cmd_tx),
            events: event_rx,
            routing: routing_rx,
            sims,
            actor,
            seen: Vec::new(),
        }
    }

    impl Rig {
        /// Stored ICCIDs, data setting, default slot 0, radios on
        pub async fn boot(&mut self, settings: &Settings, data_enabled: bool) {
            self.handle
                .set_previous_iccids(settings.previous_iccids())
                .await
                .unwrap();
            self.handle.set_data_enabled(data_enabled).await.unwrap();
            self.handle.switch_default_slot(SlotId(0)).await.unwrap();
            for sim in &self.sims {
                sim.send(VirtualModemCommand::SetPower(true)).await.unwrap();
            }
        }

        pub async fn wait_for(&mut self, pred: impl Fn(&DataCallEvent) -> bool) -> DataCallEvent {
            let events = &mut self.events;
            let seen = &mut self.seen;
            timeout(Duration::from_secs(600), async {
                loop {
                    let event = events.recv().await.expect("actor stopped");
                    seen.push(event.clone());
                    if pred(&event) {
                        return event;
                    }
                }
            })
            .await
            .expect("timed out waiting for event")
        }

        pub async fn wait_state(&mut self, slot: SlotId, purpose: Purpose, state: ConnState) {
            self.wait_for(|e| {
                matches!(
                    e,
                    DataCallEvent::ConnectionChanged { slot: s, purpose: p, state: st, .. }
                        if *s == slot && *p == purpose && *st == state
                )
            })
            .await;
        }

        pub fn drain_routing(&mut self) -> Vec<RoutingUpdate> {
            std::iter::from_fn(|| self.routing.try_recv().ok()).collect()
        }
    }

    /// Listener recording binding transitions
    pub struct Recorder(pub Arc<Mutex<Vec<(SlotId, Purpose, ConnState)>>>);

    impl DataCallListener for Recorder {
        fn on_connection_changed(
            &mut self,
            slot: SlotId,
            purpose: Purpose,
            state: ConnState,
            _reason: Option<dcm_protocol::DisconnectReason>,
        ) {
            self.0.lock().unwrap().push((slot, purpose, state));
        }
    }
}

use helpers::*;

// ============================================================================
// Bring-up
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_boot_connects_default_from_stored_profiles() {
    let settings = settings(1);
    let mut rig = start(settings.clone());
    rig.boot(&settings, true).await;

    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    assert_eq!(
        rig.handle
            .data_call_state(SlotId(0), Purpose::Default)
            .await
            .unwrap(),
        ConnState::Connected
    );
    let info = rig
        .handle
        .interface_info(SlotId(0), Purpose::Default)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("rmnet_data1"));
    assert_eq!(info.mtu, Some(1500));

    let routing = rig.drain_routing();
    assert!(routing.iter().any(
        |u| matches!(u, RoutingUpdate::Register(info) if info.purpose == Purpose::Default)
    ));
    assert!(routing.iter().any(|u| matches!(
        u,
        RoutingUpdate::Update(info) if info.purpose == Purpose::Default && info.is_connected()
    )));
}

#[tokio::test(start_paused = true)]
async fn test_whitelisted_mms_with_data_off() {
    let settings = settings(1);
    let mut rig = start(settings.clone());
    let transitions = Arc::new(Mutex::new(Vec::new()));
    rig.handle
        .register_listener(Box::new(Recorder(transitions.clone())))
        .await
        .unwrap();
    rig.boot(&settings, false).await;

    // Profiles are in place once the slot reports its first teardown
    rig.wait_for(|e| matches!(e, DataCallEvent::AllDataDisconnected { slot } if *slot == SlotId(0)))
        .await;
    rig.handle
        .setup_data_call(SlotId(0), Purpose::Mms)
        .await
        .unwrap();
    rig.wait_state(SlotId(0), Purpose::Mms, ConnState::Connected)
        .await;

    let info = rig
        .handle
        .interface_info(SlotId(0), Purpose::Mms)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.mmsc.as_deref(), Some("http://mms.example.net"));
    assert_eq!(info.mms_port, Some(8080));
    assert_eq!(
        rig.handle
            .data_call_state(SlotId(0), Purpose::Default)
            .await
            .unwrap(),
        ConnState::Disconnected
    );
    assert!(transitions
        .lock()
        .unwrap()
        .contains(&(SlotId(0), Purpose::Mms, ConnState::Connected)));
    assert!(matches!(
        rig.handle
            .deactivate_data_call(SlotId(0), Purpose::Default)
            .await,
        Err(dcm_engine::DataCallError::DefaultPurposeNotControllable)
    ));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_suggested_retry_time_is_honored() {
    let settings = settings(1);
    let mut rig = start(settings.clone());
    rig.sims[0]
        .send(VirtualModemCommand::FailNext {
            apn: "internet".to_string(),
            failure: SetupFailure::with_retry(
                FailCause::NetworkCongestion,
                SuggestedRetry::After(Duration::from_secs(5)),
            ),
        })
        .await
        .unwrap();
    let started = tokio::time::Instant::now();
    rig.boot(&settings, true).await;

    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(rig
        .seen
        .iter()
        .any(|e| matches!(e, DataCallEvent::DataCallError { slot, .. } if *slot == SlotId(0))));
}

#[tokio::test(start_paused = true)]
async fn test_network_drop_reconnects() {
    let settings = settings(1);
    let mut rig = start(settings.clone());
    rig.boot(&settings, true).await;
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    rig.sims[0]
        .send(VirtualModemCommand::DropCall(CallId(1)))
        .await
        .unwrap();
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Disconnected)
        .await;
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    let info = rig
        .handle
        .interface_info(SlotId(0), Purpose::Default)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.name.as_deref(), Some("rmnet_data2"));
}

#[tokio::test(start_paused = true)]
async fn test_pco_reaches_attached_purpose() {
    let settings = settings(1);
    let mut rig = start(settings.clone());
    rig.boot(&settings, true).await;
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    rig.sims[0]
        .send(VirtualModemCommand::SendPco {
            cid: CallId(1),
            pco_id: 0xff00,
            contents: vec![0x01],
        })
        .await
        .unwrap();
    let event = rig
        .wait_for(|e| matches!(e, DataCallEvent::PcoUpdated { .. }))
        .await;
    assert_eq!(
        event,
        DataCallEvent::PcoUpdated {
            slot: SlotId(0),
            purpose: Purpose::Default,
            bearer_proto: "IPV4V6".to_string(),
            pco_id: 0xff00,
            contents: vec![0x01],
        }
    );
}

// ============================================================================
// Slot switching and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_default_slot_switch_end_to_end() {
    let settings = settings(2);
    let mut rig = start(settings.clone());
    rig.boot(&settings, true).await;
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    let before_switch = rig.seen.len();
    rig.handle.switch_default_slot(SlotId(1)).await.unwrap();
    rig.wait_state(SlotId(1), Purpose::Default, ConnState::Connected)
        .await;

    let after: &[DataCallEvent] = &rig.seen[before_switch..];
    let position = |pred: &dyn Fn(&DataCallEvent) -> bool| after.iter().position(pred);
    let torn_down = position(&|e| {
        matches!(e, DataCallEvent::AllDataDisconnected { slot } if *slot == SlotId(0))
    })
    .expect("old slot never finished tearing down");
    let switched = position(&|e| {
        matches!(
            e,
            DataCallEvent::DefaultSlotChanged { from: Some(SlotId(0)), to: SlotId(1) }
        )
    })
    .expect("switch never completed");
    assert!(torn_down < switched);
    assert_eq!(
        rig.handle
            .data_call_state(SlotId(0), Purpose::Default)
            .await
            .unwrap(),
        ConnState::Disconnected
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_actor() {
    let settings = settings(2);
    let mut rig = start(settings.clone());
    rig.boot(&settings, true).await;
    rig.wait_state(SlotId(0), Purpose::Default, ConnState::Connected)
        .await;

    rig.handle.shutdown_all().await.unwrap();
    rig.wait_for(|e| matches!(e, DataCallEvent::ShutdownComplete))
        .await;
    (&mut rig.actor).await.unwrap();

    let routing = rig.drain_routing();
    assert!(routing.iter().any(|u| matches!(
        u,
        RoutingUpdate::Unregister { slot, purpose } if *slot == SlotId(0) && *purpose == Purpose::Default
    )));
    assert!(rig.handle.set_data_enabled(false).await.is_err());
}
