//! Daemon wiring
//!
//! Spawns one virtual modem task per slot and the data call actor, applies
//! the stored settings and waits for Ctrl-C to shut the radios down.

use std::collections::BTreeMap;
use std::time::Duration;

use dcm_engine::{
    run_data_call_actor, ActorChannels, DataCallEvent, DataCallHandle, DataCallListener,
    DataCallManager, RoutingUpdate, Settings,
};
use dcm_protocol::{ConnState, DisconnectReason, FailCause, Purpose, SlotId};
use dcm_sim::{run_virtual_modem_task, VirtualModem, VirtualModemCommand, VirtualModemConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Options from the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub slots: usize,
    pub latency: Option<Duration>,
}

/// Logs every callback at info level
struct LoggingListener;

impl DataCallListener for LoggingListener {
    fn on_connection_changed(
        &mut self,
        slot: SlotId,
        purpose: Purpose,
        state: ConnState,
        reason: Option<DisconnectReason>,
    ) {
        match reason {
            Some(reason) => info!("{} {}: {} ({})", slot, purpose, state, reason),
            None => info!("{} {}: {}", slot, purpose, state),
        }
    }

    fn on_data_call_error(&mut self, slot: SlotId, message: &str) {
        warn!("{} data call error: {}", slot, message);
    }

    fn on_permanent_failure(&mut self, slot: SlotId, purposes: &[Purpose], cause: Option<FailCause>) {
        warn!("{} permanent failure for {:?}: {:?}", slot, purposes, cause);
    }

    fn on_retry_exhausted(&mut self, slot: SlotId, purposes: &[Purpose]) {
        warn!("{} gave up retrying {:?}", slot, purposes);
    }

    fn on_default_slot_changed(&mut self, from: Option<SlotId>, to: SlotId) {
        info!("default data slot {:?} -> {}", from, to);
    }

    fn on_all_data_disconnected(&mut self, slot: SlotId) {
        info!("{} all data disconnected", slot);
    }

    fn on_shutdown_complete(&mut self) {
        info!("all slots shut down");
    }
}

async fn log_routing(mut routing_rx: mpsc::Receiver<RoutingUpdate>) {
    while let Some(update) = routing_rx.recv().await {
        let (slot, purpose) = (update.slot(), update.purpose());
        match update {
            RoutingUpdate::Register(_) => info!("route register {} {}", slot, purpose),
            RoutingUpdate::Update(info) => info!(
                "route update {} {} {} iface={:?} dns={:?}",
                slot, purpose, info.state, info.name, info.dns_servers
            ),
            RoutingUpdate::Unregister { .. } => info!("route unregister {} {}", slot, purpose),
        }
    }
}

/// Count failure events per slot until the actor goes away
async fn tally_events(mut event_rx: mpsc::Receiver<DataCallEvent>) -> BTreeMap<SlotId, usize> {
    let mut failures = BTreeMap::new();
    while let Some(event) = event_rx.recv().await {
        debug!("event: {:?}", event);
        if !event.is_failure() {
            continue;
        }
        if let Some(slot) = event.slot() {
            *failures.entry(slot).or_insert(0) += 1;
        }
    }
    failures
}

/// Run until Ctrl-C, then shut every slot down
pub async fn run(settings: Settings, options: RunOptions) -> anyhow::Result<()> {
    info!("Starting datacalld with {} slots", options.slots);

    let manager = DataCallManager::new(settings.manager_config(options.slots));
    let slot_count = manager.slot_count();

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (modem_event_tx, modem_event_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (routing_tx, routing_rx) = mpsc::channel(256);

    let mut modem = Vec::with_capacity(slot_count);
    let mut sims = Vec::with_capacity(slot_count);
    for index in 0..slot_count {
        let (request_tx, request_rx) = mpsc::channel(64);
        let (sim_tx, sim_rx) = mpsc::channel(16);
        let config = VirtualModemConfig {
            iccid: settings
                .slots
                .get(index)
                .and_then(|s| s.previous_iccid.clone()),
            ..Default::default()
        };
        tokio::spawn(run_virtual_modem_task(
            VirtualModem::from_config(SlotId(index), config),
            request_rx,
            sim_rx,
            modem_event_tx.clone(),
            options.latency,
        ));
        modem.push(request_tx);
        sims.push(sim_tx);
    }
    drop(modem_event_tx);

    tokio::spawn(log_routing(routing_rx));
    let tally = tokio::spawn(tally_events(event_rx));

    let channels = ActorChannels {
        modem,
        routing: routing_tx,
        events: event_tx,
    };
    let actor = tokio::spawn(run_data_call_actor(
        manager,
        settings.clone(),
        cmd_rx,
        modem_event_rx,
        channels,
    ));

    let handle = DataCallHandle::new(cmd_tx);
    handle.register_listener(Box::new(LoggingListener)).await?;
    handle
        .set_previous_iccids(settings.previous_iccids())
        .await?;
    handle
        .set_roaming_enabled(settings.roaming_enabled.clone())
        .await?;
    handle.set_data_enabled(settings.data_enabled).await?;
    handle
        .switch_default_slot(SlotId(settings.default_slot.min(slot_count - 1)))
        .await?;
    for sim in &sims {
        let _ = sim.send(VirtualModemCommand::SetPower(true)).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("received SIGINT, shutting down");

    handle.shutdown_all().await?;
    for sim in &sims {
        let _ = sim.send(VirtualModemCommand::Shutdown).await;
    }
    actor.await?;

    for (slot, count) in tally.await? {
        info!("{} reported {} failures", slot, count);
    }

    info!("datacalld stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failures_tallied_per_slot() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(DataCallEvent::RetryExhausted {
            slot: SlotId(1),
            purposes: vec![Purpose::Mms],
        })
        .await
        .unwrap();
        tx.send(DataCallEvent::DataCallError {
            slot: SlotId(1),
            message: "NetworkCongestion".into(),
        })
        .await
        .unwrap();
        tx.send(DataCallEvent::AllDataDisconnected { slot: SlotId(0) })
            .await
            .unwrap();
        tx.send(DataCallEvent::ShutdownComplete).await.unwrap();
        drop(tx);

        let failures = tally_events(rx).await;
        assert_eq!(failures, BTreeMap::from([(SlotId(1), 2)]));
    }
}
