//! Virtual modem actor task
//!
//! This module provides an async task that owns a [`VirtualModem`] and
//! talks to the data call actor over channels. The task uses a select! loop
//! to:
//! - Answer modem requests from the engine
//! - Apply scenario commands (power, registration, drops, ...)
//! - Forward queued responses and indications, tagged with the slot

use std::time::Duration;

use dcm_protocol::{CallId, ModemEvent, ModemRequest, RadioTech, SetupFailure, SlotId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::VirtualModem;

/// Commands that can be sent to a virtual modem task
#[derive(Debug, Clone)]
pub enum VirtualModemCommand {
    /// Power the radio on or off
    SetPower(bool),
    /// Move to another serving technology
    SetRegistration { tech: RadioTech, roaming: bool },
    /// Make the next setup for an APN fail
    FailNext { apn: String, failure: SetupFailure },
    /// The network drops a session
    DropCall(CallId),
    /// Change a session's DNS servers
    SetDns { cid: CallId, dns_servers: Vec<String> },
    /// Deliver protocol configuration options
    SendPco {
        cid: CallId,
        pco_id: u32,
        contents: Vec<u8>,
    },
    /// Insert or remove a card
    SetIccid(Option<String>),
    /// Restart the modem
    Restart { reason: String },
    /// Shutdown the virtual modem task
    Shutdown,
}

impl VirtualModem {
    /// Apply a scenario command
    pub fn apply(&mut self, command: VirtualModemCommand) {
        let slot = self.slot();
        let result = match command {
            VirtualModemCommand::SetPower(on) => {
                self.set_power(on);
                Ok(())
            }
            VirtualModemCommand::SetRegistration { tech, roaming } => {
                self.set_registration(tech, roaming);
                Ok(())
            }
            VirtualModemCommand::FailNext { apn, failure } => {
                self.fail_next(apn, failure);
                Ok(())
            }
            VirtualModemCommand::DropCall(cid) => self.drop_call(cid),
            VirtualModemCommand::SetDns { cid, dns_servers } => self.set_dns(cid, dns_servers),
            VirtualModemCommand::SendPco {
                cid,
                pco_id,
                contents,
            } => {
                self.send_pco(cid, pco_id, contents);
                Ok(())
            }
            VirtualModemCommand::SetIccid(iccid) => {
                self.set_iccid(iccid);
                Ok(())
            }
            VirtualModemCommand::Restart { reason } => {
                self.restart(reason);
                Ok(())
            }
            VirtualModemCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            warn!("{}: {}", slot, e);
        }
    }
}

/// Run the virtual modem actor task
///
/// This task owns the VirtualModem and processes:
/// 1. Requests from the data call actor
/// 2. Scenario commands from the command channel
///
/// Output is tagged with the modem's slot and sent on `event_tx`, after
/// `latency` when one is given. The task ends on [`VirtualModemCommand::Shutdown`]
/// or when either input channel closes.
pub async fn run_virtual_modem_task(
    mut modem: VirtualModem,
    mut request_rx: mpsc::Receiver<ModemRequest>,
    mut cmd_rx: mpsc::Receiver<VirtualModemCommand>,
    event_tx: mpsc::Sender<(SlotId, ModemEvent)>,
    latency: Option<Duration>,
) {
    let slot = modem.slot();
    info!("Starting virtual modem task for {}", slot);

    modem.announce_iccid();

    loop {
        while let Some(event) = modem.take_output() {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            debug!("{} modem -> engine: {:?}", slot, event);
            if event_tx.send((slot, event)).await.is_err() {
                debug!("{} engine gone, stopping virtual modem", slot);
                return;
            }
        }

        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else { break; };
                modem.handle_request(request);
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(VirtualModemCommand::Shutdown) => break,
                    Some(cmd) => modem.apply(cmd),
                }
            }
        }
    }

    info!("Virtual modem task for {} stopped", slot);
}
