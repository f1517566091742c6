//! Virtual modem simulation
//!
//! Provides a simulated modem for one SIM slot. It answers data call
//! requests the way a radio interface layer would and queues unsolicited
//! indications when its state is changed from the outside.

use std::collections::{BTreeMap, HashMap, VecDeque};

use dcm_protocol::{
    AttachApnParams, CallActivity, CallId, ConnectionId, DataCallReport, DataRegistration,
    FailCause, ModemEvent, ModemIndication, ModemRequest, ModemResponse, PcoData, RadioPower,
    RadioTech, RegState, SetupFailure, SetupSuccess, SlotId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from driving a virtual modem
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No active session with this id
    #[error("no active call with {0}")]
    UnknownCall(CallId),
}

/// Configuration for creating a virtual modem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualModemConfig {
    /// ICCID of the inserted card
    pub iccid: Option<String>,
    /// Technology to register on when powered
    pub tech: RadioTech,
    /// Whether registration is roaming
    pub roaming: bool,
    /// DNS servers handed out with every session
    pub dns_servers: Vec<String>,
    /// MTU handed out with every session
    pub mtu: Option<u32>,
}

impl Default for VirtualModemConfig {
    fn default() -> Self {
        Self {
            iccid: None,
            tech: RadioTech::Lte,
            roaming: false,
            dns_servers: vec!["192.0.2.53".to_string()],
            mtu: Some(1500),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveCall {
    conn: ConnectionId,
    apn: String,
    report: DataCallReport,
}

/// A simulated modem of one slot
#[derive(Debug)]
pub struct VirtualModem {
    slot: SlotId,
    config: VirtualModemConfig,
    power: RadioPower,
    registration: DataRegistration,
    attached: bool,
    calls: BTreeMap<CallId, ActiveCall>,
    next_cid: i32,
    scripted_failures: HashMap<String, VecDeque<SetupFailure>>,
    initial_attach: Option<AttachApnParams>,
    pending_output: VecDeque<ModemEvent>,
}

impl VirtualModem {
    /// Create a powered-off modem with default settings
    pub fn new(slot: SlotId) -> Self {
        Self::from_config(slot, VirtualModemConfig::default())
    }

    /// Create a powered-off modem from configuration
    pub fn from_config(slot: SlotId, config: VirtualModemConfig) -> Self {
        Self {
            slot,
            config,
            power: RadioPower::Disabled,
            registration: DataRegistration::default(),
            attached: true,
            calls: BTreeMap::new(),
            next_cid: 1,
            scripted_failures: HashMap::new(),
            initial_attach: None,
            pending_output: VecDeque::new(),
        }
    }

    /// Slot served
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Current radio power
    pub fn power(&self) -> RadioPower {
        self.power
    }

    /// Current data registration
    pub fn registration(&self) -> DataRegistration {
        self.registration
    }

    /// Whether packet service is attached
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Last initial attach APN configured
    pub fn initial_attach(&self) -> Option<&AttachApnParams> {
        self.initial_attach.as_ref()
    }

    /// Session ids of active calls
    pub fn active_calls(&self) -> Vec<CallId> {
        self.calls.keys().copied().collect()
    }

    /// Access point of an active call
    pub fn call_apn(&self, cid: CallId) -> Option<&str> {
        self.calls.get(&cid).map(|c| c.apn.as_str())
    }

    /// Take the next queued response or indication
    pub fn take_output(&mut self) -> Option<ModemEvent> {
        self.pending_output.pop_front()
    }

    /// Check if there is pending output
    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    fn respond(&mut self, response: ModemResponse) {
        self.pending_output.push_back(ModemEvent::Response(response));
    }

    fn indicate(&mut self, indication: ModemIndication) {
        self.pending_output
            .push_back(ModemEvent::Indication(indication));
    }

    fn call_list(&self) -> Vec<DataCallReport> {
        self.calls.values().map(|c| c.report.clone()).collect()
    }

    fn publish_registration(&mut self) {
        let registration = if self.power == RadioPower::Enabled && self.attached {
            let registered = DataRegistration::registered(self.config.tech);
            if self.config.roaming {
                registered.roaming()
            } else {
                registered
            }
        } else {
            DataRegistration::default()
        };
        if registration != self.registration {
            self.registration = registration;
            self.indicate(ModemIndication::DataRegistrationChanged(registration));
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Answer a request from the engine
    pub fn handle_request(&mut self, request: ModemRequest) {
        match request {
            ModemRequest::SetupDataCall { conn, params } => {
                let result = self.setup(conn, &params.apn);
                self.respond(ModemResponse::SetupDataCall { conn, result });
            }
            ModemRequest::DeactivateDataCall { conn, cid, reason } => {
                let success = self.calls.remove(&cid).is_some();
                debug!(
                    "{} deactivate {} (reason {}): {}",
                    self.slot,
                    cid,
                    reason.code(),
                    if success { "ok" } else { "unknown call" }
                );
                self.respond(ModemResponse::DeactivateDataCall { conn, success });
            }
            ModemRequest::SetInitialAttachApn(params) => {
                debug!("{} initial attach APN {}", self.slot, params.apn);
                self.initial_attach = Some(params);
            }
            ModemRequest::SetDataRegistration { attach } => {
                self.attached = attach;
                if !attach {
                    self.calls.clear();
                }
                self.respond(ModemResponse::SetDataRegistration {
                    attach,
                    result: Ok(()),
                });
                self.publish_registration();
            }
            ModemRequest::SetRadioPower { on } => {
                self.respond(ModemResponse::SetRadioPower { on, result: Ok(()) });
                self.set_power(on);
            }
        }
    }

    fn setup(&mut self, conn: ConnectionId, apn: &str) -> Result<SetupSuccess, SetupFailure> {
        if self.power != RadioPower::Enabled {
            return Err(SetupFailure::new(FailCause::RadioPowerOff));
        }
        if !self.registration.is_ready() {
            return Err(SetupFailure::new(FailCause::GenericFailure));
        }
        if let Some(failure) = self
            .scripted_failures
            .get_mut(apn)
            .and_then(|queue| queue.pop_front())
        {
            info!("{} scripted failure for {}: {}", self.slot, apn, failure.cause);
            return Err(failure);
        }

        let cid = CallId(self.next_cid);
        self.next_cid += 1;
        let subnet = self.slot.index();
        let success = SetupSuccess {
            cid,
            ifname: format!("rmnet_data{}", cid.0),
            addresses: vec![format!("10.{}.{}.2/24", subnet, cid.0)],
            gateways: vec![format!("10.{}.{}.1", subnet, cid.0)],
            dns_servers: self.config.dns_servers.clone(),
            pcscf: Vec::new(),
            mtu: self.config.mtu,
        };
        info!("{} {} up on {} for {}", self.slot, cid, success.ifname, apn);
        self.calls.insert(
            cid,
            ActiveCall {
                conn,
                apn: apn.to_string(),
                report: DataCallReport::from(&success),
            },
        );
        Ok(success)
    }

    // =========================================================================
    // Scenario control
    // =========================================================================

    /// Power the radio on or off, registering when on
    pub fn set_power(&mut self, on: bool) {
        let power = if on {
            RadioPower::Enabled
        } else {
            RadioPower::Disabled
        };
        if power == self.power {
            return;
        }
        self.power = power;
        if !on {
            self.calls.clear();
        }
        self.indicate(ModemIndication::RadioPowerChanged(power));
        self.publish_registration();
    }

    /// Move to another serving technology
    pub fn set_registration(&mut self, tech: RadioTech, roaming: bool) {
        self.config.tech = tech;
        self.config.roaming = roaming;
        self.publish_registration();
    }

    /// Make the next setup for an APN fail
    pub fn fail_next(&mut self, apn: impl Into<String>, failure: SetupFailure) {
        self.scripted_failures
            .entry(apn.into())
            .or_default()
            .push_back(failure);
    }

    /// The network dropped a session
    pub fn drop_call(&mut self, cid: CallId) -> Result<(), SimError> {
        self.calls.remove(&cid).ok_or(SimError::UnknownCall(cid))?;
        info!("{} network dropped {}", self.slot, cid);
        let list = self.call_list();
        self.indicate(ModemIndication::DataCallListChanged(list));
        Ok(())
    }

    /// Change a session's DNS servers and report the list
    pub fn set_dns(&mut self, cid: CallId, dns_servers: Vec<String>) -> Result<(), SimError> {
        let call = self.calls.get_mut(&cid).ok_or(SimError::UnknownCall(cid))?;
        call.report.dns_servers = dns_servers;
        let list = self.call_list();
        self.indicate(ModemIndication::DataCallListChanged(list));
        Ok(())
    }

    /// Mark a session dormant and report the list
    pub fn set_dormant(&mut self, cid: CallId) -> Result<(), SimError> {
        let call = self.calls.get_mut(&cid).ok_or(SimError::UnknownCall(cid))?;
        call.report.activity = CallActivity::Dormant;
        let list = self.call_list();
        self.indicate(ModemIndication::DataCallListChanged(list));
        Ok(())
    }

    /// Deliver protocol configuration options for a session
    pub fn send_pco(&mut self, cid: CallId, pco_id: u32, contents: Vec<u8>) {
        self.indicate(ModemIndication::PcoUpdated(PcoData {
            cid,
            bearer_proto: "IPV4V6".to_string(),
            pco_id,
            contents,
        }));
    }

    /// Insert or remove a card
    pub fn set_iccid(&mut self, iccid: Option<String>) {
        self.config.iccid = iccid.clone();
        self.indicate(ModemIndication::IccidChanged(iccid));
    }

    /// Report the current card
    pub fn announce_iccid(&mut self) {
        let iccid = self.config.iccid.clone();
        self.indicate(ModemIndication::IccidChanged(iccid));
    }

    /// Restart the modem; it comes back powered off
    pub fn restart(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        info!("{} modem restart: {}", self.slot, reason);
        self.calls.clear();
        self.indicate(ModemIndication::ModemRestart { reason });
        self.power = RadioPower::Disabled;
        self.indicate(ModemIndication::RadioPowerChanged(RadioPower::Disabled));
        self.registration = DataRegistration {
            state: RegState::NotSearching,
            tech: None,
            roaming: false,
        };
        self.indicate(ModemIndication::DataRegistrationChanged(self.registration));
    }

    /// Connection handle that owns a session
    pub fn call_owner(&self, cid: CallId) -> Option<ConnectionId> {
        self.calls.get(&cid).map(|c| c.conn)
    }
}
