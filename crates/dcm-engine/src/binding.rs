//! Purpose-facing view of the shared connections
//!
//! Each purpose configured on a slot gets one [`InterfaceBinding`]. The
//! binding keeps the purpose's enabled flag and user count, the candidate
//! connections whose profiles declare the purpose, and the last snapshot
//! reported to the routing subsystem.

use dcm_protocol::{
    ApnProfile, ConnState, ConnectionId, DataRegistration, DisconnectReason, Purpose, SlotId,
};

use crate::connection::Connection;
use crate::link::InterfaceAddress;

/// A connection that can serve a binding, with the profile that declared it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Connection handle
    pub conn: ConnectionId,
    /// Profile that declared the purpose
    pub profile: ApnProfile,
}

/// Snapshot of a binding as reported to the routing subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Slot the binding belongs to
    pub slot: SlotId,
    /// Purpose served
    pub purpose: Purpose,
    /// State of the serving connection
    pub state: ConnState,
    /// Why the purpose was last disconnected
    pub reason: Option<DisconnectReason>,
    /// Interface name (connected only)
    pub name: Option<String>,
    /// Addresses (connected only)
    pub addresses: Vec<InterfaceAddress>,
    /// Gateways (connected only)
    pub gateways: Vec<String>,
    /// DNS servers (connected only)
    pub dns_servers: Vec<String>,
    /// P-CSCF servers (IMS only)
    pub pcscf: Vec<String>,
    /// Link MTU, falling back to the profile MTU
    pub mtu: Option<u32>,
    /// HTTP proxy host
    pub http_proxy: Option<String>,
    /// HTTP proxy port
    pub http_proxy_port: Option<u16>,
    /// MMS center (MMS only)
    pub mmsc: Option<String>,
    /// MMS proxy (MMS only)
    pub mms_proxy: Option<String>,
    /// MMS proxy port (MMS only)
    pub mms_port: Option<u16>,
    /// TCP buffer sizes (connected only)
    pub tcp_buffer_sizes: Option<String>,
}

impl InterfaceInfo {
    /// Whether the binding is connected
    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }
}

/// Binding of one purpose to the connections that can serve it
#[derive(Debug, Clone)]
pub struct InterfaceBinding {
    purpose: Purpose,
    enabled: bool,
    active_users: u32,
    candidates: Vec<Candidate>,
    reason: Option<DisconnectReason>,
    last_reported: Option<InterfaceInfo>,
}

impl InterfaceBinding {
    /// Create a disabled binding with no candidates
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            enabled: false,
            active_users: 0,
            candidates: Vec::new(),
            reason: None,
            last_reported: None,
        }
    }

    /// Purpose served
    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Whether the purpose is wanted
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Outstanding enable requests (always 0 for the default purpose)
    pub fn active_users(&self) -> u32 {
        self.active_users
    }

    /// Last disconnect reason
    pub fn reason(&self) -> Option<DisconnectReason> {
        self.reason
    }

    /// Record a disconnect reason
    pub fn set_reason(&mut self, reason: Option<DisconnectReason>) {
        self.reason = reason;
    }

    /// Candidate connections in declaration order
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Add a candidate connection; a connection is listed once
    pub fn add_candidate(&mut self, conn: ConnectionId, profile: &ApnProfile) {
        if self.candidates.iter().all(|c| c.conn != conn) {
            self.candidates.push(Candidate {
                conn,
                profile: profile.clone(),
            });
        }
    }

    /// Mark the purpose wanted
    ///
    /// Non-default purposes count their users.
    pub fn enable(&mut self) {
        if !self.purpose.is_default() {
            self.active_users += 1;
        }
        self.enabled = true;
        self.reason = None;
    }

    /// Release one use of the purpose
    ///
    /// Returns true when the binding became disabled and should be
    /// disconnected.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.purpose.is_default() {
            self.enabled = false;
            return false;
        }
        self.active_users = self.active_users.saturating_sub(1);
        if self.active_users > 0 {
            return false;
        }
        self.enabled = false;
        true
    }

    /// First candidate connection the purpose is attached to
    pub fn serving<'a>(&self, connections: &'a [Connection]) -> Option<&'a Connection> {
        self.candidates.iter().find_map(|candidate| {
            connections
                .iter()
                .find(|c| c.id() == candidate.conn && c.is_attached(self.purpose))
        })
    }

    /// State of the serving connection, Disconnected when there is none
    pub fn state(&self, connections: &[Connection]) -> ConnState {
        self.serving(connections)
            .map(|c| c.state())
            .unwrap_or(ConnState::Disconnected)
    }

    /// First candidate whose bearer allows the serving technology
    pub fn select_compatible(
        &self,
        connections: &[Connection],
        registration: &DataRegistration,
    ) -> Option<ConnectionId> {
        self.candidates.iter().map(|c| c.conn).find(|id| {
            connections
                .iter()
                .any(|c| c.id() == *id && c.is_compatible(registration))
        })
    }

    /// Candidate connections the purpose is attached to
    pub fn attached_candidates(&self, connections: &[Connection]) -> Vec<ConnectionId> {
        self.candidates
            .iter()
            .map(|c| c.conn)
            .filter(|id| {
                connections
                    .iter()
                    .any(|c| c.id() == *id && c.is_attached(self.purpose))
            })
            .collect()
    }

    /// Build the snapshot reported to the routing subsystem
    pub fn info(&self, slot: SlotId, connections: &[Connection]) -> InterfaceInfo {
        let serving = self.serving(connections);
        let state = serving
            .map(|c| c.state())
            .unwrap_or(ConnState::Disconnected);
        let profile = serving
            .and_then(|conn| self.candidates.iter().find(|c| c.conn == conn.id()))
            .or_else(|| self.candidates.first())
            .map(|c| &c.profile);
        let link = serving
            .filter(|c| c.state() == ConnState::Connected)
            .map(|c| c.link());

        let is_mms = self.purpose == Purpose::Mms;
        InterfaceInfo {
            slot,
            purpose: self.purpose,
            state,
            reason: self.reason,
            name: link.and_then(|l| l.ifname.clone()),
            addresses: link
                .map(|l| l.addresses.iter().map(|a| InterfaceAddress::parse(a)).collect())
                .unwrap_or_default(),
            gateways: link.map(|l| l.gateways.clone()).unwrap_or_default(),
            dns_servers: link.map(|l| l.dns_servers.clone()).unwrap_or_default(),
            pcscf: link
                .filter(|_| self.purpose == Purpose::Ims)
                .map(|l| l.pcscf.clone())
                .unwrap_or_default(),
            mtu: link
                .and_then(|l| l.mtu)
                .or_else(|| profile.and_then(|p| p.mtu)),
            http_proxy: profile.and_then(|p| p.proxy.clone()),
            http_proxy_port: profile.and_then(|p| p.port),
            mmsc: profile.filter(|_| is_mms).and_then(|p| p.mmsc.clone()),
            mms_proxy: profile.filter(|_| is_mms).and_then(|p| p.mms_proxy.clone()),
            mms_port: profile.filter(|_| is_mms).and_then(|p| p.mms_port),
            tcp_buffer_sizes: link.and_then(|l| l.tcp_buffer_sizes.clone()),
        }
    }

    pub(crate) fn last_reported(&self) -> Option<&InterfaceInfo> {
        self.last_reported.as_ref()
    }

    pub(crate) fn set_last_reported(&mut self, info: InterfaceInfo) {
        self.last_reported = Some(info);
    }
}
