//! Link parameters of an up session
//!
//! A [`LinkInfo`] holds what the modem told us about a session: interface
//! name, addresses, gateways, DNS and P-CSCF servers, MTU. Unsolicited data
//! call list reports are compared against it with [`compare_links`] to decide
//! whether the session needs a teardown or only an update.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use dcm_protocol::{CallId, DataCallReport, RadioTech, SetupSuccess};

/// Link facts of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    /// Session id, kept until the session is fully torn down
    pub cid: Option<CallId>,
    /// Network interface name
    pub ifname: Option<String>,
    /// Addresses in `ip/prefix` form
    pub addresses: Vec<String>,
    /// Gateways
    pub gateways: Vec<String>,
    /// DNS servers
    pub dns_servers: Vec<String>,
    /// P-CSCF servers
    pub pcscf: Vec<String>,
    /// Link MTU
    pub mtu: Option<u32>,
    /// TCP buffer sizes for the serving technology
    pub tcp_buffer_sizes: Option<String>,
}

impl LinkInfo {
    /// Link facts from a successful setup
    pub fn from_setup(success: &SetupSuccess) -> Self {
        Self::from_report(&DataCallReport::from(success))
    }

    /// Link facts from a data call list entry
    pub fn from_report(report: &DataCallReport) -> Self {
        Self {
            cid: Some(report.cid),
            ifname: Some(report.ifname.clone()).filter(|name| !name.is_empty()),
            addresses: report.addresses.clone(),
            gateways: report.gateways.clone(),
            dns_servers: report.dns_servers.clone(),
            pcscf: report.pcscf.clone(),
            mtu: report.mtu.filter(|mtu| *mtu > 0),
            tcp_buffer_sizes: None,
        }
    }

    /// Drop everything but the session id
    pub fn clear_details(&mut self) {
        let cid = self.cid;
        *self = Self {
            cid,
            ..Self::default()
        };
    }

    /// Drop everything
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Take over the parameters that may change without a teardown
    pub fn apply_minor(&mut self, updated: &LinkInfo) {
        self.addresses = updated.addresses.clone();
        self.gateways = updated.gateways.clone();
        self.dns_servers = updated.dns_servers.clone();
        self.pcscf = updated.pcscf.clone();
        self.mtu = updated.mtu;
    }
}

/// Result of comparing a reported link with the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    /// Nothing relevant changed
    Identical,
    /// Parameters changed in place
    Changed,
    /// The session must be torn down
    Deactivate,
}

/// Compare a reported link against the current one
///
/// A different interface, or a current address missing from the report,
/// needs a teardown. Extra addresses, new gateways, DNS servers or MTU are
/// minor changes.
pub fn compare_links(updated: &LinkInfo, current: &LinkInfo) -> LinkChange {
    if updated.ifname != current.ifname {
        return LinkChange::Deactivate;
    }
    if current
        .addresses
        .iter()
        .any(|addr| !updated.addresses.contains(addr))
    {
        return LinkChange::Deactivate;
    }
    if updated.addresses.len() != current.addresses.len()
        || updated.gateways != current.gateways
        || updated.dns_servers != current.dns_servers
        || updated.mtu != current.mtu
    {
        return LinkChange::Changed;
    }
    LinkChange::Identical
}

/// An address split into ip and prefix length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// Address without prefix
    pub ip: String,
    /// Prefix length
    pub prefix_len: u8,
}

impl InterfaceAddress {
    /// Split `ip/prefix`
    ///
    /// A missing or unparsable prefix means a host address: 32 for IPv4,
    /// 128 for IPv6.
    pub fn parse(text: &str) -> Self {
        let (ip, prefix) = match text.split_once('/') {
            Some((ip, prefix)) => (ip.trim(), prefix.trim().parse::<u8>().ok()),
            None => (text.trim(), None),
        };
        let host_prefix = match ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => 128,
            _ => 32,
        };
        Self {
            ip: ip.to_string(),
            prefix_len: prefix.unwrap_or(host_prefix),
        }
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// TCP buffer sizes per serving technology
///
/// Overrides are keyed by the technology group name (`lte`, `evdo`,
/// `1xrtt`, ...) and win over the built-in table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpBufferTable {
    overrides: BTreeMap<String, String>,
}

impl TcpBufferTable {
    /// Table with the given overrides
    pub fn new(overrides: BTreeMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Buffer sizes for a technology
    pub fn sizes_for(&self, tech: RadioTech) -> String {
        self.overrides
            .get(tech.tcp_buffer_group())
            .cloned()
            .unwrap_or_else(|| tech.default_tcp_buffer_sizes().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(addresses: &[&str]) -> LinkInfo {
        LinkInfo {
            cid: Some(CallId(1)),
            ifname: Some("rmnet0".into()),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            gateways: vec!["10.0.0.1".into()],
            dns_servers: vec!["8.8.8.8".into()],
            pcscf: vec![],
            mtu: Some(1400),
            tcp_buffer_sizes: None,
        }
    }

    #[test]
    fn test_identical_links() {
        let current = link(&["10.0.0.2/24"]);
        assert_eq!(compare_links(&current.clone(), &current), LinkChange::Identical);
    }

    #[test]
    fn test_interface_change_needs_teardown() {
        let current = link(&["10.0.0.2/24"]);
        let mut updated = current.clone();
        updated.ifname = Some("rmnet1".into());
        assert_eq!(compare_links(&updated, &current), LinkChange::Deactivate);
    }

    #[test]
    fn test_lost_address_needs_teardown() {
        let current = link(&["10.0.0.2/24", "fe80::2/64"]);
        let updated = link(&["10.0.0.2/24"]);
        assert_eq!(compare_links(&updated, &current), LinkChange::Deactivate);
    }

    #[test]
    fn test_minor_changes() {
        let current = link(&["10.0.0.2/24"]);

        let added = link(&["10.0.0.2/24", "fe80::2/64"]);
        assert_eq!(compare_links(&added, &current), LinkChange::Changed);

        let mut dns = current.clone();
        dns.dns_servers = vec!["1.1.1.1".into()];
        assert_eq!(compare_links(&dns, &current), LinkChange::Changed);

        let mut mtu = current.clone();
        mtu.mtu = Some(1280);
        assert_eq!(compare_links(&mtu, &current), LinkChange::Changed);
    }

    #[test]
    fn test_apply_minor_keeps_identity() {
        let mut current = link(&["10.0.0.2/24"]);
        current.tcp_buffer_sizes = Some("1,2,3,4,5,6".into());
        let mut updated = link(&["10.0.0.2/24", "fe80::2/64"]);
        updated.dns_servers = vec!["1.1.1.1".into()];
        current.apply_minor(&updated);
        assert_eq!(current.addresses.len(), 2);
        assert_eq!(current.dns_servers, vec!["1.1.1.1".to_string()]);
        assert_eq!(current.ifname.as_deref(), Some("rmnet0"));
        assert_eq!(current.tcp_buffer_sizes.as_deref(), Some("1,2,3,4,5,6"));
        // Applying the same report again changes nothing
        assert_eq!(compare_links(&updated, &current), LinkChange::Identical);
    }

    #[test]
    fn test_clear_details_keeps_cid() {
        let mut current = link(&["10.0.0.2/24"]);
        current.clear_details();
        assert_eq!(current.cid, Some(CallId(1)));
        assert!(current.ifname.is_none());
        assert!(current.addresses.is_empty());
        current.clear();
        assert_eq!(current, LinkInfo::default());
    }

    #[test]
    fn test_address_split() {
        assert_eq!(
            InterfaceAddress::parse("10.0.0.2/24"),
            InterfaceAddress {
                ip: "10.0.0.2".into(),
                prefix_len: 24
            }
        );
        assert_eq!(InterfaceAddress::parse("10.0.0.2").prefix_len, 32);
        assert_eq!(InterfaceAddress::parse("2001:db8::1").prefix_len, 128);
        assert_eq!(InterfaceAddress::parse("2001:db8::1/64").to_string(), "2001:db8::1/64");
    }

    #[test]
    fn test_tcp_buffer_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("lte".to_string(), "1,2,3,4,5,6".to_string());
        let table = TcpBufferTable::new(overrides);
        assert_eq!(table.sizes_for(RadioTech::Lte), "1,2,3,4,5,6");
        assert_eq!(
            table.sizes_for(RadioTech::Umts),
            RadioTech::Umts.default_tcp_buffer_sizes()
        );
    }
}
