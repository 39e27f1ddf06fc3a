//! Neighbor-cache (`arp -a`) parsing and subnet inference

use crate::discovery::mac::extract_mac;
use crate::model::{slash24, NetworkInterface};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;

static PAREN_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\)").expect("valid regex"));

static ON_IFACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bon\s+(\S+)").expect("valid regex"));

static WIN_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Interface:\s*(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("valid regex"));

/// One row of the neighbor table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    /// Interface name (BSD/Linux output)
    pub interface: Option<String>,
    /// Local address heading the section (Windows output)
    pub local_ip: Option<Ipv4Addr>,
}

impl NeighborEntry {
    fn belongs_to(&self, iface: &NetworkInterface) -> bool {
        match (&self.interface, self.local_ip) {
            (Some(name), _) => name == &iface.name,
            (None, Some(local)) => local == iface.ip,
            (None, None) => false,
        }
    }
}

/// Parse `arp -a` output from BSD, Linux or Windows
pub fn parse_neighbor_table(output: &str) -> Vec<NeighborEntry> {
    let mut entries = Vec::new();
    let mut section: Option<Ipv4Addr> = None;

    for line in output.lines() {
        if let Some(caps) = WIN_SECTION.captures(line) {
            section = caps[1].parse().ok();
            continue;
        }

        if let Some(caps) = PAREN_IP.captures(line) {
            let Ok(ip) = caps[1].parse::<Ipv4Addr>() else {
                continue;
            };
            entries.push(NeighborEntry {
                ip,
                mac: extract_mac(line),
                interface: ON_IFACE.captures(line).map(|c| c[1].to_string()),
                local_ip: None,
            });
            continue;
        }

        // Windows rows: "  192.168.0.1    00-3e-e1-b7-57-54    dynamic"
        if let Some(local) = section {
            let first = line.split_whitespace().next();
            if let Some(ip) = first.and_then(|tok| tok.parse::<Ipv4Addr>().ok()) {
                entries.push(NeighborEntry {
                    ip,
                    mac: extract_mac(line),
                    interface: None,
                    local_ip: Some(local),
                });
            }
        }
    }

    entries
}

/// Subnets reachable through `interfaces` that only show up in the neighbor cache
///
/// Every foreign address is assumed to sit in a full adjacent `/24`; the
/// resulting pseudo-interface keeps the real interface's name and address.
pub fn discover_subnets(interfaces: &[NetworkInterface], entries: &[NeighborEntry]) -> Vec<NetworkInterface> {
    let primaries: Vec<&NetworkInterface> = interfaces.iter().filter(|i| !i.discovered).collect();
    let mut seen = HashSet::new();
    let mut discovered = Vec::new();

    for iface in &primaries {
        for entry in entries.iter().filter(|e| e.belongs_to(iface)) {
            let ip = entry.ip;
            if ip.is_multicast() || ip.is_broadcast() || ip.is_loopback() || ip.is_unspecified() {
                continue;
            }
            if primaries.iter().any(|p| p.subnet.contains(ip)) {
                continue;
            }

            let subnet = slash24(ip);
            if seen.insert((iface.name.clone(), subnet)) {
                log::debug!("{}: inferred subnet {} from neighbor {}", iface.name, subnet, ip);
                discovered.push(NetworkInterface::discovered(iface, subnet));
            }
        }
    }

    discovered
}
