//! Reconciling fresh scan results with persisted device history
//!
//! Everything here is a pure function of its inputs.

use crate::discovery::vendor::VendorLookup;
use crate::model::{
    non_empty, slash24, AdapterView, Device, DeviceStatus, KnownDeviceStore, NetworkContext, NetworkGroup,
    NetworkInterface,
};
use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

/// Sub-network a device is shown under
///
/// The first configured key containing the address wins, then the
/// interface's primary subnet, then the address's own `/24`.
pub fn network_key_for(ip: Ipv4Addr, primary: Option<Ipv4Network>, keys: &[Ipv4Network]) -> Ipv4Network {
    keys.iter()
        .find(|key| key.contains(ip))
        .copied()
        .or(primary)
        .unwrap_or_else(|| slash24(ip))
}

fn keep_hard_earned(fresh: &Option<String>, persisted: &Option<String>) -> Option<String> {
    if non_empty(fresh).is_some() {
        fresh.clone()
    } else if non_empty(persisted).is_some() {
        persisted.clone()
    } else {
        fresh.clone()
    }
}

/// Fresh probe over persisted record; non-empty identity fields are never lost
pub fn merge_device(persisted: &Device, fresh: &Device) -> Device {
    let mut merged = fresh.clone();
    merged.hostname = keep_hard_earned(&fresh.hostname, &persisted.hostname);
    merged.mac = keep_hard_earned(&fresh.mac, &persisted.mac);
    merged.vendor = keep_hard_earned(&fresh.vendor, &persisted.vendor);
    merged.last_seen = fresh.last_seen.max(persisted.last_seen);
    merged
}

/// Status and context for a device shown under `key`
///
/// Off the primary subnet only a device confirmed pingable in this scan stays up.
pub fn apply_network_context(device: &mut Device, key: Ipv4Network, primary: Option<Ipv4Network>) {
    if Some(key) == primary {
        device.network_context = NetworkContext::Primary;
    } else if device.pingable {
        device.network_context = NetworkContext::DiscoveredOnline;
    } else {
        device.status = DeviceStatus::Offline;
        device.network_context = NetworkContext::DiscoveredOffline;
    }
}

#[derive(Default)]
struct Grouper {
    groups: Vec<NetworkGroup>,
    index: HashMap<Ipv4Network, usize>,
}

impl Grouper {
    fn push(&mut self, key: Ipv4Network, discovered: bool, device: Device) {
        let pos = match self.index.get(&key) {
            Some(&pos) => pos,
            None => {
                self.groups.push(NetworkGroup {
                    network: key,
                    discovered,
                    devices: Vec::new(),
                });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[pos].devices.push(device);
    }

    fn finish(mut self) -> Vec<NetworkGroup> {
        for group in &mut self.groups {
            group.devices.sort_by_key(|d| u32::from(d.ip));
        }
        self.groups
    }
}

/// View of one active interface: fresh results over history, plus offline leftovers
pub fn merge_interface(
    name: &str,
    primary: Option<Ipv4Network>,
    keys: &[Ipv4Network],
    fresh: &[Device],
    persisted: &[Device],
) -> AdapterView {
    let stored: HashMap<Ipv4Addr, &Device> = persisted.iter().map(|d| (d.ip, d)).collect();
    let mut seen = HashSet::new();
    let mut grouper = Grouper::default();

    for device in fresh.iter().filter(|d| d.status != DeviceStatus::Hidden) {
        if !seen.insert(device.ip) {
            continue;
        }
        let mut merged = match stored.get(&device.ip) {
            Some(old) => merge_device(old, device),
            None => device.clone(),
        };
        merged.current_scan = true;
        merged.historical = false;

        let key = network_key_for(merged.ip, primary, keys);
        apply_network_context(&mut merged, key, primary);
        grouper.push(key, Some(key) != primary, merged);
    }

    for old in persisted.iter().filter(|d| !seen.contains(&d.ip)) {
        let mut offline = old.clone();
        offline.status = DeviceStatus::Offline;
        offline.pingable = false;
        offline.current_scan = false;
        offline.historical = false;

        let key = network_key_for(offline.ip, primary, keys);
        apply_network_context(&mut offline, key, primary);
        grouper.push(key, Some(key) != primary, offline);
    }

    AdapterView {
        name: name.to_string(),
        historical: false,
        networks: grouper.finish(),
    }
}

/// View of an interface that is not up right now; everything is offline
pub fn merge_historical(name: &str, keys: &[Ipv4Network], persisted: &[Device]) -> AdapterView {
    let mut grouper = Grouper::default();
    let mut seen = HashSet::new();

    for old in persisted.iter().filter(|d| seen.insert(d.ip)) {
        let mut offline = old.clone();
        offline.status = DeviceStatus::Offline;
        offline.pingable = false;
        offline.current_scan = false;
        offline.historical = true;

        let key = network_key_for(offline.ip, None, keys);
        grouper.push(key, false, offline);
    }

    AdapterView {
        name: name.to_string(),
        historical: true,
        networks: grouper.finish(),
    }
}

/// Adapter → network → devices for every active and historical interface
///
/// `active` may hold several entries per name (a primary subnet plus
/// discovered ones); the first non-discovered entry is the primary.
pub fn build_view(
    active: &[NetworkInterface],
    fresh: &KnownDeviceStore,
    known: &KnownDeviceStore,
    network_keys: &[Ipv4Network],
) -> Vec<AdapterView> {
    let mut names: Vec<&str> = Vec::new();
    for iface in active {
        if !names.contains(&iface.name.as_str()) {
            names.push(&iface.name);
        }
    }

    let mut views = Vec::new();
    for name in &names {
        let entries: Vec<&NetworkInterface> = active.iter().filter(|i| i.name == *name).collect();
        let primary = entries
            .iter()
            .find(|i| !i.discovered)
            .or_else(|| entries.first())
            .map(|i| i.subnet);

        let mut keys = network_keys.to_vec();
        keys.extend(entries.iter().filter(|i| i.discovered).map(|i| i.subnet));

        let empty = Vec::new();
        views.push(merge_interface(
            name,
            primary,
            &keys,
            fresh.get(*name).unwrap_or(&empty),
            known.get(*name).unwrap_or(&empty),
        ));
    }

    for (name, devices) in known {
        if !names.contains(&name.as_str()) {
            views.push(merge_historical(name, network_keys, devices));
        }
    }

    views
}

/// Persisted list after a scan: history order kept, new hosts appended,
/// hidden hosts never stored, vendor filled in from the MAC when missing
///
/// Only records answered in this scan are marked `current_scan`.
pub fn merge_records(persisted: &[Device], fresh: &[Device], vendors: Option<&VendorLookup>) -> Vec<Device> {
    let visible: Vec<&Device> = fresh.iter().filter(|d| d.status != DeviceStatus::Hidden).collect();
    let by_ip: HashMap<Ipv4Addr, &Device> = visible.iter().map(|d| (d.ip, *d)).collect();
    let mut placed = HashSet::new();
    let mut records = Vec::with_capacity(persisted.len() + visible.len());

    for old in persisted {
        if !placed.insert(old.ip) {
            continue;
        }
        let record = match by_ip.get(&old.ip) {
            Some(new) => merge_device(old, new),
            None => old.clone(),
        };
        records.push(record);
    }

    for new in visible {
        if placed.insert(new.ip) {
            records.push(new.clone());
        }
    }

    for record in &mut records {
        record.network_context = NetworkContext::Primary;
        record.historical = false;
        record.current_scan = by_ip.contains_key(&record.ip);
        if non_empty(&record.vendor).is_none() {
            if let (Some(mac), Some(vendors)) = (non_empty(&record.mac), vendors) {
                record.vendor = vendors.lookup(mac);
            }
        }
    }

    records
}
