//! Integration tests for history merging and the adapter view

use chrono::{TimeZone, Utc};
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use wolcaster::{
    discovery::VendorLookup,
    history::{build_view, merge_device, merge_records},
    model::{Device, DeviceStatus, KnownDeviceStore, NetworkContext, NetworkInterface},
};

fn lan(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 0, last)
}

fn en0() -> NetworkInterface {
    NetworkInterface::new("en0", lan(17), 24).unwrap()
}

fn store(name: &str, devices: Vec<Device>) -> KnownDeviceStore {
    let mut store = KnownDeviceStore::new();
    store.insert(name.to_string(), devices);
    store
}

#[test]
fn test_hard_earned_fields_survive_a_poor_scan() {
    let seen = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let persisted = Device::new(lan(20), DeviceStatus::Online)
        .with_hostname("nas.local")
        .with_mac("00:11:32:AA:BB:CC")
        .with_vendor("Synology Incorporated")
        .with_last_seen(seen);

    let mut fresh = Device::new(lan(20), DeviceStatus::Standby);
    fresh.hostname = Some(String::new());

    let merged = merge_device(&persisted, &fresh);
    assert_eq!(merged.status, DeviceStatus::Standby);
    assert_eq!(merged.hostname.as_deref(), Some("nas.local"));
    assert_eq!(merged.mac.as_deref(), Some("00:11:32:AA:BB:CC"));
    assert_eq!(merged.vendor.as_deref(), Some("Synology Incorporated"));
    assert_eq!(merged.last_seen, Some(seen));
}

#[test]
fn test_fresh_identity_replaces_stale_identity() {
    let persisted = Device::new(lan(21), DeviceStatus::Online).with_hostname("old-name");
    let fresh = Device::new(lan(21), DeviceStatus::Online).with_hostname("new-name");
    assert_eq!(merge_device(&persisted, &fresh).hostname.as_deref(), Some("new-name"));
}

#[test]
fn test_merge_records_is_idempotent() {
    let vendors = VendorLookup::parse("001132\tSynology Incorporated\n");
    let persisted = vec![
        Device::new(lan(30), DeviceStatus::Online).with_hostname("desk"),
        Device::new(lan(5), DeviceStatus::Online).with_mac("00:11:32:00:00:05"),
    ];
    let fresh = vec![
        Device::new(lan(5), DeviceStatus::Standby),
        Device::new(lan(40), DeviceStatus::Online).with_mac("08:00:27:01:02:03"),
        Device::new(lan(41), DeviceStatus::Hidden),
    ];

    let once = merge_records(&persisted, &fresh, Some(&vendors));
    let twice = merge_records(&once, &fresh, Some(&vendors));
    assert_eq!(once, twice);

    let ips: Vec<u8> = once.iter().map(Device::last_octet).collect();
    assert_eq!(ips, vec![30, 5, 40]);
    assert_eq!(once[1].vendor.as_deref(), Some("Synology Incorporated"));
    assert_eq!(once[2].vendor.as_deref(), Some("VirtualBox"));
}

#[test]
fn test_unpingable_device_on_foreign_network_is_discovered_offline() {
    let keys: Vec<Ipv4Network> = vec!["134.124.230.0/24".parse().unwrap()];

    // answered a standby port earlier but never ping
    let mut remote = Device::new(Ipv4Addr::new(134, 124, 230, 9), DeviceStatus::Online);
    remote.pingable = false;
    let local = Device::new(lan(4), DeviceStatus::Online);

    let fresh = store("en0", vec![remote, local]);
    let view = build_view(&[en0()], &fresh, &KnownDeviceStore::new(), &keys);

    assert_eq!(view.len(), 1);
    let foreign = view[0]
        .networks
        .iter()
        .find(|n| n.network == keys[0])
        .expect("foreign group");
    assert!(foreign.discovered);
    assert_eq!(foreign.devices[0].status, DeviceStatus::Offline);
    assert_eq!(foreign.devices[0].network_context, NetworkContext::DiscoveredOffline);

    let primary = view[0].networks.iter().find(|n| !n.discovered).unwrap();
    assert_eq!(primary.devices[0].status, DeviceStatus::Online);
    assert_eq!(primary.devices[0].network_context, NetworkContext::Primary);
}

#[test]
fn test_remembered_pingable_device_on_foreign_network_goes_offline() {
    let keys: Vec<Ipv4Network> = vec!["134.124.230.0/24".parse().unwrap()];

    // pingable when stored, absent from this scan
    let remembered = Device::new(Ipv4Addr::new(134, 124, 230, 11), DeviceStatus::Online)
        .with_mac("52:54:00:12:34:11");
    assert!(remembered.pingable);
    let known = store("en0", vec![remembered]);
    let fresh = store("en0", vec![Device::new(lan(4), DeviceStatus::Online)]);

    let view = build_view(&[en0()], &fresh, &known, &keys);
    let foreign = view[0]
        .networks
        .iter()
        .find(|n| n.network == keys[0])
        .expect("foreign group");
    assert!(foreign.discovered);

    let device = &foreign.devices[0];
    assert_eq!(device.status, DeviceStatus::Offline);
    assert_eq!(device.network_context, NetworkContext::DiscoveredOffline);
    assert!(!device.pingable);
    assert!(!device.current_scan);
    assert_eq!(device.mac.as_deref(), Some("52:54:00:12:34:11"));
}

#[test]
fn test_pingable_device_on_discovered_subnet_stays_online() {
    let parent = en0();
    let behind = NetworkInterface::discovered(&parent, "10.20.30.0/24".parse().unwrap());
    let fresh = store("en0", vec![Device::new(Ipv4Addr::new(10, 20, 30, 7), DeviceStatus::Online)]);

    let view = build_view(&[parent, behind], &fresh, &KnownDeviceStore::new(), &[]);
    let device = &view[0].networks[0].devices[0];
    assert_eq!(device.status, DeviceStatus::Online);
    assert_eq!(device.network_context, NetworkContext::DiscoveredOnline);
}

#[test]
fn test_missing_devices_are_shown_offline() {
    let known = store(
        "en0",
        vec![
            Device::new(lan(8), DeviceStatus::Online).with_mac("AA:BB:CC:00:00:08"),
            Device::new(lan(9), DeviceStatus::Online),
        ],
    );
    let fresh = store("en0", vec![Device::new(lan(9), DeviceStatus::Online)]);

    let view = build_view(&[en0()], &fresh, &known, &[]);
    let devices = &view[0].networks[0].devices;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].ip, lan(8));
    assert_eq!(devices[0].status, DeviceStatus::Offline);
    assert!(!devices[0].current_scan);
    assert!(devices[1].current_scan);
}

#[test]
fn test_inactive_interface_becomes_historical() {
    let known = store(
        "wlan0",
        vec![
            Device::new(Ipv4Addr::new(172, 16, 4, 2), DeviceStatus::Online),
            Device::new(Ipv4Addr::new(172, 16, 5, 3), DeviceStatus::Standby),
        ],
    );

    let view = build_view(&[en0()], &KnownDeviceStore::new(), &known, &[]);
    let wlan = view.iter().find(|v| v.name == "wlan0").unwrap();
    assert!(wlan.historical);
    assert_eq!(wlan.networks.len(), 2);
    for device in wlan.networks.iter().flat_map(|n| &n.devices) {
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(device.historical);
    }
}
