//! Owned discovery state: active interfaces, current results and history

use super::merge::{build_view, merge_records};
use super::DeviceStore;
use crate::discovery::VendorLookup;
use crate::error::DiscoveryError;
use crate::model::{AdapterView, Device, KnownDeviceStore, NetworkInterface, WakeTarget};
use ipnetwork::Ipv4Network;
use std::sync::Arc;

/// Who may write the persisted document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// The long-lived scanner; the only writer
    Owner,
    /// Consumers that merge in memory and never write
    Reader,
}

pub struct DiscoveryState {
    store: Box<dyn DeviceStore>,
    role: StoreRole,
    network_keys: Vec<Ipv4Network>,
    vendors: Option<Arc<VendorLookup>>,
    active: Vec<NetworkInterface>,
    current: KnownDeviceStore,
    known: KnownDeviceStore,
    /// Document as last read from or written to the store
    synced: Option<KnownDeviceStore>,
}

impl DiscoveryState {
    pub fn new(store: Box<dyn DeviceStore>, role: StoreRole, network_keys: Vec<Ipv4Network>) -> Self {
        Self {
            store,
            role,
            network_keys,
            vendors: None,
            active: Vec::new(),
            current: KnownDeviceStore::new(),
            known: KnownDeviceStore::new(),
            synced: None,
        }
    }

    /// Vendor table used to fill in vendors at persist time
    pub fn with_vendors(mut self, vendors: Arc<VendorLookup>) -> Self {
        self.vendors = Some(vendors);
        self
    }

    /// Read the persisted document; a failed read starts from empty history
    pub fn load(&mut self) {
        match self.store.load() {
            Ok(known) => {
                log::info!(
                    "Loaded {} known devices from {}",
                    known.values().map(Vec::len).sum::<usize>(),
                    self.store.describe()
                );
                self.synced = Some(known.clone());
                self.known = known;
            }
            Err(e) => {
                log::warn!(
                    "Could not read {}: {}; starting with empty history and leaving the file untouched",
                    self.store.describe(),
                    e
                );
                self.known = KnownDeviceStore::new();
                self.synced = None;
            }
        }
    }

    pub fn role(&self) -> StoreRole {
        self.role
    }

    /// Replace this cycle's interface list
    pub fn register_interfaces(&mut self, interfaces: Vec<NetworkInterface>) {
        self.active = interfaces;
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.active
    }

    /// Persisted records for one interface, for status classification
    pub fn known_for(&self, interface: &str) -> Vec<Device> {
        self.known.get(interface).cloned().unwrap_or_default()
    }

    pub fn known_devices(&self) -> &KnownDeviceStore {
        &self.known
    }

    /// Fold a single live result into the current view
    pub fn upsert_live(&mut self, interface: &str, device: Device) {
        let list = self.current.entry(interface.to_string()).or_default();
        match list.iter_mut().find(|d| d.ip == device.ip) {
            Some(existing) => *existing = device,
            None => list.push(device),
        }
    }

    /// Record a completed interface scan and persist it when owning the store
    ///
    /// The owner re-reads the store first so changes made elsewhere, such as
    /// a clear, are merged into rather than overwritten. A store that cannot
    /// be read is never saved over. Write failures are logged, never returned.
    pub fn record_scan(&mut self, interface: &str, devices: Vec<Device>) {
        let writable = self.role == StoreRole::Owner && self.refresh_from_store();

        let persisted = self.known.get(interface).map(Vec::as_slice).unwrap_or(&[]);
        let merged = merge_records(persisted, &devices, self.vendors.as_deref());

        self.current.insert(interface.to_string(), devices);
        if merged.is_empty() && !self.known.contains_key(interface) {
            return;
        }
        self.known.insert(interface.to_string(), merged);

        if writable {
            match self.store.save(&self.known) {
                Ok(()) => self.synced = Some(self.known.clone()),
                Err(e) => log::warn!("Could not save {}: {}", self.store.describe(), e),
            }
        }
    }

    /// Adopt the stored document when it changed since we last synced
    ///
    /// Returns false when the store cannot be read.
    fn refresh_from_store(&mut self) -> bool {
        match self.store.load() {
            Ok(stored) => {
                if self.synced.as_ref() != Some(&stored) {
                    if self.synced.is_some() {
                        log::info!("{} changed since last sync; reloading history", self.store.describe());
                    }
                    self.known = stored.clone();
                    self.synced = Some(stored);
                }
                true
            }
            Err(e) => {
                log::warn!("Not saving over unreadable {}: {}", self.store.describe(), e);
                false
            }
        }
    }

    /// Merged adapter → network → device view
    pub fn view(&self) -> Vec<AdapterView> {
        build_view(&self.active, &self.current, &self.known, &self.network_keys)
    }

    /// Devices a magic packet can be sent to
    pub fn wake_targets(&self) -> Vec<WakeTarget> {
        let mut targets: Vec<WakeTarget> = Vec::new();
        for device in self.view().iter().flat_map(|v| &v.networks).flat_map(|n| &n.devices) {
            if let Some(target) = device.wake_target() {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    pub fn export_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.view())?)
    }

    /// Forget all history, in memory and on disk
    pub fn clear_history(&mut self) -> crate::Result<()> {
        if self.role != StoreRole::Owner {
            return Err(DiscoveryError::StorageError("history is read-only in this role".to_string()));
        }
        self.known.clear();
        self.current.clear();
        self.active.clear();
        self.store.clear()?;
        self.synced = Some(KnownDeviceStore::new());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;
    use crate::model::DeviceStatus;
    use std::net::Ipv4Addr;

    struct FailingStore;

    impl DeviceStore for FailingStore {
        fn load(&self) -> crate::Result<KnownDeviceStore> {
            Err(DiscoveryError::StorageError("disk gone".to_string()))
        }

        fn save(&self, _devices: &KnownDeviceStore) -> crate::Result<()> {
            Err(DiscoveryError::StorageError("disk gone".to_string()))
        }

        fn clear(&self) -> crate::Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn online(last: u8) -> Device {
        Device::new(Ipv4Addr::new(192, 168, 0, last), DeviceStatus::Online).with_mac("AA:BB:CC:DD:EE:01")
    }

    #[test]
    fn test_failed_load_and_save_are_absorbed() {
        let mut state = DiscoveryState::new(Box::new(FailingStore), StoreRole::Owner, Vec::new());
        state.load();
        state.record_scan("en0", vec![online(5)]);
        assert_eq!(state.known_for("en0").len(), 1);
    }

    #[test]
    fn test_reader_never_writes() {
        let store = Arc::new(MemoryStore::default());
        let mut state = DiscoveryState::new(Box::new(store.clone()), StoreRole::Reader, Vec::new());
        state.record_scan("en0", vec![online(5)]);
        assert!(store.load().unwrap().is_empty());
        assert!(state.clear_history().is_err());
    }

    #[test]
    fn test_owner_persists() {
        let store = Arc::new(MemoryStore::default());
        let mut state = DiscoveryState::new(Box::new(store.clone()), StoreRole::Owner, Vec::new());
        state.record_scan("en0", vec![online(5), Device::new(Ipv4Addr::new(192, 168, 0, 6), DeviceStatus::Hidden)]);
        let saved = store.load().unwrap();
        assert_eq!(saved["en0"].len(), 1);

        state.clear_history().unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(state.view().is_empty());
    }

    #[test]
    fn test_clear_by_another_owner_is_not_undone() {
        let store = Arc::new(MemoryStore::default());
        let mut watcher = DiscoveryState::new(Box::new(store.clone()), StoreRole::Owner, Vec::new());
        watcher.load();
        watcher.record_scan("en0", vec![online(5)]);
        assert_eq!(store.load().unwrap()["en0"].len(), 1);

        let mut clearer = DiscoveryState::new(Box::new(store.clone()), StoreRole::Owner, Vec::new());
        clearer.load();
        clearer.clear_history().unwrap();

        // nothing seen this cycle, so nothing comes back
        watcher.record_scan("en0", vec![]);
        assert!(store.load().unwrap().values().all(Vec::is_empty));
        assert!(watcher.known_for("en0").is_empty());

        watcher.record_scan("en0", vec![online(7)]);
        let saved = store.load().unwrap();
        assert_eq!(saved["en0"].len(), 1);
        assert_eq!(saved["en0"][0].ip, Ipv4Addr::new(192, 168, 0, 7));
    }

    #[test]
    fn test_live_upsert_replaces_by_ip() {
        let mut state = DiscoveryState::new(Box::new(MemoryStore::default()), StoreRole::Reader, Vec::new());
        let iface = NetworkInterface::new("en0", Ipv4Addr::new(192, 168, 0, 17), 24).unwrap();
        state.register_interfaces(vec![iface]);
        state.upsert_live("en0", Device::new(Ipv4Addr::new(192, 168, 0, 5), DeviceStatus::Standby));
        state.upsert_live("en0", online(5));

        let view = state.view();
        assert_eq!(view[0].device_count(), 1);
        assert_eq!(view[0].networks[0].devices[0].status, DeviceStatus::Online);
        assert_eq!(state.wake_targets().len(), 1);
    }
}
