//! Continuous discovery loop
//!
//! One cycle enumerates interfaces, scans every interface concurrently in
//! live mode and records each interface's results. The owning monitor repeats this until
//! cancelled; one-shot consumers call [`Monitor::run_cycle`] directly.

use crate::config::DiscoveryConfig;
use crate::discovery::{DeliveryMode, HostProber, ScanObserver, ScanProgress, ScanScheduler};
use crate::history::DiscoveryState;
use crate::model::{Device, NetworkInterface};
use crate::network::InterfaceEnumerator;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Summary of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub interfaces: usize,
    pub subnets: usize,
    pub devices: usize,
    pub cancelled: bool,
}

/// Forwards live results into the state and on to an outer observer
struct LiveForwarder {
    tx: mpsc::UnboundedSender<(String, Device)>,
    outer: Option<Arc<dyn ScanObserver>>,
}

impl ScanObserver for LiveForwarder {
    fn on_device(&self, interface: &str, device: &Device) {
        let _ = self.tx.send((interface.to_string(), device.clone()));
        if let Some(outer) = &self.outer {
            outer.on_device(interface, device);
        }
    }

    fn on_progress(&self, progress: &ScanProgress) {
        if let Some(outer) = &self.outer {
            outer.on_progress(progress);
        }
    }
}

pub struct Monitor {
    enumerator: InterfaceEnumerator,
    scheduler: ScanScheduler<dyn HostProber>,
    state: Arc<RwLock<DiscoveryState>>,
    observer: Option<Arc<dyn ScanObserver>>,
    first_delay: Duration,
    interval: Duration,
}

impl Monitor {
    pub fn new(
        config: &DiscoveryConfig,
        enumerator: InterfaceEnumerator,
        prober: Arc<dyn HostProber>,
        state: Arc<RwLock<DiscoveryState>>,
    ) -> Self {
        Self {
            enumerator,
            scheduler: ScanScheduler::new(prober, &config.scan),
            state,
            observer: None,
            first_delay: config.monitor.delay_after(0),
            interval: config.monitor.delay_after(1),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScanObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> Arc<RwLock<DiscoveryState>> {
        self.state.clone()
    }

    /// Current primary and discovered subnets
    pub async fn interfaces(&self) -> Vec<NetworkInterface> {
        self.enumerator.enumerate().await
    }

    /// Scan every currently reachable subnet once
    pub async fn run_cycle(&self, mode: DeliveryMode, cancel: &CancellationToken) -> CycleReport {
        let interfaces = self.interfaces().await;
        self.scan_interfaces(interfaces, mode, cancel).await
    }

    /// Scan a given interface list, grouping subnets under their interface name
    pub async fn scan_interfaces(
        &self,
        interfaces: Vec<NetworkInterface>,
        mode: DeliveryMode,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport {
            subnets: interfaces.len(),
            ..Default::default()
        };

        let mut names: Vec<String> = Vec::new();
        for iface in &interfaces {
            if !names.contains(&iface.name) {
                names.push(iface.name.clone());
            }
        }
        report.interfaces = names.len();
        self.state.write().await.register_interfaces(interfaces.clone());

        let scans = names.iter().map(|name| self.scan_named(name, &interfaces, mode, cancel));
        report.devices = join_all(scans).await.into_iter().sum();

        report.cancelled = cancel.is_cancelled();
        log::info!(
            "Cycle finished: {} interfaces, {} subnets, {} devices{}",
            report.interfaces,
            report.subnets,
            report.devices,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    /// Scan every subnet under one interface name, then record them together
    async fn scan_named(
        &self,
        name: &str,
        interfaces: &[NetworkInterface],
        mode: DeliveryMode,
        cancel: &CancellationToken,
    ) -> usize {
        if cancel.is_cancelled() {
            return 0;
        }

        let known = self.state.read().await.known_for(name);
        let mut found: Vec<Device> = Vec::new();

        for iface in interfaces.iter().filter(|i| i.name == name) {
            if cancel.is_cancelled() {
                break;
            }
            for device in self.scan_subnet(iface, &known, mode, cancel).await {
                match found.iter_mut().find(|d| d.ip == device.ip) {
                    Some(existing) => *existing = device,
                    None => found.push(device),
                }
            }
        }

        let count = found.len();
        self.state.write().await.record_scan(name, found);
        count
    }

    async fn scan_subnet(
        &self,
        iface: &NetworkInterface,
        known: &[Device],
        mode: DeliveryMode,
        cancel: &CancellationToken,
    ) -> Vec<Device> {
        match mode {
            DeliveryMode::Batch => {
                self.scheduler
                    .scan(iface, known, DeliveryMode::Batch, self.observer.clone(), cancel)
                    .await
            }
            DeliveryMode::Live => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let forwarder: Arc<dyn ScanObserver> = Arc::new(LiveForwarder {
                    tx,
                    outer: self.observer.clone(),
                });

                let state = self.state.clone();
                let drain = tokio::spawn(async move {
                    while let Some((interface, device)) = rx.recv().await {
                        state.write().await.upsert_live(&interface, device);
                    }
                });

                let devices = self.scheduler.scan_live(iface, known, forwarder, cancel).await;
                // forwarder dropped with the scan; the channel closes once workers are gone
                if let Err(e) = drain.await {
                    log::error!("Live update task failed: {}", e);
                }
                devices
            }
        }
    }

    /// Repeat cycles until cancelled, 5 s after the first and the configured interval after later ones
    pub async fn run(&self, cancel: CancellationToken) {
        let mut cycle: u64 = 0;
        while !cancel.is_cancelled() {
            self.run_cycle(DeliveryMode::Live, &cancel).await;

            let delay = if cycle == 0 { self.first_delay } else { self.interval };
            cycle += 1;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::info!("Monitor stopped after {} cycles", cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{DeviceStore, MemoryStore, StoreRole};
    use crate::model::DeviceStatus;
    use crate::network::command::ScriptedRunner;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EvenOnline;

    #[async_trait::async_trait]
    impl HostProber for EvenOnline {
        async fn scan_host(&self, ip: Ipv4Addr, _known: Option<Device>) -> Device {
            if ip.octets()[3] % 2 == 0 {
                Device::new(ip, DeviceStatus::Online).with_mac("AA:BB:CC:00:00:01")
            } else {
                Device::new(ip, DeviceStatus::Hidden)
            }
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ScanObserver for Counter {
        fn on_device(&self, _interface: &str, _device: &Device) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn monitor(role: StoreRole, store: Arc<MemoryStore>) -> Monitor {
        let mut config = DiscoveryConfig::default();
        config.scan.chunk_pause = 0;
        let enumerator = InterfaceEnumerator::new(Arc::new(ScriptedRunner::default()), false, Duration::from_secs(1));
        let state = Arc::new(RwLock::new(DiscoveryState::new(Box::new(store), role, config.network_keys.clone())));
        Monitor::new(&config, enumerator, Arc::new(EvenOnline), state)
    }

    fn subnets() -> Vec<NetworkInterface> {
        let primary = NetworkInterface::new("en0", Ipv4Addr::new(10, 1, 0, 1), 29).unwrap();
        let extra = NetworkInterface::discovered(&primary, "10.2.0.0/30".parse().unwrap());
        vec![primary, extra]
    }

    #[tokio::test]
    async fn test_live_cycle_records_and_persists() {
        let store = Arc::new(MemoryStore::default());
        let counter = Arc::new(Counter::default());
        let monitor = monitor(StoreRole::Owner, store.clone()).with_observer(counter.clone());

        let report = monitor
            .scan_interfaces(subnets(), DeliveryMode::Live, &CancellationToken::new())
            .await;

        // 10.1.0.2/4/6 and 10.2.0.2
        assert_eq!(report.devices, 4);
        assert_eq!(report.interfaces, 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);
        assert_eq!(store.load().unwrap()["en0"].len(), 4);

        let view = monitor.state().read().await.view();
        assert_eq!(view[0].networks.len(), 2);
    }

    #[tokio::test]
    async fn test_reader_cycle_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::default());
        let monitor = monitor(StoreRole::Reader, store.clone());
        monitor
            .scan_interfaces(subnets(), DeliveryMode::Batch, &CancellationToken::new())
            .await;
        assert!(store.load().unwrap().is_empty());
        assert_eq!(monitor.state().read().await.known_for("en0").len(), 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let monitor = monitor(StoreRole::Owner, Arc::new(MemoryStore::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), monitor.run(cancel))
            .await
            .unwrap();
    }
}
