//! Host discovery: status probing, identity, hardware address and vendor
//!
//! [`HostScanner`] runs the per-host pipeline; [`scheduler::ScanScheduler`]
//! fans it out across a subnet.

pub mod identity;
pub mod mac;
pub mod scheduler;
pub mod status;
pub mod vendor;

use crate::config::{DiscoveryConfig, IdentitySettings};
use crate::model::{non_empty, Device, DeviceStatus};
use crate::network::command::CommandRunner;
use crate::network::probe::Pinger;
use chrono::Utc;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

pub use identity::{IdentityResolver, IdentityStrategy, IdentityTarget};
pub use mac::{extract_mac, pad_mac_address, MacResolver};
pub use scheduler::{DeliveryMode, ScanObserver, ScanProgress, ScanScheduler};
pub use status::StatusProber;
pub use vendor::VendorLookup;

/// Produces one fresh Device record for an address
#[async_trait::async_trait]
pub trait HostProber: Send + Sync + 'static {
    /// `known` is this host's persisted record on the interface being scanned
    async fn scan_host(&self, ip: Ipv4Addr, known: Option<Device>) -> Device;
}

/// Status, then identity, MAC and vendor for reachable hosts
pub struct HostScanner {
    status: StatusProber,
    identity: IdentityResolver,
    macs: MacResolver,
    vendors: Arc<VendorLookup>,
    identity_budget: Duration,
}

impl HostScanner {
    pub fn new(status: StatusProber, identity: IdentityResolver, macs: MacResolver, vendors: Arc<VendorLookup>) -> Self {
        Self {
            status,
            identity,
            macs,
            vendors,
            identity_budget: IdentitySettings::default().budget_duration(),
        }
    }

    /// Cap on MAC lookup plus naming; whatever is unresolved by then falls back
    pub fn with_identity_budget(mut self, budget: Duration) -> Self {
        self.identity_budget = budget;
        self
    }

    /// Wire the standard probes against real OS utilities
    pub fn from_config(config: &DiscoveryConfig, runner: Arc<dyn CommandRunner>, vendors: Arc<VendorLookup>) -> Self {
        let pinger = Pinger::new(
            runner.clone(),
            config.probe.ping_timeout_duration(),
            config.probe.ping_process_timeout_duration(),
        );
        let status = StatusProber::new(pinger, config.probe.standby_ports.clone(), config.probe.port_timeout_duration());
        let macs = MacResolver::new(
            runner.clone(),
            Duration::from_millis(config.mac.query_timeout),
            Duration::from_millis(config.mac.dump_timeout),
        );
        let identity = IdentityResolver::standard(runner, &config.identity, macs.clone(), vendors.clone());

        Self::new(status, identity, macs, vendors).with_identity_budget(config.identity.budget_duration())
    }
}

#[async_trait::async_trait]
impl HostProber for HostScanner {
    async fn scan_host(&self, ip: Ipv4Addr, known: Option<Device>) -> Device {
        let status = self.status.probe(ip, known.is_some()).await;

        match status {
            DeviceStatus::Hidden => Device::new(ip, status),
            DeviceStatus::Online | DeviceStatus::Standby => {
                let mut mac = None;
                let mut named = None;
                let lookup = async {
                    mac = self.macs.resolve(ip).await;
                    let target = IdentityTarget::new(ip).with_mac(mac.clone());
                    named = self.identity.resolve_named(&target).await;
                };
                if tokio::time::timeout(self.identity_budget, lookup).await.is_err() {
                    log::debug!("{}: identity lookup exceeded {:?}", ip, self.identity_budget);
                }

                let mut device = Device::new(ip, status).with_last_seen(Utc::now());
                device.hostname = named
                    .or_else(|| known.as_ref().and_then(|k| non_empty(&k.hostname).map(str::to_string)))
                    .or_else(|| Some(format!(".{}", ip.octets()[3])));
                device.mac = mac.or_else(|| known.as_ref().and_then(|k| k.mac.clone()));
                device.vendor = device.mac.as_deref().and_then(|m| self.vendors.lookup(m));
                device
            }
            DeviceStatus::Offline => {
                let mut device = Device::new(ip, status);
                if let Some(known) = known {
                    device.hostname = known.hostname;
                    device.mac = known.mac;
                    device.vendor = known.vendor;
                    device.last_seen = known.last_seen;
                }
                device
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::command::ScriptedRunner;

    fn scanner(runner: ScriptedRunner) -> HostScanner {
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);
        let pinger = Pinger::new(runner.clone(), Duration::from_secs(1), Duration::from_secs(3));
        // no standby ports, so silent hosts never touch the network
        let status = StatusProber::new(pinger, Vec::new(), Duration::from_millis(100));
        let macs = MacResolver::new(runner, Duration::from_secs(1), Duration::from_secs(1));
        let vendors = Arc::new(VendorLookup::default());
        let identity = IdentityResolver::new(vec![Box::new(identity::VendorResolver::new(None, vendors.clone()))]);
        HostScanner::new(status, identity, macs, vendors)
    }

    #[tokio::test]
    async fn test_unknown_silent_host_is_hidden() {
        let scanner = scanner(ScriptedRunner::default().fail("ping"));
        let device = scanner.scan_host(Ipv4Addr::new(10, 0, 0, 9), None).await;
        assert_eq!(device.status, DeviceStatus::Hidden);
    }

    #[tokio::test]
    async fn test_known_silent_host_keeps_record() {
        let scanner = scanner(ScriptedRunner::default().fail("ping"));
        let known = Device::new(Ipv4Addr::new(10, 0, 0, 9), DeviceStatus::Online)
            .with_hostname("nas.local")
            .with_mac("AA:BB:CC:DD:EE:FF")
            .with_vendor("Synology");

        let device = scanner.scan_host(known.ip, Some(known.clone())).await;
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(!device.pingable);
        assert_eq!(device.hostname.as_deref(), Some("nas.local"));
        assert_eq!(device.vendor.as_deref(), Some("Synology"));
    }

    struct Stalls;

    #[async_trait::async_trait]
    impl IdentityStrategy for Stalls {
        async fn try_resolve(&self, _target: &IdentityTarget) -> Option<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Some("too-late".to_string())
        }

        fn name(&self) -> &str {
            "stalls"
        }
    }

    #[tokio::test]
    async fn test_slow_naming_falls_back_within_budget() {
        let runner: Arc<dyn CommandRunner> = Arc::new(
            ScriptedRunner::default()
                .on("ping", "")
                .on("arp -n 10.0.0.9", "10.0.0.9 ether 52:54:00:aa:bb:cc C eth0")
                .on("arp -a 10.0.0.9", "  10.0.0.9   52-54-00-aa-bb-cc   dynamic"),
        );
        let pinger = Pinger::new(runner.clone(), Duration::from_secs(1), Duration::from_secs(3));
        let status = StatusProber::new(pinger, Vec::new(), Duration::from_millis(100));
        let macs = MacResolver::new(runner, Duration::from_secs(1), Duration::from_secs(1));
        let scanner = HostScanner::new(
            status,
            IdentityResolver::new(vec![Box::new(Stalls)]),
            macs,
            Arc::new(VendorLookup::default()),
        )
        .with_identity_budget(Duration::from_millis(100));

        let known = Device::new(Ipv4Addr::new(10, 0, 0, 9), DeviceStatus::Online).with_hostname("nas.local");
        let device = tokio::time::timeout(Duration::from_secs(2), scanner.scan_host(known.ip, Some(known)))
            .await
            .unwrap();

        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.hostname.as_deref(), Some("nas.local"));
        assert_eq!(device.mac.as_deref(), Some("52:54:00:AA:BB:CC"));
        assert_eq!(device.vendor.as_deref(), Some("QEMU"));
    }

    #[tokio::test]
    async fn test_online_host_resolves_mac_and_vendor() {
        let runner = ScriptedRunner::default()
            .on("ping", "")
            .on("arp -n 10.0.0.9", "10.0.0.9 ether 52:54:00:aa:bb:cc C eth0")
            .on("arp -a 10.0.0.9", "  10.0.0.9   52-54-00-aa-bb-cc   dynamic");
        let device = scanner(runner).scan_host(Ipv4Addr::new(10, 0, 0, 9), None).await;

        assert_eq!(device.status, DeviceStatus::Online);
        assert!(device.pingable);
        assert!(device.last_seen.is_some());
        assert_eq!(device.mac.as_deref(), Some("52:54:00:AA:BB:CC"));
        assert_eq!(device.vendor.as_deref(), Some("QEMU"));
        assert_eq!(device.hostname.as_deref(), Some("QEMU-9"));
    }
}
