//! Configuration module for the discovery engine

use crate::error::DiscoveryError;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ports probed when a host does not answer ping
pub const STANDBY_PORTS: [u16; 6] = [80, 443, 22, 23, 3389, 5900];

/// Main configuration structure for discovery operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Scan scheduling
    pub scan: ScanSettings,

    /// Status probing
    pub probe: ProbeSettings,

    /// Identity resolution
    pub identity: IdentitySettings,

    /// Neighbor-cache lookups
    pub mac: MacSettings,

    /// Vendor database
    pub vendor: VendorSettings,

    /// Continuous scan loop
    pub monitor: MonitorSettings,

    /// Routed subnets shown as their own group under an interface
    pub network_keys: Vec<Ipv4Network>,

    /// Infer extra subnets from the neighbor cache
    pub neighbor_discovery: bool,

    /// Directory holding the known-device document
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Hosts per chunk
    pub chunk_size: usize,

    /// Worker pool size in live mode
    pub live_workers: usize,

    /// Worker pool size in batch mode
    pub batch_workers: usize,

    /// Upper bound for one host's whole pipeline in milliseconds
    pub host_timeout: u64,

    /// Pause between chunks in milliseconds
    pub chunk_pause: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Ping reply wait in milliseconds
    pub ping_timeout: u64,

    /// Hard limit for the ping subprocess in milliseconds
    pub ping_process_timeout: u64,

    /// Ordered standby port set
    pub standby_ports: Vec<u16>,

    /// Connect timeout per standby port in milliseconds
    pub port_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub dns_timeout: u64,
    pub netbios_timeout: u64,
    pub mdns_timeout: u64,
    /// Connect timeout per fingerprint port in milliseconds
    pub fingerprint_timeout: u64,

    /// Time allowed for MAC lookup and naming of a reachable host, in milliseconds
    pub budget: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacSettings {
    /// Targeted `arp` query timeout in milliseconds
    pub query_timeout: u64,

    /// Full neighbor-table dump timeout in milliseconds
    pub dump_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    /// Tab-separated OUI database
    pub database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Delay after the first cycle in seconds
    pub first_delay: u64,

    /// Delay between later cycles in seconds
    pub interval: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan: ScanSettings::default(),
            probe: ProbeSettings::default(),
            identity: IdentitySettings::default(),
            mac: MacSettings::default(),
            vendor: VendorSettings::default(),
            monitor: MonitorSettings::default(),
            network_keys: default_network_keys(),
            neighbor_discovery: true,
            data_dir: None,
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            chunk_size: 255,
            live_workers: 20,
            batch_workers: 50,
            host_timeout: 4_000, // ping + concurrent standby ports + identity budget
            chunk_pause: 100,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ping_timeout: 1000,
            ping_process_timeout: 3000,
            standby_ports: STANDBY_PORTS.to_vec(),
            port_timeout: 1000,
        }
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            dns_timeout: 2000,
            netbios_timeout: 5000,
            mdns_timeout: 5000,
            fingerprint_timeout: 500,
            budget: 1500,
        }
    }
}

impl Default for MacSettings {
    fn default() -> Self {
        Self {
            query_timeout: 2000,
            dump_timeout: 5000,
        }
    }
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("assets").join("oui_database.txt"),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            first_delay: 5,
            interval: 30,
        }
    }
}

fn default_network_keys() -> Vec<Ipv4Network> {
    ["192.168.0.0/24", "134.124.230.0/24", "134.124.231.0/24"]
        .iter()
        .filter_map(|key| key.parse().ok())
        .collect()
}

impl DiscoveryConfig {
    /// Set the data directory
    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.scan.chunk_size = chunk_size;
        self
    }

    /// Set both worker pool sizes
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.scan.live_workers = workers;
        self.scan.batch_workers = workers;
        self
    }

    /// Set the monitor interval in seconds
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.monitor.interval = secs;
        self
    }

    /// Set the OUI database path
    pub fn with_vendor_database<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.vendor.database = path.into();
        self
    }

    /// Turn neighbor-cache subnet inference on or off
    pub fn with_neighbor_discovery(mut self, enabled: bool) -> Self {
        self.neighbor_discovery = enabled;
        self
    }

    /// Resolved data directory, `~/.wol_caster` unless overridden
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".wol_caster"),
        }
    }

    /// Path of the persisted known-device document
    pub fn known_devices_path(&self) -> PathBuf {
        self.data_dir().join("known_devices.json")
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DiscoveryError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: DiscoveryConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let path = home_dir.join(".wolcaster.toml");

        if path.exists() {
            match Self::from_toml_file(&path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.scan.chunk_size == 0 {
            return Err(DiscoveryError::ConfigError("Chunk size must be greater than 0".to_string()));
        }

        if self.scan.live_workers == 0 || self.scan.batch_workers == 0 {
            return Err(DiscoveryError::ConfigError("Worker count must be greater than 0".to_string()));
        }

        if self.scan.host_timeout == 0 {
            return Err(DiscoveryError::ConfigError("Host timeout must be greater than 0".to_string()));
        }

        if self.identity.budget >= self.scan.host_timeout {
            return Err(DiscoveryError::ConfigError(
                "Identity budget must be shorter than the host timeout".to_string(),
            ));
        }

        let worst_case = self.probe.ping_timeout + self.probe.port_timeout + self.identity.budget;
        if worst_case > self.scan.host_timeout {
            log::warn!(
                "Host timeout {} ms is below ping + port + identity time ({} ms); slow hosts may be dropped",
                self.scan.host_timeout,
                worst_case
            );
        }

        Ok(())
    }
}

impl ScanSettings {
    pub fn host_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.host_timeout)
    }

    pub fn chunk_pause_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_pause)
    }
}

impl IdentitySettings {
    pub fn budget_duration(&self) -> Duration {
        Duration::from_millis(self.budget)
    }
}

impl ProbeSettings {
    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn ping_process_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_process_timeout)
    }

    pub fn port_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.port_timeout)
    }
}

impl MonitorSettings {
    /// Wait before the given cycle number (0-based) starts the next one
    pub fn delay_after(&self, cycle: u64) -> Duration {
        if cycle == 0 {
            Duration::from_secs(self.first_delay)
        } else {
            Duration::from_secs(self.interval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.scan.chunk_size, 255);
        assert_eq!(config.scan.live_workers, 20);
        assert_eq!(config.scan.batch_workers, 50);
        assert_eq!(config.probe.standby_ports, vec![80, 443, 22, 23, 3389, 5900]);
        assert_eq!(config.network_keys.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_host_timeout_fits_the_pipeline() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.scan.host_timeout, 4_000);
        assert!(config.probe.ping_timeout + config.probe.port_timeout + config.identity.budget < config.scan.host_timeout);

        let mut tight = DiscoveryConfig::default();
        tight.identity.budget = tight.scan.host_timeout;
        assert!(matches!(tight.validate(), Err(DiscoveryError::ConfigError(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "neighbor_discovery = false\n\n[scan]\nchunk_size = 16").unwrap();

        let config = DiscoveryConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.scan.chunk_size, 16);
        assert_eq!(config.scan.batch_workers, 50);
        assert!(!config.neighbor_discovery);
        assert_eq!(config.monitor.interval, 30);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = DiscoveryConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(DiscoveryError::ConfigError(_))));
    }

    #[test]
    fn test_monitor_delay() {
        let monitor = MonitorSettings::default();
        assert_eq!(monitor.delay_after(0), Duration::from_secs(5));
        assert_eq!(monitor.delay_after(3), Duration::from_secs(30));
    }

    #[test]
    fn test_known_devices_path_uses_override() {
        let config = DiscoveryConfig::default().with_data_dir("/tmp/wol");
        assert_eq!(config.known_devices_path(), PathBuf::from("/tmp/wol/known_devices.json"));
    }
}
