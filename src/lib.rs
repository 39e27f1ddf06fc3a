//! wolcaster - find every machine you might want to wake
//!
//! Enumerates local IPv4 networks, probes each host for reachability,
//! resolves its identity and keeps a per-interface history of known devices.

pub mod config;
pub mod discovery;
pub mod error;
pub mod history;
pub mod model;
pub mod monitor;
pub mod network;

// Re-export commonly used types
pub use config::DiscoveryConfig;
pub use discovery::{DeliveryMode, HostProber, HostScanner, ScanObserver, ScanProgress, ScanScheduler};
pub use error::DiscoveryError;
pub use history::{DeviceStore, DiscoveryState, JsonFileStore, MemoryStore, StoreRole};
pub use model::{AdapterView, Device, DeviceStatus, NetworkContext, NetworkGroup, NetworkInterface, WakeTarget};
pub use monitor::{CycleReport, Monitor};

pub type Result<T> = std::result::Result<T, DiscoveryError>;
