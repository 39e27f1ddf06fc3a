//! Core records shared by the scanner, the merge engine and the store

use crate::error::DiscoveryError;
use chrono::{DateTime, TimeZone, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

/// A local IPv4 interface, or a subnet inferred behind one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    /// Local address; for discovered subnets the owning interface's address
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub network: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub subnet: Ipv4Network,
    #[serde(default)]
    pub discovered: bool,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, prefix: u8) -> crate::Result<Self> {
        let subnet = Ipv4Network::new(ip, prefix)?;
        Ok(Self {
            name: name.into(),
            ip,
            netmask: subnet.mask(),
            network: subnet.network(),
            broadcast: subnet.broadcast(),
            subnet: Ipv4Network::new(subnet.network(), prefix)?,
            discovered: false,
        })
    }

    pub fn from_netmask(name: impl Into<String>, ip: Ipv4Addr, netmask: Ipv4Addr) -> crate::Result<Self> {
        let prefix = ipnetwork::ipv4_mask_to_prefix(netmask)?;
        Self::new(name, ip, prefix)
    }

    /// Pseudo-interface for a neighbor-cache subnet reached through `parent`
    pub fn discovered(parent: &NetworkInterface, subnet: Ipv4Network) -> Self {
        Self {
            name: parent.name.clone(),
            ip: parent.ip,
            netmask: subnet.mask(),
            network: subnet.network(),
            broadcast: subnet.broadcast(),
            subnet,
            discovered: true,
        }
    }

    /// Usable host addresses in order
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        host_addresses(self.subnet)
    }
}

/// Host addresses of a subnet, excluding network and broadcast for prefixes up to /30
pub fn host_addresses(subnet: Ipv4Network) -> Vec<Ipv4Addr> {
    let network = subnet.network();
    let broadcast = subnet.broadcast();
    subnet
        .iter()
        .filter(|ip| subnet.prefix() >= 31 || (*ip != network && *ip != broadcast))
        .collect()
}

/// `/24` containing the given address
pub fn slash24(ip: Ipv4Addr) -> Ipv4Network {
    let [a, b, c, _] = ip.octets();
    // prefix 24 is always valid
    Ipv4Network::new(Ipv4Addr::new(a, b, c, 0), 24).unwrap_or_else(|_| Ipv4Network::from(ip))
}

/// Terminal outcome of one probe cycle for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Standby,
    Offline,
    Hidden,
}

impl DeviceStatus {
    /// Answered ping or a standby port
    pub fn is_reachable(self) -> bool {
        matches!(self, DeviceStatus::Online | DeviceStatus::Standby)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Offline
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Standby => "standby",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Hidden => "hidden",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkContext {
    Primary,
    DiscoveredOnline,
    DiscoveredOffline,
}

impl Default for NetworkContext {
    fn default() -> Self {
        NetworkContext::Primary
    }
}

fn default_true() -> bool {
    true
}

/// RFC 3339 text or a Unix epoch in seconds; `0`, `""` and `null` mean never seen
fn deserialize_last_seen<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Epoch(f64),
        Text(String),
    }

    match Option::<Stamp>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Stamp::Epoch(secs)) if !secs.is_finite() || secs <= 0.0 => Ok(None),
        Some(Stamp::Epoch(secs)) => {
            let whole = secs.trunc();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            Ok(Utc.timestamp_opt(whole as i64, nanos).single())
        }
        Some(Stamp::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Stamp::Text(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

/// One host as seen by a scan and as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub pingable: bool,
    #[serde(default, deserialize_with = "deserialize_last_seen")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub network_context: NetworkContext,
    #[serde(default)]
    pub historical: bool,
    #[serde(default = "default_true")]
    pub current_scan: bool,
}

impl Device {
    pub fn new(ip: Ipv4Addr, status: DeviceStatus) -> Self {
        Self {
            ip,
            hostname: None,
            mac: None,
            vendor: None,
            status,
            pingable: status == DeviceStatus::Online,
            last_seen: None,
            network_context: NetworkContext::Primary,
            historical: false,
            current_scan: true,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = Some(at);
        self
    }

    pub fn last_octet(&self) -> u8 {
        self.ip.octets()[3]
    }

    /// Label shown when nothing better is known
    pub fn display_name(&self) -> String {
        match non_empty(&self.hostname) {
            Some(name) => name.to_string(),
            None => format!(".{}", self.last_octet()),
        }
    }

    pub fn wake_target(&self) -> Option<WakeTarget> {
        non_empty(&self.mac).map(|mac| WakeTarget {
            ip: self.ip,
            mac: mac.to_string(),
        })
    }
}

/// Treat `Some("")` and whitespace-only strings as absent
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Interface name to ordered device records
pub type KnownDeviceStore = BTreeMap<String, Vec<Device>>;

/// What the magic-packet sender needs from a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeTarget {
    pub ip: Ipv4Addr,
    pub mac: String,
}

/// Devices of one sub-network under an adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkGroup {
    pub network: Ipv4Network,
    pub discovered: bool,
    pub devices: Vec<Device>,
}

/// Adapter → network → devices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterView {
    pub name: String,
    pub historical: bool,
    pub networks: Vec<NetworkGroup>,
}

impl AdapterView {
    pub fn device_count(&self) -> usize {
        self.networks.iter().map(|n| n.devices.len()).sum()
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(DeviceStatus::Online),
            "standby" => Ok(DeviceStatus::Standby),
            "offline" => Ok(DeviceStatus::Offline),
            "hidden" => Ok(DeviceStatus::Hidden),
            other => Err(DiscoveryError::InvalidTarget(format!("unknown status '{}'", other))),
        }
    }
}
