//! Best-effort host naming through an ordered chain of strategies

use super::mac::MacResolver;
use super::vendor::VendorLookup;
use crate::config::IdentitySettings;
use crate::network::command::{args, CommandRunner};
use crate::network::probe::tcp_probe;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

/// Ports tried by the service fingerprint, in order
pub const SERVICE_PORTS: [(u16, &str); 8] = [
    (22, "SSH"),
    (23, "Telnet"),
    (80, "HTTP"),
    (443, "HTTPS"),
    (3389, "RDP"),
    (5900, "VNC"),
    (8080, "HTTP-Alt"),
    (8443, "HTTPS-Alt"),
];

/// Reverse-DNS suffixes typical of LAN-announced names
const LOCAL_SUFFIXES: [&str; 4] = [".local", ".home", ".lan", ".home.arpa"];

/// Apple OUI prefixes, for naming Apple hosts that announce nothing
const APPLE_PREFIXES: [&str; 243] = [
    "000502", "000A27", "000A95", "001B63", "001CB3", "001D4F", "001E52", "001EC2", "0021E9", "002312",
    "002332", "002376", "0023DF", "0024E8", "002500", "002608", "0026B0", "0026BB", "003065", "0050C2",
    "008865", "00A040", "00B362", "00C610", "00D041", "00E081", "00F46D", "080007", "086698", "087045",
    "0C3021", "0C4DE9", "0C74C2", "1040F3", "109ADD", "10DDB1", "182032", "183451", "189EFC", "1C1AC0",
    "1CABA7", "1CE62B", "203AEF", "207D74", "20A6CD", "20C9D0", "24AB81", "24E43F", "283737", "286AB8",
    "28CFDA", "28FF3C", "2C44FD", "2CBE08", "3010E4", "34159E", "3451C9", "34C059", "38484C", "3C0754",
    "3CAB8E", "3CE072", "40B076", "40D32A", "44D884", "48DB50", "4C0010", "4C3275", "4C57CA", "4C8D79",
    "4CB199", "503237", "507A55", "50EAD6", "542696", "544E90", "54724F", "581FAA", "58BDA3", "58E6BA",
    "5C0979", "5C8FE0", "60334B", "606944", "60FB42", "64B9E8", "68967B", "689C5E", "68AB1E", "68FF7B",
    "6C3E6D", "6C4008", "6C7220", "6C8DC1", "6C94F8", "701124", "705681", "7073CB", "70CD60", "70DEE2",
    "74E1B6", "7831C1", "784B87", "786C1C", "78A106", "78CA39", "7C04D0", "7C6D62", "7CC3A1", "7CF05F",
    "80006E", "80BE05", "80D589", "80EA96", "842999", "848506", "84B153", "885395", "8863DF", "888717",
    "88C255", "8C7B9D", "8CFA22", "90840D", "90B931", "90C16E", "949426", "9801A7", "985AEB", "98CA33",
    "98D6BB", "98FE94", "9C04EB", "9C35EB", "9C84CD", "9CB6D0", "A0EDCD", "A4B197", "A4C64F", "A82066",
    "A8667F", "A8BBCF", "AC293A", "AC3A7A", "AC5D10", "AC7F3E", "AC87A3", "ACDE48", "B03495", "B065BD",
    "B09FBA", "B41882", "B42E99", "B8098A", "B8444F", "B853AC", "B8782E", "B8C75D", "B8F6B1", "BC3BAF",
    "BC52B7", "BC6778", "BC9F35", "C06394", "C0847A", "C0CECD", "C42C03", "C48508", "C81EE7", "C82A14",
    "C8334B", "C869CD", "C88550", "C8BCC8", "CC08E0", "CC20E8", "CC29F5", "CC785F", "CCC3EA", "D023DB",
    "D05099", "D0667B", "D0817A", "D0A637", "D0BB80", "D0C5F3", "D0E482", "D4619D", "D49A20", "D4F46F",
    "D83062", "D89695", "D8A011", "D8BB2C", "D8CF9C", "DC2B2A", "DC3714", "DC86D8", "DCA4CA", "DCE1AD",
    "E06678", "E08E3C", "E0B9BA", "E0C767", "E0F5C6", "E0F847", "E425E7", "E4986F", "E4CE8F", "E8040B",
    "E80688", "E88025", "E88D28", "E8B2AC", "E8CC18", "EC3586", "EC852F", "ECFABC", "F02475", "F071C9",
    "F0761C", "F09FC2", "F0B479", "F0C1F1", "F0D1A9", "F41BA1", "F431C3", "F437B7", "F45C89", "F4F15A",
    "F4F5D8", "F4F5E8", "F81EDF", "F82793", "F895EA", "F8FFC2", "FC0012", "FC253F", "FC4203", "FC64BA",
    "FCA89A", "FCC111", "FCD848",
];

/// `"Apple-{last octet}"` when the hardware address carries an Apple prefix
pub fn apple_label(mac: &str, last_octet: u8) -> Option<String> {
    let hex: String = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let prefix = hex.get(..6)?;
    APPLE_PREFIXES
        .iter()
        .any(|apple| *apple == prefix)
        .then(|| format!("Apple-{}", last_octet))
}

/// What a strategy gets to work with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTarget {
    pub ip: Ipv4Addr,
    /// Already-resolved hardware address, if any
    pub mac: Option<String>,
}

impl IdentityTarget {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self { ip, mac: None }
    }

    pub fn with_mac(mut self, mac: Option<String>) -> Self {
        self.mac = mac;
        self
    }

    fn last_octet(&self) -> u8 {
        self.ip.octets()[3]
    }
}

/// One naming method; `None` moves the chain on
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String>;

    fn name(&self) -> &str;

    /// Strategies relying on platform tools opt out elsewhere
    fn is_supported(&self) -> bool {
        true
    }
}

/// Reverse lookup on a blocking thread, bounded by `timeout`
#[derive(Debug, Clone)]
pub struct ReverseDns {
    timeout: Duration,
}

impl ReverseDns {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let addr = IpAddr::V4(ip);
        let task = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&addr));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(name))) => Some(name),
            _ => None,
        }
    }
}

/// Reverse DNS answer worth keeping
pub fn accept_dns_name(name: &str, ip: Ipv4Addr) -> bool {
    let name = name.trim();
    name.len() > 2 && name != ip.to_string()
}

pub struct DnsResolver {
    dns: ReverseDns,
}

impl DnsResolver {
    pub fn new(dns: ReverseDns) -> Self {
        Self { dns }
    }
}

#[async_trait]
impl IdentityStrategy for DnsResolver {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String> {
        let name = self.dns.lookup(target.ip).await?;
        accept_dns_name(&name, target.ip).then(|| name.trim().to_string())
    }

    fn name(&self) -> &str {
        "dns"
    }
}

/// `Server:` line of `smbutil status`
pub fn parse_smbutil_status(output: &str, ip: Ipv4Addr) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("Server:"))
        .map(str::trim)
        .find(|name| !name.is_empty() && *name != ip.to_string())
        .map(str::to_string)
}

/// NetBIOS name via macOS `smbutil`
pub struct NetbiosResolver {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    enabled: bool,
}

impl NetbiosResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            enabled: cfg!(target_os = "macos"),
        }
    }

    pub fn force_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl IdentityStrategy for NetbiosResolver {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String> {
        let out = self
            .runner
            .run("smbutil", &args(["status".to_string(), target.ip.to_string()]), self.timeout)
            .await?;
        if !out.success {
            return None;
        }
        parse_smbutil_status(&out.stdout, target.ip)
    }

    fn name(&self) -> &str {
        "netbios"
    }

    fn is_supported(&self) -> bool {
        self.enabled
    }
}

/// Device name from `dns-sd` device-info output
pub fn parse_device_info(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains("device-info") && line.contains('='))
        .filter_map(|line| line.split('=').nth(1))
        .map(str::trim)
        .find(|name| name.len() > 2)
        .map(str::to_string)
}

/// Reverse-DNS name that looks LAN-announced
pub fn looks_local(name: &str) -> bool {
    LOCAL_SUFFIXES.iter().any(|suffix| name.contains(suffix))
}

/// Bonjour device-info lookup, then a LAN-suffixed reverse name, then an
/// Apple hardware prefix
pub struct MdnsResolver {
    runner: Arc<dyn CommandRunner>,
    dns: ReverseDns,
    timeout: Duration,
    enabled: bool,
}

impl MdnsResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, dns: ReverseDns, timeout: Duration) -> Self {
        Self {
            runner,
            dns,
            timeout,
            enabled: cfg!(target_os = "macos"),
        }
    }

    pub fn force_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl IdentityStrategy for MdnsResolver {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String> {
        let query = args(["-G".to_string(), "v4".to_string(), target.ip.to_string(), "_device-info._tcp".to_string(), "local.".to_string()]);
        if let Some(out) = self.runner.run("dns-sd", &query, self.timeout).await {
            if out.success {
                if let Some(name) = parse_device_info(&out.stdout) {
                    return Some(name);
                }
            }
        }

        if let Some(name) = self.dns.lookup(target.ip).await {
            if accept_dns_name(&name, target.ip) && looks_local(&name) {
                return Some(name);
            }
        }

        apple_label(target.mac.as_deref()?, target.last_octet())
    }

    fn name(&self) -> &str {
        "mdns"
    }

    fn is_supported(&self) -> bool {
        self.enabled
    }
}

/// `"{service}-{last octet}"` for the first open well-known port
pub struct PortFingerprintResolver {
    ports: Vec<(u16, String)>,
    timeout: Duration,
}

impl PortFingerprintResolver {
    pub fn new(timeout: Duration) -> Self {
        Self::with_ports(
            SERVICE_PORTS.iter().map(|(port, label)| (*port, label.to_string())).collect(),
            timeout,
        )
    }

    pub fn with_ports(ports: Vec<(u16, String)>, timeout: Duration) -> Self {
        Self { ports, timeout }
    }
}

#[async_trait]
impl IdentityStrategy for PortFingerprintResolver {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String> {
        for (port, label) in &self.ports {
            if tcp_probe(target.ip, *port, self.timeout).await {
                return Some(format!("{}-{}", label, target.last_octet()));
            }
        }
        None
    }

    fn name(&self) -> &str {
        "service-fingerprint"
    }
}

/// `"{vendor}-{last octet}"` from the hardware address
pub struct VendorResolver {
    macs: Option<MacResolver>,
    vendors: Arc<VendorLookup>,
}

impl VendorResolver {
    pub fn new(macs: Option<MacResolver>, vendors: Arc<VendorLookup>) -> Self {
        Self { macs, vendors }
    }
}

#[async_trait]
impl IdentityStrategy for VendorResolver {
    async fn try_resolve(&self, target: &IdentityTarget) -> Option<String> {
        let mac = match (&target.mac, &self.macs) {
            (Some(mac), _) => mac.clone(),
            (None, Some(resolver)) => resolver.resolve(target.ip).await?,
            (None, None) => return None,
        };
        let vendor = self.vendors.lookup(&mac)?;
        Some(format!("{}-{}", vendor, target.last_octet()))
    }

    fn name(&self) -> &str {
        "vendor"
    }
}

/// Runs strategies in order; the first answer wins
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
}

impl IdentityResolver {
    pub fn new(strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        Self { strategies }
    }

    /// DNS, NetBIOS, mDNS, service fingerprint, vendor
    pub fn standard(
        runner: Arc<dyn CommandRunner>,
        settings: &IdentitySettings,
        macs: MacResolver,
        vendors: Arc<VendorLookup>,
    ) -> Self {
        let dns = ReverseDns::new(Duration::from_millis(settings.dns_timeout));
        Self::new(vec![
            Box::new(DnsResolver::new(dns.clone())),
            Box::new(NetbiosResolver::new(runner.clone(), Duration::from_millis(settings.netbios_timeout))),
            Box::new(MdnsResolver::new(runner, dns, Duration::from_millis(settings.mdns_timeout))),
            Box::new(PortFingerprintResolver::new(Duration::from_millis(settings.fingerprint_timeout))),
            Box::new(VendorResolver::new(Some(macs), vendors)),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First strategy answer, if any
    pub async fn resolve_named(&self, target: &IdentityTarget) -> Option<String> {
        for strategy in self.strategies.iter().filter(|s| s.is_supported()) {
            if let Some(name) = strategy.try_resolve(target).await {
                log::debug!("{}: named {} via {}", target.ip, name, strategy.name());
                return Some(name);
            }
        }
        None
    }

    /// Never fails; `".{last octet}"` when nothing answers
    pub async fn resolve(&self, target: &IdentityTarget) -> String {
        match self.resolve_named(target).await {
            Some(name) => name,
            None => format!(".{}", target.last_octet()),
        }
    }
}
