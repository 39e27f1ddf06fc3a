//! Local IPv4 interface enumeration

use super::command::{args, CommandRunner};
use super::neighbor::{discover_subnets, parse_neighbor_table};
use crate::model::NetworkInterface;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Lists scan targets: OS interfaces plus subnets inferred from the neighbor cache
pub struct InterfaceEnumerator {
    runner: Arc<dyn CommandRunner>,
    neighbor_discovery: bool,
    dump_timeout: Duration,
}

impl InterfaceEnumerator {
    pub fn new(runner: Arc<dyn CommandRunner>, neighbor_discovery: bool, dump_timeout: Duration) -> Self {
        Self {
            runner,
            neighbor_discovery,
            dump_timeout,
        }
    }

    /// All scan targets; never fails, an empty list means nothing was found
    pub async fn enumerate(&self) -> Vec<NetworkInterface> {
        let mut interfaces = primary_interfaces();
        if self.neighbor_discovery && !interfaces.is_empty() {
            let extra = self.discovered_interfaces(&interfaces).await;
            interfaces.extend(extra);
        }
        interfaces
    }

    /// Pseudo-interfaces for foreign subnets seen in `arp -a`
    pub async fn discovered_interfaces(&self, primaries: &[NetworkInterface]) -> Vec<NetworkInterface> {
        match self.runner.run("arp", &args(["-a"]), self.dump_timeout).await {
            Some(out) if out.success => discover_subnets(primaries, &parse_neighbor_table(&out.stdout)),
            _ => {
                log::debug!("Neighbor table unavailable, skipping subnet inference");
                Vec::new()
            }
        }
    }
}

/// Non-loopback IPv4 interfaces from the OS table
pub fn primary_interfaces() -> Vec<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .filter(|i| !i.is_loopback())
        .flat_map(|i| {
            let addrs: Vec<(Ipv4Addr, u8)> = i
                .ips
                .iter()
                .filter_map(|ip| match ip {
                    IpNetwork::V4(net) => Some((net.ip(), net.prefix())),
                    _ => None,
                })
                .collect();
            interfaces_from_addresses(&i.name, addrs)
        })
        .collect()
}

/// Build interface records for one named adapter, dropping loopback entries
pub fn interfaces_from_addresses<I>(name: &str, addrs: I) -> Vec<NetworkInterface>
where
    I: IntoIterator<Item = (Ipv4Addr, u8)>,
{
    if name.starts_with("lo") || name.contains("Loopback") {
        return Vec::new();
    }

    addrs
        .into_iter()
        .filter(|(ip, _)| !ip.is_loopback() && !ip.is_unspecified())
        .filter_map(|(ip, prefix)| match NetworkInterface::new(name, ip, prefix) {
            Ok(iface) => Some(iface),
            Err(e) => {
                log::debug!("{}: skipping {}/{}: {}", name, ip, prefix, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::command::ScriptedRunner;

    #[test]
    fn test_loopback_names_skipped() {
        assert!(interfaces_from_addresses("lo0", [(Ipv4Addr::new(10, 0, 0, 1), 8)]).is_empty());
        assert!(interfaces_from_addresses("Loopback Pseudo-Interface 1", [(Ipv4Addr::new(10, 0, 0, 1), 8)]).is_empty());
    }

    #[test]
    fn test_addresses_become_interfaces() {
        let list = interfaces_from_addresses(
            "en0",
            [(Ipv4Addr::new(127, 0, 0, 1), 8), (Ipv4Addr::new(192, 168, 0, 17), 24), (Ipv4Addr::new(10, 0, 0, 2), 40)],
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].network, Ipv4Addr::new(192, 168, 0, 0));
    }

    #[tokio::test]
    async fn test_failed_dump_yields_nothing() {
        let runner = Arc::new(ScriptedRunner::default().fail("arp -a"));
        let enumerator = InterfaceEnumerator::new(runner, true, Duration::from_secs(1));
        let primaries = interfaces_from_addresses("en0", [(Ipv4Addr::new(192, 168, 0, 17), 24)]);
        assert!(enumerator.discovered_interfaces(&primaries).await.is_empty());
    }

    #[tokio::test]
    async fn test_dump_adds_discovered_subnet() {
        let runner = Arc::new(
            ScriptedRunner::default().on("arp -a", "? (134.124.230.7) at 52:54:0:12:34:56 on en0 ifscope [ethernet]\n"),
        );
        let enumerator = InterfaceEnumerator::new(runner, true, Duration::from_secs(1));
        let primaries = interfaces_from_addresses("en0", [(Ipv4Addr::new(192, 168, 0, 17), 24)]);
        let found = enumerator.discovered_interfaces(&primaries).await;
        assert_eq!(found.len(), 1);
        assert!(found[0].discovered);
    }
}
