//! Per-host status classification

use crate::model::DeviceStatus;
use crate::network::probe::{first_open_port, Pinger};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Online if ping answers, standby if a service port answers,
/// otherwise offline for recorded hosts and hidden for strangers
#[derive(Clone)]
pub struct StatusProber {
    pinger: Pinger,
    standby_ports: Vec<u16>,
    port_timeout: Duration,
}

impl StatusProber {
    pub fn new(pinger: Pinger, standby_ports: Vec<u16>, port_timeout: Duration) -> Self {
        Self {
            pinger,
            standby_ports,
            port_timeout,
        }
    }

    pub async fn probe(&self, ip: Ipv4Addr, previously_known: bool) -> DeviceStatus {
        if self.pinger.ping(ip).await {
            return DeviceStatus::Online;
        }

        if let Some(port) = first_open_port(ip, &self.standby_ports, self.port_timeout).await {
            log::debug!("{} silent to ping but port {} open", ip, port);
            return DeviceStatus::Standby;
        }

        if previously_known {
            DeviceStatus::Offline
        } else {
            DeviceStatus::Hidden
        }
    }
}
