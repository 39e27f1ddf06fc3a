//! Reachability probes: ICMP echo via the system `ping` and TCP connect

use super::command::CommandRunner;
use futures::future::join_all;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Argument list for a single echo request with the given reply wait
pub fn ping_args(target: Ipv4Addr, wait: Duration) -> Vec<String> {
    let millis = wait.as_millis().max(1);
    let mut args = if cfg!(target_os = "windows") {
        vec!["-n".to_string(), "1".to_string(), "-w".to_string(), millis.to_string()]
    } else if cfg!(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd")) {
        // BSD ping takes -W in milliseconds
        vec!["-c".to_string(), "1".to_string(), "-W".to_string(), millis.to_string()]
    } else {
        let secs = wait.as_secs().max(1);
        vec!["-c".to_string(), "1".to_string(), "-W".to_string(), secs.to_string()]
    };
    args.push(target.to_string());
    args
}

/// ICMP echo through the OS ping utility
#[derive(Clone)]
pub struct Pinger {
    runner: Arc<dyn CommandRunner>,
    wait: Duration,
    process_timeout: Duration,
}

impl Pinger {
    pub fn new(runner: Arc<dyn CommandRunner>, wait: Duration, process_timeout: Duration) -> Self {
        Self {
            runner,
            wait,
            process_timeout,
        }
    }

    /// `true` only when ping exits successfully
    pub async fn ping(&self, target: Ipv4Addr) -> bool {
        self.runner
            .run("ping", &ping_args(target, self.wait), self.process_timeout)
            .await
            .map(|out| out.success)
            .unwrap_or(false)
    }
}

/// Completed TCP handshake within `timeout`
pub async fn tcp_probe(target: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    let addr = SocketAddr::from((target, port));
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// First port in `ports` order that accepts a connection
///
/// All ports are tried at once, so the wait is one `timeout` at most.
pub async fn first_open_port(target: Ipv4Addr, ports: &[u16], timeout: Duration) -> Option<u16> {
    let open = join_all(ports.iter().map(|&port| tcp_probe(target, port, timeout))).await;
    ports.iter().zip(open).find(|(_, open)| *open).map(|(&port, _)| port)
}
