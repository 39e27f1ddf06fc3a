//! Hardware address lookup and normalization

use crate::network::command::{args, CommandRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

static MAC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9a-fA-F]{1,2}[:-]){5}[0-9a-fA-F]{1,2}").expect("valid regex"));

/// Normalize to 12 uppercase hex digits in colon form
///
/// Short input is left-padded with zeros, long input keeps its first 12 digits.
/// `0:3e:e1:b7:57:54` becomes `00:3E:E1:B7:57:54`.
pub fn pad_mac_address(mac: &str) -> String {
    let clean: String = mac
        .to_uppercase()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();

    let normalized = if clean.len() >= 12 {
        clean.chars().take(12).collect::<String>()
    } else {
        format!("{:0>12}", clean)
    };

    normalized
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// First MAC-looking token in `text`, normalized
pub fn extract_mac(text: &str) -> Option<String> {
    MAC_PATTERN
        .find(text)
        .map(|m| pad_mac_address(&m.as_str().to_uppercase().replace('-', ":")))
}

/// `line` mentions `ip` as a whole address, not as a prefix of a longer one
fn line_mentions(line: &str, ip: &str) -> bool {
    line.match_indices(ip).any(|(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + ip.len()..].chars().next();
        let boundary = |c: Option<char>| !matches!(c, Some(ch) if ch.is_ascii_digit() || ch == '.');
        boundary(before) && boundary(after)
    })
}

/// Resolves a host's MAC through the OS neighbor cache
#[derive(Clone)]
pub struct MacResolver {
    runner: Arc<dyn CommandRunner>,
    query_timeout: Duration,
    dump_timeout: Duration,
}

impl MacResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, query_timeout: Duration, dump_timeout: Duration) -> Self {
        Self {
            runner,
            query_timeout,
            dump_timeout,
        }
    }

    pub async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        if let Some(mac) = self.query(ip).await {
            return Some(mac);
        }
        self.scan_dump(ip).await
    }

    async fn query(&self, ip: Ipv4Addr) -> Option<String> {
        let flag = if cfg!(target_os = "windows") { "-a" } else { "-n" };
        let out = self
            .runner
            .run("arp", &args([flag.to_string(), ip.to_string()]), self.query_timeout)
            .await?;

        if !out.success || out.stdout.trim().is_empty() {
            return None;
        }
        extract_mac(&out.stdout)
    }

    async fn scan_dump(&self, ip: Ipv4Addr) -> Option<String> {
        let out = self.runner.run("arp", &args(["-a"]), self.dump_timeout).await?;
        if !out.success {
            return None;
        }

        let needle = ip.to_string();
        out.stdout
            .lines()
            .filter(|line| line_mentions(line, &needle))
            .find_map(extract_mac)
    }
}
