//! Chunked, concurrency-capped subnet scanning
//!
//! A subnet is split into fixed-size chunks scanned one after another. Inside
//! a chunk at most `workers` probes run at once; the next chunk is dispatched
//! only after every task of the current one has finished. Cancellation is
//! checked before each chunk and before each host dispatch, and in-flight
//! probes are allowed to finish.

use super::HostProber;
use crate::config::ScanSettings;
use crate::model::{Device, DeviceStatus, NetworkInterface};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How results reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Return the full list once the subnet is done
    Batch,
    /// Also hand each device to the observer as soon as it is probed
    Live,
}

/// Progress of one interface scan
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub interface: String,
    pub total_hosts: usize,
    pub completed_hosts: usize,
    pub current_host: Option<Ipv4Addr>,
    pub start_time: Instant,
}

impl ScanProgress {
    pub fn new(interface: impl Into<String>, total_hosts: usize) -> Self {
        Self {
            interface: interface.into(),
            total_hosts,
            completed_hosts: 0,
            current_host: None,
            start_time: Instant::now(),
        }
    }

    pub fn update(&mut self, host: Ipv4Addr) {
        self.completed_hosts += 1;
        self.current_host = Some(host);
    }

    /// Get completion percentage
    pub fn percentage(&self) -> f64 {
        if self.total_hosts > 0 {
            (self.completed_hosts as f64 / self.total_hosts as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Receives scan events; called from worker tasks
///
/// Implementations must hand work off to their own presentation thread.
pub trait ScanObserver: Send + Sync {
    fn on_device(&self, _interface: &str, _device: &Device) {}

    fn on_progress(&self, _progress: &ScanProgress) {}
}

/// Drives a [`HostProber`] over a subnet
pub struct ScanScheduler<P: HostProber + ?Sized> {
    prober: Arc<P>,
    chunk_size: usize,
    live_workers: usize,
    batch_workers: usize,
    host_timeout: Duration,
    chunk_pause: Duration,
}

impl<P: HostProber + ?Sized> ScanScheduler<P> {
    pub fn new(prober: Arc<P>, settings: &ScanSettings) -> Self {
        Self {
            prober,
            chunk_size: settings.chunk_size.max(1),
            live_workers: settings.live_workers.max(1),
            batch_workers: settings.batch_workers.max(1),
            host_timeout: settings.host_timeout_duration(),
            chunk_pause: settings.chunk_pause_duration(),
        }
    }

    pub fn workers(&self, mode: DeliveryMode) -> usize {
        match mode {
            DeliveryMode::Live => self.live_workers,
            DeliveryMode::Batch => self.batch_workers,
        }
    }

    /// Split addresses into ordered chunks
    pub fn chunks(&self, hosts: &[Ipv4Addr]) -> Vec<Vec<Ipv4Addr>> {
        hosts.chunks(self.chunk_size).map(<[Ipv4Addr]>::to_vec).collect()
    }

    pub async fn scan_batch(
        &self,
        iface: &NetworkInterface,
        known: &[Device],
        cancel: &CancellationToken,
    ) -> Vec<Device> {
        self.scan(iface, known, DeliveryMode::Batch, None, cancel).await
    }

    pub async fn scan_live(
        &self,
        iface: &NetworkInterface,
        known: &[Device],
        observer: Arc<dyn ScanObserver>,
        cancel: &CancellationToken,
    ) -> Vec<Device> {
        self.scan(iface, known, DeliveryMode::Live, Some(observer), cancel).await
    }

    /// Scan every host of `iface`; hidden hosts are dropped, results are unique per IP
    pub async fn scan(
        &self,
        iface: &NetworkInterface,
        known: &[Device],
        mode: DeliveryMode,
        observer: Option<Arc<dyn ScanObserver>>,
        cancel: &CancellationToken,
    ) -> Vec<Device> {
        let hosts = iface.hosts();
        let chunks = self.chunks(&hosts);
        let known: Arc<HashMap<Ipv4Addr, Device>> = Arc::new(known.iter().map(|d| (d.ip, d.clone())).collect());
        let workers = self.workers(mode);
        let live_observer = if mode == DeliveryMode::Live { observer.clone() } else { None };

        let mut progress = ScanProgress::new(iface.name.clone(), hosts.len());
        let mut devices: Vec<Device> = Vec::new();
        let mut index: HashMap<Ipv4Addr, usize> = HashMap::new();

        log::info!(
            "Scanning {} ({}) - {} hosts in {} chunks, {} workers",
            iface.name,
            iface.subnet,
            hosts.len(),
            chunks.len(),
            workers
        );

        for (chunk_id, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("{}: scan cancelled before chunk {}", iface.name, chunk_id);
                break;
            }

            let semaphore = Arc::new(Semaphore::new(workers));
            let mut tasks = JoinSet::new();

            for &ip in chunk {
                if cancel.is_cancelled() {
                    break;
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let prober = self.prober.clone();
                let known = known.clone();
                let live = live_observer.clone();
                let interface = iface.name.clone();
                let timeout = self.host_timeout;

                tasks.spawn(async move {
                    let _permit = permit;
                    let scanned = tokio::time::timeout(timeout, prober.scan_host(ip, known.get(&ip).cloned())).await;
                    let device = match scanned {
                        Ok(device) => Some(device),
                        Err(_) => {
                            log::debug!("{}: {} timed out", interface, ip);
                            None
                        }
                    };

                    if let (Some(observer), Some(device)) = (&live, &device) {
                        if device.status != DeviceStatus::Hidden {
                            observer.on_device(&interface, device);
                        }
                    }
                    (ip, device)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (ip, device) = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        log::error!("{}: host task failed: {}", iface.name, e);
                        continue;
                    }
                };

                progress.update(ip);
                if let Some(observer) = &observer {
                    observer.on_progress(&progress);
                }

                match device {
                    Some(device) if device.status != DeviceStatus::Hidden => match index.get(&device.ip) {
                        Some(&pos) => devices[pos] = device,
                        None => {
                            index.insert(device.ip, devices.len());
                            devices.push(device);
                        }
                    },
                    _ => {}
                }
            }

            let last = chunk_id + 1 == chunks.len();
            if !last && !self.chunk_pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.chunk_pause) => {}
                }
            }
        }

        devices.sort_by_key(|d| u32::from(d.ip));
        log::info!(
            "{}: {} devices visible after {:.1}s",
            iface.name,
            devices.len(),
            progress.start_time.elapsed().as_secs_f64()
        );
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl HostProber for Echo {
        async fn scan_host(&self, ip: Ipv4Addr, known: Option<Device>) -> Device {
            match (ip.octets()[3] % 2, known) {
                (0, _) => Device::new(ip, DeviceStatus::Online),
                (_, Some(_)) => Device::new(ip, DeviceStatus::Offline),
                (_, None) => Device::new(ip, DeviceStatus::Hidden),
            }
        }
    }

    fn settings(chunk_size: usize, workers: usize) -> ScanSettings {
        ScanSettings {
            chunk_size,
            live_workers: workers,
            batch_workers: workers,
            host_timeout: 1000,
            chunk_pause: 0,
        }
    }

    #[test]
    fn test_chunking() {
        let scheduler = ScanScheduler::new(Arc::new(Echo), &settings(4, 2));
        let iface = NetworkInterface::new("eth0", Ipv4Addr::new(10, 0, 0, 1), 28).unwrap();
        let chunks = scheduler.chunks(&iface.hosts());
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].len(), 2);
        assert_eq!(chunks[0][0], Ipv4Addr::new(10, 0, 0, 1));
    }

    #[tokio::test]
    async fn test_hidden_dropped_known_kept() {
        let scheduler = ScanScheduler::new(Arc::new(Echo), &settings(255, 8));
        let iface = NetworkInterface::new("eth0", Ipv4Addr::new(10, 0, 0, 1), 29).unwrap();
        let known = vec![Device::new(Ipv4Addr::new(10, 0, 0, 3), DeviceStatus::Online)];

        let devices = scheduler.scan_batch(&iface, &known, &CancellationToken::new()).await;
        let ips: Vec<u8> = devices.iter().map(|d| d.ip.octets()[3]).collect();
        assert_eq!(ips, vec![2, 3, 4, 6]);
        assert_eq!(devices[1].status, DeviceStatus::Offline);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let scheduler = ScanScheduler::new(Arc::new(Echo), &settings(4, 2));
        let iface = NetworkInterface::new("eth0", Ipv4Addr::new(10, 0, 0, 1), 28).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(scheduler.scan_batch(&iface, &[], &cancel).await.is_empty());
    }

    #[test]
    fn test_progress_percentage() {
        let mut progress = ScanProgress::new("en0", 4);
        progress.update(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(ScanProgress::new("en0", 0).percentage(), 0.0);
    }
}
