use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::process;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use wolcaster::{
    config::DiscoveryConfig,
    discovery::{DeliveryMode, HostScanner, ScanObserver, ScanProgress, VendorLookup},
    history::{DiscoveryState, JsonFileStore, StoreRole},
    model::{AdapterView, Device, DeviceStatus, NetworkContext, NetworkInterface},
    monitor::Monitor,
    network::{interfaces::primary_interfaces, InterfaceEnumerator, SystemCommandRunner},
};

fn cli() -> Command {
    Command::new("wolcaster")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Discover machines on the local networks and remember them for Wake-on-LAN")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Read settings from this TOML file instead of ~/.wolcaster.toml")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding known_devices.json (default ~/.wol_caster)")
                .global(true),
        )
        .subcommand(
            Command::new("interfaces")
                .about("List the IPv4 networks that would be scanned")
                .arg(
                    Arg::new("primary-only")
                        .long("primary-only")
                        .help("Skip subnets inferred from the neighbor cache")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Scan once and print the merged device view without saving it")
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .value_name("NAME")
                        .help("Only scan this interface"),
                )
                .arg(
                    Arg::new("batch")
                        .long("batch")
                        .help("Print devices only after each subnet completes")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("workers")
                        .short('w')
                        .long("workers")
                        .value_name("N")
                        .help("Concurrent host probes per chunk")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Scan continuously and keep the device history up to date")
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECS")
                        .help("Seconds between scan cycles")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(Command::new("history").about("Show every remembered device"))
        .subcommand(Command::new("export").about("Print the remembered devices as JSON"))
        .subcommand(Command::new("clear-history").about("Forget all remembered devices"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<DiscoveryConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => DiscoveryConfig::from_toml_file(path)?,
        None => DiscoveryConfig::load_default_config(),
    };
    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

fn open_state(config: &DiscoveryConfig, role: StoreRole, vendors: Arc<VendorLookup>) -> DiscoveryState {
    let store = JsonFileStore::new(config.known_devices_path());
    let mut state = DiscoveryState::new(Box::new(store), role, config.network_keys.clone()).with_vendors(vendors);
    state.load();
    state
}

fn build_monitor(config: &DiscoveryConfig, state: DiscoveryState, vendors: Arc<VendorLookup>) -> Monitor {
    let runner = Arc::new(SystemCommandRunner);
    let enumerator = InterfaceEnumerator::new(
        runner.clone(),
        config.neighbor_discovery,
        std::time::Duration::from_millis(config.mac.dump_timeout),
    );
    let scanner = Arc::new(HostScanner::from_config(config, runner, vendors));
    Monitor::new(config, enumerator, scanner, Arc::new(RwLock::new(state)))
}

/// Progress bar plus live device lines
struct TerminalObserver {
    bar: ProgressBar,
    live: bool,
}

impl TerminalObserver {
    fn new(live: bool) -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg} [{bar:30.cyan/blue}] {pos}/{len}") {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar, live }
    }
}

impl ScanObserver for TerminalObserver {
    fn on_device(&self, interface: &str, device: &Device) {
        if self.live {
            self.bar.println(format!("{} {}", format!("[{}]", interface).bright_blue(), device_line(device)));
        }
    }

    fn on_progress(&self, progress: &ScanProgress) {
        self.bar.set_length(progress.total_hosts as u64);
        self.bar.set_position(progress.completed_hosts as u64);
        self.bar.set_message(progress.interface.clone());
    }
}

fn status_label(status: DeviceStatus) -> ColoredString {
    match status {
        DeviceStatus::Online => "online".bright_green(),
        DeviceStatus::Standby => "standby".bright_yellow(),
        DeviceStatus::Offline => "offline".bright_red(),
        DeviceStatus::Hidden => "hidden".dimmed(),
    }
}

fn device_line(device: &Device) -> String {
    format!(
        "{:<15} {:<8} {:<17} {:<28} {}",
        device.ip.to_string(),
        status_label(device.status),
        device.mac.as_deref().unwrap_or("-"),
        device.display_name(),
        device.vendor.as_deref().unwrap_or("").dimmed()
    )
}

fn print_interfaces(interfaces: &[NetworkInterface]) {
    if interfaces.is_empty() {
        println!("{}", "[!] No active IPv4 interfaces found".bright_yellow());
        return;
    }
    for iface in interfaces {
        let kind = if iface.discovered { "discovered".bright_magenta() } else { "primary".bright_cyan() };
        println!(
            "{:<12} {:<18} {:<15} {:<10} {} hosts",
            iface.name.bold(),
            iface.subnet.to_string(),
            iface.ip.to_string(),
            kind,
            iface.hosts().len()
        );
    }
}

fn print_view(views: &[AdapterView]) {
    if views.is_empty() {
        println!("{}", "[~] No devices known yet".bright_blue());
        return;
    }

    for view in views {
        let header = if view.historical {
            format!("{} (not connected)", view.name).dimmed()
        } else {
            view.name.bright_cyan().bold()
        };
        println!("\n{} {} devices", header, view.device_count());

        for network in &view.networks {
            let tag = if network.discovered { " (discovered)" } else { "" };
            println!("  {}{}", network.network.to_string().bold(), tag);
            for device in &network.devices {
                let marker = match device.network_context {
                    NetworkContext::DiscoveredOffline => "~",
                    _ if device.current_scan => "*",
                    _ => " ",
                };
                println!("   {} {}", marker, device_line(device));
            }
        }
    }
}

async fn run_scan(config: DiscoveryConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let config = match matches.get_one::<usize>("workers") {
        Some(&workers) => config.with_workers(workers),
        None => config,
    };
    config.validate()?;

    let mode = if matches.get_flag("batch") { DeliveryMode::Batch } else { DeliveryMode::Live };
    let vendors = Arc::new(VendorLookup::load(&config.vendor.database));
    let state = open_state(&config, StoreRole::Reader, vendors.clone());

    let observer = Arc::new(TerminalObserver::new(mode == DeliveryMode::Live));
    let monitor = build_monitor(&config, state, vendors).with_observer(observer.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut interfaces = monitor.interfaces().await;
    if let Some(name) = matches.get_one::<String>("interface") {
        interfaces.retain(|i| &i.name == name);
        if interfaces.is_empty() {
            eprintln!("{} {}", "[!] No such interface:".bright_red(), name);
            process::exit(1);
        }
    }

    let report = monitor.scan_interfaces(interfaces, mode, &cancel).await;
    observer.bar.finish_and_clear();

    if report.cancelled {
        println!("{}", "[~] Scan cancelled, showing partial results".bright_yellow());
    }
    let state = monitor.state();
    let views = state.read().await.view();
    print_view(&views);
    Ok(())
}

async fn run_watch(config: DiscoveryConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    let config = match matches.get_one::<u64>("interval") {
        Some(&secs) => config.with_interval(secs),
        None => config,
    };
    config.validate()?;

    let vendors = Arc::new(VendorLookup::load(&config.vendor.database));
    let state = open_state(&config, StoreRole::Owner, vendors.clone());
    let observer = Arc::new(TerminalObserver::new(true));
    let monitor = build_monitor(&config, state, vendors).with_observer(observer.clone());

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("{}", "\n[~] Stopping after in-flight probes finish...".bright_blue());
            ctrl_c.cancel();
        }
    });

    println!(
        "{} {}",
        "[~] Watching, history in".bright_blue(),
        config.known_devices_path().display().to_string().bright_cyan()
    );
    monitor.run(cancel).await;
    observer.bar.finish_and_clear();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = cli().get_matches();
    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "[!] Invalid configuration:".bright_red(), e);
            process::exit(1);
        }
    };

    match matches.subcommand() {
        Some(("interfaces", sub)) => {
            if sub.get_flag("primary-only") {
                print_interfaces(&primary_interfaces());
            } else {
                let enumerator = InterfaceEnumerator::new(
                    Arc::new(SystemCommandRunner),
                    config.neighbor_discovery,
                    std::time::Duration::from_millis(config.mac.dump_timeout),
                );
                print_interfaces(&enumerator.enumerate().await);
            }
        }
        Some(("scan", sub)) => run_scan(config, sub).await?,
        Some(("watch", sub)) => run_watch(config, sub).await?,
        Some(("history", _)) => {
            let vendors = Arc::new(VendorLookup::load(&config.vendor.database));
            let state = open_state(&config, StoreRole::Reader, vendors);
            print_view(&state.view());
        }
        Some(("export", _)) => {
            let vendors = Arc::new(VendorLookup::load(&config.vendor.database));
            let state = open_state(&config, StoreRole::Reader, vendors);
            println!("{}", state.export_json()?);
        }
        Some(("clear-history", _)) => {
            let vendors = Arc::new(VendorLookup::load(&config.vendor.database));
            let mut state = open_state(&config, StoreRole::Owner, vendors);
            state.clear_history()?;
            println!("{}", "[✓] Device history cleared".bright_green());
        }
        _ => cli().print_help()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    #[test]
    fn test_observer_tracks_progress() {
        let observer = TerminalObserver::new(true);
        observer.on_progress(&ScanProgress {
            interface: "en0".to_string(),
            total_hosts: 254,
            completed_hosts: 10,
            current_host: Some(Ipv4Addr::new(192, 168, 0, 10)),
            start_time: Instant::now(),
        });

        assert!(observer.live);
        assert_eq!(observer.bar.length(), Some(254));
        assert_eq!(observer.bar.position(), 10);
        assert_eq!(observer.bar.message(), "en0");
    }
}
