//! CLI entry point for the netwatch discovery daemon.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use netwatch_core::ListEntry;

use netwatch_discover::classifier::{parse_range, LocalNetworks};
use netwatch_discover::config::{self as watch_config, WatchConfig};
use netwatch_discover::inventory::Inventory;
use netwatch_discover::notifier::{Notifier, TelegramTransport};
use netwatch_discover::probe::{LocalProbe, RemoteProbe};
use netwatch_discover::ranges::RangeSource;
use netwatch_discover::reconcile::Reconciler;
use netwatch_discover::watch::{Shutdown, Watcher};

const SAMPLE_RANGES: &str = "\
# Ranges to scan, one per line: CIDR or interface:CIDR
# eth0:192.168.1.0/24
# 10.0.0.0/24
";

#[derive(Parser)]
#[command(name = "netwatch")]
#[command(about = "Network device inventory with new-device alerts")]
struct Cli {
    /// Config file prefix (default: netwatch).
    #[arg(short, long, default_value = "netwatch", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the discovery loop until interrupted.
    Run,
    /// Run a single discovery cycle and exit.
    Scan,
    /// Create the data directory and a sample range file.
    Init,
    /// Authorize a hardware identifier or address.
    Allow { identifier: String },
    /// Block a hardware identifier or address.
    Deny { identifier: String },
    /// List inventoried devices.
    List {
        /// Only show devices inside this range (CIDR).
        #[arg(short, long)]
        range: Option<String>,
    },
    /// Check that the notification endpoint accepts the configured token.
    TestConnection,
    /// Print the effective configuration.
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Command::Run | Command::Scan));

    let config = watch_config::load(&cli.config)?;

    match cli.command {
        Command::Run => run(&config).await?,
        Command::Scan => scan(&config).await?,
        Command::Init => init(&config)?,
        Command::Allow { identifier } => allow(&config, &identifier)?,
        Command::Deny { identifier } => deny(&config, &identifier)?,
        Command::List { range } => list(&config, range.as_deref())?,
        Command::TestConnection => {
            let notifier = Notifier::telegram(&config.notify)?;
            notifier.test_connection().await?;
            println!("Notification endpoint reachable");
        }
        Command::ShowConfig => show_config(&config)?,
    }

    Ok(())
}

fn init_logging(daemon: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if daemon {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_watcher(
    config: &WatchConfig,
    shutdown: Shutdown,
) -> anyhow::Result<Watcher<LocalProbe, RemoteProbe, TelegramTransport>> {
    let inventory = Inventory::open(&config.data_dir)?;

    let local_networks = LocalNetworks::detect();
    tracing::info!(networks = ?local_networks.as_slice(), "Detected local networks");

    let ranges = RangeSource::from_config(config);
    tracing::info!(ranges_file = %ranges.path().display(), "Using range configuration");

    let reconciler = Reconciler::new(
        ranges,
        local_networks,
        LocalProbe::new(&config.probe),
        RemoteProbe::new(&config.probe),
        inventory,
        config.range_timeout(),
    );
    let notifier = Notifier::telegram(&config.notify)?;

    if config.notify.credentials().is_none() {
        tracing::warn!("bot_token or chat_id not configured, alerts will not be delivered");
    }

    Ok(Watcher::new(reconciler, notifier, config, shutdown))
}

async fn run(config: &WatchConfig) -> anyhow::Result<()> {
    let shutdown = Shutdown::new();
    let mut watcher = build_watcher(config, shutdown.clone())?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
    });

    watcher.run().await?;
    Ok(())
}

async fn scan(config: &WatchConfig) -> anyhow::Result<()> {
    let mut watcher = build_watcher(config, Shutdown::new())?;
    let outcome = watcher.run_once().await?;

    tracing::info!(
        new_devices = outcome.report.new_devices.len(),
        alerts_delivered = outcome.alerts_delivered,
        alerts_failed = outcome.alerts_failed,
        "Scan complete"
    );
    Ok(())
}

fn init(config: &WatchConfig) -> anyhow::Result<()> {
    let inventory = Inventory::open(&config.data_dir)?;
    println!("Data directory ready: {}", inventory.root().display());

    let ranges_file = &config.ranges_file;
    if ranges_file.exists() {
        println!("Range file already present: {}", ranges_file.display());
        return Ok(());
    }

    if let Some(parent) = ranges_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(ranges_file, SAMPLE_RANGES)?;
    println!("Sample range file written: {}", ranges_file.display());
    Ok(())
}

fn open_inventory(data_dir: &Path) -> anyhow::Result<Inventory> {
    Ok(Inventory::open(data_dir)?)
}

fn allow(config: &WatchConfig, identifier: &str) -> anyhow::Result<()> {
    let entry: ListEntry = identifier.parse()?;
    let inventory = open_inventory(&config.data_dir)?;

    if inventory.add_to_allow_list(&entry)? {
        println!("Added {entry} to the allow list");
    } else {
        println!("{entry} is already on the allow list");
    }
    Ok(())
}

fn deny(config: &WatchConfig, identifier: &str) -> anyhow::Result<()> {
    let entry: ListEntry = identifier.parse()?;
    let inventory = open_inventory(&config.data_dir)?;

    if inventory.add_to_deny_list(&entry)? {
        println!("Added {entry} to the deny list");
    } else {
        println!("{entry} is already on the deny list");
    }
    Ok(())
}

fn list(config: &WatchConfig, range: Option<&str>) -> anyhow::Result<()> {
    let inventory = open_inventory(&config.data_dir)?;
    let devices = match range {
        Some(r) => inventory.get_by_range(&parse_range(r)?)?,
        None => inventory.get_all()?,
    };

    println!("IDENTITY\tADDRESS\tVENDOR\tSTATUS\tFIRST SEEN\tLAST SEEN");
    for d in &devices {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            d.identity,
            d.address,
            d.vendor,
            d.status,
            d.first_seen.format("%Y-%m-%d %H:%M:%S"),
            d.last_seen.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!("{} device(s)", devices.len());
    Ok(())
}

fn show_config(config: &WatchConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if let Some(token) = shown.notify.bot_token.as_mut() {
        *token = "********".to_string();
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
