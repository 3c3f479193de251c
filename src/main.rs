use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use powerbridge::{BleTransport, Bridge, BridgeConfig, BridgeHandle, OutputChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Poll a portable power station over Bluetooth and print its state as JSON lines.
///
/// Lines such as `ac on` or `usb off` on stdin switch the outputs.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Connect to the first device whose name starts with this
    #[arg(long, default_value = BridgeConfig::DEFAULT_NAME_PREFIX)]
    name: String,

    /// Seconds between polls
    #[arg(long, default_value_t = 5)]
    poll_secs: u64,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value_t = 10)]
    reconnect_secs: u64,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

impl Cli {
    fn config(&self) -> BridgeConfig {
        let mut config = BridgeConfig {
            device_name_prefix: self.name.clone(),
            ..Default::default()
        };
        config.timing.poll_period = Duration::from_secs(self.poll_secs.max(1));
        config.timing.reconnect_backoff = Duration::from_secs(self.reconnect_secs.max(1));
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = cli.config();
    info!("Looking for a device named {}*", config.device_name_prefix);
    let transport = BleTransport::new(&config.device_name_prefix).await?;
    let (bridge, handle) = Bridge::new(transport, config.timing);

    tokio::select! {
        _ = bridge.run() => {}
        result = print_snapshots(&handle) => result?,
        result = read_commands(&handle) => result?,
        _ = tokio::signal::ctrl_c() => info!("Stopping"),
    }

    Ok(())
}

async fn print_snapshots(handle: &BridgeHandle) -> anyhow::Result<()> {
    let mut snapshots = handle.watch_snapshot();
    loop {
        snapshots.changed().await?;
        let snapshot = *snapshots.borrow_and_update();
        println!("{}", serde_json::to_string(&snapshot)?);
    }
}

async fn read_commands(handle: &BridgeHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "status" {
            println!("{}", serde_json::to_string(&handle.link_status())?);
            continue;
        }
        match parse_command(line) {
            Ok((channel, on)) => match handle.request_output_change(channel, on).await {
                Ok(()) => info!("{channel} {}: accepted", if on { "on" } else { "off" }),
                Err(err) => warn!("{channel}: rejected: {err}"),
            },
            Err(err) => warn!("{err:#}"),
        }
    }
    // stdin closed, keep running
    std::future::pending().await
}

fn parse_command(line: &str) -> anyhow::Result<(OutputChannel, bool)> {
    let mut words = line.split_whitespace();
    let channel = words
        .next()
        .ok_or(anyhow::anyhow!("expected `<ac|usb|dc|light> <on|off>`"))?
        .parse()?;
    let on = match words.next() {
        Some("on") | Some("1") => true,
        Some("off") | Some("0") => false,
        other => anyhow::bail!("expected on or off, got {other:?}"),
    };
    Ok((channel, on))
}

#[test]
fn test_parse_command() {
    assert_eq!(parse_command("usb on").unwrap(), (OutputChannel::Usb, true));
    assert_eq!(parse_command("AC off").unwrap(), (OutputChannel::Ac, false));
    assert!(parse_command("light").is_err());
    assert!(parse_command("fan on").is_err());
}
