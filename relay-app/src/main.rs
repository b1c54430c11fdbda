// groundlink -- ground-station relay between a TCP control channel and an
// XBee radio link, plus a small control-module client for bench testing.
//
// Usage:
//   groundlink run --device /dev/ttyUSB0 --peer 0013A200415BAD65
//   groundlink run --config groundlink.toml --port 6000 --skip-handshake
//   groundlink run --mock-radio -v
//   groundlink client --addr 127.0.0.1:5555 --value 1.5 --value -0.25

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use groundlink_core::RadioLink;
use groundlink_core::protocol::{ACK, INITIALIZATION_REQUEST, READY};
use groundlink_relay::{DisconnectPolicy, Relay, RelayConfig};
use groundlink_test_harness::{MockRadioHandle, MockRadioLink};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "groundlink.toml";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// groundlink -- relay control-channel bytes to a remote radio in fixed-size frames.
#[derive(Parser)]
#[command(name = "groundlink", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay until Ctrl-C or a fatal error.
    Run(RunArgs),

    /// Act as the control module: wait for READY, then send each value as a
    /// big-endian IEEE-754 float.
    Client {
        /// Relay control address.
        #[arg(long, default_value = "127.0.0.1:5555")]
        addr: String,

        /// Value to send; repeat for several.
        #[arg(long = "value", required = true, allow_negative_numbers = true)]
        values: Vec<f32>,

        /// Give up waiting for READY after this many seconds.
        #[arg(long)]
        ready_timeout: Option<u64>,
    },
}

/// Options for `run`. Each one overrides the config file.
#[derive(Args)]
struct RunArgs {
    /// TOML config file (default: ./groundlink.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control channel TCP port.
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind the control channel to.
    #[arg(long)]
    bind: Option<String>,

    /// Serial device of the local XBee (e.g. /dev/ttyUSB0, COM10).
    #[arg(long)]
    device: Option<String>,

    /// Serial baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// 64-bit address of the remote radio (16 hex digits).
    #[arg(long)]
    peer: Option<String>,

    /// Bytes per radio frame.
    #[arg(long)]
    frame_size: Option<usize>,

    /// Handshake wait per message in milliseconds; 0 waits forever.
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    /// Go straight to READY without the radio handshake.
    #[arg(long)]
    skip_handshake: bool,

    /// Stop after the first client disconnects instead of accepting another.
    #[arg(long)]
    exit_on_disconnect: bool,

    /// Use an in-memory radio that answers the handshake and logs every frame.
    #[arg(long)]
    mock_radio: bool,
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "groundlink=info",
        1 => "groundlink=debug",
        _ => "groundlink=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            RelayConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            tracing::info!(path = DEFAULT_CONFIG_FILE, "Loading configuration");
            RelayConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load config {DEFAULT_CONFIG_FILE}"))
        }
        None => {
            tracing::info!("Using default configuration");
            Ok(RelayConfig::default())
        }
    }
}

fn apply_overrides(config: &mut RelayConfig, args: &RunArgs) {
    if let Some(port) = args.port {
        config.tcp_port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(device) = &args.device {
        config.radio_device_path = device.clone();
    }
    if let Some(baud) = args.baud {
        config.radio_baud_rate = baud;
    }
    if let Some(peer) = &args.peer {
        config.peer_address = peer.clone();
    }
    if let Some(frame_size) = args.frame_size {
        config.frame_size = frame_size;
    }
    if let Some(ms) = args.handshake_timeout_ms {
        config.handshake_timeout_ms = ms;
    }
    if args.skip_handshake {
        config.skip_handshake = true;
    }
    if args.exit_on_disconnect {
        config.on_disconnect = DisconnectPolicy::Exit;
    }
}

/// An in-memory radio whose peer completes the handshake and whose
/// transmissions are logged.
fn mock_radio(answer_handshake: bool) -> Box<dyn RadioLink> {
    let (link, handle) = MockRadioLink::new();
    if answer_handshake {
        handle.push_message(&[INITIALIZATION_REQUEST]);
        handle.push_message(&[ACK]);
    }

    tokio::spawn(log_mock_transmissions(handle));
    Box::new(link)
}

/// Log each message the mock radio sends until the link is dropped.
async fn log_mock_transmissions(mut handle: MockRadioHandle) {
    loop {
        match handle.next_sent(Duration::from_secs(1)).await {
            Some(sent) => {
                tracing::info!(peer = %sent.peer, data = ?sent.data, "Mock radio transmit");
            }
            None if handle.link_dropped() => break,
            // Idle.
            None => continue,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let link: Box<dyn RadioLink> = if args.mock_radio {
        tracing::info!("Using mock radio");
        mock_radio(!config.skip_handshake)
    } else {
        let link = config
            .radio_builder()
            .build()
            .context("failed to configure radio")?;
        Box::new(link)
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr(),
        device = %config.radio_device_path,
        peer = %config.peer_address,
        frame_size = config.frame_size,
        "Starting groundlink relay"
    );

    let relay = Relay::new(config, link)?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received"),
            Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
        on_signal.cancel();
    });

    relay.run(cancel).await.context("relay stopped")?;
    tracing::info!("Relay stopped");
    Ok(())
}

async fn cmd_client(addr: &str, values: &[f32], ready_timeout: Option<u64>) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;
    tracing::info!(addr = %addr, "Connected, waiting for READY");

    let first = match ready_timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), stream.read_u8())
            .await
            .context("timed out waiting for READY")?,
        None => stream.read_u8().await,
    }
    .context("relay closed the connection before READY")?;

    if first != READY {
        bail!("expected READY (0x{READY:02X}), got 0x{first:02X}");
    }

    for value in values {
        let bytes = value.to_be_bytes();
        stream.write_all(&bytes).await.context("failed to send value")?;
        tracing::info!(value, bytes = ?bytes, "Sent value");
    }
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Client {
            addr,
            values,
            ready_timeout,
        } => cmd_client(&addr, &values, ready_timeout).await,
    }
}
