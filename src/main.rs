//! Tether demo driver.
//!
//! Exercises the connector stack against the in-process reference peer:
//! wallclock callbacks that survive a peer restart, the dictionary round
//! trip, plain arithmetic, and the bounded retry loop against the
//! controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_connect::remotes::{ArithmeticLink, AutoArm, DictionaryLink, WallClockLink};
use tether_connect::{CommitOutcome, RetryController, RetryPlan};
use tether_interface::ClockSink;
use tether_link::Endpoint;
use tether_loopback::LoopbackPeer;

const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Tether - resilient client-side connector for remote capability services.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Endpoint to connect to (a path for local channels, host:port for network)
    #[arg(
        short,
        long,
        env = "TETHER_ACCESS",
        default_value = "/tmp/tether-communicator"
    )]
    connect: String,

    /// Target a named service behind the endpoint
    #[arg(short, long)]
    plugin: Option<String>,

    /// Which demo to run
    #[arg(long, value_enum, default_value_t = Demo::Wallclock)]
    demo: Demo,

    /// Attempt budget for the retry demo
    #[arg(short, long, default_value_t = 5)]
    retries: u32,

    /// Seconds between retry attempts
    #[arg(short, long, default_value_t = 2)]
    delay: u64,

    /// Countdown for the wallclock callback, in seconds
    #[arg(long, default_value_t = 4)]
    seconds: u16,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Demo {
    /// Arm a one-shot callback, ride out a peer restart, read the clock
    Wallclock,
    /// Store and read back a value in the remote dictionary
    Dictionary,
    /// Remote add and subtract
    Math,
    /// Bounded reconnect-probe-commit loop against the controller
    Retry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let address = args
        .connect
        .parse()
        .with_context(|| format!("invalid endpoint '{}'", args.connect))?;
    let endpoint = match args.plugin {
        Some(plugin) => Endpoint::with_service(address, plugin),
        None => Endpoint::new(address),
    };

    info!("tether v{}", env!("CARGO_PKG_VERSION"));
    info!(endpoint = %endpoint, "connecting");

    let peer = LoopbackPeer::new();
    match args.demo {
        Demo::Wallclock => run_wallclock(&peer, endpoint, args.seconds).await,
        Demo::Dictionary => run_dictionary(&peer, endpoint).await,
        Demo::Math => run_math(&peer, endpoint).await,
        Demo::Retry => run_retry(&peer, endpoint, args.retries, args.delay).await,
    }
}

struct PrintSink;

#[async_trait]
impl ClockSink for PrintSink {
    async fn elapsed(&self, seconds: u16) -> u16 {
        info!(
            seconds,
            at = %Local::now().format("%H:%M:%S"),
            "callback fired"
        );
        0
    }
}

async fn run_wallclock(peer: &LoopbackPeer, endpoint: Endpoint, seconds: u16) -> Result<()> {
    let link = WallClockLink::open(
        peer.transport(),
        endpoint,
        OPEN_TIMEOUT,
        Some(AutoArm {
            seconds,
            sink: Arc::new(PrintSink),
        }),
    )
    .await;

    for tick in 0..u64::from(seconds) + 4 {
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Take the peer away mid-run; the callback re-arms on its own once
        // the peer is back.
        if tick == 1 {
            info!("stopping the peer");
            peer.set_online(false).await;
        }
        if tick == 2 {
            info!("restarting the peer");
            peer.set_online(true).await;
        }

        match link.now().await {
            0 => warn!("clock unreachable"),
            now => match Local.timestamp_opt(now as i64, 0).single() {
                Some(at) => {
                    info!(armed = link.is_armed().await, "time is {}", at.format("%H:%M:%S"));
                }
                None => warn!(now, "clock answered an unrepresentable time"),
            },
        }
    }

    link.close(OPEN_TIMEOUT).await?;
    Ok(())
}

async fn run_dictionary(peer: &LoopbackPeer, endpoint: Endpoint) -> Result<()> {
    let link = DictionaryLink::open(peer.transport(), endpoint, OPEN_TIMEOUT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    if !link.set("demo", "answer", "42").await {
        anyhow::bail!("dictionary store refused the write");
    }
    match link.get("demo", "answer").await {
        Some(value) => info!(%value, "read back"),
        None => anyhow::bail!("stored value did not come back"),
    }

    // Short stress pass: repeated writes and reads through the same proxy.
    for round in 0..50u32 {
        let key = format!("key-{round}");
        if !link.set("stress", &key, &round.to_string()).await {
            anyhow::bail!("stress write {round} refused");
        }
        if link.get("stress", &key).await.as_deref() != Some(round.to_string().as_str()) {
            anyhow::bail!("stress read {round} mismatched");
        }
    }
    info!("stress pass complete");

    link.close(OPEN_TIMEOUT).await?;
    Ok(())
}

async fn run_math(peer: &LoopbackPeer, endpoint: Endpoint) -> Result<()> {
    let link = ArithmeticLink::open(peer.transport(), endpoint, OPEN_TIMEOUT).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sum = link.add(40, 2).await.context("add failed")?;
    info!(sum, "40 + 2");
    let diff = link.sub(50, 8).await.context("sub failed")?;
    info!(diff, "50 - 8");

    link.close(OPEN_TIMEOUT).await?;
    Ok(())
}

async fn run_retry(
    peer: &LoopbackPeer,
    endpoint: Endpoint,
    retries: u32,
    delay: u64,
) -> Result<()> {
    peer.set_config_line("callsign=tether").await;

    let plan = RetryPlan::new(retries, Duration::from_secs(delay))?;
    let report = RetryController::new(peer.transport(), endpoint, plan)
        .run()
        .await;

    info!(
        attempts = report.attempts_made,
        probes_ok = report.probes_ok,
        "retry run finished"
    );
    match report.commit {
        CommitOutcome::Applied => {
            info!(applied = ?peer.applied_config().await, "configuration applied");
            Ok(())
        }
        CommitOutcome::Failed(reason) => anyhow::bail!("commit failed: {reason}"),
        CommitOutcome::NeverAttempted => anyhow::bail!("peer never became reachable to commit"),
    }
}
