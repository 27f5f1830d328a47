//! Scripted multi-client simulation.
//!
//! Runs one streamer and a handful of viewers through a match night on the
//! paused clock: join, go live, share the board, chat, type, lose the
//! streamer's connection, end the share from the platform, leave. The same
//! seed always produces the same log.
//!
//! # Usage
//!
//! ```bash
//! oche-sim --peers 4 --seed 180 --backoff-jitter-ms 500
//! RUST_LOG=oche_core=debug oche-sim --config client.json
//! ```

use std::{error::Error, path::PathBuf, time::Duration};

use clap::Parser;
use oche_client::{AppEvent, ClientConfig};
use oche_core::Role;
use oche_harness::{ClientId, SimWorld};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Oche room simulation
#[derive(Parser, Debug)]
#[command(name = "oche-sim")]
#[command(about = "Deterministic oche room simulation")]
#[command(version)]
struct Args {
    /// Number of clients, the streamer included
    #[arg(short, long, default_value = "3")]
    peers: usize,

    /// RNG seed
    #[arg(short, long, default_value = "180")]
    seed: u64,

    /// Client configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Random delay bound added to each reconnect, in milliseconds
    #[arg(long, default_value = "250")]
    backoff_jitter_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    config.session.backoff_jitter = Duration::from_millis(args.backoff_jitter_ms);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()?;
    runtime.block_on(match_night(&config, args.peers.max(1), args.seed))
}

async fn match_night(config: &ClientConfig, peers: usize, seed: u64) -> Result<(), Box<dyn Error>> {
    let mut world = SimWorld::new(seed);
    info!(peers, seed, room = "fuelldart", "simulation starting");

    let streamer = world.add_client(config);
    world.send(streamer, AppEvent::Join { name: "caller".into(), role: Role::Streamer }).await?;
    world.send(streamer, AppEvent::GoLive).await?;

    let viewers: Vec<ClientId> = (1..peers).map(|_| world.add_client(config)).collect();
    for (n, &viewer) in viewers.iter().enumerate() {
        let name = format!("player-{}", n + 1);
        world.send(viewer, AppEvent::Join { name, role: Role::Viewer }).await?;
    }

    world.send(streamer, AppEvent::StartScreenShare).await?;
    world.run_for(Duration::from_secs(2)).await;

    for &viewer in &viewers {
        world.send(viewer, AppEvent::ComposeInput { text: "one hundred".into() }).await?;
        world.run_for(Duration::from_millis(400)).await;
        world.send(viewer, AppEvent::SendMessage { content: "one hundred and eighty!".into() }).await?;
    }

    world.room().drop_connection("ft-caller");
    world.run_for(Duration::from_secs(3)).await;

    if let Some(platform) = world.client(streamer).map(|c| c.platform().clone())
        && let Some(capture) = platform.active_display_capture()
    {
        platform.end_capture_natively(capture);
    }
    world.run_for(Duration::from_secs(1)).await;

    if let Some(client) = world.client(streamer) {
        for message in client.app().chat().messages() {
            info!(id = message.id.0, from = %message.sender_name, "{}", message.content);
        }
    }

    world.send(streamer, AppEvent::EndStream).await?;
    for &viewer in &viewers {
        world.send(viewer, AppEvent::Leave).await?;
    }
    world.send(streamer, AppEvent::Leave).await?;

    for (id, client) in world.clients().iter().enumerate() {
        let app = client.app();
        info!(
            client = id,
            name = app.display_name(),
            pulses = app.session().pulse_count(),
            released = client.platform().released().len(),
            "client finished"
        );
    }
    info!(elapsed_ms = world.env().elapsed().as_millis(), "simulation finished");
    Ok(())
}
