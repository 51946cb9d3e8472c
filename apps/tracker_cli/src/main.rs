use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use shared::protocol::TrackerEvent;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracker_core::{
    map_view::HeadlessMapSurface, source::DemoLocationSource, status::StatusCard,
    TrackingController,
};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Follow a tracking code and print its live location updates")]
struct Args {
    /// Tracking code to follow, e.g. DEMO123.
    code: String,
    /// Number of location updates to wait for before exiting.
    #[arg(long, default_value_t = 4)]
    ticks: u32,
    #[arg(long, default_value = "tracker.toml")]
    config: PathBuf,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let settings = load_settings(&args.config)?;
    let source = Arc::new(DemoLocationSource::new(&settings));
    let controller = TrackingController::new(source, settings);

    let surface = HeadlessMapSurface::new();
    let probe = surface.probe();
    controller.mount_map(Box::new(surface)).await;
    let mut events = controller.event_stream();

    controller
        .submit(&args.code)
        .await
        .with_context(|| format!("failed to start tracking '{}'", args.code.trim()))?;

    let mut seen = 0;
    while seen < args.ticks {
        let event = tokio::select! {
            event = events.next() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Some(Ok(event)) => {
                print_event(&event, args.json)?;
                if matches!(event, TrackerEvent::LocationUpdated { .. }) {
                    seen += 1;
                    if !args.json {
                        print_status(&controller).await;
                    }
                }
            }
            Some(Err(err)) => warn!(error = %err, "tracker: event stream lagged"),
            None => break,
        }
    }

    controller.stop().await;
    controller.unmount_map();

    let map = probe.snapshot();
    if let Some(tile) = map.visible_tile {
        println!("Last visible tile: {tile}");
    }
    println!(
        "Camera transitions: {} (redirected {})",
        map.transitions, map.redirected
    );

    Ok(())
}

fn print_event(event: &TrackerEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        TrackerEvent::SessionChanged { snapshot } => {
            println!("session: {:?}", snapshot.phase);
        }
        TrackerEvent::LocationUpdated { code, location } => {
            println!(
                "{code}: {:.6}, {:.6} at {}",
                location.latitude,
                location.longitude,
                location.timestamp.format("%H:%M:%S")
            );
        }
        TrackerEvent::Notification { title, description } => {
            println!("{title}: {description}");
        }
        TrackerEvent::Error(err) => println!("error: {}", err.message),
    }
    Ok(())
}

async fn print_status(controller: &TrackingController) {
    let snapshot = controller.snapshot().await;
    if let Some(card) = StatusCard::from_snapshot(&snapshot, chrono::Utc::now()) {
        println!("{}", card.render());
    }
}
