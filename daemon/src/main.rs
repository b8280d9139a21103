mod artifacts;
mod bus;
mod commands;
mod config;
mod database;
mod driver;
mod encoder;
mod event;
mod frame;
mod launcher;
mod movie;
mod paths;
mod picture;
mod pipeline;
mod session;
mod sinks;
mod timefmt;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use tokio::{runtime::Handle, sync::watch};

use crate::bus::EventBus;
use crate::driver::Cameras;
use crate::pipeline::Pipeline;
use crate::sinks::LiveFrame;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        log::error!("[config] Error (using defaults): {e:#}");
        config::Config::default()
    });
    if config.cameras.is_empty() {
        log::error!("[config] No cameras configured in {}", config_path.display());
        std::process::exit(1);
    }

    // ── Pipelines ─────────────────────────────────────────────────────────────
    let mut pipelines = Vec::new();
    for camera in config.cameras {
        let id = camera.id;
        if let Err(e) = camera.validate() {
            log::error!("[config] Skipping camera {id}: {e:#}");
            continue;
        }
        match Pipeline::from_config(&config.global, camera, Handle::current()) {
            Ok((pipeline, live)) => {
                if let Some(rx) = live {
                    tokio::spawn(watch_live_feed(id, rx));
                }
                pipelines.push(pipeline);
            }
            Err(e) => log::error!("[config] Skipping camera {id}: {e:#}"),
        }
    }
    if pipelines.is_empty() {
        log::error!("[config] No usable cameras");
        std::process::exit(1);
    }

    log::info!(
        "watchpost-daemon v{} started with {} camera(s)",
        env!("CARGO_PKG_VERSION"),
        pipelines.len()
    );

    let bus = EventBus::standard();
    log::debug!("[bus] {} handlers registered", bus.len());
    let cameras = Cameras::start(Arc::new(bus), pipelines);
    cameras
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            log::info!("Shutting down");
        })
        .await;
    log::info!("All cameras stopped");
}

/// Logs when a camera's live feed comes online and when it goes away.
async fn watch_live_feed(camera: u32, mut rx: watch::Receiver<LiveFrame>) {
    let mut online = false;
    while rx.changed().await.is_ok() {
        let has_frame = rx.borrow_and_update().is_some();
        if has_frame != online {
            online = has_frame;
            let state = if online { "online" } else { "offline" };
            log::info!("[live] Camera {camera}: feed {state}");
        }
    }
}
