//! Cockpit Daemon - live dashboard state for agent fleets
//!
//! This daemon runs in the background, managing:
//! - The live feed connection (reconnects every few seconds)
//! - Merged universe state, leaderboards and highlights
//! - Optimistic user actions against the control API
//! - IPC server for presentation clients
//!
//! Config locations:
//! - Linux: ~/.local/share/cockpit/config.json
//! - Windows: %APPDATA%\cockpit\config.json
//! - MacOS: ~/Library/Application Support/cockpit/config.json

use cockpit::highlight::HighlightTracker;
use cockpit::leaderboard::{compute_top, trace_rank};
use cockpit::model::PlanetKey;
use cockpit::protocol::{
    DeployVariant, HighlightView, OutboundMessage, PlanetDetail, Request, Response, StateSnapshot,
};
use cockpit::session::Dashboard;
use cockpit::view::{filter_galaxies, planet_health, planet_scalars, ViewFilter};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod actions;
mod config;
mod control;
mod feed;
mod paths;

use actions::UserAction;
use config::DaemonConfig;
use control::{ControlApi, HttpControlApi};
use feed::{FeedEvent, FeedHandle, WsConnector};
use paths::AppPaths;

/// Longest IPC request line accepted from a client.
const MAX_REQUEST_LINE: usize = 1 << 20;

struct Daemon {
    dashboard: RwLock<Dashboard>,
    feed: FeedHandle,
    api: Box<dyn ControlApi>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Feed consumer
// ═══════════════════════════════════════════════════════════════════════════

async fn consume_feed(daemon: Arc<Daemon>, mut events: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Status { state, message } => {
                debug!("Feed {}: {}", state.as_str(), message);
                daemon.dashboard.write().await.set_status(message);
            }
            FeedEvent::Message(message) => {
                let report = daemon
                    .dashboard
                    .write()
                    .await
                    .ingest(message, Instant::now());
                for warning in &report.warnings {
                    warn!("Merge: {}", warning);
                }
                if let Some(e) = &report.error {
                    error!("Server reported: {}", e);
                }
                for (key, event) in &report.highlights {
                    debug!(
                        "{}/{}: {:?} {}",
                        key.galaxy_id, key.planet_id, event.kind, event.variant_id
                    );
                }
            }
            FeedEvent::Malformed { error } => {
                debug!("Malformed frame skipped: {}", error);
            }
        }
    }
    debug!("Feed consumer stopped");
}

// ═══════════════════════════════════════════════════════════════════════════
// IPC
// ═══════════════════════════════════════════════════════════════════════════

fn unknown_planet(galaxy_id: &str, planet_id: &str) -> Response {
    Response::Error {
        message: format!("Unknown planet {galaxy_id}/{planet_id}"),
    }
}

async fn run_action(daemon: &Daemon, action: UserAction) -> Response {
    match actions::perform(&daemon.dashboard, daemon.api.as_ref(), action).await {
        Ok(message) => Response::Success { message },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

async fn dispatch(daemon: &Daemon, request: Request) -> Response {
    match request {
        Request::GetState => {
            let d = daemon.dashboard.read().await;
            Response::State(Box::new(StateSnapshot {
                status: d.status().to_string(),
                feed: daemon.feed.state().as_str().to_string(),
                universe: Arc::clone(d.universe()),
                optimizing: (**d.optimizing()).clone(),
            }))
        }
        Request::GetLeaderboard {
            galaxy_id,
            planet_id,
        } => {
            let d = daemon.dashboard.read().await;
            let Some(planet) = d.universe().planet(&galaxy_id, &planet_id) else {
                return unknown_planet(&galaxy_id, &planet_id);
            };
            let entries = match d.leaderboard(&PlanetKey::new(galaxy_id.clone(), planet_id.clone())) {
                Some(entries) => entries.as_ref().clone(),
                None => compute_top(planet, d.top_k()),
            };
            Response::Leaderboard {
                galaxy_id,
                planet_id,
                entries,
            }
        }
        Request::GetPlanet {
            galaxy_id,
            planet_id,
        } => {
            let d = daemon.dashboard.read().await;
            let Some(galaxy) = d.universe().get(&galaxy_id) else {
                return unknown_planet(&galaxy_id, &planet_id);
            };
            let Some(planet) = galaxy.planet(&planet_id) else {
                return unknown_planet(&galaxy_id, &planet_id);
            };
            let settings =
                d.optimizer_settings(&PlanetKey::new(galaxy_id.clone(), planet_id.clone()));
            Response::Planet(Box::new(PlanetDetail {
                health: planet_health(planet),
                scalars: planet_scalars(planet, &galaxy.config.effective_mapping()),
                optimizing: d.is_optimizing(&planet_id),
                optimizer: settings.optimizer,
                score_threshold: settings.score_threshold,
                planet: Arc::clone(planet),
                galaxy_id,
            }))
        }
        Request::GetHighlights {
            galaxy_id,
            planet_id,
        } => {
            let now = Instant::now();
            let mut d = daemon.dashboard.write().await;
            d.sweep(now);
            let key = PlanetKey::new(galaxy_id.clone(), planet_id.clone());
            let tracker = d.highlights();
            let highlights = tracker
                .highlights(&key)
                .into_iter()
                .map(|(variant_id, h)| HighlightView {
                    intensity: tracker.intensity(&key, &variant_id, now),
                    kind: h.kind,
                    new_entry: h.new_entry,
                    variant_id,
                })
                .collect();
            Response::Highlights {
                galaxy_id,
                planet_id,
                highlights,
            }
        }
        Request::Filter { search, health } => {
            let d = daemon.dashboard.read().await;
            Response::Galaxies {
                galaxies: filter_galaxies(d.universe(), &ViewFilter::new(search, health)),
            }
        }
        Request::LocateTrace { trace_id } => {
            let d = daemon.dashboard.read().await;
            let universe = d.universe();
            let location = universe.locate_trace(&trace_id);
            let rank = location.as_ref().and_then(|key| {
                universe
                    .planet(&key.galaxy_id, &key.planet_id)
                    .and_then(|p| trace_rank(p, &trace_id))
            });
            Response::TraceLocation {
                trace_id,
                location,
                rank,
            }
        }
        Request::MoveGalaxy {
            galaxy_id,
            position,
        } => {
            run_action(
                daemon,
                UserAction::MoveGalaxy {
                    galaxy_id,
                    position,
                },
            )
            .await
        }
        Request::TogglePlanetStatus {
            galaxy_id,
            planet_id,
        } => {
            run_action(
                daemon,
                UserAction::TogglePlanetStatus {
                    galaxy_id,
                    planet_id,
                },
            )
            .await
        }
        Request::SetMetricMapping { galaxy_id, mapping } => {
            run_action(daemon, UserAction::SetMetricMapping { galaxy_id, mapping }).await
        }
        Request::StartOptimization {
            galaxy_id,
            planet_id,
        } => {
            run_action(
                daemon,
                UserAction::StartOptimization {
                    galaxy_id,
                    planet_id,
                },
            )
            .await
        }
        Request::StopOptimization {
            galaxy_id,
            planet_id,
        } => {
            run_action(
                daemon,
                UserAction::StopOptimization {
                    galaxy_id,
                    planet_id,
                },
            )
            .await
        }
        Request::DeleteGalaxy { galaxy_id } => {
            run_action(daemon, UserAction::DeleteGalaxy { galaxy_id }).await
        }
        Request::SetOptimizer {
            galaxy_id,
            planet_id,
            optimizer,
            score_threshold,
        } => {
            let mut d = daemon.dashboard.write().await;
            let key = PlanetKey::new(galaxy_id, planet_id);
            match d.set_optimizer(&key, optimizer, score_threshold) {
                Ok(s) => Response::Success {
                    message: format!(
                        "Optimizer for {}: {} (threshold {:.2})",
                        key.planet_id, s.optimizer, s.score_threshold
                    ),
                },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }
        Request::DeployVariant {
            galaxy_id,
            planet_id,
            variant_id,
        } => {
            let mut d = daemon.dashboard.write().await;
            let variant = match d.deployable(&galaxy_id, &planet_id, &variant_id) {
                Ok(v) => v,
                Err(e) => {
                    return Response::Error {
                        message: e.to_string(),
                    }
                }
            };
            let message = OutboundMessage::DeployVariant {
                payload: DeployVariant {
                    galaxy_id,
                    planet_id: planet_id.clone(),
                    variant,
                },
            };
            match daemon.feed.send(&message) {
                Ok(()) => {
                    let status = format!("Deploying variant for {planet_id}...");
                    d.set_status(status.clone());
                    Response::Success { message: status }
                }
                Err(e) => {
                    warn!("Deploy of {} not sent: {}", variant_id, e);
                    Response::Error {
                        message: e.to_string(),
                    }
                }
            }
        }
        Request::AddTrace {
            galaxy_id,
            planet_id,
            variant,
        } => {
            let variant_id = variant.id.clone();
            let mut d = daemon.dashboard.write().await;
            match d.add_trace(&galaxy_id, &planet_id, variant, Instant::now()) {
                Ok(events) => Response::Success {
                    message: format!(
                        "Trace {} added to {} ({} highlight(s))",
                        variant_id,
                        planet_id,
                        events.len()
                    ),
                },
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }
        Request::Shutdown => {
            info!("Shutdown requested");
            daemon.feed.shutdown().await;
            tokio::spawn(async {
                // Give the response a moment to flush before exiting.
                time::sleep(Duration::from_millis(50)).await;
                std::process::exit(0);
            });
            Response::Success {
                message: "Shutting down".to_string(),
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    daemon: Arc<Daemon>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    while let Some(line) = lines.next().await {
        let line = line?;
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&daemon, request).await,
            Err(e) => Response::Error {
                message: format!("Invalid request: {}", e),
            },
        };
        lines.send(serde_json::to_string(&response)?).await?;
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Setup application paths
    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());
    let cfg = DaemonConfig::load(&paths)?;
    info!("Config file: {:?}", paths.config_file());

    let dashboard = Dashboard::new(
        cfg.top_k,
        HighlightTracker::new(cfg.highlight_decay(), cfg.leader_policy),
    );
    let api = HttpControlApi::new(&cfg.api_base)?;
    let (feed, events) = feed::spawn(WsConnector::new(cfg.feed_url.clone()), cfg.reconnect_delay());
    info!("Live feed: {}", cfg.feed_url);
    info!("Control API: {}", cfg.api_base);

    let daemon = Arc::new(Daemon {
        dashboard: RwLock::new(dashboard),
        feed,
        api: Box::new(api),
    });

    tokio::spawn(consume_feed(Arc::clone(&daemon), events));

    // Close the feed cleanly on Ctrl-C.
    {
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C: closing feed");
                daemon.feed.shutdown().await;
                std::process::exit(0);
            }
        });
    }

    // Start IPC server
    let listener = TcpListener::bind(cfg.ipc_addr.as_str()).await?;
    info!("Cockpit daemon listening on {}", cfg.ipc_addr);

    // Accept client connections
    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let daemon = Arc::clone(&daemon);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, daemon).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}
