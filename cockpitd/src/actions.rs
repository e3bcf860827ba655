//! Optimistic user actions.
//!
//! Each action is applied to the dashboard first, then sent to the control
//! API. The dashboard lock is released while the request is in flight; a
//! rejection rolls the local change back and puts the failure on the status
//! line.

use crate::control::{ControlApi, ControlError, ControlReply, ControlRequest};
use cockpit::model::{GalaxyId, MetricMapping, Planet, PlanetId, PlanetKey, Position};
use cockpit::protocol::StartOptimizationBody;
use cockpit::session::{Dashboard, LocalChange, SessionError, Ticket};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{what} failed: {source}")]
    Control {
        what: String,
        #[source]
        source: ControlError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    MoveGalaxy {
        galaxy_id: GalaxyId,
        position: Position,
    },
    TogglePlanetStatus {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    SetMetricMapping {
        galaxy_id: GalaxyId,
        mapping: MetricMapping,
    },
    StartOptimization {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    StopOptimization {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    DeleteGalaxy {
        galaxy_id: GalaxyId,
    },
}

/// An applied local change waiting for the server.
struct Prepared {
    ticket: Ticket,
    request: ControlRequest,
    what: String,
}

fn require_planet<'a>(
    d: &'a Dashboard,
    galaxy_id: &str,
    planet_id: &str,
) -> Result<&'a Arc<Planet>, SessionError> {
    let universe = d.universe();
    match universe.planet(galaxy_id, planet_id) {
        Some(planet) => Ok(planet),
        None if universe.contains(galaxy_id) => Err(SessionError::UnknownPlanet {
            galaxy_id: galaxy_id.to_string(),
            planet_id: planet_id.to_string(),
        }),
        None => Err(SessionError::UnknownGalaxy(galaxy_id.to_string())),
    }
}

fn prepare(d: &mut Dashboard, action: UserAction) -> Result<Prepared, SessionError> {
    let prepared = match action {
        UserAction::MoveGalaxy {
            galaxy_id,
            position,
        } => Prepared {
            ticket: d.begin(LocalChange::MoveGalaxy {
                galaxy_id: galaxy_id.clone(),
                position,
            })?,
            what: format!("Moving {galaxy_id}"),
            request: ControlRequest::SetPosition {
                galaxy_id,
                position,
            },
        },
        UserAction::TogglePlanetStatus {
            galaxy_id,
            planet_id,
        } => {
            let status = require_planet(d, &galaxy_id, &planet_id)?.status.toggled();
            let wire = status.as_str().to_string();
            Prepared {
                ticket: d.begin(LocalChange::SetPlanetStatus {
                    galaxy_id: galaxy_id.clone(),
                    planet_id: planet_id.clone(),
                    status,
                })?,
                what: format!("Setting {planet_id} {wire}"),
                request: ControlRequest::SetPlanetStatus {
                    galaxy_id,
                    planet_id,
                    status: wire,
                },
            }
        }
        UserAction::SetMetricMapping { galaxy_id, mapping } => {
            let ticket = d.begin(LocalChange::SetMetricMapping {
                galaxy_id: galaxy_id.clone(),
                mapping,
            })?;
            // Send what was stored: empty entries are already gone.
            let mapping = d
                .universe()
                .get(&galaxy_id)
                .and_then(|g| g.config.metric_mapping.clone())
                .unwrap_or_default();
            Prepared {
                ticket,
                what: format!("Updating metric mapping of {galaxy_id}"),
                request: ControlRequest::SetMetricMapping { galaxy_id, mapping },
            }
        }
        UserAction::StartOptimization {
            galaxy_id,
            planet_id,
        } => {
            require_planet(d, &galaxy_id, &planet_id)?;
            let settings = d.optimizer_settings(&PlanetKey::new(galaxy_id.clone(), planet_id.clone()));
            Prepared {
                ticket: d.begin(LocalChange::MarkOptimizing {
                    planet_id: planet_id.clone(),
                    optimizing: true,
                })?,
                what: format!("Starting optimization of {planet_id}"),
                request: ControlRequest::StartOptimization(StartOptimizationBody {
                    galaxy_id,
                    planet_id,
                    optimizer: settings.optimizer,
                    score_threshold: settings.score_threshold,
                }),
            }
        }
        UserAction::StopOptimization {
            galaxy_id,
            planet_id,
        } => {
            require_planet(d, &galaxy_id, &planet_id)?;
            Prepared {
                ticket: d.begin(LocalChange::MarkOptimizing {
                    planet_id: planet_id.clone(),
                    optimizing: false,
                })?,
                what: format!("Stopping optimization of {planet_id}"),
                request: ControlRequest::StopOptimization { planet_id },
            }
        }
        UserAction::DeleteGalaxy { galaxy_id } => Prepared {
            ticket: d.begin(LocalChange::DeleteGalaxy {
                galaxy_id: galaxy_id.clone(),
            })?,
            what: format!("Deleting {galaxy_id}"),
            request: ControlRequest::DeleteAgent { galaxy_id },
        },
    };
    Ok(prepared)
}

/// Apply `action` locally, send it, then confirm or roll back.
///
/// Returns the message for the IPC reply.
pub async fn perform(
    state: &RwLock<Dashboard>,
    api: &dyn ControlApi,
    action: UserAction,
) -> Result<String, ActionError> {
    let Prepared {
        ticket,
        request,
        what,
    } = {
        let mut d = state.write().await;
        prepare(&mut d, action)?
    };

    let reply = api.send(request).await;

    let mut d = state.write().await;
    match reply {
        Ok(ControlReply::Done) => {
            d.confirm(ticket)?;
            Ok(format!("{what}: done"))
        }
        Ok(ControlReply::AlreadyRunning) => {
            info!("{}: optimizer already running", what);
            d.confirm(ticket)?;
            Ok(format!("{what}: already running"))
        }
        Err(source) => {
            warn!("{} failed: {}", what, source);
            d.rollback(ticket, Instant::now())?;
            d.set_status(format!("{what} failed: {source}"));
            Err(ActionError::Control { what, source })
        }
    }
}
