//! Wire formats.
//!
//! - Feed: JSON text frames pushed by the telemetry server, plus the one
//!   outbound `deploy_variant` message.
//! - Control API: request/reply bodies of the HTTP endpoints.
//! - IPC: newline-delimited JSON between `cockpitd` and presentation clients.

use crate::highlight::HighlightKind;
use crate::leaderboard::LeaderboardEntry;
use crate::model::{
    GalaxyId, MetricMapping, Planet, PlanetId, PlanetKey, Position, Universe, Variant, VariantId,
};
use crate::view::{GalaxyView, HealthFilter, PlanetHealth, PlanetScalars};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// Feed (inbound)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Partial snapshot of changed galaxies.
    Update {
        #[serde(default)]
        payload: UpdatePayload,
    },
    /// Full snapshot sent once after connecting. Merged like an update.
    Init {
        #[serde(default)]
        payload: Map<String, Value>,
    },
    Status {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Payload of an `update` message.
///
/// Accepts both `{"galaxies": {...}, "optimizing_planets": [...]}` and a bare
/// galaxy map (older servers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct UpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub galaxies: Option<Map<String, Value>>,
    /// Replaces the optimizing set when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizing_planets: Option<Vec<PlanetId>>,
}

impl From<Map<String, Value>> for UpdatePayload {
    fn from(mut map: Map<String, Value>) -> Self {
        let wrapped = matches!(map.get("galaxies"), Some(Value::Object(_)) | Some(Value::Null))
            || map.contains_key("optimizing_planets");
        if !wrapped {
            return UpdatePayload {
                galaxies: Some(map),
                optimizing_planets: None,
            };
        }

        let galaxies = match map.remove("galaxies") {
            Some(Value::Object(g)) => Some(g),
            _ => None,
        };
        let optimizing_planets = match map.remove("optimizing_planets") {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };
        UpdatePayload {
            galaxies,
            optimizing_planets,
        }
    }
}

pub fn parse_feed_message(text: &str) -> Result<FeedMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ═══════════════════════════════════════════════════════════════════════════
// Feed (outbound)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    DeployVariant { payload: DeployVariant },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployVariant {
    pub galaxy_id: GalaxyId,
    pub planet_id: PlanetId,
    pub variant: Variant,
}

impl OutboundMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Control API bodies
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionBody {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanetStatusBody {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMappingBody {
    pub metric_mapping: MetricMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartOptimizationBody {
    pub galaxy_id: GalaxyId,
    pub planet_id: PlanetId,
    pub optimizer: String,
    pub score_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOptimizationBody {
    pub planet_id: PlanetId,
}

/// Reply body of any control endpoint. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlReplyBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// IPC
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetState,
    GetLeaderboard {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    GetPlanet {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    GetHighlights {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    Filter {
        #[serde(default)]
        search: String,
        #[serde(default)]
        health: HealthFilter,
    },
    LocateTrace {
        trace_id: VariantId,
    },
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
    SetOptimizer {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        #[serde(default)]
        optimizer: Option<String>,
        #[serde(default)]
        score_threshold: Option<f64>,
    },
    DeployVariant {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        variant_id: VariantId,
    },
    AddTrace {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        variant: Variant,
    },
    DeleteGalaxy {
        galaxy_id: GalaxyId,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    State(Box<StateSnapshot>),
    Leaderboard {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        entries: Vec<LeaderboardEntry>,
    },
    Planet(Box<PlanetDetail>),
    Highlights {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        highlights: Vec<HighlightView>,
    },
    Galaxies {
        galaxies: Vec<GalaxyView>,
    },
    TraceLocation {
        trace_id: VariantId,
        location: Option<PlanetKey>,
        rank: Option<usize>,
    },
    Success {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Last feed status line.
    pub status: String,
    /// Feed connection state (`connecting`, `open`, ...).
    pub feed: String,
    pub universe: Arc<Universe>,
    #[serde(default)]
    pub optimizing: BTreeSet<PlanetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanetDetail {
    pub galaxy_id: GalaxyId,
    pub planet: Arc<Planet>,
    pub health: Option<PlanetHealth>,
    pub scalars: PlanetScalars,
    pub optimizing: bool,
    pub optimizer: String,
    pub score_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightView {
    pub variant_id: VariantId,
    pub kind: HighlightKind,
    #[serde(default)]
    pub new_entry: bool,
    /// 1 when the highlight starts, fading to 0.
    pub intensity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_accepts_wrapped_and_bare_payloads() {
        let wrapped = parse_feed_message(
            r#"{"type":"update","payload":{"galaxies":{"g1":{"name":"A"}},"optimizing_planets":["p1"]}}"#,
        )
        .unwrap();
        let FeedMessage::Update { payload } = wrapped else {
            panic!("expected update");
        };
        assert!(payload.galaxies.unwrap().contains_key("g1"));
        assert_eq!(payload.optimizing_planets, Some(vec!["p1".to_string()]));

        let bare = parse_feed_message(r#"{"type":"update","payload":{"g1":{"name":"A"}}}"#).unwrap();
        let FeedMessage::Update { payload } = bare else {
            panic!("expected update");
        };
        assert!(payload.galaxies.unwrap().contains_key("g1"));
        assert_eq!(payload.optimizing_planets, None);
    }

    #[test]
    fn status_error_and_init_decode() {
        assert_eq!(
            parse_feed_message(r#"{"type":"error","message":"boom"}"#).unwrap(),
            FeedMessage::Error {
                message: "boom".to_string()
            }
        );
        assert_eq!(
            parse_feed_message(r#"{"type":"status","message":"ok"}"#).unwrap(),
            FeedMessage::Status {
                message: "ok".to_string()
            }
        );
        let init = parse_feed_message(r#"{"type":"init","payload":{"g1":{}}}"#).unwrap();
        assert!(matches!(init, FeedMessage::Init { payload } if payload.contains_key("g1")));
    }

    #[test]
    fn unknown_and_malformed_messages_are_rejected() {
        assert!(parse_feed_message(r#"{"type":"telemetry","payload":{}}"#).is_err());
        assert!(parse_feed_message("not json").is_err());
        assert!(parse_feed_message(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn deploy_variant_wire_shape() {
        let msg = OutboundMessage::DeployVariant {
            payload: DeployVariant {
                galaxy_id: "g1".to_string(),
                planet_id: "p1".to_string(),
                variant: Variant::scored("v1", 0.9),
            },
        };
        let value: Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "deploy_variant");
        assert_eq!(value["payload"]["galaxyId"], "g1");
        assert_eq!(value["payload"]["planetId"], "p1");
        assert_eq!(value["payload"]["variant"]["id"], "v1");
    }

    #[test]
    fn ipc_requests_are_tagged_by_type() {
        let req: Request = serde_json::from_value(json!({
            "type": "MoveGalaxy",
            "galaxy_id": "g1",
            "position": [1.0, 2.0, 3.0]
        }))
        .unwrap();
        assert_eq!(
            req,
            Request::MoveGalaxy {
                galaxy_id: "g1".to_string(),
                position: [1.0, 2.0, 3.0]
            }
        );

        let req: Request = serde_json::from_value(json!({"type": "Filter"})).unwrap();
        assert_eq!(
            req,
            Request::Filter {
                search: String::new(),
                health: HealthFilter::All
            }
        );

        let resp = serde_json::to_value(Response::Success {
            message: "ok".to_string(),
        })
        .unwrap();
        assert_eq!(resp, json!({"type": "Success", "message": "ok"}));
    }
}
