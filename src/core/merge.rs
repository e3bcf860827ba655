//! Merge engine: folds a partial galaxy snapshot into a [`Universe`].
//!
//! The incoming snapshot is raw JSON (`galaxy id → partial galaxy`) so that a
//! malformed entry can be dropped on its own while the rest still applies.
//! Fields absent from a patch (or `null`) leave the local value untouched.

use crate::model::{
    Galaxy, GalaxyConfig, GalaxyStatus, Planet, PlanetKey, PlanetStatus, Position, Universe,
    Variant,
};
use serde::de::DeserializeOwned;
use serde::Deserialize as _;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A dropped entry or field. Never fatal; the remainder of the snapshot is applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeWarning {
    #[error("galaxy `{galaxy_id}` dropped: entry is not an object")]
    GalaxyNotObject { galaxy_id: String },
    #[error("galaxy `{galaxy_id}` dropped: id field {found} disagrees with its key")]
    GalaxyIdMismatch { galaxy_id: String, found: Value },
    #[error("galaxy `{galaxy_id}`: field `{field}` ignored: {reason}")]
    InvalidGalaxyField {
        galaxy_id: String,
        field: &'static str,
        reason: String,
    },
    #[error("galaxy `{galaxy_id}`: planet #{index} dropped: {reason}")]
    InvalidPlanet {
        galaxy_id: String,
        index: usize,
        reason: String,
    },
    #[error("planet `{galaxy_id}/{planet_id}`: field `{field}` ignored: {reason}")]
    InvalidPlanetField {
        galaxy_id: String,
        planet_id: String,
        field: &'static str,
        reason: String,
    },
    #[error("planet `{galaxy_id}/{planet_id}`: trace #{index} dropped: {reason}")]
    InvalidTrace {
        galaxy_id: String,
        planet_id: String,
        index: usize,
        reason: String,
    },
}

/// Result of [`apply`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub universe: Universe,
    pub warnings: Vec<MergeWarning>,
    /// Planets whose trace history or deployed version changed (new planets included).
    pub changed_planets: Vec<PlanetKey>,
}

#[derive(Debug, Default)]
struct GalaxyPatch {
    id: String,
    name: Option<String>,
    status: Option<GalaxyStatus>,
    status_message: Option<String>,
    position: Option<Position>,
    config: Option<GalaxyConfig>,
    planets: Vec<PlanetPatch>,
}

#[derive(Debug, Default)]
struct PlanetPatch {
    id: String,
    name: Option<String>,
    status: Option<PlanetStatus>,
    orbit_radius: Option<f64>,
    deployed_version: Option<Variant>,
    trace_history: Vec<Variant>,
}

/// Apply an incoming partial snapshot to `local`, returning the next universe.
///
/// - unknown galaxies are inserted as received;
/// - known galaxies are shallow-merged, keeping the local `position` when set;
/// - planets are matched by id, new ones appended, local-only ones kept;
/// - trace histories only grow (upsert by id).
///
/// Galaxies and planets that end up unchanged keep their previous `Arc`, which
/// makes a repeated application of the same snapshot a no-op.
pub fn apply(local: &Universe, incoming: &Map<String, Value>) -> MergeOutcome {
    let mut warnings = Vec::new();
    let mut changed_planets = Vec::new();
    let mut galaxies = local.clone().into_map();

    for (key, value) in incoming {
        let Some(patch) = decode_galaxy(key, value, &mut warnings) else {
            continue;
        };
        let merged = merge_galaxy(galaxies.get(key), patch, &mut changed_planets);
        galaxies.insert(key.clone(), merged);
    }

    MergeOutcome {
        universe: Universe::from_map(galaxies),
        warnings,
        changed_planets,
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

fn merge_galaxy(
    existing: Option<&Arc<Galaxy>>,
    patch: GalaxyPatch,
    changed_planets: &mut Vec<PlanetKey>,
) -> Arc<Galaxy> {
    let mut galaxy = match existing {
        Some(g) => Galaxy::clone(g),
        None => Galaxy::new(patch.id.clone(), ""),
    };
    let mut dirty = existing.is_none();

    dirty |= assign(&mut galaxy.name, patch.name);
    dirty |= assign(&mut galaxy.status, patch.status);
    dirty |= assign(&mut galaxy.status_message, patch.status_message.map(Some));
    dirty |= assign(&mut galaxy.config, patch.config);
    if galaxy.position.is_none() && patch.position.is_some() {
        galaxy.position = patch.position;
        dirty = true;
    }

    for p in patch.planets {
        let key = PlanetKey::new(galaxy.id.clone(), p.id.clone());
        match galaxy.planets.get(&p.id) {
            Some(current) => {
                let mut next = Planet::clone(current);
                let (changed, ranking_changed) = merge_planet(&mut next, p);
                if changed {
                    if ranking_changed {
                        changed_planets.push(key);
                    }
                    galaxy.planets.upsert(Arc::new(next));
                    dirty = true;
                }
            }
            None => {
                let mut planet = Planet::new(p.id.clone(), "");
                merge_planet(&mut planet, p);
                galaxy.planets.upsert(Arc::new(planet));
                changed_planets.push(key);
                dirty = true;
            }
        }
    }

    match existing {
        Some(g) if !dirty => Arc::clone(g),
        _ => Arc::new(galaxy),
    }
}

/// Returns `(changed, ranking_inputs_changed)`.
fn merge_planet(planet: &mut Planet, patch: PlanetPatch) -> (bool, bool) {
    let mut changed = false;
    changed |= assign(&mut planet.name, patch.name);
    changed |= assign(&mut planet.status, patch.status);
    changed |= assign(&mut planet.orbit_radius, patch.orbit_radius.map(Some));

    let mut ranking = assign(&mut planet.deployed_version, patch.deployed_version.map(Some));
    for v in patch.trace_history {
        ranking |= planet.trace_history.upsert(v);
    }
    (changed || ranking, ranking)
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

/// `Ok(None)` for absent or `null`; `Err` carries the decode reason.
fn field<T: DeserializeOwned>(obj: &Map<String, Value>, names: &[&str]) -> Result<Option<T>, String> {
    let Some(v) = names.iter().find_map(|n| obj.get(*n)) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    T::deserialize(v).map(Some).map_err(|e| e.to_string())
}

fn decode_galaxy(key: &str, value: &Value, warnings: &mut Vec<MergeWarning>) -> Option<GalaxyPatch> {
    let Some(obj) = value.as_object() else {
        warnings.push(MergeWarning::GalaxyNotObject {
            galaxy_id: key.to_string(),
        });
        return None;
    };
    match obj.get("id") {
        None | Some(Value::Null) => {}
        Some(Value::String(id)) if id == key => {}
        Some(other) => {
            warnings.push(MergeWarning::GalaxyIdMismatch {
                galaxy_id: key.to_string(),
                found: other.clone(),
            });
            return None;
        }
    }

    let mut patch = GalaxyPatch {
        id: key.to_string(),
        ..GalaxyPatch::default()
    };
    let mut bad = |field: &'static str, reason: String| {
        warnings.push(MergeWarning::InvalidGalaxyField {
            galaxy_id: key.to_string(),
            field,
            reason,
        })
    };

    patch.name = field(obj, &["name"]).unwrap_or_else(|e| {
        bad("name", e);
        None
    });
    patch.status = field(obj, &["status"]).unwrap_or_else(|e| {
        bad("status", e);
        None
    });
    patch.status_message = field(obj, &["statusMessage", "status_message"]).unwrap_or_else(|e| {
        bad("statusMessage", e);
        None
    });
    patch.position = field(obj, &["position"]).unwrap_or_else(|e| {
        bad("position", e);
        None
    });
    patch.config = field(obj, &["config"]).unwrap_or_else(|e| {
        bad("config", e);
        None
    });

    match obj.get("planets") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                if let Some(p) = decode_planet(key, index, item, warnings) {
                    patch.planets.push(p);
                }
            }
        }
        Some(_) => warnings.push(MergeWarning::InvalidGalaxyField {
            galaxy_id: key.to_string(),
            field: "planets",
            reason: "expected an array".to_string(),
        }),
    }

    Some(patch)
}

fn decode_planet(
    galaxy_id: &str,
    index: usize,
    value: &Value,
    warnings: &mut Vec<MergeWarning>,
) -> Option<PlanetPatch> {
    let dropped = |reason: &str| MergeWarning::InvalidPlanet {
        galaxy_id: galaxy_id.to_string(),
        index,
        reason: reason.to_string(),
    };
    let Some(obj) = value.as_object() else {
        warnings.push(dropped("not an object"));
        return None;
    };
    let Some(id) = obj.get("id").and_then(Value::as_str) else {
        warnings.push(dropped("missing `id`"));
        return None;
    };

    let mut patch = PlanetPatch {
        id: id.to_string(),
        ..PlanetPatch::default()
    };
    let mut bad = |field: &'static str, reason: String| {
        warnings.push(MergeWarning::InvalidPlanetField {
            galaxy_id: galaxy_id.to_string(),
            planet_id: id.to_string(),
            field,
            reason,
        })
    };

    patch.name = field(obj, &["name"]).unwrap_or_else(|e| {
        bad("name", e);
        None
    });
    patch.status = field(obj, &["status"]).unwrap_or_else(|e| {
        bad("status", e);
        None
    });
    patch.orbit_radius = field(obj, &["orbitRadius"]).unwrap_or_else(|e| {
        bad("orbitRadius", e);
        None
    });
    patch.deployed_version = field(obj, &["deployedVersion"]).unwrap_or_else(|e| {
        bad("deployedVersion", e);
        None
    });

    match obj.get("traceHistory") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                match Variant::deserialize(item) {
                    Ok(v) => patch.trace_history.push(v),
                    Err(e) => warnings.push(MergeWarning::InvalidTrace {
                        galaxy_id: galaxy_id.to_string(),
                        planet_id: id.to_string(),
                        index,
                        reason: e.to_string(),
                    }),
                }
            }
        }
        Some(_) => warnings.push(MergeWarning::InvalidPlanetField {
            galaxy_id: galaxy_id.to_string(),
            planet_id: id.to_string(),
            field: "traceHistory",
            reason: "expected an array".to_string(),
        }),
    }

    Some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("snapshot must be an object"),
        }
    }

    fn base_update() -> Map<String, Value> {
        snapshot(json!({
            "g1": {
                "id": "g1",
                "name": "Support Agent",
                "status": "idle",
                "position": [9, 9, 9],
                "config": { "metricMapping": { "planetSize": "factuality" } },
                "planets": [{
                    "id": "p1",
                    "name": "Intent",
                    "status": "active",
                    "orbitRadius": 10,
                    "deployedVersion": { "id": "v1", "text": "classify", "evaluation": { "score": 0.9 } },
                    "traceHistory": [
                        { "id": "t1", "evaluation": { "score": 0.5 } },
                        { "id": "t2", "evaluation": { "score": 0.7 } }
                    ]
                }]
            }
        }))
    }

    #[test]
    fn merge_is_idempotent() {
        let start = Universe::new();
        let u = base_update();

        let once = apply(&start, &u);
        let twice = apply(&once.universe, &u);

        assert_eq!(once.universe, twice.universe);
        assert!(twice.changed_planets.is_empty());
        let a = once.universe.get("g1").unwrap();
        let b = twice.universe.get("g1").unwrap();
        assert!(Arc::ptr_eq(a, b), "unchanged galaxy keeps its Arc");
    }

    #[test]
    fn position_is_retained() {
        let mut local = Universe::new();
        let mut g = Galaxy::new("g1", "Support Agent");
        g.position = Some([1.0, 2.0, 3.0]);
        local.insert(g);

        let out = apply(&local, &snapshot(json!({ "g1": { "name": "Renamed" } })));
        let g = out.universe.get("g1").unwrap();
        assert_eq!(g.position, Some([1.0, 2.0, 3.0]));
        assert_eq!(g.name, "Renamed");

        // A server-sent position never overrides the local one either.
        let out = apply(&out.universe, &base_update());
        assert_eq!(out.universe.get("g1").unwrap().position, Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn new_galaxy_takes_incoming_position() {
        let out = apply(&Universe::new(), &base_update());
        let g = out.universe.get("g1").unwrap();
        assert_eq!(g.position, Some([9.0, 9.0, 9.0]));
        assert_eq!(g.status, GalaxyStatus::Idle);
        assert_eq!(out.changed_planets, vec![PlanetKey::new("g1", "p1")]);
    }

    #[test]
    fn trace_history_is_additive() {
        let first = apply(&Universe::new(), &base_update());
        let update = snapshot(json!({
            "g1": { "planets": [{
                "id": "p1",
                "traceHistory": [
                    { "id": "t2", "evaluation": { "score": 0.95 } },
                    { "id": "t3", "evaluation": { "score": 0.1 } }
                ]
            }]}
        }));
        let out = apply(&first.universe, &update);
        let p = out.universe.planet("g1", "p1").unwrap();

        let ids: Vec<&str> = p.trace_history.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["t1", "t2", "t3"]);
        assert_eq!(p.trace_history.get("t2").unwrap().score(), 0.95);
        // Fields missing from the planet patch survive.
        assert_eq!(p.name, "Intent");
        assert_eq!(p.deployed_version.as_ref().unwrap().id, "v1");
        assert_eq!(out.changed_planets, vec![PlanetKey::new("g1", "p1")]);
    }

    #[test]
    fn local_only_planets_are_kept() {
        let first = apply(&Universe::new(), &base_update());
        let update = snapshot(json!({
            "g1": { "planets": [{ "id": "p2", "name": "Retriever" }] }
        }));
        let out = apply(&first.universe, &update);
        let g = out.universe.get("g1").unwrap();
        let ids: Vec<&str> = g.planets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2"]);
    }

    #[test]
    fn status_only_change_does_not_trigger_ranking() {
        let first = apply(&Universe::new(), &base_update());
        let update = snapshot(json!({
            "g1": { "planets": [{ "id": "p1", "status": "inactive" }] }
        }));
        let out = apply(&first.universe, &update);
        assert!(out.changed_planets.is_empty());
        assert_eq!(
            out.universe.planet("g1", "p1").unwrap().status,
            PlanetStatus::Inactive
        );
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let update = snapshot(json!({
            "bad": 42,
            "liar": { "id": "someone-else" },
            "g1": {
                "position": "north",
                "planets": [
                    { "name": "no id" },
                    { "id": "p1", "traceHistory": [ { "text": "no id" }, { "id": "t1" } ] }
                ]
            }
        }));
        let out = apply(&Universe::new(), &update);

        assert!(!out.universe.contains("bad"));
        assert!(!out.universe.contains("liar"));
        let g = out.universe.get("g1").unwrap();
        assert_eq!(g.position, None);
        assert_eq!(g.planets.len(), 1);
        assert_eq!(g.planet("p1").unwrap().trace_history.len(), 1);
        assert_eq!(out.warnings.len(), 5);
        assert!(out
            .warnings
            .iter()
            .any(|w| matches!(w, MergeWarning::InvalidTrace { index: 0, .. })));
    }
}
