//! Read-only helpers for presentation clients.
//!
//! Nothing here mutates the universe; every function derives a value from a
//! snapshot so the renderer stays a thin consumer.

use crate::model::{Galaxy, GalaxyId, GalaxyStatus, MetricMapping, Planet, Position, Universe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Visual properties a galaxy can map evaluation metrics onto.
pub const VISUAL_PROPERTIES: [&str; 3] = ["planetSize", "planetPosition", "planetSpeed"];

/// Metrics offered for mapping.
pub const AVAILABLE_METRICS: [&str; 8] = [
    "score",
    "factuality",
    "hallucination",
    "speed",
    "toxicity",
    "verbosity",
    "user_sentiment",
    "custom_metric_1",
];

// ═══════════════════════════════════════════════════════════════════════════
// Health
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanetHealth {
    Good,
    Medium,
    Poor,
}

/// Health of the deployed version; `None` when it has no score.
pub fn planet_health(planet: &Planet) -> Option<PlanetHealth> {
    let score = planet.deployed_version.as_ref()?.raw_score()?;
    Some(if score >= 0.8 {
        PlanetHealth::Good
    } else if score >= 0.6 {
        PlanetHealth::Medium
    } else {
        PlanetHealth::Poor
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthFilter {
    #[default]
    All,
    Good,
    Medium,
    Poor,
}

impl HealthFilter {
    pub fn matches(self, health: Option<PlanetHealth>) -> bool {
        match self {
            HealthFilter::All => true,
            HealthFilter::Good => health == Some(PlanetHealth::Good),
            HealthFilter::Medium => health == Some(PlanetHealth::Medium),
            HealthFilter::Poor => health == Some(PlanetHealth::Poor),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Filtering
// ═══════════════════════════════════════════════════════════════════════════

/// A galaxy with only the planets that pass the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalaxyView {
    pub id: GalaxyId,
    pub name: String,
    pub status: GalaxyStatus,
    pub position: Option<Position>,
    pub planets: Vec<Arc<Planet>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewFilter {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub health: HealthFilter,
}

impl ViewFilter {
    pub fn new(search: impl Into<String>, health: HealthFilter) -> Self {
        Self {
            search: search.into(),
            health,
        }
    }
}

/// Apply search and health filters.
///
/// The health filter always narrows the planet list. A search term keeps a
/// galaxy whose name matches with all of its (health-filtered) planets;
/// otherwise only planets whose name matches survive, and the galaxy is shown
/// only if one does. Matching is case-insensitive substring.
pub fn filter_galaxies(universe: &Universe, filter: &ViewFilter) -> Vec<GalaxyView> {
    let needle = filter.search.to_lowercase();
    universe
        .sorted()
        .into_iter()
        .filter_map(|g| filter_galaxy(g, &needle, filter.health))
        .collect()
}

fn filter_galaxy(galaxy: &Galaxy, needle: &str, health: HealthFilter) -> Option<GalaxyView> {
    let name_matches = galaxy.name.to_lowercase().contains(needle);
    let planets: Vec<Arc<Planet>> = galaxy
        .planets
        .iter()
        .filter(|p| health.matches(planet_health(p)))
        .filter(|p| needle.is_empty() || name_matches || p.name.to_lowercase().contains(needle))
        .cloned()
        .collect();

    if needle.is_empty() || name_matches || !planets.is_empty() {
        Some(GalaxyView {
            id: galaxy.id.clone(),
            name: galaxy.name.clone(),
            status: galaxy.status,
            position: galaxy.position,
            planets,
        })
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Metric mapping
// ═══════════════════════════════════════════════════════════════════════════

/// Scalars a renderer needs to place and draw a planet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanetScalars {
    pub orbit_radius: f64,
    pub size: f64,
    /// Radians per second; 0 when no speed metric is mapped.
    pub orbital_speed: f64,
    /// Starting angle on the orbit.
    pub phase: f64,
    /// Deployed score below 0.5 (a missing score counts as 0).
    pub critical: bool,
}

/// Derive planet scalars from the deployed version and a metric mapping.
///
/// Mapped metrics are clamped to `[0, 1]`; a mapped metric the evaluation
/// does not carry counts as unmapped.
pub fn planet_scalars(planet: &Planet, mapping: &MetricMapping) -> PlanetScalars {
    let evaluation = planet.deployed_version.as_ref().map(|v| &v.evaluation);
    let mapped = |property: &str| -> Option<f64> {
        let metric = mapping.get(property).filter(|m| !m.is_empty())?;
        evaluation?.metric(metric).map(|x| x.clamp(0.0, 1.0))
    };

    let orbit_radius = match mapped("planetPosition") {
        Some(x) => 10.0 + 30.0 * (1.0 - x),
        None => planet.orbit_radius.unwrap_or(15.0),
    };
    let size = match mapped("planetSize") {
        Some(x) => 0.5 + 2.5 * x,
        None => 0.5 + 2.5 * evaluation.and_then(|e| e.score).unwrap_or(0.5),
    };
    let orbital_speed = if mapping.get("planetSpeed").is_some_and(|m| !m.is_empty()) {
        mapped("planetSpeed").unwrap_or(0.0) * 0.5 + 0.1
    } else {
        0.0
    };
    let score = planet
        .deployed_version
        .as_ref()
        .and_then(|v| v.raw_score())
        .unwrap_or(0.0);

    PlanetScalars {
        orbit_radius,
        size,
        orbital_speed,
        phase: planet.orbit_radius.unwrap_or(0.0),
        critical: score < 0.5,
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("unknown visual property `{0}`")]
    UnknownProperty(String),
}

/// Normalize a user-edited mapping: empty metric names unmap the property.
pub fn clean_mapping(mapping: &MetricMapping) -> Result<MetricMapping, MappingError> {
    let mut out = MetricMapping::new();
    for (property, metric) in mapping {
        if !VISUAL_PROPERTIES.contains(&property.as_str()) {
            return Err(MappingError::UnknownProperty(property.clone()));
        }
        if !metric.is_empty() {
            out.insert(property.clone(), metric.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Evaluation, Variant};

    fn planet(id: &str, name: &str, score: Option<f64>) -> Planet {
        let mut p = Planet::new(id, name);
        p.deployed_version = score.map(|s| Variant::scored(format!("{id}-v"), s));
        p
    }

    fn universe() -> Universe {
        let mut alpha = Galaxy::new("g1", "Support Agent");
        alpha.planets.upsert(Arc::new(planet("p1", "Greeting", Some(0.9))));
        alpha.planets.upsert(Arc::new(planet("p2", "Refunds", Some(0.65))));
        alpha.planets.upsert(Arc::new(planet("p3", "Escalation", Some(0.3))));
        let mut beta = Galaxy::new("g2", "Sales Bot");
        beta.planets.upsert(Arc::new(planet("p4", "Pitch", Some(0.85))));
        beta.planets.upsert(Arc::new(planet("p5", "Unscored", None)));

        let mut u = Universe::new();
        u.insert(alpha);
        u.insert(beta);
        u
    }

    fn planet_ids(views: &[GalaxyView]) -> Vec<(&str, Vec<&str>)> {
        views
            .iter()
            .map(|g| (g.id.as_str(), g.planets.iter().map(|p| p.id.as_str()).collect()))
            .collect()
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(planet_health(&planet("p", "P", Some(0.8))), Some(PlanetHealth::Good));
        assert_eq!(planet_health(&planet("p", "P", Some(0.79))), Some(PlanetHealth::Medium));
        assert_eq!(planet_health(&planet("p", "P", Some(0.6))), Some(PlanetHealth::Medium));
        assert_eq!(planet_health(&planet("p", "P", Some(0.1))), Some(PlanetHealth::Poor));
        assert_eq!(planet_health(&planet("p", "P", None)), None);
    }

    #[test]
    fn no_filter_shows_everything() {
        let views = filter_galaxies(&universe(), &ViewFilter::default());
        assert_eq!(
            planet_ids(&views),
            [("g1", vec!["p1", "p2", "p3"]), ("g2", vec!["p4", "p5"])]
        );
    }

    #[test]
    fn health_filter_keeps_empty_galaxies_without_search() {
        let views = filter_galaxies(&universe(), &ViewFilter::new("", HealthFilter::Poor));
        assert_eq!(planet_ids(&views), [("g1", vec!["p3"]), ("g2", vec![])]);
    }

    #[test]
    fn search_matches_galaxy_or_planet_names() {
        let u = universe();
        let by_galaxy = filter_galaxies(&u, &ViewFilter::new("SALES", HealthFilter::All));
        assert_eq!(planet_ids(&by_galaxy), [("g2", vec!["p4", "p5"])]);

        let by_planet = filter_galaxies(&u, &ViewFilter::new("refu", HealthFilter::All));
        assert_eq!(planet_ids(&by_planet), [("g1", vec!["p2"])]);

        let combined = filter_galaxies(&u, &ViewFilter::new("refu", HealthFilter::Good));
        assert!(combined.is_empty());
    }

    #[test]
    fn scalars_follow_the_default_mapping() {
        let p = planet("p", "P", Some(0.8));
        let s = planet_scalars(&p, &crate::model::GalaxyConfig::default_mapping());
        assert!((s.orbit_radius - 16.0).abs() < 1e-9);
        assert!((s.size - 2.5).abs() < 1e-9);
        assert_eq!(s.orbital_speed, 0.0);
        assert!(!s.critical);
    }

    #[test]
    fn scalars_use_mapped_metrics_and_fallbacks() {
        let mut p = Planet::new("p", "P");
        p.orbit_radius = Some(22.0);
        let mut v = Variant::new("v", "");
        v.evaluation = Evaluation::with_score(0.4);
        v.evaluation.metrics.insert("speed".to_string(), serde_json::json!(1.7));
        p.deployed_version = Some(v);

        let mut mapping = MetricMapping::new();
        mapping.insert("planetSpeed".to_string(), "speed".to_string());
        mapping.insert("planetPosition".to_string(), "factuality".to_string());
        let s = planet_scalars(&p, &mapping);

        // speed is clamped to 1.
        assert!((s.orbital_speed - 0.6).abs() < 1e-9);
        // factuality missing: planet's own radius.
        assert_eq!(s.orbit_radius, 22.0);
        // size unmapped: derived from score.
        assert!((s.size - 1.5).abs() < 1e-9);
        assert_eq!(s.phase, 22.0);
        assert!(s.critical);
    }

    #[test]
    fn clean_mapping_drops_empty_and_rejects_unknown() {
        let mut m = MetricMapping::new();
        m.insert("planetSize".to_string(), "toxicity".to_string());
        m.insert("planetSpeed".to_string(), String::new());
        let cleaned = clean_mapping(&m).unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.get("planetSize").map(String::as_str), Some("toxicity"));

        m.insert("planetColor".to_string(), "score".to_string());
        assert_eq!(
            clean_mapping(&m),
            Err(MappingError::UnknownProperty("planetColor".to_string()))
        );
    }
}
