//! Session reducer: the single owner of dashboard state.
//!
//! [`Dashboard::ingest`] folds feed messages into the universe, recomputes the
//! leaderboards of planets whose ranking inputs changed and drives the
//! highlight tracker. User edits go through [`Dashboard::begin`], which
//! applies them optimistically and keeps what is needed to undo them until
//! the control API answers ([`Dashboard::confirm`] / [`Dashboard::rollback`]).

use crate::highlight::{HighlightEvent, HighlightTracker};
use crate::leaderboard::{compute_top, LeaderboardEntry, DEFAULT_TOP_K};
use crate::merge::{self, MergeWarning};
use crate::model::{
    Galaxy, GalaxyId, MetricMapping, PlanetId, PlanetKey, PlanetStatus, Position, Universe,
    Variant, VariantId,
};
use crate::protocol::FeedMessage;
use crate::view::{clean_mapping, MappingError};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_OPTIMIZER: &str = "Few-shot Bayesian";
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("unknown galaxy `{0}`")]
    UnknownGalaxy(GalaxyId),
    #[error("unknown planet `{galaxy_id}/{planet_id}`")]
    UnknownPlanet {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
    },
    #[error("unknown variant `{variant_id}` on planet `{galaxy_id}/{planet_id}`")]
    UnknownVariant {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        variant_id: VariantId,
    },
    #[error("no pending change with ticket {0}")]
    UnknownTicket(u64),
    #[error("invalid metric mapping: {0}")]
    InvalidMapping(#[from] MappingError),
    #[error("score threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
}

/// Per-planet optimizer choice. Client-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub optimizer: String,
    pub score_threshold: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            optimizer: DEFAULT_OPTIMIZER.to_string(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

/// What [`Dashboard::ingest`] did with one message.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub warnings: Vec<MergeWarning>,
    /// Planets whose leaderboard was recomputed.
    pub recomputed: Vec<PlanetKey>,
    pub highlights: Vec<(PlanetKey, HighlightEvent)>,
    /// Status line carried by the message, if any.
    pub status: Option<String>,
    /// Error reported by the server, if any.
    pub error: Option<String>,
}

/// An edit applied locally before the server has accepted it.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    MoveGalaxy {
        galaxy_id: GalaxyId,
        position: Position,
    },
    SetPlanetStatus {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        status: PlanetStatus,
    },
    SetMetricMapping {
        galaxy_id: GalaxyId,
        mapping: MetricMapping,
    },
    MarkOptimizing {
        planet_id: PlanetId,
        optimizing: bool,
    },
    DeleteGalaxy {
        galaxy_id: GalaxyId,
    },
}

/// Handle of a pending [`LocalChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Pre-request value of whatever a [`LocalChange`] touched.
#[derive(Debug, Clone)]
enum Undo {
    Position {
        galaxy_id: GalaxyId,
        previous: Option<Position>,
    },
    PlanetStatus {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        previous: PlanetStatus,
    },
    MetricMapping {
        galaxy_id: GalaxyId,
        previous: Option<MetricMapping>,
    },
    Optimizing {
        planet_id: PlanetId,
        was: bool,
        wanted: bool,
    },
    Galaxy(Arc<Galaxy>),
}

#[derive(Debug)]
pub struct Dashboard {
    universe: Arc<Universe>,
    optimizing: Arc<BTreeSet<PlanetId>>,
    optimizer_settings: HashMap<PlanetKey, OptimizerSettings>,
    leaderboards: HashMap<PlanetKey, Arc<Vec<LeaderboardEntry>>>,
    highlights: HighlightTracker,
    status: String,
    top_k: usize,
    pending: HashMap<Ticket, Undo>,
    next_ticket: u64,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K, HighlightTracker::default())
    }
}

impl Dashboard {
    pub fn new(top_k: usize, highlights: HighlightTracker) -> Self {
        Self {
            universe: Arc::new(Universe::new()),
            optimizing: Arc::new(BTreeSet::new()),
            optimizer_settings: HashMap::new(),
            leaderboards: HashMap::new(),
            highlights,
            status: "Connecting...".to_string(),
            top_k: top_k.max(1),
            pending: HashMap::new(),
            next_ticket: 1,
        }
    }

    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    pub fn optimizing(&self) -> &Arc<BTreeSet<PlanetId>> {
        &self.optimizing
    }

    pub fn is_optimizing(&self, planet_id: &str) -> bool {
        self.optimizing.contains(planet_id)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn highlights(&self) -> &HighlightTracker {
        &self.highlights
    }

    pub fn leaderboard(&self, key: &PlanetKey) -> Option<Arc<Vec<LeaderboardEntry>>> {
        self.leaderboards.get(key).cloned()
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    /// Expire highlights. Call on every read or render tick.
    pub fn sweep(&mut self, now: Instant) {
        self.highlights.sweep(now);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Feed
    // ═══════════════════════════════════════════════════════════════════════

    pub fn ingest(&mut self, message: FeedMessage, now: Instant) -> IngestReport {
        let mut report = IngestReport::default();
        match message {
            FeedMessage::Update { payload } => {
                if let Some(galaxies) = payload.galaxies {
                    self.merge(&galaxies, now, &mut report);
                }
                if let Some(ids) = payload.optimizing_planets {
                    self.optimizing = Arc::new(ids.into_iter().collect());
                    self.reapply_pending_optimizing();
                }
            }
            FeedMessage::Init { payload } => self.merge(&payload, now, &mut report),
            FeedMessage::Status { message } => {
                self.status = message.clone();
                report.status = Some(message);
            }
            FeedMessage::Error { message } => {
                self.status = format!("Error: {message}");
                report.error = Some(message);
            }
        }
        report
    }

    fn merge(&mut self, incoming: &Map<String, Value>, now: Instant, report: &mut IngestReport) {
        let outcome = merge::apply(&self.universe, incoming);
        self.universe = Arc::new(outcome.universe);
        report.warnings = outcome.warnings;

        for key in outcome.changed_planets {
            let events = self.recompute(&key, now);
            report
                .highlights
                .extend(events.into_iter().map(|ev| (key.clone(), ev)));
            report.recomputed.push(key);
        }
    }

    /// Keep in-flight start/stop requests visible over a server-sent set.
    fn reapply_pending_optimizing(&mut self) {
        let mut pending: Vec<(Ticket, &PlanetId, bool)> = self
            .pending
            .iter()
            .filter_map(|(ticket, undo)| match undo {
                Undo::Optimizing {
                    planet_id, wanted, ..
                } => Some((*ticket, planet_id, *wanted)),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return;
        }
        pending.sort_by_key(|(ticket, _, _)| ticket.0);

        let set = Arc::make_mut(&mut self.optimizing);
        for (_, planet_id, wanted) in pending {
            if wanted {
                set.insert(planet_id.clone());
            } else {
                set.remove(planet_id);
            }
        }
    }

    fn recompute(&mut self, key: &PlanetKey, now: Instant) -> Vec<HighlightEvent> {
        let Some(planet) = self.universe.planet(&key.galaxy_id, &key.planet_id) else {
            self.leaderboards.remove(key);
            self.highlights.forget(key);
            return Vec::new();
        };
        let entries = compute_top(planet, self.top_k);
        let events = self.highlights.observe(key, &entries, now);
        self.leaderboards.insert(key.clone(), Arc::new(entries));
        events
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Local edits
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a locally produced trace and rank it immediately.
    pub fn add_trace(
        &mut self,
        galaxy_id: &str,
        planet_id: &str,
        variant: Variant,
        now: Instant,
    ) -> Result<Vec<HighlightEvent>, SessionError> {
        let universe = Arc::make_mut(&mut self.universe);
        if !universe.add_trace(galaxy_id, planet_id, variant) {
            return Err(self.missing(galaxy_id, planet_id));
        }
        Ok(self.recompute(&PlanetKey::new(galaxy_id, planet_id), now))
    }

    /// Variant to send with a `deploy_variant` message.
    pub fn deployable(
        &self,
        galaxy_id: &str,
        planet_id: &str,
        variant_id: &str,
    ) -> Result<Variant, SessionError> {
        let planet = self
            .universe
            .planet(galaxy_id, planet_id)
            .ok_or_else(|| self.missing(galaxy_id, planet_id))?;
        planet
            .variant(variant_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownVariant {
                galaxy_id: galaxy_id.to_string(),
                planet_id: planet_id.to_string(),
                variant_id: variant_id.to_string(),
            })
    }

    pub fn optimizer_settings(&self, key: &PlanetKey) -> OptimizerSettings {
        self.optimizer_settings.get(key).cloned().unwrap_or_default()
    }

    /// Change the optimizer used by the next start request. `None` keeps the current value.
    pub fn set_optimizer(
        &mut self,
        key: &PlanetKey,
        optimizer: Option<String>,
        score_threshold: Option<f64>,
    ) -> Result<OptimizerSettings, SessionError> {
        if self.universe.planet(&key.galaxy_id, &key.planet_id).is_none() {
            return Err(self.missing(&key.galaxy_id, &key.planet_id));
        }
        if let Some(t) = score_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(SessionError::InvalidThreshold(t));
            }
        }
        let settings = self.optimizer_settings.entry(key.clone()).or_default();
        if let Some(o) = optimizer.filter(|o| !o.trim().is_empty()) {
            settings.optimizer = o;
        }
        if let Some(t) = score_threshold {
            settings.score_threshold = t;
        }
        Ok(settings.clone())
    }

    /// Apply a change optimistically and remember how to undo it.
    pub fn begin(&mut self, change: LocalChange) -> Result<Ticket, SessionError> {
        let undo = match change {
            LocalChange::MoveGalaxy {
                galaxy_id,
                position,
            } => {
                let previous = self.galaxy(&galaxy_id)?.position;
                Arc::make_mut(&mut self.universe)
                    .update_galaxy(&galaxy_id, |g| g.position = Some(position));
                Undo::Position {
                    galaxy_id,
                    previous,
                }
            }
            LocalChange::SetPlanetStatus {
                galaxy_id,
                planet_id,
                status,
            } => {
                let previous = self
                    .universe
                    .planet(&galaxy_id, &planet_id)
                    .ok_or_else(|| self.missing(&galaxy_id, &planet_id))?
                    .status
                    .clone();
                Arc::make_mut(&mut self.universe)
                    .update_planet(&galaxy_id, &planet_id, |p| p.status = status);
                Undo::PlanetStatus {
                    galaxy_id,
                    planet_id,
                    previous,
                }
            }
            LocalChange::SetMetricMapping { galaxy_id, mapping } => {
                let mapping = clean_mapping(&mapping)?;
                let previous = self.galaxy(&galaxy_id)?.config.metric_mapping.clone();
                Arc::make_mut(&mut self.universe).update_galaxy(&galaxy_id, |g| {
                    g.config.metric_mapping = Some(mapping)
                });
                Undo::MetricMapping {
                    galaxy_id,
                    previous,
                }
            }
            LocalChange::MarkOptimizing {
                planet_id,
                optimizing,
            } => {
                let set = Arc::make_mut(&mut self.optimizing);
                let was = set.contains(&planet_id);
                if optimizing {
                    set.insert(planet_id.clone());
                } else {
                    set.remove(&planet_id);
                }
                Undo::Optimizing {
                    planet_id,
                    was,
                    wanted: optimizing,
                }
            }
            LocalChange::DeleteGalaxy { galaxy_id } => {
                let removed = Arc::make_mut(&mut self.universe)
                    .remove_galaxy(&galaxy_id)
                    .ok_or_else(|| SessionError::UnknownGalaxy(galaxy_id.clone()))?;
                for planet in &removed.planets {
                    let key = PlanetKey::new(galaxy_id.clone(), planet.id.clone());
                    self.leaderboards.remove(&key);
                    self.highlights.forget(&key);
                }
                Undo::Galaxy(removed)
            }
        };

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.insert(ticket, undo);
        Ok(ticket)
    }

    /// The server accepted the change: keep it.
    pub fn confirm(&mut self, ticket: Ticket) -> Result<(), SessionError> {
        self.pending
            .remove(&ticket)
            .map(|_| ())
            .ok_or(SessionError::UnknownTicket(ticket.0))
    }

    /// The server rejected the change: restore the pre-request value.
    ///
    /// Values the feed has overwritten in the meantime are restored as well;
    /// the next update corrects them if the server disagrees.
    pub fn rollback(&mut self, ticket: Ticket, now: Instant) -> Result<(), SessionError> {
        let undo = self
            .pending
            .remove(&ticket)
            .ok_or(SessionError::UnknownTicket(ticket.0))?;

        match undo {
            Undo::Position {
                galaxy_id,
                previous,
            } => {
                Arc::make_mut(&mut self.universe)
                    .update_galaxy(&galaxy_id, |g| g.position = previous);
            }
            Undo::PlanetStatus {
                galaxy_id,
                planet_id,
                previous,
            } => {
                Arc::make_mut(&mut self.universe)
                    .update_planet(&galaxy_id, &planet_id, |p| p.status = previous);
            }
            Undo::MetricMapping {
                galaxy_id,
                previous,
            } => {
                Arc::make_mut(&mut self.universe)
                    .update_galaxy(&galaxy_id, |g| g.config.metric_mapping = previous);
            }
            Undo::Optimizing { planet_id, was, .. } => {
                let set = Arc::make_mut(&mut self.optimizing);
                if was {
                    set.insert(planet_id);
                } else {
                    set.remove(&planet_id);
                }
            }
            Undo::Galaxy(galaxy) => {
                if !self.universe.contains(&galaxy.id) {
                    let keys: Vec<PlanetKey> = galaxy
                        .planets
                        .iter()
                        .map(|p| PlanetKey::new(galaxy.id.clone(), p.id.clone()))
                        .collect();
                    Arc::make_mut(&mut self.universe).insert(galaxy);
                    for key in keys {
                        self.recompute(&key, now);
                    }
                }
            }
        }
        Ok(())
    }

    fn galaxy(&self, galaxy_id: &str) -> Result<&Arc<Galaxy>, SessionError> {
        self.universe
            .get(galaxy_id)
            .ok_or_else(|| SessionError::UnknownGalaxy(galaxy_id.to_string()))
    }

    fn missing(&self, galaxy_id: &str, planet_id: &str) -> SessionError {
        if self.universe.contains(galaxy_id) {
            SessionError::UnknownPlanet {
                galaxy_id: galaxy_id.to_string(),
                planet_id: planet_id.to_string(),
            }
        } else {
            SessionError::UnknownGalaxy(galaxy_id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::HighlightKind;
    use crate::protocol::parse_feed_message;
    use serde_json::json;
    use std::time::Duration;

    fn update(payload: serde_json::Value) -> FeedMessage {
        parse_feed_message(&json!({"type": "update", "payload": payload}).to_string()).unwrap()
    }

    fn seeded() -> (Dashboard, Instant) {
        let mut d = Dashboard::default();
        let t0 = Instant::now();
        let init = parse_feed_message(
            &json!({
                "type": "init",
                "payload": {
                    "g1": {
                        "name": "Support",
                        "status": "idle",
                        "position": [0, 0, 0],
                        "planets": [{
                            "id": "p1",
                            "name": "Greeting",
                            "status": "active",
                            "deployedVersion": {"id": "v1", "evaluation": {"score": 0.7}},
                            "traceHistory": [
                                {"id": "v1", "evaluation": {"score": 0.7}},
                                {"id": "v2", "evaluation": {"score": 0.5}}
                            ]
                        }]
                    }
                }
            })
            .to_string(),
        )
        .unwrap();
        d.ingest(init, t0);
        (d, t0)
    }

    fn key() -> PlanetKey {
        PlanetKey::new("g1", "p1")
    }

    fn ids(d: &Dashboard) -> Vec<String> {
        d.leaderboard(&key())
            .map(|b| b.iter().map(|e| e.variant.id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn init_builds_leaderboards() {
        let (d, _) = seeded();
        assert_eq!(ids(&d), ["v1", "v2"]);
        assert!(d.leaderboard(&key()).unwrap()[0].is_deployed);
    }

    #[test]
    fn update_recomputes_and_flags_new_leader() {
        let (mut d, t0) = seeded();
        let t1 = t0 + Duration::from_secs(2);
        let report = d.ingest(
            update(json!({
                "galaxies": {"g1": {"planets": [{"id": "p1", "traceHistory": [
                    {"id": "v3", "evaluation": {"score": 0.9}}
                ]}]}},
                "optimizing_planets": ["p1"]
            })),
            t1,
        );

        assert_eq!(report.recomputed, [key()]);
        assert_eq!(ids(&d), ["v3", "v1", "v2"]);
        assert!(d.is_optimizing("p1"));
        let flagged: Vec<_> = report
            .highlights
            .iter()
            .map(|(_, ev)| (ev.variant_id.as_str(), ev.kind))
            .collect();
        assert_eq!(
            flagged,
            [("v3", HighlightKind::NewEntry), ("v3", HighlightKind::NewLeader)]
        );
    }

    #[test]
    fn status_only_update_keeps_leaderboard_arc() {
        let (mut d, t0) = seeded();
        let before = d.leaderboard(&key()).unwrap();
        let report = d.ingest(
            update(json!({"galaxies": {"g1": {"status": "optimizing"}}})),
            t0,
        );
        assert!(report.recomputed.is_empty());
        assert!(Arc::ptr_eq(&before, &d.leaderboard(&key()).unwrap()));
    }

    #[test]
    fn status_and_error_messages_update_status_line() {
        let (mut d, t0) = seeded();
        d.ingest(FeedMessage::Status { message: "Promoted".to_string() }, t0);
        assert_eq!(d.status(), "Promoted");
        let report = d.ingest(FeedMessage::Error { message: "bad".to_string() }, t0);
        assert_eq!(report.error.as_deref(), Some("bad"));
        assert_eq!(d.status(), "Error: bad");
    }

    #[test]
    fn rollback_restores_pre_request_status() {
        let (mut d, t0) = seeded();
        let ticket = d
            .begin(LocalChange::SetPlanetStatus {
                galaxy_id: "g1".to_string(),
                planet_id: "p1".to_string(),
                status: PlanetStatus::Inactive,
            })
            .unwrap();
        assert_eq!(d.universe().planet("g1", "p1").unwrap().status, PlanetStatus::Inactive);

        d.rollback(ticket, t0).unwrap();
        assert_eq!(d.universe().planet("g1", "p1").unwrap().status, PlanetStatus::Active);
        assert_eq!(d.pending_changes(), 0);
        assert_eq!(d.rollback(ticket, t0), Err(SessionError::UnknownTicket(ticket.id())));
    }

    #[test]
    fn confirmed_move_survives_updates() {
        let (mut d, t0) = seeded();
        let ticket = d
            .begin(LocalChange::MoveGalaxy {
                galaxy_id: "g1".to_string(),
                position: [5.0, 1.0, -2.0],
            })
            .unwrap();
        d.confirm(ticket).unwrap();
        d.ingest(update(json!({"galaxies": {"g1": {"position": [9, 9, 9]}}})), t0);
        assert_eq!(d.universe().get("g1").unwrap().position, Some([5.0, 1.0, -2.0]));
    }

    #[test]
    fn optimizing_flag_rolls_back() {
        let (mut d, t0) = seeded();
        let ticket = d
            .begin(LocalChange::MarkOptimizing {
                planet_id: "p1".to_string(),
                optimizing: true,
            })
            .unwrap();
        assert!(d.is_optimizing("p1"));
        d.rollback(ticket, t0).unwrap();
        assert!(!d.is_optimizing("p1"));
    }

    #[test]
    fn pending_optimizing_flag_survives_server_set() {
        let (mut d, t0) = seeded();
        let ticket = d
            .begin(LocalChange::MarkOptimizing {
                planet_id: "p1".to_string(),
                optimizing: true,
            })
            .unwrap();
        d.ingest(update(json!({"galaxies": {}, "optimizing_planets": []})), t0);
        assert!(d.is_optimizing("p1"));

        d.confirm(ticket).unwrap();
        assert!(d.is_optimizing("p1"));

        // Once confirmed, the server set is authoritative again.
        d.ingest(update(json!({"galaxies": {}, "optimizing_planets": []})), t0);
        assert!(!d.is_optimizing("p1"));
    }

    #[test]
    fn pending_stop_survives_server_set() {
        let (mut d, t0) = seeded();
        d.ingest(update(json!({"galaxies": {}, "optimizing_planets": ["p1", "p2"]})), t0);
        let ticket = d
            .begin(LocalChange::MarkOptimizing {
                planet_id: "p1".to_string(),
                optimizing: false,
            })
            .unwrap();
        d.ingest(update(json!({"galaxies": {}, "optimizing_planets": ["p1", "p2"]})), t0);
        assert!(!d.is_optimizing("p1"));
        assert!(d.is_optimizing("p2"));

        d.rollback(ticket, t0).unwrap();
        assert!(d.is_optimizing("p1"));
    }

    #[test]
    fn delete_and_restore_galaxy() {
        let (mut d, t0) = seeded();
        let ticket = d
            .begin(LocalChange::DeleteGalaxy {
                galaxy_id: "g1".to_string(),
            })
            .unwrap();
        assert!(d.universe().is_empty());
        assert!(d.leaderboard(&key()).is_none());

        d.rollback(ticket, t0).unwrap();
        assert!(d.universe().contains("g1"));
        assert_eq!(ids(&d), ["v1", "v2"]);
    }

    #[test]
    fn metric_mapping_is_cleaned_and_validated() {
        let (mut d, _) = seeded();
        let mut mapping = MetricMapping::new();
        mapping.insert("planetSpeed".to_string(), "speed".to_string());
        mapping.insert("planetSize".to_string(), String::new());
        d.begin(LocalChange::SetMetricMapping {
            galaxy_id: "g1".to_string(),
            mapping,
        })
        .unwrap();
        let stored = d.universe().get("g1").unwrap().config.metric_mapping.clone().unwrap();
        assert_eq!(stored.len(), 1);

        let mut bad = MetricMapping::new();
        bad.insert("glow".to_string(), "score".to_string());
        assert!(matches!(
            d.begin(LocalChange::SetMetricMapping {
                galaxy_id: "g1".to_string(),
                mapping: bad
            }),
            Err(SessionError::InvalidMapping(_))
        ));
    }

    #[test]
    fn add_trace_and_deployable_lookup() {
        let (mut d, t0) = seeded();
        let events = d
            .add_trace("g1", "p1", Variant::scored("local", 0.2), t0)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(ids(&d), ["v1", "v2", "local"]);

        assert_eq!(d.deployable("g1", "p1", "local").unwrap().id, "local");
        assert!(matches!(
            d.deployable("g1", "p1", "nope"),
            Err(SessionError::UnknownVariant { .. })
        ));
        assert_eq!(
            d.add_trace("gx", "p1", Variant::scored("x", 0.1), t0),
            Err(SessionError::UnknownGalaxy("gx".to_string()))
        );
    }

    #[test]
    fn optimizer_settings_default_and_update() {
        let (mut d, _) = seeded();
        assert_eq!(d.optimizer_settings(&key()), OptimizerSettings::default());
        let s = d
            .set_optimizer(&key(), Some("MIPRO".to_string()), Some(0.8))
            .unwrap();
        assert_eq!(s.optimizer, "MIPRO");
        assert_eq!(d.optimizer_settings(&key()).score_threshold, 0.8);
        assert_eq!(
            d.set_optimizer(&key(), None, Some(1.5)),
            Err(SessionError::InvalidThreshold(1.5))
        );
    }
}
