//! Highlight tracker: identity diffing of successive rankings.
//!
//! Each planet remembers the ids of its previous ranking. When a new ranking
//! arrives, ids that were absent before are flagged `NewEntry`; a change of
//! the rank-1 id is flagged `NewLeader`. Flags are plain records with a start
//! instant and are removed by [`HighlightTracker::sweep`] once the decay
//! window has passed, so no timers are involved and nothing can stack.

use crate::leaderboard::LeaderboardEntry;
use crate::model::{PlanetKey, VariantId};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const HIGHLIGHT_DECAY: Duration = Duration::from_secs(1);

/// `NewLeader` orders above `NewEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightKind {
    NewEntry,
    NewLeader,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightEvent {
    pub variant_id: VariantId,
    pub kind: HighlightKind,
    pub started_at: Instant,
}

/// What counts as a leadership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderPolicy {
    /// Any change of the rank-1 id, including an existing entry overtaking.
    #[default]
    AnyLeaderChange,
    /// Only a previously unseen id reaching rank 1.
    NewEntriesOnly,
}

/// Diff a ranking against the ids of the previous one.
///
/// An empty `previous` means every current entry is new.
pub fn diff(
    previous: &[VariantId],
    current: &[LeaderboardEntry],
    now: Instant,
    policy: LeaderPolicy,
) -> Vec<HighlightEvent> {
    let seen: HashSet<&str> = previous.iter().map(String::as_str).collect();
    let previous_leader = previous.first().map(String::as_str);

    let mut events = Vec::new();
    for entry in current {
        let id = entry.variant.id.as_str();
        let is_new = !seen.contains(id);
        let took_lead = entry.rank == 1 && previous_leader != Some(id);

        let new_leader = took_lead
            && match policy {
                LeaderPolicy::AnyLeaderChange => is_new || !previous.is_empty(),
                LeaderPolicy::NewEntriesOnly => is_new,
            };

        // A new id reaching rank 1 is both a new entry and a new leader.
        let kinds = [
            (is_new, HighlightKind::NewEntry),
            (new_leader, HighlightKind::NewLeader),
        ];
        for (_, kind) in kinds.into_iter().filter(|(flagged, _)| *flagged) {
            events.push(HighlightEvent {
                variant_id: entry.variant.id.clone(),
                kind,
                started_at: now,
            });
        }
    }
    events
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highlight {
    /// Strongest flag of the record.
    pub kind: HighlightKind,
    /// Set when the id was also flagged as a new entry.
    pub new_entry: bool,
    pub started_at: Instant,
}

#[derive(Debug, Default)]
struct PlanetHighlights {
    previous: Vec<VariantId>,
    active: HashMap<VariantId, Highlight>,
    last_diff_at: Option<Instant>,
}

#[derive(Debug)]
pub struct HighlightTracker {
    decay: Duration,
    policy: LeaderPolicy,
    planets: HashMap<PlanetKey, PlanetHighlights>,
}

impl Default for HighlightTracker {
    fn default() -> Self {
        Self::new(HIGHLIGHT_DECAY, LeaderPolicy::default())
    }
}

impl HighlightTracker {
    pub fn new(decay: Duration, policy: LeaderPolicy) -> Self {
        Self {
            decay,
            policy,
            planets: HashMap::new(),
        }
    }

    pub fn decay(&self) -> Duration {
        self.decay
    }

    pub fn policy(&self) -> LeaderPolicy {
        self.policy
    }

    /// Record a freshly computed ranking and flag what changed.
    pub fn observe(
        &mut self,
        planet: &PlanetKey,
        entries: &[LeaderboardEntry],
        now: Instant,
    ) -> Vec<HighlightEvent> {
        let state = self.planets.entry(planet.clone()).or_default();
        let events = diff(&state.previous, entries, now, self.policy);

        for ev in &events {
            let is_entry = ev.kind == HighlightKind::NewEntry;
            let (kind, new_entry) = match state.active.get(&ev.variant_id) {
                // Same batch only; a later flag restarts the record.
                Some(h) if h.started_at == now => (h.kind.max(ev.kind), h.new_entry || is_entry),
                _ => (ev.kind, is_entry),
            };
            state.active.insert(
                ev.variant_id.clone(),
                Highlight {
                    kind,
                    new_entry,
                    started_at: now,
                },
            );
        }
        state.previous = entries.iter().map(|e| e.variant.id.clone()).collect();
        state.last_diff_at = Some(now);
        events
    }

    /// Drop records older than the decay window.
    pub fn sweep(&mut self, now: Instant) {
        let decay = self.decay;
        for state in self.planets.values_mut() {
            if state
                .last_diff_at
                .is_some_and(|t| now.saturating_duration_since(t) >= decay)
            {
                state.active.clear();
                continue;
            }
            state
                .active
                .retain(|_, h| now.saturating_duration_since(h.started_at) < decay);
        }
    }

    pub fn highlight(&self, planet: &PlanetKey, variant_id: &str) -> Option<Highlight> {
        self.planets.get(planet)?.active.get(variant_id).copied()
    }

    /// Remaining strength of a highlight: 1 when it starts, 0 once decayed.
    pub fn intensity(&self, planet: &PlanetKey, variant_id: &str, now: Instant) -> f64 {
        let Some(h) = self.highlight(planet, variant_id) else {
            return 0.0;
        };
        if self.decay.is_zero() {
            return 0.0;
        }
        let elapsed = now.saturating_duration_since(h.started_at).as_secs_f64();
        (1.0 - elapsed / self.decay.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Active highlights of one planet, ordered by variant id.
    pub fn highlights(&self, planet: &PlanetKey) -> Vec<(VariantId, Highlight)> {
        let mut out: Vec<(VariantId, Highlight)> = self
            .planets
            .get(planet)
            .map(|s| s.active.iter().map(|(id, h)| (id.clone(), *h)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn has_active(&self) -> bool {
        self.planets.values().any(|s| !s.active.is_empty())
    }

    /// Forget everything about a planet (deleted galaxy, removed planet).
    pub fn forget(&mut self, planet: &PlanetKey) {
        self.planets.remove(planet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Variant;

    fn board(ids: &[&str]) -> Vec<LeaderboardEntry> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| LeaderboardEntry {
                variant: Variant::new(*id, ""),
                rank: i + 1,
                is_deployed: false,
            })
            .collect()
    }

    fn ids(v: &[&str]) -> Vec<VariantId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn flagged(events: &[HighlightEvent]) -> Vec<(&str, HighlightKind)> {
        events.iter().map(|e| (e.variant_id.as_str(), e.kind)).collect()
    }

    #[test]
    fn new_entry_is_flagged_by_identity() {
        let now = Instant::now();
        let events = diff(&ids(&["a", "b", "c"]), &board(&["a", "d", "c"]), now, LeaderPolicy::default());
        assert_eq!(flagged(&events), [("d", HighlightKind::NewEntry)]);
    }

    #[test]
    fn new_leader_is_flagged() {
        let now = Instant::now();
        for policy in [LeaderPolicy::NewEntriesOnly, LeaderPolicy::AnyLeaderChange] {
            let events = diff(&ids(&["a", "b", "c"]), &board(&["d", "a", "b"]), now, policy);
            assert_eq!(
                flagged(&events),
                [("d", HighlightKind::NewEntry), ("d", HighlightKind::NewLeader)]
            );
        }
    }

    #[test]
    fn new_leader_record_keeps_the_new_entry_flag() {
        let key = PlanetKey::new("g", "p");
        let mut t = HighlightTracker::default();
        let t0 = Instant::now();
        t.observe(&key, &board(&["a", "b"]), t0);

        let t1 = t0 + Duration::from_secs(2);
        t.sweep(t1);
        t.observe(&key, &board(&["d", "a", "b"]), t1);
        let d = t.highlight(&key, "d").unwrap();
        assert_eq!(d.kind, HighlightKind::NewLeader);
        assert!(d.new_entry);

        // An existing entry overtaking is a leader but not a new entry.
        let t2 = t1 + Duration::from_secs(2);
        t.sweep(t2);
        t.observe(&key, &board(&["a", "d", "b"]), t2);
        let a = t.highlight(&key, "a").unwrap();
        assert_eq!(a.kind, HighlightKind::NewLeader);
        assert!(!a.new_entry);
    }

    #[test]
    fn unchanged_leader_is_not_a_new_leader() {
        let now = Instant::now();
        let events = diff(&ids(&["a", "b"]), &board(&["a", "b", "c"]), now, LeaderPolicy::default());
        assert_eq!(flagged(&events), [("c", HighlightKind::NewEntry)]);
    }

    #[test]
    fn overtaking_depends_on_policy() {
        let now = Instant::now();
        let prev = ids(&["a", "b"]);
        let cur = board(&["b", "a"]);
        assert_eq!(
            flagged(&diff(&prev, &cur, now, LeaderPolicy::AnyLeaderChange)),
            [("b", HighlightKind::NewLeader)]
        );
        assert!(diff(&prev, &cur, now, LeaderPolicy::NewEntriesOnly).is_empty());
    }

    #[test]
    fn first_observation_flags_everything() {
        let now = Instant::now();
        let events = diff(&[], &board(&["a", "b"]), now, LeaderPolicy::default());
        assert_eq!(
            flagged(&events),
            [
                ("a", HighlightKind::NewEntry),
                ("a", HighlightKind::NewLeader),
                ("b", HighlightKind::NewEntry)
            ]
        );
    }

    #[test]
    fn reflag_restarts_instead_of_stacking() {
        let key = PlanetKey::new("g", "p");
        let mut t = HighlightTracker::default();
        let t0 = Instant::now();
        t.observe(&key, &board(&["a"]), t0);

        // a drops out, then comes back while its first record is still live.
        let t1 = t0 + Duration::from_millis(600);
        t.observe(&key, &board(&["b"]), t1);
        let t2 = t0 + Duration::from_millis(800);
        t.observe(&key, &board(&["a", "b"]), t2);

        let a = t.highlight(&key, "a").unwrap();
        assert_eq!(a.started_at, t2);
        assert_eq!(a.kind, HighlightKind::NewLeader);
        assert!(a.new_entry);
        assert_eq!(t.highlights(&key).len(), 2);

        // Measured from the restart, not from t0.
        t.sweep(t0 + Duration::from_millis(1100));
        assert!(t.highlight(&key, "a").is_some());
        assert!(t.highlight(&key, "b").is_some());

        // b was flagged at t1 and has expired; a has not.
        t.sweep(t1 + Duration::from_millis(1000));
        assert!(t.highlight(&key, "b").is_none());
        assert!(t.highlight(&key, "a").is_some());
    }

    #[test]
    fn sweep_clears_everything_after_quiet_period() {
        let key = PlanetKey::new("g", "p");
        let mut t = HighlightTracker::default();
        let t0 = Instant::now();
        t.observe(&key, &board(&["a", "b", "c"]), t0);
        assert!(t.has_active());

        t.sweep(t0 + Duration::from_millis(999));
        assert!(t.has_active());
        t.sweep(t0 + HIGHLIGHT_DECAY);
        assert!(!t.has_active());
    }

    #[test]
    fn intensity_fades_linearly() {
        let key = PlanetKey::new("g", "p");
        let mut t = HighlightTracker::default();
        let t0 = Instant::now();
        t.observe(&key, &board(&["a"]), t0);

        assert_eq!(t.intensity(&key, "a", t0), 1.0);
        let half = t.intensity(&key, "a", t0 + Duration::from_millis(500));
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(t.intensity(&key, "a", t0 + Duration::from_secs(2)), 0.0);
        assert_eq!(t.intensity(&key, "zz", t0), 0.0);
    }

    #[test]
    fn forget_drops_previous_ranking() {
        let key = PlanetKey::new("g", "p");
        let mut t = HighlightTracker::default();
        let t0 = Instant::now();
        t.observe(&key, &board(&["a"]), t0);
        t.forget(&key);
        assert!(!t.has_active());

        let events = t.observe(&key, &board(&["a"]), t0 + Duration::from_secs(5));
        assert_eq!(
            flagged(&events),
            [("a", HighlightKind::NewEntry), ("a", HighlightKind::NewLeader)]
        );
    }
}
