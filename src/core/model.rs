//! Entity model: `Universe → Galaxy → Planet → Variant`.
//!
//! Field ownership:
//! - Remote-owned: names, statuses, configuration, deployed versions, trace
//!   histories and every evaluation field. The telemetry source is the
//!   source of truth for these and incoming updates overwrite them.
//! - Client-owned: [`Galaxy::position`] (manual drag placement). An incoming
//!   update only fills it in when the local galaxy has none.
//!
//! Collections are keyed by id internally and shared through `Arc` so a merge
//! can produce a new snapshot while readers keep observing the previous one
//! (copy-on-write at galaxy/planet granularity).

use hashbrown::HashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type GalaxyId = String;
pub type PlanetId = String;
pub type VariantId = String;

/// World-space placement `[x, y, z]`.
pub type Position = [f64; 3];

/// Visual property name → evaluation metric name.
pub type MetricMapping = BTreeMap<String, String>;

pub(crate) fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Address of one planet inside the universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanetKey {
    pub galaxy_id: GalaxyId,
    pub planet_id: PlanetId,
}

impl PlanetKey {
    pub fn new(galaxy_id: impl Into<GalaxyId>, planet_id: impl Into<PlanetId>) -> Self {
        Self {
            galaxy_id: galaxy_id.into(),
            planet_id: planet_id.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Variant
// ═══════════════════════════════════════════════════════════════════════════

/// Automated evaluation of a variant.
///
/// `score` is the ranking key; every other metric (factuality, hallucination,
/// speed, ...) is kept verbatim so metric mappings can address it by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl Evaluation {
    pub fn with_score(score: f64) -> Self {
        Self {
            score: Some(score),
            metrics: BTreeMap::new(),
        }
    }

    /// Numeric value of a metric by name (`"score"` included).
    pub fn metric(&self, name: &str) -> Option<f64> {
        if name == "score" {
            return self.score;
        }
        self.metrics.get(name).and_then(serde_json::Value::as_f64)
    }
}

/// A candidate configuration (trace). Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: VariantId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub evaluation: Evaluation,
    /// Flat score emitted by older telemetry servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_score: Option<f64>,
}

impl Variant {
    pub fn new(id: impl Into<VariantId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp: None,
            evaluation: Evaluation::default(),
            evaluation_score: None,
        }
    }

    pub fn scored(id: impl Into<VariantId>, score: f64) -> Self {
        let mut v = Self::new(id, "");
        v.evaluation.score = Some(score);
        v
    }

    /// Score as reported, if any.
    pub fn raw_score(&self) -> Option<f64> {
        self.evaluation.score.or(self.evaluation_score)
    }

    /// Ranking score: a missing (or NaN) score counts as `0`.
    pub fn score(&self) -> f64 {
        match self.raw_score() {
            Some(s) if !s.is_nan() => s,
            _ => 0.0,
        }
    }
}

/// Ordered, id-indexed trace history.
///
/// Insertion order is preserved; upserting an existing id replaces the entry
/// in place. Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Vec<Variant>")]
pub struct TraceHistory {
    entries: Vec<Variant>,
    index: HashMap<VariantId, usize>,
}

impl TraceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variant> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Variant> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert or replace by id. Returns `true` if the history changed.
    pub fn upsert(&mut self, variant: Variant) -> bool {
        match self.index.get(&variant.id) {
            Some(&i) => {
                if self.entries[i] == variant {
                    return false;
                }
                self.entries[i] = variant;
            }
            None => {
                self.index.insert(variant.id.clone(), self.entries.len());
                self.entries.push(variant);
            }
        }
        true
    }
}

impl PartialEq for TraceHistory {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<Vec<Variant>> for TraceHistory {
    fn from(variants: Vec<Variant>) -> Self {
        variants.into_iter().collect()
    }
}

impl FromIterator<Variant> for TraceHistory {
    fn from_iter<I: IntoIterator<Item = Variant>>(iter: I) -> Self {
        let mut history = TraceHistory::new();
        for v in iter {
            history.upsert(v);
        }
        history
    }
}

impl Serialize for TraceHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'a> IntoIterator for &'a TraceHistory {
    type Item = &'a Variant;
    type IntoIter = std::slice::Iter<'a, Variant>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Planet
// ═══════════════════════════════════════════════════════════════════════════

/// Activation state of a planet. Unrecognised strings survive round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlanetStatus {
    Active,
    #[default]
    Inactive,
    Other(String),
}

impl PlanetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PlanetStatus::Active => "active",
            PlanetStatus::Inactive => "inactive",
            PlanetStatus::Other(s) => s,
        }
    }

    /// The status a user toggle switches to.
    pub fn toggled(&self) -> PlanetStatus {
        match self {
            PlanetStatus::Active => PlanetStatus::Inactive,
            _ => PlanetStatus::Active,
        }
    }
}

impl From<String> for PlanetStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => PlanetStatus::Active,
            "inactive" => PlanetStatus::Inactive,
            _ => PlanetStatus::Other(s),
        }
    }
}

impl From<PlanetStatus> for String {
    fn from(s: PlanetStatus) -> Self {
        match s {
            PlanetStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Planet {
    pub id: PlanetId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: PlanetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<Variant>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub trace_history: TraceHistory,
}

impl Planet {
    pub fn new(id: impl Into<PlanetId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PlanetStatus::default(),
            orbit_radius: None,
            deployed_version: None,
            trace_history: TraceHistory::new(),
        }
    }

    /// Look a variant up in the history or as the deployed version.
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.trace_history
            .get(id)
            .or_else(|| self.deployed_version.as_ref().filter(|v| v.id == id))
    }
}

/// Planets of one galaxy: insertion-ordered, O(1) by id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Vec<Planet>")]
pub struct PlanetSet {
    order: Vec<Arc<Planet>>,
    index: HashMap<PlanetId, usize>,
}

impl PlanetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Planet>> {
        self.index.get(id).map(|&i| &self.order[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Planet>> {
        self.order.iter()
    }

    /// Replace in place by id, or append.
    pub fn upsert(&mut self, planet: Arc<Planet>) {
        match self.index.get(&planet.id) {
            Some(&i) => self.order[i] = planet,
            None => {
                self.index.insert(planet.id.clone(), self.order.len());
                self.order.push(planet);
            }
        }
    }

    /// Copy-on-write mutation of one planet. Returns `false` if absent.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut Planet)) -> bool {
        match self.index.get(id) {
            Some(&i) => {
                f(Arc::make_mut(&mut self.order[i]));
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Planet>> {
        let i = self.index.remove(id)?;
        let removed = self.order.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(removed)
    }
}

impl PartialEq for PlanetSet {
    fn eq(&self, other: &Self) -> bool {
        self.order.len() == other.order.len()
            && self
                .order
                .iter()
                .zip(&other.order)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
    }
}

impl From<Vec<Planet>> for PlanetSet {
    fn from(planets: Vec<Planet>) -> Self {
        let mut set = PlanetSet::new();
        for p in planets {
            set.upsert(Arc::new(p));
        }
        set
    }
}

impl Serialize for PlanetSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.order.iter().map(|p| p.as_ref()))
    }
}

impl<'a> IntoIterator for &'a PlanetSet {
    type Item = &'a Arc<Planet>;
    type IntoIter = std::slice::Iter<'a, Arc<Planet>>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Galaxy
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GalaxyStatus {
    Idle,
    Optimizing,
    Critical,
    #[default]
    Unknown,
}

impl GalaxyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GalaxyStatus::Idle => "idle",
            GalaxyStatus::Optimizing => "optimizing",
            GalaxyStatus::Critical => "critical",
            GalaxyStatus::Unknown => "unknown",
        }
    }
}

impl From<String> for GalaxyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "idle" => GalaxyStatus::Idle,
            "optimizing" => GalaxyStatus::Optimizing,
            "critical" => GalaxyStatus::Critical,
            _ => GalaxyStatus::Unknown,
        }
    }
}

impl From<GalaxyStatus> for String {
    fn from(s: GalaxyStatus) -> Self {
        s.as_str().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalaxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_mapping: Option<MetricMapping>,
    /// Server-side settings the core does not interpret (active optimizer,
    /// evaluation metric list, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl GalaxyConfig {
    /// Mapping used when the galaxy has not configured one.
    pub fn default_mapping() -> MetricMapping {
        let mut m = MetricMapping::new();
        m.insert("planetSize".to_string(), "score".to_string());
        m.insert("planetPosition".to_string(), "score".to_string());
        m
    }

    pub fn effective_mapping(&self) -> MetricMapping {
        self.metric_mapping
            .clone()
            .unwrap_or_else(Self::default_mapping)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Galaxy {
    /// Filled from the map key when absent.
    #[serde(default)]
    pub id: GalaxyId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: GalaxyStatus,
    #[serde(default, alias = "status_message", skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Client-owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: GalaxyConfig,
    #[serde(default, deserialize_with = "null_as_default")]
    pub planets: PlanetSet,
}

impl Galaxy {
    pub fn new(id: impl Into<GalaxyId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: GalaxyStatus::default(),
            status_message: None,
            position: None,
            config: GalaxyConfig::default(),
            planets: PlanetSet::new(),
        }
    }

    pub fn planet(&self, id: &str) -> Option<&Arc<Planet>> {
        self.planets.get(id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Universe
// ═══════════════════════════════════════════════════════════════════════════

/// All galaxies known to this client, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<GalaxyId, Galaxy>")]
pub struct Universe {
    galaxies: HashMap<GalaxyId, Arc<Galaxy>>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.galaxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.galaxies.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Galaxy>> {
        self.galaxies.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.galaxies.contains_key(id)
    }

    pub fn planet(&self, galaxy_id: &str, planet_id: &str) -> Option<&Arc<Planet>> {
        self.galaxies.get(galaxy_id)?.planets.get(planet_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GalaxyId, &Arc<Galaxy>)> {
        self.galaxies.iter()
    }

    /// Galaxies in id order (stable for display and serialization).
    pub fn sorted(&self) -> Vec<&Arc<Galaxy>> {
        let mut out: Vec<&Arc<Galaxy>> = self.galaxies.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn insert(&mut self, galaxy: impl Into<Arc<Galaxy>>) -> Option<Arc<Galaxy>> {
        let galaxy = galaxy.into();
        self.galaxies.insert(galaxy.id.clone(), galaxy)
    }

    /// Explicit deletion request from the presentation layer.
    pub fn remove_galaxy(&mut self, id: &str) -> Option<Arc<Galaxy>> {
        self.galaxies.remove(id)
    }

    /// Copy-on-write mutation of one galaxy. Returns `false` if absent.
    pub fn update_galaxy(&mut self, id: &str, f: impl FnOnce(&mut Galaxy)) -> bool {
        match self.galaxies.get_mut(id) {
            Some(g) => {
                f(Arc::make_mut(g));
                true
            }
            None => false,
        }
    }

    pub fn update_planet(
        &mut self,
        galaxy_id: &str,
        planet_id: &str,
        f: impl FnOnce(&mut Planet),
    ) -> bool {
        let Some(g) = self.galaxies.get_mut(galaxy_id) else {
            return false;
        };
        if g.planets.get(planet_id).is_none() {
            return false;
        }
        Arc::make_mut(g).planets.update(planet_id, f)
    }

    /// Append a locally produced trace to a planet's history.
    pub fn add_trace(&mut self, galaxy_id: &str, planet_id: &str, variant: Variant) -> bool {
        self.update_planet(galaxy_id, planet_id, |p| {
            p.trace_history.upsert(variant);
        })
    }

    /// First planet whose history or deployed version carries `trace_id`.
    pub fn locate_trace(&self, trace_id: &str) -> Option<PlanetKey> {
        self.sorted().into_iter().find_map(|g| {
            g.planets
                .iter()
                .find(|p| p.variant(trace_id).is_some())
                .map(|p| PlanetKey::new(g.id.clone(), p.id.clone()))
        })
    }

    pub(crate) fn into_map(self) -> HashMap<GalaxyId, Arc<Galaxy>> {
        self.galaxies
    }

    pub(crate) fn from_map(galaxies: HashMap<GalaxyId, Arc<Galaxy>>) -> Self {
        Self { galaxies }
    }
}

/// Entries whose `id` disagrees with their key are dropped, as a merge does.
impl From<BTreeMap<GalaxyId, Galaxy>> for Universe {
    fn from(map: BTreeMap<GalaxyId, Galaxy>) -> Self {
        let mut u = Universe::new();
        for (key, mut galaxy) in map {
            if galaxy.id.is_empty() {
                galaxy.id = key;
            } else if galaxy.id != key {
                continue;
            }
            u.insert(galaxy);
        }
        u
    }
}

impl Serialize for Universe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.sorted().into_iter().map(|g| (&g.id, g.as_ref())))
    }
}
