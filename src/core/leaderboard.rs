//! Leaderboard engine: stable top-K ranking of a planet's variants.

use crate::model::{Planet, Variant, VariantId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub variant: Variant,
    /// 1-based position in the returned sequence.
    pub rank: usize,
    pub is_deployed: bool,
}

fn by_score_desc(a: &Variant, b: &Variant) -> Ordering {
    b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal)
}

/// Rank the union of the trace history and the deployed variant.
///
/// Equal scores keep their candidate order (history order, then a deployed
/// variant that is not part of the history). When the deployed variant falls
/// outside the first `k`, it is appended as entry `k + 1`.
pub fn compute_top(planet: &Planet, k: usize) -> Vec<LeaderboardEntry> {
    let deployed_id = planet.deployed_version.as_ref().map(|v| v.id.as_str());

    let mut candidates: Vec<(&Variant, bool)> = planet
        .trace_history
        .iter()
        .map(|v| (v, Some(v.id.as_str()) == deployed_id))
        .collect();
    if let Some(deployed) = &planet.deployed_version {
        if !planet.trace_history.contains(&deployed.id) {
            candidates.push((deployed, true));
        }
    }

    // `sort_by` is stable.
    candidates.sort_by(|a, b| by_score_desc(a.0, b.0));

    let mut top: Vec<(&Variant, bool)> = candidates.iter().take(k).copied().collect();
    if !top.iter().any(|&(_, deployed)| deployed) {
        if let Some(&forced) = candidates.iter().skip(k).find(|&&(_, deployed)| deployed) {
            top.push(forced);
        }
    }

    top.into_iter()
        .enumerate()
        .map(|(i, (variant, is_deployed))| LeaderboardEntry {
            variant: variant.clone(),
            rank: i + 1,
            is_deployed,
        })
        .collect()
}

/// Rank of a trace within the history alone (deployed variant not injected).
pub fn trace_rank(planet: &Planet, trace_id: &str) -> Option<usize> {
    let mut sorted: Vec<&Variant> = planet.trace_history.iter().collect();
    sorted.sort_by(|a, b| by_score_desc(a, b));
    sorted.iter().position(|v| v.id == trace_id).map(|i| i + 1)
}

/// Ids of a ranking, in rank order.
pub fn ranking_ids(entries: &[LeaderboardEntry]) -> Vec<VariantId> {
    entries.iter().map(|e| e.variant.id.clone()).collect()
}
