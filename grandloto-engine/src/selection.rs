use grandloto_db::models::{RatioEntry, RatioKey};

use crate::task::PositiveSelection;
use crate::universe::{BallCombo, Universe};

/// Étape 1 : sélection positive. Union des seaux des ratios demandés, puis
/// intersection avec les autres filtres positifs sur les attributs
/// précalculés de l'univers, rien n'est re-dérivé ici.
/// Le résultat est trié par identité pour rester déterministe.
pub fn positive_selection(
    entry: &RatioEntry,
    ratios: &[RatioKey],
    positive: &PositiveSelection,
    uni: &Universe,
) -> Vec<u32> {
    let mut candidates: Vec<u32> = Vec::new();
    for key in ratios {
        if let Some(ids) = entry.buckets.get(key) {
            candidates.extend_from_slice(ids);
        }
    }
    // Les seaux sont disjoints (partition) : le tri suffit, pas de doublons.
    candidates.sort_unstable();

    candidates.retain(|&id| matches_filters(uni.ball(id), positive));
    candidates
}

fn matches_filters(combo: &BallCombo, filter: &PositiveSelection) -> bool {
    if let Some([min, max]) = filter.sum {
        if combo.sum < min || combo.sum > max {
            return false;
        }
    }
    if let Some([min, max]) = filter.span {
        if combo.span < min || combo.span > max {
            return false;
        }
    }
    if let Some(zones) = &filter.zones {
        if !zones.contains(&combo.zones) {
            return false;
        }
    }
    if let Some(odd) = &filter.odd {
        if !odd.contains(&combo.odd) {
            return false;
        }
    }
    if let Some(primes) = &filter.primes {
        if !primes.contains(&combo.primes) {
            return false;
        }
    }
    if let Some(ac) = &filter.ac {
        if !ac.contains(&combo.ac) {
            return false;
        }
    }
    if let Some(run_counts) = &filter.run_counts {
        if !run_counts.contains(&combo.runs) {
            return false;
        }
    }
    if let Some(max_runs) = &filter.max_runs {
        if !max_runs.contains(&combo.max_run) {
            return false;
        }
    }
    for (pos, allowed) in filter.positions.iter().enumerate() {
        if let Some(allowed) = allowed {
            if !allowed.contains(&combo.numbers[pos]) {
                return false;
            }
        }
    }
    true
}
