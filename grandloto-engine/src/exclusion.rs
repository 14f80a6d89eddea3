use std::collections::HashSet;

use grandloto_db::models::Draw;

use crate::task::ExclusionConfig;
use crate::universe::Universe;

pub const RULE_SUM_REPEAT: &str = "somme_repetee";
pub const RULE_SPAN_REPEAT: &str = "etendue_repetee";
pub const RULE_COOCCUR: &str = "cooccurrence";
pub const RULE_RUN_SHAPE: &str = "forme_suites";
pub const RULE_CONFLICTS: &str = "paires_conflit";

#[derive(Debug, Default)]
pub struct ExclusionOutcome {
    pub retained: Vec<u32>,
    /// Règles dégradées en no-op faute de fenêtre historique suffisante.
    pub skipped_rules: Vec<String>,
    /// Identités exclues par règle, renseigné seulement quand la capture
    /// d'audit couvre la période.
    pub audit: Vec<(String, Vec<u32>)>,
}

/// Étape 2 : exclusions. `window` contient les tirages qui précèdent la
/// période cible, du plus récent au plus ancien. Chaque règle s'applique
/// indépendamment ; une fenêtre trop courte pour une règle la dégrade en
/// no-op enregistré, les autres règles s'appliquent quand même.
pub fn apply_exclusions(
    candidates: Vec<u32>,
    window: &[&Draw],
    cfg: &ExclusionConfig,
    uni: &Universe,
    capture: bool,
) -> ExclusionOutcome {
    let mut outcome = ExclusionOutcome {
        retained: candidates,
        skipped_rules: Vec::new(),
        audit: Vec::new(),
    };

    if let Some(rule) = &cfg.sum_repeat {
        if window.len() < rule.window as usize {
            skip(&mut outcome, RULE_SUM_REPEAT, window.len(), rule.window);
        } else {
            let seen: HashSet<u16> = window[..rule.window as usize]
                .iter()
                .map(|d| d.balls.iter().map(|&b| b as u16).sum())
                .collect();
            exclude(&mut outcome, RULE_SUM_REPEAT, capture, |id| {
                seen.contains(&uni.ball(id).sum)
            });
        }
    }

    if let Some(rule) = &cfg.span_repeat {
        if window.len() < rule.window as usize {
            skip(&mut outcome, RULE_SPAN_REPEAT, window.len(), rule.window);
        } else {
            let seen: HashSet<u8> = window[..rule.window as usize]
                .iter()
                .map(|d| d.balls[4] - d.balls[0])
                .collect();
            exclude(&mut outcome, RULE_SPAN_REPEAT, capture, |id| {
                seen.contains(&uni.ball(id).span)
            });
        }
    }

    if let Some(rule) = &cfg.cooccur {
        if window.len() < rule.window as usize {
            skip(&mut outcome, RULE_COOCCUR, window.len(), rule.window);
        } else {
            let masks: Vec<u64> = window[..rule.window as usize]
                .iter()
                .map(|d| ball_mask(&d.balls))
                .collect();
            let min_shared = rule.min_shared.max(1) as u32;
            exclude(&mut outcome, RULE_COOCCUR, capture, |id| {
                let mask = ball_mask(&uni.ball(id).numbers);
                masks.iter().any(|m| (m & mask).count_ones() >= min_shared)
            });
        }
    }

    if let Some(rule) = &cfg.run_shape {
        exclude(&mut outcome, RULE_RUN_SHAPE, capture, |id| {
            let combo = uni.ball(id);
            rule.run_counts.contains(&combo.runs) || rule.max_runs.contains(&combo.max_run)
        });
    }

    if !cfg.conflicts.is_empty() {
        let pairs: Vec<u64> = cfg
            .conflicts
            .iter()
            .map(|&[a, b]| (1u64 << a) | (1u64 << b))
            .collect();
        exclude(&mut outcome, RULE_CONFLICTS, capture, |id| {
            let mask = ball_mask(&uni.ball(id).numbers);
            pairs.iter().any(|p| (mask & p) == *p)
        });
    }

    outcome
}

fn ball_mask(numbers: &[u8; 5]) -> u64 {
    numbers.iter().fold(0u64, |mask, &n| mask | (1 << n))
}

fn skip(outcome: &mut ExclusionOutcome, rule: &str, available: usize, wanted: u32) {
    log::warn!(
        "Règle {} dégradée en no-op : fenêtre de {} tirages pour {} requis",
        rule,
        available,
        wanted
    );
    outcome.skipped_rules.push(rule.to_string());
}

fn exclude(
    outcome: &mut ExclusionOutcome,
    rule: &str,
    capture: bool,
    mut hit: impl FnMut(u32) -> bool,
) {
    if capture {
        let mut excluded = Vec::new();
        outcome.retained.retain(|&id| {
            if hit(id) {
                excluded.push(id);
                false
            } else {
                true
            }
        });
        outcome.audit.push((rule.to_string(), excluded));
    } else {
        outcome.retained.retain(|&id| !hit(id));
    }
}
