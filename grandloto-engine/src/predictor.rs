use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail, ensure};
use rayon::prelude::*;

use grandloto_db::models::{PeriodResult, RatioKey, TaskStatus};
use grandloto_db::results;
use grandloto_db::rusqlite::Connection;

use crate::cache::TaskCache;
use crate::exclusion::apply_exclusions;
use crate::hits;
use crate::pairing::{pair_summary, pairs_iter};
use crate::ratio::build_entry;
use crate::selection::positive_selection;
use crate::task::{PeriodRange, TaskSpec};
use crate::universe::{Universe, universe};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Avancement émis à la granularité du lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub batch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task_id: i64,
    pub total: usize,
    pub failed_periods: usize,
    pub cancelled: bool,
}

/// Une période cible résolue : historique, ou l'unique période prédite en
/// queue de plage (seq = dernier tirage + 1).
#[derive(Debug, Clone)]
struct Target {
    seq: i64,
    issue: String,
    predicted: bool,
}

/// Résout la plage demandée en liste ordonnée de périodes cibles.
/// Les libellés sont résolus par recherche ; l'arithmétique sur les
/// libellés ne sert qu'à l'affichage de la période prédite.
fn resolve_targets(cache: &TaskCache, range: &PeriodRange, predict_next: bool) -> Result<Vec<Target>> {
    let last = cache.last_seq();
    let (from, to) = match range {
        PeriodRange::Custom { start, end } => {
            let start_seq = cache
                .resolve(start)
                .with_context(|| format!("Libellé de début introuvable : '{}'", start))?;
            let end_seq = cache
                .resolve(end)
                .with_context(|| format!("Libellé de fin introuvable : '{}'", end))?;
            ensure!(start_seq <= end_seq, "Plage inversée : {} après {}", start, end);
            (start_seq, end_seq)
        }
        PeriodRange::Recent { count } => {
            ensure!(*count > 0, "Plage « récente » vide");
            ((last - *count as i64 + 1).max(1), last)
        }
        // La toute première période n'a pas de base : « tout » commence à 2.
        PeriodRange::All => (2.min(last), last),
    };

    let mut targets: Vec<Target> = (from..=to)
        .map(|seq| Target {
            seq,
            issue: cache.issue_of(seq).unwrap_or_default().to_string(),
            predicted: false,
        })
        .collect();

    if predict_next {
        let last_issue = cache.issue_of(last).unwrap_or_default();
        targets.push(Target {
            seq: last + 1,
            issue: next_issue_label(last_issue),
            predicted: true,
        });
    }

    ensure!(!targets.is_empty(), "Aucune période dans la plage demandée");
    Ok(targets)
}

/// Libellé d'affichage de la période prédite. Pur affichage : la résolution
/// se fait partout ailleurs par seq.
fn next_issue_label(last_issue: &str) -> String {
    match last_issue.parse::<u64>() {
        Ok(n) => format!("{:0width$}", n + 1, width = last_issue.len()),
        Err(_) => "(à venir)".to_string(),
    }
}

/// Exécute une tâche complète : lots séquentiels de `batch_size` périodes,
/// pipeline à 4 étapes par période, parallélisé dans le lot. L'échec d'une
/// période est enregistré sur son résultat et n'interrompt ni ses sœurs ni
/// la tâche ; la tâche n'échoue que sur une erreur fatale ou une annulation.
pub fn run_task(
    conn: &Connection,
    spec: &TaskSpec,
    batch_size: usize,
    mut progress: impl FnMut(Progress),
    cancel: &AtomicBool,
) -> Result<TaskOutcome> {
    ensure!(batch_size > 0, "Taille de lot nulle");
    let uni = universe();

    let mut cache = TaskCache::new(conn)?;
    if cache.last_seq() == 0 {
        bail!("Base vide. Importez d'abord des tirages.");
    }

    let targets = resolve_targets(&cache, &spec.period_range, spec.predict_next)?;
    let ratios = spec.positive.parsed_ratios()?;
    let star_ids = spec.output.star_ids(uni)?;
    let max_window = spec.exclusion.max_window();
    // Enregistrements précédents à charger : la fenêtre d'exclusion la plus
    // large, plus l'enregistrement de base de la première période du lot.
    let trailing = max_window as i64 + 1;

    let total = targets.len();
    let task_id = results::create_task(conn, &serde_json::to_string(spec)?, total as u32)?;
    results::set_task_status(conn, task_id, TaskStatus::Running, None)?;

    let mut processed = 0usize;
    let mut failed_periods = 0usize;

    for (batch_idx, chunk) in targets.chunks(batch_size).enumerate() {
        if cancel.load(Ordering::Relaxed) {
            log::warn!("Tâche {} annulée après {} périodes", task_id, processed);
            results::set_task_status(conn, task_id, TaskStatus::Failed, Some("annulée"))?;
            return Ok(TaskOutcome {
                task_id,
                total,
                failed_periods,
                cancelled: true,
            });
        }

        let first = chunk[0].seq;
        let last = chunk[chunk.len() - 1].seq;
        cache.load_batch(conn, first, last, trailing)?;

        // Les périodes du lot sont indépendantes : chacune lit la tranche
        // partagée et n'écrit que son propre résultat.
        let outputs: Vec<(PeriodResult, Vec<(String, Vec<u32>)>)> = chunk
            .par_iter()
            .map(|target| process_period(&cache, uni, spec, &ratios, &star_ids, max_window, target))
            .collect();

        // La persistance n'intervient qu'une fois le pipeline du lot terminé.
        for (result, audit) in outputs {
            if result.error.is_some() {
                failed_periods += 1;
            }
            let seq = result.seq;
            results::save_period_result(conn, task_id, &result)?;
            for (rule, ids) in audit {
                results::save_audit(conn, task_id, seq, &rule, &ids)?;
            }
        }

        processed += chunk.len();
        results::set_task_progress(conn, task_id, processed as u32)?;
        progress(Progress {
            processed,
            total,
            batch: batch_idx + 1,
        });
    }

    results::set_task_status(conn, task_id, TaskStatus::Completed, None)?;
    Ok(TaskOutcome {
        task_id,
        total,
        failed_periods,
        cancelled: false,
    })
}

fn process_period(
    cache: &TaskCache,
    uni: &Universe,
    spec: &TaskSpec,
    ratios: &[RatioKey],
    star_ids: &[u32],
    max_window: u32,
    target: &Target,
) -> (PeriodResult, Vec<(String, Vec<u32>)>) {
    match compute_period(cache, uni, spec, ratios, star_ids, max_window, target) {
        Ok(pair) => pair,
        Err(e) => (
            PeriodResult::failed(target.seq, &target.issue, target.predicted, format!("{:#}", e)),
            Vec::new(),
        ),
    }
}

fn compute_period(
    cache: &TaskCache,
    uni: &Universe,
    spec: &TaskSpec,
    ratios: &[RatioKey],
    star_ids: &[u32],
    max_window: u32,
    target: &Target,
) -> Result<(PeriodResult, Vec<(String, Vec<u32>)>)> {
    let capture = spec.output.audit.covers(&target.issue, target.predicted);
    let stages = run_stages(cache, uni, spec, ratios, max_window, target, capture)?;

    let summary = pair_summary(
        &stages.retained,
        star_ids,
        &spec.output.pairing,
        spec.output.sample_size,
    );

    let hits = if !target.predicted && spec.output.hit_analysis {
        let drawn = cache
            .draw(target.seq)
            .with_context(|| format!("Tirage cible seq {} introuvable", target.seq))?;
        Some(hits::analyze(
            &stages.retained,
            star_ids,
            &spec.output.pairing,
            drawn,
            uni,
        ))
    } else {
        None
    };

    Ok((
        PeriodResult {
            seq: target.seq,
            issue: target.issue.clone(),
            predicted: target.predicted,
            selected: stages.selected,
            retained: stages.retained.len() as u32,
            pair_count: summary.count,
            sample: summary.sample,
            hits,
            skipped_rules: stages.skipped_rules,
            error: None,
        },
        stages.audit,
    ))
}

struct StageOutput {
    selected: u32,
    retained: Vec<u32>,
    skipped_rules: Vec<String>,
    audit: Vec<(String, Vec<u32>)>,
}

/// Étapes 1 et 2 : sélection positive puis exclusions, pour une période.
/// L'entrée d'index manquante se recalcule à la demande depuis la base,
/// jamais traitée comme une période vide.
fn run_stages(
    cache: &TaskCache,
    uni: &Universe,
    spec: &TaskSpec,
    ratios: &[RatioKey],
    max_window: u32,
    target: &Target,
    capture: bool,
) -> Result<StageOutput> {
    let base_seq = target.seq - 1;
    let base = cache
        .draw(base_seq)
        .with_context(|| format!("Enregistrement de base seq {} introuvable", base_seq))?;

    let built;
    let entry = match cache.ratio_entry(base_seq, target.seq) {
        Some(entry) => entry,
        None => {
            log::debug!(
                "Entrée d'index ({}, {}) absente, calcul à la demande",
                base_seq,
                target.seq
            );
            built = build_entry(base);
            &built
        }
    };

    let selected = positive_selection(entry, ratios, &spec.positive, uni);
    let selected_count = selected.len() as u32;

    let window = cache.window_before(target.seq, max_window);
    let outcome = apply_exclusions(selected, &window, &spec.exclusion, uni, capture);

    Ok(StageOutput {
        selected: selected_count,
        retained: outcome.retained,
        skipped_rules: outcome.skipped_rules,
        audit: outcome.audit,
    })
}

/// Matérialise la liste complète des paires d'une période, à la demande :
/// les résultats persistés n'en gardent qu'un échantillon borné.
pub fn materialize_pairs(conn: &Connection, spec: &TaskSpec, seq: i64) -> Result<Vec<(u32, u32)>> {
    let uni = universe();
    let mut cache = TaskCache::new(conn)?;
    if cache.last_seq() == 0 {
        bail!("Base vide. Importez d'abord des tirages.");
    }
    ensure!(
        seq >= 1 && seq <= cache.last_seq() + 1,
        "Période seq {} hors de l'historique (+ une période prédite)",
        seq
    );

    let predicted = seq > cache.last_seq();
    let issue = cache.issue_of(seq).unwrap_or_default().to_string();
    let target = Target {
        seq,
        issue,
        predicted,
    };

    let ratios = spec.positive.parsed_ratios()?;
    let star_ids = spec.output.star_ids(uni)?;
    let max_window = spec.exclusion.max_window();
    cache.load_batch(conn, seq, seq, max_window as i64 + 1)?;

    let stages = run_stages(&cache, uni, spec, &ratios, max_window, &target, false)?;
    Ok(pairs_iter(&stages.retained, &star_ids, &spec.output.pairing).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_test_history;
    use crate::ratio;
    use crate::task::{AuditConfig, AuditScope, OutputConfig, PairingMode, PositiveSelection, WindowRule};
    use grandloto_db::db::migrate;
    use grandloto_db::models::RatioKey as Key;

    fn seeded(n: usize, synced: bool) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        make_test_history(&conn, n).unwrap();
        if synced {
            ratio::sync(&conn, |_, _| {}).unwrap();
        }
        conn
    }

    fn all_ratio_spec(range: PeriodRange) -> TaskSpec {
        // Tous les ratios : l'étape 1 garde tout l'univers.
        let ratios: Vec<String> = Key::all().iter().map(|k| k.to_string()).collect();
        let ratio_refs: Vec<&str> = ratios.iter().map(|s| s.as_str()).collect();
        TaskSpec {
            period_range: range,
            predict_next: false,
            positive: PositiveSelection::ratios_only(&ratio_refs),
            exclusion: Default::default(),
            output: OutputConfig {
                stars: vec![[1, 2], [3, 4]],
                sample_size: 3,
                ..Default::default()
            },
        }
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn test_run_task_completes_and_persists() {
        let conn = seeded(20, true);
        let spec = all_ratio_spec(PeriodRange::Recent { count: 10 });
        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.total, 10);
        assert_eq!(outcome.failed_periods, 0);

        let task = results::fetch_task(&conn, outcome.task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.processed, 10);

        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        assert_eq!(rows.len(), 10);
        for row in &rows {
            assert!(row.error.is_none());
            assert!(!row.predicted);
            assert!(row.hits.is_some(), "période historique : analyse présente");
            assert_eq!(row.sample.len(), 3);
        }
    }

    #[test]
    fn test_batch_boundary_invariance() {
        let conn_a = seeded(60, true);
        let conn_b = seeded(60, true);
        let mut spec = all_ratio_spec(PeriodRange::Recent { count: 40 });
        // La fenêtre d'exclusion chevauche les frontières de lot.
        spec.exclusion.sum_repeat = Some(WindowRule { window: 7 });

        let one = run_task(&conn_a, &spec, 40, |_| {}, &no_cancel()).unwrap();
        let split = run_task(&conn_b, &spec, 10, |_| {}, &no_cancel()).unwrap();

        let rows_one = results::fetch_period_results(&conn_a, one.task_id).unwrap();
        let rows_split = results::fetch_period_results(&conn_b, split.task_id).unwrap();
        assert_eq!(rows_one, rows_split, "le découpage en lots ne change pas les résultats");
    }

    #[test]
    fn test_predicted_period_contract() {
        let conn = seeded(10, true);
        let mut spec = all_ratio_spec(PeriodRange::Recent { count: 3 });
        spec.predict_next = true;

        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        assert_eq!(rows.len(), 4);

        let (historical, predicted): (Vec<_>, Vec<_>) = rows.iter().partition(|r| !r.predicted);
        assert_eq!(predicted.len(), 1);
        assert_eq!(predicted[0].seq, 11);
        assert!(predicted[0].hits.is_none(), "pas d'analyse pour une période prédite");
        assert!(predicted[0].error.is_none());
        for row in historical {
            assert!(row.hits.is_some());
        }
    }

    #[test]
    fn test_predicted_issue_label_is_display_only() {
        let conn = seeded(5, true);
        let mut spec = all_ratio_spec(PeriodRange::Recent { count: 1 });
        spec.predict_next = true;
        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        // Dernier libellé réel : 24009 (libellés à trous, pas de 24010 en base).
        assert_eq!(rows[1].issue, "24010");
        assert_eq!(rows[1].seq, 6);
    }

    #[test]
    fn test_stage_monotonicity_default_pairing() {
        let conn = seeded(30, true);
        let mut spec = all_ratio_spec(PeriodRange::Recent { count: 15 });
        spec.exclusion.sum_repeat = Some(WindowRule { window: 5 });
        spec.output.pairing = PairingMode::Default;

        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        for row in &rows {
            assert!(row.retained <= row.selected, "étape 2 ne grossit pas l'ensemble");
            assert!(row.pair_count <= row.retained as u64, "étape 3 non plus");
        }
    }

    #[test]
    fn test_missing_index_falls_back_to_on_demand() {
        // Même tâche avec et sans index persisté : résultats identiques.
        let conn_synced = seeded(12, true);
        let conn_bare = seeded(12, false);
        let spec = all_ratio_spec(PeriodRange::Recent { count: 6 });

        let with_index = run_task(&conn_synced, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        let without_index = run_task(&conn_bare, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();

        let a = results::fetch_period_results(&conn_synced, with_index.task_id).unwrap();
        let b = results::fetch_period_results(&conn_bare, without_index.task_id).unwrap();
        assert_eq!(a, b, "le repli à la demande doit égaler l'index persisté");
        assert_eq!(without_index.failed_periods, 0);
    }

    #[test]
    fn test_first_period_fails_alone() {
        let conn = seeded(6, true);
        let spec = all_ratio_spec(PeriodRange::Custom {
            start: "24001".to_string(),
            end: "24011".to_string(),
        });
        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        // La période 1 n'a pas de base : échec isolé, la tâche se termine.
        assert_eq!(outcome.failed_periods, 1);

        let task = results::fetch_task(&conn, outcome.task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].error.is_some());
        for row in &rows[1..] {
            assert!(row.error.is_none(), "les périodes sœurs ne sont pas touchées");
        }
    }

    #[test]
    fn test_unresolved_custom_label_is_fatal() {
        let conn = seeded(6, true);
        let spec = all_ratio_spec(PeriodRange::Custom {
            start: "24001".to_string(),
            end: "99999".to_string(),
        });
        assert!(run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).is_err());
    }

    #[test]
    fn test_cancellation_between_batches() {
        let conn = seeded(20, true);
        let spec = all_ratio_spec(PeriodRange::Recent { count: 20 });
        let cancel = AtomicBool::new(false);

        // Annule après le premier lot : le second ne démarre jamais.
        let cancel_ref = &cancel;
        let outcome = run_task(
            &conn,
            &spec,
            5,
            |p| {
                if p.batch == 1 {
                    cancel_ref.store(true, Ordering::Relaxed);
                }
            },
            cancel_ref,
        )
        .unwrap();
        assert!(outcome.cancelled);

        let task = results::fetch_task(&conn, outcome.task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("annulée"));

        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();
        assert_eq!(rows.len(), 5, "seul le lot en cours va au bout");
    }

    #[test]
    fn test_progress_emitted_per_batch() {
        let conn = seeded(20, true);
        let spec = all_ratio_spec(PeriodRange::Recent { count: 12 });
        let mut seen = Vec::new();
        run_task(&conn, &spec, 5, |p| seen.push(p), &no_cancel()).unwrap();
        assert_eq!(
            seen,
            vec![
                Progress { processed: 5, total: 12, batch: 1 },
                Progress { processed: 10, total: 12, batch: 2 },
                Progress { processed: 12, total: 12, batch: 3 },
            ]
        );
    }

    #[test]
    fn test_audit_scoped_to_predicted() {
        let conn = seeded(10, true);
        let mut spec = all_ratio_spec(PeriodRange::Recent { count: 3 });
        spec.predict_next = true;
        spec.exclusion.conflicts = vec![[1, 2]];
        spec.output.audit = AuditConfig {
            enabled: true,
            scope: AuditScope::Predicted,
        };

        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        // Périodes historiques : pas de capture.
        for seq in 8..=10 {
            assert!(results::fetch_audit(&conn, outcome.task_id, seq).unwrap().is_empty());
        }
        // Période prédite : capture par règle.
        let audit = results::fetch_audit(&conn, outcome.task_id, 11).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].0, crate::exclusion::RULE_CONFLICTS);
        assert!(!audit[0].1.is_empty());
    }

    #[test]
    fn test_materialize_pairs_matches_summary() {
        let conn = seeded(12, true);
        let spec = all_ratio_spec(PeriodRange::Recent { count: 4 });
        let outcome = run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).unwrap();
        let rows = results::fetch_period_results(&conn, outcome.task_id).unwrap();

        let pairs = materialize_pairs(&conn, &spec, rows[0].seq).unwrap();
        assert_eq!(pairs.len() as u64, rows[0].pair_count);
        assert_eq!(&pairs[..rows[0].sample.len()], &rows[0].sample[..]);
    }

    #[test]
    fn test_materialize_rejects_out_of_range() {
        let conn = seeded(5, true);
        let spec = all_ratio_spec(PeriodRange::All);
        assert!(materialize_pairs(&conn, &spec, 99).is_err());
    }

    #[test]
    fn test_empty_history_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let spec = all_ratio_spec(PeriodRange::All);
        assert!(run_task(&conn, &spec, DEFAULT_BATCH_SIZE, |_| {}, &no_cancel()).is_err());
    }
}
