use std::collections::HashMap;

use anyhow::{Context, Result};
use grandloto_db::db::{fetch_draw, last_seq};
use grandloto_db::models::{Draw, RatioEntry};
use grandloto_db::ratio_store::{indexed_bases, save_entry};
use grandloto_db::rusqlite::Connection;

use crate::classify::{composition, temperatures};
use crate::universe::universe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entrées (base, base+1) ajoutées lors de cette passe.
    pub appended: usize,
    /// Vrai si l'entrée prédictive (dernière base connue) vient d'être créée.
    pub predicted_appended: bool,
}

/// Partitionne tout l'univers des boules par composition chaud:tiède:froid
/// sous la classification de `base`. Parcours complet O(|univers|), fait une
/// seule fois par base puis persisté.
pub fn build_entry(base: &Draw) -> RatioEntry {
    let temps = temperatures(&base.misses);
    let mut buckets: HashMap<_, Vec<u32>> = HashMap::with_capacity(21);
    for combo in &universe().balls {
        buckets
            .entry(composition(&combo.numbers, &temps))
            .or_default()
            .push(combo.id);
    }
    RatioEntry {
        base_seq: base.seq,
        target_seq: base.seq + 1,
        buckets,
    }
}

/// Maintenance incrémentale, en append seul : crée les entrées manquantes
/// pour chaque base 1..=dernier tirage connu. L'entrée de la dernière base
/// est l'entrée prédictive (sa cible n'est pas encore tirée) ; comme les
/// entrées sont adressées par (base, cible), elle devient l'entrée
/// historique de la paire dès que le tirage suivant arrive.
pub fn sync(conn: &Connection, mut progress: impl FnMut(usize, usize)) -> Result<SyncReport> {
    let last = last_seq(conn)?;
    if last == 0 {
        return Ok(SyncReport::default());
    }

    let existing = indexed_bases(conn)?;
    let missing: Vec<i64> = (1..=last).filter(|seq| !existing.contains(seq)).collect();
    let total = missing.len();

    let mut report = SyncReport::default();
    for (done, &base_seq) in missing.iter().enumerate() {
        let base = fetch_draw(conn, base_seq)?
            .with_context(|| format!("Tirage de base seq {} introuvable", base_seq))?;
        let entry = build_entry(&base);
        save_entry(conn, &entry)
            .with_context(|| format!("Échec de la persistance de l'entrée base {}", base_seq))?;
        report.appended += 1;
        if base_seq == last {
            report.predicted_appended = true;
        }
        progress(done + 1, total);
    }

    Ok(report)
}
