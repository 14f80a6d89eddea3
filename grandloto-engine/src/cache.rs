use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use grandloto_db::db::{fetch_issue_map, fetch_range};
use grandloto_db::models::{Draw, RatioEntry};
use grandloto_db::ratio_store::fetch_entry;
use grandloto_db::rusqlite::Connection;

/// Cache d'exécution d'une tâche. Construit par tâche, jamais partagé entre
/// tâches concurrentes ; seul l'univers (immuable) est partagé au niveau du
/// processus. Contient la table libellé ↔ seq de tout l'historique et, par
/// lot, la tranche de tirages et d'entrées d'index dont le lot a besoin.
pub struct TaskCache {
    issue_to_seq: HashMap<String, i64>,
    seq_to_issue: HashMap<i64, String>,
    last_seq: i64,
    draws: BTreeMap<i64, Draw>,
    entries: HashMap<(i64, i64), RatioEntry>,
}

impl TaskCache {
    /// Charge la table de résolution depuis tout l'historique. Un historique
    /// illisible est une erreur fatale pour la tâche.
    pub fn new(conn: &Connection) -> Result<Self> {
        let map = fetch_issue_map(conn).context("Impossible de charger l'historique des tirages")?;
        let last_seq = map.last().map(|(seq, _)| *seq).unwrap_or(0);
        let mut issue_to_seq = HashMap::with_capacity(map.len());
        let mut seq_to_issue = HashMap::with_capacity(map.len());
        for (seq, issue) in map {
            issue_to_seq.insert(issue.clone(), seq);
            seq_to_issue.insert(seq, issue);
        }
        Ok(Self {
            issue_to_seq,
            seq_to_issue,
            last_seq,
            draws: BTreeMap::new(),
            entries: HashMap::new(),
        })
    }

    /// Résolution libellé → seq, par recherche uniquement.
    pub fn resolve(&self, issue: &str) -> Option<i64> {
        self.issue_to_seq.get(issue).copied()
    }

    pub fn issue_of(&self, seq: i64) -> Option<&str> {
        self.seq_to_issue.get(&seq).map(|s| s.as_str())
    }

    pub fn last_seq(&self) -> i64 {
        self.last_seq
    }

    /// Charge la tranche d'un lot : les tirages de `first` à `last` plus
    /// `trailing` enregistrements précédents (l'enregistrement de base de la
    /// première période du lot et la fenêtre d'exclusion la plus large), et
    /// les entrées d'index (seq-1, seq) de chaque période du lot.
    /// L'adjacence est résolue par seq, jamais par arithmétique de libellé.
    pub fn load_batch(&mut self, conn: &Connection, first: i64, last: i64, trailing: i64) -> Result<()> {
        self.draws.clear();
        self.entries.clear();

        let from = (first - trailing).max(1);
        let to = last.min(self.last_seq);
        if from <= to {
            for draw in fetch_range(conn, from, to)? {
                self.draws.insert(draw.seq, draw);
            }
        }

        for target in first..=last {
            let base = target - 1;
            if base < 1 {
                continue;
            }
            if let Some(entry) = fetch_entry(conn, base, target)? {
                self.entries.insert((base, target), entry);
            }
        }
        Ok(())
    }

    pub fn draw(&self, seq: i64) -> Option<&Draw> {
        self.draws.get(&seq)
    }

    /// Entrée d'index pour la paire (base, cible). Un manque n'est pas une
    /// période vide : l'appelant doit se rabattre sur un calcul à la demande.
    pub fn ratio_entry(&self, base: i64, target: i64) -> Option<&RatioEntry> {
        self.entries.get(&(base, target))
    }

    /// Les `len` tirages qui précèdent `seq`, du plus récent au plus ancien.
    /// Peut en rendre moins si l'historique chargé est plus court.
    pub fn window_before(&self, seq: i64, len: u32) -> Vec<&Draw> {
        let from = (seq - len as i64).max(1);
        let mut window: Vec<&Draw> = self
            .draws
            .range(from..seq)
            .map(|(_, draw)| draw)
            .collect();
        window.reverse();
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make_test_history;
    use crate::ratio;
    use grandloto_db::db::migrate;

    fn seeded(n: usize) -> (Connection, TaskCache) {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        make_test_history(&conn, n).unwrap();
        ratio::sync(&conn, |_, _| {}).unwrap();
        let cache = TaskCache::new(&conn).unwrap();
        (conn, cache)
    }

    #[test]
    fn test_resolution_is_bidirectional() {
        let (_conn, cache) = seeded(5);
        // make_test_history produit des libellés à trous : 24001, 24003, ...
        assert_eq!(cache.resolve("24001"), Some(1));
        assert_eq!(cache.resolve("24005"), Some(3));
        assert_eq!(cache.issue_of(3), Some("24005"));
        // Libellé absent (dans le trou) : pas de résolution arithmétique.
        assert_eq!(cache.resolve("24002"), None);
        assert_eq!(cache.last_seq(), 5);
    }

    #[test]
    fn test_load_batch_includes_trailing_base() {
        let (conn, mut cache) = seeded(10);
        cache.load_batch(&conn, 6, 10, 1).unwrap();
        // La base de la première période du lot (seq 5) est chargée.
        assert!(cache.draw(5).is_some());
        assert!(cache.draw(4).is_none());
        assert!(cache.draw(10).is_some());
    }

    #[test]
    fn test_load_batch_entries_keyed_by_pair() {
        let (conn, mut cache) = seeded(6);
        cache.load_batch(&conn, 4, 6, 1).unwrap();
        assert!(cache.ratio_entry(3, 4).is_some());
        assert!(cache.ratio_entry(5, 6).is_some());
        assert!(cache.ratio_entry(1, 2).is_none(), "hors du lot");
        assert!(cache.ratio_entry(4, 6).is_none(), "paire non adjacente");
    }

    #[test]
    fn test_load_batch_predicted_target_has_no_draw() {
        let (conn, mut cache) = seeded(4);
        // Lot contenant la période prédite seq 5.
        cache.load_batch(&conn, 5, 5, 1).unwrap();
        assert!(cache.draw(4).is_some());
        assert!(cache.draw(5).is_none());
        assert!(cache.ratio_entry(4, 5).is_some(), "entrée prédictive présente");
    }

    #[test]
    fn test_window_before_most_recent_first() {
        let (conn, mut cache) = seeded(10);
        cache.load_batch(&conn, 2, 10, 9).unwrap();
        let window = cache.window_before(8, 3);
        let seqs: Vec<i64> = window.iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![7, 6, 5]);
    }

    #[test]
    fn test_window_before_clamps_at_history_start() {
        let (conn, mut cache) = seeded(5);
        cache.load_batch(&conn, 2, 5, 10).unwrap();
        let window = cache.window_before(3, 10);
        let seqs: Vec<i64> = window.iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[test]
    fn test_empty_history() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let cache = TaskCache::new(&conn).unwrap();
        assert_eq!(cache.last_seq(), 0);
        assert_eq!(cache.resolve("24001"), None);
    }
}
