use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::models::{RatioEntry, RatioKey};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ratio_index (
    base_seq    INTEGER NOT NULL,
    target_seq  INTEGER NOT NULL,
    ratio       TEXT NOT NULL,
    combo_count INTEGER NOT NULL,
    combo_ids   BLOB NOT NULL,
    PRIMARY KEY (base_seq, target_seq, ratio)
);
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Échec de la migration (index de ratios)")?;
    Ok(())
}

/// Identifiants de combinaisons encodés en u32 petit-boutiste, 4 octets par id.
pub fn encode_ids(ids: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    bytes
}

pub fn decode_ids(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        bail!("Bloc d'identifiants corrompu ({} octets)", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Persiste une entrée complète (un enregistrement par composition), dans une
/// transaction. Écrase une entrée existante pour la même paire (base, cible).
pub fn save_entry(conn: &Connection, entry: &RatioEntry) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("Impossible de démarrer la transaction")?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO ratio_index (base_seq, target_seq, ratio, combo_count, combo_ids)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (key, ids) in &entry.buckets {
            stmt.execute(rusqlite::params![
                entry.base_seq,
                entry.target_seq,
                key.to_string(),
                ids.len() as i64,
                encode_ids(ids),
            ])?;
        }
    }
    tx.commit().context("Échec du commit de l'entrée d'index")?;
    Ok(())
}

/// Charge l'entrée pour la paire (base, cible), adressée par seq et jamais
/// par libellé. `None` si aucune ligne n'existe pour cette paire.
pub fn fetch_entry(conn: &Connection, base_seq: i64, target_seq: i64) -> Result<Option<RatioEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ratio, combo_ids FROM ratio_index WHERE base_seq = ?1 AND target_seq = ?2",
    )?;
    let rows = stmt
        .query_map([base_seq, target_seq], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Ok(None);
    }

    let mut buckets = HashMap::with_capacity(rows.len());
    for (ratio_text, blob) in rows {
        let key = RatioKey::parse(&ratio_text)
            .with_context(|| format!("Entrée ({}, {}) corrompue", base_seq, target_seq))?;
        let ids = decode_ids(&blob)
            .with_context(|| format!("Entrée ({}, {}) corrompue", base_seq, target_seq))?;
        buckets.insert(key, ids);
    }
    Ok(Some(RatioEntry {
        base_seq,
        target_seq,
        buckets,
    }))
}

/// Les seq de base déjà indexés (pour l'append incrémental).
pub fn indexed_bases(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT DISTINCT base_seq FROM ratio_index")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(rows)
}

pub fn count_entries(conn: &Connection) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(DISTINCT base_seq) FROM ratio_index",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
