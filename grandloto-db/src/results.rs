use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{HitSummary, PeriodResult, TaskRow, TaskStatus};
use crate::ratio_store::{decode_ids, encode_ids};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    created    TEXT NOT NULL DEFAULT (datetime('now')),
    spec       TEXT NOT NULL,
    status     TEXT NOT NULL,
    processed  INTEGER NOT NULL DEFAULT 0,
    total      INTEGER NOT NULL DEFAULT 0,
    error      TEXT
);

CREATE TABLE IF NOT EXISTS period_results (
    task_id       INTEGER NOT NULL,
    seq           INTEGER NOT NULL,
    issue         TEXT NOT NULL,
    predicted     INTEGER NOT NULL,
    selected      INTEGER NOT NULL,
    retained      INTEGER NOT NULL,
    pair_count    INTEGER NOT NULL,
    sample        TEXT NOT NULL,
    hits          TEXT,
    skipped_rules TEXT NOT NULL,
    error         TEXT,
    PRIMARY KEY (task_id, seq)
);

CREATE TABLE IF NOT EXISTS exclusion_audit (
    task_id   INTEGER NOT NULL,
    seq       INTEGER NOT NULL,
    rule      TEXT NOT NULL,
    combo_ids BLOB NOT NULL,
    PRIMARY KEY (task_id, seq, rule)
);
";

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Échec de la migration (tâches et résultats)")?;
    Ok(())
}

pub fn create_task(conn: &Connection, spec_json: &str, total: u32) -> Result<i64> {
    conn.execute(
        "INSERT INTO tasks (spec, status, total) VALUES (?1, ?2, ?3)",
        rusqlite::params![spec_json, TaskStatus::Pending.as_str(), total],
    )
    .context("Échec de la création de la tâche")?;
    Ok(conn.last_insert_rowid())
}

pub fn set_task_status(
    conn: &Connection,
    task_id: i64,
    status: TaskStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET status = ?2, error = ?3 WHERE id = ?1",
        rusqlite::params![task_id, status.as_str(), error],
    )?;
    Ok(())
}

pub fn set_task_progress(conn: &Connection, task_id: i64, processed: u32) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET processed = ?2 WHERE id = ?1",
        rusqlite::params![task_id, processed],
    )?;
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TaskRow, String)> {
    let status_text: String = row.get(3)?;
    Ok((
        TaskRow {
            id: row.get(0)?,
            created: row.get(1)?,
            spec: row.get(2)?,
            status: TaskStatus::Pending,
            processed: row.get(4)?,
            total: row.get(5)?,
            error: row.get(6)?,
        },
        status_text,
    ))
}

fn finish_task(pair: (TaskRow, String)) -> Result<TaskRow> {
    let (mut task, status_text) = pair;
    task.status = TaskStatus::parse(&status_text)
        .with_context(|| format!("Tâche {} : statut corrompu", task.id))?;
    Ok(task)
}

pub fn fetch_task(conn: &Connection, task_id: i64) -> Result<Option<TaskRow>> {
    let pair = conn
        .query_row(
            "SELECT id, created, spec, status, processed, total, error FROM tasks WHERE id = ?1",
            [task_id],
            row_to_task,
        )
        .optional()?;
    pair.map(finish_task).transpose()
}

pub fn fetch_tasks(conn: &Connection, limit: u32) -> Result<Vec<TaskRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, created, spec, status, processed, total, error
         FROM tasks ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], row_to_task)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_task).collect()
}

/// Sauvegarde idempotente : une reprise écrase la ligne (task_id, seq)
/// au lieu de la dupliquer.
pub fn save_period_result(conn: &Connection, task_id: i64, result: &PeriodResult) -> Result<()> {
    let sample_json = serde_json::to_string(&result.sample)?;
    let hits_json = result
        .hits
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT OR REPLACE INTO period_results
         (task_id, seq, issue, predicted, selected, retained, pair_count, sample, hits, skipped_rules, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            task_id,
            result.seq,
            result.issue,
            result.predicted as i64,
            result.selected,
            result.retained,
            result.pair_count as i64,
            sample_json,
            hits_json,
            result.skipped_rules.join(","),
            result.error,
        ],
    )
    .context("Échec de la sauvegarde du résultat de période")?;
    Ok(())
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<(PeriodResult, String, Option<String>, String)> {
    Ok((
        PeriodResult {
            seq: row.get(0)?,
            issue: row.get(1)?,
            predicted: row.get::<_, i64>(2)? != 0,
            selected: row.get(3)?,
            retained: row.get(4)?,
            pair_count: row.get::<_, i64>(5)? as u64,
            sample: Vec::new(),
            hits: None,
            skipped_rules: Vec::new(),
            error: row.get(9)?,
        },
        row.get::<_, String>(6)?,
        row.get::<_, Option<String>>(7)?,
        row.get::<_, String>(8)?,
    ))
}

fn finish_result(
    parts: (PeriodResult, String, Option<String>, String),
) -> Result<PeriodResult> {
    let (mut result, sample_json, hits_json, skipped) = parts;
    result.sample = serde_json::from_str(&sample_json)
        .with_context(|| format!("Période seq {} : échantillon corrompu", result.seq))?;
    result.hits = hits_json
        .as_deref()
        .map(serde_json::from_str::<HitSummary>)
        .transpose()
        .with_context(|| format!("Période seq {} : analyse de gains corrompue", result.seq))?;
    result.skipped_rules = if skipped.is_empty() {
        Vec::new()
    } else {
        skipped.split(',').map(|s| s.to_string()).collect()
    };
    Ok(result)
}

const RESULT_COLUMNS: &str =
    "seq, issue, predicted, selected, retained, pair_count, sample, hits, skipped_rules, error";

/// Résultats d'une tâche, ordonnés par période.
pub fn fetch_period_results(conn: &Connection, task_id: i64) -> Result<Vec<PeriodResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM period_results WHERE task_id = ?1 ORDER BY seq ASC",
        RESULT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([task_id], row_to_result)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_result).collect()
}

pub fn fetch_period_result(
    conn: &Connection,
    task_id: i64,
    seq: i64,
) -> Result<Option<PeriodResult>> {
    let parts = conn
        .query_row(
            &format!(
                "SELECT {} FROM period_results WHERE task_id = ?1 AND seq = ?2",
                RESULT_COLUMNS
            ),
            [task_id, seq],
            row_to_result,
        )
        .optional()?;
    parts.map(finish_result).transpose()
}

pub fn save_audit(
    conn: &Connection,
    task_id: i64,
    seq: i64,
    rule: &str,
    combo_ids: &[u32],
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO exclusion_audit (task_id, seq, rule, combo_ids)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![task_id, seq, rule, encode_ids(combo_ids)],
    )?;
    Ok(())
}

pub fn fetch_audit(conn: &Connection, task_id: i64, seq: i64) -> Result<Vec<(String, Vec<u32>)>> {
    let mut stmt = conn.prepare(
        "SELECT rule, combo_ids FROM exclusion_audit
         WHERE task_id = ?1 AND seq = ?2 ORDER BY rule ASC",
    )?;
    let rows = stmt
        .query_map([task_id, seq], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(rule, blob)| Ok((rule, decode_ids(&blob)?)))
        .collect()
}
