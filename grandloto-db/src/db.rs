use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::models::{Draw, NewDraw, misses_from_text, misses_to_text, roll_misses, validate_draw};
use crate::ratio_store;
use crate::results;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    seq             INTEGER PRIMARY KEY,
    issue           TEXT NOT NULL UNIQUE,
    date            TEXT NOT NULL,
    ball_1          INTEGER NOT NULL,
    ball_2          INTEGER NOT NULL,
    ball_3          INTEGER NOT NULL,
    ball_4          INTEGER NOT NULL,
    ball_5          INTEGER NOT NULL,
    star_1          INTEGER NOT NULL,
    star_2          INTEGER NOT NULL,
    pool            REAL NOT NULL DEFAULT 0.0,
    first_prize     REAL NOT NULL DEFAULT 0.0,
    first_winners   INTEGER NOT NULL DEFAULT 0,
    second_prize    REAL NOT NULL DEFAULT 0.0,
    second_winners  INTEGER NOT NULL DEFAULT 0,
    misses          TEXT NOT NULL
);
";

const DRAW_COLUMNS: &str = "seq, issue, date, ball_1, ball_2, ball_3, ball_4, ball_5, \
    star_1, star_2, pool, first_prize, first_winners, second_prize, second_winners, misses";

pub fn db_path() -> std::path::PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("grandloto.db");
    path
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Impossible de créer le répertoire {:?}", parent))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Impossible d'ouvrir la base {:?}", path))?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA).context("Échec de la migration (tirages)")?;
    ratio_store::migrate(conn)?;
    results::migrate(conn)?;
    Ok(())
}

/// Insère un tirage en fin d'historique : attribue seq = dernier + 1 et
/// calcule le vecteur de retards à partir du tirage précédent.
/// Retourne `None` si le libellé existe déjà (doublon ignoré).
pub fn insert_draw(conn: &Connection, new: &NewDraw) -> Result<Option<i64>> {
    let mut balls = new.balls;
    balls.sort();
    let mut stars = new.stars;
    stars.sort();
    validate_draw(&balls, &stars)?;

    if resolve_issue(conn, &new.issue)?.is_some() {
        return Ok(None);
    }

    let last = last_seq(conn)?;
    let prev_misses = if last > 0 {
        Some(
            fetch_draw(conn, last)?
                .with_context(|| format!("Tirage seq {} introuvable", last))?
                .misses,
        )
    } else {
        None
    };
    let misses = roll_misses(prev_misses.as_ref(), &balls);
    let seq = last + 1;

    conn.execute(
        "INSERT INTO draws (seq, issue, date, ball_1, ball_2, ball_3, ball_4, ball_5, \
         star_1, star_2, pool, first_prize, first_winners, second_prize, second_winners, misses)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        rusqlite::params![
            seq,
            new.issue,
            new.date,
            balls[0],
            balls[1],
            balls[2],
            balls[3],
            balls[4],
            stars[0],
            stars[1],
            new.pool,
            new.first_prize,
            new.first_winners,
            new.second_prize,
            new.second_winners,
            misses_to_text(&misses),
        ],
    )
    .context("Échec de l'insertion du tirage")?;
    Ok(Some(seq))
}

fn row_to_draw(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Draw, String)> {
    let misses_text: String = row.get(15)?;
    Ok((
        Draw {
            seq: row.get(0)?,
            issue: row.get(1)?,
            date: row.get(2)?,
            balls: [
                row.get::<_, u8>(3)?,
                row.get::<_, u8>(4)?,
                row.get::<_, u8>(5)?,
                row.get::<_, u8>(6)?,
                row.get::<_, u8>(7)?,
            ],
            stars: [row.get::<_, u8>(8)?, row.get::<_, u8>(9)?],
            pool: row.get(10)?,
            first_prize: row.get(11)?,
            first_winners: row.get(12)?,
            second_prize: row.get(13)?,
            second_winners: row.get(14)?,
            misses: [0; 35],
        },
        misses_text,
    ))
}

fn finish_draw(pair: (Draw, String)) -> Result<Draw> {
    let (mut draw, misses_text) = pair;
    draw.misses = misses_from_text(&misses_text)
        .with_context(|| format!("Tirage seq {} : retards corrompus", draw.seq))?;
    Ok(draw)
}

pub fn fetch_draw(conn: &Connection, seq: i64) -> Result<Option<Draw>> {
    let pair = conn
        .query_row(
            &format!("SELECT {} FROM draws WHERE seq = ?1", DRAW_COLUMNS),
            [seq],
            row_to_draw,
        )
        .optional()?;
    pair.map(finish_draw).transpose()
}

/// Tirages de seq `from` à `to` inclus, par seq croissant.
pub fn fetch_range(conn: &Connection, from: i64, to: i64) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM draws WHERE seq >= ?1 AND seq <= ?2 ORDER BY seq ASC",
        DRAW_COLUMNS
    ))?;
    let rows = stmt
        .query_map([from, to], row_to_draw)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_draw).collect()
}

/// Les `limit` derniers tirages, du plus récent au plus ancien.
pub fn fetch_last(conn: &Connection, limit: u32) -> Result<Vec<Draw>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM draws ORDER BY seq DESC LIMIT ?1",
        DRAW_COLUMNS
    ))?;
    let rows = stmt
        .query_map([limit], row_to_draw)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(finish_draw).collect()
}

pub fn last_seq(conn: &Connection) -> Result<i64> {
    let seq: Option<i64> = conn.query_row("SELECT MAX(seq) FROM draws", [], |row| row.get(0))?;
    Ok(seq.unwrap_or(0))
}

pub fn count_draws(conn: &Connection) -> Result<u32> {
    let count: u32 = conn.query_row("SELECT COUNT(*) FROM draws", [], |row| row.get(0))?;
    Ok(count)
}

pub fn resolve_issue(conn: &Connection, issue: &str) -> Result<Option<i64>> {
    let seq = conn
        .query_row("SELECT seq FROM draws WHERE issue = ?1", [issue], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(seq)
}

/// Couples (seq, issue) de tout l'historique, par seq croissant, pour la
/// table de résolution bidirectionnelle du cache.
pub fn fetch_issue_map(conn: &Connection) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare("SELECT seq, issue FROM draws ORDER BY seq ASC")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_assigns_dense_seq() {
        let conn = memory_db();
        let s1 = insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        let s2 = insert_draw(&conn, &NewDraw::simple("24003", "2024-01-03", [6, 7, 8, 9, 10], [3, 4])).unwrap();
        assert_eq!(s1, Some(1));
        assert_eq!(s2, Some(2));
        assert_eq!(count_draws(&conn).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_issue_ignored() {
        let conn = memory_db();
        let first = insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        assert!(first.is_some());
        let second = insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        assert!(second.is_none());
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_insert_sorts_numbers() {
        let conn = memory_db();
        insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [5, 3, 1, 4, 2], [12, 1])).unwrap();
        let draw = fetch_draw(&conn, 1).unwrap().unwrap();
        assert_eq!(draw.balls, [1, 2, 3, 4, 5]);
        assert_eq!(draw.stars, [1, 12]);
    }

    #[test]
    fn test_misses_chain_across_inserts() {
        let conn = memory_db();
        insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        insert_draw(&conn, &NewDraw::simple("24002", "2024-01-03", [1, 6, 7, 8, 9], [1, 2])).unwrap();
        insert_draw(&conn, &NewDraw::simple("24003", "2024-01-05", [10, 11, 12, 13, 14], [1, 2])).unwrap();

        let third = fetch_draw(&conn, 3).unwrap().unwrap();
        // Boule 1 : sortie au tirage 2, manque 1 tirage.
        assert_eq!(third.misses[0], 1);
        // Boule 2 : sortie au tirage 1, manque 2 tirages.
        assert_eq!(third.misses[1], 2);
        // Boule 10 : sortie ce tirage.
        assert_eq!(third.misses[9], 0);
        // Boule 35 : jamais sortie en 3 tirages.
        assert_eq!(third.misses[34], 3);
    }

    #[test]
    fn test_resolve_issue_is_lookup_not_arithmetic() {
        let conn = memory_db();
        // Libellés à trous : adjacents en seq mais pas en libellé.
        insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        insert_draw(&conn, &NewDraw::simple("24007", "2024-01-03", [6, 7, 8, 9, 10], [3, 4])).unwrap();

        assert_eq!(resolve_issue(&conn, "24007").unwrap(), Some(2));
        assert_eq!(resolve_issue(&conn, "24002").unwrap(), None);
    }

    #[test]
    fn test_fetch_range_inclusive() {
        let conn = memory_db();
        for i in 0..5u8 {
            let balls = [i + 1, i + 7, i + 13, i + 19, i + 25];
            insert_draw(&conn, &NewDraw::simple(&format!("24{:03}", i), "2024-01-01", balls, [1, 2])).unwrap();
        }
        let range = fetch_range(&conn, 2, 4).unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0].seq, 2);
        assert_eq!(range[2].seq, 4);
    }

    #[test]
    fn test_fetch_last_descending() {
        let conn = memory_db();
        insert_draw(&conn, &NewDraw::simple("24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        insert_draw(&conn, &NewDraw::simple("24002", "2024-01-03", [6, 7, 8, 9, 10], [3, 4])).unwrap();
        let last = fetch_last(&conn, 10).unwrap();
        assert_eq!(last[0].seq, 2);
        assert_eq!(last[1].seq, 1);
    }

    #[test]
    fn test_last_seq_empty() {
        let conn = memory_db();
        assert_eq!(last_seq(&conn).unwrap(), 0);
    }

    #[test]
    fn test_issue_map_ordered() {
        let conn = memory_db();
        insert_draw(&conn, &NewDraw::simple("A-24001", "2024-01-01", [1, 2, 3, 4, 5], [1, 2])).unwrap();
        insert_draw(&conn, &NewDraw::simple("B-24002", "2024-01-03", [6, 7, 8, 9, 10], [3, 4])).unwrap();
        let map = fetch_issue_map(&conn).unwrap();
        assert_eq!(map, vec![(1, "A-24001".to_string()), (2, "B-24002".to_string())]);
    }
}
