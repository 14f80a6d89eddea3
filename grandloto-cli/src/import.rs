use anyhow::{Context, Result, bail};
use grandloto_db::rusqlite::Connection;
use std::path::Path;

use grandloto_db::db::insert_draw;
use grandloto_db::models::NewDraw;

/// Format attendu, délimité par « ; » avec en-tête :
/// issue;date;b1;b2;b3;b4;b5;e1;e2[;cagnotte;gain_r1;gagnants_r1;gain_r2;gagnants_r2]
fn parse_record(record: &csv::StringRecord) -> Result<NewDraw> {
    let get = |idx: usize| -> Result<String> {
        record
            .get(idx)
            .map(|s| s.trim().to_string())
            .with_context(|| format!("Champ manquant à l'index {}", idx))
    };

    let get_u8 = |idx: usize| -> Result<u8> {
        let s = get(idx)?;
        s.parse::<u8>()
            .with_context(|| format!("Impossible de parser '{}' (index {})", s, idx))
    };

    let get_f64_or = |idx: usize| -> f64 {
        record
            .get(idx)
            .and_then(|s| s.trim().replace(',', ".").parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let get_i32_or = |idx: usize| -> i32 {
        record
            .get(idx)
            .and_then(|s| s.trim().parse::<i32>().ok())
            .unwrap_or(0)
    };

    let issue = get(0)?;
    if issue.is_empty() {
        bail!("Libellé de tirage vide");
    }
    let date = parse_date(&get(1)?)?;

    let balls: [u8; 5] = [get_u8(2)?, get_u8(3)?, get_u8(4)?, get_u8(5)?, get_u8(6)?];
    let stars: [u8; 2] = [get_u8(7)?, get_u8(8)?];

    Ok(NewDraw {
        issue,
        date,
        balls,
        stars,
        pool: get_f64_or(9),
        first_prize: get_f64_or(10),
        first_winners: get_i32_or(11),
        second_prize: get_f64_or(12),
        second_winners: get_i32_or(13),
    })
}

/// Accepte AAAA-MM-JJ tel quel, ou JJ/MM/AAAA converti.
fn parse_date(raw: &str) -> Result<String> {
    if raw.contains('-') {
        return Ok(raw.to_string());
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        bail!("Format de date invalide : '{}'", raw);
    }
    Ok(format!("{}-{}-{}", parts[2], parts[1], parts[0]))
}

pub struct ImportResult {
    pub total_records: u32,
    pub inserted: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Import tolérant : une ligne illisible est comptée et signalée, jamais
/// fatale. Les tirages s'ajoutent en fin d'historique, dans l'ordre du
/// fichier (du plus ancien au plus récent).
pub fn import_csv(conn: &Connection, path: &Path) -> Result<ImportResult> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Impossible d'ouvrir {:?}", path))?;

    let tx = conn
        .unchecked_transaction()
        .context("Impossible de démarrer la transaction")?;

    let mut result = ImportResult {
        total_records: 0,
        inserted: 0,
        skipped: 0,
        errors: 0,
    };

    for record_result in reader.records() {
        result.total_records += 1;
        match record_result {
            Ok(record) => match parse_record(&record) {
                Ok(draw) => match insert_draw(&tx, &draw) {
                    Ok(Some(_)) => result.inserted += 1,
                    Ok(None) => result.skipped += 1,
                    Err(e) => {
                        eprintln!("Erreur insertion ligne {} : {}", result.total_records, e);
                        result.errors += 1;
                    }
                },
                Err(e) => {
                    eprintln!("Erreur parsing ligne {} : {}", result.total_records, e);
                    result.errors += 1;
                }
            },
            Err(e) => {
                eprintln!("Erreur lecture ligne {} : {}", result.total_records, e);
                result.errors += 1;
            }
        }
    }

    tx.commit().context("Échec du commit")?;
    Ok(result)
}
