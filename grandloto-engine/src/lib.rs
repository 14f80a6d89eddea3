pub mod cache;
pub mod classify;
pub mod exclusion;
pub mod hits;
pub mod pairing;
pub mod predictor;
pub mod ratio;
pub mod selection;
pub mod task;
pub mod universe;

use anyhow::Result;
use grandloto_db::db::insert_draw;
use grandloto_db::models::NewDraw;
use grandloto_db::rusqlite::Connection;

/// Insère `n` tirages synthétiques déterministes pour les tests : les numéros
/// balayent tout le tableau au fil des tirages, les libellés sont à trous
/// (pas de lien arithmétique avec seq).
pub fn make_test_history(conn: &Connection, n: usize) -> Result<()> {
    for i in 0..n {
        let mut balls = [0u8; 5];
        for (k, ball) in balls.iter_mut().enumerate() {
            *ball = ((i * 5 + k * 6) % 35) as u8 + 1;
        }
        balls.sort();
        let stars = [(i % 12) as u8 + 1, ((i + 5) % 12) as u8 + 1];
        let issue = format!("{}", 24001 + i * 2);
        let date = format!("2024-{:02}-{:02}", (i / 28) % 12 + 1, i % 28 + 1);
        let mut draw = NewDraw::simple(&issue, &date, balls, stars);
        draw.first_prize = 8_000_000.0;
        draw.second_prize = 150_000.0;
        insert_draw(conn, &draw)?;
    }
    Ok(())
}
