use grandloto_db::models::{Draw, HitSummary};

use crate::pairing::pairs_iter;
use crate::task::PairingMode;
use crate::universe::Universe;

/// Rangs de gain par (boules trouvées, étoiles trouvées). Les rangs 1 et 2
/// sont à répartition (montants portés par le tirage), les rangs 3 à 9 sont
/// à montant fixe.
const FIXED_PRIZES: [f64; 9] = [
    0.0, 0.0, 10_000.0, 3_000.0, 300.0, 200.0, 100.0, 15.0, 5.0,
];

pub fn ball_hits(numbers: &[u8; 5], drawn: &[u8; 5]) -> u8 {
    numbers.iter().filter(|n| drawn.contains(n)).count() as u8
}

pub fn star_hits(numbers: &[u8; 2], drawn: &[u8; 2]) -> u8 {
    numbers.iter().filter(|n| drawn.contains(n)).count() as u8
}

/// Rang de gain (1-9) d'une paire, `None` si elle ne gagne rien.
pub fn prize_tier(balls: u8, stars: u8) -> Option<usize> {
    match (balls, stars) {
        (5, 2) => Some(1),
        (5, 1) => Some(2),
        (5, 0) => Some(3),
        (4, 2) => Some(4),
        (4, 1) => Some(5),
        (3, 2) => Some(6),
        (4, 0) => Some(7),
        (3, 1) | (2, 2) => Some(8),
        (3, 0) | (1, 2) | (2, 1) | (0, 2) => Some(9),
        _ => None,
    }
}

pub fn tier_prize(tier: usize, draw: &Draw) -> f64 {
    match tier {
        1 => draw.first_prize,
        2 => draw.second_prize,
        _ => FIXED_PRIZES[tier - 1],
    }
}

/// Étape 4 : analyse des gains de toutes les paires contre un tirage connu.
/// Pour le produit cartésien complet, le décompte se fait par histogramme
/// (boules trouvées × étoiles trouvées) sans matérialiser les paires ;
/// les autres politiques itèrent l'appariement déterministe.
pub fn analyze(
    ball_ids: &[u32],
    star_ids: &[u32],
    mode: &PairingMode,
    draw: &Draw,
    uni: &Universe,
) -> HitSummary {
    let mut summary = HitSummary {
        best_ball_hits: 0,
        best_star_hits: 0,
        tier_counts: [0; 9],
        total_prize: 0.0,
    };
    if ball_ids.is_empty() || star_ids.is_empty() {
        return summary;
    }

    match mode {
        PairingMode::Unlimited => {
            let mut ball_histogram = [0u64; 6];
            for &id in ball_ids {
                let hits = ball_hits(&uni.ball(id).numbers, &draw.balls);
                ball_histogram[hits as usize] += 1;
                summary.best_ball_hits = summary.best_ball_hits.max(hits);
            }
            let mut star_histogram = [0u64; 3];
            for &id in star_ids {
                let hits = star_hits(&uni.star(id).numbers, &draw.stars);
                star_histogram[hits as usize] += 1;
                summary.best_star_hits = summary.best_star_hits.max(hits);
            }
            for (b, &bn) in ball_histogram.iter().enumerate() {
                if bn == 0 {
                    continue;
                }
                for (s, &sn) in star_histogram.iter().enumerate() {
                    if sn == 0 {
                        continue;
                    }
                    if let Some(tier) = prize_tier(b as u8, s as u8) {
                        let pairs = bn * sn;
                        summary.tier_counts[tier - 1] += pairs as u32;
                        summary.total_prize += pairs as f64 * tier_prize(tier, draw);
                    }
                }
            }
        }
        PairingMode::Default | PairingMode::Capped { .. } => {
            for (ball_id, star_id) in pairs_iter(ball_ids, star_ids, mode) {
                let b = ball_hits(&uni.ball(ball_id).numbers, &draw.balls);
                let s = star_hits(&uni.star(star_id).numbers, &draw.stars);
                summary.best_ball_hits = summary.best_ball_hits.max(b);
                summary.best_star_hits = summary.best_star_hits.max(s);
                if let Some(tier) = prize_tier(b, s) {
                    summary.tier_counts[tier - 1] += 1;
                    summary.total_prize += tier_prize(tier, draw);
                }
            }
        }
    }

    summary
}
