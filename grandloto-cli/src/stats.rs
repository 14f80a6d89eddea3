use grandloto_db::models::Draw;

#[derive(Debug, Clone)]
pub struct NumberStats {
    pub number: u8,
    pub frequency: u32,
    pub gap: u32,
}

/// Fréquence et retard de chaque numéro sur la fenêtre donnée.
/// `draws[0]` = le plus récent.
pub fn compute_stats(draws: &[Draw], pool_size: u8, is_stars: bool) -> Vec<NumberStats> {
    let mut stats: Vec<NumberStats> = (1..=pool_size)
        .map(|n| NumberStats {
            number: n,
            frequency: 0,
            gap: 0,
        })
        .collect();

    for (i, draw) in draws.iter().enumerate() {
        let numbers: &[u8] = if is_stars { &draw.stars } else { &draw.balls };
        for &n in numbers {
            let idx = (n - 1) as usize;
            if idx < stats.len() {
                stats[idx].frequency += 1;
                if stats[idx].gap == 0 && stats[idx].frequency == 1 {
                    stats[idx].gap = i as u32;
                }
            }
        }
    }

    for stat in &mut stats {
        if stat.frequency == 0 {
            stat.gap = draws.len() as u32;
        }
    }

    stats
}
