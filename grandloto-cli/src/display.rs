use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};

use grandloto_db::models::{Draw, PeriodResult, TaskRow, Temperature};
use grandloto_engine::universe::Universe;

use crate::import::ImportResult;
use crate::stats::NumberStats;

pub fn display_draws(draws: &[Draw]) {
    if draws.is_empty() {
        println!("Aucun tirage à afficher.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Tirage", "Date", "Boules", "Étoiles", "Gain R1", "Gagnants R1"]);

    for draw in draws {
        let balls_str = draw
            .balls
            .iter()
            .map(|b| format!("{:2}", b))
            .collect::<Vec<_>>()
            .join(" - ");
        let stars_str = draw
            .stars
            .iter()
            .map(|s| format!("{:2}", s))
            .collect::<Vec<_>>()
            .join(" - ");
        let prize = if draw.first_prize > 0.0 {
            format!("{:.2} ¥", draw.first_prize)
        } else {
            "—".to_string()
        };

        table.add_row(vec![
            &draw.issue,
            &draw.date,
            &balls_str,
            &stars_str,
            &prize,
            &draw.first_winners.to_string(),
        ]);
    }

    println!("{table}");
}

pub fn display_import_summary(result: &ImportResult) {
    println!("Import terminé :");
    println!("  Total lignes lues : {}", result.total_records);
    println!("  Insérés           : {}", result.inserted);
    println!("  Doublons ignorés  : {}", result.skipped);
    if result.errors > 0 {
        println!("  Erreurs           : {}", result.errors);
    }
}

pub fn display_stats(ball_stats: &[NumberStats], star_stats: &[NumberStats], window: u32) {
    println!("\nStatistiques sur les {} derniers tirages\n", window);

    for (title, stats) in [("── Boules (1-35) ──", ball_stats), ("── Étoiles (1-12) ──", star_stats)] {
        println!("{title}");
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Numéro", "Fréquence", "Retard"]);

        let mut sorted = stats.to_vec();
        sorted.sort_by(|a, b| b.frequency.cmp(&a.frequency));

        for stat in &sorted {
            table.add_row(vec![
                &format!("{:2}", stat.number),
                &stat.frequency.to_string(),
                &stat.gap.to_string(),
            ]);
        }
        println!("{table}\n");
    }
}

/// Classification chaud/tiède/froid des 35 boules d'après le dernier tirage.
pub fn display_temperatures(draw: &Draw, temps: &[Temperature; 35]) {
    println!("\nTempératures après le tirage {} ({})\n", draw.issue, draw.date);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Boule", "Retard", "Température"]);

    for n in 1..=35u8 {
        let idx = (n - 1) as usize;
        table.add_row(vec![
            &format!("{:2}", n),
            &draw.misses[idx].to_string(),
            &temps[idx].to_string(),
        ]);
    }
    println!("{table}");

    let hot = temps.iter().filter(|t| **t == Temperature::Hot).count();
    let warm = temps.iter().filter(|t| **t == Temperature::Warm).count();
    let cold = temps.iter().filter(|t| **t == Temperature::Cold).count();
    println!("\n{} chaudes, {} tièdes, {} froides", hot, warm, cold);
}

pub fn display_tasks(tasks: &[TaskRow]) {
    if tasks.is_empty() {
        println!("Aucune tâche enregistrée.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Créée", "Statut", "Avancement", "Erreur"]);

    for task in tasks {
        table.add_row(vec![
            &task.id.to_string(),
            &task.created,
            &task.status.as_str().to_string(),
            &format!("{}/{}", task.processed, task.total),
            &task.error.clone().unwrap_or_else(|| "—".to_string()),
        ]);
    }
    println!("{table}");
}

pub fn display_results(results: &[PeriodResult], uni: &Universe) {
    if results.is_empty() {
        println!("Aucun résultat pour cette tâche.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Tirage", "Type", "Sélection", "Après exclusion", "Paires",
            "Meilleur", "Gains", "Règles sautées", "Erreur",
        ]);

    for result in results {
        let kind = if result.predicted { "prédit" } else { "historique" };
        let (best, prize) = match &result.hits {
            Some(h) => (
                format!("{}+{}", h.best_ball_hits, h.best_star_hits),
                format!("{:.2} ¥", h.total_prize),
            ),
            None => ("—".to_string(), "—".to_string()),
        };
        table.add_row(vec![
            &result.issue,
            &kind.to_string(),
            &result.selected.to_string(),
            &result.retained.to_string(),
            &result.pair_count.to_string(),
            &best,
            &prize,
            &if result.skipped_rules.is_empty() {
                "—".to_string()
            } else {
                result.skipped_rules.join(", ")
            },
            &result.error.clone().unwrap_or_else(|| "—".to_string()),
        ]);
    }
    println!("{table}");

    // Aperçu de l'échantillon de la première période sans erreur.
    if let Some(result) = results.iter().find(|r| r.error.is_none() && !r.sample.is_empty()) {
        println!("\nÉchantillon du tirage {} :", result.issue);
        for &(ball_id, star_id) in &result.sample {
            println!(
                "  {} + {}",
                format_numbers(&uni.ball(ball_id).numbers),
                format_numbers(&uni.star(star_id).numbers),
            );
        }
    }
}

pub fn format_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| format!("{:02}", n))
        .collect::<Vec<_>>()
        .join("-")
}
