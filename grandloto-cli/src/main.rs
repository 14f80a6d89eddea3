mod display;
mod import;
mod stats;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use grandloto_db::db::{count_draws, db_path, fetch_draw, fetch_last, last_seq, migrate, open_db};
use grandloto_db::results::{fetch_period_results, fetch_task, fetch_tasks};
use grandloto_engine::classify::temperatures;
use grandloto_engine::predictor::{DEFAULT_BATCH_SIZE, materialize_pairs, run_task};
use grandloto_engine::ratio;
use grandloto_engine::task::TaskSpec;
use grandloto_engine::universe::universe;

use crate::display::{
    display_draws, display_import_summary, display_results, display_stats, display_tasks,
    display_temperatures, format_numbers,
};

#[derive(Parser)]
#[command(name = "grandloto", about = "Moteur de prédiction par lots Grand Loto (5/35 + 2/12)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Importer les tirages depuis un fichier CSV
    Import {
        /// Chemin vers le fichier CSV
        #[arg(short, long, default_value = "assets/tirages.csv")]
        file: PathBuf,
    },

    /// Afficher le chemin de la base de données
    DbPath,

    /// Lister les derniers tirages
    List {
        /// Nombre de tirages à afficher
        #[arg(short, long, default_value = "10")]
        last: u32,
    },

    /// Afficher les statistiques (fréquences et retards)
    Stats {
        /// Fenêtre d'analyse (nombre de tirages)
        #[arg(short, long, default_value = "100")]
        window: u32,
    },

    /// Afficher la classification chaud/tiède/froid actuelle
    Temps,

    /// Construire l'index des ratios chaud:tiède:froid (incrémental)
    Index,

    /// Exécuter une tâche de prédiction par lots
    Run {
        /// Fichier JSON décrivant la tâche
        #[arg(short, long, default_value = "task.json")]
        task: PathBuf,

        /// Périodes par lot
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },

    /// Lister les tâches
    Tasks {
        /// Nombre de tâches à afficher
        #[arg(short, long, default_value = "10")]
        last: u32,
    },

    /// Afficher les résultats d'une tâche, période par période
    Results {
        /// Identifiant de la tâche
        #[arg(short, long)]
        task_id: i64,
    },

    /// Exporter la liste complète des paires d'une période
    Export {
        /// Identifiant de la tâche
        #[arg(short, long)]
        task_id: i64,

        /// Libellé de la période
        #[arg(short, long)]
        issue: String,

        /// Fichier CSV de sortie
        #[arg(short, long, default_value = "paires.csv")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let path = db_path();
    let conn = open_db(&path)?;
    migrate(&conn)?;

    match cli.command {
        Command::Import { file } => cmd_import(&conn, &file),
        Command::DbPath => {
            println!("{}", path.display());
            Ok(())
        }
        Command::List { last } => cmd_list(&conn, last),
        Command::Stats { window } => cmd_stats(&conn, window),
        Command::Temps => cmd_temps(&conn),
        Command::Index => cmd_index(&conn),
        Command::Run { task, batch_size } => cmd_run(&conn, &task, batch_size),
        Command::Tasks { last } => cmd_tasks(&conn, last),
        Command::Results { task_id } => cmd_results(&conn, task_id),
        Command::Export { task_id, issue, output } => cmd_export(&conn, task_id, &issue, &output),
    }
}

fn cmd_import(conn: &grandloto_db::rusqlite::Connection, file: &PathBuf) -> Result<()> {
    let result = import::import_csv(conn, file)?;
    display_import_summary(&result);
    if result.inserted > 0 {
        println!("\nPensez à mettre à jour l'index : grandloto index");
    }
    Ok(())
}

fn cmd_list(conn: &grandloto_db::rusqlite::Connection, last: u32) -> Result<()> {
    if count_draws(conn)? == 0 {
        println!("Base vide. Lancez d'abord : grandloto import");
        return Ok(());
    }
    let draws = fetch_last(conn, last)?;
    display_draws(&draws);
    Ok(())
}

fn cmd_stats(conn: &grandloto_db::rusqlite::Connection, window: u32) -> Result<()> {
    let n = count_draws(conn)?;
    if n == 0 {
        println!("Base vide. Lancez d'abord : grandloto import");
        return Ok(());
    }
    let effective_window = window.min(n);
    let draws = fetch_last(conn, effective_window)?;

    let ball_stats = stats::compute_stats(&draws, 35, false);
    let star_stats = stats::compute_stats(&draws, 12, true);

    display_stats(&ball_stats, &star_stats, effective_window);
    Ok(())
}

fn cmd_temps(conn: &grandloto_db::rusqlite::Connection) -> Result<()> {
    let last = last_seq(conn)?;
    if last == 0 {
        println!("Base vide. Lancez d'abord : grandloto import");
        return Ok(());
    }
    let draw = fetch_draw(conn, last)?.context("Dernier tirage introuvable")?;
    let temps = temperatures(&draw.misses);
    display_temperatures(&draw, &temps);
    Ok(())
}

fn cmd_index(conn: &grandloto_db::rusqlite::Connection) -> Result<()> {
    if count_draws(conn)? == 0 {
        bail!("Base vide. Lancez d'abord : grandloto import");
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.set_message("classification de l'univers");

    let report = ratio::sync(conn, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    if report.appended == 0 {
        println!("Index déjà à jour.");
    } else {
        println!("{} entrées ajoutées à l'index.", report.appended);
        if report.predicted_appended {
            println!("Entrée prédictive en place pour la prochaine période.");
        }
    }
    Ok(())
}

fn cmd_run(conn: &grandloto_db::rusqlite::Connection, task_file: &PathBuf, batch_size: usize) -> Result<()> {
    let json = std::fs::read_to_string(task_file)
        .with_context(|| format!("Impossible de lire {:?}", task_file))?;
    let spec: TaskSpec = serde_json::from_str(&json)
        .with_context(|| format!("Descripteur de tâche invalide dans {:?}", task_file))?;

    // Un tirage fraîchement importé doit être indexé avant toute tâche
    // qui le référence.
    ratio::sync(conn, |_, _| {})?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lot {msg}")
            .unwrap()
            .progress_chars("=> "),
    );

    let cancel = AtomicBool::new(false);
    let outcome = run_task(
        conn,
        &spec,
        batch_size,
        |p| {
            pb.set_length(p.total as u64);
            pb.set_position(p.processed as u64);
            pb.set_message(p.batch.to_string());
        },
        &cancel,
    )?;
    pb.finish_and_clear();

    if outcome.cancelled {
        println!("Tâche {} annulée.", outcome.task_id);
        return Ok(());
    }

    println!(
        "Tâche {} terminée : {} périodes, {} en échec.",
        outcome.task_id, outcome.total, outcome.failed_periods
    );
    let results = fetch_period_results(conn, outcome.task_id)?;
    display_results(&results, universe());
    Ok(())
}

fn cmd_tasks(conn: &grandloto_db::rusqlite::Connection, last: u32) -> Result<()> {
    let tasks = fetch_tasks(conn, last)?;
    display_tasks(&tasks);
    Ok(())
}

fn cmd_results(conn: &grandloto_db::rusqlite::Connection, task_id: i64) -> Result<()> {
    if fetch_task(conn, task_id)?.is_none() {
        bail!("Tâche {} introuvable", task_id);
    }
    let results = fetch_period_results(conn, task_id)?;
    display_results(&results, universe());
    Ok(())
}

fn cmd_export(
    conn: &grandloto_db::rusqlite::Connection,
    task_id: i64,
    issue: &str,
    output: &PathBuf,
) -> Result<()> {
    let task = fetch_task(conn, task_id)?.with_context(|| format!("Tâche {} introuvable", task_id))?;
    let spec: TaskSpec = serde_json::from_str(&task.spec)
        .with_context(|| format!("Descripteur corrompu pour la tâche {}", task_id))?;

    let results = fetch_period_results(conn, task_id)?;
    let period = results
        .iter()
        .find(|r| r.issue == issue)
        .with_context(|| format!("Période '{}' absente des résultats de la tâche {}", issue, task_id))?;

    let pairs = materialize_pairs(conn, &spec, period.seq)?;

    let uni = universe();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(output)
        .with_context(|| format!("Impossible d'écrire {:?}", output))?;
    writer.write_record(["boules", "etoiles"])?;
    for (ball_id, star_id) in &pairs {
        writer.write_record([
            format_numbers(&uni.ball(*ball_id).numbers),
            format_numbers(&uni.star(*star_id).numbers),
        ])?;
    }
    writer.flush()?;

    println!("{} paires exportées vers {:?}.", pairs.len(), output);
    Ok(())
}
