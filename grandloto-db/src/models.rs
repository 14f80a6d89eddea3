use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const BALL_MAX: u8 = 35;
pub const STAR_MAX: u8 = 12;
pub const BALL_PICK: usize = 5;
pub const STAR_PICK: usize = 2;

/// Un tirage enregistré. `seq` est dense, monotone et sans trous (attribué à
/// l'insertion) ; `issue` est le libellé public du tirage, non arithmétique
/// par rapport à `seq`. La résolution libellé vers seq se fait toujours par
/// recherche, jamais par calcul sur le libellé.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub seq: i64,
    pub issue: String,
    pub date: String,
    pub balls: [u8; 5],
    pub stars: [u8; 2],
    pub pool: f64,
    pub first_prize: f64,
    pub first_winners: i32,
    pub second_prize: f64,
    pub second_winners: i32,
    /// Retards : pour chaque boule 1-35, nombre de tirages consécutifs
    /// (celui-ci inclus) depuis sa dernière sortie. 0 = sortie ce tirage.
    pub misses: [u32; 35],
}

/// Tirage à insérer : seq et retards sont calculés par le magasin.
#[derive(Debug, Clone)]
pub struct NewDraw {
    pub issue: String,
    pub date: String,
    pub balls: [u8; 5],
    pub stars: [u8; 2],
    pub pool: f64,
    pub first_prize: f64,
    pub first_winners: i32,
    pub second_prize: f64,
    pub second_winners: i32,
}

impl NewDraw {
    pub fn simple(issue: &str, date: &str, balls: [u8; 5], stars: [u8; 2]) -> Self {
        Self {
            issue: issue.to_string(),
            date: date.to_string(),
            balls,
            stars,
            pool: 0.0,
            first_prize: 0.0,
            first_winners: 0,
            second_prize: 0.0,
            second_winners: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temperature {
    Hot,
    Warm,
    Cold,
}

impl Temperature {
    /// Seuils : chaud ≤ 4, tiède 5-9, froid ≥ 10.
    pub fn from_miss(miss: u32) -> Self {
        match miss {
            0..=4 => Temperature::Hot,
            5..=9 => Temperature::Warm,
            _ => Temperature::Cold,
        }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Temperature::Hot => write!(f, "CHAUD"),
            Temperature::Warm => write!(f, "TIÈDE"),
            Temperature::Cold => write!(f, "FROID"),
        }
    }
}

/// Composition chaud:tiède:froid d'une combinaison de 5 boules.
/// Invariant : hot + warm + cold == 5. 21 clés possibles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RatioKey {
    pub hot: u8,
    pub warm: u8,
    pub cold: u8,
}

impl RatioKey {
    pub fn new(hot: u8, warm: u8, cold: u8) -> Result<Self> {
        if hot as u16 + warm as u16 + cold as u16 != BALL_PICK as u16 {
            bail!("Ratio invalide {}:{}:{} (somme ≠ 5)", hot, warm, cold);
        }
        Ok(Self { hot, warm, cold })
    }

    /// Parse une clé au format "h:t:f", par exemple "3:1:1".
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            bail!("Format de ratio invalide : '{}'", s);
        }
        let nums: Vec<u8> = parts
            .iter()
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("Format de ratio invalide : '{}'", s))?;
        Self::new(nums[0], nums[1], nums[2])
    }

    /// Les 21 compositions possibles, par ordre lexicographique.
    pub fn all() -> Vec<RatioKey> {
        let mut keys = Vec::with_capacity(21);
        for hot in 0..=5u8 {
            for warm in 0..=(5 - hot) {
                keys.push(RatioKey {
                    hot,
                    warm,
                    cold: 5 - hot - warm,
                });
            }
        }
        keys
    }
}

impl fmt::Display for RatioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hot, self.warm, self.cold)
    }
}

/// Une entrée d'index : la partition de l'univers des combinaisons de boules
/// par composition chaud:tiède:froid, sous la classification de la période de
/// base `base_seq`, pour prédire `target_seq` (= base_seq + 1).
#[derive(Debug, Clone)]
pub struct RatioEntry {
    pub base_seq: i64,
    pub target_seq: i64,
    pub buckets: HashMap<RatioKey, Vec<u32>>,
}

/// Résultat d'une période d'une tâche. Une ligne par (tâche, période),
/// écrasée à l'identique en cas de reprise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub seq: i64,
    pub issue: String,
    pub predicted: bool,
    /// Candidats retenus après la sélection positive (étape 1).
    pub selected: u32,
    /// Candidats retenus après les exclusions (étape 2).
    pub retained: u32,
    /// Nombre de paires produites (étape 3).
    pub pair_count: u64,
    /// Échantillon borné de paires (id boules, id étoiles).
    pub sample: Vec<(u32, u32)>,
    /// Analyse des gains, absente pour une période prédite.
    pub hits: Option<HitSummary>,
    /// Règles d'exclusion dégradées en no-op (fenêtre insuffisante).
    pub skipped_rules: Vec<String>,
    /// Échec propre à cette période, sans effet sur les autres.
    pub error: Option<String>,
}

impl PeriodResult {
    pub fn failed(seq: i64, issue: &str, predicted: bool, error: String) -> Self {
        Self {
            seq,
            issue: issue.to_string(),
            predicted,
            selected: 0,
            retained: 0,
            pair_count: 0,
            sample: Vec::new(),
            hits: None,
            skipped_rules: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitSummary {
    pub best_ball_hits: u8,
    pub best_star_hits: u8,
    /// Nombre de paires par rang de gain (rang 1 à 9).
    pub tier_counts: [u32; 9],
    pub total_prize: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "en attente",
            TaskStatus::Running => "en cours",
            TaskStatus::Completed => "terminée",
            TaskStatus::Failed => "échouée",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "en attente" => Ok(TaskStatus::Pending),
            "en cours" => Ok(TaskStatus::Running),
            "terminée" => Ok(TaskStatus::Completed),
            "échouée" => Ok(TaskStatus::Failed),
            other => bail!("Statut de tâche inconnu : '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub created: String,
    pub spec: String,
    pub status: TaskStatus,
    pub processed: u32,
    pub total: u32,
    pub error: Option<String>,
}

pub fn validate_draw(balls: &[u8; 5], stars: &[u8; 2]) -> Result<()> {
    for &b in balls {
        if b < 1 || b > BALL_MAX {
            bail!("Boule {} hors limites (1-{})", b, BALL_MAX);
        }
    }
    for &s in stars {
        if s < 1 || s > STAR_MAX {
            bail!("Étoile {} hors limites (1-{})", s, STAR_MAX);
        }
    }
    for i in 0..balls.len() {
        for j in (i + 1)..balls.len() {
            if balls[i] == balls[j] {
                bail!("Boule en double : {}", balls[i]);
            }
        }
    }
    if stars[0] == stars[1] {
        bail!("Étoile en double : {}", stars[0]);
    }
    Ok(())
}

/// Fait avancer le vecteur de retards d'un tirage : 0 pour une boule sortie,
/// retard précédent + 1 sinon. Premier tirage : 0 si sortie, 1 sinon.
pub fn roll_misses(prev: Option<&[u32; 35]>, balls: &[u8; 5]) -> [u32; 35] {
    let mut misses = [0u32; 35];
    for n in 1..=BALL_MAX {
        let idx = (n - 1) as usize;
        if balls.contains(&n) {
            misses[idx] = 0;
        } else {
            misses[idx] = match prev {
                Some(p) => p[idx] + 1,
                None => 1,
            };
        }
    }
    misses
}

pub fn misses_to_text(misses: &[u32; 35]) -> String {
    misses
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn misses_from_text(text: &str) -> Result<[u32; 35]> {
    let values: Vec<u32> = text
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Vecteur de retards illisible : '{}'", text))?;
    if values.len() != 35 {
        bail!("Vecteur de retards de taille {} (attendu 35)", values.len());
    }
    let mut misses = [0u32; 35];
    misses.copy_from_slice(&values);
    Ok(misses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_draw_ok() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[1, 2]).is_ok());
        assert!(validate_draw(&[31, 32, 33, 34, 35], &[11, 12]).is_ok());
    }

    #[test]
    fn test_validate_draw_ball_out_of_range() {
        assert!(validate_draw(&[0, 2, 3, 4, 5], &[1, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 36], &[1, 2]).is_err());
    }

    #[test]
    fn test_validate_draw_star_out_of_range() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[0, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[1, 13]).is_err());
    }

    #[test]
    fn test_validate_draw_duplicates() {
        assert!(validate_draw(&[1, 1, 3, 4, 5], &[1, 2]).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5], &[3, 3]).is_err());
    }

    #[test]
    fn test_temperature_thresholds() {
        assert_eq!(Temperature::from_miss(0), Temperature::Hot);
        assert_eq!(Temperature::from_miss(4), Temperature::Hot);
        assert_eq!(Temperature::from_miss(5), Temperature::Warm);
        assert_eq!(Temperature::from_miss(9), Temperature::Warm);
        assert_eq!(Temperature::from_miss(10), Temperature::Cold);
        assert_eq!(Temperature::from_miss(100), Temperature::Cold);
    }

    #[test]
    fn test_ratio_key_parse() {
        let key = RatioKey::parse("3:1:1").unwrap();
        assert_eq!(key, RatioKey { hot: 3, warm: 1, cold: 1 });
        assert_eq!(key.to_string(), "3:1:1");
    }

    #[test]
    fn test_ratio_key_parse_invalid() {
        assert!(RatioKey::parse("3:1").is_err());
        assert!(RatioKey::parse("3:2:2").is_err());
        assert!(RatioKey::parse("a:b:c").is_err());
    }

    #[test]
    fn test_ratio_key_all_count() {
        let keys = RatioKey::all();
        assert_eq!(keys.len(), 21);
        for key in &keys {
            assert_eq!(key.hot + key.warm + key.cold, 5);
        }
    }

    #[test]
    fn test_roll_misses_first_draw() {
        let misses = roll_misses(None, &[1, 2, 3, 4, 5]);
        assert_eq!(misses[0], 0);
        assert_eq!(misses[4], 0);
        assert_eq!(misses[5], 1);
        assert_eq!(misses[34], 1);
    }

    #[test]
    fn test_roll_misses_increments() {
        let first = roll_misses(None, &[1, 2, 3, 4, 5]);
        let second = roll_misses(Some(&first), &[1, 6, 7, 8, 9]);
        // La boule 1 ressort : retard remis à 0.
        assert_eq!(second[0], 0);
        // Les boules 2-5 étaient sorties, elles manquent un tirage.
        assert_eq!(second[1], 1);
        // La boule 10 n'est jamais sortie.
        assert_eq!(second[9], 2);
    }

    #[test]
    fn test_misses_text_roundtrip() {
        let misses = roll_misses(None, &[1, 2, 3, 4, 5]);
        let text = misses_to_text(&misses);
        let back = misses_from_text(&text).unwrap();
        assert_eq!(misses, back);
    }

    #[test]
    fn test_misses_from_text_wrong_size() {
        assert!(misses_from_text("1,2,3").is_err());
        assert!(misses_from_text("a,b").is_err());
    }

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TaskStatus::parse("autre").is_err());
    }
}
