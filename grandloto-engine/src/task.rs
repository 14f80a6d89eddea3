use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use grandloto_db::models::RatioKey;

use crate::universe::Universe;

/// Descripteur d'une tâche de prédiction par lots, désérialisé depuis un
/// fichier JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub period_range: PeriodRange,
    /// Ajoute l'unique période prédite (seq = dernier + 1) en fin de plage.
    #[serde(default)]
    pub predict_next: bool,
    pub positive: PositiveSelection,
    #[serde(default)]
    pub exclusion: ExclusionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeriodRange {
    /// Plage explicite de libellés, résolue par recherche et jamais par
    /// arithmétique sur les libellés.
    Custom { start: String, end: String },
    /// Les `count` périodes les plus récentes.
    Recent { count: u32 },
    /// Tout l'historique (à partir de la deuxième période, la première n'a
    /// pas de base).
    All,
}

/// Profil de sélection positive : les filtres gardent les combinaisons qui
/// correspondent. Tous les attributs viennent de l'univers précalculé.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositiveSelection {
    /// Compositions chaud:tiède:froid retenues, au format "h:t:f".
    /// Au moins une est requise.
    pub ratios: Vec<String>,
    /// Plage de sommes [min, max] incluse.
    #[serde(default)]
    pub sum: Option<[u16; 2]>,
    /// Plage d'étendues [min, max] incluse.
    #[serde(default)]
    pub span: Option<[u8; 2]>,
    /// Répartitions par zone admises, ex. [2,2,1].
    #[serde(default)]
    pub zones: Option<Vec<[u8; 3]>>,
    /// Nombres de boules impaires admis (0-5).
    #[serde(default)]
    pub odd: Option<Vec<u8>>,
    /// Nombres de boules premières admis (0-5).
    #[serde(default)]
    pub primes: Option<Vec<u8>>,
    /// Valeurs AC admises (0-6).
    #[serde(default)]
    pub ac: Option<Vec<u8>>,
    /// Nombres de suites consécutives admis.
    #[serde(default)]
    pub run_counts: Option<Vec<u8>>,
    /// Longueurs maximales de suite admises.
    #[serde(default)]
    pub max_runs: Option<Vec<u8>>,
    /// Listes d'inclusion par position (position 1 à 5).
    #[serde(default)]
    pub positions: [Option<Vec<u8>>; 5],
}

impl PositiveSelection {
    pub fn ratios_only(ratios: &[&str]) -> Self {
        Self {
            ratios: ratios.iter().map(|r| r.to_string()).collect(),
            sum: None,
            span: None,
            zones: None,
            odd: None,
            primes: None,
            ac: None,
            run_counts: None,
            max_runs: None,
            positions: Default::default(),
        }
    }

    pub fn parsed_ratios(&self) -> Result<Vec<RatioKey>> {
        if self.ratios.is_empty() {
            bail!("La sélection positive exige au moins un ratio chaud:tiède:froid");
        }
        self.ratios.iter().map(|r| RatioKey::parse(r)).collect()
    }
}

/// Conditions d'exclusion : chaque règle est indépendante et désactivable.
/// Une fenêtre historique insuffisante dégrade la règle en no-op pour la
/// période concernée, sans faire échouer la période.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Rejette une somme déjà vue dans les `window` derniers tirages.
    #[serde(default)]
    pub sum_repeat: Option<WindowRule>,
    /// Rejette une étendue déjà vue dans les `window` derniers tirages.
    #[serde(default)]
    pub span_repeat: Option<WindowRule>,
    /// Rejette une combinaison partageant au moins `min_shared` boules avec
    /// un tirage de la fenêtre.
    #[serde(default)]
    pub cooccur: Option<CooccurRule>,
    /// Rejette certaines formes de suites consécutives.
    #[serde(default)]
    pub run_shape: Option<RunShapeRule>,
    /// Paires de boules interdites ensemble.
    #[serde(default)]
    pub conflicts: Vec<[u8; 2]>,
}

impl ExclusionConfig {
    /// Fenêtre historique la plus large exigée par une règle active.
    pub fn max_window(&self) -> u32 {
        let mut window = 0;
        if let Some(rule) = &self.sum_repeat {
            window = window.max(rule.window);
        }
        if let Some(rule) = &self.span_repeat {
            window = window.max(rule.window);
        }
        if let Some(rule) = &self.cooccur {
            window = window.max(rule.window);
        }
        window
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRule {
    pub window: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooccurRule {
    pub window: u32,
    pub min_shared: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunShapeRule {
    /// Nombres de suites exclus.
    #[serde(default)]
    pub run_counts: Vec<u8>,
    /// Longueurs maximales de suite exclues.
    #[serde(default)]
    pub max_runs: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub pairing: PairingMode,
    /// Combinaisons d'étoiles retenues pour l'appariement ; vide = les 66.
    #[serde(default)]
    pub stars: Vec<[u8; 2]>,
    #[serde(default = "default_true")]
    pub hit_analysis: bool,
    /// Taille de l'échantillon de paires conservé par période.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pairing: PairingMode::default(),
            stars: Vec::new(),
            hit_analysis: true,
            sample_size: default_sample_size(),
            audit: AuditConfig::default(),
        }
    }
}

impl OutputConfig {
    /// Résout les paires d'étoiles configurées en identités de l'univers.
    /// Vide = toutes les combinaisons d'étoiles.
    pub fn star_ids(&self, uni: &Universe) -> Result<Vec<u32>> {
        if self.stars.is_empty() {
            return Ok(uni.stars.iter().map(|s| s.id).collect());
        }
        self.stars
            .iter()
            .map(|&pair| {
                uni.star_id(pair)
                    .with_context(|| format!("Combinaison d'étoiles invalide : {:?}", pair))
            })
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_sample_size() -> usize {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PairingMode {
    /// Appariement positionnel 1:1, la liste la plus courte tourne en boucle.
    #[default]
    Default,
    /// Produit cartésien complet boules × étoiles.
    Unlimited,
    /// Produit cartésien plafonné à `cap` paires.
    Capped { cap: u64 },
}

/// La capture d'audit est bornée par construction à un sous-ensemble
/// explicite de périodes, jamais matérialisée pour toute une plage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub scope: AuditScope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditScope {
    /// Uniquement la période prédite.
    #[default]
    Predicted,
    /// Uniquement les libellés listés.
    Issues { issues: Vec<String> },
}

impl AuditConfig {
    pub fn covers(&self, issue: &str, predicted: bool) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.scope {
            AuditScope::Predicted => predicted,
            AuditScope::Issues { issues } => issues.iter().any(|i| i == issue),
        }
    }
}
