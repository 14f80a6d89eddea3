use crate::task::PairingMode;

/// Résumé d'appariement : le décompte exact et un échantillon borné. La
/// liste complète n'est jamais conservée par défaut, elle se rematérialise
/// à la demande via [`pairs_iter`].
#[derive(Debug, Clone, PartialEq)]
pub struct PairingSummary {
    pub count: u64,
    pub sample: Vec<(u32, u32)>,
}

/// Nombre de paires produites par une politique, sans matérialisation.
pub fn pair_count(balls: usize, stars: usize, mode: &PairingMode) -> u64 {
    if balls == 0 || stars == 0 {
        return 0;
    }
    match mode {
        PairingMode::Default => balls as u64,
        PairingMode::Unlimited => balls as u64 * stars as u64,
        PairingMode::Capped { cap } => (balls as u64 * stars as u64).min(*cap),
    }
}

/// Étape 3 : appariement déterministe des survivants avec les étoiles
/// choisies.
/// - défaut : positionnel 1:1, une paire par combinaison de boules
///   survivante, la liste d'étoiles tourne en boucle ; l'ensemble ne
///   grossit jamais d'une étape à l'autre ;
/// - illimité : produit cartésien complet, boules en majeur ;
/// - plafonné : produit cartésien tronqué à `cap`.
pub fn pairs_iter<'a>(
    ball_ids: &'a [u32],
    star_ids: &'a [u32],
    mode: &PairingMode,
) -> Box<dyn Iterator<Item = (u32, u32)> + 'a> {
    let count = pair_count(ball_ids.len(), star_ids.len(), mode);
    if count == 0 {
        return Box::new(std::iter::empty());
    }
    match mode {
        PairingMode::Default => Box::new(
            ball_ids
                .iter()
                .enumerate()
                .map(move |(i, &b)| (b, star_ids[i % star_ids.len()])),
        ),
        PairingMode::Unlimited | PairingMode::Capped { .. } => Box::new(
            ball_ids
                .iter()
                .flat_map(move |&b| star_ids.iter().map(move |&s| (b, s)))
                .take(count as usize),
        ),
    }
}

pub fn pair_summary(
    ball_ids: &[u32],
    star_ids: &[u32],
    mode: &PairingMode,
    sample_size: usize,
) -> PairingSummary {
    PairingSummary {
        count: pair_count(ball_ids.len(), star_ids.len(), mode),
        sample: pairs_iter(ball_ids, star_ids, mode).take(sample_size).collect(),
    }
}
