use grandloto_db::models::{RatioKey, Temperature};

/// Classe les 35 boules en chaud/tiède/froid d'après le vecteur de retards
/// de la période de base.
pub fn temperatures(misses: &[u32; 35]) -> [Temperature; 35] {
    let mut temps = [Temperature::Cold; 35];
    for (i, &miss) in misses.iter().enumerate() {
        temps[i] = Temperature::from_miss(miss);
    }
    temps
}

/// Composition chaud:tiède:froid d'une combinaison sous une classification.
pub fn composition(numbers: &[u8; 5], temps: &[Temperature; 35]) -> RatioKey {
    let mut hot = 0u8;
    let mut warm = 0u8;
    let mut cold = 0u8;
    for &n in numbers {
        match temps[(n - 1) as usize] {
            Temperature::Hot => hot += 1,
            Temperature::Warm => warm += 1,
            Temperature::Cold => cold += 1,
        }
    }
    RatioKey { hot, warm, cold }
}
