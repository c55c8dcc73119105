//! Ranking of decision options.
//!
//! Every explicit decision builds one [`UtilityTuple`] per option. Dimensions
//! are ordered by importance and the last one is a random jitter; a
//! [`TieBreak`] policy then turns the list into one option or "no action".

pub mod functions;

pub use functions::UtilityKind;

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct UtilityTuple<T> {
    pub dims: Vec<f64>,
    pub option: T,
}

impl<T> UtilityTuple<T> {
    pub fn new(dims: Vec<f64>, option: T) -> Self {
        Self { dims, option }
    }

    fn cmp_dims(&self, other: &Self) -> Ordering {
        for (a, b) in self.dims.iter().zip(&other.dims) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.dims.len().cmp(&other.dims.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    #[default]
    Deterministic,
    Normalized,
}

impl TieBreak {
    /// Picks the winning option, or `None` for "no action". An empty list is
    /// always "no action".
    pub fn select<T: Copy, R: Rng + ?Sized>(self, tuples: &[UtilityTuple<T>], rng: &mut R) -> Option<T> {
        match self {
            TieBreak::Deterministic => deterministic(tuples),
            TieBreak::Normalized => normalized(tuples, rng),
        }
    }
}

/// Lexicographic maximum, accepted if its first non-zero dimension is
/// positive and rejected if it is negative. All-zero means no action.
pub fn deterministic<T: Copy>(tuples: &[UtilityTuple<T>]) -> Option<T> {
    let best = tuples
        .iter()
        .reduce(|best, t| if t.cmp_dims(best) == Ordering::Greater { t } else { best })?;
    for d in &best.dims {
        if *d > 0.0 {
            return Some(best.option);
        }
        if *d < 0.0 {
            return None;
        }
    }
    None
}

/// Scales each dimension by its maximum (non-positive maxima become 1),
/// halves the weight per rank and samples among positive scores in
/// proportion to the score. The jitter dimension is left out.
pub fn normalized<T: Copy, R: Rng + ?Sized>(tuples: &[UtilityTuple<T>], rng: &mut R) -> Option<T> {
    let width = tuples.first()?.dims.len().saturating_sub(1);
    if width == 0 {
        return None;
    }
    let mut maxima = vec![f64::NEG_INFINITY; width];
    for t in tuples {
        for (m, d) in maxima.iter_mut().zip(&t.dims[..width]) {
            *m = m.max(*d);
        }
    }
    for m in &mut maxima {
        if *m <= 0.0 {
            *m = 1.0;
        }
    }

    let scored: Vec<(f64, T)> = tuples
        .iter()
        .map(|t| {
            let score = t.dims[..width]
                .iter()
                .zip(&maxima)
                .enumerate()
                .map(|(rank, (d, m))| d / m / 2f64.powi(rank as i32))
                .sum::<f64>();
            (score, t.option)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();
    if scored.is_empty() {
        return None;
    }
    let weights = WeightedIndex::new(scored.iter().map(|(s, _)| *s)).ok()?;
    Some(scored[weights.sample(rng)].1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn t(dims: &[f64], option: u32) -> UtilityTuple<u32> {
        UtilityTuple::new(dims.to_vec(), option)
    }

    #[test]
    fn first_nonzero_dimension_decides() {
        assert_eq!(deterministic(&[t(&[0.0, 1.0, -0.3], 7)]), Some(7));
        assert_eq!(deterministic(&[t(&[0.0, -1.0, 0.4], 7)]), None);
        assert_eq!(deterministic(&[t(&[0.0, 0.0, 0.0], 7)]), None);
        assert_eq!(deterministic::<u32>(&[]), None);
    }

    #[test]
    fn earlier_dimensions_dominate() {
        let tuples = [t(&[1.0, -5.0, 0.0], 1), t(&[0.5, 9.0, 0.9], 2)];
        assert_eq!(deterministic(&tuples), Some(1));
        let tuples = [t(&[-1.0, 5.0], 1), t(&[-2.0, 9.0], 2)];
        assert_eq!(deterministic(&tuples), None);
    }

    #[test]
    fn jitter_breaks_full_ties() {
        let tuples = [t(&[0.0, 0.0, -0.2], 1), t(&[0.0, 0.0, 0.3], 2)];
        assert_eq!(deterministic(&tuples), Some(2));
    }

    #[test]
    fn normalized_only_samples_positive_scores() {
        let mut rng = StdRng::seed_from_u64(5);
        let tuples = [t(&[-1.0, 0.0, 0.5], 1), t(&[2.0, 1.0, 0.1], 2), t(&[0.0, -3.0, 0.9], 3)];
        for _ in 0..50 {
            assert_eq!(normalized(&tuples, &mut rng), Some(2));
        }
        let losers = [t(&[-1.0, 0.0, 0.5], 1)];
        assert_eq!(TieBreak::Normalized.select(&losers, &mut rng), None);
        assert_eq!(TieBreak::Normalized.select::<u32, _>(&[], &mut rng), None);
    }

    proptest! {
        #[test]
        fn greater_first_dimension_never_loses(
            a0 in -100.0f64..100.0,
            gap in 0.001f64..50.0,
            a_rest in prop::collection::vec(-100.0f64..100.0, 3),
            b_rest in prop::collection::vec(-100.0f64..100.0, 3),
        ) {
            let mut a = vec![a0 + gap];
            a.extend(&a_rest);
            let mut b = vec![a0];
            b.extend(&b_rest);
            let tuples = [t(&b, 2), t(&a, 1)];
            prop_assert_ne!(deterministic(&tuples), Some(2));
            let flipped = [t(&a, 1), t(&b, 2)];
            prop_assert_ne!(deterministic(&flipped), Some(2));
        }
    }
}
