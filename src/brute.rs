use crate::candidate::{Candidate, Evaluator, GENES};
use crate::error::{FitError, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Combinations evaluated between two checks of the running flag
const CHUNK_SIZE: usize = 512;

#[derive(Debug, Clone)]
pub struct BruteOutcome {
    pub best: Candidate,
    pub evaluations: usize,
}

/// Genes of the `index`-th combination, metallicity varying slowest
pub fn decode_index(mut index: usize, sizes: &[usize; GENES]) -> [usize; GENES] {
    let mut genes = [0; GENES];
    for g in (0..GENES).rev() {
        genes[g] = index % sizes[g];
        index /= sizes[g];
    }
    genes
}

/// Evaluates every combination of the resolved ranges exactly once and keeps the lowest score.
/// Ties go to the first combination in enumeration order.
pub fn brute_force(evaluator: &Evaluator, running: Arc<AtomicBool>) -> Result<BruteOutcome> {
    let time = Instant::now();
    let sizes = evaluator.ranges().sizes();
    let total = evaluator.ranges().combinations();
    info!("Brute force over {} combinations {:?}", total, sizes);

    let mut best: Option<Candidate> = None;
    let mut evaluations = 0;

    for start in (0..total).step_by(CHUNK_SIZE) {
        if !running.load(Ordering::Relaxed) {
            warn!(
                "Signal received: brute force stopped after {}/{} combinations",
                evaluations, total
            );
            break;
        }
        let end = (start + CHUNK_SIZE).min(total);

        let scored: Vec<Candidate> = (start..end)
            .into_par_iter()
            .map(|index| {
                let mut candidate = Candidate::new(decode_index(index, &sizes));
                evaluator.evaluate(&mut candidate)?;
                Ok(candidate)
            })
            .collect::<Result<Vec<Candidate>>>()?;
        evaluations += scored.len();

        for candidate in scored {
            if best.as_ref().map_or(true, |b| candidate.score < b.score) {
                best = Some(candidate);
            }
        }
        debug!("{}/{} combinations evaluated", evaluations, total);
    }

    let best = best.ok_or_else(|| FitError::computation("brute force", "no combination was evaluated"))?;
    info!(
        "Brute force computed {} evaluations in {:.2?}",
        evaluations,
        time.elapsed()
    );
    Ok(BruteOutcome { best, evaluations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::LikelihoodKind;
    use crate::range::ResolvedRanges;
    use crate::test_fixtures::Fixture;
    use std::collections::HashSet;

    #[test]
    fn test_decode_index_enumerates_every_combination_once() {
        let sizes = [3, 4, 1, 1, 2, 1];
        let all: HashSet<[usize; GENES]> = (0..24).map(|i| decode_index(i, &sizes)).collect();
        assert_eq!(all.len(), 24);
        assert_eq!(decode_index(0, &sizes), [0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_index(1, &sizes), [0, 0, 0, 0, 1, 0]);
        assert_eq!(decode_index(23, &sizes), [2, 3, 0, 0, 1, 0]);
    }

    #[test]
    fn test_brute_force_counts_product_of_sizes() {
        let ranges = ResolvedRanges::new([
            vec![0.01, 0.015, 0.02],
            vec![8.0, 8.5, 9.0, 9.5],
            vec![0.1],
            vec![0.5],
            vec![80.0, 120.0],
            vec![0.2],
        ])
        .unwrap();
        let fixture = Fixture::with_ranges(LikelihoodKind::Tolstoy, ranges, [1, 2, 0, 0, 1, 0]);
        let evaluator = fixture.evaluator(7);

        let outcome = brute_force(&evaluator, Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(outcome.evaluations, 24);
        assert!(outcome.best.is_evaluated());
    }

    #[test]
    fn test_brute_force_best_is_minimum() {
        let fixture = Fixture::new(LikelihoodKind::Dolphin(crate::binning::BinningMethod::Bb));
        let evaluator = fixture.evaluator(7);

        let outcome = brute_force(&evaluator, Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(outcome.evaluations, 64);
        let sizes = fixture.ranges.sizes();
        for index in 0..64 {
            let score = evaluator.score(&decode_index(index, &sizes), 0).unwrap();
            assert!(outcome.best.score <= score);
        }
    }

    #[test]
    fn test_brute_force_stops_when_not_running() {
        let fixture = Fixture::new(LikelihoodKind::Tolstoy);
        let evaluator = fixture.evaluator(7);
        let err = brute_force(&evaluator, Arc::new(AtomicBool::new(false))).unwrap_err();
        assert!(matches!(err, FitError::Computation { .. }));
    }
}
