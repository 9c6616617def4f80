use crate::binning::{BinningMethod, CmdBins};
use crate::data::{ObservedCmd, ObservedStar};
use crate::synthetic::SyntheticCluster;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Score given to a parameter vector whose synthetic cluster holds no star
pub const EMPTY_SYNTHETIC_SCORE: f64 = 1e9;
/// Expected count substituted in bins without synthetic stars
pub const EMPTY_BIN_FLOOR: f64 = 1e-3;

const TOLSTOY_EPSILON: f64 = 1e-300;
/// Smallest combined variance of the point kernel, keeps error-free photometry finite
const MIN_VARIANCE: f64 = 1e-6;

/// Likelihood estimator, resolved once from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikelihoodKind {
    Tolstoy,
    Dolphin(BinningMethod),
}

impl LikelihoodKind {
    pub fn name(&self) -> &'static str {
        match self {
            LikelihoodKind::Tolstoy => "tolstoy",
            LikelihoodKind::Dolphin(_) => "dolphin",
        }
    }
}

/// An estimator prepared against one observed CMD. Lower scores are better.
#[derive(Debug, Clone)]
pub enum Likelihood {
    Tolstoy {
        observed: Vec<ObservedStar>,
    },
    Dolphin {
        method: BinningMethod,
        bins: CmdBins,
        observed_counts: Vec<f64>,
    },
}

impl Likelihood {
    pub fn new(kind: LikelihoodKind, observed: &ObservedCmd) -> Self {
        match kind {
            LikelihoodKind::Tolstoy => Likelihood::Tolstoy {
                observed: observed.stars.clone(),
            },
            LikelihoodKind::Dolphin(method) => {
                let bins = CmdBins::from_observed(method, observed);
                let observed_counts = bins.histogram(observed.stars.iter().map(|s| (s.mag, s.color, s.weight)));
                Likelihood::Dolphin {
                    method,
                    bins,
                    observed_counts,
                }
            }
        }
    }

    pub fn kind(&self) -> LikelihoodKind {
        match self {
            Likelihood::Tolstoy { .. } => LikelihoodKind::Tolstoy,
            Likelihood::Dolphin { method, .. } => LikelihoodKind::Dolphin(*method),
        }
    }

    pub fn evaluate(&self, synthetic: &SyntheticCluster) -> f64 {
        if synthetic.is_empty() {
            return EMPTY_SYNTHETIC_SCORE;
        }
        match self {
            Likelihood::Tolstoy { observed } => tolstoy(observed, synthetic),
            Likelihood::Dolphin {
                bins, observed_counts, ..
            } => {
                let expected = bins.histogram(synthetic.stars().iter().map(|s| (s.mag, s.color, 1.0)));
                dolphin(observed_counts, &expected)
            }
        }
    }
}

/// Weighted negative log-likelihood of the observed stars under the synthetic point cloud
fn tolstoy(observed: &[ObservedStar], synthetic: &SyntheticCluster) -> f64 {
    let n_synth = synthetic.len() as f64;
    observed
        .iter()
        .map(|o| {
            let density: f64 = synthetic
                .stars()
                .iter()
                .map(|s| {
                    let var_mag = (o.e_mag * o.e_mag + s.e_mag * s.e_mag).max(MIN_VARIANCE);
                    let var_color = (o.e_color * o.e_color + s.e_color * s.e_color).max(MIN_VARIANCE);
                    let dm = o.mag - s.mag;
                    let dc = o.color - s.color;
                    (-0.5 * (dm * dm / var_mag + dc * dc / var_color)).exp()
                        / (2.0 * PI * (var_mag * var_color).sqrt())
                })
                .sum();
            -o.weight * (density / n_synth).max(TOLSTOY_EPSILON).ln()
        })
        .sum()
}

/// Poisson likelihood ratio statistic, -2 ln PLR
fn dolphin(observed: &[f64], expected: &[f64]) -> f64 {
    observed
        .iter()
        .zip(expected)
        .map(|(&n, &m)| {
            let m = m.max(EMPTY_BIN_FLOOR);
            if n > 0.0 {
                m - n + n * (n / m).ln()
            } else {
                m
            }
        })
        .sum::<f64>()
        * 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticStar;

    fn create_test_observed() -> ObservedCmd {
        let stars = (0..40)
            .map(|i| ObservedStar {
                mag: 12.0 + 0.1 * i as f64,
                e_mag: 0.02,
                color: 0.4 + 0.02 * i as f64,
                e_color: 0.03,
                weight: 1.0,
            })
            .collect();
        ObservedCmd::from_stars("test", stars).unwrap()
    }

    fn synthetic_from(observed: &ObservedCmd, mag_shift: f64) -> SyntheticCluster {
        SyntheticCluster::new(
            observed
                .stars
                .iter()
                .map(|s| SyntheticStar {
                    mag: s.mag + mag_shift,
                    color: s.color,
                    e_mag: s.e_mag,
                    e_color: s.e_color,
                })
                .collect(),
        )
    }

    #[test]
    fn test_kind_round_trip() {
        let observed = create_test_observed();
        assert_eq!(Likelihood::new(LikelihoodKind::Tolstoy, &observed).kind(), LikelihoodKind::Tolstoy);
        let dolphin = LikelihoodKind::Dolphin(BinningMethod::Knuth);
        assert_eq!(Likelihood::new(dolphin, &observed).kind(), dolphin);
        assert_eq!(dolphin.name(), "dolphin");
    }

    #[test]
    fn test_empty_synthetic_scores_worst() {
        let observed = create_test_observed();
        for kind in [LikelihoodKind::Tolstoy, LikelihoodKind::Dolphin(BinningMethod::Bb)] {
            let likelihood = Likelihood::new(kind, &observed);
            assert_eq!(likelihood.evaluate(&SyntheticCluster::default()), EMPTY_SYNTHETIC_SCORE);
        }
    }

    #[test]
    fn test_tolstoy_prefers_matching_cloud() {
        let observed = create_test_observed();
        let likelihood = Likelihood::new(LikelihoodKind::Tolstoy, &observed);
        let matching = likelihood.evaluate(&synthetic_from(&observed, 0.0));
        let shifted = likelihood.evaluate(&synthetic_from(&observed, 1.0));
        assert!(matching.is_finite() && shifted.is_finite());
        assert!(matching < shifted);
    }

    #[test]
    fn test_tolstoy_weights_scale_score() {
        let mut observed = create_test_observed();
        let synthetic = synthetic_from(&observed, 0.3);
        let full = Likelihood::new(LikelihoodKind::Tolstoy, &observed).evaluate(&synthetic);
        for s in observed.stars.iter_mut() {
            s.weight = 0.5;
        }
        let half = Likelihood::new(LikelihoodKind::Tolstoy, &observed).evaluate(&synthetic);
        assert!((half - 0.5 * full).abs() < 1e-9 * full.abs().max(1.0));
    }

    #[test]
    fn test_dolphin_is_near_zero_for_identical_counts() {
        let observed = create_test_observed();
        let likelihood = Likelihood::new(LikelihoodKind::Dolphin(BinningMethod::Sqrt), &observed);
        let identical = likelihood.evaluate(&synthetic_from(&observed, 0.0));
        let shifted = likelihood.evaluate(&synthetic_from(&observed, 0.7));
        assert!(identical >= 0.0);
        assert!(identical < 0.2);
        assert!(shifted > identical);
    }

    #[test]
    fn test_dolphin_floor_on_empty_expected_bins() {
        let score = dolphin(&[2.0, 0.0], &[0.0, 0.0]);
        let m = EMPTY_BIN_FLOOR;
        let expected = 2.0 * ((m - 2.0 + 2.0 * (2.0 / m).ln()) + m);
        assert!((score - expected).abs() < 1e-12);
    }
}
