//! In-memory grid, observed cluster and evaluator shared by the optimizer unit tests

use crate::candidate::{Candidate, Evaluator};
use crate::data::{ErrorModel, ObservedCmd, ObservedStar};
use crate::imf::{ImfKind, ImfSampler};
use crate::isochrone::{IsochroneGrid, IsochronePoint, IsochroneTable};
use crate::likelihood::{Likelihood, LikelihoodKind};
use crate::range::{Parameter, ResolvedRanges};
use crate::synthetic::{SynthSettings, SyntheticGenerator};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Main-sequence-like tracks, fainter with age and metallicity
pub fn create_test_grid(metallicities: &[f64], ages: &[f64]) -> IsochroneGrid {
    let mut entries = Vec::new();
    for &z in metallicities {
        for &age in ages {
            let points = (1..=30)
                .map(|i| {
                    let m = 0.1 * i as f64;
                    let mag = 12.0 - 4.5 * m + 2.0 * (age - 8.0) + 20.0 * (z - 0.015);
                    IsochronePoint::new(m, mag, mag + 1.5 - 0.4 * m + 10.0 * (z - 0.015), mag)
                })
                .collect();
            entries.push((z, age, IsochroneTable::new(points)));
        }
    }
    IsochroneGrid::from_tables(entries).unwrap()
}

fn flat_error_model(error: f64) -> ErrorModel {
    let stars = vec![
        ObservedStar { mag: 0.0, e_mag: error, color: 0.5, e_color: error, weight: 1.0 },
        ObservedStar { mag: 40.0, e_mag: error, color: 0.5, e_color: error, weight: 1.0 },
    ];
    ErrorModel::fit(&ObservedCmd::from_stars("flat", stars).unwrap())
}

pub struct Fixture {
    pub grid: IsochroneGrid,
    pub imf: ImfSampler,
    pub errors: ErrorModel,
    pub synth: SynthSettings,
    pub likelihood: Likelihood,
    pub ranges: ResolvedRanges,
    pub observed: ObservedCmd,
    pub truth: Candidate,
}

impl Fixture {
    /// 64-combination search space; the observed cluster is a synthetic draw at `truth`
    pub fn new(kind: LikelihoodKind) -> Fixture {
        let ranges = ResolvedRanges::new([
            vec![0.015, 0.02],
            vec![8.0, 9.0],
            vec![0.0, 0.2],
            vec![0.0, 1.0],
            vec![100.0, 200.0],
            vec![0.0, 0.5],
        ])
        .unwrap();
        Fixture::with_ranges(kind, ranges, [1, 1, 0, 1, 1, 0])
    }

    pub fn with_ranges(kind: LikelihoodKind, ranges: ResolvedRanges, truth: [usize; 6]) -> Fixture {
        let grid = create_test_grid(ranges.get(Parameter::Metallicity), ranges.get(Parameter::Age));
        let imf = ImfSampler::new(ImfKind::Kroupa2002);
        let synth = SynthSettings::default();
        let truth = Candidate::new(truth);

        let flat = flat_error_model(0.02);
        let generator = SyntheticGenerator::new(&grid, &imf, &flat, &synth).unwrap();
        let cluster = generator
            .generate(&truth.vector(&ranges), &mut ChaCha8Rng::seed_from_u64(2024))
            .unwrap();
        let stars = cluster
            .stars()
            .iter()
            .map(|s| ObservedStar {
                mag: s.mag,
                e_mag: s.e_mag,
                color: s.color,
                e_color: s.e_color,
                weight: 1.0,
            })
            .collect();
        let observed = ObservedCmd::from_stars("fixture", stars).unwrap();
        let errors = ErrorModel::fit(&observed);
        let likelihood = Likelihood::new(kind, &observed);

        Fixture {
            grid,
            imf,
            errors,
            synth,
            likelihood,
            ranges,
            observed,
            truth,
        }
    }

    pub fn evaluator(&self, seed: u64) -> Evaluator<'_> {
        let generator = SyntheticGenerator::new(&self.grid, &self.imf, &self.errors, &self.synth).unwrap();
        Evaluator::new(generator, &self.likelihood, &self.ranges, seed)
    }
}
