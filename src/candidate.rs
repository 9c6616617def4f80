use crate::error::Result;
use crate::likelihood::{Likelihood, EMPTY_SYNTHETIC_SCORE};
use crate::range::{Parameter, ResolvedRanges};
use crate::synthetic::SyntheticGenerator;
use crate::utils::derive_seed;
use log::debug;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Number of fitted parameters, one gene each
pub const GENES: usize = 6;

/// One point of the parameter space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub metallicity: f64,
    /// log10 of the age in yr
    pub age: f64,
    /// E(B-V)
    pub extinction: f64,
    /// Distance modulus (m-M)o
    pub distance: f64,
    /// Total initial mass in solar masses
    pub mass: f64,
    /// Binary fraction
    pub binary: f64,
}

impl ParameterVector {
    pub fn from_values(values: [f64; GENES]) -> Self {
        ParameterVector {
            metallicity: values[0],
            age: values[1],
            extinction: values[2],
            distance: values[3],
            mass: values[4],
            binary: values[5],
        }
    }

    /// Values in `Parameter::ALL` order
    pub fn values(&self) -> [f64; GENES] {
        [
            self.metallicity,
            self.age,
            self.extinction,
            self.distance,
            self.mass,
            self.binary,
        ]
    }

    pub fn get(&self, parameter: Parameter) -> f64 {
        self.values()[parameter.index()]
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "z={} log(age)={} E(B-V)={} (m-M)o={} M={} b_fr={}",
            self.metallicity, self.age, self.extinction, self.distance, self.mass, self.binary
        )
    }
}

/// A parameter vector encoded as indices into the resolved ranges, with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub genes: [usize; GENES],
    /// Likelihood score, lower is better. NaN until evaluated.
    pub score: f64,
    /// Generation the candidate was born in (0 for the initial population and brute force)
    pub generation: usize,
    pub hash: u64,
    pub parents: Option<Vec<u64>>,
}

impl Candidate {
    pub fn new(genes: [usize; GENES]) -> Candidate {
        let mut candidate = Candidate {
            genes,
            score: f64::NAN,
            generation: 0,
            hash: 0,
            parents: None,
        };
        candidate.compute_hash();
        candidate
    }

    /// Uniform draw of every gene over its range
    pub fn random(ranges: &ResolvedRanges, rng: &mut ChaCha8Rng) -> Candidate {
        let sizes = ranges.sizes();
        let mut genes = [0; GENES];
        for (gene, size) in genes.iter_mut().zip(sizes) {
            *gene = rng.gen_range(0..size);
        }
        Candidate::new(genes)
    }

    /// Unevaluated copy of `parent`, born at `generation`
    pub fn child(parent: &Candidate, generation: usize) -> Candidate {
        let mut child = Candidate::new(parent.genes);
        child.generation = generation;
        child.parents = Some(vec![parent.hash]);
        child
    }

    pub fn compute_hash(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.genes.hash(&mut hasher);
        self.hash = hasher.finish();
    }

    pub fn is_evaluated(&self) -> bool {
        !self.score.is_nan()
    }

    pub fn vector(&self, ranges: &ResolvedRanges) -> ParameterVector {
        let mut values = [0.0; GENES];
        for parameter in Parameter::ALL {
            values[parameter.index()] = ranges.value(parameter, self.genes[parameter.index()]);
        }
        ParameterVector::from_values(values)
    }

    pub fn display(&self, ranges: &ResolvedRanges) -> String {
        format!("{} | score {:.4}", self.vector(ranges), self.score)
    }
}

/// Scores gene vectors: synthetic cluster from a per-candidate random stream, then likelihood.
/// Shared read-only by every worker thread.
pub struct Evaluator<'a> {
    generator: SyntheticGenerator<'a>,
    likelihood: &'a Likelihood,
    ranges: &'a ResolvedRanges,
    seed: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        generator: SyntheticGenerator<'a>,
        likelihood: &'a Likelihood,
        ranges: &'a ResolvedRanges,
        seed: u64,
    ) -> Self {
        Evaluator {
            generator,
            likelihood,
            ranges,
            seed,
        }
    }

    pub fn ranges(&self) -> &ResolvedRanges {
        self.ranges
    }

    /// Score of `genes`; the random stream depends only on the run seed, the generation and the genes
    pub fn score(&self, genes: &[usize; GENES], generation: usize) -> Result<f64> {
        let vector = Candidate::new(*genes).vector(self.ranges);
        let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(self.seed, generation, genes));
        let synthetic = self.generator.generate(&vector, &mut rng)?;
        let score = self.likelihood.evaluate(&synthetic);
        if score.is_nan() {
            debug!("Likelihood is undefined for {}", vector);
            return Ok(EMPTY_SYNTHETIC_SCORE);
        }
        Ok(score)
    }

    pub fn evaluate(&self, candidate: &mut Candidate) -> Result<()> {
        candidate.score = self.score(&candidate.genes, candidate.generation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_ranges() -> ResolvedRanges {
        ResolvedRanges::new([
            vec![0.015, 0.02],
            vec![8.0, 8.5, 9.0],
            vec![0.0, 0.1],
            vec![10.0],
            vec![500.0, 1000.0],
            vec![0.3],
        ])
        .unwrap()
    }

    #[test]
    fn test_vector_decodes_genes() {
        let ranges = create_test_ranges();
        let candidate = Candidate::new([1, 2, 0, 0, 1, 0]);
        let v = candidate.vector(&ranges);
        assert_eq!(v.metallicity, 0.02);
        assert_eq!(v.age, 9.0);
        assert_eq!(v.mass, 1000.0);
        assert_eq!(v.get(Parameter::Binary), 0.3);
        assert_eq!(v.values(), [0.02, 9.0, 0.0, 10.0, 1000.0, 0.3]);
    }

    #[test]
    fn test_random_candidates_stay_in_range() {
        let ranges = create_test_ranges();
        let sizes = ranges.sizes();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let c = Candidate::random(&ranges, &mut rng);
            assert!(c.genes.iter().zip(sizes).all(|(g, s)| *g < s));
            assert!(!c.is_evaluated());
        }
    }

    #[test]
    fn test_hash_depends_on_genes_only() {
        let mut a = Candidate::new([0, 1, 0, 0, 1, 0]);
        let b = Candidate::new([0, 1, 0, 0, 1, 0]);
        let c = Candidate::new([1, 1, 0, 0, 1, 0]);
        a.score = 3.0;
        a.generation = 7;
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_child_is_unevaluated_copy() {
        let mut parent = Candidate::new([1, 0, 1, 0, 0, 0]);
        parent.score = 12.0;
        let child = Candidate::child(&parent, 4);
        assert_eq!(child.genes, parent.genes);
        assert_eq!(child.generation, 4);
        assert!(!child.is_evaluated());
        assert_eq!(child.parents, Some(vec![parent.hash]));
    }
}
