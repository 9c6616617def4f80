use crate::candidate::{Candidate, Evaluator};
use crate::error::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct Population {
    pub candidates: Vec<Candidate>,
}

impl Population {
    pub fn new() -> Population {
        Population {
            candidates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Evaluates every candidate not yet scored, in parallel. Returns the number of evaluations.
    pub fn fit(&mut self, evaluator: &Evaluator) -> Result<usize> {
        let pending: Vec<&mut Candidate> = self
            .candidates
            .iter_mut()
            .filter(|c| !c.is_evaluated())
            .collect();
        let n = pending.len();
        pending
            .into_par_iter()
            .try_for_each(|c| evaluator.evaluate(c))?;
        Ok(n)
    }

    /// Ascending score; equal scores ordered by genes so the order never depends on scheduling
    pub fn sort(mut self) -> Self {
        self.candidates
            .sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.genes.cmp(&b.genes)));
        self
    }

    /// add some candidates in the population
    pub fn add(&mut self, population: Population) {
        self.candidates.extend(population.candidates);
    }

    /// Best candidate of a sorted population
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn best_score(&self) -> f64 {
        self.best().map(|c| c.score).unwrap_or(f64::INFINITY)
    }
}
