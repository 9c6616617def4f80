use crate::candidate::{Candidate, Evaluator, GENES};
use crate::cinfo;
use crate::error::{FitError, Result};
use crate::population::Population;
use crate::range::ResolvedRanges;
use crate::utils::{display_generation, display_generation_legend};
use log::{debug, info};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

//-----------------------------------------------------------------------------
// Settings
//-----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossoverKind {
    OnePoint,
    TwoPoint,
}

impl CrossoverKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "1P" => Some(CrossoverKind::OnePoint),
            "2P" => Some(CrossoverKind::TwoPoint),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CrossoverKind::OnePoint => "1P",
            CrossoverKind::TwoPoint => "2P",
        }
    }
}

/// Parent selection scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionKind {
    /// Fitness-proportional on linear rank weights
    Roulette,
    /// Best of `n` uniformly drawn candidates
    Tournament(usize),
}

/// Validated genetic algorithm hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaSettings {
    pub n_pop: usize,
    pub n_gen: usize,
    /// Minimum relative improvement over `n_es` generations to keep evolving
    pub fdif: f64,
    pub p_cross: f64,
    pub crossover: CrossoverKind,
    pub p_mut: f64,
    /// Elites carried unchanged into the next generation
    pub n_el: usize,
    /// Offspring produced by mutation only
    pub n_ei: usize,
    /// Stagnation window, in generations
    pub n_es: usize,
    pub selection: SelectionKind,
}

/// What a GA run hands back to the engine
#[derive(Debug, Clone)]
pub struct GaOutcome {
    pub best: Candidate,
    /// Best score of each generation, initial population first
    pub trace: Vec<f64>,
    pub evaluations: usize,
}

//-----------------------------------------------------------------------------
// Genetic Algorithm core functions
//-----------------------------------------------------------------------------

/// Main function to run the genetic algorithm
///
/// # Arguments
///
/// * `evaluator` - Scores candidates against the observed cluster.
/// * `settings` - Validated GA hyperparameters.
/// * `seed` - Seed of the evolution random stream.
/// * `colorful` - Keep ANSI colours in the generation display.
/// * `running` - Cleared to stop the evolution after the current generation.
pub fn ga(
    evaluator: &Evaluator,
    settings: &GaSettings,
    seed: u64,
    colorful: bool,
    running: Arc<AtomicBool>,
) -> Result<GaOutcome> {
    let time = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let base_pop = generate_pop(evaluator.ranges(), settings.n_pop, &mut rng);
    info!(
        "Population size: {}, search space {} combinations",
        base_pop.len(),
        evaluator.ranges().combinations()
    );

    cinfo!(colorful, "{}", display_generation_legend());
    let outcome = iterative_evolution(base_pop, evaluator, settings, colorful, running, &mut rng)?;

    info!(
        "Genetic algorithm computed {} generations ({} evaluations) in {:.2?}",
        outcome.trace.len(),
        outcome.evaluations,
        time.elapsed()
    );
    Ok(outcome)
}

/// Initial population drawn uniformly from the resolved ranges
pub fn generate_pop(ranges: &ResolvedRanges, n_pop: usize, rng: &mut ChaCha8Rng) -> Population {
    let mut pop = Population::new();
    for _ in 0..n_pop {
        pop.candidates.push(Candidate::random(ranges, rng));
    }
    pop
}

/// True once the best score improved by no more than `fdif` (relative) over the last `n_es` generations
pub fn is_stagnating(trace: &[f64], n_es: usize, fdif: f64) -> bool {
    let generation = trace.len().saturating_sub(1);
    if trace.is_empty() || generation < n_es {
        return false;
    }
    let old = trace[generation - n_es];
    let new = trace[generation];
    let improvement = if old != 0.0 { (old - new) / old.abs() } else { old - new };
    improvement <= fdif
}

/// Run the iterative evolution process of the genetic algorithm
pub fn iterative_evolution(
    base_pop: Population,
    evaluator: &Evaluator,
    settings: &GaSettings,
    colorful: bool,
    running: Arc<AtomicBool>,
    rng: &mut ChaCha8Rng,
) -> Result<GaOutcome> {
    let mut pop = base_pop;

    debug!("Fitting initial population...");
    let mut evaluations = pop.fit(evaluator)?;
    pop = pop.sort();

    let mut trace = vec![pop.best_score()];
    cinfo!(colorful, "{}", display_generation(&pop, 0, evaluator.ranges()));

    for generation in 1..settings.n_gen {
        if !running.load(Ordering::Relaxed) {
            info!("Signal received");
            break;
        }

        let (next_pop, n_evaluated) = evolve(pop, evaluator, settings, generation, rng)?;
        pop = next_pop;
        evaluations += n_evaluated;
        trace.push(pop.best_score());

        cinfo!(colorful, "{}", display_generation(&pop, generation, evaluator.ranges()));

        if is_stagnating(&trace, settings.n_es, settings.fdif) {
            info!(
                "Best score improved by less than {} over the last {} generations",
                settings.fdif, settings.n_es
            );
            break;
        }
    }

    if trace.len() == settings.n_gen {
        info!("Reach max generation");
    }

    let best = pop
        .best()
        .cloned()
        .ok_or_else(|| FitError::computation("genetic algorithm", "population is empty"))?;

    Ok(GaOutcome {
        best,
        trace,
        evaluations,
    })
}

/// Run one evolution step: elitism, mutation-only offspring, cross-over, mutation, fitting
///
/// Returns the sorted next generation and the number of evaluations it took.
pub fn evolve(
    pop: Population,
    evaluator: &Evaluator,
    settings: &GaSettings,
    generation: usize,
    rng: &mut ChaCha8Rng,
) -> Result<(Population, usize)> {
    let sizes = evaluator.ranges().sizes();
    let mut new_pop = Population::new();

    // Elites keep their score and are not evaluated again
    new_pop
        .candidates
        .extend(pop.candidates.iter().take(settings.n_el).cloned());

    let mut children = Population::new();
    for idx in select_parents(&pop, settings.n_ei, &settings.selection, rng) {
        let mut child = Candidate::child(&pop.candidates[idx], generation);
        force_mutation(&mut child, &sizes, rng);
        mutate(&mut child, settings.p_mut, &sizes, rng);
        children.candidates.push(child);
    }

    let target = settings.n_pop.saturating_sub(new_pop.len());
    while children.len() < target {
        let parents = select_parents(&pop, 2, &settings.selection, rng);
        let (p1, p2) = (&pop.candidates[parents[0]], &pop.candidates[parents[1]]);

        let offspring = if rng.gen_bool(settings.p_cross) {
            cross_over(p1, p2, settings.crossover, generation, rng)
        } else {
            (Candidate::child(p1, generation), Candidate::child(p2, generation))
        };

        for mut child in [offspring.0, offspring.1] {
            if children.len() < target {
                mutate(&mut child, settings.p_mut, &sizes, rng);
                children.candidates.push(child);
            }
        }
    }

    debug!("Fitting {} children...", children.len());
    let evaluations = children.fit(evaluator)?;
    new_pop.add(children);

    Ok((new_pop.sort(), evaluations))
}

/// Picks `n` parent indices from a sorted population
pub fn select_parents(pop: &Population, n: usize, selection: &SelectionKind, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let size = pop.len();
    if size == 0 {
        return Vec::new();
    }
    match selection {
        SelectionKind::Roulette => {
            // rank r (0 = best) weighs size - r
            let total = size * (size + 1) / 2;
            (0..n)
                .map(|_| {
                    let mut ticket = rng.gen_range(0..total);
                    for rank in 0..size {
                        let weight = size - rank;
                        if ticket < weight {
                            return rank;
                        }
                        ticket -= weight;
                    }
                    size - 1
                })
                .collect()
        }
        SelectionKind::Tournament(k) => (0..n)
            .map(|_| {
                (0..(*k).max(1))
                    .map(|_| rng.gen_range(0..size))
                    .min()
                    .unwrap_or(0)
            })
            .collect(),
    }
}

/// Single or two-point recombination of two parents into two children
pub fn cross_over(
    p1: &Candidate,
    p2: &Candidate,
    kind: CrossoverKind,
    generation: usize,
    rng: &mut ChaCha8Rng,
) -> (Candidate, Candidate) {
    let (start, end) = match kind {
        CrossoverKind::OnePoint => (rng.gen_range(1..GENES), GENES),
        CrossoverKind::TwoPoint => {
            let a = rng.gen_range(1..GENES - 1);
            (a, rng.gen_range(a + 1..GENES))
        }
    };

    let mut g1 = p1.genes;
    let mut g2 = p2.genes;
    g1[start..end].copy_from_slice(&p2.genes[start..end]);
    g2[start..end].copy_from_slice(&p1.genes[start..end]);

    let make = |genes| {
        let mut child = Candidate::new(genes);
        child.generation = generation;
        child.parents = Some(vec![p1.hash, p2.hash]);
        child
    };
    (make(g1), make(g2))
}

/// Redraws each gene with probability `p_mut`, always to a different value
pub fn mutate(candidate: &mut Candidate, p_mut: f64, sizes: &[usize; GENES], rng: &mut ChaCha8Rng) {
    if p_mut <= 0.0 {
        return;
    }
    for (gene, &size) in candidate.genes.iter_mut().zip(sizes) {
        if size > 1 && rng.gen_bool(p_mut) {
            *gene = redraw(*gene, size, rng);
        }
    }
    candidate.compute_hash();
}

/// Changes one gene picked among the mutable ones
fn force_mutation(candidate: &mut Candidate, sizes: &[usize; GENES], rng: &mut ChaCha8Rng) {
    let mutable: Vec<usize> = (0..GENES).filter(|g| sizes[*g] > 1).collect();
    if mutable.is_empty() {
        return;
    }
    let g = mutable[rng.gen_range(0..mutable.len())];
    candidate.genes[g] = redraw(candidate.genes[g], sizes[g], rng);
    candidate.compute_hash();
}

fn redraw(current: usize, size: usize, rng: &mut ChaCha8Rng) -> usize {
    let value = rng.gen_range(0..size - 1);
    if value >= current {
        value + 1
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::LikelihoodKind;
    use crate::test_fixtures::Fixture;

    fn create_test_population(size: usize) -> Population {
        let mut pop = Population::new();
        for i in 0..size {
            let mut c = Candidate::new([i % 2, i % 3, 0, 0, 0, i % 2]);
            c.score = i as f64;
            pop.candidates.push(c);
        }
        pop
    }

    fn create_test_settings() -> GaSettings {
        GaSettings {
            n_pop: 12,
            n_gen: 8,
            fdif: 0.0,
            p_cross: 0.85,
            crossover: CrossoverKind::TwoPoint,
            p_mut: 0.1,
            n_el: 1,
            n_ei: 3,
            n_es: 50,
            selection: SelectionKind::Roulette,
        }
    }

    #[test]
    fn test_crossover_names() {
        assert_eq!(CrossoverKind::from_name("1P"), Some(CrossoverKind::OnePoint));
        assert_eq!(CrossoverKind::from_name("2P"), Some(CrossoverKind::TwoPoint));
        assert_eq!(CrossoverKind::from_name("3P"), None);
        assert_eq!(CrossoverKind::TwoPoint.name(), "2P");
    }

    #[test]
    fn test_cross_over_mixes_parent_genes() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let p1 = Candidate::new([0; GENES]);
        let p2 = Candidate::new([1; GENES]);
        for kind in [CrossoverKind::OnePoint, CrossoverKind::TwoPoint] {
            for _ in 0..50 {
                let (c1, c2) = cross_over(&p1, &p2, kind, 3, &mut rng);
                for g in 0..GENES {
                    assert_eq!(c1.genes[g] + c2.genes[g], 1, "children must be complementary");
                }
                assert!(c1.genes.contains(&0) && c1.genes.contains(&1));
                assert_eq!(c1.genes[0], 0, "first gene always comes from the first parent");
                assert_eq!(c1.generation, 3);
                assert_eq!(c1.parents, Some(vec![p1.hash, p2.hash]));
                assert!(!c1.is_evaluated());
            }
        }
    }

    #[test]
    fn test_mutate_respects_sizes_and_probability() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sizes = [3, 1, 2, 4, 1, 5];

        let mut unchanged = Candidate::new([1, 0, 1, 2, 0, 4]);
        mutate(&mut unchanged, 0.0, &sizes, &mut rng);
        assert_eq!(unchanged.genes, [1, 0, 1, 2, 0, 4]);

        let mut all = Candidate::new([1, 0, 1, 2, 0, 4]);
        let hash = all.hash;
        mutate(&mut all, 1.0, &sizes, &mut rng);
        for g in 0..GENES {
            assert!(all.genes[g] < sizes[g]);
            if sizes[g] > 1 {
                assert_ne!(all.genes[g], [1, 0, 1, 2, 0, 4][g]);
            }
        }
        assert_ne!(all.hash, hash);
    }

    #[test]
    fn test_force_mutation_changes_exactly_one_gene() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sizes = [2, 1, 1, 3, 1, 1];
        for _ in 0..20 {
            let mut c = Candidate::new([0; GENES]);
            force_mutation(&mut c, &sizes, &mut rng);
            let changed = c.genes.iter().filter(|g| **g != 0).count();
            assert_eq!(changed, 1);
            assert!(c.genes[0] != 0 || c.genes[3] != 0);
        }
    }

    #[test]
    fn test_selection_favours_best_ranks() {
        let pop = create_test_population(20);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for selection in [SelectionKind::Roulette, SelectionKind::Tournament(3)] {
            let picks = select_parents(&pop, 2000, &selection, &mut rng);
            assert!(picks.iter().all(|i| *i < 20));
            let top = picks.iter().filter(|i| **i < 5).count();
            let bottom = picks.iter().filter(|i| **i >= 15).count();
            assert!(top > bottom, "{:?}: top {} bottom {}", selection, top, bottom);
        }
    }

    #[test]
    fn test_stagnation_window() {
        assert!(!is_stagnating(&[10.0, 9.0], 2, 0.01));
        assert!(!is_stagnating(&[10.0, 9.0, 8.0], 2, 0.01));
        assert!(is_stagnating(&[10.0, 10.0, 10.0], 2, 0.0));
        assert!(is_stagnating(&[10.0, 9.999, 9.998], 2, 0.01));
        assert!(!is_stagnating(&[], 0, 0.5));
    }

    #[test]
    fn test_evolve_keeps_size_and_elites() {
        let fixture = Fixture::new(LikelihoodKind::Tolstoy);
        let evaluator = fixture.evaluator(1);
        let settings = create_test_settings();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let mut pop = generate_pop(&fixture.ranges, settings.n_pop, &mut rng);
        pop.fit(&evaluator).unwrap();
        let pop = pop.sort();
        let elite = pop.candidates[0].clone();

        let (next, evaluations) = evolve(pop, &evaluator, &settings, 1, &mut rng).unwrap();
        assert_eq!(next.len(), settings.n_pop);
        assert_eq!(evaluations, settings.n_pop - settings.n_el);
        assert!(next.candidates.iter().all(|c| c.is_evaluated()));
        assert!(next.candidates.contains(&elite));
        assert!(next.best_score() <= elite.score);
    }

    #[test]
    fn test_ga_trace_never_gets_worse() {
        let fixture = Fixture::new(LikelihoodKind::Tolstoy);
        let evaluator = fixture.evaluator(4815162342);
        let settings = create_test_settings();

        let outcome = ga(&evaluator, &settings, 42, false, Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(outcome.trace.len(), settings.n_gen);
        assert!(outcome.trace.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(outcome.best.score, *outcome.trace.last().unwrap());
        assert_eq!(
            outcome.evaluations,
            settings.n_pop + (settings.n_gen - 1) * (settings.n_pop - settings.n_el)
        );
    }

    #[test]
    fn test_ga_is_reproducible() {
        let fixture = Fixture::new(LikelihoodKind::Dolphin(crate::binning::BinningMethod::Bb));
        let evaluator = fixture.evaluator(11);
        let settings = create_test_settings();

        let a = ga(&evaluator, &settings, 5, false, Arc::new(AtomicBool::new(true))).unwrap();
        let b = ga(&evaluator, &settings, 5, false, Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.trace, b.trace);
    }

    #[test]
    fn test_ga_stops_when_not_running() {
        let fixture = Fixture::new(LikelihoodKind::Tolstoy);
        let evaluator = fixture.evaluator(3);
        let settings = create_test_settings();

        let outcome = ga(&evaluator, &settings, 1, false, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.evaluations, settings.n_pop);
    }

    #[test]
    fn test_ga_stops_on_stagnation() {
        // dolphin scores are non-negative, so a relative improvement never exceeds 1
        let fixture = Fixture::new(LikelihoodKind::Dolphin(crate::binning::BinningMethod::Bb));
        let evaluator = fixture.evaluator(3);
        let mut settings = create_test_settings();
        settings.n_gen = 100;
        settings.n_es = 2;
        settings.fdif = 1.0;

        let outcome = ga(&evaluator, &settings, 1, false, Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(outcome.trace.len(), 3);
    }
}
