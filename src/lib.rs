pub mod binning;
pub mod brute;
pub mod candidate;
pub mod data;
pub mod error;
pub mod ga;
pub mod imf;
pub mod isochrone;
pub mod likelihood;
pub mod param;
pub mod population;
pub mod range;
pub mod result;
pub mod synthetic;
pub mod utils;

#[cfg(test)]
mod test_fixtures;

use crate::brute::brute_force;
use crate::candidate::{Candidate, Evaluator};
use crate::data::{ErrorModel, ObservedCmd};
use crate::error::{FitError, Result};
use crate::ga::ga;
use crate::imf::ImfSampler;
use crate::isochrone::{CmdFilters, IsochroneGrid};
use crate::likelihood::{Likelihood, EMPTY_SYNTHETIC_SCORE};
use crate::param::{validate, Optimizer, Param, Settings};
use crate::range::{resolve_ranges, ResolvedRanges};
use crate::result::{param_digest, FitResult};
use crate::synthetic::SyntheticGenerator;
use chrono::Local;
use log::{error, info, warn};
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Package version followed by the short git hash of the working tree, when available
pub fn version() -> String {
    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}#{}", env!("CARGO_PKG_VERSION"), git_hash)
}

/// Grid, IMF and resolved ranges shared by every cluster of a batch
pub struct FitEngine {
    settings: Settings,
    grid: IsochroneGrid,
    imf: ImfSampler,
    ranges: ResolvedRanges,
    param_digest: String,
}

impl FitEngine {
    /// Resolves the configured ranges against `grid`; fails before any search on a missing grid point
    pub fn new(param: &Param, settings: Settings, grid: IsochroneGrid) -> Result<FitEngine> {
        let ranges = resolve_ranges(&settings.ranges, &grid)?;
        info!(
            "Search space: {} combinations {:?}",
            ranges.combinations(),
            ranges.sizes()
        );
        Ok(FitEngine {
            imf: ImfSampler::new(settings.imf),
            settings,
            grid,
            ranges,
            param_digest: param_digest(param),
        })
    }

    /// Validates `param` and loads its isochrone grid. `None` when the best fit is disabled.
    pub fn from_param(param: &Param) -> Result<Option<FitEngine>> {
        let Some(settings) = validate(param)? else {
            return Ok(None);
        };
        let filters = CmdFilters {
            mag: param.isochrones.mag_filter,
            blue: param.isochrones.color_filters[0],
            red: param.isochrones.color_filters[1],
        };
        let grid = IsochroneGrid::load(Path::new(&param.isochrones.path), settings.isochrone_set, filters)?;
        FitEngine::new(param, settings, grid).map(Some)
    }

    pub fn ranges(&self) -> &ResolvedRanges {
        &self.ranges
    }

    /// Best-fit search of one observed cluster on a dedicated thread pool
    pub fn fit(&self, observed: &ObservedCmd, running: Arc<AtomicBool>) -> Result<FitResult> {
        let start = std::time::Instant::now();
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let settings = &self.settings;

        cinfo!(settings.display_colorful, "\x1b[2;97m{:?}\x1b[0m", observed);

        let errors = ErrorModel::fit(observed);
        let likelihood = Likelihood::new(settings.likelihood, observed);
        let generator = SyntheticGenerator::new(&self.grid, &self.imf, &errors, &settings.synthetic)?;
        let evaluator = Evaluator::new(generator, &likelihood, &self.ranges, settings.seed);

        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.thread_number)
            .build()
            .map_err(|e| FitError::computation("thread pool", e.to_string()))?;
        let (best, trace, evaluations) = pool.install(|| run_fit(&evaluator, settings, running))?;

        if best.score >= EMPTY_SYNTHETIC_SCORE {
            warn!(
                "Best candidate of {} produced an empty synthetic cluster: check the mass range and the magnitude limit",
                observed.name
            );
        }

        let best_vector = best.vector(&self.ranges);
        Ok(FitResult {
            id: format!("{}_{}_{}", observed.name, settings.optimizer.name(), timestamp),
            version: version(),
            timestamp,
            cluster: observed.name.clone(),
            algorithm: settings.optimizer.name().to_string(),
            likelihood: settings.likelihood.name().to_string(),
            best,
            best_vector,
            evaluations,
            trace,
            execution_time: start.elapsed().as_secs_f64(),
            param_digest: self.param_digest.clone(),
        })
    }
}

/// Runs the configured optimizer. Returns the best candidate, the per-generation trace and the number of evaluations.
pub fn run_fit(
    evaluator: &Evaluator,
    settings: &Settings,
    running: Arc<AtomicBool>,
) -> Result<(Candidate, Vec<f64>, usize)> {
    match &settings.optimizer {
        Optimizer::Brute => {
            cinfo!(
                settings.display_colorful,
                "Fitting using Brute Force\n-----------------------------------------------------"
            );
            let outcome = brute_force(evaluator, running)?;
            let trace = vec![outcome.best.score];
            Ok((outcome.best, trace, outcome.evaluations))
        }
        Optimizer::Genetic(ga_settings) => {
            cinfo!(
                settings.display_colorful,
                "Fitting using Genetic Algorithm\n-----------------------------------------------------"
            );
            let outcome = ga(evaluator, ga_settings, settings.seed, settings.display_colorful, running)?;
            Ok((outcome.best, outcome.trace, outcome.evaluations))
        }
    }
}

/// Fits every observed cluster of `param`, loading the isochrone grid once.
///
/// Configuration and grid errors abort the whole run. A cluster failing to load or fit is logged and skipped.
pub fn run(param: &Param, running: Arc<AtomicBool>) -> Result<Vec<FitResult>> {
    let Some(engine) = FitEngine::from_param(param)? else {
        info!("Best fit disabled, nothing to do");
        return Ok(Vec::new());
    };

    let mut results = Vec::new();
    for file in &param.data.observed {
        if !running.load(std::sync::atomic::Ordering::Relaxed) {
            warn!("Signal received: remaining clusters skipped");
            break;
        }
        match ObservedCmd::load(Path::new(file)).and_then(|observed| engine.fit(&observed, running.clone())) {
            Ok(result) => {
                cinfo!(param.general.display_colorful, "{}", result.display());
                save_result(param, &result);
                results.push(result);
            }
            Err(e) => error!("Fit of {} failed: {}", file, e),
        }
    }
    Ok(results)
}

/// Fits an in-memory observed cluster against an already loaded grid
pub fn run_on_data(
    observed: &ObservedCmd,
    grid: IsochroneGrid,
    param: &Param,
    running: Arc<AtomicBool>,
) -> Result<Option<FitResult>> {
    let Some(settings) = validate(param)? else {
        return Ok(None);
    };
    let engine = FitEngine::new(param, settings, grid)?;
    engine.fit(observed, running).map(Some)
}

/// `general.save_result` with the cluster name appended to the file stem
pub fn result_path(save_result: &str, cluster: &str) -> PathBuf {
    let path = Path::new(save_result);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("result");
    let file_name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, cluster, ext),
        None => format!("{}_{}", stem, cluster),
    };
    path.with_file_name(file_name)
}

fn save_result(param: &Param, result: &FitResult) {
    if param.general.save_result.is_empty() {
        return;
    }
    let path = result_path(&param.general.save_result, &result.cluster);
    match result.save_auto(&path) {
        Ok(()) => info!("Fit result saved to {}", path.display()),
        Err(e) => error!("Fit result of {} could not be saved: {}", result.cluster, e),
    }
}
