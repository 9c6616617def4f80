use crate::binning::BinningMethod;
use crate::error::{FitError, Result};
use crate::ga::{CrossoverKind, GaSettings, SelectionKind};
use crate::imf::ImfKind;
use crate::isochrone::IsochroneSet;
use crate::likelihood::LikelihoodKind;
use crate::range::{correct_zero_mass, Parameter, RangeSpec};
use crate::synthetic::SynthSettings;
use log::warn;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub isochrones: Isochrones,
    #[serde(default)]
    pub synthetic: Synthetic,
    #[serde(default)]
    pub best_fit: BestFit,
    #[serde(default)]
    pub ga: GA,
    #[serde(default)]
    pub ranges: Ranges,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    #[serde(default = "empty_string")]
    pub save_result: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    /// Membership-weighted observed CMD files, one per cluster
    #[serde(default = "empty_vec")]
    pub observed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Isochrones {
    #[serde(default = "isochrones_path_default")]
    pub path: String,
    #[serde(default = "isochrone_set_default")]
    pub set: String,
    /// Filter used as magnitude, counted from the first magnitude column
    #[serde(default = "mag_filter_default")]
    pub mag_filter: usize,
    /// Filters whose difference is the color (first minus second)
    #[serde(default = "color_filters_default")]
    pub color_filters: [usize; 2],
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Synthetic {
    #[serde(default = "imf_default")]
    pub imf: String,
    #[serde(default = "max_mass_ratio_default")]
    pub max_mass_ratio: f64,
    #[serde(default = "extinction_mag_coeff_default")]
    pub extinction_mag_coeff: f64,
    #[serde(default = "extinction_color_coeff_default")]
    pub extinction_color_coeff: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BestFit {
    #[serde(default = "true_default")]
    pub enabled: bool,
    #[serde(default = "algo_default")]
    pub algo: String,
    #[serde(default = "likelihood_default")]
    pub likelihood: String,
    #[serde(default = "empty_string")]
    pub binning: String,
    #[serde(default = "reduced_membership_default")]
    pub reduced_membership: String,
    #[serde(default = "empty_string")]
    pub reduced_membership_bin: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "n_pop_default")]
    pub n_pop: usize,
    #[serde(default = "n_gen_default")]
    pub n_gen: usize,
    #[serde(default = "fdif_default")]
    pub fdif: f64,
    #[serde(default = "p_cross_default")]
    pub p_cross: f64,
    #[serde(default = "cr_sel_default")]
    pub cr_sel: String,
    #[serde(default = "p_mut_default")]
    pub p_mut: f64,
    #[serde(default = "n_el_default")]
    pub n_el: usize,
    #[serde(default = "n_ei_default")]
    pub n_ei: usize,
    #[serde(default = "n_es_default")]
    pub n_es: usize,
    #[serde(default = "selection_default")]
    pub selection: String,
    #[serde(default = "tournament_size_default")]
    pub tournament_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ranges {
    #[serde(default = "empty_range")]
    pub metallicity: RangeSpec,
    #[serde(default = "empty_range")]
    pub age: RangeSpec,
    #[serde(default = "zero_range")]
    pub extinction: RangeSpec,
    #[serde(default = "zero_range")]
    pub distance: RangeSpec,
    #[serde(default = "mass_range_default")]
    pub mass: RangeSpec,
    #[serde(default = "binary_range_default")]
    pub binary: RangeSpec,
}

impl Ranges {
    pub fn get(&self, parameter: Parameter) -> &RangeSpec {
        match parameter {
            Parameter::Metallicity => &self.metallicity,
            Parameter::Age => &self.age,
            Parameter::Extinction => &self.extinction,
            Parameter::Distance => &self.distance,
            Parameter::Mass => &self.mass,
            Parameter::Binary => &self.binary,
        }
    }
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Isochrones {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Synthetic {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for BestFit {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Ranges {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Optimizer selected for the best-fit search
#[derive(Debug, Clone, PartialEq)]
pub enum Optimizer {
    Brute,
    Genetic(GaSettings),
}

impl Optimizer {
    pub fn name(&self) -> &'static str {
        match self {
            Optimizer::Brute => "brute",
            Optimizer::Genetic(_) => "genet",
        }
    }
}

/// Immutable, fully resolved configuration handed to every component of a fit
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub seed: u64,
    pub thread_number: usize,
    pub display_colorful: bool,
    pub optimizer: Optimizer,
    pub likelihood: LikelihoodKind,
    pub imf: ImfKind,
    pub isochrone_set: IsochroneSet,
    pub synthetic: SynthSettings,
    pub ranges: Ranges,
}

/// Reads a YAML (or TOML, by extension) parameter file
pub fn get(param_file: String) -> std::result::Result<Param, Box<dyn Error>> {
    let path = Path::new(&param_file);
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let mut config: Param = if is_toml {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)?
    } else {
        let param_file_reader = File::open(path)?;
        let param_reader = BufReader::new(param_file_reader);
        serde_yaml::from_reader(param_reader)?
    };

    if !config.general.log_base.is_empty() {
        config.general.display_colorful = false;
    }

    Ok(config)
}

/// Reads and validates a parameter file in one step
pub fn get_validated(param_file: String) -> std::result::Result<(Param, Option<Settings>), Box<dyn Error>> {
    let param = get(param_file)?;
    let settings = validate(&param)?;
    Ok((param, settings))
}

/// Checks the whole configuration and resolves every mode string into its variant.
/// Returns `None` when the best-fit search is disabled.
pub fn validate(param: &Param) -> Result<Option<Settings>> {
    if param.general.thread_number < 1 {
        return Err(FitError::config(
            "general.thread_number",
            format!("at least one thread is required; {} is set", param.general.thread_number),
        ));
    }

    validate_reduced_membership(param)?;

    if !param.best_fit.enabled {
        return Ok(None);
    }

    let optimizer = match param.best_fit.algo.as_str() {
        "brute" => Optimizer::Brute,
        "genet" => Optimizer::Genetic(validate_ga(param)?),
        other => {
            return Err(FitError::config(
                "best_fit.algo",
                format!("the selected best fit method '{}' does not match a valid input", other),
            ))
        }
    };

    let likelihood = match param.best_fit.likelihood.as_str() {
        "tolstoy" => LikelihoodKind::Tolstoy,
        "dolphin" => {
            let binning = BinningMethod::from_name(&param.best_fit.binning).ok_or_else(|| {
                FitError::config(
                    "best_fit.binning",
                    format!(
                        "the selected binning method '{}' for the best fit function does not match a valid input",
                        param.best_fit.binning
                    ),
                )
            })?;
            LikelihoodKind::Dolphin(binning)
        }
        other => {
            return Err(FitError::config(
                "best_fit.likelihood",
                format!("the selected likelihood method '{}' does not match a valid input", other),
            ))
        }
    };

    let imf = ImfKind::from_name(&param.synthetic.imf).ok_or_else(|| {
        FitError::config(
            "synthetic.imf",
            format!("name of IMF ({}) is incorrect", param.synthetic.imf),
        )
    })?;

    // Every range must resolve to at least one value before the grid is even looked at
    for parameter in Parameter::ALL {
        param.ranges.get(parameter).resolve(parameter)?;
    }

    for value in param.ranges.binary.bounds() {
        if value > 1.0 || value < 0.0 {
            return Err(FitError::config(
                "ranges.binary",
                format!(
                    "binarity fraction value '{}' is out of boundaries. Please select a value in the range [0., 1.]",
                    value
                ),
            ));
        }
    }

    let mut masses = param.ranges.mass.resolve(Parameter::Mass)?;
    correct_zero_mass(&mut masses);
    if let Some(mass) = masses.iter().find(|m| **m < 0.0) {
        return Err(FitError::config(
            "ranges.mass",
            format!(
                "total mass value '{}' is out of boundaries. Please select a positive value",
                mass
            ),
        ));
    }

    let max_mass_ratio = param.synthetic.max_mass_ratio;
    if !(max_mass_ratio > 0.0 && max_mass_ratio <= 1.0) {
        return Err(FitError::config(
            "synthetic.max_mass_ratio",
            format!(
                "binary mass ratio set ('{}') is out of boundaries. Please select a value in the range (0., 1.]",
                max_mass_ratio
            ),
        ));
    }

    let isochrone_set = IsochroneSet::from_name(&param.isochrones.set).ok_or_else(|| {
        FitError::config(
            "isochrones.set",
            format!(
                "the selected isochrones set ('{}') does not match a valid input",
                param.isochrones.set
            ),
        )
    })?;

    let [blue, red] = param.isochrones.color_filters;
    if blue == red {
        return Err(FitError::config(
            "isochrones.color_filters",
            format!("color filters must differ; [{}, {}] is set", blue, red),
        ));
    }

    Ok(Some(Settings {
        seed: param.general.seed,
        thread_number: param.general.thread_number,
        display_colorful: param.general.display_colorful,
        optimizer,
        likelihood,
        imf,
        isochrone_set,
        synthetic: SynthSettings {
            max_mass_ratio,
            extinction_mag_coeff: param.synthetic.extinction_mag_coeff,
            extinction_color_coeff: param.synthetic.extinction_color_coeff,
        },
        ranges: param.ranges.clone(),
    }))
}

fn validate_ga(param: &Param) -> Result<GaSettings> {
    let ga = &param.ga;

    for (name, value) in [
        ("n_pop", ga.n_pop),
        ("n_gen", ga.n_gen),
        ("n_el", ga.n_el),
        ("n_ei", ga.n_ei),
        ("n_es", ga.n_es),
    ] {
        if value < 1 {
            return Err(FitError::config(
                format!("ga.{}", name),
                format!("number must be greater than zero in '{}' GA parameter; {} is set", name, value),
            ));
        }
    }

    for (name, value) in [("fdif", ga.fdif), ("p_cross", ga.p_cross), ("p_mut", ga.p_mut)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(FitError::config(
                format!("ga.{}", name),
                format!("GA '{}' parameter is out of the valid [0., 1.] range; {} is set", name, value),
            ));
        }
    }

    let crossover = CrossoverKind::from_name(&ga.cr_sel).ok_or_else(|| {
        FitError::config(
            "ga.cr_sel",
            format!("GA 'cr_sel' operator is not a valid choice; '{}' is set", ga.cr_sel),
        )
    })?;

    if ga.n_el >= ga.n_pop {
        return Err(FitError::config(
            "ga.n_el",
            format!("n_el must be smaller than n_pop; {} and {} are set", ga.n_el, ga.n_pop),
        ));
    }

    let selection = match ga.selection.as_str() {
        "roulette" => SelectionKind::Roulette,
        "tournament" => {
            if ga.tournament_size < 1 {
                return Err(FitError::config(
                    "ga.tournament_size",
                    format!("tournament size must be greater than zero; {} is set", ga.tournament_size),
                ));
            }
            SelectionKind::Tournament(ga.tournament_size)
        }
        other => {
            return Err(FitError::config(
                "ga.selection",
                format!("GA selection scheme '{}' is not a valid choice", other),
            ))
        }
    };

    let mut n_ei = ga.n_ei;
    if ga.n_el + n_ei > ga.n_pop {
        n_ei = ga.n_pop - ga.n_el;
        warn!(
            "n_el + n_ei exceeds n_pop ({} + {} > {}): only {} individuals will be propagated by mutation.",
            ga.n_el, ga.n_ei, ga.n_pop, n_ei
        );
    }

    Ok(GaSettings {
        n_pop: ga.n_pop,
        n_gen: ga.n_gen,
        fdif: ga.fdif,
        p_cross: ga.p_cross,
        crossover,
        p_mut: ga.p_mut,
        n_el: ga.n_el,
        n_ei,
        n_es: ga.n_es,
        selection,
    })
}

fn validate_reduced_membership(param: &Param) -> Result<()> {
    let mode = param.best_fit.reduced_membership.as_str();
    if !["local", "n_memb", "mp_05", "top_h", "man", "mag", "skip"].contains(&mode) {
        return Err(FitError::config(
            "best_fit.reduced_membership",
            format!("the selected reduced membership method ('{}') does not match a valid input", mode),
        ));
    }
    if mode == "local" && BinningMethod::from_name(&param.best_fit.reduced_membership_bin).is_none() {
        return Err(FitError::config(
            "best_fit.reduced_membership_bin",
            format!(
                "the selected binning method '{}' for the reduced membership function does not match a valid input",
                param.best_fit.reduced_membership_bin
            ),
        ));
    }
    Ok(())
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn empty_vec() -> Vec<String> {
    Vec::new()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn true_default() -> bool {
    true
}
fn one_default() -> usize {
    1
}
fn isochrones_path_default() -> String {
    "isochrones".to_string()
}
fn isochrone_set_default() -> String {
    "PAR12".to_string()
}
fn mag_filter_default() -> usize {
    2
}
fn color_filters_default() -> [usize; 2] {
    [1, 2]
}
fn imf_default() -> String {
    "chabrier_2001_exp".to_string()
}
fn max_mass_ratio_default() -> f64 {
    1.0
}
fn extinction_mag_coeff_default() -> f64 {
    3.1
}
fn extinction_color_coeff_default() -> f64 {
    1.0
}
fn algo_default() -> String {
    "genet".to_string()
}
fn likelihood_default() -> String {
    "tolstoy".to_string()
}
fn reduced_membership_default() -> String {
    "skip".to_string()
}
fn n_pop_default() -> usize {
    100
}
fn n_gen_default() -> usize {
    500
}
fn fdif_default() -> f64 {
    0.001
}
fn p_cross_default() -> f64 {
    0.85
}
fn cr_sel_default() -> String {
    "2P".to_string()
}
fn p_mut_default() -> f64 {
    0.05
}
fn n_el_default() -> usize {
    1
}
fn n_ei_default() -> usize {
    10
}
fn n_es_default() -> usize {
    50
}
fn selection_default() -> String {
    "roulette".to_string()
}
fn tournament_size_default() -> usize {
    3
}
fn empty_range() -> RangeSpec {
    RangeSpec::List { values: Vec::new() }
}
fn zero_range() -> RangeSpec {
    RangeSpec::List { values: vec![0.0] }
}
fn mass_range_default() -> RangeSpec {
    RangeSpec::List { values: vec![1000.0] }
}
fn binary_range_default() -> RangeSpec {
    RangeSpec::List { values: vec![0.5] }
}
