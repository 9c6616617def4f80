use crate::error::{FitError, Result};
use crate::isochrone::{match_grid_value, nearest_value, IsochroneGrid};
use crate::param::Ranges;
use crate::utils::{canonical_key, round_decimals};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Total mass substituted for a zero minimum mass
pub const MIN_TOTAL_MASS: f64 = 10.0;

/// Largest number of values a min/max/step range may expand to
pub const MAX_RANGE_VALUES: usize = 100_000;

/// The six fitted cluster parameters, in genome order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Metallicity,
    Age,
    Extinction,
    Distance,
    Mass,
    Binary,
}

impl Parameter {
    pub const ALL: [Parameter; 6] = [
        Parameter::Metallicity,
        Parameter::Age,
        Parameter::Extinction,
        Parameter::Distance,
        Parameter::Mass,
        Parameter::Binary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Metallicity => "metallicity",
            Parameter::Age => "age",
            Parameter::Extinction => "extinction",
            Parameter::Distance => "distance",
            Parameter::Mass => "mass",
            Parameter::Binary => "binary",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A configured range: an explicit list of values or a min/max/step triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    List {
        values: Vec<f64>,
    },
    Step {
        min: f64,
        max: f64,
        #[serde(default)]
        step: Option<f64>,
    },
}

impl RangeSpec {
    /// Expands the range into sorted, de-duplicated values
    pub fn resolve(&self, parameter: Parameter) -> Result<Vec<f64>> {
        let field = format!("ranges.{}", parameter.name());
        let mut values = match self {
            RangeSpec::List { values } => values.clone(),
            RangeSpec::Step { min, max, step } => {
                let (min, max) = (*min, *max);
                match step {
                    _ if min > max => Vec::new(),
                    None => vec![min],
                    Some(_) if min == max => vec![min],
                    Some(step) if *step <= 0.0 => {
                        return Err(FitError::config(
                            field,
                            format!("step must be positive when min < max; {} is set", step),
                        ))
                    }
                    Some(step) => {
                        let count = ((max - min) / step + 1e-6).floor();
                        if !count.is_finite() || count >= MAX_RANGE_VALUES as f64 {
                            return Err(FitError::config(
                                field,
                                format!(
                                    "min={}, max={}, step={} gives {} values, at most {} are allowed",
                                    min,
                                    max,
                                    step,
                                    count + 1.0,
                                    MAX_RANGE_VALUES
                                ),
                            ));
                        }
                        (0..count as usize + 1)
                            .map(|i| round_decimals(min + i as f64 * step, 10))
                            .collect()
                    }
                }
            }
        };

        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::config(field, "range contains a non finite value"));
        }

        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup_by(|a, b| canonical_key(*a) == canonical_key(*b));

        if values.is_empty() {
            return Err(match self {
                RangeSpec::Step { min, max, step } => FitError::config(
                    field,
                    format!(
                        "No values exist for '{}' range defined: min={}, max={}, step={:?}",
                        parameter.name(),
                        min,
                        max,
                        step
                    ),
                ),
                RangeSpec::List { .. } => FitError::config(
                    field,
                    format!("Range defined for '{}' parameter is empty", parameter.name()),
                ),
            });
        }
        Ok(values)
    }

    /// Values that bound the range: every listed value, or min and max
    pub fn bounds(&self) -> Vec<f64> {
        match self {
            RangeSpec::List { values } => values.clone(),
            RangeSpec::Step { min, step: None, .. } => vec![*min],
            RangeSpec::Step { min, max, .. } => vec![*min, *max],
        }
    }
}

/// The concrete candidate values of each parameter, indexed by genome position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRanges {
    values: [Vec<f64>; 6],
}

impl ResolvedRanges {
    pub fn new(values: [Vec<f64>; 6]) -> Result<Self> {
        for parameter in Parameter::ALL {
            if values[parameter.index()].is_empty() {
                return Err(FitError::config(
                    format!("ranges.{}", parameter.name()),
                    format!("Range defined for '{}' parameter is empty", parameter.name()),
                ));
            }
        }
        Ok(ResolvedRanges { values })
    }

    pub fn get(&self, parameter: Parameter) -> &[f64] {
        &self.values[parameter.index()]
    }

    pub fn value(&self, parameter: Parameter, index: usize) -> f64 {
        self.values[parameter.index()][index]
    }

    pub fn sizes(&self) -> [usize; 6] {
        [
            self.values[0].len(),
            self.values[1].len(),
            self.values[2].len(),
            self.values[3].len(),
            self.values[4].len(),
            self.values[5].len(),
        ]
    }

    /// Size of the Cartesian product of all ranges
    pub fn combinations(&self) -> usize {
        self.sizes().iter().product()
    }
}

/// Resolves every configured range and checks metallicity and age against the grid
pub fn resolve_ranges(ranges: &Ranges, grid: &IsochroneGrid) -> Result<ResolvedRanges> {
    let mut resolved: [Vec<f64>; 6] = Default::default();
    for parameter in Parameter::ALL {
        resolved[parameter.index()] = ranges.get(parameter).resolve(parameter)?;
    }

    correct_zero_mass(&mut resolved[Parameter::Mass.index()]);

    resolved[Parameter::Metallicity.index()] = match_to_grid(
        Parameter::Metallicity,
        &resolved[Parameter::Metallicity.index()],
        grid.available_metallicities(),
    )?;
    resolved[Parameter::Age.index()] = match_to_grid(
        Parameter::Age,
        &resolved[Parameter::Age.index()],
        grid.available_ages(),
    )?;

    let resolved = ResolvedRanges::new(resolved)?;
    debug!("Resolved range sizes {:?}", resolved.sizes());
    Ok(resolved)
}

/// A zero total mass gives no stars: drop it when the default minimum is already present,
/// substitute it otherwise.
pub fn correct_zero_mass(masses: &mut Vec<f64>) {
    let min = masses.iter().cloned().fold(f64::INFINITY, f64::min);
    if min != 0.0 {
        return;
    }
    warn!("Minimum total mass is zero in input params file.");
    let zero_idx = masses.iter().position(|m| *m == 0.0).unwrap_or(0);
    if masses.iter().any(|m| *m == MIN_TOTAL_MASS) {
        warn!("Removing zero value from mass array.");
        masses.remove(zero_idx);
    } else {
        warn!("Changed minimum mass to {}.", MIN_TOTAL_MASS);
        masses[zero_idx] = MIN_TOTAL_MASS;
        masses.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        masses.dedup_by(|a, b| canonical_key(*a) == canonical_key(*b));
    }
}

/// Snaps every requested value to a grid value. Values without a match are all
/// collected into a single error.
pub fn match_to_grid(parameter: Parameter, requested: &[f64], available: &[f64]) -> Result<Vec<f64>> {
    let mut matched = Vec::with_capacity(requested.len());
    let mut missing = Vec::new();

    for &value in requested {
        match match_grid_value(available, value) {
            Some(grid_value) => matched.push(grid_value),
            None => missing.push(value),
        }
    }

    if !missing.is_empty() {
        let nearest = missing
            .iter()
            .filter_map(|v| nearest_value(available, *v))
            .collect();
        return Err(FitError::DataAvailability {
            parameter: parameter.name().to_string(),
            missing,
            available: available.to_vec(),
            nearest,
        });
    }

    matched.dedup_by(|a, b| canonical_key(*a) == canonical_key(*b));
    Ok(matched)
}
