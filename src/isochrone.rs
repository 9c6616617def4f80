use crate::error::{FitError, Result};
use crate::utils::{canonical_key, round_decimals};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Absolute tolerance used when a value does not share the canonical key of a grid value
pub const MATCH_TOLERANCE: f64 = 1e-6;

/// Decimals kept for log10(age) values read from isochrone headers
const LOG_AGE_DECIMALS: i32 = 4;

const AGE_MARKER: &str = "Age =";

/// Theoretical isochrone families supported by the grid reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum IsochroneSet {
    PAR10,
    PAR11,
    PAR12,
}

/// Column layout of a data row in an isochrone file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetColumns {
    /// Initial mass column
    pub mass: usize,
    /// First magnitude column, filters are counted from here
    pub first_mag: usize,
}

impl IsochroneSet {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PAR10" => Some(IsochroneSet::PAR10),
            "PAR11" => Some(IsochroneSet::PAR11),
            "PAR12" => Some(IsochroneSet::PAR12),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IsochroneSet::PAR10 => "PAR10",
            IsochroneSet::PAR11 => "PAR11",
            IsochroneSet::PAR12 => "PAR12",
        }
    }

    pub fn columns(&self) -> SetColumns {
        match self {
            // log(age) M_ini M_act logL logTe logG mbol mags...
            IsochroneSet::PAR10 => SetColumns { mass: 1, first_mag: 7 },
            // Z log(age) M_ini M_act logL logTe logG mbol mags...
            IsochroneSet::PAR11 => SetColumns { mass: 2, first_mag: 8 },
            // Z log(age) M_ini M_act logL logTe logG mbol int_IMF mags...
            IsochroneSet::PAR12 => SetColumns { mass: 2, first_mag: 9 },
        }
    }
}

/// Filters forming the CMD, counted from the set's first magnitude column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdFilters {
    pub mag: usize,
    pub blue: usize,
    pub red: usize,
}

/// One tabulated star: initial mass, magnitude and the two filters forming the color
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsochronePoint {
    pub mass: f64,
    pub mag: f64,
    pub blue: f64,
    pub red: f64,
}

impl IsochronePoint {
    pub fn new(mass: f64, mag: f64, blue: f64, red: f64) -> Self {
        IsochronePoint { mass, mag, blue, red }
    }

    pub fn color(&self) -> f64 {
        self.blue - self.red
    }
}

/// Mass-magnitude-color table of a single (metallicity, age) isochrone, sorted by mass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochroneTable {
    points: Vec<IsochronePoint>,
}

impl IsochroneTable {
    pub fn new(mut points: Vec<IsochronePoint>) -> Self {
        points.retain(|p| p.mass.is_finite() && p.mag.is_finite() && p.blue.is_finite() && p.red.is_finite());
        points.sort_by(|a, b| a.mass.partial_cmp(&b.mass).unwrap_or(std::cmp::Ordering::Equal));
        points.dedup_by(|a, b| a.mass == b.mass);
        IsochroneTable { points }
    }

    pub fn points(&self) -> &[IsochronePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn mass_range(&self) -> Option<(f64, f64)> {
        Some((self.points.first()?.mass, self.points.last()?.mass))
    }

    /// Linear interpolation in initial mass. `None` outside the tabulated masses:
    /// such stars are not present at this age.
    pub fn interpolate(&self, mass: f64) -> Option<IsochronePoint> {
        let (min, max) = self.mass_range()?;
        if !(mass >= min && mass <= max) {
            return None;
        }
        let hi = self.points.partition_point(|p| p.mass < mass);
        if hi == 0 {
            return Some(self.points[0]);
        }
        let (a, b) = (&self.points[hi - 1], &self.points[hi]);
        let t = (mass - a.mass) / (b.mass - a.mass);
        Some(IsochronePoint {
            mass,
            mag: a.mag + t * (b.mag - a.mag),
            blue: a.blue + t * (b.blue - a.blue),
            red: a.red + t * (b.red - a.red),
        })
    }
}

/// Index of the grid value matching `value`, by canonical key or within `MATCH_TOLERANCE`
pub fn match_grid_index(available: &[f64], value: f64) -> Option<usize> {
    let key = canonical_key(value);
    available
        .iter()
        .position(|v| (v - value).abs() <= MATCH_TOLERANCE || canonical_key(*v) == key)
}

pub fn match_grid_value(available: &[f64], value: f64) -> Option<f64> {
    match_grid_index(available, value).map(|i| available[i])
}

pub fn nearest_value(available: &[f64], value: f64) -> Option<f64> {
    available
        .iter()
        .cloned()
        .min_by(|a, b| {
            (a - value)
                .abs()
                .partial_cmp(&(b - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// All isochrones of one model family, indexed by metallicity then age.
/// Every metallicity exposes the same ages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsochroneGrid {
    metallicities: Vec<f64>,
    ages: Vec<f64>,
    tables: Vec<Vec<IsochroneTable>>,
}

impl IsochroneGrid {
    /// Builds a grid from in-memory `(metallicity, log age, table)` triples
    pub fn from_tables(entries: Vec<(f64, f64, IsochroneTable)>) -> Result<Self> {
        let mut by_metallicity: Vec<(f64, Vec<(f64, IsochroneTable)>)> = Vec::new();
        for (z, age, table) in entries {
            match by_metallicity.iter_mut().find(|(known, _)| canonical_key(*known) == canonical_key(z)) {
                Some((_, ages)) => ages.push((age, table)),
                None => by_metallicity.push((z, vec![(age, table)])),
            }
        }
        if by_metallicity.is_empty() {
            return Err(FitError::computation("isochrone grid", "no isochrone was found"));
        }
        by_metallicity.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut ages_ref: Option<Vec<f64>> = None;
        let mut metallicities = Vec::with_capacity(by_metallicity.len());
        let mut tables = Vec::with_capacity(by_metallicity.len());

        for (z, mut entries) in by_metallicity {
            entries.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            entries.dedup_by(|a, b| canonical_key(a.0) == canonical_key(b.0));

            if let Some((age, _)) = entries.iter().find(|(_, t)| t.len() < 2) {
                return Err(FitError::computation(
                    format!("isochrone z={} age={}", z, age),
                    "an isochrone needs at least two tabulated masses",
                ));
            }

            let ages: Vec<f64> = entries.iter().map(|(a, _)| *a).collect();
            match &ages_ref {
                None => ages_ref = Some(ages),
                Some(reference) => {
                    let same = reference.len() == ages.len()
                        && reference.iter().zip(&ages).all(|(a, b)| canonical_key(*a) == canonical_key(*b));
                    if !same {
                        return Err(FitError::computation(
                            format!("metallicity {}", z),
                            format!(
                                "exposes {} ages {:?} while previous metallicities expose {} ages {:?}",
                                ages.len(),
                                ages,
                                reference.len(),
                                reference
                            ),
                        ));
                    }
                }
            }
            metallicities.push(z);
            tables.push(entries.into_iter().map(|(_, t)| t).collect());
        }

        Ok(IsochroneGrid {
            metallicities,
            ages: ages_ref.unwrap_or_default(),
            tables,
        })
    }

    /// Reads every metallicity file of `set` found under `path/<set>/`
    pub fn load(path: &Path, set: IsochroneSet, filters: CmdFilters) -> Result<Self> {
        let dir = path.join(set.name());
        if !dir.is_dir() {
            return Err(FitError::config(
                "isochrones.path",
                format!("the isochrones folder {} does not exist", dir.display()),
            ));
        }
        info!("Loading {} isochrones from {}...", set.name(), dir.display());

        let mut files: Vec<_> = fs::read_dir(&dir)
            .map_err(|e| FitError::computation(dir.display().to_string(), e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("dat"))
            .collect();
        files.sort();

        let columns = set.columns();
        let mut entries = Vec::new();
        for file in &files {
            let source = file.display().to_string();
            let z: f64 = file
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    FitError::computation(source.clone(), "file name is not a metallicity value")
                })?;
            let reader =
                BufReader::new(File::open(file).map_err(|e| FitError::computation(source.clone(), e.to_string()))?);
            let blocks = parse_isochrone_blocks(reader, &source, columns, filters)?;
            debug!("{}: {} isochrones", source, blocks.len());
            entries.extend(blocks.into_iter().map(|(age, table)| (z, age, table)));
        }

        let grid = Self::from_tables(entries)?;
        info!(
            "Isochrone grid loaded: {} metallicities x {} ages",
            grid.metallicities.len(),
            grid.ages.len()
        );
        Ok(grid)
    }

    pub fn available_metallicities(&self) -> &[f64] {
        &self.metallicities
    }

    pub fn available_ages(&self) -> &[f64] {
        &self.ages
    }

    pub fn isochrone_at(&self, metallicity: f64, age: f64) -> Result<&IsochroneTable> {
        let zi = match_grid_index(&self.metallicities, metallicity)
            .ok_or_else(|| self.unavailable("metallicity", metallicity, &self.metallicities))?;
        let ai = match_grid_index(&self.ages, age).ok_or_else(|| self.unavailable("age", age, &self.ages))?;
        Ok(&self.tables[zi][ai])
    }

    fn unavailable(&self, parameter: &str, value: f64, available: &[f64]) -> FitError {
        FitError::DataAvailability {
            parameter: parameter.to_string(),
            missing: vec![value],
            available: available.to_vec(),
            nearest: nearest_value(available, value).into_iter().collect(),
        }
    }
}

/// Splits an isochrone file into `(log age, table)` blocks.
/// Each block starts at a comment line holding `Age = <yr>`.
pub fn parse_isochrone_blocks<R: BufRead>(
    reader: R,
    source: &str,
    columns: SetColumns,
    filters: CmdFilters,
) -> Result<Vec<(f64, IsochroneTable)>> {
    let mag_col = columns.first_mag + filters.mag;
    let blue_col = columns.first_mag + filters.blue;
    let red_col = columns.first_mag + filters.red;
    let needed = [columns.mass, mag_col, blue_col, red_col].into_iter().max().unwrap_or(0);

    let mut blocks: Vec<(f64, Vec<IsochronePoint>)> = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FitError::computation(format!("{}:{}", source, n + 1), e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            if let Some(pos) = trimmed.find(AGE_MARKER) {
                let age_yr: f64 = trimmed[pos + AGE_MARKER.len()..]
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse().ok())
                    .filter(|a: &f64| *a > 0.0)
                    .ok_or_else(|| {
                        FitError::computation(format!("{}:{}", source, n + 1), "unreadable age header")
                    })?;
                blocks.push((round_decimals(age_yr.log10(), LOG_AGE_DECIMALS), Vec::new()));
            }
            continue;
        }

        let Some((_, points)) = blocks.last_mut() else {
            return Err(FitError::computation(
                format!("{}:{}", source, n + 1),
                "data row found before any age header",
            ));
        };
        let fields = trimmed
            .split_whitespace()
            .map(|f| f.parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| FitError::computation(format!("{}:{}", source, n + 1), e.to_string()))?;
        if fields.len() <= needed {
            return Err(FitError::computation(
                format!("{}:{}", source, n + 1),
                format!("expected at least {} columns, found {}", needed + 1, fields.len()),
            ));
        }
        points.push(IsochronePoint::new(
            fields[columns.mass],
            fields[mag_col],
            fields[blue_col],
            fields[red_col],
        ));
    }

    Ok(blocks
        .into_iter()
        .map(|(age, points)| (age, IsochroneTable::new(points)))
        .collect())
}
