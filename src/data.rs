use crate::error::{FitError, Result};
use crate::utils::median;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Width (in magnitudes) of the bins used to describe the observed error curve
pub const ERROR_BIN_WIDTH: f64 = 0.5;

/// A cleaned, membership-weighted observed star
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedStar {
    pub mag: f64,
    pub e_mag: f64,
    pub color: f64,
    pub e_color: f64,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

/// Observed color-magnitude diagram of one cluster, immutable during a fit
#[derive(Clone, Serialize, Deserialize)]
pub struct ObservedCmd {
    pub name: String,
    pub stars: Vec<ObservedStar>,
}

impl ObservedCmd {
    pub fn from_stars(name: impl Into<String>, stars: Vec<ObservedStar>) -> Result<Self> {
        let name = name.into();
        if stars.is_empty() {
            return Err(FitError::config("data.observed", format!("cluster '{}' contains no star", name)));
        }
        if let Some(i) = stars.iter().position(|s| {
            ![s.mag, s.e_mag, s.color, s.e_color, s.weight].iter().all(|v| v.is_finite())
                || s.e_mag < 0.0
                || s.e_color < 0.0
                || s.weight < 0.0
        }) {
            return Err(FitError::computation(
                format!("cluster '{}' star #{}", name, i),
                "non finite value, negative error or negative weight",
            ));
        }
        Ok(ObservedCmd { name, stars })
    }

    /// Loads a CSV file with a `mag,e_mag,color,e_color[,weight]` header
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading observed CMD {}...", path.display());
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_path(path)?;

        let has_weight = reader.headers()?.iter().any(|h| h == "weight");
        if !has_weight {
            warn!("No membership weight column in {}: every star weighs 1.", path.display());
        }

        let stars = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ObservedStar>, csv::Error>>()?;

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cluster")
            .to_string();
        Self::from_stars(name, stars)
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.stars.iter().map(|s| s.weight).sum()
    }

    pub fn magnitudes(&self) -> Vec<f64> {
        self.stars.iter().map(|s| s.mag).collect()
    }

    pub fn colors(&self) -> Vec<f64> {
        self.stars.iter().map(|s| s.color).collect()
    }

    /// Faintest observed magnitude
    pub fn mag_limit(&self) -> f64 {
        self.stars.iter().map(|s| s.mag).fold(f64::NEG_INFINITY, f64::max)
    }
}

impl fmt::Display for ObservedCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mags = self.magnitudes();
        let colors = self.colors();
        let (mmin, mmax) = min_max(&mags);
        let (cmin, cmax) = min_max(&colors);
        write!(
            f,
            "Cluster {}: {} stars (weight {:.1}) | mag [{:.2}, {:.2}] | color [{:.2}, {:.2}]",
            self.name,
            self.len(),
            self.total_weight(),
            mmin,
            mmax,
            cmin,
            cmax
        )
    }
}

impl fmt::Debug for ObservedCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

/// Observed photometric error as a function of magnitude, used to give synthetic
/// stars the same error structure as the observed ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorModel {
    /// (bin magnitude, median magnitude error, median color error), sorted by magnitude
    nodes: Vec<(f64, f64, f64)>,
    mag_limit: f64,
}

impl ErrorModel {
    pub fn fit(observed: &ObservedCmd) -> Self {
        let (mmin, mmax) = min_max(&observed.magnitudes());
        let n_bins = (((mmax - mmin) / ERROR_BIN_WIDTH).floor() as usize + 1).max(1);

        let mut bins: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new(), Vec::new()); n_bins];
        for s in &observed.stars {
            let b = (((s.mag - mmin) / ERROR_BIN_WIDTH).floor() as usize).min(n_bins - 1);
            bins[b].0.push(s.mag);
            bins[b].1.push(s.e_mag);
            bins[b].2.push(s.e_color);
        }

        let nodes = bins
            .into_iter()
            .filter(|(mags, _, _)| !mags.is_empty())
            .map(|(mut mags, mut e_mags, mut e_colors)| {
                (median(&mut mags), median(&mut e_mags), median(&mut e_colors))
            })
            .collect();

        ErrorModel { nodes, mag_limit: mmax }
    }

    pub fn mag_limit(&self) -> f64 {
        self.mag_limit
    }

    /// (magnitude error, color error) expected at `mag`, clamped outside the observed range
    pub fn sigma(&self, mag: f64) -> (f64, f64) {
        let Some(first) = self.nodes.first() else {
            return (0.0, 0.0);
        };
        if mag <= first.0 {
            return (first.1, first.2);
        }
        let last = self.nodes[self.nodes.len() - 1];
        if mag >= last.0 {
            return (last.1, last.2);
        }
        let hi = self.nodes.partition_point(|n| n.0 < mag);
        let (a, b) = (self.nodes[hi - 1], self.nodes[hi]);
        let t = (mag - a.0) / (b.0 - a.0);
        (a.1 + t * (b.1 - a.1), a.2 + t * (b.2 - a.2))
    }
}
