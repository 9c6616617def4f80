use crate::data::ObservedCmd;
use crate::utils::quantile_sorted;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

/// Fixed bin widths of the `bb` rule
pub const BB_MAG_WIDTH: f64 = 0.5;
pub const BB_COLOR_WIDTH: f64 = 0.25;

/// Largest bin count tried by Knuth's rule
const KNUTH_MAX_BINS: usize = 100;
/// Upper bound for every width-based rule
const MAX_BINS: usize = 1000;
/// False-alarm probability of a Bayesian-blocks change point
const BLOCKS_P0: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinningMethod {
    Blocks,
    Knuth,
    Scott,
    Freedman,
    Sturges,
    Sqrt,
    Bb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Magnitude,
    Color,
}

impl BinningMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blocks" => Some(BinningMethod::Blocks),
            "knuth" => Some(BinningMethod::Knuth),
            "scott" => Some(BinningMethod::Scott),
            "freedman" => Some(BinningMethod::Freedman),
            "sturges" => Some(BinningMethod::Sturges),
            "sqrt" => Some(BinningMethod::Sqrt),
            "bb" => Some(BinningMethod::Bb),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinningMethod::Blocks => "blocks",
            BinningMethod::Knuth => "knuth",
            BinningMethod::Scott => "scott",
            BinningMethod::Freedman => "freedman",
            BinningMethod::Sturges => "sturges",
            BinningMethod::Sqrt => "sqrt",
            BinningMethod::Bb => "bb",
        }
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().cloned().filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v
}

fn linspace(lo: f64, hi: f64, n_bins: usize) -> Vec<f64> {
    let n_bins = n_bins.clamp(1, MAX_BINS);
    (0..=n_bins)
        .map(|i| if i == n_bins { hi } else { lo + (hi - lo) * i as f64 / n_bins as f64 })
        .collect()
}

fn bins_for_width(lo: f64, hi: f64, width: f64) -> usize {
    if width > 0.0 && width.is_finite() {
        ((hi - lo) / width).ceil().max(1.0) as usize
    } else {
        1
    }
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// 1D bin edges of `values` following `method`. Edges always span the data.
pub fn bin_edges(method: BinningMethod, values: &[f64], axis: Axis) -> Vec<f64> {
    let v = sorted(values);
    let Some((&lo, &hi)) = v.first().zip(v.last()) else {
        return vec![0.0, 1.0];
    };
    if hi - lo <= 0.0 {
        return vec![lo - 0.5, hi + 0.5];
    }
    let n = v.len() as f64;

    match method {
        BinningMethod::Sturges => linspace(lo, hi, (n.log2().ceil() + 1.0) as usize),
        BinningMethod::Sqrt => linspace(lo, hi, n.sqrt().ceil() as usize),
        BinningMethod::Scott => linspace(lo, hi, bins_for_width(lo, hi, 3.5 * std_dev(&v) * n.powf(-1.0 / 3.0))),
        BinningMethod::Freedman => {
            let iqr = quantile_sorted(&v, 0.75) - quantile_sorted(&v, 0.25);
            linspace(lo, hi, bins_for_width(lo, hi, 2.0 * iqr * n.powf(-1.0 / 3.0)))
        }
        BinningMethod::Knuth => linspace(lo, hi, knuth_bins(&v, lo, hi)),
        BinningMethod::Blocks => bayesian_blocks(&v),
        BinningMethod::Bb => {
            let width = match axis {
                Axis::Magnitude => BB_MAG_WIDTH,
                Axis::Color => BB_COLOR_WIDTH,
            };
            let n_bins = bins_for_width(lo, hi, width).min(MAX_BINS);
            let mut edges: Vec<f64> = (0..=n_bins).map(|i| lo + width * i as f64).collect();
            edges[n_bins] = edges[n_bins].max(hi);
            edges
        }
    }
}

/// Number of equal-width bins maximising Knuth's log posterior
fn knuth_bins(v: &[f64], lo: f64, hi: f64) -> usize {
    let n = v.len() as f64;
    let mut best = (1, f64::NEG_INFINITY);
    for m in 1..=KNUTH_MAX_BINS {
        let mf = m as f64;
        let mut counts = vec![0usize; m];
        for x in v {
            let b = (((x - lo) / (hi - lo)) * mf).floor() as usize;
            counts[b.min(m - 1)] += 1;
        }
        let log_post = n * mf.ln() + ln_gamma(mf / 2.0) - mf * ln_gamma(0.5) - ln_gamma(n + mf / 2.0)
            + counts.iter().map(|c| ln_gamma(*c as f64 + 0.5)).sum::<f64>();
        if log_post > best.1 {
            best = (m, log_post);
        }
    }
    best.0
}

/// Scargle's Bayesian blocks for event data, optimal partition by dynamic programming
fn bayesian_blocks(v: &[f64]) -> Vec<f64> {
    let mut t: Vec<f64> = Vec::new();
    let mut x: Vec<f64> = Vec::new();
    for value in v {
        match t.last() {
            Some(last) if *last == *value => {
                if let Some(c) = x.last_mut() {
                    *c += 1.0;
                }
            }
            _ => {
                t.push(*value);
                x.push(1.0);
            }
        }
    }
    let n = t.len();
    if n < 2 {
        return vec![t[0] - 0.5, t[0] + 0.5];
    }

    let mut edges = Vec::with_capacity(n + 1);
    edges.push(t[0]);
    edges.extend(t.windows(2).map(|w| 0.5 * (w[0] + w[1])));
    edges.push(t[n - 1]);
    let block_length: Vec<f64> = edges.iter().map(|e| t[n - 1] - e).collect();

    let ncp_prior = 4.0 - (73.53 * BLOCKS_P0 * (v.len() as f64).powf(-0.478)).ln();
    let mut best = vec![0.0; n];
    let mut last = vec![0usize; n];

    for r in 0..n {
        let mut count = 0.0;
        let mut best_value = f64::NEG_INFINITY;
        let mut best_index = 0;
        // Blocks ending at r, scanned from the shortest
        for i in (0..=r).rev() {
            count += x[i];
            let width = block_length[i] - block_length[r + 1];
            let mut fit = count * (count / width).ln() - ncp_prior;
            if i > 0 {
                fit += best[i - 1];
            }
            if fit > best_value {
                best_value = fit;
                best_index = i;
            }
        }
        best[r] = best_value;
        last[r] = best_index;
    }

    let mut change_points = Vec::new();
    let mut ind = n;
    while ind > 0 {
        change_points.push(ind);
        ind = last[ind - 1];
    }
    change_points.push(0);
    change_points.reverse();
    change_points.into_iter().map(|i| edges[i]).collect()
}

/// Index of the bin holding `value`; the last bin is closed on the right
fn locate(edges: &[f64], value: f64) -> Option<usize> {
    let (first, last) = (*edges.first()?, *edges.last()?);
    if !(value >= first && value <= last) {
        return None;
    }
    let idx = edges.partition_point(|e| *e <= value);
    Some(idx.saturating_sub(1).min(edges.len() - 2))
}

/// 2D magnitude/color grid computed once from the observed CMD
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdBins {
    pub mag_edges: Vec<f64>,
    pub color_edges: Vec<f64>,
}

impl CmdBins {
    pub fn from_observed(method: BinningMethod, observed: &ObservedCmd) -> Self {
        CmdBins {
            mag_edges: bin_edges(method, &observed.magnitudes(), Axis::Magnitude),
            color_edges: bin_edges(method, &observed.colors(), Axis::Color),
        }
    }

    pub fn n_bins(&self) -> usize {
        (self.mag_edges.len() - 1) * (self.color_edges.len() - 1)
    }

    pub fn bin_index(&self, mag: f64, color: f64) -> Option<usize> {
        let mi = locate(&self.mag_edges, mag)?;
        let ci = locate(&self.color_edges, color)?;
        Some(mi * (self.color_edges.len() - 1) + ci)
    }

    /// Weighted counts of `(mag, color, weight)` points, flattened magnitude-major.
    /// Points outside the grid are ignored.
    pub fn histogram<I>(&self, points: I) -> Vec<f64>
    where
        I: IntoIterator<Item = (f64, f64, f64)>,
    {
        let mut counts = vec![0.0; self.n_bins()];
        for (mag, color, weight) in points {
            if let Some(b) = self.bin_index(mag, color) {
                counts[b] += weight;
            }
        }
        counts
    }
}
