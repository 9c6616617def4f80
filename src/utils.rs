use crate::population::Population;
use crate::range::ResolvedRanges;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Number of decimals kept when comparing grid values through their canonical representation
pub const CANONICAL_DECIMALS: usize = 6;

/// Logs at info level, stripping ANSI escapes when colours are disabled
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {
        if $colorful {
            log::info!($($arg)*);
        } else {
            log::info!("{}", $crate::utils::strip_ansi(&format!($($arg)*)));
        }
    };
}

/// Removes ANSI colour sequences (`ESC[...m`) from a string
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for inner in chars.by_ref() {
                if inner.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Canonical decimal representation of a value: fixed precision with trailing zeros removed.
/// 0.019, 0.0190 and 0.01900000001 all map to "0.019".
pub fn canonical_key(value: f64) -> String {
    let formatted = format!("{:.*}", CANONICAL_DECIMALS, value);
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        formatted
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed
    }
}

/// Rounds away floating point accumulation noise (e.g. 0.30000000000000004)
pub fn round_decimals(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Median of a slice (sorted in place). NaN for an empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Linear-interpolated quantile of an already sorted slice
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Seed of the random stream used to evaluate one candidate.
/// Depends only on the run seed, the generation and the genes, never on thread scheduling.
pub fn derive_seed(base_seed: u64, generation: usize, genes: &[usize]) -> u64 {
    let mut hasher = DefaultHasher::new();
    base_seed.hash(&mut hasher);
    generation.hash(&mut hasher);
    genes.hash(&mut hasher);
    hasher.finish()
}

pub fn display_generation_legend() -> String {
    "\x1b[1;97mGeneration | best score | [z, log(age), E(B-V), (m-M)o, M, b_fr] | population median\x1b[0m"
        .to_string()
}

pub fn display_generation(pop: &Population, generation: usize, ranges: &ResolvedRanges) -> String {
    let Some(best) = pop.candidates.first() else {
        return format!("#{:<4} | empty population", generation);
    };
    let mut scores: Vec<f64> = pop.candidates.iter().map(|c| c.score).collect();
    let median_score = median(&mut scores);
    let vector = best.vector(ranges);
    format!(
        "#{:<4} | \x1b[1;92m{:>12.3}\x1b[0m | [{}] | {:.3}",
        generation,
        best.score,
        vector
            .values()
            .iter()
            .map(|v| format!("{}", v))
            .collect::<Vec<_>>()
            .join(", "),
        median_score
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_trims_representation() {
        assert_eq!(canonical_key(0.0190), "0.019");
        assert_eq!(canonical_key(0.019000000001), "0.019");
        assert_eq!(canonical_key(0.02), "0.02");
        assert_eq!(canonical_key(10.0), "10");
        assert_eq!(canonical_key(-0.0), "0");
        assert_ne!(canonical_key(0.0190), canonical_key(0.0200));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;92mbest\x1b[0m score"), "best score");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&mut []).is_nan());
    }

    #[test]
    fn test_quantile_sorted() {
        let v = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.5), 2.0);
        assert_eq!(quantile_sorted(&v, 0.25), 1.0);
        assert_eq!(quantile_sorted(&v, 1.0), 4.0);
    }

    #[test]
    fn test_derive_seed_is_deterministic() {
        let a = derive_seed(42, 3, &[1, 2, 3, 0, 0, 1]);
        let b = derive_seed(42, 3, &[1, 2, 3, 0, 0, 1]);
        let c = derive_seed(42, 4, &[1, 2, 3, 0, 0, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_round_decimals() {
        assert_eq!(round_decimals(0.1 + 0.2, 10), 0.3);
    }
}
