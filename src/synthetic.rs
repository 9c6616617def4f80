use crate::candidate::ParameterVector;
use crate::data::ErrorModel;
use crate::error::{FitError, Result};
use crate::imf::ImfSampler;
use crate::isochrone::{IsochroneGrid, IsochronePoint};
use rand::distributions::Distribution;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Generator settings coming from the `synthetic` configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthSettings {
    /// Upper bound of the secondary/primary mass ratio of binaries
    pub max_mass_ratio: f64,
    /// Magnitude extinction per unit of the extinction parameter (R_V for E(B-V))
    pub extinction_mag_coeff: f64,
    /// Color excess per unit of the extinction parameter
    pub extinction_color_coeff: f64,
}

impl Default for SynthSettings {
    fn default() -> Self {
        SynthSettings {
            max_mass_ratio: 1.0,
            extinction_mag_coeff: 3.1,
            extinction_color_coeff: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticStar {
    pub mag: f64,
    pub color: f64,
    pub e_mag: f64,
    pub e_color: f64,
}

/// Synthetic CMD of one parameter vector. Regenerated for every evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyntheticCluster {
    stars: Vec<SyntheticStar>,
}

impl SyntheticCluster {
    pub fn new(stars: Vec<SyntheticStar>) -> Self {
        SyntheticCluster { stars }
    }

    pub fn stars(&self) -> &[SyntheticStar] {
        &self.stars
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }
}

/// Combined magnitude of two unresolved sources
pub fn combine_magnitudes(a: f64, b: f64) -> f64 {
    -2.5 * (10f64.powf(-0.4 * a) + 10f64.powf(-0.4 * b)).log10()
}

fn combine_points(primary: &IsochronePoint, secondary: &IsochronePoint) -> IsochronePoint {
    IsochronePoint {
        mass: primary.mass + secondary.mass,
        mag: combine_magnitudes(primary.mag, secondary.mag),
        blue: combine_magnitudes(primary.blue, secondary.blue),
        red: combine_magnitudes(primary.red, secondary.red),
    }
}

/// Builds synthetic clusters from the shared, read-only grid, IMF sampler and error model
pub struct SyntheticGenerator<'a> {
    grid: &'a IsochroneGrid,
    imf: &'a ImfSampler,
    errors: &'a ErrorModel,
    settings: &'a SynthSettings,
    standard_normal: Normal,
}

impl<'a> SyntheticGenerator<'a> {
    pub fn new(
        grid: &'a IsochroneGrid,
        imf: &'a ImfSampler,
        errors: &'a ErrorModel,
        settings: &'a SynthSettings,
    ) -> Result<Self> {
        let standard_normal =
            Normal::new(0.0, 1.0).map_err(|e| FitError::computation("error injection", e.to_string()))?;
        Ok(SyntheticGenerator {
            grid,
            imf,
            errors,
            settings,
            standard_normal,
        })
    }

    /// Generates the synthetic CMD of `vector`. The same vector and the same random
    /// stream always give the same cluster.
    pub fn generate(&self, vector: &ParameterVector, rng: &mut ChaCha8Rng) -> Result<SyntheticCluster> {
        let table = self.grid.isochrone_at(vector.metallicity, vector.age)?;

        let masses = self.imf.sample_until(vector.mass, rng);
        let binary_fraction = vector.binary.clamp(0.0, 1.0);
        let mag_shift = vector.distance + self.settings.extinction_mag_coeff * vector.extinction;
        let color_shift = self.settings.extinction_color_coeff * vector.extinction;
        let mag_limit = self.errors.mag_limit();

        let mut stars = Vec::with_capacity(masses.len());
        for m1 in masses {
            // Draws happen for every star so the stream does not depend on the isochrone coverage
            let is_binary = rng.gen::<f64>() < binary_fraction;
            let q = self.settings.max_mass_ratio * (1.0 - rng.gen::<f64>());

            let Some(primary) = table.interpolate(m1) else {
                continue;
            };
            let point = if is_binary {
                match table.interpolate(m1 * q) {
                    Some(secondary) => combine_points(&primary, &secondary),
                    None => primary,
                }
            } else {
                primary
            };

            let mag = point.mag + mag_shift;
            let color = point.color() + color_shift;
            if mag > mag_limit {
                continue;
            }

            let (e_mag, e_color) = self.errors.sigma(mag);
            stars.push(SyntheticStar {
                mag: mag + e_mag * self.standard_normal.sample(rng),
                color: color + e_color * self.standard_normal.sample(rng),
                e_mag,
                e_color,
            });
        }

        Ok(SyntheticCluster::new(stars))
    }
}
