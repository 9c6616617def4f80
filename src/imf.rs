use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mass domain (solar masses) over which every IMF is sampled
pub const IMF_MASS_MIN: f64 = 0.01;
pub const IMF_MASS_MAX: f64 = 100.0;

/// Number of log-spaced nodes of the tabulated CDF
const CDF_NODES: usize = 2000;

/// Initial mass function families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImfKind {
    Chabrier2001Exp,
    Chabrier2001Log,
    Kroupa1993,
    Kroupa2002,
}

impl ImfKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chabrier_2001_exp" => Some(ImfKind::Chabrier2001Exp),
            "chabrier_2001_log" => Some(ImfKind::Chabrier2001Log),
            "kroupa_1993" => Some(ImfKind::Kroupa1993),
            "kroupa_2002" => Some(ImfKind::Kroupa2002),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImfKind::Chabrier2001Exp => "chabrier_2001_exp",
            ImfKind::Chabrier2001Log => "chabrier_2001_log",
            ImfKind::Kroupa1993 => "kroupa_1993",
            ImfKind::Kroupa2002 => "kroupa_2002",
        }
    }

    /// Unnormalised number of stars per unit mass, dN/dm
    pub fn density(&self, m: f64) -> f64 {
        if m <= 0.0 {
            return 0.0;
        }
        match self {
            ImfKind::Chabrier2001Exp => 3.0 * m.powf(-3.3) * (-(716.4 / m).powf(0.25)).exp(),
            ImfKind::Chabrier2001Log => {
                let x = m.log10() - 0.1f64.log10();
                0.141 / (m * std::f64::consts::LN_10) * (-(x * x) / (2.0 * 0.627 * 0.627)).exp()
            }
            ImfKind::Kroupa1993 => broken_power_law(m, &[(0.5, 1.3), (1.0, 2.2), (f64::INFINITY, 2.7)]),
            ImfKind::Kroupa2002 => broken_power_law(m, &[(0.08, 0.3), (0.5, 1.3), (f64::INFINITY, 2.3)]),
        }
    }
}

/// m^-alpha by segments `(upper break, alpha)`, continuous at every break
fn broken_power_law(m: f64, segments: &[(f64, f64)]) -> f64 {
    let mut factor = 1.0;
    for (i, &(upper, alpha)) in segments.iter().enumerate() {
        if m < upper || i == segments.len() - 1 {
            return factor * m.powf(-alpha);
        }
        let next_alpha = segments[i + 1].1;
        factor *= upper.powf(next_alpha - alpha);
    }
    0.0
}

/// Inverse-CDF sampler over a tabulated IMF. Built once per run and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct ImfSampler {
    masses: Vec<f64>,
    cdf: Vec<f64>,
    mean_mass: f64,
}

impl ImfSampler {
    pub fn new(kind: ImfKind) -> Self {
        let (lmin, lmax) = (IMF_MASS_MIN.log10(), IMF_MASS_MAX.log10());
        let masses: Vec<f64> = (0..CDF_NODES)
            .map(|i| 10f64.powf(lmin + (lmax - lmin) * i as f64 / (CDF_NODES - 1) as f64))
            .collect();

        let mut cdf = vec![0.0; CDF_NODES];
        let mut mass_integral = 0.0;
        for i in 1..CDF_NODES {
            let (m0, m1) = (masses[i - 1], masses[i]);
            let (d0, d1) = (kind.density(m0), kind.density(m1));
            let dm = m1 - m0;
            cdf[i] = cdf[i - 1] + 0.5 * (d0 + d1) * dm;
            mass_integral += 0.5 * (m0 * d0 + m1 * d1) * dm;
        }
        let total = cdf[CDF_NODES - 1];
        for c in cdf.iter_mut() {
            *c /= total;
        }

        ImfSampler {
            masses,
            cdf,
            mean_mass: mass_integral / total,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        let hi = self.cdf.partition_point(|c| *c < u).clamp(1, CDF_NODES - 1);
        let (c0, c1) = (self.cdf[hi - 1], self.cdf[hi]);
        let t = if c1 > c0 { (u - c0) / (c1 - c0) } else { 0.0 };
        self.masses[hi - 1] + t * (self.masses[hi] - self.masses[hi - 1])
    }

    /// Draws stellar masses until their sum reaches `total_mass`
    pub fn sample_until<R: Rng + ?Sized>(&self, total_mass: f64, rng: &mut R) -> Vec<f64> {
        if !(total_mass > 0.0) {
            return Vec::new();
        }
        let mut masses = Vec::with_capacity((total_mass / self.mean_mass) as usize + 1);
        let mut cumulative = 0.0;
        while cumulative < total_mass {
            let m = self.sample(rng);
            cumulative += m;
            masses.push(m);
        }
        masses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const ALL: [ImfKind; 4] = [
        ImfKind::Chabrier2001Exp,
        ImfKind::Chabrier2001Log,
        ImfKind::Kroupa1993,
        ImfKind::Kroupa2002,
    ];

    #[test]
    fn test_names_round_trip() {
        for kind in ALL {
            assert_eq!(ImfKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ImfKind::from_name("salpeter"), None);
    }

    #[test]
    fn test_broken_power_law_is_continuous() {
        let eps = 1e-9;
        for brk in [0.5, 1.0] {
            let below = ImfKind::Kroupa1993.density(brk - eps);
            let above = ImfKind::Kroupa1993.density(brk + eps);
            assert!((below - above).abs() / below < 1e-6, "discontinuity at {}", brk);
        }
        for brk in [0.08, 0.5] {
            let below = ImfKind::Kroupa2002.density(brk - eps);
            let above = ImfKind::Kroupa2002.density(brk + eps);
            assert!((below - above).abs() / below < 1e-6, "discontinuity at {}", brk);
        }
    }

    #[test]
    fn test_density_decreases_at_high_mass() {
        for kind in ALL {
            assert!(kind.density(2.0) > kind.density(20.0), "{}", kind.name());
            assert_eq!(kind.density(0.0), 0.0);
        }
    }

    #[test]
    fn test_cdf_is_monotonic_and_normalised() {
        for kind in ALL {
            let sampler = ImfSampler::new(kind);
            assert!(sampler.cdf.windows(2).all(|w| w[1] >= w[0]));
            assert!((sampler.cdf[CDF_NODES - 1] - 1.0).abs() < 1e-12);
            assert!(sampler.mean_mass > IMF_MASS_MIN && sampler.mean_mass < 5.0);
        }
    }

    #[test]
    fn test_samples_stay_in_domain() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for kind in ALL {
            let sampler = ImfSampler::new(kind);
            for _ in 0..1000 {
                let m = sampler.sample(&mut rng);
                assert!((IMF_MASS_MIN..=IMF_MASS_MAX).contains(&m));
            }
        }
    }

    #[test]
    fn test_sample_until_reaches_total_mass() {
        let sampler = ImfSampler::new(ImfKind::Kroupa2002);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let masses = sampler.sample_until(500.0, &mut rng);
        let total: f64 = masses.iter().sum();
        assert!(total >= 500.0);
        assert!(total - masses.last().unwrap() < 500.0);
        assert!(sampler.sample_until(0.0, &mut rng).is_empty());
    }

    #[test]
    fn test_sampling_is_reproducible_with_seed() {
        let sampler = ImfSampler::new(ImfKind::Chabrier2001Exp);
        let a = sampler.sample_until(100.0, &mut ChaCha8Rng::seed_from_u64(1));
        let b = sampler.sample_until(100.0, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(a, b);
    }
}
