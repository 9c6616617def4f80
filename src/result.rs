use crate::candidate::{Candidate, ParameterVector};
use crate::param::Param;
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Outcome of one cluster fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Fit ID, i.e. cluster, algorithm and timestamp
    pub id: String,
    /// clusterfit version and git hash used
    pub version: String,
    pub timestamp: String,
    pub cluster: String,
    /// `brute` or `genet`
    pub algorithm: String,
    /// `tolstoy` or `dolphin`
    pub likelihood: String,
    pub best: Candidate,
    pub best_vector: ParameterVector,
    pub evaluations: usize,
    /// Best score per generation (GA only)
    pub trace: Vec<f64>,
    /// Execution time in seconds
    pub execution_time: f64,
    /// SHA-256 of the configuration the fit ran with
    pub param_digest: String,
}

/// Hex SHA-256 of the JSON serialised configuration
pub fn param_digest(param: &Param) -> String {
    let mut hasher = Sha256::new();
    match serde_json::to_vec(param) {
        Ok(bytes) => hasher.update(&bytes),
        Err(e) => warn!("Configuration could not be serialised for its digest: {}", e),
    }
    format!("{:x}", hasher.finalize())
}

impl FitResult {
    pub fn display(&self) -> String {
        format!(
            "\x1b[1;97m{}\x1b[0m [{} | {}] best {} | score \x1b[1;92m{:.4}\x1b[0m | {} evaluations in {:.2}s",
            self.cluster,
            self.algorithm,
            self.likelihood,
            self.best_vector,
            self.best.score,
            self.evaluations,
            self.execution_time
        )
    }

    /// Saves the result in a suitable format based on file extension.
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "json" => self.save_json(path),
            "yaml" | "yml" => self.save_yaml(path),
            "bin" | "bincode" => self.save_bincode(path),
            _ => {
                warn!("Unknown format. Saving fit result in json.");
                self.save_json(path.with_extension("json"))
            }
        }
    }

    fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn save_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves as Bincode (compact binary, Rust-only)
    fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let encoded = bincode::serialize(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    /// Loads a result, detecting the format from the file extension
    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "json" => Self::load_json(path),
            "yaml" | "yml" => Self::load_yaml(path),
            "bin" | "bincode" => Self::load_bincode(path),
            _ => Self::load_with_fallback(path),
        }
    }

    fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Tries Bincode, then JSON, then YAML
    fn load_with_fallback<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Ok(result) = Self::load_bincode(path) {
            return Ok(result);
        }
        if let Ok(result) = Self::load_json(path) {
            return Ok(result);
        }
        if let Ok(result) = Self::load_yaml(path) {
            return Ok(result);
        }
        Err("Unable to load the fit result".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_result() -> FitResult {
        let mut best = Candidate::new([1, 0, 2, 0, 1, 0]);
        best.score = 123.456;
        FitResult {
            id: "ngc_test_genet_2024-01-01_00-00-00".to_string(),
            version: "0.3.0#unknown".to_string(),
            timestamp: "2024-01-01_00-00-00".to_string(),
            cluster: "ngc_test".to_string(),
            algorithm: "genet".to_string(),
            likelihood: "tolstoy".to_string(),
            best,
            best_vector: ParameterVector::from_values([0.019, 9.0, 0.1, 12.5, 1000.0, 0.5]),
            evaluations: 1200,
            trace: vec![150.0, 130.5, 123.456],
            execution_time: 1.5,
            param_digest: param_digest(&Param::default()),
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("clusterfit_result_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_save_and_load_by_extension() {
        let result = create_test_result();
        for name in ["fit.json", "fit.yaml", "fit.bin"] {
            let path = temp_path(name);
            result.save_auto(&path).unwrap();
            let loaded = FitResult::load_auto(&path).unwrap();
            assert_eq!(loaded, result, "{}", name);
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn test_unknown_extension_saves_json() {
        let result = create_test_result();
        let path = temp_path("fit.out");
        result.save_auto(&path).unwrap();
        let json_path = path.with_extension("json");
        assert!(json_path.exists());
        assert_eq!(FitResult::load_auto(&json_path).unwrap(), result);
        std::fs::remove_file(&json_path).unwrap();
    }

    #[test]
    fn test_param_digest_tracks_configuration() {
        let a = Param::default();
        let mut b = Param::default();
        assert_eq!(param_digest(&a), param_digest(&b));
        assert_eq!(param_digest(&a).len(), 64);
        b.general.seed += 1;
        assert_ne!(param_digest(&a), param_digest(&b));
    }

    #[test]
    fn test_display_mentions_cluster_and_score() {
        let text = crate::utils::strip_ansi(&create_test_result().display());
        assert!(text.starts_with("ngc_test [genet | tolstoy]"));
        assert!(text.contains("score 123.4560"));
    }
}
