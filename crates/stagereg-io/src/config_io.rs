//! Pipeline configuration files: a flat JSON object of `PipelineConfig` fields.
//!
//! Missing fields take their defaults, so a file may name only what it changes.

use anyhow::{Context, Result};
use stagereg_registration::PipelineConfig;
use std::fs;
use std::path::Path;

pub fn save_config<P: AsRef<Path>>(path: P, config: &PipelineConfig) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).with_context(|| format!("Failed to write parameter file {}", path.display()))?;
    tracing::debug!("Saved parameters to {}", path.display());
    Ok(())
}

/// Read and validate a configuration.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    let config: PipelineConfig =
        serde_json::from_str(&text).with_context(|| format!("Malformed parameter file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid parameters in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagereg_registration::{Accuracy, MetricKind, RegistrationMode};
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("params.json");
        let config = PipelineConfig::new(RegistrationMode::PipelineBSpline)
            .with_metric(MetricKind::MattesMI)
            .with_bspline(30, 0.2, 15.0)
            .with_accuracy(Accuracy::Fast)
            .with_seed(77);

        save_config(&path, &config)?;
        assert_eq!(load_config(&path)?, config);

        // Flat object, one key per field.
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(value["control_point_spacing"], 15.0);
        assert_eq!(value["seed"], 77);
        Ok(())
    }

    #[test]
    fn test_partial_and_invalid_files() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "rigid_iterations": 12 }"#)?;
        let config = load_config(&path)?;
        assert_eq!(config.rigid_iterations, 12);
        assert_eq!(config.mode, PipelineConfig::default().mode);

        fs::write(&path, r#"{ "rigid_sampling_ratio": 3.0 }"#)?;
        assert!(load_config(&path).is_err());

        assert!(load_config(dir.path().join("missing.json")).is_err());
        Ok(())
    }
}
