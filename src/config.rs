use std::{collections::BTreeMap, fs, path::Path};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::template::RoleAssignment,
    error::{ForensicsError, Result},
};

/// Base weight of each detector before renormalization over the active set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub metadata: f64,
    pub ela: f64,
    pub template: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            metadata: 0.2,
            ela: 0.5,
            template: 0.3,
        }
    }
}

/// Process-wide analysis settings. Loaded once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Marker substring to severity. Matching is case-insensitive.
    pub markers: BTreeMap<String, f64>,
    pub metadata_calibration: f64,
    pub ela_quality: u8,
    pub ela_amplification: f64,
    /// A pixel is hot when its scaled heatmap intensity (0-255) is strictly
    /// above this value.
    pub hot_pixel_threshold: u8,
    /// Magnitude-weighted hot ratio that maps to an ELA score of 1.0.
    pub ela_saturation: f64,
    /// Allowed relative size difference per axis between candidate and reference.
    pub template_tolerance: f64,
    pub swap_area_ratio: f64,
    pub role_assignment: RoleAssignment,
    pub weights: ComponentWeights,
    pub verdict_threshold: f64,
    pub parallel: bool,
}

pub fn default_markers() -> BTreeMap<String, f64> {
    [
        ("photoshop", 0.8),
        ("gimp", 0.8),
        ("adobe", 0.5),
        ("paint.net", 0.6),
        ("affinity", 0.6),
        ("pixelmator", 0.6),
        ("snapseed", 0.5),
        ("ilovepdf", 0.5),
    ]
    .into_iter()
    .map(|(marker, severity)| (marker.to_string(), severity))
    .collect()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            metadata_calibration: 0.8,
            ela_quality: 90,
            ela_amplification: 10.0,
            hot_pixel_threshold: 40,
            ela_saturation: 0.05,
            template_tolerance: 0.5,
            swap_area_ratio: 1.0,
            role_assignment: RoleAssignment::Infer,
            weights: ComponentWeights::default(),
            verdict_threshold: 0.5,
            parallel: true,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ForensicsError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        debug!("loaded configuration with {} markers", config.markers.len());
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(&path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_markers(mut self, markers: BTreeMap<String, f64>) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_metadata_calibration(mut self, calibration: f64) -> Self {
        self.metadata_calibration = calibration;
        self
    }

    pub fn with_ela_quality(mut self, quality: u8) -> Self {
        self.ela_quality = quality;
        self
    }

    pub fn with_hot_pixel_threshold(mut self, threshold: u8) -> Self {
        self.hot_pixel_threshold = threshold;
        self
    }

    pub fn with_template_tolerance(mut self, tolerance: f64) -> Self {
        self.template_tolerance = tolerance;
        self
    }

    pub fn with_role_assignment(mut self, roles: RoleAssignment) -> Self {
        self.role_assignment = roles;
        self
    }

    pub fn with_weights(mut self, weights: ComponentWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_verdict_threshold(mut self, threshold: f64) -> Self {
        self.verdict_threshold = threshold;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.ela_quality) {
            return Err(config_error(format!(
                "ela_quality must be between 1 and 100, got {}",
                self.ela_quality
            )));
        }

        let weights = [
            ("metadata", self.weights.metadata),
            ("ela", self.weights.ela),
            ("template", self.weights.template),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(config_error(format!(
                    "weight for {name} must be a non-negative number, got {weight}"
                )));
            }
        }
        // metadata and ela run on every document; the template may be absent
        if self.weights.metadata + self.weights.ela <= 0.0 {
            return Err(config_error(
                "metadata and ela weights must sum to a positive value".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.verdict_threshold) {
            return Err(config_error(format!(
                "verdict_threshold must lie in [0, 1], got {}",
                self.verdict_threshold
            )));
        }

        for (name, value) in [
            ("metadata_calibration", self.metadata_calibration),
            ("ela_amplification", self.ela_amplification),
            ("ela_saturation", self.ela_saturation),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(config_error(format!("{name} must be positive, got {value}")));
            }
        }

        if !self.template_tolerance.is_finite() || self.template_tolerance < 0.0 {
            return Err(config_error(format!(
                "template_tolerance must be non-negative, got {}",
                self.template_tolerance
            )));
        }

        if !self.swap_area_ratio.is_finite() || self.swap_area_ratio < 1.0 {
            return Err(config_error(format!(
                "swap_area_ratio must be at least 1.0, got {}",
                self.swap_area_ratio
            )));
        }

        for (marker, severity) in &self.markers {
            if marker.trim().is_empty() {
                return Err(config_error("marker strings must not be empty".into()));
            }
            if !severity.is_finite() || *severity < 0.0 {
                return Err(config_error(format!(
                    "severity for marker '{marker}' must be non-negative, got {severity}"
                )));
            }
        }

        Ok(())
    }
}

fn config_error(message: String) -> ForensicsError {
    ForensicsError::Config(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{ "ela_quality": 80, "weights": { "template": 0.0 }, "role_assignment": "declared" }"#,
        )
        .unwrap();

        assert_eq!(config.ela_quality, 80);
        assert_eq!(config.weights.template, 0.0);
        assert_eq!(config.weights.ela, 0.5);
        assert_eq!(config.role_assignment, RoleAssignment::Declared);
        assert_eq!(config.markers, default_markers());
    }

    #[test]
    fn threshold_outside_unit_range_is_rejected() {
        let err = AnalysisConfig::default()
            .with_verdict_threshold(1.5)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ForensicsError::Config(_)));
    }

    #[test]
    fn always_active_weights_must_be_positive() {
        let config = AnalysisConfig::default().with_weights(ComponentWeights {
            metadata: 0.0,
            ela: 0.0,
            template: 1.0,
        });
        assert!(matches!(config.validate(), Err(ForensicsError::Config(_))));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let json = r#"{ "weights": { "metadata": -0.1, "ela": 0.5, "template": 0.3 } }"#;
        assert!(matches!(
            AnalysisConfig::from_json(json),
            Err(ForensicsError::Config(_))
        ));
    }

    #[test]
    fn zero_quality_is_rejected() {
        let config = AnalysisConfig::default().with_ela_quality(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            AnalysisConfig::from_json("{ not json"),
            Err(ForensicsError::Config(_))
        ));
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forensics.json");
        let config = AnalysisConfig::default().with_verdict_threshold(0.65);
        fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = AnalysisConfig::from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
