pub mod exif;
pub mod png_text;

use std::collections::BTreeMap;

use log::debug;

use crate::{MetadataFinding, raster::TagSet};

/// Outcome of a marker scan over one tag set.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataAnalysis {
    pub score: f64,
    pub findings: Vec<MetadataFinding>,
}

struct Marker {
    text: String,
    needle: String,
    severity: f64,
}

/// Flags tag values that mention known editing tools.
pub struct MetadataAnalyzer {
    markers: Vec<Marker>,
    calibration: f64,
}

impl MetadataAnalyzer {
    pub fn new(markers: &BTreeMap<String, f64>, calibration: f64) -> Self {
        let markers = markers
            .iter()
            .filter(|(text, _)| !text.is_empty())
            .map(|(text, &severity)| Marker {
                text: text.clone(),
                needle: text.to_lowercase(),
                severity,
            })
            .collect();

        Self {
            markers,
            calibration,
        }
    }

    /// Score is the summed severity of every (tag, marker) hit over the
    /// calibration constant, capped at 1.
    pub fn analyze(&self, tags: &TagSet) -> MetadataAnalysis {
        let mut findings = Vec::new();

        for (key, value) in tags.iter() {
            let haystack = value.as_text().to_lowercase();
            if haystack.is_empty() {
                continue;
            }

            for marker in &self.markers {
                if haystack.contains(&marker.needle) {
                    debug!("marker '{}' found in tag {}", marker.text, key);
                    findings.push(MetadataFinding {
                        marker: marker.text.clone(),
                        tag_key: key.to_string(),
                        severity: marker.severity,
                    });
                }
            }
        }

        let total = findings.iter().map(|f| f.severity).sum::<f64>();
        let score = if total <= 0.0 {
            0.0
        } else if self.calibration > 0.0 {
            (total / self.calibration).min(1.0)
        } else {
            1.0
        };

        MetadataAnalysis { score, findings }
    }
}
