pub mod visualization;

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::Serialize;

use crate::{
    AnalysisStage, ComponentScore, ForensicsReport, MetadataFinding, RasterImage, Region,
    TemplateMatchResult,
    error::Result,
    report::visualization::Visualizer,
    verdict::{ConfidenceLevel, Verdict},
};

#[derive(Serialize)]
pub struct JsonReport {
    pub final_score: f64,
    pub verdict: Verdict,
    pub confidence: ConfidenceLevel,
    pub components: Vec<ComponentScore>,
    pub findings: Vec<MetadataFinding>,
    pub ela: Option<ElaReportSection>,
    pub template: Option<TemplateMatchResult>,
    pub stages: Vec<AnalysisStage>,
}

#[derive(Serialize)]
pub struct ElaReportSection {
    pub score: f64,
    pub hot_pixel_ratio: f64,
    pub max_difference: f64,
    pub mean_difference: f64,
    pub heatmap_width: u32,
    pub heatmap_height: u32,
    pub suspicious_regions: Vec<Region>,
}

impl From<&ForensicsReport> for JsonReport {
    fn from(report: &ForensicsReport) -> Self {
        Self {
            final_score: report.final_score,
            verdict: report.verdict,
            confidence: report.confidence,
            components: report.components.clone(),
            findings: report.findings.clone(),
            ela: report.ela.as_ref().map(|ela| ElaReportSection {
                score: ela.score,
                hot_pixel_ratio: ela.hot_pixel_ratio,
                max_difference: ela.max_difference,
                mean_difference: ela.mean_difference,
                heatmap_width: ela.heatmap.width(),
                heatmap_height: ela.heatmap.height(),
                suspicious_regions: ela.suspicious_regions.clone(),
            }),
            template: report.template.clone(),
            stages: report.stages.clone(),
        }
    }
}

impl JsonReport {
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Files written by [`write_artifacts`].
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub report: PathBuf,
    pub heatmap: Option<PathBuf>,
    pub overlay: Option<PathBuf>,
}

/// Writes `report.json` and, when ELA ran, the raw heatmap and an overlay on
/// the original document into `directory`.
pub fn write_artifacts<P: AsRef<Path>>(
    report: &ForensicsReport,
    original: &RasterImage,
    directory: P,
) -> Result<ArtifactPaths> {
    let directory = directory.as_ref();
    fs::create_dir_all(directory)?;

    let report_path = directory.join("report.json");
    fs::write(&report_path, JsonReport::from(report).to_json()?)?;

    let mut paths = ArtifactPaths {
        report: report_path,
        heatmap: None,
        overlay: None,
    };

    if let Some(ela) = &report.ela {
        let heatmap_path = directory.join("ela_heatmap.png");
        ela.save_heatmap(&heatmap_path)?;

        let visualizer = Visualizer::new();
        let mut overlay = visualizer.visualize_ela(&original.pixels().to_rgb8(), ela);
        if let Some(template) = &report.template {
            visualizer.mark_template(&mut overlay, template);
        }
        let overlay_path = directory.join("ela_overlay.png");
        overlay.save(&overlay_path)?;

        paths.heatmap = Some(heatmap_path);
        paths.overlay = Some(overlay_path);
    }

    info!("wrote forensic artifacts to {}", directory.display());
    Ok(paths)
}
