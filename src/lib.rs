use std::{fmt, path::Path};

use image::GrayImage;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{
        ela::ElaAnalyzer,
        template::{TemplateInput, TemplateMatcher},
    },
    error::Result,
    metadata::{MetadataAnalysis, MetadataAnalyzer},
    verdict::{ConfidenceLevel, Verdict, combiner::ScoreCombiner},
};

pub mod analysis;
pub mod config;
pub mod error;
pub mod image_utils;
pub mod metadata;
pub mod raster;
pub mod report;
pub mod verdict;

pub use config::{AnalysisConfig, ComponentWeights};
pub use error::ForensicsError;
pub use raster::{PixelFormat, RasterImage, TagSet, TagValue};

/// The three detectors whose scores feed the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    #[serde(rename = "metadata")]
    Metadata,
    #[serde(rename = "ela")]
    ErrorLevel,
    #[serde(rename = "template")]
    Template,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Metadata => write!(f, "metadata"),
            Component::ErrorLevel => write!(f, "ela"),
            Component::Template => write!(f, "template"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component: Component,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the two regions overlap or are at most `gap` pixels apart.
    pub fn is_near(&self, other: &Region, gap: u32) -> bool {
        !(self.x + self.width + gap < other.x
            || other.x + other.width + gap < self.x
            || self.y + self.height + gap < other.y
            || other.y + other.height + gap < self.y)
    }

    pub fn union(&self, other: &Region) -> Region {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);

        Region {
            x,
            y,
            width: x2 - x,
            height: y2 - y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFinding {
    pub marker: String,
    pub tag_key: String,
    pub severity: f64,
}

#[derive(Debug, Clone)]
pub struct ElaResult {
    /// Scaled per-pixel residual, same dimensions as the input.
    pub heatmap: GrayImage,
    pub score: f64,
    pub hot_pixel_ratio: f64,
    pub max_difference: f64,
    pub mean_difference: f64,
    pub suspicious_regions: Vec<Region>,
}

impl ElaResult {
    pub fn save_heatmap<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.heatmap.save(path)?;
        Ok(())
    }
}

/// Record of the matcher correcting swapped reference/candidate inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSwap {
    pub reason: String,
    pub reference_area: u64,
    pub candidate_area: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatchResult {
    pub similarity: f64,
    pub mismatch_probability: f64,
    pub aligned_region: Region,
    pub swap: Option<RoleSwap>,
    pub resampled: bool,
}

impl TemplateMatchResult {
    pub fn new(
        similarity: f64,
        aligned_region: Region,
        swap: Option<RoleSwap>,
        resampled: bool,
    ) -> Self {
        let similarity = image_utils::clamp_unit(similarity);
        Self {
            similarity,
            mismatch_probability: 1.0 - similarity,
            aligned_region,
            swap,
            resampled,
        }
    }
}

/// States an analysis run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    NotStarted,
    MetadataDone,
    ElaDone,
    TemplateDone,
    TemplateSkipped,
    Combined,
    Reported,
}

#[derive(Debug, Clone)]
pub struct ForensicsReport {
    pub components: Vec<ComponentScore>,
    pub final_score: f64,
    pub verdict: Verdict,
    pub confidence: ConfidenceLevel,
    pub findings: Vec<MetadataFinding>,
    pub ela: Option<ElaResult>,
    pub template: Option<TemplateMatchResult>,
    pub stages: Vec<AnalysisStage>,
}

impl ForensicsReport {
    pub fn component(&self, component: Component) -> Option<&ComponentScore> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// One document queued for batch analysis.
#[derive(Debug, Clone)]
pub struct Document {
    pub image: RasterImage,
    pub template: Option<TemplateInput>,
}

/// Runs the three detectors over a document and combines their scores.
///
/// The engine holds only read-only configuration, so one instance can serve
/// any number of concurrent runs.
pub struct ForensicsEngine {
    config: AnalysisConfig,
    metadata: MetadataAnalyzer,
    ela: ElaAnalyzer,
    template: TemplateMatcher,
}

impl ForensicsEngine {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;

        let metadata = MetadataAnalyzer::new(&config.markers, config.metadata_calibration);
        let ela = ElaAnalyzer::new(config.ela_quality)
            .with_amplification(config.ela_amplification)
            .with_hot_pixel_threshold(config.hot_pixel_threshold)
            .with_saturation(config.ela_saturation);
        let template = TemplateMatcher::new(config.template_tolerance)
            .with_swap_area_ratio(config.swap_area_ratio)
            .with_role_assignment(config.role_assignment);

        Ok(Self {
            config,
            metadata,
            ela,
            template,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run(
        &self,
        image: &RasterImage,
        template: Option<&TemplateInput>,
    ) -> Result<ForensicsReport> {
        let mut stages = vec![AnalysisStage::NotStarted];

        let (metadata, (ela, matched)) = if self.config.parallel {
            rayon::join(
                || self.metadata.analyze(image.tags()),
                || {
                    rayon::join(
                        || self.run_ela(image),
                        || self.run_template(image, template),
                    )
                },
            )
        } else {
            (
                self.metadata.analyze(image.tags()),
                (self.run_ela(image), self.run_template(image, template)),
            )
        };

        let MetadataAnalysis {
            score: metadata_score,
            findings,
        } = metadata;
        advance(&mut stages, AnalysisStage::MetadataDone);

        let ela = ela?;
        advance(&mut stages, AnalysisStage::ElaDone);

        let matched = matched?;
        advance(
            &mut stages,
            if matched.is_some() {
                AnalysisStage::TemplateDone
            } else {
                AnalysisStage::TemplateSkipped
            },
        );

        let weights = self.config.weights;
        let mut components = vec![
            ComponentScore {
                component: Component::Metadata,
                score: metadata_score,
                weight: weights.metadata,
            },
            ComponentScore {
                component: Component::ErrorLevel,
                score: ela.score,
                weight: weights.ela,
            },
        ];
        if let Some(result) = &matched {
            components.push(ComponentScore {
                component: Component::Template,
                score: result.mismatch_probability,
                weight: weights.template,
            });
        }

        let combined = ScoreCombiner::combine(&components, self.config.verdict_threshold)?;
        advance(&mut stages, AnalysisStage::Combined);

        info!(
            "document {}x{}: score {:.3} -> {}",
            image.width(),
            image.height(),
            combined.final_score,
            combined.verdict
        );

        advance(&mut stages, AnalysisStage::Reported);

        Ok(ForensicsReport {
            components: combined.components,
            final_score: combined.final_score,
            verdict: combined.verdict,
            confidence: ConfidenceLevel::from_score(combined.final_score),
            findings,
            ela: Some(ela),
            template: matched,
            stages,
        })
    }

    /// Analyzes independent documents in parallel; results keep input order.
    pub fn run_batch(&self, documents: &[Document]) -> Vec<Result<ForensicsReport>> {
        documents
            .par_iter()
            .map(|doc| self.run(&doc.image, doc.template.as_ref()))
            .collect()
    }

    fn run_ela(&self, image: &RasterImage) -> Result<ElaResult> {
        self.ela
            .analyze(image.pixels())
            .map_err(|e| e.in_component(Component::ErrorLevel))
    }

    fn run_template(
        &self,
        image: &RasterImage,
        template: Option<&TemplateInput>,
    ) -> Result<Option<TemplateMatchResult>> {
        template
            .map(|input| self.template.evaluate(image.pixels(), input))
            .transpose()
            .map_err(|e| e.in_component(Component::Template))
    }
}

fn advance(stages: &mut Vec<AnalysisStage>, stage: AnalysisStage) {
    debug!("analysis stage -> {stage:?}");
    stages.push(stage);
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgb, RgbImage, imageops};

    use super::*;
    use crate::analysis::template::RoleAssignment;

    fn document(edited: bool) -> RgbImage {
        let mut image = RgbImage::from_fn(96, 64, |x, y| {
            let v = (100 + x / 2 + y / 3) as u8;
            Rgb([v, v, v.saturating_sub(10)])
        });
        if edited {
            for y in 17..37 {
                for x in 29..49 {
                    image.put_pixel(x, y, Rgb([250, 20, 20]));
                }
            }
        }
        image
    }

    fn raster(edited: bool, tags: TagSet) -> RasterImage {
        RasterImage::new(DynamicImage::ImageRgb8(document(edited)), tags)
    }

    fn engine() -> ForensicsEngine {
        ForensicsEngine::new(AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = AnalysisConfig::default().with_verdict_threshold(2.0);
        assert!(matches!(
            ForensicsEngine::new(config),
            Err(ForensicsError::Config(_))
        ));
    }

    #[test]
    fn run_without_template_skips_matching_and_renormalizes() {
        let report = engine().run(&raster(false, TagSet::new()), None).unwrap();

        assert!(report.template.is_none());
        assert!(report.component(Component::Template).is_none());
        assert_eq!(report.components.len(), 2);
        let weight_sum = report.components.iter().map(|c| c.weight).sum::<f64>();
        assert!((weight_sum - 1.0).abs() < 1e-12);
        assert_eq!(
            report.stages,
            vec![
                AnalysisStage::NotStarted,
                AnalysisStage::MetadataDone,
                AnalysisStage::ElaDone,
                AnalysisStage::TemplateSkipped,
                AnalysisStage::Combined,
                AnalysisStage::Reported,
            ]
        );
    }

    #[test]
    fn heatmap_dimensions_follow_input() {
        let report = engine().run(&raster(false, TagSet::new()), None).unwrap();
        let ela = report.ela.unwrap();
        assert_eq!(ela.heatmap.dimensions(), (96, 64));
    }

    #[test]
    fn template_result_present_only_when_supplied() {
        let image = document(false);
        let reference = imageops::crop_imm(&image, 10, 10, 30, 30).to_image();
        let input = TemplateInput::region(
            DynamicImage::ImageRgb8(reference.clone()),
            DynamicImage::ImageRgb8(reference),
        );

        let report = engine()
            .run(&raster(false, TagSet::new()), Some(&input))
            .unwrap();

        let matched = report.template.as_ref().unwrap();
        assert!((matched.similarity - 1.0).abs() < 1e-9);
        assert_eq!(report.components.len(), 3);
        assert!(report.stages.contains(&AnalysisStage::TemplateDone));
        assert!(report.component(Component::Template).unwrap().score < 1e-9);
    }

    #[test]
    fn edited_document_with_editor_tags_fails() {
        let tags = [("Software", "Adobe Photoshop 24.0")]
            .into_iter()
            .collect::<TagSet>();
        // metadata carries more than half the weight without a template
        let config = AnalysisConfig::default()
            .with_hot_pixel_threshold(20)
            .with_weights(ComponentWeights {
                metadata: 0.6,
                ela: 0.4,
                template: 0.3,
            });
        let engine = ForensicsEngine::new(config).unwrap();

        let report = engine.run(&raster(true, tags), None).unwrap();

        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.component(Component::Metadata).unwrap().score, 1.0);
        assert!(report.final_score >= 0.6);
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[test]
    fn editor_named_in_png_text_chunk_is_flagged() {
        let bytes = crate::metadata::png_text::tests::png_with_text("Adobe Photoshop 24.0");
        let raster = RasterImage::decode(&bytes).unwrap();

        let report = engine().run(&raster, None).unwrap();

        let markers = report
            .findings
            .iter()
            .map(|f| (f.tag_key.as_str(), f.marker.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(markers, vec![("Software", "adobe"), ("Software", "photoshop")]);
        assert_eq!(report.component(Component::Metadata).unwrap().score, 1.0);
    }

    #[test]
    fn clean_document_passes() {
        let report = engine().run(&raster(false, TagSet::new()), None).unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn template_failure_is_tagged_with_its_component() {
        let small = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([1, 2, 3])));
        let large = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 200, Rgb([1, 2, 3])));
        let input = TemplateInput::region(large, small).with_roles(RoleAssignment::Declared);

        let err = engine()
            .run(&raster(false, TagSet::new()), Some(&input))
            .unwrap_err();

        assert_eq!(err.failed_component(), Some(Component::Template));
        assert!(matches!(
            err.root(),
            ForensicsError::RegionSizeMismatch { .. }
        ));
    }

    #[test]
    fn ela_failure_is_tagged_with_its_component() {
        let image = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(
            16,
            16,
            Rgb([500u16, 500, 500]),
        ));
        let err = engine()
            .run(&RasterImage::new(image, TagSet::new()), None)
            .unwrap_err();

        assert_eq!(err.failed_component(), Some(Component::ErrorLevel));
        assert!(matches!(err.root(), ForensicsError::UnsupportedFormat(_)));
    }

    #[test]
    fn sequential_and_parallel_runs_agree() {
        let tags = [("Software", "GIMP 2.10")].into_iter().collect::<TagSet>();
        let image = raster(true, tags);

        let parallel = engine().run(&image, None).unwrap();
        let sequential = ForensicsEngine::new(AnalysisConfig::default().with_parallel(false))
            .unwrap()
            .run(&image, None)
            .unwrap();

        assert_eq!(parallel.final_score, sequential.final_score);
        assert_eq!(parallel.components, sequential.components);
        assert_eq!(parallel.findings, sequential.findings);
    }

    #[test]
    fn batch_keeps_input_order() {
        let documents = vec![
            Document {
                image: raster(false, TagSet::new()),
                template: None,
            },
            Document {
                image: RasterImage::new(DynamicImage::ImageRgb8(RgbImage::new(0, 0)), TagSet::new()),
                template: None,
            },
            Document {
                image: raster(true, [("Software", "GIMP")].into_iter().collect()),
                template: None,
            },
        ];

        let results = engine().run_batch(&documents);
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().findings.is_empty());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().findings.len(), 1);
    }

    #[test]
    fn region_union_and_proximity() {
        let a = Region {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        let b = Region {
            x: 15,
            y: 4,
            width: 10,
            height: 10,
        };
        assert!(a.is_near(&b, 8));
        assert!(!a.is_near(&b, 2));
        assert_eq!(
            a.union(&b),
            Region {
                x: 0,
                y: 0,
                width: 25,
                height: 14
            }
        );
    }
}
