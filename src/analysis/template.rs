use image::{
    DynamicImage, GrayImage,
    imageops::{self, FilterType},
};
use imageproc::template_matching::{MatchTemplateMethod, match_template};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    Region, RoleSwap, TemplateMatchResult,
    error::{ForensicsError, Result},
    image_utils::{clamp_unit, ensure_non_empty, gray_to_array, zero_mean_correlation},
};

/// How the matcher treats the caller's reference/candidate labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleAssignment {
    /// Labels are trusted as given.
    Declared,
    /// Labels are swapped when the reference is larger than the candidate by
    /// more than the configured area ratio.
    #[default]
    Infer,
}

#[derive(Debug, Clone)]
pub enum TemplateCandidate {
    /// A region the caller already cropped from the document.
    Region(DynamicImage),
    /// Search the whole document for the best-matching placement.
    Locate,
}

/// Trusted reference element plus where to look for its counterpart.
#[derive(Debug, Clone)]
pub struct TemplateInput {
    pub reference: DynamicImage,
    pub candidate: TemplateCandidate,
    pub roles: Option<RoleAssignment>,
}

impl TemplateInput {
    pub fn region(reference: DynamicImage, candidate: DynamicImage) -> Self {
        Self {
            reference,
            candidate: TemplateCandidate::Region(candidate),
            roles: None,
        }
    }

    pub fn locate(reference: DynamicImage) -> Self {
        Self {
            reference,
            candidate: TemplateCandidate::Locate,
            roles: None,
        }
    }

    pub fn with_roles(mut self, roles: RoleAssignment) -> Self {
        self.roles = Some(roles);
        self
    }
}

pub struct TemplateMatcher {
    tolerance: f64,
    swap_area_ratio: f64,
    roles: RoleAssignment,
}

impl TemplateMatcher {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            swap_area_ratio: 1.0,
            roles: RoleAssignment::Infer,
        }
    }

    pub fn with_swap_area_ratio(mut self, ratio: f64) -> Self {
        self.swap_area_ratio = ratio;
        self
    }

    pub fn with_role_assignment(mut self, roles: RoleAssignment) -> Self {
        self.roles = roles;
        self
    }

    /// Scores a template input against the document it belongs to.
    pub fn evaluate(
        &self,
        document: &DynamicImage,
        input: &TemplateInput,
    ) -> Result<TemplateMatchResult> {
        let roles = input.roles.unwrap_or(self.roles);
        match &input.candidate {
            TemplateCandidate::Region(candidate) => {
                self.compare_regions(candidate, &input.reference, roles)
            }
            TemplateCandidate::Locate => self.locate_with_roles(document, &input.reference, roles),
        }
    }

    /// Compares a caller-cropped candidate against the reference after
    /// resampling the candidate to the reference's size.
    pub fn match_region(
        &self,
        candidate: &DynamicImage,
        reference: &DynamicImage,
    ) -> Result<TemplateMatchResult> {
        self.compare_regions(candidate, reference, self.roles)
    }

    /// Finds the placement of the reference inside the document and scores it.
    pub fn locate(
        &self,
        document: &DynamicImage,
        reference: &DynamicImage,
    ) -> Result<TemplateMatchResult> {
        self.locate_with_roles(document, reference, self.roles)
    }

    fn compare_regions(
        &self,
        candidate: &DynamicImage,
        reference: &DynamicImage,
        roles: RoleAssignment,
    ) -> Result<TemplateMatchResult> {
        ensure_non_empty(candidate, "candidate")?;
        ensure_non_empty(reference, "reference")?;

        let candidate = candidate.to_luma8();
        let reference = reference.to_luma8();
        let (candidate, reference, swap) = self.assign_roles(candidate, reference, roles);

        self.check_tolerance(&candidate, &reference)?;

        let (rw, rh) = reference.dimensions();
        let (cw, ch) = candidate.dimensions();
        let resampled = (cw, ch) != (rw, rh);
        let similarity = if resampled {
            let aligned = imageops::resize(&candidate, rw, rh, FilterType::Triangle);
            region_similarity(&aligned, &reference)
        } else {
            region_similarity(&candidate, &reference)
        };

        Ok(TemplateMatchResult::new(
            similarity,
            Region {
                x: 0,
                y: 0,
                width: cw,
                height: ch,
            },
            swap,
            resampled,
        ))
    }

    fn locate_with_roles(
        &self,
        document: &DynamicImage,
        reference: &DynamicImage,
        roles: RoleAssignment,
    ) -> Result<TemplateMatchResult> {
        ensure_non_empty(document, "document")?;
        ensure_non_empty(reference, "reference")?;

        let document = document.to_luma8();
        let reference = reference.to_luma8();
        let (document, reference, swap) = self.assign_roles(document, reference, roles);

        let (dw, dh) = document.dimensions();
        let (rw, rh) = reference.dimensions();
        if rw > dw || rh > dh {
            return Err(ForensicsError::RegionSizeMismatch {
                candidate: (dw, dh),
                reference: (rw, rh),
                tolerance: self.tolerance,
            });
        }

        let scores = match_template(
            &document,
            &reference,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );

        // all-black patches give NaN scores; skip them
        let (x, y) = scores
            .enumerate_pixels()
            .filter(|(_, _, score)| score[0].is_finite())
            .max_by(|a, b| a.2[0].total_cmp(&b.2[0]))
            .map(|(x, y, _)| (x, y))
            .unwrap_or((0, 0));

        debug!("reference {rw}x{rh} best placed at ({x}, {y}) in {dw}x{dh} document");

        let patch = imageops::crop_imm(&document, x, y, rw, rh).to_image();
        let similarity = region_similarity(&patch, &reference);

        Ok(TemplateMatchResult::new(
            similarity,
            Region {
                x,
                y,
                width: rw,
                height: rh,
            },
            swap,
            false,
        ))
    }

    /// Returns `(candidate, reference, swap)` with the labels corrected if the
    /// reference is more than `swap_area_ratio` times the candidate's area.
    fn assign_roles(
        &self,
        candidate: GrayImage,
        reference: GrayImage,
        roles: RoleAssignment,
    ) -> (GrayImage, GrayImage, Option<RoleSwap>) {
        if roles == RoleAssignment::Declared {
            return (candidate, reference, None);
        }

        let candidate_area = area(&candidate);
        let reference_area = area(&reference);

        if reference_area as f64 > candidate_area as f64 * self.swap_area_ratio {
            let reason = format!(
                "reference area {reference_area} exceeds {:.2}x candidate area {candidate_area}; \
                 treating the larger image as the candidate",
                self.swap_area_ratio
            );
            warn!("template roles swapped: {reason}");

            let swap = RoleSwap {
                reason,
                reference_area,
                candidate_area,
            };
            return (reference, candidate, Some(swap));
        }

        (candidate, reference, None)
    }

    fn check_tolerance(&self, candidate: &GrayImage, reference: &GrayImage) -> Result<()> {
        let (cw, ch) = candidate.dimensions();
        let (rw, rh) = reference.dimensions();

        let exceeds = |a: u32, b: u32| {
            let ratio = a.max(b) as f64 / a.min(b) as f64;
            ratio - 1.0 > self.tolerance
        };

        if exceeds(cw, rw) || exceeds(ch, rh) {
            return Err(ForensicsError::RegionSizeMismatch {
                candidate: (cw, ch),
                reference: (rw, rh),
                tolerance: self.tolerance,
            });
        }

        Ok(())
    }
}

fn area(image: &GrayImage) -> u64 {
    image.width() as u64 * image.height() as u64
}

/// Zero-mean correlation clamped to [0, 1]. Flat regions carry no structure to
/// correlate, so two flat regions compare by brightness and flat against
/// textured scores 0.
fn region_similarity(candidate: &GrayImage, reference: &GrayImage) -> f64 {
    let a = gray_to_array(candidate);
    let b = gray_to_array(reference);

    match zero_mean_correlation(&a, &b) {
        Some(r) => clamp_unit(r),
        None => {
            let flat_a = a.iter().all(|&v| v == a[[0, 0]]);
            let flat_b = b.iter().all(|&v| v == b[[0, 0]]);
            if flat_a && flat_b {
                let delta = (a.mean().unwrap_or(0.0) - b.mean().unwrap_or(0.0)).abs();
                clamp_unit(1.0 - delta / 255.0)
            } else {
                0.0
            }
        }
    }
}
