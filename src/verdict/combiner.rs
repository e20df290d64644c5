use log::debug;

use crate::{
    ComponentScore,
    error::{ForensicsError, Result},
    image_utils::clamp_unit,
    verdict::Verdict,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedScore {
    pub final_score: f64,
    pub verdict: Verdict,
    /// Input components with their weights renormalized to sum to 1.
    pub components: Vec<ComponentScore>,
}

/// Weighted average of the component scores that are present.
pub struct ScoreCombiner;

impl ScoreCombiner {
    pub fn combine(components: &[ComponentScore], threshold: f64) -> Result<CombinedScore> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ForensicsError::Config(format!(
                "verdict threshold must lie in [0, 1], got {threshold}"
            )));
        }

        if let Some(bad) = components
            .iter()
            .find(|c| !c.weight.is_finite() || c.weight < 0.0)
        {
            return Err(ForensicsError::Config(format!(
                "weight for {} must be a non-negative number, got {}",
                bad.component, bad.weight
            )));
        }

        let total_weight = components.iter().map(|c| c.weight).sum::<f64>();
        if total_weight <= 0.0 {
            return Err(ForensicsError::Config(
                "active component weights must sum to a positive value".into(),
            ));
        }

        let components = components
            .iter()
            .map(|c| ComponentScore {
                component: c.component,
                score: clamp_unit(c.score),
                weight: c.weight / total_weight,
            })
            .collect::<Vec<_>>();

        let final_score = clamp_unit(components.iter().map(|c| c.score * c.weight).sum::<f64>());
        let verdict = Verdict::from_score(final_score, threshold);

        debug!(
            "combined {} components into {:.4} ({verdict})",
            components.len(),
            final_score
        );

        Ok(CombinedScore {
            final_score,
            verdict,
            components,
        })
    }
}
