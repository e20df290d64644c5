use thiserror::Error;

use crate::Component;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error(
        "Region size mismatch: candidate {}x{} vs reference {}x{} (tolerance {})",
        candidate.0, candidate.1, reference.0, reference.1, tolerance
    )]
    RegionSizeMismatch {
        candidate: (u32, u32),
        reference: (u32, u32),
        tolerance: f64,
    },

    #[error("Empty region: {0}")]
    EmptyRegion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{component} analysis failed: {source}")]
    Component {
        component: Component,
        #[source]
        source: Box<ForensicsError>,
    },
}

impl ForensicsError {
    /// Tags the error with the pipeline stage that raised it.
    pub fn in_component(self, component: Component) -> Self {
        match self {
            already @ ForensicsError::Component { .. } => already,
            other => ForensicsError::Component {
                component,
                source: Box::new(other),
            },
        }
    }

    pub fn failed_component(&self) -> Option<Component> {
        match self {
            ForensicsError::Component { component, .. } => Some(*component),
            _ => None,
        }
    }

    /// The underlying error with any stage tag removed.
    pub fn root(&self) -> &ForensicsError {
        match self {
            ForensicsError::Component { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
