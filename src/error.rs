// convstack - construction error types

use std::collections::TryReserveError;

use thiserror::Error;

/// Failures that can occur while building a
/// [`ConvNetwork`](crate::network::ConvNetwork).
///
/// Allocation failures are reported per buffer so a caller can tell which
/// stage of construction failed and retry with smaller geometry.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network must have at least one layer")]
    NoLayers,

    #[error("{name} must be nonzero")]
    ZeroDimension { name: &'static str },

    #[error("final image size {final_width}x{final_height} exceeds input image size {image_width}x{image_height}")]
    FinalSizeExceedsImage {
        image_width: usize,
        image_height: usize,
        final_width: usize,
        final_height: usize,
    },

    #[error("expected {expected} match thresholds, one per layer, got {got}")]
    ThresholdCount { expected: usize, got: usize },

    #[error("activation buffer allocation failed for layer {layer}")]
    ActivationAlloc {
        layer: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("feature bank allocation failed for layer {layer}")]
    FeatureAlloc {
        layer: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("output buffer allocation failed")]
    OutputAlloc {
        #[source]
        source: TryReserveError,
    },

    #[error("match-threshold buffer allocation failed")]
    ThresholdAlloc {
        #[source]
        source: TryReserveError,
    },
}
