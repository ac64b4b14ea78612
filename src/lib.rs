//! Layer-wise unsupervised convolutional feature learning.
//!
//! A [`ConvNetwork`](network::ConvNetwork) stacks convolution layers that
//! progressively shrink the spatial resolution of an input image while each
//! layer learns a bank of matching features. Layers train one at a time: a
//! [`FeatureLearner`](features::FeatureLearner) is driven against the first
//! unconverged layer until that layer's accumulated matching score beats
//! its threshold, then the training cursor advances to the next layer. A
//! fully trained stack turns an image into a flattened feature-similarity
//! vector suitable as input for a downstream classifier.
//!
//! The convolution itself is a scale-normalising resample rather than a
//! strided sliding window: each output cell compares its proportional
//! source sub-region against every feature patch, so the output resolution
//! is chosen freely per stage. See
//! [`convolve_volume`](convolution::convolve_volume).

pub mod convolution;
pub mod error;
pub mod features;
pub mod helpers;
pub mod history;
pub mod network;
pub mod plot;

pub use error::NetworkError;
pub use features::{FeatureLearner, LayerGeometry, PatchSomLearner};
pub use history::ErrorHistory;
pub use network::{ConvDesc, ConvLayer, ConvNetwork, SCORE_SCRATCH_ALLOC_FAILED};
