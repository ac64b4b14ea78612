// convstack - convolution network (geometry, feed-forward, layer-wise training)

use tracing::{debug, info};

use crate::convolution::convolve_volume;
use crate::error::NetworkError;
use crate::features::{FeatureLearner, LayerGeometry};
use crate::helpers::*;
use crate::history::ErrorHistory;

/// Magic number written at the start of every serialised [`ConvNetwork`].
/// Spells "CVST" in ASCII.
const SERIAL_MAGIC: u32 = 0x54535643;

/// Binary format version. Increment when the serialised layout changes.
const SERIAL_VERSION: u32 = 1;

/// Returned by [`ConvNetwork::learn`] when the per-feature score scratch
/// buffer cannot be allocated. Real matching scores from a successful step
/// are accumulations of learner scores and are compared against thresholds;
/// this sentinel is strictly an allocation-failure signal.
pub const SCORE_SCRATCH_ALLOC_FAILED: f32 = -1.0;

/// Structural descriptor for a [`ConvNetwork`].
///
/// Passed to [`ConvNetwork::new`] and fixed thereafter.
#[derive(Clone, Debug)]
pub struct ConvDesc {
    /// Number of convolution layers in the stack.
    pub no_of_layers: usize,
    /// Width of the input image.
    pub image_width: usize,
    /// Height of the input image.
    pub image_height: usize,
    /// Channels per input pixel.
    pub image_depth: usize,
    /// Number of features learned per layer.
    pub no_of_features: usize,
    /// Feature patch width at full image resolution. Scaled down with each
    /// layer's width, floored at 3.
    pub feature_width: usize,
    /// Width of the final output stage.
    pub final_image_width: usize,
    /// Height of the final output stage.
    pub final_image_height: usize,
}

impl Default for ConvDesc {
    fn default() -> Self {
        Self {
            no_of_layers: 3,
            image_width: 128,
            image_height: 128,
            image_depth: 3,
            no_of_features: 32,
            feature_width: 8,
            final_image_width: 16,
            final_image_height: 16,
        }
    }
}

/// One stage of the convolution stack: an activation volume plus the bank
/// of features matched against it.
#[derive(Clone, Debug)]
pub struct ConvLayer {
    width: usize,
    height: usize,
    depth: usize,
    feature_width: usize,
    no_of_features: usize,
    activations: FloatBuffer,
    features: FloatBuffer,
}

impl ConvLayer {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn feature_width(&self) -> usize {
        self.feature_width
    }

    pub fn no_of_features(&self) -> usize {
        self.no_of_features
    }

    /// This layer's dimensions as a [`LayerGeometry`].
    pub fn geometry(&self) -> LayerGeometry {
        LayerGeometry {
            width: self.width,
            height: self.height,
            depth: self.depth,
            feature_width: self.feature_width,
            no_of_features: self.no_of_features,
        }
    }

    /// The activation volume, `width × height × depth`, channel-minor.
    pub fn activations(&self) -> &[f32] {
        &self.activations
    }

    /// The feature bank, `no_of_features` patches of
    /// `feature_width × feature_width × depth`.
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut [f32] {
        &mut self.features
    }
}

/// A stack of convolution layers trained one layer at a time.
///
/// Feed-forward passes cascade [`convolve_volume`] down the stack,
/// shrinking the spatial resolution from the input image toward the final
/// output size. Training drives a [`FeatureLearner`] against the first
/// unconverged layer and advances a cursor once that layer's accumulated
/// matching score beats its threshold.
///
/// # Usage
/// ```rust,no_run
/// use convstack::helpers::rand_get_state;
/// use convstack::network::{ConvDesc, ConvNetwork};
/// use convstack::features::PatchSomLearner;
///
/// let desc = ConvDesc {
///     no_of_layers: 2,
///     image_width: 32,
///     image_height: 32,
///     image_depth: 1,
///     no_of_features: 8,
///     feature_width: 6,
///     final_image_width: 8,
///     final_image_height: 8,
/// };
/// let mut net = ConvNetwork::new(&desc, &[0.2, 0.2]).unwrap();
///
/// let mut state = rand_get_state(12345);
/// net.randomize_features(&mut state);
///
/// let img = vec![0u8; 32 * 32];
/// let mut learner = PatchSomLearner;
/// while !net.is_trained() {
///     net.learn(&img, 10, &mut state, &mut learner);
/// }
///
/// net.feed_forward(&img, net.get_num_layers());
/// let outputs = net.get_outputs();
/// ```
#[derive(Clone, Debug)]
pub struct ConvNetwork {
    layers: Vec<ConvLayer>,
    /// Index of the layer currently being trained; equals the layer count
    /// once every layer has converged.
    current_layer: usize,
    learning_rate: f32,
    iterations: u64,
    training_ctr: u64,
    outputs_width: usize,
    outputs: FloatBuffer,
    match_threshold: FloatBuffer,
    history: ErrorHistory,
}

impl ConvNetwork {
    /// Build a fully allocated network from a descriptor and one match
    /// threshold per layer.
    ///
    /// Layer widths interpolate linearly (integer truncating) from the
    /// image width down toward the final width; layer 0 keeps the image
    /// height while later layers are square. Each layer's feature width is
    /// the base feature width scaled by that layer's width, floored at 3.
    ///
    /// The threshold slice is copied; the caller's storage is free to reuse
    /// immediately. Buffers start zeroed; call
    /// [`randomize_features`](Self::randomize_features) before training.
    pub fn new(desc: &ConvDesc, match_threshold: &[f32]) -> Result<Self, NetworkError> {
        if desc.no_of_layers == 0 {
            return Err(NetworkError::NoLayers);
        }
        for (value, name) in [
            (desc.image_width, "image_width"),
            (desc.image_height, "image_height"),
            (desc.image_depth, "image_depth"),
            (desc.no_of_features, "no_of_features"),
            (desc.feature_width, "feature_width"),
            (desc.final_image_width, "final_image_width"),
            (desc.final_image_height, "final_image_height"),
        ] {
            if value == 0 {
                return Err(NetworkError::ZeroDimension { name });
            }
        }
        if desc.final_image_width > desc.image_width
            || desc.final_image_height > desc.image_height
        {
            return Err(NetworkError::FinalSizeExceedsImage {
                image_width: desc.image_width,
                image_height: desc.image_height,
                final_width: desc.final_image_width,
                final_height: desc.final_image_height,
            });
        }
        if match_threshold.len() != desc.no_of_layers {
            return Err(NetworkError::ThresholdCount {
                expected: desc.no_of_layers,
                got: match_threshold.len(),
            });
        }

        let mut layers: Vec<ConvLayer> = Vec::with_capacity(desc.no_of_layers);

        for l in 0..desc.no_of_layers {
            let width = desc.image_width
                - (desc.image_width - desc.final_image_width) * l / desc.no_of_layers;
            let height = if l == 0 { desc.image_height } else { width };
            let depth = if l == 0 {
                desc.image_depth
            } else {
                layers[l - 1].no_of_features
            };
            let feature_width = (desc.feature_width * width / desc.image_width).max(3);

            let activations = try_alloc_f32(width * height * depth)
                .map_err(|source| NetworkError::ActivationAlloc { layer: l, source })?;
            let features =
                try_alloc_f32(desc.no_of_features * feature_width * feature_width * depth)
                    .map_err(|source| NetworkError::FeatureAlloc { layer: l, source })?;

            layers.push(ConvLayer {
                width,
                height,
                depth,
                feature_width,
                no_of_features: desc.no_of_features,
                activations,
                features,
            });
        }

        let outputs_width = desc.final_image_width;
        let last_depth = layers[desc.no_of_layers - 1].depth;
        let outputs = try_alloc_f32(outputs_width * outputs_width * last_depth)
            .map_err(|source| NetworkError::OutputAlloc { source })?;

        let mut thresholds = try_alloc_f32(desc.no_of_layers)
            .map_err(|source| NetworkError::ThresholdAlloc { source })?;
        thresholds.copy_from_slice(match_threshold);

        debug!(
            layers = desc.no_of_layers,
            image_width = desc.image_width,
            image_height = desc.image_height,
            image_depth = desc.image_depth,
            features = desc.no_of_features,
            "created convolution network"
        );

        Ok(Self {
            layers,
            current_layer: 0,
            learning_rate: 0.1,
            iterations: 0,
            training_ctr: 0,
            outputs_width,
            outputs,
            match_threshold: thresholds,
            history: ErrorHistory::new(),
        })
    }

    /// Run the feed-forward cascade through the first `layers` stages.
    ///
    /// The byte image is normalised to `[0, 1]` into layer 0's activation
    /// volume, then each stage convolves into the next stage's volume; the
    /// last stage of a full pass writes the shared output buffer instead.
    /// With `layers == 0` only the normalised image is loaded.
    ///
    /// Afterwards, every buffer up to stage `layers` reflects a consistent
    /// forward pass; buffers past that point keep whatever they held
    /// before.
    ///
    /// # Panics
    /// Panics if `layers` exceeds the layer count or the image length does
    /// not match layer 0's volume.
    pub fn feed_forward(&mut self, img: &[u8], layers: usize) {
        let no_of_layers = self.layers.len();
        assert!(
            layers <= no_of_layers,
            "feed-forward depth {layers} exceeds layer count {no_of_layers}"
        );

        let input_len = self.layers[0].width * self.layers[0].height * self.layers[0].depth;
        assert_eq!(
            img.len(),
            input_len,
            "image length {} does not match layer 0 volume {input_len}",
            img.len()
        );

        for (a, &p) in self.layers[0].activations.iter_mut().zip(img) {
            *a = p as f32 / 255.0;
        }

        for l in 0..layers {
            if l + 1 < no_of_layers {
                let (head, tail) = self.layers.split_at_mut(l + 1);
                let src = &head[l];
                let dst = &mut tail[0];
                convolve_volume(
                    &src.activations,
                    src.width,
                    src.height,
                    src.depth,
                    src.feature_width,
                    src.no_of_features,
                    &src.features,
                    &mut dst.activations,
                    dst.width,
                );
            } else {
                let src = &self.layers[l];
                convolve_volume(
                    &src.activations,
                    src.width,
                    src.height,
                    src.depth,
                    src.feature_width,
                    src.no_of_features,
                    &src.features,
                    &mut self.outputs,
                    self.outputs_width,
                );
            }
        }
    }

    /// Run one training step at the current layer.
    ///
    /// Feed-forward populates activations up to the layer being trained,
    /// then `learner` runs `samples` trials against it, each returned score
    /// adding to the step's matching score. If the *accumulated* score
    /// falls strictly below the layer's match threshold, that layer is
    /// committed and the cursor advances, so subsequent calls train the
    /// next layer. Because the total (not the mean) is compared, the
    /// effective threshold scales with `samples`; use a consistent sample
    /// count across calls.
    ///
    /// Returns the accumulated score (lower is better). Once every layer
    /// has converged this is a no-op returning `0.0`;
    /// [`SCORE_SCRATCH_ALLOC_FAILED`] is returned if the per-feature score
    /// scratch cannot be allocated.
    pub fn learn(
        &mut self,
        img: &[u8],
        samples: usize,
        state: &mut u64,
        learner: &mut dyn FeatureLearner,
    ) -> f32 {
        let layer = self.current_layer;
        if layer >= self.layers.len() {
            return 0.0;
        }

        self.feed_forward(img, layer);

        let mut feature_scores = match try_alloc_f32(self.layers[layer].no_of_features) {
            Ok(buf) => buf,
            Err(_) => return SCORE_SCRATCH_ALLOC_FAILED,
        };

        let geometry = self.layers[layer].geometry();
        let learning_rate = self.learning_rate;
        let mut matching_score = 0.0f32;

        let stage = &mut self.layers[layer];
        for _ in 0..samples {
            matching_score += learner.learn_features(
                &stage.activations,
                geometry,
                &mut stage.features,
                &mut feature_scores,
                learning_rate,
                state,
            );
            self.iterations += 1;
        }

        self.training_ctr += 1;
        self.history.record(matching_score);

        debug!(layer, samples, score = matching_score, "training step");

        if matching_score < self.match_threshold[layer] {
            self.current_layer += 1;
            info!(
                layer,
                score = matching_score,
                threshold = self.match_threshold[layer],
                "layer converged, advancing"
            );
        }

        matching_score
    }

    /// Fill every layer's feature bank with uniform values in `[0, 1)`.
    pub fn randomize_features(&mut self, state: &mut u64) {
        for stage in &mut self.layers {
            for w in &mut stage.features {
                *w = randf_step(state);
            }
        }
    }

    /// Rewind the training cursor and zero all activation state, keeping
    /// the learned feature banks.
    pub fn reset_training(&mut self) {
        self.current_layer = 0;
        self.iterations = 0;
        self.training_ctr = 0;
        for stage in &mut self.layers {
            stage.activations.fill(0.0);
        }
        self.outputs.fill(0.0);
        self.history = ErrorHistory::new();
    }

    /// Return the number of layers.
    pub fn get_num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Return the index of the layer currently being trained; equals the
    /// layer count once training has finished.
    pub fn get_current_layer(&self) -> usize {
        self.current_layer
    }

    /// Return `true` once every layer has converged.
    pub fn is_trained(&self) -> bool {
        self.current_layer >= self.layers.len()
    }

    /// Return a reference to layer `l`.
    pub fn get_layer(&self, l: usize) -> &ConvLayer {
        &self.layers[l]
    }

    /// Return a mutable reference to layer `l`.
    pub fn get_layer_mut(&mut self, l: usize) -> &mut ConvLayer {
        &mut self.layers[l]
    }

    /// Return the flattened final-stage output vector,
    /// `outputs_width² × depth(last layer)`, channel-minor.
    pub fn get_outputs(&self) -> &[f32] {
        &self.outputs
    }

    /// Return the square resolution of the final output stage.
    pub fn get_outputs_width(&self) -> usize {
        self.outputs_width
    }

    pub fn get_learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// Total learner invocations across all training steps.
    pub fn get_iterations(&self) -> u64 {
        self.iterations
    }

    /// Total training steps taken.
    pub fn get_training_ctr(&self) -> u64 {
        self.training_ctr
    }

    /// Return the per-layer match thresholds.
    pub fn get_match_threshold(&self) -> &[f32] {
        &self.match_threshold
    }

    /// Return the recorded training-error history.
    pub fn get_history(&self) -> &ErrorHistory {
        &self.history
    }

    // Serialization

    /// Serialise the full network (geometry, feature banks, activations,
    /// training state) to a [`StreamWriter`].
    ///
    /// A magic number and version header are written first.
    pub fn write(&self, writer: &mut dyn StreamWriter) {
        writer.write_u32(SERIAL_MAGIC);
        writer.write_u32(SERIAL_VERSION);

        writer.write_u32(self.layers.len() as u32);
        writer.write_u32(self.outputs_width as u32);
        writer.write_u32(self.current_layer as u32);
        writer.write_f32(self.learning_rate);
        writer.write_u64(self.iterations);
        writer.write_u64(self.training_ctr);

        for stage in &self.layers {
            writer.write_u32(stage.width as u32);
            writer.write_u32(stage.height as u32);
            writer.write_u32(stage.depth as u32);
            writer.write_u32(stage.feature_width as u32);
            writer.write_u32(stage.no_of_features as u32);
            writer.write_f32_slice(&stage.features);
            writer.write_f32_slice(&stage.activations);
        }

        writer.write_f32_slice(&self.outputs);
        writer.write_f32_slice(&self.match_threshold);

        self.history.write(writer);
    }

    /// Deserialise a network from a [`StreamReader`].
    ///
    /// # Panics
    /// Panics if the magic number does not match or the version is
    /// unsupported.
    pub fn read(reader: &mut dyn StreamReader) -> Self {
        let magic = reader.read_u32();
        assert_eq!(
            magic, SERIAL_MAGIC,
            "invalid convstack file: bad magic number (got {magic:#010x}, expected {SERIAL_MAGIC:#010x})"
        );
        let version = reader.read_u32();
        assert_eq!(
            version, SERIAL_VERSION,
            "unsupported convstack file version: {version} (supported: {SERIAL_VERSION})"
        );

        let no_of_layers = reader.read_u32() as usize;
        let outputs_width = reader.read_u32() as usize;
        let current_layer = reader.read_u32() as usize;
        let learning_rate = reader.read_f32();
        let iterations = reader.read_u64();
        let training_ctr = reader.read_u64();

        let mut layers: Vec<ConvLayer> = Vec::with_capacity(no_of_layers);

        for _ in 0..no_of_layers {
            let width = reader.read_u32() as usize;
            let height = reader.read_u32() as usize;
            let depth = reader.read_u32() as usize;
            let feature_width = reader.read_u32() as usize;
            let no_of_features = reader.read_u32() as usize;

            let mut features = vec![0.0f32; no_of_features * feature_width * feature_width * depth];
            reader.read_f32_slice(&mut features);

            let mut activations = vec![0.0f32; width * height * depth];
            reader.read_f32_slice(&mut activations);

            layers.push(ConvLayer {
                width,
                height,
                depth,
                feature_width,
                no_of_features,
                activations,
                features,
            });
        }

        let last_depth = layers[no_of_layers - 1].depth;
        let mut outputs = vec![0.0f32; outputs_width * outputs_width * last_depth];
        reader.read_f32_slice(&mut outputs);

        let mut match_threshold = vec![0.0f32; no_of_layers];
        reader.read_f32_slice(&mut match_threshold);

        let history = ErrorHistory::read(reader);

        Self {
            layers,
            current_layer,
            learning_rate,
            iterations,
            training_ctr,
            outputs_width,
            outputs,
            match_threshold,
            history,
        }
    }

    /// Serialise only the learned feature banks.
    pub fn write_features(&self, writer: &mut dyn StreamWriter) {
        for stage in &self.layers {
            writer.write_f32_slice(&stage.features);
        }
    }

    /// Deserialise only the learned feature banks. The network geometry
    /// must match the one the banks were written from.
    pub fn read_features(&mut self, reader: &mut dyn StreamReader) {
        for stage in &mut self.layers {
            reader.read_f32_slice(&mut stage.features);
        }
    }
}
