// convstack - feature learning (strategy trait + default SOM learner)

use crate::helpers::*;

/// Geometry of one layer's activation volume and feature bank, as seen by a
/// [`FeatureLearner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerGeometry {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub feature_width: usize,
    pub no_of_features: usize,
}

impl LayerGeometry {
    /// Number of values in one feature patch.
    pub fn patch_len(&self) -> usize {
        self.feature_width * self.feature_width * self.depth
    }
}

/// A feature-bank update rule.
///
/// One call is one learning trial against the given activation volume: the
/// implementation may mutate `features` in place and must return a scalar
/// matching score where lower is better. `feature_scores` is caller-owned
/// scratch with one slot per feature. `state` is the PCG32 state from
/// [`rand_step`](crate::helpers::rand_step); deterministic implementations
/// must draw all randomness from it.
///
/// The training controller treats this as a black box: it only accumulates
/// the returned scores and compares the total against the layer's match
/// threshold.
pub trait FeatureLearner {
    fn learn_features(
        &mut self,
        activations: &[f32],
        geometry: LayerGeometry,
        features: &mut [f32],
        feature_scores: &mut [f32],
        learning_rate: f32,
        state: &mut u64,
    ) -> f32;
}

/// Default competitive learner.
///
/// Samples one random `feature_width × feature_width` patch from the
/// activation volume, scores every feature against it by normalised squared
/// distance, then pulls the best-matching feature toward the patch by the
/// learning rate. The winner's score is returned.
///
/// Patch coordinates are clamped to the volume, so layers narrower than
/// their feature width still sample valid (edge-repeated) patches.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatchSomLearner;

impl FeatureLearner for PatchSomLearner {
    fn learn_features(
        &mut self,
        activations: &[f32],
        geometry: LayerGeometry,
        features: &mut [f32],
        feature_scores: &mut [f32],
        learning_rate: f32,
        state: &mut u64,
    ) -> f32 {
        let LayerGeometry {
            width,
            height,
            depth,
            feature_width,
            no_of_features,
        } = geometry;

        let norm = 1.0f32 / geometry.patch_len() as f32;

        let max_x = width.saturating_sub(feature_width);
        let max_y = height.saturating_sub(feature_width);
        let px = rand_step(state) as usize % (max_x + 1);
        let py = rand_step(state) as usize % (max_y + 1);

        // score every feature against the sampled patch
        for f in 0..no_of_features {
            let base = feature_start(f, feature_width, depth);

            let mut err = 0.0f32;
            for yy in 0..feature_width {
                let sy = (py + yy).min(height - 1);
                for xx in 0..feature_width {
                    let sx = (px + xx).min(width - 1);
                    let s0 = volume_index(sx, sy, 0, width, depth);
                    let p0 = base + patch_index(xx, yy, 0, feature_width, depth);
                    for d in 0..depth {
                        let diff = activations[s0 + d] - features[p0 + d];
                        err += diff * diff;
                    }
                }
            }

            feature_scores[f] = err * norm;
        }

        let mut winner = 0usize;
        for f in 1..no_of_features {
            if feature_scores[f] < feature_scores[winner] {
                winner = f;
            }
        }

        // pull the winner toward the patch
        let base = feature_start(winner, feature_width, depth);
        for yy in 0..feature_width {
            let sy = (py + yy).min(height - 1);
            for xx in 0..feature_width {
                let sx = (px + xx).min(width - 1);
                let s0 = volume_index(sx, sy, 0, width, depth);
                let p0 = base + patch_index(xx, yy, 0, feature_width, depth);
                for d in 0..depth {
                    let w = features[p0 + d];
                    features[p0 + d] = w + learning_rate * (activations[s0 + d] - w);
                }
            }
        }

        feature_scores[winner]
    }
}
