// convstack - convolution engine
#![allow(clippy::too_many_arguments)]

use rayon::prelude::*;

use crate::helpers::*;

/// Convolve a source activation volume against a bank of learned features,
/// writing a similarity map at `out_width × out_width` resolution.
///
/// For each output cell, the matching source sub-region is found by
/// proportional integer mapping (`top = y * src_height / out_width`, and so
/// on for the other edges), then resampled nearest-neighbour onto the
/// feature grid. Sub-regions may therefore be empty, overlap, or leave gaps
/// depending on the resolution ratio; this is a scale-normalising resample,
/// not a fixed-stride sliding window.
///
/// Each cell/feature pair gets `1 - err / (feature_width² × src_depth)`
/// where `err` is the squared Euclidean distance between the resampled
/// source and the feature patch. Values are not clamped and go negative
/// once the error exceeds the normalisation.
///
/// The output layout is `((y * out_width) + x) * no_of_features + f`,
/// channel-minor like the input, so the map can feed the next stage as its
/// depth dimension. Output rows are independent and computed in parallel.
pub fn convolve_volume(
    src: &[f32],
    src_width: usize,
    src_height: usize,
    src_depth: usize,
    feature_width: usize,
    no_of_features: usize,
    features: &[f32],
    out: &mut [f32],
    out_width: usize,
) {
    debug_assert_eq!(src.len(), src_width * src_height * src_depth);
    debug_assert_eq!(
        features.len(),
        no_of_features * feature_width * feature_width * src_depth
    );
    debug_assert_eq!(out.len(), out_width * out_width * no_of_features);

    let norm = 1.0f32 / (feature_width * feature_width * src_depth) as f32;

    out.par_chunks_mut(out_width * no_of_features)
        .enumerate()
        .for_each(|(out_y, row)| {
            let top = out_y * src_height / out_width;
            let bottom = (out_y + 1) * src_height / out_width;

            for out_x in 0..out_width {
                let left = out_x * src_width / out_width;
                let right = (out_x + 1) * src_width / out_width;

                for f in 0..no_of_features {
                    let start = feature_start(f, feature_width, src_depth);
                    let patch = &features[start..start + feature_width * feature_width * src_depth];

                    let mut err = 0.0f32;

                    for yy in 0..feature_width {
                        let sy = top + yy * (bottom - top) / feature_width;

                        for xx in 0..feature_width {
                            let sx = left + xx * (right - left) / feature_width;

                            let s0 = volume_index(sx, sy, 0, src_width, src_depth);
                            let p0 = patch_index(xx, yy, 0, feature_width, src_depth);

                            for d in 0..src_depth {
                                let diff = src[s0 + d] - patch[p0 + d];
                                err += diff * diff;
                            }
                        }
                    }

                    row[out_x * no_of_features + f] = 1.0 - err * norm;
                }
            }
        });
}
