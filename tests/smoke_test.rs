use convstack::error::NetworkError;
use convstack::features::{FeatureLearner, LayerGeometry, PatchSomLearner};
use convstack::helpers::{output_index, rand_get_state, SliceReader, VecWriter};
use convstack::convolution::convolve_volume;
use convstack::network::{ConvDesc, ConvNetwork};

/// Learner stub returning a fixed score per call, never touching the bank.
struct ConstLearner {
    score: f32,
    calls: usize,
}

impl ConstLearner {
    fn new(score: f32) -> Self {
        Self { score, calls: 0 }
    }
}

impl FeatureLearner for ConstLearner {
    fn learn_features(
        &mut self,
        _activations: &[f32],
        _geometry: LayerGeometry,
        _features: &mut [f32],
        _feature_scores: &mut [f32],
        _learning_rate: f32,
        _state: &mut u64,
    ) -> f32 {
        self.calls += 1;
        self.score
    }
}

fn small_desc() -> ConvDesc {
    // The 2-layer reference configuration: 8x8x1 image reduced to 4x4,
    // 2 features per layer, base feature width 4.
    ConvDesc {
        no_of_layers: 2,
        image_width: 8,
        image_height: 8,
        image_depth: 1,
        no_of_features: 2,
        feature_width: 4,
        final_image_width: 4,
        final_image_height: 4,
    }
}

fn small_net() -> ConvNetwork {
    ConvNetwork::new(&small_desc(), &[0.5, 0.5]).unwrap()
}

#[test]
fn test_geometry_interpolation() {
    let desc = ConvDesc {
        no_of_layers: 4,
        image_width: 32,
        image_height: 24,
        image_depth: 3,
        no_of_features: 8,
        feature_width: 4,
        final_image_width: 8,
        final_image_height: 8,
    };
    let net = ConvNetwork::new(&desc, &[0.5; 4]).unwrap();

    assert_eq!(net.get_num_layers(), 4);
    assert_eq!(net.get_layer(0).width(), 32);
    assert_eq!(net.get_layer(0).height(), 24);
    assert_eq!(net.get_layer(1).width(), 26);
    assert_eq!(net.get_layer(2).width(), 20);
    assert_eq!(net.get_layer(3).width(), 14);

    // widths shrink monotonically toward the final width
    for l in 1..4 {
        let w = net.get_layer(l).width();
        assert!(w <= net.get_layer(l - 1).width());
        assert!(w >= desc.final_image_width);
        // layers past the first are square
        assert_eq!(net.get_layer(l).height(), w);
    }

    // feature width scales with layer width but never drops below 3
    assert_eq!(net.get_layer(0).feature_width(), 4);
    assert_eq!(net.get_layer(3).feature_width(), 3); // 4*14/32 = 1, floored
    for l in 0..4 {
        assert!(net.get_layer(l).feature_width() >= 3);
    }
}

#[test]
fn test_depth_chaining() {
    let desc = ConvDesc {
        no_of_layers: 3,
        image_width: 16,
        image_height: 16,
        image_depth: 3,
        no_of_features: 5,
        feature_width: 4,
        final_image_width: 4,
        final_image_height: 4,
    };
    let net = ConvNetwork::new(&desc, &[0.5; 3]).unwrap();

    assert_eq!(net.get_layer(0).depth(), 3);
    for l in 1..3 {
        assert_eq!(net.get_layer(l).depth(), net.get_layer(l - 1).no_of_features());
    }

    // the flattened output carries the last layer's depth
    assert_eq!(net.get_outputs().len(), 4 * 4 * 5);
    assert_eq!(net.get_outputs_width(), 4);
}

#[test]
fn test_construction_errors() {
    let desc = small_desc();

    assert!(matches!(
        ConvNetwork::new(&ConvDesc { no_of_layers: 0, ..desc.clone() }, &[]),
        Err(NetworkError::NoLayers)
    ));

    assert!(matches!(
        ConvNetwork::new(&desc, &[0.5]),
        Err(NetworkError::ThresholdCount { expected: 2, got: 1 })
    ));

    assert!(matches!(
        ConvNetwork::new(&ConvDesc { image_depth: 0, ..desc.clone() }, &[0.5, 0.5]),
        Err(NetworkError::ZeroDimension { name: "image_depth" })
    ));

    assert!(matches!(
        ConvNetwork::new(
            &ConvDesc { final_image_width: 16, ..desc.clone() },
            &[0.5, 0.5]
        ),
        Err(NetworkError::FinalSizeExceedsImage { .. })
    ));
}

#[test]
fn test_thresholds_are_copied() {
    let mut thresholds = vec![0.25f32, 0.75];
    let net = ConvNetwork::new(&small_desc(), &thresholds).unwrap();
    thresholds[0] = 99.0;
    thresholds.clear();
    assert_eq!(net.get_match_threshold(), &[0.25, 0.75]);
}

#[test]
fn test_convolve_identity_subregion() {
    // 8x8x1 source, 4x4 output, feature width 2: output cell (0,0) maps to
    // the source rows/cols [0,2) resampled one-to-one, so a feature equal
    // to that corner matches with similarity exactly 1.0.
    let src_width = 8usize;
    let src_height = 8usize;
    let mut src = vec![0.0f32; src_width * src_height];
    for y in 0..src_height {
        for x in 0..src_width {
            src[y * src_width + x] = (x + y * src_width) as f32 / 64.0;
        }
    }

    let feature_width = 2usize;
    let no_of_features = 2usize;
    let mut features = vec![0.0f32; no_of_features * feature_width * feature_width];
    // feature 0 = top-left 2x2 corner of the source
    features[0] = src[0];
    features[1] = src[1];
    features[2] = src[src_width];
    features[3] = src[src_width + 1];
    // feature 1 is maximally wrong for that corner
    for v in &mut features[4..] {
        *v = 1.0;
    }

    let out_width = 4usize;
    let mut out = vec![0.0f32; out_width * out_width * no_of_features];
    convolve_volume(
        &src,
        src_width,
        src_height,
        1,
        feature_width,
        no_of_features,
        &features,
        &mut out,
        out_width,
    );

    let exact = out[output_index(0, 0, 0, out_width, no_of_features)];
    let wrong = out[output_index(0, 0, 1, out_width, no_of_features)];
    assert_eq!(exact, 1.0);
    assert!(wrong < exact);
}

#[test]
fn test_reference_scenario_zero_image() {
    // All-zero image against an all-zero feature bank: every similarity in
    // the first stage's map is exactly 1.0.
    let mut net = small_net();
    let img = vec![0u8; 8 * 8];

    net.feed_forward(&img, 1);

    for &v in net.get_layer(1).activations() {
        assert_eq!(v, 1.0);
    }
}

#[test]
fn test_reference_scenario_saturated_image() {
    // All-255 image normalises to 1.0 per channel; against zero features
    // the squared error is exactly the normalisation, so similarity is 0.0.
    let mut net = small_net();
    let img = vec![255u8; 8 * 8];

    net.feed_forward(&img, 1);

    for &v in net.get_layer(1).activations() {
        assert_eq!(v, 0.0);
    }
}

#[test]
fn test_feed_forward_shapes_and_normalisation() {
    let mut net = small_net();

    // depth 0 only loads the normalised image
    let img: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();
    net.feed_forward(&img, 0);
    for (a, &p) in net.get_layer(0).activations().iter().zip(&img) {
        assert_eq!(*a, p as f32 / 255.0);
    }

    assert_eq!(net.get_layer(1).activations().len(), 6 * 6 * 2);
    assert_eq!(net.get_outputs().len(), 4 * 4 * 2);
}

#[test]
fn test_feed_forward_deterministic() {
    let mut net = small_net();
    let mut state = rand_get_state(777);
    net.randomize_features(&mut state);

    let img: Vec<u8> = (0..64).map(|i| (i * 3 % 256) as u8).collect();

    net.feed_forward(&img, 2);
    let first: Vec<f32> = net.get_outputs().to_vec();

    net.feed_forward(&img, 2);
    assert_eq!(net.get_outputs(), first.as_slice());
}

#[test]
fn test_feed_forward_partial_leaves_later_stages() {
    let mut net = small_net();
    let mut state = rand_get_state(99);
    net.randomize_features(&mut state);

    let img_a: Vec<u8> = (0..64).map(|i| i as u8).collect();
    let img_b: Vec<u8> = (0..64).map(|i| (255 - i) as u8).collect();

    net.feed_forward(&img_a, 2);
    let outputs_a: Vec<f32> = net.get_outputs().to_vec();

    // a 1-stage pass rewrites layer 1 but must not touch the output buffer
    net.feed_forward(&img_b, 1);
    assert_eq!(net.get_outputs(), outputs_a.as_slice());
}

#[test]
fn test_training_advances_when_score_beats_threshold() {
    let mut net = small_net(); // thresholds [0.5, 0.5]
    let mut state = rand_get_state(1);
    let img = vec![0u8; 64];

    // 4 samples at 0.1 each accumulate to 0.4 < 0.5
    let mut learner = ConstLearner::new(0.1);
    let score = net.learn(&img, 4, &mut state, &mut learner);
    assert!((score - 0.4).abs() < 1e-6);
    assert_eq!(net.get_current_layer(), 1);
    assert_eq!(learner.calls, 4);
    assert_eq!(net.get_iterations(), 4);
    assert_eq!(net.get_training_ctr(), 1);
}

#[test]
fn test_training_holds_when_score_misses_threshold() {
    let mut net = small_net();
    let mut state = rand_get_state(1);
    let img = vec![0u8; 64];

    // 4 samples at 0.2 each accumulate to 0.8 >= 0.5: no advancement,
    // accumulation (not the per-sample mean of 0.2) is what is compared
    let mut learner = ConstLearner::new(0.2);
    let score = net.learn(&img, 4, &mut state, &mut learner);
    assert!((score - 0.8).abs() < 1e-6);
    assert_eq!(net.get_current_layer(), 0);

    // one sample of 0.2 is below 0.5: same learner, smaller sample count,
    // different outcome
    let score = net.learn(&img, 1, &mut state, &mut learner);
    assert!((score - 0.2).abs() < 1e-6);
    assert_eq!(net.get_current_layer(), 1);
}

#[test]
fn test_training_terminal_state() {
    let mut net = small_net();
    let mut state = rand_get_state(1);
    let img = vec![0u8; 64];

    let mut learner = ConstLearner::new(0.0);
    net.learn(&img, 1, &mut state, &mut learner);
    net.learn(&img, 1, &mut state, &mut learner);
    assert!(net.is_trained());
    assert_eq!(net.get_current_layer(), 2);

    // further steps are no-ops returning a neutral score
    let iterations = net.get_iterations();
    let score = net.learn(&img, 5, &mut state, &mut learner);
    assert_eq!(score, 0.0);
    assert_eq!(net.get_current_layer(), 2);
    assert_eq!(net.get_iterations(), iterations);
    assert_eq!(learner.calls, 2);
}

#[test]
fn test_training_populates_history() {
    let mut net = small_net();
    let mut state = rand_get_state(1);
    let img = vec![0u8; 64];

    let mut learner = ConstLearner::new(0.3);
    assert!(net.get_history().is_empty());

    net.learn(&img, 2, &mut state, &mut learner);
    assert_eq!(net.get_history().len(), 1);
    assert!((net.get_history().values()[0] - 0.6).abs() < 1e-6);

    net.learn(&img, 2, &mut state, &mut learner);
    assert_eq!(net.get_history().len(), 2);
}

#[test]
fn test_reset_training_keeps_features() {
    let mut net = small_net();
    let mut state = rand_get_state(5);
    net.randomize_features(&mut state);
    let features: Vec<f32> = net.get_layer(0).features().to_vec();

    let img = vec![128u8; 64];
    let mut learner = ConstLearner::new(0.0);
    net.learn(&img, 1, &mut state, &mut learner);
    assert_eq!(net.get_current_layer(), 1);

    net.reset_training();
    assert_eq!(net.get_current_layer(), 0);
    assert_eq!(net.get_iterations(), 0);
    assert!(net.get_history().is_empty());
    assert_eq!(net.get_layer(0).features(), features.as_slice());
    assert!(net.get_layer(0).activations().iter().all(|&a| a == 0.0));
}

#[test]
fn test_som_learner_pulls_winner_toward_patch() {
    // One feature, constant activations at 0.5, zero bank: the first trial
    // scores 0.25 (squared distance per value); with a learning rate of
    // 1.0 the winner lands exactly on the patch and the next trial scores 0.
    let geometry = LayerGeometry {
        width: 6,
        height: 6,
        depth: 1,
        feature_width: 3,
        no_of_features: 1,
    };
    let activations = vec![0.5f32; 36];
    let mut features = vec![0.0f32; 9];
    let mut scores = vec![0.0f32; 1];
    let mut state = rand_get_state(42);

    let mut learner = PatchSomLearner;
    let first = learner.learn_features(
        &activations,
        geometry,
        &mut features,
        &mut scores,
        1.0,
        &mut state,
    );
    assert!((first - 0.25).abs() < 1e-6);
    assert!(features.iter().all(|&w| (w - 0.5).abs() < 1e-6));

    let second = learner.learn_features(
        &activations,
        geometry,
        &mut features,
        &mut scores,
        1.0,
        &mut state,
    );
    assert!(second.abs() < 1e-6);
}

#[test]
fn test_som_learner_is_deterministic() {
    let geometry = LayerGeometry {
        width: 8,
        height: 8,
        depth: 2,
        feature_width: 3,
        no_of_features: 4,
    };
    let activations: Vec<f32> = (0..128).map(|i| (i % 7) as f32 / 7.0).collect();

    let run = |seed: u64| {
        let mut features: Vec<f32> = (0..4 * 9 * 2).map(|i| (i % 11) as f32 / 11.0).collect();
        let mut scores = vec![0.0f32; 4];
        let mut state = rand_get_state(seed);
        let mut learner = PatchSomLearner;
        let mut total = 0.0f32;
        for _ in 0..10 {
            total += learner.learn_features(
                &activations,
                geometry,
                &mut features,
                &mut scores,
                0.1,
                &mut state,
            );
        }
        (total, features)
    };

    let (total_a, features_a) = run(123);
    let (total_b, features_b) = run(123);
    assert_eq!(total_a, total_b);
    assert_eq!(features_a, features_b);
}

#[test]
fn test_end_to_end_training_with_som_learner() {
    let mut net = ConvNetwork::new(&small_desc(), &[5.0, 5.0]).unwrap();
    let mut state = rand_get_state(2024);
    net.randomize_features(&mut state);

    let img: Vec<u8> = (0..64)
        .map(|i| if (i / 8 + i % 8) % 2 == 0 { 220u8 } else { 30u8 })
        .collect();

    let mut learner = PatchSomLearner;
    for _ in 0..200 {
        if net.is_trained() {
            break;
        }
        net.learn(&img, 4, &mut state, &mut learner);
    }
    assert!(net.is_trained(), "stack failed to converge on a fixed image");

    net.feed_forward(&img, net.get_num_layers());
    assert!(net.get_outputs().iter().all(|v| v.is_finite()));
}

#[test]
fn test_serialization_roundtrip() {
    let mut net = small_net();
    let mut state = rand_get_state(31);
    net.randomize_features(&mut state);

    let img: Vec<u8> = (0..64).map(|i| (i * 2) as u8).collect();
    let mut learner = ConstLearner::new(0.1);
    net.learn(&img, 3, &mut state, &mut learner);
    net.feed_forward(&img, 2);

    let mut writer = VecWriter::new();
    net.write(&mut writer);

    let mut reader = SliceReader::new(&writer.data);
    let restored = ConvNetwork::read(&mut reader);

    assert_eq!(restored.get_num_layers(), net.get_num_layers());
    assert_eq!(restored.get_current_layer(), net.get_current_layer());
    assert_eq!(restored.get_learning_rate(), net.get_learning_rate());
    assert_eq!(restored.get_iterations(), net.get_iterations());
    assert_eq!(restored.get_training_ctr(), net.get_training_ctr());
    assert_eq!(restored.get_outputs(), net.get_outputs());
    assert_eq!(restored.get_match_threshold(), net.get_match_threshold());
    assert_eq!(restored.get_history().values(), net.get_history().values());

    for l in 0..net.get_num_layers() {
        let a = net.get_layer(l);
        let b = restored.get_layer(l);
        assert_eq!(a.geometry(), b.geometry());
        assert_eq!(a.features(), b.features());
        assert_eq!(a.activations(), b.activations());
    }
}

#[test]
fn test_feature_bank_roundtrip() {
    let mut net = small_net();
    let mut state = rand_get_state(8);
    net.randomize_features(&mut state);

    let mut writer = VecWriter::new();
    net.write_features(&mut writer);

    let mut other = small_net();
    let mut reader = SliceReader::new(&writer.data);
    other.read_features(&mut reader);

    for l in 0..2 {
        assert_eq!(other.get_layer(l).features(), net.get_layer(l).features());
    }
}

#[cfg(feature = "plots")]
#[test]
fn test_plot_history_png() {
    use convstack::history::ErrorHistory;
    use convstack::plot::plot_history_png;

    let mut history = ErrorHistory::new();
    for i in 0..50 {
        history.record(1.0 / (i + 1) as f32);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.png");
    plot_history_png(&path, &history, "training error", 640, 480).unwrap();
    assert!(path.exists());
}

#[cfg(not(feature = "plots"))]
#[test]
fn test_plot_history_disabled() {
    use convstack::history::ErrorHistory;
    use convstack::plot::plot_history_png;

    let history = ErrorHistory::new();
    assert!(plot_history_png("/tmp/unused.png", &history, "t", 64, 64).is_err());
}
