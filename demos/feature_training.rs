// Layer-wise feature training demo.
//
// Trains a small convolution stack on a stream of synthetic images (a
// diagonal bright band sweeping across the frame), printing the matching
// score per step and announcing each layer as it converges.
//
// Run with: cargo run --release --example feature_training

use convstack::features::PatchSomLearner;
use convstack::helpers::{rand_get_state, set_num_threads};
use convstack::network::{ConvDesc, ConvNetwork};

const IMAGE_WIDTH: usize = 32;
const IMAGE_HEIGHT: usize = 32;
const SAMPLES_PER_STEP: usize = 8;
const MAX_STEPS: usize = 4000;

/// Render frame `t`: a bright diagonal band over a dark background.
fn synthetic_image(t: usize) -> Vec<u8> {
    let mut img = vec![0u8; IMAGE_WIDTH * IMAGE_HEIGHT];
    let phase = t % IMAGE_WIDTH;
    for y in 0..IMAGE_HEIGHT {
        for x in 0..IMAGE_WIDTH {
            let band = (x + y + phase) % IMAGE_WIDTH;
            img[y * IMAGE_WIDTH + x] = if band < 6 { 230 } else { 25 };
        }
    }
    img
}

/// Render a non-negative score as a 16-character ASCII bar.
fn ascii_bar(x: f32, scale: f32) -> String {
    let filled = ((x / scale) * 16.0 + 0.5) as usize;
    let filled = filled.min(16);
    let mut s = String::with_capacity(16);
    for i in 0..16 {
        s.push(if i < filled { '\u{2588}' } else { '\u{2591}' });
    }
    s
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    set_num_threads(4);

    let desc = ConvDesc {
        no_of_layers: 3,
        image_width: IMAGE_WIDTH,
        image_height: IMAGE_HEIGHT,
        image_depth: 1,
        no_of_features: 8,
        feature_width: 6,
        final_image_width: 8,
        final_image_height: 8,
    };
    let thresholds = vec![0.4f32; desc.no_of_layers];

    let mut net = ConvNetwork::new(&desc, &thresholds).expect("network construction");

    println!("layer geometry:");
    for l in 0..net.get_num_layers() {
        let layer = net.get_layer(l);
        println!(
            "  layer {l}: {}x{}x{}, {} features of width {}",
            layer.width(),
            layer.height(),
            layer.depth(),
            layer.no_of_features(),
            layer.feature_width()
        );
    }

    let mut state = rand_get_state(12345);
    net.randomize_features(&mut state);

    let mut learner = PatchSomLearner;

    // --- Training phase: one layer at a time ---

    for step in 0..MAX_STEPS {
        if net.is_trained() {
            break;
        }

        let layer_before = net.get_current_layer();
        let img = synthetic_image(step);
        let score = net.learn(&img, SAMPLES_PER_STEP, &mut state, &mut learner);

        if step % 50 == 0 {
            println!(
                "step {step:4}  layer {layer_before}  score {score:8.4}  {}",
                ascii_bar(score.max(0.0), SAMPLES_PER_STEP as f32)
            );
        }

        if net.get_current_layer() > layer_before {
            println!(
                "layer {layer_before} converged after {} learner iterations",
                net.get_iterations()
            );
        }
    }

    if !net.is_trained() {
        println!("stopped before full convergence ({MAX_STEPS} steps)");
    }

    // --- Recall phase: full forward pass on a fresh frame ---

    let img = synthetic_image(7);
    net.feed_forward(&img, net.get_num_layers());

    let outputs = net.get_outputs();
    let mean = outputs.iter().sum::<f32>() / outputs.len() as f32;
    let max = outputs.iter().copied().fold(f32::MIN, f32::max);
    println!(
        "output vector: {} values, mean {mean:.4}, max {max:.4}",
        outputs.len()
    );

    match convstack::plot::plot_history_png(
        "training_history.png",
        net.get_history(),
        "Matching error",
        640,
        480,
    ) {
        Ok(()) => println!("wrote training_history.png"),
        Err(e) => println!("history plot skipped: {e}"),
    }
}
