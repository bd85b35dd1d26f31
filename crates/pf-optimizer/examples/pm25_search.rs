//! Runs a small hyperparameter search over a synthetic hourly PM2.5 series.
//!
//! `RUST_LOG=pf_optimizer=info,pf_model=debug cargo run --example pm25_search`

use ndarray::{Array2, Array3};
use pf_optimizer::{ArchitectureSearch, Pm25Optimizer, DROPOUT_CHOICES};
use pf_types::DatasetSplit;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const WINDOW: usize = 24;
const FEATURES: usize = 4;

/// Daily cycle plus noise for PM2.5, with temperature, humidity and wind
/// speed as extra features. Everything lands roughly in [0, 1].
fn synthetic_series(hours: usize, rng: &mut StdRng) -> Vec<[f32; FEATURES]> {
    (0..hours)
        .map(|h| {
            let phase = (h % 24) as f32 / 24.0 * std::f32::consts::TAU;
            let temp = 0.5 + 0.3 * phase.sin();
            let humidity = 0.6 - 0.2 * phase.sin() + rng.random_range(-0.05..0.05);
            let wind = 0.3 + 0.2 * (phase + 1.0).cos().abs();
            let pm25 = (0.4 + 0.25 * (phase + 2.0).sin() + 0.3 * humidity - 0.4 * wind
                + rng.random_range(-0.03..0.03))
                .clamp(0.0, 1.0);
            [pm25, temp, humidity, wind]
        })
        .collect()
}

/// Slides a `WINDOW`-hour window and targets the next hour's PM2.5.
fn windows(series: &[[f32; FEATURES]]) -> (Array3<f32>, Array2<f32>) {
    let n = series.len() - WINDOW;
    let x = Array3::from_shape_fn((n, WINDOW, FEATURES), |(i, t, f)| series[i + t][f]);
    let y = Array2::from_shape_fn((n, 1), |(i, _)| series[i + WINDOW][0]);
    (x, y)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut rng = StdRng::seed_from_u64(42);
    let series = synthetic_series(24 * 30, &mut rng);
    let split_at = series.len() * 4 / 5;
    let (train_x, train_y) = windows(&series[..split_at]);
    let (val_x, val_y) = windows(&series[split_at..]);
    let split = DatasetSplit::new(train_x, train_y, val_x, val_y);

    let optimizer = Pm25Optimizer::new(FEATURES, 10, 1)
        .with_architecture(ArchitectureSearch::default().with_dropout(&DROPOUT_CHOICES))
        .with_seed(7);
    let study = optimizer.optimize(&split)?;

    println!(
        "Best validation loss: {:.6} ({} of {} trials completed)",
        study.best_value()?,
        study.trials_completed(),
        study.trials().len()
    );
    Ok(())
}
