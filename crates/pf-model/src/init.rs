//! Weight initializers. All matrices are row-major `rows x cols`.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Glorot (Xavier) uniform: U(-limit, limit) with limit = sqrt(6 / (fan_in + fan_out)).
pub fn glorot_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    (0..fan_in * fan_out)
        .map(|_| rng.random_range(-limit..limit) as f32)
        .collect()
}

/// Orthogonal init: rows (or columns, whichever are fewer) are orthonormal.
pub fn orthogonal(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f32> {
    let big = rows.max(cols);
    let small = rows.min(cols);

    // `small` orthonormal vectors of length `big`, via modified Gram-Schmidt.
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(small);
    while basis.len() < small {
        let mut v: Vec<f64> = (0..big)
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        for q in &basis {
            let dot: f64 = v.iter().zip(q).map(|(a, b)| a * b).sum();
            for (vi, qi) in v.iter_mut().zip(q) {
                *vi -= dot * qi;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-8 {
            continue;
        }
        v.iter_mut().for_each(|x| *x /= norm);
        basis.push(v);
    }

    let mut out = Vec::with_capacity(rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            let value = if rows >= cols { basis[c][r] } else { basis[r][c] };
            out.push(value as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn dot(m: &[f32], cols: usize, a: usize, b: usize) -> f64 {
        (0..cols)
            .map(|c| m[a * cols + c] as f64 * m[b * cols + c] as f64)
            .sum()
    }

    #[test]
    fn glorot_respects_limit() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = glorot_uniform(&mut rng, 5, 40);
        let limit = (6.0f64 / 45.0).sqrt() as f32;
        assert_eq!(w.len(), 200);
        assert!(w.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn orthogonal_rows_are_orthonormal_when_wide() {
        // Recurrent kernels are (units, 4 * units).
        let mut rng = StdRng::seed_from_u64(11);
        let (rows, cols) = (4, 16);
        let w = orthogonal(&mut rng, rows, cols);
        for a in 0..rows {
            for b in 0..rows {
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot(&w, cols, a, b) - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn orthogonal_columns_are_orthonormal_when_tall() {
        let mut rng = StdRng::seed_from_u64(3);
        let (rows, cols) = (6, 2);
        let w = orthogonal(&mut rng, rows, cols);
        let col_dot = |a: usize, b: usize| -> f64 {
            (0..rows)
                .map(|r| w[r * cols + a] as f64 * w[r * cols + b] as f64)
                .sum()
        };
        assert!((col_dot(0, 0) - 1.0).abs() < 1e-4);
        assert!((col_dot(1, 1) - 1.0).abs() < 1e-4);
        assert!(col_dot(0, 1).abs() < 1e-4);
    }

    #[test]
    fn same_seed_same_weights() {
        let a = glorot_uniform(&mut StdRng::seed_from_u64(42), 3, 3);
        let b = glorot_uniform(&mut StdRng::seed_from_u64(42), 3, 3);
        assert_eq!(a, b);
    }
}
