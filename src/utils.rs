//! Numeric helpers shared by the layers.
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Column-wise numerically stable softmax over a `(classes, batch)` matrix
pub fn softmax_columns(x: &Array2<f64>) -> Array2<f64> {
    let mut result = x.clone();
    for mut col in result.axis_iter_mut(Axis(1)) {
        let max_val = col.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        col.mapv_inplace(|v| (v - max_val).exp());
        let sum = col.sum();
        col.mapv_inplace(|v| v / sum);
    }
    result
}

/// Index of the largest entry in each column; ties resolve to the lowest index
pub fn argmax_columns(x: &Array2<f64>) -> Array1<usize> {
    x.axis_iter(Axis(1))
        .map(|col| {
            let mut best = 0;
            for (i, &v) in col.iter().enumerate() {
                if v > col[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}

/// Uniform matrix in `[-magnitude, magnitude]` drawn from `rng`
pub fn uniform_matrix<R: Rng>(shape: (usize, usize), magnitude: f64, rng: &mut R) -> Array2<f64> {
    if magnitude == 0.0 {
        return Array2::zeros(shape);
    }
    Array2::random_using(shape, Uniform::new_inclusive(-magnitude, magnitude), rng)
}

/// Normal matrix with samples beyond two standard deviations redrawn
pub fn truncated_normal_matrix<R: Rng>(shape: (usize, usize), stddev: f64, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn(shape, || loop {
        let z: f64 = rng.sample(StandardNormal);
        if z.abs() <= 2.0 {
            break z * stddev;
        }
    })
}

/// Per-column 0/1 mask: 1.0 where `step < lens[b]`
pub fn step_mask(lens: &[usize], step: usize) -> Array2<f64> {
    Array2::from_shape_fn((1, lens.len()), |(_, b)| if step < lens[b] { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-10);
        assert!(sigmoid(1000.0) > 0.99);
        assert!(sigmoid(-1000.0) < 0.01);
    }

    #[test]
    fn test_softmax_columns_sum_to_one() {
        let x = arr2(&[[1.0, 1000.0], [2.0, 1000.0], [3.0, -5.0]]);
        let p = softmax_columns(&x);
        for col in p.axis_iter(Axis(1)) {
            assert!((col.sum() - 1.0).abs() < 1e-12);
        }
        assert!((p[[0, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_argmax_columns() {
        let x = arr2(&[[0.1, 5.0], [0.9, 5.0], [0.3, -1.0]]);
        assert_eq!(argmax_columns(&x).to_vec(), vec![1, 0]);
    }

    #[test]
    fn test_truncated_normal_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = truncated_normal_matrix((50, 40), 0.5, &mut rng);
        assert!(m.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_uniform_matrix_is_seeded() {
        let a = uniform_matrix((3, 3), 0.1, &mut StdRng::seed_from_u64(123));
        let b = uniform_matrix((3, 3), 0.1, &mut StdRng::seed_from_u64(123));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.1));
    }

    #[test]
    fn test_step_mask() {
        let mask = step_mask(&[0, 2, 5], 1);
        assert_eq!(mask, arr2(&[[0.0, 1.0, 1.0]]));
    }
}
