//! Small helpers over angular axes and intensity arrays.
use num_traits::{Float, ToPrimitive};

/// Build an evenly spaced grid from `start` to `end` (inclusive when `end` lands on the grid)
/// with spacing `step`.
pub fn gridspace<T: Float + ToPrimitive>(start: T, end: T, step: T) -> Vec<T> {
    if step <= T::zero() || end < start {
        return vec![start];
    }
    let distance = end - start;
    // Absorb rounding so that re-deriving a grid from its own endpoints is stable
    let slack = T::from(1e-6).unwrap_or_else(T::epsilon);
    let steps = ((distance / step) + slack).floor().to_usize().unwrap_or(0);
    let mut result = Vec::with_capacity(steps + 1);
    for i in 0..=steps {
        result.push(start + T::from(i).unwrap_or_else(T::zero) * step);
    }
    result
}

/// The mean spacing of an ascending axis, `(last - first) / (n - 1)`.
pub fn step_size<T: Float>(axis: &[T]) -> T {
    match (axis.first(), axis.last()) {
        (Some(first), Some(last)) if axis.len() > 1 => {
            (*last - *first) / T::from(axis.len() - 1).unwrap_or_else(T::one)
        }
        _ => T::zero(),
    }
}

/// Check if the values in `it` are strictly ascending
pub fn is_increasing<F: Float>(it: &[F]) -> bool {
    it.windows(2).all(|w| w[0] < w[1])
}

/// Multiply a set of columns by their weights and sum them point-wise.
pub fn weighted_sum(columns: &[Vec<f64>], weights: &[f64], len: usize) -> Vec<f64> {
    let mut acc = vec![0.0; len];
    for (col, w) in columns.iter().zip(weights.iter()) {
        if *w == 0.0 {
            continue;
        }
        acc.iter_mut().zip(col.iter()).for_each(|(a, c)| *a += w * c);
    }
    acc
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_gridspace_inclusive() {
        let grid = gridspace(10.0, 12.0, 0.5);
        assert_eq!(grid.len(), 5);
        assert!((grid[4] - 12.0f64).abs() < 1e-12);

        let regrid = gridspace(grid[0], grid[4], step_size(&grid));
        assert_eq!(regrid.len(), grid.len());
    }

    #[test]
    fn test_gridspace_partial_step() {
        let grid = gridspace(0.0, 1.05, 0.1);
        assert_eq!(grid.len(), 11);
        assert!(grid.last().copied().unwrap() <= 1.05);
    }

    #[test]
    fn test_is_increasing() {
        assert!(is_increasing(&[1.0, 2.0, 3.0]));
        assert!(!is_increasing(&[1.0, 1.0, 3.0]));
        assert!(!is_increasing(&[3.0, 2.0]));
    }

    #[test]
    fn test_weighted_sum() {
        let cols = vec![vec![1.0, 2.0], vec![10.0, 20.0]];
        let total = weighted_sum(&cols, &[2.0, 0.5], 2);
        assert_eq!(total, vec![7.0, 14.0]);
    }
}
