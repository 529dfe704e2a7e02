use num_traits::Float;

pub fn binsearch<T: Float>(array: &[T], q: T) -> usize {
    match array.binary_search_by(|x| x.partial_cmp(&q).unwrap_or(std::cmp::Ordering::Less)) {
        Ok(i) => i,
        Err(i) => i,
    }
}

/// Find the half-open index range of `array` whose values fall inside `[lo, hi]`
pub fn find_between<T: Float>(array: &[T], lo: T, hi: T) -> (usize, usize) {
    let lo_i = array.partition_point(|x| *x < lo);
    let hi_i = array.partition_point(|x| *x <= hi);
    if lo_i > hi_i {
        return (lo_i, lo_i);
    }
    (lo_i, hi_i)
}

/// Locate the pair of indices `(j, j + 1)` that bracket `q` in an ascending `array`.
///
/// Values at or beyond either end are assigned to the first or last interval.
pub fn bracket<T: Float>(array: &[T], q: T) -> (usize, usize) {
    let n = array.len();
    if n < 2 {
        return (0, 0);
    }
    let i = binsearch(array, q);
    if i == 0 {
        (0, 1)
    } else if i >= n {
        (n - 2, n - 1)
    } else {
        (i - 1, i)
    }
}
