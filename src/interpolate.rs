//! Put a reference library and a sample onto one angular grid using
//! piecewise linear interpolation.
//!
//! The common grid spans the intersection of the two axes and is sampled at the
//! coarser of their two native resolutions, so no precision is invented for
//! either input.
use thiserror::Error;

use crate::arrayops::{gridspace, step_size};
use crate::library::ReferenceLibrary;
use crate::sample::Sample;
use crate::search::{bracket, find_between};

/// Angles closer than this are considered the same grid point when comparing scales
pub const ANGLE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarmoniseError {
    #[error("The library ({0}, {1}) and sample ({2}, {3}) angular ranges do not overlap")]
    NoOverlap(f64, f64, f64, f64),
    #[error("The sample angular scale does not match the library and harmonisation is disabled")]
    AngularScaleMismatch,
}

/// Linear interpolation between two control points to find the intensity
/// at a third point between them.
///
/// # Arguments
/// - `x_j` - The first control point's angle
/// - `x` - The interpolated angle
/// - `x_j1` - The second control point's angle
/// - `y_j` - The first control point's intensity
/// - `y_j1` - The second control point's intensity
#[inline]
pub fn interpolate_point(x_j: f64, x: f64, x_j1: f64, y_j: f64, y_j1: f64) -> f64 {
    ((y_j * (x_j1 - x)) + (y_j1 * (x - x_j))) / (x_j1 - x_j)
}

/// A borrowed piecewise linear curve over an ascending axis.
///
/// Queries outside of [`LinearInterpolator::domain`] take the nearest end value;
/// callers clip their query grids to the domain first.
#[derive(Debug, Clone, Copy)]
pub struct LinearInterpolator<'a> {
    x: &'a [f64],
    y: &'a [f64],
}

impl<'a> LinearInterpolator<'a> {
    pub fn new(x: &'a [f64], y: &'a [f64]) -> Self {
        debug_assert_eq!(x.len(), y.len());
        Self { x, y }
    }

    pub fn domain(&self) -> (f64, f64) {
        (
            self.x.first().copied().unwrap_or(f64::NAN),
            self.x.last().copied().unwrap_or(f64::NAN),
        )
    }

    pub fn contains(&self, q: f64) -> bool {
        let (lo, hi) = self.domain();
        q >= lo && q <= hi
    }

    pub fn at(&self, q: f64) -> f64 {
        let n = self.x.len();
        match n {
            0 => return f64::NAN,
            1 => return self.y[0],
            _ => {}
        }
        if q <= self.x[0] {
            return self.y[0];
        }
        if q >= self.x[n - 1] {
            return self.y[n - 1];
        }
        let (j, j1) = bracket(self.x, q);
        interpolate_point(self.x[j], q, self.x[j1], self.y[j], self.y[j1])
    }

    pub fn resample(&self, grid: &[f64]) -> Vec<f64> {
        grid.iter().map(|q| self.at(*q)).collect()
    }

    /// Evaluate the curve translated by `delta`, i.e. `y(q - delta)`, on `grid`
    pub fn resample_shifted(&self, grid: &[f64], delta: f64) -> Vec<f64> {
        grid.iter().map(|q| self.at(q - delta)).collect()
    }
}

/// The grid covering the overlap of `a` and `b` at the coarser of their resolutions.
pub fn common_grid(a: &[f64], b: &[f64]) -> Option<Vec<f64>> {
    let (a0, a1) = (*a.first()?, *a.last()?);
    let (b0, b1) = (*b.first()?, *b.last()?);
    let lo = a0.max(b0);
    let hi = a1.min(b1);
    if lo >= hi {
        return None;
    }
    let step = step_size(a).max(step_size(b));
    if !(step > 0.0) {
        return None;
    }
    Some(gridspace(lo, hi, step))
}

/// Resample every column of `library` onto `grid`.
pub fn resample_library(library: &ReferenceLibrary, grid: &[f64]) -> ReferenceLibrary {
    let xrd = library
        .columns()
        .iter()
        .map(|col| LinearInterpolator::new(library.tth(), col).resample(grid))
        .collect();
    ReferenceLibrary::from_parts(grid.to_vec(), xrd, library.phases().to_vec())
}

/// Restrict a library to the axis points inside `[lo, hi]`
pub fn crop_library(library: &ReferenceLibrary, lo: f64, hi: f64) -> ReferenceLibrary {
    let (start, end) = find_between(library.tth(), lo, hi);
    let xrd = library
        .columns()
        .iter()
        .map(|col| col[start..end].to_vec())
        .collect();
    ReferenceLibrary::from_parts(
        library.tth()[start..end].to_vec(),
        xrd,
        library.phases().to_vec(),
    )
}

/// A library and sample sharing one axis
#[derive(Debug, Clone)]
pub struct Harmonised {
    pub library: ReferenceLibrary,
    pub sample: Sample,
}

impl Harmonised {
    pub fn tth(&self) -> &[f64] {
        self.library.tth()
    }
}

/// Interpolate `library` and `sample` onto their [`common_grid`].
pub fn harmonise(library: &ReferenceLibrary, sample: &Sample) -> Result<Harmonised, HarmoniseError> {
    let grid = common_grid(library.tth(), sample.tth()).ok_or_else(|| {
        let ends = |x: &[f64]| {
            (
                x.first().copied().unwrap_or(f64::NAN),
                x.last().copied().unwrap_or(f64::NAN),
            )
        };
        let (l0, l1) = ends(library.tth());
        let (s0, s1) = ends(sample.tth());
        HarmoniseError::NoOverlap(l0, l1, s0, s1)
    })?;
    log::debug!(
        "Harmonising {} library points and {} sample points onto {} points",
        library.tth().len(),
        sample.len(),
        grid.len()
    );
    let counts = LinearInterpolator::new(sample.tth(), sample.counts()).resample(&grid);
    let library = resample_library(library, &grid);
    Ok(Harmonised {
        library,
        sample: Sample::from_parts(grid, counts),
    })
}

/// Pair `library` and `sample` without interpolating.
///
/// The sample's axis must coincide with a contiguous run of the library's axis,
/// which the library is then cropped to.
pub fn conform(library: &ReferenceLibrary, sample: &Sample) -> Result<Harmonised, HarmoniseError> {
    let lib_tth = library.tth();
    let smpl_tth = sample.tth();
    let first = *smpl_tth
        .first()
        .ok_or(HarmoniseError::AngularScaleMismatch)?;
    let start = lib_tth
        .iter()
        .position(|x| (x - first).abs() < ANGLE_TOLERANCE)
        .ok_or(HarmoniseError::AngularScaleMismatch)?;
    if start + smpl_tth.len() > lib_tth.len() {
        return Err(HarmoniseError::AngularScaleMismatch);
    }
    let matches = smpl_tth
        .iter()
        .zip(lib_tth[start..].iter())
        .all(|(s, l)| (s - l).abs() < ANGLE_TOLERANCE);
    if !matches {
        return Err(HarmoniseError::AngularScaleMismatch);
    }
    let library = crop_library(library, lib_tth[start], lib_tth[start + smpl_tth.len() - 1]);
    Ok(Harmonised {
        sample: Sample::from_parts(library.tth().to_vec(), sample.counts().to_vec()),
        library,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::library::PhaseInfo;

    fn library(tth: Vec<f64>) -> ReferenceLibrary {
        let col_a: Vec<f64> = tth.iter().map(|x| 1.0 + x * 2.0).collect();
        let col_b: Vec<f64> = tth.iter().map(|x| (x * 0.3).sin() + 2.0).collect();
        ReferenceLibrary::new(
            tth,
            vec![("A".into(), col_a), ("B".into(), col_b)],
            vec![PhaseInfo::new("A", "A", 1.0), PhaseInfo::new("B", "B", 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_interpolate_point() {
        assert!((interpolate_point(0.0, 0.25, 1.0, 0.0, 4.0) - 1.0).abs() < 1e-12);
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 10.0, 0.0];
        let interp = LinearInterpolator::new(&x, &y);
        assert!((interp.at(1.5) - 5.0).abs() < 1e-12);
        assert!((interp.at(1.0) - 10.0).abs() < 1e-12);
        assert!((interp.resample_shifted(&[1.5], 0.5)[0] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_common_grid_uses_coarser_step() {
        let fine: Vec<f64> = gridspace(5.0, 60.0, 0.01);
        let coarse: Vec<f64> = gridspace(10.0, 70.0, 0.02);
        let grid = common_grid(&fine, &coarse).unwrap();
        assert!((grid[0] - 10.0).abs() < 1e-9);
        assert!((step_size(&grid) - 0.02).abs() < 1e-9);
        assert!(grid.last().copied().unwrap() <= 60.0 + 1e-9);
        assert!(common_grid(&[1.0, 2.0], &[3.0, 4.0]).is_none());
    }

    #[test]
    fn test_harmonise_is_idempotent() {
        let lib = library(gridspace(5.0, 60.0, 0.01));
        let tth = gridspace(10.0, 70.0, 0.02);
        let counts = tth.iter().map(|x| 100.0 + x).collect();
        let sample = Sample::new(tth, counts).unwrap();

        let first = harmonise(&lib, &sample).unwrap();
        let second = harmonise(&first.library, &first.sample).unwrap();

        assert_eq!(first.tth().len(), second.tth().len());
        for (a, b) in first.tth().iter().zip(second.tth()) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in first.sample.counts().iter().zip(second.sample.counts()) {
            assert!((a - b).abs() < 1e-6);
        }
        for (ca, cb) in first.library.columns().iter().zip(second.library.columns()) {
            for (a, b) in ca.iter().zip(cb) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_conform() {
        let lib = library(gridspace(5.0, 20.0, 0.5));
        let tth = gridspace(7.0, 10.0, 0.5);
        let counts = tth.iter().map(|_| 1.0).collect();
        let sample = Sample::new(tth, counts).unwrap();
        let paired = conform(&lib, &sample).unwrap();
        assert_eq!(paired.library.tth().len(), 7);
        assert_eq!(paired.sample.len(), 7);

        let tth = gridspace(7.1, 10.1, 0.5);
        let counts = tth.iter().map(|_| 1.0).collect();
        let sample = Sample::new(tth, counts).unwrap();
        assert_eq!(
            conform(&lib, &sample).unwrap_err(),
            HarmoniseError::AngularScaleMismatch
        );
    }
}
