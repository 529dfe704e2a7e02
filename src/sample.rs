//! Measured diffraction patterns.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::interpolate::LinearInterpolator;
use crate::search::find_between;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("The angle and intensity arrays do not match in length ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("A sample needs at least two points, received {0}")]
    TooShort(usize),
    #[error("Angles must be finite, received {0}")]
    NonFiniteAngle(f64),
    #[error("The angle {0} appears more than once")]
    DuplicateAngle(f64),
    #[error("Intensity at {angle} is {value}, intensities must be positive and finite")]
    NonPositiveIntensity { angle: f64, value: f64 },
}

/// A measured pattern: angles ascending, intensities strictly positive.
///
/// Positivity is required because the weighted objectives divide by the measured
/// intensity.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    tth: Vec<f64>,
    counts: Vec<f64>,
}

impl Sample {
    /// Create a sample from parallel arrays, sorting them by angle.
    pub fn new(tth: Vec<f64>, counts: Vec<f64>) -> Result<Self, SampleError> {
        if tth.len() != counts.len() {
            return Err(SampleError::LengthMismatch(tth.len(), counts.len()));
        }
        Self::from_pairs(tth.into_iter().zip(counts))
    }

    pub fn from_pairs<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> Result<Self, SampleError> {
        let mut pairs: Vec<(f64, f64)> = pairs.into_iter().collect();
        if pairs.len() < 2 {
            return Err(SampleError::TooShort(pairs.len()));
        }
        if let Some((angle, _)) = pairs.iter().find(|(x, _)| !x.is_finite()) {
            return Err(SampleError::NonFiniteAngle(*angle));
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        for w in pairs.windows(2) {
            if w[0].0 == w[1].0 {
                return Err(SampleError::DuplicateAngle(w[0].0));
            }
        }
        if let Some((angle, value)) = pairs
            .iter()
            .find(|(_, y)| !(*y > 0.0) || !y.is_finite())
        {
            return Err(SampleError::NonPositiveIntensity {
                angle: *angle,
                value: *value,
            });
        }

        let (tth, counts) = pairs.into_iter().unzip();
        Ok(Self { tth, counts })
    }

    pub(crate) fn from_parts(tth: Vec<f64>, counts: Vec<f64>) -> Self {
        debug_assert_eq!(tth.len(), counts.len());
        Self { tth, counts }
    }

    pub fn tth(&self) -> &[f64] {
        &self.tth
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.tth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tth.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.tth.iter().copied().zip(self.counts.iter().copied())
    }

    /// Shift the pattern by `delta` degrees and resample it onto its own grid.
    ///
    /// Grid points that fall outside the shifted domain are dropped, so the result
    /// loses roughly `|delta| / step` points from one edge.
    pub fn realigned(&self, delta: f64) -> Self {
        if delta == 0.0 {
            return self.clone();
        }
        let shifted: Vec<f64> = self.tth.iter().map(|x| x + delta).collect();
        let interp = LinearInterpolator::new(&shifted, &self.counts);
        let (lo, hi) = interp.domain();
        let (start, end) = find_between(&self.tth, lo, hi);
        let tth = self.tth[start..end].to_vec();
        let counts = interp.resample(&tth);
        Self { tth, counts }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sorts_input() {
        let sample = Sample::new(vec![3.0, 1.0, 2.0], vec![30.0, 10.0, 20.0]).unwrap();
        assert_eq!(sample.tth(), &[1.0, 2.0, 3.0]);
        assert_eq!(sample.counts(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            Sample::new(vec![1.0, 2.0], vec![1.0, 0.0]),
            Err(SampleError::NonPositiveIntensity { .. })
        ));
        assert!(matches!(
            Sample::new(vec![1.0, 1.0], vec![1.0, 2.0]),
            Err(SampleError::DuplicateAngle(_))
        ));
        assert!(matches!(
            Sample::new(vec![1.0, 2.0], vec![1.0]),
            Err(SampleError::LengthMismatch(2, 1))
        ));
    }

    #[rstest::rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn test_rejects_non_finite_angle(#[case] angle: f64) {
        let result = Sample::new(vec![1.0, angle, 2.0], vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(SampleError::NonFiniteAngle(_))), "{result:?}");
    }

    #[test]
    fn test_realigned_drops_edge() {
        let tth: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let counts: Vec<f64> = tth.iter().map(|x| x + 1.0).collect();
        let sample = Sample::new(tth, counts).unwrap();
        let moved = sample.realigned(1.5);
        assert_eq!(moved.len(), 9);
        assert_eq!(moved.tth()[0], 2.0);
        // y(x) = x + 1 shifted right by 1.5 is x - 0.5
        for (x, y) in moved.iter() {
            assert!((y - (x - 0.5)).abs() < 1e-9);
        }
    }
}
