//! The working copy threaded through the fitting stages.
use crate::arrayops::weighted_sum;
use crate::interpolate::Harmonised;
use crate::search::find_between;

/// The mutable state of a fit: the angular axis, the measured counts on it, the
/// reference columns of the phases still in play and their coefficients.
///
/// The axis, the measured counts and every column have the same length, and there
/// is exactly one coefficient per column. Every operation preserves both.
#[derive(Debug, Clone, PartialEq)]
pub struct FitState {
    tth: Vec<f64>,
    observed: Vec<f64>,
    phase_ids: Vec<String>,
    columns: Vec<Vec<f64>>,
    coefficients: Vec<f64>,
}

impl FitState {
    /// Take ownership of a harmonised library and sample, all coefficients zero
    pub fn new(harmonised: Harmonised) -> Self {
        let Harmonised { library, sample } = harmonised;
        let phase_ids = library.phase_ids().map(str::to_string).collect::<Vec<_>>();
        let coefficients = vec![0.0; phase_ids.len()];
        let state = Self {
            tth: library.tth().to_vec(),
            observed: sample.counts().to_vec(),
            columns: library.columns().to_vec(),
            phase_ids,
            coefficients,
        };
        state.check();
        state
    }

    #[inline]
    fn check(&self) {
        debug_assert_eq!(self.tth.len(), self.observed.len());
        debug_assert_eq!(self.columns.len(), self.phase_ids.len());
        debug_assert_eq!(self.columns.len(), self.coefficients.len());
        debug_assert!(self.columns.iter().all(|c| c.len() == self.tth.len()));
    }

    pub fn tth(&self) -> &[f64] {
        &self.tth
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    pub fn phase_ids(&self) -> &[String] {
        &self.phase_ids
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// The number of points on the axis
    pub fn len(&self) -> usize {
        self.tth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tth.is_empty()
    }

    /// The number of phases still in play
    pub fn n_phases(&self) -> usize {
        self.phase_ids.len()
    }

    pub fn coefficient(&self, phase_id: &str) -> Option<f64> {
        self.phase_ids
            .iter()
            .position(|p| p == phase_id)
            .map(|i| self.coefficients[i])
    }

    pub fn iter_coefficients(&self) -> impl Iterator<Item = (&str, f64)> {
        self.phase_ids
            .iter()
            .map(String::as_str)
            .zip(self.coefficients.iter().copied())
    }

    pub fn set_coefficients(&mut self, coefficients: Vec<f64>) {
        debug_assert_eq!(coefficients.len(), self.n_phases());
        self.coefficients = coefficients;
    }

    pub fn reset_coefficients(&mut self) {
        self.coefficients.iter_mut().for_each(|c| *c = 0.0);
    }

    /// Restrict every array to the axis points inside `[lo, hi]`
    pub fn crop(&mut self, lo: f64, hi: f64) {
        let (start, end) = find_between(&self.tth, lo, hi);
        self.tth = self.tth[start..end].to_vec();
        self.observed = self.observed[start..end].to_vec();
        for col in self.columns.iter_mut() {
            *col = col[start..end].to_vec();
        }
        self.check();
    }

    /// Keep only the phases for which `keep(phase_id, coefficient)` holds, returning the
    /// ids of the phases removed.
    pub fn retain<F: FnMut(&str, f64) -> bool>(&mut self, mut keep: F) -> Vec<String> {
        let mut removed = Vec::new();
        let mut phase_ids = Vec::with_capacity(self.n_phases());
        let mut columns = Vec::with_capacity(self.n_phases());
        let mut coefficients = Vec::with_capacity(self.n_phases());

        let parts = self
            .phase_ids
            .drain(..)
            .zip(self.columns.drain(..))
            .zip(self.coefficients.drain(..));
        for ((phase_id, col), coef) in parts {
            if keep(phase_id.as_str(), coef) {
                phase_ids.push(phase_id);
                columns.push(col);
                coefficients.push(coef);
            } else {
                removed.push(phase_id);
            }
        }
        self.phase_ids = phase_ids;
        self.columns = columns;
        self.coefficients = coefficients;
        self.check();
        removed
    }

    /// Remove the phases named in `phase_ids`
    pub fn remove(&mut self, phase_ids: &[String]) -> Vec<String> {
        self.retain(|id, _| !phase_ids.iter().any(|r| r == id))
    }

    /// Swap in a new axis, measured counts and columns, e.g. after re-shifting phases.
    /// Coefficients are kept.
    pub(crate) fn replace_patterns(
        &mut self,
        tth: Vec<f64>,
        observed: Vec<f64>,
        columns: Vec<Vec<f64>>,
    ) {
        self.tth = tth;
        self.observed = observed;
        self.columns = columns;
        self.check();
    }

    /// The sum of every column weighted by its coefficient
    pub fn fitted(&self) -> Vec<f64> {
        weighted_sum(&self.columns, &self.coefficients, self.len())
    }

    /// Each phase's column scaled by its coefficient
    pub fn weighted_patterns(&self) -> Vec<(String, Vec<f64>)> {
        self.phase_ids
            .iter()
            .zip(self.columns.iter().zip(self.coefficients.iter()))
            .map(|(id, (col, c))| (id.clone(), col.iter().map(|v| v * c).collect()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpolate::harmonise;
    use crate::test_data;

    fn state() -> FitState {
        let lib = test_data::library();
        let sample = test_data::mass_mixture(&lib, "QUARTZ", &[("QUARTZ", 0.5)], 0.0);
        FitState::new(harmonise(&lib, &sample).unwrap())
    }

    #[test]
    fn test_crop_keeps_arrays_aligned() {
        let mut state = state();
        state.crop(20.0, 30.0);
        assert_eq!(state.len(), 101);
        assert!(state.columns().iter().all(|c| c.len() == 101));
        assert_eq!(state.observed().len(), 101);
    }

    #[test]
    fn test_retain() {
        let mut state = state();
        state.set_coefficients(vec![0.5, -0.1, 0.0]);
        let removed = state.retain(|_, c| c >= 0.0);
        assert_eq!(removed, vec!["ORGANIC".to_string()]);
        assert_eq!(state.n_phases(), 2);
        assert_eq!(state.coefficient("CALCITE"), Some(0.0));
        assert_eq!(state.coefficient("ORGANIC"), None);

        let fitted = state.fitted();
        for (f, o) in fitted.iter().zip(state.observed()) {
            assert!((f - o).abs() < 1e-9);
        }
    }
}
