//! Per-phase peak shift refinement by a coarse grid search.
//!
//! Each phase is visited once, in order. Its reference pattern is translated by every
//! candidate shift and the one minimizing the objective of the whole mixture, with every
//! other phase held at its current coefficient and shift, is kept. Phases are never
//! shifted jointly.
use crate::interpolate::{Harmonised, LinearInterpolator};
use crate::objective::Objective;
use crate::search::find_between;
use crate::state::FitState;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The shifts chosen for each phase
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShiftOutcome {
    pub shifts: Vec<(String, f64)>,
    /// The angular range the state was recropped to
    pub window: (f64, f64),
    /// The objective before and after shifting, with the coefficients unchanged
    pub value_before: f64,
    pub value_after: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ShiftGridSearch<'a> {
    /// The library and sample on the fitting grid, before any cropping
    pub harmonised: &'a Harmonised,
    pub max_shift: f64,
    pub shift_res: usize,
    pub objective: Objective,
}

impl<'a> ShiftGridSearch<'a> {
    pub fn new(
        harmonised: &'a Harmonised,
        max_shift: f64,
        shift_res: usize,
        objective: Objective,
    ) -> Self {
        Self {
            harmonised,
            max_shift,
            shift_res,
            objective,
        }
    }

    /// The `2 * shift_res + 1` evenly spaced shifts spanning `[-max_shift, max_shift]`
    pub fn candidates(&self) -> Vec<f64> {
        if self.shift_res == 0 || self.max_shift <= 0.0 {
            return vec![0.0];
        }
        let step = self.max_shift / self.shift_res as f64;
        (0..=2 * self.shift_res)
            .map(|k| -self.max_shift + k as f64 * step)
            .collect()
    }

    fn interpolator(&self, phase_id: &str) -> Option<LinearInterpolator<'a>> {
        let library = &self.harmonised.library;
        library
            .column(phase_id)
            .map(|col| LinearInterpolator::new(library.tth(), col))
    }

    /// Choose a shift for every phase in `state`, then rebuild its axis, measured counts and
    /// columns from the shifted reference patterns on the range where all of them are defined.
    ///
    /// The coefficients of `state` are reset to zero; the caller refits from scratch.
    pub fn run(&self, state: &mut FitState) -> ShiftOutcome {
        let tth = self.harmonised.tth();
        let (lib_lo, lib_hi) = match (tth.first(), tth.last()) {
            (Some(lo), Some(hi)) => (*lo, *hi),
            _ => return ShiftOutcome::default(),
        };
        let phase_ids = state.phase_ids().to_vec();
        let interpolators: Option<Vec<_>> =
            phase_ids.iter().map(|id| self.interpolator(id)).collect();
        let Some(interpolators) = interpolators else {
            log::warn!("A fitted phase is missing from the shift search library, skipping it");
            return ShiftOutcome::default();
        };

        let (start, end) = find_between(
            state.tth(),
            lib_lo + self.max_shift,
            lib_hi - self.max_shift,
        );
        if end.saturating_sub(start) < 2 {
            log::warn!("Too few points to search for phase shifts within {}", self.max_shift);
            return ShiftOutcome::default();
        }
        let points = &state.tth()[start..end];
        let observed = &state.observed()[start..end];
        let coefficients = state.coefficients().to_vec();

        let mut current: Vec<Vec<f64>> = interpolators
            .iter()
            .map(|interp| interp.resample(points))
            .collect();
        let fitted_with = |columns: &[Vec<f64>]| {
            crate::arrayops::weighted_sum(columns, &coefficients, points.len())
        };
        let value_before = self.objective.evaluate(observed, &fitted_with(&current));

        let candidates = self.candidates();
        let mut shifts = vec![0.0; phase_ids.len()];
        for (i, interp) in interpolators.iter().enumerate() {
            let c = coefficients[i];
            let mut others = fitted_with(&current);
            for (f, v) in others.iter_mut().zip(current[i].iter()) {
                *f -= c * v;
            }

            let mut best: Option<(f64, f64, Vec<f64>)> = None;
            for delta in candidates.iter().copied() {
                let column = interp.resample_shifted(points, delta);
                let fitted: Vec<f64> = others
                    .iter()
                    .zip(column.iter())
                    .map(|(o, v)| o + c * v)
                    .collect();
                let value = self.objective.evaluate(observed, &fitted);
                log::trace!("{}: shift {delta:0.4} -> {value:0.6}", phase_ids[i]);
                let better = match &best {
                    None => true,
                    Some((b, bv, _)) => {
                        value < *bv || (value == *bv && delta.abs() < b.abs())
                    }
                };
                if better {
                    best = Some((delta, value, column));
                }
            }
            if let Some((delta, _, column)) = best {
                shifts[i] = delta;
                current[i] = column;
            }
        }
        let value_after = self.objective.evaluate(observed, &fitted_with(&current));

        let max_delta = shifts.iter().copied().fold(0.0f64, f64::max);
        let min_delta = shifts.iter().copied().fold(0.0f64, f64::min);
        let state_lo = state.tth().first().copied().unwrap_or(lib_lo);
        let state_hi = state.tth().last().copied().unwrap_or(lib_hi);
        let lo = state_lo.max(lib_lo + max_delta);
        let hi = state_hi.min(lib_hi + min_delta);

        let sample = &self.harmonised.sample;
        let (s0, s1) = find_between(sample.tth(), lo, hi);
        let new_tth = sample.tth()[s0..s1].to_vec();
        let new_observed = sample.counts()[s0..s1].to_vec();
        let new_columns = interpolators
            .iter()
            .zip(shifts.iter())
            .map(|(interp, delta)| interp.resample_shifted(&new_tth, *delta))
            .collect();
        state.replace_patterns(new_tth, new_observed, new_columns);
        state.reset_coefficients();

        let shifts: Vec<(String, f64)> = phase_ids.into_iter().zip(shifts).collect();
        log::debug!("Phase shifts {shifts:?}, recropped to ({lo:0.3}, {hi:0.3})");
        ShiftOutcome {
            shifts,
            window: (lo, hi),
            value_before,
            value_after,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fitter::ConstrainedFitter;
    use crate::interpolate::harmonise;
    use crate::library::{PhaseInfo, ReferenceLibrary};
    use crate::sample::Sample;
    use crate::solver::Solver;
    use crate::test_data;

    #[test]
    fn test_candidates() {
        let lib = test_data::library();
        let sample = test_data::mass_mixture(&lib, "QUARTZ", &[("QUARTZ", 1.0)], 0.0);
        let harmonised = harmonise(&lib, &sample).unwrap();
        let search = ShiftGridSearch::new(&harmonised, 0.1, 2, Objective::Rwp);
        let candidates = search.candidates();
        assert_eq!(candidates.len(), 5);
        assert!((candidates[0] + 0.1).abs() < 1e-12);
        assert!(candidates[2].abs() < 1e-12);
        assert!((candidates[4] - 0.1).abs() < 1e-12);
    }

    #[test_log::test]
    fn test_recovers_phase_shift() {
        let tth = gridspace_fine();
        let quartz = test_data::quartz(&tth);
        let organic = test_data::organic(&tth);
        let lib = ReferenceLibrary::new(
            tth.clone(),
            vec![("QUARTZ".to_string(), quartz), ("ORGANIC".to_string(), organic)],
            vec![
                PhaseInfo::new("QUARTZ", "Quartz", 1.0),
                PhaseInfo::new("ORGANIC", "Organic", 0.5),
            ],
        )
        .unwrap();

        // Quartz peaks sit 0.04 degrees high in the sample
        let shifted: Vec<f64> = tth.iter().map(|x| x - 0.04).collect();
        let quartz_shifted = test_data::quartz(&shifted);
        let counts: Vec<f64> = quartz_shifted
            .iter()
            .zip(lib.column("ORGANIC").unwrap())
            .map(|(q, o)| 0.6 * q + 0.4 * o)
            .collect();
        let sample = Sample::new(tth.clone(), counts).unwrap();
        let harmonised = harmonise(&lib, &sample).unwrap();

        let mut state = FitState::new(harmonised.clone());
        let fitter = ConstrainedFitter::new(Solver::Nnls, Objective::Rwp, 1000);
        fitter.fit(&mut state, "fit").unwrap();
        let before = state.len();

        let search = ShiftGridSearch::new(&harmonised, 0.08, 4, Objective::Rwp);
        let outcome = search.run(&mut state);
        assert!(outcome.value_after <= outcome.value_before);
        assert!((outcome.shifts[0].1 - 0.04).abs() < 1e-9, "{:?}", outcome.shifts);
        assert!(state.coefficients().iter().all(|c| *c == 0.0));
        assert!(state.len() < before);
        assert!(state.columns().iter().all(|c| c.len() == state.len()));

        fitter.fit(&mut state, "refit").unwrap();
        assert!((state.coefficient("QUARTZ").unwrap() - 0.6).abs() < 1e-2);
    }

    fn gridspace_fine() -> Vec<f64> {
        crate::arrayops::gridspace(10.0, 60.0, 0.02)
    }
}
