//! Iterative removal of phases with negative (or trace) coefficients followed by a refit.
use std::collections::BTreeSet;

use crate::fitter::ConstrainedFitter;
use crate::solver::{SolveReport, SolverError};
use crate::state::FitState;

/// What a [`PruningLoop`] did
#[derive(Debug, Clone, Default)]
pub struct PruneOutcome {
    /// Phase ids removed, in the order they were removed
    pub removed: Vec<String>,
    /// The number of remove-and-refit passes
    pub iterations: usize,
    /// The number of phases in play before each pass and after the last
    pub phase_counts: Vec<usize>,
    pub reports: Vec<SolveReport>,
}

/// Removes every unprotected phase whose coefficient falls below `threshold` in one batch,
/// refits, and repeats until no such phase remains or a single phase is left.
///
/// A threshold of zero removes strictly negative coefficients only. The loop runs at most
/// once per phase and never empties the phase set: when every remaining phase is a removal
/// candidate, the one with the largest coefficient is kept.
#[derive(Debug, Clone)]
pub struct PruningLoop<'a> {
    pub protected: &'a BTreeSet<String>,
    pub threshold: f64,
}

impl<'a> PruningLoop<'a> {
    pub fn new(protected: &'a BTreeSet<String>) -> Self {
        Self {
            protected,
            threshold: 0.0,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn candidates(&self, state: &FitState) -> Vec<String> {
        let mut candidates: Vec<String> = state
            .iter_coefficients()
            .filter(|(id, c)| *c < self.threshold && !self.protected.contains(*id))
            .map(|(id, _)| id.to_string())
            .collect();

        if candidates.len() == state.n_phases() {
            let best = state
                .iter_coefficients()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id.to_string());
            candidates.retain(|id| Some(id) != best.as_ref());
        }
        candidates
    }

    pub fn run(
        &self,
        state: &mut FitState,
        fitter: &ConstrainedFitter,
        stage: &str,
    ) -> Result<PruneOutcome, SolverError> {
        let mut outcome = PruneOutcome::default();
        outcome.phase_counts.push(state.n_phases());

        while state.n_phases() > 1 {
            let candidates = self.candidates(state);
            if candidates.is_empty() {
                break;
            }
            let removed = state.remove(&candidates);
            log::debug!("{stage}: removing {removed:?}");
            outcome.iterations += 1;
            outcome.removed.extend(removed);

            let report = fitter.fit(state, stage)?;
            outcome.reports.push(report);
            outcome.phase_counts.push(state.n_phases());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpolate::Harmonised;
    use crate::objective::Objective;
    use crate::sample::Sample;
    use crate::solver::Solver;
    use crate::test_data;

    /// A sample that needs a negative amount of ORGANIC to fit exactly
    fn overshoot() -> FitState {
        let library = test_data::library();
        let quartz = library.column("QUARTZ").unwrap();
        let organic = library.column("ORGANIC").unwrap();
        let counts = quartz
            .iter()
            .zip(organic)
            .map(|(q, o)| 2.0 * q - 0.5 * o)
            .collect();
        let sample = Sample::from_parts(library.tth().to_vec(), counts);
        FitState::new(Harmonised { library, sample })
    }

    fn fitter() -> ConstrainedFitter {
        ConstrainedFitter::new(Solver::Bfgs, Objective::Delta, 1000)
    }

    #[test_log::test]
    fn test_prunes_negative_phase() {
        let mut state = overshoot();
        let fitter = fitter();
        fitter.fit(&mut state, "fit").unwrap();
        assert!(state.coefficient("ORGANIC").unwrap() < 0.0);

        let protected = BTreeSet::new();
        let outcome = PruningLoop::new(&protected)
            .run(&mut state, &fitter, "prune")
            .unwrap();
        assert!(outcome.removed.contains(&"ORGANIC".to_string()));
        assert!(state.coefficients().iter().all(|c| *c >= 0.0));
        assert!(outcome.iterations <= 3);
        assert_eq!(outcome.reports.len(), outcome.iterations);
        assert!(outcome.phase_counts.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_forced_phase_is_never_removed() {
        let mut state = overshoot();
        let fitter = fitter();
        fitter.fit(&mut state, "fit").unwrap();

        let protected: BTreeSet<String> = ["ORGANIC".to_string()].into_iter().collect();
        let outcome = PruningLoop::new(&protected)
            .run(&mut state, &fitter, "prune")
            .unwrap();
        assert!(!outcome.removed.contains(&"ORGANIC".to_string()));
        assert!(state.coefficient("ORGANIC").is_some());
    }

    #[test_log::test]
    fn test_only_forced_phase_survives() {
        let library = test_data::library();
        let quartz = library.column("QUARTZ").unwrap();
        let organic = library.column("ORGANIC").unwrap();
        let calcite = library.column("CALCITE").unwrap();
        let counts = quartz
            .iter()
            .zip(organic)
            .zip(calcite)
            .map(|((q, o), c)| 2.0 * q - 0.5 * o - 0.3 * c)
            .collect();
        let sample = Sample::from_parts(library.tth().to_vec(), counts);
        let mut state = FitState::new(Harmonised { library, sample });
        let fitter = fitter();
        fitter.fit(&mut state, "fit").unwrap();
        assert!(state.coefficient("ORGANIC").unwrap() < 0.0);
        assert!(state.coefficient("CALCITE").unwrap() < 0.0);

        let protected: BTreeSet<String> = ["QUARTZ".to_string()].into_iter().collect();
        let outcome = PruningLoop::new(&protected)
            .run(&mut state, &fitter, "prune")
            .unwrap();
        assert_eq!(state.phase_ids(), &["QUARTZ".to_string()]);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.removed, vec!["ORGANIC".to_string(), "CALCITE".to_string()]);
        assert!(state.coefficient("QUARTZ").unwrap() > 0.0);
    }

    #[test]
    fn test_never_empties() {
        let mut state = overshoot();
        state.set_coefficients(vec![-1.0, -2.0, -3.0]);
        let protected = BTreeSet::new();
        let fitter = fitter();
        let candidates = PruningLoop::new(&protected).candidates(&state);
        assert_eq!(candidates, vec!["ORGANIC".to_string(), "CALCITE".to_string()]);

        PruningLoop::new(&protected)
            .run(&mut state, &fitter, "prune")
            .unwrap();
        assert_eq!(state.n_phases(), 1);
    }

    #[test]
    fn test_trace_threshold() {
        let lib = test_data::library();
        let sample = test_data::mass_mixture(
            &lib,
            "QUARTZ",
            &[("QUARTZ", 0.9), ("CALCITE", 0.02)],
            0.0,
        );
        let mut state = FitState::new(crate::interpolate::harmonise(&lib, &sample).unwrap());
        let fitter = ConstrainedFitter::new(Solver::Nnls, Objective::Rwp, 1000);
        fitter.fit(&mut state, "fit").unwrap();

        let protected = BTreeSet::new();
        let outcome = PruningLoop::new(&protected)
            .with_threshold(0.01)
            .run(&mut state, &fitter, "prune")
            .unwrap();
        assert_eq!(state.phase_ids(), &["QUARTZ".to_string(), "CALCITE".to_string()]);
        assert!(outcome.removed.contains(&"ORGANIC".to_string()));
    }
}
