//! Estimate the mixing coefficients of a [`FitState`].
use std::collections::BTreeSet;

use crate::objective::Objective;
use crate::solver::{minimize, nnls, SolveReport, Solver, SolverError};
use crate::state::FitState;

/// The result of the non-negative least squares prefilter
#[derive(Debug, Clone)]
pub struct Prefiltered {
    pub report: SolveReport,
    /// Phases that received exactly zero weight and were dropped
    pub removed: Vec<String>,
}

/// Fits mixing coefficients with a fixed solver, objective and iteration cap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstrainedFitter {
    pub solver: Solver,
    pub objective: Objective,
    pub max_iter: u64,
}

impl ConstrainedFitter {
    pub fn new(solver: Solver, objective: Objective, max_iter: u64) -> Self {
        Self {
            solver,
            objective,
            max_iter,
        }
    }

    /// Solve the non-negative least squares problem over every phase in `state` and drop
    /// the unprotected phases assigned exactly zero weight.
    ///
    /// The surviving phases keep their least squares coefficients as the warm start for
    /// the next stage. At least one phase always survives.
    pub fn prefilter(
        &self,
        state: &mut FitState,
        protected: &BTreeSet<String>,
    ) -> Result<Prefiltered, SolverError> {
        let solution = nnls(state.columns(), state.observed())?;
        let fitted = crate::arrayops::weighted_sum(
            state.columns(),
            &solution.coefficients,
            state.len(),
        );
        let report = SolveReport {
            stage: "prefilter".to_string(),
            solver: Solver::Nnls,
            objective: self.objective,
            value: self.objective.evaluate(state.observed(), &fitted),
            iterations: solution.iterations as u64,
            converged: solution.converged,
            message: if solution.converged {
                "Optimality conditions satisfied".to_string()
            } else {
                "Iteration limit reached".to_string()
            },
        };
        if !solution.converged {
            log::warn!("prefilter: NNLS reached its iteration limit");
        }

        let keep_anyway = if solution.coefficients.iter().all(|c| *c <= 0.0)
            && !state.phase_ids().iter().any(|id| protected.contains(id))
        {
            state.phase_ids().first().cloned()
        } else {
            None
        };

        state.set_coefficients(solution.coefficients);
        let removed = state.retain(|id, c| {
            c > 0.0 || protected.contains(id) || keep_anyway.as_deref() == Some(id)
        });
        if !removed.is_empty() {
            log::debug!("prefilter: dropped {} zero weight phases {:?}", removed.len(), removed);
        }
        Ok(Prefiltered { report, removed })
    }

    /// Refit the coefficients of `state` from its current coefficients
    pub fn fit(&self, state: &mut FitState, stage: &str) -> Result<SolveReport, SolverError> {
        let minimum = minimize(
            stage,
            self.solver,
            self.objective,
            state.columns(),
            state.observed(),
            state.coefficients(),
            self.max_iter,
        )?;
        log::debug!(
            "{stage}: {} phases, {} = {:0.5}",
            state.n_phases(),
            self.objective,
            minimum.report.value
        );
        state.set_coefficients(minimum.coefficients);
        Ok(minimum.report)
    }
}
