//! Numerical back ends for estimating phase mixing coefficients.
//!
//! Two families are provided:
//! - [`nnls`], a Lawson-Hanson active set solver for $`\min \|Xc - y\|^2`$ subject to
//!   $`c \ge 0`$, used both as a prefilter and as a stand alone solver.
//! - [`minimize`], which drives one of the general purpose [`argmin`] solvers over an
//!   [`Objective`], optionally keeping the coefficients inside $`[0, \infty)`$.
use std::cell::RefCell;
use std::fmt::Display;
use std::str::FromStr;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::conjugategradient::{beta::PolakRibierePlus, NonlinearConjugateGradient};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::weighted_sum;
use crate::config::ConfigError;
use crate::objective::Objective;

/// The number of correction pairs the limited memory quasi-Newton solvers keep
const LBFGS_MEMORY: usize = 10;

/// How many times a general solver is restarted from its best point after its back end
/// gives up while still making progress
const MAX_RESTARTS: usize = 25;

/// The optimization strategy used to estimate mixing coefficients
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Solver {
    /// Gradient based quasi-Newton search
    #[default]
    Bfgs,
    /// Derivative free downhill simplex
    NelderMead,
    /// Nonlinear conjugate gradient with a non-negative Polak-Ribière update
    ConjugateGradient,
    /// Quasi-Newton search confined to non-negative coefficients
    LBfgsB,
    /// Non-negative least squares only, no general optimization
    Nnls,
}

impl Solver {
    /// Whether the solver keeps every coefficient non-negative by construction
    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::LBfgsB | Self::Nnls)
    }

    fn general(&self) -> Option<General> {
        match self {
            Self::Bfgs | Self::LBfgsB => Some(General::Lbfgs),
            Self::ConjugateGradient => Some(General::ConjugateGradient),
            Self::NelderMead => Some(General::NelderMead),
            Self::Nnls => None,
        }
    }
}

/// The [`argmin`] method behind each general purpose [`Solver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum General {
    Lbfgs,
    ConjugateGradient,
    NelderMead,
}

impl FromStr for Solver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BFGS" => Ok(Self::Bfgs),
            "NELDER-MEAD" | "NELDERMEAD" => Ok(Self::NelderMead),
            "CG" => Ok(Self::ConjugateGradient),
            "L-BFGS-B" | "LBFGSB" => Ok(Self::LBfgsB),
            "NNLS" => Ok(Self::Nnls),
            _ => Err(ConfigError::UnknownSolver(s.to_string())),
        }
    }
}

impl Display for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Solver::Bfgs => "BFGS",
            Solver::NelderMead => "Nelder-Mead",
            Solver::ConjugateGradient => "CG",
            Solver::LBfgsB => "L-BFGS-B",
            Solver::Nnls => "NNLS",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("There are no phases or no data points to fit")]
    EmptyProblem,
    #[error("Failed to solve the least squares subproblem: {0}")]
    Singular(&'static str),
}

/// Describe a single solve: which stage ran it, how it ended and where.
///
/// `converged` reports the back end's own termination status. The fitting pipeline
/// uses the returned coefficients whether or not it is set.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolveReport {
    pub stage: String,
    pub solver: Solver,
    pub objective: Objective,
    /// The objective value at the returned coefficients
    pub value: f64,
    pub iterations: u64,
    pub converged: bool,
    pub message: String,
}

/// The coefficients found by a solve along with its report
#[derive(Debug, Clone)]
pub struct Minimum {
    pub coefficients: Vec<f64>,
    pub report: SolveReport,
}

/// Output of [`nnls`]
#[derive(Debug, Clone)]
pub struct NnlsSolution {
    pub coefficients: Vec<f64>,
    /// $`\|Xc - y\|_2`$ at the solution
    pub residual_norm: f64,
    pub iterations: usize,
    /// Whether the optimality conditions were met before the iteration cap
    pub converged: bool,
}

fn solve_passive(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    passive: &[bool],
) -> Result<DVector<f64>, SolverError> {
    let index: Vec<usize> = (0..passive.len()).filter(|j| passive[*j]).collect();
    let sub = DMatrix::from_fn(a.nrows(), index.len(), |i, c| a[(i, index[c])]);
    let z = sub
        .svd(true, true)
        .solve(b, 1e-12)
        .map_err(SolverError::Singular)?;
    let mut s = DVector::zeros(passive.len());
    for (c, j) in index.iter().enumerate() {
        s[*j] = z[c];
    }
    Ok(s)
}

/// Solve $`\min \|Xc - y\|^2`$ subject to $`c \ge 0`$ where `columns` are the columns of $`X`$
/// and `observed` is $`y`$, using the Lawson-Hanson active set method.
pub fn nnls(columns: &[Vec<f64>], observed: &[f64]) -> Result<NnlsSolution, SolverError> {
    let m = observed.len();
    let n = columns.len();
    if n == 0 || m == 0 {
        return Err(SolverError::EmptyProblem);
    }

    let a = DMatrix::from_fn(m, n, |i, j| columns[j][i]);
    let b = DVector::from_column_slice(observed);
    let tol = 10.0 * f64::EPSILON * a.norm() * (m.max(n) as f64);
    let max_iter = 3 * n + 10;

    let mut x: DVector<f64> = DVector::zeros(n);
    let mut passive = vec![false; n];
    let mut w = a.tr_mul(&(&b - &a * &x));
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iter {
        let candidate = (0..n)
            .filter(|j| !passive[*j] && w[*j] > tol)
            .max_by(|i, j| w[*i].total_cmp(&w[*j]));
        let Some(t) = candidate else {
            converged = true;
            break;
        };
        passive[t] = true;

        while iterations < max_iter && passive.iter().any(|p| *p) {
            iterations += 1;
            let s = solve_passive(&a, &b, &passive)?;
            if (0..n).filter(|j| passive[*j]).all(|j| s[j] > 0.0) {
                x = s;
                break;
            }

            let alpha = (0..n)
                .filter(|j| passive[*j] && s[*j] <= 0.0)
                .map(|j| {
                    let denom = x[j] - s[j];
                    if denom > 0.0 {
                        x[j] / denom
                    } else {
                        0.0
                    }
                })
                .fold(f64::INFINITY, f64::min);

            for j in 0..n {
                if passive[j] {
                    x[j] += alpha * (s[j] - x[j]);
                    if x[j] <= tol {
                        x[j] = 0.0;
                        passive[j] = false;
                    }
                }
            }
        }
        w = a.tr_mul(&(&b - &a * &x));
    }

    let residual_norm = (&b - &a * &x).norm();
    log::trace!("NNLS finished after {iterations} iterations, residual norm {residual_norm:0.4}");
    Ok(NnlsSolution {
        coefficients: x.iter().map(|v| v.max(0.0)).collect(),
        residual_norm,
        iterations,
        converged,
    })
}

/// Adapts an [`Objective`] over a fixed set of reference columns to the [`argmin`]
/// problem traits.
pub struct FullPatternProblem<'a> {
    columns: &'a [Vec<f64>],
    observed: &'a [f64],
    objective: Objective,
    bounded: bool,
}

impl<'a> FullPatternProblem<'a> {
    pub fn new(
        columns: &'a [Vec<f64>],
        observed: &'a [f64],
        objective: Objective,
        bounded: bool,
    ) -> Self {
        Self {
            columns,
            observed,
            objective,
            bounded,
        }
    }

    fn project(&self, params: &[f64]) -> Vec<f64> {
        if self.bounded {
            params.iter().map(|v| v.max(0.0)).collect()
        } else {
            params.to_vec()
        }
    }

    pub fn fitted(&self, params: &[f64]) -> Vec<f64> {
        weighted_sum(self.columns, params, self.observed.len())
    }

    pub fn value(&self, params: &[f64]) -> f64 {
        let params = self.project(params);
        self.objective
            .evaluate(self.observed, &self.fitted(&params))
    }

    pub fn slope(&self, params: &[f64]) -> Vec<f64> {
        let params = self.project(params);
        let fitted = self.fitted(&params);
        let mut g = self.objective.gradient(self.columns, self.observed, &fitted);
        if self.bounded {
            // Stop the line search from walking further into the clamped region
            const EPS: f64 = 1e-12;
            for (gi, x) in g.iter_mut().zip(params.iter()) {
                if *x <= EPS && *gi > 0.0 {
                    *gi = 0.0;
                }
            }
        }
        g
    }
}

impl CostFunction for FullPatternProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.value(param))
    }
}

impl Gradient for FullPatternProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        Ok(self.slope(param))
    }
}

/// Remembers the lowest finite cost evaluated by a back end, in projected form.
struct Tracked<'p, 'a> {
    problem: &'p FullPatternProblem<'a>,
    best: &'p RefCell<Option<(f64, Vec<f64>)>>,
}

impl CostFunction for Tracked<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let value = self.problem.value(param);
        if value.is_finite() {
            let mut best = self.best.borrow_mut();
            if best.as_ref().map_or(true, |(v, _)| value < *v) {
                *best = Some((value, self.problem.project(param)));
            }
        }
        Ok(value)
    }
}

impl Gradient for Tracked<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        Ok(self.problem.slope(param))
    }
}

struct Outcome {
    iterations: u64,
    converged: bool,
    message: String,
}

fn outcome_of<I>(state: &I) -> Outcome
where
    I: State<Param = Vec<f64>, Float = f64>,
{
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    Outcome {
        iterations: state.get_iter(),
        converged,
        message: termination.to_string(),
    }
}

fn initial_simplex(initial: &[f64]) -> Vec<Vec<f64>> {
    let scale = initial.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let step = if scale > 0.0 { 0.1 * scale } else { 0.1 };
    let mut simplex = Vec::with_capacity(initial.len() + 1);
    simplex.push(initial.to_vec());
    for i in 0..initial.len() {
        let mut vertex = initial.to_vec();
        vertex[i] += step;
        simplex.push(vertex);
    }
    simplex
}

fn run_general(
    problem: Tracked<'_, '_>,
    method: General,
    initial: Vec<f64>,
    max_iter: u64,
) -> Result<Outcome, argmin::core::Error> {
    let n = initial.len() as u64;
    let outcome = match method {
        General::Lbfgs => {
            let linesearch = MoreThuenteLineSearch::new();
            let method = LBFGS::new(linesearch, LBFGS_MEMORY)
                .with_tolerance_grad(1e-10)?
                .with_tolerance_cost(1e-14)?;
            let res = Executor::new(problem, method)
                .configure(|state| state.param(initial).max_iters(max_iter))
                .run()?;
            outcome_of(res.state())
        }
        General::ConjugateGradient => {
            // Strong Wolfe steps with a small curvature constant keep PR+ directions descending
            let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.1)?;
            let method = NonlinearConjugateGradient::new(linesearch, PolakRibierePlus::new())
                .restart_iters(n.max(1))
                .restart_orthogonality(0.1);
            let res = Executor::new(problem, method)
                .configure(|state| state.param(initial).max_iters(max_iter))
                .run()?;
            outcome_of(res.state())
        }
        General::NelderMead => {
            let method = NelderMead::new(initial_simplex(&initial)).with_sd_tolerance(1e-12)?;
            let res = Executor::new(problem, method)
                .configure(|state| state.max_iters(max_iter.max(200 * n)))
                .run()?;
            outcome_of(res.state())
        }
    };
    Ok(outcome)
}

fn nnls_minimum(
    stage: &str,
    problem: &FullPatternProblem<'_>,
    columns: &[Vec<f64>],
    observed: &[f64],
) -> Result<Minimum, SolverError> {
    let solution = nnls(columns, observed)?;
    let value = problem.value(&solution.coefficients);
    Ok(Minimum {
        report: SolveReport {
            stage: stage.to_string(),
            solver: Solver::Nnls,
            objective: problem.objective,
            value,
            iterations: solution.iterations as u64,
            converged: solution.converged,
            message: if solution.converged {
                "Optimality conditions satisfied".to_string()
            } else {
                "Iteration limit reached".to_string()
            },
        },
        coefficients: solution.coefficients,
    })
}

/// Minimize `objective` over the mixing coefficients of `columns`, starting from `initial`.
///
/// [`Solver::Nnls`] ignores `objective` during the solve and reports it at the solution.
///
/// The general back ends return the lowest cost point they evaluated. When one stops
/// with an error, such as a line search rejecting its direction, it is restarted from
/// that point. A restart that cannot improve on its starting point means steepest
/// descent found no lower cost there, which is reported as converged. `iterations`
/// counts the iterations of runs that terminated normally.
pub fn minimize(
    stage: &str,
    solver: Solver,
    objective: Objective,
    columns: &[Vec<f64>],
    observed: &[f64],
    initial: &[f64],
    max_iter: u64,
) -> Result<Minimum, SolverError> {
    if columns.is_empty() || observed.is_empty() {
        return Err(SolverError::EmptyProblem);
    }
    debug_assert_eq!(columns.len(), initial.len());

    let problem = FullPatternProblem::new(columns, observed, objective, solver.is_bounded());
    let Some(method) = solver.general() else {
        return nnls_minimum(stage, &problem, columns, observed);
    };

    let best: RefCell<Option<(f64, Vec<f64>)>> = RefCell::new(None);
    let mut start = problem.project(initial);
    let mut iterations = 0;
    let mut restarts = 0;
    let (converged, message) = loop {
        let start_value = problem.value(&start);
        let tracked = Tracked {
            problem: &problem,
            best: &best,
        };
        match run_general(tracked, method, start.clone(), max_iter) {
            Ok(outcome) => {
                iterations += outcome.iterations;
                break (outcome.converged, outcome.message);
            }
            Err(err) => {
                let improved = match best.borrow().as_ref() {
                    Some((value, params)) if *value < start_value - 1e-12 * start_value.abs() => {
                        Some(params.clone())
                    }
                    _ => None,
                };
                match improved {
                    Some(params) if restarts < MAX_RESTARTS => {
                        log::trace!("{stage}: {solver} stopped early ({err}), restarting from its best point");
                        restarts += 1;
                        start = params;
                    }
                    Some(_) => break (false, err.to_string()),
                    None => {
                        log::trace!("{stage}: {solver} made no progress from its best point ({err})");
                        break (start_value.is_finite(), err.to_string());
                    }
                }
            }
        }
    };

    let coefficients = best.into_inner().map(|(_, params)| params).unwrap_or(start);
    let value = problem.value(&coefficients);
    if !converged {
        log::warn!("{stage}: {solver} did not report convergence ({message}), continuing with its best estimate");
    }
    log::trace!("{stage}: {solver} {objective} = {value:0.6} after {iterations} iterations and {restarts} restarts");

    Ok(Minimum {
        coefficients,
        report: SolveReport {
            stage: stage.to_string(),
            solver,
            objective,
            value,
            iterations,
            converged,
            message,
        },
    })
}
