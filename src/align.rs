//! Linear shift alignment of a measured pattern against a reference curve.
//!
//! The shift $`\delta`$ is chosen to maximize the Pearson correlation between the
//! reference and the measured pattern translated by $`\delta`$, inside an angular
//! window. The search is a bounded one dimensional Brent minimization over
//! $`[-\delta_{max}, \delta_{max}]`$ of $`1 - \rho(\delta)`$.
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::brent::BrentOpt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::interpolate::LinearInterpolator;
use crate::sample::Sample;
use crate::search::find_between;

/// Shifts at or beyond this fraction of the bound are reported as suspect
pub const SATURATION_FRACTION: f64 = 0.95;

/// Bounds larger than this tend to lock onto a neighbouring peak
pub const LARGE_SHIFT_BOUND: f64 = 0.5;

const BRENT_MAX_ITERS: u64 = 100;

/// How the alignment shift is obtained
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AlignMode {
    /// Search for the shift inside `[-max_shift, max_shift]`
    Auto { max_shift: f64 },
    /// Apply a fixed shift without searching
    Manual { shift: f64 },
}

impl Default for AlignMode {
    fn default() -> Self {
        Self::Auto { max_shift: 0.1 }
    }
}

impl AlignMode {
    /// The largest absolute shift this mode can produce
    pub fn bound(&self) -> f64 {
        match self {
            AlignMode::Auto { max_shift } => max_shift.abs(),
            AlignMode::Manual { shift } => shift.abs(),
        }
    }
}

/// The outcome of aligning a pattern against a reference
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Alignment {
    /// The shift, in degrees, to add to the target's angles
    pub shift: f64,
    /// Set when an automatic search ended at or near its bound
    pub suspect: bool,
    /// The reference axis points the aligned curve was evaluated on
    pub tth: Vec<f64>,
    /// The shifted target resampled onto `tth`
    pub counts: Vec<f64>,
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a * var_b).sqrt()
}

/// Aligns patterns against a fixed reference curve inside an angular window
#[derive(Debug, Clone)]
pub struct AlignmentEngine<'a> {
    tth: &'a [f64],
    reference: &'a [f64],
    window: (f64, f64),
}

struct ShiftProblem<'a, 'b> {
    engine: &'b AlignmentEngine<'a>,
    target: LinearInterpolator<'b>,
    points: &'b [f64],
    values: &'b [f64],
}

impl CostFunction for ShiftProblem<'_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self
            .engine
            .dissimilarity_on(&self.target, self.points, self.values, *param))
    }
}

impl<'a> AlignmentEngine<'a> {
    /// Create an engine for the reference curve `(tth, reference)`, restricted to `window`
    /// when given.
    pub fn new(tth: &'a [f64], reference: &'a [f64], window: Option<(f64, f64)>) -> Self {
        let window = window.unwrap_or((
            tth.first().copied().unwrap_or(f64::NEG_INFINITY),
            tth.last().copied().unwrap_or(f64::INFINITY),
        ));
        Self {
            tth,
            reference,
            window,
        }
    }

    /// The reference axis points in the window where the target, shifted by any amount
    /// up to `margin`, is still defined.
    fn evaluation_range(&self, target: &Sample, margin: f64) -> (usize, usize) {
        let t0 = target.tth().first().copied().unwrap_or(f64::NAN);
        let t1 = target.tth().last().copied().unwrap_or(f64::NAN);
        let lo = self.window.0.max(t0 + margin);
        let hi = self.window.1.min(t1 - margin);
        find_between(self.tth, lo, hi)
    }

    fn dissimilarity_on(
        &self,
        target: &LinearInterpolator<'_>,
        points: &[f64],
        values: &[f64],
        delta: f64,
    ) -> f64 {
        let shifted = target.resample_shifted(points, delta);
        1.0 - pearson(values, &shifted)
    }

    /// One minus the correlation between the reference and `target` shifted by `delta`
    pub fn dissimilarity(&self, target: &Sample, delta: f64) -> f64 {
        let (start, end) = self.evaluation_range(target, delta.abs());
        let interp = LinearInterpolator::new(target.tth(), target.counts());
        self.dissimilarity_on(
            &interp,
            &self.tth[start..end],
            &self.reference[start..end],
            delta,
        )
    }

    fn search(&self, target: &Sample, max_shift: f64) -> f64 {
        let (start, end) = self.evaluation_range(target, max_shift);
        if end.saturating_sub(start) < 3 {
            log::warn!("Too few points overlap the alignment window to search for a shift");
            return 0.0;
        }
        let points = &self.tth[start..end];
        let values = &self.reference[start..end];
        let interp = LinearInterpolator::new(target.tth(), target.counts());

        let problem = ShiftProblem {
            engine: self,
            target: interp,
            points,
            values,
        };
        let solver = BrentOpt::new(-max_shift, max_shift);
        let found = Executor::new(problem, solver)
            .configure(|state| state.max_iters(BRENT_MAX_ITERS))
            .run()
            .map(|res| res.state().get_best_param().copied());

        match found {
            Ok(Some(delta)) => delta,
            Ok(None) | Err(_) => {
                log::warn!("Bounded shift search failed, scanning a coarse grid instead");
                let steps = 40;
                (0..=steps)
                    .map(|i| -max_shift + 2.0 * max_shift * i as f64 / steps as f64)
                    .map(|d| (d, self.dissimilarity_on(&interp, points, values, d)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(d, _)| d)
                    .unwrap_or(0.0)
            }
        }
    }

    /// Align `target` against the reference.
    ///
    /// The returned curve is the shifted target evaluated on the reference axis inside the
    /// window, less a margin of `|shift|` at each edge, so it is never longer than the
    /// windowed reference.
    pub fn align(&self, target: &Sample, mode: AlignMode) -> Alignment {
        let (shift, suspect) = match mode {
            AlignMode::Manual { shift } => (shift, false),
            AlignMode::Auto { max_shift } => {
                let max_shift = max_shift.abs();
                if max_shift > LARGE_SHIFT_BOUND {
                    log::warn!(
                        "An alignment bound of {max_shift} degrees is large and may align to the wrong peak"
                    );
                }
                if max_shift == 0.0 {
                    (0.0, false)
                } else {
                    let shift = self.search(target, max_shift).clamp(-max_shift, max_shift);
                    let suspect = shift.abs() >= SATURATION_FRACTION * max_shift;
                    if suspect {
                        log::warn!(
                            "The alignment shift {shift:0.4} reached {:0.0}% of its bound {max_shift}, the search probably did not converge",
                            SATURATION_FRACTION * 100.0
                        );
                    }
                    (shift, suspect)
                }
            }
        };
        log::debug!("Alignment shift {shift:0.5}");

        let interp = LinearInterpolator::new(target.tth(), target.counts());
        let (t0, t1) = interp.domain();
        let lo = (self.window.0 + shift.abs()).max(t0 + shift);
        let hi = (self.window.1 - shift.abs()).min(t1 + shift);
        let (start, end) = find_between(self.tth, lo, hi);
        let tth = self.tth[start..end].to_vec();
        let counts = interp.resample_shifted(&tth, shift);

        Alignment {
            shift,
            suspect,
            tth,
            counts,
        }
    }
}
