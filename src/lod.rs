//! Removal of phases estimated below their limit of detection.
//!
//! The limit of detection of the internal standard, $`L_s`$ in weight percent, is
//! transferred to every other phase through the reference intensity ratios:
//!
//! $$`
//!     L_p = L_s \frac{I_s}{I_p}
//! `$$
//!
//! so a strongly diffracting phase can be detected at a lower concentration than a weak one.
use std::collections::BTreeSet;

use crate::concentration::ConcentrationCalculator;
use crate::fitter::ConstrainedFitter;
use crate::fps::FpsError;
use crate::library::ReferenceLibrary;
use crate::solver::SolveReport;
use crate::state::FitState;

/// What a threshold removal step did
#[derive(Debug, Clone, Default)]
pub struct ThresholdOutcome {
    /// The limit applied to each phase, in weight percent
    pub limits: Vec<(String, f64)>,
    pub removed: Vec<String>,
    /// Present only when something was removed and the coefficients were refit
    pub report: Option<SolveReport>,
}

/// Estimates and applies per-phase detection limits from the internal standard's own
#[derive(Debug, Clone, Copy)]
pub struct DetectionLimitEstimator<'a> {
    pub library: &'a ReferenceLibrary,
    pub std: &'a str,
    /// The limit of detection of the internal standard in weight percent
    pub lod: f64,
}

impl<'a> DetectionLimitEstimator<'a> {
    pub fn new(library: &'a ReferenceLibrary, std: &'a str, lod: f64) -> Self {
        Self { library, std, lod }
    }

    /// The limit of detection of each phase in weight percent
    pub fn limits<S: AsRef<str>>(&self, phase_ids: &[S]) -> Vec<(String, f64)> {
        let std_rir = self.library.rir_of(self.std).unwrap_or(1.0);
        phase_ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                let limit = match self.library.rir_of(id) {
                    Some(rir) if id != self.std => self.lod * std_rir / rir,
                    _ => self.lod,
                };
                (id.to_string(), limit)
            })
            .collect()
    }

    /// Remove the unprotected phases whose estimated concentration is below their limit
    /// of detection, refitting once if any were removed.
    pub fn run(
        &self,
        state: &mut FitState,
        fitter: &ConstrainedFitter,
        calculator: &ConcentrationCalculator<'_>,
        protected: &BTreeSet<String>,
    ) -> Result<ThresholdOutcome, FpsError> {
        let limits = self.limits(state.phase_ids());
        log::debug!("Detection limits {limits:?}");
        prune_below(state, fitter, calculator, protected, limits, "lod")
    }
}

/// Remove amorphous phases estimated below `amorphous_lod` weight percent, refitting once
/// if any were removed.
pub fn prune_amorphous(
    state: &mut FitState,
    fitter: &ConstrainedFitter,
    calculator: &ConcentrationCalculator<'_>,
    protected: &BTreeSet<String>,
    amorphous: &[String],
    amorphous_lod: f64,
) -> Result<ThresholdOutcome, FpsError> {
    let limits: Vec<(String, f64)> = state
        .phase_ids()
        .iter()
        .filter(|id| amorphous.contains(*id))
        .map(|id| (id.clone(), amorphous_lod))
        .collect();
    prune_below(state, fitter, calculator, protected, limits, "amorphous")
}

fn prune_below(
    state: &mut FitState,
    fitter: &ConstrainedFitter,
    calculator: &ConcentrationCalculator<'_>,
    protected: &BTreeSet<String>,
    limits: Vec<(String, f64)>,
    stage: &str,
) -> Result<ThresholdOutcome, FpsError> {
    let phases = calculator.compute(state.phase_ids(), state.coefficients())?;
    let mut below: Vec<String> = phases
        .iter()
        .filter(|p| !protected.contains(&p.phase_id))
        .filter(|p| {
            limits
                .iter()
                .find(|(id, _)| *id == p.phase_id)
                .is_some_and(|(_, limit)| p.phase_percent < *limit)
        })
        .map(|p| p.phase_id.clone())
        .collect();

    if below.len() == state.n_phases() {
        let best = phases
            .iter()
            .max_by(|a, b| a.phase_percent.total_cmp(&b.phase_percent))
            .map(|p| p.phase_id.clone());
        below.retain(|id| Some(id) != best.as_ref());
    }

    if below.is_empty() {
        return Ok(ThresholdOutcome {
            limits,
            ..Default::default()
        });
    }

    let removed = state.remove(&below);
    log::debug!("{stage}: removed {removed:?} below their limits");
    let report = fitter.fit(state, stage)?;
    Ok(ThresholdOutcome {
        limits,
        removed,
        report: Some(report),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpolate::harmonise;
    use crate::objective::Objective;
    use crate::solver::Solver;
    use crate::test_data;

    #[test]
    fn test_limits_scale_with_rir() {
        let lib = test_data::library();
        let est = DetectionLimitEstimator::new(&lib, "QUARTZ", 0.5);
        let limits = est.limits(&["QUARTZ", "ORGANIC", "CALCITE"]);
        assert_eq!(limits[0], ("QUARTZ".to_string(), 0.5));
        assert!((limits[1].1 - 1.0).abs() < 1e-12);
        assert!((limits[2].1 - 0.25).abs() < 1e-12);
    }

    fn trace_state(lib: &ReferenceLibrary) -> FitState {
        let sample = test_data::mass_mixture(
            lib,
            "QUARTZ",
            &[("QUARTZ", 0.7), ("ORGANIC", 0.29), ("CALCITE", 0.01)],
            0.0,
        );
        let mut state = FitState::new(harmonise(lib, &sample).unwrap());
        let fitter = ConstrainedFitter::new(Solver::Nnls, Objective::Rwp, 1000);
        fitter.fit(&mut state, "fit").unwrap();
        state
    }

    #[rstest::rstest]
    #[case(0.1, 3)]
    #[case(3.0, 2)]
    #[case(50.0, 1)]
    fn test_removal_and_refit(#[case] lod: f64, #[case] expected: usize) {
        let lib = test_data::library();
        let mut state = trace_state(&lib);
        let fitter = ConstrainedFitter::new(Solver::Nnls, Objective::Rwp, 1000);
        let calc = ConcentrationCalculator::new(&lib, Some("QUARTZ"), None);
        let protected: BTreeSet<String> = ["QUARTZ".to_string()].into_iter().collect();

        let outcome = DetectionLimitEstimator::new(&lib, "QUARTZ", lod)
            .run(&mut state, &fitter, &calc, &protected)
            .unwrap();
        assert_eq!(state.n_phases(), expected);
        assert_eq!(outcome.report.is_some(), !outcome.removed.is_empty());
        assert!(state.coefficient("QUARTZ").is_some());
    }

    #[test]
    fn test_amorphous_threshold() {
        let lib = test_data::library();
        let mut state = trace_state(&lib);
        let fitter = ConstrainedFitter::new(Solver::Nnls, Objective::Rwp, 1000);
        let calc = ConcentrationCalculator::new(&lib, Some("QUARTZ"), None);
        let protected = BTreeSet::new();
        let amorphous = vec!["ORGANIC".to_string()];

        let outcome =
            prune_amorphous(&mut state, &fitter, &calc, &protected, &amorphous, 10.0).unwrap();
        assert!(outcome.removed.is_empty());
        assert!(outcome.report.is_none());

        let outcome =
            prune_amorphous(&mut state, &fitter, &calc, &protected, &amorphous, 40.0).unwrap();
        assert_eq!(outcome.removed, vec!["ORGANIC".to_string()]);
        assert!(outcome.report.is_some());
    }
}
