//! Options controlling the full pattern fitting pipelines.
use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::align::AlignMode;
use crate::library::ReferenceLibrary;
use crate::objective::Objective;
use crate::solver::Solver;

/// All the ways a fitting configuration can be rejected before any work is done
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Unknown solver {0}, expected one of BFGS, Nelder-Mead, CG, L-BFGS-B or NNLS")]
    UnknownSolver(String),
    #[error("Unknown objective {0}, expected one of Delta, R or Rwp")]
    UnknownObjective(String),
    #[error("The {role} phase {phase_id} is not in the library")]
    UnknownPhase { role: &'static str, phase_id: String },
    #[error("The standard concentration must be between 0 and 100, received {0}")]
    StdConcOutOfRange(f64),
    #[error("A standard concentration was given without an internal standard")]
    StdConcWithoutStandard,
    #[error("The detection limit must be non-negative, received {0}")]
    NegativeLod(f64),
    #[error("The amorphous detection limit must be non-negative, received {0}")]
    NegativeAmorphousLod(f64),
    #[error("The trace threshold must be non-negative, received {0}")]
    NegativeTrace(f64),
    #[error("The {0} bound must be finite and non-negative, received {1}")]
    InvalidShift(&'static str, f64),
    #[error("The shift grid resolution must be at least 1")]
    ZeroShiftResolution,
    #[error("The angular window ({0}, {1}) is empty")]
    InvalidWindow(f64, f64),
}

/// Hyperparameters for the full pattern fitting pipelines
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FpsConfig {
    /// The optimization strategy
    pub solver: Solver,
    /// The quantity minimized by the general solvers
    pub objective: Objective,
    /// Phase ids or names to fit with, all phases when `None`
    pub refs: Option<Vec<String>>,
    /// The phase id of the internal standard
    pub std: Option<String>,
    /// The known weight percent of the internal standard
    pub std_conc: Option<f64>,
    /// Drop the internal standard from the reported concentrations, rescaling
    /// the other phases to a standard-free basis. Requires `std_conc`.
    pub omit_std: bool,
    pub align: AlignMode,
    /// The largest per-phase shift tried by the shift grid search, 0 disables it
    pub shift: f64,
    /// The shift grid has `2 * shift_res + 1` candidates
    pub shift_res: usize,
    /// Detection limit of the internal standard in weight percent, 0 disables it
    pub lod: f64,
    /// Phase ids treated as amorphous
    pub amorphous: Vec<String>,
    /// Amorphous phases estimated below this weight percent are removed
    pub amorphous_lod: f64,
    /// Phase ids exempt from every removal step
    pub force: Vec<String>,
    /// Interpolate the library and sample onto a common grid
    pub harmonise: bool,
    /// The angular window used for alignment
    pub tth_align: Option<(f64, f64)>,
    /// The angular window used for fitting
    pub tth_fps: Option<(f64, f64)>,
    /// Coefficients below this are removed by the manual pipeline
    pub remove_trace: f64,
    /// Iteration cap handed to the general solvers
    pub max_iter: u64,
}

impl Default for FpsConfig {
    fn default() -> Self {
        Self {
            solver: Solver::default(),
            objective: Objective::default(),
            refs: None,
            std: None,
            std_conc: None,
            omit_std: false,
            align: AlignMode::default(),
            shift: 0.05,
            shift_res: 4,
            lod: 0.1,
            amorphous: Vec::new(),
            amorphous_lod: 0.0,
            force: Vec::new(),
            harmonise: true,
            tth_align: None,
            tth_fps: None,
            remove_trace: 0.0,
            max_iter: 1000,
        }
    }
}

impl FpsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    pub fn objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn refs<S: Into<String>, I: IntoIterator<Item = S>>(mut self, refs: I) -> Self {
        self.refs = Some(refs.into_iter().map(Into::into).collect());
        self
    }

    /// Set the internal standard. `"none"` clears it and disables the steps that need it.
    pub fn std(mut self, std: impl Into<String>) -> Self {
        let std: String = std.into();
        self.std = if std.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(std)
        };
        self
    }

    pub fn std_conc(mut self, std_conc: f64) -> Self {
        self.std_conc = Some(std_conc);
        self
    }

    pub fn omit_std(mut self, omit_std: bool) -> Self {
        self.omit_std = omit_std;
        self
    }

    /// Search for the alignment shift within `[-max_shift, max_shift]`
    pub fn align(mut self, max_shift: f64) -> Self {
        self.align = AlignMode::Auto { max_shift };
        self
    }

    /// Apply a fixed alignment shift
    pub fn manual_align(mut self, shift: f64) -> Self {
        self.align = AlignMode::Manual { shift };
        self
    }

    pub fn shift(mut self, shift: f64) -> Self {
        self.shift = shift;
        self
    }

    pub fn shift_res(mut self, shift_res: usize) -> Self {
        self.shift_res = shift_res;
        self
    }

    pub fn lod(mut self, lod: f64) -> Self {
        self.lod = lod;
        self
    }

    pub fn amorphous<S: Into<String>, I: IntoIterator<Item = S>>(mut self, amorphous: I) -> Self {
        self.amorphous = amorphous.into_iter().map(Into::into).collect();
        self
    }

    pub fn amorphous_lod(mut self, amorphous_lod: f64) -> Self {
        self.amorphous_lod = amorphous_lod;
        self
    }

    pub fn force<S: Into<String>, I: IntoIterator<Item = S>>(mut self, force: I) -> Self {
        self.force = force.into_iter().map(Into::into).collect();
        self
    }

    pub fn harmonise(mut self, harmonise: bool) -> Self {
        self.harmonise = harmonise;
        self
    }

    pub fn tth_align(mut self, lo: f64, hi: f64) -> Self {
        self.tth_align = Some((lo, hi));
        self
    }

    pub fn tth_fps(mut self, lo: f64, hi: f64) -> Self {
        self.tth_fps = Some((lo, hi));
        self
    }

    pub fn remove_trace(mut self, remove_trace: f64) -> Self {
        self.remove_trace = remove_trace;
        self
    }

    pub fn max_iter(mut self, max_iter: u64) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// The phase ids that no pruning step may remove: the forced phases and the
    /// internal standard.
    pub fn protected(&self) -> BTreeSet<String> {
        self.force
            .iter()
            .cloned()
            .chain(self.std.iter().cloned())
            .collect()
    }

    /// Check the configuration against `library`
    pub fn validate(&self, library: &ReferenceLibrary) -> Result<(), ConfigError> {
        if let Some(std) = self.std.as_deref() {
            if !library.contains(std) {
                return Err(ConfigError::UnknownPhase {
                    role: "standard",
                    phase_id: std.to_string(),
                });
            }
        }
        for (role, ids) in [("amorphous", &self.amorphous), ("forced", &self.force)] {
            if let Some(missing) = ids.iter().find(|id| !library.contains(id)) {
                return Err(ConfigError::UnknownPhase {
                    role,
                    phase_id: missing.clone(),
                });
            }
        }

        if let Some(std_conc) = self.std_conc {
            if self.std.is_none() {
                return Err(ConfigError::StdConcWithoutStandard);
            }
            if !(std_conc > 0.0 && std_conc < 100.0) {
                return Err(ConfigError::StdConcOutOfRange(std_conc));
            }
        }

        if !(self.lod >= 0.0) {
            return Err(ConfigError::NegativeLod(self.lod));
        }
        if !(self.amorphous_lod >= 0.0) {
            return Err(ConfigError::NegativeAmorphousLod(self.amorphous_lod));
        }
        if !(self.remove_trace >= 0.0) {
            return Err(ConfigError::NegativeTrace(self.remove_trace));
        }

        if !(self.shift >= 0.0) || !self.shift.is_finite() {
            return Err(ConfigError::InvalidShift("shift", self.shift));
        }
        if self.shift > 0.0 && self.shift_res == 0 {
            return Err(ConfigError::ZeroShiftResolution);
        }
        match self.align {
            AlignMode::Auto { max_shift } if !(max_shift >= 0.0) || !max_shift.is_finite() => {
                return Err(ConfigError::InvalidShift("alignment", max_shift));
            }
            AlignMode::Manual { shift } if !shift.is_finite() => {
                return Err(ConfigError::InvalidShift("alignment", shift));
            }
            _ => {}
        }

        for (lo, hi) in [self.tth_align, self.tth_fps].into_iter().flatten() {
            if !(lo < hi) {
                return Err(ConfigError::InvalidWindow(lo, hi));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data;

    #[test]
    fn test_std_none_clears_standard() {
        let config = FpsConfig::default().std("QUARTZ").std("none");
        assert!(config.std.is_none());
        let config = FpsConfig::default().std("QUARTZ");
        assert_eq!(config.std.as_deref(), Some("QUARTZ"));
    }

    #[test]
    fn test_protected_includes_standard() {
        let config = FpsConfig::default().std("QUARTZ").force(["ORGANIC"]);
        let protected = config.protected();
        assert!(protected.contains("QUARTZ"));
        assert!(protected.contains("ORGANIC"));
    }

    #[rstest::rstest]
    #[case(FpsConfig::default().std("GYPSUM"), "standard")]
    #[case(FpsConfig::default().amorphous(["GLASS"]), "amorphous")]
    #[case(FpsConfig::default().force(["GLASS"]), "forced")]
    fn test_unknown_phases(#[case] config: FpsConfig, #[case] expected: &str) {
        let lib = test_data::library();
        match config.validate(&lib) {
            Err(ConfigError::UnknownPhase { role, .. }) => assert_eq!(role, expected),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let lib = test_data::library();
        let base = FpsConfig::default().std("QUARTZ");
        assert_eq!(
            base.clone().std_conc(100.0).validate(&lib),
            Err(ConfigError::StdConcOutOfRange(100.0))
        );
        assert_eq!(
            base.clone().std_conc(0.0).validate(&lib),
            Err(ConfigError::StdConcOutOfRange(0.0))
        );
        assert_eq!(
            FpsConfig::default().std_conc(20.0).validate(&lib),
            Err(ConfigError::StdConcWithoutStandard)
        );
        assert_eq!(
            base.clone().lod(-1.0).validate(&lib),
            Err(ConfigError::NegativeLod(-1.0))
        );
        assert_eq!(
            base.clone().shift(0.1).shift_res(0).validate(&lib),
            Err(ConfigError::ZeroShiftResolution)
        );
        assert_eq!(
            base.clone().tth_fps(30.0, 20.0).validate(&lib),
            Err(ConfigError::InvalidWindow(30.0, 20.0))
        );
        assert!(base.std_conc(20.0).validate(&lib).is_ok());
    }
}
