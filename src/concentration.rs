//! Convert fitted mixing coefficients to weight percent concentrations.
//!
//! With the internal standard $`s`$, a phase $`p`$ with coefficient $`c_p`$ and reference
//! intensity ratio $`I_p`$ is assigned
//!
//! $$`
//!     w_p = c_p \frac{I_s}{I_p} \cdot k
//! `$$
//!
//! where $`k = 100 / \sum_q c_q I_s / I_q`$ when the standard's concentration is unknown,
//! and $`k = w_s / c_s`$ when it is known to be $`w_s`$.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::library::ReferenceLibrary;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConcentrationError {
    #[error("Phase {0} is not in the library")]
    UnknownPhase(String),
    #[error("The internal standard {0} is not among the fitted phases")]
    MissingStandard(String),
    #[error("The internal standard's coefficient is {0}, it must be positive to calibrate against")]
    NonPositiveStandard(f64),
    #[error("The fitted phases sum to zero, they cannot be normalized")]
    ZeroTotal,
}

/// The concentration of a single phase
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseConcentration {
    pub phase_id: String,
    pub phase_name: String,
    pub rir: f64,
    pub coefficient: f64,
    /// Weight percent
    pub phase_percent: f64,
}

/// The summed concentration of all phases sharing a name
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GroupedConcentration {
    pub phase_name: String,
    pub phase_percent: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ConcentrationCalculator<'a> {
    library: &'a ReferenceLibrary,
    std: Option<&'a str>,
    std_conc: Option<f64>,
}

impl<'a> ConcentrationCalculator<'a> {
    /// Without a standard the RIRs are used as given, which only changes the
    /// normalization constant.
    pub fn new(library: &'a ReferenceLibrary, std: Option<&'a str>, std_conc: Option<f64>) -> Self {
        Self {
            library,
            std,
            std_conc,
        }
    }

    fn std_rir(&self) -> Result<f64, ConcentrationError> {
        match self.std {
            Some(std) => self
                .library
                .rir_of(std)
                .ok_or_else(|| ConcentrationError::UnknownPhase(std.to_string())),
            None => Ok(1.0),
        }
    }

    /// The weight percent of every phase in `phase_ids` given its coefficient
    pub fn compute<S: AsRef<str>>(
        &self,
        phase_ids: &[S],
        coefficients: &[f64],
    ) -> Result<Vec<PhaseConcentration>, ConcentrationError> {
        let std_rir = self.std_rir()?;
        let mut phases = phase_ids
            .iter()
            .zip(coefficients.iter())
            .map(|(id, c)| {
                let id = id.as_ref();
                let info = self
                    .library
                    .phase(id)
                    .ok_or_else(|| ConcentrationError::UnknownPhase(id.to_string()))?;
                Ok(PhaseConcentration {
                    phase_id: info.phase_id.clone(),
                    phase_name: info.phase_name.clone(),
                    rir: info.rir,
                    coefficient: *c,
                    phase_percent: c * std_rir / info.rir,
                })
            })
            .collect::<Result<Vec<_>, ConcentrationError>>()?;

        let scale = match (self.std, self.std_conc) {
            (Some(std), Some(std_conc)) => {
                let coef = phases
                    .iter()
                    .find(|p| p.phase_id == std)
                    .map(|p| p.coefficient)
                    .ok_or_else(|| ConcentrationError::MissingStandard(std.to_string()))?;
                if !(coef > 0.0) {
                    return Err(ConcentrationError::NonPositiveStandard(coef));
                }
                std_conc / coef
            }
            _ => {
                let total: f64 = phases.iter().map(|p| p.phase_percent).sum();
                if total == 0.0 || !total.is_finite() {
                    return Err(ConcentrationError::ZeroTotal);
                }
                100.0 / total
            }
        };
        for p in phases.iter_mut() {
            p.phase_percent *= scale;
        }
        Ok(phases)
    }
}

/// Sum concentrations by phase name, in order of first appearance
pub fn group(phases: &[PhaseConcentration]) -> Vec<GroupedConcentration> {
    let mut groups: Vec<GroupedConcentration> = Vec::new();
    for p in phases {
        match groups.iter_mut().find(|g| g.phase_name == p.phase_name) {
            Some(g) => g.phase_percent += p.phase_percent,
            None => groups.push(GroupedConcentration {
                phase_name: p.phase_name.clone(),
                phase_percent: p.phase_percent,
            }),
        }
    }
    groups
}

/// Drop the internal standard and express the remaining phases on a standard-free basis,
/// scaling them by $`100 / (100 - w_s)`$.
pub fn omit_standard(
    phases: Vec<PhaseConcentration>,
    std: &str,
    std_conc: f64,
) -> Vec<PhaseConcentration> {
    let scale = 100.0 / (100.0 - std_conc);
    phases
        .into_iter()
        .filter(|p| p.phase_id != std)
        .map(|mut p| {
            p.phase_percent *= scale;
            p
        })
        .collect()
}
