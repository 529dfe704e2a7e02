//! The immutable output of a full pattern fit.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::align::Alignment;
use crate::concentration::{GroupedConcentration, PhaseConcentration};
use crate::config::FpsConfig;
use crate::solver::SolveReport;

/// Everything a full pattern fit produces.
///
/// `tth`, `measured`, `fitted`, `residuals` and each weighted pure pattern share one axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    pub(crate) tth: Vec<f64>,
    pub(crate) measured: Vec<f64>,
    pub(crate) fitted: Vec<f64>,
    pub(crate) residuals: Vec<f64>,
    pub(crate) phases: Vec<PhaseConcentration>,
    pub(crate) phases_grouped: Vec<GroupedConcentration>,
    pub(crate) rwp: f64,
    pub(crate) weighted_pure_patterns: Vec<(String, Vec<f64>)>,
    pub(crate) coefficients: Vec<(String, f64)>,
    pub(crate) alignment: Option<Alignment>,
    pub(crate) phase_shifts: Vec<(String, f64)>,
    pub(crate) diagnostics: Vec<SolveReport>,
    pub(crate) clamped: Vec<String>,
    pub(crate) inputs: FpsConfig,
}

impl FitResult {
    pub fn tth(&self) -> &[f64] {
        &self.tth
    }

    pub fn measured(&self) -> &[f64] {
        &self.measured
    }

    pub fn fitted(&self) -> &[f64] {
        &self.fitted
    }

    /// `measured - fitted`
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Weight percent of each retained phase
    pub fn phases(&self) -> &[PhaseConcentration] {
        &self.phases
    }

    /// Weight percent summed by phase name
    pub fn phases_grouped(&self) -> &[GroupedConcentration] {
        &self.phases_grouped
    }

    pub fn rwp(&self) -> f64 {
        self.rwp
    }

    pub fn weighted_pure_patterns(&self) -> &[(String, Vec<f64>)] {
        &self.weighted_pure_patterns
    }

    pub fn coefficients(&self) -> &[(String, f64)] {
        &self.coefficients
    }

    /// The alignment against the internal standard, if one was performed
    pub fn alignment(&self) -> Option<&Alignment> {
        self.alignment.as_ref()
    }

    /// The shift applied to each phase by the shift grid search
    pub fn phase_shifts(&self) -> &[(String, f64)] {
        &self.phase_shifts
    }

    /// One report per solve, in the order the solves ran
    pub fn diagnostics(&self) -> &[SolveReport] {
        &self.diagnostics
    }

    /// Whether every solve reported convergence
    pub fn converged(&self) -> bool {
        self.diagnostics.iter().all(|d| d.converged)
    }

    /// Phases whose negative coefficients were set to zero before computing concentrations
    pub fn clamped(&self) -> &[String] {
        &self.clamped
    }

    /// The configuration the fit ran with
    pub fn inputs(&self) -> &FpsConfig {
        &self.inputs
    }

    pub fn coefficient(&self, phase_id: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|(id, _)| id == phase_id)
            .map(|(_, c)| *c)
    }

    pub fn phase_percent(&self, phase_id: &str) -> Option<f64> {
        self.phases
            .iter()
            .find(|p| p.phase_id == phase_id)
            .map(|p| p.phase_percent)
    }

    pub fn grouped_percent(&self, phase_name: &str) -> Option<f64> {
        self.phases_grouped
            .iter()
            .find(|p| p.phase_name == phase_name)
            .map(|p| p.phase_percent)
    }
}
