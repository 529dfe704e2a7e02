//! Reference libraries of pure phase patterns measured on a shared angular axis.
use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

use crate::arrayops::is_increasing;

/// All the ways a reference library can be malformed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LibraryError {
    #[error("The library contains no phases")]
    Empty,
    #[error("The angular axis must be strictly increasing")]
    AxisNotIncreasing,
    #[error("Phase {phase_id} has {found} intensity values but the axis has {expected}")]
    LengthMismatch {
        phase_id: String,
        expected: usize,
        found: usize,
    },
    #[error("Phase {0} is listed in the phase table but has no intensity column")]
    MissingColumn(String),
    #[error("Intensity column {0} has no entry in the phase table")]
    UnknownColumn(String),
    #[error("Phase {0} is listed more than once")]
    DuplicatePhase(String),
    #[error("Phase {phase_id} has a non-positive reference intensity ratio {rir}")]
    InvalidRir { phase_id: String, rir: f64 },
    #[error("No phase in the library matches {0}")]
    NoSuchPhase(String),
}

/// Metadata describing a single reference pattern
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseInfo {
    /// Unique identifier of the reference pattern
    pub phase_id: String,
    /// Mineral name, shared by every pattern of the same mineral
    pub phase_name: String,
    /// Reference intensity ratio relative to the calibration mineral
    pub rir: f64,
}

impl PhaseInfo {
    pub fn new(phase_id: impl Into<String>, phase_name: impl Into<String>, rir: f64) -> Self {
        Self {
            phase_id: phase_id.into(),
            phase_name: phase_name.into(),
            rir,
        }
    }
}

/// A set of pure reference patterns sharing one angular axis.
///
/// Columns are stored in the same order as [`ReferenceLibrary::phases`], so
/// `xrd[i]` is always the pattern of `phases[i]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceLibrary {
    tth: Vec<f64>,
    xrd: Vec<Vec<f64>>,
    phases: Vec<PhaseInfo>,
}

impl ReferenceLibrary {
    /// Build a library from an axis, a set of named intensity columns and a phase table.
    ///
    /// Every phase in `phases` must have exactly one column in `columns` and
    /// vice versa. The stored column order follows `phases`.
    pub fn new(
        tth: Vec<f64>,
        columns: Vec<(String, Vec<f64>)>,
        phases: Vec<PhaseInfo>,
    ) -> Result<Self, LibraryError> {
        if phases.is_empty() {
            return Err(LibraryError::Empty);
        }
        if !is_increasing(&tth) {
            return Err(LibraryError::AxisNotIncreasing);
        }

        let mut seen = HashSet::new();
        for phase in phases.iter() {
            if !seen.insert(phase.phase_id.as_str()) {
                return Err(LibraryError::DuplicatePhase(phase.phase_id.clone()));
            }
            if !(phase.rir > 0.0) || !phase.rir.is_finite() {
                return Err(LibraryError::InvalidRir {
                    phase_id: phase.phase_id.clone(),
                    rir: phase.rir,
                });
            }
        }

        let mut by_id: HashMap<String, Vec<f64>> = HashMap::with_capacity(columns.len());
        for (phase_id, values) in columns {
            if !seen.contains(phase_id.as_str()) {
                return Err(LibraryError::UnknownColumn(phase_id));
            }
            if values.len() != tth.len() {
                return Err(LibraryError::LengthMismatch {
                    phase_id,
                    expected: tth.len(),
                    found: values.len(),
                });
            }
            if by_id.insert(phase_id.clone(), values).is_some() {
                return Err(LibraryError::DuplicatePhase(phase_id));
            }
        }

        let mut xrd = Vec::with_capacity(phases.len());
        for phase in phases.iter() {
            match by_id.remove(&phase.phase_id) {
                Some(values) => xrd.push(values),
                None => return Err(LibraryError::MissingColumn(phase.phase_id.clone())),
            }
        }

        Ok(Self { tth, xrd, phases })
    }

    /// Construct a library whose columns are already ordered like `phases`. Used
    /// internally after resampling where the invariants were checked upstream.
    pub(crate) fn from_parts(tth: Vec<f64>, xrd: Vec<Vec<f64>>, phases: Vec<PhaseInfo>) -> Self {
        debug_assert_eq!(xrd.len(), phases.len());
        debug_assert!(xrd.iter().all(|c| c.len() == tth.len()));
        Self { tth, xrd, phases }
    }

    pub fn tth(&self) -> &[f64] {
        &self.tth
    }

    pub fn phases(&self) -> &[PhaseInfo] {
        &self.phases
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.xrd
    }

    /// The number of phases in the library
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn position(&self, phase_id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.phase_id == phase_id)
    }

    pub fn contains(&self, phase_id: &str) -> bool {
        self.position(phase_id).is_some()
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseInfo> {
        self.position(phase_id).map(|i| &self.phases[i])
    }

    pub fn column(&self, phase_id: &str) -> Option<&[f64]> {
        self.position(phase_id).map(|i| self.xrd[i].as_slice())
    }

    pub fn rir_of(&self, phase_id: &str) -> Option<f64> {
        self.phase(phase_id).map(|p| p.rir)
    }

    pub fn phase_ids(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.phase_id.as_str())
    }

    /// Select the phases whose id or name appears in `refs`, plus every id in `always`.
    ///
    /// Each entry of `refs` must match at least one phase.
    pub fn subset<S: AsRef<str>>(&self, refs: &[S], always: &[&str]) -> Result<Self, LibraryError> {
        for r in refs.iter() {
            let r = r.as_ref();
            if !self
                .phases
                .iter()
                .any(|p| p.phase_id == r || p.phase_name == r)
            {
                return Err(LibraryError::NoSuchPhase(r.to_string()));
            }
        }

        let mut xrd = Vec::new();
        let mut phases = Vec::new();
        for (phase, col) in self.phases.iter().zip(self.xrd.iter()) {
            let wanted = refs
                .iter()
                .any(|r| r.as_ref() == phase.phase_id || r.as_ref() == phase.phase_name)
                || always.contains(&phase.phase_id.as_str());
            if wanted {
                phases.push(phase.clone());
                xrd.push(col.clone());
            }
        }
        Ok(Self::from_parts(self.tth.clone(), xrd, phases))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn phases() -> Vec<PhaseInfo> {
        vec![
            PhaseInfo::new("QUA.1", "Quartz", 1.0),
            PhaseInfo::new("KAO.1", "Kaolinite", 0.8),
            PhaseInfo::new("KAO.2", "Kaolinite", 0.7),
        ]
    }

    #[test]
    fn test_columns_follow_phase_table_order() {
        let lib = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![
                ("KAO.2".into(), vec![5.0, 6.0]),
                ("QUA.1".into(), vec![1.0, 2.0]),
                ("KAO.1".into(), vec![3.0, 4.0]),
            ],
            phases(),
        )
        .unwrap();
        assert_eq!(lib.columns()[0], vec![1.0, 2.0]);
        assert_eq!(lib.column("KAO.2").unwrap(), &[5.0, 6.0]);
        assert_eq!(lib.rir_of("KAO.1"), Some(0.8));
    }

    #[test]
    fn test_validation() {
        let err = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![("QUA.1".into(), vec![1.0, 2.0])],
            phases(),
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::MissingColumn(_)));

        let err = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![("QUA.1".into(), vec![1.0])],
            vec![PhaseInfo::new("QUA.1", "Quartz", 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::LengthMismatch { .. }));

        let err = ReferenceLibrary::new(
            vec![2.0, 1.0],
            vec![("QUA.1".into(), vec![1.0, 2.0])],
            vec![PhaseInfo::new("QUA.1", "Quartz", 1.0)],
        )
        .unwrap_err();
        assert_eq!(err, LibraryError::AxisNotIncreasing);

        let err = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![
                ("QUA.1".into(), vec![1.0, 2.0]),
                ("CAL.1".into(), vec![1.0, 2.0]),
            ],
            vec![PhaseInfo::new("QUA.1", "Quartz", 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::UnknownColumn(_)));

        let err = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![("QUA.1".into(), vec![1.0, 2.0])],
            vec![PhaseInfo::new("QUA.1", "Quartz", 0.0)],
        )
        .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidRir { .. }));
    }

    #[test]
    fn test_subset_by_name_and_id() {
        let lib = ReferenceLibrary::new(
            vec![1.0, 2.0],
            vec![
                ("QUA.1".into(), vec![1.0, 2.0]),
                ("KAO.1".into(), vec![3.0, 4.0]),
                ("KAO.2".into(), vec![5.0, 6.0]),
            ],
            phases(),
        )
        .unwrap();
        let sub = lib.subset(&["Kaolinite"], &[]).unwrap();
        assert_eq!(sub.len(), 2);
        let sub = lib.subset(&["KAO.2"], &["QUA.1"]).unwrap();
        assert_eq!(sub.phase_ids().collect::<Vec<_>>(), vec!["QUA.1", "KAO.2"]);
        assert!(lib.subset(&["Calcite"], &[]).is_err());
    }
}
