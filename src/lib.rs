//! `fullpat` quantifies the mineral phases in an X-ray powder diffraction pattern by
//! full pattern summation: the measured pattern is modeled as a non-negative weighted
//! sum of pure reference patterns, and the weights are converted to weight percent
//! concentrations using each phase's reference intensity ratio.
//!
//! The automated pipeline, [`afps`], aligns the sample to an internal standard, puts
//! the library and sample on one angular grid, fits, and then iteratively removes
//! phases that are negative, below their detection limit or amorphous and below
//! threshold, refining per-phase peak shifts along the way. The manual pipeline,
//! [`fps`], fits the requested phases and only removes negative or trace ones.
//!
//! Both are configured with [`FpsConfig`] and return a [`FitResult`].
//!
//! # Usage
//! ```
//! use fullpat::{afps, FpsConfig, PhaseInfo, ReferenceLibrary, Sample};
//!
//! let tth: Vec<f64> = (0..=500).map(|i| 10.0 + i as f64 * 0.1).collect();
//! let peak = |c: f64, x: f64| 10.0 + 500.0 * (-0.5 * ((x - c) / 0.1f64).powi(2)).exp();
//! let a: Vec<f64> = tth.iter().map(|x| peak(26.6, *x) + peak(50.1, *x)).collect();
//! let b: Vec<f64> = tth.iter().map(|x| peak(29.4, *x) + peak(39.4, *x)).collect();
//!
//! let library = ReferenceLibrary::new(
//!     tth.clone(),
//!     vec![("QUA".to_string(), a.clone()), ("CAL".to_string(), b.clone())],
//!     vec![
//!         PhaseInfo::new("QUA", "Quartz", 1.0),
//!         PhaseInfo::new("CAL", "Calcite", 1.0),
//!     ],
//! )
//! .unwrap();
//! let counts: Vec<f64> = a.iter().zip(b.iter()).map(|(a, b)| 0.25 * a + 0.75 * b).collect();
//! let sample = Sample::new(tth, counts).unwrap();
//!
//! let config = FpsConfig::default().std("QUA").shift(0.0);
//! let result = afps(&library, &sample, &config).unwrap();
//! let quartz = result.grouped_percent("Quartz").unwrap();
//! assert!((quartz - 25.0).abs() < 1.0);
//! ```
pub mod align;
pub mod arrayops;
pub mod concentration;
pub mod config;
pub mod fitter;
pub mod fps;
pub mod interpolate;
pub mod library;
pub mod lod;
pub mod objective;
pub mod prelude;
pub mod prune;
pub mod result;
pub mod sample;
pub mod search;
pub mod shift;
pub mod solver;
pub mod state;
pub mod text;

#[cfg(test)]
mod test_data;

pub use crate::align::{AlignMode, Alignment, AlignmentEngine};
pub use crate::concentration::{GroupedConcentration, PhaseConcentration};
pub use crate::config::{ConfigError, FpsConfig};
pub use crate::fps::{afps, afps_batch, fps, FpsError};
pub use crate::library::{LibraryError, PhaseInfo, ReferenceLibrary};
pub use crate::objective::Objective;
pub use crate::result::FitResult;
pub use crate::sample::{Sample, SampleError};
pub use crate::solver::{SolveReport, Solver};
