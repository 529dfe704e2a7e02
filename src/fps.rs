//! The full pattern summation pipelines.
//!
//! [`afps`] is the automated pipeline:
//!
//! 1. Align the sample to the internal standard
//! 2. Put the library and sample on one grid and crop to the fitting window
//! 3. Drop phases the non-negative least squares solution gives no weight
//! 4. Fit, then remove negative phases and refit until none remain
//! 5. Refine per-phase shifts, refit from scratch and prune again
//! 6. Remove phases below their detection limit, then amorphous phases below theirs
//! 7. A final pass of negative pruning, then convert coefficients to concentrations
//!
//! [`fps`] is the manual pipeline, which fits every requested phase, optionally
//! refines shifts and removes only negative or trace phases.
#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use thiserror::Error;

use crate::align::{AlignMode, Alignment, AlignmentEngine};
use crate::concentration::{group, omit_standard, ConcentrationCalculator, ConcentrationError};
use crate::config::{ConfigError, FpsConfig};
use crate::fitter::ConstrainedFitter;
use crate::interpolate::{conform, harmonise, Harmonised, HarmoniseError};
use crate::library::{LibraryError, ReferenceLibrary};
use crate::lod::{prune_amorphous, DetectionLimitEstimator};
use crate::objective;
use crate::prune::PruningLoop;
use crate::result::FitResult;
use crate::sample::{Sample, SampleError};
use crate::shift::ShiftGridSearch;
use crate::solver::{SolveReport, SolverError};
use crate::state::FitState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FpsError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Harmonise(#[from] HarmoniseError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Concentration(#[from] ConcentrationError),
}

/// The pipeline's private working copies after alignment and harmonisation
struct Prepared {
    library: ReferenceLibrary,
    alignment: Option<Alignment>,
    /// On the fitting grid, before cropping to the fitting window
    harmonised: Harmonised,
    state: FitState,
}

/// The sample aligned to the internal standard
struct Aligned {
    sample: Sample,
    alignment: Option<Alignment>,
}

fn align_sample(library: &ReferenceLibrary, sample: &Sample, config: &FpsConfig) -> Aligned {
    let reference = config
        .std
        .as_deref()
        .and_then(|std| library.column(std));
    match (reference, config.align) {
        (Some(reference), mode) => {
            let engine = AlignmentEngine::new(library.tth(), reference, config.tth_align);
            let alignment = engine.align(sample, mode);
            Aligned {
                sample: sample.realigned(alignment.shift),
                alignment: Some(alignment),
            }
        }
        (None, AlignMode::Manual { shift }) => Aligned {
            sample: sample.realigned(shift),
            alignment: None,
        },
        (None, AlignMode::Auto { .. }) => {
            log::debug!("No internal standard, skipping alignment");
            Aligned {
                sample: sample.clone(),
                alignment: None,
            }
        }
    }
}

fn prepare(
    library: &ReferenceLibrary,
    sample: &Sample,
    config: &FpsConfig,
) -> Result<Prepared, FpsError> {
    config.validate(library)?;

    let library = match config.refs.as_deref() {
        Some(refs) => {
            let always: Vec<&str> = config
                .force
                .iter()
                .map(String::as_str)
                .chain(config.std.as_deref())
                .collect();
            library.subset(refs, &always)?
        }
        None => library.clone(),
    };
    log::debug!("Fitting with {} reference patterns", library.len());

    let Aligned { sample, alignment } = align_sample(&library, sample, config);

    let harmonised = if config.harmonise {
        harmonise(&library, &sample)?
    } else {
        conform(&library, &sample)?
    };

    let mut state = FitState::new(harmonised.clone());
    if let Some((lo, hi)) = config.tth_fps {
        state.crop(lo, hi);
    }
    if state.is_empty() {
        return Err(SolverError::EmptyProblem.into());
    }

    Ok(Prepared {
        library,
        alignment,
        harmonised,
        state,
    })
}

/// Set any remaining negative coefficients to zero, returning the affected phases
fn clamp_negative(state: &mut FitState) -> Vec<String> {
    let clamped: Vec<String> = state
        .iter_coefficients()
        .filter(|(_, c)| *c < 0.0)
        .map(|(id, _)| id.to_string())
        .collect();
    if !clamped.is_empty() {
        log::warn!("Clamping the negative coefficients of {clamped:?} to zero");
        let coefficients = state.coefficients().iter().map(|c| c.max(0.0)).collect();
        state.set_coefficients(coefficients);
    }
    clamped
}

fn finish(
    prepared: Prepared,
    config: &FpsConfig,
    phase_shifts: Vec<(String, f64)>,
    diagnostics: Vec<SolveReport>,
) -> Result<FitResult, FpsError> {
    let Prepared {
        library,
        alignment,
        mut state,
        ..
    } = prepared;

    let clamped = clamp_negative(&mut state);

    let calculator =
        ConcentrationCalculator::new(&library, config.std.as_deref(), config.std_conc);
    let mut phases = calculator.compute(state.phase_ids(), state.coefficients())?;
    if config.omit_std {
        if let (Some(std), Some(std_conc)) = (config.std.as_deref(), config.std_conc) {
            phases = omit_standard(phases, std, std_conc);
        }
    }
    let phases_grouped = group(&phases);

    let fitted = state.fitted();
    let measured = state.observed().to_vec();
    let residuals = measured.iter().zip(fitted.iter()).map(|(y, f)| y - f).collect();
    let rwp = objective::rwp(&measured, &fitted);
    log::info!("Fit {} phases with Rwp {rwp:0.4}", state.n_phases());

    Ok(FitResult {
        tth: state.tth().to_vec(),
        rwp,
        residuals,
        fitted,
        measured,
        phases,
        phases_grouped,
        weighted_pure_patterns: state.weighted_patterns(),
        coefficients: state
            .iter_coefficients()
            .map(|(id, c)| (id.to_string(), c))
            .collect(),
        alignment,
        phase_shifts,
        diagnostics,
        clamped,
        inputs: config.clone(),
    })
}

/// Automated full pattern summation of `sample` against `library`.
///
/// Neither input is modified; the pipeline works on its own copies.
pub fn afps(
    library: &ReferenceLibrary,
    sample: &Sample,
    config: &FpsConfig,
) -> Result<FitResult, FpsError> {
    let mut prepared = prepare(library, sample, config)?;
    let fitter = ConstrainedFitter::new(config.solver, config.objective, config.max_iter);
    let protected = config.protected();
    let pruner = PruningLoop::new(&protected);
    let mut diagnostics = Vec::new();
    let state = &mut prepared.state;

    let prefiltered = fitter.prefilter(state, &protected)?;
    diagnostics.push(prefiltered.report);
    diagnostics.push(fitter.fit(state, "fit")?);
    diagnostics.extend(pruner.run(state, &fitter, "prune")?.reports);

    let mut phase_shifts = Vec::new();
    if config.shift > 0.0 {
        let outcome = ShiftGridSearch::new(
            &prepared.harmonised,
            config.shift,
            config.shift_res,
            config.objective,
        )
        .run(state);
        phase_shifts = outcome.shifts;
        diagnostics.push(fitter.fit(state, "shift")?);
        diagnostics.extend(pruner.run(state, &fitter, "shift prune")?.reports);
    }

    let calculator =
        ConcentrationCalculator::new(&prepared.library, config.std.as_deref(), config.std_conc);
    if let Some(std) = config.std.as_deref() {
        if config.lod > 0.0 {
            let outcome = DetectionLimitEstimator::new(&prepared.library, std, config.lod)
                .run(state, &fitter, &calculator, &protected)?;
            diagnostics.extend(outcome.report);
        }
    }
    if !config.amorphous.is_empty() {
        let outcome = prune_amorphous(
            state,
            &fitter,
            &calculator,
            &protected,
            &config.amorphous,
            config.amorphous_lod,
        )?;
        diagnostics.extend(outcome.report);
    }
    diagnostics.extend(pruner.run(state, &fitter, "final prune")?.reports);

    finish(prepared, config, phase_shifts, diagnostics)
}

/// Manual full pattern summation: fit every requested phase, optionally refine
/// per-phase shifts, then remove phases with coefficients below `remove_trace`.
pub fn fps(
    library: &ReferenceLibrary,
    sample: &Sample,
    config: &FpsConfig,
) -> Result<FitResult, FpsError> {
    let mut prepared = prepare(library, sample, config)?;
    let fitter = ConstrainedFitter::new(config.solver, config.objective, config.max_iter);
    let protected = config.protected();
    let mut diagnostics = Vec::new();
    let state = &mut prepared.state;

    diagnostics.push(fitter.fit(state, "fit")?);

    let mut phase_shifts = Vec::new();
    if config.shift > 0.0 {
        let outcome = ShiftGridSearch::new(
            &prepared.harmonised,
            config.shift,
            config.shift_res,
            config.objective,
        )
        .run(state);
        phase_shifts = outcome.shifts;
        diagnostics.push(fitter.fit(state, "shift")?);
    }

    let outcome = PruningLoop::new(&protected)
        .with_threshold(config.remove_trace)
        .run(state, &fitter, "prune")?;
    diagnostics.extend(outcome.reports);

    finish(prepared, config, phase_shifts, diagnostics)
}

/// Run [`afps`] on every sample in `samples` against the same library
pub fn afps_batch(
    library: &ReferenceLibrary,
    samples: &[Sample],
    config: &FpsConfig,
) -> Vec<Result<FitResult, FpsError>> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "parallelism")] {
            samples.par_iter().map(|s| afps(library, s, config)).collect()
        } else {
            samples.iter().map(|s| afps(library, s, config)).collect()
        }
    }
}
