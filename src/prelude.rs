pub use crate::align::{AlignMode, Alignment};
pub use crate::config::FpsConfig;
pub use crate::fps::{afps, fps, FpsError};
pub use crate::library::{PhaseInfo, ReferenceLibrary};
pub use crate::objective::Objective;
pub use crate::result::FitResult;
pub use crate::sample::Sample;
pub use crate::solver::Solver;
