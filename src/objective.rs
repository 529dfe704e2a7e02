//! Goodness-of-fit measures minimized by the fitting stages.
//!
//! Each objective compares the measured counts $`y`$ with the fitted pattern
//! $`\hat{y} = Xc`$ where the columns of $`X`$ are reference patterns:
//!
//! - `Delta`: $`\sum (y_i - \hat{y}_i)^2`$
//! - `R`: $`\sqrt{\sum (y_i - \hat{y}_i)^2 / \sum y_i^2}`$
//! - `Rwp`: $`\sqrt{\sum w_i (y_i - \hat{y}_i)^2 / \sum w_i y_i^2}`$ with $`w_i = 1/y_i`$
use std::fmt::Display;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Objective {
    /// Sum of squared residuals
    Delta,
    /// Residual norm relative to the measured pattern norm
    R,
    /// Weighted profile residual, weights are the inverse measured counts
    #[default]
    Rwp,
}

impl FromStr for Objective {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delta" => Ok(Self::Delta),
            "r" => Ok(Self::R),
            "rwp" => Ok(Self::Rwp),
            _ => Err(ConfigError::UnknownObjective(s.to_string())),
        }
    }
}

impl Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Objective::Delta => "Delta",
            Objective::R => "R",
            Objective::Rwp => "Rwp",
        };
        f.write_str(name)
    }
}

impl Objective {
    /// Compute the objective for a fitted pattern against the measured counts
    pub fn evaluate(&self, observed: &[f64], fitted: &[f64]) -> f64 {
        match self {
            Objective::Delta => observed
                .iter()
                .zip(fitted.iter())
                .map(|(y, yhat)| (y - yhat).powi(2))
                .sum(),
            Objective::R => {
                let (num, den) = observed.iter().zip(fitted.iter()).fold(
                    (0.0, 0.0),
                    |(num, den), (y, yhat)| (num + (y - yhat).powi(2), den + y * y),
                );
                (num / den).sqrt()
            }
            Objective::Rwp => rwp(observed, fitted),
        }
    }

    /// The gradient of [`Objective::evaluate`] with respect to the mixing coefficients
    /// of `columns`, given the current `fitted` pattern.
    pub fn gradient(&self, columns: &[Vec<f64>], observed: &[f64], fitted: &[f64]) -> Vec<f64> {
        let residuals: Vec<f64> = observed
            .iter()
            .zip(fitted.iter())
            .map(|(y, yhat)| y - yhat)
            .collect();

        match self {
            Objective::Delta => columns
                .iter()
                .map(|col| -2.0 * dot(col, &residuals))
                .collect(),
            Objective::R => {
                let value = self.evaluate(observed, fitted);
                let den: f64 = observed.iter().map(|y| y * y).sum();
                if value == 0.0 || den == 0.0 {
                    return vec![0.0; columns.len()];
                }
                columns
                    .iter()
                    .map(|col| -dot(col, &residuals) / (value * den))
                    .collect()
            }
            Objective::Rwp => {
                let value = rwp(observed, fitted);
                let den: f64 = observed.iter().sum();
                if value == 0.0 || den == 0.0 {
                    return vec![0.0; columns.len()];
                }
                let weighted: Vec<f64> = residuals
                    .iter()
                    .zip(observed.iter())
                    .map(|(r, y)| r / y)
                    .collect();
                columns
                    .iter()
                    .map(|col| -dot(col, &weighted) / (value * den))
                    .collect()
            }
        }
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Weighted profile residual with weights $`1/y_i`$
pub fn rwp(observed: &[f64], fitted: &[f64]) -> f64 {
    let (num, den) = observed
        .iter()
        .zip(fitted.iter())
        .fold((0.0, 0.0), |(num, den), (y, yhat)| {
            (num + (y - yhat).powi(2) / y, den + y)
        });
    (num / den).sqrt()
}
