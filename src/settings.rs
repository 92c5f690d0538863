//! Explicit configuration values passed into solve and expansion routines.
use serde::{Deserialize, Serialize};

/// Dense factorization used when solving pencil-sized linear systems.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factorization {
    /// LU factorization with partial (row) pivoting.
    PartialPivotLu,
    /// LU factorization with full pivoting. Slower, but more robust for badly scaled tau systems.
    FullPivotLu,
}

/// Settings for linear solves.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub factorization: Factorization,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            factorization: Factorization::PartialPivotLu,
        }
    }
}

/// Settings for expanding non-constant coefficients into multiplication matrices.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NccSettings {
    /// Coefficients with magnitude at or below the cutoff are dropped.
    pub cutoff: f64,
    /// Upper bound on the number of retained terms.
    pub max_terms: Option<usize>,
}

impl Default for NccSettings {
    fn default() -> Self {
        Self {
            cutoff: 1e-10,
            max_terms: None,
        }
    }
}
