//! Dense factorizations selected through [`SolverSettings`].
use crate::error::{Error, Result};
use crate::settings::{Factorization, SolverSettings};
use crate::Complex64;
use nalgebra::linalg::{FullPivLU, LU};
use nalgebra::{DMatrix, DVector, Dyn};

/// A factorized square matrix, reusable for several right-hand sides.
#[derive(Debug)]
pub enum DenseFactorization {
    PartialPivot(LU<Complex64, Dyn, Dyn>),
    FullPivot(FullPivLU<Complex64, Dyn, Dyn>),
}

impl DenseFactorization {
    pub fn new(matrix: DMatrix<Complex64>, settings: &SolverSettings) -> Result<Self> {
        if !matrix.is_square() {
            return Err(Error::Solve(format!(
                "Expected square matrix, got {} x {}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(match settings.factorization {
            Factorization::PartialPivotLu => Self::PartialPivot(matrix.lu()),
            Factorization::FullPivotLu => Self::FullPivot(matrix.full_piv_lu()),
        })
    }

    pub fn solve(&self, rhs: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        let solution = match self {
            Self::PartialPivot(lu) => lu.solve(rhs),
            Self::FullPivot(lu) => lu.solve(rhs),
        };
        solution.ok_or_else(|| Error::Solve("Matrix is singular".to_string()))
    }
}
