//! Spectral bases along a single axis.
//!
//! A [`Basis`] provides everything the core needs from a one-dimensional spectral
//! discretization: grids and transforms, the entry formulas of subspace operators, and the
//! sparse matrices used to assemble pencil systems. Two reference bases are provided,
//! [`Fourier`] for periodic directions and [`Chebyshev`] for bounded ones.
use crate::settings::NccSettings;
use crate::Complex64;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

mod chebyshev;
mod fourier;

pub use chebyshev::Chebyshev;
pub use fourier::Fourier;

/// The family a basis belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BasisFamily {
    Fourier,
    Chebyshev,
}

/// Identifying data of a basis. Two bases are considered equal if their descriptors agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasisDescriptor {
    pub family: BasisFamily,
    pub name: String,
    pub size: usize,
    pub interval: (OrderedFloat<f64>, OrderedFloat<f64>),
}

/// Position for interpolation along an axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Position {
    Left,
    Center,
    Right,
    Value(f64),
}

impl Position {
    /// The coordinate of the position on the interval `[a, b]`.
    pub fn coordinate(&self, (a, b): (f64, f64)) -> f64 {
        match *self {
            Position::Left => a,
            Position::Center => 0.5 * (a + b),
            Position::Right => b,
            Position::Value(x) => x,
        }
    }
}

/// Linear operators acting within the coefficient space of a single basis.
#[derive(Debug, Clone)]
pub enum BasisOperator {
    Differentiate,
    HilbertTransform,
    Interpolate(Position),
    Integrate,
    /// Select a single coefficient mode.
    Filter(usize),
    /// Change to the given basis on the same axis.
    Convert(Arc<dyn Basis>),
}

impl BasisOperator {
    /// Functionals produce a single output coefficient, i.e. a constant along the axis.
    pub fn is_functional(&self) -> bool {
        matches!(
            self,
            BasisOperator::Interpolate(_) | BasisOperator::Integrate | BasisOperator::Filter(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BasisOperator::Differentiate => "d",
            BasisOperator::HilbertTransform => "H",
            BasisOperator::Interpolate(_) => "interp",
            BasisOperator::Integrate => "integ",
            BasisOperator::Filter(_) => "filter",
            BasisOperator::Convert(_) => "convert",
        }
    }
}

impl PartialEq for BasisOperator {
    fn eq(&self, other: &Self) -> bool {
        use BasisOperator::*;
        match (self, other) {
            (Differentiate, Differentiate) | (HilbertTransform, HilbertTransform) | (Integrate, Integrate) => true,
            (Interpolate(p), Interpolate(q)) => p == q,
            (Filter(m), Filter(n)) => m == n,
            (Convert(a), Convert(b)) => a.descriptor() == b.descriptor(),
            _ => false,
        }
    }
}

impl Hash for BasisOperator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
        match self {
            BasisOperator::Interpolate(position) => match *position {
                Position::Left => 0u8.hash(state),
                Position::Center => 1u8.hash(state),
                Position::Right => 2u8.hash(state),
                Position::Value(x) => OrderedFloat(x).hash(state),
            },
            BasisOperator::Filter(mode) => mode.hash(state),
            BasisOperator::Convert(basis) => basis.descriptor().hash(state),
            _ => {}
        }
    }
}

/// Result of expanding a non-constant coefficient into a multiplication matrix.
#[derive(Debug, Clone)]
pub struct NccExpansion {
    pub n_terms: usize,
    pub max_term: usize,
    pub matrix: CsrMatrix<Complex64>,
}

/// A one-dimensional spectral basis.
///
/// Coefficients are indexed `0 .. coeff_size()`. The data of every axis is stored as
/// complex numbers, even for bases with real coefficients.
pub trait Basis: Debug + Send + Sync {
    fn descriptor(&self) -> BasisDescriptor;

    fn name(&self) -> &str;

    fn coeff_size(&self) -> usize;

    fn grid_size(&self, scale: f64) -> usize {
        ((self.coeff_size() as f64 * scale).round() as usize).max(1)
    }

    fn interval(&self) -> (f64, f64);

    /// Length of the physical interval.
    fn problem_length(&self) -> f64 {
        let (a, b) = self.interval();
        b - a
    }

    /// Grid value of a field whose only non-zero coefficient is a unit constant mode.
    fn constant_amplitude(&self) -> f64 {
        1.0
    }

    /// Whether operators of this basis act diagonally on coefficient modes,
    /// so that the axis can be distributed across processes while applying them.
    fn separable(&self) -> bool;

    fn complex_coefficients(&self) -> bool;

    /// Physical grid coordinates at the given dealiasing scale.
    fn grid(&self, scale: f64) -> Vec<f64>;

    /// Matrix mapping coefficients to grid values at the given scale.
    fn forward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>>;

    /// Matrix mapping grid values at the given scale to coefficients.
    fn backward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>>;

    /// Transverse differentiation constant for the given global coefficient index.
    ///
    /// Only defined for separable bases.
    fn trans_diff(&self, index: usize) -> Option<Complex64>;

    /// Band offsets `j - i` of the non-zero entries of the subspace matrix of `op`,
    /// or `None` if the basis does not support the operator.
    ///
    /// Functionals query every column, so they only need to report support.
    fn operator_bands(&self, op: &BasisOperator) -> Option<Vec<isize>>;

    /// Entry `(i, j)` of the subspace matrix of a non-functional operator.
    fn operator_entry(&self, op: &BasisOperator, i: usize, j: usize) -> Complex64;

    /// Entry `j` of the single row of a functional.
    fn functional_entry(&self, op: &BasisOperator, j: usize) -> Complex64;

    /// Number of output coefficients of `op`.
    fn output_size(&self, op: &BasisOperator) -> usize {
        match op {
            BasisOperator::Convert(output) => output.coeff_size(),
            op if op.is_functional() => 1,
            _ => self.coeff_size(),
        }
    }

    /// Preconditioning matrix applied to pencil equations.
    fn pre(&self) -> CsrMatrix<Complex64>;

    /// Differentiation matrix in coefficient space.
    fn diff(&self) -> CsrMatrix<Complex64>;

    /// Multiplication by the `p`-th power of the basis coordinate (or mode, for periodic bases).
    fn mult(&self, p: usize) -> CsrMatrix<Complex64>;

    /// Boundary row evaluating the left endpoint.
    fn left(&self) -> CsrMatrix<Complex64>;

    /// Boundary row evaluating the right endpoint.
    fn right(&self) -> CsrMatrix<Complex64>;

    /// Boundary row evaluating the integral over the interval.
    fn int(&self) -> CsrMatrix<Complex64>;

    /// Matching rows between subintervals, if the basis has any.
    fn match_rows(&self) -> Option<CsrMatrix<Complex64>> {
        None
    }

    /// Column vector selecting the rows that carry boundary data.
    fn bc_vector(&self) -> DVector<Complex64>;

    /// Multiplication matrix by a non-constant coefficient with the given coefficients.
    fn ncc_matrix(&self, coeffs: &[Complex64], settings: &NccSettings) -> NccExpansion;
}

impl PartialEq for dyn Basis {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor() == other.descriptor()
    }
}

/// Returns `true` if two optional bases are the same.
pub fn same_basis(a: Option<&Arc<dyn Basis>>, b: Option<&Arc<dyn Basis>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.descriptor() == b.descriptor(),
        _ => false,
    }
}

/// Transform matrices per scale, shared between threads.
#[derive(Debug, Default)]
struct TransformCache {
    matrices: Mutex<FxHashMap<u64, (Arc<DMatrix<Complex64>>, Arc<DMatrix<Complex64>>)>>,
}

impl TransformCache {
    fn get_or_build(
        &self,
        scale: f64,
        build: impl FnOnce() -> (DMatrix<Complex64>, DMatrix<Complex64>),
    ) -> (Arc<DMatrix<Complex64>>, Arc<DMatrix<Complex64>>) {
        let mut matrices = self.matrices.lock();
        let (forward, backward) = matrices.entry(scale.to_bits()).or_insert_with(|| {
            let (forward, backward) = build();
            (Arc::new(forward), Arc::new(backward))
        });
        (forward.clone(), backward.clone())
    }
}

fn real(x: f64) -> Complex64 {
    Complex64::new(x, 0.0)
}

/// Select terms of an NCC expansion: coefficients above the cutoff, ordered by `order_key`,
/// truncated to the maximum number of terms.
fn select_ncc_terms(coeffs: &[Complex64], settings: &NccSettings, order_key: impl Fn(usize) -> usize) -> Vec<usize> {
    let mut terms: Vec<usize> = (0..coeffs.len())
        .filter(|&n| coeffs[n].norm() > settings.cutoff)
        .collect();
    terms.sort_by_key(|&n| (order_key(n), n));
    if let Some(max_terms) = settings.max_terms {
        terms.truncate(max_terms);
    }
    terms
}
