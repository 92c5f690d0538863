//! Problem interface consumed by pencil assembly.
//!
//! A problem with `size` variables provides small `size x size` coefficient matrices as
//! functions of the transverse differentiation constants of a pencil. The equations of
//! order `i` contribute `Pre·Mult(i) ⊗ M0[i] + Pre·Mult(i)·Diff ⊗ M1[i]` to the mass matrix, and
//! likewise `L0[i]`, `L1[i]` to the stiffness matrix. Boundary coefficient matrices multiply the
//! boundary rows of the basis.
use crate::error::{Error, Result};
use crate::operand::Operand;
use crate::Complex64;
use nalgebra::{DMatrix, DVector};
use rustc_hash::FxHashMap;

/// Coefficient matrix as a function of the transverse differentiation constants.
pub type MatrixFn = Box<dyn Fn(&[Complex64]) -> DMatrix<Complex64>>;

/// Coefficient vector as a function of the transverse differentiation constants.
pub type VectorFn = Box<dyn Fn(&[Complex64]) -> DVector<Complex64>>;

/// The boundary rows of a basis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BoundaryRow {
    Left,
    Right,
    Integral,
}

/// Which pencil matrix a coefficient belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PencilMatrix {
    /// Multiplies the time derivative of the state.
    Mass,
    /// Multiplies the state.
    Stiffness,
}

pub trait PencilProblem {
    /// Number of variables.
    fn size(&self) -> usize;

    /// Number of multiplication orders contributing to the equations.
    fn order(&self) -> usize;

    fn m0(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64>;

    fn m1(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64>;

    fn l0(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64>;

    fn l1(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64>;

    /// Coefficients of the given boundary row in the mass or stiffness matrix.
    fn boundary(&self, matrix: PencilMatrix, row: BoundaryRow, d_trans: &[Complex64]) -> DMatrix<Complex64>;

    /// Boundary right-hand side per variable.
    fn b(&self, d_trans: &[Complex64]) -> DVector<Complex64>;

    /// Nonlinear terms, one per variable, evaluated by the time stepper.
    fn nonlinear(&self) -> &[Operand];

    fn parameters(&self) -> &FxHashMap<String, f64>;
}

/// A problem defined by closures.
pub struct LinearProblem {
    size: usize,
    m0: Vec<MatrixFn>,
    m1: Vec<MatrixFn>,
    l0: Vec<MatrixFn>,
    l1: Vec<MatrixFn>,
    boundary: FxHashMap<(PencilMatrix, BoundaryRow), MatrixFn>,
    b: Option<VectorFn>,
    nonlinear: Vec<Operand>,
    parameters: FxHashMap<String, f64>,
}

impl LinearProblem {
    fn zeros(&self) -> DMatrix<Complex64> {
        DMatrix::zeros(self.size, self.size)
    }

    fn term(&self, terms: &[MatrixFn], order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        terms
            .get(order)
            .map(|f| f(d_trans))
            .unwrap_or_else(|| self.zeros())
    }
}

impl std::fmt::Debug for LinearProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearProblem")
            .field("size", &self.size)
            .field("order", &self.order())
            .field("boundary", &self.boundary.keys().collect::<Vec<_>>())
            .field("nonlinear", &self.nonlinear)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl PencilProblem for LinearProblem {
    fn size(&self) -> usize {
        self.size
    }

    fn order(&self) -> usize {
        self.m0.len()
    }

    fn m0(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        self.term(&self.m0, order, d_trans)
    }

    fn m1(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        self.term(&self.m1, order, d_trans)
    }

    fn l0(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        self.term(&self.l0, order, d_trans)
    }

    fn l1(&self, order: usize, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        self.term(&self.l1, order, d_trans)
    }

    fn boundary(&self, matrix: PencilMatrix, row: BoundaryRow, d_trans: &[Complex64]) -> DMatrix<Complex64> {
        self.boundary
            .get(&(matrix, row))
            .map(|f| f(d_trans))
            .unwrap_or_else(|| self.zeros())
    }

    fn b(&self, d_trans: &[Complex64]) -> DVector<Complex64> {
        self.b
            .as_ref()
            .map(|f| f(d_trans))
            .unwrap_or_else(|| DVector::zeros(self.size))
    }

    fn nonlinear(&self) -> &[Operand] {
        &self.nonlinear
    }

    fn parameters(&self) -> &FxHashMap<String, f64> {
        &self.parameters
    }
}

/// Builder for [`LinearProblem`].
///
/// Every order up to the highest one given gets zero matrices for the terms that are not set.
pub struct LinearProblemBuilder {
    size: usize,
    order: usize,
    m0: FxHashMap<usize, MatrixFn>,
    m1: FxHashMap<usize, MatrixFn>,
    l0: FxHashMap<usize, MatrixFn>,
    l1: FxHashMap<usize, MatrixFn>,
    boundary: FxHashMap<(PencilMatrix, BoundaryRow), MatrixFn>,
    b: Option<VectorFn>,
    nonlinear: Vec<Operand>,
    parameters: FxHashMap<String, f64>,
}

impl LinearProblemBuilder {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            order: 1,
            m0: FxHashMap::default(),
            m1: FxHashMap::default(),
            l0: FxHashMap::default(),
            l1: FxHashMap::default(),
            boundary: FxHashMap::default(),
            b: None,
            nonlinear: Vec::new(),
            parameters: FxHashMap::default(),
        }
    }

    pub fn with_m0(mut self, order: usize, f: impl Fn(&[Complex64]) -> DMatrix<Complex64> + 'static) -> Self {
        self.order = self.order.max(order + 1);
        self.m0.insert(order, Box::new(f));
        self
    }

    pub fn with_m1(mut self, order: usize, f: impl Fn(&[Complex64]) -> DMatrix<Complex64> + 'static) -> Self {
        self.order = self.order.max(order + 1);
        self.m1.insert(order, Box::new(f));
        self
    }

    pub fn with_l0(mut self, order: usize, f: impl Fn(&[Complex64]) -> DMatrix<Complex64> + 'static) -> Self {
        self.order = self.order.max(order + 1);
        self.l0.insert(order, Box::new(f));
        self
    }

    pub fn with_l1(mut self, order: usize, f: impl Fn(&[Complex64]) -> DMatrix<Complex64> + 'static) -> Self {
        self.order = self.order.max(order + 1);
        self.l1.insert(order, Box::new(f));
        self
    }

    pub fn with_boundary(
        mut self,
        matrix: PencilMatrix,
        row: BoundaryRow,
        f: impl Fn(&[Complex64]) -> DMatrix<Complex64> + 'static,
    ) -> Self {
        self.boundary.insert((matrix, row), Box::new(f));
        self
    }

    pub fn with_boundary_rhs(mut self, f: impl Fn(&[Complex64]) -> DVector<Complex64> + 'static) -> Self {
        self.b = Some(Box::new(f));
        self
    }

    pub fn with_nonlinear(mut self, terms: Vec<Operand>) -> Self {
        self.nonlinear = terms;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn build(mut self) -> Result<LinearProblem> {
        if self.size == 0 {
            return Err(Error::parsing("A problem needs at least one variable"));
        }
        if !self.nonlinear.is_empty() && self.nonlinear.len() != self.size {
            return Err(Error::parsing(format!(
                "Expected {} nonlinear terms, got {}",
                self.size,
                self.nonlinear.len()
            )));
        }
        let size = self.size;
        let order = self.order;
        let collect = |terms: &mut FxHashMap<usize, MatrixFn>| -> Vec<MatrixFn> {
            (0..order)
                .map(|i| {
                    terms.remove(&i).unwrap_or_else(|| -> MatrixFn {
                        Box::new(move |_: &[Complex64]| DMatrix::zeros(size, size))
                    })
                })
                .collect()
        };
        let m0 = collect(&mut self.m0);
        let m1 = collect(&mut self.m1);
        let l0 = collect(&mut self.l0);
        let l1 = collect(&mut self.l1);
        Ok(LinearProblem {
            size,
            m0,
            m1,
            l0,
            l1,
            boundary: self.boundary,
            b: self.b,
            nonlinear: self.nonlinear,
            parameters: self.parameters,
        })
    }
}
