//! Per-wavenumber linear systems.
//!
//! The last axis of a domain carries a one-dimensional boundary value problem. Every
//! combination of local indices along the remaining (separable) axes selects a pencil, whose
//! matrices couple the coefficients of all variables along the last axis. Pencil matrices are
//! ordered basis-major and variable-minor, i.e. as `kron(basis, variables)`.
use crate::array::unravel_index;
use crate::basis::Basis;
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::linalg::DenseFactorization;
use crate::operand::Operand;
use crate::problem::{BoundaryRow, PencilMatrix, PencilProblem};
use crate::settings::SolverSettings;
use crate::system::FieldSystem;
use crate::Complex64;
use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use ndarray::{ArrayD, ArrayView1, ArrayViewD, ArrayViewMutD, Axis, AxisDescription, IxDyn, Slice};
use rayon::prelude::*;
use spectre_sparse::{
    any_nonzero, clear_rows, combine_same_pattern, expand_pattern, identity, kron, kron_dense, nonzero_rows,
    to_dense, zeros_with_pattern,
};
use std::sync::Arc;

const BOUNDARY_ROWS: [BoundaryRow; 3] = [BoundaryRow::Left, BoundaryRow::Right, BoundaryRow::Integral];

/// Problem coefficients evaluated at the transverse constants of one pencil.
#[derive(Debug, Clone)]
pub struct PencilCoefficients {
    size: usize,
    m0: Vec<DMatrix<Complex64>>,
    m1: Vec<DMatrix<Complex64>>,
    l0: Vec<DMatrix<Complex64>>,
    l1: Vec<DMatrix<Complex64>>,
    boundary_mass: Vec<DMatrix<Complex64>>,
    boundary_stiffness: Vec<DMatrix<Complex64>>,
    b: DVector<Complex64>,
}

impl PencilCoefficients {
    pub fn evaluate(problem: &dyn PencilProblem, d_trans: &[Complex64]) -> Result<Self> {
        let size = problem.size();
        let check = |name: &str, matrix: DMatrix<Complex64>| -> Result<DMatrix<Complex64>> {
            if matrix.shape() != (size, size) {
                return Err(Error::parsing(format!(
                    "Coefficient matrix {} has shape {:?}, expected ({}, {})",
                    name,
                    matrix.shape(),
                    size,
                    size
                )));
            }
            Ok(matrix)
        };
        let order = problem.order();
        let per_order = |name: &str, f: &dyn Fn(usize) -> DMatrix<Complex64>| -> Result<Vec<_>> {
            (0..order)
                .map(|i| check(&format!("{}[{}]", name, i), f(i)))
                .collect()
        };
        let m0 = per_order("M0", &|i| problem.m0(i, d_trans))?;
        let m1 = per_order("M1", &|i| problem.m1(i, d_trans))?;
        let l0 = per_order("L0", &|i| problem.l0(i, d_trans))?;
        let l1 = per_order("L1", &|i| problem.l1(i, d_trans))?;
        let boundary = |matrix: PencilMatrix| -> Result<Vec<_>> {
            BOUNDARY_ROWS
                .iter()
                .map(|&row| check(&format!("{:?} {:?}", matrix, row), problem.boundary(matrix, row, d_trans)))
                .collect()
        };
        let boundary_mass = boundary(PencilMatrix::Mass)?;
        let boundary_stiffness = boundary(PencilMatrix::Stiffness)?;
        let b = problem.b(d_trans);
        if b.len() != size {
            return Err(Error::parsing(format!(
                "Boundary right-hand side has {} entries, expected {}",
                b.len(),
                size
            )));
        }
        Ok(Self {
            size,
            m0,
            m1,
            l0,
            l1,
            boundary_mass,
            boundary_stiffness,
            b,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn order(&self) -> usize {
        self.m0.len()
    }
}

/// Assembled matrices of a pencil.
///
/// `m` and `l` are stored on the union pattern `lhs`, so that their values line up entry by
/// entry for linear combinations.
#[derive(Debug, Clone)]
pub struct PencilMatrices {
    pub m: CsrMatrix<Complex64>,
    pub l: CsrMatrix<Complex64>,
    pub lhs: CsrMatrix<Complex64>,
    /// Rows replaced by boundary conditions, sorted.
    pub bc_rows: Vec<usize>,
    /// Boundary right-hand side on `bc_rows`.
    pub bc_f: DVector<Complex64>,
    /// Projection of nonlinear term coefficients onto the preconditioned equations.
    pub f_eval: CsrMatrix<Complex64>,
}

#[derive(Debug, Clone)]
pub struct Pencil {
    index: Vec<usize>,
    d_trans: Vec<Complex64>,
    matrices: Option<PencilMatrices>,
}

impl Pencil {
    fn new(index: Vec<usize>, d_trans: Vec<Complex64>) -> Self {
        Self {
            index,
            d_trans,
            matrices: None,
        }
    }

    /// Local transverse index of the pencil.
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    /// Differentiation constant of each transverse axis.
    pub fn d_trans(&self) -> &[Complex64] {
        &self.d_trans
    }

    pub fn matrices(&self) -> Option<&PencilMatrices> {
        self.matrices.as_ref()
    }

    fn assembled(&self) -> Result<&PencilMatrices> {
        self.matrices
            .as_ref()
            .ok_or_else(|| Error::Solve(format!("Pencil {:?} has not been assembled", self.index)))
    }

    /// Assembles the pencil matrices over the given last-axis basis.
    pub fn build_matrices(&mut self, basis: &dyn Basis, coefficients: &PencilCoefficients) -> Result<()> {
        self.matrices = Some(assemble(basis, coefficients)?);
        Ok(())
    }

    /// `a·M + b·L` on the shared pattern.
    pub fn combine(&self, a: Complex64, b: Complex64) -> Result<CsrMatrix<Complex64>> {
        let matrices = self.assembled()?;
        Ok(combine_same_pattern(a, &matrices.m, b, &matrices.l))
    }

    /// Solves `(a·M + b·L) x = rhs`.
    pub fn solve(
        &self,
        a: Complex64,
        b: Complex64,
        rhs: &DVector<Complex64>,
        settings: &SolverSettings,
    ) -> Result<DVector<Complex64>> {
        let combined = self.combine(a, b)?;
        if rhs.len() != combined.nrows() {
            return Err(Error::Solve(format!(
                "Right-hand side has {} entries, pencil system has {} rows",
                rhs.len(),
                combined.nrows()
            )));
        }
        DenseFactorization::new(to_dense(&combined), settings)?.solve(rhs)
    }
}

/// Sum of the boundary row selectors of `basis` weighted by the given coefficient matrices.
fn boundary_matrix(
    selectors: &[CsrMatrix<Complex64>],
    coefficients: &[DMatrix<Complex64>],
    total: usize,
    basis: &dyn Basis,
) -> CsrMatrix<Complex64> {
    let mut acc = CsrMatrix::zeros(total, total);
    for ((row, selector), coefficients) in BOUNDARY_ROWS.iter().zip(selectors).zip(coefficients) {
        if !any_nonzero(coefficients) {
            continue;
        }
        if selector.nnz() == 0 {
            warn!("Basis '{}' has no {:?} boundary row, condition ignored", basis.name(), row);
            continue;
        }
        acc = &acc + &kron_dense(selector, coefficients);
    }
    acc
}

fn assemble(basis: &dyn Basis, c: &PencilCoefficients) -> Result<PencilMatrices> {
    let n = basis.coeff_size();
    let size = c.size;
    let total = n * size;
    let pre = basis.pre();
    let diff = basis.diff();

    let mut m = CsrMatrix::zeros(total, total);
    let mut l = CsrMatrix::zeros(total, total);
    for i in 0..c.order() {
        let pre_i = &pre * &basis.mult(i);
        let diff_i = &pre_i * &diff;
        m = &(&m + &kron_dense(&pre_i, &c.m0[i])) + &kron_dense(&diff_i, &c.m1[i]);
        l = &(&l + &kron_dense(&pre_i, &c.l0[i])) + &kron_dense(&diff_i, &c.l1[i]);
    }

    let selectors = [basis.left(), basis.right(), basis.int()];
    let mb = boundary_matrix(&selectors, &c.boundary_mass, total, basis);
    let lb = boundary_matrix(&selectors, &c.boundary_stiffness, total, basis);
    let bc_rows: Vec<usize> = nonzero_rows(&mb)
        .into_iter()
        .merge(nonzero_rows(&lb))
        .dedup()
        .collect();

    let m = &clear_rows(&m, &bc_rows) + &mb;
    let l = &clear_rows(&l, &bc_rows) + &lb;
    let lhs = zeros_with_pattern(&m, &l);
    let m = expand_pattern(&m, &lhs);
    let l = expand_pattern(&l, &lhs);

    let bc_vector = basis.bc_vector();
    if bc_vector.len() != n {
        return Err(Error::Solve(format!(
            "Boundary vector of basis '{}' has {} entries, expected {}",
            basis.name(),
            bc_vector.len(),
            n
        )));
    }
    let bc_f = DVector::from_iterator(
        bc_rows.len(),
        bc_rows.iter().map(|&r| bc_vector[r / size] * c.b[r % size]),
    );

    Ok(PencilMatrices {
        m,
        l,
        lhs,
        bc_rows,
        bc_f,
        f_eval: kron(&pre, &identity(size)),
    })
}

/// Selects the entries of field `i` along the last axis of an interleaved buffer.
fn field_slice(last: usize, n_fields: usize, i: usize) -> impl Fn(AxisDescription) -> Slice {
    move |ax| {
        if ax.axis.index() == last {
            Slice::new(i as isize, None, n_fields as isize)
        } else {
            Slice::from(..)
        }
    }
}

/// The pencils of a domain together with a shared coefficient buffer for a field system.
#[derive(Debug)]
pub struct PencilSet {
    domain: Arc<Domain>,
    n_fields: usize,
    stride: usize,
    data: ArrayD<Complex64>,
    pencils: Vec<Pencil>,
    nonlinear: Vec<Operand>,
}

impl PencilSet {
    pub fn new(domain: &Arc<Domain>, n_fields: usize) -> Result<Self> {
        if n_fields == 0 {
            return Err(Error::parsing("A pencil set needs at least one field"));
        }
        let distributor = domain.distributor();
        let layout = distributor.coeff_layout();
        let bases = domain.full_bases();
        let scales = domain.uniform_scales(1.0);
        let dim = domain.dim();
        let last = dim - 1;
        if !layout.is_local(last) {
            return Err(Error::layout("Last axis must be local in coefficient space"));
        }

        let shape = layout.local_shape(&bases, &scales);
        let start = layout.start(&bases, &scales);
        let stride = shape[last];
        let mut buffer_shape = shape.clone();
        buffer_shape[last] *= n_fields;

        let transverse = &shape[..last];
        let n_pencils = transverse.iter().product::<usize>();
        let pencils = (0..n_pencils)
            .map(|p| {
                let index = unravel_index(p, transverse);
                let d_trans = index
                    .iter()
                    .enumerate()
                    .map(|(axis, &i)| {
                        domain.basis(axis).trans_diff(start[axis] + i).ok_or_else(|| {
                            Error::layout(format!(
                                "Basis '{}' on transverse axis {} is not separable",
                                domain.basis(axis).name(),
                                axis
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Pencil::new(index, d_trans))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Created {} pencils of {} coefficients for {} fields",
            pencils.len(),
            stride,
            n_fields
        );

        Ok(Self {
            domain: domain.clone(),
            n_fields,
            stride,
            data: ArrayD::zeros(IxDyn(&buffer_shape)),
            pencils,
            nonlinear: Vec::new(),
        })
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn n_fields(&self) -> usize {
        self.n_fields
    }

    /// Coefficient extent of one field along the last axis.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pencils(&self) -> &[Pencil] {
        &self.pencils
    }

    pub fn pencil(&self, i: usize) -> Option<&Pencil> {
        self.pencils.get(i)
    }

    /// The shared buffer, with the fields interleaved along the last axis.
    pub fn data(&self) -> ArrayViewD<'_, Complex64> {
        self.data.view()
    }

    /// Nonlinear terms of the problem the pencils were assembled for.
    pub fn nonlinear(&self) -> &[Operand] {
        &self.nonlinear
    }

    /// Assembles the matrices of every pencil.
    pub fn build_matrices(&mut self, problem: &dyn PencilProblem) -> Result<()> {
        if problem.size() != self.n_fields {
            return Err(Error::parsing(format!(
                "Problem has {} variables, pencil set has {} fields",
                problem.size(),
                self.n_fields
            )));
        }
        let coefficients = self
            .pencils
            .iter()
            .map(|pencil| PencilCoefficients::evaluate(problem, &pencil.d_trans))
            .collect::<Result<Vec<_>>>()?;

        let basis = self.domain.basis(self.domain.dim() - 1).clone();
        self.pencils
            .par_iter_mut()
            .zip(coefficients.par_iter())
            .try_for_each(|(pencil, coefficients)| pencil.build_matrices(basis.as_ref(), coefficients))?;
        self.nonlinear = problem.nonlinear().to_vec();
        info!(
            "Assembled {} pencils of size {}",
            self.pencils.len(),
            self.stride * self.n_fields
        );
        Ok(())
    }

    fn check_system(&self, system: &FieldSystem) -> Result<()> {
        if system.n_fields() != self.n_fields {
            return Err(Error::layout(format!(
                "System has {} fields, pencil set has {}",
                system.n_fields(),
                self.n_fields
            )));
        }
        for field in system.fields() {
            if !Arc::ptr_eq(field.borrow().domain(), &self.domain) {
                return Err(Error::domain_mismatch(format!(
                    "Field '{}' is not on the domain of the pencil set",
                    field.name()
                )));
            }
        }
        Ok(())
    }

    /// Gathers the coefficient data of the system fields into the buffer.
    pub fn get_system(&mut self, system: &FieldSystem) -> Result<()> {
        self.check_system(system)?;
        let scales = self.domain.uniform_scales(1.0);
        for (i, field) in system.fields().iter().enumerate() {
            let mut field = field.borrow_mut();
            field.set_scales(&scales, true)?;
            field.require_coeff_space(None)?;
            let slice = field_slice(self.data.ndim() - 1, self.n_fields, i);
            let mut target = self.data.slice_each_axis_mut(slice);
            let source = field.data();
            if target.shape() != source.shape() {
                return Err(Error::layout(format!(
                    "Field '{}' has coefficient shape {:?}, expected {:?}",
                    field.name(),
                    source.shape(),
                    target.shape()
                )));
            }
            target.assign(&source);
        }
        Ok(())
    }

    /// Scatters the buffer back into the system fields, leaving them in coefficient space.
    pub fn set_system(&self, system: &FieldSystem) -> Result<()> {
        self.check_system(system)?;
        let scales = self.domain.uniform_scales(1.0);
        let coeff = self.domain.distributor().coeff_layout().index();
        for (i, field) in system.fields().iter().enumerate() {
            let mut field = field.borrow_mut();
            field.set_scales(&scales, false)?;
            let slice = field_slice(self.data.ndim() - 1, self.n_fields, i);
            field.set_data(coeff, self.data.slice_each_axis(slice))?;
        }
        Ok(())
    }

    fn pencil_index(&self, i: usize) -> Result<&[usize]> {
        self.pencils
            .get(i)
            .map(|pencil| pencil.index.as_slice())
            .ok_or_else(|| Error::layout(format!("Pencil {} outside set of {}", i, self.pencils.len())))
    }

    /// The buffer entries of pencil `i`.
    pub fn pencil_data(&self, i: usize) -> Result<ArrayView1<'_, Complex64>> {
        let index = self.pencil_index(i)?;
        let mut view = self.data.view();
        for &k in index {
            view = view.index_axis_move(Axis(0), k);
        }
        Ok(view
            .into_dimensionality()
            .expect("Internal error: Pencil view is one-dimensional"))
    }

    pub fn set_pencil_data(&mut self, i: usize, values: &DVector<Complex64>) -> Result<()> {
        let index = self.pencil_index(i)?.to_vec();
        let mut view: ArrayViewMutD<'_, Complex64> = self.data.view_mut();
        for k in index {
            view = view.index_axis_move(Axis(0), k);
        }
        if view.len() != values.len() {
            return Err(Error::layout(format!(
                "Pencil {} has {} entries, got {}",
                i,
                view.len(),
                values.len()
            )));
        }
        for (dst, src) in view.iter_mut().zip(values.iter()) {
            *dst = *src;
        }
        Ok(())
    }
}
