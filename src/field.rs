//! Distributed scalar fields and their layout state machine.
use crate::array::apply_dense;
use crate::basis::{Basis, NccExpansion};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::layout::{Layout, TransformStep};
use crate::linalg::DenseFactorization;
use crate::settings::{NccSettings, SolverSettings};
use crate::Complex64;
use log::{debug, info};
use nalgebra::DVector;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, Zip};
use num::Zero;
use spectre_sparse::{clear_rows, nonzero_rows, to_dense, union_pattern};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FIELD_ID: AtomicU64 = AtomicU64::new(0);

/// Symmetry of a field under reflection of an axis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn sign(&self) -> i8 {
        match self {
            Parity::Even => 1,
            Parity::Odd => -1,
        }
    }

    pub fn from_sign(sign: i8) -> Self {
        if sign < 0 {
            Parity::Odd
        } else {
            Parity::Even
        }
    }
}

/// Value imposed by a [`BoundaryCondition`].
#[derive(Debug, Copy, Clone)]
pub enum BoundaryValue<'a> {
    Number(Complex64),
    /// A field in coefficient space that is constant along the solved axis.
    Field(&'a Field),
}

impl From<Complex64> for BoundaryValue<'_> {
    fn from(value: Complex64) -> Self {
        BoundaryValue::Number(value)
    }
}

impl From<f64> for BoundaryValue<'_> {
    fn from(value: f64) -> Self {
        BoundaryValue::Number(Complex64::new(value, 0.0))
    }
}

impl<'a> From<&'a Field> for BoundaryValue<'a> {
    fn from(field: &'a Field) -> Self {
        BoundaryValue::Field(field)
    }
}

/// Boundary condition for [`Field::antidifferentiate`].
#[derive(Debug, Copy, Clone)]
pub enum BoundaryCondition<'a> {
    Left(BoundaryValue<'a>),
    Right(BoundaryValue<'a>),
    Integral(BoundaryValue<'a>),
}

impl<'a> BoundaryCondition<'a> {
    fn row_name(&self) -> &'static str {
        match self {
            BoundaryCondition::Left(_) => "left",
            BoundaryCondition::Right(_) => "right",
            BoundaryCondition::Integral(_) => "integral",
        }
    }
}

/// A scalar field over a domain.
///
/// The field owns a single buffer large enough to hold its data in every layout of the
/// domain at the current scales. [`Field::data`] reinterprets the leading part of the buffer
/// with the local shape of the current layout.
#[derive(Debug)]
pub struct Field {
    id: u64,
    name: String,
    domain: Arc<Domain>,
    bases: Vec<Option<Arc<dyn Basis>>>,
    parity: Vec<Option<Parity>>,
    scales: Vec<f64>,
    layout: Arc<Layout>,
    shape: Vec<usize>,
    buffer: Vec<Complex64>,
    version: u64,
    transform_count: usize,
}

impl Field {
    /// A field that is non-constant along every axis, initialized to zero in coefficient space.
    pub fn new(domain: &Arc<Domain>, name: impl Into<String>) -> Self {
        Self::with_bases(domain, name, domain.full_bases())
    }

    /// A field that is constant along every axis.
    pub fn constant(domain: &Arc<Domain>, name: impl Into<String>) -> Self {
        Self::with_bases(domain, name, vec![None; domain.dim()])
    }

    /// A field with the given basis per axis. `None` marks a constant axis.
    pub fn with_bases(domain: &Arc<Domain>, name: impl Into<String>, bases: Vec<Option<Arc<dyn Basis>>>) -> Self {
        assert_eq!(bases.len(), domain.dim(), "Expected one basis slot per axis.");
        let dim = domain.dim();
        let mut field = Self {
            id: NEXT_FIELD_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            domain: domain.clone(),
            bases,
            parity: vec![None; dim],
            scales: vec![1.0; dim],
            layout: domain.distributor().coeff_layout().clone(),
            shape: Vec::new(),
            buffer: Vec::new(),
            version: 0,
            transform_count: 0,
        };
        field.allocate();
        field
    }

    fn allocate(&mut self) {
        let size = self.domain.distributor().buffer_size(&self.bases, &self.scales);
        self.buffer = vec![Complex64::zero(); size];
        self.update_shape();
    }

    fn update_shape(&mut self) {
        self.shape = self.layout.local_shape(&self.bases, &self.scales);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn dim(&self) -> usize {
        self.bases.len()
    }

    pub fn bases(&self) -> &[Option<Arc<dyn Basis>>] {
        &self.bases
    }

    pub fn basis(&self, axis: usize) -> Option<&Arc<dyn Basis>> {
        self.bases[axis].as_ref()
    }

    pub fn is_constant(&self) -> bool {
        self.bases.iter().all(Option::is_none)
    }

    pub fn parity(&self) -> &[Option<Parity>] {
        &self.parity
    }

    pub fn set_parity(&mut self, axis: usize, parity: Option<Parity>) {
        self.parity[axis] = parity;
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Incremented on every write to the field data.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of transform steps applied to the field since creation.
    pub fn transform_count(&self) -> usize {
        self.transform_count
    }

    pub fn local_shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn global_shape(&self) -> Vec<usize> {
        self.layout.global_shape(&self.bases, &self.scales)
    }

    /// Global offset of the local data in the current layout.
    pub fn start(&self) -> Vec<usize> {
        self.layout.start(&self.bases, &self.scales)
    }

    pub fn data(&self) -> ArrayViewD<'_, Complex64> {
        let n = self.shape.iter().product();
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.buffer[..n])
            .expect("Internal error: Buffer is sized for every layout")
    }

    pub fn data_mut(&mut self) -> ArrayViewMutD<'_, Complex64> {
        self.version += 1;
        let n = self.shape.iter().product();
        ArrayViewMutD::from_shape(IxDyn(&self.shape), &mut self.buffer[..n])
            .expect("Internal error: Buffer is sized for every layout")
    }

    /// Reinterprets the buffer in the layout with the given index, without transforming.
    pub fn set_layout(&mut self, index: usize) -> Result<()> {
        let layouts = self.domain.distributor().layouts();
        let layout = layouts
            .get(index)
            .ok_or_else(|| Error::layout(format!("Layout index {} outside chain of {} layouts", index, layouts.len())))?;
        self.layout = layout.clone();
        self.update_shape();
        Ok(())
    }

    /// Sets the layout and overwrites the data.
    pub fn set_data(&mut self, layout_index: usize, data: ArrayViewD<Complex64>) -> Result<()> {
        self.set_layout(layout_index)?;
        if data.shape() != self.shape.as_slice() {
            return Err(Error::layout(format!(
                "Data of shape {:?} does not match local shape {:?} of field '{}'",
                data.shape(),
                self.shape,
                self.name
            )));
        }
        self.data_mut().assign(&data);
        Ok(())
    }

    fn write_buffer(&mut self, data: &ArrayD<Complex64>) {
        assert_eq!(data.shape(), self.shape.as_slice(), "Internal error: Shape mismatch in layout step");
        for (dst, src) in self.buffer.iter_mut().zip(data.iter()) {
            *dst = *src;
        }
    }

    /// Changes the per-axis scales, reallocating the buffer.
    ///
    /// With `keep_data`, the field first moves towards coefficient space until no axis with a
    /// changed scale is in grid space, so the data survives the rescale. Otherwise the field is
    /// zeroed.
    pub fn set_scales(&mut self, scales: &[f64], keep_data: bool) -> Result<()> {
        if scales.len() != self.dim() || scales.iter().any(|&s| !(s > 0.0)) {
            return Err(Error::layout(format!("Invalid scales {:?} for field '{}'", scales, self.name)));
        }
        if scales == self.scales.as_slice() {
            return Ok(());
        }
        if keep_data {
            let last_changed = (0..self.dim()).rev().find(|&axis| {
                self.bases[axis].is_some() && self.scales[axis] != scales[axis] && self.layout.grid_space()[axis]
            });
            if let Some(axis) = last_changed {
                self.require_coeff_space(Some(axis))?;
            }
            let data = self.data().to_owned();
            self.scales = scales.to_vec();
            self.allocate();
            self.write_buffer(&data);
        } else {
            self.scales = scales.to_vec();
            self.allocate();
            self.version += 1;
        }
        Ok(())
    }

    pub fn towards_grid_space(&mut self) -> Result<()> {
        let domain = self.domain.clone();
        let distributor = domain.distributor();
        let index = self.layout.index();
        if index + 1 >= distributor.layouts().len() {
            return Err(Error::layout(format!("Field '{}' is already in full grid space", self.name)));
        }
        distributor.path(index).increment(&mut [&mut *self])
    }

    pub fn towards_coeff_space(&mut self) -> Result<()> {
        let domain = self.domain.clone();
        let index = self.layout.index();
        if index == 0 {
            return Err(Error::layout(format!("Field '{}' is already in full coefficient space", self.name)));
        }
        domain.distributor().path(index - 1).decrement(&mut [&mut *self])
    }

    /// Walks the layout chain one step at a time until the field is in layout `index`.
    pub fn require_layout(&mut self, index: usize) -> Result<()> {
        let n_layouts = self.domain.distributor().layouts().len();
        if index >= n_layouts {
            return Err(Error::layout(format!("Layout index {} outside chain of {} layouts", index, n_layouts)));
        }
        while self.layout.index() < index {
            self.towards_grid_space()?;
        }
        while self.layout.index() > index {
            self.towards_coeff_space()?;
        }
        Ok(())
    }

    /// Brings the given axis (or every axis, for `None`) into grid space.
    pub fn require_grid_space(&mut self, axis: Option<usize>) -> Result<()> {
        match axis {
            None => self.require_layout(self.domain.distributor().layouts().len() - 1),
            Some(axis) => {
                while !self.layout.grid_space()[axis] {
                    self.towards_grid_space()?;
                }
                Ok(())
            }
        }
    }

    /// Brings the given axis (or every axis, for `None`) into coefficient space.
    pub fn require_coeff_space(&mut self, axis: Option<usize>) -> Result<()> {
        match axis {
            None => self.require_layout(0),
            Some(axis) => {
                while self.layout.grid_space()[axis] {
                    self.towards_coeff_space()?;
                }
                Ok(())
            }
        }
    }

    /// Makes `axis` local, moving towards grid space while the axis holds coefficients and
    /// towards coefficient space otherwise.
    pub fn require_local(&mut self, axis: usize) -> Result<()> {
        if self.layout.grid_space()[axis] {
            while !self.layout.is_local(axis) {
                self.towards_coeff_space()?;
            }
        } else {
            while !self.layout.is_local(axis) {
                self.towards_grid_space()?;
            }
        }
        Ok(())
    }

    pub(crate) fn apply_step(&mut self, step: &TransformStep, forward: bool) -> Result<()> {
        let domain = self.domain.clone();
        let distributor = domain.distributor();
        let index = self.layout.index();
        let target = if forward { index + 1 } else { index - 1 };
        let target_layout = distributor.layout(target).clone();

        let data = match *step {
            TransformStep::Transform { axis } => match &self.bases[axis] {
                Some(basis) => {
                    let matrix = if forward {
                        basis.forward_matrix(self.scales[axis])
                    } else {
                        basis.backward_matrix(self.scales[axis])
                    };
                    Some(apply_dense(&matrix, &self.data(), axis))
                }
                None => None,
            },
            TransformStep::Transpose { mesh_dim, axis } => {
                let (gather, scatter) = if forward { (axis, axis + 1) } else { (axis + 1, axis) };
                let target_shape = target_layout.local_shape(&self.bases, &self.scales);
                let data = self.data().to_owned();
                Some(distributor.comm().transpose(data, mesh_dim, gather, scatter, &target_shape)?)
            }
        };

        self.layout = target_layout;
        self.update_shape();
        if let Some(data) = data {
            self.write_buffer(&data);
        }
        self.transform_count += 1;
        debug!("Field '{}' moved from layout {} to layout {} via {:?}", self.name, index, target, step);
        Ok(())
    }

    /// Global grid coordinates of the local data along `axis` in the current layout.
    pub fn local_grid(&self, axis: usize) -> Vec<f64> {
        let range = self.layout.local_elements(&self.bases, &self.scales, axis);
        match &self.bases[axis] {
            Some(basis) => basis.grid(self.scales[axis])[range].to_vec(),
            None => vec![0.0; range.len()],
        }
    }

    /// Moves the field to full grid space and returns a copy of the local data.
    pub fn grid_data(&mut self) -> Result<ArrayD<Complex64>> {
        self.require_grid_space(None)?;
        Ok(self.data().to_owned())
    }

    /// Moves the field to full coefficient space and returns a copy of the local data.
    pub fn coeff_data(&mut self) -> Result<ArrayD<Complex64>> {
        self.require_coeff_space(None)?;
        Ok(self.data().to_owned())
    }

    pub fn set_grid_data(&mut self, data: ArrayViewD<Complex64>) -> Result<()> {
        let index = self.domain.distributor().grid_layout().index();
        self.set_data(index, data)
    }

    pub fn set_coeff_data(&mut self, data: ArrayViewD<Complex64>) -> Result<()> {
        self.set_data(0, data)
    }

    /// Sets grid values from a function of the physical coordinates.
    ///
    /// Constant axes contribute the coordinate `0`.
    pub fn fill_grid(&mut self, f: impl Fn(&[f64]) -> f64) {
        let index = self.domain.distributor().grid_layout().index();
        self.set_layout(index)
            .expect("Internal error: Grid layout is always part of the chain");
        let grids: Vec<_> = (0..self.dim()).map(|axis| self.local_grid(axis)).collect();
        let mut coords = vec![0.0; self.dim()];
        for (idx, value) in self.data_mut().indexed_iter_mut() {
            for (axis, coord) in coords.iter_mut().enumerate() {
                *coord = grids[axis][idx[axis]];
            }
            *value = Complex64::new(f(&coords), 0.0);
        }
    }

    /// Sets the field to a constant value in grid space.
    pub fn fill_constant(&mut self, value: Complex64) {
        let index = self.domain.distributor().grid_layout().index();
        self.set_layout(index)
            .expect("Internal error: Grid layout is always part of the chain");
        self.data_mut().fill(value);
    }

    /// Solves `d(out)/dx = self` along `axis` with a single boundary condition.
    ///
    /// Only the last axis of the domain is supported. The boundary rows of the basis replace
    /// the corresponding rows of the preconditioned differentiation operator. Every pencil gets
    /// the transverse coefficient of the boundary value, so a number only constrains the
    /// transverse constant mode.
    pub fn antidifferentiate(
        &mut self,
        axis: usize,
        bc: BoundaryCondition<'_>,
        out: &mut Field,
        settings: &SolverSettings,
    ) -> Result<()> {
        if axis + 1 != self.dim() {
            return Err(Error::parsing(format!(
                "Antidifferentiation is only supported along the last axis, not axis {}",
                axis
            )));
        }
        let basis = self.bases[axis].clone().ok_or_else(|| {
            Error::parsing(format!("Field '{}' is constant along axis {}", self.name, axis))
        })?;
        if !crate::basis::same_basis(out.basis(axis), Some(&basis)) || out.dim() != self.dim() {
            return Err(Error::domain_mismatch(format!(
                "Output field '{}' does not share the bases of '{}'",
                out.name, self.name
            )));
        }

        let (bc_matrix, bc_value) = match bc {
            BoundaryCondition::Left(value) => (basis.left(), value),
            BoundaryCondition::Right(value) => (basis.right(), value),
            BoundaryCondition::Integral(value) => (basis.int(), value),
        };
        let match_matrix = basis.match_rows();
        let mut tau_pattern = bc_matrix.pattern().clone();
        if let Some(match_matrix) = &match_matrix {
            tau_pattern = union_pattern(&tau_pattern, match_matrix.pattern());
        }
        let tau_rows: Vec<usize> = (0..tau_pattern.major_dim())
            .filter(|&i| !tau_pattern.lane(i).is_empty())
            .collect();
        if nonzero_rows(&bc_matrix).is_empty() {
            return Err(Error::Solve(format!(
                "Basis '{}' provides no {} boundary row",
                basis.name(),
                bc.row_name()
            )));
        }

        // G = F Pre, where F clears the boundary rows
        let g = to_dense(&clear_rows(&basis.pre(), &tau_rows));
        let mut lhs = &g * to_dense(&basis.diff()) + to_dense(&bc_matrix);
        if let Some(match_matrix) = &match_matrix {
            lhs += to_dense(match_matrix);
        }
        let factorization = DenseFactorization::new(lhs, settings)?;

        // Boundary rows applied to the constant mode of the solved axis
        let n = basis.coeff_size();
        let bc_column: DVector<Complex64> =
            to_dense(&bc_matrix).column(0) * Complex64::new(1.0 / basis.constant_amplitude(), 0.0);

        self.require_coeff_space(None)?;
        let boundary = self.boundary_coefficients(bc_value, axis)?;
        let data = self.data();
        let mut result = ArrayD::zeros(data.raw_dim());
        let mut solve_result = Ok(());
        Zip::from(result.lanes_mut(Axis(axis)))
            .and(data.lanes(Axis(axis)))
            .and(&boundary)
            .for_each(|mut out_lane, f_lane, value| {
                if solve_result.is_err() {
                    return;
                }
                let f = DVector::from_iterator(n, f_lane.iter().copied());
                let mut rhs = &g * f;
                if !value.is_zero() {
                    rhs.axpy(*value, &bc_column, Complex64::new(1.0, 0.0));
                }
                match factorization.solve(&rhs) {
                    Ok(u) => {
                        for (dst, src) in out_lane.iter_mut().zip(u.iter()) {
                            *dst = *src;
                        }
                    }
                    Err(err) => solve_result = Err(err),
                }
            });
        solve_result?;
        out.set_coeff_data(result.view())
    }

    /// Boundary value per pencil of `axis`, indexed by the local transverse coefficients.
    ///
    /// Expects `self` in coefficient space.
    fn boundary_coefficients(&self, value: BoundaryValue<'_>, axis: usize) -> Result<ArrayD<Complex64>> {
        let start = self.start();
        let mut coeffs = ArrayD::zeros(IxDyn(&self.local_shape()[..axis]));
        match value {
            BoundaryValue::Number(value) => {
                if start[..axis].iter().all(|&s| s == 0) {
                    coeffs[IxDyn(&vec![0; axis])] = value;
                }
            }
            BoundaryValue::Field(field) => {
                if !Arc::ptr_eq(&field.domain, &self.domain) {
                    return Err(Error::domain_mismatch(format!(
                        "Boundary value '{}' is defined on another domain than '{}'",
                        field.name, self.name
                    )));
                }
                if field.bases[axis].is_some() {
                    return Err(Error::parsing(format!(
                        "Boundary value '{}' must be constant along axis {}",
                        field.name, axis
                    )));
                }
                if field.layout.index() != 0 {
                    return Err(Error::layout(format!(
                        "Boundary value '{}' must be in coefficient space",
                        field.name
                    )));
                }
                for a in 0..axis {
                    if field.bases[a].is_some() && !crate::basis::same_basis(field.basis(a), self.basis(a)) {
                        return Err(Error::domain_mismatch(format!(
                            "Boundary value '{}' does not share the basis of '{}' along axis {}",
                            field.name, self.name, a
                        )));
                    }
                }
                let data = field.data();
                let mut index = vec![0; self.dim()];
                for (idx, coeff) in coeffs.indexed_iter_mut() {
                    let mut owned = true;
                    for a in 0..axis {
                        match field.bases[a] {
                            Some(_) => index[a] = idx[a],
                            None => {
                                owned &= idx[a] == 0 && start[a] == 0;
                                index[a] = 0;
                            }
                        }
                    }
                    if owned {
                        *coeff = data[IxDyn(&index)];
                    }
                }
            }
        }
        Ok(coeffs)
    }

    /// Expands the field into the multiplication matrix of a non-constant coefficient along the
    /// last axis.
    ///
    /// The field must be constant along every separable axis. The coefficients of the transverse
    /// constant mode are taken from rank 0 and broadcast.
    pub fn as_ncc_operator(&mut self, settings: &NccSettings) -> Result<NccExpansion> {
        let domain = self.domain.clone();
        for (axis, basis) in domain.bases().iter().enumerate() {
            if basis.separable() && self.bases[axis].is_some() {
                return Err(Error::parsing(format!(
                    "{} is non-constant along separable direction '{}'",
                    self.name,
                    basis.name()
                )));
            }
        }
        let last = domain.dim() - 1;
        let basis = domain.basis(last);
        let mut coeffs = vec![Complex64::zero(); basis.coeff_size()];
        self.require_coeff_space(None)?;
        let comm = domain.distributor().comm();
        if comm.rank() == 0 {
            let data = self.data();
            let mut index = vec![0; domain.dim()];
            for (j, coeff) in coeffs.iter_mut().enumerate().take(data.shape()[last]) {
                index[last] = j;
                *coeff = data[IxDyn(&index)];
            }
            if self.bases[last].is_none() {
                coeffs[0] /= basis.constant_amplitude();
            }
        }
        comm.broadcast(&mut coeffs, 0);
        let expansion = basis.ncc_matrix(&coeffs, settings);
        info!(
            "Expanded NCC '{}' to mode {} with {} terms.",
            self.name, expansion.max_term, expansion.n_terms
        );
        Ok(expansion)
    }
}
