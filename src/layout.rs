//! The chain of distributed data layouts and the transform steps connecting them.
//!
//! Layout `0` holds every axis in coefficient space, with the first `mesh.len()` axes
//! distributed over the process mesh. Moving up the chain, axes are transformed to grid space
//! starting from the last one. Before a distributed axis is transformed, a transpose makes it
//! local by moving its mesh dimension to the following (already transformed) axis.
use crate::basis::Basis;
use crate::comm::Communicator;
use crate::field::Field;
use crate::error::Result;
use crate::array::unravel_index;
use log::debug;
use std::ops::Range;
use std::sync::Arc;

/// Numeric type of the data held in a layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DType {
    Real,
    Complex,
}

/// A combination of per-axis coefficient/grid state and process distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    index: usize,
    grid_space: Vec<bool>,
    /// Mesh dimension distributing each axis, if any.
    distribution: Vec<Option<usize>>,
    mesh: Vec<usize>,
    coords: Vec<usize>,
    dtype: DType,
}

impl Layout {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dim(&self) -> usize {
        self.grid_space.len()
    }

    pub fn grid_space(&self) -> &[bool] {
        &self.grid_space
    }

    pub fn local(&self) -> Vec<bool> {
        self.distribution.iter().map(Option::is_none).collect()
    }

    pub fn is_local(&self, axis: usize) -> bool {
        self.distribution[axis].is_none()
    }

    pub fn distribution(&self) -> &[Option<usize>] {
        &self.distribution
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Global extent along each axis. Constant axes have unit extent.
    pub fn global_shape(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64]) -> Vec<usize> {
        assert_eq!(bases.len(), self.dim(), "Expected one basis slot per axis.");
        assert_eq!(scales.len(), self.dim(), "Expected one scale per axis.");
        bases
            .iter()
            .zip(&self.grid_space)
            .zip(scales)
            .map(|((basis, &grid), &scale)| match basis {
                None => 1,
                Some(basis) if grid => basis.grid_size(scale),
                Some(basis) => basis.coeff_size(),
            })
            .collect()
    }

    /// Global index range held by this process along each axis.
    ///
    /// Constant axes are replicated on every process.
    pub fn local_ranges(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64]) -> Vec<Range<usize>> {
        self.global_shape(bases, scales)
            .into_iter()
            .zip(bases)
            .zip(&self.distribution)
            .map(|((n, basis), distribution)| match (basis, *distribution) {
                (Some(_), Some(mesh_dim)) => block_range(n, self.mesh[mesh_dim], self.coords[mesh_dim]),
                _ => 0..n,
            })
            .collect()
    }

    pub fn local_shape(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64]) -> Vec<usize> {
        self.local_ranges(bases, scales)
            .into_iter()
            .map(|range| range.len())
            .collect()
    }

    /// Global offset of the local block along each axis.
    pub fn start(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64]) -> Vec<usize> {
        self.local_ranges(bases, scales)
            .into_iter()
            .map(|range| range.start)
            .collect()
    }

    /// Global indices of the local data along a single axis.
    pub fn local_elements(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64], axis: usize) -> Range<usize> {
        self.local_ranges(bases, scales)[axis].clone()
    }
}

/// Block distribution of `n` elements over `p` processes.
fn block_range(n: usize, p: usize, coord: usize) -> Range<usize> {
    let block = (n + p - 1) / p;
    let start = (coord * block).min(n);
    let end = (start + block).min(n);
    start..end
}

/// A single step between adjacent layouts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransformStep {
    /// Transform `axis` between coefficient and grid space.
    Transform { axis: usize },
    /// Move mesh dimension `mesh_dim` from `axis` to `axis + 1`.
    Transpose { mesh_dim: usize, axis: usize },
}

impl TransformStep {
    /// Moves every field one layout towards grid space.
    pub fn increment(&self, fields: &mut [&mut Field]) -> Result<()> {
        for field in fields.iter_mut() {
            field.apply_step(self, true)?;
        }
        Ok(())
    }

    /// Moves every field one layout towards coefficient space.
    pub fn decrement(&self, fields: &mut [&mut Field]) -> Result<()> {
        for field in fields.iter_mut() {
            field.apply_step(self, false)?;
        }
        Ok(())
    }
}

/// Owner of the layout chain and the process mesh.
#[derive(Debug)]
pub struct Distributor {
    layouts: Vec<Arc<Layout>>,
    paths: Vec<TransformStep>,
    mesh: Vec<usize>,
    comm: Arc<dyn Communicator>,
}

impl Distributor {
    pub(crate) fn new(bases: &[Arc<dyn Basis>], mesh: Vec<usize>, comm: Arc<dyn Communicator>) -> Self {
        let dim = bases.len();
        let coords = unravel_index(comm.rank(), &mesh);
        let mut grid_space = vec![false; dim];
        let mut distribution: Vec<Option<usize>> = (0..dim).map(|axis| (axis < mesh.len()).then(|| axis)).collect();

        let dtype = |grid_space: &[bool]| {
            let complex = bases
                .iter()
                .zip(grid_space)
                .any(|(basis, &grid)| !grid && basis.complex_coefficients());
            if complex {
                DType::Complex
            } else {
                DType::Real
            }
        };
        let mut layouts = Vec::new();
        let mut push_layout = |grid_space: &[bool], distribution: &[Option<usize>]| {
            layouts.push(Arc::new(Layout {
                index: layouts.len(),
                grid_space: grid_space.to_vec(),
                distribution: distribution.to_vec(),
                mesh: mesh.clone(),
                coords: coords.clone(),
                dtype: dtype(grid_space),
            }));
        };

        let mut paths = Vec::new();
        push_layout(&grid_space, &distribution);
        for axis in (0..dim).rev() {
            if let Some(mesh_dim) = distribution[axis] {
                distribution[axis] = None;
                distribution[axis + 1] = Some(mesh_dim);
                paths.push(TransformStep::Transpose { mesh_dim, axis });
                push_layout(&grid_space, &distribution);
            }
            grid_space[axis] = true;
            paths.push(TransformStep::Transform { axis });
            push_layout(&grid_space, &distribution);
        }
        debug!("Built layout chain with {} layouts over mesh {:?}", layouts.len(), mesh);

        Self {
            layouts,
            paths,
            mesh,
            comm,
        }
    }

    pub fn layouts(&self) -> &[Arc<Layout>] {
        &self.layouts
    }

    pub fn layout(&self, index: usize) -> &Arc<Layout> {
        &self.layouts[index]
    }

    pub fn coeff_layout(&self) -> &Arc<Layout> {
        &self.layouts[0]
    }

    pub fn grid_layout(&self) -> &Arc<Layout> {
        self.layouts
            .last()
            .expect("Internal error: Layout chain is never empty")
    }

    /// Step connecting layout `index` to layout `index + 1`.
    pub fn path(&self, index: usize) -> &TransformStep {
        &self.paths[index]
    }

    pub fn paths(&self) -> &[TransformStep] {
        &self.paths
    }

    pub fn mesh(&self) -> &[usize] {
        &self.mesh
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Number of elements needed to hold a field with the given bases and scales in any layout.
    pub fn buffer_size(&self, bases: &[Option<Arc<dyn Basis>>], scales: &[f64]) -> usize {
        self.layouts
            .iter()
            .map(|layout| layout.local_shape(bases, scales).iter().product::<usize>())
            .max()
            .unwrap_or(0)
    }
}
