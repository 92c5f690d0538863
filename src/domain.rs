//! Problem domains: a product of one-dimensional bases distributed over a process mesh.
use crate::basis::Basis;
use crate::comm::{Communicator, SerialCommunicator};
use crate::error::{Error, Result};
use crate::layout::Distributor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(0);

/// A tensor-product domain.
///
/// Every basis except the last must be separable. The last axis carries the one-dimensional
/// boundary value problems of the pencils.
#[derive(Debug)]
pub struct Domain {
    id: u64,
    bases: Vec<Arc<dyn Basis>>,
    dealias: Vec<f64>,
    distributor: Distributor,
}

impl Domain {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dim(&self) -> usize {
        self.bases.len()
    }

    pub fn bases(&self) -> &[Arc<dyn Basis>] {
        &self.bases
    }

    pub fn basis(&self, axis: usize) -> &Arc<dyn Basis> {
        &self.bases[axis]
    }

    /// Index of the axis carrying the basis with the given name.
    pub fn axis_of(&self, name: &str) -> Option<usize> {
        self.bases.iter().position(|basis| basis.name() == name)
    }

    /// Default dealiasing scales.
    pub fn dealias(&self) -> &[f64] {
        &self.dealias
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Bases of a field that is non-constant along every axis.
    pub fn full_bases(&self) -> Vec<Option<Arc<dyn Basis>>> {
        self.bases.iter().cloned().map(Some).collect()
    }

    /// Global grid coordinates along `axis` at the given scale.
    pub fn grid(&self, axis: usize, scale: f64) -> Vec<f64> {
        self.bases[axis].grid(scale)
    }

    /// Expands a scalar scale to one scale per axis.
    pub fn uniform_scales(&self, scale: f64) -> Vec<f64> {
        vec![scale; self.dim()]
    }
}

/// Builder for [`Domain`].
#[derive(Debug, Default)]
pub struct DomainBuilder {
    bases: Vec<Arc<dyn Basis>>,
    dealias: Option<Vec<f64>>,
    mesh: Vec<usize>,
    comm: Option<Arc<dyn Communicator>>,
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_basis(mut self, basis: impl Basis + 'static) -> Self {
        self.bases.push(Arc::new(basis));
        self
    }

    pub fn with_shared_basis(mut self, basis: Arc<dyn Basis>) -> Self {
        self.bases.push(basis);
        self
    }

    pub fn with_dealias(mut self, dealias: Vec<f64>) -> Self {
        self.dealias = Some(dealias);
        self
    }

    /// Shape of the process mesh. Must have fewer dimensions than the domain.
    pub fn with_mesh(mut self, mesh: Vec<usize>) -> Self {
        self.mesh = mesh;
        self
    }

    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = Some(comm);
        self
    }

    pub fn build(self) -> Result<Arc<Domain>> {
        let dim = self.bases.len();
        if dim == 0 {
            return Err(Error::layout("A domain needs at least one basis"));
        }
        if let Some(basis) = self.bases[..dim - 1].iter().find(|basis| !basis.separable()) {
            return Err(Error::layout(format!(
                "Basis '{}' is not separable and may only be used along the last axis",
                basis.name()
            )));
        }
        let dealias = self.dealias.unwrap_or_else(|| vec![1.0; dim]);
        if dealias.len() != dim || dealias.iter().any(|&s| !(s > 0.0)) {
            return Err(Error::layout(format!(
                "Expected {} positive dealias scales, got {:?}",
                dim, dealias
            )));
        }
        if self.mesh.len() >= dim {
            return Err(Error::layout(format!(
                "Process mesh {:?} must have fewer dimensions than the domain ({})",
                self.mesh, dim
            )));
        }
        let comm = self.comm.unwrap_or_else(|| Arc::new(SerialCommunicator));
        let mesh_size: usize = self.mesh.iter().product();
        if self.mesh.iter().any(|&p| p == 0) || mesh_size != comm.size() {
            return Err(Error::layout(format!(
                "Process mesh {:?} does not match communicator size {}",
                self.mesh,
                comm.size()
            )));
        }

        let distributor = Distributor::new(&self.bases, self.mesh, comm);
        Ok(Arc::new(Domain {
            id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
            bases: self.bases,
            dealias,
            distributor,
        }))
    }
}
