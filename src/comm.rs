//! Process communication used by layout transitions and NCC expansion.
use crate::error::{Error, Result};
use crate::Complex64;
use ndarray::ArrayD;
use std::fmt::Debug;

/// Collective operations over the process mesh.
///
/// All operations are blocking. Every rank of the mesh must reach the same call.
pub trait Communicator: Debug + Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Overwrites `data` on every rank with the contents on `root`.
    fn broadcast(&self, data: &mut [Complex64], root: usize);

    /// Moves the distribution of mesh dimension `mesh_dim` from `gather_axis` to `scatter_axis`.
    ///
    /// On entry `data` holds the local block of a field distributed along `gather_axis`. On exit it
    /// holds the local block of the same field distributed along `scatter_axis`, with shape
    /// `target_shape`.
    fn transpose(
        &self,
        data: ArrayD<Complex64>,
        mesh_dim: usize,
        gather_axis: usize,
        scatter_axis: usize,
        target_shape: &[usize],
    ) -> Result<ArrayD<Complex64>>;
}

/// Communicator for a single process.
#[derive(Debug, Default, Copy, Clone)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _data: &mut [Complex64], root: usize) {
        assert_eq!(root, 0, "Serial broadcast must originate from rank 0.");
    }

    fn transpose(
        &self,
        data: ArrayD<Complex64>,
        _mesh_dim: usize,
        gather_axis: usize,
        scatter_axis: usize,
        target_shape: &[usize],
    ) -> Result<ArrayD<Complex64>> {
        // A single process already owns the full extent of both axes
        if data.shape() != target_shape {
            return Err(Error::layout(format!(
                "Serial transpose between axes {} and {} cannot change local shape {:?} to {:?}",
                gather_axis,
                scatter_axis,
                data.shape(),
                target_shape
            )));
        }
        Ok(data)
    }
}
