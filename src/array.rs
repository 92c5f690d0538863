//! Helpers for applying one-dimensional operators to N-dimensional arrays.
use crate::Complex64;
use itertools::izip;
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use num::Zero;

/// Returns `shape` with the extent along `axis` replaced by `n`.
pub fn replace_axis(shape: &[usize], axis: usize, n: usize) -> Vec<usize> {
    let mut shape = shape.to_vec();
    shape[axis] = n;
    shape
}

/// Applies a dense matrix to every lane of `data` along `axis`.
pub fn apply_dense(matrix: &DMatrix<Complex64>, data: &ArrayViewD<Complex64>, axis: usize) -> ArrayD<Complex64> {
    assert_eq!(matrix.ncols(), data.shape()[axis], "Matrix columns must match the extent along axis.");
    let shape = replace_axis(data.shape(), axis, matrix.nrows());
    let mut out = ArrayD::zeros(IxDyn(&shape));
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(data.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            for (i, out_i) in out_lane.iter_mut().enumerate() {
                let mut sum = Complex64::zero();
                for (j, x) in in_lane.iter().enumerate() {
                    sum += matrix[(i, j)] * x;
                }
                *out_i = sum;
            }
        });
    out
}

/// Applies a sparse matrix to every lane of `data` along `axis`.
pub fn apply_sparse(matrix: &CsrMatrix<Complex64>, data: &ArrayViewD<Complex64>, axis: usize) -> ArrayD<Complex64> {
    assert_eq!(matrix.ncols(), data.shape()[axis], "Matrix columns must match the extent along axis.");
    let shape = replace_axis(data.shape(), axis, matrix.nrows());
    let mut out = ArrayD::zeros(IxDyn(&shape));
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(data.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            for (out_i, row) in out_lane.iter_mut().zip(matrix.row_iter()) {
                let mut sum = Complex64::zero();
                for (&j, v) in izip!(row.col_indices(), row.values()) {
                    sum += v * in_lane[j];
                }
                *out_i = sum;
            }
        });
    out
}

/// Row-major unraveling of a flat index into a multi-index for the given shape.
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (i, &n) in shape.iter().enumerate().rev() {
        index[i] = flat % n;
        flat /= n;
    }
    index
}
