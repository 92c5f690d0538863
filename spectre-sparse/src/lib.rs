//! Sparse matrix routines used to assemble pencil systems.
//!
//! Everything here works on `nalgebra-sparse` CSR matrices. Most routines are generic over the
//! scalar type so that they can be used both with real and complex matrices.

use itertools::{izip, Itertools};
use nalgebra::{ClosedAdd, ClosedMul, DMatrix, DVector, DVectorView, Scalar};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num::{One, Zero};

/// Builds a CSR matrix from unsorted triplets, summing duplicate entries.
fn csr_from_triplets<T>(nrows: usize, ncols: usize, triplets: impl IntoIterator<Item = (usize, usize, T)>) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd,
{
    let mut coo = CooMatrix::new(nrows, ncols);
    for (i, j, v) in triplets {
        coo.push(i, j, v);
    }
    CsrMatrix::from(&coo)
}

/// Builds a `nrows x ncols` matrix by querying `entry(i, j)` on each of the given band offsets.
///
/// Entry `(i, j)` is visited when `j = i + b` for some band offset `b` and `j` lies in
/// bounds. Zero entries are not stored.
pub fn banded<T>(nrows: usize, ncols: usize, bands: &[isize], mut entry: impl FnMut(usize, usize) -> T) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd,
{
    let mut triplets = Vec::new();
    for i in 0..nrows {
        for &b in bands {
            let j = i as isize + b;
            if j >= 0 && (j as usize) < ncols {
                let j = j as usize;
                let value = entry(i, j);
                if !value.is_zero() {
                    triplets.push((i, j, value));
                }
            }
        }
    }
    csr_from_triplets(nrows, ncols, triplets)
}

/// Builds a matrix with a single non-zero row.
pub fn single_row<T>(nrows: usize, ncols: usize, row: usize, mut entry: impl FnMut(usize) -> T) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd,
{
    assert!(row < nrows, "Row index out of bounds.");
    let triplets = (0..ncols).filter_map(|j| {
        let value = entry(j);
        (!value.is_zero()).then(|| (row, j, value))
    });
    csr_from_triplets(nrows, ncols, triplets.collect::<Vec<_>>())
}

/// Sparse identity of the given dimension.
pub fn identity<T>(n: usize) -> CsrMatrix<T>
where
    T: Scalar + Zero + One + ClosedAdd,
{
    csr_from_triplets(n, n, (0..n).map(|i| (i, i, T::one())))
}

/// Builds a square diagonal matrix from the given diagonal entries, skipping zeros.
pub fn diagonal<T>(diag: &[T]) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd,
{
    let n = diag.len();
    let triplets = diag
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_zero())
        .map(|(i, v)| (i, i, v.clone()));
    csr_from_triplets(n, n, triplets.collect::<Vec<_>>())
}

/// Sparse Kronecker product `a ⊗ b`.
pub fn kron<T>(a: &CsrMatrix<T>, b: &CsrMatrix<T>) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd + ClosedMul,
{
    let (bm, bn) = (b.nrows(), b.ncols());
    let mut triplets = Vec::with_capacity(a.nnz() * b.nnz());
    for (ia, ja, va) in a.triplet_iter() {
        for (ib, jb, vb) in b.triplet_iter() {
            triplets.push((ia * bm + ib, ja * bn + jb, va.clone() * vb.clone()));
        }
    }
    csr_from_triplets(a.nrows() * bm, a.ncols() * bn, triplets)
}

/// Sparse Kronecker product `a ⊗ b` where `b` is a small dense matrix.
///
/// Zero entries of `b` are skipped, so the result has the sparsity implied by both factors.
pub fn kron_dense<T>(a: &CsrMatrix<T>, b: &DMatrix<T>) -> CsrMatrix<T>
where
    T: Scalar + Zero + ClosedAdd + ClosedMul,
{
    let (bm, bn) = b.shape();
    let mut triplets = Vec::new();
    for (ia, ja, va) in a.triplet_iter() {
        for jb in 0..bn {
            for ib in 0..bm {
                let vb = &b[(ib, jb)];
                if !vb.is_zero() {
                    triplets.push((ia * bm + ib, ja * bn + jb, va.clone() * vb.clone()));
                }
            }
        }
    }
    csr_from_triplets(a.nrows() * bm, a.ncols() * bn, triplets)
}

/// Returns the sorted indices of rows containing at least one non-zero value.
///
/// Explicitly stored zeros do not count.
pub fn nonzero_rows<T>(a: &CsrMatrix<T>) -> Vec<usize>
where
    T: Scalar + Zero,
{
    a.row_iter()
        .enumerate()
        .filter(|(_, row)| row.values().iter().any(|v| !v.is_zero()))
        .map(|(i, _)| i)
        .collect()
}

/// Returns a copy of `a` in which the given rows hold no entries.
pub fn clear_rows<T>(a: &CsrMatrix<T>, rows: &[usize]) -> CsrMatrix<T>
where
    T: Scalar,
{
    let mut cleared = vec![false; a.nrows()];
    for &r in rows {
        assert!(r < a.nrows(), "Row index out of bounds.");
        cleared[r] = true;
    }

    let mut offsets = Vec::with_capacity(a.nrows() + 1);
    let mut indices = Vec::new();
    let mut values = Vec::new();
    offsets.push(0);
    for (row, is_cleared) in a.row_iter().zip(&cleared) {
        if !is_cleared {
            indices.extend_from_slice(row.col_indices());
            values.extend_from_slice(row.values());
        }
        offsets.push(indices.len());
    }
    CsrMatrix::try_from_csr_data(a.nrows(), a.ncols(), offsets, indices, values)
        .expect("Internal error: Removing rows from a valid CSR matrix must give a valid CSR matrix")
}

/// Computes the union of two sparsity patterns of equal dimensions.
pub fn union_pattern(a: &SparsityPattern, b: &SparsityPattern) -> SparsityPattern {
    assert_eq!(a.major_dim(), b.major_dim(), "Patterns must have the same major dimension.");
    assert_eq!(a.minor_dim(), b.minor_dim(), "Patterns must have the same minor dimension.");

    let mut offsets = Vec::with_capacity(a.major_dim() + 1);
    let mut indices = Vec::with_capacity(a.nnz().max(b.nnz()));
    offsets.push(0);
    for lane in 0..a.major_dim() {
        // Both lanes are sorted, so a merge gives the sorted union
        indices.extend(a.lane(lane).iter().merge(b.lane(lane)).dedup().copied());
        offsets.push(indices.len());
    }
    SparsityPattern::try_from_offsets_and_indices(a.major_dim(), a.minor_dim(), offsets, indices)
        .expect("Internal error: The union of two valid patterns must be a valid pattern")
}

/// Returns a zero matrix whose pattern is the union of the patterns of `a` and `b`.
pub fn zeros_with_pattern<T>(a: &CsrMatrix<T>, b: &CsrMatrix<T>) -> CsrMatrix<T>
where
    T: Scalar + Zero,
{
    let pattern = union_pattern(a.pattern(), b.pattern());
    let values = vec![T::zero(); pattern.nnz()];
    CsrMatrix::try_from_pattern_and_values(pattern, values)
        .expect("Internal error: Pattern and value count agree by construction")
}

/// Re-expresses `a` on the (larger) sparsity pattern of `target`, storing explicit zeros where
/// `a` has no entry.
///
/// # Panics
///
/// Panics if the pattern of `a` is not contained in the pattern of `target`.
pub fn expand_pattern<T>(a: &CsrMatrix<T>, target: &CsrMatrix<T>) -> CsrMatrix<T>
where
    T: Scalar + Zero,
{
    assert_eq!(a.nrows(), target.nrows(), "Row counts must agree.");
    assert_eq!(a.ncols(), target.ncols(), "Column counts must agree.");
    let pattern = target.pattern().clone();
    let mut values = vec![T::zero(); pattern.nnz()];
    for (i, row) in a.row_iter().enumerate() {
        let offset = pattern.major_offsets()[i];
        let lane = pattern.lane(i);
        for (j, v) in izip!(row.col_indices(), row.values()) {
            let local = lane
                .binary_search(j)
                .expect("Pattern of matrix must be contained in target pattern");
            values[offset + local] = v.clone();
        }
    }
    CsrMatrix::try_from_pattern_and_values(pattern, values)
        .expect("Internal error: Pattern and value count agree by construction")
}

/// Computes `alpha * a + beta * b` for two matrices sharing the same sparsity pattern.
///
/// Only the value arrays are combined, so the result has exactly the shared pattern.
///
/// # Panics
///
/// Panics if the patterns differ.
pub fn combine_same_pattern<T>(alpha: T, a: &CsrMatrix<T>, beta: T, b: &CsrMatrix<T>) -> CsrMatrix<T>
where
    T: Scalar + ClosedAdd + ClosedMul,
{
    assert!(a.pattern() == b.pattern(), "Matrices must share the same sparsity pattern.");
    let values = izip!(a.values(), b.values())
        .map(|(va, vb)| alpha.clone() * va.clone() + beta.clone() * vb.clone())
        .collect();
    CsrMatrix::try_from_pattern_and_values(a.pattern().clone(), values)
        .expect("Internal error: Pattern and value count agree by construction")
}

/// Sparse matrix-vector product `a * x`.
pub fn spmv<T>(a: &CsrMatrix<T>, x: DVectorView<T>) -> DVector<T>
where
    T: Scalar + Zero + ClosedAdd + ClosedMul,
{
    assert_eq!(a.ncols(), x.len(), "Dimension mismatch in matrix-vector product.");
    let mut y = DVector::zeros(a.nrows());
    for (i, row) in a.row_iter().enumerate() {
        let mut sum = T::zero();
        for (&j, v) in izip!(row.col_indices(), row.values()) {
            sum += v.clone() * x[j].clone();
        }
        y[i] = sum;
    }
    y
}

/// Converts a CSR matrix to a dense matrix.
pub fn to_dense<T>(a: &CsrMatrix<T>) -> DMatrix<T>
where
    T: Scalar + Zero + ClosedAdd,
{
    let mut dense = DMatrix::zeros(a.nrows(), a.ncols());
    for (i, j, v) in a.triplet_iter() {
        dense[(i, j)] += v.clone();
    }
    dense
}

/// Returns `true` if the dense matrix has at least one non-zero entry.
pub fn any_nonzero<T>(a: &DMatrix<T>) -> bool
where
    T: Scalar + Zero,
{
    a.iter().any(|v| !v.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banded_skips_out_of_range_offsets() {
        let a = banded(3, 3, &[-1, 0, 2], |i, j| (10 * i + j) as f64 + 1.0);
        let dense = to_dense(&a);
        assert_eq!(dense[(0, 0)], 1.0);
        assert_eq!(dense[(0, 2)], 3.0);
        assert_eq!(dense[(1, 0)], 11.0);
        assert_eq!(dense[(2, 1)], 22.0);
        assert_eq!(a.nnz(), 6);
    }
}
