use super::{real, select_ncc_terms, Basis, BasisDescriptor, BasisFamily, BasisOperator, NccExpansion, TransformCache};
use crate::settings::NccSettings;
use crate::Complex64;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num::Zero;
use ordered_float::OrderedFloat;
use spectre_sparse::{diagonal, identity, single_row};
use std::f64::consts::PI;
use std::sync::Arc;

/// Complex exponential basis on a periodic interval.
///
/// Coefficient `n` holds the native wavenumber `n` for `n < ceil(N / 2)` and `n - N` otherwise.
#[derive(Debug)]
pub struct Fourier {
    name: String,
    size: usize,
    interval: (f64, f64),
    transforms: TransformCache,
}

impl Fourier {
    pub fn new(name: impl Into<String>, size: usize, interval: (f64, f64)) -> Self {
        assert!(size > 0, "Fourier basis must have at least one mode.");
        assert!(interval.1 > interval.0, "Interval must have positive length.");
        Self {
            name: name.into(),
            size,
            interval,
            transforms: TransformCache::default(),
        }
    }

    /// Native (integer) wavenumber of coefficient `n`.
    pub fn wavenumber(&self, n: usize) -> i64 {
        native_wavenumber(n, self.size)
    }

    /// Coefficient index holding the native wavenumber `k`, if it is resolved.
    pub fn index_of(&self, k: i64) -> Option<usize> {
        let n = self.size as i64;
        if k >= 0 && k < (n + 1) / 2 {
            Some(k as usize)
        } else if k < 0 && k >= -(n / 2) {
            Some((n + k) as usize)
        } else {
            None
        }
    }

    /// Physical wavenumber of coefficient `n`.
    pub fn k(&self, n: usize) -> f64 {
        2.0 * PI * self.wavenumber(n) as f64 / self.problem_length()
    }

    fn shift_triplets(&self, p: i64, scale: Complex64, coo: &mut CooMatrix<Complex64>) {
        for n in 0..self.size {
            if let Some(row) = self.index_of(self.wavenumber(n) + p) {
                coo.push(row, n, scale);
            }
        }
    }
}

impl Basis for Fourier {
    fn descriptor(&self) -> BasisDescriptor {
        BasisDescriptor {
            family: BasisFamily::Fourier,
            name: self.name.clone(),
            size: self.size,
            interval: (OrderedFloat(self.interval.0), OrderedFloat(self.interval.1)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn coeff_size(&self) -> usize {
        self.size
    }

    fn interval(&self) -> (f64, f64) {
        self.interval
    }

    fn separable(&self) -> bool {
        true
    }

    fn complex_coefficients(&self) -> bool {
        true
    }

    fn grid(&self, scale: f64) -> Vec<f64> {
        let ng = self.grid_size(scale);
        let (a, _) = self.interval;
        let length = self.problem_length();
        (0..ng).map(|j| a + length * j as f64 / ng as f64).collect()
    }

    fn forward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>> {
        self.transforms.get_or_build(scale, || build_transforms(self, scale)).0
    }

    fn backward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>> {
        self.transforms.get_or_build(scale, || build_transforms(self, scale)).1
    }

    fn trans_diff(&self, index: usize) -> Option<Complex64> {
        Some(Complex64::new(0.0, self.k(index)))
    }

    fn operator_bands(&self, op: &BasisOperator) -> Option<Vec<isize>> {
        match op {
            BasisOperator::Differentiate | BasisOperator::HilbertTransform => Some(vec![0]),
            BasisOperator::Convert(output) => {
                let descriptor = output.descriptor();
                let compatible = descriptor.family == BasisFamily::Fourier && descriptor.interval == self.descriptor().interval;
                compatible.then(|| {
                    let offset = self.size as isize - output.coeff_size() as isize;
                    if offset == 0 {
                        vec![0]
                    } else {
                        vec![0, offset]
                    }
                })
            }
            _ => Some(Vec::new()),
        }
    }

    fn operator_entry(&self, op: &BasisOperator, i: usize, j: usize) -> Complex64 {
        match op {
            BasisOperator::Differentiate if i == j => Complex64::new(0.0, self.k(j)),
            BasisOperator::HilbertTransform if i == j => {
                Complex64::new(0.0, -(self.wavenumber(j).signum() as f64))
            }
            BasisOperator::Convert(output) => {
                if native_wavenumber(i, output.coeff_size()) == self.wavenumber(j) {
                    real(1.0)
                } else {
                    Complex64::zero()
                }
            }
            _ => Complex64::zero(),
        }
    }

    fn functional_entry(&self, op: &BasisOperator, j: usize) -> Complex64 {
        match op {
            BasisOperator::Integrate if self.wavenumber(j) == 0 => real(self.problem_length()),
            BasisOperator::Interpolate(position) => {
                let x = position.coordinate(self.interval) - self.interval.0;
                Complex64::new(0.0, self.k(j) * x).exp()
            }
            BasisOperator::Filter(mode) if *mode == j => real(1.0),
            _ => Complex64::zero(),
        }
    }

    fn pre(&self) -> CsrMatrix<Complex64> {
        identity(self.size)
    }

    fn diff(&self) -> CsrMatrix<Complex64> {
        let diag: Vec<_> = (0..self.size).map(|n| Complex64::new(0.0, self.k(n))).collect();
        diagonal(&diag)
    }

    /// Shift of every mode by `p` native wavenumbers, i.e. multiplication by `exp(i p x)`.
    fn mult(&self, p: usize) -> CsrMatrix<Complex64> {
        let mut coo = CooMatrix::new(self.size, self.size);
        self.shift_triplets(p as i64, real(1.0), &mut coo);
        CsrMatrix::from(&coo)
    }

    fn left(&self) -> CsrMatrix<Complex64> {
        CsrMatrix::zeros(self.size, self.size)
    }

    fn right(&self) -> CsrMatrix<Complex64> {
        CsrMatrix::zeros(self.size, self.size)
    }

    fn int(&self) -> CsrMatrix<Complex64> {
        let length = self.problem_length();
        single_row(self.size, self.size, 0, |j| {
            if self.wavenumber(j) == 0 {
                real(length)
            } else {
                Complex64::zero()
            }
        })
    }

    fn bc_vector(&self) -> DVector<Complex64> {
        let mut v = DVector::zeros(self.size);
        v[0] = real(1.0);
        v
    }

    fn ncc_matrix(&self, coeffs: &[Complex64], settings: &NccSettings) -> NccExpansion {
        assert_eq!(coeffs.len(), self.size, "Coefficient count must match basis size.");
        let terms = select_ncc_terms(coeffs, settings, |n| self.wavenumber(n).unsigned_abs() as usize);
        let mut coo = CooMatrix::new(self.size, self.size);
        for &n in &terms {
            self.shift_triplets(self.wavenumber(n), coeffs[n], &mut coo);
        }
        let max_term = terms
            .iter()
            .map(|&n| self.wavenumber(n).unsigned_abs() as usize)
            .max()
            .unwrap_or(0);
        NccExpansion {
            n_terms: terms.len(),
            max_term,
            matrix: CsrMatrix::from(&coo),
        }
    }
}

fn native_wavenumber(n: usize, size: usize) -> i64 {
    if n < (size + 1) / 2 {
        n as i64
    } else {
        n as i64 - size as i64
    }
}

fn build_transforms(basis: &Fourier, scale: f64) -> (DMatrix<Complex64>, DMatrix<Complex64>) {
    let ng = basis.grid_size(scale);
    let n = basis.size;
    let phase = |j: usize, m: usize| 2.0 * PI * basis.wavenumber(m) as f64 * j as f64 / ng as f64;
    let forward = DMatrix::from_fn(ng, n, |j, m| Complex64::new(0.0, phase(j, m)).exp());
    let backward = DMatrix::from_fn(n, ng, |m, j| Complex64::new(0.0, -phase(j, m)).exp() / ng as f64);
    (forward, backward)
}
