use super::{real, select_ncc_terms, Basis, BasisDescriptor, BasisFamily, BasisOperator, NccExpansion, Position, TransformCache};
use crate::settings::NccSettings;
use crate::Complex64;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use num::Zero;
use ordered_float::OrderedFloat;
use spectre_sparse::{banded, identity, single_row};
use std::f64::consts::PI;
use std::sync::Arc;

/// Chebyshev polynomials of the first kind on a bounded interval, collocated on the Gauss grid.
///
/// Pencil equations are preconditioned into the second-kind basis, where differentiation and
/// multiplication by the coordinate are banded. The last two rows carry boundary data.
#[derive(Debug)]
pub struct Chebyshev {
    name: String,
    size: usize,
    interval: (f64, f64),
    transforms: TransformCache,
}

impl Chebyshev {
    pub fn new(name: impl Into<String>, size: usize, interval: (f64, f64)) -> Self {
        assert!(size >= 2, "Chebyshev basis must have at least two modes.");
        assert!(interval.1 > interval.0, "Interval must have positive length.");
        Self {
            name: name.into(),
            size,
            interval,
            transforms: TransformCache::default(),
        }
    }

    fn center(&self) -> f64 {
        0.5 * (self.interval.0 + self.interval.1)
    }

    fn radius(&self) -> f64 {
        0.5 * (self.interval.1 - self.interval.0)
    }

    /// Position mapped onto the native interval `[-1, 1]`.
    fn native_coordinate(&self, position: &Position) -> f64 {
        match *position {
            Position::Left => -1.0,
            Position::Center => 0.0,
            Position::Right => 1.0,
            Position::Value(x) => (x - self.center()) / self.radius(),
        }
    }

    /// Native Gauss grid angles.
    fn angles(&self, scale: f64) -> Vec<f64> {
        let ng = self.grid_size(scale);
        (0..ng).map(|j| PI * (j as f64 + 0.5) / ng as f64).collect()
    }

    /// Integral of `T_j` over the physical interval.
    fn integral_weight(&self, j: usize) -> f64 {
        if j % 2 == 0 {
            let j = j as f64;
            2.0 / (1.0 - j * j) * self.radius()
        } else {
            0.0
        }
    }

    fn derivative_entry(&self, i: usize, j: usize) -> f64 {
        if j > i && (j - i) % 2 == 1 {
            let c_i = if i == 0 { 2.0 } else { 1.0 };
            2.0 * j as f64 / c_i / self.radius()
        } else {
            0.0
        }
    }

    fn odd_bands(&self) -> Vec<isize> {
        (1..self.size as isize).step_by(2).collect()
    }

    /// Multiplication by the native coordinate: `x T_0 = T_1`, `x T_j = (T_{j+1} + T_{j-1}) / 2`.
    fn mult1(&self) -> CsrMatrix<Complex64> {
        banded(self.size, self.size, &[-1, 1], |i, j| {
            if i == j + 1 && j == 0 {
                real(1.0)
            } else {
                real(0.5)
            }
        })
    }
}

/// `T_j(x)` for `x` in `[-1, 1]`.
fn chebyshev_t(j: usize, x: f64) -> f64 {
    (j as f64 * x.clamp(-1.0, 1.0).acos()).cos()
}

impl Basis for Chebyshev {
    fn descriptor(&self) -> BasisDescriptor {
        BasisDescriptor {
            family: BasisFamily::Chebyshev,
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
        false
    }

    fn complex_coefficients(&self) -> bool {
        false
    }

    fn grid(&self, scale: f64) -> Vec<f64> {
        self.angles(scale)
            .into_iter()
            .map(|theta| self.center() + self.radius() * theta.cos())
            .collect()
    }

    fn forward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>> {
        self.transforms.get_or_build(scale, || build_transforms(self, scale)).0
    }

    fn backward_matrix(&self, scale: f64) -> Arc<DMatrix<Complex64>> {
        self.transforms.get_or_build(scale, || build_transforms(self, scale)).1
    }

    fn trans_diff(&self, _index: usize) -> Option<Complex64> {
        None
    }

    fn operator_bands(&self, op: &BasisOperator) -> Option<Vec<isize>> {
        match op {
            BasisOperator::Differentiate => Some(self.odd_bands()),
            BasisOperator::HilbertTransform => None,
            BasisOperator::Convert(output) => {
                let descriptor = output.descriptor();
                let compatible = descriptor.family == BasisFamily::Chebyshev
                    && descriptor.interval == self.descriptor().interval;
                compatible.then(|| vec![0])
            }
            _ => Some(Vec::new()),
        }
    }

    fn operator_entry(&self, op: &BasisOperator, i: usize, j: usize) -> Complex64 {
        match op {
            BasisOperator::Differentiate => real(self.derivative_entry(i, j)),
            BasisOperator::Convert(_) if i == j => real(1.0),
            _ => Complex64::zero(),
        }
    }

    fn functional_entry(&self, op: &BasisOperator, j: usize) -> Complex64 {
        match op {
            BasisOperator::Integrate => real(self.integral_weight(j)),
            BasisOperator::Interpolate(position) => real(chebyshev_t(j, self.native_coordinate(position))),
            BasisOperator::Filter(mode) if *mode == j => real(1.0),
            _ => Complex64::zero(),
        }
    }

    /// Conversion from first-kind to second-kind coefficients.
    fn pre(&self) -> CsrMatrix<Complex64> {
        banded(self.size, self.size, &[0, 2], |i, j| {
            if i == j {
                if i == 0 {
                    real(1.0)
                } else {
                    real(0.5)
                }
            } else {
                real(-0.5)
            }
        })
    }

    fn diff(&self) -> CsrMatrix<Complex64> {
        banded(self.size, self.size, &self.odd_bands(), |i, j| real(self.derivative_entry(i, j)))
    }

    fn mult(&self, p: usize) -> CsrMatrix<Complex64> {
        let mult1 = self.mult1();
        let mut result = identity(self.size);
        for _ in 0..p {
            result = &mult1 * &result;
        }
        result
    }

    fn left(&self) -> CsrMatrix<Complex64> {
        single_row(self.size, self.size, self.size - 1, |j| real(if j % 2 == 0 { 1.0 } else { -1.0 }))
    }

    fn right(&self) -> CsrMatrix<Complex64> {
        single_row(self.size, self.size, self.size - 2, |_| real(1.0))
    }

    fn int(&self) -> CsrMatrix<Complex64> {
        single_row(self.size, self.size, self.size - 1, |j| real(self.integral_weight(j)))
    }

    fn bc_vector(&self) -> DVector<Complex64> {
        let mut v = DVector::zeros(self.size);
        v[self.size - 2] = real(1.0);
        v[self.size - 1] = real(1.0);
        v
    }

    fn ncc_matrix(&self, coeffs: &[Complex64], settings: &NccSettings) -> NccExpansion {
        assert_eq!(coeffs.len(), self.size, "Coefficient count must match basis size.");
        let terms = select_ncc_terms(coeffs, settings, |n| n);
        // T_n T_m = (T_{n+m} + T_{|n-m|}) / 2
        let mut coo = CooMatrix::new(self.size, self.size);
        for &n in &terms {
            let half = coeffs[n] * 0.5;
            for m in 0..self.size {
                if n + m < self.size {
                    coo.push(n + m, m, half);
                }
                coo.push(n.abs_diff(m), m, half);
            }
        }
        NccExpansion {
            n_terms: terms.len(),
            max_term: terms.iter().copied().max().unwrap_or(0),
            matrix: CsrMatrix::from(&coo),
        }
    }
}

fn build_transforms(basis: &Chebyshev, scale: f64) -> (DMatrix<Complex64>, DMatrix<Complex64>) {
    let angles = basis.angles(scale);
    let ng = angles.len();
    let forward = DMatrix::from_fn(ng, basis.size, |j, n| real((n as f64 * angles[j]).cos()));
    let backward = DMatrix::from_fn(basis.size, ng, |n, j| {
        let weight = if n == 0 { 1.0 } else { 2.0 };
        real(weight * (n as f64 * angles[j]).cos() / ng as f64)
    });
    (forward, backward)
}
