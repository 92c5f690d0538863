use crate::{channel_domain, chebyshev_domain, expected_on_grid, fourier_domain, grid_field};
use spectre::basis::Basis;
use spectre::field::{BoundaryCondition, Field};
use spectre::nalgebra::DMatrix;
use spectre::settings::{NccSettings, SolverSettings};
use spectre::operators::{add, differentiate, multiply};
use spectre::{Complex64, FieldRef, Var};
use spectre_sparse::to_dense;
use util::assert_approx_array_eq;

fn profile(x: &[f64]) -> f64 {
    x[0].cos() * x[1] * x[1] + (2.0 * x[0]).sin() - 0.5 * x[1]
}

#[test]
fn grid_coeff_round_trip_recovers_grid_values() {
    let domain = channel_domain(8, 6);
    let u = grid_field(&domain, "u", profile);
    let mut u = u.borrow_mut();
    let initial = u.grid_data().unwrap();

    u.require_coeff_space(None).unwrap();
    assert_eq!(u.layout().index(), 0);
    let recovered = u.grid_data().unwrap();
    assert_approx_array_eq!(recovered, initial, abstol = 1e-12);
}

#[test]
fn coefficients_of_resolved_fourier_modes() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| 3.0 + x[0].cos());
    let coeffs = u.borrow_mut().coeff_data().unwrap();
    let expected = [3.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5];
    let expected: Vec<_> = expected.iter().map(|&c| Complex64::new(c, 0.0)).collect();
    assert_approx_array_eq!(coeffs, expected, abstol = 1e-12);
}

#[test]
fn rescaling_keeps_data() {
    let domain = channel_domain(8, 6);
    let u = grid_field(&domain, "u", profile);
    let mut u = u.borrow_mut();
    u.set_scales(&[1.5, 1.5], true).unwrap();
    assert_eq!(u.scales(), &[1.5, 1.5]);

    u.require_grid_space(None).unwrap();
    assert_eq!(u.local_shape(), &[12, 9]);
    let expected = expected_on_grid(&u, profile);
    assert_approx_array_eq!(u.data(), expected, abstol = 1e-12);
}

#[test]
fn rescaling_without_keeping_data_zeroes_the_field() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].sin());
    let mut u = u.borrow_mut();
    let version = u.version();
    u.set_scales(&[2.0], false).unwrap();
    assert!(u.version() > version);
    assert!(u.data().iter().all(|z| *z == Complex64::new(0.0, 0.0)));
    assert!(u.set_scales(&[0.0], false).is_err());
}

#[test]
fn constant_field_broadcasts_value() {
    let domain = channel_domain(4, 6);
    let mut c = Field::constant(&domain, "c");
    c.fill_constant(Complex64::new(2.5, 0.0));
    let coeffs = c.coeff_data().unwrap();
    assert_eq!(coeffs.shape(), &[1, 1]);
    assert_eq!(coeffs[[0, 0]], Complex64::new(2.5, 0.0));
}

#[test]
fn antidifferentiate_with_left_condition() {
    let domain = chebyshev_domain(8);
    let mut f = Field::new(&domain, "f");
    f.fill_grid(|x| 2.0 * x[0]);
    let mut u = Field::new(&domain, "u");
    f.antidifferentiate(0, BoundaryCondition::Left(1.0.into()), &mut u, &SolverSettings::default())
        .unwrap();

    // u = z^2, shifted so that u(-1) = 1
    u.require_grid_space(None).unwrap();
    let expected = expected_on_grid(&u, |x| x[0] * x[0]);
    assert_approx_array_eq!(u.data(), expected, abstol = 1e-11);
}

#[test]
fn antidifferentiate_with_transverse_boundary_profile() {
    let domain = channel_domain(8, 8);
    let mut f = Field::new(&domain, "f");
    f.fill_grid(|x| 2.0 * x[1]);
    let mut g = Field::with_bases(&domain, "g", vec![Some(domain.basis(0).clone()), None]);
    g.fill_grid(|x| x[0].sin());
    g.require_coeff_space(None).unwrap();

    let mut u = Field::new(&domain, "u");
    f.antidifferentiate(1, BoundaryCondition::Left((&g).into()), &mut u, &SolverSettings::default())
        .unwrap();

    // u = z^2 - 1 + sin(x), so that u(x, -1) = sin(x)
    u.require_grid_space(None).unwrap();
    let expected = expected_on_grid(&u, |x| x[1] * x[1] - 1.0 + x[0].sin());
    assert_approx_array_eq!(u.data(), expected, abstol = 1e-11);
}

#[test]
fn boundary_profile_must_be_constant_coefficient_data() {
    let domain = channel_domain(8, 8);
    let mut f = Field::new(&domain, "f");
    let mut u = Field::new(&domain, "u");
    let settings = SolverSettings::default();

    let mut g = Field::with_bases(&domain, "g", vec![Some(domain.basis(0).clone()), None]);
    g.fill_grid(|x| x[0].cos());
    assert!(f
        .antidifferentiate(1, BoundaryCondition::Left((&g).into()), &mut u, &settings)
        .is_err());

    let mut h = Field::new(&domain, "h");
    h.require_coeff_space(None).unwrap();
    assert!(f
        .antidifferentiate(1, BoundaryCondition::Left((&h).into()), &mut u, &settings)
        .is_err());
}

#[test]
fn antidifferentiate_along_transverse_axis_is_rejected() {
    let domain = channel_domain(4, 6);
    let mut f = Field::new(&domain, "f");
    let mut u = Field::new(&domain, "u");
    let bc = BoundaryCondition::Left(0.0.into());
    assert!(f
        .antidifferentiate(0, bc, &mut u, &SolverSettings::default())
        .is_err());
}

#[test]
fn linear_coefficient_expands_to_multiplication_by_coordinate() {
    let domain = chebyshev_domain(6);
    let mut f = Field::new(&domain, "f");
    f.fill_grid(|x| x[0]);
    let expansion = f.as_ncc_operator(&NccSettings::default()).unwrap();

    let expected: DMatrix<Complex64> = to_dense(&domain.basis(0).mult(1));
    assert_approx_array_eq!(to_dense(&expansion.matrix), expected, abstol = 1e-12);
}

#[test]
fn ncc_must_be_constant_along_separable_axes() {
    let domain = channel_domain(4, 6);
    let f = grid_field(&domain, "f", |x| x[0].cos());
    assert!(f.borrow_mut().as_ncc_operator(&NccSettings::default()).is_err());
}

#[test]
fn ncc_matrices_collects_non_constant_coefficients() {
    let domain = chebyshev_domain(6);
    let u = FieldRef::new(Field::new(&domain, "u"));
    let f = grid_field(&domain, "f", |x| x[0]);
    let expr = add(multiply(&f, &u).unwrap(), differentiate(&domain, 0, &u).unwrap()).unwrap();

    let terms = expr
        .ncc_matrices(&[Var::from(&u)], &NccSettings::default())
        .unwrap();
    assert_eq!(terms.len(), 1);
    let expected: DMatrix<Complex64> = to_dense(&domain.basis(0).mult(1));
    assert_approx_array_eq!(to_dense(&terms[0].expansion.matrix), expected, abstol = 1e-12);

    let nonlinear = multiply(&u, &u).unwrap();
    assert!(nonlinear
        .ncc_matrices(&[Var::from(&u)], &NccSettings::default())
        .is_err());
}
