use crate::{chebyshev_domain, expected_on_grid, fourier_domain, grid_field};
use spectre::basis::Position;
use spectre::ndarray::ArrayD;
use spectre::operators::{
    add, cast, convert, differentiate, filter, general_function, integrate, interpolate, multiply, power, time_derivative,
    GeneralFunction, GridFunctions,
};
use spectre::{Complex64, Error, Evaluator, FieldRef, Operand};
use std::f64::consts::PI;
use util::assert_approx_array_eq;

fn grid_values(result: &Operand) -> ArrayD<Complex64> {
    result
        .as_field()
        .expect("Expected a field")
        .borrow_mut()
        .grid_data()
        .unwrap()
}

fn expected(field: &FieldRef, f: impl Fn(&[f64]) -> f64) -> Vec<Complex64> {
    let mut field = field.borrow_mut();
    field.require_grid_space(None).unwrap();
    expected_on_grid(&field, f)
}

#[test]
fn products_and_sums_act_pointwise() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].sin());
    let v = grid_field(&domain, "v", |x| x[0].cos());

    let expr = add(multiply(&u, &v).unwrap(), 2.0).unwrap();
    let result = expr.evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| x[0].sin() * x[0].cos() + 2.0),
        abstol = 1e-12
    );
}

#[test]
fn sum_of_coefficient_space_fields_stays_in_coefficient_space() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].sin());
    let v = grid_field(&domain, "v", |x| (2.0 * x[0]).cos());
    u.borrow_mut().require_coeff_space(None).unwrap();

    let result = add(&u, &v).unwrap().evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_eq!(out.borrow().layout().index(), 0);
    assert_eq!(v.borrow().layout().index(), 0);
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| x[0].sin() + (2.0 * x[0]).cos()),
        abstol = 1e-12
    );
}

#[test]
fn fourier_derivative_of_sine_is_cosine() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| (2.0 * x[0]).sin());
    let result = differentiate(&domain, 0, &u).unwrap().evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| 2.0 * (2.0 * x[0]).cos()),
        abstol = 1e-12
    );
}

#[test]
fn chebyshev_derivative_of_polynomial() {
    let domain = chebyshev_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].powi(3) - x[0]);
    let result = differentiate(&domain, 0, &u).unwrap().evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| 3.0 * x[0] * x[0] - 1.0),
        abstol = 1e-11
    );
}

#[test]
fn symbolic_derivative_of_sine_evaluates_to_cosine() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| 0.5 * x[0].sin());
    let u_op = Operand::from(&u);
    let derivative = u_op.sin().unwrap().sym_diff(&u_op).unwrap();
    let result = derivative.evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| (0.5 * x[0].sin()).cos()),
        abstol = 1e-12
    );
}

#[test]
fn integral_of_field_is_constant() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| 2.0 + x[0].cos());
    let result = integrate(&domain, 0, &u).unwrap().evaluate().unwrap();
    let values = grid_values(&result);
    assert_eq!(values.shape(), &[1]);
    assert!((values[[0]] - Complex64::new(4.0 * PI, 0.0)).norm() < 1e-12);
}

#[test]
fn filter_selects_one_mode() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| 3.0 + x[0].cos());
    let mean = filter(&domain, 0, 0, &u).unwrap().evaluate().unwrap();
    let first = filter(&domain, 0, 1, &u).unwrap().evaluate().unwrap();
    assert!((grid_values(&mean)[[0]] - Complex64::new(3.0, 0.0)).norm() < 1e-12);
    assert!((grid_values(&first)[[0]] - Complex64::new(0.5, 0.0)).norm() < 1e-12);
    assert!(filter(&domain, 0, 1, 2.0).unwrap().is_number(0.0));
}

#[test]
fn converted_number_becomes_constant_field_in_output_basis() {
    let domain = chebyshev_domain(6);
    let converted = convert(&domain, 0, domain.basis(0).clone(), 2.0).unwrap();
    assert!(converted.as_number().is_none());
    assert!(converted.basis(0).is_some());

    let values = grid_values(&converted.evaluate().unwrap());
    assert!(values.iter().all(|v| (v - Complex64::new(2.0, 0.0)).norm() < 1e-12));
}

#[test]
fn integral_of_chebyshev_polynomial() {
    let domain = chebyshev_domain(6);
    let u = grid_field(&domain, "u", |x| 3.0 * x[0] * x[0]);
    let result = integrate(&domain, 0, &u).unwrap().evaluate().unwrap();
    let values = grid_values(&result);
    assert!((values[[0]] - Complex64::new(2.0, 0.0)).norm() < 1e-12);
}

#[test]
fn interpolation_at_boundaries() {
    let domain = chebyshev_domain(6);
    let u = grid_field(&domain, "u", |x| x[0] * x[0] + 2.0 * x[0]);
    let left = interpolate(&domain, 0, Position::Left, &u).unwrap().evaluate().unwrap();
    let right = interpolate(&domain, 0, Position::Right, &u).unwrap().evaluate().unwrap();
    let inner = interpolate(&domain, 0, Position::Value(0.5), &u).unwrap().evaluate().unwrap();
    assert!((grid_values(&left)[[0]] - Complex64::new(-1.0, 0.0)).norm() < 1e-12);
    assert!((grid_values(&right)[[0]] - Complex64::new(3.0, 0.0)).norm() < 1e-12);
    assert!((grid_values(&inner)[[0]] - Complex64::new(1.25, 0.0)).norm() < 1e-12);
}

#[test]
fn powers_and_casts_evaluate() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| 2.0 + x[0].sin());
    let expr = multiply(power(&u, 2.0).unwrap(), cast(0.5, &domain).unwrap()).unwrap();
    let result = expr.evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| 0.5 * (2.0 + x[0].sin()).powi(2)),
        abstol = 1e-12
    );

    let c = cast(1.5, &domain).unwrap().evaluate().unwrap();
    let values = grid_values(&c);
    assert_eq!(values.shape(), &[1]);
    assert_eq!(values[[0]], Complex64::new(1.5, 0.0));
}

#[test]
fn unchanged_arguments_reuse_cached_output() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].sin());
    let v = grid_field(&domain, "v", |x| x[0].cos());
    let expr = multiply(&u, &v).unwrap();

    let mut evaluator = Evaluator::new();
    let first = evaluator.evaluate_field(&expr).unwrap();
    assert_eq!(evaluator.cache_hits(), 0);

    let mut evaluator = Evaluator::new();
    let second = evaluator.evaluate_field(&expr).unwrap();
    assert_eq!(evaluator.cache_hits(), 1);
    assert_eq!(first, second);

    u.borrow_mut().fill_grid(|x| 2.0 * x[0].sin());
    let mut evaluator = Evaluator::new();
    let third = evaluator.evaluate_field(&expr).unwrap();
    assert_eq!(evaluator.cache_hits(), 0);
    let out = third.clone();
    let values = third.borrow_mut().grid_data().unwrap();
    assert_approx_array_eq!(values, expected(&out, |x| 2.0 * x[0].sin() * x[0].cos()), abstol = 1e-12);
}

#[test]
fn bound_output_receives_result() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].sin());
    let target = grid_field(&domain, "target", |_| 0.0);
    let expr = multiply(3.0, &u).unwrap();
    expr.as_operator().unwrap().bind_output(target.clone());

    let result = expr.evaluate().unwrap();
    assert_eq!(result.as_field().unwrap(), &target);
    let values = target.borrow_mut().grid_data().unwrap();
    assert_approx_array_eq!(values, expected(&target, |x| 3.0 * x[0].sin()), abstol = 1e-12);
}

#[test]
fn general_function_runs_in_requested_layout() {
    let domain = fourier_domain(8);
    let grid = domain.distributor().grid_layout().index();
    let u = grid_field(&domain, "u", |x| x[0].cos());
    let v = grid_field(&domain, "v", |x| x[0].sin());
    let function = GeneralFunction::new("weighted", grid, |args| Ok(&args[0] * &args[1] + &args[0]));

    let expr = general_function(function, &domain, vec![(&u).into(), (&v).into()]).unwrap();
    let result = expr.evaluate().unwrap();
    let out = result.as_field().unwrap().clone();
    assert_approx_array_eq!(
        grid_values(&result),
        expected(&out, |x| x[0].cos() * x[0].sin() + x[0].cos()),
        abstol = 1e-12
    );
}

#[test]
fn general_function_errors_are_reported() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].cos());
    let failing = GeneralFunction::new("failing", 0, |_| Err(eyre::eyre!("no data")));
    let expr = general_function(failing, &domain, vec![(&u).into()]).unwrap();
    assert!(matches!(expr.evaluate(), Err(Error::Function(_))));

    let invalid = GeneralFunction::new("invalid", 7, |args| Ok(args[0].to_owned()));
    assert!(general_function(invalid, &domain, vec![(&u).into()]).is_err());
}

#[test]
fn time_derivatives_cannot_be_evaluated() {
    let domain = fourier_domain(8);
    let u = grid_field(&domain, "u", |x| x[0].cos());
    let expr = time_derivative(&u).unwrap();
    assert!(matches!(expr.evaluate(), Err(Error::SymbolicParsing(_))));
}
