use crate::{channel_domain, fourier_domain, grid_field};
use proptest::prelude::*;
use spectre::field::{Field, Parity};
use spectre::operators::{
    add, cast, differentiate, integrate, multiply, power, product, subtract, sum, time_derivative, GridFunctions,
    OperatorFamily, OperatorKind,
};
use spectre::{Error, FieldRef, Operand, Var};
use std::f64::consts::PI;
use util::assert_approx_array_eq;

fn field(domain: &std::sync::Arc<spectre::domain::Domain>, name: &str) -> Operand {
    Operand::field(Field::new(domain, name))
}

#[test]
fn differentiating_constants_gives_zero() {
    let domain = channel_domain(4, 6);
    assert!(differentiate(&domain, 0, 3.0).unwrap().is_number(0.0));

    let c = Operand::field(Field::constant(&domain, "c"));
    assert!(differentiate(&domain, 1, c).unwrap().is_number(0.0));
}

#[test]
fn integrating_constant_number_multiplies_by_length() {
    let domain = fourier_domain(8);
    let result = integrate(&domain, 0, 3.0).unwrap();
    let value = result.as_number().unwrap();
    assert!((value - 6.0 * PI).abs() < 1e-12);
}

#[test]
fn trivial_powers_simplify() {
    let domain = fourier_domain(8);
    let u = field(&domain, "u");
    assert!(power(u.clone(), 0.0).unwrap().is_number(1.0));
    assert!(power(u.clone(), 1.0).unwrap().same_as(&u));
    assert!(power(2.0, 3.0).unwrap().is_number(8.0));
    assert!(matches!(power(u.clone(), 2.0).unwrap().kind(), Some(OperatorKind::Power)));
}

#[test]
fn variable_exponent_is_rejected() {
    let domain = fourier_domain(8);
    let u = field(&domain, "u");
    let v = field(&domain, "v");
    assert!(matches!(power(u, v), Err(Error::Nonlinear(_))));
}

#[test]
fn sums_and_products_flatten_and_fold_numbers() {
    let domain = fourier_domain(8);
    let (u, v, w) = (field(&domain, "u"), field(&domain, "v"), field(&domain, "w"));

    let s = add(add(u.clone(), v.clone()).unwrap(), add(w.clone(), 0.0).unwrap()).unwrap();
    assert!(matches!(s.kind(), Some(OperatorKind::Add)));
    assert_eq!(s.args().len(), 3);

    let p = product(vec![2.0.into(), u.clone(), multiply(3.0, v.clone()).unwrap()]).unwrap();
    assert_eq!(p.args().len(), 3);
    assert!(p.args()[0].is_number(6.0));

    assert!(multiply(0.0, u.clone()).unwrap().is_number(0.0));
    assert!(sum(Vec::new()).unwrap().is_number(0.0));
    assert!(subtract(u.clone(), 0.0).unwrap().same_as(&u));
}

#[test]
fn structurally_identical_expressions_share_keys() {
    let domain = fourier_domain(8);
    let u = field(&domain, "u");
    let a = multiply(u.clone(), u.sin().unwrap()).unwrap();
    let b = multiply(u.clone(), u.sin().unwrap()).unwrap();
    assert_eq!(a.key(), b.key());
    assert!(a.same_as(&b));

    let c = multiply(u.clone(), u.cos().unwrap()).unwrap();
    assert!(!a.same_as(&c));
}

#[test]
fn mixing_operands_from_different_domains_fails() {
    let a = field(&fourier_domain(8), "a");
    let b = field(&fourier_domain(8), "b");
    assert!(matches!(add(a, b), Err(Error::DomainMismatch(_))));
}

#[test]
fn sym_diff_of_atoms() {
    let domain = fourier_domain(8);
    let (u, v) = (field(&domain, "u"), field(&domain, "v"));
    assert!(u.sym_diff(&u).unwrap().is_number(1.0));
    assert!(v.sym_diff(&u).unwrap().is_number(0.0));
    assert!(Operand::Number(4.0).sym_diff(&u).unwrap().is_number(0.0));
}

#[test]
fn sym_diff_of_products_and_functions() {
    let domain = fourier_domain(8);
    let (u, v) = (field(&domain, "u"), field(&domain, "v"));

    let uv = multiply(u.clone(), v.clone()).unwrap();
    assert!(uv.sym_diff(&u).unwrap().same_as(&v));

    let sin_u = u.sin().unwrap();
    assert!(sin_u.sym_diff(&u).unwrap().same_as(&u.cos().unwrap()));

    // d(u^3)/du = 3 u^2
    let cube = power(u.clone(), 3.0).unwrap();
    let expected = multiply(3.0, power(u.clone(), 2.0).unwrap()).unwrap();
    assert!(cube.sym_diff(&u).unwrap().same_as(&expected));
}

#[test]
fn grid_functions_reject_odd_parity() {
    let domain = fourier_domain(8);
    let mut u = Field::new(&domain, "u");
    u.set_parity(0, Some(Parity::Odd));
    let u = Operand::field(u);
    assert!(matches!(u.sin(), Err(Error::UndefinedParity(_))));
    assert!(u.sin().is_err());

    // Squaring restores even parity
    let square = power(u.clone(), 2.0).unwrap();
    assert_eq!(square.parity(0), Some(Parity::Even));
    assert!(square.exp().is_ok());
}

#[test]
fn differentiation_flips_parity() {
    let domain = fourier_domain(8);
    let mut u = Field::new(&domain, "u");
    u.set_parity(0, Some(Parity::Even));
    let du = differentiate(&domain, 0, u).unwrap();
    assert_eq!(du.parity(0), Some(Parity::Odd));
}

#[test]
fn cast_rejects_non_finite_values() {
    let domain = fourier_domain(8);
    assert!(matches!(cast(f64::NAN, &domain), Err(Error::Cast(_))));
    let c = cast(2.0, &domain).unwrap();
    assert!(matches!(c.kind(), Some(OperatorKind::Cast)));
    assert!(c.is_constant());
    assert!(cast(c.clone(), &domain).unwrap().same_as(&c));
}

#[test]
fn linear_operators_distribute_over_sums_on_expansion() {
    let domain = channel_domain(4, 6);
    let (u, v) = (field(&domain, "u"), field(&domain, "v"));
    let vars: Vec<Var> = vec![u.clone().into(), v.clone().into()];

    let expr = differentiate(&domain, 1, add(u.clone(), v.clone()).unwrap()).unwrap();
    let expanded = expr.expand(&vars).unwrap();
    assert!(matches!(expanded.kind(), Some(OperatorKind::Add)));
    let expected = add(
        differentiate(&domain, 1, u.clone()).unwrap(),
        differentiate(&domain, 1, v.clone()).unwrap(),
    )
    .unwrap();
    assert!(expanded.same_as(&expected));
}

#[test]
fn products_distribute_over_sums_containing_variables() {
    let domain = fourier_domain(8);
    let (u, v, f) = (field(&domain, "u"), field(&domain, "v"), field(&domain, "f"));
    let vars: Vec<Var> = vec![u.clone().into(), v.clone().into()];

    let expr = multiply(f.clone(), add(u.clone(), v.clone()).unwrap()).unwrap();
    let expanded = expr.expand(&vars).unwrap();
    assert!(matches!(expanded.kind(), Some(OperatorKind::Add)));
    assert_eq!(expanded.args().len(), 2);
    for term in expanded.args() {
        assert!(matches!(term.kind(), Some(OperatorKind::Multiply)));
    }
}

#[test]
fn time_derivative_follows_product_rule() {
    let domain = fourier_domain(8);
    let (u, f) = (field(&domain, "u"), field(&domain, "f"));
    assert!(time_derivative(5.0).unwrap().is_number(0.0));
    assert!(time_derivative(cast(2.0, &domain).unwrap()).unwrap().is_number(0.0));

    let expr = time_derivative(multiply(f.clone(), u.clone()).unwrap()).unwrap();
    let expanded = expr.expand(&[u.clone().into()]).unwrap();
    assert!(matches!(expanded.kind(), Some(OperatorKind::Add)));
    assert_eq!(expanded.args().len(), 2);
    assert_eq!(expanded.order(OperatorFamily::TimeDerivative), 1);
}

#[test]
fn time_derivative_commutes_inward_through_spatial_operators() {
    let domain = fourier_domain(8);
    let u = field(&domain, "u");
    let expr = time_derivative(differentiate(&domain, 0, u.clone()).unwrap()).unwrap();
    let expanded = expr.expand(&[u.clone().into()]).unwrap();
    let expected = differentiate(&domain, 0, time_derivative(u.clone()).unwrap()).unwrap();
    assert!(expanded.same_as(&expected));
}

#[test]
fn split_separates_variable_terms() {
    let domain = channel_domain(4, 6);
    let (u, v, f) = (field(&domain, "u"), field(&domain, "v"), field(&domain, "f"));
    let du = differentiate(&domain, 1, u.clone()).unwrap();
    let expr = sum(vec![du.clone(), multiply(2.0, v.clone()).unwrap(), f.clone()]).unwrap();

    let (dependent, independent) = expr.split(&[u.clone().into()]).unwrap();
    assert!(dependent.same_as(&du));
    assert!(independent.same_as(&add(multiply(2.0, v.clone()).unwrap(), f.clone()).unwrap()));

    // Splitting by operator family
    let (dependent, independent) = expr.split(&[OperatorFamily::Differentiate.into()]).unwrap();
    assert!(dependent.same_as(&du));
    assert!(!independent.has(&[u.clone().into()]));
}

#[test]
fn linearity_checks() {
    let domain = channel_domain(4, 6);
    let (u, f) = (field(&domain, "u"), field(&domain, "f"));
    let vars: Vec<Var> = vec![u.clone().into()];

    let linear = add(
        multiply(f.clone(), differentiate(&domain, 1, u.clone()).unwrap()).unwrap(),
        u.clone(),
    )
    .unwrap();
    assert!(linear.require_linearity(&vars, None).is_ok());

    let quadratic = multiply(u.clone(), u.clone()).unwrap();
    assert!(matches!(
        quadratic.require_linearity(&vars, Some("u*u")),
        Err(Error::Nonlinear(_))
    ));
    assert!(matches!(u.sin().unwrap().require_linearity(&vars, None), Err(Error::Nonlinear(_))));
    assert!(matches!(f.require_linearity(&vars, None), Err(Error::Nonlinear(_))));
}

#[test]
fn separability_reflects_coupling_operators() {
    let domain = channel_domain(4, 6);
    let (u, f) = (field(&domain, "u"), field(&domain, "f"));
    let vars: Vec<Var> = vec![u.clone().into()];

    let dx = differentiate(&domain, 0, u.clone()).unwrap();
    assert_eq!(dx.separability(&vars).unwrap(), vec![true, true]);

    let dz = differentiate(&domain, 1, u.clone()).unwrap();
    assert_eq!(dz.separability(&vars).unwrap(), vec![true, false]);

    let ncc = multiply(f.clone(), u.clone()).unwrap();
    assert_eq!(ncc.separability(&vars).unwrap(), vec![false, false]);
}

#[test]
fn order_counts_nested_operators() {
    let domain = fourier_domain(8);
    let u = field(&domain, "u");
    let ddu = differentiate(&domain, 0, differentiate(&domain, 0, u.clone()).unwrap()).unwrap();
    assert_eq!(ddu.order(OperatorFamily::Differentiate), 2);
    assert_eq!(ddu.order(OperatorFamily::Integrate), 0);
}

#[test]
fn factor_collects_powers_of_variables() {
    let domain = fourier_domain(8);
    let (u, f) = (field(&domain, "u"), field(&domain, "f"));
    let expr = product(vec![3.0.into(), f.clone(), u.clone(), power(u.clone(), 2.0).unwrap()]).unwrap();
    let factors = expr.factor(&[u.clone()]).unwrap();
    assert_eq!(factors.powers.len(), 1);
    assert!(factors.powers[0].0.same_as(&u));
    assert_eq!(factors.powers[0].1, 3.0);
    assert!(factors.coefficient.same_as(&multiply(3.0, f.clone()).unwrap()));
}

#[test]
fn replace_rebuilds_expression() {
    let domain = fourier_domain(8);
    let (u, v) = (field(&domain, "u"), field(&domain, "v"));
    let expr = add(multiply(2.0, u.clone()).unwrap(), 1.0).unwrap();
    let replaced = expr.replace(&u, &v).unwrap();
    assert!(replaced.same_as(&add(multiply(2.0, v.clone()).unwrap(), 1.0).unwrap()));
    assert!(expr.replace(&u, &Operand::Number(0.5)).unwrap().is_number(2.0));
}

#[test]
fn atoms_lists_distinct_fields() {
    let domain = fourier_domain(8);
    let (u, v) = (field(&domain, "u"), field(&domain, "v"));
    let expr = sum(vec![u.clone(), multiply(u.clone(), v.clone()).unwrap(), u.sin().unwrap()]).unwrap();
    let names: Vec<_> = expr.atoms().iter().map(FieldRef::name).collect();
    assert_eq!(names, vec!["u".to_string(), "v".to_string()]);
}

proptest! {
    #[test]
    fn split_parts_add_up_to_expression(a in 0.5..5.0f64, b in 0.5..5.0f64, c in 0.5..5.0f64) {
        let domain = fourier_domain(4);
        let u = grid_field(&domain, "u", |x| x[0].sin());
        let v = grid_field(&domain, "v", |x| x[0].cos());
        let expr = sum(vec![
            multiply(a, &u).unwrap(),
            multiply(b, &v).unwrap(),
            c.into(),
        ])
        .unwrap();

        let (dependent, independent) = expr.split(&[(&u).into()]).unwrap();
        prop_assert!(!independent.has(&[(&u).into()]));
        let rebuilt = add(dependent, independent).unwrap();

        let expected = expr.evaluate().unwrap().as_field().unwrap().borrow_mut().grid_data().unwrap();
        let actual = rebuilt.evaluate().unwrap().as_field().unwrap().borrow_mut().grid_data().unwrap();
        assert_approx_array_eq!(actual, expected, abstol = 1e-12);
    }
}
