//! Sums, products, powers and casts.
use super::dispatch::{dispatch, Rule, Variant};
use super::{OperatorKind, OperatorNode};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::evaluator::{broadcast_to, enforce_grid, grid_conditions, grid_output_shape, Output};
use crate::operand::{unify_domain, Operand, Var};
use crate::Complex64;
use ndarray::{ArrayD, IxDyn, Zip};
use std::sync::Arc;

/// Sum of operands. Nested sums are flattened and numbers are folded into a single trailing term.
pub fn sum(args: impl IntoIterator<Item = Operand>) -> Result<Operand> {
    let mut terms = Vec::new();
    let mut constant = 0.0;
    let mut push = |term: Operand, terms: &mut Vec<Operand>| match term {
        Operand::Number(value) => constant += value,
        term => terms.push(term),
    };
    for arg in args {
        match arg.kind() {
            Some(OperatorKind::Add) => {
                for term in arg.args() {
                    push(term.clone(), &mut terms);
                }
            }
            _ => push(arg, &mut terms),
        }
    }
    if constant != 0.0 {
        terms.push(Operand::Number(constant));
    }
    build_flat(OperatorKind::Add, terms, 0.0)
}

/// Product of operands. Nested products are flattened and numbers are folded into a single
/// leading factor. A zero factor makes the whole product zero.
pub fn product(args: impl IntoIterator<Item = Operand>) -> Result<Operand> {
    let mut factors = Vec::new();
    let mut coefficient = 1.0;
    let mut push = |factor: Operand, factors: &mut Vec<Operand>| match factor {
        Operand::Number(value) => coefficient *= value,
        factor => factors.push(factor),
    };
    for arg in args {
        match arg.kind() {
            Some(OperatorKind::Multiply) => {
                for factor in arg.args() {
                    push(factor.clone(), &mut factors);
                }
            }
            _ => push(arg, &mut factors),
        }
    }
    // Validate domains even if the product folds away
    unify_domain(&factors, None)?;
    if coefficient == 0.0 {
        return Ok(Operand::Number(0.0));
    }
    if coefficient != 1.0 {
        factors.insert(0, Operand::Number(coefficient));
    }
    build_flat(OperatorKind::Multiply, factors, 1.0)
}

fn build_flat(kind: OperatorKind, args: Vec<Operand>, identity: f64) -> Result<Operand> {
    match args.len() {
        0 => Ok(Operand::Number(identity)),
        1 => Ok(args.into_iter().next().expect("Internal error: Length checked")),
        _ => {
            let domain = unify_domain(&args, None)?
                .expect("Internal error: At most one argument of a flattened node is a number");
            Ok(Operand::Operator(OperatorNode::new(kind, args, domain)?))
        }
    }
}

pub fn add(a: impl Into<Operand>, b: impl Into<Operand>) -> Result<Operand> {
    sum([a.into(), b.into()])
}

pub fn multiply(a: impl Into<Operand>, b: impl Into<Operand>) -> Result<Operand> {
    product([a.into(), b.into()])
}

pub fn negate(a: impl Into<Operand>) -> Result<Operand> {
    multiply(-1.0, a)
}

pub fn subtract(a: impl Into<Operand>, b: impl Into<Operand>) -> Result<Operand> {
    add(a, negate(b)?)
}

pub fn divide(a: impl Into<Operand>, b: impl Into<Operand>) -> Result<Operand> {
    multiply(a, power(b, -1.0)?)
}

/// Distributes a product over the sums among its (expanded) factors that contain `vars`.
pub(crate) fn expand_product(args: &[Operand], vars: &[Var]) -> Result<Operand> {
    let args = args
        .iter()
        .map(|arg| arg.expand(vars))
        .collect::<Result<Vec<_>>>()?;
    for (i, arg) in args.iter().enumerate() {
        if matches!(arg.kind(), Some(OperatorKind::Add)) && arg.has(vars) {
            let terms = arg
                .args()
                .iter()
                .map(|term| {
                    let mut factors = args.clone();
                    factors[i] = term.clone();
                    product(factors)
                })
                .collect::<Result<Vec<_>>>()?;
            return sum(terms)?.expand(vars);
        }
    }
    product(args)
}

struct PowerArgs {
    base: Operand,
    exponent: Operand,
    domain: Option<Arc<Domain>>,
}

fn both_numbers(args: &PowerArgs) -> bool {
    args.base.as_number().is_some() && args.exponent.as_number().is_some()
}

fn fold_numbers(args: &PowerArgs) -> Result<Operand> {
    match (args.base.as_number(), args.exponent.as_number()) {
        (Some(base), Some(exponent)) => Ok(Operand::Number(base.powf(exponent))),
        _ => Err(Error::parsing("Expected numeric base and exponent")),
    }
}

fn exponent_zero(args: &PowerArgs) -> bool {
    args.exponent.is_number(0.0)
}

fn exponent_one(args: &PowerArgs) -> bool {
    args.exponent.is_number(1.0)
}

fn unit(_: &PowerArgs) -> Result<Operand> {
    Ok(Operand::Number(1.0))
}

fn keep_base(args: &PowerArgs) -> Result<Operand> {
    Ok(args.base.clone())
}

fn constant_exponent(args: &PowerArgs) -> bool {
    args.exponent.is_constant()
}

fn build_power(args: &PowerArgs) -> Result<Operand> {
    let domain = args
        .domain
        .clone()
        .ok_or_else(|| Error::parsing("Power of numbers must fold to a number"))?;
    let node = OperatorNode::new(
        OperatorKind::Power,
        vec![args.base.clone(), args.exponent.clone()],
        domain,
    )?;
    Ok(Operand::Operator(node))
}

const POWER_VARIANTS: [Variant<PowerArgs>; 4] = [
    Variant {
        name: "PowerNumbers",
        rule: Rule::Simplify,
        matches: both_numbers,
        build: fold_numbers,
    },
    Variant {
        name: "PowerZero",
        rule: Rule::Simplify,
        matches: exponent_zero,
        build: unit,
    },
    Variant {
        name: "PowerOne",
        rule: Rule::Simplify,
        matches: exponent_one,
        build: keep_base,
    },
    Variant {
        name: "PowerFieldConstant",
        rule: Rule::Construct,
        matches: constant_exponent,
        build: build_power,
    },
];

/// `base ** exponent`. The exponent must be constant along every axis.
pub fn power(base: impl Into<Operand>, exponent: impl Into<Operand>) -> Result<Operand> {
    let (base, exponent) = (base.into(), exponent.into());
    let domain = unify_domain([&base, &exponent], None)?;
    let args = PowerArgs { base, exponent, domain };
    dispatch("Power", &POWER_VARIANTS, &args, || format!("{}**{}", args.base, args.exponent)).map_err(|err| match err {
        Error::SymbolicParsing(_) => Error::nonlinear(format!(
            "Variable exponent {} is not supported in {}**{}",
            args.exponent, args.base, args.exponent
        )),
        err => err,
    })
}

struct CastArgs {
    value: Operand,
    domain: Arc<Domain>,
}

fn is_operand(args: &CastArgs) -> bool {
    args.value.as_number().is_none()
}

fn cast_operand(args: &CastArgs) -> Result<Operand> {
    match args.value.domain() {
        Some(domain) if Arc::ptr_eq(&domain, &args.domain) => Ok(args.value.clone()),
        _ => Err(Error::domain_mismatch(format!(
            "Cannot cast {} to a different domain",
            args.value
        ))),
    }
}

fn is_number(args: &CastArgs) -> bool {
    args.value.as_number().is_some()
}

fn cast_number(args: &CastArgs) -> Result<Operand> {
    match args.value.as_number() {
        Some(value) if value.is_finite() => {
            let node = OperatorNode::new(OperatorKind::Cast, vec![Operand::Number(value)], args.domain.clone())?;
            Ok(Operand::Operator(node))
        }
        _ => Err(Error::Cast(format!("Cannot cast {} to a constant field", args.value))),
    }
}

const CAST_VARIANTS: [Variant<CastArgs>; 2] = [
    Variant {
        name: "CastOperand",
        rule: Rule::Simplify,
        matches: is_operand,
        build: cast_operand,
    },
    Variant {
        name: "CastNumber",
        rule: Rule::Construct,
        matches: is_number,
        build: cast_number,
    },
];

/// Casts a number to a constant field on `domain`, or checks that an operand lives on `domain`.
pub fn cast(value: impl Into<Operand>, domain: &Arc<Domain>) -> Result<Operand> {
    let args = CastArgs {
        value: value.into(),
        domain: domain.clone(),
    };
    dispatch("Cast", &CAST_VARIANTS, &args, || args.value.to_string())
}

/// Sums in the layout of the first argument when every argument shares the output bases,
/// and in grid space otherwise.
fn add_reference(node: &OperatorNode, args: &[Operand]) -> Option<(usize, Vec<f64>)> {
    let fields: Option<Vec<_>> = args.iter().map(|arg| arg.as_field()).collect();
    let fields = fields?;
    if !fields.iter().all(|field| node.same_bases(field.borrow().bases())) {
        return None;
    }
    let first = fields[0].borrow();
    Some((first.layout().index(), first.scales().to_vec()))
}

pub(crate) fn add_check_conditions(node: &OperatorNode, args: &[Operand]) -> bool {
    match add_reference(node, args) {
        Some((layout, scales)) => args.iter().filter_map(Operand::as_field).all(|field| {
            let field = field.borrow();
            field.layout().index() == layout && field.scales() == scales.as_slice()
        }),
        None => grid_conditions(node, args),
    }
}

pub(crate) fn add_enforce_conditions(node: &OperatorNode, args: &[Operand]) -> Result<()> {
    match add_reference(node, args) {
        Some((layout, scales)) => {
            for field in args.iter().filter_map(Operand::as_field) {
                let mut field = field.borrow_mut();
                field.set_scales(&scales, true)?;
                field.require_layout(layout)?;
            }
            Ok(())
        }
        None => enforce_grid(node, args),
    }
}

pub(crate) fn add_operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let (layout, scales) = match add_reference(node, args) {
        Some(reference) => reference,
        None => {
            let grid = node.domain().distributor().grid_layout().index();
            (grid, node.domain().dealias().to_vec())
        }
    };
    let shape = node.domain().distributor().layout(layout).local_shape(node.bases(), &scales);
    let mut data = ArrayD::zeros(IxDyn(&shape));
    for arg in args {
        data += &broadcast_to(arg, &shape)?;
    }
    Ok(Output { layout, scales, data })
}

pub(crate) fn multiply_operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let scales = node.domain().dealias().to_vec();
    let (layout, shape) = grid_output_shape(node, &scales);
    let mut data = ArrayD::from_elem(IxDyn(&shape), Complex64::new(1.0, 0.0));
    for arg in args {
        data *= &broadcast_to(arg, &shape)?;
    }
    Ok(Output { layout, scales, data })
}

fn pow(base: Complex64, exponent: Complex64) -> Complex64 {
    let real_result = base.im == 0.0 && exponent.im == 0.0 && (base.re >= 0.0 || exponent.re.fract() == 0.0);
    if real_result {
        Complex64::new(base.re.powf(exponent.re), 0.0)
    } else {
        base.powc(exponent)
    }
}

pub(crate) fn power_operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let scales = node.domain().dealias().to_vec();
    let (layout, shape) = grid_output_shape(node, &scales);
    let base = broadcast_to(&args[0], &shape)?;
    let exponent = broadcast_to(&args[1], &shape)?;
    let mut data = ArrayD::zeros(IxDyn(&shape));
    Zip::from(&mut data)
        .and(&base)
        .and(&exponent)
        .for_each(|out, &b, &e| *out = pow(b, e));
    Ok(Output { layout, scales, data })
}

pub(crate) fn cast_operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let scales = node.domain().dealias().to_vec();
    let (layout, shape) = grid_output_shape(node, &scales);
    let data = broadcast_to(&args[0], &shape)?;
    Ok(Output { layout, scales, data })
}
