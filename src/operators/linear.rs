//! Time derivatives and the distribution of linear operators during expansion.
use super::arithmetic::{product, sum};
use super::{OperatorFamily, OperatorKind, OperatorNode};
use crate::error::{Error, Result};
use crate::operand::{Operand, Var};
use std::rc::Rc;

/// Symbolic time derivative. Numbers and cast constants are constant in time.
pub fn time_derivative(arg: impl Into<Operand>) -> Result<Operand> {
    let arg = arg.into();
    if arg.as_number().is_some() || matches!(arg.kind(), Some(OperatorKind::Cast)) {
        return Ok(Operand::Number(0.0));
    }
    let domain = arg
        .domain()
        .ok_or_else(|| Error::parsing(format!("{} has no domain", arg)))?;
    Ok(Operand::Operator(OperatorNode::new(
        OperatorKind::TimeDerivative,
        vec![arg],
        domain,
    )?))
}

/// Expands a linear operator whose operand contains `vars`.
pub(crate) fn expand(node: &Rc<OperatorNode>, vars: &[Var]) -> Result<Operand> {
    let operand = node.operand().expand(vars)?;
    let inner = match operand.as_operator() {
        Some(inner) => inner.clone(),
        None => return node.new_operand(operand),
    };
    match inner.kind() {
        kind if kind.is_linear() => expand_linop(node, &inner, vars),
        OperatorKind::Add => {
            // Sums are flattened, so the result only needs re-expansion for products
            let terms = inner
                .args()
                .iter()
                .map(|arg| node.new_operand(arg.clone()))
                .collect::<Result<Vec<_>>>()?;
            sum(terms)?.expand(vars)
        }
        OperatorKind::Multiply => expand_multiply(node, &inner, vars),
        _ => node.new_operand(operand),
    }
}

fn expand_linop(node: &Rc<OperatorNode>, inner: &Rc<OperatorNode>, vars: &[Var]) -> Result<Operand> {
    let commutes = node.family() == OperatorFamily::TimeDerivative && inner.family() != OperatorFamily::TimeDerivative;
    if commutes {
        let moved = node.new_operand(inner.operand().clone())?.expand(vars)?;
        inner.new_operand(moved)
    } else {
        node.new_operand(Operand::Operator(inner.clone()))
    }
}

/// Terms of the product rule applied to the factors of `inner`.
fn product_rule(node: &OperatorNode, inner: &OperatorNode) -> Result<Operand> {
    let args = inner.args();
    let terms = (0..args.len())
        .map(|i| {
            let factors = args
                .iter()
                .enumerate()
                .map(|(j, arg)| if i == j { node.new_operand(arg.clone()) } else { Ok(arg.clone()) })
                .collect::<Result<Vec<_>>>()?;
            product(factors)
        })
        .collect::<Result<Vec<_>>>()?;
    sum(terms)
}

fn expand_multiply(node: &Rc<OperatorNode>, inner: &Rc<OperatorNode>, vars: &[Var]) -> Result<Operand> {
    match node.family() {
        OperatorFamily::TimeDerivative => product_rule(node, inner)?.expand(vars),
        OperatorFamily::Differentiate => product_rule(node, inner),
        OperatorFamily::Interpolate => product(
            inner
                .args()
                .iter()
                .map(|arg| node.new_operand(arg.clone()))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => node.new_operand(Operand::Operator(inner.clone())),
    }
}
