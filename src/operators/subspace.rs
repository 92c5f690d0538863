//! Linear operators acting along a single axis.
//!
//! Every operator here is a sparse matrix over the coefficients of one basis. Operators whose
//! basis is separable act on each process's local block of modes. Other operators, and every
//! functional, first make their axis local.
use super::arithmetic::{cast, multiply};
use super::dispatch::{dispatch, Rule, Variant};
use super::{OperatorKind, OperatorNode};
use crate::array::apply_sparse;
use crate::basis::{same_basis, Basis, BasisOperator, Position};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::evaluator::{Evaluator, Output};
use crate::field::Field;
use crate::operand::{unify_domain, FieldRef, Operand};
use crate::Complex64;
use itertools::izip;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{ArrayD, Axis, IxDyn};
use spectre_sparse::{banded, single_row};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

struct SubspaceArgs {
    domain: Arc<Domain>,
    axis: usize,
    op: BasisOperator,
    operand: Operand,
}

impl SubspaceArgs {
    fn is_constant(&self) -> bool {
        self.operand.is_constant_along(self.axis)
    }

    fn supported(&self) -> bool {
        self.operand
            .basis(self.axis)
            .and_then(|basis| basis.operator_bands(&self.op))
            .is_some()
    }

    fn node(&self, kind: OperatorKind) -> Result<Operand> {
        let node = OperatorNode::new(kind, vec![self.operand.clone()], self.domain.clone())?;
        Ok(Operand::Operator(node))
    }
}

fn zero(_: &SubspaceArgs) -> Result<Operand> {
    Ok(Operand::Number(0.0))
}

fn unchanged(args: &SubspaceArgs) -> Result<Operand> {
    Ok(args.operand.clone())
}

fn convert_same(args: &SubspaceArgs) -> bool {
    match &args.op {
        BasisOperator::Convert(output) => same_basis(args.operand.basis(args.axis).as_ref(), Some(output)),
        _ => false,
    }
}

fn convert_number(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Convert(_)) && args.operand.as_number().is_some()
}

fn differentiate_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Differentiate) && args.is_constant()
}

fn hilbert_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::HilbertTransform) && args.is_constant()
}

fn integrate_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Integrate) && args.is_constant()
}

fn integrate_constant_value(args: &SubspaceArgs) -> Result<Operand> {
    let length = args.domain.basis(args.axis).problem_length();
    multiply(length, args.operand.clone())
}

fn interpolate_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Interpolate(_)) && args.is_constant()
}

fn filter_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Filter(_)) && args.is_constant()
}

fn filter_constant_value(args: &SubspaceArgs) -> Result<Operand> {
    match args.op {
        BasisOperator::Filter(0) => Ok(args.operand.clone()),
        _ => Ok(Operand::Number(0.0)),
    }
}

fn convert_constant(args: &SubspaceArgs) -> bool {
    matches!(args.op, BasisOperator::Convert(_)) && args.is_constant() && args.operand.as_number().is_none()
}

/// Numbers become constant fields in the output basis.
fn build_convert_number(args: &SubspaceArgs) -> Result<Operand> {
    let output = match &args.op {
        BasisOperator::Convert(output) => output.clone(),
        _ => return Err(Error::parsing("Expected a conversion")),
    };
    let constant = cast(args.operand.clone(), &args.domain)?;
    let node = OperatorNode::new(
        OperatorKind::ConvertConstant {
            axis: args.axis,
            output,
        },
        vec![constant],
        args.domain.clone(),
    )?;
    Ok(Operand::Operator(node))
}

fn build_convert_constant(args: &SubspaceArgs) -> Result<Operand> {
    match &args.op {
        BasisOperator::Convert(output) => args.node(OperatorKind::ConvertConstant {
            axis: args.axis,
            output: output.clone(),
        }),
        _ => Err(Error::parsing("Expected a conversion")),
    }
}

fn subspace_operator(args: &SubspaceArgs) -> bool {
    !args.op.is_functional() && !args.is_constant() && args.supported()
}

fn subspace_functional(args: &SubspaceArgs) -> bool {
    args.op.is_functional() && !args.is_constant() && args.supported()
}

fn build_subspace(args: &SubspaceArgs) -> Result<Operand> {
    args.node(OperatorKind::Subspace {
        axis: args.axis,
        op: args.op.clone(),
    })
}

const SUBSPACE_VARIANTS: [Variant<SubspaceArgs>; 10] = [
    Variant {
        name: "ConvertSame",
        rule: Rule::Simplify,
        matches: convert_same,
        build: unchanged,
    },
    Variant {
        name: "ConvertNumber",
        rule: Rule::Construct,
        matches: convert_number,
        build: build_convert_number,
    },
    Variant {
        name: "DifferentiateConstant",
        rule: Rule::Simplify,
        matches: differentiate_constant,
        build: zero,
    },
    Variant {
        name: "HilbertTransformConstant",
        rule: Rule::Simplify,
        matches: hilbert_constant,
        build: zero,
    },
    Variant {
        name: "IntegrateConstant",
        rule: Rule::Simplify,
        matches: integrate_constant,
        build: integrate_constant_value,
    },
    Variant {
        name: "InterpolateConstant",
        rule: Rule::Simplify,
        matches: interpolate_constant,
        build: unchanged,
    },
    Variant {
        name: "FilterConstant",
        rule: Rule::Simplify,
        matches: filter_constant,
        build: filter_constant_value,
    },
    Variant {
        name: "ConvertConstant",
        rule: Rule::Construct,
        matches: convert_constant,
        build: build_convert_constant,
    },
    Variant {
        name: "LinearSubspaceOperator",
        rule: Rule::Construct,
        matches: subspace_operator,
        build: build_subspace,
    },
    Variant {
        name: "LinearSubspaceFunctional",
        rule: Rule::Construct,
        matches: subspace_functional,
        build: build_subspace,
    },
];

fn family_name(op: &BasisOperator) -> &'static str {
    match op {
        BasisOperator::Differentiate => "Differentiate",
        BasisOperator::HilbertTransform => "HilbertTransform",
        BasisOperator::Interpolate(_) => "Interpolate",
        BasisOperator::Integrate => "Integrate",
        BasisOperator::Filter(_) => "Filter",
        BasisOperator::Convert(_) => "Convert",
    }
}

/// Applies `op` along `axis`, simplifying constant operands.
pub(crate) fn apply(domain: &Arc<Domain>, axis: usize, op: BasisOperator, operand: impl Into<Operand>) -> Result<Operand> {
    let operand = operand.into();
    if axis >= domain.dim() {
        return Err(Error::parsing(format!(
            "Axis {} is out of bounds for a domain of dimension {}",
            axis,
            domain.dim()
        )));
    }
    unify_domain([&operand], Some(domain))?;
    let args = SubspaceArgs {
        domain: domain.clone(),
        axis,
        op,
        operand,
    };
    let family = family_name(&args.op);
    dispatch(family, &SUBSPACE_VARIANTS, &args, || {
        format!("{} along '{}'", args.operand, domain.basis(axis).name())
    })
}

pub fn differentiate(domain: &Arc<Domain>, axis: usize, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::Differentiate, operand)
}

pub fn hilbert_transform(domain: &Arc<Domain>, axis: usize, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::HilbertTransform, operand)
}

pub fn interpolate(domain: &Arc<Domain>, axis: usize, position: Position, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::Interpolate(position), operand)
}

pub fn integrate(domain: &Arc<Domain>, axis: usize, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::Integrate, operand)
}

/// Selects coefficient `mode` along `axis`.
pub fn filter(domain: &Arc<Domain>, axis: usize, mode: usize, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::Filter(mode), operand)
}

/// Converts the operand to the `output` basis along `axis`.
pub fn convert(domain: &Arc<Domain>, axis: usize, output: Arc<dyn Basis>, operand: impl Into<Operand>) -> Result<Operand> {
    apply(domain, axis, BasisOperator::Convert(output), operand)
}

/// Builds the matrix of a subspace operator over the full coefficient range of its axis.
pub(crate) fn build_subspace_matrix(node: &OperatorNode) -> Result<CsrMatrix<Complex64>> {
    let (axis, op) = match node.kind() {
        OperatorKind::Subspace { axis, op } => (*axis, op),
        _ => return Err(Error::parsing(format!("{} is not a subspace operator", node))),
    };
    let basis = node
        .operand()
        .basis(axis)
        .ok_or_else(|| Error::parsing(format!("{} acts on a constant axis", node)))?;
    let bands = basis
        .operator_bands(op)
        .ok_or_else(|| Error::parsing(format!("Basis '{}' does not support {}", basis.name(), node)))?;
    let n_in = basis.coeff_size();
    if op.is_functional() {
        Ok(single_row(1, n_in, 0, |j| basis.functional_entry(op, j)))
    } else {
        let n_out = basis.output_size(op);
        Ok(banded(n_out, n_in, &bands, |i, j| basis.operator_entry(op, i, j)))
    }
}

/// Block of `matrix` with the given global row and column ranges.
fn restrict(matrix: &CsrMatrix<Complex64>, rows: Range<usize>, cols: Range<usize>) -> CsrMatrix<Complex64> {
    let mut coo = CooMatrix::new(rows.len(), cols.len());
    for (i, row) in rows.clone().map(|i| (i, matrix.row(i))) {
        for (&j, &v) in izip!(row.col_indices(), row.values()) {
            if cols.contains(&j) {
                coo.push(i - rows.start, j - cols.start, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}

fn subspace_axis(node: &OperatorNode) -> usize {
    match node.kind() {
        OperatorKind::Subspace { axis, .. } | OperatorKind::ConvertConstant { axis, .. } => *axis,
        _ => unreachable!("Internal error: Expected a subspace operator"),
    }
}

fn operand_field<'a>(node: &OperatorNode, args: &'a [Operand]) -> Result<&'a FieldRef> {
    args.first()
        .and_then(Operand::as_field)
        .ok_or_else(|| Error::parsing(format!("Operand of {} has not been evaluated to a field", node)))
}

/// The operand must hold coefficients along the axis, and non-separable operators need the
/// axis to be local.
pub(crate) fn check_conditions(node: &OperatorNode, args: &[Operand]) -> bool {
    let axis = subspace_axis(node);
    match args.first().and_then(Operand::as_field) {
        Some(field) => {
            let field = field.borrow();
            let layout = field.layout();
            !layout.grid_space()[axis] && (node.separable() || layout.is_local(axis))
        }
        None => true,
    }
}

pub(crate) fn enforce_conditions(node: &OperatorNode, args: &[Operand]) -> Result<()> {
    let axis = subspace_axis(node);
    let mut field = operand_field(node, args)?.borrow_mut();
    field.require_coeff_space(Some(axis))?;
    if !node.separable() {
        field.require_local(axis)?;
    }
    Ok(())
}

pub(crate) fn operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let axis = subspace_axis(node);
    let field = operand_field(node, args)?.borrow();
    let layout = field.layout();
    let scales = field.scales().to_vec();
    let matrix = node.subspace_matrix()?;
    let matrix = if layout.is_local(axis) {
        Cow::Borrowed(matrix)
    } else {
        let rows = layout.local_elements(node.bases(), &scales, axis);
        let cols = layout.local_elements(field.bases(), &scales, axis);
        Cow::Owned(restrict(matrix, rows, cols))
    };
    let data = apply_sparse(&matrix, &field.data(), axis);
    Ok(Output {
        layout: layout.index(),
        scales,
        data,
    })
}

/// Broadcasts along the axis in grid space. In coefficient space only the constant mode is set.
pub(crate) fn convert_constant_operate(node: &OperatorNode, args: &[Operand]) -> Result<Output> {
    let (axis, output) = match node.kind() {
        OperatorKind::ConvertConstant { axis, output } => (*axis, output),
        _ => return Err(Error::parsing(format!("{} is not a constant conversion", node))),
    };
    let field = operand_field(node, args)?.borrow();
    let layout = field.layout();
    let scales = field.scales().to_vec();
    let shape = layout.local_shape(node.bases(), &scales);
    let input = field.data();
    let data = if layout.grid_space()[axis] {
        input
            .broadcast(IxDyn(&shape))
            .map(|view| view.to_owned())
            .ok_or_else(|| Error::layout(format!("Cannot broadcast {:?} to {:?}", input.shape(), shape)))?
    } else {
        let mut data = ArrayD::zeros(IxDyn(&shape));
        let owns_constant = layout.local_elements(node.bases(), &scales, axis).start == 0 && shape[axis] > 0;
        if owns_constant {
            let amplitude = output.constant_amplitude();
            data.index_axis_mut(Axis(axis), 0)
                .assign(&input.index_axis(Axis(axis), 0).mapv(|v| v / amplitude));
        }
        data
    };
    Ok(Output {
        layout: layout.index(),
        scales,
        data,
    })
}

/// Brings an expression that may have folded to a number back into a field.
fn materialize(domain: &Arc<Domain>, expr: &Operand) -> Result<FieldRef> {
    match expr.as_number() {
        Some(value) => {
            let mut field = Field::constant(domain, value.to_string());
            field.fill_constant(Complex64::new(value, 0.0));
            Ok(FieldRef::new(field))
        }
        None => Evaluator::new().evaluate_field(expr),
    }
}

impl FieldRef {
    /// Evaluates the derivative along `axis` into a new field.
    pub fn differentiate(&self, axis: usize) -> Result<FieldRef> {
        let domain = self.borrow().domain().clone();
        let expr = differentiate(&domain, axis, self)?;
        materialize(&domain, &expr)
    }

    /// Evaluates the integral over the given axes, or over every axis if `axes` is empty.
    pub fn integrate(&self, axes: &[usize]) -> Result<FieldRef> {
        let domain = self.borrow().domain().clone();
        let axes: Vec<usize> = if axes.is_empty() {
            (0..domain.dim()).collect()
        } else {
            axes.to_vec()
        };
        let mut expr = Operand::from(self);
        for axis in axes {
            expr = integrate(&domain, axis, expr)?;
        }
        materialize(&domain, &expr)
    }
}
