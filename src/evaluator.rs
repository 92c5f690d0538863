//! Evaluation of expression trees into fields.
//!
//! The evaluator walks a tree depth-first. At every node it evaluates the arguments, drives the
//! argument fields into the layout the node operates in, and writes the result into the node's
//! output field. Each node remembers a fingerprint of the arguments of its last evaluation and
//! reuses its output while neither the arguments nor the output have been written to since.
use crate::error::{Error, Result};
use crate::field::Field;
use crate::operand::{hash_key, FieldRef, Operand};
use crate::operators::{arithmetic, general, grid, subspace, OperatorKind, OperatorNode};
use crate::Complex64;
use log::debug;
use ndarray::{ArrayD, IxDyn};
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::rc::Rc;

/// Memoized result of the last evaluation of a node.
#[derive(Debug, Default)]
pub(crate) struct EvalCache {
    last_id: Option<u64>,
    out: Option<FieldRef>,
    out_version: u64,
}

/// Data produced by a node, together with the layout and scales it is expressed in.
#[derive(Debug)]
pub(crate) struct Output {
    pub layout: usize,
    pub scales: Vec<f64>,
    pub data: ArrayD<Complex64>,
}

/// Evaluates expressions, sharing the outputs of structurally identical subexpressions.
#[derive(Debug, Default)]
pub struct Evaluator {
    memo: FxHashMap<u64, (Rc<OperatorNode>, FieldRef)>,
    cache_hits: usize,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes whose cached output was reused.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits
    }

    /// Evaluates an expression into a number or a field.
    pub fn evaluate(&mut self, expr: &Operand) -> Result<Operand> {
        match expr {
            Operand::Number(_) | Operand::Field(_) => Ok(expr.clone()),
            Operand::Operator(node) => Ok(Operand::Field(self.evaluate_node(node)?)),
        }
    }

    /// Evaluates an expression that must produce a field.
    pub fn evaluate_field(&mut self, expr: &Operand) -> Result<FieldRef> {
        match self.evaluate(expr)? {
            Operand::Field(field) => Ok(field),
            other => Err(Error::parsing(format!("{} evaluates to a number, not a field", other))),
        }
    }

    fn evaluate_node(&mut self, node: &Rc<OperatorNode>) -> Result<FieldRef> {
        if let Some((shared, out)) = self.memo.get(&node.key()) {
            if Rc::ptr_eq(shared, node) || shared.same_structure(node) {
                return Ok(out.clone());
            }
        }
        if matches!(node.kind(), OperatorKind::TimeDerivative) {
            return Err(Error::parsing(format!("Cannot evaluate time derivative {}", node)));
        }

        let args = node
            .args()
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<Result<Vec<_>>>()?;
        let fingerprint = fingerprint(&args);

        if let Some(out) = cached_output(node, fingerprint) {
            debug!("Reusing cached output of {}", node);
            self.cache_hits += 1;
            self.memo.insert(node.key(), (node.clone(), out.clone()));
            return Ok(out);
        }

        node.enforce_conditions(&args)?;
        debug_assert!(node.check_conditions(&args));
        let output = node.operate(&args)?;

        let out = match node.bound_output() {
            Some(out) => out,
            None => node.cache.borrow().out.clone().unwrap_or_else(|| {
                FieldRef::new(Field::with_bases(node.domain(), node.to_string(), node.bases().to_vec()))
            }),
        };
        let version = {
            let mut field = out.borrow_mut();
            if !node.same_bases(field.bases()) {
                return Err(Error::domain_mismatch(format!(
                    "Output field '{}' does not have the bases of {}",
                    field.name(),
                    node
                )));
            }
            field.set_scales(&output.scales, false)?;
            field.set_data(output.layout, output.data.view())?;
            for axis in 0..field.dim() {
                field.set_parity(axis, node.parity(axis));
            }
            field.version()
        };

        *node.cache.borrow_mut() = EvalCache {
            last_id: Some(fingerprint),
            out: Some(out.clone()),
            out_version: version,
        };
        self.memo.insert(node.key(), (node.clone(), out.clone()));
        Ok(out)
    }
}

/// Identity of evaluated arguments: field ids with their data versions, and number values.
fn fingerprint(args: &[Operand]) -> u64 {
    hash_key(|h| {
        for arg in args {
            match arg {
                Operand::Number(value) => value.to_bits().hash(h),
                Operand::Field(field) => {
                    field.id().hash(h);
                    field.borrow().version().hash(h);
                }
                Operand::Operator(node) => node.key().hash(h),
            }
        }
    })
}

fn cached_output(node: &OperatorNode, fingerprint: u64) -> Option<FieldRef> {
    let cache = node.cache.borrow();
    let out = cache.out.as_ref()?;
    let unchanged = cache.last_id == Some(fingerprint) && out.borrow().version() == cache.out_version;
    let bound_elsewhere = node.bound_output().map_or(false, |bound| bound != *out);
    (unchanged && !bound_elsewhere).then(|| out.clone())
}

impl OperatorNode {
    /// Whether every field argument is in the layout and at the scales `operate` expects.
    pub fn check_conditions(&self, args: &[Operand]) -> bool {
        match self.kind() {
            OperatorKind::Add => arithmetic::add_check_conditions(self, args),
            OperatorKind::Multiply | OperatorKind::Power | OperatorKind::GridFunction(_) => {
                grid_conditions(self, args)
            }
            OperatorKind::Cast | OperatorKind::TimeDerivative => true,
            OperatorKind::General(function) => general::check_conditions(self, function, args),
            OperatorKind::Subspace { .. } => subspace::check_conditions(self, args),
            OperatorKind::ConvertConstant { .. } => true,
        }
    }

    /// Drives every field argument into the layout and scales `operate` expects.
    pub fn enforce_conditions(&self, args: &[Operand]) -> Result<()> {
        match self.kind() {
            OperatorKind::Add => arithmetic::add_enforce_conditions(self, args),
            OperatorKind::Multiply | OperatorKind::Power | OperatorKind::GridFunction(_) => enforce_grid(self, args),
            OperatorKind::Cast | OperatorKind::TimeDerivative => Ok(()),
            OperatorKind::General(function) => general::enforce_conditions(self, function, args),
            OperatorKind::Subspace { .. } => subspace::enforce_conditions(self, args),
            OperatorKind::ConvertConstant { .. } => Ok(()),
        }
    }

    /// Computes the node from evaluated arguments satisfying [`OperatorNode::check_conditions`].
    pub(crate) fn operate(&self, args: &[Operand]) -> Result<Output> {
        match self.kind() {
            OperatorKind::Add => arithmetic::add_operate(self, args),
            OperatorKind::Multiply => arithmetic::multiply_operate(self, args),
            OperatorKind::Power => arithmetic::power_operate(self, args),
            OperatorKind::Cast => arithmetic::cast_operate(self, args),
            OperatorKind::GridFunction(function) => grid::operate(self, *function, args),
            OperatorKind::General(function) => general::operate(self, function, args),
            OperatorKind::TimeDerivative => Err(Error::parsing(format!("Cannot evaluate time derivative {}", self))),
            OperatorKind::Subspace { .. } => subspace::operate(self, args),
            OperatorKind::ConvertConstant { .. } => subspace::convert_constant_operate(self, args),
        }
    }
}

/// Layout index and local shape of the node's output in full grid space.
pub(crate) fn grid_output_shape(node: &OperatorNode, scales: &[f64]) -> (usize, Vec<usize>) {
    let layout = node.domain().distributor().grid_layout();
    (layout.index(), layout.local_shape(node.bases(), scales))
}

/// Whether every field argument is in full grid space at the dealias scales.
pub(crate) fn grid_conditions(node: &OperatorNode, args: &[Operand]) -> bool {
    let grid = node.domain().distributor().grid_layout().index();
    let scales = node.domain().dealias();
    args.iter().filter_map(Operand::as_field).all(|field| {
        let field = field.borrow();
        field.layout().index() == grid && field.scales() == scales
    })
}

pub(crate) fn enforce_grid(node: &OperatorNode, args: &[Operand]) -> Result<()> {
    let scales = node.domain().dealias();
    for field in args.iter().filter_map(Operand::as_field) {
        let mut field = field.borrow_mut();
        field.set_scales(scales, true)?;
        field.require_grid_space(None)?;
    }
    Ok(())
}

/// Copies an evaluated argument into an array of the given shape. Constant axes broadcast.
pub(crate) fn broadcast_to(arg: &Operand, shape: &[usize]) -> Result<ArrayD<Complex64>> {
    match arg {
        Operand::Number(value) => Ok(ArrayD::from_elem(IxDyn(shape), Complex64::new(*value, 0.0))),
        Operand::Field(field) => {
            let field = field.borrow();
            let data = field.data();
            data.broadcast(IxDyn(shape))
                .map(|view| view.to_owned())
                .ok_or_else(|| {
                    Error::layout(format!(
                        "Cannot broadcast field '{}' of shape {:?} to shape {:?}",
                        field.name(),
                        data.shape(),
                        shape
                    ))
                })
        }
        Operand::Operator(node) => Err(Error::parsing(format!("Argument {} has not been evaluated", node))),
    }
}
