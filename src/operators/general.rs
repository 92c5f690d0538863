//! Wrapping of arbitrary user functions as operators.
use super::{OperatorKind, OperatorNode};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::evaluator::{broadcast_to, Output};
use crate::operand::{unify_domain, Operand};
use crate::Complex64;
use ndarray::{ArrayD, ArrayViewD};
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// Signature of a wrapped function.
///
/// Every argument is passed with the local shape of the output in the function's layout, with
/// numbers and constant axes broadcast. The function must return an array of the same shape.
pub type GeneralFn = dyn Fn(&[ArrayViewD<'_, Complex64>]) -> eyre::Result<ArrayD<Complex64>>;

/// A named user function evaluated in a fixed layout.
#[derive(Clone)]
pub struct GeneralFunction {
    name: String,
    layout: usize,
    func: Rc<GeneralFn>,
}

impl GeneralFunction {
    pub fn new(
        name: impl Into<String>,
        layout: usize,
        func: impl Fn(&[ArrayViewD<'_, Complex64>]) -> eyre::Result<ArrayD<Complex64>> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            layout,
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the layout the function operates in.
    pub fn layout(&self) -> usize {
        self.layout
    }
}

impl Debug for GeneralFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneralFunction")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .finish()
    }
}

// Two wrappers are the same function only if they share the closure
impl Hash for GeneralFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.layout.hash(state);
        (Rc::as_ptr(&self.func) as *const () as usize).hash(state);
    }
}

impl PartialEq for GeneralFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.layout == other.layout
            && Rc::as_ptr(&self.func) as *const () == Rc::as_ptr(&other.func) as *const ()
    }
}

/// Applies a wrapped function to the given arguments on `domain`.
pub fn general_function(function: GeneralFunction, domain: &Arc<Domain>, args: Vec<Operand>) -> Result<Operand> {
    let n_layouts = domain.distributor().layouts().len();
    if function.layout >= n_layouts {
        return Err(Error::layout(format!(
            "Layout index {} of general function '{}' outside chain of {} layouts",
            function.layout, function.name, n_layouts
        )));
    }
    unify_domain(&args, Some(domain))?;
    rebuild(function, domain.clone(), args)
}

pub(crate) fn rebuild(function: GeneralFunction, domain: Arc<Domain>, args: Vec<Operand>) -> Result<Operand> {
    let node = OperatorNode::new(OperatorKind::General(function), args, domain)?;
    Ok(Operand::Operator(node))
}

pub(crate) fn check_conditions(node: &OperatorNode, function: &GeneralFunction, args: &[Operand]) -> bool {
    let scales = node.domain().dealias();
    args.iter().filter_map(Operand::as_field).all(|field| {
        let field = field.borrow();
        field.layout().index() == function.layout && field.scales() == scales
    })
}

pub(crate) fn enforce_conditions(node: &OperatorNode, function: &GeneralFunction, args: &[Operand]) -> Result<()> {
    let scales = node.domain().dealias();
    for field in args.iter().filter_map(Operand::as_field) {
        let mut field = field.borrow_mut();
        field.set_scales(scales, true)?;
        field.require_layout(function.layout)?;
    }
    Ok(())
}

pub(crate) fn operate(node: &OperatorNode, function: &GeneralFunction, args: &[Operand]) -> Result<Output> {
    let scales = node.domain().dealias().to_vec();
    let shape = node
        .domain()
        .distributor()
        .layout(function.layout)
        .local_shape(node.bases(), &scales);
    let inputs = args
        .iter()
        .map(|arg| broadcast_to(arg, &shape))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = inputs.iter().map(|input| input.view()).collect();
    let data = (function.func)(&views).map_err(Error::Function)?;
    if data.shape() != shape.as_slice() {
        return Err(Error::layout(format!(
            "General function '{}' returned shape {:?}, expected {:?}",
            function.name,
            data.shape(),
            shape
        )));
    }
    Ok(Output {
        layout: function.layout,
        scales,
        data,
    })
}
