//! Operator nodes of the expression tree.
//!
//! Operators form a closed set of kinds. Construction goes through the functions of the
//! submodules, which select a variant with the dispatch registry and apply structural
//! simplifications before a node is materialized. Nodes are immutable after construction,
//! except for their evaluation cache and bound output field.
use crate::basis::{same_basis, Basis, BasisOperator};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::evaluator::EvalCache;
use crate::field::Parity;
use crate::operand::{hash_key, FieldRef, Operand, Var};
use crate::Complex64;
use nalgebra_sparse::CsrMatrix;
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::rc::Rc;
use std::sync::Arc;

pub mod arithmetic;
pub(crate) mod dispatch;
pub mod general;
pub mod grid;
pub mod linear;
pub mod subspace;

pub use arithmetic::{add, cast, divide, multiply, negate, power, product, subtract, sum};
pub use general::{general_function, GeneralFunction};
pub use grid::{grid_function, GridFunction, GridFunctions};
pub use linear::time_derivative;
pub use subspace::{convert, differentiate, filter, hilbert_transform, integrate, interpolate};

/// Operator families, used to name operators as variables of symbolic queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperatorFamily {
    Add,
    Multiply,
    Power,
    Cast,
    GridFunction,
    GeneralFunction,
    TimeDerivative,
    Differentiate,
    HilbertTransform,
    Interpolate,
    Integrate,
    Filter,
    Convert,
}

/// The operation performed by a node.
#[derive(Clone, Debug)]
pub enum OperatorKind {
    Add,
    Multiply,
    /// `args[0] ** args[1]` with an exponent that is constant along every axis.
    Power,
    /// Constant field holding the single numeric argument.
    Cast,
    GridFunction(GridFunction),
    General(GeneralFunction),
    TimeDerivative,
    /// Linear operator acting along a single axis.
    Subspace { axis: usize, op: BasisOperator },
    /// Conversion of an operand that is constant along `axis` into the `output` basis.
    ConvertConstant { axis: usize, output: Arc<dyn Basis> },
}

impl PartialEq for OperatorKind {
    fn eq(&self, other: &Self) -> bool {
        use OperatorKind::*;
        match (self, other) {
            (Add, Add) | (Multiply, Multiply) | (Power, Power) | (Cast, Cast) | (TimeDerivative, TimeDerivative) => true,
            (GridFunction(a), GridFunction(b)) => a == b,
            (General(a), General(b)) => a == b,
            (Subspace { axis: i, op: a }, Subspace { axis: j, op: b }) => i == j && a == b,
            (ConvertConstant { axis: i, output: a }, ConvertConstant { axis: j, output: b }) => {
                i == j && a.descriptor() == b.descriptor()
            }
            _ => false,
        }
    }
}

impl OperatorKind {
    pub fn family(&self) -> OperatorFamily {
        match self {
            OperatorKind::Add => OperatorFamily::Add,
            OperatorKind::Multiply => OperatorFamily::Multiply,
            OperatorKind::Power => OperatorFamily::Power,
            OperatorKind::Cast => OperatorFamily::Cast,
            OperatorKind::GridFunction(_) => OperatorFamily::GridFunction,
            OperatorKind::General(_) => OperatorFamily::GeneralFunction,
            OperatorKind::TimeDerivative => OperatorFamily::TimeDerivative,
            OperatorKind::Subspace { op, .. } => match op {
                BasisOperator::Differentiate => OperatorFamily::Differentiate,
                BasisOperator::HilbertTransform => OperatorFamily::HilbertTransform,
                BasisOperator::Interpolate(_) => OperatorFamily::Interpolate,
                BasisOperator::Integrate => OperatorFamily::Integrate,
                BasisOperator::Filter(_) => OperatorFamily::Filter,
                BasisOperator::Convert(_) => OperatorFamily::Convert,
            },
            OperatorKind::ConvertConstant { .. } => OperatorFamily::Convert,
        }
    }

    /// Linear operators act on a single operand, their first argument.
    pub fn is_linear(&self) -> bool {
        matches!(
            self,
            OperatorKind::TimeDerivative | OperatorKind::Subspace { .. } | OperatorKind::ConvertConstant { .. }
        )
    }

    /// Basis conversions carry no algebraic content.
    fn is_conversion(&self) -> bool {
        self.family() == OperatorFamily::Convert
    }
}

/// A node of the expression tree.
pub struct OperatorNode {
    kind: OperatorKind,
    args: Vec<Operand>,
    domain: Arc<Domain>,
    bases: Vec<Option<Arc<dyn Basis>>>,
    key: u64,
    subspace_matrix: OnceCell<CsrMatrix<Complex64>>,
    pub(crate) cache: RefCell<EvalCache>,
    out: RefCell<Option<FieldRef>>,
}

impl Debug for OperatorNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorNode")
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("key", &self.key)
            .finish()
    }
}

fn operand_bases(operand: &Operand, dim: usize) -> Vec<Option<Arc<dyn Basis>>> {
    operand.bases().unwrap_or_else(|| vec![None; dim])
}

/// Output bases of a node, as a pure function of its kind and arguments.
fn build_bases(kind: &OperatorKind, args: &[Operand], domain: &Arc<Domain>) -> Result<Vec<Option<Arc<dyn Basis>>>> {
    let dim = domain.dim();
    match kind {
        OperatorKind::Add | OperatorKind::Multiply => {
            let mut bases: Vec<Option<Arc<dyn Basis>>> = vec![None; dim];
            for arg in args {
                for (axis, basis) in operand_bases(arg, dim).into_iter().enumerate() {
                    match (&bases[axis], basis) {
                        (_, None) => {}
                        (None, Some(basis)) => bases[axis] = Some(basis),
                        (Some(current), Some(basis)) => {
                            if current.descriptor() != basis.descriptor() {
                                return Err(Error::parsing(format!(
                                    "Cannot combine bases '{}' and '{}' along axis {}",
                                    current.name(),
                                    basis.name(),
                                    axis
                                )));
                            }
                        }
                    }
                }
            }
            Ok(bases)
        }
        OperatorKind::Power | OperatorKind::GridFunction(_) | OperatorKind::TimeDerivative => {
            Ok(operand_bases(&args[0], dim))
        }
        OperatorKind::Cast => Ok(vec![None; dim]),
        OperatorKind::General(_) => Ok(domain.full_bases()),
        OperatorKind::Subspace { axis, op } => {
            let mut bases = operand_bases(&args[0], dim);
            bases[*axis] = match op {
                op if op.is_functional() => None,
                BasisOperator::Convert(output) => Some(output.clone()),
                _ => bases[*axis].clone(),
            };
            Ok(bases)
        }
        OperatorKind::ConvertConstant { axis, output } => {
            let mut bases = operand_bases(&args[0], dim);
            bases[*axis] = Some(output.clone());
            Ok(bases)
        }
    }
}

impl OperatorNode {
    pub(crate) fn new(kind: OperatorKind, args: Vec<Operand>, domain: Arc<Domain>) -> Result<Rc<Self>> {
        let bases = build_bases(&kind, &args, &domain)?;
        let key = hash_key(|h| {
            kind.family().hash(h);
            match &kind {
                OperatorKind::GridFunction(function) => function.hash(h),
                OperatorKind::General(function) => function.hash(h),
                OperatorKind::Subspace { axis, op } => {
                    axis.hash(h);
                    op.hash(h);
                }
                OperatorKind::ConvertConstant { axis, output } => {
                    axis.hash(h);
                    output.descriptor().hash(h);
                }
                _ => {}
            }
            for arg in &args {
                arg.key().hash(h);
            }
        });
        Ok(Rc::new(Self {
            kind,
            args,
            domain,
            bases,
            key,
            subspace_matrix: OnceCell::new(),
            cache: RefCell::new(EvalCache::default()),
            out: RefCell::new(None),
        }))
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn family(&self) -> OperatorFamily {
        self.kind.family()
    }

    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    /// First argument of a linear operator.
    pub fn operand(&self) -> &Operand {
        &self.args[0]
    }

    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub fn bases(&self) -> &[Option<Arc<dyn Basis>>] {
        &self.bases
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// Same kind and pairwise structurally identical arguments.
    pub fn same_structure(&self, other: &OperatorNode) -> bool {
        self.key == other.key
            && self.kind == other.kind
            && self.args.len() == other.args.len()
            && self.args.iter().zip(&other.args).all(|(a, b)| a.same_as(b))
    }

    /// Evaluate into the given field instead of an internally allocated one.
    pub fn bind_output(&self, field: FieldRef) {
        *self.out.borrow_mut() = Some(field);
    }

    pub fn bound_output(&self) -> Option<FieldRef> {
        self.out.borrow().clone()
    }

    /// Whether a subspace operator can be applied without making its axis local.
    pub fn separable(&self) -> bool {
        match &self.kind {
            OperatorKind::Subspace { axis, op } => {
                !op.is_functional()
                    && self
                        .operand()
                        .basis(*axis)
                        .map(|basis| basis.separable())
                        .unwrap_or(false)
            }
            OperatorKind::ConvertConstant { .. } => true,
            _ => false,
        }
    }

    /// Matrix of a subspace operator over the full coefficient range of its axis, built once.
    pub fn subspace_matrix(&self) -> Result<&CsrMatrix<Complex64>> {
        if let Some(matrix) = self.subspace_matrix.get() {
            return Ok(matrix);
        }
        let matrix = subspace::build_subspace_matrix(self)?;
        Ok(self.subspace_matrix.get_or_init(|| matrix))
    }

    /// Rebuilds the operator over new arguments, re-running dispatch and simplification.
    pub fn rebuild(&self, args: Vec<Operand>) -> Result<Operand> {
        fn next(args: &mut impl Iterator<Item = Operand>) -> Result<Operand> {
            args.next()
                .ok_or_else(|| Error::parsing("Too few arguments to rebuild operator"))
        }

        let mut args = args.into_iter();
        match &self.kind {
            OperatorKind::Add => sum(args),
            OperatorKind::Multiply => product(args),
            OperatorKind::Power => {
                let base = next(&mut args)?;
                power(base, next(&mut args)?)
            }
            OperatorKind::Cast => cast(next(&mut args)?, &self.domain),
            OperatorKind::GridFunction(function) => grid_function(*function, next(&mut args)?),
            OperatorKind::General(function) => {
                general::rebuild(function.clone(), self.domain.clone(), args.collect())
            }
            OperatorKind::TimeDerivative => time_derivative(next(&mut args)?),
            OperatorKind::Subspace { axis, op } => subspace::apply(&self.domain, *axis, op.clone(), next(&mut args)?),
            OperatorKind::ConvertConstant { axis, output } => {
                convert(&self.domain, *axis, output.clone(), next(&mut args)?)
            }
        }
    }

    /// Applies the operator to a new operand, keeping the remaining arguments.
    pub fn new_operand(&self, operand: Operand) -> Result<Operand> {
        let mut args = self.args.clone();
        args[0] = operand;
        self.rebuild(args)
    }

    fn matches_family(&self, vars: &[Var]) -> bool {
        vars.iter()
            .any(|var| matches!(var, Var::Family(family) if *family == self.family()))
    }

    pub(crate) fn replace(&self, old: &Operand, new: &Operand) -> Result<Operand> {
        match &self.kind {
            OperatorKind::Cast => Ok(self.args[0].clone()),
            kind if kind.is_conversion() => self.operand().replace(old, new),
            _ => {
                let args = self
                    .args
                    .iter()
                    .map(|arg| arg.replace(old, new))
                    .collect::<Result<Vec<_>>>()?;
                self.rebuild(args)
            }
        }
    }

    pub(crate) fn split(self: &Rc<Self>, vars: &[Var]) -> Result<(Operand, Operand)> {
        let this = Operand::Operator(self.clone());
        if self.matches_family(vars) {
            return Ok((this, Operand::Number(0.0)));
        }
        match &self.kind {
            OperatorKind::Add => {
                let (dependent, independent): (Vec<_>, Vec<_>) = self
                    .args
                    .iter()
                    .map(|arg| arg.split(vars))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .unzip();
                Ok((sum(dependent)?, sum(independent)?))
            }
            OperatorKind::Cast => Ok((Operand::Number(0.0), self.args[0].clone())),
            kind if kind.is_conversion() => self.operand().split(vars),
            kind if kind.is_linear() => {
                let (dependent, independent) = self.operand().split(vars)?;
                Ok((self.new_operand(dependent)?, self.new_operand(independent)?))
            }
            _ => {
                if this.has(vars) {
                    Ok((this, Operand::Number(0.0)))
                } else {
                    Ok((Operand::Number(0.0), this))
                }
            }
        }
    }

    pub(crate) fn expand(self: &Rc<Self>, vars: &[Var]) -> Result<Operand> {
        let this = Operand::Operator(self.clone());
        match &self.kind {
            OperatorKind::Cast => Ok(self.args[0].clone()),
            kind if kind.is_conversion() => self.operand().expand(vars),
            _ if !this.has(vars) => Ok(this),
            OperatorKind::Add => sum(self
                .args
                .iter()
                .map(|arg| arg.expand(vars))
                .collect::<Result<Vec<_>>>()?),
            OperatorKind::Multiply => arithmetic::expand_product(&self.args, vars),
            kind if kind.is_linear() => linear::expand(self, vars),
            _ => Ok(this),
        }
    }

    pub(crate) fn sym_diff(&self, var: &Operand) -> Result<Operand> {
        match &self.kind {
            OperatorKind::Add => sum(self
                .args
                .iter()
                .map(|arg| arg.sym_diff(var))
                .collect::<Result<Vec<_>>>()?),
            OperatorKind::Multiply => {
                let mut terms = Vec::with_capacity(self.args.len());
                for (i, arg) in self.args.iter().enumerate() {
                    let derivative = arg.sym_diff(var)?;
                    if derivative.is_number(0.0) {
                        continue;
                    }
                    let mut factors = self.args.clone();
                    factors[i] = derivative;
                    terms.push(product(factors)?);
                }
                sum(terms)
            }
            OperatorKind::Power => {
                let (base, exponent) = (&self.args[0], &self.args[1]);
                let reduced = power(base.clone(), subtract(exponent.clone(), 1.0)?)?;
                product(vec![exponent.clone(), reduced, base.sym_diff(var)?])
            }
            OperatorKind::GridFunction(function) => {
                let arg = &self.args[0];
                multiply(function.derivative(arg)?, arg.sym_diff(var)?)
            }
            OperatorKind::General(function) => Err(Error::parsing(format!(
                "Cannot symbolically differentiate general function '{}'",
                function.name()
            ))),
            OperatorKind::Cast => Ok(Operand::Number(0.0)),
            kind if kind.is_conversion() => self.operand().sym_diff(var),
            _ => self.new_operand(self.operand().sym_diff(var)?),
        }
    }

    pub(crate) fn require_linearity(&self, vars: &[Var], name: Option<&str>) -> Result<()> {
        let label = || name.map(str::to_string).unwrap_or_else(|| self.to_string());
        match &self.kind {
            OperatorKind::Add => self
                .args
                .iter()
                .try_for_each(|arg| arg.require_linearity(vars, name)),
            OperatorKind::Multiply => {
                let mut dependent = self.args.iter().filter(|arg| arg.has(vars));
                match (dependent.next(), dependent.next()) {
                    (Some(arg), None) => arg.require_linearity(vars, name),
                    (None, _) => Err(Error::nonlinear(format!(
                        "{} is not one of the specified variables.",
                        label()
                    ))),
                    (Some(_), Some(_)) => Err(Error::nonlinear(format!(
                        "{} is a non-linear product of the specified variables.",
                        label()
                    ))),
                }
            }
            OperatorKind::Cast => Err(Error::nonlinear(format!(
                "{} is not linear in the specified variables.",
                label()
            ))),
            kind if kind.is_linear() => self.operand().require_linearity(vars, name),
            _ => Err(Error::nonlinear(format!(
                "{} is a non-linear function of the specified variables.",
                label()
            ))),
        }
    }

    pub(crate) fn separability(&self, vars: &[Var]) -> Result<Vec<bool>> {
        match &self.kind {
            OperatorKind::Add => {
                let mut separability: Option<Vec<bool>> = None;
                for arg in self.args.iter().filter(|arg| arg.has(vars)) {
                    let arg_separability = arg.separability(vars)?;
                    separability = Some(match separability {
                        None => arg_separability,
                        Some(current) => current
                            .iter()
                            .zip(&arg_separability)
                            .map(|(a, b)| *a && *b)
                            .collect(),
                    });
                }
                separability.ok_or_else(|| Error::nonlinear(format!("{} does not contain the specified variables.", self)))
            }
            OperatorKind::Multiply => {
                self.require_linearity(vars, None)?;
                let mut separability = vec![true; self.domain.dim()];
                for arg in &self.args {
                    if arg.has(vars) {
                        let arg_separability = arg.separability(vars)?;
                        for (s, a) in separability.iter_mut().zip(arg_separability) {
                            *s &= a;
                        }
                    } else {
                        // Non-constant coefficients couple modes along their axes
                        for (axis, s) in separability.iter_mut().enumerate() {
                            if !arg.is_constant_along(axis) {
                                *s = false;
                            }
                        }
                    }
                }
                Ok(separability)
            }
            OperatorKind::Subspace { axis, .. } => {
                let mut separability = self.operand().separability(vars)?;
                if !self.separable() {
                    separability[*axis] = false;
                }
                Ok(separability)
            }
            OperatorKind::TimeDerivative | OperatorKind::ConvertConstant { .. } => self.operand().separability(vars),
            OperatorKind::Cast => Err(Error::nonlinear(format!("{} is not one of the specified variables.", self))),
            _ => Err(Error::nonlinear(format!(
                "{} is a non-linear function of the specified variables.",
                self
            ))),
        }
    }

    pub(crate) fn parity(&self, axis: usize) -> Option<Parity> {
        match &self.kind {
            OperatorKind::Add => {
                let mut parities = self.args.iter().map(|arg| arg.parity(axis));
                let first = parities.next().flatten()?;
                parities.all(|p| p == Some(first)).then(|| first)
            }
            OperatorKind::Multiply => {
                let mut sign = 1;
                for arg in &self.args {
                    sign *= arg.parity(axis)?.sign();
                }
                Some(Parity::from_sign(sign))
            }
            OperatorKind::Power => {
                let base = self.args[0].parity(axis)?;
                match (base, self.args[1].as_number()) {
                    (Parity::Even, _) => Some(Parity::Even),
                    (Parity::Odd, Some(n)) if n.fract() == 0.0 => {
                        Some(if (n as i64) % 2 == 0 { Parity::Even } else { Parity::Odd })
                    }
                    _ => None,
                }
            }
            OperatorKind::GridFunction(_) => self.args[0].parity(axis).map(|_| Parity::Even),
            OperatorKind::Cast => Some(Parity::Even),
            OperatorKind::General(_) => None,
            OperatorKind::TimeDerivative => self.operand().parity(axis),
            OperatorKind::Subspace { axis: op_axis, op } if *op_axis == axis => match op {
                BasisOperator::Differentiate | BasisOperator::HilbertTransform => {
                    self.operand().parity(axis).map(|p| Parity::from_sign(-p.sign()))
                }
                BasisOperator::Convert(_) => self.operand().parity(axis),
                _ => Some(Parity::Even),
            },
            OperatorKind::Subspace { .. } => self.operand().parity(axis),
            OperatorKind::ConvertConstant { axis: op_axis, .. } if *op_axis == axis => Some(Parity::Even),
            OperatorKind::ConvertConstant { .. } => self.operand().parity(axis),
        }
    }

    /// Whether the node shares bases with the given operand along every axis.
    pub(crate) fn same_bases(&self, other: &[Option<Arc<dyn Basis>>]) -> bool {
        self.bases
            .iter()
            .zip(other)
            .all(|(a, b)| same_basis(a.as_ref(), b.as_ref()))
    }
}

fn join_args(f: &mut Formatter<'_>, args: &[Operand], separator: &str) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", separator)?;
        }
        match arg.kind() {
            Some(OperatorKind::Add) => write!(f, "({})", arg)?,
            Some(OperatorKind::Multiply) | Some(OperatorKind::Power) if separator == "**" => write!(f, "({})", arg)?,
            _ => write!(f, "{}", arg)?,
        }
    }
    Ok(())
}

impl Display for OperatorNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let basis_name = |axis: usize| self.domain.basis(axis).name().to_string();
        match &self.kind {
            OperatorKind::Add => join_args(f, &self.args, " + "),
            OperatorKind::Multiply => join_args(f, &self.args, "*"),
            OperatorKind::Power => join_args(f, &self.args, "**"),
            OperatorKind::Cast => write!(f, "{}", self.args[0]),
            OperatorKind::GridFunction(function) => write!(f, "{}({})", function.name(), self.args[0]),
            OperatorKind::General(function) => {
                write!(f, "{}(", function.name())?;
                join_args(f, &self.args, ", ")?;
                write!(f, ")")
            }
            OperatorKind::TimeDerivative => write!(f, "dt({})", self.args[0]),
            OperatorKind::Subspace { axis, op } => match op {
                BasisOperator::Differentiate => write!(f, "d{}({})", basis_name(*axis), self.args[0]),
                BasisOperator::HilbertTransform => write!(f, "H{}({})", basis_name(*axis), self.args[0]),
                BasisOperator::Interpolate(position) => {
                    write!(f, "interp({}, {}={:?})", self.args[0], basis_name(*axis), position)
                }
                BasisOperator::Integrate => write!(f, "integ({}, '{}')", self.args[0], basis_name(*axis)),
                BasisOperator::Filter(mode) => write!(f, "filter({}, {}={})", self.args[0], basis_name(*axis), mode),
                BasisOperator::Convert(_) => write!(f, "{}", self.args[0]),
            },
            OperatorKind::ConvertConstant { .. } => write!(f, "{}", self.args[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Chebyshev;
    use crate::domain::DomainBuilder;
    use crate::evaluator::Evaluator;
    use crate::field::Field;

    /// Copy of `node` carrying the given structural key.
    fn with_key(node: &OperatorNode, key: u64) -> Rc<OperatorNode> {
        Rc::new(OperatorNode {
            kind: node.kind.clone(),
            args: node.args.clone(),
            domain: node.domain.clone(),
            bases: node.bases.clone(),
            key,
            subspace_matrix: OnceCell::new(),
            cache: RefCell::new(EvalCache::default()),
            out: RefCell::new(None),
        })
    }

    #[test]
    fn equal_keys_of_different_structures_are_kept_apart() {
        let domain = DomainBuilder::new()
            .with_basis(Chebyshev::new("z", 6, (-1.0, 1.0)))
            .build()
            .unwrap();
        let mut u = Field::new(&domain, "u");
        u.fill_grid(|x| x[0]);
        let u = FieldRef::new(u);

        let shifted = add(&u, 1.0).unwrap();
        let shifted_node = shifted.as_operator().unwrap().clone();
        let doubled = multiply(&u, 2.0).unwrap();
        let colliding = Operand::Operator(with_key(doubled.as_operator().unwrap(), shifted_node.key()));
        assert!(!shifted.same_as(&colliding));
        assert!(shifted.same_as(&Operand::Operator(with_key(&shifted_node, shifted_node.key()))));

        let mut evaluator = Evaluator::new();
        let a = evaluator.evaluate_field(&shifted).unwrap();
        let b = evaluator.evaluate_field(&colliding).unwrap();
        assert!(a != b);
        let mut b = b.borrow_mut();
        let values = b.grid_data().unwrap();
        let grid = b.local_grid(0);
        for (value, z) in values.iter().zip(grid) {
            assert!((value - Complex64::new(2.0 * z, 0.0)).norm() < 1e-12);
        }
    }
}
