//! Operands of symbolic expressions: numbers, fields and operator nodes.
//!
//! Every symbolic query is exact. Leaves follow simple rules (a field depends on itself and on
//! nothing else) and operator nodes delegate to the rules of their operator kind.
use crate::basis::{Basis, NccExpansion};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::field::{Field, Parity};
use crate::operators::arithmetic::{multiply, product};
use crate::operators::{OperatorFamily, OperatorKind, OperatorNode};
use crate::settings::NccSettings;
use rustc_hash::{FxHashMap, FxHasher};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to a field taking part in expressions.
#[derive(Clone)]
pub struct FieldRef {
    id: u64,
    inner: Rc<RefCell<Field>>,
}

impl FieldRef {
    pub fn new(field: Field) -> Self {
        Self {
            id: field.id(),
            inner: Rc::new(RefCell::new(field)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, Field> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Field> {
        self.inner.borrow_mut()
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name().to_string()
    }
}

impl Debug for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("FieldRef");
        s.field("id", &self.id);
        if let Ok(field) = self.inner.try_borrow() {
            s.field("name", &field.name());
        }
        s.finish()
    }
}

impl PartialEq for FieldRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A node of an expression tree.
#[derive(Clone, Debug)]
pub enum Operand {
    Number(f64),
    Field(FieldRef),
    Operator(Rc<OperatorNode>),
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Number(value)
    }
}

impl From<Field> for Operand {
    fn from(field: Field) -> Self {
        Operand::Field(FieldRef::new(field))
    }
}

impl From<FieldRef> for Operand {
    fn from(field: FieldRef) -> Self {
        Operand::Field(field)
    }
}

impl From<&FieldRef> for Operand {
    fn from(field: &FieldRef) -> Self {
        Operand::Field(field.clone())
    }
}

impl From<Rc<OperatorNode>> for Operand {
    fn from(node: Rc<OperatorNode>) -> Self {
        Operand::Operator(node)
    }
}

impl From<&Operand> for Operand {
    fn from(operand: &Operand) -> Self {
        operand.clone()
    }
}

/// A variable of a symbolic query: either a specific operand or a whole operator family.
#[derive(Clone, Debug)]
pub enum Var {
    Operand(Operand),
    Family(OperatorFamily),
}

impl From<Operand> for Var {
    fn from(operand: Operand) -> Self {
        Var::Operand(operand)
    }
}

impl From<&FieldRef> for Var {
    fn from(field: &FieldRef) -> Self {
        Var::Operand(Operand::Field(field.clone()))
    }
}

impl From<OperatorFamily> for Var {
    fn from(family: OperatorFamily) -> Self {
        Var::Family(family)
    }
}

/// Factorization of a product into powers of variables and a remaining coefficient.
#[derive(Clone, Debug)]
pub struct Factors {
    pub coefficient: Operand,
    pub powers: Vec<(Operand, f64)>,
}

/// Multiplication matrix of a non-constant coefficient found in an expression.
#[derive(Clone, Debug)]
pub struct NccTerm {
    pub coefficient: String,
    pub expansion: NccExpansion,
}

pub(crate) fn hash_key(build: impl FnOnce(&mut FxHasher)) -> u64 {
    let mut hasher = FxHasher::default();
    build(&mut hasher);
    hasher.finish()
}

impl Operand {
    pub fn field(field: Field) -> Self {
        field.into()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_number(&self, value: f64) -> bool {
        self.as_number() == Some(value)
    }

    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            Operand::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_operator(&self) -> Option<&Rc<OperatorNode>> {
        match self {
            Operand::Operator(node) => Some(node),
            _ => None,
        }
    }

    /// The kind of operator at the root, if any.
    pub fn kind(&self) -> Option<&OperatorKind> {
        self.as_operator().map(|node| node.kind())
    }

    pub fn domain(&self) -> Option<Arc<Domain>> {
        match self {
            Operand::Number(_) => None,
            Operand::Field(field) => Some(field.borrow().domain().clone()),
            Operand::Operator(node) => Some(node.domain().clone()),
        }
    }

    /// Per-axis bases, or `None` for numbers.
    pub fn bases(&self) -> Option<Vec<Option<Arc<dyn Basis>>>> {
        match self {
            Operand::Number(_) => None,
            Operand::Field(field) => Some(field.borrow().bases().to_vec()),
            Operand::Operator(node) => Some(node.bases().to_vec()),
        }
    }

    pub fn basis(&self, axis: usize) -> Option<Arc<dyn Basis>> {
        self.bases().and_then(|bases| bases[axis].clone())
    }

    pub fn is_constant_along(&self, axis: usize) -> bool {
        self.basis(axis).is_none()
    }

    /// Numbers and operands that are constant along every axis.
    pub fn is_constant(&self) -> bool {
        self.bases()
            .map(|bases| bases.iter().all(Option::is_none))
            .unwrap_or(true)
    }

    /// Structural key. Structurally identical expressions over the same fields share a key.
    pub fn key(&self) -> u64 {
        match self {
            Operand::Number(value) => hash_key(|h| {
                "number".hash(h);
                value.to_bits().hash(h);
            }),
            Operand::Field(field) => hash_key(|h| {
                "field".hash(h);
                field.id().hash(h);
            }),
            Operand::Operator(node) => node.key(),
        }
    }

    pub fn same_as(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a == b,
            (Operand::Field(a), Operand::Field(b)) => a == b,
            (Operand::Operator(a), Operand::Operator(b)) => Rc::ptr_eq(a, b) || a.same_structure(b),
            _ => false,
        }
    }

    pub fn matches(&self, var: &Var) -> bool {
        match var {
            Var::Operand(operand) => self.same_as(operand),
            Var::Family(family) => self
                .as_operator()
                .map(|node| node.family() == *family)
                .unwrap_or(false),
        }
    }

    fn matches_any(&self, vars: &[Var]) -> bool {
        vars.iter().any(|var| self.matches(var))
    }

    pub fn args(&self) -> &[Operand] {
        match self {
            Operand::Operator(node) => node.args(),
            _ => &[],
        }
    }

    /// Returns `true` if the expression contains any of the variables.
    pub fn has(&self, vars: &[Var]) -> bool {
        self.matches_any(vars) || self.args().iter().any(|arg| arg.has(vars))
    }

    /// Distinct fields appearing in the expression, in order of first appearance.
    pub fn atoms(&self) -> Vec<FieldRef> {
        let mut atoms = Vec::new();
        self.collect_atoms(&mut atoms);
        atoms
    }

    fn collect_atoms(&self, atoms: &mut Vec<FieldRef>) {
        match self {
            Operand::Number(_) => {}
            Operand::Field(field) => {
                if !atoms.contains(field) {
                    atoms.push(field.clone());
                }
            }
            Operand::Operator(node) => node.args().iter().for_each(|arg| arg.collect_atoms(atoms)),
        }
    }

    /// Replaces every occurrence of `old` with `new`, rebuilding the affected operators.
    pub fn replace(&self, old: &Operand, new: &Operand) -> Result<Operand> {
        if self.same_as(old) {
            return Ok(new.clone());
        }
        match self {
            Operand::Operator(node) => node.replace(old, new),
            _ => Ok(self.clone()),
        }
    }

    /// Splits into the part depending on `vars` and the part independent of them.
    pub fn split(&self, vars: &[Var]) -> Result<(Operand, Operand)> {
        match self {
            Operand::Operator(node) => node.split(vars),
            leaf if leaf.matches_any(vars) => Ok((leaf.clone(), Operand::Number(0.0))),
            leaf => Ok((Operand::Number(0.0), leaf.clone())),
        }
    }

    /// Distributes linear operators inward along branches containing `vars`.
    pub fn expand(&self, vars: &[Var]) -> Result<Operand> {
        match self {
            Operand::Operator(node) => node.expand(vars),
            leaf => Ok(leaf.clone()),
        }
    }

    /// Symbolic derivative with respect to `var`.
    pub fn sym_diff(&self, var: &Operand) -> Result<Operand> {
        if self.same_as(var) {
            return Ok(Operand::Number(1.0));
        }
        match self {
            Operand::Operator(node) => node.sym_diff(var),
            _ => Ok(Operand::Number(0.0)),
        }
    }

    /// Fails unless the expression is linear in `vars`.
    pub fn require_linearity(&self, vars: &[Var], name: Option<&str>) -> Result<()> {
        if self.matches_any(vars) {
            return Ok(());
        }
        match self {
            Operand::Operator(node) => node.require_linearity(vars, name),
            leaf => Err(Error::nonlinear(format!(
                "{} is not one of the specified variables.",
                name.map(str::to_string).unwrap_or_else(|| leaf.to_string())
            ))),
        }
    }

    /// Per-axis separability of the expression viewed as a linear operator on `vars`.
    pub fn separability(&self, vars: &[Var]) -> Result<Vec<bool>> {
        match self {
            Operand::Operator(node) if !self.matches_any(vars) => node.separability(vars),
            operand if operand.matches_any(vars) => {
                let dim = operand
                    .domain()
                    .map(|domain| domain.dim())
                    .ok_or_else(|| Error::nonlinear(format!("{} has no domain.", operand)))?;
                Ok(vec![true; dim])
            }
            leaf => Err(Error::nonlinear(format!("{} is not one of the specified variables.", leaf))),
        }
    }

    /// Maximal nesting depth of operators of the given family.
    pub fn order(&self, family: OperatorFamily) -> usize {
        let inner = self
            .args()
            .iter()
            .map(|arg| arg.order(family))
            .max()
            .unwrap_or(0);
        match self {
            Operand::Operator(node) if node.family() == family => inner + 1,
            _ => inner,
        }
    }

    /// Factors a product into powers of `vars` times a coefficient independent of them.
    pub fn factor(&self, vars: &[Operand]) -> Result<Factors> {
        let var_list: Vec<Var> = vars.iter().cloned().map(Var::Operand).collect();
        if self.matches_any(&var_list) {
            return Ok(Factors {
                coefficient: Operand::Number(1.0),
                powers: vec![(self.clone(), 1.0)],
            });
        }
        if !self.has(&var_list) {
            return Ok(Factors {
                coefficient: self.clone(),
                powers: Vec::new(),
            });
        }
        match self.kind() {
            Some(OperatorKind::Multiply) => {
                let mut coefficients = Vec::new();
                let mut powers: Vec<(Operand, f64)> = Vec::new();
                let mut index: FxHashMap<u64, usize> = FxHashMap::default();
                for arg in self.args() {
                    let factors = arg.factor(vars)?;
                    coefficients.push(factors.coefficient);
                    for (var, power) in factors.powers {
                        match index.get(&var.key()) {
                            Some(&i) => powers[i].1 += power,
                            None => {
                                index.insert(var.key(), powers.len());
                                powers.push((var, power));
                            }
                        }
                    }
                }
                Ok(Factors {
                    coefficient: product(coefficients)?,
                    powers,
                })
            }
            Some(OperatorKind::Power) => {
                let (base, exponent) = (&self.args()[0], &self.args()[1]);
                match (base.matches_any(&var_list), exponent.as_number()) {
                    (true, Some(exponent)) => Ok(Factors {
                        coefficient: Operand::Number(1.0),
                        powers: vec![(base.clone(), exponent)],
                    }),
                    _ => Err(Error::parsing(format!("Cannot factor {} over the specified variables.", self))),
                }
            }
            _ => Err(Error::parsing(format!("Cannot factor {} over the specified variables.", self))),
        }
    }

    /// Parity along `axis`, if it is known.
    pub fn parity(&self, axis: usize) -> Option<Parity> {
        match self {
            Operand::Number(_) => Some(Parity::Even),
            Operand::Field(field) => {
                let field = field.borrow();
                if field.basis(axis).is_none() {
                    Some(Parity::Even)
                } else {
                    field.parity()[axis]
                }
            }
            Operand::Operator(node) => node.parity(axis),
        }
    }

    /// Builds the multiplication matrices of every non-constant coefficient multiplying `vars`.
    ///
    /// The expression must be linear in `vars`. Coefficients are evaluated and expanded along the
    /// last axis of the domain.
    pub fn ncc_matrices(&self, vars: &[Var], settings: &NccSettings) -> Result<Vec<NccTerm>> {
        self.require_linearity(vars, None)?;
        let mut terms = Vec::new();
        self.collect_nccs(vars, settings, &mut terms)?;
        Ok(terms)
    }

    fn collect_nccs(&self, vars: &[Var], settings: &NccSettings, terms: &mut Vec<NccTerm>) -> Result<()> {
        if self.matches_any(vars) {
            return Ok(());
        }
        match self.kind() {
            Some(OperatorKind::Multiply) => {
                let (with_vars, coefficients): (Vec<_>, Vec<_>) =
                    self.args().iter().cloned().partition(|arg| arg.has(vars));
                let coefficient = product(coefficients)?;
                if !coefficient.is_constant() {
                    let name = coefficient.to_string();
                    let field = Evaluator::new().evaluate_field(&coefficient)?;
                    let expansion = field.borrow_mut().as_ncc_operator(settings)?;
                    terms.push(NccTerm {
                        coefficient: name,
                        expansion,
                    });
                }
                for arg in with_vars {
                    arg.collect_nccs(vars, settings, terms)?;
                }
                Ok(())
            }
            Some(_) => {
                for arg in self.args().iter().filter(|arg| arg.has(vars)) {
                    arg.collect_nccs(vars, settings, terms)?;
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Evaluates the expression into a number or a field.
    pub fn evaluate(&self) -> Result<Operand> {
        Evaluator::new().evaluate(self)
    }

    /// Multiplies by a number.
    pub fn scale(&self, factor: f64) -> Result<Operand> {
        multiply(factor, self.clone())
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(value) => write!(f, "{}", value),
            Operand::Field(field) => match field.inner.try_borrow() {
                Ok(field) => write!(f, "{}", field.name()),
                Err(_) => write!(f, "<field {}>", field.id()),
            },
            Operand::Operator(node) => write!(f, "{}", node),
        }
    }
}

/// Common domain of a set of operands.
///
/// Numbers carry no domain. Fails if two operands live on different domains.
pub(crate) fn unify_domain<'a>(
    operands: impl IntoIterator<Item = &'a Operand>,
    explicit: Option<&Arc<Domain>>,
) -> Result<Option<Arc<Domain>>> {
    let mut domain = explicit.cloned();
    for operand in operands {
        if let Some(other) = operand.domain() {
            match &domain {
                None => domain = Some(other),
                Some(current) if Arc::ptr_eq(current, &other) => {}
                Some(_) => {
                    return Err(Error::domain_mismatch(format!(
                        "Operand {} lives on a different domain",
                        operand
                    )))
                }
            }
        }
    }
    Ok(domain)
}
