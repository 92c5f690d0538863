//! Elementwise functions applied to grid-space data.
use super::arithmetic::{add, multiply, negate, power, subtract};
use super::{OperatorKind, OperatorNode};
use crate::error::{Error, Result};
use crate::evaluator::{broadcast_to, grid_output_shape, Output};
use crate::field::Parity;
use crate::operand::Operand;
use crate::Complex64;
use std::f64::consts::{LN_10, LN_2};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Relative size of an imaginary part that is treated as round-off.
const REAL_TOLERANCE: f64 = 1e-12;

/// The supported elementwise functions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GridFunction {
    Absolute,
    Sign,
    Conj,
    Exp,
    Exp2,
    Log,
    Log2,
    Log10,
    Sqrt,
    Square,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Arcsinh,
    Arccosh,
    Arctanh,
}

impl GridFunction {
    pub const ALL: [GridFunction; 22] = [
        GridFunction::Absolute,
        GridFunction::Sign,
        GridFunction::Conj,
        GridFunction::Exp,
        GridFunction::Exp2,
        GridFunction::Log,
        GridFunction::Log2,
        GridFunction::Log10,
        GridFunction::Sqrt,
        GridFunction::Square,
        GridFunction::Sin,
        GridFunction::Cos,
        GridFunction::Tan,
        GridFunction::Arcsin,
        GridFunction::Arccos,
        GridFunction::Arctan,
        GridFunction::Sinh,
        GridFunction::Cosh,
        GridFunction::Tanh,
        GridFunction::Arcsinh,
        GridFunction::Arccosh,
        GridFunction::Arctanh,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GridFunction::Absolute => "absolute",
            GridFunction::Sign => "sign",
            GridFunction::Conj => "conjugate",
            GridFunction::Exp => "exp",
            GridFunction::Exp2 => "exp2",
            GridFunction::Log => "log",
            GridFunction::Log2 => "log2",
            GridFunction::Log10 => "log10",
            GridFunction::Sqrt => "sqrt",
            GridFunction::Square => "square",
            GridFunction::Sin => "sin",
            GridFunction::Cos => "cos",
            GridFunction::Tan => "tan",
            GridFunction::Arcsin => "arcsin",
            GridFunction::Arccos => "arccos",
            GridFunction::Arctan => "arctan",
            GridFunction::Sinh => "sinh",
            GridFunction::Cosh => "cosh",
            GridFunction::Tanh => "tanh",
            GridFunction::Arcsinh => "arcsinh",
            GridFunction::Arccosh => "arccosh",
            GridFunction::Arctanh => "arctanh",
        }
    }

    /// Evaluates the function on a real number.
    pub fn apply_real(&self, x: f64) -> f64 {
        match self {
            GridFunction::Absolute => x.abs(),
            GridFunction::Sign => {
                if x == 0.0 {
                    0.0
                } else {
                    x.signum()
                }
            }
            GridFunction::Conj => x,
            GridFunction::Exp => x.exp(),
            GridFunction::Exp2 => x.exp2(),
            GridFunction::Log => x.ln(),
            GridFunction::Log2 => x.log2(),
            GridFunction::Log10 => x.log10(),
            GridFunction::Sqrt => x.sqrt(),
            GridFunction::Square => x * x,
            GridFunction::Sin => x.sin(),
            GridFunction::Cos => x.cos(),
            GridFunction::Tan => x.tan(),
            GridFunction::Arcsin => x.asin(),
            GridFunction::Arccos => x.acos(),
            GridFunction::Arctan => x.atan(),
            GridFunction::Sinh => x.sinh(),
            GridFunction::Cosh => x.cosh(),
            GridFunction::Tanh => x.tanh(),
            GridFunction::Arcsinh => x.asinh(),
            GridFunction::Arccosh => x.acosh(),
            GridFunction::Arctanh => x.atanh(),
        }
    }

    /// Evaluates the function on a complex number. Real inputs take the real branch.
    ///
    /// Imaginary parts at round-off level relative to the real part count as real.
    pub fn apply(&self, z: Complex64) -> Complex64 {
        if z.im.abs() <= REAL_TOLERANCE * z.re.abs().max(1.0) {
            return Complex64::new(self.apply_real(z.re), 0.0);
        }
        match self {
            GridFunction::Absolute => Complex64::new(z.norm(), 0.0),
            GridFunction::Sign => z / z.norm(),
            GridFunction::Conj => z.conj(),
            GridFunction::Exp => z.exp(),
            GridFunction::Exp2 => (z * LN_2).exp(),
            GridFunction::Log => z.ln(),
            GridFunction::Log2 => z.ln() / LN_2,
            GridFunction::Log10 => z.ln() / LN_10,
            GridFunction::Sqrt => z.sqrt(),
            GridFunction::Square => z * z,
            GridFunction::Sin => z.sin(),
            GridFunction::Cos => z.cos(),
            GridFunction::Tan => z.tan(),
            GridFunction::Arcsin => z.asin(),
            GridFunction::Arccos => z.acos(),
            GridFunction::Arctan => z.atan(),
            GridFunction::Sinh => z.sinh(),
            GridFunction::Cosh => z.cosh(),
            GridFunction::Tanh => z.tanh(),
            GridFunction::Arcsinh => z.asinh(),
            GridFunction::Arccosh => z.acosh(),
            GridFunction::Arctanh => z.atanh(),
        }
    }

    /// Closed-form derivative of the function, evaluated symbolically at `x`.
    pub fn derivative(&self, x: &Operand) -> Result<Operand> {
        let f = |function: GridFunction| grid_function(function, x.clone());
        let square = || power(x.clone(), 2.0);
        match self {
            GridFunction::Absolute => f(GridFunction::Sign),
            GridFunction::Sign => Ok(Operand::Number(0.0)),
            GridFunction::Conj => Err(Error::parsing("The complex conjugate has no symbolic derivative")),
            GridFunction::Exp => f(GridFunction::Exp),
            GridFunction::Exp2 => multiply(f(GridFunction::Exp2)?, LN_2),
            GridFunction::Log => power(x.clone(), -1.0),
            GridFunction::Log2 => power(multiply(x.clone(), LN_2)?, -1.0),
            GridFunction::Log10 => power(multiply(x.clone(), LN_10)?, -1.0),
            GridFunction::Sqrt => multiply(0.5, power(x.clone(), -0.5)?),
            GridFunction::Square => multiply(2.0, x.clone()),
            GridFunction::Sin => f(GridFunction::Cos),
            GridFunction::Cos => negate(f(GridFunction::Sin)?),
            GridFunction::Tan => power(f(GridFunction::Cos)?, -2.0),
            GridFunction::Arcsin => power(subtract(1.0, square()?)?, -0.5),
            GridFunction::Arccos => negate(power(subtract(1.0, square()?)?, -0.5)?),
            GridFunction::Arctan => power(add(1.0, square()?)?, -1.0),
            GridFunction::Sinh => f(GridFunction::Cosh),
            GridFunction::Cosh => f(GridFunction::Sinh),
            GridFunction::Tanh => power(f(GridFunction::Cosh)?, -2.0),
            GridFunction::Arcsinh => power(add(square()?, 1.0)?, -0.5),
            GridFunction::Arccosh => power(subtract(square()?, 1.0)?, -0.5),
            GridFunction::Arctanh => power(subtract(1.0, square()?)?, -1.0),
        }
    }
}

impl Display for GridFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for GridFunction {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "abs" => Ok(GridFunction::Absolute),
            "conj" => Ok(GridFunction::Conj),
            name => GridFunction::ALL
                .iter()
                .find(|function| function.name() == name)
                .copied()
                .ok_or_else(|| Error::parsing(format!("Unknown grid function '{}'", name))),
        }
    }
}

/// Applies `function` elementwise. Numbers are folded immediately.
///
/// Fails with [`Error::UndefinedParity`] if the argument has odd parity along some axis.
pub fn grid_function(function: GridFunction, arg: impl Into<Operand>) -> Result<Operand> {
    let arg = arg.into();
    if let Some(value) = arg.as_number() {
        return Ok(Operand::Number(function.apply_real(value)));
    }
    let domain = arg
        .domain()
        .ok_or_else(|| Error::parsing(format!("{} has no domain", arg)))?;
    for axis in 0..domain.dim() {
        if arg.parity(axis) == Some(Parity::Odd) {
            return Err(Error::UndefinedParity(format!(
                "Unknown action of {} on odd parity along axis {}.",
                function, axis
            )));
        }
    }
    Ok(Operand::Operator(OperatorNode::new(
        OperatorKind::GridFunction(function),
        vec![arg],
        domain,
    )?))
}

/// Elementwise functions as named operations.
pub trait GridFunctions {
    fn grid_function(&self, function: GridFunction) -> Result<Operand>;

    fn abs(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Absolute)
    }

    fn sign(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Sign)
    }

    fn conj(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Conj)
    }

    fn exp(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Exp)
    }

    fn exp2(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Exp2)
    }

    fn log(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Log)
    }

    fn log2(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Log2)
    }

    fn log10(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Log10)
    }

    fn sqrt(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Sqrt)
    }

    fn square(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Square)
    }

    fn sin(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Sin)
    }

    fn cos(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Cos)
    }

    fn tan(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Tan)
    }

    fn arcsin(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arcsin)
    }

    fn arccos(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arccos)
    }

    fn arctan(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arctan)
    }

    fn sinh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Sinh)
    }

    fn cosh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Cosh)
    }

    fn tanh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Tanh)
    }

    fn arcsinh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arcsinh)
    }

    fn arccosh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arccosh)
    }

    fn arctanh(&self) -> Result<Operand> {
        self.grid_function(GridFunction::Arctanh)
    }
}

impl GridFunctions for Operand {
    fn grid_function(&self, function: GridFunction) -> Result<Operand> {
        grid_function(function, self.clone())
    }
}

pub(crate) fn operate(node: &OperatorNode, function: GridFunction, args: &[Operand]) -> Result<Output> {
    let scales = node.domain().dealias().to_vec();
    let (layout, shape) = grid_output_shape(node, &scales);
    let data = broadcast_to(&args[0], &shape)?.mapv_into(|z| function.apply(z));
    Ok(Output { layout, scales, data })
}
