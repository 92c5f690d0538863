//! Library-wide error type.
use std::fmt;
use std::fmt::{Display, Formatter};

/// Errors raised while building, analysing or evaluating expressions and pencil systems.
///
/// All of these indicate problems with the model definition or with how the library is being
/// used. None of them are transient.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An expression is not linear in the requested variables.
    Nonlinear(String),
    /// A grid function was applied to an argument with odd parity.
    UndefinedParity(String),
    /// No operator variant matches the given arguments, or a symbolic query
    /// encountered an operand outside the declared variables.
    SymbolicParsing(String),
    /// Operands bound for the same operation live on different domains.
    DomainMismatch(String),
    /// A value could not be cast to the requested numeric type.
    Cast(String),
    /// A field could not be brought into the requested layout, or its data does not fit.
    Layout(String),
    /// A linear system could not be solved.
    Solve(String),
    /// A wrapped user function returned an error.
    Function(eyre::Report),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nonlinear(msg) => write!(f, "Nonlinear operator error: {}", msg),
            Self::UndefinedParity(msg) => write!(f, "Undefined parity: {}", msg),
            Self::SymbolicParsing(msg) => write!(f, "Symbolic parsing error: {}", msg),
            Self::DomainMismatch(msg) => write!(f, "Domain mismatch: {}", msg),
            Self::Cast(msg) => write!(f, "Cast error: {}", msg),
            Self::Layout(msg) => write!(f, "Layout error: {}", msg),
            Self::Solve(msg) => write!(f, "Failed to solve linear system: {}", msg),
            Self::Function(err) => write!(f, "General function failed: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub(crate) fn nonlinear(msg: impl Into<String>) -> Self {
        Self::Nonlinear(msg.into())
    }

    pub(crate) fn parsing(msg: impl Into<String>) -> Self {
        Self::SymbolicParsing(msg.into())
    }

    pub(crate) fn layout(msg: impl Into<String>) -> Self {
        Self::Layout(msg.into())
    }

    pub(crate) fn domain_mismatch(msg: impl Into<String>) -> Self {
        Self::DomainMismatch(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
