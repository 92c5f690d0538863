//! Core of a spectral PDE solver.
//!
//! Fields live on a [`Domain`](domain::Domain) built from one-dimensional spectral bases and
//! move through a chain of distributed layouts between coefficient space and grid space.
//! Expressions over fields are trees of [`Operand`]s that are simplified while they are built,
//! analysed symbolically (linearity, expansion, coefficient splitting) and evaluated lazily by
//! an [`Evaluator`]. Linear problems are assembled into per-wavenumber sparse systems by a
//! [`PencilSet`](pencil::PencilSet).
pub mod array;
pub mod basis;
pub mod comm;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod field;
pub mod layout;
pub mod linalg;
pub mod operand;
pub mod operators;
pub mod pencil;
pub mod problem;
pub mod settings;
pub mod system;

pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use num::complex::Complex64;
pub use operand::{FieldRef, Operand, Var};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate ndarray;
