//! Registry-based selection of operator variants.
//!
//! Each operator family lists its variants with a structural predicate over the constructor
//! arguments. Simplifying variants are checked first, in order, and the first match returns its
//! result directly. Otherwise exactly one constructing variant must match.
use crate::error::{Error, Result};
use crate::operand::Operand;
use itertools::Itertools;
use log::trace;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Rule {
    /// Returns a number or an existing operand instead of a new node.
    Simplify,
    /// Materializes a new node.
    Construct,
}

pub(crate) struct Variant<A> {
    pub name: &'static str,
    pub rule: Rule,
    pub matches: fn(&A) -> bool,
    pub build: fn(&A) -> Result<Operand>,
}

/// Selects and applies the variant of `family` matching `args`.
pub(crate) fn dispatch<A>(family: &str, variants: &[Variant<A>], args: &A, describe: impl Fn() -> String) -> Result<Operand> {
    let simplifier = variants
        .iter()
        .filter(|variant| variant.rule == Rule::Simplify)
        .find(|variant| (variant.matches)(args));
    if let Some(variant) = simplifier {
        trace!("{} simplified by {}", family, variant.name);
        return (variant.build)(args);
    }

    let candidates: Vec<_> = variants
        .iter()
        .filter(|variant| variant.rule == Rule::Construct && (variant.matches)(args))
        .collect();
    match candidates.as_slice() {
        [variant] => {
            trace!("{} constructed as {}", family, variant.name);
            (variant.build)(args)
        }
        [] => Err(Error::parsing(format!("No variant of {} matches {}", family, describe()))),
        _ => Err(Error::parsing(format!(
            "Ambiguous variants of {} for {}: {}",
            family,
            describe(),
            candidates.iter().map(|variant| variant.name).join(", ")
        ))),
    }
}
