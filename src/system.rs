//! Ordered collections of named fields.
use crate::domain::Domain;
use crate::field::Field;
use crate::operand::FieldRef;
use std::sync::Arc;

/// The state variables of a problem, in the order of the problem's coefficient matrices.
#[derive(Debug, Clone)]
pub struct FieldSystem {
    fields: Vec<FieldRef>,
}

impl FieldSystem {
    /// Creates one field per name, each non-constant along every axis.
    pub fn new(domain: &Arc<Domain>, names: &[&str]) -> Self {
        let fields = names
            .iter()
            .map(|name| FieldRef::new(Field::new(domain, *name)))
            .collect();
        Self { fields }
    }

    pub fn from_fields(fields: Vec<FieldRef>) -> Self {
        Self { fields }
    }

    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldRef> {
        self.fields.iter().find(|field| field.borrow().name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(FieldRef::name).collect()
    }
}
