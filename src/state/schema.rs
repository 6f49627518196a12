use std::collections::BTreeMap;

use crate::errors::GraphError;
use crate::state::FieldType;
use crate::types::MergePolicy;

/// Declaration of one state field: name, type and merge policy.
///
/// The policy is fixed here and nowhere else; there is no API to change it
/// once the schema has been built into a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub policy: MergePolicy,
}

impl FieldSpec {
    /// A last-writer-wins field of the given type.
    pub fn scalar(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            policy: MergePolicy::LastWriterWins,
        }
    }

    /// An append-only list field.
    pub fn accumulating(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: FieldType::List,
            policy: MergePolicy::Append,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::scalar(name, FieldType::Text)
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::scalar(name, FieldType::Bool)
    }
}

/// The set of fields a run's shared state may hold.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field declaration.
    ///
    /// Rejects duplicate names and append policies on non-list fields.
    pub fn declare(&mut self, spec: FieldSpec) -> Result<(), GraphError> {
        if spec.name.trim().is_empty() {
            return Err(GraphError::Schema("field names must not be empty".to_string()));
        }
        if spec.policy == MergePolicy::Append && spec.ty != FieldType::List {
            return Err(GraphError::Schema(format!(
                "field '{}' uses the append policy but is declared as {}",
                spec.name, spec.ty
            )));
        }
        if self.fields.contains_key(&spec.name) {
            return Err(GraphError::Schema(format!(
                "field '{}' is declared more than once",
                spec.name
            )));
        }
        self.fields.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
