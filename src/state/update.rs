use serde_json::Value;

use crate::state::FieldValue;

/// Partial update returned by a stage: an ordered list of `field -> value`
/// writes.
///
/// What a write *means* is decided by the field's merge policy when the
/// executor applies the update: a last-writer-wins field is replaced, an
/// append field has the written list concatenated onto it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    entries: Vec<(String, FieldValue)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style write of a single field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Builder-style write of list items to a field.
    pub fn append<I>(mut self, field: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.insert(field, FieldValue::List(items.into_iter().collect()));
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.entries.push((field.into(), value.into()));
    }

    /// Last value written to `field` in this update, if any.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
