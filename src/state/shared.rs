use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::MergeError;
use crate::state::{FieldValue, StateSchema, StateUpdate};
use crate::types::MergePolicy;

type Values = BTreeMap<String, FieldValue>;

/// Shared state for one run.
///
/// Owned exclusively by the executor. Fields are absent until first written;
/// every write goes through [`SharedState::apply`], which enforces the schema
/// and the declared merge policy.
#[derive(Debug, Clone)]
pub struct SharedState {
    schema: Arc<StateSchema>,
    values: Arc<Values>,
    iteration: u32,
    forced_pass: bool,
}

impl SharedState {
    pub fn new(schema: Arc<StateSchema>) -> Self {
        Self {
            schema,
            values: Arc::new(Values::new()),
            iteration: 0,
            forced_pass: false,
        }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Check an update against the schema without applying it.
    pub fn validate(&self, update: &StateUpdate) -> Result<(), MergeError> {
        for (field, value) in update.iter() {
            let spec = self
                .schema
                .get(field)
                .ok_or_else(|| MergeError::UnknownField(field.to_string()))?;

            if value.field_type() != spec.ty {
                return Err(MergeError::TypeMismatch {
                    field: field.to_string(),
                    expected: spec.ty,
                    found: value.field_type(),
                });
            }
        }
        Ok(())
    }

    /// Apply an update under each field's merge policy.
    ///
    /// The update is validated as a whole first, so a rejected update leaves
    /// the state untouched.
    pub fn apply(&mut self, update: &StateUpdate) -> Result<(), MergeError> {
        self.validate(update)?;

        let values = Arc::make_mut(&mut self.values);
        for (field, value) in update.iter() {
            // validate() guarantees the field is declared.
            let policy = self
                .schema
                .get(field)
                .map(|spec| spec.policy)
                .unwrap_or(MergePolicy::LastWriterWins);

            match (policy, value) {
                (MergePolicy::Append, FieldValue::List(items)) => {
                    match values.get_mut(field) {
                        Some(FieldValue::List(existing)) => existing.extend(items.iter().cloned()),
                        _ => {
                            values.insert(field.to_string(), FieldValue::List(items.clone()));
                        }
                    }
                }
                _ => {
                    values.insert(field.to_string(), value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn forced_pass(&self) -> bool {
        self.forced_pass
    }

    pub(crate) fn mark_forced_pass(&mut self) {
        self.forced_pass = true;
    }

    /// Cheap, immutable view handed to stages and returned to callers.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: Arc::clone(&self.values),
            iteration: self.iteration,
            forced_pass: self.forced_pass,
        }
    }
}

/// Read-only view of shared state at a point in time.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    values: Arc<Values>,
    iteration: u32,
    forced_pass: bool,
}

impl StateSnapshot {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(FieldValue::as_integer)
    }

    /// List contents of `field`; empty if the field has not been written.
    pub fn list(&self, field: &str) -> &[Value] {
        self.get(field).and_then(FieldValue::as_list).unwrap_or(&[])
    }

    /// Retry-loop iteration counter (0 on the first pass).
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Whether the accepting branch was forced by the iteration ceiling.
    pub fn forced_pass(&self) -> bool {
        self.forced_pass
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON object of all written fields.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in self.values.iter() {
            let json = serde_json::to_value(value).unwrap_or(Value::Null);
            map.insert(name.clone(), json);
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{FieldSpec, FieldType};

    fn schema() -> Arc<StateSchema> {
        let mut schema = StateSchema::new();
        schema.declare(FieldSpec::text("query")).unwrap();
        schema.declare(FieldSpec::flag("accepted")).unwrap();
        schema.declare(FieldSpec::accumulating("items")).unwrap();
        Arc::new(schema)
    }

    #[test]
    fn scalar_is_replaced_and_list_is_appended() {
        let mut state = SharedState::new(schema());

        state
            .apply(&StateUpdate::new().set("query", "X").append("items", [json!(1)]))
            .unwrap();
        state
            .apply(&StateUpdate::new().set("query", "Y").append("items", [json!(2), json!(3)]))
            .unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.text("query"), Some("Y"));
        assert_eq!(snap.list("items"), &[json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn unknown_field_is_rejected_without_partial_write() {
        let mut state = SharedState::new(schema());
        let update = StateUpdate::new().set("query", "X").set("bogus", true);

        let err = state.apply(&update).unwrap_err();
        assert_eq!(err, MergeError::UnknownField("bogus".into()));
        assert!(!state.snapshot().contains("query"));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut state = SharedState::new(schema());
        let err = state
            .apply(&StateUpdate::new().set("accepted", "yes"))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::TypeMismatch {
                field: "accepted".into(),
                expected: FieldType::Bool,
                found: FieldType::Text,
            }
        );
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut state = SharedState::new(schema());
        state.apply(&StateUpdate::new().set("query", "X")).unwrap();
        let before = state.snapshot();

        state.apply(&StateUpdate::new().set("query", "Y")).unwrap();

        assert_eq!(before.text("query"), Some("X"));
        assert_eq!(state.snapshot().text("query"), Some("Y"));
    }
}
