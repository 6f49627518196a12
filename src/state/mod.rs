// src/state/mod.rs

//! Shared state threaded through a run.
//!
//! - [`value`] holds the typed field values stages read and write.
//! - [`schema`] declares every field once, with its type and merge policy.
//! - [`update`] is the partial update a stage returns.
//! - [`shared`] owns the values for one run and applies updates under the
//!   declared merge policies; stages only ever see a [`StateSnapshot`].

pub mod schema;
pub mod shared;
pub mod update;
pub mod value;

pub use schema::{FieldSpec, StateSchema};
pub use shared::{SharedState, StateSnapshot};
pub use update::StateUpdate;
pub use value::{FieldType, FieldValue};
