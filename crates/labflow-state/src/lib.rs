//! State store: per-step status plus the completion order, persisted to
//! `.labflow/state.json` with atomic replace semantics.

mod document;
mod store;

pub use document::{DecisionRecord, SCHEMA_VERSION, SkipRecord, StateDocument};
pub use store::StateStore;
