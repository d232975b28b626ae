//! Workflow definitions.
//!
//! A definition is a YAML document listing steps in their default execution
//! order. [`Workflow::load`] parses and validates it in full; nothing runs
//! against a definition that failed validation.

mod model;
mod parse;

pub use model::{Conditional, InputSpec, Step, Workflow};
