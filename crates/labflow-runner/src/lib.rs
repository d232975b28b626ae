//! Process execution for workflow steps.
//!
//! A [`ProcessSession`] runs one executable attached to a pseudo-terminal so
//! that it can prompt for and read free-form operator input as if it were
//! connected to a live terminal. The child is placed in its own session and
//! process group; [`ProcessSession::terminate`] signals the whole group.
//!
//! # Security Model
//!
//! All process execution goes through [`CommandSpec`], which only supports
//! argv-style invocation. Nothing is ever evaluated through a shell string.

pub mod command_spec;
pub mod error;
mod platform;
pub mod ring_buffer;
pub mod session;

pub use command_spec::CommandSpec;
pub use error::RunnerError;
pub use ring_buffer::RingBuffer;
pub use session::{ProcessSession, SessionConfig, SessionResult, TerminationReport};
