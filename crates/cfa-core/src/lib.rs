//! # cfa-core
//!
//! Core types and the error taxonomy for the cfagent device agent.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod types;

pub use error::{AgentError, Result};
pub use types::*;
