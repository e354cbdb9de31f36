//! # cfa-config
//!
//! Configuration system for cfagent. Reads `default.json`, `config.json` and
//! `calculated.json`, deep-merges them in that precedence order, then applies
//! `CFAGENT_*` environment overrides.
//!
//! The result is an immutable snapshot shared for the lifetime of one invocation.

pub mod loader;
pub mod schema;

pub use loader::{ConfigLoader, ConfigPaths, merge_json};
pub use schema::AgentConfig;
pub use schema::{ConfigWarning, WarningSeverity};
