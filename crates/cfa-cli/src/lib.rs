//! # cfa-cli
//!
//! Command-line interface for the cfagent device agent.
//!
//! ## Commands
//!
//! - `cfagent run`: Register and start every attached device until signalled
//! - `cfagent register`: Announce attached devices to the control floor
//! - `cfagent cleanup`: Kill helper processes left by earlier runs
//! - `cfagent wda`: Start WDA on one device and keep it up until signalled
//! - `cfagent winsize` / `source` / `alertinfo`: One-shot session queries
//! - `cfagent clickEl -label <label>`: Tap an element by accessibility label
//! - `cfagent vidtest`: Stream backup video from one device until signalled
//!
//! Options use the single-dash long form (`-id`, `-debug`, ...); `--id` works too.

pub mod commands;

pub use commands::{Cli, normalize_args};
