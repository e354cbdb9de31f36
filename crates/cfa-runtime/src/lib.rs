//! # cfa-runtime
//!
//! Orchestration for one cfagent invocation.
//!
//! - [`AgentContext`]: config, process supervisor, device tracker and the
//!   shutdown coordinator, passed explicitly to every task
//! - [`ShutdownCoordinator`]: turns SIGINT/SIGTERM into exactly one tracker
//!   shutdown and cancels the heartbeat
//! - [`runner`]: the command flows (`run`, `wda`, `vidtest`, single-device
//!   session commands, `register`, `cleanup`)
//! - [`RegistrationClient`]: announces devices to the control floor

pub mod context;
pub mod register;
pub mod runner;
pub mod shutdown;

pub use context::AgentContext;
pub use register::{DeviceRegistration, RegistrationClient};
pub use shutdown::{ShutdownCoordinator, run_heartbeat};
