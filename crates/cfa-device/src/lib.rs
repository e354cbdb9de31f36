//! # cfa-device
//!
//! Device management for the cfagent host agent.
//!
//! - **Bridges**: device discovery and per-device transports over `go-ios`
//!   or `iosif`, selected once from configuration
//! - **Process supervision**: every helper process is stamped with an
//!   ownership marker so leftovers can be reclaimed after a crash
//! - **WDA**: the WebDriverAgent session lifecycle (start / ensure session /
//!   operations / stop)
//! - **Tracker**: the registry owning the bridge and every managed device
//!
//! ```text
//!   DeviceTracker ──owns──▶ Arc<dyn Bridge>
//!        │
//!        └─ Device ──owns──▶ Arc<dyn Transport> ──spawns──▶ ProcessHandle
//!              │                                                │
//!              └─ WdaController ──▶ DriverClient (HTTP)          └─▶ ProcessSupervisor
//! ```

pub mod bridge;
pub mod device;
pub mod driver;
pub mod mock;
pub mod process;
pub mod sanity;
pub mod tracker;
pub mod wda;

pub use bridge::{Bridge, HelperKind, PortForward, Transport};
pub use device::{BackupTask, Device};
pub use driver::{AlertInfo, DriverClient, ElementHandle, WdaClient, WindowSize};
pub use process::{CleanupReport, ProcessHandle, ProcessInfo, ProcessSupervisor, ProcessTable};
pub use sanity::{CheckResult, SanityCheck, SanityReport, default_checks, run_checks};
pub use tracker::{DeviceSnapshot, DeviceTracker, DriverFactory, StartMode};
pub use wda::{PendingStart, RunningWda, StartOutcome, WdaController, WdaState};
