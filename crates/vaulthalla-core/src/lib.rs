//! Capability bundle wiring the vault storage and sync engine together
//! (§9): the surface a mount-callback layer or WebSocket handler layer
//! would call. No POSIX mount callbacks, routers, or RBAC enforcement live
//! here — those are external collaborators per spec.md §1's non-goals.
//!
//! Teardown order, matching §9: call [`controller::SyncController::shutdown`]
//! first (drains the planner/executor inside every in-flight task), then
//! drop the controller, then drop the [`context::CoreContext`] (which drops
//! the worker pools it indirectly holds permits for), then drop the
//! catalog handle last.

pub mod caller;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;

pub use caller::AuthenticatedCaller;
pub use config::{PathsConfig, S3DefaultsConfig, VaultConfig, WorkerPoolsConfig};
pub use context::CoreContext;
pub use controller::{ControllerCommand, SyncController};
pub use error::{Result, VaultError};
