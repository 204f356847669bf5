//! Sync task framework (C10) and the cloud planner/executor (C11): the
//! per-vault job that drains pending operations, purges trashed files,
//! advances any in-progress key rotation, and — for cloud vaults — plans
//! and runs the upload/download/delete diff against the remote bucket.

pub mod error;
pub mod executor;
pub mod plan;
pub mod task;

pub use error::{Result, SyncError};
pub use executor::{execute, metric_for_operation, with_ensured_directories, ExecutionReport};
pub use plan::{build_plan, has_potential_conflict, LocalRecord, Plan, PlanAction, RemoteRecord};
pub use task::SyncTask;
