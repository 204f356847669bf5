//! Plan executor (C11): runs a [`Plan`]'s actions in phase order, with a
//! barrier between phases (`EnsureDirectories → Upload → Download →
//! DeleteRemote → DeleteLocal`). Within a phase, actions already come out
//! of [`crate::plan::build_plan`] in lexicographic key order.

use std::sync::Arc;

use tracing::{instrument, warn};
use vaulthalla_catalog::{OperationKind, ScopedOp, ThroughputMetric, Throughput};
use vaulthalla_storage::StorageEngine;

use crate::error::Result;
use crate::plan::{Plan, PlanAction};

/// Per-phase outcome, folded into the sync event's throughputs by the
/// caller. Mirrors a `ScopedOp` per attempted action plus the metric it
/// belongs under.
pub struct ExecutionReport {
	pub throughputs: Vec<Throughput>,
}

fn metric_for(action: &PlanAction) -> ThroughputMetric {
	match action {
		PlanAction::EnsureDirectories(_) => ThroughputMetric::Copy,
		PlanAction::Upload { .. } => ThroughputMetric::Upload,
		PlanAction::Download { .. } => ThroughputMetric::Download,
		PlanAction::DeleteRemote { .. } | PlanAction::DeleteLocal { .. } => ThroughputMetric::Delete,
	}
}

/// Directories new uploads need, derived from the plan and prepended as an
/// `EnsureDirectories` action — kept out of `build_plan` because it needs a
/// catalog lookup.
pub async fn with_ensured_directories(engine: &StorageEngine, mut plan: Plan) -> Result<Plan> {
	let upload_paths: Vec<String> = plan
		.actions
		.iter()
		.filter_map(|a| match a {
			PlanAction::Upload { path, .. } => Some(path.clone()),
			_ => None,
		})
		.collect();

	if upload_paths.is_empty() {
		return Ok(plan);
	}

	let missing = engine.extract_directories(&upload_paths).await?;
	if !missing.is_empty() {
		plan.actions.insert(0, PlanAction::EnsureDirectories(missing));
	}
	Ok(plan)
}

#[instrument(skip(engine, plan), fields(vault_id = %engine.vault.id, actions = plan.actions.len()))]
pub async fn execute(engine: &Arc<StorageEngine>, plan: &Plan) -> Result<ExecutionReport> {
	let mut by_metric: std::collections::HashMap<ThroughputMetric, Throughput> = std::collections::HashMap::new();

	for action in &plan.actions {
		let metric = metric_for(action);
		let t_begin = chrono::Utc::now();
		let size_bytes = action_size(action);
		let outcome = run_action(engine, action).await;
		let success = match &outcome {
			Ok(()) => true,
			Err(e) => {
				warn!(vault_id = %engine.vault.id, action = ?action, error = %e, "sync action failed");
				false
			}
		};

		by_metric
			.entry(metric)
			.or_insert_with(|| Throughput::new(metric))
			.scoped_ops
			.push(ScopedOp { size_bytes, t_begin, t_end: Some(chrono::Utc::now()), success });
	}

	let mut throughputs: Vec<Throughput> = by_metric.into_values().collect();
	for t in &mut throughputs {
		t.recompute();
	}
	Ok(ExecutionReport { throughputs })
}

fn action_size(action: &PlanAction) -> u64 {
	match action {
		PlanAction::Upload { size_bytes, .. } | PlanAction::Download { size_bytes, .. } => *size_bytes,
		_ => 0,
	}
}

async fn run_action(engine: &Arc<StorageEngine>, action: &PlanAction) -> Result<()> {
	match action {
		PlanAction::EnsureDirectories(dirs) => {
			for dir in dirs {
				let abs = engine.resolver.abs_path(dir, vaulthalla_fs::RootKind::VaultRoot)?;
				engine.mkdir(&abs, 0o755, engine.vault.owner_id).await?;
			}
			Ok(())
		}
		PlanAction::Upload { path, .. } => {
			let mut entry = engine.entry(path).await?;
			engine.upload(&mut entry, None, false).await?;
			Ok(())
		}
		PlanAction::Download { path, free_after_download, .. } => {
			if *free_after_download {
				engine.index_and_delete_file(path).await?;
			} else {
				engine.download_file(path).await?;
			}
			Ok(())
		}
		PlanAction::DeleteRemote { path } => Ok(engine.delete_remote(path).await?),
		PlanAction::DeleteLocal { path } => {
			let abs = engine.resolver.abs_path(path, vaulthalla_fs::RootKind::VaultRoot)?;
			engine.remove(&abs, engine.vault.owner_id).await?;
			Ok(())
		}
	}
}

/// Translates a Move/Rename/Copy [`Operation`](vaulthalla_catalog::Operation)
/// into the matching [`ThroughputMetric`], for `processOperations`'s
/// bookkeeping in the task stage runner.
pub fn metric_for_operation(kind: OperationKind) -> ThroughputMetric {
	match kind {
		OperationKind::Move => ThroughputMetric::Rename,
		OperationKind::Rename => ThroughputMetric::Rename,
		OperationKind::Copy => ThroughputMetric::Copy,
	}
}
