//! Sync controller (§5): a priority-queue-by-`next_run` scheduler. One
//! controller task wakes, pops the earliest-ready vault, and submits it to
//! the sync worker pool (a bounded `tokio::task::spawn` fleet gated by a
//! semaphore, standing in for the teacher's fixed-size thread pool). Grounded
//! on the consume-loop shape of the teacher's `ScalingAgent::run` — a
//! `recv().await` on a command channel, `match` on the command, log and
//! continue on a handler error rather than propagating it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use vaulthalla_catalog::{CatalogStore, Page, SyncTrigger, VaultFilter};
use vaulthalla_sync::SyncTask;

use crate::context::CoreContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledVault {
	vault_id: Uuid,
	next_run: DateTime<Utc>,
}

impl Ord for ScheduledVault {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		Reverse(self.next_run).cmp(&Reverse(other.next_run))
	}
}

impl PartialOrd for ScheduledVault {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

pub enum ControllerCommand {
	/// Coalesces into the existing pending run if one is already queued.
	RunNow(Uuid),
	/// Re-reads the vault list from the catalog, pruning removed vaults and
	/// scheduling newly-seen ones immediately.
	Refresh,
	Shutdown,
}

pub struct SyncController {
	ctx: Arc<CoreContext>,
	store: Arc<dyn CatalogStore>,
	tasks: RwLock<HashMap<Uuid, Arc<SyncTask>>>,
	running: Mutex<HashSet<Uuid>>,
	queue: Mutex<BinaryHeap<ScheduledVault>>,
	permits: Arc<Semaphore>,
	handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
	cmd_tx: mpsc::UnboundedSender<ControllerCommand>,
	cmd_rx: Mutex<mpsc::UnboundedReceiver<ControllerCommand>>,
}

impl SyncController {
	pub fn new(ctx: Arc<CoreContext>, store: Arc<dyn CatalogStore>) -> Arc<Self> {
		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
		let sync_workers = ctx.config.worker_pools.sync;
		Arc::new(Self {
			ctx,
			store,
			tasks: RwLock::new(HashMap::new()),
			running: Mutex::new(HashSet::new()),
			queue: Mutex::new(BinaryHeap::new()),
			permits: Arc::new(Semaphore::new(sync_workers)),
			handles: Mutex::new(Vec::new()),
			cmd_tx,
			cmd_rx: Mutex::new(cmd_rx),
		})
	}

	pub fn handle(&self) -> mpsc::UnboundedSender<ControllerCommand> {
		self.cmd_tx.clone()
	}

	/// The controller's own loop. Never blocks outside this wait — all
	/// actual sync work happens on spawned worker tasks holding a permit.
	pub async fn run(self: Arc<Self>) {
		self.refresh().await;
		let mut cmd_rx = self.cmd_rx.lock().await;

		loop {
			let sleep_for = self.time_until_next_ready().await;
			tokio::select! {
				cmd = cmd_rx.recv() => {
					match cmd {
						Some(ControllerCommand::RunNow(vault_id)) => self.enqueue_now(vault_id).await,
						Some(ControllerCommand::Refresh) => self.refresh().await,
						Some(ControllerCommand::Shutdown) | None => {
							info!("sync controller shutting down");
							break;
						}
					}
				}
				_ = tokio::time::sleep(sleep_for) => {
					self.dispatch_ready().await;
				}
			}
		}
	}

	async fn time_until_next_ready(&self) -> std::time::Duration {
		let queue = self.queue.lock().await;
		match queue.peek() {
			Some(next) => (next.next_run - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO),
			None => std::time::Duration::from_secs(3600),
		}
	}

	async fn dispatch_ready(self: &Arc<Self>) {
		let now = Utc::now();
		let mut ready = Vec::new();
		{
			let mut queue = self.queue.lock().await;
			while let Some(top) = queue.peek() {
				if top.next_run > now {
					break;
				}
				ready.push(queue.pop().unwrap().vault_id);
			}
		}
		for vault_id in ready {
			self.submit(vault_id, SyncTrigger::Scheduled).await;
		}
	}

	async fn enqueue_now(self: &Arc<Self>, vault_id: Uuid) {
		if self.running.lock().await.contains(&vault_id) {
			// Backpressure: a run is already in flight, its result covers
			// whatever triggered this request.
			return;
		}
		self.submit(vault_id, SyncTrigger::Manual).await;
	}

	async fn submit(self: &Arc<Self>, vault_id: Uuid, trigger: SyncTrigger) {
		let task = match self.tasks.read().await.get(&vault_id).cloned() {
			Some(task) => task,
			None => {
				warn!(%vault_id, "no sync task registered for vault, skipping");
				return;
			}
		};

		if !self.running.lock().await.insert(vault_id) {
			return;
		}

		let this = Arc::clone(self);
		let permits = self.permits.clone();
		let handle = tokio::spawn(async move {
			let _permit = permits.acquire_owned().await;
			if let Err(e) = task.run(trigger).await {
				warn!(%vault_id, error = %e, "sync task run failed");
			}
			this.running.lock().await.remove(&vault_id);
			this.reschedule(vault_id).await;
		});
		self.handles.lock().await.push(handle);
	}

	async fn reschedule(&self, vault_id: Uuid) {
		let interval = match self.store.get_policy(vault_id).await {
			Ok(policy) => policy.base().interval_seconds.max(1),
			Err(_) => return,
		};
		let next_run = Utc::now() + chrono::Duration::seconds(interval as i64);
		self.queue.lock().await.push(ScheduledVault { vault_id, next_run });
	}

	#[instrument(skip(self))]
	async fn refresh(&self) {
		let vaults = match self.store.list_vaults(VaultFilter { active_only: true, ..Default::default() }, Page::default()).await {
			Ok(v) => v,
			Err(e) => {
				warn!(error = %e, "failed to list vaults for sync controller refresh");
				return;
			}
		};

		let seen: HashSet<Uuid> = vaults.iter().map(|v| v.id).collect();
		self.tasks.write().await.retain(|id, _| seen.contains(id));
		self.queue.lock().await.retain(|s| seen.contains(&s.vault_id));

		for vault in vaults {
			let already_known = self.tasks.read().await.contains_key(&vault.id);
			if already_known {
				continue;
			}
			let engine = match self.ctx.engine_for(vault.id).await {
				Ok(engine) => engine,
				Err(e) => {
					warn!(vault_id = %vault.id, error = %e, "failed to build engine for vault, skipping");
					continue;
				}
			};
			let task = Arc::new(SyncTask::new(engine, self.store.clone()));
			self.tasks.write().await.insert(vault.id, task);
			self.queue.lock().await.push(ScheduledVault { vault_id: vault.id, next_run: Utc::now() });
		}

		info!(vault_count = seen.len(), "sync controller refreshed vault set");
	}

	pub async fn interrupt(&self, vault_id: Uuid) {
		if let Some(task) = self.tasks.read().await.get(&vault_id) {
			task.interrupt();
		}
	}

	/// Orderly teardown (§9): stop accepting new scheduling decisions, let
	/// every in-flight task (and the planner/executor work inside it) drain
	/// to a terminal status, then let the caller drop the catalog handle.
	pub async fn shutdown(&self) {
		let _ = self.cmd_tx.send(ControllerCommand::Shutdown);
		let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
		for handle in handles {
			let _ = handle.await;
		}
		info!("sync controller drained all in-flight tasks");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scheduled_vault_orders_earliest_first() {
		let now = Utc::now();
		let mut heap = BinaryHeap::new();
		heap.push(ScheduledVault { vault_id: Uuid::new_v4(), next_run: now + chrono::Duration::seconds(60) });
		let earliest = ScheduledVault { vault_id: Uuid::new_v4(), next_run: now };
		heap.push(earliest);
		assert_eq!(heap.peek().unwrap().next_run, now);
	}
}
