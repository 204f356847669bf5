//! Per-vault sync task (C10): runs the base stages in order, with cloud
//! stages inserted before Shutdown. Grounded on the stage-running loop
//! shape of the teacher's scaling agent (`ScalingAgent::run`), adapted
//! from "consume one telemetry event" to "run one ordered stage list with
//! a heartbeat check between each".

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use vaulthalla_catalog::{
	CatalogStore, Operation, OperationKind, RemoteStrategy, ScopedOp, SyncEvent, SyncStatus, SyncTrigger, Throughput, ThroughputMetric,
	TrashedFile,
};
use vaulthalla_storage::{StorageEngine, StorageKind};

use crate::error::{Result, SyncError};
use crate::executor::{self, metric_for_operation};
use crate::plan::{build_plan, LocalRecord, RemoteRecord};

/// One vault's sync task. Stateless between runs except for the shared
/// interrupt flag, which `interrupt()` can set from another thread.
pub struct SyncTask {
	pub engine: Arc<StorageEngine>,
	store: Arc<dyn CatalogStore>,
	interrupt: Arc<AtomicBool>,
}

impl SyncTask {
	pub fn new(engine: Arc<StorageEngine>, store: Arc<dyn CatalogStore>) -> Self {
		Self { engine, store, interrupt: Arc::new(AtomicBool::new(false)) }
	}

	/// Sets the shared interrupt flag; the running stage (if any) observes
	/// it at its next heartbeat and unwinds into Shutdown.
	pub fn interrupt(&self) {
		self.interrupt.store(true, Ordering::SeqCst);
	}

	fn heartbeat(&self) -> Result<()> {
		if self.interrupt.swap(false, Ordering::SeqCst) {
			return Err(SyncError::Interrupted(self.engine.vault.id));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(vault_id = %self.engine.vault.id, trigger = ?trigger))]
	pub async fn run(&self, trigger: SyncTrigger) -> Result<SyncEvent> {
		let mut event = self.engine.new_sync_event(trigger).await?;
		event.status = SyncStatus::Running;
		self.store.update_sync_event(event.clone()).await?;

		let outcome = self.run_stages(&mut event).await;
		self.shutdown(&mut event, outcome).await?;
		Ok(event)
	}

	async fn run_stages(&self, event: &mut SyncEvent) -> Result<()> {
		self.heartbeat()?;
		self.process_operations(event).await?;

		self.heartbeat()?;
		self.remove_trashed_files(event).await?;

		self.heartbeat()?;
		self.handle_vault_key_rotation(event).await?;

		if self.engine.kind.is_cloud() {
			self.heartbeat()?;
			let (local_map, s3_map, decrypt_failed) = self.init_bins().await?;
			self.heartbeat()?;
			self.sync_cloud(event, local_map, s3_map, decrypt_failed).await?;
		}

		Ok(())
	}

	/// Finalises the event: records the failure if the stages threw,
	/// otherwise classifies Success/Error from the accumulated throughputs,
	/// persists, and (on Success) pins `last_sync_at`.
	async fn shutdown(&self, event: &mut SyncEvent, outcome: Result<()>) -> Result<()> {
		event.timestamp_end = Some(Utc::now());
		event.heartbeat_at = Utc::now();

		event.status = match outcome {
			Ok(()) => {
				if event.total_failed_ops() == 0 {
					SyncStatus::Success
				} else {
					SyncStatus::Error
				}
			}
			Err(SyncError::Interrupted(_)) => SyncStatus::Cancelled,
			Err(e) => {
				event.error_message = Some(e.to_string());
				SyncStatus::Error
			}
		};

		self.store.update_sync_event(event.clone()).await?;

		if event.status == SyncStatus::Success {
			self.mark_synced().await?;
		}

		info!(vault_id = %self.engine.vault.id, status = ?event.status, "sync task finished");
		Ok(())
	}

	async fn mark_synced(&self) -> Result<()> {
		let mut policy = self.store.get_policy(self.engine.vault.id).await?;
		policy.base_mut().last_sync_at = Some(Utc::now());
		self.store.update_policy(self.engine.vault.id, policy).await?;
		Ok(())
	}

	fn record(event: &mut SyncEvent, metric: ThroughputMetric, size_bytes: u64, success: bool) {
		let t = event.throughputs.iter_mut().find(|t| t.metric == metric);
		let entry = match t {
			Some(t) => t,
			None => {
				event.throughputs.push(Throughput::new(metric));
				event.throughputs.last_mut().unwrap()
			}
		};
		entry.scoped_ops.push(ScopedOp { size_bytes, t_begin: Utc::now(), t_end: Some(Utc::now()), success });
		entry.recompute();
	}

	// --- Stage 2: processOperations -----------------------------------

	async fn process_operations(&self, event: &mut SyncEvent) -> Result<()> {
		let ops = self.store.list_operations(self.engine.vault.id).await?;
		for op in ops {
			let result = self.process_operation(&op).await;
			Self::record(event, metric_for_operation(op.kind), 0, result.is_ok());
			if let Err(e) = result {
				warn!(vault_id = %self.engine.vault.id, op_id = %op.id, error = %e, "failed to process operation");
			}
		}
		Ok(())
	}

	async fn process_operation(&self, op: &Operation) -> Result<()> {
		if op.kind == OperationKind::Copy {
			// Backing and thumbnail paths are alias-keyed, so Move/Rename
			// never touch either; a Copy mints a new alias and needs its
			// own thumbnail set copied over from the source's.
			if let Ok(source) = self.store.get_entry_by_path(self.engine.vault.id, &op.source_path).await {
				if let Ok(dest) = self.store.get_entry_by_id(op.file_id).await {
					self.engine.copy_thumbnails(&source.base32_alias, &dest.base32_alias)?;
				}
			}
		}
		self.store.clear_operation(op.id).await?;
		Ok(())
	}

	// --- Stage 3: removeTrashedFiles -----------------------------------

	async fn remove_trashed_files(&self, event: &mut SyncEvent) -> Result<()> {
		let trashed = self.store.list_trashed(self.engine.vault.id).await?;
		for file in trashed {
			if file.deleted_at.is_some() {
				continue;
			}
			let result = self.delete_trashed(&file).await;
			Self::record(event, ThroughputMetric::Delete, file.size_bytes, result.is_ok());
			if let Err(e) = result {
				warn!(vault_id = %self.engine.vault.id, file_id = %file.id, error = %e, "failed to purge trashed file");
			}
		}
		Ok(())
	}

	async fn delete_trashed(&self, file: &TrashedFile) -> Result<()> {
		if self.engine.kind.is_cloud() {
			self.engine.delete_remote(&file.path).await?;
			self.store.mark_trashed_file_deleted(file.id).await?;
		} else {
			self.engine.remove_locally_trashed(file).await;
		}
		Ok(())
	}

	// --- Stage 4: handleVaultKeyRotation --------------------------------

	async fn handle_vault_key_rotation(&self, event: &mut SyncEvent) -> Result<()> {
		if !self.engine.keys.rotation_in_progress() {
			return Ok(());
		}

		let current = self.engine.keys.current_version();
		let root = self.store.get_entry_by_path(self.engine.vault.id, "/").await?;
		let stale: Vec<_> = self
			.store
			.list_dir(root.id, true)
			.await?
			.into_iter()
			.filter(|e| e.is_file() && e.file_meta.as_ref().map(|m| m.encrypted_with_key_version < current).unwrap_or(false))
			.collect();

		if stale.is_empty() {
			self.engine.keys.finish_key_rotation()?;
			return Ok(());
		}

		let worker_count = num_cpus::get().max(1);
		let chunk_size = stale.len().div_ceil(worker_count).max(1);
		let mut any_failed = false;
		for range in stale.chunks(chunk_size) {
			for entry in range {
				let result = self.rotate_one(entry).await;
				let size = entry.file_meta.as_ref().map(|m| m.size_bytes).unwrap_or(0);
				Self::record(event, ThroughputMetric::Copy, size, result.is_ok());
				if let Err(e) = result {
					any_failed = true;
					warn!(vault_id = %self.engine.vault.id, file_id = %entry.id, error = %e, "key rotation failed for file");
				}
			}
		}

		if any_failed {
			// Leave `rotation_in_progress` set so the previous key survives
			// for the next pass to retry the files still on the old version.
			warn!(vault_id = %self.engine.vault.id, "key rotation incomplete, deferring finish to next pass");
			return Ok(());
		}

		self.engine.keys.finish_key_rotation()?;
		Ok(())
	}

	async fn rotate_one(&self, entry: &vaulthalla_catalog::Entry) -> Result<()> {
		let mut entry = entry.clone();
		let ciphertext = std::fs::read(&entry.backing_path)?;
		let new_ciphertext = self.engine.keys.rotate_decrypt_encrypt(&ciphertext, &mut entry)?;

		let cache_mode = matches!(&self.engine.kind, StorageKind::Cloud(c) if c.policy.strategy == RemoteStrategy::Cache);
		let free = self.engine.free_space().await.unwrap_or(u64::MAX);
		if cache_mode && new_ciphertext.len() as u64 > free {
			let _ = std::fs::remove_file(&entry.backing_path);
		} else {
			std::fs::write(&entry.backing_path, &new_ciphertext)?;
		}

		if self.engine.kind.is_cloud() {
			self.engine.upload(&mut entry, Some(new_ciphertext), true).await?;
		}

		self.store.upsert_file(entry).await?;
		Ok(())
	}

	// --- Cloud stage 6: initBins -----------------------------------------

	async fn init_bins(&self) -> Result<(BTreeMap<String, LocalRecord>, BTreeMap<String, RemoteRecord>, HashSet<String>)> {
		let root = self.store.get_entry_by_path(self.engine.vault.id, "/").await?;
		let files = self.store.list_dir(root.id, true).await?;

		let mut local_map = BTreeMap::new();
		for entry in files.into_iter().filter(|e| e.is_file()) {
			if let Some(meta) = &entry.file_meta {
				local_map.insert(entry.path.clone(), LocalRecord { size_bytes: meta.size_bytes, content_hash: meta.content_hash.clone() });
			}
		}

		let mut s3_map = BTreeMap::new();
		for (path, size) in self.engine.list_remote().await? {
			s3_map.insert(path, RemoteRecord { size_bytes: size, content_hash: None });
		}

		// `remoteHashMap`: only HEAD the keys that exist on both sides —
		// local-only and remote-only keys never need the conflict check
		// that the hash is for.
		for key in local_map.keys().cloned().collect::<Vec<_>>() {
			if let Some(remote) = s3_map.get_mut(&key) {
				if let Ok(head) = self.engine.head_remote(&key).await {
					remote.content_hash = head.content_hash;
				}
			}
		}

		// A genuine upstream decryption failure can only be confirmed by
		// downloading the object, which this stage deliberately avoids
		// doing for every intersecting key. Per-op download failures are
		// instead caught (and recorded) when the executor actually runs.
		let decrypt_failed = HashSet::new();

		debug!(vault_id = %self.engine.vault.id, local = local_map.len(), remote = s3_map.len(), "sync bins initialised");
		Ok((local_map, s3_map, decrypt_failed))
	}

	// --- Cloud stage 7: sync ---------------------------------------------

	async fn sync_cloud(
		&self,
		event: &mut SyncEvent,
		local_map: BTreeMap<String, LocalRecord>,
		s3_map: BTreeMap<String, RemoteRecord>,
		decrypt_failed: HashSet<String>,
	) -> Result<()> {
		let policy = match &self.engine.kind {
			StorageKind::Cloud(c) => c.policy.clone(),
			StorageKind::Local(_) => unreachable!("sync_cloud only runs for cloud-kind engines"),
		};

		let plan = build_plan(&local_map, &s3_map, &decrypt_failed, &policy);
		let plan = executor::with_ensured_directories(&self.engine, plan).await?;

		let need = plan.download_bytes();
		let available = self.engine.free_space().await?;
		if need > available {
			return Err(SyncError::InsufficientDiskSpace { need, available });
		}

		let report = executor::execute(&self.engine, &plan).await?;
		for t in report.throughputs {
			event.throughputs.push(t);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use uuid::Uuid;
	use vaulthalla_cache::EntryCache;
	use vaulthalla_catalog::{CatalogStore, CatalogVaultKeyStore, InMemoryCatalogStore, LocalConflictPolicy, LocalPolicy, PolicyBase, Policy, SyncTrigger, VaultType};
	use vaulthalla_crypto::{MasterKeyProvider, SoftwareSealBackend, VaultEncryptionManager};
	use vaulthalla_fs::{CreateFileRequest, EngineContext, FilesystemOrchestrator, GlobalRoots, NullPreviewSink, PathResolver, RootKind};
	use vaulthalla_storage::{StorageEngine, StorageKind};

	use super::*;

	async fn local_setup() -> (SyncTask, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = Arc::new(EntryCache::new(store.clone()));
		let orchestrator = Arc::new(FilesystemOrchestrator::new(store.clone(), cache.clone(), Arc::new(NullPreviewSink)));

		let vault = vaulthalla_catalog::Vault {
			id: Uuid::new_v4(),
			name: "v".into(),
			description: String::new(),
			kind: VaultType::Local,
			owner_id: Uuid::new_v4(),
			quota_bytes: 0,
			mount_alias: "VAULT001".into(),
			is_active: true,
			api_key_id: None,
			bucket: None,
			encrypt_upstream: false,
		};
		store.upsert_vault(vault.clone(), None).await.unwrap();

		let base = PolicyBase { id: Uuid::new_v4(), interval_seconds: 300, enabled: true, last_sync_at: None, config_hash: "cfg".into() };
		let local_policy = LocalPolicy { base: base.clone(), conflict_policy: LocalConflictPolicy::Overwrite };
		store.update_policy(vault.id, Policy::Local(local_policy.clone())).await.unwrap();

		let resolver = PathResolver::new(
			vault.mount_alias.clone(),
			vault.mount_alias.clone(),
			GlobalRoots { fuse_root: dir.path().join("fuse"), backing_root: dir.path().join("backing"), cache_root: dir.path().join("cache") },
		);

		let backend = Arc::new(SoftwareSealBackend::at_path(dir.path().join("seed.bin")).unwrap());
		let master = Arc::new(MasterKeyProvider::new(backend, dir.path()));
		master.init().unwrap();
		let key_store = Arc::new(CatalogVaultKeyStore::new(store.clone()));
		let keys = VaultEncryptionManager::new(vault.id, master, key_store);
		keys.load_key().unwrap();

		let ctx = EngineContext { vault: &vault, resolver: &resolver, keys: &keys };
		let root = orchestrator.mk_vault(&ctx, 0o755).unwrap();
		store.upsert_directory(root).await.unwrap();

		let engine = Arc::new(StorageEngine::new(vault, resolver, keys, StorageKind::Local(local_policy), store.clone(), cache, orchestrator));
		(SyncTask::new(engine, store), dir)
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn run_with_no_pending_work_succeeds() {
		let (task, _dir) = local_setup().await;
		let event = task.run(SyncTrigger::Manual).await.unwrap();
		assert_eq!(event.status, SyncStatus::Success);
		assert_eq!(event.total_failed_ops(), 0);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn interrupted_task_is_marked_cancelled() {
		let (task, _dir) = local_setup().await;
		task.interrupt();
		let event = task.run(SyncTrigger::Manual).await.unwrap();
		assert_eq!(event.status, SyncStatus::Cancelled);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn successful_run_pins_last_sync_at() {
		let (task, _dir) = local_setup().await;
		task.run(SyncTrigger::Manual).await.unwrap();
		let policy = task.store.get_policy(task.engine.vault.id).await.unwrap();
		assert!(policy.base().last_sync_at.is_some());
	}

	async fn create_file(task: &SyncTask, name: &str, contents: &[u8]) -> vaulthalla_catalog::Entry {
		let abs = task.engine.resolver.abs_path(&format!("/{name}"), RootKind::VaultRoot).unwrap();
		task.engine
			.create_file(CreateFileRequest { abs_fuse_path: abs, buffer: contents.to_vec(), user_id: Uuid::new_v4(), overwrite: false })
			.await
			.unwrap()
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn key_rotation_migrates_every_file_before_finishing() {
		let (task, _dir) = local_setup().await;
		for i in 0..5 {
			create_file(&task, &format!("f{i}.txt"), format!("payload {i}").as_bytes()).await;
		}

		task.engine.keys.prepare_key_rotation().unwrap();
		let current = task.engine.keys.current_version();

		let mut event = task.engine.new_sync_event(SyncTrigger::Manual).await.unwrap();
		task.handle_vault_key_rotation(&mut event).await.unwrap();

		assert!(!task.engine.keys.rotation_in_progress(), "rotation should finish once every file is migrated");

		let root = task.store.get_entry_by_path(task.engine.vault.id, "/").await.unwrap();
		let files = task.store.list_dir(root.id, true).await.unwrap();
		let files: Vec<_> = files.into_iter().filter(|e| e.is_file()).collect();
		assert_eq!(files.len(), 5);
		for file in &files {
			assert_eq!(file.file_meta.as_ref().unwrap().encrypted_with_key_version, current);
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn key_rotation_with_a_failing_file_leaves_rotation_in_progress() {
		let (task, _dir) = local_setup().await;
		let mut entries = Vec::new();
		for i in 0..3 {
			entries.push(create_file(&task, &format!("f{i}.txt"), format!("payload {i}").as_bytes()).await);
		}

		task.engine.keys.prepare_key_rotation().unwrap();

		// Corrupt one file's ciphertext on disk so its rotation fails the
		// decrypt-with-previous-key step, forcing `rotate_one` to error.
		std::fs::write(&entries[0].backing_path, b"not valid ciphertext").unwrap();

		let mut event = task.engine.new_sync_event(SyncTrigger::Manual).await.unwrap();
		task.handle_vault_key_rotation(&mut event).await.unwrap();

		assert!(task.engine.keys.rotation_in_progress(), "a failed file must keep rotation open for the next pass");
		assert!(event.total_failed_ops() > 0);

		let root = task.store.get_entry_by_path(task.engine.vault.id, "/").await.unwrap();
		let files = task.store.list_dir(root.id, true).await.unwrap();
		let still_stale = files.into_iter().filter(|e| e.is_file()).any(|e| e.file_meta.unwrap().encrypted_with_key_version < task.engine.keys.current_version());
		assert!(still_stale, "the corrupted file should remain at the old key version for a retry pass");
	}
}
