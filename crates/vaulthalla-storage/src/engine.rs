//! Per-vault storage engine (C8 local / C9 cloud): owns the vault's paths,
//! crypto manager, and sync policy, and issues filesystem-style operations
//! by delegating to the orchestrator with this vault bound.
//!
//! Local and Cloud don't get separate structs in an inheritance chain;
//! instead one `StorageEngine` carries a `StorageKind` tag. Cloud-only
//! behaviour (upload/download/etc., in `cloud.rs`) matches on `self.kind`
//! rather than downcasting a trait object.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use vaulthalla_cache::EntryCache;
use vaulthalla_catalog::{CatalogStore, Entry, LocalPolicy, RemotePolicy, SyncEvent, SyncStatus, SyncTrigger, TrashedFile, Vault};
use vaulthalla_crypto::VaultEncryptionManager;
use vaulthalla_fs::{CreateFileRequest, EngineContext, FilesystemOrchestrator, PathResolver, RootKind};
use vaulthalla_s3::S3Client;

use crate::error::{Result, StorageError};

/// Reserved headroom subtracted from quota in [`StorageEngine::free_space`].
pub const MIN_FREE_SPACE: u64 = 10 * 1024 * 1024;

/// Cloud-only state: the S3 client and the remote sync policy. Held inside
/// [`StorageKind::Cloud`] so a local vault's engine never carries it.
pub struct CloudState {
	pub client: S3Client,
	pub policy: RemotePolicy,
}

pub enum StorageKind {
	Local(LocalPolicy),
	Cloud(CloudState),
}

impl StorageKind {
	pub fn is_cloud(&self) -> bool {
		matches!(self, StorageKind::Cloud(_))
	}
}

pub struct StorageEngine {
	pub vault: Vault,
	pub resolver: PathResolver,
	pub keys: VaultEncryptionManager,
	pub kind: StorageKind,
	pub(crate) store: Arc<dyn CatalogStore>,
	pub(crate) cache: Arc<EntryCache>,
	pub(crate) orchestrator: Arc<FilesystemOrchestrator>,
}

impl StorageEngine {
	pub fn new(
		vault: Vault,
		resolver: PathResolver,
		keys: VaultEncryptionManager,
		kind: StorageKind,
		store: Arc<dyn CatalogStore>,
		cache: Arc<EntryCache>,
		orchestrator: Arc<FilesystemOrchestrator>,
	) -> Self {
		Self { vault, resolver, keys, kind, store, cache, orchestrator }
	}

	pub(crate) fn ctx(&self) -> EngineContext<'_> {
		EngineContext { vault: &self.vault, resolver: &self.resolver, keys: &self.keys }
	}

	pub async fn is_file(&self, rel_vault_path: &str) -> bool {
		self.store.get_entry_by_path(self.vault.id, rel_vault_path).await.map(|e| e.is_file()).unwrap_or(false)
	}

	pub async fn is_directory(&self, rel_vault_path: &str) -> bool {
		self.store.get_entry_by_path(self.vault.id, rel_vault_path).await.map(|e| e.is_directory()).unwrap_or(false)
	}

	pub async fn entry(&self, rel_vault_path: &str) -> Result<Entry> {
		Ok(self.store.get_entry_by_path(self.vault.id, rel_vault_path).await?)
	}

	pub fn decrypt(&self, file: &Entry, ciphertext: &[u8]) -> Result<Vec<u8>> {
		let meta = file.file_meta.as_ref().ok_or_else(|| StorageError::NoFileMeta(file.path.clone()))?;
		Ok(self.keys.decrypt(ciphertext, &meta.encryption_iv, meta.encrypted_with_key_version)?)
	}

	/// `quota - (vault_bytes + cache_bytes) - MIN_FREE_SPACE`. A quota of 0
	/// disables enforcement.
	pub async fn free_space(&self) -> Result<u64> {
		if self.vault.quota_bytes == 0 {
			return Ok(u64::MAX);
		}
		let root = self.store.get_entry_by_path(self.vault.id, "/").await?;
		let vault_bytes = root.dir_stats.map(|s| s.size_bytes).unwrap_or(0);
		let cache_bytes = self.cache.stats.used_bytes();
		let reserved = vault_bytes.saturating_add(cache_bytes).saturating_add(MIN_FREE_SPACE);
		Ok(self.vault.quota_bytes.saturating_sub(reserved))
	}

	fn thumbnail_dir(&self, alias: &str) -> Result<PathBuf> {
		Ok(self.resolver.abs_path(&format!("/{alias}"), RootKind::ThumbnailRoot)?)
	}

	pub fn purge_thumbnails(&self, alias: &str) -> Result<()> {
		let dir = self.thumbnail_dir(alias)?;
		if dir.exists() {
			fs::remove_dir_all(&dir)?;
		}
		Ok(())
	}

	pub fn move_thumbnails(&self, old_alias: &str, new_alias: &str) -> Result<()> {
		let from = self.thumbnail_dir(old_alias)?;
		if !from.exists() {
			return Ok(());
		}
		let to = self.thumbnail_dir(new_alias)?;
		if let Some(parent) = to.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::rename(from, to)?;
		Ok(())
	}

	pub fn copy_thumbnails(&self, src_alias: &str, dst_alias: &str) -> Result<()> {
		let from = self.thumbnail_dir(src_alias)?;
		if !from.exists() {
			return Ok(());
		}
		let to = self.thumbnail_dir(dst_alias)?;
		fs::create_dir_all(&to)?;
		for entry in fs::read_dir(&from)? {
			let entry = entry?;
			fs::copy(entry.path(), to.join(entry.file_name()))?;
		}
		Ok(())
	}

	fn config_hash(&self) -> String {
		match &self.kind {
			StorageKind::Local(policy) => policy.base.config_hash.clone(),
			StorageKind::Cloud(cloud) => cloud.policy.base.config_hash.clone(),
		}
	}

	/// Writes the previous event if it exists and starts a new PENDING
	/// event with `config_hash` pinned from the current policy.
	#[instrument(skip(self), fields(vault_id = %self.vault.id))]
	pub async fn new_sync_event(&self, trigger: SyncTrigger) -> Result<SyncEvent> {
		if let Some(previous) = self.store.get_latest_sync_event(self.vault.id).await? {
			if !previous.status.is_terminal() {
				self.store.update_sync_event(previous).await?;
			}
		}
		let now = Utc::now();
		let event = SyncEvent {
			id: Uuid::new_v4(),
			vault_id: self.vault.id,
			status: SyncStatus::Pending,
			trigger,
			timestamp_begin: now,
			timestamp_end: None,
			heartbeat_at: now,
			error_message: None,
			config_hash: self.config_hash(),
			throughputs: Vec::new(),
			conflicts: Vec::new(),
		};
		self.store.create_sync_event(event.clone()).await?;
		Ok(event)
	}

	/// Removes the backing file, walks up removing now-empty parent
	/// directories up to but not past `vault_root`, and removes thumbnails
	/// and the file cache entry. Each step's failure is logged and ignored;
	/// the goal is eventual tidiness, not a transactional guarantee.
	pub async fn remove_locally(&self, entry: &Entry) {
		self.remove_backing_path(&entry.backing_path);
		self.remove_empty_ancestors(Path::new(&entry.backing_path));
		if let Err(e) = self.purge_thumbnails(&entry.base32_alias) {
			warn!(error = %e, alias = %entry.base32_alias, "failed to purge thumbnails");
		}
		self.remove_file_cache_entry(&entry.base32_alias);
	}

	/// As [`Self::remove_locally`], for a [`TrashedFile`] row, additionally
	/// marking the row deleted on success of the catalog call.
	pub async fn remove_locally_trashed(&self, trashed: &TrashedFile) {
		self.remove_backing_path(&trashed.backing_path);
		self.remove_empty_ancestors(Path::new(&trashed.backing_path));
		if let Err(e) = self.purge_thumbnails(&trashed.base32_alias) {
			warn!(error = %e, alias = %trashed.base32_alias, "failed to purge thumbnails");
		}
		self.remove_file_cache_entry(&trashed.base32_alias);
		if let Err(e) = self.store.mark_trashed_file_deleted(trashed.id).await {
			warn!(error = %e, trashed_id = %trashed.id, "failed to mark trashed file deleted");
		}
	}

	fn remove_backing_path(&self, backing_path: &str) {
		if let Err(e) = fs::remove_file(backing_path) {
			if e.kind() != std::io::ErrorKind::NotFound {
				warn!(error = %e, backing_path, "failed to remove backing file");
			}
		}
	}

	fn remove_empty_ancestors(&self, backing_path: &Path) {
		let Ok(vault_root) = self.resolver.abs_path("/", RootKind::BackingVaultRoot) else {
			return;
		};
		let mut dir = backing_path.parent().map(Path::to_path_buf);
		while let Some(d) = dir {
			if d == vault_root || !d.starts_with(&vault_root) {
				break;
			}
			match fs::read_dir(&d) {
				Ok(mut entries) => {
					if entries.next().is_none() {
						if let Err(e) = fs::remove_dir(&d) {
							debug!(error = %e, dir = %d.display(), "failed to remove empty ancestor");
							break;
						}
					} else {
						break;
					}
				}
				_ => break,
			}
			dir = d.parent().map(Path::to_path_buf);
		}
	}

	fn remove_file_cache_entry(&self, alias: &str) {
		if let Ok(path) = self.resolver.abs_path(&format!("/{alias}"), RootKind::FileCacheRoot) {
			if path.exists() {
				if let Err(e) = fs::remove_file(&path) {
					warn!(error = %e, alias, "failed to remove file cache entry");
				}
			}
		}
	}

	// --- user-visible operations: delegate to C7 with this engine bound ---

	pub async fn mkdir(&self, abs_fuse_path: &Path, mode: u32, user_id: Uuid) -> Result<Entry> {
		Ok(self.orchestrator.mkdir(&self.ctx(), abs_fuse_path, mode, user_id).await?)
	}

	pub async fn create_file(&self, req: CreateFileRequest) -> Result<Entry> {
		Ok(self.orchestrator.create_file(&self.ctx(), req).await?)
	}

	/// Covers both "move" (reparent) and "rename" (relabel); the
	/// orchestrator treats both as one path-to-path transition.
	pub async fn rename(&self, old_abs: &Path, new_abs: &Path, user_id: Uuid) -> Result<Entry> {
		Ok(self.orchestrator.rename(&self.ctx(), old_abs, new_abs, user_id).await?)
	}

	pub async fn copy(&self, from_abs: &Path, to_abs: &Path, user_id: Uuid) -> Result<Entry> {
		let ctx = self.ctx();
		Ok(self.orchestrator.copy(&ctx, &ctx, from_abs, to_abs, user_id).await?)
	}

	pub async fn remove(&self, abs_fuse_path: &Path, user_id: Uuid) -> Result<()> {
		Ok(self.orchestrator.remove(&self.ctx(), abs_fuse_path, user_id).await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;
	use vaulthalla_catalog::{CatalogVaultKeyStore, InMemoryCatalogStore, PolicyBase, VaultType};
	use vaulthalla_crypto::{MasterKeyProvider, SoftwareSealBackend};
	use vaulthalla_fs::{GlobalRoots, NullPreviewSink};

	async fn setup(quota_bytes: u64) -> (StorageEngine, TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = Arc::new(EntryCache::new(store.clone()));
		let orchestrator = Arc::new(FilesystemOrchestrator::new(store.clone(), cache.clone(), Arc::new(NullPreviewSink)));

		let vault = Vault {
			id: Uuid::new_v4(),
			name: "v".into(),
			description: String::new(),
			kind: VaultType::Local,
			owner_id: Uuid::new_v4(),
			quota_bytes,
			mount_alias: "VAULT001".into(),
			is_active: true,
			api_key_id: None,
			bucket: None,
			encrypt_upstream: false,
		};
		store.upsert_vault(vault.clone(), None).await.unwrap();

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

		let policy = LocalPolicy {
			base: PolicyBase { id: Uuid::new_v4(), interval_seconds: 300, enabled: true, last_sync_at: None, config_hash: "h1".into() },
			conflict_policy: vaulthalla_catalog::LocalConflictPolicy::Overwrite,
		};
		let engine = StorageEngine::new(vault, resolver, keys, StorageKind::Local(policy), store, cache, orchestrator);
		(engine, dir)
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn free_space_disabled_when_quota_zero() {
		let (engine, _dir) = setup(0).await;
		assert_eq!(engine.free_space().await.unwrap(), u64::MAX);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn free_space_subtracts_reserved_headroom() {
		let (engine, _dir) = setup(1_000_000).await;
		let free = engine.free_space().await.unwrap();
		assert_eq!(free, 1_000_000 - MIN_FREE_SPACE);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn new_sync_event_is_pending_with_pinned_config_hash() {
		let (engine, _dir) = setup(0).await;
		let event = engine.new_sync_event(SyncTrigger::Manual).await.unwrap();
		assert_eq!(event.status, SyncStatus::Pending);
		assert_eq!(event.config_hash, "h1");
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn remove_locally_walks_up_empty_ancestors() {
		let (engine, _dir) = setup(0).await;
		let abs = engine.resolver.abs_path("/a/b.txt", RootKind::VaultRoot).unwrap();
		let entry = engine
			.create_file(CreateFileRequest { abs_fuse_path: abs, buffer: b"hi".to_vec(), user_id: Uuid::new_v4(), overwrite: false })
			.await
			.unwrap();

		let backing = PathBuf::from(&entry.backing_path);
		assert!(backing.exists());

		engine.remove_locally(&entry).await;
		assert!(!backing.exists());
		// Backing paths are flat under vault_root, so there are no
		// intermediate ancestors to reclaim here; vault_root itself must
		// never be removed.
		let vault_root = engine.resolver.abs_path("/", RootKind::BackingVaultRoot).unwrap();
		assert!(vault_root.exists());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn thumbnail_mirror_operations_track_the_alias() {
		let (engine, _dir) = setup(0).await;
		let dir = engine.thumbnail_dir("ALIAS001").unwrap();
		fs::create_dir_all(&dir).unwrap();
		fs::write(dir.join("128.jpg"), b"thumb").unwrap();

		engine.move_thumbnails("ALIAS001", "ALIAS002").unwrap();
		assert!(!dir.exists());
		let moved = engine.thumbnail_dir("ALIAS002").unwrap();
		assert!(moved.join("128.jpg").exists());

		engine.copy_thumbnails("ALIAS002", "ALIAS003").unwrap();
		let copied = engine.thumbnail_dir("ALIAS003").unwrap();
		assert!(copied.join("128.jpg").exists());
		assert!(moved.join("128.jpg").exists());

		engine.purge_thumbnails("ALIAS003").unwrap();
		assert!(!copied.exists());
	}
}
