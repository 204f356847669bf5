//! The capability bundle (§9): one process-wide, once-initialised struct
//! that owns the catalog, entry cache, orchestrator, and TPM master key,
//! and lazily builds a [`StorageEngine`] per vault on first use. Nothing
//! here is global `static` state — the bundle is constructed once at
//! startup and passed by reference into whatever calls it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;
use vaulthalla_cache::EntryCache;
use vaulthalla_catalog::{CatalogStore, CatalogVaultKeyStore, Policy};
use vaulthalla_crypto::{MasterKeyProvider, SoftwareSealBackend, VaultEncryptionManager};
use vaulthalla_fs::{FilesystemOrchestrator, GlobalRoots, NullPreviewSink, PathResolver, PreviewSink};
use vaulthalla_s3::{S3Client, S3Config};
use vaulthalla_storage::{CloudState, StorageEngine, StorageKind};

use crate::config::VaultConfig;
use crate::error::{Result, VaultError};

pub struct CoreContext {
	pub config: VaultConfig,
	pub store: Arc<dyn CatalogStore>,
	pub cache: Arc<EntryCache>,
	pub orchestrator: Arc<FilesystemOrchestrator>,
	pub master: Arc<MasterKeyProvider>,
	roots: GlobalRoots,
	engines: RwLock<HashMap<Uuid, Arc<StorageEngine>>>,
}

impl CoreContext {
	pub fn init(config: VaultConfig, store: Arc<dyn CatalogStore>) -> Result<Self> {
		Self::init_with_preview(config, store, Arc::new(NullPreviewSink))
	}

	pub fn init_with_preview(config: VaultConfig, store: Arc<dyn CatalogStore>, preview: Arc<dyn PreviewSink>) -> Result<Self> {
		std::fs::create_dir_all(&config.paths.runtime_dir).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;

		let backend = Arc::new(SoftwareSealBackend::at_path(config.paths.runtime_dir.join("seed.bin"))?);
		let master = Arc::new(MasterKeyProvider::new(backend, &config.paths.runtime_dir));
		master.init()?;

		let cache = Arc::new(EntryCache::new(store.clone()));
		let orchestrator = Arc::new(FilesystemOrchestrator::new(store.clone(), cache.clone(), preview));

		let roots = GlobalRoots {
			fuse_root: config.paths.fuse_root.clone(),
			backing_root: config.paths.backing_root.clone(),
			cache_root: config.paths.cache_root.clone(),
		};

		info!(fuse_root = %roots.fuse_root.display(), "vault core initialised");
		Ok(Self { config, store, cache, orchestrator, master, roots, engines: RwLock::new(HashMap::new()) })
	}

	/// Returns this vault's engine, building and caching it on first call.
	/// Cheap on every call after the first: a read-lock hit against the
	/// engine map.
	#[instrument(skip(self))]
	pub async fn engine_for(&self, vault_id: Uuid) -> Result<Arc<StorageEngine>> {
		if let Some(engine) = self.engines.read().await.get(&vault_id) {
			return Ok(engine.clone());
		}

		let mut guard = self.engines.write().await;
		if let Some(engine) = guard.get(&vault_id) {
			return Ok(engine.clone());
		}

		let vault = self.store.get_vault(vault_id).await?;
		let policy = self.store.get_policy(vault_id).await?;

		let resolver = PathResolver::new(vault.mount_alias.clone(), vault.mount_alias.clone(), self.roots.clone());
		let key_store = Arc::new(CatalogVaultKeyStore::new(self.store.clone()));
		let keys = VaultEncryptionManager::new(vault.id, self.master.clone(), key_store);
		keys.load_key()?;

		let kind = match policy {
			Policy::Local(local) => StorageKind::Local(local),
			Policy::Remote(remote) => {
				let defaults = self.config.s3.as_ref().ok_or_else(|| VaultError::InvalidConfig("vault is cloud-backed but no s3 defaults configured".into()))?;
				let s3_config = S3Config {
					endpoint: defaults.endpoint.clone(),
					bucket: vault.bucket.clone().unwrap_or_default(),
					region: defaults.region.clone(),
					access_key: defaults.access_key.clone(),
					secret_key: defaults.secret_key.clone(),
					path_style: defaults.path_style,
				};
				StorageKind::Cloud(CloudState { client: S3Client::new(s3_config), policy: remote })
			}
		};

		let engine = Arc::new(StorageEngine::new(vault, resolver, keys, kind, self.store.clone(), self.cache.clone(), self.orchestrator.clone()));
		guard.insert(vault_id, engine.clone());
		Ok(engine)
	}

	pub async fn evict_engine(&self, vault_id: Uuid) {
		self.engines.write().await.remove(&vault_id);
	}

	/// One-shot bring-up seed (§6): the daemon's first run drops a
	/// superadmin uid at `<runtime_dir>/superadmin_uid` for the core to
	/// pick up and delete.
	pub fn consume_superadmin_seed(&self) -> Option<Uuid> {
		vaulthalla_catalog::consume_superadmin_seed(self.config.paths.runtime_dir.join("superadmin_uid"))
	}
}
