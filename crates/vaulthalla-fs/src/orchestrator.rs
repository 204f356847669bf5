//! Filesystem orchestrator (C7): create/rename/copy/remove at mount level,
//! coordinating crypto, backing disk, catalog, cache and preview.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use vaulthalla_catalog::{CatalogStore, DirectoryStats, Entry, EntryKind, FileMeta, Vault};
use vaulthalla_cache::EntryCache;
use rand::RngCore;
use vaulthalla_crypto::{base32_crockford_encode, blake2b_hex, Base32Case, VaultEncryptionManager};

use crate::error::{FsError, Result};
use crate::mime::sniff_mime_type;
use crate::paths::{PathResolver, RootKind};

/// Receives a notification whenever a file's rendered preview needs
/// regenerating. The real sink (thumbnail worker pool) lives outside
/// this crate's scope; tests use [`NullPreviewSink`].
pub trait PreviewSink: Send + Sync {
	fn enqueue(&self, vault_id: Uuid, entry_id: Uuid);
}

pub struct NullPreviewSink;

impl PreviewSink for NullPreviewSink {
	fn enqueue(&self, _vault_id: Uuid, _entry_id: Uuid) {}
}

/// Binds one vault's resolver and encryption manager for the duration of
/// an orchestrator call, per the "operations delegate to C7 with this
/// engine bound" relationship in the storage engine.
pub struct EngineContext<'a> {
	pub vault: &'a Vault,
	pub resolver: &'a PathResolver,
	pub keys: &'a VaultEncryptionManager,
}

pub struct CreateFileRequest {
	pub abs_fuse_path: PathBuf,
	pub buffer: Vec<u8>,
	pub user_id: Uuid,
	pub overwrite: bool,
}

pub struct FilesystemOrchestrator {
	store: Arc<dyn CatalogStore>,
	cache: Arc<EntryCache>,
	preview: Arc<dyn PreviewSink>,
}

impl FilesystemOrchestrator {
	pub fn new(store: Arc<dyn CatalogStore>, cache: Arc<EntryCache>, preview: Arc<dyn PreviewSink>) -> Self {
		Self { store, cache, preview }
	}

	fn fresh_alias(&self) -> String {
		let mut body = [0u8; 10];
		rand::rngs::OsRng.fill_bytes(&mut body);
		base32_crockford_encode(&body, Base32Case::Upper)
	}

	fn path_segments(fuse_rel: &str) -> Vec<&str> {
		fuse_rel.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect()
	}

	/// Walks the chain of missing ancestors under `ctx.vault`, creating a
	/// Directory row (and backing directory) for each.
	pub async fn mkdir(&self, ctx: &EngineContext<'_>, abs_fuse_path: &Path, mode: u32, user_id: Uuid) -> Result<Entry> {
		let rel = ctx.resolver.rel_path(abs_fuse_path, RootKind::VaultRoot)?;
		let segments = Self::path_segments(&rel);

		let mut parent = self
			.store
			.get_entry_by_path(ctx.vault.id, "/")
			.await
			.map_err(|_| FsError::ParentNotFound("/".into()))?;
		let mut cursor = String::new();

		for segment in segments {
			cursor.push('/');
			cursor.push_str(segment);

			match self.store.get_entry_by_path(ctx.vault.id, &cursor).await {
				Ok(existing) => {
					if !existing.is_directory() {
						return Err(FsError::NotADirectory(cursor.clone()));
					}
					parent = existing;
					continue;
				}
				Err(_) => {}
			}

			let inode = self.store.next_inode(ctx.vault.id).await?;
			let alias = self.fresh_alias();
			let backing_path = ctx.resolver.abs_path(&format!("/{alias}"), RootKind::BackingVaultRoot)?;
			fs::create_dir_all(&backing_path)?;

			let now = Utc::now();
			let entry = Entry {
				id: Uuid::new_v4(),
				inode,
				vault_id: Some(ctx.vault.id),
				parent_id: Some(parent.id),
				name: segment.to_string(),
				base32_alias: alias,
				path: cursor.clone(),
				fuse_path: format!("/{}{}", ctx.vault.mount_alias, cursor),
				backing_path: backing_path.display().to_string(),
				mode,
				owner_uid: 0,
				group_gid: 0,
				is_hidden: false,
				is_system: false,
				created_by: user_id,
				last_modified_by: user_id,
				created_at: now,
				updated_at: now,
				kind: EntryKind::Directory,
				dir_stats: Some(DirectoryStats::default()),
				file_meta: None,
			};

			self.store.upsert_directory(entry.clone()).await?;
			self.cache.insert(ctx.vault.id, entry.clone());
			parent = entry;
		}

		Ok(parent)
	}

	/// Like [`mkdir`] for the root of a fresh vault: the created
	/// directory's `vault_id` is set and its backing path is
	/// `backing_root/<vault.mount_alias>`.
	pub fn mk_vault(&self, ctx: &EngineContext<'_>, mode: u32) -> Result<Entry> {
		let backing_path = ctx.resolver.abs_path("/", RootKind::BackingVaultRoot)?;
		fs::create_dir_all(&backing_path)?;
		let now = Utc::now();
		Ok(Entry {
			id: Uuid::new_v4(),
			inode: Entry::ROOT_INODE,
			vault_id: Some(ctx.vault.id),
			parent_id: None,
			name: "/".into(),
			base32_alias: ctx.vault.mount_alias.clone(),
			path: "/".into(),
			fuse_path: format!("/{}", ctx.vault.mount_alias),
			backing_path: backing_path.display().to_string(),
			mode,
			owner_uid: 0,
			group_gid: 0,
			is_hidden: false,
			is_system: true,
			created_by: ctx.vault.owner_id,
			last_modified_by: ctx.vault.owner_id,
			created_at: now,
			updated_at: now,
			kind: EntryKind::Directory,
			dir_stats: Some(DirectoryStats::default()),
			file_meta: None,
		})
	}

	pub async fn create_file(&self, ctx: &EngineContext<'_>, req: CreateFileRequest) -> Result<Entry> {
		let rel = ctx.resolver.rel_path(&req.abs_fuse_path, RootKind::VaultRoot)?;

		if let Ok(existing) = self.store.get_entry_by_path(ctx.vault.id, &rel).await {
			if !req.overwrite {
				if existing.is_directory() {
					return Err(FsError::NotAFile(rel));
				}
				return Ok(existing);
			}
			if existing.is_directory() {
				return Err(FsError::NotAFile(rel));
			}
			return self.write_file_contents(ctx, existing, req).await;
		}

		let parent_path = parent_of(&rel);
		let parent = self
			.store
			.get_entry_by_path(ctx.vault.id, &parent_path)
			.await
			.map_err(|_| FsError::ParentNotFound(parent_path))?;

		let inode = self.store.next_inode(ctx.vault.id).await?;
		let alias = self.fresh_alias();
		let backing_path = ctx.resolver.abs_path(&format!("/{alias}"), RootKind::BackingVaultRoot)?;
		let now = Utc::now();
		let name = rel.rsplit('/').next().unwrap_or(&rel).to_string();

		let entry = Entry {
			id: Uuid::new_v4(),
			inode,
			vault_id: Some(ctx.vault.id),
			parent_id: Some(parent.id),
			name,
			base32_alias: alias,
			path: rel.clone(),
			fuse_path: format!("/{}{}", ctx.vault.mount_alias, rel),
			backing_path: backing_path.display().to_string(),
			mode: 0o644,
			owner_uid: 0,
			group_gid: 0,
			is_hidden: false,
			is_system: false,
			created_by: req.user_id,
			last_modified_by: req.user_id,
			created_at: now,
			updated_at: now,
			kind: EntryKind::File,
			dir_stats: None,
			file_meta: Some(FileMeta {
				size_bytes: 0,
				mime_type: None,
				content_hash: String::new(),
				encryption_iv: String::new(),
				encrypted_with_key_version: 0,
			}),
		};

		self.write_file_contents(ctx, entry, req).await
	}

	async fn write_file_contents(&self, ctx: &EngineContext<'_>, mut entry: Entry, req: CreateFileRequest) -> Result<Entry> {
		let backing_path = Path::new(&entry.backing_path).to_path_buf();
		if let Some(parent) = backing_path.parent() {
			fs::create_dir_all(parent)?;
		}

		let mime_type = sniff_mime_type(&req.buffer, &entry.name);
		let content_hash = blake2b_hex(&req.buffer);

		let ciphertext = if req.buffer.is_empty() {
			Vec::new()
		} else {
			ctx.keys.encrypt(&req.buffer, &mut entry)?
		};
		fs::write(backing_path, &ciphertext)?;

		let meta = entry.file_meta.get_or_insert_with(|| FileMeta {
			size_bytes: 0,
			mime_type: None,
			content_hash: String::new(),
			encryption_iv: String::new(),
			encrypted_with_key_version: 0,
		});
		meta.size_bytes = req.buffer.len() as u64;
		meta.mime_type = mime_type;
		meta.content_hash = content_hash;
		entry.updated_at = Utc::now();
		entry.last_modified_by = req.user_id;

		self.store.upsert_file(entry.clone()).await?;
		self.cache.insert(ctx.vault.id, entry.clone());
		if !req.buffer.is_empty() {
			self.preview.enqueue(ctx.vault.id, entry.id);
		}
		Ok(entry)
	}

	/// Renames within one vault. Directories recurse over descendants;
	/// files take a crypto-free fast path when they stay in the same
	/// vault and are already encrypted.
	pub async fn rename(&self, ctx: &EngineContext<'_>, old_abs: &Path, new_abs: &Path, user_id: Uuid) -> Result<Entry> {
		let old_rel = ctx.resolver.rel_path(old_abs, RootKind::VaultRoot)?;
		let new_rel = ctx.resolver.rel_path(new_abs, RootKind::VaultRoot)?;

		let mut entry = self.store.get_entry_by_path(ctx.vault.id, &old_rel).await?;
		let new_parent_path = parent_of(&new_rel);
		let new_parent = self
			.store
			.get_entry_by_path(ctx.vault.id, &new_parent_path)
			.await
			.map_err(|_| FsError::ParentNotFound(new_parent_path))?;

		if entry.is_directory() {
			let descendants = self.store.list_dir(entry.id, true).await?;
			for mut descendant in descendants {
				let suffix = descendant.path.strip_prefix(&old_rel).unwrap_or(&descendant.path).to_string();
				descendant.path = format!("{new_rel}{suffix}");
				descendant.fuse_path = format!("/{}{}", ctx.vault.mount_alias, descendant.path);
				descendant.updated_at = Utc::now();
				descendant.last_modified_by = user_id;
				self.store.upsert_file(descendant.clone()).await?;
				self.cache.invalidate(ctx.vault.id, descendant.id);
			}
		}
		// Backing paths are keyed by the entry's alias, not by its visible
		// path, so a file rename never touches the backing store: only the
		// catalog row's path/fuse_path change below.

		let old_inode_path = old_rel.clone();
		self.cache.evict_path(ctx.vault.id, &old_inode_path);
		entry.path = new_rel.clone();
		entry.fuse_path = format!("/{}{}", ctx.vault.mount_alias, new_rel);
		entry.parent_id = Some(new_parent.id);
		entry.name = new_rel.rsplit('/').next().unwrap_or(&new_rel).to_string();
		entry.updated_at = Utc::now();
		entry.last_modified_by = user_id;

		self.store.upsert_file(entry.clone()).await?;
		self.cache.insert(ctx.vault.id, entry.clone());
		self.store.collect_parent_stats(new_parent.id).await?;
		Ok(entry)
	}

	/// Same-vault copy. Cross-vault copies must be rejected by the caller
	/// before invoking this (the orchestrator only ever binds one vault
	/// per call), but `from`/`to` contexts are checked regardless.
	pub async fn copy(&self, from_ctx: &EngineContext<'_>, to_ctx: &EngineContext<'_>, from_abs: &Path, to_abs: &Path, user_id: Uuid) -> Result<Entry> {
		if from_ctx.vault.id != to_ctx.vault.id {
			return Err(FsError::CrossVaultCopyUnsupported);
		}

		let from_rel = from_ctx.resolver.rel_path(from_abs, RootKind::VaultRoot)?;
		let to_rel = to_ctx.resolver.rel_path(to_abs, RootKind::VaultRoot)?;
		let source = self.store.get_entry_by_path(from_ctx.vault.id, &from_rel).await?;
		if source.is_directory() {
			return Err(FsError::NotAFile(from_rel));
		}

		let plaintext = if source.file_meta.as_ref().map(|m| m.size_bytes).unwrap_or(0) == 0 {
			Vec::new()
		} else {
			let ciphertext = fs::read(&source.backing_path)?;
			let meta = source.file_meta.as_ref().expect("file entry always has file_meta");
			from_ctx.keys.decrypt(&ciphertext, &meta.encryption_iv, meta.encrypted_with_key_version)?
		};

		let to_abs = to_ctx.resolver.abs_path(&to_rel, RootKind::VaultRoot)?;
		self.create_file(
			to_ctx,
			CreateFileRequest {
				abs_fuse_path: to_abs,
				buffer: plaintext,
				user_id,
				overwrite: false,
			},
		)
		.await
	}

	/// Marks the entry (and descendants, if a directory) trashed, evicts
	/// the cache, and unlinks the backing sub-tree. The sync task performs
	/// the actual remote purge.
	pub async fn remove(&self, ctx: &EngineContext<'_>, abs_fuse_path: &Path, user_id: Uuid) -> Result<()> {
		let rel = ctx.resolver.rel_path(abs_fuse_path, RootKind::VaultRoot)?;
		let entry = self.store.get_entry_by_path(ctx.vault.id, &rel).await?;

		let mut victims = vec![entry.clone()];
		if entry.is_directory() {
			victims.extend(self.store.list_dir(entry.id, true).await?);
		}

		for victim in &victims {
			if victim.is_file() {
				self.store.mark_trashed(victim, user_id).await?;
			}
			self.cache.invalidate(ctx.vault.id, victim.id);
			self.store.remove_entry(victim.id).await?;
		}

		let _ = fs::remove_dir_all(&entry.backing_path).or_else(|_| fs::remove_file(&entry.backing_path));

		if let Some(parent_id) = entry.parent_id {
			self.store.collect_parent_stats(parent_id).await?;
		}
		Ok(())
	}
}

fn parent_of(rel: &str) -> String {
	match rel.rfind('/') {
		Some(0) => "/".to_string(),
		Some(idx) => rel[..idx].to_string(),
		None => "/".to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tempfile::tempdir;
	use vaulthalla_catalog::{CatalogVaultKeyStore, InMemoryCatalogStore, VaultType};
	use vaulthalla_crypto::{MasterKeyProvider, SoftwareSealBackend};

	async fn setup() -> (FilesystemOrchestrator, Vault, PathResolver, VaultEncryptionManager, tempfile::TempDir) {
		let dir = tempdir().unwrap();
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = Arc::new(EntryCache::new(store.clone()));
		let orchestrator = FilesystemOrchestrator::new(store.clone(), cache, Arc::new(NullPreviewSink));

		let vault = Vault {
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

		let resolver = PathResolver::new(
			vault.mount_alias.clone(),
			vault.mount_alias.clone(),
			crate::paths::GlobalRoots {
				fuse_root: dir.path().join("fuse"),
				backing_root: dir.path().join("backing"),
				cache_root: dir.path().join("cache"),
			},
		);

		let backend = Arc::new(SoftwareSealBackend::at_path(dir.path().join("seed.bin")).unwrap());
		let master = Arc::new(MasterKeyProvider::new(backend, dir.path()));
		master.init().unwrap();
		let key_store = Arc::new(CatalogVaultKeyStore::new(store.clone()));
		let keys = VaultEncryptionManager::new(vault.id, master, key_store);
		keys.load_key().unwrap();

		let ctx = EngineContext {
			vault: &vault,
			resolver: &resolver,
			keys: &keys,
		};
		let root = orchestrator.mk_vault(&ctx, 0o755).unwrap();
		store.upsert_directory(root).await.unwrap();

		(orchestrator, vault, resolver, keys, dir)
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn create_file_encrypts_and_records_metadata() {
		let (orchestrator, vault, resolver, keys, _dir) = setup().await;
		let ctx = EngineContext { vault: &vault, resolver: &resolver, keys: &keys };

		let abs = resolver.abs_path("/a.txt", RootKind::VaultRoot).unwrap();
		let entry = orchestrator
			.create_file(
				&ctx,
				CreateFileRequest {
					abs_fuse_path: abs,
					buffer: b"hello".to_vec(),
					user_id: Uuid::new_v4(),
					overwrite: false,
				},
			)
			.await
			.unwrap();

		let meta = entry.file_meta.unwrap();
		assert_eq!(meta.encrypted_with_key_version, 1);
		assert!(!meta.encryption_iv.is_empty());

		let ciphertext = fs::read(&entry.backing_path).unwrap();
		assert!(ciphertext.len() > 5);
		let plaintext = keys.decrypt(&ciphertext, &meta.encryption_iv, meta.encrypted_with_key_version).unwrap();
		assert_eq!(plaintext, b"hello");
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn mkdir_creates_missing_ancestors() {
		let (orchestrator, vault, resolver, keys, _dir) = setup().await;
		let ctx = EngineContext { vault: &vault, resolver: &resolver, keys: &keys };

		let abs = resolver.abs_path("/a/b", RootKind::VaultRoot).unwrap();
		let leaf = orchestrator.mkdir(&ctx, &abs, 0o755, Uuid::new_v4()).await.unwrap();
		assert_eq!(leaf.path, "/a/b");
		assert!(Path::new(&leaf.backing_path).exists());
	}
}
