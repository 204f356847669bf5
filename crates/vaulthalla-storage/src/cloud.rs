//! Cloud-only operations (C9): object upload/download against the S3
//! client, remote indexing for Cache strategy, and directory inference
//! from a remote listing.

use std::collections::BTreeSet;
use std::fs;

use vaulthalla_catalog::Entry;
use vaulthalla_fs::{CreateFileRequest, RootKind};
use vaulthalla_s3::ObjectMetadata;

use crate::engine::{CloudState, StorageEngine, StorageKind};
use crate::error::{Result, StorageError};

/// Remote object keys mirror the vault-relative path (`entry.path` already
/// starts with `/`), unlike local backing paths which are alias-keyed. The
/// planner unions local and remote state by this same path, including for
/// files that have never touched this client before, so the key has to be
/// derivable without a pre-existing catalog row.
fn object_key(vault_mount_alias: &str, entry: &Entry) -> String {
	format!("{vault_mount_alias}{}", entry.path)
}

/// Every ancestor directory of `path`, nearest first, not including `/`
/// itself (the root always exists).
fn ancestors_of(path: &str) -> Vec<String> {
	let mut out = Vec::new();
	let mut current = path.to_string();
	while let Some(idx) = current.rfind('/') {
		let parent = if idx == 0 { "/".to_string() } else { current[..idx].to_string() };
		if parent == "/" {
			break;
		}
		out.push(parent.clone());
		current = parent;
	}
	out
}

impl StorageEngine {
	fn require_cloud(&self, op: &'static str) -> Result<&CloudState> {
		match &self.kind {
			StorageKind::Cloud(cloud) => Ok(cloud),
			StorageKind::Local(_) => Err(StorageError::NotCloud(op)),
		}
	}

	/// Uploads `entry`'s contents, choosing plaintext or ciphertext per
	/// `vault.encrypt_upstream`:
	/// - `encrypt_upstream == false`: upload plaintext, decrypting `buffer`
	///   first if it was ciphertext.
	/// - `encrypt_upstream == true`: upload ciphertext, encrypting `buffer`
	///   first if it was plaintext (mutating `entry`'s IV/key version — the
	///   caller persists those via the catalog afterward).
	///
	/// `buffer = None` reads the current backing file, which is always
	/// ciphertext.
	pub async fn upload(&self, entry: &mut Entry, buffer: Option<Vec<u8>>, is_ciphertext: bool) -> Result<()> {
		let cloud = self.require_cloud("upload")?;
		let key = object_key(&self.vault.mount_alias, entry);

		let (body, encrypted) = if self.vault.encrypt_upstream {
			match buffer {
				Some(buf) if is_ciphertext => (buf, true),
				Some(buf) => (self.keys.encrypt(&buf, entry)?, true),
				None => (fs::read(&entry.backing_path)?, true),
			}
		} else {
			let ciphertext = match buffer {
				Some(buf) if is_ciphertext => buf,
				Some(buf) => return Ok(self.upload_plaintext(cloud, &key, buf, entry).await?),
				None => fs::read(&entry.backing_path)?,
			};
			let meta = entry.file_meta.as_ref().ok_or_else(|| StorageError::NoFileMeta(entry.path.clone()))?;
			let plaintext = self.keys.decrypt(&ciphertext, &meta.encryption_iv, meta.encrypted_with_key_version)?;
			(plaintext, false)
		};

		let meta = entry.file_meta.as_ref().ok_or_else(|| StorageError::NoFileMeta(entry.path.clone()))?;
		let object_meta = ObjectMetadata {
			encrypted,
			iv_base64: encrypted.then(|| meta.encryption_iv.clone()),
			key_version: encrypted.then_some(meta.encrypted_with_key_version),
			content_hash: Some(meta.content_hash.clone()),
		};
		cloud.client.upload_object(&key, body, &object_meta).await?;
		Ok(())
	}

	async fn upload_plaintext(&self, cloud: &CloudState, key: &str, plaintext: Vec<u8>, entry: &Entry) -> Result<()> {
		let meta = entry.file_meta.as_ref().ok_or_else(|| StorageError::NoFileMeta(entry.path.clone()))?;
		let object_meta = ObjectMetadata { encrypted: false, iv_base64: None, key_version: None, content_hash: Some(meta.content_hash.clone()) };
		cloud.client.upload_object(key, plaintext, &object_meta).await?;
		Ok(())
	}

	/// Downloads `rel`, decrypting through C3 if the remote metadata says
	/// `vh-encrypted=true` (falling back to the catalog row when the head
	/// response is missing the IV/version pair), then materialises the
	/// plaintext locally via `create_file(overwrite=true)` and re-posts
	/// metadata so the remote record matches what was just written.
	///
	/// `rel` doesn't need an existing catalog row: a file the planner found
	/// only on the remote side (first sync, or a peer's upload) has none yet,
	/// and the key is derivable from the path alone.
	pub async fn download_file(&self, rel: &str) -> Result<Entry> {
		let cloud = self.require_cloud("download_file")?;
		let existing = self.store.get_entry_by_path(self.vault.id, rel).await.ok();
		let key = format!("{}{rel}", self.vault.mount_alias);
		let (bytes, remote_meta) = cloud.client.download_object(&key).await?;

		let plaintext = if remote_meta.encrypted {
			let (iv, version) = match (&remote_meta.iv_base64, remote_meta.key_version) {
				(Some(iv), Some(version)) => (iv.clone(), version),
				_ => {
					let catalog_meta = existing
						.as_ref()
						.and_then(|e| e.file_meta.as_ref())
						.ok_or_else(|| StorageError::NoFileMeta(rel.to_string()))?;
					(catalog_meta.encryption_iv.clone(), catalog_meta.encrypted_with_key_version)
				}
			};
			self.keys.decrypt(&bytes, &iv, version)?
		} else {
			bytes
		};

		let user_id = existing.as_ref().map(|e| e.last_modified_by).unwrap_or(self.vault.owner_id);
		let abs = self.resolver.abs_path(rel, RootKind::VaultRoot)?;
		let stored = self
			.create_file(CreateFileRequest { abs_fuse_path: abs, buffer: plaintext, user_id, overwrite: true })
			.await?;

		let stored_meta = stored.file_meta.as_ref().ok_or_else(|| StorageError::NoFileMeta(rel.to_string()))?;
		let refreshed = ObjectMetadata {
			encrypted: true,
			iv_base64: Some(stored_meta.encryption_iv.clone()),
			key_version: Some(stored_meta.encrypted_with_key_version),
			content_hash: Some(stored_meta.content_hash.clone()),
		};
		let ciphertext = fs::read(&stored.backing_path)?;
		cloud.client.upload_object(&key, ciphertext, &refreshed).await?;
		Ok(stored)
	}

	/// Downloads and indexes `rel` into the catalog, then removes the
	/// locally materialised copy — Cache strategy's way of populating the
	/// catalog without permanently holding the bytes.
	pub async fn index_and_delete_file(&self, rel: &str) -> Result<Entry> {
		let entry = self.download_file(rel).await?;
		self.remove_locally(&entry).await;
		Ok(entry)
	}

	/// Deletes `rel`'s object remotely and purges any thumbnails cached
	/// under its alias. Used for `Mirror-keep-local` leftover cleanup and
	/// for trashed-file purges.
	pub async fn delete_remote(&self, rel: &str) -> Result<()> {
		let cloud = self.require_cloud("delete_remote")?;
		let key = format!("{}{rel}", self.vault.mount_alias);
		if let Ok(entry) = self.store.get_entry_by_path(self.vault.id, rel).await {
			self.purge_thumbnails(&entry.base32_alias)?;
		}
		cloud.client.delete_object(&key).await?;
		Ok(())
	}

	/// Lists every object under this vault's prefix, returning vault-relative
	/// paths and sizes. Feeds `initBins`'s `s3_map`.
	pub async fn list_remote(&self) -> Result<Vec<(String, u64)>> {
		let cloud = self.require_cloud("list_remote")?;
		let objects = cloud.client.list_objects(&self.vault.mount_alias).await?;
		Ok(objects
			.into_iter()
			.filter_map(|o| o.key.strip_prefix(&self.vault.mount_alias).map(|rel| (rel.to_string(), o.size)))
			.collect())
	}

	/// HEADs a single remote object for its custom metadata, without
	/// downloading the body. Used to populate `remoteHashMap` for keys that
	/// exist on both sides.
	pub async fn head_remote(&self, rel: &str) -> Result<ObjectMetadata> {
		let cloud = self.require_cloud("head_remote")?;
		let key = format!("{}{rel}", self.vault.mount_alias);
		Ok(cloud.client.head_object(&key).await?)
	}

	/// Given a set of remote vault-relative file paths, returns the
	/// directories not yet present in the catalog, shallowest first.
	pub async fn extract_directories(&self, files: &[String]) -> Result<Vec<String>> {
		let mut candidates = BTreeSet::new();
		for file in files {
			candidates.extend(ancestors_of(file));
		}

		let mut missing = Vec::new();
		for dir in candidates {
			if self.store.get_entry_by_path(self.vault.id, &dir).await.is_err() {
				missing.push(dir);
			}
		}
		missing.sort_by_key(|d| d.matches('/').count());
		Ok(missing)
	}
}
