//! Process-wide sharded entry cache (C6): a coherent, write-through
//! mirror of the catalog store's entries, authoritative only as a lookup
//! accelerator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;
use vaulthalla_catalog::{CatalogStore, Entry};

use crate::stats::EntryCacheStats;

const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct Shard {
	by_id: HashMap<Uuid, Entry>,
	by_inode: HashMap<(Uuid, u64), Uuid>,
	by_path: HashMap<(Uuid, String), Uuid>,
	child_parent: HashMap<Uuid, Uuid>,
}

/// Mirrors [`CatalogStore`] entries in memory. All vault entries for a
/// given vault land in the same shard so cross-index lookups (path →
/// inode, inode → id) never need to cross a lock boundary.
pub struct EntryCache {
	shards: Vec<RwLock<Shard>>,
	store: Arc<dyn CatalogStore>,
	pub stats: EntryCacheStats,
}

fn shard_index(vault_id: Uuid) -> usize {
	let bytes = vault_id.as_bytes();
	let mut acc: u64 = 0;
	for &b in bytes {
		acc = acc.wrapping_mul(31).wrapping_add(b as u64);
	}
	(acc % SHARD_COUNT as u64) as usize
}

impl EntryCache {
	pub fn new(store: Arc<dyn CatalogStore>) -> Self {
		let mut shards = Vec::with_capacity(SHARD_COUNT);
		shards.resize_with(SHARD_COUNT, || RwLock::new(Shard::default()));
		Self {
			shards,
			store,
			stats: EntryCacheStats::default(),
		}
	}

	fn shard(&self, vault_id: Uuid) -> &RwLock<Shard> {
		&self.shards[shard_index(vault_id)]
	}

	fn insert_locked(&self, shard: &mut Shard, vault_id: Uuid, entry: Entry) {
		let new_size = entry
			.file_meta
			.as_ref()
			.map(|m| m.size_bytes as i64)
			.unwrap_or(0);
		let old_size = shard
			.by_inode
			.get(&(vault_id, entry.inode))
			.and_then(|id| shard.by_id.get(id))
			.and_then(|e| e.file_meta.as_ref())
			.map(|m| m.size_bytes as i64)
			.unwrap_or(0);
		self.stats.apply_used_bytes_delta(new_size - old_size);

		shard.by_inode.insert((vault_id, entry.inode), entry.id);
		shard.by_path.insert((vault_id, entry.path.clone()), entry.id);
		if let Some(parent_id) = entry.parent_id {
			shard.child_parent.insert(entry.id, parent_id);
		}
		shard.by_id.insert(entry.id, entry);
		self.stats.record_insert();
	}

	/// Write-through insert: callers call this after the catalog store
	/// mutation already committed.
	pub fn insert(&self, vault_id: Uuid, entry: Entry) {
		let mut shard = self.shard(vault_id).write();
		self.insert_locked(&mut shard, vault_id, entry);
	}

	pub async fn get_by_path(&self, vault_id: Uuid, path: &str) -> vaulthalla_catalog::Result<Entry> {
		if let Some(entry) = {
			let shard = self.shard(vault_id).read();
			shard
				.by_path
				.get(&(vault_id, path.to_string()))
				.and_then(|id| shard.by_id.get(id))
				.cloned()
		} {
			self.stats.record_hit();
			return Ok(entry);
		}

		let started = Instant::now();
		let entry = self.store.get_entry_by_path(vault_id, path).await?;
		self.stats.record_miss_with_latency(started.elapsed().as_micros() as u64);
		self.insert(vault_id, entry.clone());
		Ok(entry)
	}

	pub async fn get_by_inode(&self, vault_id: Uuid, inode: u64) -> vaulthalla_catalog::Result<Entry> {
		if let Some(entry) = {
			let shard = self.shard(vault_id).read();
			shard
				.by_inode
				.get(&(vault_id, inode))
				.and_then(|id| shard.by_id.get(id))
				.cloned()
		} {
			self.stats.record_hit();
			return Ok(entry);
		}

		let started = Instant::now();
		let entry = self.store.get_entry_by_inode(vault_id, inode).await?;
		self.stats.record_miss_with_latency(started.elapsed().as_micros() as u64);
		self.insert(vault_id, entry.clone());
		Ok(entry)
	}

	pub async fn get_by_id(&self, vault_id: Uuid, id: Uuid) -> vaulthalla_catalog::Result<Entry> {
		if let Some(entry) = self.shard(vault_id).read().by_id.get(&id).cloned() {
			self.stats.record_hit();
			return Ok(entry);
		}

		let started = Instant::now();
		let entry = self.store.get_entry_by_id(id).await?;
		self.stats.record_miss_with_latency(started.elapsed().as_micros() as u64);
		self.insert(vault_id, entry.clone());
		Ok(entry)
	}

	/// Drops all four keys for `path` consistently.
	pub fn evict_path(&self, vault_id: Uuid, path: &str) {
		let mut shard = self.shard(vault_id).write();
		if let Some(id) = shard.by_path.remove(&(vault_id, path.to_string())) {
			if let Some(entry) = shard.by_id.remove(&id) {
				shard.by_inode.remove(&(vault_id, entry.inode));
				self.stats.apply_used_bytes_delta(
					-(entry.file_meta.as_ref().map(|m| m.size_bytes as i64).unwrap_or(0)),
				);
			}
			shard.child_parent.remove(&id);
			self.stats.record_eviction();
		}
	}

	pub fn evict_inode(&self, vault_id: Uuid, inode: u64) {
		let mut shard = self.shard(vault_id).write();
		if let Some(id) = shard.by_inode.remove(&(vault_id, inode)) {
			if let Some(entry) = shard.by_id.remove(&id) {
				shard.by_path.remove(&(vault_id, entry.path.clone()));
				self.stats.apply_used_bytes_delta(
					-(entry.file_meta.as_ref().map(|m| m.size_bytes as i64).unwrap_or(0)),
				);
			}
			shard.child_parent.remove(&id);
			self.stats.record_eviction();
		}
	}

	pub fn invalidate(&self, vault_id: Uuid, id: Uuid) {
		let mut shard = self.shard(vault_id).write();
		if let Some(entry) = shard.by_id.remove(&id) {
			shard.by_inode.remove(&(vault_id, entry.inode));
			shard.by_path.remove(&(vault_id, entry.path));
			shard.child_parent.remove(&id);
			self.stats.record_invalidation();
		}
	}

	pub fn resolve_path(&self, vault_id: Uuid, inode: u64) -> Option<String> {
		let shard = self.shard(vault_id).read();
		shard
			.by_inode
			.get(&(vault_id, inode))
			.and_then(|id| shard.by_id.get(id))
			.map(|e| e.path.clone())
	}

	pub fn resolve_inode(&self, vault_id: Uuid, path: &str) -> Option<u64> {
		let shard = self.shard(vault_id).read();
		shard
			.by_path
			.get(&(vault_id, path.to_string()))
			.and_then(|id| shard.by_id.get(id))
			.map(|e| e.inode)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use vaulthalla_catalog::{EntryKind, InMemoryCatalogStore};

	fn entry(vault_id: Uuid, inode: u64, path: &str, size: u64) -> Entry {
		Entry {
			id: Uuid::new_v4(),
			inode,
			vault_id: Some(vault_id),
			parent_id: None,
			name: path.trim_start_matches('/').to_string(),
			base32_alias: "ALIAS0".into(),
			path: path.to_string(),
			fuse_path: path.to_string(),
			backing_path: format!("/backing{path}"),
			mode: 0o644,
			owner_uid: 0,
			group_gid: 0,
			is_hidden: false,
			is_system: false,
			created_by: Uuid::nil(),
			last_modified_by: Uuid::nil(),
			created_at: Utc::now(),
			updated_at: Utc::now(),
			kind: EntryKind::File,
			dir_stats: None,
			file_meta: Some(vaulthalla_catalog::FileMeta {
				size_bytes: size,
				mime_type: None,
				content_hash: "h".into(),
				encryption_iv: "iv".into(),
				encrypted_with_key_version: 1,
			}),
		}
	}

	#[test]
	fn insert_then_resolve_round_trips() {
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = EntryCache::new(store);
		let vault_id = Uuid::new_v4();
		let e = entry(vault_id, 7, "/a.txt", 10);
		cache.insert(vault_id, e.clone());

		assert_eq!(cache.resolve_path(vault_id, 7), Some("/a.txt".to_string()));
		assert_eq!(cache.resolve_inode(vault_id, "/a.txt"), Some(7));
	}

	#[test]
	fn reinserting_same_inode_applies_signed_delta() {
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = EntryCache::new(store);
		let vault_id = Uuid::new_v4();
		let mut e = entry(vault_id, 7, "/a.txt", 10);
		cache.insert(vault_id, e.clone());
		assert_eq!(cache.stats.used_bytes(), 10);

		e.file_meta.as_mut().unwrap().size_bytes = 3;
		cache.insert(vault_id, e);
		assert_eq!(cache.stats.used_bytes(), 3);
	}

	#[test]
	fn evict_path_drops_all_indices() {
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let cache = EntryCache::new(store);
		let vault_id = Uuid::new_v4();
		let e = entry(vault_id, 7, "/a.txt", 10);
		cache.insert(vault_id, e);

		cache.evict_path(vault_id, "/a.txt");
		assert_eq!(cache.resolve_inode(vault_id, "/a.txt"), None);
		assert_eq!(cache.resolve_path(vault_id, 7), None);
		assert_eq!(cache.stats.used_bytes(), 0);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn miss_loads_from_store_and_populates_cache() {
		let store = Arc::new(InMemoryCatalogStore::new());
		let vault = vaulthalla_catalog::Vault {
			id: Uuid::new_v4(),
			name: "v".into(),
			description: String::new(),
			kind: vaulthalla_catalog::VaultType::Local,
			owner_id: Uuid::new_v4(),
			quota_bytes: 0,
			mount_alias: "ALIAS".into(),
			is_active: true,
			api_key_id: None,
			bucket: None,
			encrypt_upstream: false,
		};
		store.upsert_vault(vault.clone(), None).await.unwrap();
		let e = entry(vault.id, 1, "/a.txt", 4);
		store.upsert_file(e.clone()).await.unwrap();

		let cache = EntryCache::new(store as Arc<dyn CatalogStore>);
		let fetched = cache.get_by_path(vault.id, "/a.txt").await.unwrap();
		assert_eq!(fetched.id, e.id);
		assert_eq!(cache.stats.misses(), 1);

		let hit = cache.get_by_path(vault.id, "/a.txt").await.unwrap();
		assert_eq!(hit.id, e.id);
		assert_eq!(cache.stats.hits(), 1);
	}
}
