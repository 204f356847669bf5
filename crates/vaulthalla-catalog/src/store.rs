//! Transactional catalog store (C5): the capability surface the rest of
//! the core uses instead of a SQL interface, plus an in-memory reference
//! implementation.
//!
//! Grounded on the teacher's `StorageBackend`/`StorageTransaction` split
//! (`examples/saworbit-SPACE/crates/storage/src/lib.rs`): there a mutation
//! stages writes into a transaction object before committing them under
//! one lock acquisition. The catalog here has no staged multi-step
//! transaction type because every public mutation is already a single
//! call; each method takes the store's write lock for its own duration,
//! which is what "executes in a single transaction" means for an
//! in-memory backend. A persistent backend would swap the lock scope for
//! a real DB transaction without changing this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::entities::*;
use crate::error::{CatalogError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Page {
	pub offset: usize,
	pub limit: usize,
}

impl Default for Page {
	fn default() -> Self {
		Self { offset: 0, limit: 100 }
	}
}

#[derive(Debug, Clone, Default)]
pub struct VaultFilter {
	pub owner_id: Option<Uuid>,
	pub kind: Option<VaultType>,
	pub active_only: bool,
}

/// The persistent entity store backing vaults, entries, trashed files,
/// operations, sync events and vault keys.
#[async_trait]
pub trait CatalogStore: Send + Sync {
	// Vaults & policies
	async fn upsert_vault(&self, vault: Vault, policy: Option<Policy>) -> Result<Uuid>;
	async fn get_vault(&self, id: Uuid) -> Result<Vault>;
	async fn get_vault_by_name(&self, name: &str) -> Result<Vault>;
	async fn list_vaults(&self, filter: VaultFilter, page: Page) -> Result<Vec<Vault>>;
	async fn remove_vault(&self, id: Uuid) -> Result<()>;
	async fn get_policy(&self, vault_id: Uuid) -> Result<Policy>;
	async fn update_policy(&self, vault_id: Uuid, policy: Policy) -> Result<()>;

	// Vault keys
	async fn newest_key(&self, vault_id: Uuid) -> Result<Option<VaultKeyRow>>;
	async fn add_key(&self, row: VaultKeyRow) -> Result<u32>;
	async fn rotation_in_progress(&self, vault_id: Uuid) -> Result<bool>;
	async fn previous_key_during_rotation(&self, vault_id: Uuid) -> Result<Option<VaultKeyRow>>;
	async fn mark_rotation_in_progress(&self, vault_id: Uuid, new_version: u32) -> Result<()>;
	async fn mark_rotation_finished(&self, vault_id: Uuid) -> Result<()>;

	// Entries
	async fn upsert_directory(&self, entry: Entry) -> Result<Uuid>;
	async fn upsert_file(&self, entry: Entry) -> Result<Uuid>;
	async fn get_entry_by_id(&self, id: Uuid) -> Result<Entry>;
	async fn get_entry_by_inode(&self, vault_id: Uuid, inode: u64) -> Result<Entry>;
	async fn get_entry_by_path(&self, vault_id: Uuid, path: &str) -> Result<Entry>;
	async fn list_dir(&self, parent_id: Uuid, recursive: bool) -> Result<Vec<Entry>>;
	async fn next_inode(&self, vault_id: Uuid) -> Result<u64>;
	async fn remove_entry(&self, id: Uuid) -> Result<()>;
	async fn mark_trashed(&self, file: &Entry, trashed_by: Uuid) -> Result<TrashedFile>;
	async fn mark_trashed_file_deleted(&self, id: Uuid) -> Result<()>;
	async fn list_trashed(&self, vault_id: Uuid) -> Result<Vec<TrashedFile>>;
	/// Walks ancestors of `parent_id`, recomputing each one's stats from
	/// its immediate children. Returns the ids touched, shallowest last.
	async fn collect_parent_stats(&self, parent_id: Uuid) -> Result<Vec<Uuid>>;

	// Operations
	async fn enqueue_operation(&self, op: Operation) -> Result<Uuid>;
	async fn list_operations(&self, vault_id: Uuid) -> Result<Vec<Operation>>;
	async fn clear_operation(&self, id: Uuid) -> Result<()>;

	// Sync events, throughputs, conflicts
	async fn create_sync_event(&self, event: SyncEvent) -> Result<Uuid>;
	async fn update_sync_event(&self, event: SyncEvent) -> Result<()>;
	async fn get_latest_sync_event(&self, vault_id: Uuid) -> Result<Option<SyncEvent>>;
	async fn list_sync_events(&self, vault_id: Uuid, page: Page) -> Result<Vec<SyncEvent>>;

	// Users/groups, minimal permission evaluation
	async fn get_user(&self, id: Uuid) -> Result<User>;
	async fn upsert_user(&self, user: User) -> Result<Uuid>;
	async fn upsert_group(&self, group: Group) -> Result<Uuid>;
	async fn evaluate_permission(&self, user_id: Uuid, vault_id: Uuid) -> Result<PermissionSet>;
}

#[derive(Default)]
struct State {
	vaults: HashMap<Uuid, Vault>,
	vault_names: HashMap<String, Uuid>,
	policies: HashMap<Uuid, Policy>,
	vault_keys: HashMap<Uuid, Vec<VaultKeyRow>>,
	rotating: HashMap<Uuid, bool>,
	entries: HashMap<Uuid, Entry>,
	entries_by_inode: HashMap<(Uuid, u64), Uuid>,
	entries_by_path: HashMap<(Uuid, String), Uuid>,
	children: HashMap<Uuid, Vec<Uuid>>,
	next_inode: HashMap<Uuid, u64>,
	trashed: HashMap<Uuid, TrashedFile>,
	operations: HashMap<Uuid, Operation>,
	sync_events: HashMap<Uuid, Vec<SyncEvent>>,
	users: HashMap<Uuid, User>,
	groups: HashMap<Uuid, Group>,
}

/// Parking-lot-guarded in-memory reference implementation, the default
/// backend used by tests and by a standalone daemon with no external
/// catalog database configured.
#[derive(Default)]
pub struct InMemoryCatalogStore {
	state: RwLock<State>,
}

impl InMemoryCatalogStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn recompute_dir_stats(state: &mut State, dir_id: Uuid) {
		let child_ids = state.children.get(&dir_id).cloned().unwrap_or_default();
		let mut stats = DirectoryStats::default();
		for child_id in &child_ids {
			if let Some(child) = state.entries.get(child_id) {
				match child.kind {
					EntryKind::File => {
						stats.file_count += 1;
						if let Some(meta) = &child.file_meta {
							stats.size_bytes += meta.size_bytes;
						}
					}
					EntryKind::Directory => {
						stats.subdirectory_count += 1;
						if let Some(child_stats) = &child.dir_stats {
							stats.size_bytes += child_stats.size_bytes;
						}
					}
				}
			}
		}
		if let Some(entry) = state.entries.get_mut(&dir_id) {
			entry.dir_stats = Some(stats);
		}
	}
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
	async fn upsert_vault(&self, vault: Vault, policy: Option<Policy>) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = vault.id;
		state.vault_names.insert(vault.name.clone(), id);
		state.vaults.insert(id, vault);
		if let Some(policy) = policy {
			state.policies.insert(id, policy);
		}
		state.next_inode.entry(id).or_insert(2);
		Ok(id)
	}

	async fn get_vault(&self, id: Uuid) -> Result<Vault> {
		self.state
			.read()
			.vaults
			.get(&id)
			.cloned()
			.ok_or(CatalogError::VaultNotFound(id))
	}

	async fn get_vault_by_name(&self, name: &str) -> Result<Vault> {
		let state = self.state.read();
		let id = state
			.vault_names
			.get(name)
			.copied()
			.ok_or_else(|| CatalogError::EntryNotFound(name.to_string()))?;
		state.vaults.get(&id).cloned().ok_or(CatalogError::VaultNotFound(id))
	}

	async fn list_vaults(&self, filter: VaultFilter, page: Page) -> Result<Vec<Vault>> {
		let state = self.state.read();
		let mut vaults: Vec<Vault> = state
			.vaults
			.values()
			.filter(|v| filter.owner_id.map_or(true, |o| o == v.owner_id))
			.filter(|v| filter.kind.map_or(true, |k| k == v.kind))
			.filter(|v| !filter.active_only || v.is_active)
			.cloned()
			.collect();
		vaults.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(vaults.into_iter().skip(page.offset).take(page.limit).collect())
	}

	async fn remove_vault(&self, id: Uuid) -> Result<()> {
		let mut state = self.state.write();
		state.vaults.remove(&id).ok_or(CatalogError::VaultNotFound(id))?;
		state.policies.remove(&id);
		state.vault_keys.remove(&id);
		state.rotating.remove(&id);
		state.sync_events.remove(&id);
		state.next_inode.remove(&id);
		let doomed: Vec<Uuid> = state
			.entries
			.values()
			.filter(|e| e.vault_id == Some(id))
			.map(|e| e.id)
			.collect();
		for entry_id in doomed {
			if let Some(entry) = state.entries.remove(&entry_id) {
				state.entries_by_inode.remove(&(id, entry.inode));
				state.entries_by_path.remove(&(id, entry.path.clone()));
			}
		}
		state.trashed.retain(|_, t| t.vault_id != id);
		state.operations.retain(|_, o| o.vault_id != id);
		Ok(())
	}

	async fn get_policy(&self, vault_id: Uuid) -> Result<Policy> {
		self.state
			.read()
			.policies
			.get(&vault_id)
			.cloned()
			.ok_or(CatalogError::VaultNotFound(vault_id))
	}

	async fn update_policy(&self, vault_id: Uuid, policy: Policy) -> Result<()> {
		self.state.write().policies.insert(vault_id, policy);
		Ok(())
	}

	async fn newest_key(&self, vault_id: Uuid) -> Result<Option<VaultKeyRow>> {
		Ok(self.state.read().vault_keys.get(&vault_id).and_then(|v| v.last().cloned()))
	}

	async fn add_key(&self, row: VaultKeyRow) -> Result<u32> {
		let mut state = self.state.write();
		let version = row.version;
		state.vault_keys.entry(row.vault_id).or_default().push(row);
		Ok(version)
	}

	async fn rotation_in_progress(&self, vault_id: Uuid) -> Result<bool> {
		Ok(*self.state.read().rotating.get(&vault_id).unwrap_or(&false))
	}

	async fn previous_key_during_rotation(&self, vault_id: Uuid) -> Result<Option<VaultKeyRow>> {
		let state = self.state.read();
		Ok(state.vault_keys.get(&vault_id).and_then(|keys| {
			if keys.len() >= 2 {
				Some(keys[keys.len() - 2].clone())
			} else {
				None
			}
		}))
	}

	async fn mark_rotation_in_progress(&self, vault_id: Uuid, _new_version: u32) -> Result<()> {
		self.state.write().rotating.insert(vault_id, true);
		Ok(())
	}

	async fn mark_rotation_finished(&self, vault_id: Uuid) -> Result<()> {
		self.state.write().rotating.insert(vault_id, false);
		Ok(())
	}

	async fn upsert_directory(&self, entry: Entry) -> Result<Uuid> {
		self.upsert_file(entry).await
	}

	async fn upsert_file(&self, entry: Entry) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = entry.id;
		let vault_id = entry.vault_id.ok_or_else(|| {
			CatalogError::Other(anyhow::anyhow!("entry {id} has no vault_id"))
		})?;

		if let Some(existing_id) = state.entries_by_path.get(&(vault_id, entry.path.clone())) {
			if *existing_id != id {
				return Err(CatalogError::Conflict { vault_id, path: entry.path });
			}
		}

		if let Some(old) = state.entries.get(&id).cloned() {
			state.entries_by_inode.remove(&(vault_id, old.inode));
			state.entries_by_path.remove(&(vault_id, old.path));
			if let Some(old_parent) = old.parent_id {
				if old_parent != entry.parent_id.unwrap_or(old_parent) {
					if let Some(siblings) = state.children.get_mut(&old_parent) {
						siblings.retain(|c| *c != id);
					}
				}
			}
		}

		state.entries_by_inode.insert((vault_id, entry.inode), id);
		state.entries_by_path.insert((vault_id, entry.path.clone()), id);
		if let Some(parent_id) = entry.parent_id {
			let siblings = state.children.entry(parent_id).or_default();
			// Idempotent: a duplicate link is a no-op, per the invariant
			// that path-to-inode updates never error on re-linking.
			if !siblings.contains(&id) {
				siblings.push(id);
			}
		}
		state.entries.insert(id, entry);

		if let Some(parent_id) = state.entries.get(&id).and_then(|e| e.parent_id) {
			let mut chain = vec![parent_id];
			let mut cursor = parent_id;
			while let Some(next_parent) = state.entries.get(&cursor).and_then(|e| e.parent_id) {
				chain.push(next_parent);
				cursor = next_parent;
			}
			for ancestor in chain.into_iter().rev() {
				Self::recompute_dir_stats(&mut state, ancestor);
			}
		}

		Ok(id)
	}

	async fn get_entry_by_id(&self, id: Uuid) -> Result<Entry> {
		self.state
			.read()
			.entries
			.get(&id)
			.cloned()
			.ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))
	}

	async fn get_entry_by_inode(&self, vault_id: Uuid, inode: u64) -> Result<Entry> {
		let state = self.state.read();
		let id = state
			.entries_by_inode
			.get(&(vault_id, inode))
			.copied()
			.ok_or_else(|| CatalogError::EntryNotFound(format!("inode {inode}")))?;
		state.entries.get(&id).cloned().ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))
	}

	async fn get_entry_by_path(&self, vault_id: Uuid, path: &str) -> Result<Entry> {
		let state = self.state.read();
		let id = state
			.entries_by_path
			.get(&(vault_id, path.to_string()))
			.copied()
			.ok_or_else(|| CatalogError::EntryNotFound(path.to_string()))?;
		state.entries.get(&id).cloned().ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))
	}

	async fn list_dir(&self, parent_id: Uuid, recursive: bool) -> Result<Vec<Entry>> {
		let state = self.state.read();
		let mut out = Vec::new();
		let mut stack = state.children.get(&parent_id).cloned().unwrap_or_default();
		while let Some(id) = stack.pop() {
			if let Some(entry) = state.entries.get(&id) {
				if recursive && entry.is_directory() {
					stack.extend(state.children.get(&id).cloned().unwrap_or_default());
				}
				out.push(entry.clone());
			}
		}
		Ok(out)
	}

	async fn next_inode(&self, vault_id: Uuid) -> Result<u64> {
		let mut state = self.state.write();
		let counter = state.next_inode.entry(vault_id).or_insert(2);
		let value = *counter;
		*counter += 1;
		Ok(value)
	}

	async fn remove_entry(&self, id: Uuid) -> Result<()> {
		let mut state = self.state.write();
		let entry = state.entries.remove(&id).ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))?;
		if let Some(vault_id) = entry.vault_id {
			state.entries_by_inode.remove(&(vault_id, entry.inode));
			state.entries_by_path.remove(&(vault_id, entry.path));
		}
		if let Some(parent_id) = entry.parent_id {
			if let Some(siblings) = state.children.get_mut(&parent_id) {
				siblings.retain(|c| *c != id);
			}
			Self::recompute_dir_stats(&mut state, parent_id);
		}
		state.children.remove(&id);
		Ok(())
	}

	async fn mark_trashed(&self, file: &Entry, trashed_by: Uuid) -> Result<TrashedFile> {
		let vault_id = file
			.vault_id
			.ok_or_else(|| CatalogError::Other(anyhow::anyhow!("file {} has no vault_id", file.id)))?;
		let trashed = TrashedFile {
			id: Uuid::new_v4(),
			vault_id,
			base32_alias: file.base32_alias.clone(),
			path: file.path.clone(),
			backing_path: file.backing_path.clone(),
			trashed_at: Utc::now(),
			trashed_by,
			deleted_at: None,
			size_bytes: file.file_meta.as_ref().map(|m| m.size_bytes).unwrap_or_default(),
		};
		self.state.write().trashed.insert(trashed.id, trashed.clone());
		Ok(trashed)
	}

	async fn mark_trashed_file_deleted(&self, id: Uuid) -> Result<()> {
		let mut state = self.state.write();
		let trashed = state
			.trashed
			.get_mut(&id)
			.ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))?;
		trashed.deleted_at = Some(Utc::now());
		Ok(())
	}

	async fn list_trashed(&self, vault_id: Uuid) -> Result<Vec<TrashedFile>> {
		Ok(self
			.state
			.read()
			.trashed
			.values()
			.filter(|t| t.vault_id == vault_id && t.deleted_at.is_none())
			.cloned()
			.collect())
	}

	async fn collect_parent_stats(&self, parent_id: Uuid) -> Result<Vec<Uuid>> {
		let mut state = self.state.write();
		let mut chain = vec![parent_id];
		let mut cursor = parent_id;
		while let Some(next_parent) = state.entries.get(&cursor).and_then(|e| e.parent_id) {
			chain.push(next_parent);
			cursor = next_parent;
		}
		for ancestor in chain.iter().rev() {
			Self::recompute_dir_stats(&mut state, *ancestor);
		}
		Ok(chain)
	}

	async fn enqueue_operation(&self, op: Operation) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = op.id;
		state.operations.retain(|_, existing| existing.file_id != op.file_id);
		state.operations.insert(id, op);
		Ok(id)
	}

	async fn list_operations(&self, vault_id: Uuid) -> Result<Vec<Operation>> {
		Ok(self
			.state
			.read()
			.operations
			.values()
			.filter(|o| o.vault_id == vault_id)
			.cloned()
			.collect())
	}

	async fn clear_operation(&self, id: Uuid) -> Result<()> {
		self.state.write().operations.remove(&id);
		Ok(())
	}

	async fn create_sync_event(&self, event: SyncEvent) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = event.id;
		state.sync_events.entry(event.vault_id).or_default().push(event);
		Ok(id)
	}

	async fn update_sync_event(&self, event: SyncEvent) -> Result<()> {
		let mut state = self.state.write();
		let events = state.sync_events.entry(event.vault_id).or_default();
		if let Some(existing) = events.iter_mut().find(|e| e.id == event.id) {
			*existing = event;
			Ok(())
		} else {
			Err(CatalogError::EntryNotFound(event.id.to_string()))
		}
	}

	async fn get_latest_sync_event(&self, vault_id: Uuid) -> Result<Option<SyncEvent>> {
		Ok(self.state.read().sync_events.get(&vault_id).and_then(|v| v.last().cloned()))
	}

	async fn list_sync_events(&self, vault_id: Uuid, page: Page) -> Result<Vec<SyncEvent>> {
		let state = self.state.read();
		let events = state.sync_events.get(&vault_id).cloned().unwrap_or_default();
		Ok(events.into_iter().rev().skip(page.offset).take(page.limit).collect())
	}

	async fn get_user(&self, id: Uuid) -> Result<User> {
		self.state
			.read()
			.users
			.get(&id)
			.cloned()
			.ok_or_else(|| CatalogError::EntryNotFound(id.to_string()))
	}

	async fn upsert_user(&self, user: User) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = user.id;
		state.users.insert(id, user);
		Ok(id)
	}

	async fn upsert_group(&self, group: Group) -> Result<Uuid> {
		let mut state = self.state.write();
		let id = group.id;
		state.groups.insert(id, group);
		Ok(id)
	}

	async fn evaluate_permission(&self, user_id: Uuid, vault_id: Uuid) -> Result<PermissionSet> {
		let state = self.state.read();
		let vault = state.vaults.get(&vault_id).ok_or(CatalogError::VaultNotFound(vault_id))?;
		if vault.owner_id == user_id {
			return Ok(PermissionSet::owner());
		}
		Ok(PermissionSet::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_vault() -> Vault {
		Vault {
			id: Uuid::new_v4(),
			name: "personal".into(),
			description: String::new(),
			kind: VaultType::Local,
			owner_id: Uuid::new_v4(),
			quota_bytes: 0,
			mount_alias: "AAAA1111".into(),
			is_active: true,
			api_key_id: None,
			bucket: None,
			encrypt_upstream: false,
		}
	}

	fn root_entry(vault_id: Uuid) -> Entry {
		Entry {
			id: Uuid::new_v4(),
			inode: Entry::ROOT_INODE,
			vault_id: Some(vault_id),
			parent_id: None,
			name: "/".into(),
			base32_alias: "ROOT0000".into(),
			path: "/".into(),
			fuse_path: "/".into(),
			backing_path: "/backing/root".into(),
			mode: 0o755,
			owner_uid: 0,
			group_gid: 0,
			is_hidden: false,
			is_system: true,
			created_by: Uuid::nil(),
			last_modified_by: Uuid::nil(),
			created_at: Utc::now(),
			updated_at: Utc::now(),
			kind: EntryKind::Directory,
			dir_stats: Some(DirectoryStats::default()),
			file_meta: None,
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn upsert_vault_then_get_round_trips() {
		let store = InMemoryCatalogStore::new();
		let vault = sample_vault();
		let id = store.upsert_vault(vault.clone(), None).await.unwrap();
		let fetched = store.get_vault(id).await.unwrap();
		assert_eq!(fetched.name, vault.name);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn duplicate_path_in_vault_conflicts() {
		let store = InMemoryCatalogStore::new();
		let vault = sample_vault();
		store.upsert_vault(vault.clone(), None).await.unwrap();
		let root = root_entry(vault.id);
		store.upsert_directory(root.clone()).await.unwrap();

		let mut first = root.clone();
		first.id = Uuid::new_v4();
		first.inode = 2;
		first.parent_id = Some(root.id);
		first.path = "/a.txt".into();
		first.kind = EntryKind::File;
		first.dir_stats = None;
		first.file_meta = Some(FileMeta {
			size_bytes: 5,
			mime_type: None,
			content_hash: "x".into(),
			encryption_iv: "iv".into(),
			encrypted_with_key_version: 1,
		});
		store.upsert_file(first.clone()).await.unwrap();

		let mut second = first.clone();
		second.id = Uuid::new_v4();
		second.inode = 3;
		let err = store.upsert_file(second).await.unwrap_err();
		assert!(matches!(err, CatalogError::Conflict { .. }));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn directory_stats_reflect_children_after_insert() {
		let store = InMemoryCatalogStore::new();
		let vault = sample_vault();
		store.upsert_vault(vault.clone(), None).await.unwrap();
		let root = root_entry(vault.id);
		store.upsert_directory(root.clone()).await.unwrap();

		let mut file = root.clone();
		file.id = Uuid::new_v4();
		file.inode = 2;
		file.parent_id = Some(root.id);
		file.path = "/a.txt".into();
		file.kind = EntryKind::File;
		file.dir_stats = None;
		file.file_meta = Some(FileMeta {
			size_bytes: 42,
			mime_type: None,
			content_hash: "x".into(),
			encryption_iv: "iv".into(),
			encrypted_with_key_version: 1,
		});
		store.upsert_file(file).await.unwrap();

		let refreshed_root = store.get_entry_by_id(root.id).await.unwrap();
		let stats = refreshed_root.dir_stats.unwrap();
		assert_eq!(stats.size_bytes, 42);
		assert_eq!(stats.file_count, 1);
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn relinking_same_parent_child_is_idempotent() {
		let store = InMemoryCatalogStore::new();
		let vault = sample_vault();
		store.upsert_vault(vault.clone(), None).await.unwrap();
		let root = root_entry(vault.id);
		store.upsert_directory(root.clone()).await.unwrap();
		store.upsert_directory(root.clone()).await.unwrap();

		let dir = store.list_dir(root.id, false).await.unwrap();
		assert!(dir.is_empty());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn vault_key_rotation_bookkeeping() {
		let store = InMemoryCatalogStore::new();
		let vault_id = Uuid::new_v4();
		assert!(store.newest_key(vault_id).await.unwrap().is_none());

		store
			.add_key(VaultKeyRow {
				vault_id,
				version: 1,
				encrypted_key: vec![0; 32],
				iv: [0; 12],
				created_at: Utc::now(),
			})
			.await
			.unwrap();
		assert!(!store.rotation_in_progress(vault_id).await.unwrap());

		store.mark_rotation_in_progress(vault_id, 2).await.unwrap();
		assert!(store.rotation_in_progress(vault_id).await.unwrap());

		store.mark_rotation_finished(vault_id).await.unwrap();
		assert!(!store.rotation_in_progress(vault_id).await.unwrap());
	}
}
