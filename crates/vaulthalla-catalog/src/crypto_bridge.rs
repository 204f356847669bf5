//! Adapts the async [`CatalogStore`] to the synchronous
//! `vaulthalla_crypto::VaultKeyStore` and `EncryptedFileRef` traits so
//! `VaultEncryptionManager` stays decoupled from this crate's entity types.

use std::sync::Arc;

use uuid::Uuid;
use vaulthalla_crypto::{EncryptedFileRef, VaultKeyRecord, VaultKeyStore};

use crate::entities::{Entry, VaultKeyRow};
use crate::store::CatalogStore;

pub struct CatalogVaultKeyStore {
	store: Arc<dyn CatalogStore>,
}

impl CatalogVaultKeyStore {
	pub fn new(store: Arc<dyn CatalogStore>) -> Self {
		Self { store }
	}

	fn block_on<F: std::future::Future>(fut: F) -> F::Output {
		tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
	}
}

fn to_record(row: VaultKeyRow) -> VaultKeyRecord {
	VaultKeyRecord {
		version: row.version,
		encrypted_key: row.encrypted_key,
		iv: row.iv,
		created_at: row.created_at,
	}
}

fn to_row(vault_id: Uuid, record: VaultKeyRecord) -> VaultKeyRow {
	VaultKeyRow {
		vault_id,
		version: record.version,
		encrypted_key: record.encrypted_key,
		iv: record.iv,
		created_at: record.created_at,
	}
}

impl VaultKeyStore for CatalogVaultKeyStore {
	fn newest_key(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>> {
		Ok(Self::block_on(self.store.newest_key(vault_id))?.map(to_record))
	}

	fn rotation_in_progress(&self, vault_id: Uuid) -> anyhow::Result<bool> {
		Ok(Self::block_on(self.store.rotation_in_progress(vault_id))?)
	}

	fn previous_key_during_rotation(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>> {
		Ok(Self::block_on(self.store.previous_key_during_rotation(vault_id))?.map(to_record))
	}

	fn add_key(&self, vault_id: Uuid, record: VaultKeyRecord) -> anyhow::Result<u32> {
		Ok(Self::block_on(self.store.add_key(to_row(vault_id, record)))?)
	}

	fn mark_rotation_in_progress(&self, vault_id: Uuid, new_version: u32) -> anyhow::Result<()> {
		Ok(Self::block_on(self.store.mark_rotation_in_progress(vault_id, new_version))?)
	}

	fn mark_rotation_finished(&self, vault_id: Uuid) -> anyhow::Result<()> {
		Ok(Self::block_on(self.store.mark_rotation_finished(vault_id))?)
	}
}

impl EncryptedFileRef for Entry {
	fn encryption_iv_base64(&self) -> Option<String> {
		self.file_meta.as_ref().map(|m| m.encryption_iv.clone())
	}

	fn encrypted_with_key_version(&self) -> Option<u32> {
		self.file_meta.as_ref().map(|m| m.encrypted_with_key_version)
	}

	fn set_encryption(&mut self, iv_base64: String, key_version: u32) {
		if let Some(meta) = self.file_meta.as_mut() {
			meta.encryption_iv = iv_base64;
			meta.encrypted_with_key_version = key_version;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::InMemoryCatalogStore;

	#[tokio::test(flavor = "multi_thread")]
	async fn bridges_newest_key_through_block_on() {
		let store: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
		let vault_id = Uuid::new_v4();
		store
			.add_key(VaultKeyRow {
				vault_id,
				version: 1,
				encrypted_key: vec![1, 2, 3],
				iv: [0; 12],
				created_at: chrono::Utc::now(),
			})
			.await
			.unwrap();

		let bridge = CatalogVaultKeyStore::new(store);
		let handle = tokio::task::spawn_blocking(move || bridge.newest_key(vault_id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(handle.unwrap().version, 1);
	}
}
