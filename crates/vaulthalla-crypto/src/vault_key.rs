//! Per-vault encryption manager (C3): data key lifecycle, encrypt/decrypt,
//! and online key rotation.
//!
//! Grounded on `examples/original_source/src/vault/EncryptionManager.cpp`:
//! a vault key is generated once, sealed under the master key, and cached
//! in memory; `prepare_key_rotation` moves the current key to `previous`
//! and mints a new current key; `rotate_decrypt_encrypt` migrates a single
//! file's ciphertext from the previous key to the current one.

use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{CryptoError, Result};
use crate::master_key::MasterKeyProvider;
use crate::primitives::{self, IV_SIZE, KEY_SIZE};

/// A single persisted vault key row, as the catalog store represents it.
#[derive(Debug, Clone)]
pub struct VaultKeyRecord {
	pub version: u32,
	pub encrypted_key: Vec<u8>,
	pub iv: [u8; IV_SIZE],
	pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The catalog-backed persistence surface the encryption manager needs.
/// Implemented by `vaulthalla-catalog`'s store; kept as a trait here so
/// this crate has no dependency on the catalog's entity types.
pub trait VaultKeyStore: Send + Sync {
	fn newest_key(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>>;
	fn rotation_in_progress(&self, vault_id: Uuid) -> anyhow::Result<bool>;
	fn previous_key_during_rotation(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>>;
	fn add_key(&self, vault_id: Uuid, record: VaultKeyRecord) -> anyhow::Result<u32>;
	fn mark_rotation_in_progress(&self, vault_id: Uuid, new_version: u32) -> anyhow::Result<()>;
	fn mark_rotation_finished(&self, vault_id: Uuid) -> anyhow::Result<()>;
}

/// A file's recorded crypto metadata: the fields the manager reads and
/// mutates on an entity that otherwise belongs to `vaulthalla-catalog`.
pub trait EncryptedFileRef {
	fn encryption_iv_base64(&self) -> Option<String>;
	fn encrypted_with_key_version(&self) -> Option<u32>;
	fn set_encryption(&mut self, iv_base64: String, key_version: u32);
}

struct KeyState {
	current_version: u32,
	current_key: [u8; KEY_SIZE],
	previous_key: Option<[u8; KEY_SIZE]>,
	rotation_in_progress: bool,
}

/// Owns `{version, current_key, previous_key?}` for exactly one vault.
pub struct VaultEncryptionManager {
	vault_id: Uuid,
	master: std::sync::Arc<MasterKeyProvider>,
	store: std::sync::Arc<dyn VaultKeyStore>,
	state: Mutex<Option<KeyState>>,
}

impl VaultEncryptionManager {
	pub fn new(
		vault_id: Uuid,
		master: std::sync::Arc<MasterKeyProvider>,
		store: std::sync::Arc<dyn VaultKeyStore>,
	) -> Self {
		Self {
			vault_id,
			master,
			store,
			state: Mutex::new(None),
		}
	}

	/// Load (or create) this vault's key. Must be called before
	/// encrypt/decrypt; idempotent.
	pub fn load_key(&self) -> Result<()> {
		let mut guard = self.state.lock().expect("vault key mutex poisoned");
		if guard.is_some() {
			return Ok(());
		}

		let existing = self
			.store
			.newest_key(self.vault_id)
			.map_err(CryptoError::Other)?;

		let state = match existing {
			None => {
				let mut key = [0u8; KEY_SIZE];
				fill_random(&mut key);
				let (encrypted_key, iv) = self.master.seal_secret(&key)?;
				let version = self
					.store
					.add_key(
						self.vault_id,
						VaultKeyRecord {
							version: 1,
							encrypted_key,
							iv,
							created_at: chrono::Utc::now(),
						},
					)
					.map_err(CryptoError::Other)?;
				tracing::info!(vault_id = %self.vault_id, version, "generated fresh vault key");
				KeyState {
					current_version: version,
					current_key: key,
					previous_key: None,
					rotation_in_progress: false,
				}
			}
			Some(record) => {
				let key = self.unseal_record(&record)?;
				let rotating = self
					.store
					.rotation_in_progress(self.vault_id)
					.map_err(CryptoError::Other)?;
				let previous_key = if rotating {
					let prev = self
						.store
						.previous_key_during_rotation(self.vault_id)
						.map_err(CryptoError::Other)?
						.ok_or(CryptoError::MissingPreviousKey(self.vault_id))?;
					Some(self.unseal_record(&prev)?)
				} else {
					None
				};
				KeyState {
					current_version: record.version,
					current_key: key,
					previous_key,
					rotation_in_progress: rotating,
				}
			}
		};

		*guard = Some(state);
		Ok(())
	}

	fn unseal_record(&self, record: &VaultKeyRecord) -> Result<[u8; KEY_SIZE]> {
		let plaintext = self.master.unseal_secret(&record.encrypted_key, &record.iv)?;
		if plaintext.len() != KEY_SIZE {
			return Err(CryptoError::InvalidKeyLength {
				expected: KEY_SIZE,
				actual: plaintext.len(),
			});
		}
		let mut key = [0u8; KEY_SIZE];
		key.copy_from_slice(&plaintext);
		Ok(key)
	}

	pub fn current_version(&self) -> u32 {
		self.state
			.lock()
			.expect("vault key mutex poisoned")
			.as_ref()
			.expect("load_key must run first")
			.current_version
	}

	pub fn rotation_in_progress(&self) -> bool {
		self.state
			.lock()
			.expect("vault key mutex poisoned")
			.as_ref()
			.expect("load_key must run first")
			.rotation_in_progress
	}

	/// Encrypt `plaintext` under the current key and write the resulting
	/// IV and key version onto `file`.
	pub fn encrypt(&self, plaintext: &[u8], file: &mut dyn EncryptedFileRef) -> Result<Vec<u8>> {
		let guard = self.state.lock().expect("vault key mutex poisoned");
		let state = guard.as_ref().expect("load_key must run first");
		let (ciphertext, iv) = primitives::encrypt(plaintext, &state.current_key)?;
		file.set_encryption(base64_encode(&iv), state.current_version);
		Ok(ciphertext)
	}

	/// Decrypt `ciphertext` using the key matching `key_version`. During
	/// rotation both the current and previous key are accepted; outside
	/// rotation a version mismatch fails closed with no implicit fallback.
	pub fn decrypt(&self, ciphertext: &[u8], iv_b64: &str, key_version: u32) -> Result<Vec<u8>> {
		let guard = self.state.lock().expect("vault key mutex poisoned");
		let state = guard.as_ref().expect("load_key must run first");
		let iv = decode_iv(iv_b64)?;

		let key = if key_version == state.current_version {
			&state.current_key
		} else if state.rotation_in_progress {
			state
				.previous_key
				.as_ref()
				.ok_or(CryptoError::MissingPreviousKey(self.vault_id))?
		} else {
			return Err(CryptoError::KeyVersionMismatch {
				requested: key_version,
				current: state.current_version,
			});
		};

		primitives::decrypt(ciphertext, key, &iv)
	}

	/// Generate a new key version, keep the old one as `previous`, and mark
	/// rotation in progress. Idempotent if rotation is already underway.
	pub fn prepare_key_rotation(&self) -> Result<()> {
		let mut guard = self.state.lock().expect("vault key mutex poisoned");
		let state = guard.as_mut().expect("load_key must run first");

		if state.rotation_in_progress {
			tracing::warn!(vault_id = %self.vault_id, "key rotation already in progress");
			return Ok(());
		}

		let mut new_key = [0u8; KEY_SIZE];
		fill_random(&mut new_key);
		let (encrypted_key, iv) = self.master.seal_secret(&new_key)?;
		let new_version = self
			.store
			.add_key(
				self.vault_id,
				VaultKeyRecord {
					version: state.current_version + 1,
					encrypted_key,
					iv,
					created_at: chrono::Utc::now(),
				},
			)
			.map_err(CryptoError::Other)?;
		self.store
			.mark_rotation_in_progress(self.vault_id, new_version)
			.map_err(CryptoError::Other)?;

		state.previous_key = Some(state.current_key);
		state.current_key = new_key;
		state.current_version = new_version;
		state.rotation_in_progress = true;

		tracing::info!(vault_id = %self.vault_id, version = new_version, "prepared key rotation");
		Ok(())
	}

	/// Decrypt with the previous key using the file's recorded IV, then
	/// re-encrypt under the current key and update the file's IV/version.
	/// Used by the `RotateKey` sync task.
	pub fn rotate_decrypt_encrypt(
		&self,
		ciphertext: &[u8],
		file: &mut dyn EncryptedFileRef,
	) -> Result<Vec<u8>> {
		let iv_b64 = file
			.encryption_iv_base64()
			.ok_or_else(|| CryptoError::EncryptionFailed("file has no recorded IV".into()))?;
		let key_version = file
			.encrypted_with_key_version()
			.ok_or_else(|| CryptoError::EncryptionFailed("file has no recorded key version".into()))?;

		let guard = self.state.lock().expect("vault key mutex poisoned");
		let state = guard.as_ref().expect("load_key must run first");

		if key_version == state.current_version {
			// Already current; nothing to do. Caller is expected to have
			// filtered these out via the catalog query, this is a defensive
			// fast path.
			drop(guard);
			let iv = decode_iv(&iv_b64)?;
			return primitives::decrypt(ciphertext, &self.current_key_snapshot(), &iv);
		}

		if !state.rotation_in_progress {
			return Err(CryptoError::NoRotationInProgress(self.vault_id));
		}

		let previous_key = state
			.previous_key
			.ok_or(CryptoError::MissingPreviousKey(self.vault_id))?;
		let iv = decode_iv(&iv_b64)?;
		let plaintext = primitives::decrypt(ciphertext, &previous_key, &iv)?;
		let (new_ciphertext, new_iv) = primitives::encrypt(&plaintext, &state.current_key)?;
		let new_version = state.current_version;
		drop(guard);

		file.set_encryption(base64_encode(&new_iv), new_version);
		Ok(new_ciphertext)
	}

	fn current_key_snapshot(&self) -> [u8; KEY_SIZE] {
		self.state
			.lock()
			.expect("vault key mutex poisoned")
			.as_ref()
			.expect("load_key must run first")
			.current_key
	}

	/// Clear the previous key and mark rotation finished in the catalog.
	pub fn finish_key_rotation(&self) -> Result<()> {
		let mut guard = self.state.lock().expect("vault key mutex poisoned");
		let state = guard.as_mut().expect("load_key must run first");

		if !state.rotation_in_progress {
			tracing::warn!(vault_id = %self.vault_id, "no key rotation in progress");
			return Ok(());
		}

		state.previous_key = None;
		state.rotation_in_progress = false;
		self.store
			.mark_rotation_finished(self.vault_id)
			.map_err(CryptoError::Other)?;

		tracing::info!(vault_id = %self.vault_id, version = state.current_version, "finished key rotation");
		Ok(())
	}
}

fn fill_random(buf: &mut [u8]) {
	use rand::RngCore;
	rand::rngs::OsRng.fill_bytes(buf);
}

fn base64_encode(iv: &[u8; IV_SIZE]) -> String {
	use base64::Engine;
	base64::engine::general_purpose::STANDARD.encode(iv)
}

fn decode_iv(iv_b64: &str) -> Result<[u8; IV_SIZE]> {
	use base64::Engine;
	let bytes = base64::engine::general_purpose::STANDARD
		.decode(iv_b64)
		.map_err(|_| CryptoError::InvalidIvLength {
			expected: IV_SIZE,
			actual: 0,
		})?;
	if bytes.len() != IV_SIZE {
		return Err(CryptoError::InvalidIvLength {
			expected: IV_SIZE,
			actual: bytes.len(),
		});
	}
	let mut iv = [0u8; IV_SIZE];
	iv.copy_from_slice(&bytes);
	Ok(iv)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::master_key::SoftwareSealBackend;
	use parking_lot::Mutex as PlMutex;
	use std::collections::HashMap;
	use std::sync::Arc;

	struct TestFile {
		iv: Option<String>,
		version: Option<u32>,
	}
	impl EncryptedFileRef for TestFile {
		fn encryption_iv_base64(&self) -> Option<String> {
			self.iv.clone()
		}
		fn encrypted_with_key_version(&self) -> Option<u32> {
			self.version
		}
		fn set_encryption(&mut self, iv_base64: String, key_version: u32) {
			self.iv = Some(iv_base64);
			self.version = Some(key_version);
		}
	}

	#[derive(Default)]
	struct InMemoryKeyStore {
		keys: PlMutex<HashMap<Uuid, Vec<VaultKeyRecord>>>,
		rotating: PlMutex<HashMap<Uuid, bool>>,
	}
	impl VaultKeyStore for InMemoryKeyStore {
		fn newest_key(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>> {
			Ok(self.keys.lock().get(&vault_id).and_then(|v| v.last().cloned()))
		}
		fn rotation_in_progress(&self, vault_id: Uuid) -> anyhow::Result<bool> {
			Ok(*self.rotating.lock().get(&vault_id).unwrap_or(&false))
		}
		fn previous_key_during_rotation(&self, vault_id: Uuid) -> anyhow::Result<Option<VaultKeyRecord>> {
			let keys = self.keys.lock();
			let v = keys.get(&vault_id);
			Ok(v.and_then(|v| if v.len() >= 2 { Some(v[v.len() - 2].clone()) } else { None }))
		}
		fn add_key(&self, vault_id: Uuid, record: VaultKeyRecord) -> anyhow::Result<u32> {
			let version = record.version;
			self.keys.lock().entry(vault_id).or_default().push(record);
			Ok(version)
		}
		fn mark_rotation_in_progress(&self, vault_id: Uuid, _new_version: u32) -> anyhow::Result<()> {
			self.rotating.lock().insert(vault_id, true);
			Ok(())
		}
		fn mark_rotation_finished(&self, vault_id: Uuid) -> anyhow::Result<()> {
			self.rotating.lock().insert(vault_id, false);
			Ok(())
		}
	}

	fn manager(dir: &std::path::Path) -> VaultEncryptionManager {
		let backend = Arc::new(SoftwareSealBackend::at_path(dir.join("seed.bin")).unwrap());
		let master = Arc::new(MasterKeyProvider::new(backend, dir));
		master.init().unwrap();
		let store = Arc::new(InMemoryKeyStore::default());
		VaultEncryptionManager::new(Uuid::new_v4(), master, store)
	}

	#[test]
	fn first_load_creates_version_one() {
		let dir = tempfile::tempdir().unwrap();
		let mgr = manager(dir.path());
		mgr.load_key().unwrap();
		assert_eq!(mgr.current_version(), 1);
		assert!(!mgr.rotation_in_progress());
	}

	#[test]
	fn encrypt_then_decrypt_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let mgr = manager(dir.path());
		mgr.load_key().unwrap();

		let mut file = TestFile { iv: None, version: None };
		let ciphertext = mgr.encrypt(b"secret bytes", &mut file).unwrap();
		let plaintext = mgr
			.decrypt(&ciphertext, &file.iv.clone().unwrap(), file.version.unwrap())
			.unwrap();
		assert_eq!(plaintext, b"secret bytes");
	}

	#[test]
	fn version_mismatch_outside_rotation_fails_closed() {
		let dir = tempfile::tempdir().unwrap();
		let mgr = manager(dir.path());
		mgr.load_key().unwrap();
		let mut file = TestFile { iv: None, version: None };
		let ciphertext = mgr.encrypt(b"data", &mut file).unwrap();

		let err = mgr.decrypt(&ciphertext, &file.iv.unwrap(), 99).unwrap_err();
		assert!(matches!(err, CryptoError::KeyVersionMismatch { .. }));
	}

	#[test]
	fn rotation_migrates_file_to_current_version() {
		let dir = tempfile::tempdir().unwrap();
		let mgr = manager(dir.path());
		mgr.load_key().unwrap();

		let mut file = TestFile { iv: None, version: None };
		let ciphertext_v1 = mgr.encrypt(b"rotate me", &mut file).unwrap();
		assert_eq!(file.version, Some(1));

		mgr.prepare_key_rotation().unwrap();
		assert!(mgr.rotation_in_progress());
		assert_eq!(mgr.current_version(), 2);

		let ciphertext_v2 = mgr.rotate_decrypt_encrypt(&ciphertext_v1, &mut file).unwrap();
		assert_eq!(file.version, Some(2));

		let plaintext = mgr
			.decrypt(&ciphertext_v2, &file.iv.clone().unwrap(), 2)
			.unwrap();
		assert_eq!(plaintext, b"rotate me");

		mgr.finish_key_rotation().unwrap();
		assert!(!mgr.rotation_in_progress());
		// Old version is no longer accepted once rotation has finished.
		let err = mgr.decrypt(&ciphertext_v1, &file.iv.clone().unwrap(), 1).unwrap_err();
		assert!(matches!(err, CryptoError::KeyVersionMismatch { .. }));
	}
}
