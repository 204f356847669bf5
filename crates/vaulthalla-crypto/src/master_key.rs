//! TPM-sealed master key provider (C2).
//!
//! On first run, generates a random 32-byte master key, seals it through a
//! [`TpmBackend`], and persists the resulting blob pair to disk. On
//! subsequent runs it reloads those blobs and unseals the key. The master
//! key never touches disk in the clear and is never exported beyond the
//! in-process calls made by [`crate::vault_key::VaultEncryptionManager`].
//!
//! The actual seal/unseal step is behind the [`TpmBackend`] trait so a real
//! hardware-backed implementation (e.g. one built on a TSS2 stack) can be
//! substituted for the default [`SoftwareSealBackend`], which seals the key
//! with AES-256-GCM under a device-local wrapping key. This mirrors how the
//! platform treats TPM access as a pluggable provider rather than a direct
//! hardware dependency.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::primitives::{self, KEY_SIZE};

/// Sealed blob pair as persisted under `<runtime>/master.priv` and
/// `<runtime>/master.pub`.
#[derive(Clone)]
pub struct SealedBlob {
	/// Opaque private portion (ciphertext + IV framing).
	pub priv_blob: Vec<u8>,
	/// Opaque public portion (wrapping-key identifier / parameters).
	pub pub_blob: Vec<u8>,
}

/// Abstraction over TPM or software backends capable of sealing and
/// unsealing a 32-byte master key bound to platform state.
pub trait TpmBackend: Send + Sync {
	/// Seal `key` under platform state, returning the blob pair to persist.
	fn seal(&self, key: &[u8; KEY_SIZE]) -> Result<SealedBlob>;

	/// Unseal a previously-sealed blob pair back into the master key.
	fn unseal(&self, blob: &SealedBlob) -> Result<[u8; KEY_SIZE]>;

	/// Human-readable identifier, used in error messages and logs.
	fn name(&self) -> &'static str;
}

/// Default TPM backend: seals the master key with AES-256-GCM under a
/// wrapping key derived from a device-local seed file. A genuine hardware
/// backend would implement [`TpmBackend`] against a TSS2 stack instead;
/// this implementation exists so the provider is usable without TPM
/// hardware present while keeping the same seal/unseal contract.
pub struct SoftwareSealBackend {
	wrapping_key: [u8; KEY_SIZE],
}

impl SoftwareSealBackend {
	/// Load or create the device-local wrapping key at `seed_path`.
	pub fn at_path(seed_path: impl AsRef<Path>) -> Result<Self> {
		let seed_path = seed_path.as_ref();
		if let Ok(bytes) = fs::read(seed_path) {
			if bytes.len() == KEY_SIZE {
				let mut wrapping_key = [0u8; KEY_SIZE];
				wrapping_key.copy_from_slice(&bytes);
				return Ok(Self { wrapping_key });
			}
			return Err(CryptoError::CorruptSealedBlob(format!(
				"wrapping key seed at {} has unexpected length {}",
				seed_path.display(),
				bytes.len()
			)));
		}

		let mut wrapping_key = [0u8; KEY_SIZE];
		rand_fill(&mut wrapping_key);
		if let Some(parent) = seed_path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(seed_path, wrapping_key)?;
		Ok(Self { wrapping_key })
	}
}

fn rand_fill(buf: &mut [u8]) {
	use rand::RngCore;
	rand::rngs::OsRng.fill_bytes(buf);
}

impl TpmBackend for SoftwareSealBackend {
	fn seal(&self, key: &[u8; KEY_SIZE]) -> Result<SealedBlob> {
		let (ciphertext, iv) = primitives::encrypt(key, &self.wrapping_key)?;
		Ok(SealedBlob {
			priv_blob: ciphertext,
			pub_blob: iv.to_vec(),
		})
	}

	fn unseal(&self, blob: &SealedBlob) -> Result<[u8; KEY_SIZE]> {
		if blob.pub_blob.len() != primitives::IV_SIZE {
			return Err(CryptoError::CorruptSealedBlob(
				"public blob is not an IV of the expected length".into(),
			));
		}
		let mut iv = [0u8; primitives::IV_SIZE];
		iv.copy_from_slice(&blob.pub_blob);
		let plaintext = primitives::decrypt(&blob.priv_blob, &self.wrapping_key, &iv)
			.map_err(|_| CryptoError::CorruptSealedBlob("unseal failed tag verification".into()))?;
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

	fn name(&self) -> &'static str {
		"software-seal"
	}
}

struct Inner {
	master_key: Option<[u8; KEY_SIZE]>,
}

/// Holds the 32-byte master key in memory after initialisation.
pub struct MasterKeyProvider {
	backend: Arc<dyn TpmBackend>,
	priv_path: PathBuf,
	pub_path: PathBuf,
	inner: RwLock<Inner>,
}

impl MasterKeyProvider {
	pub fn new(backend: Arc<dyn TpmBackend>, runtime_dir: impl AsRef<Path>) -> Self {
		let runtime_dir = runtime_dir.as_ref();
		Self {
			backend,
			priv_path: runtime_dir.join("master.priv"),
			pub_path: runtime_dir.join("master.pub"),
			inner: RwLock::new(Inner { master_key: None }),
		}
	}

	/// Initialise the provider: load existing sealed blobs and unseal, or
	/// generate a fresh key and seal it, persisting the blobs to disk.
	pub fn init(&self) -> Result<()> {
		{
			let guard = self.inner.read();
			if guard.master_key.is_some() {
				return Ok(());
			}
		}

		let key = if self.priv_path.exists() && self.pub_path.exists() {
			self.load_and_unseal()?
		} else {
			self.generate_and_seal()?
		};

		let mut guard = self.inner.write();
		guard.master_key = Some(key);
		Ok(())
	}

	fn load_and_unseal(&self) -> Result<[u8; KEY_SIZE]> {
		let priv_blob = fs::read(&self.priv_path)
			.map_err(|e| CryptoError::TpmUnavailable(format!("reading {}: {e}", self.priv_path.display())))?;
		let pub_blob = fs::read(&self.pub_path)
			.map_err(|e| CryptoError::TpmUnavailable(format!("reading {}: {e}", self.pub_path.display())))?;
		self.backend.unseal(&SealedBlob { priv_blob, pub_blob })
	}

	fn generate_and_seal(&self) -> Result<[u8; KEY_SIZE]> {
		let mut key = [0u8; KEY_SIZE];
		rand_fill(&mut key);
		let sealed = self.backend.seal(&key)?;
		if let Some(parent) = self.priv_path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(&self.priv_path, &sealed.priv_blob)?;
		fs::write(&self.pub_path, &sealed.pub_blob)?;
		tracing::info!(backend = self.backend.name(), "sealed fresh master key");
		Ok(key)
	}

	/// Returns the in-memory master key. Panics if [`init`] has not been
	/// called successfully; callers always run init during daemon startup.
	pub fn master_key(&self) -> [u8; KEY_SIZE] {
		self.inner
			.read()
			.master_key
			.expect("MasterKeyProvider::init must run before master_key is read")
	}

	/// Seal arbitrary key material (e.g. API key secrets) under the master
	/// key with a fresh IV, for at-rest storage of [`crate`] consumers.
	pub fn seal_secret(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; primitives::IV_SIZE])> {
		primitives::encrypt(plaintext, &self.master_key())
	}

	/// Unseal arbitrary key material sealed by [`seal_secret`].
	pub fn unseal_secret(&self, ciphertext: &[u8], iv: &[u8; primitives::IV_SIZE]) -> Result<Vec<u8>> {
		primitives::decrypt(ciphertext, &self.master_key(), iv)
	}
}

impl Drop for MasterKeyProvider {
	fn drop(&mut self) {
		if let Some(mut key) = self.inner.write().master_key.take() {
			key.zeroize();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	fn backend(dir: &Path) -> Arc<dyn TpmBackend> {
		Arc::new(SoftwareSealBackend::at_path(dir.join("seed.bin")).unwrap())
	}

	#[test]
	fn generates_and_persists_on_first_run() {
		let dir = tempdir().unwrap();
		let provider = MasterKeyProvider::new(backend(dir.path()), dir.path());
		provider.init().unwrap();
		let key1 = provider.master_key();

		assert!(dir.path().join("master.priv").exists());
		assert!(dir.path().join("master.pub").exists());

		let provider2 = MasterKeyProvider::new(backend(dir.path()), dir.path());
		provider2.init().unwrap();
		assert_eq!(provider2.master_key(), key1);
	}

	#[test]
	fn corrupt_blob_fails_closed() {
		let dir = tempdir().unwrap();
		let provider = MasterKeyProvider::new(backend(dir.path()), dir.path());
		provider.init().unwrap();
		drop(provider);

		fs::write(dir.path().join("master.priv"), b"garbage").unwrap();
		let provider2 = MasterKeyProvider::new(backend(dir.path()), dir.path());
		assert!(provider2.init().is_err());
	}

	#[test]
	fn seal_unseal_secret_round_trips() {
		let dir = tempdir().unwrap();
		let provider = MasterKeyProvider::new(backend(dir.path()), dir.path());
		provider.init().unwrap();

		let (ct, iv) = provider.seal_secret(b"s3-secret-access-key").unwrap();
		let pt = provider.unseal_secret(&ct, &iv).unwrap();
		assert_eq!(pt, b"s3-secret-access-key");
	}
}
