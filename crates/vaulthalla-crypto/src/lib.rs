//! Cryptographic primitives, TPM-sealed master key provider, and per-vault
//! encryption key lifecycle management.
//!
//! Three layers, bottom to top:
//! - [`primitives`]: AES-256-GCM, BLAKE2b hashing, Crockford base32, ID generation.
//! - [`master_key`]: the platform-wide master key, sealed behind a [`master_key::TpmBackend`].
//! - [`vault_key`]: per-vault data keys, sealed under the master key, with online rotation.

pub mod error;
pub mod master_key;
pub mod primitives;
pub mod vault_key;

pub use error::{CryptoError, Result};
pub use master_key::{MasterKeyProvider, SealedBlob, SoftwareSealBackend, TpmBackend};
pub use primitives::{
	base32_crockford_decode, base32_crockford_encode, blake2b_hex, blake2b_hex_reader,
	Base32Case, IdGenerator, IdGeneratorConfig, IV_SIZE, KEY_SIZE, TAG_SIZE,
};
pub use vault_key::{EncryptedFileRef, VaultEncryptionManager, VaultKeyRecord, VaultKeyStore};
