use thiserror::Error;

/// Crypto-related errors surfaced by primitives, the TPM key provider, and
/// the per-vault encryption manager.
///
/// These are designed to be informative for debugging while never leaking
/// key material in their `Display` output.
#[derive(Error, Debug)]
pub enum CryptoError {
	#[error("encryption failed: {0}")]
	EncryptionFailed(String),

	#[error("decryption failed: tag verification error")]
	DecryptionFailed,

	#[error("key version {requested} is not the current version {current} and rotation is not in progress")]
	KeyVersionMismatch { requested: u32, current: u32 },

	#[error("key rotation already in progress for vault {0}")]
	RotationAlreadyInProgress(uuid::Uuid),

	#[error("no key rotation in progress for vault {0}")]
	NoRotationInProgress(uuid::Uuid),

	#[error("no previous key material while rotation is in progress for vault {0}")]
	MissingPreviousKey(uuid::Uuid),

	#[error("invalid key length: expected {expected}, got {actual}")]
	InvalidKeyLength { expected: usize, actual: usize },

	#[error("invalid IV length: expected {expected}, got {actual}")]
	InvalidIvLength { expected: usize, actual: usize },

	#[error("TPM unavailable: {0}")]
	TpmUnavailable(String),

	#[error("corrupt sealed key blob: {0}")]
	CorruptSealedBlob(String),

	#[error("invalid base32 input")]
	InvalidBase32,

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
