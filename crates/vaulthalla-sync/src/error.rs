use uuid::Uuid;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
	#[error("insufficient disk space for sync: need {need} bytes, {available} available")]
	InsufficientDiskSpace { need: u64, available: u64 },
	#[error("sync task for vault {0} was interrupted")]
	Interrupted(Uuid),
	#[error("no previous key during rotation for vault {0}")]
	NoPreviousKey(Uuid),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Storage(#[from] vaulthalla_storage::StorageError),
	#[error(transparent)]
	Catalog(#[from] vaulthalla_catalog::CatalogError),
	#[error(transparent)]
	Crypto(#[from] vaulthalla_crypto::CryptoError),
	#[error(transparent)]
	Fs(#[from] vaulthalla_fs::FsError),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
