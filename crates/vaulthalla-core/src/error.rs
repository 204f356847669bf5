use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
	#[error("config invalid: {0}")]
	InvalidConfig(String),
	#[error("permission denied: caller lacks {needed} on vault {vault_id}")]
	PermissionDenied { vault_id: uuid::Uuid, needed: &'static str },
	#[error("vault {0} has no running sync task")]
	NoSyncTask(uuid::Uuid),
	#[error(transparent)]
	Catalog(#[from] vaulthalla_catalog::CatalogError),
	#[error(transparent)]
	Crypto(#[from] vaulthalla_crypto::CryptoError),
	#[error(transparent)]
	Fs(#[from] vaulthalla_fs::FsError),
	#[error(transparent)]
	Storage(#[from] vaulthalla_storage::StorageError),
	#[error(transparent)]
	Sync(#[from] vaulthalla_sync::SyncError),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
