use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
	#[error("quota exceeded: need {need} bytes, {available} available")]
	QuotaExceeded { need: u64, available: u64 },
	#[error("insufficient disk space: need {need} bytes, {available} available")]
	InsufficientDiskSpace { need: u64, available: u64 },
	#[error("{0} requires a cloud-backed vault")]
	NotCloud(&'static str),
	#[error("{0} has no file metadata")]
	NoFileMeta(String),
	#[error(transparent)]
	Fs(#[from] vaulthalla_fs::FsError),
	#[error(transparent)]
	Catalog(#[from] vaulthalla_catalog::CatalogError),
	#[error(transparent)]
	Crypto(#[from] vaulthalla_crypto::CryptoError),
	#[error(transparent)]
	S3(#[from] vaulthalla_s3::S3Error),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
