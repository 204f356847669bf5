use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
	#[error("path {0} is not under the declared root")]
	OutOfRoot(String),
	#[error("parent directory not found for {0}")]
	ParentNotFound(String),
	#[error("cross-vault copy is not supported")]
	CrossVaultCopyUnsupported,
	#[error("{0} is a directory, expected a file")]
	NotAFile(String),
	#[error("{0} is a file, expected a directory")]
	NotADirectory(String),
	#[error(transparent)]
	Catalog(#[from] vaulthalla_catalog::CatalogError),
	#[error(transparent)]
	Crypto(#[from] vaulthalla_crypto::CryptoError),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
