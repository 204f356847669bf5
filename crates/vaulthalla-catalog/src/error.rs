use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("vault {0} not found")]
	VaultNotFound(Uuid),
	#[error("entry not found: {0}")]
	EntryNotFound(String),
	#[error("parent directory not found for {0}")]
	ParentNotFound(String),
	#[error("path {path} already exists in vault {vault_id}")]
	Conflict { vault_id: Uuid, path: String },
	#[error("api key {0} not found")]
	ApiKeyNotFound(Uuid),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
