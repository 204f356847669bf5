//! Per-vault storage engine: the local disk engine (C8) and its cloud
//! extension (C9), composed as one [`StorageEngine`] tagged by
//! [`StorageKind`] rather than as a subclass pair.

pub mod cloud;
pub mod engine;
pub mod error;

pub use engine::{CloudState, StorageEngine, StorageKind, MIN_FREE_SPACE};
pub use error::{Result, StorageError};
