//! S3-compatible object storage client (the remote half of C9): SigV4
//! request signing, single and multipart upload, download, delete, and
//! prefix listing.

pub mod client;
pub mod error;
pub mod metadata;
pub mod signing;

pub use client::{ObjectSummary, S3Client, S3Config, MIN_PART_SIZE};
pub use error::{Result, S3Error};
pub use metadata::ObjectMetadata;
