//! Vaulthalla's object metadata keys, carried as `x-amz-meta-*` headers so
//! any S3-compatible provider round-trips them untouched.

use std::collections::HashMap;

pub const META_ENCRYPTED: &str = "x-amz-meta-vh-encrypted";
pub const META_IV: &str = "x-amz-meta-vh-iv";
pub const META_KEY_VERSION: &str = "x-amz-meta-vh-key-version";
pub const META_CONTENT_HASH: &str = "x-amz-meta-content-hash";

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
	pub encrypted: bool,
	pub iv_base64: Option<String>,
	pub key_version: Option<u32>,
	pub content_hash: Option<String>,
}

impl ObjectMetadata {
	pub fn to_headers(&self) -> Vec<(String, String)> {
		let mut headers = vec![(META_ENCRYPTED.to_string(), self.encrypted.to_string())];
		if let Some(iv) = &self.iv_base64 {
			headers.push((META_IV.to_string(), iv.clone()));
		}
		if let Some(version) = self.key_version {
			headers.push((META_KEY_VERSION.to_string(), version.to_string()));
		}
		if let Some(hash) = &self.content_hash {
			headers.push((META_CONTENT_HASH.to_string(), hash.clone()));
		}
		headers
	}

	pub fn from_headers(headers: &HashMap<String, String>) -> Self {
		Self {
			encrypted: headers.get(META_ENCRYPTED).map(|v| v == "true").unwrap_or(false),
			iv_base64: headers.get(META_IV).cloned(),
			key_version: headers.get(META_KEY_VERSION).and_then(|v| v.parse().ok()),
			content_hash: headers.get(META_CONTENT_HASH).cloned(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_headers() {
		let meta = ObjectMetadata {
			encrypted: true,
			iv_base64: Some("aXY=".into()),
			key_version: Some(3),
			content_hash: Some("deadbeef".into()),
		};
		let headers: HashMap<String, String> = meta.to_headers().into_iter().collect();
		let parsed = ObjectMetadata::from_headers(&headers);
		assert!(parsed.encrypted);
		assert_eq!(parsed.key_version, Some(3));
		assert_eq!(parsed.content_hash.as_deref(), Some("deadbeef"));
	}

	#[test]
	fn missing_headers_default_to_unencrypted() {
		let parsed = ObjectMetadata::from_headers(&HashMap::new());
		assert!(!parsed.encrypted);
		assert!(parsed.iv_base64.is_none());
	}
}
