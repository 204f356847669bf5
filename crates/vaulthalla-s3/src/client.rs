//! S3-compatible object client (C9's remote half): single-shot and
//! multipart upload, download, delete, and prefix listing, all driven
//! through the SigV4 signer in [`crate::signing`].

use std::collections::HashMap;

use chrono::Utc;
use quick_xml::de::from_str;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{Result, S3Error};
use crate::metadata::ObjectMetadata;
use crate::signing::{self, Credentials, SignableRequest};

/// Requests larger than this are split into parts via the multipart API.
/// AWS requires every part but the last to be at least 5 MiB.
pub const MIN_PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct S3Config {
	pub endpoint: String,
	pub bucket: String,
	pub region: String,
	pub access_key: String,
	pub secret_key: String,
	/// Path-style addressing (`endpoint/bucket/key`) vs virtual-hosted
	/// (`bucket.endpoint/key`). Most self-hosted/MinIO deployments require
	/// path-style; AWS itself accepts both.
	pub path_style: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
	pub key: String,
	pub size: u64,
	pub etag: String,
}

pub struct S3Client {
	http: reqwest::Client,
	config: S3Config,
	creds: Credentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
	#[serde(default, rename = "Contents")]
	contents: Vec<ListedObject>,
	#[serde(default)]
	is_truncated: bool,
	#[serde(default)]
	next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
	key: String,
	size: u64,
	#[serde(default)]
	e_tag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
	upload_id: String,
}

impl S3Client {
	pub fn new(config: S3Config) -> Self {
		let creds = Credentials {
			access_key: config.access_key.clone(),
			secret_key: config.secret_key.clone(),
			region: config.region.clone(),
		};
		Self {
			http: reqwest::Client::new(),
			config,
			creds,
		}
	}

	fn host(&self) -> String {
		let stripped = self.config.endpoint.trim_start_matches("https://").trim_start_matches("http://");
		if self.config.path_style {
			stripped.to_string()
		} else {
			format!("{}.{}", self.config.bucket, stripped)
		}
	}

	fn object_url(&self, key: &str) -> (String, String) {
		let scheme = if self.config.endpoint.starts_with("http://") { "http" } else { "https" };
		let host = self.host();
		if self.config.path_style {
			let path = format!("/{}/{key}", self.config.bucket);
			(format!("{scheme}://{host}{path}"), path)
		} else {
			let path = format!("/{key}");
			(format!("{scheme}://{host}{path}"), path)
		}
	}

	#[instrument(skip(self, body), fields(key, len = body.len()))]
	async fn signed_request(
		&self,
		method: Method,
		key: &str,
		query_pairs: &[(String, String)],
		body: Vec<u8>,
		extra_headers: Vec<(String, String)>,
	) -> Result<reqwest::Response> {
		let (url, path) = self.object_url(key);
		let payload_hash = signing::payload_sha256(&body);
		let now = Utc::now();

		let mut headers = vec![
			("host".to_string(), self.host()),
			("x-amz-content-sha256".to_string(), payload_hash.clone()),
		];
		headers.extend(extra_headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())));

		let req = SignableRequest {
			method: method.as_str(),
			canonical_path: &path,
			query_pairs,
			headers: &headers,
			payload_sha256: &payload_hash,
		};
		let (authorization, amz_date) = signing::sign(&self.creds, &req, now);

		let mut builder = self
			.http
			.request(method, &url)
			.header("x-amz-date", &amz_date)
			.header("x-amz-content-sha256", &payload_hash)
			.header("authorization", &authorization);
		for (k, v) in &extra_headers {
			builder = builder.header(k, v);
		}
		if !query_pairs.is_empty() {
			builder = builder.query(query_pairs);
		}
		if !body.is_empty() {
			builder = builder.body(body);
		}

		let response = builder.send().await?;
		Ok(response)
	}

	async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
		if response.status().is_success() {
			Ok(response)
		} else {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			if status == StatusCode::NOT_FOUND {
				return Err(S3Error::NotFound(body));
			}
			Err(S3Error::Upstream { status: status.as_u16(), body })
		}
	}

	/// Uploads `body` under `key`, transparently switching to multipart for
	/// anything at or above [`MIN_PART_SIZE`].
	pub async fn upload_object(&self, key: &str, body: Vec<u8>, meta: &ObjectMetadata) -> Result<()> {
		if body.len() >= MIN_PART_SIZE {
			self.upload_multipart(key, body, meta).await
		} else {
			self.put_single(key, body, meta).await
		}
	}

	async fn put_single(&self, key: &str, body: Vec<u8>, meta: &ObjectMetadata) -> Result<()> {
		let response = self.signed_request(Method::PUT, key, &[], body, meta.to_headers()).await?;
		Self::check_status(response).await?;
		Ok(())
	}

	async fn upload_multipart(&self, key: &str, body: Vec<u8>, meta: &ObjectMetadata) -> Result<()> {
		let upload_id = self.initiate_multipart_upload(key, meta).await?;
		let mut parts = Vec::new();

		let result: Result<()> = async {
			for (index, chunk) in body.chunks(MIN_PART_SIZE).enumerate() {
				let part_number = (index + 1) as u32;
				let etag = self.upload_part(key, &upload_id, part_number, chunk.to_vec()).await?;
				parts.push((part_number, etag));
			}
			Ok(())
		}
		.await;

		match result {
			Ok(()) => self.complete_multipart_upload(key, &upload_id, parts).await,
			Err(e) => {
				warn!(%upload_id, error = %e, "multipart upload failed, aborting");
				let _ = self.abort_multipart_upload(key, &upload_id).await;
				Err(S3Error::MultipartFailed(upload_id, e.to_string()))
			}
		}
	}

	async fn initiate_multipart_upload(&self, key: &str, meta: &ObjectMetadata) -> Result<String> {
		let response = self
			.signed_request(Method::POST, key, &[("uploads".to_string(), String::new())], Vec::new(), meta.to_headers())
			.await?;
		let response = Self::check_status(response).await?;
		let body = response.text().await?;
		let parsed: InitiateMultipartUploadResult =
			from_str(&body).map_err(|e| S3Error::MalformedResponse(e.to_string()))?;
		debug!(upload_id = %parsed.upload_id, "initiated multipart upload");
		Ok(parsed.upload_id)
	}

	async fn upload_part(&self, key: &str, upload_id: &str, part_number: u32, chunk: Vec<u8>) -> Result<String> {
		let query = vec![
			("partNumber".to_string(), part_number.to_string()),
			("uploadId".to_string(), upload_id.to_string()),
		];
		let response = self.signed_request(Method::PUT, key, &query, chunk, Vec::new()).await?;
		let response = Self::check_status(response).await?;
		let etag = response
			.headers()
			.get("etag")
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default()
			.trim_matches('"')
			.to_string();
		Ok(etag)
	}

	async fn complete_multipart_upload(&self, key: &str, upload_id: &str, parts: Vec<(u32, String)>) -> Result<()> {
		let mut body = String::from("<CompleteMultipartUpload>");
		for (part_number, etag) in &parts {
			body.push_str(&format!("<Part><PartNumber>{part_number}</PartNumber><ETag>\"{etag}\"</ETag></Part>"));
		}
		body.push_str("</CompleteMultipartUpload>");

		let query = vec![("uploadId".to_string(), upload_id.to_string())];
		let response = self.signed_request(Method::POST, key, &query, body.into_bytes(), Vec::new()).await?;
		Self::check_status(response).await?;
		Ok(())
	}

	async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
		let query = vec![("uploadId".to_string(), upload_id.to_string())];
		let response = self.signed_request(Method::DELETE, key, &query, Vec::new(), Vec::new()).await?;
		Self::check_status(response).await?;
		Ok(())
	}

	pub async fn download_object(&self, key: &str) -> Result<(Vec<u8>, ObjectMetadata)> {
		let response = self.signed_request(Method::GET, key, &[], Vec::new(), Vec::new()).await?;
		let response = Self::check_status(response).await?;
		let meta = Self::metadata_from_response(&response);
		let bytes = response.bytes().await?.to_vec();
		Ok((bytes, meta))
	}

	pub async fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
		let response = self.signed_request(Method::HEAD, key, &[], Vec::new(), Vec::new()).await?;
		let response = Self::check_status(response).await?;
		Ok(Self::metadata_from_response(&response))
	}

	fn metadata_from_response(response: &reqwest::Response) -> ObjectMetadata {
		let headers: HashMap<String, String> = response
			.headers()
			.iter()
			.filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
			.collect();
		ObjectMetadata::from_headers(&headers)
	}

	pub async fn delete_object(&self, key: &str) -> Result<()> {
		let response = self.signed_request(Method::DELETE, key, &[], Vec::new(), Vec::new()).await?;
		Self::check_status(response).await?;
		Ok(())
	}

	/// Pages through every object under `prefix`, following continuation
	/// tokens until the bucket reports it is no longer truncated.
	pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
		let mut out = Vec::new();
		let mut token: Option<String> = None;

		loop {
			let mut query = vec![
				("list-type".to_string(), "2".to_string()),
				("prefix".to_string(), prefix.to_string()),
			];
			if let Some(t) = &token {
				query.push(("continuation-token".to_string(), t.clone()));
			}

			let response = self.signed_request(Method::GET, "", &query, Vec::new(), Vec::new()).await?;
			let response = Self::check_status(response).await?;
			let body = response.text().await?;
			let parsed: ListBucketResult = from_str(&body).map_err(|e| S3Error::MalformedResponse(e.to_string()))?;

			out.extend(parsed.contents.into_iter().map(|o| ObjectSummary {
				key: o.key,
				size: o.size,
				etag: o.e_tag.trim_matches('"').to_string(),
			}));

			if parsed.is_truncated {
				token = parsed.next_continuation_token;
				if token.is_none() {
					break;
				}
			} else {
				break;
			}
		}

		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn client() -> S3Client {
		S3Client::new(S3Config {
			endpoint: "http://127.0.0.1:9000".into(),
			bucket: "vaults".into(),
			region: "us-east-1".into(),
			access_key: "AKID".into(),
			secret_key: "SECRET".into(),
			path_style: true,
		})
	}

	#[test]
	fn object_url_is_path_style() {
		let c = client();
		let (url, path) = c.object_url("a/b.txt");
		assert_eq!(url, "http://127.0.0.1:9000/vaults/a/b.txt");
		assert_eq!(path, "/vaults/a/b.txt");
	}

	#[test]
	fn virtual_hosted_style_moves_bucket_to_host() {
		let mut config = client().config;
		config.path_style = false;
		let c = S3Client::new(config);
		let (url, path) = c.object_url("a.txt");
		assert_eq!(url, "http://vaults.127.0.0.1:9000/a.txt");
		assert_eq!(path, "/a.txt");
	}
}
