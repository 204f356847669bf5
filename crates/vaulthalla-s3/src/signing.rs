//! AWS SigV4 request signing, implemented against the published algorithm
//! rather than adapted from a corpus example — nothing in the pack signs
//! outbound S3 requests, only serves them (see DESIGN.md).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone)]
pub struct Credentials {
	pub access_key: String,
	pub secret_key: String,
	pub region: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(bytes);
	hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
	mac.update(data);
	mac.finalize().into_bytes().to_vec()
}

fn canonical_uri(path: &str) -> String {
	if path.is_empty() {
		return "/".to_string();
	}
	path.split('/').map(urlencoding::encode).collect::<Vec<_>>().join("/")
}

fn canonical_query_string(query_pairs: &[(String, String)]) -> String {
	let mut pairs: Vec<(String, String)> = query_pairs
		.iter()
		.map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
		.collect();
	pairs.sort();
	pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

/// A request's signable shape: already-lowercased header names are assumed.
pub struct SignableRequest<'a> {
	pub method: &'a str,
	pub canonical_path: &'a str,
	pub query_pairs: &'a [(String, String)],
	/// (lowercase header name, value), must include `host`.
	pub headers: &'a [(String, String)],
	pub payload_sha256: &'a str,
}

/// Produces the `Authorization` header value plus the `x-amz-date` value
/// that must accompany it.
pub fn sign(creds: &Credentials, req: &SignableRequest, now: DateTime<Utc>) -> (String, String) {
	let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
	let date_stamp = now.format("%Y%m%d").to_string();

	let mut sorted_headers: Vec<(String, String)> = req.headers.to_vec();
	sorted_headers.sort_by(|a, b| a.0.cmp(&b.0));
	let canonical_headers: String = sorted_headers
		.iter()
		.map(|(k, v)| format!("{k}:{}\n", v.trim()))
		.collect();
	let signed_headers = sorted_headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");

	let canonical_request = format!(
		"{}\n{}\n{}\n{}\n{}\n{}",
		req.method,
		canonical_uri(req.canonical_path),
		canonical_query_string(req.query_pairs),
		canonical_headers,
		signed_headers,
		req.payload_sha256
	);

	let credential_scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", creds.region);
	let string_to_sign = format!(
		"{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
		sha256_hex(canonical_request.as_bytes())
	);

	let k_date = hmac_sha256(format!("AWS4{}", creds.secret_key).as_bytes(), date_stamp.as_bytes());
	let k_region = hmac_sha256(&k_date, creds.region.as_bytes());
	let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
	let k_signing = hmac_sha256(&k_service, b"aws4_request");
	let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

	let authorization = format!(
		"{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
		creds.access_key
	);

	(authorization, amz_date)
}

pub fn payload_sha256(body: &[u8]) -> String {
	sha256_hex(body)
}

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn canonical_uri_preserves_slashes() {
		assert_eq!(canonical_uri("/my bucket/a b.txt"), "/my%20bucket/a%20b.txt");
	}

	#[test]
	fn signing_is_deterministic_for_fixed_time() {
		let creds = Credentials {
			access_key: "AKID".into(),
			secret_key: "SECRET".into(),
			region: "us-east-1".into(),
		};
		let headers = vec![
			("host".to_string(), "bucket.s3.amazonaws.com".to_string()),
			("x-amz-content-sha256".to_string(), payload_sha256(b"hello")),
		];
		let req = SignableRequest {
			method: "PUT",
			canonical_path: "/key.txt",
			query_pairs: &[],
			headers: &headers,
			payload_sha256: &payload_sha256(b"hello"),
		};
		let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let (auth_a, date_a) = sign(&creds, &req, now);
		let (auth_b, date_b) = sign(&creds, &req, now);
		assert_eq!(auth_a, auth_b);
		assert_eq!(date_a, date_b);
		assert!(auth_a.starts_with("AWS4-HMAC-SHA256 Credential=AKID/20240101/us-east-1/s3/aws4_request"));
	}

	#[test]
	fn different_payloads_change_signature() {
		let creds = Credentials {
			access_key: "AKID".into(),
			secret_key: "SECRET".into(),
			region: "us-east-1".into(),
		};
		let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let make = |body: &[u8]| {
			let headers = vec![("host".to_string(), "h".to_string())];
			let hash = payload_sha256(body);
			let req = SignableRequest {
				method: "PUT",
				canonical_path: "/k",
				query_pairs: &[],
				headers: &headers,
				payload_sha256: &hash,
			};
			sign(&creds, &req, now).0
		};
		assert_ne!(make(b"a"), make(b"b"));
	}
}
