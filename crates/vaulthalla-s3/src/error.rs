use thiserror::Error;

#[derive(Error, Debug)]
pub enum S3Error {
	#[error("object {0} not found")]
	NotFound(String),
	#[error("upstream returned {status}: {body}")]
	Upstream { status: u16, body: String },
	#[error("multipart upload {0} failed: {1}")]
	MultipartFailed(String, String),
	#[error("response body could not be parsed: {0}")]
	MalformedResponse(String),
	#[error(transparent)]
	Http(#[from] reqwest::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, S3Error>;
