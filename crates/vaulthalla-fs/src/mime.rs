//! Magic-byte MIME sniffing (supplemented feature): sniffs the first bytes
//! of plaintext rather than trusting the mount-visible extension alone,
//! falling back to extension-based guessing when sniffing is inconclusive.

fn guess_from_extension(name: &str) -> Option<&'static str> {
	let ext = name.rsplit('.').next()?.to_ascii_lowercase();
	Some(match ext.as_str() {
		"txt" => "text/plain",
		"md" => "text/markdown",
		"json" => "application/json",
		"html" | "htm" => "text/html",
		"csv" => "text/csv",
		"pdf" => "application/pdf",
		"zip" => "application/zip",
		_ => return None,
	})
}

pub fn sniff_mime_type(plaintext: &[u8], file_name: &str) -> Option<String> {
	if let Some(kind) = infer::get(plaintext) {
		return Some(kind.mime_type().to_string());
	}
	guess_from_extension(file_name).map(str::to_string)
}
