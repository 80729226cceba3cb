//! Client adapter (C5): classify an inbound HTTP request into one of the
//! four wire dialects, extract the model name, and derive a deterministic
//! session fingerprint (§4.5).

use sha2::{Digest, Sha256};
use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::ProxyError;

/// §4.5 step 1: URL-prefix classification. Checked before body inspection.
pub fn classify_by_path(path: &str) -> Option<Dialect> {
	if path.ends_with("/v1/messages") {
		Some(Dialect::Claude)
	} else if path.ends_with("/v1/chat/completions") {
		Some(Dialect::OpenAI)
	} else if path.ends_with("/v1/responses") {
		Some(Dialect::Codex)
	} else if path.contains("/v1beta/models/") || path.contains("/v1internal/models/") {
		Some(Dialect::Gemini)
	} else {
		None
	}
}

/// §4.5 step 2: fallback classification from the decoded JSON body shape,
/// used only when the path gives no signal (e.g. a project-slug-prefixed
/// generic endpoint).
pub fn classify_by_body(body: &Value) -> Option<Dialect> {
	let obj = body.as_object()?;
	if obj.contains_key("contents") && !obj.contains_key("request") {
		return Some(Dialect::Gemini);
	}
	if obj.contains_key("request") {
		return Some(Dialect::Gemini);
	}
	if obj.contains_key("input") {
		return Some(Dialect::Codex);
	}
	if obj.contains_key("messages") {
		return Some(if obj.contains_key("system") { Dialect::Claude } else { Dialect::OpenAI });
	}
	None
}

pub fn classify(path: &str, body: &Value) -> Result<Dialect, ProxyError> {
	classify_by_path(path).or_else(|| classify_by_body(body)).ok_or(ProxyError::DialectUnknown)
}

/// §4.5 "Model extraction": Gemini takes the model out of the URL path
/// (`/v1beta/models/{model}:generateContent`); every other dialect reads
/// `body.model`.
pub fn extract_model(dialect: Dialect, path: &str, body: &Value) -> Option<String> {
	if dialect == Dialect::Gemini {
		let after_models = path.split("/models/").nth(1)?;
		let model = after_models.split(':').next()?;
		if !model.is_empty() {
			return Some(model.to_string());
		}
	}
	body.get("model").and_then(Value::as_str).map(str::to_string)
}

pub fn extract_stream_flag(body: &Value) -> bool {
	body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

pub struct FingerprintInputs<'a> {
	pub authorization: Option<&'a str>,
	pub api_key_header: Option<&'a str>,
	pub user_agent: Option<&'a str>,
	pub client_ip: &'a str,
}

/// §4.5 "Session fingerprint", precedence: body metadata, then header, then
/// a derived hash of connection-identifying headers. Only the third form is
/// computed here; the caller checks the first two before falling back.
pub fn derive_fingerprint(inputs: &FingerprintInputs) -> String {
	let mut hasher = Sha256::new();
	hasher.update(inputs.authorization.unwrap_or("").as_bytes());
	hasher.update(inputs.api_key_header.unwrap_or("").as_bytes());
	hasher.update(inputs.user_agent.unwrap_or("").as_bytes());
	hasher.update(inputs.client_ip.as_bytes());
	let digest = hasher.finalize();
	format!("session-{}", hex::encode(&digest[..8]))
}

pub fn session_fingerprint(body: &Value, session_id_header: Option<&str>, inputs: &FingerprintInputs) -> String {
	if let Some(id) = body.pointer("/metadata/session_id").and_then(Value::as_str) {
		return id.to_string();
	}
	if let Some(id) = session_id_header {
		return id.to_string();
	}
	derive_fingerprint(inputs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn path_classification_takes_priority() {
		assert_eq!(classify_by_path("/v1/messages"), Some(Dialect::Claude));
		assert_eq!(classify_by_path("/acme-corp/v1/chat/completions"), Some(Dialect::OpenAI));
		assert_eq!(classify_by_path("/v1beta/models/gemini-2.5-pro:generateContent"), Some(Dialect::Gemini));
	}

	#[test]
	fn body_shape_distinguishes_claude_from_openai() {
		let claude = json!({"messages": [], "system": "x"});
		let openai = json!({"messages": []});
		assert_eq!(classify_by_body(&claude), Some(Dialect::Claude));
		assert_eq!(classify_by_body(&openai), Some(Dialect::OpenAI));
	}

	#[test]
	fn gemini_model_extracted_from_url() {
		let body = json!({});
		let model = extract_model(Dialect::Gemini, "/v1beta/models/gemini-2.5-pro:streamGenerateContent", &body);
		assert_eq!(model.as_deref(), Some("gemini-2.5-pro"));
	}

	#[test]
	fn fingerprint_is_deterministic_for_identical_inputs() {
		let inputs = FingerprintInputs {
			authorization: Some("Bearer abc"),
			api_key_header: None,
			user_agent: Some("curl/8.0"),
			client_ip: "10.0.0.1",
		};
		let a = derive_fingerprint(&inputs);
		let b = derive_fingerprint(&inputs);
		assert_eq!(a, b);
		assert!(a.starts_with("session-"));
	}

	#[test]
	fn body_session_id_takes_precedence_over_header_and_derivation() {
		let body = json!({"metadata": {"session_id": "sess-explicit"}});
		let inputs = FingerprintInputs {
			authorization: None,
			api_key_header: None,
			user_agent: None,
			client_ip: "127.0.0.1",
		};
		let fp = session_fingerprint(&body, Some("sess-header"), &inputs);
		assert_eq!(fp, "sess-explicit");
	}
}
