//! Protocol converter (C3): transforms a request/response/stream chunk from
//! one wire dialect to another by routing it through the canonical shape
//! every dialect module already parses into and renders out of (§4.2,
//! Design Notes §9 — "a registry of per-pair transformers" collapses to one
//! parser plus one renderer per dialect instead of 12 bespoke pairs).

pub mod state;

use serde_json::Value;

use crate::dialect::{CanonicalRequest, CanonicalResponse, Dialect, StreamEvent};
use crate::error::ProxyError;
use crate::sse::SseEvent;
use state::TransformState;

pub fn need_convert(from: Dialect, to: Dialect) -> bool {
	from != to
}

struct DialectOps {
	parse_request: fn(&[u8]) -> Result<CanonicalRequest, ProxyError>,
	render_request: fn(&CanonicalRequest) -> Value,
	parse_response: fn(&[u8]) -> Result<CanonicalResponse, ProxyError>,
	render_response: fn(&CanonicalResponse) -> Value,
	parse_stream_event: fn(&SseEvent, &mut TransformState) -> Vec<StreamEvent>,
	render_stream_event: fn(&StreamEvent, &mut TransformState) -> Vec<u8>,
}

fn ops(dialect: Dialect) -> DialectOps {
	use crate::dialect::{claude, codex, gemini, openai};
	match dialect {
		Dialect::Claude => DialectOps {
			parse_request: claude::parse_request,
			render_request: claude::render_request,
			parse_response: claude::parse_response,
			render_response: claude::render_response,
			parse_stream_event: claude::parse_stream_event,
			render_stream_event: claude::render_stream_event,
		},
		Dialect::OpenAI => DialectOps {
			parse_request: openai::parse_request,
			render_request: openai::render_request,
			parse_response: openai::parse_response,
			render_response: openai::render_response,
			parse_stream_event: openai::parse_stream_event,
			render_stream_event: openai::render_stream_event,
		},
		Dialect::Codex => DialectOps {
			parse_request: codex::parse_request,
			render_request: codex::render_request,
			parse_response: codex::parse_response,
			render_response: codex::render_response,
			parse_stream_event: codex::parse_stream_event,
			render_stream_event: codex::render_stream_event,
		},
		Dialect::Gemini => DialectOps {
			parse_request: gemini::parse_request,
			render_request: gemini::render_request,
			parse_response: gemini::parse_response,
			render_response: gemini::render_response,
			parse_stream_event: gemini::parse_stream_event,
			render_stream_event: gemini::render_stream_event,
		},
	}
}

/// Text prepended to the system instruction of a request that started life
/// as Claude and is being rendered onto the Gemini wire, per Design Notes §9
/// rule 7 ("identity-guard preamble"). Gemini has no native concept of
/// Claude's persona framing, so callers relying on it need the model told
/// explicitly what it's pretending to be.
fn identity_guard_preamble(target_model: &str) -> String {
	format!(
		"--- [IDENTITY_PATCH] ---\nYou are {target_model}. Respond as this model would, without mentioning the underlying provider.\n--- [SYSTEM_PROMPT_END] ---"
	)
}

pub fn transform_request(from: Dialect, to: Dialect, body: &[u8]) -> Result<Value, ProxyError> {
	if !need_convert(from, to) {
		return serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()));
	}
	let from_ops = ops(from);
	let to_ops = ops(to);
	let mut canon = (from_ops.parse_request)(body)?;
	if from == Dialect::Claude && to == Dialect::Gemini {
		let preamble = identity_guard_preamble(&canon.model);
		canon.system = Some(match canon.system.take() {
			Some(existing) if !existing.is_empty() => format!("{preamble}\n\n{existing}"),
			_ => preamble,
		});
	}
	Ok((to_ops.render_request)(&canon))
}

pub fn transform_response(from: Dialect, to: Dialect, body: &[u8]) -> Result<Value, ProxyError> {
	if !need_convert(from, to) {
		return serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()));
	}
	let canon = (ops(from).parse_response)(body)?;
	Ok((ops(to).render_response)(&canon))
}

/// Translate one upstream SSE event into zero or more destination-dialect
/// SSE frames, threading accumulation state through `state`.
pub fn transform_stream_chunk(
	from: Dialect,
	to: Dialect,
	event: &SseEvent,
	state: &mut TransformState,
) -> Vec<u8> {
	let from_ops = ops(from);
	let to_ops = ops(to);
	let canonical_events = (from_ops.parse_stream_event)(event, state);
	let mut out = Vec::new();
	for ce in canonical_events {
		out.extend((to_ops.render_stream_event)(&ce, state));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn claude_to_openai_request_round_trips_model_and_text() {
		let body = br#"{"model":"claude-sonnet-4-5","messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}],"max_tokens":32}"#;
		let out = transform_request(Dialect::Claude, Dialect::OpenAI, body).unwrap();
		assert_eq!(out["model"], "claude-sonnet-4-5");
		assert_eq!(out["messages"][0]["role"], "user");
		assert_eq!(out["messages"][0]["content"], "hi");
	}

	#[test]
	fn claude_to_gemini_request_gets_identity_guard_preamble() {
		let body = br#"{"model":"gemini-2.5-pro","system":"Be terse.","messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}],"max_tokens":32}"#;
		let out = transform_request(Dialect::Claude, Dialect::Gemini, body).unwrap();
		let system = out["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
		assert!(system.contains("gemini-2.5-pro"));
		assert!(system.contains("Be terse."));
	}

	#[test]
	fn openai_to_claude_request_skips_preamble() {
		let body = br#"{"model":"claude-sonnet-4-5","messages":[{"role":"user","content":"hi"}]}"#;
		let out = transform_request(Dialect::OpenAI, Dialect::Claude, body).unwrap();
		assert_eq!(out["system"], Value::Null);
	}

	#[test]
	fn same_dialect_request_passes_through_unparsed() {
		let body = br#"{"anything":"goes"}"#;
		let out = transform_request(Dialect::Claude, Dialect::Claude, body).unwrap();
		assert_eq!(out, json!({"anything": "goes"}));
	}

	#[test]
	fn gemini_response_tool_call_round_trips_to_openai() {
		let body = br#"{"candidates":[{"content":{"role":"model","parts":[{"functionCall":{"name":"get_weather_call_1","args":{"city":"nyc"}}}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":4}}"#;
		let out = transform_response(Dialect::Gemini, Dialect::OpenAI, body).unwrap();
		let call = &out["choices"][0]["message"]["tool_calls"][0];
		assert_eq!(call["id"], "call_1");
		assert_eq!(call["function"]["name"], "get_weather");
	}
}
