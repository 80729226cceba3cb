//! SSE codec (C1). Parses text/event-stream frames out of an accumulated
//! text buffer with partial-line carry-over, and formats frames for
//! emission. Shared by every converter's response-transformer (C4).
//!
//! Grounded in the teacher's `parse::sse` module (invoked as
//! `parse::sse::json_transform` from `llm::anthropic::Provider::process_streaming`)
//! and in the pack's `SseParser`/`SseEvent` incremental-feed pattern
//! (`sse-streaming.rs`).

use serde_json::Value;

/// The JSON-decoded payload of one SSE frame, or the sentinel for `[DONE]`.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
	Json(Value),
	Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
	pub name: Option<String>,
	pub data: SseData,
}

impl SseEvent {
	pub fn json(&self) -> Option<&Value> {
		match &self.data {
			SseData::Json(v) => Some(v),
			SseData::Done => None,
		}
	}

	pub fn is_done(&self) -> bool {
		matches!(self.data, SseData::Done)
	}
}

/// Parse as many complete events as are present in `accumulated`, returning
/// them in order plus whatever trailing partial event text remains. The
/// caller must prepend `leftover` to the next chunk before calling again
/// (invariant 4 / testable property "partial-line idempotence", §8.1).
pub fn parse(accumulated: &str) -> (Vec<SseEvent>, String) {
	let mut parts: Vec<&str> = accumulated.split("\n\n").collect();
	let leftover = parts.pop().unwrap_or("").to_string();

	let mut events = Vec::with_capacity(parts.len());
	for block in parts {
		if let Some(event) = parse_event_block(block) {
			events.push(event);
		}
	}
	(events, leftover)
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
	let mut name: Option<String> = None;
	let mut data_lines: Vec<&str> = Vec::new();

	for raw_line in block.split('\n') {
		let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
		if let Some(rest) = line.strip_prefix("event:") {
			name = Some(rest.trim_start().to_string());
		} else if let Some(rest) = line.strip_prefix("data:") {
			data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
		}
		// other fields (id:, retry:, comments starting with ':') are ignored.
	}

	if name.is_none() && data_lines.is_empty() {
		return None;
	}

	let data = data_lines.join("\n");
	if data.trim() == "[DONE]" {
		return Some(SseEvent {
			name: Some("done".to_string()),
			data: SseData::Done,
		});
	}
	if data.is_empty() {
		return name.map(|name| SseEvent {
			name: Some(name),
			data: SseData::Json(Value::Null),
		});
	}
	match serde_json::from_str::<Value>(&data) {
		Ok(v) => Some(SseEvent { name, data: SseData::Json(v) }),
		// §4.1: events whose data is not valid JSON are silently dropped.
		Err(_) => None,
	}
}

/// Format one SSE frame with a JSON payload.
pub fn format(event_name: &str, payload: &Value) -> Vec<u8> {
	format_raw(event_name, payload.to_string().as_bytes())
}

/// Format one SSE frame whose payload is already serialized JSON bytes.
pub fn format_raw(event_name: &str, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + event_name.len() + 16);
	if !event_name.is_empty() {
		out.extend_from_slice(b"event: ");
		out.extend_from_slice(event_name.as_bytes());
		out.push(b'\n');
	}
	out.extend_from_slice(b"data: ");
	out.extend_from_slice(payload);
	out.extend_from_slice(b"\n\n");
	out
}

pub fn format_done() -> &'static [u8] {
	b"data: [DONE]\n\n"
}

/// True iff the first non-blank line starts with `event:` or `data:`.
pub fn is_sse(text: &str) -> bool {
	for line in text.split('\n') {
		let line = line.trim_end_matches('\r');
		if line.is_empty() {
			continue;
		}
		return line.starts_with("event:") || line.starts_with("data:");
	}
	false
}

/// Incremental wrapper around [`parse`] for callers that receive bytes in
/// arbitrary chunks (the dispatcher's upstream read loop, §4.7g).
#[derive(Default)]
pub struct SseParser {
	buffer: String,
}

impl SseParser {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
		self.buffer.push_str(&String::from_utf8_lossy(chunk));
		let (events, leftover) = parse(&self.buffer);
		self.buffer = leftover;
		events
	}

	/// Parse whatever remains in the buffer at stream end. A stream-end
	/// without a trailing blank line is incomplete per the spec and yields
	/// nothing further; this exists purely for symmetry with callers that
	/// want to be explicit about end-of-stream.
	pub fn flush(&mut self) -> Vec<SseEvent> {
		Vec::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_sse_prefix() {
		assert!(is_sse("event: message_start\ndata: {}\n\n"));
		assert!(is_sse("data: {}\n\n"));
		assert!(!is_sse("{\"foo\":1}"));
		assert!(is_sse("\n\ndata: {}\n\n"));
	}

	#[test]
	fn parses_single_event() {
		let (events, leftover) = parse("event: message_start\ndata: {\"t\":1}\n\n");
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].name.as_deref(), Some("message_start"));
		assert_eq!(events[0].json(), Some(&serde_json::json!({"t": 1})));
		assert_eq!(leftover, "");
	}

	#[test]
	fn partial_line_is_carried_over() {
		// §8.2 scenario 4
		let mut parser = SseParser::new();
		let first = parser.feed(b"event: m");
		assert!(first.is_empty());
		let second = parser.feed(b"essage_start\ndata: {\"t\":1}\n\n");
		assert_eq!(second.len(), 1);
		assert_eq!(second[0].name.as_deref(), Some("message_start"));
		assert_eq!(parser.buffer, "");
	}

	#[test]
	fn multiline_data_is_joined() {
		let (events, _) = parse("data: {\"a\":\ndata: 1}\n\n");
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].json(), Some(&serde_json::json!({"a": 1})));
	}

	#[test]
	fn done_sentinel_is_recognized() {
		let (events, _) = parse("data: [DONE]\n\n");
		assert_eq!(events.len(), 1);
		assert!(events[0].is_done());
		assert_eq!(events[0].name.as_deref(), Some("done"));
	}

	#[test]
	fn invalid_json_is_dropped_silently() {
		let (events, leftover) = parse("data: not json\n\ndata: {\"ok\":true}\n\n");
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].json(), Some(&serde_json::json!({"ok": true})));
		assert_eq!(leftover, "");
	}

	#[test]
	fn partial_line_idempotence_at_any_boundary() {
		let whole = "event: message_start\ndata: {\"t\":1}\n\nevent: content_block_delta\ndata: {\"t\":2}\n\n";
		let whole_events = parse(whole).0;

		for split_at in 0..whole.len() {
			let (a, b) = whole.split_at(split_at);
			let mut parser = SseParser::new();
			let mut collected = parser.feed(a.as_bytes());
			collected.extend(parser.feed(b.as_bytes()));
			assert_eq!(collected, whole_events, "mismatch splitting at {split_at}");
		}
	}
}
