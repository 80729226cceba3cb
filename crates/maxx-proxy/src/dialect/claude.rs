//! Claude "Messages" wire dialect. Wire shapes mirror the teacher's
//! `llm::anthropic::types` module; parse/render functions normalize to/from
//! the canonical `CanonicalRequest`/`CanonicalResponse` (§3.2, Design Notes §9).

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
	BlockKind, CanonicalRequest, CanonicalResponse, Part, Role, SamplingConfig, StopReason, Tool,
	Turn, UsageDelta,
};
use crate::convert::state::TransformState;
use crate::error::ProxyError;
use crate::sse::SseEvent;

pub const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Copy, Clone, Deserialize, Serialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WireRole {
	#[default]
	User,
	Assistant,
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentBlock {
	Text { text: String },
	Thinking { thinking: String, signature: Option<String> },
	Image { source: ImageSource },
	#[serde(rename = "tool_use")]
	ToolUse { id: String, name: String, input: Value },
	#[serde(rename = "tool_result")]
	ToolResult { tool_use_id: String, content: String },
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
pub struct ImageSource {
	#[serde(rename = "type")]
	pub kind: String,
	pub media_type: String,
	pub data: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
	pub role: WireRole,
	pub content: Vec<ContentBlock>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct WireTool {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: Value,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct MessagesRequest {
	pub messages: Vec<Message>,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub system: String,
	pub model: String,
	pub max_tokens: u64,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
	#[serde(default)]
	pub stream: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_k: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<WireTool>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Usage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_read_input_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cache_creation_input_tokens: Option<u64>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireStopReason {
	EndTurn,
	MaxTokens,
	StopSequence,
	ToolUse,
}

impl From<WireStopReason> for StopReason {
	fn from(v: WireStopReason) -> Self {
		match v {
			WireStopReason::EndTurn | WireStopReason::StopSequence => StopReason::EndOfTurn,
			WireStopReason::MaxTokens => StopReason::MaxTokens,
			WireStopReason::ToolUse => StopReason::ToolUse,
		}
	}
}

fn render_stop_reason(r: StopReason) -> WireStopReason {
	match r {
		StopReason::EndOfTurn | StopReason::Other => WireStopReason::EndTurn,
		StopReason::MaxTokens => WireStopReason::MaxTokens,
		StopReason::ToolUse => WireStopReason::ToolUse,
	}
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MessagesResponse {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub role: WireRole,
	pub content: Vec<ContentBlock>,
	pub model: String,
	pub stop_reason: Option<WireStopReason>,
	pub stop_sequence: Option<String>,
	pub usage: Usage,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MessagesStreamEvent {
	MessageStart { message: MessagesResponse },
	ContentBlockStart { index: usize, content_block: ContentBlock },
	ContentBlockDelta { index: usize, delta: ContentBlockDelta },
	ContentBlockStop { index: usize },
	MessageDelta { delta: MessageDelta, usage: MessageDeltaUsage },
	MessageStop,
	Ping,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentBlockDelta {
	TextDelta { text: String },
	InputJsonDelta { partial_json: String },
	ThinkingDelta { thinking: String },
	SignatureDelta { signature: String },
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct MessageDelta {
	pub stop_reason: Option<WireStopReason>,
	pub stop_sequence: Option<String>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default)]
pub struct MessageDeltaUsage {
	#[serde(default)]
	pub output_tokens: u64,
}

#[derive(Clone, Deserialize, Debug)]
pub struct MessagesErrorResponse {
	#[serde(rename = "type")]
	pub kind: String,
	pub error: MessagesError,
}

#[derive(Clone, Deserialize, Debug)]
pub struct MessagesError {
	#[serde(rename = "type")]
	pub kind: String,
	pub message: String,
}

pub fn parse_request(body: &[u8]) -> Result<CanonicalRequest, ProxyError> {
	let req: MessagesRequest =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;

	let turns = req
		.messages
		.into_iter()
		.map(|m| Turn {
			role: match m.role {
				WireRole::User => Role::User,
				WireRole::Assistant => Role::Assistant,
			},
			content: m.content.into_iter().filter_map(block_to_part).collect(),
		})
		.collect();

	Ok(CanonicalRequest {
		model: req.model,
		system: if req.system.is_empty() { None } else { Some(req.system) },
		turns,
		sampling: SamplingConfig {
			max_tokens: Some(req.max_tokens),
			temperature: req.temperature,
			top_p: req.top_p,
			top_k: req.top_k,
			stop_sequences: req.stop_sequences,
		},
		tools: req
			.tools
			.into_iter()
			.map(|t| Tool { name: t.name, description: t.description, json_schema: t.input_schema })
			.collect(),
		stream: req.stream,
	})
}

fn block_to_part(block: ContentBlock) -> Option<Part> {
	match block {
		ContentBlock::Text { text } => Some(Part::Text(text)),
		ContentBlock::Thinking { thinking, signature } => {
			Some(Part::Thinking { text: thinking, signature })
		},
		ContentBlock::ToolUse { id, name, input } => Some(Part::ToolCall {
			id,
			name,
			arguments_json: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
		}),
		ContentBlock::ToolResult { tool_use_id, content } => {
			Some(Part::ToolResult { tool_call_id: tool_use_id, output: content })
		},
		ContentBlock::Image { source } => base64::engine::general_purpose::STANDARD
			.decode(source.data)
			.ok()
			.map(|bytes| Part::InlineData { mime: source.media_type, bytes }),
	}
}

fn part_to_block(part: &Part) -> Option<ContentBlock> {
	match part {
		Part::Text(t) => Some(ContentBlock::Text { text: t.clone() }),
		Part::Thinking { text, signature } => {
			Some(ContentBlock::Thinking { thinking: text.clone(), signature: signature.clone() })
		},
		Part::ToolCall { id, name, arguments_json } => Some(ContentBlock::ToolUse {
			id: id.clone(),
			name: name.clone(),
			input: serde_json::from_str(arguments_json).unwrap_or(Value::Null),
		}),
		Part::ToolResult { tool_call_id, output } => {
			Some(ContentBlock::ToolResult { tool_use_id: tool_call_id.clone(), content: output.clone() })
		},
		Part::InlineData { mime, bytes } => Some(ContentBlock::Image {
			source: ImageSource {
				kind: "base64".to_string(),
				media_type: mime.clone(),
				data: base64::engine::general_purpose::STANDARD.encode(bytes),
			},
		}),
	}
}

/// Render a canonical request as a Claude `MessagesRequest` body.
///
/// `max_tokens` is required on the wire; when the source never set one we
/// fall back to `DEFAULT_MAX_TOKENS` (an Open Question resolution, see
/// DESIGN.md).
pub fn render_request(canon: &CanonicalRequest) -> Value {
	let messages: Vec<Message> = canon
		.turns
		.iter()
		.filter(|t| t.role != Role::System)
		.map(|t| Message {
			role: match t.role {
				Role::Assistant => WireRole::Assistant,
				_ => WireRole::User,
			},
			content: t.content.iter().filter_map(part_to_block).collect(),
		})
		.collect();

	let req = MessagesRequest {
		messages,
		system: canon.system.clone().unwrap_or_default(),
		model: canon.model.clone(),
		max_tokens: canon.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
		stop_sequences: canon.sampling.stop_sequences.clone(),
		stream: canon.stream,
		temperature: canon.sampling.temperature,
		top_p: canon.sampling.top_p,
		top_k: canon.sampling.top_k,
		tools: canon
			.tools
			.iter()
			.map(|t| WireTool {
				name: t.name.clone(),
				description: t.description.clone(),
				input_schema: t.json_schema.clone(),
			})
			.collect(),
	};
	serde_json::to_value(req).unwrap_or(Value::Null)
}

pub fn parse_response(body: &[u8]) -> Result<CanonicalResponse, ProxyError> {
	let resp: MessagesResponse =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;
	let content = resp.content.into_iter().filter_map(block_to_part).collect();
	Ok(CanonicalResponse {
		id: resp.id,
		model: resp.model,
		turn: Turn { role: Role::Assistant, content },
		stop_reason: resp.stop_reason.map(StopReason::from).unwrap_or(StopReason::Other),
		usage: UsageDelta {
			input_tokens: Some(resp.usage.input_tokens),
			output_tokens: Some(resp.usage.output_tokens),
			cache_read_tokens: resp.usage.cache_read_input_tokens,
			cache_5m_write_tokens: resp.usage.cache_creation_input_tokens,
			cache_1h_write_tokens: None,
		},
	})
}

pub fn render_response(canon: &CanonicalResponse) -> Value {
	let resp = MessagesResponse {
		id: canon.id.clone(),
		kind: "message".to_string(),
		role: WireRole::Assistant,
		content: canon.turn.content.iter().filter_map(part_to_block).collect(),
		model: canon.model.clone(),
		stop_reason: Some(render_stop_reason(canon.stop_reason)),
		stop_sequence: None,
		usage: Usage {
			input_tokens: canon.usage.input_tokens.unwrap_or_default(),
			output_tokens: canon.usage.output_tokens.unwrap_or_default(),
			cache_read_input_tokens: canon.usage.cache_read_tokens,
			cache_creation_input_tokens: canon.usage.cache_5m_write_tokens,
		},
	};
	serde_json::to_value(resp).unwrap_or(Value::Null)
}

/// Parse one Claude SSE event into zero or more canonical stream events,
/// updating the *source*-side bookkeeping in `state` (tool-call buffers,
/// message id discovery) as specified in §4.4.
pub fn parse_stream_event(
	event: &SseEvent,
	state: &mut TransformState,
) -> Vec<super::StreamEvent> {
	use super::StreamEvent as SE;
	let Some(json) = event.json() else {
		return if event.is_done() { vec![] } else { vec![] };
	};
	let wire: MessagesStreamEvent = match serde_json::from_value(json.clone()) {
		Ok(w) => w,
		Err(_) => {
			tracing::debug!("dropping unknown claude stream event");
			return vec![];
		},
	};

	match wire {
		MessagesStreamEvent::MessageStart { message } => {
			state.message_id.get_or_insert_with(|| message.id.clone());
			let mut out = vec![SE::StartMessage { id: Some(message.id), model: Some(message.model) }];
			if message.usage.input_tokens > 0 {
				out.push(SE::UsageDelta(super::UsageDelta {
					input_tokens: Some(message.usage.input_tokens),
					..Default::default()
				}));
			}
			out
		},
		MessagesStreamEvent::ContentBlockStart { index, content_block } => {
			let kind = match &content_block {
				ContentBlock::Text { .. } => BlockKind::Text,
				ContentBlock::Thinking { .. } => BlockKind::Thinking,
				ContentBlock::ToolUse { .. } => BlockKind::ToolUse,
				_ => BlockKind::Text,
			};
			if let ContentBlock::ToolUse { id, name, .. } = &content_block {
				state.tool_calls.insert(index, crate::convert::state::ToolCallBuffer {
					id: id.clone(),
					name: name.clone(),
					args_buffer: String::new(),
				});
			}
			vec![SE::StartBlock { index, kind }]
		},
		MessagesStreamEvent::ContentBlockDelta { index, delta } => match delta {
			ContentBlockDelta::TextDelta { text } => vec![SE::TextDelta { index, text }],
			ContentBlockDelta::ThinkingDelta { thinking } => {
				vec![SE::ThinkingDelta { index, text: thinking }]
			},
			ContentBlockDelta::InputJsonDelta { partial_json } => {
				if let Some(tc) = state.tool_calls.get_mut(&index) {
					tc.args_buffer.push_str(&partial_json);
				}
				vec![SE::ToolArgsDelta { index, fragment: partial_json }]
			},
			ContentBlockDelta::SignatureDelta { .. } => vec![],
		},
		MessagesStreamEvent::ContentBlockStop { index } => vec![SE::StopBlock { index }],
		MessagesStreamEvent::MessageDelta { delta, usage } => {
			let mut out = vec![SE::UsageDelta(super::UsageDelta {
				output_tokens: Some(usage.output_tokens),
				..Default::default()
			})];
			if let Some(reason) = delta.stop_reason {
				out.push(SE::StopMessage { reason: reason.into() });
			}
			out
		},
		MessagesStreamEvent::MessageStop => vec![SE::Terminate],
		MessagesStreamEvent::Ping => vec![],
	}
}

/// Render one canonical stream event as Claude SSE bytes, updating the
/// *destination*-side bookkeeping (first-event obligations, open block
/// tracking) in `state`.
pub fn render_stream_event(event: &super::StreamEvent, state: &mut TransformState) -> Vec<u8> {
	use super::StreamEvent as SE;
	match event {
		SE::StartMessage { id, model } => {
			let id = state.message_id_or_synthesize(id.clone(), "msg");
			let message = MessagesResponse {
				id,
				kind: "message".to_string(),
				role: WireRole::Assistant,
				content: vec![],
				model: model.clone().unwrap_or_default(),
				stop_reason: None,
				stop_sequence: None,
				usage: Usage {
					input_tokens: state.usage.input_tokens.unwrap_or_default(),
					output_tokens: 0,
					cache_read_input_tokens: None,
					cache_creation_input_tokens: None,
				},
			};
			let payload = serde_json::to_value(MessagesStreamEvent::MessageStart { message }).unwrap();
			crate::sse::format("message_start", &payload)
		},
		SE::StartBlock { index, kind } => {
			state.current_index = *index;
			state.current_block_kind = Some(*kind);
			let content_block = match kind {
				BlockKind::Text => ContentBlock::Text { text: String::new() },
				BlockKind::Thinking => ContentBlock::Thinking { thinking: String::new(), signature: None },
				BlockKind::ToolUse => {
					let tc = state.tool_calls.get(index);
					ContentBlock::ToolUse {
						id: tc.map(|t| t.id.clone()).unwrap_or_default(),
						name: tc.map(|t| t.name.clone()).unwrap_or_default(),
						input: Value::Object(Default::default()),
					}
				},
			};
			let payload = serde_json::to_value(MessagesStreamEvent::ContentBlockStart {
				index: *index,
				content_block,
			})
			.unwrap();
			crate::sse::format("content_block_start", &payload)
		},
		SE::TextDelta { index, text } => {
			let payload = serde_json::to_value(MessagesStreamEvent::ContentBlockDelta {
				index: *index,
				delta: ContentBlockDelta::TextDelta { text: text.clone() },
			})
			.unwrap();
			crate::sse::format("content_block_delta", &payload)
		},
		SE::ThinkingDelta { index, text } => {
			let payload = serde_json::to_value(MessagesStreamEvent::ContentBlockDelta {
				index: *index,
				delta: ContentBlockDelta::ThinkingDelta { thinking: text.clone() },
			})
			.unwrap();
			crate::sse::format("content_block_delta", &payload)
		},
		SE::ToolArgsDelta { index, fragment } => {
			let payload = serde_json::to_value(MessagesStreamEvent::ContentBlockDelta {
				index: *index,
				delta: ContentBlockDelta::InputJsonDelta { partial_json: fragment.clone() },
			})
			.unwrap();
			crate::sse::format("content_block_delta", &payload)
		},
		SE::StopBlock { index } => {
			let payload =
				serde_json::to_value(MessagesStreamEvent::ContentBlockStop { index: *index }).unwrap();
			crate::sse::format("content_block_stop", &payload)
		},
		SE::UsageDelta(delta) => {
			state.apply_usage(*delta);
			vec![]
		},
		SE::StopMessage { reason } => {
			state.stop_reason = Some(*reason);
			let payload = serde_json::to_value(MessagesStreamEvent::MessageDelta {
				delta: MessageDelta { stop_reason: Some(render_stop_reason(*reason)), stop_sequence: None },
				usage: MessageDeltaUsage { output_tokens: state.usage.output_tokens.unwrap_or_default() },
			})
			.unwrap();
			crate::sse::format("message_delta", &payload)
		},
		SE::Terminate => {
			let payload = serde_json::to_value(MessagesStreamEvent::MessageStop).unwrap();
			crate::sse::format("message_stop", &payload)
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_minimal_request() {
		let body = br#"{"model":"claude-sonnet-4-5","messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}],"max_tokens":16}"#;
		let canon = parse_request(body).unwrap();
		assert_eq!(canon.model, "claude-sonnet-4-5");
		assert_eq!(canon.turns.len(), 1);
		assert_eq!(canon.turns[0].text(), "hi");
		assert_eq!(canon.sampling.max_tokens, Some(16));
	}

	#[test]
	fn render_request_defaults_max_tokens_when_absent() {
		let canon = CanonicalRequest { model: "m".into(), ..Default::default() };
		let body = render_request(&canon);
		assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
	}
}
