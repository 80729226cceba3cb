//! OpenAI Responses API wire dialect (`/v1/responses`, used by Codex-style
//! clients). Distinct from `openai.rs`'s Chat Completions shape: turns are
//! carried as an `input` array of typed items rather than a flat message
//! list, and the assistant's output is an `output` array of the same kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
	BlockKind, CanonicalRequest, CanonicalResponse, Part, Role, SamplingConfig, StopReason, Tool,
	Turn, UsageDelta,
};
use crate::convert::state::TransformState;
use crate::error::ProxyError;
use crate::sse::SseEvent;

#[derive(Clone, Copy, Deserialize, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireRole {
	#[default]
	User,
	Assistant,
	System,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentItem {
	InputText { text: String },
	OutputText { text: String },
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum InputItem {
	Message { role: WireRole, content: Vec<ContentItem> },
	Reasoning { summary: Vec<ContentItem> },
	FunctionCall { call_id: String, name: String, arguments: String },
	FunctionCallOutput { call_id: String, output: String },
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct WireFunctionTool {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub parameters: Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum WireTool {
	Function(WireFunctionTool),
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct ResponsesRequest {
	pub model: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instructions: Option<String>,
	pub input: Vec<InputItem>,
	#[serde(default)]
	pub stream: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<WireTool>,
	/// Identifies the prior turn this request continues. We never originate
	/// server-side conversation state (§9 open question ii), so this is
	/// honored only as an opaque passthrough field on the first hop.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub previous_response_id: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct InputTokensDetails {
	#[serde(default)]
	pub cached_tokens: u64,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct ResponsesUsage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(default)]
	pub input_tokens_details: InputTokensDetails,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum OutputItem {
	Message { role: WireRole, content: Vec<ContentItem> },
	Reasoning { summary: Vec<ContentItem> },
	FunctionCall { call_id: String, name: String, arguments: String },
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ResponsesResponse {
	pub id: String,
	pub model: String,
	pub status: String,
	pub output: Vec<OutputItem>,
	#[serde(default)]
	pub usage: ResponsesUsage,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResponsesStreamEvent {
	#[serde(rename = "response.created")]
	Created { response: ResponsesResponse },
	#[serde(rename = "response.output_item.added")]
	OutputItemAdded { output_index: usize, item: OutputItem },
	#[serde(rename = "response.output_text.delta")]
	OutputTextDelta { output_index: usize, delta: String },
	#[serde(rename = "response.function_call_arguments.delta")]
	FunctionCallArgumentsDelta { output_index: usize, delta: String },
	#[serde(rename = "response.output_item.done")]
	OutputItemDone { output_index: usize, item: OutputItem },
	#[serde(rename = "response.completed")]
	Completed { response: ResponsesResponse },
	#[serde(rename = "response.incomplete")]
	Incomplete { response: ResponsesResponse },
}

pub fn parse_request(body: &[u8]) -> Result<CanonicalRequest, ProxyError> {
	let req: ResponsesRequest =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;

	let mut turns = Vec::new();
	for item in req.input {
		match item {
			InputItem::Message { role, content } => {
				let text = content
					.into_iter()
					.map(|c| match c {
						ContentItem::InputText { text } | ContentItem::OutputText { text } => text,
					})
					.collect::<Vec<_>>()
					.join("");
				turns.push(Turn {
					role: match role {
						WireRole::Assistant => Role::Assistant,
						WireRole::System => Role::System,
						WireRole::User => Role::User,
					},
					content: vec![Part::Text(text)],
				});
			},
			InputItem::Reasoning { .. } => {},
			InputItem::FunctionCall { call_id, name, arguments } => {
				turns.push(Turn {
					role: Role::Assistant,
					content: vec![Part::ToolCall { id: call_id, name, arguments_json: arguments }],
				});
			},
			InputItem::FunctionCallOutput { call_id, output } => {
				turns.push(Turn {
					role: Role::Tool,
					content: vec![Part::ToolResult { tool_call_id: call_id, output }],
				});
			},
		}
	}

	Ok(CanonicalRequest {
		model: req.model,
		system: req.instructions,
		turns,
		sampling: SamplingConfig {
			max_tokens: req.max_output_tokens,
			temperature: req.temperature,
			top_p: req.top_p,
			top_k: None,
			stop_sequences: Vec::new(),
		},
		tools: req
			.tools
			.into_iter()
			.map(|t| match t {
				WireTool::Function(f) => Tool { name: f.name, description: f.description, json_schema: f.parameters },
			})
			.collect(),
		stream: req.stream,
	})
}

pub fn render_request(canon: &CanonicalRequest) -> Value {
	let mut input = Vec::new();
	for turn in &canon.turns {
		for part in &turn.content {
			match part {
				Part::Text(t) => input.push(InputItem::Message {
					role: match turn.role {
						Role::Assistant => WireRole::Assistant,
						Role::System => WireRole::System,
						_ => WireRole::User,
					},
					content: vec![if turn.role == Role::Assistant {
						ContentItem::OutputText { text: t.clone() }
					} else {
						ContentItem::InputText { text: t.clone() }
					}],
				}),
				Part::ToolCall { id, name, arguments_json } => input.push(InputItem::FunctionCall {
					call_id: id.clone(),
					name: name.clone(),
					arguments: arguments_json.clone(),
				}),
				Part::ToolResult { tool_call_id, output } => {
					input.push(InputItem::FunctionCallOutput { call_id: tool_call_id.clone(), output: output.clone() })
				},
				Part::Thinking { .. } | Part::InlineData { .. } => {},
			}
		}
	}

	let req = ResponsesRequest {
		model: canon.model.clone(),
		instructions: canon.system.clone(),
		input,
		stream: canon.stream,
		max_output_tokens: canon.sampling.max_tokens,
		temperature: canon.sampling.temperature,
		top_p: canon.sampling.top_p,
		tools: canon
			.tools
			.iter()
			.map(|t| {
				WireTool::Function(WireFunctionTool {
					name: t.name.clone(),
					description: t.description.clone(),
					parameters: t.json_schema.clone(),
				})
			})
			.collect(),
		previous_response_id: None,
	};
	serde_json::to_value(req).unwrap_or(Value::Null)
}

fn status_to_stop_reason(status: &str) -> StopReason {
	StopReason::from_codex(status)
}

pub fn parse_response(body: &[u8]) -> Result<CanonicalResponse, ProxyError> {
	let resp: ResponsesResponse =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;
	let mut content = Vec::new();
	for item in &resp.output {
		match item {
			OutputItem::Message { content: c, .. } => {
				for item in c {
					if let ContentItem::OutputText { text } | ContentItem::InputText { text } = item {
						content.push(Part::Text(text.clone()));
					}
				}
			},
			OutputItem::FunctionCall { call_id, name, arguments } => {
				content.push(Part::ToolCall {
					id: call_id.clone(),
					name: name.clone(),
					arguments_json: arguments.clone(),
				});
			},
			OutputItem::Reasoning { .. } => {},
		}
	}
	Ok(CanonicalResponse {
		id: resp.id.clone(),
		model: resp.model.clone(),
		turn: Turn { role: Role::Assistant, content },
		stop_reason: status_to_stop_reason(&resp.status),
		usage: UsageDelta {
			input_tokens: Some(resp.usage.input_tokens),
			output_tokens: Some(resp.usage.output_tokens),
			cache_read_tokens: Some(resp.usage.input_tokens_details.cached_tokens),
			cache_5m_write_tokens: None,
			cache_1h_write_tokens: None,
		},
	})
}

pub fn render_response(canon: &CanonicalResponse) -> Value {
	let mut output = Vec::new();
	let mut text = String::new();
	for part in &canon.turn.content {
		match part {
			Part::Text(t) => text.push_str(t),
			Part::ToolCall { id, name, arguments_json } => output.push(OutputItem::FunctionCall {
				call_id: id.clone(),
				name: name.clone(),
				arguments: arguments_json.clone(),
			}),
			_ => {},
		}
	}
	if !text.is_empty() {
		output.insert(
			0,
			OutputItem::Message { role: WireRole::Assistant, content: vec![ContentItem::OutputText { text }] },
		);
	}
	let status = match canon.stop_reason {
		StopReason::MaxTokens => "incomplete",
		_ => "completed",
	};
	let resp = ResponsesResponse {
		id: canon.id.clone(),
		model: canon.model.clone(),
		status: status.to_string(),
		output,
		usage: ResponsesUsage {
			input_tokens: canon.usage.input_tokens.unwrap_or_default(),
			output_tokens: canon.usage.output_tokens.unwrap_or_default(),
			input_tokens_details: InputTokensDetails {
				cached_tokens: canon.usage.cache_read_tokens.unwrap_or_default(),
			},
		},
	};
	serde_json::to_value(resp).unwrap_or(Value::Null)
}

pub fn parse_stream_event(
	event: &SseEvent,
	state: &mut TransformState,
) -> Vec<super::StreamEvent> {
	use super::StreamEvent as SE;
	let Some(json) = event.json() else { return vec![] };
	let wire: ResponsesStreamEvent = match serde_json::from_value(json.clone()) {
		Ok(w) => w,
		Err(_) => {
			tracing::debug!("dropping unknown codex stream event");
			return vec![];
		},
	};

	match wire {
		ResponsesStreamEvent::Created { response } => {
			state.message_id.get_or_insert_with(|| response.id.clone());
			vec![
				SE::StartMessage { id: Some(response.id), model: Some(response.model) },
				SE::StartBlock { index: 0, kind: BlockKind::Text },
			]
		},
		ResponsesStreamEvent::OutputItemAdded { output_index, item } => match item {
			OutputItem::FunctionCall { call_id, name, .. } => {
				let index = output_index + 1;
				state.tool_calls.insert(index, crate::convert::state::ToolCallBuffer {
					id: call_id,
					name,
					args_buffer: String::new(),
				});
				vec![SE::StartBlock { index, kind: BlockKind::ToolUse }]
			},
			_ => vec![],
		},
		ResponsesStreamEvent::OutputTextDelta { delta, .. } => vec![SE::TextDelta { index: 0, text: delta }],
		ResponsesStreamEvent::FunctionCallArgumentsDelta { output_index, delta } => {
			let index = output_index + 1;
			if let Some(tc) = state.tool_calls.get_mut(&index) {
				tc.args_buffer.push_str(&delta);
			}
			vec![SE::ToolArgsDelta { index, fragment: delta }]
		},
		ResponsesStreamEvent::OutputItemDone { output_index, .. } => {
			vec![SE::StopBlock { index: output_index + 1 }]
		},
		ResponsesStreamEvent::Completed { response } | ResponsesStreamEvent::Incomplete { response } => {
			vec![
				SE::UsageDelta(UsageDelta {
					input_tokens: Some(response.usage.input_tokens),
					output_tokens: Some(response.usage.output_tokens),
					cache_read_tokens: Some(response.usage.input_tokens_details.cached_tokens),
					cache_5m_write_tokens: None,
					cache_1h_write_tokens: None,
				}),
				SE::StopMessage { reason: status_to_stop_reason(&response.status) },
				SE::Terminate,
			]
		},
	}
}

pub fn render_stream_event(event: &super::StreamEvent, state: &mut TransformState) -> Vec<u8> {
	use super::StreamEvent as SE;
	match event {
		SE::StartMessage { id, model } => {
			let id = state.message_id_or_synthesize(id.clone(), "resp");
			let response = ResponsesResponse {
				id,
				model: model.clone().unwrap_or_default(),
				status: "in_progress".to_string(),
				output: vec![],
				usage: ResponsesUsage::default(),
			};
			let payload =
				serde_json::to_value(ResponsesStreamEvent::Created { response }).unwrap();
			crate::sse::format("response.created", &payload)
		},
		SE::StartBlock { index, kind } => {
			state.current_index = *index;
			state.current_block_kind = Some(*kind);
			let item = match kind {
				BlockKind::ToolUse => {
					let tc = state.tool_calls.get(index).cloned().unwrap_or_default();
					OutputItem::FunctionCall { call_id: tc.id, name: tc.name, arguments: String::new() }
				},
				_ => OutputItem::Message { role: WireRole::Assistant, content: vec![] },
			};
			let payload = serde_json::to_value(ResponsesStreamEvent::OutputItemAdded {
				output_index: index.saturating_sub(if *index > 0 { 1 } else { 0 }),
				item,
			})
			.unwrap();
			crate::sse::format("response.output_item.added", &payload)
		},
		SE::TextDelta { index, text } => {
			let payload = serde_json::to_value(ResponsesStreamEvent::OutputTextDelta {
				output_index: *index,
				delta: text.clone(),
			})
			.unwrap();
			crate::sse::format("response.output_text.delta", &payload)
		},
		SE::ThinkingDelta { .. } => vec![],
		SE::ToolArgsDelta { index, fragment } => {
			let payload = serde_json::to_value(ResponsesStreamEvent::FunctionCallArgumentsDelta {
				output_index: index.saturating_sub(1),
				delta: fragment.clone(),
			})
			.unwrap();
			crate::sse::format("response.function_call_arguments.delta", &payload)
		},
		SE::StopBlock { index } => {
			let item = OutputItem::Message { role: WireRole::Assistant, content: vec![] };
			let payload = serde_json::to_value(ResponsesStreamEvent::OutputItemDone {
				output_index: index.saturating_sub(if *index > 0 { 1 } else { 0 }),
				item,
			})
			.unwrap();
			crate::sse::format("response.output_item.done", &payload)
		},
		SE::UsageDelta(delta) => {
			state.apply_usage(*delta);
			vec![]
		},
		SE::StopMessage { reason } => {
			state.stop_reason = Some(*reason);
			vec![]
		},
		SE::Terminate => {
			let status = match state.stop_reason {
				Some(StopReason::MaxTokens) => "incomplete",
				_ => "completed",
			};
			let response = ResponsesResponse {
				id: state.message_id.clone().unwrap_or_default(),
				model: String::new(),
				status: status.to_string(),
				output: vec![],
				usage: ResponsesUsage {
					input_tokens: state.usage.input_tokens.unwrap_or_default(),
					output_tokens: state.usage.output_tokens.unwrap_or_default(),
					input_tokens_details: InputTokensDetails {
						cached_tokens: state.usage.cache_read_tokens.unwrap_or_default(),
					},
				},
			};
			let event = if status == "incomplete" {
				ResponsesStreamEvent::Incomplete { response }
			} else {
				ResponsesStreamEvent::Completed { response }
			};
			let name = if status == "incomplete" { "response.incomplete" } else { "response.completed" };
			let mut out = crate::sse::format(name, &serde_json::to_value(event).unwrap());
			out.extend_from_slice(crate::sse::format_done());
			out
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_function_call_output_as_tool_result() {
		let body = br#"{"model":"gpt-5-codex","input":[{"type":"function_call_output","call_id":"c1","output":"ok"}]}"#;
		let canon = parse_request(body).unwrap();
		assert_eq!(
			canon.turns[0].content[0],
			Part::ToolResult { tool_call_id: "c1".to_string(), output: "ok".to_string() }
		);
	}

	#[test]
	fn incomplete_status_maps_to_max_tokens() {
		assert_eq!(status_to_stop_reason("incomplete"), StopReason::MaxTokens);
		assert_eq!(status_to_stop_reason("completed"), StopReason::EndOfTurn);
	}

	#[test]
	fn terminate_event_ends_with_done_frame() {
		let mut state = TransformState::new();
		let out = render_stream_event(&crate::dialect::StreamEvent::Terminate, &mut state);
		let text = String::from_utf8(out).unwrap();
		assert!(text.ends_with("data: [DONE]\n\n"));
	}
}
