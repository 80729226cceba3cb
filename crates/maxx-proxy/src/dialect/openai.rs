//! OpenAI Chat Completions wire dialect (`/v1/chat/completions`).

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
	System,
	#[default]
	User,
	Assistant,
	Tool,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct FunctionCall {
	pub name: String,
	pub arguments: String,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ToolCall {
	pub id: String,
	#[serde(rename = "type", default = "function_type")]
	pub kind: String,
	pub function: FunctionCall,
}

fn function_type() -> String {
	"function".to_string()
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct Message {
	pub role: WireRole,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ToolCall>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct WireFunction {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub parameters: Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct WireTool {
	#[serde(rename = "type", default = "function_type")]
	pub kind: String,
	pub function: WireFunction,
}

/// `stop` accepts either a bare string or an array of strings on the wire
/// (§4.3 rule 5); this normalizes both to the canonical `Vec<String>`.
#[derive(Clone, Deserialize, Serialize, Debug)]
#[serde(untagged)]
pub enum StopSequences {
	Single(String),
	Many(Vec<String>),
}

impl StopSequences {
	fn into_vec(self) -> Vec<String> {
		match self {
			StopSequences::Single(s) => vec![s],
			StopSequences::Many(v) => v,
		}
	}
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct ChatCompletionsRequest {
	pub model: String,
	pub messages: Vec<Message>,
	#[serde(default)]
	pub stream: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	/// Supersedes `max_tokens` on newer models (§4.3 rule 4); either
	/// field is accepted from a client, with this one taking precedence.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_completion_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<StopSequences>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<WireTool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream_options: Option<StreamOptions>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct StreamOptions {
	pub include_usage: bool,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct Usage {
	#[serde(default)]
	pub prompt_tokens: u64,
	#[serde(default)]
	pub completion_tokens: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Clone, Copy, Deserialize, Serialize, Debug, Default)]
pub struct PromptTokensDetails {
	#[serde(default)]
	pub cached_tokens: u64,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct Choice {
	pub index: u32,
	pub message: Message,
	pub finish_reason: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ChatCompletionsResponse {
	pub id: String,
	pub model: String,
	pub choices: Vec<Choice>,
	#[serde(default)]
	pub usage: Usage,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct DeltaToolCall {
	pub index: usize,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub function: Option<FunctionCallDelta>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct FunctionCallDelta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub arguments: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct Delta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ChunkChoice {
	pub index: u32,
	pub delta: Delta,
	pub finish_reason: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ChatCompletionChunk {
	pub id: String,
	pub model: String,
	pub choices: Vec<ChunkChoice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
}

pub fn parse_request(body: &[u8]) -> Result<CanonicalRequest, ProxyError> {
	let req: ChatCompletionsRequest =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;

	let mut system_parts = Vec::new();
	let mut turns = Vec::new();
	for m in req.messages {
		match m.role {
			WireRole::System => {
				if let Some(c) = m.content {
					system_parts.push(c);
				}
				continue;
			},
			_ => {},
		}
		let role = match m.role {
			WireRole::User => Role::User,
			WireRole::Assistant => Role::Assistant,
			WireRole::Tool => Role::Tool,
			WireRole::System => unreachable!(),
		};
		let mut content = Vec::new();
		if let Some(tool_call_id) = &m.tool_call_id {
			content.push(Part::ToolResult {
				tool_call_id: tool_call_id.clone(),
				output: m.content.clone().unwrap_or_default(),
			});
		} else if let Some(text) = m.content {
			if !text.is_empty() {
				content.push(Part::Text(text));
			}
		}
		if let Some(calls) = m.tool_calls {
			for call in calls {
				content.push(Part::ToolCall {
					id: call.id,
					name: call.function.name,
					arguments_json: call.function.arguments,
				});
			}
		}
		turns.push(Turn { role, content });
	}

	Ok(CanonicalRequest {
		model: req.model,
		system: if system_parts.is_empty() { None } else { Some(system_parts.join("\n")) },
		turns,
		sampling: SamplingConfig {
			max_tokens: req.max_completion_tokens.or(req.max_tokens),
			temperature: req.temperature,
			top_p: req.top_p,
			top_k: None,
			stop_sequences: req.stop.map(StopSequences::into_vec).unwrap_or_default(),
		},
		tools: req
			.tools
			.into_iter()
			.map(|t| Tool {
				name: t.function.name,
				description: t.function.description,
				json_schema: t.function.parameters,
			})
			.collect(),
		stream: req.stream,
	})
}

pub fn render_request(canon: &CanonicalRequest) -> Value {
	let mut messages = Vec::new();
	if let Some(system) = &canon.system {
		if !system.is_empty() {
			messages.push(Message {
				role: WireRole::System,
				content: Some(system.clone()),
				tool_calls: None,
				tool_call_id: None,
			});
		}
	}
	for turn in &canon.turns {
		let mut text = String::new();
		let mut tool_calls = Vec::new();
		let mut tool_result: Option<(String, String)> = None;
		for part in &turn.content {
			match part {
				Part::Text(t) => text.push_str(t),
				Part::ToolCall { id, name, arguments_json } => tool_calls.push(ToolCall {
					id: id.clone(),
					kind: "function".to_string(),
					function: FunctionCall { name: name.clone(), arguments: arguments_json.clone() },
				}),
				Part::ToolResult { tool_call_id, output } => {
					tool_result = Some((tool_call_id.clone(), output.clone()));
				},
				Part::Thinking { .. } | Part::InlineData { .. } => {},
			}
		}
		if let Some((tool_call_id, output)) = tool_result {
			messages.push(Message {
				role: WireRole::Tool,
				content: Some(output),
				tool_calls: None,
				tool_call_id: Some(tool_call_id),
			});
			continue;
		}
		messages.push(Message {
			role: match turn.role {
				Role::Assistant => WireRole::Assistant,
				Role::Tool => WireRole::Tool,
				_ => WireRole::User,
			},
			content: if text.is_empty() { None } else { Some(text) },
			tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
			tool_call_id: None,
		});
	}

	let req = ChatCompletionsRequest {
		model: canon.model.clone(),
		messages,
		stream: canon.stream,
		max_tokens: canon.sampling.max_tokens,
		max_completion_tokens: None,
		temperature: canon.sampling.temperature,
		top_p: canon.sampling.top_p,
		stop: if canon.sampling.stop_sequences.is_empty() {
			None
		} else {
			Some(StopSequences::Many(canon.sampling.stop_sequences.clone()))
		},
		tools: canon
			.tools
			.iter()
			.map(|t| WireTool {
				kind: "function".to_string(),
				function: WireFunction {
					name: t.name.clone(),
					description: t.description.clone(),
					parameters: t.json_schema.clone(),
				},
			})
			.collect(),
		stream_options: if canon.stream { Some(StreamOptions { include_usage: true }) } else { None },
	};
	serde_json::to_value(req).unwrap_or(Value::Null)
}

pub fn parse_response(body: &[u8]) -> Result<CanonicalResponse, ProxyError> {
	let resp: ChatCompletionsResponse =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;
	let choice = resp.choices.into_iter().next().ok_or(ProxyError::ConversionMalformed(
		"chat completion response had no choices".to_string(),
	))?;
	let mut content = Vec::new();
	if let Some(text) = choice.message.content {
		if !text.is_empty() {
			content.push(Part::Text(text));
		}
	}
	if let Some(calls) = choice.message.tool_calls {
		for call in calls {
			content.push(Part::ToolCall {
				id: call.id,
				name: call.function.name,
				arguments_json: call.function.arguments,
			});
		}
	}
	Ok(CanonicalResponse {
		id: resp.id,
		model: resp.model,
		turn: Turn { role: Role::Assistant, content },
		stop_reason: choice
			.finish_reason
			.as_deref()
			.map(StopReason::from_openai)
			.unwrap_or(StopReason::Other),
		usage: UsageDelta {
			input_tokens: Some(resp.usage.prompt_tokens),
			output_tokens: Some(resp.usage.completion_tokens),
			cache_read_tokens: resp.usage.prompt_tokens_details.map(|d| d.cached_tokens),
			cache_5m_write_tokens: None,
			cache_1h_write_tokens: None,
		},
	})
}

pub fn render_response(canon: &CanonicalResponse) -> Value {
	let mut text = String::new();
	let mut tool_calls = Vec::new();
	for part in &canon.turn.content {
		match part {
			Part::Text(t) => text.push_str(t),
			Part::ToolCall { id, name, arguments_json } => tool_calls.push(ToolCall {
				id: id.clone(),
				kind: "function".to_string(),
				function: FunctionCall { name: name.clone(), arguments: arguments_json.clone() },
			}),
			_ => {},
		}
	}
	let resp = ChatCompletionsResponse {
		id: canon.id.clone(),
		model: canon.model.clone(),
		choices: vec![Choice {
			index: 0,
			message: Message {
				role: WireRole::Assistant,
				content: if text.is_empty() { None } else { Some(text) },
				tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
				tool_call_id: None,
			},
			finish_reason: Some(canon.stop_reason.as_openai().to_string()),
		}],
		usage: Usage {
			prompt_tokens: canon.usage.input_tokens.unwrap_or_default(),
			completion_tokens: canon.usage.output_tokens.unwrap_or_default(),
			prompt_tokens_details: canon
				.usage
				.cache_read_tokens
				.map(|cached_tokens| PromptTokensDetails { cached_tokens }),
		},
	};
	serde_json::to_value(resp).unwrap_or(Value::Null)
}

pub fn parse_stream_event(
	event: &SseEvent,
	state: &mut TransformState,
) -> Vec<super::StreamEvent> {
	use super::StreamEvent as SE;
	if event.is_done() {
		return vec![SE::Terminate];
	}
	let Some(json) = event.json() else { return vec![] };
	let chunk: ChatCompletionChunk = match serde_json::from_value(json.clone()) {
		Ok(c) => c,
		Err(_) => {
			tracing::debug!("dropping unknown openai stream chunk");
			return vec![];
		},
	};

	let mut out = Vec::new();
	if state.message_id.is_none() {
		state.message_id = Some(chunk.id.clone());
		out.push(SE::StartMessage { id: Some(chunk.id.clone()), model: Some(chunk.model.clone()) });
		out.push(SE::StartBlock { index: 0, kind: BlockKind::Text });
	}

	for choice in &chunk.choices {
		if let Some(text) = &choice.delta.content {
			if !text.is_empty() {
				out.push(SE::TextDelta { index: 0, text: text.clone() });
			}
		}
		if let Some(calls) = &choice.delta.tool_calls {
			for call in calls {
				let index = call.index + 1;
				if let Some(id) = &call.id {
					let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
					state.tool_calls.insert(
						index,
						crate::convert::state::ToolCallBuffer {
							id: id.clone(),
							name: name.clone(),
							args_buffer: String::new(),
						},
					);
					out.push(SE::StartBlock { index, kind: BlockKind::ToolUse });
				}
				if let Some(fragment) = call.function.as_ref().and_then(|f| f.arguments.clone()) {
					if let Some(tc) = state.tool_calls.get_mut(&index) {
						tc.args_buffer.push_str(&fragment);
					}
					out.push(SE::ToolArgsDelta { index, fragment });
				}
			}
		}
		if let Some(reason) = &choice.finish_reason {
			out.push(SE::StopMessage { reason: StopReason::from_openai(reason) });
		}
	}
	if let Some(usage) = chunk.usage {
		state.set_usage(UsageDelta {
			input_tokens: Some(usage.prompt_tokens),
			output_tokens: Some(usage.completion_tokens),
			cache_read_tokens: usage.prompt_tokens_details.map(|d| d.cached_tokens),
			cache_5m_write_tokens: None,
			cache_1h_write_tokens: None,
		});
		out.push(SE::UsageDelta(state.usage));
	}
	out
}

pub fn render_stream_event(event: &super::StreamEvent, state: &mut TransformState) -> Vec<u8> {
	use super::StreamEvent as SE;
	match event {
		SE::StartMessage { id, model } => {
			let id = state.message_id_or_synthesize(id.clone(), "chatcmpl");
			let chunk = ChatCompletionChunk {
				id,
				model: model.clone().unwrap_or_default(),
				choices: vec![ChunkChoice {
					index: 0,
					delta: Delta { content: Some(String::new()), tool_calls: None },
					finish_reason: None,
				}],
				usage: None,
			};
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::StartBlock { index, kind } => {
			state.current_index = *index;
			state.current_block_kind = Some(*kind);
			if *kind != BlockKind::ToolUse {
				return vec![];
			}
			let tc = state.tool_calls.get(index).cloned().unwrap_or_default();
			let chunk = chunk_with_delta(
				state,
				Delta {
					content: None,
					tool_calls: Some(vec![DeltaToolCall {
						index: index.saturating_sub(1),
						id: Some(tc.id),
						function: Some(FunctionCallDelta { name: Some(tc.name), arguments: Some(String::new()) }),
					}]),
				},
				None,
			);
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::TextDelta { index: _, text } => {
			let chunk = chunk_with_delta(state, Delta { content: Some(text.clone()), tool_calls: None }, None);
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::ThinkingDelta { .. } => vec![],
		SE::ToolArgsDelta { index, fragment } => {
			let chunk = chunk_with_delta(
				state,
				Delta {
					content: None,
					tool_calls: Some(vec![DeltaToolCall {
						index: index.saturating_sub(1),
						id: None,
						function: Some(FunctionCallDelta { name: None, arguments: Some(fragment.clone()) }),
					}]),
				},
				None,
			);
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::StopBlock { .. } => vec![],
		SE::UsageDelta(delta) => {
			state.apply_usage(*delta);
			vec![]
		},
		SE::StopMessage { reason } => {
			state.stop_reason = Some(*reason);
			let chunk =
				chunk_with_delta(state, Delta { content: None, tool_calls: None }, Some(reason.as_openai()));
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::Terminate => crate::sse::format_done().to_vec(),
	}
}

fn chunk_with_delta(
	state: &TransformState,
	delta: Delta,
	finish_reason: Option<&str>,
) -> ChatCompletionChunk {
	ChatCompletionChunk {
		id: state.message_id.clone().unwrap_or_default(),
		model: String::new(),
		choices: vec![ChunkChoice { index: 0, delta, finish_reason: finish_reason.map(String::from) }],
		usage: None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn system_message_is_lifted_out_of_turns() {
		let body = br#"{"model":"gpt-4o","messages":[{"role":"system","content":"be nice"},{"role":"user","content":"hi"}]}"#;
		let canon = parse_request(body).unwrap();
		assert_eq!(canon.system.as_deref(), Some("be nice"));
		assert_eq!(canon.turns.len(), 1);
	}

	#[test]
	fn stop_accepts_both_scalar_and_array_forms() {
		let scalar = br#"{"model":"gpt-4o","messages":[],"stop":"\n"}"#;
		assert_eq!(parse_request(scalar).unwrap().sampling.stop_sequences, vec!["\n".to_string()]);

		let array = br#"{"model":"gpt-4o","messages":[],"stop":["\n","###"]}"#;
		assert_eq!(
			parse_request(array).unwrap().sampling.stop_sequences,
			vec!["\n".to_string(), "###".to_string()]
		);
	}

	#[test]
	fn max_completion_tokens_takes_precedence_over_max_tokens() {
		let body = br#"{"model":"gpt-4o","messages":[],"max_tokens":10,"max_completion_tokens":20}"#;
		assert_eq!(parse_request(body).unwrap().sampling.max_tokens, Some(20));

		let legacy_only = br#"{"model":"gpt-4o","messages":[],"max_tokens":10}"#;
		assert_eq!(parse_request(legacy_only).unwrap().sampling.max_tokens, Some(10));
	}

	#[test]
	fn tool_result_message_becomes_tool_result_part() {
		let body = br#"{"model":"gpt-4o","messages":[{"role":"tool","tool_call_id":"call_1","content":"42"}]}"#;
		let canon = parse_request(body).unwrap();
		assert_eq!(canon.turns.len(), 1);
		assert_eq!(
			canon.turns[0].content[0],
			Part::ToolResult { tool_call_id: "call_1".to_string(), output: "42".to_string() }
		);
	}
}
