//! Gemini `generateContent`/`streamGenerateContent` wire dialect.
//!
//! Gemini has no native tool-call id field: a `functionCall` only carries a
//! `name`. Per Design Notes §9 rule 8, we round-trip ids by encoding them
//! into the function name as `<name>_<callId>` on the way out and splitting
//! on the last underscore on the way back in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
	BlockKind, CanonicalRequest, CanonicalResponse, Part, Role, SamplingConfig, StopReason, Tool,
	Turn, UsageDelta,
};
use crate::convert::state::TransformState;
use crate::error::ProxyError;
use crate::sse::SseEvent;

pub fn encode_call_id(name: &str, id: &str) -> String {
	format!("{name}_{id}")
}

/// Split on the last underscore. If there is none, treat the whole string as
/// the name and mint the id from it (best-effort recovery for malformed
/// input, never panics).
pub fn decode_call_id(combined: &str) -> (String, String) {
	match combined.rsplit_once('_') {
		Some((name, id)) => (name.to_string(), id.to_string()),
		None => (combined.to_string(), combined.to_string()),
	}
}

#[derive(Clone, Copy, Deserialize, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
	#[default]
	User,
	Model,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct FunctionCall {
	pub name: String,
	#[serde(default)]
	pub args: Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct FunctionResponse {
	pub name: String,
	pub response: Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct InlineData {
	#[serde(rename = "mimeType")]
	pub mime_type: String,
	pub data: String,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct WirePart {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "functionCall")]
	pub function_call: Option<FunctionCall>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "functionResponse")]
	pub function_response: Option<FunctionResponse>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "inlineData")]
	pub inline_data: Option<InlineData>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub thought: Option<bool>,
}

impl WirePart {
	fn text(text: String) -> Self {
		Self { text: Some(text), function_call: None, function_response: None, inline_data: None, thought: None }
	}
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct Content {
	#[serde(default)]
	pub role: WireRole,
	pub parts: Vec<WirePart>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct FunctionDeclaration {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub parameters: Value,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct WireTool {
	#[serde(rename = "functionDeclarations")]
	pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct GenerationConfig {
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
	pub max_output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "topP")]
	pub top_p: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "topK")]
	pub top_k: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty", rename = "stopSequences")]
	pub stop_sequences: Vec<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct SafetySetting {
	pub category: String,
	pub threshold: String,
}

const HARM_CATEGORIES: [&str; 4] = [
	"HARM_CATEGORY_HARASSMENT",
	"HARM_CATEGORY_HATE_SPEECH",
	"HARM_CATEGORY_SEXUALLY_EXPLICIT",
	"HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn all_safety_off() -> Vec<SafetySetting> {
	HARM_CATEGORIES
		.iter()
		.map(|c| SafetySetting { category: c.to_string(), threshold: "OFF".to_string() })
		.collect()
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct SystemInstruction {
	pub parts: Vec<WirePart>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct FunctionCallingConfig {
	pub mode: String,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct ToolConfig {
	#[serde(rename = "functionCallingConfig")]
	pub function_calling_config: FunctionCallingConfig,
}

#[derive(Deserialize, Serialize, Default, Debug)]
pub struct GenerateContentRequest {
	pub contents: Vec<Content>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
	pub system_instruction: Option<SystemInstruction>,
	#[serde(default, rename = "generationConfig")]
	pub generation_config: GenerationConfig,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tools: Vec<WireTool>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "toolConfig")]
	pub tool_config: Option<ToolConfig>,
	#[serde(default, skip_serializing_if = "Vec::is_empty", rename = "safetySettings")]
	pub safety_settings: Vec<SafetySetting>,
}

#[derive(Clone, Deserialize, Serialize, Debug, Default)]
pub struct UsageMetadata {
	#[serde(default, rename = "promptTokenCount")]
	pub prompt_token_count: u64,
	#[serde(default, rename = "candidatesTokenCount")]
	pub candidates_token_count: u64,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "cachedContentTokenCount")]
	pub cached_content_token_count: Option<u64>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct Candidate {
	pub content: Content,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "finishReason")]
	pub finish_reason: Option<String>,
}

#[derive(Clone, Deserialize, Serialize, Debug)]
pub struct GenerateContentResponse {
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "responseId")]
	pub response_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model_version: Option<String>,
	pub candidates: Vec<Candidate>,
	#[serde(default, rename = "usageMetadata")]
	pub usage_metadata: UsageMetadata,
}

pub fn parse_request(body: &[u8]) -> Result<CanonicalRequest, ProxyError> {
	let req: GenerateContentRequest =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;

	let system = req.system_instruction.map(|si| {
		si.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join("\n")
	});

	let turns = req
		.contents
		.into_iter()
		.map(|c| Turn {
			role: match c.role {
				WireRole::Model => Role::Assistant,
				WireRole::User => Role::User,
			},
			content: c.parts.into_iter().filter_map(wire_part_to_canonical).collect(),
		})
		.collect();

	Ok(CanonicalRequest {
		model: String::new(),
		system,
		turns,
		sampling: SamplingConfig {
			max_tokens: req.generation_config.max_output_tokens,
			temperature: req.generation_config.temperature,
			top_p: req.generation_config.top_p,
			top_k: req.generation_config.top_k,
			stop_sequences: req.generation_config.stop_sequences,
		},
		tools: req
			.tools
			.into_iter()
			.flat_map(|t| t.function_declarations)
			.map(|f| Tool { name: f.name, description: f.description, json_schema: f.parameters })
			.collect(),
		stream: false,
	})
}

fn wire_part_to_canonical(part: WirePart) -> Option<Part> {
	if let Some(text) = part.text {
		if part.thought.unwrap_or(false) {
			return Some(Part::Thinking { text, signature: None });
		}
		return Some(Part::Text(text));
	}
	if let Some(call) = part.function_call {
		let (name, id) = decode_call_id(&call.name);
		return Some(Part::ToolCall {
			id,
			name,
			arguments_json: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string()),
		});
	}
	if let Some(response) = part.function_response {
		let (_, id) = decode_call_id(&response.name);
		let output = response
			.response
			.get("output")
			.map(|v| v.to_string())
			.unwrap_or_else(|| response.response.to_string());
		return Some(Part::ToolResult { tool_call_id: id, output });
	}
	if let Some(inline) = part.inline_data {
		return base64::Engine::decode(&base64::engine::general_purpose::STANDARD, inline.data)
			.ok()
			.map(|bytes| Part::InlineData { mime: inline.mime_type, bytes });
	}
	None
}

/// Render a canonical request as a Gemini `GenerateContentRequest`. Safety
/// thresholds are always disabled per Design Notes §9 rule 7; the Claude
/// identity-guard preamble (also rule 7) is applied upstream of this call by
/// the conversion orchestrator, which knows the inbound dialect.
pub fn render_request(canon: &CanonicalRequest) -> Value {
	let call_names: std::collections::HashMap<&str, &str> = canon
		.turns
		.iter()
		.flat_map(|t| &t.content)
		.filter_map(|p| match p {
			Part::ToolCall { id, name, .. } => Some((id.as_str(), name.as_str())),
			_ => None,
		})
		.collect();

	let contents = canon
		.turns
		.iter()
		.filter(|t| t.role != Role::System)
		.map(|t| Content {
			role: match t.role {
				Role::Assistant => WireRole::Model,
				_ => WireRole::User,
			},
			parts: t.content.iter().map(|p| canonical_part_to_wire(p, &call_names)).collect(),
		})
		.collect();

	let req = GenerateContentRequest {
		contents,
		system_instruction: canon
			.system
			.clone()
			.filter(|s| !s.is_empty())
			.map(|s| SystemInstruction { parts: vec![WirePart::text(s)] }),
		generation_config: GenerationConfig {
			max_output_tokens: canon.sampling.max_tokens,
			temperature: canon.sampling.temperature,
			top_p: canon.sampling.top_p,
			top_k: canon.sampling.top_k,
			stop_sequences: canon.sampling.stop_sequences.clone(),
		},
		tools: if canon.tools.is_empty() {
			Vec::new()
		} else {
			vec![WireTool {
				function_declarations: canon
					.tools
					.iter()
					.map(|t| FunctionDeclaration {
						name: t.name.clone(),
						description: t.description.clone(),
						parameters: t.json_schema.clone(),
					})
					.collect(),
			}]
		},
		tool_config: if canon.tools.is_empty() {
			None
		} else {
			Some(ToolConfig { function_calling_config: FunctionCallingConfig { mode: "VALIDATED".to_string() } })
		},
		safety_settings: all_safety_off(),
	};
	serde_json::to_value(req).unwrap_or(Value::Null)
}

fn canonical_part_to_wire(part: &Part, call_names: &std::collections::HashMap<&str, &str>) -> WirePart {
	match part {
		Part::Text(t) => WirePart::text(t.clone()),
		Part::Thinking { text, .. } => {
			let mut p = WirePart::text(text.clone());
			p.thought = Some(true);
			p
		},
		Part::ToolCall { id, name, arguments_json } => WirePart {
			text: None,
			function_call: Some(FunctionCall {
				name: encode_call_id(name, id),
				args: serde_json::from_str(arguments_json).unwrap_or(Value::Null),
			}),
			function_response: None,
			inline_data: None,
			thought: None,
		},
		Part::ToolResult { tool_call_id, output } => {
			let name = call_names.get(tool_call_id.as_str()).copied().unwrap_or("");
			WirePart {
				text: None,
				function_call: None,
				function_response: Some(FunctionResponse {
					name: encode_call_id(name, tool_call_id),
					response: serde_json::json!({ "output": output }),
				}),
				inline_data: None,
				thought: None,
			}
		},
		Part::InlineData { mime, bytes } => WirePart {
			text: None,
			function_call: None,
			function_response: None,
			inline_data: Some(InlineData {
				mime_type: mime.clone(),
				data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
			}),
			thought: None,
		},
	}
}

pub fn parse_response(body: &[u8]) -> Result<CanonicalResponse, ProxyError> {
	let resp: GenerateContentResponse =
		serde_json::from_slice(body).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;
	let candidate = resp
		.candidates
		.into_iter()
		.next()
		.ok_or_else(|| ProxyError::ConversionMalformed("gemini response had no candidates".to_string()))?;
	let content = candidate.content.parts.into_iter().filter_map(wire_part_to_canonical).collect();
	Ok(CanonicalResponse {
		id: resp.response_id.unwrap_or_default(),
		model: resp.model_version.unwrap_or_default(),
		turn: Turn { role: Role::Assistant, content },
		stop_reason: candidate
			.finish_reason
			.as_deref()
			.map(StopReason::from_gemini)
			.unwrap_or(StopReason::Other),
		usage: UsageDelta {
			input_tokens: Some(resp.usage_metadata.prompt_token_count),
			output_tokens: Some(resp.usage_metadata.candidates_token_count),
			cache_read_tokens: resp.usage_metadata.cached_content_token_count,
			cache_5m_write_tokens: None,
			cache_1h_write_tokens: None,
		},
	})
}

pub fn render_response(canon: &CanonicalResponse) -> Value {
	let call_names: std::collections::HashMap<&str, &str> = canon
		.turn
		.content
		.iter()
		.filter_map(|p| match p {
			Part::ToolCall { id, name, .. } => Some((id.as_str(), name.as_str())),
			_ => None,
		})
		.collect();
	let resp = GenerateContentResponse {
		response_id: Some(canon.id.clone()),
		model_version: Some(canon.model.clone()),
		candidates: vec![Candidate {
			content: Content {
				role: WireRole::Model,
				parts: canon.turn.content.iter().map(|p| canonical_part_to_wire(p, &call_names)).collect(),
			},
			finish_reason: Some(canon.stop_reason.as_gemini().to_string()),
		}],
		usage_metadata: UsageMetadata {
			prompt_token_count: canon.usage.input_tokens.unwrap_or_default(),
			candidates_token_count: canon.usage.output_tokens.unwrap_or_default(),
			cached_content_token_count: canon.usage.cache_read_tokens,
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
	let chunk: GenerateContentResponse = match serde_json::from_value(json.clone()) {
		Ok(c) => c,
		Err(_) => {
			tracing::debug!("dropping unknown gemini stream chunk");
			return vec![];
		},
	};

	let mut out = Vec::new();
	if state.message_id.is_none() {
		let id = chunk.response_id.clone().unwrap_or_default();
		state.message_id = Some(id.clone());
		out.push(SE::StartMessage { id: Some(id), model: chunk.model_version.clone() });
		out.push(SE::StartBlock { index: 0, kind: BlockKind::Text });
	}

	let Some(candidate) = chunk.candidates.into_iter().next() else { return out };
	for part in candidate.content.parts {
		if let Some(text) = part.text {
			if part.thought.unwrap_or(false) {
				out.push(SE::ThinkingDelta { index: 0, text });
			} else {
				out.push(SE::TextDelta { index: 0, text });
			}
		} else if let Some(call) = part.function_call {
			let (name, id) = decode_call_id(&call.name);
			let index = state.tool_calls.len() + 1;
			state.tool_calls.insert(index, crate::convert::state::ToolCallBuffer {
				id,
				name,
				args_buffer: call.args.to_string(),
			});
			out.push(SE::StartBlock { index, kind: BlockKind::ToolUse });
			out.push(SE::ToolArgsDelta { index, fragment: call.args.to_string() });
			out.push(SE::StopBlock { index });
		}
	}
	if let Some(reason) = candidate.finish_reason {
		state.set_usage(UsageDelta {
			input_tokens: Some(chunk.usage_metadata.prompt_token_count),
			output_tokens: Some(chunk.usage_metadata.candidates_token_count),
			cache_read_tokens: chunk.usage_metadata.cached_content_token_count,
			cache_5m_write_tokens: None,
			cache_1h_write_tokens: None,
		});
		out.push(SE::UsageDelta(state.usage));
		out.push(SE::StopMessage { reason: StopReason::from_gemini(&reason) });
		out.push(SE::Terminate);
	}
	out
}

pub fn render_stream_event(event: &super::StreamEvent, state: &mut TransformState) -> Vec<u8> {
	use super::StreamEvent as SE;
	match event {
		SE::StartMessage { id, .. } => {
			let id = state.message_id_or_synthesize(id.clone(), "gemini");
			state.message_id = Some(id);
			vec![]
		},
		SE::StartBlock { index, kind } => {
			state.current_index = *index;
			state.current_block_kind = Some(*kind);
			vec![]
		},
		SE::TextDelta { text, .. } => {
			let chunk = text_chunk(state, WirePart::text(text.clone()));
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::ThinkingDelta { text, .. } => {
			let mut part = WirePart::text(text.clone());
			part.thought = Some(true);
			let chunk = text_chunk(state, part);
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::ToolArgsDelta { index, fragment } => {
			let tc = state.tool_calls.get(index).cloned().unwrap_or_default();
			let part = WirePart {
				text: None,
				function_call: Some(FunctionCall {
					name: encode_call_id(&tc.name, &tc.id),
					args: serde_json::from_str(fragment).unwrap_or(Value::Null),
				}),
				function_response: None,
				inline_data: None,
				thought: None,
			};
			let chunk = text_chunk(state, part);
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
		SE::StopBlock { .. } => vec![],
		SE::UsageDelta(delta) => {
			state.apply_usage(*delta);
			vec![]
		},
		SE::StopMessage { reason } => {
			state.stop_reason = Some(*reason);
			vec![]
		},
		SE::Terminate => {
			let chunk = GenerateContentResponse {
				response_id: state.message_id.clone(),
				model_version: None,
				candidates: vec![Candidate {
					content: Content { role: WireRole::Model, parts: vec![] },
					finish_reason: Some(state.stop_reason.unwrap_or(StopReason::Other).as_gemini().to_string()),
				}],
				usage_metadata: UsageMetadata {
					prompt_token_count: state.usage.input_tokens.unwrap_or_default(),
					candidates_token_count: state.usage.output_tokens.unwrap_or_default(),
					cached_content_token_count: state.usage.cache_read_tokens,
				},
			};
			crate::sse::format("", &serde_json::to_value(chunk).unwrap())
		},
	}
}

fn text_chunk(state: &TransformState, part: WirePart) -> GenerateContentResponse {
	GenerateContentResponse {
		response_id: state.message_id.clone(),
		model_version: None,
		candidates: vec![Candidate {
			content: Content { role: WireRole::Model, parts: vec![part] },
			finish_reason: None,
		}],
		usage_metadata: UsageMetadata::default(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn call_id_round_trips_through_encoded_name() {
		let combined = encode_call_id("get_weather", "call_abc123");
		assert_eq!(combined, "get_weather_call_abc123");
		let (name, id) = decode_call_id(&combined);
		assert_eq!(name, "get_weather");
		assert_eq!(id, "call_abc123");
	}

	#[test]
	fn render_request_disables_all_safety_categories() {
		let canon = CanonicalRequest { model: "gemini-2.5-pro".into(), ..Default::default() };
		let body = render_request(&canon);
		let settings = body["safetySettings"].as_array().unwrap();
		assert_eq!(settings.len(), 4);
		assert!(settings.iter().all(|s| s["threshold"] == "OFF"));
	}

	#[test]
	fn render_request_sets_validated_function_calling_mode_when_tools_present() {
		let canon = CanonicalRequest {
			model: "gemini-2.5-pro".into(),
			tools: vec![Tool { name: "get_weather".into(), description: None, json_schema: serde_json::json!({}) }],
			..Default::default()
		};
		let body = render_request(&canon);
		assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "VALIDATED");
	}

	#[test]
	fn render_request_omits_tool_config_without_tools() {
		let canon = CanonicalRequest { model: "gemini-2.5-pro".into(), ..Default::default() };
		let body = render_request(&canon);
		assert!(body.get("toolConfig").is_none());
	}

	#[test]
	fn tool_result_reuses_matching_call_name() {
		let canon = CanonicalRequest {
			model: "gemini-2.5-pro".into(),
			turns: vec![
				Turn {
					role: Role::Assistant,
					content: vec![Part::ToolCall {
						id: "call_1".into(),
						name: "get_weather".into(),
						arguments_json: "{}".into(),
					}],
				},
				Turn {
					role: Role::Tool,
					content: vec![Part::ToolResult { tool_call_id: "call_1".into(), output: "sunny".into() }],
				},
			],
			..Default::default()
		};
		let body = render_request(&canon);
		let fr_name = body["contents"][1]["parts"][0]["functionResponse"]["name"].as_str().unwrap();
		assert_eq!(fr_name, "get_weather_call_1");
	}
}
