//! Dialect schemas (C2): the four wire protocols, plus a canonical
//! `Turn`/`Part` representation every dialect parses into and renders out of
//! (Design Notes §9: "model each as a tagged variant with a single parser
//! per dialect", replacing the source's `map[string]interface{}` drilling).

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod openai;

use serde::{Deserialize, Serialize};

/// §3.1 — closed enumeration of the four wire dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
	Claude,
	OpenAI,
	Codex,
	Gemini,
}

impl Dialect {
	pub const ALL: [Dialect; 4] = [Dialect::Claude, Dialect::OpenAI, Dialect::Codex, Dialect::Gemini];

	pub fn as_str(&self) -> &'static str {
		match self {
			Dialect::Claude => "claude",
			Dialect::OpenAI => "openai",
			Dialect::Codex => "codex",
			Dialect::Gemini => "gemini",
		}
	}
}

impl std::fmt::Display for Dialect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// §3.2 — role of a canonical turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	User,
	Assistant,
	System,
	Tool,
}

/// §3.2 — one content part within a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
	Text(String),
	/// opaque reasoning block; `signature` exists only on Claude/Gemini wire
	/// forms (Design Notes §9, open question iii).
	Thinking { text: String, signature: Option<String> },
	ToolCall { id: String, name: String, arguments_json: String },
	ToolResult { tool_call_id: String, output: String },
	/// Gemini-only; dropped by dialects with no inline-data concept.
	InlineData { mime: String, bytes: Vec<u8> },
}

/// §3.2 — one turn in the canonical conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
	pub role: Role,
	pub content: Vec<Part>,
}

impl Turn {
	/// Concatenates all text parts of this turn, ignoring tool/thinking/inline
	/// content. Used when folding a turn down to a single string (e.g. a
	/// destination that only accepts one text blob per turn).
	pub fn text(&self) -> String {
		self
			.content
			.iter()
			.filter_map(|p| match p {
				Part::Text(t) => Some(t.as_str()),
				_ => None,
			})
			.collect::<Vec<_>>()
			.join("")
	}
}

/// §3.2 — a callable tool; the JSON schema passes through opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
	pub name: String,
	pub description: Option<String>,
	pub json_schema: serde_json::Value,
}

/// §3.2 — sampling knobs. Absent fields mean "provider default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
	pub max_tokens: Option<u64>,
	pub temperature: Option<f64>,
	pub top_p: Option<f64>,
	pub top_k: Option<u64>,
	pub stop_sequences: Vec<String>,
}

/// §3.2 — a dialect-agnostic conversation: the shape every request
/// transformer consumes and produces internally before rendering back onto
/// the wire in the destination dialect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
	pub model: String,
	pub system: Option<String>,
	pub turns: Vec<Turn>,
	pub sampling: SamplingConfig,
	pub tools: Vec<Tool>,
	pub stream: bool,
}

/// §3.2 — a dialect-agnostic non-streaming response: the shape every
/// response transformer produces from a parsed upstream body and renders
/// back onto the destination wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
	pub id: String,
	pub model: String,
	pub turn: Turn,
	pub stop_reason: StopReason,
	pub usage: UsageDelta,
}

/// §3.3 — normalized stream events a response-transformer must produce or
/// consume, independent of the destination wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
	StartMessage { id: Option<String>, model: Option<String> },
	StartBlock { index: usize, kind: BlockKind },
	TextDelta { index: usize, text: String },
	ThinkingDelta { index: usize, text: String },
	ToolArgsDelta { index: usize, fragment: String },
	StopBlock { index: usize },
	UsageDelta(UsageDelta),
	StopMessage { reason: StopReason },
	Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
	Text,
	Thinking,
	ToolUse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
	pub input_tokens: Option<u64>,
	pub output_tokens: Option<u64>,
	pub cache_read_tokens: Option<u64>,
	pub cache_5m_write_tokens: Option<u64>,
	pub cache_1h_write_tokens: Option<u64>,
}

/// Canonical stop reason; §4.4's fixed mapping table renders this into each
/// dialect's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
	EndOfTurn,
	MaxTokens,
	ToolUse,
	Other,
}

impl StopReason {
	pub fn as_claude(&self) -> &'static str {
		match self {
			StopReason::EndOfTurn => "end_turn",
			StopReason::MaxTokens => "max_tokens",
			StopReason::ToolUse => "tool_use",
			StopReason::Other => "end_turn",
		}
	}

	pub fn as_openai(&self) -> &'static str {
		match self {
			StopReason::EndOfTurn => "stop",
			StopReason::MaxTokens => "length",
			StopReason::ToolUse => "tool_calls",
			StopReason::Other => "stop",
		}
	}

	pub fn as_codex(&self) -> &'static str {
		match self {
			StopReason::EndOfTurn => "completed",
			StopReason::MaxTokens => "incomplete",
			StopReason::ToolUse => "completed",
			StopReason::Other => "completed",
		}
	}

	pub fn as_gemini(&self) -> &'static str {
		match self {
			StopReason::EndOfTurn => "STOP",
			StopReason::MaxTokens => "MAX_TOKENS",
			StopReason::ToolUse => "STOP",
			StopReason::Other => "STOP",
		}
	}

	/// Inverse mapping, used by request-side... actually response parsing:
	/// interpret an upstream-provided stop reason string back into canonical
	/// form, dialect by dialect.
	pub fn from_claude(s: &str) -> StopReason {
		match s {
			"end_turn" | "stop_sequence" => StopReason::EndOfTurn,
			"max_tokens" => StopReason::MaxTokens,
			"tool_use" => StopReason::ToolUse,
			_ => StopReason::Other,
		}
	}

	pub fn from_openai(s: &str) -> StopReason {
		match s {
			"stop" => StopReason::EndOfTurn,
			"length" => StopReason::MaxTokens,
			"tool_calls" | "function_call" => StopReason::ToolUse,
			_ => StopReason::Other,
		}
	}

	pub fn from_codex(s: &str) -> StopReason {
		match s {
			"incomplete" => StopReason::MaxTokens,
			"completed" => StopReason::EndOfTurn,
			_ => StopReason::Other,
		}
	}

	pub fn from_gemini(s: &str) -> StopReason {
		match s {
			"STOP" => StopReason::EndOfTurn,
			"MAX_TOKENS" => StopReason::MaxTokens,
			_ => StopReason::Other,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn turn_text_ignores_non_text_parts() {
		let turn = Turn {
			role: Role::User,
			content: vec![
				Part::Text("hello ".into()),
				Part::ToolResult { tool_call_id: "x".into(), output: "ignored".into() },
				Part::Text("world".into()),
			],
		};
		assert_eq!(turn.text(), "hello world");
	}

	#[test]
	fn stop_reason_round_trips_through_claude_vocabulary() {
		for reason in [StopReason::EndOfTurn, StopReason::MaxTokens, StopReason::ToolUse] {
			assert_eq!(StopReason::from_claude(reason.as_claude()) as u8, reason as u8);
		}
	}
}
