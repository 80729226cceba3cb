//! Per-stream transform state (C4). One instance lives for the lifetime of a
//! single upstream-to-client streaming response and accumulates both the
//! *source*-side bookkeeping needed to parse incoming chunks (tool-call
//! argument buffers, discovered message id) and the *destination*-side
//! bookkeeping needed to emit a well-formed stream in the target dialect
//! (which block index is open, running usage totals).

use std::collections::HashMap;

use crate::dialect::{BlockKind, StopReason, UsageDelta};

#[derive(Debug, Clone, Default)]
pub struct ToolCallBuffer {
	pub id: String,
	pub name: String,
	pub args_buffer: String,
}

#[derive(Debug, Default)]
pub struct TransformState {
	pub message_id: Option<String>,
	pub current_index: usize,
	pub current_block_kind: Option<BlockKind>,
	pub tool_calls: HashMap<usize, ToolCallBuffer>,
	pub usage: UsageDelta,
	pub stop_reason: Option<StopReason>,
	synthetic_id_counter: u32,
}

impl TransformState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Return the known message id, or mint a stable synthetic one the first
	/// time it's needed (destinations that require an id on every frame even
	/// when the source dialect never assigned one, e.g. Gemini -> Claude).
	pub fn message_id_or_synthesize(&mut self, candidate: Option<String>, prefix: &str) -> String {
		if let Some(id) = candidate {
			self.message_id.get_or_insert(id.clone());
			return id;
		}
		if let Some(id) = &self.message_id {
			return id.clone();
		}
		self.synthetic_id_counter += 1;
		let id = format!("{prefix}_{:016x}", self.synthetic_id_counter);
		self.message_id = Some(id.clone());
		id
	}

	/// Fold a usage delta into the running totals. Deltas from dialects that
	/// report cumulative usage per-chunk (rather than incremental) should
	/// instead call `set_usage`.
	pub fn apply_usage(&mut self, delta: UsageDelta) {
		self.usage.input_tokens = add_opt(self.usage.input_tokens, delta.input_tokens);
		self.usage.output_tokens = add_opt(self.usage.output_tokens, delta.output_tokens);
		self.usage.cache_read_tokens = delta.cache_read_tokens.or(self.usage.cache_read_tokens);
		self.usage.cache_5m_write_tokens =
			delta.cache_5m_write_tokens.or(self.usage.cache_5m_write_tokens);
		self.usage.cache_1h_write_tokens =
			delta.cache_1h_write_tokens.or(self.usage.cache_1h_write_tokens);
	}

	/// Replace running totals outright (OpenAI/Codex/Gemini report
	/// cumulative usage snapshots rather than incremental deltas).
	pub fn set_usage(&mut self, usage: UsageDelta) {
		self.usage = usage;
	}
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
	match (a, b) {
		(Some(a), Some(b)) => Some(a + b),
		(Some(a), None) => Some(a),
		(None, b) => b,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn synthesizes_stable_id_once() {
		let mut state = TransformState::new();
		let first = state.message_id_or_synthesize(None, "msg");
		let second = state.message_id_or_synthesize(None, "msg");
		assert_eq!(first, second);
	}

	#[test]
	fn prefers_explicit_id_over_synthetic() {
		let mut state = TransformState::new();
		let id = state.message_id_or_synthesize(Some("msg_real".to_string()), "msg");
		assert_eq!(id, "msg_real");
	}

	#[test]
	fn usage_accumulates_across_deltas() {
		let mut state = TransformState::new();
		state.apply_usage(UsageDelta { output_tokens: Some(3), ..Default::default() });
		state.apply_usage(UsageDelta { output_tokens: Some(4), ..Default::default() });
		assert_eq!(state.usage.output_tokens, Some(7));
	}
}
