//! Routing and bookkeeping entities (§3.4/§3.6): providers, routes, retry
//! policy, sessions, and the two append-only, monotone-status records that
//! track one client-facing request and its upstream attempts.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::ProxyError;

pub type Id = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
	Custom,
	Antigravity,
	Kiro,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
	pub pattern: String,
	pub target: String,
}

impl ModelMapping {
	/// `prefix*`, `*suffix`, `*mid*`, or a bare literal (§4.6 rule 7).
	pub fn matches(&self, model: &str) -> bool {
		match self.pattern.as_str() {
			p if p.starts_with('*') && p.ends_with('*') && p.len() > 1 => {
				model.contains(&p[1..p.len() - 1])
			},
			p if p.starts_with('*') => model.ends_with(&p[1..]),
			p if p.ends_with('*') => model.starts_with(&p[..p.len() - 1]),
			p => model == p,
		}
	}
}

/// Resolve `model` through a chain of mapping tables, route → provider →
/// global, first match wins (§4.6 rule 7). Each table is scanned in order.
pub fn resolve_model(model: &str, chain: &[&[ModelMapping]]) -> String {
	for table in chain {
		if let Some(m) = table.iter().find(|m| m.matches(model)) {
			return m.target.clone();
		}
	}
	model.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
	pub base_url: String,
	pub api_key: String,
	#[serde(default)]
	pub dialect_base_urls: HashMap<Dialect, String>,
	#[serde(default)]
	pub model_rename: Vec<ModelMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
	pub id: Id,
	pub kind: ProviderKind,
	pub supported_dialects: Vec<Dialect>,
	pub config: ProviderConfig,
	pub deleted_at: Option<i64>,
}

impl Provider {
	pub fn is_deleted(&self) -> bool {
		self.deleted_at.is_some()
	}

	pub fn base_url_for(&self, dialect: Dialect) -> &str {
		self.config.dialect_base_urls.get(&dialect).unwrap_or(&self.config.base_url)
	}

	/// Default host/path suffix per provider kind, grounded in the teacher's
	/// `AIProvider::default_connector` — used when a route's provider has no
	/// explicit per-dialect override.
	pub fn default_path_for(&self, dialect: Dialect) -> &'static str {
		match dialect {
			Dialect::Claude => "/v1/messages",
			Dialect::OpenAI => "/v1/chat/completions",
			Dialect::Codex => "/v1/responses",
			Dialect::Gemini => "/v1beta/models",
		}
	}

	/// Required header injection per provider kind, grounded in the
	/// teacher's `AIProvider::set_required_fields` (moving a bearer token
	/// into `x-api-key` plus `anthropic-version` for Anthropic-shaped
	/// upstreams).
	pub fn required_headers(&self, dialect: Dialect) -> Vec<(&'static str, String)> {
		match dialect {
			Dialect::Claude => vec![
				("x-api-key", self.config.api_key.clone()),
				("anthropic-version", "2023-06-01".to_string()),
			],
			Dialect::Gemini => vec![("x-goog-api-key", self.config.api_key.clone())],
			_ => vec![("authorization", format!("Bearer {}", self.config.api_key))],
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
	pub id: Id,
	pub project_id: Id,
	pub dialect: Dialect,
	pub provider_id: Id,
	pub position: i32,
	pub enabled: bool,
	pub is_native: bool,
	pub retry_config_id: Id,
	#[serde(default)]
	pub model_mapping: Vec<ModelMapping>,
	pub deleted_at: Option<i64>,
}

impl Route {
	pub fn is_live(&self) -> bool {
		self.enabled && self.deleted_at.is_none()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStrategyKind {
	Priority,
	WeightedRandom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingStrategy {
	pub kind: RoutingStrategyKind,
	#[serde(default)]
	pub weights: HashMap<Id, f64>,
}

impl Default for RoutingStrategy {
	fn default() -> Self {
		Self { kind: RoutingStrategyKind::Priority, weights: HashMap::new() }
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
	pub max_retries: u32,
	pub initial_interval: Duration,
	pub backoff_rate: f64,
	pub max_interval: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 2,
			initial_interval: Duration::from_millis(250),
			backoff_rate: 2.0,
			max_interval: Duration::from_secs(10),
		}
	}
}

impl RetryConfig {
	pub fn backoff_for(&self, attempt_index: u32) -> Duration {
		let scaled = self.initial_interval.as_secs_f64() * self.backoff_rate.powi(attempt_index as i32);
		Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
	pub fingerprint: String,
	pub first_seen_dialect: Dialect,
	pub bound_project_id: Option<Id>,
	pub rejected_at: Option<i64>,
}

impl Session {
	pub fn is_rejected(&self) -> bool {
		self.rejected_at.is_some()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyRequestStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
	Rejected,
}

impl ProxyRequestStatus {
	fn can_transition_to(self, next: ProxyRequestStatus) -> bool {
		use ProxyRequestStatus::*;
		matches!(
			(self, next),
			(Pending, InProgress)
				| (Pending, Rejected)
				| (InProgress, Completed)
				| (InProgress, Failed)
				| (InProgress, Rejected)
		)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRequest {
	pub id: Id,
	pub project_id: Id,
	pub dialect: Dialect,
	pub status: ProxyRequestStatus,
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub status_code: Option<u16>,
	pub is_stream: bool,
	pub session_fingerprint: String,
	pub started_at_ms: i64,
	pub finished_at_ms: Option<i64>,
}

impl ProxyRequest {
	/// Enforces the monotone state machine of §3.6 (invariant 2 of §3.5
	/// doesn't belong here — that one's checked by the dispatcher when it
	/// decides what status to transition into).
	pub fn transition(&mut self, next: ProxyRequestStatus) -> Result<(), ProxyError> {
		if !self.status.can_transition_to(next) {
			return Err(ProxyError::Internal(anyhow::anyhow!(
				"illegal ProxyRequest transition {:?} -> {:?}",
				self.status,
				next
			)));
		}
		self.status = next;
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
	InProgress,
	Completed,
	Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyUpstreamAttempt {
	pub id: Id,
	pub proxy_request_id: Id,
	pub route_id: Id,
	pub provider_id: Id,
	pub attempt_index: u32,
	pub status: AttemptStatus,
	pub request_model: String,
	pub mapped_model: String,
	pub response_model: Option<String>,
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub error_kind: Option<String>,
	pub started_at_ms: i64,
	pub finished_at_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn model_mapping_patterns() {
		assert!(ModelMapping { pattern: "claude-*".into(), target: "x".into() }.matches("claude-sonnet-4-5"));
		assert!(ModelMapping { pattern: "*-latest".into(), target: "x".into() }.matches("gpt-4o-latest"));
		assert!(ModelMapping { pattern: "*mini*".into(), target: "x".into() }.matches("gpt-4o-mini-2024"));
		assert!(ModelMapping { pattern: "gpt-4o".into(), target: "x".into() }.matches("gpt-4o"));
		assert!(!ModelMapping { pattern: "gpt-4o".into(), target: "x".into() }.matches("gpt-4o-mini"));
	}

	#[test]
	fn resolve_model_prefers_earlier_table_in_chain() {
		let route_table = vec![ModelMapping { pattern: "gpt-4o".into(), target: "route-target".into() }];
		let global_table = vec![ModelMapping { pattern: "gpt-4o".into(), target: "global-target".into() }];
		let resolved = resolve_model("gpt-4o", &[&route_table, &global_table]);
		assert_eq!(resolved, "route-target");
	}

	#[test]
	fn proxy_request_rejects_illegal_transition() {
		let mut req = ProxyRequest {
			id: 1,
			project_id: 0,
			dialect: Dialect::Claude,
			status: ProxyRequestStatus::Pending,
			input_tokens: 0,
			output_tokens: 0,
			status_code: None,
			is_stream: false,
			session_fingerprint: "s".into(),
			started_at_ms: 0,
			finished_at_ms: None,
		};
		assert!(req.transition(ProxyRequestStatus::Completed).is_err());
		assert!(req.transition(ProxyRequestStatus::InProgress).is_ok());
		assert!(req.transition(ProxyRequestStatus::Completed).is_ok());
	}
}
