//! Upstream dispatcher (C7): drives one client-facing request through the
//! candidate list a `RouteSelector` produces, retrying only the failure
//! classes §7 marks retryable and never failing over once a byte has reached
//! the client (§4.7, §5 "no failover after first byte").

pub mod capture;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use maxx_core::metrics::{AttemptLabels, ProxyMetrics, RequestLabels};
use reqwest::Client;
use tracing::warn;

use crate::convert::state::TransformState;
use crate::convert::{transform_request, transform_response, transform_stream_chunk};
use crate::dialect::Dialect;
use crate::error::ProxyError;
use crate::model::{AttemptStatus, Id, ProxyRequest, ProxyRequestStatus, ProxyUpstreamAttempt};
use crate::routing::repository::{
	CooldownRepository, ProviderRepository, ProxyAttemptRepository, ProxyRequestRepository,
	RetryConfigRepository, RouteRepository, RoutingStrategyRepository, SessionRepository,
};
use crate::routing::{Candidate, RouteSelector};
use crate::sse::SseParser;

/// Shared repository handles the dispatcher needs for one request, each an
/// `Arc` so the background forwarding task a streaming dispatch spawns can
/// keep writing attempt rows (and finalizing the `ProxyRequest` itself) after
/// `dispatch()` has already returned the response to the HTTP edge.
#[derive(Clone)]
pub struct Dispatcher {
	pub http: Client,
	/// §5 "Timeouts": idle-read timeout for streams, default 5 minutes. A
	/// chunk that takes longer than this to arrive ends the stream as
	/// `StreamAborted`, never as a fresh candidate (bytes may already have
	/// reached the client).
	pub idle_read_timeout: Duration,
	pub routes: Arc<dyn RouteRepository>,
	pub providers: Arc<dyn ProviderRepository>,
	pub strategies: Arc<dyn RoutingStrategyRepository>,
	pub cooldowns: Arc<dyn CooldownRepository>,
	pub retry_configs: Arc<dyn RetryConfigRepository>,
	pub requests: Arc<dyn ProxyRequestRepository>,
	pub attempts: Arc<dyn ProxyAttemptRepository>,
	pub sessions: Arc<dyn SessionRepository>,
	pub metrics: Arc<ProxyMetrics>,
}

pub struct InboundRequest {
	pub project_id: Id,
	pub dialect: Dialect,
	pub model: String,
	pub is_stream: bool,
	pub body: Vec<u8>,
	pub session_fingerprint: String,
}

/// What the dispatcher hands back to the HTTP edge: either a single body to
/// write verbatim, or a stream of already-destination-dialect SSE frames.
pub enum DispatchOutcome {
	Once { status: u16, body: Vec<u8> },
	Stream { status: u16, rx: tokio::sync::mpsc::Receiver<Vec<u8>> },
}

fn now_ms() -> i64 {
	// chrono::Utc::now() rather than a raw SystemTime read, matching the
	// teacher's timestamp convention elsewhere in the bookkeeping tables.
	chrono::Utc::now().timestamp_millis()
}

/// Classifies a transport failure into the §7 taxonomy. Kept free of the
/// dispatch loop so retry-vs-surface decisions are one function call away
/// from the classification table.
fn classify_transport_error(err: &reqwest::Error) -> ProxyError {
	if err.is_timeout() {
		ProxyError::UpstreamTimeout
	} else {
		ProxyError::UpstreamConnect(err.to_string())
	}
}

fn classify_status(status: reqwest::StatusCode, body: &[u8]) -> Option<ProxyError> {
	if status.is_success() {
		return None;
	}
	Some(match status.as_u16() {
		401 | 403 => ProxyError::UpstreamAuth,
		429 => ProxyError::UpstreamRateLimit,
		500..=599 => ProxyError::UpstreamServerError,
		_ => ProxyError::UpstreamBadRequest { status, body: String::from_utf8_lossy(body).into_owned() },
	})
}

fn error_kind(err: &ProxyError) -> String {
	match err {
		ProxyError::UpstreamConnect(_) => "network",
		ProxyError::UpstreamTimeout => "timeout",
		ProxyError::UpstreamAuth => "auth",
		ProxyError::UpstreamRateLimit => "rate_limit",
		ProxyError::UpstreamServerError => "server_5xx",
		ProxyError::UpstreamBadRequest { .. } => "bad_request_4xx",
		ProxyError::ClientCanceled => "client_canceled",
		_ => "other",
	}
	.to_string()
}

/// Fetches the current row, applies the transition, and persists it. Free
/// function (rather than a `&self` method) so the spawned streaming-forwarder
/// task can call it through its own cloned `Arc<dyn ProxyRequestRepository>`
/// without holding a `Dispatcher` reference across the `tokio::spawn`.
fn finalize_request(requests: &dyn ProxyRequestRepository, request_id: Id, status: ProxyRequestStatus) {
	if let Some(mut request) = requests.get(request_id) {
		if request.transition(status).is_ok() {
			request.finished_at_ms = Some(now_ms());
			requests.update(request);
		}
	}
}

impl Dispatcher {
	fn selector(&self) -> RouteSelector<'_> {
		RouteSelector {
			routes: self.routes.as_ref(),
			providers: self.providers.as_ref(),
			strategies: self.strategies.as_ref(),
			cooldowns: self.cooldowns.as_ref(),
		}
	}

	/// §4.7 steps 1-5 plus the rejection clause: resolve the session, reject
	/// admission if it's been rejected, persist the `ProxyRequest` row, walk
	/// candidates with retry/backoff, and persist the outcome.
	///
	/// For a streaming outcome, the `ProxyRequest` is deliberately left
	/// `InProgress` here: it isn't known to be `COMPLETED` until the final
	/// attempt reports a parseable usage field (§3.5), which only the spawned
	/// forwarding task can observe. That task finalizes the request itself.
	pub async fn dispatch(&self, inbound: InboundRequest) -> Result<DispatchOutcome, ProxyError> {
		let session = self.sessions.get_or_create(&inbound.session_fingerprint, inbound.dialect);
		if session.is_rejected() {
			return Err(ProxyError::Rejected);
		}

		let proxy_request = ProxyRequest {
			id: 0,
			project_id: inbound.project_id,
			dialect: inbound.dialect,
			status: ProxyRequestStatus::Pending,
			input_tokens: 0,
			output_tokens: 0,
			status_code: None,
			is_stream: inbound.is_stream,
			session_fingerprint: inbound.session_fingerprint.clone(),
			started_at_ms: now_ms(),
			finished_at_ms: None,
		};
		let request_id = self.requests.insert(proxy_request.clone());
		let mut proxy_request = proxy_request;
		proxy_request.id = request_id;
		proxy_request.transition(ProxyRequestStatus::InProgress)?;
		self.requests.update(proxy_request.clone());

		let candidates = self.selector().candidates(inbound.project_id, inbound.dialect, &inbound.model);
		if candidates.is_empty() {
			finalize_request(self.requests.as_ref(), request_id, ProxyRequestStatus::Failed);
			self.metrics.requests_total.get_or_create(&request_label(inbound.dialect, "failed")).inc();
			return Err(ProxyError::RouteUnavailable);
		}

		if inbound.is_stream {
			return match self.dispatch_streaming(&inbound, &candidates, request_id).await {
				Ok(outcome) => Ok(outcome),
				Err(err) => {
					finalize_request(self.requests.as_ref(), request_id, ProxyRequestStatus::Failed);
					self.metrics.requests_total.get_or_create(&request_label(inbound.dialect, "failed")).inc();
					Err(err)
				},
			};
		}

		let outcome = self.dispatch_once(&inbound, &candidates, request_id).await;
		let final_status = if outcome.is_ok() { ProxyRequestStatus::Completed } else { ProxyRequestStatus::Failed };
		finalize_request(self.requests.as_ref(), request_id, final_status);
		let label = if outcome.is_ok() { "completed" } else { "failed" };
		self.metrics.requests_total.get_or_create(&request_label(inbound.dialect, label)).inc();
		outcome
	}

	/// Non-streaming path: buffer the whole upstream body, convert it once,
	/// and hand back a single `(status, body)` pair. Retries on a retryable
	/// classification, trying the next candidate each time (§4.7d).
	async fn dispatch_once(
		&self,
		inbound: &InboundRequest,
		candidates: &[Candidate],
		request_id: Id,
	) -> Result<DispatchOutcome, ProxyError> {
		let mut last_err = ProxyError::RouteUnavailable;
		for (attempt_index, candidate) in candidates.iter().enumerate() {
			let attempt_index = attempt_index as u32;
			let retry_config = self.retry_configs.get(candidate.route.retry_config_id);
			if attempt_index > retry_config.max_retries {
				break;
			}
			if attempt_index > 0 {
				self.metrics.retries_total.inc();
				tokio::time::sleep(retry_config.backoff_for(attempt_index - 1)).await;
			}

			let attempt_id = self.attempts.insert(ProxyUpstreamAttempt {
				id: 0,
				proxy_request_id: request_id,
				route_id: candidate.route.id,
				provider_id: candidate.provider.id,
				attempt_index,
				status: AttemptStatus::InProgress,
				request_model: inbound.model.clone(),
				mapped_model: candidate.resolved_model.clone(),
				response_model: None,
				input_tokens: 0,
				output_tokens: 0,
				error_kind: None,
				started_at_ms: now_ms(),
				finished_at_ms: None,
			});

			match self.try_once(inbound, candidate).await {
				Ok((status, body)) => {
					self.finish_attempt(attempt_id, request_id, candidate, attempt_index, inbound, AttemptStatus::Completed, None);
					self
						.metrics
						.attempts_total
						.get_or_create(&attempt_label(&candidate.provider.kind, "completed"))
						.inc();
					return Ok(DispatchOutcome::Once { status, body });
				},
				Err(err) => {
					self.finish_attempt(
						attempt_id,
						request_id,
						candidate,
						attempt_index,
						inbound,
						AttemptStatus::Failed,
						Some(error_kind(&err)),
					);
					self
						.metrics
						.attempts_total
						.get_or_create(&attempt_label(&candidate.provider.kind, "failed"))
						.inc();
					if !err.retryable() {
						return Err(err);
					}
					if matches!(err, ProxyError::UpstreamServerError) {
						self.cooldowns.start_cooldown(
							candidate.provider.id,
							candidate.target_dialect,
							Duration::from_secs(30),
						);
					}
					warn!(route_id = candidate.route.id, error = %err, "upstream attempt failed, trying next candidate");
					last_err = err;
				},
			}
		}
		Err(last_err)
	}

	fn finish_attempt(
		&self,
		attempt_id: Id,
		request_id: Id,
		candidate: &Candidate,
		attempt_index: u32,
		inbound: &InboundRequest,
		status: AttemptStatus,
		error_kind: Option<String>,
	) {
		self.attempts.update(ProxyUpstreamAttempt {
			id: attempt_id,
			proxy_request_id: request_id,
			route_id: candidate.route.id,
			provider_id: candidate.provider.id,
			attempt_index,
			status,
			request_model: inbound.model.clone(),
			mapped_model: candidate.resolved_model.clone(),
			response_model: None,
			input_tokens: 0,
			output_tokens: 0,
			error_kind,
			started_at_ms: now_ms(),
			finished_at_ms: Some(now_ms()),
		});
	}

	async fn try_once(&self, inbound: &InboundRequest, candidate: &Candidate) -> Result<(u16, Vec<u8>), ProxyError> {
		let mut canon_request = transform_request(inbound.dialect, candidate.target_dialect, &inbound.body)?;
		if let Some(obj) = canon_request.as_object_mut() {
			obj.insert("model".to_string(), candidate.resolved_model.clone().into());
		}

		let url = format!(
			"{}{}",
			candidate.provider.base_url_for(candidate.target_dialect),
			candidate.provider.default_path_for(candidate.target_dialect)
		);
		let mut req = self.http.post(&url).json(&canon_request);
		for (name, value) in candidate.provider.required_headers(candidate.target_dialect) {
			req = req.header(name, value);
		}

		let response = req.send().await.map_err(|e| classify_transport_error(&e))?;
		let status = response.status();
		let body = response.bytes().await.map_err(|e| classify_transport_error(&e))?;
		if let Some(err) = classify_status(status, &body) {
			return Err(err);
		}

		let converted = transform_response(candidate.target_dialect, inbound.dialect, &body)?;
		let out = serde_json::to_vec(&converted).map_err(|e| ProxyError::ConversionMalformed(e.to_string()))?;
		Ok((status.as_u16(), out))
	}

	/// Streaming path: opens the upstream connection and reads/converts the
	/// *first* chunk synchronously, still inside the candidate loop, before
	/// any bytes reach the HTTP edge (§4.7g) — a retryable failure up to and
	/// including that first read still has nothing written downstream, so it
	/// can fail over to the next candidate exactly like the non-streaming
	/// path. Only once a candidate has produced its first chunk is a
	/// forwarding task spawned to relay the remainder; from that point a
	/// mid-stream failure ends the stream rather than retrying (§5 "no
	/// failover after first byte").
	async fn dispatch_streaming(
		&self,
		inbound: &InboundRequest,
		candidates: &[Candidate],
		request_id: Id,
	) -> Result<DispatchOutcome, ProxyError> {
		let mut last_err = ProxyError::RouteUnavailable;
		for (attempt_index, candidate) in candidates.iter().enumerate() {
			let attempt_index = attempt_index as u32;
			let retry_config = self.retry_configs.get(candidate.route.retry_config_id);
			if attempt_index > retry_config.max_retries {
				break;
			}
			if attempt_index > 0 {
				self.metrics.retries_total.inc();
				tokio::time::sleep(retry_config.backoff_for(attempt_index - 1)).await;
			}

			let attempt_id = self.attempts.insert(ProxyUpstreamAttempt {
				id: 0,
				proxy_request_id: request_id,
				route_id: candidate.route.id,
				provider_id: candidate.provider.id,
				attempt_index,
				status: AttemptStatus::InProgress,
				request_model: inbound.model.clone(),
				mapped_model: candidate.resolved_model.clone(),
				response_model: None,
				input_tokens: 0,
				output_tokens: 0,
				error_kind: None,
				started_at_ms: now_ms(),
				finished_at_ms: None,
			});

			let (status, mut upstream) = match self.try_streaming(inbound, candidate).await {
				Ok(opened) => opened,
				Err(err) => {
					self.finish_attempt(
						attempt_id,
						request_id,
						candidate,
						attempt_index,
						inbound,
						AttemptStatus::Failed,
						Some(error_kind(&err)),
					);
					self
						.metrics
						.attempts_total
						.get_or_create(&attempt_label(&candidate.provider.kind, "failed"))
						.inc();
					if !err.retryable() {
						return Err(err);
					}
					warn!(route_id = candidate.route.id, error = %err, "streaming attempt failed before connecting, trying next candidate");
					last_err = err;
					continue;
				},
			};

			let mut capture = capture::ResponseCapture::default();
			capture.record_status(status);
			let mut parser = SseParser::new();
			let mut state = TransformState::new();

			let first = tokio::time::timeout(self.idle_read_timeout, upstream.next()).await;
			let first_chunk = match first {
				Ok(Some(Ok(bytes))) => Some(bytes),
				Ok(None) => None,
				Ok(Some(Err(e))) => {
					let err = classify_transport_error(&e);
					self.finish_attempt(
						attempt_id,
						request_id,
						candidate,
						attempt_index,
						inbound,
						AttemptStatus::Failed,
						Some(error_kind(&err)),
					);
					self
						.metrics
						.attempts_total
						.get_or_create(&attempt_label(&candidate.provider.kind, "failed"))
						.inc();
					if !err.retryable() {
						return Err(err);
					}
					warn!(route_id = candidate.route.id, error = %err, "streaming attempt failed on first read, trying next candidate");
					last_err = err;
					continue;
				},
				Err(_) => {
					self.finish_attempt(
						attempt_id,
						request_id,
						candidate,
						attempt_index,
						inbound,
						AttemptStatus::Failed,
						Some("timeout".to_string()),
					);
					self
						.metrics
						.attempts_total
						.get_or_create(&attempt_label(&candidate.provider.kind, "failed"))
						.inc();
					warn!(route_id = candidate.route.id, "streaming attempt timed out on first read, trying next candidate");
					last_err = ProxyError::UpstreamTimeout;
					continue;
				},
			};

			let (tx, rx) = tokio::sync::mpsc::channel(32);
			if let Some(bytes) = &first_chunk {
				capture.record_bytes(bytes);
				for event in parser.feed(bytes) {
					let out = transform_stream_chunk(inbound.dialect, candidate.target_dialect, &event, &mut state);
					// Nothing else holds `rx` yet (it hasn't been returned to the
					// HTTP edge), so this can't fail in practice; best-effort send.
					let _ = tx.send(out).await;
				}
			}

			let attempts = self.attempts.clone();
			let requests = self.requests.clone();
			let metrics = self.metrics.clone();
			let inbound_dialect = inbound.dialect;
			let target_dialect = candidate.target_dialect;
			let provider_kind = candidate.provider.kind;
			let route_id = candidate.route.id;
			let provider_id = candidate.provider.id;
			let request_model = inbound.model.clone();
			let mapped_model = candidate.resolved_model.clone();
			let idle_read_timeout = self.idle_read_timeout;
			tokio::spawn(async move {
				let mut final_status = AttemptStatus::Completed;
				let mut final_error: Option<String> = None;

				loop {
					let next = match tokio::time::timeout(idle_read_timeout, upstream.next()).await {
						Ok(next) => next,
						Err(_) => {
							final_status = AttemptStatus::Failed;
							final_error = Some("timeout".to_string());
							break;
						},
					};
					let Some(chunk) = next else { break };
					let bytes = match chunk {
						Ok(b) => b,
						Err(e) => {
							final_status = AttemptStatus::Failed;
							final_error = Some(if e.is_timeout() { "timeout" } else { "network" }.to_string());
							break;
						},
					};
					capture.record_bytes(&bytes);
					let mut client_gone = false;
					for event in parser.feed(&bytes) {
						let out = transform_stream_chunk(inbound_dialect, target_dialect, &event, &mut state);
						if tx.send(out).await.is_err() {
							// §5 "Cancellation": client closed the connection; stop
							// reading upstream and record the attempt as canceled,
							// never retried.
							client_gone = true;
							break;
						}
					}
					if client_gone {
						final_status = AttemptStatus::Failed;
						final_error = Some("client_canceled".to_string());
						break;
					}
				}

				attempts.update(ProxyUpstreamAttempt {
					id: attempt_id,
					proxy_request_id: request_id,
					route_id,
					provider_id,
					attempt_index,
					status: final_status,
					request_model,
					mapped_model,
					response_model: None,
					input_tokens: state.usage.input_tokens.unwrap_or(0),
					output_tokens: state.usage.output_tokens.unwrap_or(0),
					error_kind: final_error,
					started_at_ms: now_ms(),
					finished_at_ms: Some(now_ms()),
				});
				let attempt_outcome = if final_status == AttemptStatus::Completed { "completed" } else { "failed" };
				metrics.attempts_total.get_or_create(&attempt_label(&provider_kind, attempt_outcome)).inc();

				// §3.5: the ProxyRequest itself is only known COMPLETED once this
				// forwarding task has seen a terminal event with usage; finalize
				// it here rather than back in `dispatch()`, which already returned.
				let request_status =
					if final_status == AttemptStatus::Completed { ProxyRequestStatus::Completed } else { ProxyRequestStatus::Failed };
				finalize_request(requests.as_ref(), request_id, request_status);
				let request_label_name = if request_status == ProxyRequestStatus::Completed { "completed" } else { "failed" };
				metrics.requests_total.get_or_create(&request_label(inbound_dialect, request_label_name)).inc();
			});
			return Ok(DispatchOutcome::Stream { status, rx });
		}
		Err(last_err)
	}

	/// Opens the upstream connection and validates the status line before
	/// handing the body stream to the caller. No bytes are read from the
	/// body here, so a retry after this fails never risks a partial write.
	async fn try_streaming(
		&self,
		inbound: &InboundRequest,
		candidate: &Candidate,
	) -> Result<(u16, impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>>), ProxyError> {
		let mut canon_request = transform_request(inbound.dialect, candidate.target_dialect, &inbound.body)?;
		if let Some(obj) = canon_request.as_object_mut() {
			obj.insert("model".to_string(), candidate.resolved_model.clone().into());
			obj.insert("stream".to_string(), true.into());
		}

		let url = format!(
			"{}{}",
			candidate.provider.base_url_for(candidate.target_dialect),
			candidate.provider.default_path_for(candidate.target_dialect)
		);
		let mut req = self.http.post(&url).json(&canon_request);
		for (name, value) in candidate.provider.required_headers(candidate.target_dialect) {
			req = req.header(name, value);
		}

		let response = req.send().await.map_err(|e| classify_transport_error(&e))?;
		let status = response.status();
		if let Some(err) = classify_status(status, b"") {
			return Err(err);
		}
		Ok((status.as_u16(), response.bytes_stream()))
	}
}

fn request_label(dialect: Dialect, status: &str) -> RequestLabels {
	RequestLabels { dialect: format!("{dialect:?}"), status: status.to_string() }
}

fn attempt_label(provider_kind: &crate::model::ProviderKind, outcome: &str) -> AttemptLabels {
	AttemptLabels { provider: format!("{provider_kind:?}"), outcome: outcome.to_string() }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::RetryConfig;

	#[test]
	fn backoff_grows_geometrically_and_caps() {
		let cfg = RetryConfig { max_retries: 5, ..RetryConfig::default() };
		assert_eq!(cfg.backoff_for(0), Duration::from_millis(250));
		assert_eq!(cfg.backoff_for(1), Duration::from_millis(500));
		assert!(cfg.backoff_for(10) <= cfg.max_interval);
	}

	#[test]
	fn classify_status_maps_rate_limit_and_server_error() {
		assert!(matches!(
			classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, b""),
			Some(ProxyError::UpstreamRateLimit)
		));
		assert!(matches!(
			classify_status(reqwest::StatusCode::BAD_GATEWAY, b""),
			Some(ProxyError::UpstreamServerError)
		));
		assert!(classify_status(reqwest::StatusCode::OK, b"").is_none());
	}

	#[test]
	fn error_kind_names_match_the_taxonomy() {
		assert_eq!(error_kind(&ProxyError::UpstreamTimeout), "timeout");
		assert_eq!(error_kind(&ProxyError::UpstreamRateLimit), "rate_limit");
		assert_eq!(
			error_kind(&ProxyError::UpstreamBadRequest {
				status: reqwest::StatusCode::BAD_REQUEST,
				body: String::new()
			}),
			"bad_request_4xx"
		);
	}
}
