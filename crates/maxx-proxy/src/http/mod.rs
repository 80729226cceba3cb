//! HTTP edge (C9): axum router wiring the routes of §6.1 onto the client
//! adapter, router, and dispatcher, with request-body size limiting ahead of
//! dialect classification, grounded in the teacher's `2_097_152`-byte
//! `axum::body::to_bytes` cap in `read_body_and_default_model`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use prometheus_client::registry::Registry;

use crate::client_adapter::{self, FingerprintInputs};
use crate::dialect::Dialect;
use crate::dispatch::{DispatchOutcome, Dispatcher, InboundRequest};
use crate::error::ProxyError;
use crate::model::Id;
use crate::routing::repository::ProjectRepository;

/// Matches the teacher's inbound-body cap (`read_body_and_default_model`).
pub const MAX_BODY_BYTES: usize = 2_097_152;

#[derive(Clone)]
pub struct AppState {
	pub dispatcher: Arc<Dispatcher>,
	pub projects: Arc<dyn ProjectRepository>,
	pub registry: Arc<Registry>,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/metrics", get(metrics))
		.route("/v1/messages", post(handle_claude))
		.route("/v1/chat/completions", post(handle_openai))
		.route("/v1/responses", post(handle_codex))
		.route("/v1beta/models/:model", post(handle_gemini))
		.route("/:project_slug/v1/messages", post(handle_claude_scoped))
		.route("/:project_slug/v1/chat/completions", post(handle_openai_scoped))
		.route("/:project_slug/v1/responses", post(handle_codex_scoped))
		.route("/:project_slug/v1beta/models/:model", post(handle_gemini_scoped))
		.layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
		.with_state(state)
}

async fn health() -> &'static str {
	"ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
	let mut buf = String::new();
	match prometheus_client::encoding::text::encode(&mut buf, &state.registry) {
		Ok(()) => (
			StatusCode::OK,
			[("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
			buf,
		)
			.into_response(),
		Err(err) => {
			tracing::error!(error = %err, "failed to encode metrics registry");
			StatusCode::INTERNAL_SERVER_ERROR.into_response()
		},
	}
}

/// §6.1's `/{project-slug}/...` prefix: resolve the slug through the
/// repository layer, falling back to the unscoped project (id 0) when the
/// first segment isn't a known slug — mirrors a request that simply never
/// had a project prefix.
fn resolve_project(state: &AppState, slug: &str) -> Id {
	state.projects.resolve_slug(slug).unwrap_or(0)
}

fn fingerprint_inputs(headers: &HeaderMap) -> (Option<String>, FingerprintInputs<'_>) {
	let session_header = headers.get("x-session-id").and_then(|v| v.to_str().ok()).map(str::to_string);
	let inputs = FingerprintInputs {
		authorization: headers.get("authorization").and_then(|v| v.to_str().ok()),
		api_key_header: headers.get("x-api-key").and_then(|v| v.to_str().ok()),
		user_agent: headers.get("user-agent").and_then(|v| v.to_str().ok()),
		client_ip: headers
			.get("x-forwarded-for")
			.and_then(|v| v.to_str().ok())
			.unwrap_or("unknown"),
	};
	(session_header, inputs)
}

async fn dispatch_fixed_path(
	state: &AppState,
	project_id: Id,
	path: &str,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Response, ProxyError> {
	let value: Value = serde_json::from_slice(&body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;
	let dialect = client_adapter::classify(path, &value)?;
	dispatch_classified(state, project_id, dialect, path, headers, value).await
}

async fn dispatch_classified(
	state: &AppState,
	project_id: Id,
	dialect: Dialect,
	path: &str,
	headers: HeaderMap,
	body: Value,
) -> Result<Response, ProxyError> {
	let model = client_adapter::extract_model(dialect, path, &body).unwrap_or_default();
	let is_stream = if dialect == Dialect::Gemini {
		path.ends_with(":streamGenerateContent")
	} else {
		client_adapter::extract_stream_flag(&body)
	};
	let (session_header, inputs) = fingerprint_inputs(&headers);
	let fingerprint = client_adapter::session_fingerprint(&body, session_header.as_deref(), &inputs);
	let bytes = serde_json::to_vec(&body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;

	let inbound = InboundRequest {
		project_id,
		dialect,
		model,
		is_stream,
		body: bytes,
		session_fingerprint: fingerprint,
	};

	match state.dispatcher.dispatch(inbound).await? {
		DispatchOutcome::Once { status, body } => {
			let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
			Ok((status, [("content-type", "application/json")], body).into_response())
		},
		DispatchOutcome::Stream { status, rx } => {
			let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
			let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
			let body = axum::body::Body::from_stream(stream);
			Ok((
				status,
				[
					("content-type", "text/event-stream"),
					("cache-control", "no-cache"),
					("connection", "keep-alive"),
				],
				body,
			)
				.into_response())
		},
	}
}

async fn handle_claude(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
	into_response(dispatch_fixed_path(&state, 0, "/v1/messages", headers, body).await)
}

async fn handle_openai(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
	into_response(dispatch_fixed_path(&state, 0, "/v1/chat/completions", headers, body).await)
}

async fn handle_codex(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
	into_response(dispatch_fixed_path(&state, 0, "/v1/responses", headers, body).await)
}

/// Gemini's `:model` path segment actually carries `{model}:{action}` with no
/// separating slash (e.g. `gemini-2.5-pro:streamGenerateContent`), so axum's
/// matcher hands the whole thing to us as one captured segment. Split out the
/// action instead of hard-coding `generateContent` when rebuilding the path,
/// or streaming requests silently lose their `stream*` suffix.
fn split_gemini_model_action(raw: &str) -> (&str, &str) {
	raw.split_once(':').unwrap_or((raw, "generateContent"))
}

async fn handle_gemini(
	State(state): State<AppState>,
	Path(raw_model): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let (model, action) = split_gemini_model_action(&raw_model);
	let path = format!("/v1beta/models/{model}:{action}");
	into_response(dispatch_fixed_path(&state, 0, &path, headers, body).await)
}

async fn handle_claude_scoped(
	State(state): State<AppState>,
	Path(slug): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let project_id = resolve_project(&state, &slug);
	into_response(dispatch_fixed_path(&state, project_id, "/v1/messages", headers, body).await)
}

async fn handle_openai_scoped(
	State(state): State<AppState>,
	Path(slug): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let project_id = resolve_project(&state, &slug);
	into_response(dispatch_fixed_path(&state, project_id, "/v1/chat/completions", headers, body).await)
}

async fn handle_codex_scoped(
	State(state): State<AppState>,
	Path(slug): Path<String>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let project_id = resolve_project(&state, &slug);
	into_response(dispatch_fixed_path(&state, project_id, "/v1/responses", headers, body).await)
}

async fn handle_gemini_scoped(
	State(state): State<AppState>,
	Path((slug, raw_model)): Path<(String, String)>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let project_id = resolve_project(&state, &slug);
	let (model, action) = split_gemini_model_action(&raw_model);
	let path = format!("/v1beta/models/{model}:{action}");
	into_response(dispatch_fixed_path(&state, project_id, &path, headers, body).await)
}

fn into_response(result: Result<Response, ProxyError>) -> Response {
	match result {
		Ok(response) => response,
		Err(ProxyError::ClientCanceled) => {
			info!("client canceled request before dispatch completed");
			StatusCode::OK.into_response()
		},
		Err(err) => err.into_response(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gemini_model_action_splits_on_last_colon() {
		assert_eq!(split_gemini_model_action("gemini-2.5-pro:streamGenerateContent"), ("gemini-2.5-pro", "streamGenerateContent"));
		assert_eq!(split_gemini_model_action("gemini-2.5-pro:generateContent"), ("gemini-2.5-pro", "generateContent"));
		assert_eq!(split_gemini_model_action("gemini-2.5-pro"), ("gemini-2.5-pro", "generateContent"));
	}

	#[test]
	fn resolve_project_defaults_to_zero_for_unknown_slug() {
		use crate::routing::repository::InMemoryStore;
		let store = Arc::new(InMemoryStore::new());
		store.add_project_slug("acme", 7);
		let state =
			AppState { dispatcher: test_dispatcher(), projects: store.clone(), registry: Arc::new(Registry::default()) };
		assert_eq!(resolve_project(&state, "acme"), 7);
		assert_eq!(resolve_project(&state, "unknown-slug"), 0);
	}

	fn test_dispatcher() -> Arc<Dispatcher> {
		use crate::routing::repository::InMemoryStore;
		let store = Arc::new(InMemoryStore::new());
		let mut registry = Registry::default();
		let metrics = Arc::new(maxx_core::metrics::ProxyMetrics::new(&mut registry));
		Arc::new(Dispatcher {
			http: reqwest::Client::new(),
			idle_read_timeout: std::time::Duration::from_secs(300),
			routes: store.clone(),
			providers: store.clone(),
			strategies: store.clone(),
			cooldowns: store.clone(),
			retry_configs: store.clone(),
			requests: store.clone(),
			attempts: store.clone(),
			sessions: store,
			metrics,
		})
	}
}
