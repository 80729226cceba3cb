use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error taxonomy for the proxy edge, §7 of the spec. Each variant carries the
/// HTTP status it maps to; retryable upstream classes are handled internally
/// by the dispatcher and only surface here once retries are exhausted.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("cannot classify inbound request dialect")]
	DialectUnknown,

	#[error("no candidate route is available")]
	RouteUnavailable,

	#[error("no converter registered for {from:?} -> {to:?}")]
	ConversionUnsupported { from: crate::dialect::Dialect, to: crate::dialect::Dialect },

	#[error("request conversion failed: {0}")]
	ConversionMalformed(String),

	#[error("upstream connect failed: {0}")]
	UpstreamConnect(String),

	#[error("upstream connect timed out")]
	UpstreamTimeout,

	#[error("upstream authentication rejected")]
	UpstreamAuth,

	#[error("upstream rate limited")]
	UpstreamRateLimit,

	#[error("upstream rejected the request: {status}: {body}")]
	UpstreamBadRequest { status: StatusCode, body: String },

	#[error("upstream returned a server error")]
	UpstreamServerError,

	#[error("stream aborted after bytes were flushed to the client")]
	StreamAborted,

	#[error("client canceled the request")]
	ClientCanceled,

	#[error("session or project admission denied")]
	Rejected,

	#[error("request body was invalid: {0}")]
	BadRequest(String),

	#[error("internal error: {0}")]
	Internal(#[from] anyhow::Error),
}

impl ProxyError {
	pub fn status(&self) -> StatusCode {
		use ProxyError::*;
		match self {
			DialectUnknown | BadRequest(_) => StatusCode::BAD_REQUEST,
			RouteUnavailable => StatusCode::SERVICE_UNAVAILABLE,
			ConversionUnsupported { .. } => StatusCode::INTERNAL_SERVER_ERROR,
			ConversionMalformed(_) => StatusCode::BAD_REQUEST,
			UpstreamConnect(_) | UpstreamTimeout | UpstreamServerError => StatusCode::BAD_GATEWAY,
			UpstreamAuth => StatusCode::BAD_GATEWAY,
			UpstreamRateLimit => StatusCode::TOO_MANY_REQUESTS,
			UpstreamBadRequest { status, .. } => *status,
			StreamAborted => StatusCode::BAD_GATEWAY,
			ClientCanceled => StatusCode::OK, // never actually written to the client
			Rejected => StatusCode::FORBIDDEN,
			Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The retryable classification from §4.7(d)/§7. Non-retryable classes are
	/// surfaced to the client immediately; retryable ones loop internally.
	pub fn retryable(&self) -> bool {
		matches!(
			self,
			ProxyError::UpstreamConnect(_)
				| ProxyError::UpstreamTimeout
				| ProxyError::UpstreamRateLimit
				| ProxyError::UpstreamServerError
		)
	}
}

impl IntoResponse for ProxyError {
	fn into_response(self) -> Response {
		if let ProxyError::UpstreamBadRequest { status, body } = &self {
			// §7: surface status-and-body verbatim when the dialects match.
			return (*status, body.clone()).into_response();
		}
		let status = self.status();
		let body = json!({ "error": { "type": error_type(&self), "message": self.to_string() } });
		(status, Json(body)).into_response()
	}
}

fn error_type(e: &ProxyError) -> &'static str {
	use ProxyError::*;
	match e {
		DialectUnknown => "dialect_unknown",
		RouteUnavailable => "route_unavailable",
		ConversionUnsupported { .. } => "conversion_unsupported",
		ConversionMalformed(_) => "conversion_malformed",
		UpstreamConnect(_) => "upstream_connect",
		UpstreamTimeout => "upstream_timeout",
		UpstreamAuth => "upstream_auth",
		UpstreamRateLimit => "upstream_rate_limit",
		UpstreamBadRequest { .. } => "upstream_bad_request",
		UpstreamServerError => "upstream_server_error",
		StreamAborted => "stream_aborted",
		ClientCanceled => "client_canceled",
		Rejected => "rejected",
		BadRequest(_) => "bad_request",
		Internal(_) => "internal",
	}
}
