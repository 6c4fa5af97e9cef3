use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Unified error taxonomy for the networking stack.
///
/// Every failure surfaced to a caller is one of these kinds. Variants carry
/// owned data (strings, durations, status codes) rather than source errors so
/// they can be cloned into batch result arrays and shared between concurrent
/// waiters of a coalesced token refresh.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NetworkError {
	// Connection
	#[error("no network connection available")]
	NoConnection,

	#[error("connection timed out after {0:?}")]
	ConnectionTimeout(Duration),

	#[error("connection lost before the response completed")]
	ConnectionLost,

	#[error("cannot connect to host {0}")]
	CannotConnectToHost(String),

	// Request
	#[error("invalid URL: {0}")]
	InvalidUrl(String),

	#[error("invalid request")]
	InvalidRequest,

	#[error("request was cancelled")]
	Cancelled,

	#[error("too many requests")]
	TooManyRequests { retry_after: Option<Duration> },

	#[error("payload exceeds maximum size of {max_size} bytes")]
	PayloadTooLarge { max_size: usize },

	// Response
	#[error("invalid response")]
	InvalidResponse,

	#[error("response contained no data")]
	NoData,

	#[error("failed to decode response: {0}")]
	DecodingFailed(String),

	#[error("failed to encode request body: {0}")]
	EncodingFailed(String),

	#[error("unacceptable status code {code}")]
	InvalidStatusCode { code: u16, body: Option<Bytes> },

	// Server
	#[error("server error {code}")]
	ServerError { code: u16, message: Option<String> },

	#[error("service unavailable")]
	ServiceUnavailable { retry_after: Option<Duration> },

	#[error("gateway timeout")]
	GatewayTimeout,

	// Auth
	#[error("unauthorized{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
	Unauthorized { reason: Option<String> },

	#[error("forbidden")]
	Forbidden,

	#[error("token is expired")]
	TokenExpired,

	#[error("invalid credentials")]
	InvalidCredentials,

	#[error("no refresh token available")]
	MissingRefreshToken,

	#[error("authorization is pending user action")]
	AuthorizationPending,

	#[error("token endpoint asked to slow down polling")]
	SlowDown,

	#[error("device code expired before authorization completed")]
	DeviceCodeExpired,

	#[error("OAuth2 state parameter mismatch")]
	StateMismatch,

	#[error("unsupported OAuth2 grant type: {0}")]
	UnsupportedGrantType(String),

	#[error("JWT signing failed: {0}")]
	JwtSigningFailed(String),

	// Security
	#[error("SSL certificate error: {0}")]
	SslCertificateError(String),

	#[error("connection is not secure")]
	InsecureConnection,

	#[error("server certificate chain matched no configured pin")]
	TlsPinFailure,

	// HTTP/2
	#[error("HTTP/2 protocol error")]
	ProtocolError,

	#[error("HTTP/2 frame exceeds the negotiated maximum size")]
	FrameSizeError,

	#[error("HTTP/2 flow control violation")]
	FlowControlError,

	#[error("HTTP/2 stream is closed")]
	StreamClosed,

	#[error("peer sent GOAWAY (last stream {last_stream_id}, code {code:#x})")]
	Goaway { last_stream_id: u32, code: u32 },
}

impl NetworkError {
	/// Whether the pipeline may transparently retry after this error.
	///
	/// Used internally by the retry loop; callers see only the terminal error
	/// once the retry budget is spent.
	pub fn is_retryable(&self) -> bool {
		match self {
			NetworkError::NoConnection
			| NetworkError::ConnectionTimeout(_)
			| NetworkError::ConnectionLost
			| NetworkError::CannotConnectToHost(_)
			| NetworkError::TooManyRequests { .. }
			| NetworkError::ServiceUnavailable { .. }
			| NetworkError::GatewayTimeout
			| NetworkError::Goaway { .. } => true,
			NetworkError::ServerError { code, .. } => *code >= 500,
			// 408 and 429 are the only retryable client statuses
			NetworkError::InvalidStatusCode { code, .. } => {
				*code == 408 || *code == 429 || (500..=599).contains(code)
			}
			_ => false,
		}
	}

	/// A human-oriented hint for recovering from this error, if one exists.
	pub fn recovery_suggestion(&self) -> Option<&'static str> {
		match self {
			NetworkError::NoConnection => {
				Some("Check the device's network connection and try again.")
			}
			NetworkError::ConnectionTimeout(_) | NetworkError::GatewayTimeout => {
				Some("The server is slow to respond; retry later or raise the timeout.")
			}
			NetworkError::TooManyRequests { .. } => {
				Some("Reduce the request rate or honor the Retry-After interval.")
			}
			NetworkError::ServiceUnavailable { .. } => {
				Some("The service is temporarily down; retry after a short delay.")
			}
			NetworkError::Unauthorized { .. } | NetworkError::TokenExpired => {
				Some("Re-authenticate or refresh the access token.")
			}
			NetworkError::MissingRefreshToken => {
				Some("Log in again to obtain a new refresh token.")
			}
			NetworkError::TlsPinFailure => Some(
				"The server's certificate chain does not match the configured pins. \
				 Update the pin set only if the key rotation is expected.",
			),
			NetworkError::PayloadTooLarge { .. } => {
				Some("Reduce the request body size or use a chunked upload.")
			}
			NetworkError::DeviceCodeExpired => {
				Some("Restart the device authorization flow to get a fresh code.")
			}
			_ => None,
		}
	}

	/// True for authentication failures that warrant a single token refresh
	/// before surfacing.
	pub fn is_auth_error(&self) -> bool {
		matches!(
			self,
			NetworkError::Unauthorized { .. } | NetworkError::TokenExpired
		)
	}
}
