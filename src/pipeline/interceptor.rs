use std::io::Read;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use log::{debug, trace};

use crate::error::NetworkError;
use crate::request::{PreparedRequest, Response};

/// A transform applied to an outgoing request before transport.
///
/// Interceptors run in registration order; each receives the previous
/// output and may replace the request wholesale or fail the pipeline.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
	async fn intercept(&self, request: PreparedRequest) -> Result<PreparedRequest, NetworkError>;
}

/// A transform applied to received response bytes before validation and
/// decoding.
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
	async fn process(&self, response: Response) -> Result<Response, NetworkError>;
}

/// Sets a `User-Agent` header when the request has none.
pub struct UserAgentInterceptor {
	value: String,
}

impl UserAgentInterceptor {
	pub fn new(value: impl Into<String>) -> Self {
		Self { value: value.into() }
	}
}

impl Default for UserAgentInterceptor {
	fn default() -> Self {
		Self::new(concat!("bifrost/", env!("CARGO_PKG_VERSION")))
	}
}

#[async_trait]
impl RequestInterceptor for UserAgentInterceptor {
	async fn intercept(
		&self,
		mut request: PreparedRequest,
	) -> Result<PreparedRequest, NetworkError> {
		if !request.headers.contains("user-agent") {
			request.headers.append("User-Agent", self.value.clone());
		}
		Ok(request)
	}
}

/// Logs every outgoing request with its correlation id.
#[derive(Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl RequestInterceptor for LoggingInterceptor {
	async fn intercept(&self, request: PreparedRequest) -> Result<PreparedRequest, NetworkError> {
		debug!(
			"[{}] {} {} ({} bytes)",
			request.correlation_id,
			request.method,
			request.url,
			request.body.as_ref().map(Bytes::len).unwrap_or(0)
		);
		Ok(request)
	}
}

/// Transparently decompresses `Content-Encoding: gzip` bodies.
#[derive(Default)]
pub struct GzipResponseProcessor;

#[async_trait]
impl ResponseProcessor for GzipResponseProcessor {
	async fn process(&self, mut response: Response) -> Result<Response, NetworkError> {
		let is_gzip = response
			.headers
			.get("content-encoding")
			.map(|v| v.eq_ignore_ascii_case("gzip"))
			.unwrap_or(false);
		if !is_gzip || response.body.is_empty() {
			return Ok(response);
		}

		let mut decoder = GzDecoder::new(&response.body[..]);
		let mut decompressed = Vec::with_capacity(response.body.len() * 4);
		decoder
			.read_to_end(&mut decompressed)
			.map_err(|e| NetworkError::DecodingFailed(format!("gzip: {e}")))?;

		trace!(
			"decompressed {} bytes to {}",
			response.body.len(),
			decompressed.len()
		);
		response.body = Bytes::from(decompressed);
		response.headers.remove("content-encoding");
		response.headers.remove("content-length");
		Ok(response)
	}
}
