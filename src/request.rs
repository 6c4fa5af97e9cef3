use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NetworkError;

/// HTTP request methods with their RFC 7231 derived properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	Get,
	Head,
	Post,
	Put,
	Patch,
	Delete,
	Options,
	Trace,
	Connect,
}

impl Method {
	pub fn as_str(&self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
			Method::Options => "OPTIONS",
			Method::Trace => "TRACE",
			Method::Connect => "CONNECT",
		}
	}

	/// Whether a request body is expected for this method.
	pub fn has_body(&self) -> bool {
		matches!(self, Method::Post | Method::Put | Method::Patch)
	}

	/// Safe methods do not alter server state.
	pub fn is_safe(&self) -> bool {
		matches!(
			self,
			Method::Get | Method::Head | Method::Options | Method::Trace
		)
	}

	/// Idempotent methods may be retried without changing the outcome.
	pub fn is_idempotent(&self) -> bool {
		self.is_safe() || matches!(self, Method::Put | Method::Delete)
	}

	/// Whether responses to this method are eligible for caching.
	pub fn is_cacheable(&self) -> bool {
		matches!(self, Method::Get | Method::Head)
	}

	/// Query parameters are carried in the URL for these methods; the rest
	/// encode parameters into the body.
	pub fn encodes_parameters_in_url(&self) -> bool {
		matches!(self, Method::Get | Method::Head | Method::Delete)
	}
}

impl std::fmt::Display for Method {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Scheduling priority for a request, lowest to highest.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
	VeryLow,
	Low,
	#[default]
	Normal,
	High,
	VeryHigh,
}

impl RequestPriority {
	/// Numeric weight used for stable priority ordering in the batch queue.
	pub fn weight(&self) -> u8 {
		match self {
			RequestPriority::VeryLow => 0,
			RequestPriority::Low => 1,
			RequestPriority::Normal => 2,
			RequestPriority::High => 3,
			RequestPriority::VeryHigh => 4,
		}
	}
}

/// An ordered list of header name/value pairs.
///
/// Names compare case-insensitively and duplicates are permitted; insertion
/// order is preserved all the way to the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderList {
	entries: Vec<(String, String)>,
}

impl HeaderList {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a header, keeping any existing entries with the same name.
	pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.entries.push((name.into(), value.into()));
	}

	/// Replace all entries with `name` by a single entry with `value`.
	pub fn set(&mut self, name: &str, value: impl Into<String>) {
		self.entries
			.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		self.entries.push((name.to_string(), value.into()));
	}

	/// First value for `name`, if present.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	/// All values for `name` in insertion order.
	pub fn get_all(&self, name: &str) -> Vec<&str> {
		self.entries
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
			.collect()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn remove(&mut self, name: &str) {
		self.entries
			.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Overlay `other` on top of `self`: every name present in `other`
	/// replaces all same-named entries here. Later wins.
	pub fn merge(&mut self, other: &HeaderList) {
		for (name, _) in &other.entries {
			self.entries
				.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
		}
		for (name, value) in &other.entries {
			self.entries.push((name.clone(), value.clone()));
		}
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderList {
	fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
		Self {
			entries: iter
				.into_iter()
				.map(|(n, v)| (n.into(), v.into()))
				.collect(),
		}
	}
}

/// Request body payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
	/// Serialized as `application/json`.
	Json(serde_json::Value),
	/// Raw bytes with an explicit content type.
	Bytes { content_type: String, data: Bytes },
}

/// A typed application request before URL resolution.
///
/// `endpoint` is either absolute or relative to the configured base URL;
/// resolution happens inside the pipeline.
#[derive(Debug, Clone)]
pub struct Request {
	pub method: Method,
	pub endpoint: String,
	pub parameters: Vec<(String, String)>,
	pub headers: HeaderList,
	pub body: Option<RequestBody>,
	/// Overrides the configured default timeout when set.
	pub timeout: Option<Duration>,
	pub priority: RequestPriority,
	pub correlation_id: String,
}

impl Request {
	pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
		Self {
			method,
			endpoint: endpoint.into(),
			parameters: Vec::new(),
			headers: HeaderList::new(),
			body: None,
			timeout: None,
			priority: RequestPriority::Normal,
			correlation_id: new_correlation_id(),
		}
	}

	pub fn get(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Get, endpoint)
	}

	pub fn post(endpoint: impl Into<String>) -> Self {
		Self::new(Method::Post, endpoint)
	}

	pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.parameters.push((name.into(), value.into()));
		self
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.append(name, value);
		self
	}

	pub fn with_json(mut self, value: serde_json::Value) -> Self {
		self.body = Some(RequestBody::Json(value));
		self
	}

	pub fn with_bytes(mut self, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
		self.body = Some(RequestBody::Bytes {
			content_type: content_type.into(),
			data: data.into(),
		});
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn with_priority(mut self, priority: RequestPriority) -> Self {
		self.priority = priority;
		self
	}
}

/// A fully resolved request ready for the transport: absolute URL, final
/// header list, encoded body bytes.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
	pub method: Method,
	pub url: Url,
	pub headers: HeaderList,
	pub body: Option<Bytes>,
	pub timeout: Duration,
	pub correlation_id: String,
}

/// Wall-clock markers recorded around a single transport attempt.
#[derive(Debug, Clone, Copy)]
pub struct WireTimings {
	pub request_sent: Instant,
	pub first_byte: Option<Instant>,
	pub last_byte: Option<Instant>,
}

impl WireTimings {
	pub fn started_now() -> Self {
		Self {
			request_sent: Instant::now(),
			first_byte: None,
			last_byte: None,
		}
	}

	/// Total duration from send to last byte, when the response completed.
	pub fn total(&self) -> Option<Duration> {
		self.last_byte.map(|t| t.duration_since(self.request_sent))
	}
}

/// A wire response: status, headers, complete body bytes, and timings.
#[derive(Debug, Clone)]
pub struct Response {
	pub status: u16,
	pub headers: HeaderList,
	pub body: Bytes,
	pub timings: WireTimings,
}

impl Response {
	/// Decode the body as JSON into `T`. Decoding failure is terminal.
	pub fn decode<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
		if self.body.is_empty() {
			return Err(NetworkError::NoData);
		}
		serde_json::from_slice(&self.body)
			.map_err(|e| NetworkError::DecodingFailed(e.to_string()))
	}

	pub fn is_success(&self) -> bool {
		(200..=299).contains(&self.status)
	}
}

/// A short random hex id used to correlate log lines across one request's
/// lifetime, including retried attempts.
pub fn new_correlation_id() -> String {
	let raw: u64 = rand::thread_rng().r#gen();
	format!("{raw:016x}")
}
