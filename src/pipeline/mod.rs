pub mod interceptor;
pub mod retry;
pub mod transport;

pub use interceptor::{
	GzipResponseProcessor, LoggingInterceptor, RequestInterceptor, ResponseProcessor,
	UserAgentInterceptor,
};
pub use retry::{RetryCondition, RetryPolicy, RetryStrategy};
pub use transport::{NetworkTransport, Transport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::AuthManager;
use crate::config::ClientConfiguration;
use crate::error::NetworkError;
use crate::observability::{MetricsRegistry, PerformanceMonitor, RequestPerformance};
use crate::request::{PreparedRequest, Request, RequestBody, Response};
use transport::error_for_status;

/// The request execution pipeline.
///
/// One call to `execute` runs: URL resolution, header assembly, the
/// interceptor chain, auth injection, transport, response processors,
/// status validation with retry, leaving decoding to the typed wrappers.
pub struct NetworkClient {
	config: RwLock<ClientConfiguration>,
	transport: RwLock<Arc<dyn Transport>>,
	/// Whether the transport was injected by the caller and must survive
	/// configuration updates.
	custom_transport: bool,
	auth: RwLock<Option<Arc<AuthManager>>>,
	interceptors: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
	processors: RwLock<Vec<Arc<dyn ResponseProcessor>>>,
	/// Cancellation tokens of in-flight requests, keyed by correlation id.
	active: Mutex<HashMap<String, CancellationToken>>,
	limiter: RwLock<Arc<Semaphore>>,
	monitor: Arc<PerformanceMonitor>,
	metrics: Arc<MetricsRegistry>,
}

impl NetworkClient {
	/// Build a client with the production transport.
	pub fn new(config: ClientConfiguration) -> anyhow::Result<Self> {
		let transport = Arc::new(NetworkTransport::new(&config.security)?);
		Ok(Self::assemble(config, transport, false))
	}

	/// Build a client around a caller-supplied transport (tests, adapters).
	pub fn with_transport(config: ClientConfiguration, transport: Arc<dyn Transport>) -> Self {
		Self::assemble(config, transport, true)
	}

	fn assemble(
		config: ClientConfiguration,
		transport: Arc<dyn Transport>,
		custom_transport: bool,
	) -> Self {
		let limiter = Arc::new(Semaphore::new(config.max_concurrent_requests));
		Self {
			config: RwLock::new(config),
			transport: RwLock::new(transport),
			custom_transport,
			auth: RwLock::new(None),
			interceptors: RwLock::new(Vec::new()),
			processors: RwLock::new(Vec::new()),
			active: Mutex::new(HashMap::new()),
			limiter: RwLock::new(limiter),
			monitor: PerformanceMonitor::new(Default::default()),
			metrics: Arc::new(MetricsRegistry::new()),
		}
	}

	pub async fn set_auth_manager(&self, auth: Arc<AuthManager>) {
		let metrics = self.metrics.clone();
		auth.on_token_refresh(Arc::new(move |_| metrics.token_refreshes_total.inc()));
		*self.auth.write().await = Some(auth);
	}

	pub async fn add_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
		self.interceptors.write().await.push(interceptor);
	}

	pub async fn add_response_processor(&self, processor: Arc<dyn ResponseProcessor>) {
		self.processors.write().await.push(processor);
	}

	/// Replace the configuration. The concurrency limiter is rebuilt; the
	/// transport is rebuilt too unless it was caller-supplied.
	pub async fn update_configuration(
		&self,
		config: ClientConfiguration,
	) -> anyhow::Result<()> {
		if !self.custom_transport {
			let transport = Arc::new(NetworkTransport::new(&config.security)?);
			*self.transport.write().await = transport;
		}
		*self.limiter.write().await = Arc::new(Semaphore::new(config.max_concurrent_requests));
		*self.config.write().await = config;
		Ok(())
	}

	pub async fn configuration(&self) -> ClientConfiguration {
		self.config.read().await.clone()
	}

	pub fn monitor(&self) -> Arc<PerformanceMonitor> {
		self.monitor.clone()
	}

	pub fn metrics_registry(&self) -> Arc<MetricsRegistry> {
		self.metrics.clone()
	}

	/// Cancel one in-flight request by correlation id.
	pub async fn cancel_request(&self, correlation_id: &str) -> bool {
		match self.active.lock().await.get(correlation_id) {
			Some(token) => {
				token.cancel();
				true
			}
			None => false,
		}
	}

	/// Cancel everything currently in flight.
	pub async fn cancel_all(&self) {
		for token in self.active.lock().await.values() {
			token.cancel();
		}
	}

	/// Execute a request to completion.
	pub async fn execute(&self, request: Request) -> Result<Response, NetworkError> {
		self.execute_with_cancel(request, CancellationToken::new())
			.await
	}

	/// Execute under an externally owned cancellation token.
	pub async fn execute_with_cancel(
		&self,
		request: Request,
		cancel: CancellationToken,
	) -> Result<Response, NetworkError> {
		self.execute_with_policy(request, cancel, None).await
	}

	/// Execute with an overriding retry policy (used by the batch executor
	/// for per-item policies).
	pub async fn execute_with_policy(
		&self,
		request: Request,
		cancel: CancellationToken,
		policy_override: Option<RetryPolicy>,
	) -> Result<Response, NetworkError> {
		let config = self.config.read().await.clone();
		let limiter = self.limiter.read().await.clone();

		let _permit = tokio::select! {
			_ = cancel.cancelled() => return Err(NetworkError::Cancelled),
			permit = limiter.acquire_owned() => {
				permit.map_err(|_| NetworkError::Cancelled)?
			}
		};

		let correlation_id = request.correlation_id.clone();
		self.active
			.lock()
			.await
			.insert(correlation_id.clone(), cancel.clone());

		let started_at = Instant::now();
		let endpoint = request.endpoint.clone();
		let method = request.method;
		let result = self
			.run_pipeline(&config, &request, &cancel, policy_override)
			.await;
		self.active.lock().await.remove(&correlation_id);

		if config.enable_metrics {
			self.metrics.requests_total.inc();
			self.metrics
				.request_duration_seconds
				.observe(started_at.elapsed().as_secs_f64());
			let (status, error_kind, bytes) = match &result {
				Ok(response) => (Some(response.status), None, response.body.len() as u64),
				Err(e) => {
					self.metrics.request_failures_total.inc();
					(None, Some(error_label(e).to_string()), 0)
				}
			};
			if let Ok(response) = &result {
				self.metrics.bytes_received_total.inc_by(response.body.len() as f64);
			}
			self.monitor
				.record(RequestPerformance {
					endpoint,
					method,
					status,
					error_kind,
					started_at,
					ended_at: Instant::now(),
					bytes_received: bytes,
				})
				.await;
		}

		result
	}

	/// Execute and decode the body into `T`. Decoding failure is terminal.
	pub async fn execute_as<T: DeserializeOwned>(
		&self,
		request: Request,
	) -> Result<T, NetworkError> {
		let response = self.execute(request).await?;
		response.decode()
	}

	async fn run_pipeline(
		&self,
		config: &ClientConfiguration,
		request: &Request,
		cancel: &CancellationToken,
		policy_override: Option<RetryPolicy>,
	) -> Result<Response, NetworkError> {
		// Steps 1 and 2: resolution and header assembly.
		let mut prepared = prepare(config, request)?;

		// Step 3: the interceptor chain, in registration order.
		let interceptors = self.interceptors.read().await.clone();
		for interceptor in &interceptors {
			if cancel.is_cancelled() {
				return Err(NetworkError::Cancelled);
			}
			prepared = interceptor.intercept(prepared).await?;
		}

		// Step 4: auth injection, last, so prior interceptors stay
		// deterministic. May suspend to refresh a token.
		let auth = self.auth.read().await.clone();
		if let Some(auth) = &auth {
			let headers = auth.auth_headers().await?;
			prepared.headers.merge(&headers);
		}

		let policy = policy_override.unwrap_or_else(|| config.retry_policy.clone());
		let processors = self.processors.read().await.clone();
		let transport = self.transport.read().await.clone();

		// Steps 5 through 7: transport, processors, validation, retry. Each
		// retry restarts here, not at resolution.
		let mut attempts: u32 = 0;
		let mut auth_retry_done = false;
		loop {
			attempts += 1;
			if cancel.is_cancelled() {
				return Err(NetworkError::Cancelled);
			}

			let attempt = self
				.one_attempt(&transport, &prepared, &processors, cancel)
				.await;

			let error = match attempt {
				Ok(response) => return Ok(response),
				Err(e) => e,
			};

			// Auth errors get a single refresh attempt before surfacing.
			if error.is_auth_error() && !auth_retry_done {
				auth_retry_done = true;
				if let Some(auth) = &auth {
					match auth.refresh_after_unauthorized().await {
						Ok(_) => {
							debug!(
								"[{}] retrying after token refresh",
								prepared.correlation_id
							);
							let headers = auth.auth_headers().await?;
							prepared.headers.merge(&headers);
							continue;
						}
						Err(refresh_error) => {
							debug!(
								"[{}] refresh not possible: {refresh_error}",
								prepared.correlation_id
							);
							return Err(error);
						}
					}
				}
				return Err(error);
			}

			if !policy.should_retry(prepared.method, &error, attempts) {
				return Err(error);
			}

			let delay = retry_after_of(&error).unwrap_or_else(|| policy.delay_for_attempt(attempts));
			warn!(
				"[{}] attempt {attempts} failed ({error}), retrying after {delay:?}",
				prepared.correlation_id
			);
			self.metrics.request_retries_total.inc();

			// A cancelled request must not schedule further attempts.
			tokio::select! {
				_ = cancel.cancelled() => return Err(NetworkError::Cancelled),
				_ = tokio::time::sleep(delay) => {}
			}
		}
	}

	/// One transport attempt: send, process, validate.
	async fn one_attempt(
		&self,
		transport: &Arc<dyn Transport>,
		prepared: &PreparedRequest,
		processors: &[Arc<dyn ResponseProcessor>],
		cancel: &CancellationToken,
	) -> Result<Response, NetworkError> {
		// Step 5: transport, bounded by the per-attempt timeout and the
		// cancellation token; the first to fire wins.
		let send = transport.send(prepared);
		let response = tokio::select! {
			_ = cancel.cancelled() => return Err(NetworkError::Cancelled),
			outcome = tokio::time::timeout(prepared.timeout, send) => match outcome {
				Ok(result) => result?,
				Err(_) => return Err(NetworkError::ConnectionTimeout(prepared.timeout)),
			},
		};

		// Step 6: response processors, in registration order.
		let mut response = response;
		for processor in processors {
			response = processor.process(response).await?;
		}

		// Step 7: status validation.
		match error_for_status(&response) {
			None => Ok(response),
			Some(error) => Err(error),
		}
	}
}

/// Steps 1 and 2: resolve the URL, encode parameters and body, and overlay
/// per-request headers on the configured defaults.
fn prepare(config: &ClientConfiguration, request: &Request) -> Result<PreparedRequest, NetworkError> {
	let endpoint = request.endpoint.trim();
	let mut url = if endpoint.contains("://") {
		Url::parse(endpoint).map_err(|_| NetworkError::InvalidUrl(endpoint.to_string()))?
	} else {
		let base = config
			.base_url
			.as_deref()
			.ok_or_else(|| NetworkError::InvalidUrl(endpoint.to_string()))?;
		let joined = format!(
			"{}/{}",
			base.trim_end_matches('/'),
			endpoint.trim_start_matches('/')
		);
		Url::parse(&joined).map_err(|_| NetworkError::InvalidUrl(joined))?
	};

	let mut headers = config.default_headers.clone();
	headers.merge(&request.headers);

	let parameters_in_url =
		request.method.encodes_parameters_in_url() || request.body.is_some();
	if parameters_in_url && !request.parameters.is_empty() {
		let mut pairs = url.query_pairs_mut();
		for (name, value) in &request.parameters {
			pairs.append_pair(name, value);
		}
	}

	let body = match &request.body {
		Some(RequestBody::Json(value)) => {
			if !headers.contains("content-type") {
				headers.append("Content-Type", "application/json");
			}
			Some(Bytes::from(
				serde_json::to_vec(value)
					.map_err(|e| NetworkError::EncodingFailed(e.to_string()))?,
			))
		}
		Some(RequestBody::Bytes { content_type, data }) => {
			if !headers.contains("content-type") {
				headers.append("Content-Type", content_type.clone());
			}
			Some(data.clone())
		}
		None if !parameters_in_url && !request.parameters.is_empty() => {
			// Only parameters and a body-bearing method: form-encode them.
			if !headers.contains("content-type") {
				headers.append("Content-Type", "application/x-www-form-urlencoded");
			}
			Some(Bytes::from(transport::encode_form(&request.parameters)))
		}
		None => None,
	};

	Ok(PreparedRequest {
		method: request.method,
		url,
		headers,
		body,
		timeout: request.timeout.unwrap_or(config.timeout),
		correlation_id: request.correlation_id.clone(),
	})
}

/// Retry-After style delays carried inside errors.
fn retry_after_of(error: &NetworkError) -> Option<Duration> {
	match error {
		NetworkError::TooManyRequests { retry_after }
		| NetworkError::ServiceUnavailable { retry_after } => *retry_after,
		_ => None,
	}
}

/// Coarse label for observability; the monitor keys alerts off these.
fn error_label(error: &NetworkError) -> &'static str {
	match error {
		NetworkError::ConnectionTimeout(_) | NetworkError::GatewayTimeout => "timeout",
		NetworkError::NoConnection
		| NetworkError::ConnectionLost
		| NetworkError::CannotConnectToHost(_) => "connection",
		NetworkError::Cancelled => "cancelled",
		NetworkError::TlsPinFailure
		| NetworkError::SslCertificateError(_)
		| NetworkError::InsecureConnection => "security",
		NetworkError::Unauthorized { .. }
		| NetworkError::Forbidden
		| NetworkError::TokenExpired => "auth",
		NetworkError::InvalidStatusCode { .. }
		| NetworkError::ServerError { .. }
		| NetworkError::ServiceUnavailable { .. } => "status",
		_ => "error",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;

	use crate::request::{HeaderList, WireTimings};

	/// Transport stub producing a scripted sequence of outcomes.
	struct ScriptedTransport {
		script: Mutex<Vec<Result<u16, NetworkError>>>,
		hits: AtomicUsize,
		last_headers: Mutex<Option<HeaderList>>,
		delay: Duration,
	}

	impl ScriptedTransport {
		fn new(script: Vec<Result<u16, NetworkError>>) -> Arc<Self> {
			Arc::new(Self {
				script: Mutex::new(script),
				hits: AtomicUsize::new(0),
				last_headers: Mutex::new(None),
				delay: Duration::ZERO,
			})
		}

		fn with_delay(script: Vec<Result<u16, NetworkError>>, delay: Duration) -> Arc<Self> {
			Arc::new(Self {
				script: Mutex::new(script),
				hits: AtomicUsize::new(0),
				last_headers: Mutex::new(None),
				delay,
			})
		}
	}

	#[async_trait]
	impl Transport for ScriptedTransport {
		async fn send(&self, request: &PreparedRequest) -> Result<Response, NetworkError> {
			self.hits.fetch_add(1, Ordering::SeqCst);
			*self.last_headers.lock().await = Some(request.headers.clone());
			if self.delay > Duration::ZERO {
				tokio::time::sleep(self.delay).await;
			}
			let mut script = self.script.lock().await;
			let next = if script.is_empty() {
				Ok(200)
			} else {
				script.remove(0)
			};
			let status = next?;
			Ok(Response {
				status,
				headers: HeaderList::new(),
				body: Bytes::from_static(br#"{"ok":true}"#),
				timings: WireTimings::started_now(),
			})
		}
	}

	fn config() -> ClientConfiguration {
		let mut c = ClientConfiguration::default();
		c.base_url = Some("https://api.example.com".into());
		c.retry_policy = RetryPolicy {
			max_attempts: 3,
			strategy: RetryStrategy::Constant(Duration::from_millis(5)),
			condition: RetryCondition::OnRetryableError,
		};
		c
	}

	#[tokio::test]
	async fn get_with_retry_on_503() {
		let transport = ScriptedTransport::new(vec![
			Err(NetworkError::ServiceUnavailable { retry_after: None }),
			Ok(200),
		]);
		let client = NetworkClient::with_transport(config(), transport.clone());

		#[derive(serde::Deserialize)]
		struct Ping {
			ok: bool,
		}
		let ping: Ping = client.execute_as(Request::get("/v1/ping")).await.unwrap();
		assert!(ping.ok);
		assert_eq!(transport.hits.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn post_is_not_retried_by_default() {
		let transport = ScriptedTransport::new(vec![
			Err(NetworkError::ServiceUnavailable { retry_after: None }),
			Ok(200),
		]);
		let client = NetworkClient::with_transport(config(), transport.clone());

		let err = client
			.execute(Request::post("/v1/submit").with_json(serde_json::json!({"a": 1})))
			.await
			.unwrap_err();
		assert!(matches!(err, NetworkError::ServiceUnavailable { .. }));
		assert_eq!(transport.hits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn retry_budget_is_bounded() {
		let transport = ScriptedTransport::new(vec![
			Err(NetworkError::NoConnection),
			Err(NetworkError::NoConnection),
			Err(NetworkError::NoConnection),
			Err(NetworkError::NoConnection),
		]);
		let client = NetworkClient::with_transport(config(), transport.clone());

		let err = client.execute(Request::get("/v1/ping")).await.unwrap_err();
		assert_eq!(err, NetworkError::NoConnection);
		assert_eq!(transport.hits.load(Ordering::SeqCst), 3, "max_attempts=3");
	}

	#[tokio::test]
	async fn timeout_is_surfaced_and_bounded() {
		let transport = ScriptedTransport::with_delay(vec![], Duration::from_secs(10));
		let client = NetworkClient::with_transport(config(), transport);

		let started = Instant::now();
		let err = client
			.execute(
				Request::get("/v1/slow")
					.with_timeout(Duration::from_millis(30)),
			)
			.await
			.unwrap_err();
		// Default policy retries timeouts, so 3 attempts of ~30ms each.
		assert!(matches!(err, NetworkError::ConnectionTimeout(_)));
		assert!(started.elapsed() < Duration::from_secs(2));
	}

	#[tokio::test]
	async fn cancellation_stops_retries() {
		let transport = ScriptedTransport::new(vec![
			Err(NetworkError::NoConnection),
			Err(NetworkError::NoConnection),
		]);
		let mut c = config();
		c.retry_policy = RetryPolicy {
			max_attempts: 5,
			strategy: RetryStrategy::Constant(Duration::from_millis(200)),
			condition: RetryCondition::OnRetryableError,
		};
		let client = Arc::new(NetworkClient::with_transport(c, transport.clone()));

		let cancel = CancellationToken::new();
		let task = {
			let client = client.clone();
			let cancel = cancel.clone();
			tokio::spawn(async move {
				client
					.execute_with_cancel(Request::get("/v1/ping"), cancel)
					.await
			})
		};

		// Let the first attempt fail, then cancel during the retry delay.
		tokio::time::sleep(Duration::from_millis(50)).await;
		cancel.cancel();

		let result = task.await.unwrap();
		assert_eq!(result.unwrap_err(), NetworkError::Cancelled);
		assert_eq!(transport.hits.load(Ordering::SeqCst), 1, "no retry scheduled");
	}

	#[tokio::test]
	async fn cancel_request_by_correlation_id() {
		let transport = ScriptedTransport::with_delay(vec![], Duration::from_secs(5));
		let client = Arc::new(NetworkClient::with_transport(config(), transport));

		let request = Request::get("/v1/slow");
		let id = request.correlation_id.clone();
		let task = {
			let client = client.clone();
			tokio::spawn(async move { client.execute(request).await })
		};

		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(client.cancel_request(&id).await);
		assert_eq!(task.await.unwrap().unwrap_err(), NetworkError::Cancelled);
		assert!(!client.cancel_request(&id).await, "token removed after finish");
	}

	#[tokio::test]
	async fn default_headers_and_per_request_headers_merge() {
		let transport = ScriptedTransport::new(vec![Ok(200)]);
		let mut c = config();
		c.default_headers.append("Accept", "application/json");
		c.default_headers.append("X-Client", "bifrost");
		let client = NetworkClient::with_transport(c, transport.clone());

		client
			.execute(Request::get("/v1/ping").with_header("accept", "text/plain"))
			.await
			.unwrap();

		let headers = transport.last_headers.lock().await.clone().unwrap();
		assert_eq!(headers.get("accept"), Some("text/plain"), "later wins");
		assert_eq!(headers.get("x-client"), Some("bifrost"));
	}

	#[tokio::test]
	async fn interceptors_run_in_order_and_can_replace() {
		struct Tag(&'static str);
		#[async_trait]
		impl RequestInterceptor for Tag {
			async fn intercept(
				&self,
				mut request: PreparedRequest,
			) -> Result<PreparedRequest, NetworkError> {
				let mut tags = request
					.headers
					.get("x-tags")
					.unwrap_or_default()
					.to_string();
				tags.push_str(self.0);
				request.headers.set("x-tags", tags);
				Ok(request)
			}
		}

		let transport = ScriptedTransport::new(vec![Ok(200)]);
		let client = NetworkClient::with_transport(config(), transport.clone());
		client.add_interceptor(Arc::new(Tag("a"))).await;
		client.add_interceptor(Arc::new(Tag("b"))).await;

		client.execute(Request::get("/v1/ping")).await.unwrap();
		let headers = transport.last_headers.lock().await.clone().unwrap();
		assert_eq!(headers.get("x-tags"), Some("ab"));
	}

	#[tokio::test]
	async fn failing_interceptor_terminates_pipeline() {
		struct Reject;
		#[async_trait]
		impl RequestInterceptor for Reject {
			async fn intercept(
				&self,
				_request: PreparedRequest,
			) -> Result<PreparedRequest, NetworkError> {
				Err(NetworkError::InvalidRequest)
			}
		}

		let transport = ScriptedTransport::new(vec![Ok(200)]);
		let client = NetworkClient::with_transport(config(), transport.clone());
		client.add_interceptor(Arc::new(Reject)).await;

		let err = client.execute(Request::get("/v1/ping")).await.unwrap_err();
		assert_eq!(err, NetworkError::InvalidRequest);
		assert_eq!(transport.hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn url_resolution_rules() {
		let c = config();

		let prepared = prepare(&c, &Request::get("/v1/ping")).unwrap();
		assert_eq!(prepared.url.as_str(), "https://api.example.com/v1/ping");

		let prepared = prepare(&c, &Request::get("v1/ping")).unwrap();
		assert_eq!(prepared.url.as_str(), "https://api.example.com/v1/ping");

		let prepared = prepare(&c, &Request::get("https://other.example.org/x")).unwrap();
		assert_eq!(prepared.url.as_str(), "https://other.example.org/x");

		let mut bare = ClientConfiguration::default();
		bare.base_url = None;
		assert!(matches!(
			prepare(&bare, &Request::get("/v1/ping")),
			Err(NetworkError::InvalidUrl(_))
		));
	}

	#[test]
	fn parameter_encoding_by_method() {
		let c = config();

		// GET: parameters ride in the URL.
		let prepared = prepare(
			&c,
			&Request::get("/search").with_parameter("q", "pin validator"),
		)
		.unwrap();
		assert_eq!(prepared.url.query(), Some("q=pin+validator"));
		assert!(prepared.body.is_none());

		// POST with only parameters: form body.
		let prepared = prepare(
			&c,
			&Request::post("/submit").with_parameter("name", "bifrost"),
		)
		.unwrap();
		assert_eq!(
			prepared.headers.get("content-type"),
			Some("application/x-www-form-urlencoded")
		);
		assert_eq!(&prepared.body.unwrap()[..], b"name=bifrost");

		// POST with a JSON body: parameters move to the URL.
		let prepared = prepare(
			&c,
			&Request::post("/submit")
				.with_parameter("v", "2")
				.with_json(serde_json::json!({"name": "bifrost"})),
		)
		.unwrap();
		assert_eq!(prepared.url.query(), Some("v=2"));
		assert_eq!(prepared.headers.get("content-type"), Some("application/json"));
		assert_eq!(&prepared.body.unwrap()[..], br#"{"name":"bifrost"}"#);
	}

	#[test]
	fn per_request_timeout_overrides_config() {
		let c = config();
		let prepared = prepare(&c, &Request::get("/x")).unwrap();
		assert_eq!(prepared.timeout, Duration::from_secs(30));

		let prepared = prepare(
			&c,
			&Request::get("/x").with_timeout(Duration::from_secs(3)),
		)
		.unwrap();
		assert_eq!(prepared.timeout, Duration::from_secs(3));
	}

	#[tokio::test]
	async fn concurrency_limiter_is_respected() {
		struct Gate {
			current: AtomicUsize,
			peak: AtomicUsize,
		}
		struct GatedTransport(Arc<Gate>);

		#[async_trait]
		impl Transport for GatedTransport {
			async fn send(&self, _request: &PreparedRequest) -> Result<Response, NetworkError> {
				let now = self.0.current.fetch_add(1, Ordering::SeqCst) + 1;
				self.0.peak.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(20)).await;
				self.0.current.fetch_sub(1, Ordering::SeqCst);
				Ok(Response {
					status: 200,
					headers: HeaderList::new(),
					body: Bytes::new(),
					timings: WireTimings::started_now(),
				})
			}
		}

		let gate = Arc::new(Gate { current: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
		let mut c = config();
		c.max_concurrent_requests = 2;
		let client = Arc::new(NetworkClient::with_transport(
			c,
			Arc::new(GatedTransport(gate.clone())),
		));

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let client = client.clone();
			tasks.push(tokio::spawn(async move {
				client.execute(Request::get("/x")).await
			}));
		}
		for task in tasks {
			task.await.unwrap().unwrap();
		}
		assert!(gate.peak.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test]
	async fn unauthorized_without_refresh_surfaces() {
		let transport = ScriptedTransport::new(vec![
			Err(NetworkError::Unauthorized { reason: None }),
			Ok(200),
		]);
		let client = NetworkClient::with_transport(config(), transport.clone());

		let err = client.execute(Request::get("/v1/ping")).await.unwrap_err();
		assert!(matches!(err, NetworkError::Unauthorized { .. }));
		// No auth manager: the single-refresh path is skipped entirely.
		assert_eq!(transport.hits.load(Ordering::SeqCst), 1);
	}
}
