//! End-to-end pipeline scenarios against an in-process transport:
//! retry on 503 with exponential backoff, observed inter-attempt delays,
//! and the monitor's view of the traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use bifrost::error::NetworkError;
use bifrost::pipeline::{NetworkClient, RetryCondition, RetryPolicy, RetryStrategy, Transport};
use bifrost::request::{HeaderList, PreparedRequest, Request, Response, WireTimings};
use bifrost::ClientConfiguration;

/// Replays a scripted status sequence and records attempt times.
struct ReplayTransport {
	script: Mutex<Vec<Result<u16, NetworkError>>>,
	attempt_times: Mutex<Vec<Instant>>,
}

impl ReplayTransport {
	fn new(script: Vec<Result<u16, NetworkError>>) -> Arc<Self> {
		Arc::new(Self {
			script: Mutex::new(script),
			attempt_times: Mutex::new(Vec::new()),
		})
	}
}

#[async_trait]
impl Transport for ReplayTransport {
	async fn send(&self, _request: &PreparedRequest) -> Result<Response, NetworkError> {
		self.attempt_times.lock().await.push(Instant::now());
		let mut script = self.script.lock().await;
		let status = if script.is_empty() { Ok(200) } else { script.remove(0) }?;
		Ok(Response {
			status,
			headers: HeaderList::new(),
			body: Bytes::from_static(br#"{"ok":true}"#),
			timings: WireTimings::started_now(),
		})
	}
}

fn base_config() -> ClientConfiguration {
	let mut config = ClientConfiguration::default();
	config.base_url = Some("https://api.example.com".into());
	config
}

#[derive(serde::Deserialize)]
struct Ping {
	ok: bool,
}

#[cfg(feature = "integration-tests")]
#[tokio::test]
async fn get_with_retry_on_503_observes_backoff_delay() -> Result<(), Box<dyn std::error::Error>>
{
	// Scenario: 503 on attempt 1 (no Retry-After), then 200 with
	// {"ok":true}; policy exponentialBackoff(base=0.5s, max=5s).
	let transport = ReplayTransport::new(vec![
		Err(NetworkError::ServiceUnavailable { retry_after: None }),
		Ok(200),
	]);

	let mut config = base_config();
	config.retry_policy = RetryPolicy {
		max_attempts: 3,
		strategy: RetryStrategy::ExponentialBackoff {
			base: Duration::from_millis(500),
			max: Duration::from_secs(5),
		},
		condition: RetryCondition::OnRetryableError,
	};
	let client = NetworkClient::with_transport(config, transport.clone());

	let ping: Ping = client.execute_as(Request::get("/v1/ping")).await?;
	assert!(ping.ok);

	let times = transport.attempt_times.lock().await.clone();
	assert_eq!(times.len(), 2, "exactly two attempts");

	let delay = times[1].duration_since(times[0]);
	assert!(
		delay >= Duration::from_millis(500) && delay < Duration::from_millis(650),
		"observed inter-attempt delay {delay:?} outside [0.5s, 0.5s + eps]"
	);
	Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
	let transport = ReplayTransport::new(vec![
		Err(NetworkError::ServiceUnavailable { retry_after: None }),
		Err(NetworkError::GatewayTimeout),
	]);

	let mut config = base_config();
	config.retry_policy = RetryPolicy {
		max_attempts: 2,
		strategy: RetryStrategy::Immediate,
		condition: RetryCondition::OnRetryableError,
	};
	let client = NetworkClient::with_transport(config, transport.clone());

	let err = client.execute(Request::get("/v1/ping")).await.unwrap_err();
	assert_eq!(err, NetworkError::GatewayTimeout);
	assert_eq!(transport.attempt_times.lock().await.len(), 2);
}

#[tokio::test]
async fn non_retryable_status_fails_fast() {
	let transport = ReplayTransport::new(vec![
		Err(NetworkError::InvalidStatusCode { code: 404, body: None }),
		Ok(200),
	]);
	let client = NetworkClient::with_transport(base_config(), transport.clone());

	let err = client.execute(Request::get("/v1/missing")).await.unwrap_err();
	assert!(matches!(err, NetworkError::InvalidStatusCode { code: 404, .. }));
	assert_eq!(
		transport.attempt_times.lock().await.len(),
		1,
		"4xx (other than 408/429) is terminal"
	);
}

#[tokio::test]
async fn success_invariant_status_is_2xx() {
	for status in [200u16, 201, 204, 299] {
		let transport = ReplayTransport::new(vec![Ok(status)]);
		let client = NetworkClient::with_transport(base_config(), transport);
		let response = client.execute(Request::get("/v1/x")).await.unwrap();
		assert!((200..=299).contains(&response.status));
	}
}

#[tokio::test]
async fn monitor_sees_the_terminal_outcome() {
	let transport = ReplayTransport::new(vec![Ok(200)]);
	let client = NetworkClient::with_transport(base_config(), transport);

	client.execute(Request::get("/v1/ping")).await.unwrap();

	let metrics = client.monitor().metrics().await;
	assert_eq!(metrics.count, 1);
	assert_eq!(metrics.successes, 1);
	assert!(metrics.total_bytes > 0);

	let text = client.metrics_registry().encode();
	assert!(text.contains("bifrost_requests_total"));
}
