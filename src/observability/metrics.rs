use std::sync::Arc;

use prometheus::{
	Counter, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Central registry for the client's Prometheus metrics.
pub struct MetricsRegistry {
	registry: Registry,

	// Pipeline metrics
	pub requests_total: IntCounter,
	pub request_failures_total: IntCounter,
	pub request_retries_total: IntCounter,
	pub bytes_received_total: Counter,
	pub request_duration_seconds: Histogram,

	// Auth metrics
	pub token_refreshes_total: IntCounter,

	// Batch metrics
	pub batch_items_total: IntCounter,
	pub batch_items_failed_total: IntCounter,
	pub batch_in_flight: IntGauge,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		let registry = Registry::new();

		let requests_total = IntCounter::with_opts(
			Opts::new("bifrost_requests_total", "Total requests executed").namespace("bifrost"),
		)
		.unwrap();

		let request_failures_total = IntCounter::with_opts(
			Opts::new(
				"bifrost_request_failures_total",
				"Requests ending in a terminal error",
			)
			.namespace("bifrost"),
		)
		.unwrap();

		let request_retries_total = IntCounter::with_opts(
			Opts::new("bifrost_request_retries_total", "Retry attempts scheduled")
				.namespace("bifrost"),
		)
		.unwrap();

		let bytes_received_total = Counter::with_opts(
			Opts::new("bifrost_bytes_received_total", "Response body bytes received")
				.namespace("bifrost"),
		)
		.unwrap();

		let request_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"bifrost_request_duration_seconds",
				"Wall-clock duration of completed requests in seconds",
			)
			.namespace("bifrost")
			.buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
		)
		.unwrap();

		let token_refreshes_total = IntCounter::with_opts(
			Opts::new("bifrost_token_refreshes_total", "Successful token refreshes")
				.namespace("bifrost"),
		)
		.unwrap();

		let batch_items_total = IntCounter::with_opts(
			Opts::new("bifrost_batch_items_total", "Batch items executed").namespace("bifrost"),
		)
		.unwrap();

		let batch_items_failed_total = IntCounter::with_opts(
			Opts::new("bifrost_batch_items_failed_total", "Batch items that failed")
				.namespace("bifrost"),
		)
		.unwrap();

		let batch_in_flight = IntGauge::with_opts(
			Opts::new("bifrost_batch_in_flight", "Batch items currently in flight")
				.namespace("bifrost"),
		)
		.unwrap();

		registry.register(Box::new(requests_total.clone())).unwrap();
		registry
			.register(Box::new(request_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(request_retries_total.clone()))
			.unwrap();
		registry
			.register(Box::new(bytes_received_total.clone()))
			.unwrap();
		registry
			.register(Box::new(request_duration_seconds.clone()))
			.unwrap();
		registry
			.register(Box::new(token_refreshes_total.clone()))
			.unwrap();
		registry
			.register(Box::new(batch_items_total.clone()))
			.unwrap();
		registry
			.register(Box::new(batch_items_failed_total.clone()))
			.unwrap();
		registry.register(Box::new(batch_in_flight.clone())).unwrap();

		Self {
			registry,
			requests_total,
			request_failures_total,
			request_retries_total,
			bytes_received_total,
			request_duration_seconds,
			token_refreshes_total,
			batch_items_total,
			batch_items_failed_total,
			batch_in_flight,
		}
	}

	/// Encode metrics in Prometheus text format.
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to encode metrics: {e}");
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize the metrics registry.
pub fn init_metrics() -> Arc<MetricsRegistry> {
	Arc::new(MetricsRegistry::new())
}
