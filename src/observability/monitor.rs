use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::Rng;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::request::Method;

/// One observed request, recorded after its terminal outcome.
#[derive(Debug, Clone)]
pub struct RequestPerformance {
	pub endpoint: String,
	pub method: Method,
	/// Status for completed requests; `None` when transport failed.
	pub status: Option<u16>,
	/// Terminal error kind for failed requests.
	pub error_kind: Option<String>,
	pub started_at: Instant,
	pub ended_at: Instant,
	pub bytes_received: u64,
}

impl RequestPerformance {
	pub fn duration(&self) -> Duration {
		self.ended_at.duration_since(self.started_at)
	}

	pub fn is_success(&self) -> bool {
		self.error_kind.is_none() && self.status.map(|s| (200..=299).contains(&s)).unwrap_or(false)
	}
}

/// What tripped an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
	HighResponseTime,
	RequestTimeout,
	ConnectionFailure,
	LowThroughput,
	HighErrorRate,
}

/// Warning up to twice the threshold, critical beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
	Warning,
	Critical,
}

#[derive(Debug, Clone)]
pub struct PerformanceAlert {
	pub kind: AlertKind,
	pub severity: AlertSeverity,
	pub message: String,
	pub observed: f64,
	pub threshold: f64,
}

fn severity_for(observed: f64, threshold: f64) -> AlertSeverity {
	if observed > threshold * 2.0 {
		AlertSeverity::Critical
	} else {
		AlertSeverity::Warning
	}
}

/// Alert trip points. A threshold of zero disables that alert.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
	pub high_response_time: Duration,
	/// Bytes per second below which `LowThroughput` fires.
	pub low_throughput: f64,
	/// Error ratio (0.0–1.0) above which `HighErrorRate` fires.
	pub high_error_rate: f64,
}

impl Default for AlertThresholds {
	fn default() -> Self {
		Self {
			high_response_time: Duration::from_secs(2),
			low_throughput: 1024.0,
			high_error_rate: 0.10,
		}
	}
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
	/// Aggregates are computed over entries that ended inside this window.
	pub window: Duration,
	/// Probability that a request is sampled into the monitor.
	pub sample_rate: f64,
	pub max_stored_metrics: usize,
	pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
	fn default() -> Self {
		Self {
			window: Duration::from_secs(60),
			sample_rate: 1.0,
			max_stored_metrics: 1000,
			thresholds: AlertThresholds::default(),
		}
	}
}

/// Aggregates computed on demand over the current window.
#[derive(Debug, Clone, Default)]
pub struct WindowMetrics {
	pub count: usize,
	pub successes: usize,
	pub failures: usize,
	pub success_rate: f64,
	pub error_rate: f64,
	pub min: Duration,
	pub avg: Duration,
	pub max: Duration,
	pub p95: Duration,
	pub p99: Duration,
	pub total_bytes: u64,
	/// Bytes received per second of summed request duration.
	pub throughput: f64,
}

/// Sliding-window performance monitor.
///
/// Observes outcomes off the data path: the pipeline reports completed
/// requests; aggregates and alerts are derived here on demand.
pub struct PerformanceMonitor {
	config: MonitorConfig,
	entries: Mutex<VecDeque<RequestPerformance>>,
	alerts: broadcast::Sender<PerformanceAlert>,
}

impl PerformanceMonitor {
	pub fn new(config: MonitorConfig) -> Arc<Self> {
		let (alerts, _) = broadcast::channel(64);
		Arc::new(Self {
			config,
			entries: Mutex::new(VecDeque::new()),
			alerts,
		})
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PerformanceAlert> {
		self.alerts.subscribe()
	}

	/// Record one outcome. Sampling decides eligibility; unsampled entries
	/// are dropped entirely.
	pub async fn record(&self, entry: RequestPerformance) {
		if self.config.sample_rate < 1.0
			&& rand::thread_rng().r#gen::<f64>() >= self.config.sample_rate
		{
			return;
		}

		self.check_entry_alerts(&entry);

		let aggregate = {
			let mut entries = self.entries.lock().await;
			entries.push_back(entry);
			while entries.len() > self.config.max_stored_metrics {
				entries.pop_front();
			}
			compute_window(&entries, self.config.window)
		};
		self.check_aggregate_alerts(&aggregate);
	}

	/// Aggregates over the last window, computed on demand.
	pub async fn metrics(&self) -> WindowMetrics {
		let entries = self.entries.lock().await;
		compute_window(&entries, self.config.window)
	}

	pub async fn stored_entries(&self) -> usize {
		self.entries.lock().await.len()
	}

	/// Remove entries that ended before `now - 2 * window`.
	pub async fn cleanup(&self) {
		let horizon = self.config.window * 2;
		let mut entries = self.entries.lock().await;
		let before = entries.len();
		entries.retain(|e| e.ended_at.elapsed() < horizon);
		let removed = before - entries.len();
		if removed > 0 {
			debug!("performance monitor dropped {removed} stale entries");
		}
	}

	/// Spawn the once-a-minute cleanup task. Cancel the returned token to
	/// stop it.
	pub fn start_cleanup_task(self: &Arc<Self>) -> CancellationToken {
		let cancel = CancellationToken::new();
		let monitor = self.clone();
		let token = cancel.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(Duration::from_secs(60));
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			loop {
				tokio::select! {
					_ = token.cancelled() => return,
					_ = ticker.tick() => monitor.cleanup().await,
				}
			}
		});
		cancel
	}

	fn check_entry_alerts(&self, entry: &RequestPerformance) {
		let thresholds = &self.config.thresholds;

		let response_threshold = thresholds.high_response_time.as_secs_f64();
		if response_threshold > 0.0 {
			let observed = entry.duration().as_secs_f64();
			if observed > response_threshold {
				self.emit(PerformanceAlert {
					kind: AlertKind::HighResponseTime,
					severity: severity_for(observed, response_threshold),
					message: format!(
						"{} {} took {:.2}s (threshold {:.2}s)",
						entry.method, entry.endpoint, observed, response_threshold
					),
					observed,
					threshold: response_threshold,
				});
			}
		}

		match entry.error_kind.as_deref() {
			Some(kind) if kind.contains("timeout") => {
				self.emit(PerformanceAlert {
					kind: AlertKind::RequestTimeout,
					severity: AlertSeverity::Warning,
					message: format!("{} {} timed out", entry.method, entry.endpoint),
					observed: entry.duration().as_secs_f64(),
					threshold: 0.0,
				});
			}
			Some(kind) if kind.contains("connection") => {
				self.emit(PerformanceAlert {
					kind: AlertKind::ConnectionFailure,
					severity: AlertSeverity::Critical,
					message: format!("{} {} failed: {kind}", entry.method, entry.endpoint),
					observed: 0.0,
					threshold: 0.0,
				});
			}
			_ => {}
		}
	}

	fn check_aggregate_alerts(&self, aggregate: &WindowMetrics) {
		if aggregate.count < 5 {
			// Too little data for rate-based alerts.
			return;
		}
		let thresholds = &self.config.thresholds;

		if thresholds.high_error_rate > 0.0 && aggregate.error_rate > thresholds.high_error_rate {
			self.emit(PerformanceAlert {
				kind: AlertKind::HighErrorRate,
				severity: severity_for(aggregate.error_rate, thresholds.high_error_rate),
				message: format!(
					"error rate {:.0}% over the last window",
					aggregate.error_rate * 100.0
				),
				observed: aggregate.error_rate,
				threshold: thresholds.high_error_rate,
			});
		}

		if thresholds.low_throughput > 0.0
			&& aggregate.total_bytes > 0
			&& aggregate.throughput < thresholds.low_throughput
		{
			// Inverted comparison: lower is worse, so severity flips.
			let severity = if aggregate.throughput < thresholds.low_throughput / 2.0 {
				AlertSeverity::Critical
			} else {
				AlertSeverity::Warning
			};
			self.emit(PerformanceAlert {
				kind: AlertKind::LowThroughput,
				severity,
				message: format!("throughput {:.0} B/s below threshold", aggregate.throughput),
				observed: aggregate.throughput,
				threshold: thresholds.low_throughput,
			});
		}
	}

	fn emit(&self, alert: PerformanceAlert) {
		warn!("performance alert: {}", alert.message);
		// Absent subscribers are fine; alerts are advisory.
		let _ = self.alerts.send(alert);
	}
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
	if sorted.is_empty() {
		return Duration::ZERO;
	}
	let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
	sorted[rank.min(sorted.len() - 1)]
}

fn compute_window(entries: &VecDeque<RequestPerformance>, window: Duration) -> WindowMetrics {
	let in_window: Vec<&RequestPerformance> = entries
		.iter()
		.filter(|e| e.ended_at.elapsed() <= window)
		.collect();
	if in_window.is_empty() {
		return WindowMetrics::default();
	}

	let mut durations: Vec<Duration> = in_window.iter().map(|e| e.duration()).collect();
	durations.sort_unstable();

	let count = in_window.len();
	let successes = in_window.iter().filter(|e| e.is_success()).count();
	let failures = count - successes;
	let total: Duration = durations.iter().sum();
	let total_bytes: u64 = in_window.iter().map(|e| e.bytes_received).sum();
	let total_secs = total.as_secs_f64();

	WindowMetrics {
		count,
		successes,
		failures,
		success_rate: successes as f64 / count as f64,
		error_rate: failures as f64 / count as f64,
		min: durations[0],
		avg: total / count as u32,
		max: durations[count - 1],
		p95: percentile(&durations, 0.95),
		p99: percentile(&durations, 0.99),
		total_bytes,
		throughput: if total_secs > 0.0 {
			total_bytes as f64 / total_secs
		} else {
			0.0
		},
	}
}
