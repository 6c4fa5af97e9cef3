use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::NetworkError;
use crate::pipeline::{NetworkClient, RetryPolicy};
use crate::request::{Request, RequestPriority, Response};

/// One unit of work in a batch. The executor owns the item from submission
/// until completion or cancellation.
#[derive(Debug, Clone)]
pub struct BatchItem {
	pub id: String,
	pub request: Request,
	pub priority: RequestPriority,
	/// Overrides the batch policy for this item alone.
	pub retry_policy: Option<RetryPolicy>,
}

impl BatchItem {
	pub fn new(id: impl Into<String>, request: Request) -> Self {
		let priority = request.priority;
		Self {
			id: id.into(),
			request,
			priority,
			retry_policy: None,
		}
	}

	pub fn with_priority(mut self, priority: RequestPriority) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = Some(policy);
		self
	}
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
	/// Items running at once.
	pub max_concurrent_requests: usize,
	/// Stable-sort the queue by descending priority before running.
	pub priority_queue: bool,
	/// `true` keeps items independent; `false` cancels everything still
	/// queued or in flight on the first failure.
	pub continue_on_error: bool,
	/// Policy for items that carry none of their own.
	pub retry_policy: Option<RetryPolicy>,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			max_concurrent_requests: 5,
			priority_queue: false,
			continue_on_error: true,
			retry_policy: None,
		}
	}
}

/// Emitted after every item completion.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
	pub total: usize,
	/// Items finished with any outcome. Monotone across events.
	pub completed: usize,
	pub failed: usize,
	pub in_progress: usize,
	pub eta: Option<Duration>,
}

/// Aggregate statistics for a finished batch.
#[derive(Debug, Clone)]
pub struct BatchStatistics {
	pub total_duration: Duration,
	pub successes: usize,
	pub failures: usize,
	pub average_latency: Duration,
}

/// Per-item result, in submission order.
#[derive(Debug)]
pub struct BatchItemOutcome {
	pub id: String,
	pub result: Result<Response, NetworkError>,
}

#[derive(Debug)]
pub struct BatchOutcome {
	pub results: Vec<BatchItemOutcome>,
	pub statistics: BatchStatistics,
}

/// Runs many pipeline invocations under a concurrency bound.
///
/// Completion events fire in finish order; the result array preserves
/// submission order. Cancelling the batch cancels every contained request.
pub struct BatchExecutor {
	client: Arc<NetworkClient>,
	config: BatchConfig,
	cancel: CancellationToken,
}

impl BatchExecutor {
	pub fn new(client: Arc<NetworkClient>, config: BatchConfig) -> Self {
		Self {
			client,
			config,
			cancel: CancellationToken::new(),
		}
	}

	/// Cancel the queue and all in-flight items. Idempotent.
	pub fn cancel_all(&self) {
		self.cancel.cancel();
	}

	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Run the batch to completion without progress reporting.
	pub async fn execute(&self, items: Vec<BatchItem>) -> BatchOutcome {
		self.run(items, None).await
	}

	/// Run the batch, emitting a progress event after every completion.
	pub async fn execute_with_progress(
		&self,
		items: Vec<BatchItem>,
		progress: mpsc::UnboundedSender<BatchProgress>,
	) -> BatchOutcome {
		self.run(items, Some(progress)).await
	}

	async fn run(
		&self,
		items: Vec<BatchItem>,
		progress: Option<mpsc::UnboundedSender<BatchProgress>>,
	) -> BatchOutcome {
		let batch_started = Instant::now();
		let total = items.len();
		let metrics = self.client.metrics_registry();

		// Submission order is the result order; the queue order is the
		// execution order.
		let mut indexed: Vec<(usize, BatchItem)> = items.into_iter().enumerate().collect();
		let ids: Vec<String> = indexed.iter().map(|(_, item)| item.id.clone()).collect();
		if self.config.priority_queue {
			// Stable sort: FIFO within equal priority.
			indexed.sort_by_key(|(_, item)| std::cmp::Reverse(item.priority.weight()));
		}
		let mut queue: VecDeque<(usize, BatchItem)> = indexed.into();

		let mut results: Vec<Option<Result<Response, NetworkError>>> =
			(0..total).map(|_| None).collect();
		let mut tasks: JoinSet<(usize, Result<Response, NetworkError>, Duration)> =
			JoinSet::new();

		let mut completed = 0usize;
		let mut failed = 0usize;
		let mut latencies: Vec<Duration> = Vec::with_capacity(total);
		let mut aborted = false;

		loop {
			// Keep the window full while the queue has eligible work.
			while tasks.len() < self.config.max_concurrent_requests.max(1) && !aborted {
				let Some((index, item)) = queue.pop_front() else {
					break;
				};
				if self.cancel.is_cancelled() {
					// Drained without being sent.
					results[index] = Some(Err(NetworkError::Cancelled));
					completed += 1;
					failed += 1;
					continue;
				}

				let client = self.client.clone();
				let item_cancel = self.cancel.child_token();
				let policy = item
					.retry_policy
					.clone()
					.or_else(|| self.config.retry_policy.clone());
				metrics.batch_items_total.inc();
				metrics.batch_in_flight.inc();
				tasks.spawn(async move {
					let started = Instant::now();
					let result = client
						.execute_with_policy(item.request, item_cancel, policy)
						.await;
					(index, result, started.elapsed())
				});
			}

			let Some(joined) = tasks.join_next().await else {
				// Queue empty and nothing in flight.
				if queue.is_empty() {
					break;
				}
				continue;
			};
			metrics.batch_in_flight.dec();

			let (index, result, latency) = match joined {
				Ok(outcome) => outcome,
				Err(join_error) => {
					warn!("batch task panicked: {join_error}");
					continue;
				}
			};

			completed += 1;
			let item_failed = result.is_err();
			if item_failed {
				failed += 1;
				metrics.batch_items_failed_total.inc();
			} else {
				latencies.push(latency);
			}

			let first_failure = item_failed
				&& !self.config.continue_on_error
				&& !matches!(result, Err(NetworkError::Cancelled));
			results[index] = Some(result);

			if first_failure && !aborted {
				debug!("batch aborting on first failure (continue_on_error=false)");
				aborted = true;
				self.cancel.cancel();
				// Queued items are cancelled without ever being sent.
				while let Some((queued_index, _)) = queue.pop_front() {
					results[queued_index] = Some(Err(NetworkError::Cancelled));
					completed += 1;
					failed += 1;
				}
			}

			if let Some(progress) = &progress {
				let elapsed = batch_started.elapsed();
				let eta = if completed > 0 && completed < total {
					Some(elapsed / completed as u32 * (total - completed) as u32)
				} else {
					None
				};
				let _ = progress.send(BatchProgress {
					total,
					completed,
					failed,
					in_progress: tasks.len(),
					eta,
				});
			}

			if completed == total && tasks.is_empty() && queue.is_empty() {
				break;
			}
		}

		let successes = results
			.iter()
			.filter(|r| matches!(r, Some(Ok(_))))
			.count();
		let average_latency = if latencies.is_empty() {
			Duration::ZERO
		} else {
			latencies.iter().sum::<Duration>() / latencies.len() as u32
		};

		let results = results
			.into_iter()
			.zip(ids)
			.map(|(result, id)| BatchItemOutcome {
				id,
				result: result.unwrap_or(Err(NetworkError::Cancelled)),
			})
			.collect::<Vec<_>>();

		BatchOutcome {
			statistics: BatchStatistics {
				total_duration: batch_started.elapsed(),
				successes,
				failures: results.iter().filter(|r| r.result.is_err()).count(),
				average_latency,
			},
			results,
		}
	}
}
