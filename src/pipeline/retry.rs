use std::sync::Arc;
use std::time::Duration;

use crate::error::NetworkError;
use crate::request::Method;

/// How long to wait before a given retry attempt.
#[derive(Clone)]
pub enum RetryStrategy {
	/// Retry immediately with no delay.
	Immediate,
	/// A fixed delay between attempts.
	Constant(Duration),
	/// Delay grows linearly: `delay * attempt`.
	Linear(Duration),
	/// Delay doubles each attempt: `min(base * 2^(n-1), max)` for attempt `n`
	/// (1-indexed). No jitter is applied; the sequence is deterministic.
	ExponentialBackoff { base: Duration, max: Duration },
	/// Caller-supplied delay function of the attempt number.
	Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for RetryStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RetryStrategy::Immediate => write!(f, "Immediate"),
			RetryStrategy::Constant(d) => write!(f, "Constant({d:?})"),
			RetryStrategy::Linear(d) => write!(f, "Linear({d:?})"),
			RetryStrategy::ExponentialBackoff { base, max } => {
				write!(f, "ExponentialBackoff {{ base: {base:?}, max: {max:?} }}")
			}
			RetryStrategy::Custom(_) => write!(f, "Custom(..)"),
		}
	}
}

/// Which failures are eligible for retry.
#[derive(Clone)]
pub enum RetryCondition {
	/// Retry every failure. Opts non-idempotent methods in.
	Always,
	Never,
	/// Retry errors whose kind is transient (network failures, 408, 429,
	/// 5xx). Applies only to idempotent methods.
	OnRetryableError,
	/// Retry when the response status is in the set. Opts non-idempotent
	/// methods in.
	OnStatusCodes(Vec<u16>),
	/// Caller-supplied predicate. Opts non-idempotent methods in.
	Custom(Arc<dyn Fn(&NetworkError) -> bool + Send + Sync>),
}

impl std::fmt::Debug for RetryCondition {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RetryCondition::Always => write!(f, "Always"),
			RetryCondition::Never => write!(f, "Never"),
			RetryCondition::OnRetryableError => write!(f, "OnRetryableError"),
			RetryCondition::OnStatusCodes(codes) => write!(f, "OnStatusCodes({codes:?})"),
			RetryCondition::Custom(_) => write!(f, "Custom(..)"),
		}
	}
}

/// Retry budget and shape for one request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	/// Total attempts including the first. 1 means no retries.
	pub max_attempts: u32,
	pub strategy: RetryStrategy,
	pub condition: RetryCondition,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			strategy: RetryStrategy::ExponentialBackoff {
				base: Duration::from_millis(500),
				max: Duration::from_secs(10),
			},
			condition: RetryCondition::OnRetryableError,
		}
	}
}

impl RetryPolicy {
	/// A policy that never retries.
	pub fn none() -> Self {
		Self {
			max_attempts: 1,
			strategy: RetryStrategy::Immediate,
			condition: RetryCondition::Never,
		}
	}

	/// Delay to sleep before retry attempt `attempt` (1-indexed: attempt 1 is
	/// the delay between the first failure and the second try).
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let attempt = attempt.max(1);
		match &self.strategy {
			RetryStrategy::Immediate => Duration::ZERO,
			RetryStrategy::Constant(d) => *d,
			RetryStrategy::Linear(d) => d.saturating_mul(attempt),
			RetryStrategy::ExponentialBackoff { base, max } => {
				let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
				base.saturating_mul(factor).min(*max)
			}
			RetryStrategy::Custom(f) => f(attempt),
		}
	}

	/// Whether the pipeline should retry after `error`, given the request
	/// method and the number of attempts already made.
	///
	/// `OnRetryableError` is gated on method idempotency; the remaining
	/// conditions are explicit opt-ins that apply to any method. Pin
	/// failures, cancellation, and decoding errors are never retried.
	pub fn should_retry(&self, method: Method, error: &NetworkError, attempts_made: u32) -> bool {
		if attempts_made >= self.max_attempts {
			return false;
		}
		if matches!(
			error,
			NetworkError::TlsPinFailure
				| NetworkError::Cancelled
				| NetworkError::DecodingFailed(_)
				| NetworkError::EncodingFailed(_)
				| NetworkError::InvalidUrl(_)
		) {
			return false;
		}

		match &self.condition {
			RetryCondition::Never => false,
			RetryCondition::Always => true,
			RetryCondition::OnRetryableError => method.is_idempotent() && error.is_retryable(),
			RetryCondition::OnStatusCodes(codes) => match error {
				NetworkError::InvalidStatusCode { code, .. }
				| NetworkError::ServerError { code, .. } => codes.contains(code),
				_ => false,
			},
			RetryCondition::Custom(f) => f(error),
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn exponential_backoff_sequence() {
		let policy = RetryPolicy {
			max_attempts: 6,
			strategy: RetryStrategy::ExponentialBackoff {
				base: Duration::from_millis(500),
				max: Duration::from_secs(5),
			},
			condition: RetryCondition::OnRetryableError,
		};

		let delays: Vec<Duration> = (1..=5).map(|n| policy.delay_for_attempt(n)).collect();
		assert_eq!(
			delays,
			vec![
				Duration::from_millis(500),
				Duration::from_millis(1000),
				Duration::from_millis(2000),
				Duration::from_millis(4000),
				Duration::from_millis(5000), // clamped to max
			]
		);
	}

	#[test]
	fn linear_and_constant_delays() {
		let linear = RetryPolicy {
			max_attempts: 4,
			strategy: RetryStrategy::Linear(Duration::from_millis(100)),
			condition: RetryCondition::Always,
		};
		assert_eq!(linear.delay_for_attempt(1), Duration::from_millis(100));
		assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));

		let constant = RetryPolicy {
			max_attempts: 4,
			strategy: RetryStrategy::Constant(Duration::from_millis(250)),
			condition: RetryCondition::Always,
		};
		assert_eq!(constant.delay_for_attempt(1), Duration::from_millis(250));
		assert_eq!(constant.delay_for_attempt(4), Duration::from_millis(250));
	}

	#[test]
	fn retryable_error_requires_idempotent_method() {
		let policy = RetryPolicy::default();
		let err = NetworkError::ServiceUnavailable { retry_after: None };

		assert!(policy.should_retry(Method::Get, &err, 1));
		assert!(policy.should_retry(Method::Put, &err, 1));
		// POST is not idempotent, so the default condition refuses it
		assert!(!policy.should_retry(Method::Post, &err, 1));
	}

	#[test]
	fn status_code_condition_opts_in_any_method() {
		let policy = RetryPolicy {
			max_attempts: 3,
			strategy: RetryStrategy::Immediate,
			condition: RetryCondition::OnStatusCodes(vec![503]),
		};
		let err = NetworkError::InvalidStatusCode { code: 503, body: None };
		assert!(policy.should_retry(Method::Post, &err, 1));

		let err = NetworkError::InvalidStatusCode { code: 500, body: None };
		assert!(!policy.should_retry(Method::Post, &err, 1));
	}

	#[test]
	fn budget_exhaustion_stops_retry() {
		let policy = RetryPolicy::default();
		let err = NetworkError::NoConnection;
		assert!(policy.should_retry(Method::Get, &err, 2));
		assert!(!policy.should_retry(Method::Get, &err, 3));
	}

	#[test]
	fn fatal_errors_never_retry() {
		let policy = RetryPolicy {
			max_attempts: 5,
			strategy: RetryStrategy::Immediate,
			condition: RetryCondition::Always,
		};
		assert!(!policy.should_retry(Method::Get, &NetworkError::TlsPinFailure, 1));
		assert!(!policy.should_retry(Method::Get, &NetworkError::Cancelled, 1));
		assert!(!policy.should_retry(
			Method::Get,
			&NetworkError::DecodingFailed("truncated".into()),
			1
		));
	}

	#[test]
	fn custom_strategy_and_condition() {
		let policy = RetryPolicy {
			max_attempts: 3,
			strategy: RetryStrategy::Custom(Arc::new(|n| Duration::from_millis(7 * n as u64))),
			condition: RetryCondition::Custom(Arc::new(|e| {
				matches!(e, NetworkError::GatewayTimeout)
			})),
		};
		assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(14));
		assert!(policy.should_retry(Method::Post, &NetworkError::GatewayTimeout, 1));
		assert!(!policy.should_retry(Method::Post, &NetworkError::NoConnection, 1));
	}
}
