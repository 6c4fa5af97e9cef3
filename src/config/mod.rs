use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::pipeline::retry::RetryPolicy;
use crate::request::HeaderList;
use crate::security::pinning::PinConfiguration;

/// The six standard web cache policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
	#[default]
	UseProtocolCachePolicy,
	ReloadIgnoringLocalCacheData,
	ReloadIgnoringLocalAndRemoteCacheData,
	ReturnCacheDataElseLoad,
	ReturnCacheDataDontLoad,
	ReloadRevalidatingCacheData,
}

/// Minimum TLS protocol version to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum TlsVersion {
	#[serde(rename = "1.0")]
	V1_0,
	#[serde(rename = "1.1")]
	V1_1,
	#[default]
	#[serde(rename = "1.2")]
	V1_2,
	#[serde(rename = "1.3")]
	V1_3,
}

/// Which pin kind is enforced, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinningPolicy {
	#[default]
	None,
	Certificate,
	PublicKey,
	Both,
}

/// Transport security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfiguration {
	#[serde(default)]
	pub pinning: PinningPolicy,

	/// Per-host pin configurations. Only consulted when `pinning` is not
	/// `none`; each entry's own mode is overridden by `pinning`.
	#[serde(default)]
	pub pins: Vec<PinConfiguration>,

	/// Accept chains that fail trust evaluation. Development only.
	#[serde(default)]
	pub allow_invalid_certificates: bool,

	#[serde(default = "default_true")]
	pub validate_hostname: bool,

	#[serde(default)]
	pub min_tls_version: TlsVersion,

	#[serde(default)]
	pub require_certificate_transparency: bool,

	/// Extra PEM root certificates appended to the platform trust store.
	#[serde(default)]
	pub extra_roots_pem: Option<String>,
}

impl Default for SecurityConfiguration {
	fn default() -> Self {
		Self {
			pinning: PinningPolicy::None,
			pins: Vec::new(),
			allow_invalid_certificates: false,
			validate_hostname: true,
			min_tls_version: TlsVersion::V1_2,
			require_certificate_transparency: false,
			extra_roots_pem: None,
		}
	}
}

/// Full client configuration.
///
/// Constructed programmatically; `load()` overlays the simple scalar fields
/// from an optional config file and `BIFROST_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
	/// Absolute URL prefix for relative endpoints.
	pub base_url: Option<String>,

	/// Per-attempt timeout.
	pub timeout: Duration,

	pub default_headers: HeaderList,

	pub cache_policy: CachePolicy,

	pub retry_policy: RetryPolicy,

	// Transport hints, forwarded to the platform connection layer.
	pub waits_for_connectivity: bool,
	pub allows_cellular_access: bool,
	pub allows_expensive: bool,
	pub allows_constrained: bool,

	pub max_concurrent_requests: usize,

	pub security: SecurityConfiguration,

	pub enable_metrics: bool,
}

impl Default for ClientConfiguration {
	fn default() -> Self {
		Self {
			base_url: None,
			timeout: Duration::from_secs(default_timeout_secs()),
			default_headers: HeaderList::new(),
			cache_policy: CachePolicy::default(),
			retry_policy: RetryPolicy::default(),
			waits_for_connectivity: true,
			allows_cellular_access: true,
			allows_expensive: true,
			allows_constrained: true,
			max_concurrent_requests: default_max_concurrent_requests(),
			security: SecurityConfiguration::default(),
			enable_metrics: true,
		}
	}
}

/// Scalar settings loadable from file/environment.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	base_url: Option<String>,
	timeout_secs: Option<u64>,
	max_concurrent_requests: Option<usize>,
	enable_metrics: Option<bool>,
	allow_invalid_certificates: Option<bool>,
	min_tls_version: Option<TlsVersion>,
}

/// Load a configuration from (in order): built-in defaults, an optional
/// `bifrost` config file, and environment variables prefixed with `BIFROST`
/// (e.g. `BIFROST_BASE_URL`).
pub fn load() -> Result<ClientConfiguration> {
	let builder = config::Config::builder()
		.add_source(config::File::with_name("bifrost").required(false))
		// Double-underscore separator so single-underscore env names like
		// `BIFROST_BASE_URL` map to `base_url` instead of nested `base.url`.
		.add_source(config::Environment::with_prefix("BIFROST").separator("__"));

	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize()?;

	let mut c = ClientConfiguration::default();
	if let Some(base) = partial.base_url {
		c.base_url = Some(base);
	}
	if let Some(secs) = partial.timeout_secs {
		c.timeout = Duration::from_secs(secs);
	}
	if let Some(n) = partial.max_concurrent_requests {
		c.max_concurrent_requests = n;
	}
	if let Some(m) = partial.enable_metrics {
		c.enable_metrics = m;
	}
	if let Some(allow) = partial.allow_invalid_certificates {
		c.security.allow_invalid_certificates = allow;
	}
	if let Some(v) = partial.min_tls_version {
		c.security.min_tls_version = v;
	}

	// Explicitly prefer direct environment variables when present; some
	// environments set variables in ways the `config` crate does not map.
	if let Ok(base) = std::env::var("BIFROST_BASE_URL") {
		if !base.is_empty() {
			c.base_url = Some(base);
		}
	}
	if let Ok(secs) = std::env::var("BIFROST_TIMEOUT_SECS") {
		if let Ok(n) = secs.parse::<u64>() {
			c.timeout = Duration::from_secs(n);
		}
	}
	if let Ok(n) = std::env::var("BIFROST_MAX_CONCURRENT_REQUESTS") {
		if let Ok(n) = n.parse::<usize>() {
			c.max_concurrent_requests = n;
		}
	}
	if let Ok(m) = std::env::var("BIFROST_ENABLE_METRICS") {
		if let Ok(b) = m.parse::<bool>() {
			c.enable_metrics = b;
		}
	}

	Ok(c)
}

fn default_true() -> bool {
	true
}

fn default_timeout_secs() -> u64 {
	30
}

fn default_max_concurrent_requests() -> usize {
	6
}
