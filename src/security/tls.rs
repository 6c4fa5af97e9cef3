use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use log::{debug, warn};
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};

use crate::config::{PinningPolicy, SecurityConfiguration, TlsVersion};
use crate::security::pinning::{PinConfiguration, PinMode, PinValidator, PinVerdict};

/// Marker embedded in the TLS error when pin validation rejects a chain. The
/// transport inspects handshake errors for this marker to surface
/// `TlsPinFailure` instead of a generic certificate error.
pub const PIN_FAILURE_MARKER: &str = "bifrost-pin-mismatch";

/// Load PEM-encoded certificates from `path` as DER blobs.
pub fn load_pem_roots(path: &Path) -> Result<Vec<Vec<u8>>> {
	let f = std::fs::File::open(path)
		.with_context(|| format!("opening root bundle {}", path.display()))?;
	let mut reader = std::io::BufReader::new(f);
	let raw = rustls_pemfile::certs(&mut reader)
		.map_err(|e| anyhow::anyhow!("failed to parse PEM certs: {}", e))?;
	if raw.is_empty() {
		anyhow::bail!("no certificates found in {}", path.display());
	}
	Ok(raw)
}

/// Build the root store: platform trust anchors plus any configured extras.
fn build_root_store(security: &SecurityConfiguration) -> Result<RootCertStore> {
	let mut roots = RootCertStore::empty();

	match rustls_native_certs::load_native_certs() {
		Ok(native) => {
			let ders: Vec<Vec<u8>> = native.into_iter().map(|c| c.0).collect();
			let (added, skipped) = roots.add_parsable_certificates(&ders);
			debug!("loaded {added} platform roots ({skipped} skipped)");
		}
		Err(e) => {
			// Fall back to the webpki bundle shipped with rustls-supported
			// trust anchors being absent entirely is fatal below.
			warn!("failed to load platform trust store: {e}");
		}
	}

	if let Some(path) = &security.extra_roots_pem {
		let extras = load_pem_roots(Path::new(path))?;
		let (added, skipped) = roots.add_parsable_certificates(&extras);
		debug!("loaded {added} extra roots from {path} ({skipped} skipped)");
	}

	if roots.is_empty() {
		anyhow::bail!("no trust anchors available; cannot validate server certificates");
	}
	Ok(roots)
}

/// Translate the configured pinning policy onto the per-host configurations.
fn pin_validator_from(security: &SecurityConfiguration) -> Result<Option<PinValidator>> {
	let mode = match security.pinning {
		PinningPolicy::None => return Ok(None),
		PinningPolicy::Certificate => PinMode::Certificate,
		PinningPolicy::PublicKey => PinMode::PublicKey,
		PinningPolicy::Both => PinMode::Both,
	};

	let configs: Vec<PinConfiguration> = security
		.pins
		.iter()
		.cloned()
		.map(|mut c| {
			c.mode = mode;
			c
		})
		.collect();
	if configs.is_empty() {
		anyhow::bail!("pinning is enabled but no pin configurations are present");
	}

	let validator = PinValidator::new(configs).map_err(|e| anyhow::anyhow!(e))?;
	Ok(Some(if security.require_certificate_transparency {
		validator.with_certificate_transparency(2)
	} else {
		validator
	}))
}

/// Certificate verifier enforcing chain trust, hostname policy, and pins.
///
/// Wraps the webpki verifier so platform-equivalent trust evaluation runs
/// first; pin validation only sees chains that already verified (unless
/// `allow_invalid_certificates` is set, which skips trust evaluation but
/// never skips pins).
struct PinningVerifier {
	inner: WebPkiVerifier,
	validator: Option<PinValidator>,
	allow_invalid_certificates: bool,
	validate_hostname: bool,
}

impl ServerCertVerifier for PinningVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &Certificate,
		intermediates: &[Certificate],
		server_name: &ServerName,
		scts: &mut dyn Iterator<Item = &[u8]>,
		ocsp_response: &[u8],
		now: SystemTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		let tls_sct_count = scts.count();

		if !self.allow_invalid_certificates {
			let verified = self.inner.verify_server_cert(
				end_entity,
				intermediates,
				server_name,
				&mut std::iter::empty(),
				ocsp_response,
				now,
			);
			match verified {
				Ok(_) => {}
				Err(rustls::Error::InvalidCertificate(
					rustls::CertificateError::NotValidForName,
				)) if !self.validate_hostname => {
					debug!("hostname validation disabled; accepting name mismatch");
				}
				Err(e) => return Err(e),
			}
		}

		if let Some(validator) = &self.validator {
			let host = match server_name {
				ServerName::DnsName(dns) => dns.as_ref().to_string(),
				ServerName::IpAddress(ip) => ip.to_string(),
				_ => {
					return Err(rustls::Error::General(
						"unsupported server name type".into(),
					));
				}
			};

			let mut chain: Vec<Vec<u8>> = Vec::with_capacity(1 + intermediates.len());
			chain.push(end_entity.0.clone());
			chain.extend(intermediates.iter().map(|c| c.0.clone()));

			match validator.validate(&chain, &host, tls_sct_count) {
				PinVerdict::Success | PinVerdict::NoPin => {}
				PinVerdict::Failure(reason) => {
					// Fatal and non-retryable; the connection is torn down.
					return Err(rustls::Error::General(format!(
						"{PIN_FAILURE_MARKER}: {reason}"
					)));
				}
			}
		}

		Ok(ServerCertVerified::assertion())
	}
}

/// Assemble the rustls client configuration for the given security settings
/// and ALPN protocol list.
pub fn build_client_config(
	security: &SecurityConfiguration,
	alpn: Vec<Vec<u8>>,
) -> Result<Arc<ClientConfig>> {
	let roots = build_root_store(security)?;

	// rustls does not implement TLS 1.0/1.1; treat anything below 1.2 as 1.2.
	let versions: &[&rustls::SupportedProtocolVersion] = match security.min_tls_version {
		TlsVersion::V1_3 => &[&rustls::version::TLS13],
		v => {
			if v < TlsVersion::V1_2 {
				warn!("TLS {v:?} not supported; negotiating 1.2 as the minimum");
			}
			&[&rustls::version::TLS12, &rustls::version::TLS13]
		}
	};

	let validator = pin_validator_from(security)?;
	let verifier = PinningVerifier {
		inner: WebPkiVerifier::new(roots.clone(), None),
		validator,
		allow_invalid_certificates: security.allow_invalid_certificates,
		validate_hostname: security.validate_hostname,
	};

	let mut config = ClientConfig::builder()
		.with_safe_default_cipher_suites()
		.with_safe_default_kx_groups()
		.with_protocol_versions(versions)
		.map_err(|e| anyhow::anyhow!("failed to select protocol versions: {e:?}"))?
		.with_root_certificates(roots)
		.with_no_client_auth();

	config
		.dangerous()
		.set_certificate_verifier(Arc::new(verifier));
	config.alpn_protocols = alpn;

	Ok(Arc::new(config))
}

/// Whether a TLS error string indicates a pin validation failure.
pub fn is_pin_failure(message: &str) -> bool {
	message.contains(PIN_FAILURE_MARKER)
}
