use std::collections::HashSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a pin is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
	/// SHA-256 over the full certificate DER.
	Certificate,
	/// SHA-256 over the DER-encoded SubjectPublicKeyInfo. Preferred: survives
	/// certificate re-issuance as long as the key is unchanged.
	#[default]
	PublicKey,
	/// Both a certificate pin and a public-key pin must match.
	Both,
}

/// Pinning policy for one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinConfiguration {
	pub host: String,

	/// Case-sensitive base64(SHA-256) pin strings.
	pub pins: HashSet<String>,

	#[serde(default)]
	pub mode: PinMode,

	/// Also apply this configuration to `*.host`.
	#[serde(default)]
	pub include_subdomains: bool,

	/// Require at least two pins so a backup key is always configured.
	#[serde(default)]
	pub enforce_backup_pins: bool,

	/// Policy lifetime in seconds, if bounded.
	#[serde(default)]
	pub max_age_secs: Option<u64>,
}

impl PinConfiguration {
	pub fn new(host: impl Into<String>, pins: impl IntoIterator<Item = String>) -> Self {
		Self {
			host: host.into(),
			pins: pins.into_iter().collect(),
			mode: PinMode::PublicKey,
			include_subdomains: false,
			enforce_backup_pins: false,
			max_age_secs: None,
		}
	}

	/// Check the configuration invariants: a non-empty pin set, and at least
	/// two pins when backup pins are enforced.
	pub fn validate(&self) -> Result<(), String> {
		if self.pins.is_empty() {
			return Err(format!("pin set for {} is empty", self.host));
		}
		if self.enforce_backup_pins && self.pins.len() < 2 {
			return Err(format!(
				"backup pins enforced for {} but only {} pin configured",
				self.host,
				self.pins.len()
			));
		}
		Ok(())
	}

	/// Whether this configuration governs `host`.
	fn matches_host(&self, host: &str) -> bool {
		if host.eq_ignore_ascii_case(&self.host) {
			return true;
		}
		if self.include_subdomains {
			let suffix = format!(".{}", self.host);
			return host.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase());
		}
		false
	}
}

/// Outcome of validating a server trust chain against pin policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinVerdict {
	/// A configured pin matched.
	Success,
	/// No pin configuration governs this host; pinning does not apply.
	NoPin,
	/// Pinning applies and no pin matched, or CT requirements failed.
	Failure(String),
}

/// Compute the certificate pin: base64(SHA-256(DER(cert))).
pub fn certificate_pin(der: &[u8]) -> String {
	BASE64.encode(Sha256::digest(der))
}

/// Compute the public-key pin: base64(SHA-256(SPKI DER)).
///
/// The hash covers the complete SubjectPublicKeyInfo structure including the
/// algorithm identifier prefix, matching RFC 7469 pin generation.
pub fn public_key_pin(der: &[u8]) -> Result<String, String> {
	let (_, cert) = x509_parser::parse_x509_certificate(der)
		.map_err(|e| format!("failed to parse certificate DER: {e:?}"))?;
	Ok(BASE64.encode(Sha256::digest(cert.public_key().raw)))
}

/// Count embedded Signed Certificate Timestamps in the leaf certificate.
///
/// The SCT list extension (OID 1.3.6.1.4.1.11129.2.4.2) wraps a TLS-encoded
/// `SignedCertificateTimestampList` in an OCTET STRING. Entries are counted
/// structurally; log signature verification is the platform's concern.
pub fn count_embedded_scts(leaf_der: &[u8]) -> usize {
	let Ok((_, cert)) = x509_parser::parse_x509_certificate(leaf_der) else {
		return 0;
	};
	let oid = x509_parser::der_parser::oid!(1.3.6.1.4.1.11129.2.4.2);
	let Ok(Some(ext)) = cert.get_extension_unique(&oid) else {
		return 0;
	};
	count_scts_in_extension(ext.value)
}

/// Parse the extension value: an OCTET STRING wrapping `u16 list_len`
/// followed by length-prefixed SCT entries.
fn count_scts_in_extension(value: &[u8]) -> usize {
	// Strip the DER OCTET STRING header (tag 0x04, short or long length form).
	if value.len() < 2 || value[0] != 0x04 {
		return 0;
	}
	let (content_start, content_len) = if value[1] < 0x80 {
		(2usize, value[1] as usize)
	} else {
		let len_octets = (value[1] & 0x7f) as usize;
		if len_octets == 0 || len_octets > 4 || value.len() < 2 + len_octets {
			return 0;
		}
		let mut len = 0usize;
		for i in 0..len_octets {
			len = (len << 8) | value[2 + i] as usize;
		}
		(2 + len_octets, len)
	};
	let Some(content) = value.get(content_start..content_start + content_len) else {
		return 0;
	};

	// TLS SignedCertificateTimestampList: u16 total length, then entries each
	// prefixed with a u16 length.
	if content.len() < 2 {
		return 0;
	}
	let list_len = u16::from_be_bytes([content[0], content[1]]) as usize;
	let Some(mut list) = content.get(2..2 + list_len) else {
		return 0;
	};

	let mut count = 0;
	while list.len() >= 2 {
		let sct_len = u16::from_be_bytes([list[0], list[1]]) as usize;
		let Some(rest) = list.get(2 + sct_len..) else {
			return count;
		};
		count += 1;
		list = rest;
	}
	count
}

/// Validates server trust chains against configured pins.
///
/// Validation is deterministic: the verdict depends only on the configured
/// policies and the presented chain.
#[derive(Debug, Clone, Default)]
pub struct PinValidator {
	configurations: Vec<PinConfiguration>,
	require_certificate_transparency: bool,
	/// Minimum SCT count when CT is required.
	minimum_sct_count: usize,
}

impl PinValidator {
	pub fn new(configurations: Vec<PinConfiguration>) -> Result<Self, String> {
		for config in &configurations {
			config.validate()?;
		}
		Ok(Self {
			configurations,
			require_certificate_transparency: false,
			minimum_sct_count: 2,
		})
	}

	pub fn with_certificate_transparency(mut self, minimum_scts: usize) -> Self {
		self.require_certificate_transparency = true;
		self.minimum_sct_count = minimum_scts;
		self
	}

	/// Find the configuration governing `host`: exact match first, then any
	/// configuration with `include_subdomains`.
	pub fn configuration_for(&self, host: &str) -> Option<&PinConfiguration> {
		self.configurations
			.iter()
			.find(|c| c.host.eq_ignore_ascii_case(host))
			.or_else(|| self.configurations.iter().find(|c| c.matches_host(host)))
	}

	/// Validate a DER-encoded chain (leaf first) for `host`.
	///
	/// `tls_sct_count` is the number of SCTs delivered via the TLS handshake;
	/// it is added to the count embedded in the leaf when CT is required.
	pub fn validate(&self, chain_der: &[Vec<u8>], host: &str, tls_sct_count: usize) -> PinVerdict {
		let Some(config) = self.configuration_for(host) else {
			debug!("no pin configuration for {host}; skipping pin validation");
			return PinVerdict::NoPin;
		};

		if chain_der.is_empty() {
			return PinVerdict::Failure("server presented an empty certificate chain".into());
		}

		if self.require_certificate_transparency {
			let embedded = count_embedded_scts(&chain_der[0]);
			let total = embedded + tls_sct_count;
			if total < self.minimum_sct_count {
				warn!(
					"certificate transparency check failed for {host}: {total} SCTs, need {}",
					self.minimum_sct_count
				);
				return PinVerdict::Failure(format!(
					"insufficient signed certificate timestamps: {total} < {}",
					self.minimum_sct_count
				));
			}
		}

		// Leaf-first iteration; the first intersecting pin wins.
		let mut cert_matched = false;
		let mut spki_matched = false;
		for der in chain_der {
			if matches!(config.mode, PinMode::Certificate | PinMode::Both) && !cert_matched {
				let pin = certificate_pin(der);
				if config.pins.contains(&pin) {
					debug!("certificate pin matched for {host}");
					cert_matched = true;
				}
			}
			if matches!(config.mode, PinMode::PublicKey | PinMode::Both) && !spki_matched {
				match public_key_pin(der) {
					Ok(pin) => {
						if config.pins.contains(&pin) {
							debug!("public-key pin matched for {host}");
							spki_matched = true;
						}
					}
					Err(e) => {
						return PinVerdict::Failure(e);
					}
				}
			}

			let satisfied = match config.mode {
				PinMode::Certificate => cert_matched,
				PinMode::PublicKey => spki_matched,
				PinMode::Both => cert_matched && spki_matched,
			};
			if satisfied {
				return PinVerdict::Success;
			}
		}

		warn!("no matching pin for {host} in a chain of {} certificates", chain_der.len());
		PinVerdict::Failure("no matching pin".into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_cert_der(host: &str) -> Vec<u8> {
		let cert = rcgen::generate_simple_self_signed(vec![host.to_string()])
			.expect("certificate generation should succeed");
		cert.serialize_der().expect("DER serialization should succeed")
	}

	fn validator_for(config: PinConfiguration) -> PinValidator {
		PinValidator::new(vec![config]).expect("configuration should be valid")
	}

	#[test]
	fn configuration_invariants() {
		let empty = PinConfiguration::new("api.example.com", vec![]);
		assert!(empty.validate().is_err());

		let mut single = PinConfiguration::new("api.example.com", vec!["AAAA".to_string()]);
		single.enforce_backup_pins = true;
		assert!(single.validate().is_err());

		single.pins.insert("BBBB".to_string());
		assert!(single.validate().is_ok());
	}

	#[test]
	fn no_configuration_yields_no_pin() {
		let validator = validator_for(PinConfiguration::new(
			"api.example.com",
			vec!["AAAA".to_string()],
		));
		let chain = vec![test_cert_der("other.example.org")];
		assert_eq!(
			validator.validate(&chain, "other.example.org", 0),
			PinVerdict::NoPin
		);
	}

	#[test]
	fn public_key_pin_match_succeeds() {
		let der = test_cert_der("api.example.com");
		let pin = public_key_pin(&der).unwrap();

		let validator = validator_for(PinConfiguration::new("api.example.com", vec![pin]));
		assert_eq!(
			validator.validate(&[der], "api.example.com", 0),
			PinVerdict::Success
		);
	}

	#[test]
	fn certificate_pin_match_succeeds() {
		let der = test_cert_der("api.example.com");
		let mut config =
			PinConfiguration::new("api.example.com", vec![certificate_pin(&der)]);
		config.mode = PinMode::Certificate;

		let validator = validator_for(config);
		assert_eq!(
			validator.validate(&[der], "api.example.com", 0),
			PinVerdict::Success
		);
	}

	#[test]
	fn wrong_pin_fails() {
		let der = test_cert_der("api.example.com");
		let other = test_cert_der("api.example.com");
		// Pin computed from a different key pair never matches.
		let validator = validator_for(PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&other).unwrap()],
		));
		assert!(matches!(
			validator.validate(&[der], "api.example.com", 0),
			PinVerdict::Failure(_)
		));
	}

	#[test]
	fn both_mode_requires_both_kinds() {
		let der = test_cert_der("api.example.com");

		// Only the SPKI pin configured: Both must fail.
		let mut config = PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&der).unwrap()],
		);
		config.mode = PinMode::Both;
		let validator = validator_for(config);
		assert!(matches!(
			validator.validate(&[der.clone()], "api.example.com", 0),
			PinVerdict::Failure(_)
		));

		// Both pins configured: succeeds.
		let mut config = PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&der).unwrap(), certificate_pin(&der)],
		);
		config.mode = PinMode::Both;
		let validator = validator_for(config);
		assert_eq!(
			validator.validate(&[der], "api.example.com", 0),
			PinVerdict::Success
		);
	}

	#[test]
	fn subdomain_matching() {
		let der = test_cert_der("sub.api.example.com");
		let mut config = PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&der).unwrap()],
		);
		config.include_subdomains = true;

		let validator = validator_for(config.clone());
		assert_eq!(
			validator.validate(&[der.clone()], "sub.api.example.com", 0),
			PinVerdict::Success
		);

		// Without include_subdomains the subdomain is unpinned.
		config.include_subdomains = false;
		let validator = validator_for(config);
		assert_eq!(
			validator.validate(&[der], "sub.api.example.com", 0),
			PinVerdict::NoPin
		);
	}

	#[test]
	fn exact_host_preferred_over_subdomain_wildcard() {
		let exact_der = test_cert_der("sub.api.example.com");
		let mut wildcard = PinConfiguration::new(
			"api.example.com",
			vec!["irrelevant".to_string()],
		);
		wildcard.include_subdomains = true;
		let exact = PinConfiguration::new(
			"sub.api.example.com",
			vec![public_key_pin(&exact_der).unwrap()],
		);

		let validator = PinValidator::new(vec![wildcard, exact]).unwrap();
		assert_eq!(
			validator.validate(&[exact_der], "sub.api.example.com", 0),
			PinVerdict::Success
		);
	}

	#[test]
	fn validation_is_deterministic() {
		let der = test_cert_der("api.example.com");
		let validator = validator_for(PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&der).unwrap()],
		));
		let chain = vec![der];
		let first = validator.validate(&chain, "api.example.com", 0);
		for _ in 0..10 {
			assert_eq!(validator.validate(&chain, "api.example.com", 0), first);
		}
	}

	#[test]
	fn ct_requirement_fails_without_scts() {
		let der = test_cert_der("api.example.com");
		let validator = validator_for(PinConfiguration::new(
			"api.example.com",
			vec![public_key_pin(&der).unwrap()],
		))
		.with_certificate_transparency(2);

		// rcgen test certificates carry no SCT extension.
		assert!(matches!(
			validator.validate(&[der.clone()], "api.example.com", 0),
			PinVerdict::Failure(_)
		));

		// SCTs delivered via the TLS handshake satisfy the requirement.
		assert_eq!(
			validator.validate(&[der], "api.example.com", 2),
			PinVerdict::Success
		);
	}

	#[test]
	fn sct_extension_count_parsing() {
		// OCTET STRING { list_len=14, entry(len=4), entry(len=6) }
		let value = [
			0x04, 0x10, // OCTET STRING, length 16
			0x00, 0x0e, // list length 14
			0x00, 0x04, 1, 2, 3, 4, // first SCT
			0x00, 0x06, 1, 2, 3, 4, 5, 6, // second SCT
		];
		assert_eq!(count_scts_in_extension(&value), 2);

		// Truncated list stops counting cleanly.
		let truncated = [0x04, 0x06, 0x00, 0x08, 0x00, 0x04, 1, 2];
		assert_eq!(count_scts_in_extension(&truncated), 0);
	}
}
