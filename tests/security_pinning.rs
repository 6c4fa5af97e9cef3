//! Security test: pin validation against real TLS handshakes.
//!
//! Drives a rustls server with a generated certificate over an in-process
//! duplex stream, and asserts that the client's pinning verifier aborts the
//! handshake on a pin mismatch and admits a matching pin. No application
//! bytes cross the wire when pinning fails.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use bifrost::config::{PinningPolicy, SecurityConfiguration};
use bifrost::security::pinning::{PinConfiguration, certificate_pin, public_key_pin};
use bifrost::security::{build_client_config, is_pin_failure};

const HOST: &str = "api.example.com";

fn tls_server() -> (TlsAcceptor, Vec<u8>) {
	let cert = rcgen::generate_simple_self_signed(vec![HOST.to_string()])
		.expect("certificate generation");
	let cert_der = cert.serialize_der().expect("DER");
	let key_der = cert.serialize_private_key_der();

	let server_config = tokio_rustls::rustls::ServerConfig::builder()
		.with_safe_default_cipher_suites()
		.with_safe_default_kx_groups()
		.with_safe_default_protocol_versions()
		.expect("protocol versions")
		.with_no_client_auth()
		.with_single_cert(
			vec![tokio_rustls::rustls::Certificate(cert_der.clone())],
			tokio_rustls::rustls::PrivateKey(key_der),
		)
		.expect("server config");

	(TlsAcceptor::from(Arc::new(server_config)), cert_der)
}

fn security_with(pinning: PinningPolicy, pin: Option<String>) -> SecurityConfiguration {
	let mut security = SecurityConfiguration::default();
	// The test certificate is self-signed, so chain validation is waived;
	// pins are still enforced.
	security.allow_invalid_certificates = true;
	security.pinning = pinning;
	if let Some(pin) = pin {
		security.pins = vec![PinConfiguration::new(HOST, vec![pin])];
	}
	security
}

/// Handshake against a fresh test server; `make_security` sees the server's
/// certificate DER so tests can pin it (or deliberately pin something else).
/// On success one application byte is echoed through the tunnel.
async fn run_handshake(
	make_security: impl FnOnce(&[u8]) -> SecurityConfiguration,
) -> Result<(), Box<dyn std::error::Error>> {
	let (acceptor, cert_der) = tls_server();
	let security = make_security(&cert_der);
	let (client_io, server_io) = tokio::io::duplex(64 * 1024);

	let server_task = tokio::spawn(async move {
		// A rejected client handshake surfaces here as an accept error;
		// expected for the mismatch cases.
		if let Ok(mut stream) = acceptor.accept(server_io).await {
			let mut byte = [0u8; 1];
			if stream.read_exact(&mut byte).await.is_ok() {
				let _ = stream.write_all(&byte).await;
			}
		}
	});

	let config = build_client_config(&security, vec![b"http/1.1".to_vec()])?;
	let connector = TlsConnector::from(config);
	let server_name = tokio_rustls::rustls::ServerName::try_from(HOST)?;

	let mut stream = connector.connect(server_name, client_io).await?;
	stream.write_all(b"x").await?;
	let mut echo = [0u8; 1];
	stream.read_exact(&mut echo).await?;
	assert_eq!(&echo, b"x");

	let _ = server_task.await;
	Ok(())
}

#[tokio::test]
async fn matching_public_key_pin_admits_the_connection()
-> Result<(), Box<dyn std::error::Error>> {
	run_handshake(|cert_der| {
		let pin = public_key_pin(cert_der).expect("pin");
		security_with(PinningPolicy::PublicKey, Some(pin))
	})
	.await
}

#[tokio::test]
async fn matching_certificate_pin_admits_the_connection()
-> Result<(), Box<dyn std::error::Error>> {
	run_handshake(|cert_der| {
		security_with(PinningPolicy::Certificate, Some(certificate_pin(cert_der)))
	})
	.await
}

#[tokio::test]
async fn mismatched_pin_aborts_the_handshake() {
	// A pin from a different key pair never matches the server's SPKI.
	let other = rcgen::generate_simple_self_signed(vec![HOST.to_string()]).unwrap();
	let wrong_pin = public_key_pin(&other.serialize_der().unwrap()).unwrap();

	let err = run_handshake(|_| security_with(PinningPolicy::PublicKey, Some(wrong_pin)))
		.await
		.expect_err("handshake must fail");
	assert!(
		is_pin_failure(&err.to_string()),
		"expected a pin failure, got: {err}"
	);
}

#[tokio::test]
async fn certificate_mode_pins_the_exact_certificate() {
	let other = rcgen::generate_simple_self_signed(vec![HOST.to_string()]).unwrap();
	let wrong_pin = certificate_pin(&other.serialize_der().unwrap());

	let err = run_handshake(|_| security_with(PinningPolicy::Certificate, Some(wrong_pin)))
		.await
		.expect_err("handshake must fail");
	assert!(is_pin_failure(&err.to_string()));
}

#[tokio::test]
async fn unpinned_host_is_admitted_without_pins() -> Result<(), Box<dyn std::error::Error>> {
	// No pin configuration at all: only (waived) chain validation applies.
	run_handshake(|_| security_with(PinningPolicy::None, None)).await
}

#[tokio::test]
async fn untrusted_chain_is_rejected_when_not_waived() {
	// Self-signed server against the platform trust store: the handshake
	// must fail with a certificate error, not a pin failure.
	let err = run_handshake(|_| SecurityConfiguration::default())
		.await
		.expect_err("handshake must fail");
	assert!(!is_pin_failure(&err.to_string()));
}
