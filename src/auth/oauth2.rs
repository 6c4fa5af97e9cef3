use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::store::Token;
use crate::error::NetworkError;
use crate::pipeline::transport::{Transport, encode_form};
use crate::request::{Method, PreparedRequest, new_correlation_id};

/// OAuth2 grant types. Only the four supported grants execute; the legacy
/// implicit and password grants are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
	AuthorizationCode,
	ClientCredentials,
	DeviceCode,
	RefreshToken,
	Implicit,
	Password,
}

impl GrantType {
	pub fn is_supported(&self) -> bool {
		!matches!(self, GrantType::Implicit | GrantType::Password)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::ClientCredentials => "client_credentials",
			GrantType::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
			GrantType::RefreshToken => "refresh_token",
			GrantType::Implicit => "implicit",
			GrantType::Password => "password",
		}
	}
}

/// Static configuration for one OAuth2 client registration.
#[derive(Debug, Clone)]
pub struct OAuth2Config {
	pub client_id: String,
	pub client_secret: Option<String>,
	pub authorization_endpoint: Url,
	pub token_endpoint: Url,
	pub device_authorization_endpoint: Option<Url>,
	pub redirect_uri: String,
	pub scopes: Vec<String>,
	/// Attach a PKCE challenge to the authorization-code flow.
	pub use_pkce: bool,
}

impl OAuth2Config {
	pub fn scope_string(&self) -> String {
		self.scopes.join(" ")
	}
}

/// Token endpoint wire response (RFC 6749 §5.1).
#[derive(Debug, Deserialize)]
struct TokenResponseWire {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	scope: Option<String>,
}

/// Token endpoint error response (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ErrorResponseWire {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

/// Device authorization response (RFC 8628 §3.2).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
	pub device_code: String,
	pub user_code: String,
	pub verification_uri: String,
	pub expires_in: u64,
	#[serde(default)]
	pub interval: Option<u64>,
}

/// A begun authorization-code flow: present `url` to the user, keep `state`
/// and `pkce_verifier` for the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
	pub url: Url,
	pub state: String,
	pub pkce_verifier: Option<String>,
}

/// 128-bit random state parameter, hex encoded.
pub fn new_state() -> String {
	let raw: u128 = rand::thread_rng().r#gen();
	format!("{raw:032x}")
}

/// A PKCE verifier: 64 characters from the unreserved set.
pub fn new_pkce_verifier() -> String {
	const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
	let mut rng = rand::thread_rng();
	(0..64)
		.map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
		.collect()
}

/// S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Executes OAuth2 grants against the token endpoint.
pub struct OAuth2Client {
	config: OAuth2Config,
	transport: Arc<dyn Transport>,
}

impl OAuth2Client {
	pub fn new(config: OAuth2Config, transport: Arc<dyn Transport>) -> Self {
		Self { config, transport }
	}

	pub fn config(&self) -> &OAuth2Config {
		&self.config
	}

	/// Step 1 of the authorization-code flow: the URL to present via the
	/// platform's web authentication surface.
	pub fn begin_authorization(&self) -> AuthorizationRequest {
		let state = new_state();
		let pkce_verifier = self.config.use_pkce.then(new_pkce_verifier);

		let mut url = self.config.authorization_endpoint.clone();
		{
			let mut query = url.query_pairs_mut();
			query
				.append_pair("client_id", &self.config.client_id)
				.append_pair("redirect_uri", &self.config.redirect_uri)
				.append_pair("response_type", "code")
				.append_pair("scope", &self.config.scope_string())
				.append_pair("state", &state);
			if let Some(verifier) = &pkce_verifier {
				query
					.append_pair("code_challenge", &pkce_challenge(verifier))
					.append_pair("code_challenge_method", "S256");
			}
		}

		AuthorizationRequest { url, state, pkce_verifier }
	}

	/// Step 3: extract the code from the callback URL, enforcing the state
	/// parameter.
	pub fn parse_callback(
		callback: &Url,
		expected_state: &str,
	) -> Result<String, NetworkError> {
		let mut code = None;
		let mut state = None;
		let mut error = None;
		for (key, value) in callback.query_pairs() {
			match key.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => state = Some(value.into_owned()),
				"error" => error = Some(value.into_owned()),
				_ => {}
			}
		}

		if let Some(error) = error {
			return Err(map_oauth_error(&error, None));
		}
		if state.as_deref() != Some(expected_state) {
			warn!("authorization callback state mismatch");
			return Err(NetworkError::StateMismatch);
		}
		code.ok_or(NetworkError::InvalidResponse)
	}

	/// Steps 4–5: exchange the authorization code for a token.
	pub async fn exchange_code(
		&self,
		code: &str,
		pkce_verifier: Option<&str>,
	) -> Result<Token, NetworkError> {
		let mut form = vec![
			("grant_type".to_string(), GrantType::AuthorizationCode.as_str().to_string()),
			("code".to_string(), code.to_string()),
			("redirect_uri".to_string(), self.config.redirect_uri.clone()),
			("client_id".to_string(), self.config.client_id.clone()),
		];
		if let Some(secret) = &self.config.client_secret {
			form.push(("client_secret".to_string(), secret.clone()));
		}
		if let Some(verifier) = pkce_verifier {
			form.push(("code_verifier".to_string(), verifier.to_string()));
		}
		self.token_request(form).await
	}

	/// The client-credentials grant.
	pub async fn client_credentials(&self) -> Result<Token, NetworkError> {
		let mut form = vec![
			("grant_type".to_string(), GrantType::ClientCredentials.as_str().to_string()),
			("client_id".to_string(), self.config.client_id.clone()),
		];
		if let Some(secret) = &self.config.client_secret {
			form.push(("client_secret".to_string(), secret.clone()));
		}
		if !self.config.scopes.is_empty() {
			form.push(("scope".to_string(), self.config.scope_string()));
		}
		self.token_request(form).await
	}

	/// The refresh-token grant.
	pub async fn refresh(&self, refresh_token: &str) -> Result<Token, NetworkError> {
		let mut form = vec![
			("grant_type".to_string(), GrantType::RefreshToken.as_str().to_string()),
			("refresh_token".to_string(), refresh_token.to_string()),
			("client_id".to_string(), self.config.client_id.clone()),
		];
		if let Some(secret) = &self.config.client_secret {
			form.push(("client_secret".to_string(), secret.clone()));
		}
		self.token_request(form).await
	}

	/// Start the device-code flow against the device authorization endpoint.
	pub async fn request_device_code(&self) -> Result<DeviceCodeResponse, NetworkError> {
		let endpoint = self
			.config
			.device_authorization_endpoint
			.clone()
			.ok_or_else(|| {
				NetworkError::UnsupportedGrantType("device_code (no endpoint configured)".into())
			})?;

		let mut form = vec![("client_id".to_string(), self.config.client_id.clone())];
		if !self.config.scopes.is_empty() {
			form.push(("scope".to_string(), self.config.scope_string()));
		}

		let (status, body) = self.post_form(&endpoint, &form).await?;
		if !(200..=299).contains(&status) {
			return Err(parse_error_body(status, &body));
		}
		serde_json::from_slice(&body).map_err(|e| NetworkError::DecodingFailed(e.to_string()))
	}

	/// Poll the token endpoint until the user approves, denies, or the device
	/// code expires. The server's `interval` (raised on `slow_down`) paces
	/// polling; `expires_in` is a hard deadline.
	pub async fn poll_device_token(
		&self,
		device: &DeviceCodeResponse,
		cancel: &CancellationToken,
	) -> Result<Token, NetworkError> {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);
		let mut interval = Duration::from_secs(device.interval.unwrap_or(5).max(1));

		loop {
			if tokio::time::Instant::now() >= deadline {
				return Err(NetworkError::DeviceCodeExpired);
			}

			tokio::select! {
				_ = cancel.cancelled() => return Err(NetworkError::Cancelled),
				_ = tokio::time::sleep(interval) => {}
			}

			let mut form = vec![
				("grant_type".to_string(), GrantType::DeviceCode.as_str().to_string()),
				("device_code".to_string(), device.device_code.clone()),
				("client_id".to_string(), self.config.client_id.clone()),
			];
			if let Some(secret) = &self.config.client_secret {
				form.push(("client_secret".to_string(), secret.clone()));
			}

			match self.token_request(form).await {
				Ok(token) => return Ok(token),
				Err(NetworkError::AuthorizationPending) => {
					debug!("device authorization pending; polling again");
				}
				Err(NetworkError::SlowDown) => {
					interval += Duration::from_secs(5);
					debug!("token endpoint asked to slow down; interval now {interval:?}");
				}
				Err(NetworkError::DeviceCodeExpired) => {
					return Err(NetworkError::DeviceCodeExpired);
				}
				Err(other) => return Err(other),
			}
		}
	}

	/// Execute an unsupported grant: always an error, by policy.
	pub fn reject_unsupported(grant: GrantType) -> NetworkError {
		NetworkError::UnsupportedGrantType(grant.as_str().to_string())
	}

	async fn token_request(&self, form: Vec<(String, String)>) -> Result<Token, NetworkError> {
		let (status, body) = self.post_form(&self.config.token_endpoint, &form).await?;
		parse_token_response(status, &body)
	}

	async fn post_form(
		&self,
		url: &Url,
		form: &[(String, String)],
	) -> Result<(u16, Bytes), NetworkError> {
		let body = encode_form(form);
		let request = PreparedRequest {
			method: Method::Post,
			url: url.clone(),
			headers: [
				("content-type", "application/x-www-form-urlencoded"),
				("accept", "application/json"),
			]
			.into_iter()
			.collect(),
			body: Some(Bytes::from(body)),
			timeout: Duration::from_secs(30),
			correlation_id: new_correlation_id(),
		};
		let response = self.transport.send(&request).await?;
		Ok((response.status, response.body))
	}
}

/// Parse a token endpoint response into a `Token`, mapping RFC 6749 errors.
pub fn parse_token_response(status: u16, body: &[u8]) -> Result<Token, NetworkError> {
	if (200..=299).contains(&status) {
		let wire: TokenResponseWire = serde_json::from_slice(body)
			.map_err(|e| NetworkError::DecodingFailed(e.to_string()))?;
		return Ok(Token {
			access_token: wire.access_token,
			refresh_token: wire.refresh_token,
			token_type: wire.token_type.unwrap_or_else(|| "Bearer".to_string()),
			expires_at: wire
				.expires_in
				.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
			scope: wire.scope,
		});
	}
	Err(parse_error_body(status, body))
}

fn parse_error_body(status: u16, body: &[u8]) -> NetworkError {
	match serde_json::from_slice::<ErrorResponseWire>(body) {
		Ok(wire) => map_oauth_error(&wire.error, wire.error_description.as_deref()),
		Err(_) => NetworkError::ServerError {
			code: status,
			message: std::str::from_utf8(body).ok().map(|s| s.to_string()),
		},
	}
}

fn map_oauth_error(error: &str, description: Option<&str>) -> NetworkError {
	match error {
		"authorization_pending" => NetworkError::AuthorizationPending,
		"slow_down" => NetworkError::SlowDown,
		"expired_token" => NetworkError::DeviceCodeExpired,
		"access_denied" => NetworkError::Unauthorized {
			reason: Some(description.unwrap_or("access denied").to_string()),
		},
		"invalid_grant" | "invalid_client" => NetworkError::InvalidCredentials,
		"unsupported_grant_type" => {
			NetworkError::UnsupportedGrantType(description.unwrap_or(error).to_string())
		}
		other => NetworkError::Unauthorized {
			reason: Some(match description {
				Some(d) => format!("{other}: {d}"),
				None => other.to_string(),
			}),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(use_pkce: bool) -> OAuth2Config {
		OAuth2Config {
			client_id: "client-1".into(),
			client_secret: Some("shhh".into()),
			authorization_endpoint: Url::parse("https://auth.example.com/authorize").unwrap(),
			token_endpoint: Url::parse("https://auth.example.com/token").unwrap(),
			device_authorization_endpoint: None,
			redirect_uri: "https://app.example.com/callback".into(),
			scopes: vec!["read".into(), "write".into()],
			use_pkce,
		}
	}

	struct NoTransport;

	#[async_trait]
	impl Transport for NoTransport {
		async fn send(
			&self,
			_request: &PreparedRequest,
		) -> Result<crate::request::Response, NetworkError> {
			Err(NetworkError::NoConnection)
		}
	}

	fn client(use_pkce: bool) -> OAuth2Client {
		OAuth2Client::new(config(use_pkce), Arc::new(NoTransport))
	}

	#[test]
	fn authorization_url_carries_required_parameters() {
		let begun = client(false).begin_authorization();
		let query: Vec<(String, String)> = begun
			.url
			.query_pairs()
			.map(|(k, v)| (k.into_owned(), v.into_owned()))
			.collect();

		assert!(query.contains(&("client_id".into(), "client-1".into())));
		assert!(query.contains(&("response_type".into(), "code".into())));
		assert!(query.contains(&("scope".into(), "read write".into())));
		assert!(query.iter().any(|(k, v)| k == "state" && v.len() == 32));
		assert!(begun.pkce_verifier.is_none());
	}

	#[test]
	fn pkce_challenge_is_attached_when_enabled() {
		let begun = client(true).begin_authorization();
		let verifier = begun.pkce_verifier.expect("PKCE verifier expected");
		assert_eq!(verifier.len(), 64);

		let challenge: Option<String> = begun
			.url
			.query_pairs()
			.find(|(k, _)| k == "code_challenge")
			.map(|(_, v)| v.into_owned());
		assert_eq!(challenge, Some(pkce_challenge(&verifier)));
		assert!(
			begun
				.url
				.query_pairs()
				.any(|(k, v)| k == "code_challenge_method" && v == "S256")
		);
	}

	#[test]
	fn callback_state_must_match() {
		let callback =
			Url::parse("https://app.example.com/callback?code=abc&state=expected").unwrap();
		assert_eq!(
			OAuth2Client::parse_callback(&callback, "expected").unwrap(),
			"abc"
		);
		assert_eq!(
			OAuth2Client::parse_callback(&callback, "other").unwrap_err(),
			NetworkError::StateMismatch
		);
	}

	#[test]
	fn callback_error_parameter_maps() {
		let callback =
			Url::parse("https://app.example.com/callback?error=access_denied&state=s").unwrap();
		assert!(matches!(
			OAuth2Client::parse_callback(&callback, "s").unwrap_err(),
			NetworkError::Unauthorized { .. }
		));
	}

	#[test]
	fn token_response_parsing_computes_expiry() {
		let body = br#"{"access_token":"at","token_type":"Bearer","expires_in":3600,"refresh_token":"rt","scope":"read"}"#;
		let token = parse_token_response(200, body).unwrap();
		assert_eq!(token.access_token, "at");
		assert_eq!(token.refresh_token.as_deref(), Some("rt"));
		let exp = token.expires_at.expect("expiry expected");
		let delta = (exp - Utc::now()).num_seconds();
		assert!((3590..=3600).contains(&delta), "expiry ~1h out, got {delta}s");
	}

	#[test]
	fn token_response_defaults_token_type() {
		let body = br#"{"access_token":"at"}"#;
		let token = parse_token_response(200, body).unwrap();
		assert_eq!(token.token_type, "Bearer");
		assert!(token.expires_at.is_none());
	}

	#[test]
	fn rfc6749_errors_map_to_taxonomy() {
		let pending = br#"{"error":"authorization_pending"}"#;
		assert_eq!(
			parse_token_response(400, pending).unwrap_err(),
			NetworkError::AuthorizationPending
		);

		let slow = br#"{"error":"slow_down"}"#;
		assert_eq!(parse_token_response(400, slow).unwrap_err(), NetworkError::SlowDown);

		let expired = br#"{"error":"expired_token"}"#;
		assert_eq!(
			parse_token_response(400, expired).unwrap_err(),
			NetworkError::DeviceCodeExpired
		);

		let bad_grant = br#"{"error":"invalid_grant","error_description":"revoked"}"#;
		assert_eq!(
			parse_token_response(400, bad_grant).unwrap_err(),
			NetworkError::InvalidCredentials
		);
	}

	#[test]
	fn unsupported_grants_are_rejected() {
		assert!(!GrantType::Implicit.is_supported());
		assert!(!GrantType::Password.is_supported());
		assert!(GrantType::AuthorizationCode.is_supported());
		assert!(matches!(
			OAuth2Client::reject_unsupported(GrantType::Implicit),
			NetworkError::UnsupportedGrantType(_)
		));
	}

	#[test]
	fn pkce_challenge_matches_rfc_example() {
		// RFC 7636 appendix B test vector.
		let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
		assert_eq!(
			pkce_challenge(verifier),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}
}
