use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NetworkError;
use crate::request::new_correlation_id;

/// Signing algorithms supported for client-issued JWTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JwtAlgorithm {
	#[default]
	HS256,
	HS384,
	HS512,
	RS256,
	RS384,
	RS512,
	ES256,
	ES384,
}

impl JwtAlgorithm {
	fn to_jsonwebtoken(self) -> Algorithm {
		match self {
			JwtAlgorithm::HS256 => Algorithm::HS256,
			JwtAlgorithm::HS384 => Algorithm::HS384,
			JwtAlgorithm::HS512 => Algorithm::HS512,
			JwtAlgorithm::RS256 => Algorithm::RS256,
			JwtAlgorithm::RS384 => Algorithm::RS384,
			JwtAlgorithm::RS512 => Algorithm::RS512,
			JwtAlgorithm::ES256 => Algorithm::ES256,
			JwtAlgorithm::ES384 => Algorithm::ES384,
		}
	}
}

/// Key material for JWT signing.
#[derive(Clone)]
pub enum JwtKey {
	/// Symmetric secret for the HMAC family.
	Secret(Vec<u8>),
	/// PEM-encoded RSA private key.
	RsaPem(String),
	/// PEM-encoded EC private key.
	EcPem(String),
}

impl std::fmt::Debug for JwtKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// Key material never appears in logs.
		match self {
			JwtKey::Secret(_) => write!(f, "Secret(..)"),
			JwtKey::RsaPem(_) => write!(f, "RsaPem(..)"),
			JwtKey::EcPem(_) => write!(f, "EcPem(..)"),
		}
	}
}

/// Configuration for issuing JWTs as the client credential.
#[derive(Debug, Clone)]
pub struct JwtConfig {
	pub algorithm: JwtAlgorithm,
	pub issuer: String,
	pub subject: Option<String>,
	pub audience: String,
	/// Token lifetime; `exp = iat + ttl`.
	pub ttl: Duration,
	pub key: JwtKey,
	/// Extra claims merged into the payload.
	pub custom_claims: Map<String, Value>,
}

impl JwtConfig {
	pub fn new(
		issuer: impl Into<String>,
		audience: impl Into<String>,
		key: JwtKey,
	) -> Self {
		Self {
			algorithm: JwtAlgorithm::HS256,
			issuer: issuer.into(),
			subject: None,
			audience: audience.into(),
			ttl: Duration::from_secs(300),
			key,
			custom_claims: Map::new(),
		}
	}

	fn encoding_key(&self) -> Result<EncodingKey, NetworkError> {
		match (&self.key, self.algorithm) {
			(JwtKey::Secret(secret), JwtAlgorithm::HS256 | JwtAlgorithm::HS384 | JwtAlgorithm::HS512) => {
				Ok(EncodingKey::from_secret(secret))
			}
			(JwtKey::RsaPem(pem), JwtAlgorithm::RS256 | JwtAlgorithm::RS384 | JwtAlgorithm::RS512) => {
				EncodingKey::from_rsa_pem(pem.as_bytes())
					.map_err(|e| NetworkError::JwtSigningFailed(e.to_string()))
			}
			(JwtKey::EcPem(pem), JwtAlgorithm::ES256 | JwtAlgorithm::ES384) => {
				EncodingKey::from_ec_pem(pem.as_bytes())
					.map_err(|e| NetworkError::JwtSigningFailed(e.to_string()))
			}
			_ => Err(NetworkError::JwtSigningFailed(
				"key material does not match the configured algorithm".into(),
			)),
		}
	}

	/// Issue a signed JWT: `{iss, sub?, aud, iat, nbf, exp, jti}` plus the
	/// configured custom claims, base64url-encoded without padding.
	pub fn issue(&self) -> Result<String, NetworkError> {
		let now = Utc::now().timestamp();
		let mut claims = self.custom_claims.clone();
		claims.insert("iss".into(), Value::String(self.issuer.clone()));
		if let Some(subject) = &self.subject {
			claims.insert("sub".into(), Value::String(subject.clone()));
		}
		claims.insert("aud".into(), Value::String(self.audience.clone()));
		claims.insert("iat".into(), Value::from(now));
		claims.insert("nbf".into(), Value::from(now));
		claims.insert("exp".into(), Value::from(now + self.ttl.as_secs() as i64));
		claims.insert("jti".into(), Value::String(new_correlation_id()));

		let header = Header::new(self.algorithm.to_jsonwebtoken());
		jsonwebtoken::encode(&header, &claims, &self.encoding_key()?)
			.map_err(|e| NetworkError::JwtSigningFailed(e.to_string()))
	}
}

/// Decode and validate a JWT against a symmetric secret, checking signature,
/// expiry, issuer, and audience.
pub fn verify_hmac(
	token: &str,
	secret: &[u8],
	algorithm: JwtAlgorithm,
	issuer: &str,
	audience: &str,
) -> Result<Map<String, Value>, NetworkError> {
	let mut validation = Validation::new(algorithm.to_jsonwebtoken());
	validation.set_issuer(&[issuer]);
	validation.set_audience(&[audience]);

	let data = jsonwebtoken::decode::<Map<String, Value>>(
		token,
		&DecodingKey::from_secret(secret),
		&validation,
	)
	.map_err(|e| NetworkError::Unauthorized { reason: Some(e.to_string()) })?;
	Ok(data.claims)
}
