use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::NetworkError;

/// Slack subtracted from the expiry when deciding whether to refresh.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(300);

/// An issued access token and its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	pub access_token: String,
	#[serde(default)]
	pub refresh_token: Option<String>,
	#[serde(default = "default_token_type")]
	pub token_type: String,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub scope: Option<String>,
}

fn default_token_type() -> String {
	"Bearer".to_string()
}

impl Token {
	pub fn bearer(access_token: impl Into<String>) -> Self {
		Self {
			access_token: access_token.into(),
			refresh_token: None,
			token_type: default_token_type(),
			expires_at: None,
			scope: None,
		}
	}

	/// Whether the token is past its expiry at `now`.
	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.map(|exp| now >= exp).unwrap_or(false)
	}

	pub fn is_expired(&self) -> bool {
		self.is_expired_at(Utc::now())
	}

	/// Whether the token is inside the refresh window: `now + skew >= expires_at`.
	pub fn needs_refresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
		match self.expires_at {
			Some(exp) => {
				let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| {
					chrono::Duration::seconds(DEFAULT_REFRESH_SKEW.as_secs() as i64)
				});
				now + skew >= exp
			}
			// Tokens without expiry never need a proactive refresh.
			None => false,
		}
	}

	pub fn needs_refresh(&self) -> bool {
		self.needs_refresh_at(Utc::now(), DEFAULT_REFRESH_SKEW)
	}

	/// The `Authorization` header value for this token.
	pub fn authorization_value(&self) -> String {
		format!("{} {}", self.token_type, self.access_token)
	}
}

/// The identity a token is bound to: client, scopes, and optional subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthIdentity {
	pub client_id: String,
	pub scopes: Vec<String>,
	#[serde(default)]
	pub subject: Option<String>,
}

impl AuthIdentity {
	pub fn new(client_id: impl Into<String>, scopes: Vec<String>) -> Self {
		Self {
			client_id: client_id.into(),
			scopes,
			subject: None,
		}
	}

	/// Stable storage key for this identity.
	pub fn key(&self) -> String {
		let mut scopes = self.scopes.clone();
		scopes.sort();
		match &self.subject {
			Some(subject) => format!("{}|{}|{}", self.client_id, scopes.join(" "), subject),
			None => format!("{}|{}", self.client_id, scopes.join(" ")),
		}
	}
}

/// Pluggable persistence for tokens.
///
/// Implementations must uphold: after `put(k, t)`, `get(k)` returns `t`;
/// after `delete(k)`, `get(k)` returns `None`. Expired tokens without a
/// refresh token are discarded on load.
#[async_trait]
pub trait TokenStore: Send + Sync {
	async fn put(&self, identity: &str, token: &Token) -> Result<(), NetworkError>;
	async fn get(&self, identity: &str) -> Result<Option<Token>, NetworkError>;
	async fn delete(&self, identity: &str) -> Result<(), NetworkError>;
}

/// In-process token store.
#[derive(Default)]
pub struct MemoryTokenStore {
	tokens: RwLock<HashMap<String, Token>>,
}

impl MemoryTokenStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
	async fn put(&self, identity: &str, token: &Token) -> Result<(), NetworkError> {
		self.tokens
			.write()
			.await
			.insert(identity.to_string(), token.clone());
		Ok(())
	}

	async fn get(&self, identity: &str) -> Result<Option<Token>, NetworkError> {
		let tokens = self.tokens.read().await;
		match tokens.get(identity) {
			Some(t) if t.is_expired() && t.refresh_token.is_none() => {
				debug!("discarding expired token for {identity}");
				Ok(None)
			}
			other => Ok(other.cloned()),
		}
	}

	async fn delete(&self, identity: &str) -> Result<(), NetworkError> {
		self.tokens.write().await.remove(identity);
		Ok(())
	}
}

/// Token store persisting one JSON file per identity.
pub struct FileTokenStore {
	directory: PathBuf,
}

impl FileTokenStore {
	/// Store under an explicit directory.
	pub fn new(directory: impl Into<PathBuf>) -> Self {
		Self { directory: directory.into() }
	}

	/// Store under the platform data directory (`<data_dir>/bifrost/tokens`).
	pub fn default_location() -> Option<Self> {
		dirs::data_dir().map(|base| Self::new(base.join("bifrost").join("tokens")))
	}

	fn path_for(&self, identity: &str) -> PathBuf {
		// Identity keys contain separators; sanitize into a flat file name.
		let safe: String = identity
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
			.collect();
		self.directory.join(format!("{safe}.json"))
	}
}

#[async_trait]
impl TokenStore for FileTokenStore {
	async fn put(&self, identity: &str, token: &Token) -> Result<(), NetworkError> {
		let json = serde_json::to_vec_pretty(token)
			.map_err(|e| NetworkError::EncodingFailed(e.to_string()))?;
		tokio::fs::create_dir_all(&self.directory)
			.await
			.map_err(|e| NetworkError::EncodingFailed(e.to_string()))?;
		tokio::fs::write(self.path_for(identity), json)
			.await
			.map_err(|e| NetworkError::EncodingFailed(e.to_string()))?;
		Ok(())
	}

	async fn get(&self, identity: &str) -> Result<Option<Token>, NetworkError> {
		let path = self.path_for(identity);
		let raw = match tokio::fs::read(&path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(NetworkError::DecodingFailed(e.to_string())),
		};
		let token: Token = match serde_json::from_slice(&raw) {
			Ok(t) => t,
			Err(e) => {
				warn!("discarding unreadable token file {}: {e}", path.display());
				let _ = tokio::fs::remove_file(&path).await;
				return Ok(None);
			}
		};
		if token.is_expired() && token.refresh_token.is_none() {
			debug!("discarding expired token for {identity}");
			let _ = tokio::fs::remove_file(&path).await;
			return Ok(None);
		}
		Ok(Some(token))
	}

	async fn delete(&self, identity: &str) -> Result<(), NetworkError> {
		match tokio::fs::remove_file(self.path_for(identity)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(NetworkError::EncodingFailed(e.to_string())),
		}
	}
}
