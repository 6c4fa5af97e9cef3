pub mod jwt;
pub mod oauth2;
pub mod store;

pub use jwt::{JwtAlgorithm, JwtConfig, JwtKey};
pub use oauth2::{AuthorizationRequest, DeviceCodeResponse, GrantType, OAuth2Client, OAuth2Config};
pub use store::{AuthIdentity, FileTokenStore, MemoryTokenStore, Token, TokenStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::NetworkError;
use crate::pipeline::transport::Transport;
use crate::request::HeaderList;

/// An open-ended credential source for the `Custom` mode.
#[async_trait]
pub trait AuthProvider: Send + Sync {
	async fn auth_headers(&self) -> Result<HeaderList, NetworkError>;
}

/// How outgoing requests authenticate.
#[derive(Clone)]
pub enum AuthMode {
	None,
	Basic { username: String, password: String },
	Bearer { token: String },
	ApiKey { header: String, key: String },
	OAuth2(OAuth2Config),
	Jwt(JwtConfig),
	Custom(Arc<dyn AuthProvider>),
}

impl std::fmt::Debug for AuthMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			AuthMode::None => write!(f, "None"),
			AuthMode::Basic { username, .. } => write!(f, "Basic({username})"),
			AuthMode::Bearer { .. } => write!(f, "Bearer(..)"),
			AuthMode::ApiKey { header, .. } => write!(f, "ApiKey({header})"),
			AuthMode::OAuth2(c) => write!(f, "OAuth2({})", c.client_id),
			AuthMode::Jwt(c) => write!(f, "Jwt({})", c.issuer),
			AuthMode::Custom(_) => write!(f, "Custom(..)"),
		}
	}
}

/// Authentication lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
	Unauthenticated,
	Authenticated(Token),
	Refreshing,
	Failed(String),
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Token, NetworkError>>>;

/// Owns tokens for one identity: acquisition, storage, refresh, and header
/// injection.
///
/// All token mutation happens here; readers receive cloned snapshots. At
/// most one refresh is in flight at a time; concurrent callers share it.
pub struct AuthManager {
	mode: AuthMode,
	identity: AuthIdentity,
	store: Arc<dyn TokenStore>,
	state: RwLock<AuthState>,
	inflight_refresh: Mutex<Option<SharedRefresh>>,
	oauth: Option<OAuth2Client>,
	refresh_observers: std::sync::Mutex<Vec<Arc<dyn Fn(&Token) + Send + Sync>>>,
	refresh_skew: Duration,
}

impl AuthManager {
	/// Build a manager and load any persisted token for the identity.
	pub async fn new(
		mode: AuthMode,
		identity: AuthIdentity,
		store: Arc<dyn TokenStore>,
		transport: Arc<dyn Transport>,
	) -> Arc<Self> {
		let oauth = match &mode {
			AuthMode::OAuth2(config) => Some(OAuth2Client::new(config.clone(), transport)),
			_ => None,
		};

		let manager = Arc::new(Self {
			mode,
			identity,
			store,
			state: RwLock::new(AuthState::Unauthenticated),
			inflight_refresh: Mutex::new(None),
			oauth,
			refresh_observers: std::sync::Mutex::new(Vec::new()),
			refresh_skew: store::DEFAULT_REFRESH_SKEW,
		});

		// Stored tokens that survived the expiry filter resume the session.
		match manager.store.get(&manager.identity.key()).await {
			Ok(Some(token)) => {
				debug!("resumed persisted token for {}", manager.identity.client_id);
				*manager.state.write().await = AuthState::Authenticated(token);
			}
			Ok(None) => {}
			Err(e) => warn!("failed to load persisted token: {e}"),
		}

		manager
	}

	/// Register a callback invoked after every successful refresh.
	pub fn on_token_refresh(&self, callback: Arc<dyn Fn(&Token) + Send + Sync>) {
		self.refresh_observers
			.lock()
			.expect("observer lock")
			.push(callback);
	}

	pub async fn state(&self) -> AuthState {
		self.state.read().await.clone()
	}

	/// Headers to inject into an outgoing request. May suspend to refresh.
	pub async fn auth_headers(self: &Arc<Self>) -> Result<HeaderList, NetworkError> {
		let mut headers = HeaderList::new();
		match &self.mode {
			AuthMode::None => {}
			AuthMode::Basic { username, password } => {
				let encoded = BASE64.encode(format!("{username}:{password}"));
				headers.append("Authorization", format!("Basic {encoded}"));
			}
			AuthMode::Bearer { token } => {
				headers.append("Authorization", format!("Bearer {token}"));
			}
			AuthMode::ApiKey { header, key } => {
				headers.append(header.clone(), key.clone());
			}
			AuthMode::Jwt(config) => {
				let token = self.current_jwt(config).await?;
				headers.append("Authorization", token.authorization_value());
			}
			AuthMode::OAuth2(_) => {
				let token = self.current_token().await?;
				headers.append("Authorization", token.authorization_value());
			}
			AuthMode::Custom(provider) => {
				headers.merge(&provider.auth_headers().await?);
			}
		}
		Ok(headers)
	}

	/// Cached client-issued JWT, re-signed when inside the refresh window.
	async fn current_jwt(&self, config: &JwtConfig) -> Result<Token, NetworkError> {
		{
			let state = self.state.read().await;
			if let AuthState::Authenticated(token) = &*state {
				if !token.needs_refresh_at(chrono::Utc::now(), self.refresh_skew) {
					return Ok(token.clone());
				}
			}
		}

		let signed = config.issue()?;
		let token = Token {
			access_token: signed,
			refresh_token: None,
			token_type: "Bearer".to_string(),
			expires_at: Some(
				chrono::Utc::now() + chrono::Duration::seconds(config.ttl.as_secs() as i64),
			),
			scope: None,
		};
		*self.state.write().await = AuthState::Authenticated(token.clone());
		Ok(token)
	}

	/// The current OAuth2 token, refreshing first when it is stale.
	pub async fn current_token(self: &Arc<Self>) -> Result<Token, NetworkError> {
		let token = {
			let state = self.state.read().await;
			match &*state {
				AuthState::Authenticated(token) => Some(token.clone()),
				_ => None,
			}
		};
		let token = match token {
			Some(token) => token,
			None => self
				.store
				.get(&self.identity.key())
				.await?
				.ok_or(NetworkError::Unauthorized {
					reason: Some("not authenticated".to_string()),
				})?,
		};

		if !token.needs_refresh_at(chrono::Utc::now(), self.refresh_skew) {
			return Ok(token);
		}
		if token.refresh_token.is_none() {
			// Usable until actual expiry; past that there is nothing to do.
			if token.is_expired() {
				return Err(NetworkError::TokenExpired);
			}
			return Ok(token);
		}
		self.refresh_coalesced().await
	}

	/// One refresh attempt after a 401, when refresh is possible at all.
	pub async fn refresh_after_unauthorized(self: &Arc<Self>) -> Result<Token, NetworkError> {
		if self.refreshable_token().await.is_none() {
			return Err(NetworkError::MissingRefreshToken);
		}
		self.refresh_coalesced().await
	}

	/// The refresh token currently usable, from state or the store.
	async fn refreshable_token(&self) -> Option<String> {
		{
			let state = self.state.read().await;
			if let AuthState::Authenticated(token) = &*state {
				if token.refresh_token.is_some() {
					return token.refresh_token.clone();
				}
			}
		}
		match self.store.get(&self.identity.key()).await {
			Ok(Some(token)) => token.refresh_token,
			_ => None,
		}
	}

	/// Join or start the single in-flight refresh.
	///
	/// The refresh runs in its own task: a caller abandoning its wait
	/// cancels only the wait, never the refresh.
	async fn refresh_coalesced(self: &Arc<Self>) -> Result<Token, NetworkError> {
		let shared = {
			let mut guard = self.inflight_refresh.lock().await;
			match guard.as_ref() {
				Some(existing) => existing.clone(),
				None => {
					let (tx, rx) = oneshot::channel::<Result<Token, NetworkError>>();
					let manager = self.clone();
					tokio::spawn(async move {
						let result = manager.do_refresh().await;
						let _ = tx.send(result);
					});
					let shared: SharedRefresh = rx
						.map(|received| match received {
							Ok(result) => result,
							Err(_) => Err(NetworkError::ConnectionLost),
						})
						.boxed()
						.shared();
					*guard = Some(shared.clone());
					shared
				}
			}
		};

		let result = shared.clone().await;

		let mut guard = self.inflight_refresh.lock().await;
		if guard.as_ref().map(|f| f.ptr_eq(&shared)).unwrap_or(false) {
			*guard = None;
		}
		result
	}

	async fn do_refresh(self: Arc<Self>) -> Result<Token, NetworkError> {
		// Snapshot the refresh token before entering the Refreshing state.
		let refresh_token = self.refreshable_token().await;
		*self.state.write().await = AuthState::Refreshing;

		let Some(refresh_token) = refresh_token else {
			let err = NetworkError::MissingRefreshToken;
			*self.state.write().await = AuthState::Failed(err.to_string());
			return Err(err);
		};

		let Some(oauth) = &self.oauth else {
			let err = NetworkError::UnsupportedGrantType("refresh without OAuth2".to_string());
			*self.state.write().await = AuthState::Failed(err.to_string());
			return Err(err);
		};

		match oauth.refresh(&refresh_token).await {
			Ok(mut token) => {
				// Servers may omit the refresh token on rotation; keep ours.
				if token.refresh_token.is_none() {
					token.refresh_token = Some(refresh_token);
				}
				self.install_token(token.clone()).await?;
				info!("token refreshed for {}", self.identity.client_id);
				Ok(token)
			}
			Err(e) => {
				warn!("token refresh failed: {e}");
				*self.state.write().await = AuthState::Failed(e.to_string());
				Err(e)
			}
		}
	}

	/// Atomically replace the stored token and notify observers.
	async fn install_token(&self, token: Token) -> Result<(), NetworkError> {
		self.store.put(&self.identity.key(), &token).await?;
		*self.state.write().await = AuthState::Authenticated(token.clone());
		let observers = self.refresh_observers.lock().expect("observer lock").clone();
		for observer in observers {
			observer(&token);
		}
		Ok(())
	}

	/// Begin the authorization-code flow: present the returned URL through
	/// the platform's web authentication surface.
	pub fn begin_authorization(&self) -> Result<AuthorizationRequest, NetworkError> {
		let oauth = self.oauth.as_ref().ok_or_else(not_oauth)?;
		Ok(oauth.begin_authorization())
	}

	/// Complete the authorization-code flow from the callback URL.
	pub async fn complete_authorization(
		&self,
		callback: &Url,
		pending: &AuthorizationRequest,
	) -> Result<Token, NetworkError> {
		let oauth = self.oauth.as_ref().ok_or_else(not_oauth)?;
		let code = OAuth2Client::parse_callback(callback, &pending.state)?;
		let token = oauth
			.exchange_code(&code, pending.pkce_verifier.as_deref())
			.await?;
		self.install_token(token.clone()).await?;
		Ok(token)
	}

	/// The client-credentials grant.
	pub async fn login_client_credentials(&self) -> Result<Token, NetworkError> {
		let oauth = self.oauth.as_ref().ok_or_else(not_oauth)?;
		let token = oauth.client_credentials().await?;
		self.install_token(token.clone()).await?;
		Ok(token)
	}

	/// Begin the device-code flow.
	pub async fn request_device_authorization(
		&self,
	) -> Result<DeviceCodeResponse, NetworkError> {
		let oauth = self.oauth.as_ref().ok_or_else(not_oauth)?;
		oauth.request_device_code().await
	}

	/// Poll until the device flow resolves, then store the token.
	pub async fn complete_device_authorization(
		&self,
		device: &DeviceCodeResponse,
		cancel: &CancellationToken,
	) -> Result<Token, NetworkError> {
		let oauth = self.oauth.as_ref().ok_or_else(not_oauth)?;
		let token = oauth.poll_device_token(device, cancel).await?;
		self.install_token(token.clone()).await?;
		Ok(token)
	}

	/// Drop the stored token and return to `Unauthenticated`.
	pub async fn logout(&self) -> Result<(), NetworkError> {
		self.store.delete(&self.identity.key()).await?;
		*self.state.write().await = AuthState::Unauthenticated;
		info!("logged out {}", self.identity.client_id);
		Ok(())
	}
}

fn not_oauth() -> NetworkError {
	NetworkError::UnsupportedGrantType("authentication mode is not OAuth2".to_string())
}
