use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use log::{debug, trace, warn};
use rustls::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

use crate::config::SecurityConfiguration;
use crate::error::NetworkError;
use crate::http2;
use crate::http2::connection::{Http2Handle, RequestHead};
use crate::http2::hpack::Pseudo;
use crate::request::{HeaderList, PreparedRequest, Response, WireTimings};
use crate::security;

/// The wire seam of the pipeline.
///
/// A transport submits one prepared request and returns the complete
/// response regardless of status code; status validation happens upstream.
/// Timeout and cancellation are composed around `send` by the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, request: &PreparedRequest) -> Result<Response, NetworkError>;
}

/// Production transport: TLS with ALPN negotiation, HTTP/2 via the in-crate
/// framer for `h2` peers, hyper's HTTP/1.1 client connection otherwise.
pub struct NetworkTransport {
	tls: Arc<rustls::ClientConfig>,
	/// Live HTTP/2 connections keyed by `scheme://host:port`.
	h2_pool: Mutex<HashMap<String, Http2Handle>>,
	h2_settings: http2::ConnectionSettings,
}

impl NetworkTransport {
	pub fn new(security: &SecurityConfiguration) -> anyhow::Result<Self> {
		let tls = security::build_client_config(
			security,
			vec![b"h2".to_vec(), b"http/1.1".to_vec()],
		)?;
		Ok(Self {
			tls,
			h2_pool: Mutex::new(HashMap::new()),
			h2_settings: http2::ConnectionSettings::default(),
		})
	}

	fn host_and_port(request: &PreparedRequest) -> Result<(String, u16), NetworkError> {
		let host = request
			.url
			.host_str()
			.ok_or_else(|| NetworkError::InvalidUrl(request.url.to_string()))?
			.to_string();
		let port = request
			.url
			.port_or_known_default()
			.ok_or_else(|| NetworkError::InvalidUrl(request.url.to_string()))?;
		Ok((host, port))
	}

	async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, NetworkError> {
		let stream = TcpStream::connect((host, port)).await.map_err(|e| {
			debug!("tcp connect to {host}:{port} failed: {e}");
			NetworkError::CannotConnectToHost(format!("{host}:{port}"))
		})?;
		let _ = stream.set_nodelay(true);
		Ok(stream)
	}

	async fn connect_tls(
		&self,
		host: &str,
		port: u16,
	) -> Result<tokio_rustls::client::TlsStream<TcpStream>, NetworkError> {
		let tcp = Self::connect_tcp(host, port).await?;
		let server_name = if let Ok(ip) = host.parse::<IpAddr>() {
			ServerName::IpAddress(ip)
		} else {
			ServerName::try_from(host)
				.map_err(|_| NetworkError::InvalidUrl(host.to_string()))?
		};

		let connector = TlsConnector::from(self.tls.clone());
		connector.connect(server_name, tcp).await.map_err(|e| {
			let message = e.to_string();
			if security::is_pin_failure(&message) {
				warn!("aborting connection to {host}: pin validation failed");
				NetworkError::TlsPinFailure
			} else {
				NetworkError::SslCertificateError(message)
			}
		})
	}

	fn authority(url: &url::Url, host: &str, port: u16) -> String {
		match (url.scheme(), port) {
			("http", 80) | ("https", 443) => host.to_string(),
			_ => format!("{host}:{port}"),
		}
	}

	/// Send over an established HTTP/1.1 connection using hyper.
	async fn send_http1<IO>(
		io: IO,
		request: &PreparedRequest,
		authority: &str,
	) -> Result<Response, NetworkError>
	where
		IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
	{
		let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
			.await
			.map_err(|e| NetworkError::CannotConnectToHost(e.to_string()))?;
		tokio::spawn(async move {
			if let Err(e) = conn.await {
				debug!("http/1.1 connection task ended: {e}");
			}
		});

		let path_and_query = match request.url.query() {
			Some(q) => format!("{}?{}", request.url.path(), q),
			None => request.url.path().to_string(),
		};

		let mut builder = hyper::Request::builder()
			.method(request.method.as_str())
			.uri(path_and_query)
			.header("host", authority);
		for (name, value) in request.headers.iter() {
			builder = builder.header(name, value);
		}

		let body = request.body.clone().unwrap_or_default();
		let hyper_request = builder
			.body(Full::new(body))
			.map_err(|_| NetworkError::InvalidRequest)?;

		let mut timings = WireTimings::started_now();
		let response = sender
			.send_request(hyper_request)
			.await
			.map_err(|e| {
				if e.is_timeout() {
					NetworkError::GatewayTimeout
				} else {
					NetworkError::ConnectionLost
				}
			})?;
		timings.first_byte = Some(Instant::now());

		let status = response.status().as_u16();
		let mut headers = HeaderList::new();
		for (name, value) in response.headers() {
			headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
		}

		let body = response
			.into_body()
			.collect()
			.await
			.map_err(|_| NetworkError::ConnectionLost)?
			.to_bytes();
		timings.last_byte = Some(Instant::now());

		Ok(Response { status, headers, body, timings })
	}

	/// Send over a pooled HTTP/2 connection, establishing one on demand.
	async fn send_http2(
		&self,
		request: &PreparedRequest,
		host: &str,
		port: u16,
		initial: Option<tokio_rustls::client::TlsStream<TcpStream>>,
	) -> Result<Response, NetworkError> {
		let key = format!("https://{host}:{port}");

		let handle = {
			let mut pool = self.h2_pool.lock().await;
			match pool.get(&key) {
				Some(handle) if !handle.is_closed() => handle.clone(),
				_ => {
					let io = match initial {
						Some(io) => io,
						None => self.connect_tls(host, port).await?,
					};
					let handle = http2::handshake(io, self.h2_settings.clone()).await?;
					pool.insert(key.clone(), handle.clone());
					handle
				}
			}
		};

		let path = match request.url.query() {
			Some(q) => format!("{}?{}", request.url.path(), q),
			None => request.url.path().to_string(),
		};
		let authority = Self::authority(&request.url, host, port);

		// Connection-specific headers do not exist in HTTP/2.
		let mut headers = HeaderList::new();
		for (name, value) in request.headers.iter() {
			if matches!(
				name.to_ascii_lowercase().as_str(),
				"host" | "connection" | "keep-alive" | "transfer-encoding" | "upgrade"
			) {
				continue;
			}
			headers.append(name, value);
		}

		let head = RequestHead {
			pseudo: Pseudo {
				method: request.method.as_str().to_string(),
				scheme: "https".to_string(),
				authority,
				path,
			},
			headers,
		};

		let mut timings = WireTimings::started_now();
		let h2_response = handle.request(head, request.body.clone()).await?;
		let now = Instant::now();
		timings.first_byte = Some(now);
		timings.last_byte = Some(now);

		Ok(Response {
			status: h2_response.status,
			headers: h2_response.headers,
			body: h2_response.body,
			timings,
		})
	}
}

#[async_trait]
impl Transport for NetworkTransport {
	async fn send(&self, request: &PreparedRequest) -> Result<Response, NetworkError> {
		let (host, port) = Self::host_and_port(request)?;
		trace!(
			"[{}] {} {} via {}",
			request.correlation_id,
			request.method,
			request.url,
			request.url.scheme()
		);

		match request.url.scheme() {
			"http" => {
				let tcp = Self::connect_tcp(&host, port).await?;
				let authority = Self::authority(&request.url, &host, port);
				Self::send_http1(tcp, request, &authority).await
			}
			"https" => {
				// Reuse a pooled HTTP/2 connection when one exists.
				{
					let pool = self.h2_pool.lock().await;
					let key = format!("https://{host}:{port}");
					if pool.get(&key).map(|h| !h.is_closed()).unwrap_or(false) {
						drop(pool);
						return self.send_http2(request, &host, port, None).await;
					}
				}

				let tls = self.connect_tls(&host, port).await?;
				let negotiated_h2 = {
					let (_, session) = tls.get_ref();
					session.alpn_protocol() == Some(b"h2".as_slice())
				};
				if negotiated_h2 {
					debug!("ALPN selected h2 for {host}:{port}");
					self.send_http2(request, &host, port, Some(tls)).await
				} else {
					let authority = Self::authority(&request.url, &host, port);
					Self::send_http1(tls, request, &authority).await
				}
			}
			other => Err(NetworkError::InvalidUrl(format!(
				"unsupported scheme {other}"
			))),
		}
	}
}

/// Encode form pairs as `application/x-www-form-urlencoded`.
pub fn encode_form(pairs: &[(String, String)]) -> String {
	url::form_urlencoded::Serializer::new(String::new())
		.extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
		.finish()
}

/// Map a transport-level status code into the pipeline error taxonomy.
/// Success statuses return `None`.
pub fn error_for_status(response: &Response) -> Option<NetworkError> {
	let retry_after = response
		.headers
		.get("retry-after")
		.and_then(|v| v.parse::<u64>().ok())
		.map(std::time::Duration::from_secs);

	match response.status {
		200..=299 => None,
		401 => Some(NetworkError::Unauthorized { reason: None }),
		403 => Some(NetworkError::Forbidden),
		429 => Some(NetworkError::TooManyRequests { retry_after }),
		503 => Some(NetworkError::ServiceUnavailable { retry_after }),
		504 => Some(NetworkError::GatewayTimeout),
		code @ 500..=599 => Some(NetworkError::ServerError {
			code,
			message: std::str::from_utf8(&response.body)
				.ok()
				.filter(|s| !s.is_empty())
				.map(|s| s.chars().take(200).collect()),
		}),
		code => Some(NetworkError::InvalidStatusCode {
			code,
			body: if response.body.is_empty() {
				None
			} else {
				Some(response.body.clone())
			},
		}),
	}
}
