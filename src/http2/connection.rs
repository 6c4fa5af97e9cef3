use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::error::NetworkError;
use crate::http2::flow::FlowWindow;
use crate::http2::frame::{self, ConnectionSettings, ErrorCode, Frame, FrameError, PREFACE};
use crate::http2::hpack::{self, Pseudo};
use crate::http2::stream::{StreamIdAllocator, StreamState, is_server_initiated};
use crate::request::HeaderList;

/// Retired stream ids kept for closed-stream policing before old entries
/// are dropped to bound memory on long-lived connections.
const CLOSED_SET_LIMIT: usize = 4096;

/// A response received over one HTTP/2 stream.
#[derive(Debug, Clone)]
pub struct Http2Response {
	pub status: u16,
	pub headers: HeaderList,
	pub body: Bytes,
}

/// One request submitted to the connection.
#[derive(Debug, Clone)]
pub struct RequestHead {
	pub pseudo: Pseudo,
	pub headers: HeaderList,
}

type Reply = oneshot::Sender<Result<Http2Response, NetworkError>>;

enum Command {
	Request {
		head: RequestHead,
		body: Option<Bytes>,
		reply: Reply,
	},
	Ping {
		reply: oneshot::Sender<Result<(), NetworkError>>,
	},
	Shutdown,
}

enum Event {
	Frame(Frame),
	ParseError(FrameError),
	Io(String),
	Eof,
}

/// Why a stream id is in the closed set. Frames arriving on a stream we
/// reset are discarded; frames on a cleanly completed stream are a protocol
/// violation (WINDOW_UPDATE and PRIORITY excepted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClosedKind {
	ResetSent,
	Completed,
}

struct StreamEntry {
	state: StreamState,
	send_window: FlowWindow,
	/// Body bytes not yet released by flow control.
	pending_body: BytesMut,
	reply: Option<Reply>,
	/// Accumulated header block until END_HEADERS.
	header_block: BytesMut,
	pending_end_stream: bool,
	response: Option<(u16, HeaderList)>,
	body: BytesMut,
}

/// Handle to a live HTTP/2 connection actor.
///
/// Cloneable; all clones feed the same connection task. Dropping a pending
/// request future cancels its stream with RST_STREAM(CANCEL).
#[derive(Clone)]
pub struct Http2Handle {
	cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Http2Handle {
	/// Submit a request and await the complete response.
	pub async fn request(
		&self,
		head: RequestHead,
		body: Option<Bytes>,
	) -> Result<Http2Response, NetworkError> {
		let (reply, rx) = oneshot::channel();
		self.cmd_tx
			.send(Command::Request { head, body, reply })
			.map_err(|_| NetworkError::ConnectionLost)?;
		rx.await.map_err(|_| NetworkError::ConnectionLost)?
	}

	/// Liveness check: send PING and await the ACK.
	pub async fn ping(&self) -> Result<(), NetworkError> {
		let (reply, rx) = oneshot::channel();
		self.cmd_tx
			.send(Command::Ping { reply })
			.map_err(|_| NetworkError::ConnectionLost)?;
		rx.await.map_err(|_| NetworkError::ConnectionLost)?
	}

	/// Graceful shutdown: GOAWAY(NO_ERROR), then the connection task exits.
	pub fn shutdown(&self) {
		let _ = self.cmd_tx.send(Command::Shutdown);
	}

	pub fn is_closed(&self) -> bool {
		self.cmd_tx.is_closed()
	}
}

/// Perform the client connection preface and spawn the connection actor.
///
/// The returned handle accepts requests immediately; frames are released to
/// the wire under the peer's settings as they arrive. The first peer frame
/// must be SETTINGS or the connection terminates with GOAWAY(PROTOCOL_ERROR).
pub async fn handshake<IO>(
	io: IO,
	local_settings: ConnectionSettings,
) -> Result<Http2Handle, NetworkError>
where
	IO: AsyncRead + AsyncWrite + Send + 'static,
{
	let (mut read_half, mut write_half) = tokio::io::split(io);

	// 24-byte preface, then our SETTINGS.
	write_half
		.write_all(PREFACE)
		.await
		.map_err(|_| NetworkError::ConnectionLost)?;
	let mut buf = BytesMut::new();
	frame::encode(
		&Frame::Settings {
			ack: false,
			entries: local_settings.to_entries(),
		},
		&mut buf,
	);
	write_half
		.write_all(&buf)
		.await
		.map_err(|_| NetworkError::ConnectionLost)?;
	write_half
		.flush()
		.await
		.map_err(|_| NetworkError::ConnectionLost)?;

	let (event_tx, event_rx) = mpsc::unbounded_channel();
	let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

	// Ingress pump: raw bytes to parsed frames, one logical reader.
	let max_frame_size = local_settings.max_frame_size;
	tokio::spawn(async move {
		let mut buf = BytesMut::with_capacity(16 * 1024);
		loop {
			loop {
				match frame::parse(&mut buf, max_frame_size) {
					Ok(Some(frame)) => {
						if event_tx.send(Event::Frame(frame)).is_err() {
							return;
						}
					}
					Ok(None) => break,
					Err(e) => {
						let _ = event_tx.send(Event::ParseError(e));
						return;
					}
				}
			}
			match read_half.read_buf(&mut buf).await {
				Ok(0) => {
					let _ = event_tx.send(Event::Eof);
					return;
				}
				Ok(_) => {}
				Err(e) => {
					let _ = event_tx.send(Event::Io(e.to_string()));
					return;
				}
			}
		}
	});

	let task = ConnectionTask {
		write: write_half,
		local_settings,
		remote_settings: ConnectionSettings::default(),
		first_peer_frame_seen: false,
		streams: HashMap::new(),
		closed: HashMap::new(),
		pending: VecDeque::new(),
		allocator: StreamIdAllocator::new(),
		conn_send_window: FlowWindow::new(frame::DEFAULT_INITIAL_WINDOW),
		expect_continuation: None,
		goaway: None,
		pending_pings: VecDeque::new(),
	};
	tokio::spawn(task.run(cmd_rx, event_rx));

	Ok(Http2Handle { cmd_tx })
}

/// Outcome of absorbing a DATA frame into stream state.
enum DataOutcome {
	UnknownStream,
	Violation,
	Completed { len: u32 },
	Replenish { len: u32 },
}

struct ConnectionTask<W> {
	write: WriteHalf<W>,
	local_settings: ConnectionSettings,
	remote_settings: ConnectionSettings,
	first_peer_frame_seen: bool,
	streams: HashMap<u32, StreamEntry>,
	closed: HashMap<u32, ClosedKind>,
	pending: VecDeque<(RequestHead, Option<Bytes>, Reply)>,
	allocator: StreamIdAllocator,
	conn_send_window: FlowWindow,
	expect_continuation: Option<u32>,
	goaway: Option<(u32, ErrorCode)>,
	pending_pings: VecDeque<([u8; 8], oneshot::Sender<Result<(), NetworkError>>)>,
}

impl<W: AsyncRead + AsyncWrite + Send + 'static> ConnectionTask<W> {
	async fn run(
		mut self,
		mut cmd_rx: mpsc::UnboundedReceiver<Command>,
		mut event_rx: mpsc::UnboundedReceiver<Event>,
	) {
		loop {
			tokio::select! {
				cmd = cmd_rx.recv() => match cmd {
					Some(Command::Request { head, body, reply }) => {
						if let Some((last, code)) = self.goaway {
							let _ = reply.send(Err(NetworkError::Goaway {
								last_stream_id: last,
								code: code.as_u32(),
							}));
							continue;
						}
						self.pending.push_back((head, body, reply));
						if self.pump_pending().await.is_err() {
							break;
						}
					}
					Some(Command::Ping { reply }) => {
						let payload = rand::random::<[u8; 8]>();
						self.pending_pings.push_back((payload, reply));
						if self.write_frame(&Frame::Ping { ack: false, payload }).await.is_err() {
							break;
						}
					}
					Some(Command::Shutdown) | None => {
						let last = self.highest_received_server_stream();
						let _ = self
							.write_frame(&Frame::GoAway {
								last_stream_id: last,
								error_code: ErrorCode::NoError,
								debug_data: Bytes::new(),
							})
							.await;
						break;
					}
				},
				event = event_rx.recv() => match event {
					Some(Event::Frame(f)) => {
						if self.handle_frame(f).await.is_err() {
							break;
						}
					}
					Some(Event::ParseError(e)) => {
						warn!("frame parse error: {e}");
						let net_err = match e.error_code() {
							ErrorCode::FrameSize => NetworkError::FrameSizeError,
							ErrorCode::FlowControl => NetworkError::FlowControlError,
							_ => NetworkError::ProtocolError,
						};
						self.terminate(e.error_code(), net_err).await;
						break;
					}
					Some(Event::Io(msg)) => {
						debug!("connection read failed: {msg}");
						break;
					}
					Some(Event::Eof) | None => {
						break;
					}
				},
			}
		}
		self.fail_all(NetworkError::ConnectionLost);
	}

	/// Largest server-initiated stream id seen, for GOAWAY.
	fn highest_received_server_stream(&self) -> u32 {
		self.closed
			.keys()
			.chain(self.streams.keys())
			.copied()
			.filter(|id| is_server_initiated(*id))
			.max()
			.unwrap_or(0)
	}

	/// Send GOAWAY with `code` and fail everything in flight with `err`.
	async fn terminate(&mut self, code: ErrorCode, err: NetworkError) {
		let _ = self
			.write_frame(&Frame::GoAway {
				last_stream_id: self.highest_received_server_stream(),
				error_code: code,
				debug_data: Bytes::new(),
			})
			.await;
		self.fail_all(err);
	}

	fn fail_all(&mut self, err: NetworkError) {
		for (_, entry) in self.streams.drain() {
			if let Some(reply) = entry.reply {
				let _ = reply.send(Err(err.clone()));
			}
		}
		for (_, _, reply) in self.pending.drain(..) {
			let _ = reply.send(Err(err.clone()));
		}
		for (_, reply) in self.pending_pings.drain(..) {
			let _ = reply.send(Err(err.clone()));
		}
	}

	async fn write_frame(&mut self, frame: &Frame) -> Result<(), ()> {
		let mut buf = BytesMut::new();
		frame::encode(frame, &mut buf);
		trace!("send frame: {frame:?}");
		if let Err(e) = self.write.write_all(&buf).await {
			debug!("connection write failed: {e}");
			return Err(());
		}
		if let Err(e) = self.write.flush().await {
			debug!("connection flush failed: {e}");
			return Err(());
		}
		Ok(())
	}

	fn mark_closed(&mut self, id: u32, kind: ClosedKind) {
		if self.closed.len() >= CLOSED_SET_LIMIT {
			self.closed.clear();
		}
		self.closed.insert(id, kind);
	}

	/// Open streams for queued requests while concurrency headroom remains.
	async fn pump_pending(&mut self) -> Result<(), ()> {
		while (self.streams.len() as u32) < self.remote_settings.max_concurrent_streams {
			let Some((head, body, reply)) = self.pending.pop_front() else {
				break;
			};
			let Some(id) = self.allocator.allocate() else {
				let _ = reply.send(Err(NetworkError::ProtocolError));
				continue;
			};

			let block = hpack::encode_request(&head.pseudo, &head.headers);
			let end_stream = body.as_ref().map(|b| b.is_empty()).unwrap_or(true);

			let mut state = StreamState::Idle;
			if state.send_headers(end_stream).is_err() {
				let _ = reply.send(Err(NetworkError::ProtocolError));
				continue;
			}

			let entry = StreamEntry {
				state,
				send_window: FlowWindow::new(self.remote_settings.initial_window_size),
				pending_body: body
					.as_ref()
					.map(|b| BytesMut::from(&b[..]))
					.unwrap_or_default(),
				reply: Some(reply),
				header_block: BytesMut::new(),
				pending_end_stream: false,
				response: None,
				body: BytesMut::new(),
			};
			self.streams.insert(id, entry);

			// Large header blocks continue across CONTINUATION frames.
			let max = self.remote_settings.max_frame_size as usize;
			if block.len() <= max {
				self.write_frame(&Frame::Headers {
					stream_id: id,
					block,
					end_stream,
					end_headers: true,
					priority: None,
				})
				.await?;
			} else {
				let first = block.slice(..max);
				self.write_frame(&Frame::Headers {
					stream_id: id,
					block: first,
					end_stream,
					end_headers: false,
					priority: None,
				})
				.await?;
				let mut offset = max;
				while offset < block.len() {
					let end = (offset + max).min(block.len());
					self.write_frame(&Frame::Continuation {
						stream_id: id,
						block: block.slice(offset..end),
						end_headers: end == block.len(),
					})
					.await?;
					offset = end;
				}
			}

			if !end_stream {
				self.try_send_data(id).await?;
			}
		}
		Ok(())
	}

	/// Release as much of the stream's pending body as both windows allow.
	async fn try_send_data(&mut self, id: u32) -> Result<(), ()> {
		enum Step {
			Done,
			Cancel,
			Send { chunk: Bytes, end_stream: bool },
		}

		loop {
			let conn_available = self.conn_send_window.available();
			let max_frame = self.remote_settings.max_frame_size as usize;

			let step = match self.streams.get_mut(&id) {
				None => Step::Done,
				Some(entry) => {
					if entry.pending_body.is_empty() || !entry.state.can_send_data() {
						Step::Done
					} else if entry.reply.as_ref().map(|r| r.is_closed()).unwrap_or(true) {
						// The caller dropped the response future.
						Step::Cancel
					} else {
						let n = entry
							.pending_body
							.len()
							.min(conn_available)
							.min(entry.send_window.available())
							.min(max_frame);
						if n == 0 {
							// Suspended until WINDOW_UPDATE.
							Step::Done
						} else {
							let chunk = entry.pending_body.split_to(n).freeze();
							let end_stream = entry.pending_body.is_empty();
							entry.send_window.consume(n);
							if end_stream {
								let _ = entry.state.send_end_stream();
							}
							Step::Send { chunk, end_stream }
						}
					}
				}
			};

			match step {
				Step::Done => return Ok(()),
				Step::Cancel => {
					return self.cancel_stream(id).await;
				}
				Step::Send { chunk, end_stream } => {
					self.conn_send_window.consume(chunk.len());
					self.write_frame(&Frame::Data {
						stream_id: id,
						data: chunk,
						end_stream,
					})
					.await?;
					if end_stream {
						return Ok(());
					}
				}
			}
		}
	}

	/// Reset a stream we no longer want and release its slot.
	async fn cancel_stream(&mut self, id: u32) -> Result<(), ()> {
		self.reset_stream(id, ErrorCode::Cancel, NetworkError::Cancelled)
			.await
	}

	async fn reset_stream(
		&mut self,
		id: u32,
		code: ErrorCode,
		err: NetworkError,
	) -> Result<(), ()> {
		if let Some(entry) = self.streams.remove(&id) {
			if let Some(reply) = entry.reply {
				let _ = reply.send(Err(err));
			}
		}
		self.mark_closed(id, ClosedKind::ResetSent);
		self.write_frame(&Frame::RstStream { stream_id: id, error_code: code })
			.await?;
		Box::pin(self.pump_pending()).await
	}

	async fn handle_frame(&mut self, frame: Frame) -> Result<(), ()> {
		// The connection preface from the peer must start with SETTINGS.
		if !self.first_peer_frame_seen {
			self.first_peer_frame_seen = true;
			if !matches!(frame, Frame::Settings { ack: false, .. }) {
				warn!("peer's first frame was not SETTINGS");
				self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
					.await;
				return Err(());
			}
		}

		// A started header block must finish before anything else.
		if let Some(expected) = self.expect_continuation {
			let is_continuation = matches!(
				&frame,
				Frame::Continuation { stream_id, .. } if *stream_id == expected
			);
			if !is_continuation {
				self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
					.await;
				return Err(());
			}
		}

		trace!("recv frame: {frame:?}");
		match frame {
			Frame::Settings { ack, entries } => self.on_settings(ack, entries).await,
			Frame::Ping { ack, payload } => self.on_ping(ack, payload).await,
			Frame::WindowUpdate { stream_id, increment } => {
				self.on_window_update(stream_id, increment).await
			}
			Frame::Priority { .. } => {
				// Priority hints carry no protocol obligations for a client.
				Ok(())
			}
			Frame::Headers {
				stream_id,
				block,
				end_stream,
				end_headers,
				priority: _,
			} => self.on_headers(stream_id, block, end_stream, end_headers).await,
			Frame::Continuation { stream_id, block, end_headers } => {
				self.on_continuation(stream_id, block, end_headers).await
			}
			Frame::Data { stream_id, data, end_stream } => {
				self.on_data(stream_id, data, end_stream).await
			}
			Frame::PushPromise { promised_id, .. } => {
				// Promised streams are refused. The connection stays open;
				// only the promised stream is cancelled.
				if self.local_settings.enable_push {
					debug!("no push consumer; refusing promised stream {promised_id}");
				} else {
					debug!("push disabled; refusing promised stream {promised_id}");
				}
				self.mark_closed(promised_id, ClosedKind::ResetSent);
				self.write_frame(&Frame::RstStream {
					stream_id: promised_id,
					error_code: ErrorCode::Cancel,
				})
				.await
			}
			Frame::RstStream { stream_id, error_code } => {
				if let Some(entry) = self.streams.remove(&stream_id) {
					debug!("peer reset stream {stream_id} with {error_code:?}");
					if let Some(reply) = entry.reply {
						let _ = reply.send(Err(NetworkError::StreamClosed));
					}
				}
				self.mark_closed(stream_id, ClosedKind::ResetSent);
				self.pump_pending().await
			}
			Frame::GoAway { last_stream_id, error_code, .. } => {
				self.on_goaway(last_stream_id, error_code)
			}
			Frame::Unknown { kind, .. } => {
				trace!("ignoring unknown frame type {kind:#04x}");
				Ok(())
			}
		}
	}

	async fn on_settings(&mut self, ack: bool, entries: Vec<(u16, u32)>) -> Result<(), ()> {
		if ack {
			debug!("peer acknowledged our settings");
			return Ok(());
		}
		let old_initial = self.remote_settings.initial_window_size;
		if let Err(e) = self.remote_settings.apply(&entries) {
			let code = e.error_code();
			let err = match code {
				ErrorCode::FlowControl => NetworkError::FlowControlError,
				_ => NetworkError::ProtocolError,
			};
			self.terminate(code, err).await;
			return Err(());
		}
		let new_initial = self.remote_settings.initial_window_size;
		if old_initial != new_initial {
			for entry in self.streams.values_mut() {
				entry.send_window.adjust(old_initial, new_initial);
			}
		}
		self.write_frame(&Frame::Settings { ack: true, entries: Vec::new() })
			.await?;
		// New settings may raise the concurrency limit or reopen windows.
		self.pump_pending().await?;
		let ids: Vec<u32> = self.streams.keys().copied().collect();
		for id in ids {
			self.try_send_data(id).await?;
		}
		Ok(())
	}

	async fn on_ping(&mut self, ack: bool, payload: [u8; 8]) -> Result<(), ()> {
		if ack {
			if let Some(pos) = self.pending_pings.iter().position(|(p, _)| *p == payload) {
				if let Some((_, reply)) = self.pending_pings.remove(pos) {
					let _ = reply.send(Ok(()));
				}
			}
			return Ok(());
		}
		self.write_frame(&Frame::Ping { ack: true, payload }).await
	}

	async fn on_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), ()> {
		if stream_id == 0 {
			if self.conn_send_window.grant(increment).is_err() {
				self.terminate(ErrorCode::FlowControl, NetworkError::FlowControlError)
					.await;
				return Err(());
			}
			let ids: Vec<u32> = self.streams.keys().copied().collect();
			for id in ids {
				self.try_send_data(id).await?;
			}
			return Ok(());
		}

		let grant_failed = match self.streams.get_mut(&stream_id) {
			Some(entry) => entry.send_window.grant(increment).is_err(),
			// WINDOW_UPDATE on a closed stream is tolerated.
			None => return Ok(()),
		};
		if grant_failed {
			return self
				.reset_stream(stream_id, ErrorCode::FlowControl, NetworkError::FlowControlError)
				.await;
		}
		self.try_send_data(stream_id).await
	}

	async fn on_headers(
		&mut self,
		stream_id: u32,
		block: Bytes,
		end_stream: bool,
		end_headers: bool,
	) -> Result<(), ()> {
		if self.stream_gone(stream_id) {
			return self.closed_stream_violation(stream_id).await;
		}
		let known = match self.streams.get_mut(&stream_id) {
			Some(entry) => {
				entry.header_block.extend_from_slice(&block);
				entry.pending_end_stream = end_stream;
				true
			}
			None => false,
		};
		if !known {
			// HEADERS on a stream we never opened.
			self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
				.await;
			return Err(());
		}
		if end_headers {
			self.finish_headers(stream_id).await
		} else {
			self.expect_continuation = Some(stream_id);
			Ok(())
		}
	}

	async fn on_continuation(
		&mut self,
		stream_id: u32,
		block: Bytes,
		end_headers: bool,
	) -> Result<(), ()> {
		if self.expect_continuation != Some(stream_id) {
			self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
				.await;
			return Err(());
		}
		let known = match self.streams.get_mut(&stream_id) {
			Some(entry) => {
				entry.header_block.extend_from_slice(&block);
				true
			}
			None => false,
		};
		if !known {
			self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
				.await;
			return Err(());
		}
		if end_headers {
			self.expect_continuation = None;
			self.finish_headers(stream_id).await
		} else {
			Ok(())
		}
	}

	async fn on_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<(), ()> {
		if self.stream_gone(stream_id) {
			return self.closed_stream_violation(stream_id).await;
		}
		let outcome = match self.streams.get_mut(&stream_id) {
			None => DataOutcome::UnknownStream,
			Some(entry) => {
				if !entry.state.can_receive() {
					DataOutcome::Violation
				} else {
					entry.body.extend_from_slice(&data);
					let len = data.len() as u32;
					if end_stream {
						if entry.state.recv_end_stream().is_err() {
							DataOutcome::Violation
						} else {
							DataOutcome::Completed { len }
						}
					} else {
						DataOutcome::Replenish { len }
					}
				}
			}
		};

		match outcome {
			DataOutcome::UnknownStream => {
				self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
					.await;
				Err(())
			}
			DataOutcome::Violation => self.closed_stream_violation(stream_id).await,
			DataOutcome::Completed { len } => {
				// The stream is done but the connection window lives on.
				if len > 0 {
					self.write_frame(&Frame::WindowUpdate { stream_id: 0, increment: len })
						.await?;
				}
				self.complete_stream(stream_id).await
			}
			DataOutcome::Replenish { len } => {
				if len > 0 {
					// Replenish both windows so the peer keeps sending.
					self.write_frame(&Frame::WindowUpdate { stream_id: 0, increment: len })
						.await?;
					self.write_frame(&Frame::WindowUpdate { stream_id, increment: len })
						.await?;
				}
				Ok(())
			}
		}
	}

	fn on_goaway(&mut self, last_stream_id: u32, error_code: ErrorCode) -> Result<(), ()> {
		debug!("peer sent GOAWAY, last stream {last_stream_id}, code {error_code:?}");
		self.goaway = Some((last_stream_id, error_code));
		let err = NetworkError::Goaway {
			last_stream_id,
			code: error_code.as_u32(),
		};
		// Streams above the watermark will never complete; streams at or
		// below it are allowed to finish.
		let doomed: Vec<u32> = self
			.streams
			.keys()
			.copied()
			.filter(|id| *id > last_stream_id)
			.collect();
		for id in doomed {
			if let Some(entry) = self.streams.remove(&id) {
				if let Some(reply) = entry.reply {
					let _ = reply.send(Err(err.clone()));
				}
			}
		}
		for (_, _, reply) in self.pending.drain(..) {
			let _ = reply.send(Err(err.clone()));
		}
		Ok(())
	}

	/// True when the stream id is in the retired set.
	fn stream_gone(&self, id: u32) -> bool {
		self.closed.contains_key(&id)
	}

	async fn closed_stream_violation(&mut self, id: u32) -> Result<(), ()> {
		match self.closed.get(&id) {
			// We reset it; the peer may not have seen the reset yet.
			Some(ClosedKind::ResetSent) => Ok(()),
			// Completed cleanly: the peer must not send more.
			Some(ClosedKind::Completed) | None => {
				self.terminate(ErrorCode::Protocol, NetworkError::ProtocolError)
					.await;
				Err(())
			}
		}
	}

	async fn finish_headers(&mut self, id: u32) -> Result<(), ()> {
		self.expect_continuation = None;

		let decoded = match self.streams.get_mut(&id) {
			None => return Ok(()),
			Some(entry) => {
				let block = entry.header_block.split().freeze();
				let end_stream = entry.pending_end_stream;
				(hpack::decode_response(&block), end_stream)
			}
		};

		match decoded {
			(Ok((status, headers)), end_stream) => {
				// Interim responses are informational; the final headers
				// follow on the same stream.
				if (100..200).contains(&status) && !end_stream {
					return Ok(());
				}
				let violation = match self.streams.get_mut(&id) {
					None => return Ok(()),
					Some(entry) => {
						entry.response = Some((status, headers));
						entry.state.recv_headers(end_stream).is_err()
					}
				};
				if violation {
					return self.closed_stream_violation(id).await;
				}
				if end_stream {
					return self.complete_stream(id).await;
				}
				Ok(())
			}
			(Err(e), _) => {
				warn!("malformed header block on stream {id}: {e}");
				self.reset_stream(id, ErrorCode::Protocol, NetworkError::ProtocolError)
					.await
			}
		}
	}

	async fn complete_stream(&mut self, id: u32) -> Result<(), ()> {
		let Some(mut entry) = self.streams.remove(&id) else {
			return Ok(());
		};
		self.mark_closed(id, ClosedKind::Completed);

		let result = match entry.response.take() {
			Some((status, headers)) => Ok(Http2Response {
				status,
				headers,
				body: entry.body.freeze(),
			}),
			None => Err(NetworkError::InvalidResponse),
		};
		if let Some(reply) = entry.reply {
			let _ = reply.send(result);
		}
		self.pump_pending().await
	}
}
