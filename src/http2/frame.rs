use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// The 24-byte client connection preface, sent before any frame.
pub const PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Fixed frame header length.
pub const HEADER_LEN: usize = 9;

/// Default and ceiling for the maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_CEILING: u32 = (1 << 24) - 1;

/// Largest legal flow-control window.
pub const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// Initial window size before any SETTINGS exchange.
pub const DEFAULT_INITIAL_WINDOW: u32 = 65_535;

// Frame flags.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// HTTP/2 error codes carried in RST_STREAM and GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	NoError,
	Protocol,
	Internal,
	FlowControl,
	SettingsTimeout,
	StreamClosed,
	FrameSize,
	RefusedStream,
	Cancel,
	Compression,
	Connect,
	EnhanceYourCalm,
	InadequateSecurity,
	Http11Required,
	Unknown(u32),
}

impl ErrorCode {
	pub fn from_u32(raw: u32) -> Self {
		match raw {
			0x0 => ErrorCode::NoError,
			0x1 => ErrorCode::Protocol,
			0x2 => ErrorCode::Internal,
			0x3 => ErrorCode::FlowControl,
			0x4 => ErrorCode::SettingsTimeout,
			0x5 => ErrorCode::StreamClosed,
			0x6 => ErrorCode::FrameSize,
			0x7 => ErrorCode::RefusedStream,
			0x8 => ErrorCode::Cancel,
			0x9 => ErrorCode::Compression,
			0xa => ErrorCode::Connect,
			0xb => ErrorCode::EnhanceYourCalm,
			0xc => ErrorCode::InadequateSecurity,
			0xd => ErrorCode::Http11Required,
			other => ErrorCode::Unknown(other),
		}
	}

	pub fn as_u32(&self) -> u32 {
		match self {
			ErrorCode::NoError => 0x0,
			ErrorCode::Protocol => 0x1,
			ErrorCode::Internal => 0x2,
			ErrorCode::FlowControl => 0x3,
			ErrorCode::SettingsTimeout => 0x4,
			ErrorCode::StreamClosed => 0x5,
			ErrorCode::FrameSize => 0x6,
			ErrorCode::RefusedStream => 0x7,
			ErrorCode::Cancel => 0x8,
			ErrorCode::Compression => 0x9,
			ErrorCode::Connect => 0xa,
			ErrorCode::EnhanceYourCalm => 0xb,
			ErrorCode::InadequateSecurity => 0xc,
			ErrorCode::Http11Required => 0xd,
			ErrorCode::Unknown(raw) => *raw,
		}
	}
}

/// SETTINGS parameter identifiers.
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// One peer's settings. Each side of a connection holds its own copy;
/// received values take effect only after the SETTINGS frame is processed
/// and ACKed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
	pub header_table_size: u32,
	pub enable_push: bool,
	pub max_concurrent_streams: u32,
	pub initial_window_size: u32,
	pub max_frame_size: u32,
	pub max_header_list_size: u32,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			header_table_size: 4096,
			enable_push: false,
			max_concurrent_streams: 100,
			initial_window_size: 65_535,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			max_header_list_size: 8192,
		}
	}
}

impl ConnectionSettings {
	/// Apply received settings in order, validating each value.
	pub fn apply(&mut self, entries: &[(u16, u32)]) -> Result<(), FrameError> {
		for &(id, value) in entries {
			match id {
				SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
				SETTINGS_ENABLE_PUSH => {
					self.enable_push = match value {
						0 => false,
						1 => true,
						_ => return Err(FrameError::Protocol("ENABLE_PUSH must be 0 or 1")),
					}
				}
				SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = value,
				SETTINGS_INITIAL_WINDOW_SIZE => {
					if value > MAX_WINDOW_SIZE {
						return Err(FrameError::FlowControl);
					}
					self.initial_window_size = value;
				}
				SETTINGS_MAX_FRAME_SIZE => {
					if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_CEILING).contains(&value) {
						return Err(FrameError::Protocol("MAX_FRAME_SIZE out of range"));
					}
					self.max_frame_size = value;
				}
				SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = value,
				// Unknown settings identifiers are ignored.
				_ => {}
			}
		}
		Ok(())
	}

	/// Serialize as SETTINGS frame entries.
	pub fn to_entries(&self) -> Vec<(u16, u32)> {
		vec![
			(SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
			(SETTINGS_ENABLE_PUSH, self.enable_push as u32),
			(SETTINGS_MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
			(SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size),
			(SETTINGS_MAX_FRAME_SIZE, self.max_frame_size),
			(SETTINGS_MAX_HEADER_LIST_SIZE, self.max_header_list_size),
		]
	}
}

/// Errors raised while parsing or validating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
	#[error("frame exceeds the maximum frame size")]
	FrameSize,

	#[error("padding length exceeds the frame payload")]
	TooMuchPadding,

	#[error("invalid stream identifier for this frame type")]
	InvalidStreamId,

	#[error("SETTINGS ACK must carry an empty payload")]
	InvalidAck,

	#[error("payload length is invalid for this frame type")]
	InvalidPayloadLength,

	#[error("WINDOW_UPDATE increment must be non-zero")]
	ZeroWindowIncrement,

	#[error("flow control window violation")]
	FlowControl,

	#[error("protocol violation: {0}")]
	Protocol(&'static str),
}

impl FrameError {
	/// The GOAWAY/RST_STREAM error code this failure maps to.
	pub fn error_code(&self) -> ErrorCode {
		match self {
			FrameError::FrameSize | FrameError::InvalidAck | FrameError::InvalidPayloadLength => {
				ErrorCode::FrameSize
			}
			FrameError::FlowControl => ErrorCode::FlowControl,
			_ => ErrorCode::Protocol,
		}
	}
}

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
	pub exclusive: bool,
	pub dependency: u32,
	pub weight: u8,
}

impl PrioritySpec {
	fn parse(buf: &[u8]) -> Result<Self, FrameError> {
		if buf.len() < 5 {
			return Err(FrameError::InvalidPayloadLength);
		}
		let raw = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
		Ok(Self {
			exclusive: raw & 0x8000_0000 != 0,
			dependency: raw & 0x7fff_ffff,
			weight: buf[4],
		})
	}

	fn encode<B: BufMut>(&self, dst: &mut B) {
		let mut raw = self.dependency & 0x7fff_ffff;
		if self.exclusive {
			raw |= 0x8000_0000;
		}
		dst.put_u32(raw);
		dst.put_u8(self.weight);
	}
}

/// A parsed HTTP/2 frame.
///
/// Header blocks are carried opaque; HPACK encoding and decoding live in
/// [`crate::http2::hpack`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
	Data {
		stream_id: u32,
		data: Bytes,
		end_stream: bool,
	},
	Headers {
		stream_id: u32,
		block: Bytes,
		end_stream: bool,
		end_headers: bool,
		priority: Option<PrioritySpec>,
	},
	Priority {
		stream_id: u32,
		spec: PrioritySpec,
	},
	RstStream {
		stream_id: u32,
		error_code: ErrorCode,
	},
	Settings {
		ack: bool,
		entries: Vec<(u16, u32)>,
	},
	PushPromise {
		stream_id: u32,
		promised_id: u32,
		block: Bytes,
		end_headers: bool,
	},
	Ping {
		ack: bool,
		payload: [u8; 8],
	},
	GoAway {
		last_stream_id: u32,
		error_code: ErrorCode,
		debug_data: Bytes,
	},
	WindowUpdate {
		stream_id: u32,
		increment: u32,
	},
	Continuation {
		stream_id: u32,
		block: Bytes,
		end_headers: bool,
	},
	/// Frames with an unrecognized type are ignored by the connection.
	Unknown {
		kind: u8,
		stream_id: u32,
	},
}

impl Frame {
	pub fn stream_id(&self) -> u32 {
		match self {
			Frame::Data { stream_id, .. }
			| Frame::Headers { stream_id, .. }
			| Frame::Priority { stream_id, .. }
			| Frame::RstStream { stream_id, .. }
			| Frame::PushPromise { stream_id, .. }
			| Frame::WindowUpdate { stream_id, .. }
			| Frame::Continuation { stream_id, .. }
			| Frame::Unknown { stream_id, .. } => *stream_id,
			Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
		}
	}
}

/// Strip padding from a payload when the PADDED flag is set.
fn unpad(payload: Bytes, flags: u8) -> Result<Bytes, FrameError> {
	if flags & FLAG_PADDED == 0 {
		return Ok(payload);
	}
	if payload.is_empty() {
		return Err(FrameError::InvalidPayloadLength);
	}
	let pad_len = payload[0] as usize;
	if pad_len + 1 > payload.len() {
		return Err(FrameError::TooMuchPadding);
	}
	Ok(payload.slice(1..payload.len() - pad_len))
}

/// Try to parse one frame from `src`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// consumed bytes are removed from `src` only when a full frame is taken.
pub fn parse(src: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, FrameError> {
	if src.len() < HEADER_LEN {
		return Ok(None);
	}

	let length = u32::from_be_bytes([0, src[0], src[1], src[2]]) as usize;
	if length as u32 > max_frame_size {
		return Err(FrameError::FrameSize);
	}
	if src.len() < HEADER_LEN + length {
		return Ok(None);
	}

	let head = src.split_to(HEADER_LEN);
	let kind = head[3];
	let flags = head[4];
	let stream_id = u32::from_be_bytes([head[5], head[6], head[7], head[8]]) & 0x7fff_ffff;
	let payload = src.split_to(length).freeze();

	let frame = match kind {
		0x0 => {
			// DATA
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			Frame::Data {
				stream_id,
				data: unpad(payload, flags)?,
				end_stream: flags & FLAG_END_STREAM != 0,
			}
		}
		0x1 => {
			// HEADERS
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			let mut block = unpad(payload, flags)?;
			let priority = if flags & FLAG_PRIORITY != 0 {
				let spec = PrioritySpec::parse(&block)?;
				block = block.slice(5..);
				Some(spec)
			} else {
				None
			};
			Frame::Headers {
				stream_id,
				block,
				end_stream: flags & FLAG_END_STREAM != 0,
				end_headers: flags & FLAG_END_HEADERS != 0,
				priority,
			}
		}
		0x2 => {
			// PRIORITY
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			if payload.len() != 5 {
				return Err(FrameError::InvalidPayloadLength);
			}
			Frame::Priority {
				stream_id,
				spec: PrioritySpec::parse(&payload)?,
			}
		}
		0x3 => {
			// RST_STREAM
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			if payload.len() != 4 {
				return Err(FrameError::InvalidPayloadLength);
			}
			Frame::RstStream {
				stream_id,
				error_code: ErrorCode::from_u32(u32::from_be_bytes([
					payload[0], payload[1], payload[2], payload[3],
				])),
			}
		}
		0x4 => {
			// SETTINGS
			if stream_id != 0 {
				return Err(FrameError::InvalidStreamId);
			}
			let ack = flags & FLAG_ACK != 0;
			if ack {
				if !payload.is_empty() {
					return Err(FrameError::InvalidAck);
				}
				Frame::Settings { ack, entries: Vec::new() }
			} else {
				if payload.len() % 6 != 0 {
					return Err(FrameError::InvalidPayloadLength);
				}
				let entries = payload
					.chunks_exact(6)
					.map(|c| {
						(
							u16::from_be_bytes([c[0], c[1]]),
							u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
						)
					})
					.collect();
				Frame::Settings { ack, entries }
			}
		}
		0x5 => {
			// PUSH_PROMISE
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			let body = unpad(payload, flags)?;
			if body.len() < 4 {
				return Err(FrameError::InvalidPayloadLength);
			}
			let promised_id =
				u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & 0x7fff_ffff;
			Frame::PushPromise {
				stream_id,
				promised_id,
				block: body.slice(4..),
				end_headers: flags & FLAG_END_HEADERS != 0,
			}
		}
		0x6 => {
			// PING
			if stream_id != 0 {
				return Err(FrameError::InvalidStreamId);
			}
			if payload.len() != 8 {
				return Err(FrameError::InvalidPayloadLength);
			}
			let mut buf = [0u8; 8];
			buf.copy_from_slice(&payload);
			Frame::Ping {
				ack: flags & FLAG_ACK != 0,
				payload: buf,
			}
		}
		0x7 => {
			// GOAWAY
			if stream_id != 0 {
				return Err(FrameError::InvalidStreamId);
			}
			if payload.len() < 8 {
				return Err(FrameError::InvalidPayloadLength);
			}
			Frame::GoAway {
				last_stream_id: u32::from_be_bytes([
					payload[0], payload[1], payload[2], payload[3],
				]) & 0x7fff_ffff,
				error_code: ErrorCode::from_u32(u32::from_be_bytes([
					payload[4], payload[5], payload[6], payload[7],
				])),
				debug_data: payload.slice(8..),
			}
		}
		0x8 => {
			// WINDOW_UPDATE
			if payload.len() != 4 {
				return Err(FrameError::InvalidPayloadLength);
			}
			let increment =
				u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
					& 0x7fff_ffff;
			if increment == 0 {
				return Err(FrameError::ZeroWindowIncrement);
			}
			Frame::WindowUpdate { stream_id, increment }
		}
		0x9 => {
			// CONTINUATION
			if stream_id == 0 {
				return Err(FrameError::InvalidStreamId);
			}
			Frame::Continuation {
				stream_id,
				block: payload,
				end_headers: flags & FLAG_END_HEADERS != 0,
			}
		}
		other => Frame::Unknown { kind: other, stream_id },
	};

	Ok(Some(frame))
}

fn put_head<B: BufMut>(dst: &mut B, length: usize, kind: u8, flags: u8, stream_id: u32) {
	let len = length as u32;
	dst.put_u8((len >> 16) as u8);
	dst.put_u8((len >> 8) as u8);
	dst.put_u8(len as u8);
	dst.put_u8(kind);
	dst.put_u8(flags);
	dst.put_u32(stream_id & 0x7fff_ffff);
}

/// Serialize a frame. Padding is never produced.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
	match frame {
		Frame::Data { stream_id, data, end_stream } => {
			let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
			put_head(dst, data.len(), 0x0, flags, *stream_id);
			dst.extend_from_slice(data);
		}
		Frame::Headers {
			stream_id,
			block,
			end_stream,
			end_headers,
			priority,
		} => {
			let mut flags = 0;
			if *end_stream {
				flags |= FLAG_END_STREAM;
			}
			if *end_headers {
				flags |= FLAG_END_HEADERS;
			}
			let priority_len = if priority.is_some() { 5 } else { 0 };
			if priority.is_some() {
				flags |= FLAG_PRIORITY;
			}
			put_head(dst, block.len() + priority_len, 0x1, flags, *stream_id);
			if let Some(spec) = priority {
				spec.encode(dst);
			}
			dst.extend_from_slice(block);
		}
		Frame::Priority { stream_id, spec } => {
			put_head(dst, 5, 0x2, 0, *stream_id);
			spec.encode(dst);
		}
		Frame::RstStream { stream_id, error_code } => {
			put_head(dst, 4, 0x3, 0, *stream_id);
			dst.put_u32(error_code.as_u32());
		}
		Frame::Settings { ack, entries } => {
			let flags = if *ack { FLAG_ACK } else { 0 };
			put_head(dst, entries.len() * 6, 0x4, flags, 0);
			for (id, value) in entries {
				dst.put_u16(*id);
				dst.put_u32(*value);
			}
		}
		Frame::PushPromise {
			stream_id,
			promised_id,
			block,
			end_headers,
		} => {
			let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
			put_head(dst, block.len() + 4, 0x5, flags, *stream_id);
			dst.put_u32(promised_id & 0x7fff_ffff);
			dst.extend_from_slice(block);
		}
		Frame::Ping { ack, payload } => {
			let flags = if *ack { FLAG_ACK } else { 0 };
			put_head(dst, 8, 0x6, flags, 0);
			dst.extend_from_slice(payload);
		}
		Frame::GoAway {
			last_stream_id,
			error_code,
			debug_data,
		} => {
			put_head(dst, 8 + debug_data.len(), 0x7, 0, 0);
			dst.put_u32(last_stream_id & 0x7fff_ffff);
			dst.put_u32(error_code.as_u32());
			dst.extend_from_slice(debug_data);
		}
		Frame::WindowUpdate { stream_id, increment } => {
			put_head(dst, 4, 0x8, 0, *stream_id);
			dst.put_u32(increment & 0x7fff_ffff);
		}
		Frame::Continuation {
			stream_id,
			block,
			end_headers,
		} => {
			let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
			put_head(dst, block.len(), 0x9, flags, *stream_id);
			dst.extend_from_slice(block);
		}
		Frame::Unknown { .. } => {
			// Unknown frames are never emitted.
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	fn round_trip(frame: Frame) {
		let mut buf = BytesMut::new();
		encode(&frame, &mut buf);
		let parsed = parse(&mut buf, DEFAULT_MAX_FRAME_SIZE)
			.expect("parse should succeed")
			.expect("a complete frame was encoded");
		assert_eq!(parsed, frame);
		assert!(buf.is_empty(), "no residual bytes after one frame");
	}

	#[test]
	fn round_trip_all_frame_types() {
		round_trip(Frame::Data {
			stream_id: 1,
			data: Bytes::from_static(b"hello"),
			end_stream: true,
		});
		round_trip(Frame::Headers {
			stream_id: 3,
			block: Bytes::from_static(b"\x00\x05:path\x01/"),
			end_stream: false,
			end_headers: true,
			priority: None,
		});
		round_trip(Frame::Headers {
			stream_id: 5,
			block: Bytes::from_static(b"block"),
			end_stream: true,
			end_headers: true,
			priority: Some(PrioritySpec {
				exclusive: true,
				dependency: 3,
				weight: 200,
			}),
		});
		round_trip(Frame::Priority {
			stream_id: 7,
			spec: PrioritySpec {
				exclusive: false,
				dependency: 1,
				weight: 16,
			},
		});
		round_trip(Frame::RstStream {
			stream_id: 9,
			error_code: ErrorCode::Cancel,
		});
		round_trip(Frame::Settings {
			ack: false,
			entries: vec![
				(SETTINGS_MAX_CONCURRENT_STREAMS, 100),
				(SETTINGS_INITIAL_WINDOW_SIZE, 65_535),
			],
		});
		round_trip(Frame::Settings { ack: true, entries: Vec::new() });
		round_trip(Frame::PushPromise {
			stream_id: 3,
			promised_id: 4,
			block: Bytes::from_static(b"promise"),
			end_headers: true,
		});
		round_trip(Frame::Ping {
			ack: false,
			payload: [1, 2, 3, 4, 5, 6, 7, 8],
		});
		round_trip(Frame::GoAway {
			last_stream_id: 11,
			error_code: ErrorCode::Protocol,
			debug_data: Bytes::from_static(b"debug"),
		});
		round_trip(Frame::WindowUpdate {
			stream_id: 0,
			increment: 32_768,
		});
		round_trip(Frame::Continuation {
			stream_id: 3,
			block: Bytes::from_static(b"rest"),
			end_headers: true,
		});
	}

	#[test]
	fn incomplete_frames_return_none() {
		let mut buf = BytesMut::new();
		encode(
			&Frame::Ping { ack: false, payload: [0; 8] },
			&mut buf,
		);
		let full = buf.clone();

		let mut partial = BytesMut::from(&full[..4]);
		assert_eq!(parse(&mut partial, DEFAULT_MAX_FRAME_SIZE), Ok(None));

		let mut partial = BytesMut::from(&full[..HEADER_LEN + 3]);
		assert_eq!(parse(&mut partial, DEFAULT_MAX_FRAME_SIZE), Ok(None));
	}

	#[test]
	fn oversized_frame_is_frame_size_error() {
		let mut buf = BytesMut::new();
		// Header declaring a 20000-byte payload.
		put_head(&mut buf, 20_000, 0x0, 0, 1);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::FrameSize)
		);
	}

	#[test]
	fn settings_ack_with_payload_rejected() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 6, 0x4, FLAG_ACK, 0);
		buf.put_u16(SETTINGS_ENABLE_PUSH);
		buf.put_u32(0);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::InvalidAck)
		);
	}

	#[test]
	fn settings_on_nonzero_stream_rejected() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 0, 0x4, 0, 1);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::InvalidStreamId)
		);
	}

	#[test]
	fn ping_must_be_eight_bytes() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 4, 0x6, 0, 0);
		buf.put_u32(0);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::InvalidPayloadLength)
		);
	}

	#[test]
	fn zero_window_increment_rejected() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 4, 0x8, 0, 1);
		buf.put_u32(0);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::ZeroWindowIncrement)
		);
	}

	#[test]
	fn padded_data_is_stripped() {
		let mut buf = BytesMut::new();
		// payload: pad_len=3, "abc", 3 bytes padding
		put_head(&mut buf, 7, 0x0, FLAG_PADDED, 1);
		buf.put_u8(3);
		buf.extend_from_slice(b"abc");
		buf.extend_from_slice(&[0, 0, 0]);

		let frame = parse(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
		match frame {
			Frame::Data { data, .. } => assert_eq!(&data[..], b"abc"),
			other => panic!("expected DATA, got {other:?}"),
		}
	}

	#[test]
	fn excess_padding_rejected() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 3, 0x0, FLAG_PADDED, 1);
		buf.put_u8(9); // pad length longer than the remaining payload
		buf.extend_from_slice(&[0, 0]);
		assert_eq!(
			parse(&mut buf, DEFAULT_MAX_FRAME_SIZE),
			Err(FrameError::TooMuchPadding)
		);
	}

	#[test]
	fn unknown_frame_kind_is_passed_through() {
		let mut buf = BytesMut::new();
		put_head(&mut buf, 2, 0xbe, 0, 17);
		buf.extend_from_slice(&[0xde, 0xad]);
		let frame = parse(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
		assert_eq!(frame, Frame::Unknown { kind: 0xbe, stream_id: 17 });
	}

	#[test]
	fn settings_apply_validates_values() {
		let mut settings = ConnectionSettings::default();
		settings
			.apply(&[(SETTINGS_MAX_CONCURRENT_STREAMS, 42)])
			.unwrap();
		assert_eq!(settings.max_concurrent_streams, 42);

		assert_eq!(
			settings.apply(&[(SETTINGS_ENABLE_PUSH, 2)]),
			Err(FrameError::Protocol("ENABLE_PUSH must be 0 or 1"))
		);
		assert_eq!(
			settings.apply(&[(SETTINGS_INITIAL_WINDOW_SIZE, 1 << 31)]),
			Err(FrameError::FlowControl)
		);
		assert_eq!(
			settings.apply(&[(SETTINGS_MAX_FRAME_SIZE, 1000)]),
			Err(FrameError::Protocol("MAX_FRAME_SIZE out of range"))
		);

		// Unknown identifiers are ignored without error.
		settings.apply(&[(0x99, 7)]).unwrap();
	}

	#[test]
	fn preface_is_exact() {
		assert_eq!(PREFACE.len(), 24);
		assert_eq!(&PREFACE[..], b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
	}
}
