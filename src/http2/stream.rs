use thiserror::Error;

/// Per-stream state, as observed by the client endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
	#[default]
	Idle,
	ReservedLocal,
	ReservedRemote,
	Open,
	HalfClosedLocal,
	HalfClosedRemote,
	Closed,
}

/// A transition that is not legal in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal stream transition: {action} in {state:?}")]
pub struct InvalidTransition {
	pub state: StreamState,
	pub action: &'static str,
}

impl StreamState {
	pub fn is_closed(&self) -> bool {
		matches!(self, StreamState::Closed)
	}

	/// Whether the local endpoint may still send DATA on this stream.
	pub fn can_send_data(&self) -> bool {
		matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
	}

	/// Whether frames from the peer are still expected on this stream.
	pub fn can_receive(&self) -> bool {
		matches!(
			self,
			StreamState::Open | StreamState::HalfClosedLocal | StreamState::ReservedRemote
		)
	}

	/// Local endpoint sends HEADERS opening the stream.
	pub fn send_headers(&mut self, end_stream: bool) -> Result<(), InvalidTransition> {
		*self = match (*self, end_stream) {
			(StreamState::Idle, false) => StreamState::Open,
			(StreamState::Idle, true) => StreamState::HalfClosedLocal,
			(state, _) => {
				return Err(InvalidTransition { state, action: "send HEADERS" });
			}
		};
		Ok(())
	}

	/// Peer HEADERS received (response headers, or trailers with END_STREAM).
	pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), InvalidTransition> {
		if end_stream {
			return self.recv_end_stream();
		}
		match *self {
			StreamState::Open | StreamState::HalfClosedLocal => Ok(()),
			// Server side of a pushed stream.
			StreamState::ReservedRemote => {
				*self = StreamState::HalfClosedLocal;
				Ok(())
			}
			state => Err(InvalidTransition { state, action: "receive HEADERS" }),
		}
	}

	/// Local endpoint sent a frame bearing END_STREAM.
	pub fn send_end_stream(&mut self) -> Result<(), InvalidTransition> {
		*self = match *self {
			StreamState::Open => StreamState::HalfClosedLocal,
			StreamState::HalfClosedRemote => StreamState::Closed,
			state => {
				return Err(InvalidTransition { state, action: "send END_STREAM" });
			}
		};
		Ok(())
	}

	/// Peer frame bearing END_STREAM received.
	pub fn recv_end_stream(&mut self) -> Result<(), InvalidTransition> {
		*self = match *self {
			StreamState::Open => StreamState::HalfClosedRemote,
			StreamState::HalfClosedLocal => StreamState::Closed,
			state => {
				return Err(InvalidTransition { state, action: "receive END_STREAM" });
			}
		};
		Ok(())
	}

	/// RST_STREAM sent or received: any state goes to closed.
	pub fn reset(&mut self) {
		*self = StreamState::Closed;
	}

	/// Peer reserved this stream id via PUSH_PROMISE.
	pub fn reserve_remote(&mut self) -> Result<(), InvalidTransition> {
		match *self {
			StreamState::Idle => {
				*self = StreamState::ReservedRemote;
				Ok(())
			}
			state => Err(InvalidTransition { state, action: "reserve (push)" }),
		}
	}
}

/// Allocates client-initiated stream identifiers: odd, strictly increasing.
#[derive(Debug)]
pub struct StreamIdAllocator {
	next: u32,
}

impl StreamIdAllocator {
	pub fn new() -> Self {
		Self { next: 1 }
	}

	/// The next odd stream id, or `None` once the id space is exhausted.
	pub fn allocate(&mut self) -> Option<u32> {
		if self.next > 0x7fff_ffff {
			return None;
		}
		let id = self.next;
		self.next += 2;
		Some(id)
	}

	pub fn peek(&self) -> u32 {
		self.next
	}
}

impl Default for StreamIdAllocator {
	fn default() -> Self {
		Self::new()
	}
}

/// Whether `id` names a server-initiated (even) stream.
pub fn is_server_initiated(id: u32) -> bool {
	id != 0 && id % 2 == 0
}
