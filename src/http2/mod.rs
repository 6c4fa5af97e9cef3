pub mod connection;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod stream;

pub use connection::{Http2Handle, Http2Response, RequestHead, handshake};
pub use frame::{ConnectionSettings, ErrorCode, Frame, FrameError};
pub use stream::{StreamIdAllocator, StreamState};
