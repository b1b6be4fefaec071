//! The HTTP/3 wire layer: varints, the frame reader, SETTINGS, stream type
//! bytes, and the wire error code registry.
//!
//! Everything here is synchronous and allocation-free; parsing operates on
//! byte slices (or `bytes::Buf`) so the connection core can feed it the
//! contiguous prefix of a stream receive buffer.

mod error;
mod frame;
mod settings;
mod stream;
mod varint;

pub use error::*;
pub use frame::*;
pub use settings::*;
pub use stream::*;
pub use varint::*;

/// The ALPN token offered during the handshake.
pub const ALPN: &[u8] = b"h3-17";

/// Maximum payload size of any frame other than DATA.
///
/// Stream receive windows must be at least this large, so a conforming peer
/// can always deliver a whole non-DATA frame.
pub const MAX_FRAME_SIZE: usize = 16384;
