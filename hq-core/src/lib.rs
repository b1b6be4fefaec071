//! The HTTP/3 common connection core: everything between a QUIC transport
//! and the request/response layer.
//!
//! A [`Context`] owns one UDP socket and the connection registry. Its
//! datagram pump batches incoming datagrams, groups decoded packets by peer
//! and destination CID, and routes each group to its [`Connection`], which
//! manages the six mandatory unidirectional control streams (control, QPACK
//! encoder, QPACK decoder, in each direction), parses the HTTP/3 frame
//! layer, and drives SETTINGS negotiation to instantiate the QPACK coder
//! pair.
//!
//! The QUIC library itself is a seam: implement [`Engine`] and [`Transport`]
//! over it. The QPACK codec and the HTTP layer plug in through
//! [`Callbacks`]; server-side packet acceptance through [`Acceptor`].
//!
//! Everything runs on one task. Handlers run to completion between loop
//! turns; there is no locking and no cross-thread sharing of connection
//! state.

mod buffer;
mod connection;
mod context;
mod error;
mod hashkey;
mod qpack;
mod socket;
mod stream;
mod timer;
mod transport;

#[cfg(test)]
mod testing;

pub use connection::{Callbacks, Connection, DEFAULT_MAX_BLOCKED_STREAMS};
pub use context::{Acceptor, Context};
pub use error::Error;
pub use qpack::{QpackDecoder, QpackEncoder};
pub use socket::DatagramSocket;
pub use transport::{
    Datagram, DecodedPacket, EgressSource, Engine, PlaintextCid, SendError, StreamEvent, Transport,
    TransportError,
};

pub use hq_proto as proto;
