use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;

use hq_proto::ErrorCode;

/// The decrypted form of a locally-issued connection ID.
///
/// `node_id` and `thread_id` are zero for CIDs that belong to this process;
/// anything else fails authentication and falls through the registry lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaintextCid {
    pub node_id: u64,
    pub thread_id: u32,
    pub master_id: u64,
}

/// One QUIC packet decoded out of a datagram, borrowing from the receive
/// staging buffer.
#[derive(Debug, Clone, Copy)]
pub struct DecodedPacket<'a> {
    /// The full packet bytes; their length advances the coalesced-packet walk.
    pub octets: &'a [u8],
    /// The raw destination CID as it appeared on the wire.
    pub dcid: &'a [u8],
    /// The decrypted CID, garbage unless it authenticates as ours.
    pub plaintext: PlaintextCid,
    /// Set for Initial/0-RTT packets, whose destination CID was chosen by
    /// the client and must be looked up through the accept map.
    pub might_be_client_generated: bool,
}

/// A datagram produced by the transport, ready for the socket.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

/// Stream-level events surfaced by the transport after packet delivery.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A unidirectional stream came into existence.
    Opened { id: u64, self_initiated: bool },
    /// Bytes arrived on an ingress stream. `off` is relative to the first
    /// byte not yet acknowledged via [`Transport::ack_read`]; out-of-order
    /// delivery is expected.
    Received { id: u64, off: u64, data: Bytes },
    /// The peer reset an ingress stream.
    ReceiveReset { id: u64, code: u64 },
    /// The peer sent STOP_SENDING for one of our egress streams.
    SendStopped { id: u64, code: u64 },
    /// The transport released the stream and its state.
    Destroyed { id: u64 },
}

/// Failure of a transport operation on the receive/setup path.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outcome of asking the transport for outgoing datagrams.
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// The connection has fully drained and must be freed now.
    #[error("connection drained")]
    FreeConnection,

    /// Anything else; the core treats this as an unrecoverable bug.
    #[error("transport: {0}")]
    Fatal(TransportError),
}

/// Pull-side access to the egress send buffers, handed to
/// [`Transport::send`] so the transport can fill STREAM frames.
pub trait EgressSource {
    /// Copy up to `dst.len()` bytes starting at `off` (relative to the first
    /// unacknowledged byte). Returns the bytes written and whether the
    /// buffer has nothing further past this emission.
    fn emit(&mut self, id: u64, off: usize, dst: &mut [u8]) -> (usize, bool);

    /// Drop `delta` acknowledged bytes from the front of the send buffer.
    fn shift(&mut self, id: u64, delta: usize);
}

/// The listener-level half of the QUIC library: turning datagrams into
/// decoded packets.
pub trait Engine {
    type Conn: Transport;

    /// Decode the packet at the start of `datagram`, or `None` when the
    /// remainder is undecodable and the rest of the datagram is dropped.
    fn decode_packet<'a>(&mut self, datagram: &'a [u8]) -> Option<DecodedPacket<'a>>;
}

/// The per-connection half of the QUIC library.
///
/// The core drives this object and owns everything above it: stream byte
/// buffers, the HTTP/3 state machines, and the QPACK pair. Stream state
/// changes come back out through [`Transport::poll_event`].
pub trait Transport {
    /// Deliver one decoded packet.
    fn receive(&mut self, packet: &DecodedPacket<'_>) -> Result<(), TransportError>;

    /// Drain the next pending stream event, if any.
    fn poll_event(&mut self) -> Option<StreamEvent>;

    /// Produce up to `max` datagrams, pulling stream data through `streams`.
    /// Appends to `out`; fewer than `max` means the queue drained.
    fn send(
        &mut self,
        streams: &mut dyn EgressSource,
        out: &mut Vec<Datagram>,
        max: usize,
    ) -> Result<(), SendError>;

    /// Open a self-initiated unidirectional stream, returning its id.
    fn open_uni(&mut self) -> Result<u64, TransportError>;

    /// Ask the peer to stop sending on an ingress stream.
    fn request_stop(&mut self, id: u64, code: ErrorCode);

    /// Acknowledge `n` consumed bytes to the stream flow controller.
    fn ack_read(&mut self, id: u64, n: usize);

    /// Tell the transport an egress send buffer gained bytes.
    fn notify_send(&mut self, id: u64);

    /// Contiguous bytes available past the last acknowledged offset.
    fn stream_readable(&self, id: u64) -> usize;

    /// Whether the peer finished the stream (all data delivered plus FIN).
    fn stream_is_finished(&self, id: u64) -> bool;

    /// Start closing the connection with an application error code.
    fn close(&mut self, code: ErrorCode, reason: &[u8]);

    fn is_client(&self) -> bool;

    /// Whether this connection is the destination of `packet` from `sa`.
    fn is_destination(&self, sa: SocketAddr, packet: &DecodedPacket<'_>) -> bool;

    fn peername(&self) -> SocketAddr;

    /// The client-chosen CID offered in the first Initial.
    fn offered_cid(&self) -> &[u8];

    /// The master id embedded in locally-issued CIDs.
    fn master_id(&self) -> u64;

    /// The next retransmit/ack/idle deadline, if any work is pending.
    fn next_timeout(&self) -> Option<Instant>;
}
