//! Mock engine, transport, coders, and socket for exercising the core
//! without a QUIC library.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use bytes::Bytes;

use hq_proto::{ErrorCode, FrameType};

use crate::connection::{Callbacks, Connection};
use crate::context::{Acceptor, Context};
use crate::qpack::{QpackDecoder, QpackEncoder};
use crate::socket::DatagramSocket;
use crate::transport::{
    Datagram, DecodedPacket, EgressSource, Engine, PlaintextCid, SendError, StreamEvent, Transport,
    TransportError,
};
use crate::Error;

pub(crate) fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Mock packet wire format:
/// `dcid_len(1) | dcid | flags(1, bit0 = client-generated) | master_id(1) |
/// body_len(1) | body`.
pub(crate) fn encode_packet(
    dcid: &[u8],
    client_generated: bool,
    master_id: u8,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + dcid.len() + body.len());
    out.push(dcid.len() as u8);
    out.extend_from_slice(dcid);
    out.push(client_generated as u8);
    out.push(master_id);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
    out
}

pub(crate) struct MockEngine;

impl Engine for MockEngine {
    type Conn = MockTransport;

    fn decode_packet<'a>(&mut self, datagram: &'a [u8]) -> Option<DecodedPacket<'a>> {
        let (&dcid_len, rest) = datagram.split_first()?;
        let dcid_len = dcid_len as usize;
        if rest.len() < dcid_len + 3 {
            return None;
        }

        let dcid = &rest[..dcid_len];
        let flags = rest[dcid_len];
        let master_id = rest[dcid_len + 1] as u64;
        let body_len = rest[dcid_len + 2] as usize;
        let total = 1 + dcid_len + 3 + body_len;
        if datagram.len() < total {
            return None;
        }

        Some(DecodedPacket {
            octets: &datagram[..total],
            dcid,
            plaintext: PlaintextCid {
                node_id: 0,
                thread_id: 0,
                master_id,
            },
            might_be_client_generated: flags & 1 != 0,
        })
    }
}

pub(crate) fn decode_one(bytes: &[u8]) -> DecodedPacket<'_> {
    MockEngine.decode_packet(bytes).unwrap()
}

pub(crate) enum SendStep {
    /// Emit `n` dummy datagrams.
    Packets(usize),
    /// Emit one datagram pulled from the egress buffer of `id`.
    Pull { id: u64, max: usize },
    /// Report the connection as drained.
    Free,
}

pub(crate) struct MockTransport {
    pub id: u64,
    pub client: bool,
    pub peer: SocketAddr,
    pub offered: Vec<u8>,
    pub destination: bool,
    pub next_uni: u64,
    pub timeout: Option<Instant>,

    pub events: VecDeque<StreamEvent>,
    pub readable: HashMap<u64, usize>,
    pub finished: HashSet<u64>,
    pub send_script: VecDeque<SendStep>,

    pub received: Vec<Vec<u8>>,
    pub acked: Vec<(u64, usize)>,
    pub stopped: Vec<(u64, ErrorCode)>,
    pub notified: Vec<u64>,
    pub closed: Option<(ErrorCode, Vec<u8>)>,
}

impl MockTransport {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            client: false,
            peer: addr("203.0.113.9:443"),
            offered: b"offered-cid".to_vec(),
            destination: true,
            next_uni: 3,
            timeout: None,
            events: VecDeque::new(),
            readable: HashMap::new(),
            finished: HashSet::new(),
            send_script: VecDeque::new(),
            received: Vec::new(),
            acked: Vec::new(),
            stopped: Vec::new(),
            notified: Vec::new(),
            closed: None,
        }
    }
}

impl Transport for MockTransport {
    fn receive(&mut self, packet: &DecodedPacket<'_>) -> Result<(), TransportError> {
        self.received.push(packet.octets.to_vec());
        Ok(())
    }

    fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    fn send(
        &mut self,
        streams: &mut dyn EgressSource,
        out: &mut Vec<Datagram>,
        max: usize,
    ) -> Result<(), SendError> {
        match self.send_script.pop_front() {
            None => Ok(()),
            Some(SendStep::Packets(n)) => {
                for _ in 0..n.min(max) {
                    out.push(Datagram {
                        to: self.peer,
                        data: vec![0xab],
                    });
                }
                Ok(())
            }
            Some(SendStep::Pull { id, max: limit }) => {
                let mut data = vec![0u8; limit];
                let (len, _wrote_all) = streams.emit(id, 0, &mut data);
                data.truncate(len);
                streams.shift(id, len);
                out.push(Datagram {
                    to: self.peer,
                    data,
                });
                Ok(())
            }
            Some(SendStep::Free) => Err(SendError::FreeConnection),
        }
    }

    fn open_uni(&mut self) -> Result<u64, TransportError> {
        let id = self.next_uni;
        self.next_uni += 4;
        Ok(id)
    }

    fn request_stop(&mut self, id: u64, code: ErrorCode) {
        self.stopped.push((id, code));
    }

    fn ack_read(&mut self, id: u64, n: usize) {
        self.acked.push((id, n));
        if let Some(available) = self.readable.get_mut(&id) {
            *available -= n.min(*available);
        }
    }

    fn notify_send(&mut self, id: u64) {
        self.notified.push(id);
    }

    fn stream_readable(&self, id: u64) -> usize {
        self.readable.get(&id).copied().unwrap_or(0)
    }

    fn stream_is_finished(&self, id: u64) -> bool {
        self.finished.contains(&id)
    }

    fn close(&mut self, code: ErrorCode, reason: &[u8]) {
        self.closed = Some((code, reason.to_vec()));
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn is_destination(&self, _sa: SocketAddr, _packet: &DecodedPacket<'_>) -> bool {
        self.destination
    }

    fn peername(&self) -> SocketAddr {
        self.peer
    }

    fn offered_cid(&self) -> &[u8] {
        &self.offered
    }

    fn master_id(&self) -> u64 {
        self.id
    }

    fn next_timeout(&self) -> Option<Instant> {
        self.timeout
    }
}

#[derive(Default)]
pub(crate) struct CoderState {
    pub fed: Vec<u8>,
    pub unblock: Vec<u64>,
    pub fail: bool,
}

struct MockDecoder(Rc<RefCell<CoderState>>);

impl QpackDecoder for MockDecoder {
    fn handle_input(&mut self, input: &[u8]) -> Result<Vec<u64>, Error> {
        let mut state = self.0.borrow_mut();
        if state.fail {
            return Err(Error::Qpack("decoder rejected input".into()));
        }
        state.fed.extend_from_slice(input);
        Ok(std::mem::take(&mut state.unblock))
    }
}

struct MockEncoder(Rc<RefCell<CoderState>>);

impl QpackEncoder for MockEncoder {
    fn handle_input(&mut self, input: &[u8]) -> Result<(), Error> {
        let mut state = self.0.borrow_mut();
        if state.fail {
            return Err(Error::Qpack("encoder rejected input".into()));
        }
        state.fed.extend_from_slice(input);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockCallbacks {
    pub decoders: Vec<(u32, u32)>,
    pub encoders: Vec<(u32, u32)>,
    pub frames: Vec<(u64, FrameType, Vec<u8>)>,
    pub frame_result: Option<Error>,
    pub unblocked: Vec<(u64, Vec<u64>)>,
    pub destroyed: Vec<u64>,
    pub decoder_state: Rc<RefCell<CoderState>>,
    pub encoder_state: Rc<RefCell<CoderState>>,
}

impl Callbacks for MockCallbacks {
    fn new_decoder(&mut self, header_table_size: u32, max_blocked: u32) -> Box<dyn QpackDecoder> {
        self.decoders.push((header_table_size, max_blocked));
        Box::new(MockDecoder(self.decoder_state.clone()))
    }

    fn new_encoder(&mut self, header_table_size: u32, max_blocked: u32) -> Box<dyn QpackEncoder> {
        self.encoders.push((header_table_size, max_blocked));
        Box::new(MockEncoder(self.encoder_state.clone()))
    }

    fn on_control_frame(
        &mut self,
        conn_id: u64,
        typ: FrameType,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.frames.push((conn_id, typ, payload.to_vec()));
        match self.frame_result.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn on_qpack_unblocked(&mut self, conn_id: u64, streams: &[u64]) {
        self.unblocked.push((conn_id, streams.to_vec()));
    }

    fn on_destroy(&mut self, conn_id: u64) {
        self.destroyed.push(conn_id);
    }
}

pub(crate) struct RecordingAcceptor(pub Rc<RefCell<Vec<(SocketAddr, usize)>>>);

impl Acceptor<MockTransport> for RecordingAcceptor {
    fn accept(&mut self, sa: SocketAddr, packets: &[DecodedPacket<'_>]) -> Option<MockTransport> {
        self.0.borrow_mut().push((sa, packets.len()));
        None
    }
}

/// Hands out one pre-built transport for the first unmatched group, then
/// refuses the rest.
pub(crate) struct OneShotAcceptor(pub Option<MockTransport>);

impl Acceptor<MockTransport> for OneShotAcceptor {
    fn accept(
        &mut self,
        _sa: SocketAddr,
        _packets: &[DecodedPacket<'_>],
    ) -> Option<MockTransport> {
        self.0.take()
    }
}

#[derive(Default)]
pub(crate) struct MockSocket {
    pub incoming: VecDeque<(Vec<u8>, SocketAddr)>,
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
}

impl DatagramSocket for MockSocket {
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.incoming.pop_front() {
            Some((data, sa)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, sa))
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.sent.push((buf.to_vec(), to));
        Ok(buf.len())
    }
}

pub(crate) type TestContext = Context<MockEngine, MockCallbacks>;

pub(crate) fn server_context() -> TestContext {
    Context::new(MockEngine, MockCallbacks::default())
}

pub(crate) fn setup_server_conn(ctx: &mut TestContext, id: u64) -> u64 {
    ctx.setup_connection(MockTransport::new(id)).unwrap()
}

/// Report a peer-opened unidirectional stream to the connection.
pub(crate) fn open_peer_uni(ctx: &mut TestContext, conn_id: u64, stream_id: u64) {
    let conn = ctx.connection_mut(conn_id).unwrap();
    conn.transport_mut().events.push_back(StreamEvent::Opened {
        id: stream_id,
        self_initiated: false,
    });
    ctx.pump_connection(conn_id);
}

/// Deliver in-order bytes on an ingress stream and pump the events.
pub(crate) fn deliver(ctx: &mut TestContext, conn_id: u64, stream_id: u64, bytes: &[u8]) {
    let conn = ctx.connection_mut(conn_id).unwrap();
    let off = buffered(conn, stream_id);
    let transport = conn.transport_mut();
    *transport.readable.entry(stream_id).or_default() += bytes.len();
    transport.events.push_back(StreamEvent::Received {
        id: stream_id,
        off,
        data: Bytes::copy_from_slice(bytes),
    });
    ctx.pump_connection(conn_id);
}

fn buffered(conn: &Connection<MockTransport>, stream_id: u64) -> u64 {
    conn.ingress
        .get(&stream_id)
        .map(|stream| stream.recvbuf.len() as u64)
        .unwrap_or(0)
}

/// Total bytes consumed (and acknowledged) on a stream.
pub(crate) fn consumed_on(conn: &Connection<MockTransport>, stream_id: u64) -> usize {
    conn.transport()
        .acked
        .iter()
        .filter(|(id, _)| *id == stream_id)
        .map(|(_, n)| n)
        .sum()
}

pub(crate) fn assert_closed(ctx: &TestContext, conn_id: u64, code: ErrorCode) {
    let conn = ctx.connection(conn_id).unwrap();
    let (closed_code, _reason) = conn
        .transport()
        .closed
        .as_ref()
        .expect("connection should have been closed");
    assert_eq!(*closed_code, code);
}
