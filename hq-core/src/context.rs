use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use crate::connection::{Callbacks, Connection, DEFAULT_MAX_BLOCKED_STREAMS};
use crate::hashkey::accept_key;
use crate::socket::DatagramSocket;
use crate::timer::TimerQueue;
use crate::transport::{Datagram, DecodedPacket, Engine, PlaintextCid, SendError, Transport};
use crate::Error;

use hq_proto::{FrameType, StreamType, DEFAULT_HEADER_TABLE_SIZE};

/// Datagrams staged per read cycle.
const MAX_DGRAMS_PER_CYCLE: usize = 32;

/// Staging buffer for one read cycle; reads stop early once the free tail
/// cannot hold a full-sized datagram.
const RECV_STAGING_SIZE: usize = 16384;
const MIN_DGRAM_SPACE: usize = 2048;

/// Decoded packets batched per `process_packets` call.
const MAX_PACKET_BATCH: usize = 64;

/// Datagrams requested from the transport per send call; a short batch
/// means the queue drained.
const SEND_BATCH: usize = 16;

/// Creates transports for packet groups that match no known connection.
pub trait Acceptor<T: Transport> {
    /// Start a new connection, ingesting `packets` (one peer+DCID group).
    /// Returns `None` to drop the group.
    fn accept(&mut self, sa: SocketAddr, packets: &[DecodedPacket<'_>]) -> Option<T>;
}

/// One listener: the QUIC engine, the connection registry, and the datagram
/// pump. Strictly single-threaded; everything runs between loop turns.
pub struct Context<E: Engine, C: Callbacks> {
    engine: E,
    callbacks: C,
    acceptor: Option<Box<dyn Acceptor<E::Conn>>>,
    conns: HashMap<u64, Connection<E::Conn>>,
    conns_accepting: HashMap<u64, u64>,
    next_cid: PlaintextCid,
    timers: TimerQueue,
}

impl<E: Engine, C: Callbacks> Context<E, C> {
    pub fn new(engine: E, callbacks: C) -> Self {
        Self {
            engine,
            callbacks,
            acceptor: None,
            conns: HashMap::new(),
            conns_accepting: HashMap::new(),
            next_cid: PlaintextCid::default(),
            timers: TimerQueue::default(),
        }
    }

    pub fn with_acceptor(engine: E, callbacks: C, acceptor: Box<dyn Acceptor<E::Conn>>) -> Self {
        let mut ctx = Self::new(engine, callbacks);
        ctx.acceptor = Some(acceptor);
        ctx
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn connection(&self, conn_id: u64) -> Option<&Connection<E::Conn>> {
        self.conns.get(&conn_id)
    }

    pub fn connection_mut(&mut self, conn_id: u64) -> Option<&mut Connection<E::Conn>> {
        self.conns.get_mut(&conn_id)
    }

    /// The CID template for the next connection; callers fill in node and
    /// thread ids when sharding.
    pub fn next_cid(&mut self) -> PlaintextCid {
        let cid = self.next_cid;
        self.next_cid.master_id += 1;
        cid
    }

    /// Register a freshly handshaken transport: create the QPACK decoder,
    /// enter the registry, open the three egress control streams, and arm
    /// the timer.
    pub fn setup_connection(&mut self, transport: E::Conn) -> Result<u64, Error> {
        let decoder = self
            .callbacks
            .new_decoder(DEFAULT_HEADER_TABLE_SIZE, DEFAULT_MAX_BLOCKED_STREAMS);
        let mut conn = Connection::new(transport, decoder);
        let conn_id = conn.conn_id();

        // Until the peer's Initial keys are gone, its packets still carry the
        // client-chosen CID; route them through the accept map.
        if !conn.transport().is_client() {
            let key = accept_key(conn.transport().peername(), conn.transport().offered_cid());
            conn.accept_key = Some(key);
            self.conns_accepting.insert(key, conn_id);
        }

        // Type byte plus an empty SETTINGS frame.
        let id = conn.open_egress(&[StreamType::CONTROL.0, 0x00, FrameType::SETTINGS.0])?;
        conn.control.egress.control = Some(id);

        let id = conn.open_egress(&[StreamType::QPACK_ENCODER.0])?;
        conn.control.egress.qpack_encoder = Some(id);

        let id = conn.open_egress(&[StreamType::QPACK_DECODER.0])?;
        conn.control.egress.qpack_decoder = Some(id);

        self.conns.insert(conn_id, conn);
        self.schedule_timer(conn_id);
        Ok(conn_id)
    }

    /// Remove a connection from the registry and drop it.
    pub fn destroy_connection(&mut self, conn_id: u64) {
        if let Some(conn) = self.conns.remove(&conn_id) {
            if let Some(key) = conn.accept_key {
                self.conns_accepting.remove(&key);
            }
            tracing::debug!(conn_id, "destroying connection");
            self.callbacks.on_destroy(conn_id);
        }
    }

    /// Drop the accept-map registration. Call once the connection's Initial
    /// and 0-RTT keys are discarded; from then on its packets authenticate
    /// through the CID registry alone.
    pub fn discard_accept_key(&mut self, conn_id: u64) {
        if let Some(conn) = self.conns.get_mut(&conn_id) {
            if let Some(key) = conn.accept_key.take() {
                self.conns_accepting.remove(&key);
            }
        }
    }

    fn find_connection(&self, sa: SocketAddr, packet: &DecodedPacket<'_>) -> Option<u64> {
        // A server receiving Initial/0-RTT sees the client-generated CID.
        if packet.might_be_client_generated {
            let key = accept_key(sa, packet.dcid);
            if let Some(&conn_id) = self.conns_accepting.get(&key) {
                if let Some(conn) = self.conns.get(&conn_id) {
                    debug_assert!(!conn.transport().is_client());
                    if conn.transport().is_destination(sa, packet) {
                        return Some(conn_id);
                    }
                }
            }
        }

        // Otherwise the CID must decrypt and belong to this process.
        if packet.plaintext.node_id == 0 && packet.plaintext.thread_id == 0 {
            let conn_id = packet.plaintext.master_id;
            if let Some(conn) = self.conns.get(&conn_id) {
                if conn.transport().is_destination(sa, packet) {
                    return Some(conn_id);
                }
            }
        }

        None
    }

    /// Drain the socket: stage datagrams, decode them, and dispatch the
    /// packet groups. Returns once a cycle reads nothing.
    pub fn on_readable<S: DatagramSocket>(&mut self, socket: &mut S) {
        loop {
            let mut staging = [0u8; RECV_STAGING_SIZE];
            let mut dgrams: Vec<(usize, usize, SocketAddr)> =
                Vec::with_capacity(MAX_DGRAMS_PER_CYCLE);
            let mut used = 0;

            while dgrams.len() < MAX_DGRAMS_PER_CYCLE && staging.len() - used >= MIN_DGRAM_SPACE {
                match socket.try_recv_from(&mut staging[used..]) {
                    Ok((len, sa)) => {
                        dgrams.push((used, len, sa));
                        used += len;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        if e.kind() != io::ErrorKind::WouldBlock {
                            tracing::warn!(error = %e, "recvmsg failed");
                        }
                        break;
                    }
                }
            }

            if dgrams.is_empty() {
                return;
            }
            self.dispatch_datagrams(socket, &staging, &dgrams);
        }
    }

    /// Walk the staged datagrams, grouping decoded packets so every
    /// `process_packets` call sees a single peer+DCID run of at most
    /// [`MAX_PACKET_BATCH`] packets.
    fn dispatch_datagrams<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        staging: &[u8],
        dgrams: &[(usize, usize, SocketAddr)],
    ) {
        let mut batch: Vec<DecodedPacket<'_>> = Vec::with_capacity(MAX_PACKET_BATCH);
        let mut batch_sa: Option<SocketAddr> = None;

        for &(start, len, sa) in dgrams {
            // A new peer address closes out the batch.
            if let Some(prev) = batch_sa {
                if prev != sa && !batch.is_empty() {
                    self.process_packets(socket, prev, &batch);
                    batch.clear();
                }
            }
            batch_sa = Some(sa);

            let dgram = &staging[start..start + len];
            let mut off = 0;
            while off != dgram.len() {
                let Some(packet) = self.engine.decode_packet(&dgram[off..]) else {
                    // Undecodable remainder; drop the rest of the datagram.
                    break;
                };
                debug_assert!(!packet.octets.is_empty());
                off += packet.octets.len();

                // A DCID change also closes out the batch; the new packet
                // starts the next one.
                if batch.first().is_some_and(|head| head.dcid != packet.dcid) {
                    self.process_packets(socket, sa, &batch);
                    batch.clear();
                }

                batch.push(packet);
                if batch.len() == MAX_PACKET_BATCH {
                    self.process_packets(socket, sa, &batch);
                    batch.clear();
                }
            }
        }

        if let Some(sa) = batch_sa {
            if !batch.is_empty() {
                self.process_packets(socket, sa, &batch);
            }
        }
    }

    fn process_packets<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        sa: SocketAddr,
        packets: &[DecodedPacket<'_>],
    ) {
        let Some(first) = packets.first() else { return };
        let mut conn_id = self.find_connection(sa, first);

        match conn_id {
            Some(id) => {
                if let Some(conn) = self.conns.get_mut(&id) {
                    for packet in packets {
                        if let Err(e) = conn.transport_mut().receive(packet) {
                            tracing::debug!(conn_id = id, error = %e, "transport rejected packet");
                        }
                    }
                }
            }
            None => {
                let accepted = match self.acceptor.as_mut() {
                    Some(acceptor) => acceptor.accept(sa, packets),
                    None => None,
                };
                if let Some(transport) = accepted {
                    match self.setup_connection(transport) {
                        Ok(id) => conn_id = Some(id),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to set up accepted connection")
                        }
                    }
                }
            }
        }

        // Either way the batch may have produced stream events (an accepted
        // transport has already ingested it); drain them, then emit this
        // connection's packets now, while its state is hot.
        if let Some(id) = conn_id {
            self.pump_connection(id);
            self.send(socket, id);
        }
    }

    /// Drain stream events; a protocol error becomes CONNECTION_CLOSE.
    pub(crate) fn pump_connection(&mut self, conn_id: u64) {
        let Some(conn) = self.conns.get_mut(&conn_id) else {
            return;
        };
        if let Err(e) = conn.pump_events(&mut self.callbacks) {
            tracing::debug!(conn_id, code = ?e.wire_code(), "closing connection: {e}");
            conn.transport_mut()
                .close(e.wire_code(), e.to_string().as_bytes());
        }
    }

    /// Drive the transport's send queue until it drains, then re-arm the
    /// connection timer.
    pub fn send<S: DatagramSocket>(&mut self, socket: &mut S, conn_id: u64) {
        loop {
            let Some(conn) = self.conns.get_mut(&conn_id) else {
                return;
            };

            let mut out = Vec::with_capacity(SEND_BATCH);
            match conn.emit_packets(&mut out, SEND_BATCH) {
                Ok(()) => {
                    for datagram in &out {
                        send_datagram(socket, datagram);
                    }
                    if out.len() < SEND_BATCH {
                        break;
                    }
                }
                Err(SendError::FreeConnection) => {
                    self.destroy_connection(conn_id);
                    return;
                }
                Err(SendError::Fatal(e)) => {
                    // An unknown transport send error is a bug, not a peer
                    // we can blame; there is no sane way to continue.
                    tracing::error!(conn_id, error = %e, "transport send failed");
                    std::process::abort();
                }
            }
        }

        self.schedule_timer(conn_id);
    }

    /// Arm the connection timer for the transport's next deadline, skipping
    /// the re-arm when the deadline is unchanged.
    pub(crate) fn schedule_timer(&mut self, conn_id: u64) {
        let Some(conn) = self.conns.get_mut(&conn_id) else {
            return;
        };
        match conn.transport().next_timeout() {
            Some(deadline) => {
                if conn.timer_deadline == Some(deadline) {
                    return;
                }
                conn.timer_deadline = Some(deadline);
                self.timers.arm(deadline, conn_id);
            }
            None => conn.timer_deadline = None,
        }
    }

    /// Fire expired connection timers, re-entering the send loop for each.
    ///
    /// Entries re-armed while firing wait for the next pass.
    pub fn on_timer<S: DatagramSocket>(&mut self, socket: &mut S, now: Instant) {
        let mut due = Vec::new();
        while let Some(entry) = self.timers.pop_due(now) {
            due.push(entry);
        }

        for (deadline, conn_id) in due {
            let Some(conn) = self.conns.get_mut(&conn_id) else {
                continue;
            };
            if conn.timer_deadline != Some(deadline) {
                // Superseded by a later re-arm.
                continue;
            }
            conn.timer_deadline = None;
            self.send(socket, conn_id);
        }
    }

    /// The event loop: wait for socket readability or the next timer
    /// deadline, whichever comes first.
    pub async fn run(&mut self, socket: &mut tokio::net::UdpSocket) -> io::Result<()> {
        loop {
            match self.timers.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        ready = socket.readable() => {
                            ready?;
                            self.on_readable(socket);
                        }
                        _ = tokio::time::sleep_until(deadline.into()) => {
                            self.on_timer(socket, Instant::now());
                        }
                    }
                }
                None => {
                    socket.readable().await?;
                    self.on_readable(socket);
                }
            }
        }
    }
}

fn send_datagram<S: DatagramSocket>(socket: &mut S, datagram: &Datagram) {
    loop {
        match socket.try_send_to(&datagram.data, datagram.to) {
            Ok(_) => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Dropping a datagram is survivable; QUIC retransmits.
                tracing::warn!(error = %e, "sendmsg failed");
                return;
            }
        }
    }
}
