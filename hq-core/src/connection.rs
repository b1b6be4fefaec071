use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use hq_proto::{ErrorCode, Frame, FrameError, FrameType, Settings, StreamType};

use crate::qpack::{QpackDecoder, QpackEncoder, QpackPair};
use crate::stream::{ControlStreams, EgressStreams, IngressState, IngressUnistream};
use crate::transport::{Datagram, SendError, StreamEvent, Transport};
use crate::Error;

/// How many request streams the QPACK coders may leave blocked on dynamic
/// table updates.
pub const DEFAULT_MAX_BLOCKED_STREAMS: u32 = 100;

/// The application-facing callbacks vtable.
///
/// One instance serves every connection of a [`crate::Context`]; connections
/// are identified by the master id baked into their CIDs.
pub trait Callbacks {
    /// Construct the QPACK decoder at connection setup.
    fn new_decoder(&mut self, header_table_size: u32, max_blocked: u32) -> Box<dyn QpackDecoder>;

    /// Construct the QPACK encoder once the peer's SETTINGS arrives with the
    /// negotiated table size.
    fn new_encoder(&mut self, header_table_size: u32, max_blocked: u32) -> Box<dyn QpackEncoder>;

    /// A control-stream frame other than SETTINGS.
    ///
    /// Returning an error closes the connection with the error's wire code.
    fn on_control_frame(
        &mut self,
        conn_id: u64,
        typ: FrameType,
        payload: &[u8],
    ) -> Result<(), Error>;

    /// Request streams whose header blocks became decodable after new
    /// encoder-stream input; the HTTP layer should resume them.
    fn on_qpack_unblocked(&mut self, conn_id: u64, streams: &[u64]) {
        let _ = (conn_id, streams);
    }

    /// The connection drained and was removed from the registry.
    fn on_destroy(&mut self, conn_id: u64) {
        let _ = conn_id;
    }
}

/// One HTTP/3 connection: the QUIC handle, the QPACK pair, and the six
/// mandatory unidirectional control streams.
pub struct Connection<T: Transport> {
    pub(crate) transport: T,
    conn_id: u64,
    pub(crate) qpack: QpackPair,
    pub(crate) ingress: HashMap<u64, IngressUnistream>,
    pub(crate) egress: EgressStreams,
    pub(crate) control: ControlStreams,
    pub(crate) timer_deadline: Option<Instant>,
    pub(crate) accept_key: Option<u64>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, decoder: Box<dyn QpackDecoder>) -> Self {
        let conn_id = transport.master_id();
        Self {
            transport,
            conn_id,
            qpack: QpackPair {
                dec: decoder,
                enc: None,
            },
            ingress: HashMap::new(),
            egress: EgressStreams::default(),
            control: ControlStreams::default(),
            timer_deadline: None,
            accept_key: None,
        }
    }

    /// The master id identifying this connection in the registry and in
    /// callbacks.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the peer's SETTINGS frame has been processed.
    pub fn has_received_settings(&self) -> bool {
        self.qpack.enc.is_some()
    }

    /// Queue QPACK header-acknowledgement instructions produced by the coder.
    pub fn send_qpack_header_ack(&mut self, instructions: &[u8]) -> Result<(), Error> {
        self.write_egress(self.control.egress.qpack_encoder, instructions)
    }

    /// Queue a QPACK stream-cancellation instruction produced by the coder.
    pub fn send_qpack_stream_cancel(&mut self, instructions: &[u8]) -> Result<(), Error> {
        self.write_egress(self.control.egress.qpack_decoder, instructions)
    }

    fn write_egress(&mut self, slot: Option<u64>, bytes: &[u8]) -> Result<(), Error> {
        let id = slot.ok_or_else(|| Error::Transport("control streams not open".into()))?;
        let stream = self
            .egress
            .get_mut(id)
            .ok_or_else(|| Error::Transport("egress stream missing".into()))?;
        stream.sendbuf.append(bytes)?;
        self.transport.notify_send(id);
        Ok(())
    }

    /// Open a self-initiated unistream and queue its bootstrap bytes.
    pub(crate) fn open_egress(&mut self, initial: &[u8]) -> Result<u64, Error> {
        let id = self
            .transport
            .open_uni()
            .map_err(|e| Error::Transport(e.to_string()))?;
        let stream = self.egress.insert(id);
        stream.sendbuf.append(initial)?;
        self.transport.notify_send(id);
        Ok(id)
    }

    /// Ask the transport for up to `max` datagrams, pulling stream bytes out
    /// of the egress send buffers.
    pub(crate) fn emit_packets(
        &mut self,
        out: &mut Vec<Datagram>,
        max: usize,
    ) -> Result<(), SendError> {
        self.transport.send(&mut self.egress, out, max)
    }

    /// Drain pending stream events. An error is connection-fatal and must be
    /// turned into a CONNECTION_CLOSE by the caller.
    pub(crate) fn pump_events<C: Callbacks>(&mut self, callbacks: &mut C) -> Result<(), Error> {
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(callbacks, event)?;
        }
        Ok(())
    }

    fn handle_event<C: Callbacks>(
        &mut self,
        callbacks: &mut C,
        event: StreamEvent,
    ) -> Result<(), Error> {
        match event {
            StreamEvent::Opened { id, self_initiated } => {
                self.handle_stream_opened(id, self_initiated);
                Ok(())
            }
            StreamEvent::Received { id, off, data } => {
                self.handle_receive(callbacks, id, off, &data)
            }
            StreamEvent::ReceiveReset { id, code } => {
                if !self.ingress.contains_key(&id) {
                    return Ok(());
                }
                tracing::trace!(stream_id = id, code, "received RESET_STREAM");
                Err(Error::ClosedCriticalStream)
            }
            StreamEvent::SendStopped { id, code } => {
                if self.egress.get(id).is_none() {
                    return Ok(());
                }
                tracing::trace!(stream_id = id, code, "received STOP_SENDING");
                Err(Error::ClosedCriticalStream)
            }
            StreamEvent::Destroyed { id } => {
                self.handle_stream_destroyed(id);
                Ok(())
            }
        }
    }

    fn handle_stream_opened(&mut self, id: u64, self_initiated: bool) {
        if self_initiated {
            self.egress.insert(id);
        } else {
            tracing::trace!(stream_id = id, "peer opened unidirectional stream");
            self.ingress.insert(id, IngressUnistream::new());
        }
    }

    fn handle_stream_destroyed(&mut self, id: u64) {
        self.ingress.remove(&id);
        self.egress.remove(id);
        self.control.ingress.clear(id);
        self.control.egress.clear(id);
    }

    fn handle_receive<C: Callbacks>(
        &mut self,
        callbacks: &mut C,
        id: u64,
        off: u64,
        data: &Bytes,
    ) -> Result<(), Error> {
        let Some(stream) = self.ingress.get_mut(&id) else {
            // Not one of ours; request streams are parsed elsewhere.
            return Ok(());
        };

        stream.recvbuf.write_at(off, data)?;

        // A unidirectional control stream must never end.
        if self.transport.stream_is_finished(id) {
            return Err(Error::ClosedCriticalStream);
        }

        let available = self.transport.stream_readable(id).min(stream.recvbuf.len());
        if available == 0 {
            return Ok(());
        }

        let mut src = &stream.recvbuf.readable()[..available];
        let result = handle_input(
            &mut stream.state,
            id,
            &mut src,
            &mut self.transport,
            &mut self.qpack,
            &mut self.control,
            callbacks,
            self.conn_id,
        );

        let consumed = available - src.len();
        if consumed != 0 {
            stream.recvbuf.consume(consumed);
            self.transport.ack_read(id, consumed);
        }

        result
    }
}

/// Run the ingress state machine over the contiguous prefix, advancing `src`
/// past every byte it consumed.
#[allow(clippy::too_many_arguments)]
fn handle_input<T: Transport, C: Callbacks>(
    state: &mut IngressState,
    stream_id: u64,
    src: &mut &[u8],
    transport: &mut T,
    qpack: &mut QpackPair,
    control: &mut ControlStreams,
    callbacks: &mut C,
    conn_id: u64,
) -> Result<(), Error> {
    loop {
        match *state {
            IngressState::UnknownType => {
                let Some((&typ, rest)) = src.split_first() else {
                    // A sender may open a unistream and immediately close it.
                    return Ok(());
                };
                *src = rest;

                match StreamType(typ) {
                    StreamType::CONTROL => {
                        control.ingress.control = Some(stream_id);
                        *state = IngressState::Control;
                    }
                    StreamType::QPACK_ENCODER => {
                        control.ingress.qpack_encoder = Some(stream_id);
                        *state = IngressState::QpackEncoderFeed;
                    }
                    StreamType::QPACK_DECODER => {
                        control.ingress.qpack_decoder = Some(stream_id);
                        *state = IngressState::QpackDecoderFeed;
                    }
                    other => {
                        tracing::debug!(
                            stream_id,
                            typ = ?other,
                            "stopping unknown unidirectional stream"
                        );
                        transport.request_stop(stream_id, ErrorCode::UNKNOWN_STREAM_TYPE);
                        *state = IngressState::Discard;
                    }
                }
                // Re-enter with the chosen handler on the remaining bytes.
            }
            IngressState::Discard => {
                *src = &[];
                return Ok(());
            }
            IngressState::Control => return handle_control(src, qpack, callbacks, conn_id),
            IngressState::QpackEncoderFeed => {
                if src.is_empty() {
                    return Ok(());
                }
                let unblocked = qpack.dec.handle_input(src)?;
                *src = &[];
                if !unblocked.is_empty() {
                    callbacks.on_qpack_unblocked(conn_id, &unblocked);
                }
                return Ok(());
            }
            IngressState::QpackDecoderFeed => {
                // Nothing to feed until the peer's SETTINGS instantiates the
                // encoder; the bytes stay buffered until then.
                let Some(enc) = qpack.enc.as_mut() else {
                    return Ok(());
                };
                if src.is_empty() {
                    return Ok(());
                }
                enc.handle_input(src)?;
                *src = &[];
                return Ok(());
            }
        }
    }
}

fn handle_control<C: Callbacks>(
    src: &mut &[u8],
    qpack: &mut QpackPair,
    callbacks: &mut C,
    conn_id: u64,
) -> Result<(), Error> {
    loop {
        let frame = match Frame::read(src) {
            Ok(frame) => frame,
            Err(FrameError::Incomplete) => return Ok(()),
            Err(FrameError::TooLarge(typ)) => return Err(Error::MalformedFrame(typ)),
        };

        // SETTINGS must be the first frame and must not recur; DATA never
        // belongs on this stream.
        let has_settings = qpack.enc.is_some();
        if has_settings == (frame.typ == FrameType::SETTINGS) || frame.typ == FrameType::DATA {
            return Err(Error::MalformedFrame(frame.typ));
        }

        if frame.typ == FrameType::SETTINGS {
            handle_settings(qpack, callbacks, frame.payload.unwrap_or_default())?;
        } else {
            callbacks.on_control_frame(conn_id, frame.typ, frame.payload.unwrap_or_default())?;
        }
    }
}

fn handle_settings<C: Callbacks>(
    qpack: &mut QpackPair,
    callbacks: &mut C,
    payload: &[u8],
) -> Result<(), Error> {
    debug_assert!(qpack.enc.is_none());

    let settings =
        Settings::decode(payload).map_err(|_| Error::MalformedFrame(FrameType::SETTINGS))?;

    tracing::debug!(
        header_table_size = settings.header_table_size,
        "received SETTINGS"
    );
    qpack.enc = Some(callbacks.new_encoder(
        settings.header_table_size,
        DEFAULT_MAX_BLOCKED_STREAMS,
    ));
    Ok(())
}
