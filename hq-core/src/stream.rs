use std::collections::HashMap;

use crate::buffer::{RecvBuf, SendBuf};
use crate::transport::EgressSource;

/// Parser state of a peer-opened unidirectional stream.
///
/// Every ingress stream starts in `UnknownType`; the first byte selects the
/// handler for the rest of the stream's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IngressState {
    UnknownType,
    Discard,
    Control,
    QpackEncoderFeed,
    QpackDecoderFeed,
}

pub(crate) struct IngressUnistream {
    pub recvbuf: RecvBuf,
    pub state: IngressState,
}

impl IngressUnistream {
    pub fn new() -> Self {
        Self {
            recvbuf: RecvBuf::default(),
            state: IngressState::UnknownType,
        }
    }
}

pub(crate) struct EgressUnistream {
    pub sendbuf: SendBuf,
}

impl EgressUnistream {
    pub fn new() -> Self {
        Self {
            sendbuf: SendBuf::default(),
        }
    }
}

/// The self-initiated unidirectional streams, keyed by QUIC stream id.
///
/// Doubles as the transport's pull source when building packets.
#[derive(Default)]
pub(crate) struct EgressStreams {
    streams: HashMap<u64, EgressUnistream>,
}

impl EgressStreams {
    pub fn insert(&mut self, id: u64) -> &mut EgressUnistream {
        self.streams.entry(id).or_insert_with(EgressUnistream::new)
    }

    pub fn remove(&mut self, id: u64) {
        self.streams.remove(&id);
    }

    pub fn get(&self, id: u64) -> Option<&EgressUnistream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut EgressUnistream> {
        self.streams.get_mut(&id)
    }
}

impl EgressSource for EgressStreams {
    fn emit(&mut self, id: u64, off: usize, dst: &mut [u8]) -> (usize, bool) {
        match self.streams.get(&id) {
            Some(stream) => stream.sendbuf.emit(off, dst),
            None => {
                tracing::warn!(stream_id = id, "emit for unknown egress stream");
                (0, true)
            }
        }
    }

    fn shift(&mut self, id: u64, delta: usize) {
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.sendbuf.shift(delta);
        }
    }
}

/// Stream-id slots for the six mandatory control streams.
#[derive(Default, Debug, Clone, Copy)]
pub(crate) struct ControlStreamIds {
    pub control: Option<u64>,
    pub qpack_encoder: Option<u64>,
    pub qpack_decoder: Option<u64>,
}

impl ControlStreamIds {
    pub fn clear(&mut self, id: u64) {
        for slot in [
            &mut self.control,
            &mut self.qpack_encoder,
            &mut self.qpack_decoder,
        ] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct ControlStreams {
    pub ingress: ControlStreamIds,
    pub egress: ControlStreamIds,
}
