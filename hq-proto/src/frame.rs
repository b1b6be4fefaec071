use std::fmt;

use thiserror::Error;

use super::{VarInt, MAX_FRAME_SIZE};

/// An HTTP/3 frame type.
///
/// Frames on the wire are a varint length, a one-byte type, then the payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(pub u8);

macro_rules! frame_types {
    {$($name:ident = $val:expr,)*} => {
        impl FrameType {
            $(pub const $name: FrameType = FrameType($val);)*
        }
    }
}

frame_types! {
    DATA = 0x00,
    HEADERS = 0x01,
    PRIORITY = 0x02,
    CANCEL_PUSH = 0x03,
    SETTINGS = 0x04,
    PUSH_PROMISE = 0x05,
    GOAWAY = 0x07,
    MAX_PUSH_ID = 0x0d,
    DUPLICATE_PUSH = 0x0e,
}

impl fmt::Debug for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FrameType::DATA => write!(f, "DATA"),
            FrameType::HEADERS => write!(f, "HEADERS"),
            FrameType::PRIORITY => write!(f, "PRIORITY"),
            FrameType::CANCEL_PUSH => write!(f, "CANCEL_PUSH"),
            FrameType::SETTINGS => write!(f, "SETTINGS"),
            FrameType::PUSH_PROMISE => write!(f, "PUSH_PROMISE"),
            FrameType::GOAWAY => write!(f, "GOAWAY"),
            FrameType::MAX_PUSH_ID => write!(f, "MAX_PUSH_ID"),
            FrameType::DUPLICATE_PUSH => write!(f, "DUPLICATE_PUSH"),
            x => write!(f, "UNKNOWN_FRAME [{:#x}]", x.0),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; try again once more arrive.
    ///
    /// Never surfaced to the peer.
    #[error("incomplete frame")]
    Incomplete,

    /// A non-DATA frame announced a payload of MAX_FRAME_SIZE or more.
    #[error("frame too large (type {0:?})")]
    TooLarge(FrameType),
}

/// One parsed HTTP/3 frame, borrowing its payload from the input.
///
/// DATA frames are streamed: `payload` is `None` and the cursor stops after
/// the header, so callers can hand the body through without buffering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub typ: FrameType,
    pub length: u64,
    pub payload: Option<&'a [u8]>,
    pub header_size: u8,
}

impl<'a> Frame<'a> {
    /// Parse one frame, advancing `src` past it on success.
    ///
    /// On any error the cursor is left untouched, so a caller waiting for
    /// more bytes can simply retry with a longer slice.
    pub fn read(src: &mut &'a [u8]) -> Result<Frame<'a>, FrameError> {
        let mut buf = *src;

        let length = VarInt::decode(&mut buf)
            .map_err(|_| FrameError::Incomplete)?
            .into_inner();

        let Some((&typ, rest)) = buf.split_first() else {
            return Err(FrameError::Incomplete);
        };
        let typ = FrameType(typ);
        let mut buf = rest;
        let header_size = (src.len() - buf.len()) as u8;

        let payload = if typ != FrameType::DATA {
            if length >= MAX_FRAME_SIZE as u64 {
                return Err(FrameError::TooLarge(typ));
            }
            let length = length as usize;
            if buf.len() < length {
                return Err(FrameError::Incomplete);
            }
            let (payload, rest) = buf.split_at(length);
            buf = rest;
            Some(payload)
        } else {
            None
        };

        *src = buf;
        Ok(Frame {
            typ,
            length,
            payload,
            header_size,
        })
    }
}
