use std::fmt;

/// The first byte of a unidirectional stream, identifying its HTTP/3 role.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamType(pub u8);

impl StreamType {
    /// The control stream, carrying SETTINGS and other control frames.
    pub const CONTROL: StreamType = StreamType(b'C');
    /// The peer's QPACK encoder stream, feeding our decoder.
    pub const QPACK_ENCODER: StreamType = StreamType(b'H');
    /// The peer's QPACK decoder stream, feeding our encoder.
    pub const QPACK_DECODER: StreamType = StreamType(b'h');
}

impl fmt::Debug for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StreamType::CONTROL => write!(f, "CONTROL"),
            StreamType::QPACK_ENCODER => write!(f, "QPACK_ENCODER"),
            StreamType::QPACK_DECODER => write!(f, "QPACK_DECODER"),
            x => write!(f, "UNKNOWN_STREAM [{:#x}]", x.0),
        }
    }
}
