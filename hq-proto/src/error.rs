use std::fmt;

use super::FrameType;

/// An HTTP/3 application error code, as carried in CONNECTION_CLOSE,
/// RESET_STREAM, and STOP_SENDING frames.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u64);

macro_rules! error_codes {
    {$($name:ident = $val:expr,)*} => {
        impl ErrorCode {
            $(pub const $name: ErrorCode = ErrorCode($val);)*
        }
    }
}

error_codes! {
    STOPPING = 0x00,
    NO_ERROR = 0x01,
    PUSH_REFUSED = 0x02,
    INTERNAL_ERROR = 0x03,
    PUSH_ALREADY_IN_CACHE = 0x04,
    REQUEST_CANCELLED = 0x05,
    INCOMPLETE_REQUEST = 0x06,
    CONNECT_ERROR = 0x07,
    EXCESSIVE_LOAD = 0x08,
    VERSION_FALLBACK = 0x09,
    WRONG_STREAM = 0x0a,
    LIMIT_EXCEEDED = 0x0b,
    DUPLICATE_PUSH = 0x0c,
    UNKNOWN_STREAM_TYPE = 0x0d,
    WRONG_STREAM_COUNT = 0x0e,
    CLOSED_CRITICAL_STREAM = 0x0f,
    WRONG_STREAM_DIRECTION = 0x10,
    EARLY_RESPONSE = 0x11,
    MISSING_SETTINGS = 0x12,
    UNEXPECTED_FRAME = 0x13,
    REQUEST_REJECTED = 0x14,
    GENERAL_PROTOCOL_ERROR = 0xff,
    QPACK_DECOMPRESSION_FAILED = 0x200,
    QPACK_ENCODER_STREAM_ERROR = 0x201,
    QPACK_DECODER_STREAM_ERROR = 0x202,
}

impl ErrorCode {
    /// The per-frame-type MALFORMED_FRAME code, `0x100 + type`.
    pub const fn malformed_frame(typ: FrameType) -> ErrorCode {
        ErrorCode(0x100 + typ.0 as u64)
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrorCode::UNKNOWN_STREAM_TYPE => write!(f, "UNKNOWN_STREAM_TYPE"),
            ErrorCode::CLOSED_CRITICAL_STREAM => write!(f, "CLOSED_CRITICAL_STREAM"),
            ErrorCode::MISSING_SETTINGS => write!(f, "MISSING_SETTINGS"),
            ErrorCode::GENERAL_PROTOCOL_ERROR => write!(f, "GENERAL_PROTOCOL_ERROR"),
            ErrorCode(x) if (0x100..0x200).contains(&x) => {
                write!(f, "MALFORMED_FRAME [{:?}]", FrameType((x - 0x100) as u8))
            }
            x => write!(f, "ERROR [{:#x}]", x.0),
        }
    }
}
