use bytes::{Buf, BufMut};
use thiserror::Error;

use super::VarInt;

/// Settings identifier for the QPACK dynamic table size.
///
/// Everything else in a SETTINGS payload is skipped.
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x0001;

/// QPACK dynamic table size used until the peer negotiates otherwise.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    /// A truncated identifier or value; the frame is unusable.
    #[error("malformed settings payload")]
    Malformed,
}

/// The negotiated HTTP/3 settings.
///
/// The payload is a sequence of `u16` identifiers each followed by a varint
/// value, running to the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
        }
    }
}

impl Settings {
    /// Decode a SETTINGS frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, SettingsError> {
        let mut buf = payload;
        let mut settings = Settings::default();

        while buf.has_remaining() {
            if buf.remaining() < 2 {
                return Err(SettingsError::Malformed);
            }
            let id = buf.get_u16();
            let value = VarInt::decode(&mut buf)
                .map_err(|_| SettingsError::Malformed)?
                .into_inner();

            match id {
                SETTINGS_HEADER_TABLE_SIZE => settings.header_table_size = value as u32,
                _ => {}
            }
        }

        Ok(settings)
    }

    /// Encode the payload (identifier/value pairs only, no frame header).
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(SETTINGS_HEADER_TABLE_SIZE);
        VarInt::from_u32(self.header_table_size).encode(buf);
    }
}
