use crate::Error;

/// Reassembly buffer for an ingress unidirectional stream.
///
/// The transport may deliver bytes at arbitrary offsets; they are placed at
/// their absolute position and the parser only ever reads the contiguous
/// prefix the transport has vouched for.
#[derive(Default)]
pub(crate) struct RecvBuf {
    data: Vec<u8>,
}

impl RecvBuf {
    /// Place `src` at `off`, growing as needed.
    ///
    /// Overlapping rewrites of identical bytes are harmless; the logical
    /// size only ever grows.
    pub fn write_at(&mut self, off: u64, src: &[u8]) -> Result<(), Error> {
        let off = off as usize;
        let end = off + src.len();

        if self.data.len() < end {
            self.data
                .try_reserve(end - self.data.len())
                .map_err(|_| Error::NoMemory)?;
            self.data.resize(end, 0);
        }

        self.data[off..end].copy_from_slice(src);
        Ok(())
    }

    /// Everything buffered so far, starting at the consumption point.
    pub fn readable(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Drop `n` parsed bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.data.drain(..n);
    }
}

/// FIFO send buffer for an egress unidirectional stream.
///
/// The transport pulls from it at retransmission offsets and shifts the
/// front as the peer acknowledges.
#[derive(Default)]
pub(crate) struct SendBuf {
    data: Vec<u8>,
}

impl SendBuf {
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.data.try_reserve(bytes.len()).map_err(|_| Error::NoMemory)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Copy into `dst` starting at `off`; returns the bytes written and
    /// whether nothing remains past them.
    pub fn emit(&self, off: usize, dst: &mut [u8]) -> (usize, bool) {
        let available = self.data.len().saturating_sub(off);
        let len = available.min(dst.len());
        dst[..len].copy_from_slice(&self.data[off..off + len]);
        (len, len == available)
    }

    pub fn shift(&mut self, delta: usize) {
        self.data.drain(..delta);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
