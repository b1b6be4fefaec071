use std::io;
use std::net::SocketAddr;

/// The UDP socket surface the datagram pump drives.
///
/// Both operations are non-blocking: `WouldBlock` means the socket is
/// drained (or full), `Interrupted` is retried by the pump. The pump runs on
/// readiness from [`tokio::net::UdpSocket::readable`].
pub trait DatagramSocket {
    /// Receive one datagram into `buf`, returning its length and sender.
    /// Datagrams longer than `buf` are truncated, as usual for UDP.
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram to `to`.
    fn try_send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for tokio::net::UdpSocket {
    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        tokio::net::UdpSocket::try_recv_from(self, buf)
    }

    fn try_send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        tokio::net::UdpSocket::try_send_to(self, buf, to)
    }
}
