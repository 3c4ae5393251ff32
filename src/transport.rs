//! Datagram transport bound to a single peer.
//!
//! The engines never touch sockets directly: they see blocking `send` toward
//! a fixed peer and `recv` with an optional deadline that reports either a
//! datagram or a timeout. [`UdpTransport`] is the real thing; [`mem`] offers
//! an in-process loopback pair for deterministic engine tests.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::protocol::MAX_DATAGRAM;

/// Kernel receive buffer requested for the receiving side. A blast arrives
/// back-to-back with no pacing, so the buffer must absorb bursts.
const RECV_BUFFER: usize = 32 * 1024 * 1024;

/// Kernel send buffer requested for the sending side.
const SEND_BUFFER: usize = 4 * 1024 * 1024;

/// Outcome of a receive attempt.
#[derive(Debug)]
pub enum Received {
    /// A datagram of `len` bytes arrived from `from`.
    Datagram { len: usize, from: SocketAddr },
    /// The deadline elapsed with nothing to read.
    TimedOut,
}

/// A datagram endpoint talking to one fixed peer.
pub trait Transport {
    /// Send one datagram to the peer. Hard socket errors are fatal.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`. `None` blocks indefinitely;
    /// `Some(d)` returns [`Received::TimedOut`] once `d` elapses.
    fn recv(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> io::Result<Received>;

    /// Fix the peer address. The receiving side calls this with the source
    /// of the first FILE_HDR it sees.
    fn set_peer(&mut self, peer: SocketAddr);
}

/// UDP-backed transport.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    timeout: Option<Duration>,
}

impl UdpTransport {
    /// Bind a receiving endpoint on `0.0.0.0:port`. The peer is learned from
    /// the first datagram via [`Transport::set_peer`].
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(false)?;
        let _ = socket.set_recv_buffer_size(RECV_BUFFER);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&addr.into())?;
        Ok(UdpTransport {
            socket: socket.into(),
            peer: None,
            timeout: None,
        })
    }

    /// Create a sending endpoint bound to an ephemeral port, directed at
    /// `peer`.
    pub fn connect(peer: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(false)?;
        let _ = socket.set_send_buffer_size(SEND_BUFFER);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        socket.bind(&addr.into())?;
        Ok(UdpTransport {
            socket: socket.into(),
            peer: Some(peer),
            timeout: None,
        })
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn set_timeout(&mut self, deadline: Option<Duration>) -> io::Result<()> {
        if self.timeout != deadline {
            self.socket.set_read_timeout(deadline)?;
            self.timeout = deadline;
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        debug_assert!(frame.len() <= MAX_DATAGRAM);
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "peer address unknown"))?;
        // An unpaced blast can outrun the kernel buffer; back off briefly on
        // ENOBUFS instead of failing the transfer.
        let mut retries = 0;
        loop {
            match self.socket.send_to(frame, peer) {
                Ok(_) => return Ok(()),
                Err(ref e)
                    if retries < 50
                        && (e.kind() == io::ErrorKind::WouldBlock
                            || e.raw_os_error() == Some(105) // ENOBUFS (Linux)
                            || e.raw_os_error() == Some(10055)) => // WSAENOBUFS
                {
                    retries += 1;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> io::Result<Received> {
        self.set_timeout(deadline)?;
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Received::Datagram { len, from }),
            // Windows reports TimedOut where Unix reports WouldBlock
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(Received::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }
}

/// In-process loopback transport for tests and simulations: two endpoints
/// joined by channels, with `recv_timeout` standing in for socket deadlines.
pub mod mem {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

    /// One end of an in-memory datagram pair.
    pub struct MemTransport {
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        local: SocketAddr,
        remote: SocketAddr,
    }

    /// Two connected endpoints. Datagrams are never lost or reordered;
    /// tests inject loss through the sender's loss hook instead.
    pub fn pair() -> (MemTransport, MemTransport) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        let a_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let b_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 2);
        (
            MemTransport {
                tx: b_tx,
                rx: a_rx,
                local: a_addr,
                remote: b_addr,
            },
            MemTransport {
                tx: a_tx,
                rx: b_rx,
                local: b_addr,
                remote: a_addr,
            },
        )
    }

    impl Transport for MemTransport {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            // fire-and-forget, like UDP: a vanished peer is silence, not an error
            let _ = self.tx.send(frame.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8], deadline: Option<Duration>) -> io::Result<Received> {
            let datagram = match deadline {
                Some(d) => match self.rx.recv_timeout(d) {
                    Ok(datagram) => datagram,
                    Err(RecvTimeoutError::Timeout) => return Ok(Received::TimedOut),
                    Err(RecvTimeoutError::Disconnected) => {
                        // emulate a quiet wire once the peer is gone
                        std::thread::sleep(d);
                        return Ok(Received::TimedOut);
                    }
                },
                None => self.rx.recv().map_err(|_| {
                    io::Error::new(io::ErrorKind::ConnectionAborted, "peer endpoint dropped")
                })?,
            };
            let len = datagram.len().min(buf.len());
            buf[..len].copy_from_slice(&datagram[..len]);
            Ok(Received::Datagram {
                len,
                from: self.remote,
            })
        }

        fn set_peer(&mut self, _peer: SocketAddr) {}
    }

    impl MemTransport {
        /// Address the opposite endpoint sees as this one's source.
        pub fn local_addr(&self) -> SocketAddr {
            self.local
        }
    }
}
