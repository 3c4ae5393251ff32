//! Receiver engine: handshake, blast absorption, negative-ack replies,
//! linger, and the final flush.
//!
//! Mirror of the sender: one explicit state enum, one blocking receive per
//! step. The engine answers rather than initiates — every REC_MISS is a
//! response to an IS_BLAST_OVER query, computed fresh from the bitmap.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bitmap::RecordBitmap;
use crate::protocol::{DataFrame, FileHdr, Frame, LINGER_TIME, MAX_DATAGRAM, RECV_POLL};
use crate::store::RecordSink;
use crate::transport::{Received, Transport};

/// Receiver-side tunables. Protocol defaults apply; tests shorten them.
pub struct ReceiverConfig {
    /// Post-completion window during which IS_BLAST_OVER is still answered.
    pub linger: Duration,
    /// Poll interval for the streaming and linger receive loops.
    pub poll: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            linger: LINGER_TIME,
            poll: RECV_POLL,
        }
    }
}

/// Fatal receiver errors.
#[derive(Debug)]
pub enum RecvError {
    /// Hard socket or sink failure.
    Io(io::Error),
    /// Records were still missing when the transfer ended.
    IncompleteTransfer { missing: u32 },
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvError::Io(e) => write!(f, "transport error: {}", e),
            RecvError::IncompleteTransfer { missing } => {
                write!(f, "incomplete_transfer: {} records never arrived", missing)
            }
        }
    }
}

impl std::error::Error for RecvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecvError::Io(e) => Some(e),
            RecvError::IncompleteTransfer { .. } => None,
        }
    }
}

/// Outcome of a completed receive.
#[derive(Debug)]
pub struct RecvResult {
    /// Where the file was flushed.
    pub path: PathBuf,
    pub file_size: u64,
    pub total_records: u32,
    pub elapsed: Duration,
}

/// Per-transfer state established by the handshake.
struct Session {
    hdr: FileHdr,
    total: u32,
    bitmap: RecordBitmap,
}

enum State {
    WaitHdr,
    Streaming(Session),
    Linger(Session, Instant),
    Flush(Session),
}

/// The receiver endpoint of one transfer.
pub struct Receiver<T: Transport, K: RecordSink> {
    transport: T,
    sink: K,
    config: ReceiverConfig,
    recv_buf: Vec<u8>,
}

impl<T: Transport, K: RecordSink> Receiver<T, K> {
    pub fn new(transport: T, sink: K, config: ReceiverConfig) -> Self {
        Receiver {
            transport,
            sink,
            config,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Run until the transfer completes. Consumes the receiver; the socket is
    /// released on every exit path.
    pub fn run(mut self) -> Result<RecvResult, RecvError> {
        let started = Instant::now();
        let mut state = State::WaitHdr;
        loop {
            state = match state {
                State::WaitHdr => self.wait_hdr()?,
                State::Streaming(session) => self.stream(session)?,
                State::Linger(session, since) => self.linger(session, since)?,
                State::Flush(session) => {
                    if !session.bitmap.is_complete() {
                        return Err(RecvError::IncompleteTransfer {
                            missing: session.total - session.bitmap.received(),
                        });
                    }
                    let path = self.sink.flush().map_err(RecvError::Io)?;
                    info!(path = %path.display(), "transfer complete");
                    return Ok(RecvResult {
                        path,
                        file_size: session.hdr.file_size,
                        total_records: session.total,
                        elapsed: started.elapsed(),
                    });
                }
            };
        }
    }

    /// Block until a FILE_HDR arrives, size the session from it, and ACK.
    fn wait_hdr(&mut self) -> Result<State, RecvError> {
        loop {
            // the record size is unknown until the header arrives
            let Some((frame, from)) = self.recv_frame(None, 0)? else {
                continue;
            };
            let Frame::FileHdr(hdr) = frame else {
                debug!("ignoring pre-handshake datagram");
                continue;
            };
            if hdr.record_size == 0 {
                warn!(peer = %from, "dropping FILE_HDR with zero record size");
                continue;
            }
            let total = hdr.total_records();
            info!(
                filename = %hdr.filename,
                file_size = hdr.file_size,
                record_size = hdr.record_size,
                blast_size = hdr.blast_size,
                total_records = total,
                peer = %from,
                "received FILE_HDR"
            );
            self.transport.set_peer(from);
            self.sink.open(&hdr).map_err(RecvError::Io)?;
            self.send(&Frame::FileHdrAck)?;
            return Ok(State::Streaming(Session {
                hdr,
                total,
                bitmap: RecordBitmap::new(total),
            }));
        }
    }

    /// Absorb blasts and answer queries until completion is detected.
    fn stream(&mut self, mut session: Session) -> Result<State, RecvError> {
        loop {
            let record_size = session.hdr.record_size;
            let Some((frame, _)) = self.recv_frame(Some(self.config.poll), record_size)? else {
                continue;
            };
            match frame {
                Frame::Data(data) => self.absorb(&mut session, &data),
                Frame::FileHdr(_) => {
                    // retransmitted handshake: re-ACK, keep the session
                    debug!("FILE_HDR retransmission, re-sending ACK");
                    self.send(&Frame::FileHdrAck)?;
                }
                Frame::IsBlastOver { start, end } => {
                    let missing = session.bitmap.missing_in(start, end);
                    let complete = missing.is_empty();
                    debug!(start, end, missing = missing.len(), "answering IS_BLAST_OVER");
                    self.send(&Frame::RecMiss(missing))?;
                    if complete && end >= session.total {
                        info!("all records received, entering linger");
                        return Ok(State::Linger(session, Instant::now()));
                    }
                }
                Frame::Disconnect => {
                    info!("received DISCONNECT, entering linger");
                    return Ok(State::Linger(session, Instant::now()));
                }
                Frame::FileHdrAck | Frame::RecMiss(_) => {
                    debug!("ignoring unexpected control frame");
                }
            }
        }
    }

    /// Keep answering IS_BLAST_OVER for the linger window, so a sender whose
    /// final REC_MISS was lost can still confirm completion.
    fn linger(&mut self, session: Session, since: Instant) -> Result<State, RecvError> {
        loop {
            let Some(remaining) = self.config.linger.checked_sub(since.elapsed()) else {
                return Ok(State::Flush(session));
            };
            let deadline = remaining.min(self.config.poll);
            let Some((frame, _)) = self.recv_frame(Some(deadline), session.hdr.record_size)? else {
                continue;
            };
            if let Frame::IsBlastOver { start, end } = frame {
                let missing = session.bitmap.missing_in(start, end);
                debug!(start, end, missing = missing.len(), "answering IS_BLAST_OVER from linger");
                self.send(&Frame::RecMiss(missing))?;
            }
        }
    }

    /// Walk a DATA frame's segments in order, consuming one record-size slice
    /// per covered index. Out-of-range indices are discarded; duplicates
    /// overwrite in place.
    fn absorb(&mut self, session: &mut Session, data: &DataFrame) {
        let rs = session.hdr.record_size as usize;
        let mut offset = 0;
        for seg in &data.segments {
            for index in seg.start..=seg.end {
                let record = &data.payload[offset..offset + rs];
                offset += rs;
                if index >= 1 && index <= session.total {
                    self.sink.put(index, record);
                    session.bitmap.set(index);
                } else {
                    debug!(index, "discarding out-of-range record");
                }
            }
        }
    }

    fn send(&mut self, frame: &Frame) -> Result<(), RecvError> {
        self.transport.send(&frame.encode()).map_err(RecvError::Io)
    }

    /// One receive with the given deadline. `None` means timeout or an
    /// undecodable datagram; both are transient.
    fn recv_frame(
        &mut self,
        deadline: Option<Duration>,
        record_size: u16,
    ) -> Result<Option<(Frame, SocketAddr)>, RecvError> {
        match self
            .transport
            .recv(&mut self.recv_buf, deadline)
            .map_err(RecvError::Io)?
        {
            Received::TimedOut => Ok(None),
            Received::Datagram { len, from } => {
                match Frame::decode(&self.recv_buf[..len], record_size) {
                    Ok(frame) => Ok(Some((frame, from))),
                    Err(e) => {
                        warn!(error = %e, len, "dropping malformed datagram");
                        Ok(None)
                    }
                }
            }
        }
    }
}
