//! Sender engine: drives the handshake, the per-blast transmit / negative-ack
//! cycle, and the final disconnect.
//!
//! The engine is a single-threaded loop over an explicit state enum. Each
//! step sends what the state demands, performs at most one deadline-bounded
//! receive, and returns the next state. Timeouts and malformed datagrams are
//! transient: they burn one attempt and the turn is retried, up to the
//! configured cap.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::protocol::{
    records_per_frame, DataFrame, FileHdr, Frame, Segment, DEFAULT_BLAST_SIZE, HANDSHAKE_TIMEOUT,
    MAX_DATAGRAM, MAX_RETRIES, REPLY_TIMEOUT,
};
use crate::stats::TransferStats;
use crate::store::RecordStore;
use crate::transport::{Received, Transport};

/// Injected loss predicate, consulted before every DATA send. Returning true
/// suppresses the datagram. This is the only place the hook participates.
pub type LossHook = Box<dyn FnMut() -> bool + Send>;

/// Sender-side transfer parameters.
pub struct SenderConfig {
    /// Short name announced to the receiver (no path components).
    pub filename: String,
    /// Records per blast.
    pub blast_size: u32,
    /// Per-attempt wait for FILE_HDR_ACK.
    pub handshake_timeout: Duration,
    /// Per-attempt wait for REC_MISS.
    pub reply_timeout: Duration,
    /// Consecutive failed attempts tolerated on either wait.
    pub max_retries: u32,
}

impl SenderConfig {
    pub fn new(filename: impl Into<String>) -> Self {
        SenderConfig {
            filename: filename.into(),
            blast_size: DEFAULT_BLAST_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            reply_timeout: REPLY_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

/// Fatal sender errors.
#[derive(Debug)]
pub enum SendError {
    /// Hard socket failure.
    Io(io::Error),
    /// No FILE_HDR_ACK after the configured attempts.
    HandshakeFailed,
    /// No REC_MISS after the configured attempts mid-transfer.
    PeerUnresponsive,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Io(e) => write!(f, "transport error: {}", e),
            SendError::HandshakeFailed => write!(f, "handshake_failed: no FILE_HDR_ACK from peer"),
            SendError::PeerUnresponsive => write!(f, "peer_unresponsive: no REC_MISS from peer"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

enum State {
    Handshake { attempt: u32 },
    Blast { start: u32 },
    BlastOver { start: u32, end: u32, attempt: u32 },
    Recover { start: u32, end: u32, missing: Vec<Segment> },
    Disconnect,
    Done,
}

/// The sender endpoint of one transfer.
pub struct Sender<T: Transport, S: RecordStore> {
    transport: T,
    store: S,
    config: SenderConfig,
    loss: Option<LossHook>,
    stats: TransferStats,
    total: u32,
    recv_buf: Vec<u8>,
}

impl<T: Transport, S: RecordStore> Sender<T, S> {
    pub fn new(transport: T, store: S, config: SenderConfig) -> Self {
        debug_assert!(config.blast_size >= 1);
        let total = store.total_records();
        Sender {
            transport,
            store,
            config,
            loss: None,
            stats: TransferStats::default(),
            total,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Install a loss predicate (the CLI garbler, or a deterministic test
    /// pattern).
    pub fn with_loss_hook(mut self, hook: LossHook) -> Self {
        self.loss = Some(hook);
        self
    }

    /// Run the transfer to completion. Consumes the sender; the socket is
    /// released on every exit path.
    pub fn run(mut self) -> Result<TransferStats, SendError> {
        let started = Instant::now();
        info!(
            file_size = self.store.file_size(),
            record_size = self.store.record_size(),
            total_records = self.total,
            blast_size = self.config.blast_size,
            "starting transfer"
        );

        let mut state = State::Handshake { attempt: 0 };
        loop {
            state = match state {
                State::Handshake { attempt } => self.handshake(attempt)?,
                State::Blast { start } => self.blast(start)?,
                State::BlastOver { start, end, attempt } => self.blast_over(start, end, attempt)?,
                State::Recover { start, end, missing } => self.recover(start, end, missing)?,
                State::Disconnect => {
                    self.send_control(&Frame::Disconnect)?;
                    info!("sent DISCONNECT");
                    State::Done
                }
                State::Done => break,
            };
        }

        self.stats.bytes_total = self.store.file_size();
        self.stats.elapsed = started.elapsed();
        info!(
            elapsed_ms = self.stats.elapsed.as_millis() as u64,
            throughput_mbps = self.stats.throughput_mbps(),
            "transfer complete"
        );
        Ok(self.stats)
    }

    fn handshake(&mut self, attempt: u32) -> Result<State, SendError> {
        if attempt >= self.config.max_retries {
            return Err(SendError::HandshakeFailed);
        }
        let hdr = Frame::FileHdr(FileHdr {
            file_size: self.store.file_size(),
            record_size: self.store.record_size(),
            blast_size: self.config.blast_size,
            filename: self.config.filename.clone(),
        });
        self.send_control(&hdr)?;
        match self.recv_frame(Some(self.config.handshake_timeout))? {
            Some(Frame::FileHdrAck) => {
                info!("received FILE_HDR_ACK, connection established");
                Ok(State::Blast { start: 1 })
            }
            other => {
                debug!(attempt, got = other.is_some(), "no FILE_HDR_ACK yet, retrying");
                Ok(State::Handshake { attempt: attempt + 1 })
            }
        }
    }

    fn blast(&mut self, start: u32) -> Result<State, SendError> {
        if start > self.total {
            return Ok(State::Disconnect);
        }
        let end = (start + self.config.blast_size - 1).min(self.total);
        self.stats.blasts += 1;
        info!(start, end, "sending blast");
        self.send_records(start, end, false)?;
        Ok(State::BlastOver { start, end, attempt: 0 })
    }

    fn blast_over(&mut self, start: u32, end: u32, attempt: u32) -> Result<State, SendError> {
        if attempt >= self.config.max_retries {
            return Err(SendError::PeerUnresponsive);
        }
        self.send_control(&Frame::IsBlastOver { start, end })?;
        match self.recv_frame(Some(self.config.reply_timeout))? {
            Some(Frame::RecMiss(missing)) => {
                if missing.is_empty() {
                    debug!(start, end, "blast complete");
                    Ok(State::Blast { start: end + 1 })
                } else {
                    info!(start, end, segments = missing.len(), "peer reported missing records");
                    Ok(State::Recover { start, end, missing })
                }
            }
            other => {
                debug!(attempt, got = other.is_some(), "no REC_MISS yet, retrying");
                Ok(State::BlastOver { start, end, attempt: attempt + 1 })
            }
        }
    }

    fn recover(&mut self, start: u32, end: u32, missing: Vec<Segment>) -> Result<State, SendError> {
        for seg in missing {
            // never trust wire-supplied indices past the record store
            let s = seg.start.max(1);
            let e = seg.end.min(self.total);
            if s > e {
                continue;
            }
            self.send_records(s, e, true)?;
        }
        Ok(State::BlastOver { start, end, attempt: 0 })
    }

    /// Emit DATA frames covering `start..=end`, grouped into contiguous
    /// sub-ranges of up to 16 records, back-to-back with no pacing.
    fn send_records(&mut self, start: u32, end: u32, retransmit: bool) -> Result<(), SendError> {
        let rs = self.store.record_size() as usize;
        let per_frame = records_per_frame(self.store.record_size());
        let mut s = start;
        while s <= end {
            let e = (s + per_frame - 1).min(end);
            let mut payload = Vec::with_capacity((e - s + 1) as usize * rs);
            for index in s..=e {
                payload.extend_from_slice(self.store.record(index));
            }
            let frame = Frame::Data(DataFrame {
                segments: vec![Segment::new(s, e)],
                payload,
            });
            self.send_data(&frame, retransmit)?;
            s = e + 1;
        }
        Ok(())
    }

    fn send_data(&mut self, frame: &Frame, retransmit: bool) -> Result<(), SendError> {
        if let Some(hook) = self.loss.as_mut() {
            if hook() {
                self.stats.packets_dropped += 1;
                debug!("loss hook suppressed a DATA frame");
                return Ok(());
            }
        }
        self.transport.send(&frame.encode()).map_err(SendError::Io)?;
        self.stats.packets_sent += 1;
        self.stats.data_packets_sent += 1;
        if retransmit {
            self.stats.retransmits += 1;
        }
        Ok(())
    }

    fn send_control(&mut self, frame: &Frame) -> Result<(), SendError> {
        self.transport.send(&frame.encode()).map_err(SendError::Io)?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// One deadline-bounded receive. Timeouts and undecodable datagrams both
    /// come back as `None` — either way the caller's attempt is spent.
    fn recv_frame(&mut self, deadline: Option<Duration>) -> Result<Option<Frame>, SendError> {
        match self
            .transport
            .recv(&mut self.recv_buf, deadline)
            .map_err(SendError::Io)?
        {
            Received::TimedOut => Ok(None),
            Received::Datagram { len, .. } => {
                match Frame::decode(&self.recv_buf[..len], self.store.record_size()) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(e) => {
                        warn!(error = %e, len, "dropping malformed datagram");
                        Ok(None)
                    }
                }
            }
        }
    }
}
