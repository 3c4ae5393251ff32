//! `blast-transfer` — reliable blast-oriented file transfer over UDP.
//!
//! A sender splits a file into fixed-size records and pushes them in bounded
//! "blasts"; the receiver tracks arrivals in a bitmap and answers each
//! IS_BLAST_OVER query with the missing record ranges, which the sender
//! repairs until the blast is clean. Loss, duplication, and reordering are
//! all tolerated; lost control frames are survived by retries on one side
//! and a linger window on the other.
//!
//! ```text
//!  ┌──────────┐  DATA blasts (≤ M records)   ┌──────────┐
//!  │  Sender  │─────────────────────────────▶│ Receiver │
//!  │          │  IS_BLAST_OVER(s,e)          │          │
//!  │          │─────────────────────────────▶│  bitmap  │
//!  │          │◀─────────────────────────────│          │
//!  └────┬─────┘  REC_MISS(missing ranges)    └─────┬────┘
//!       │ raw UDP datagrams                        │
//!  ┌────▼────────────────────────────────────────▼────┐
//!  │   Transport (single-peer send / recv-with-deadline)│
//!  └───────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`protocol`]  — wire format and protocol constants (pure, no I/O)
//! - [`bitmap`]    — received-record bitmap and missing-range condenser
//! - [`transport`] — single-peer datagram endpoint (UDP or in-memory)
//! - [`store`]     — record source and sink interfaces around file I/O
//! - [`sender`]    — sender state machine
//! - [`receiver`]  — receiver state machine
//! - [`stats`]     — transfer accounting

pub mod bitmap;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod store;
pub mod transport;

pub use bitmap::RecordBitmap;
pub use protocol::{DecodeError, FileHdr, Frame, Segment};
pub use receiver::{Receiver, ReceiverConfig, RecvError, RecvResult};
pub use sender::{LossHook, SendError, Sender, SenderConfig};
pub use stats::TransferStats;
pub use store::{DirSink, MemoryStore, RecordSink, RecordStore};
pub use transport::{Received, Transport, UdpTransport};
