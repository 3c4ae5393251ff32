//! Record storage behind the engines.
//!
//! The sender reads fixed-size records through [`RecordStore`]; the receiver
//! accumulates them through [`RecordSink`] and flushes once — and only once —
//! the transfer is complete. Both are traits so a disk-backed variant can be
//! substituted without touching the engines.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use tracing::info;

use crate::protocol::{record_count, FileHdr};

/// Indexed read access to the records of the file being sent.
///
/// Records are 1-based. Every record reads back exactly `record_size` bytes;
/// the final record is zero-padded past the end of the file.
pub trait RecordStore {
    fn file_size(&self) -> u64;
    fn record_size(&self) -> u16;
    fn total_records(&self) -> u32;
    fn record(&self, index: u32) -> &[u8];
}

/// Whole file held in memory, final record padded to the record boundary.
pub struct MemoryStore {
    data: Vec<u8>,
    file_size: u64,
    record_size: u16,
    total: u32,
}

impl MemoryStore {
    /// Read `path` fully into memory, split into `record_size` records.
    pub fn from_file(path: &Path, record_size: u16) -> io::Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data, record_size))
    }

    pub fn from_bytes(data: Vec<u8>, record_size: u16) -> Self {
        let file_size = data.len() as u64;
        let total = record_count(file_size, record_size);
        let mut data = data;
        data.resize(total as usize * record_size as usize, 0);
        MemoryStore {
            data,
            file_size,
            record_size,
            total,
        }
    }
}

impl RecordStore for MemoryStore {
    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn record_size(&self) -> u16 {
        self.record_size
    }

    fn total_records(&self) -> u32 {
        self.total
    }

    fn record(&self, index: u32) -> &[u8] {
        debug_assert!(index >= 1 && index <= self.total);
        let rs = self.record_size as usize;
        let offset = (index as usize - 1) * rs;
        &self.data[offset..offset + rs]
    }
}

/// Destination for received records.
///
/// `open` allocates from the announced transfer parameters, `put` stores one
/// record, `flush` materialises the file and returns its path. Nothing is
/// visible on disk before `flush`.
pub trait RecordSink {
    fn open(&mut self, hdr: &FileHdr) -> io::Result<()>;
    fn put(&mut self, index: u32, record: &[u8]);
    fn flush(&mut self) -> io::Result<PathBuf>;
}

/// Sink writing to `<base>/<timestamp>/<filename>`, with the timestamp taken
/// at flush time in the local time zone.
pub struct DirSink {
    base: PathBuf,
    state: Option<SinkState>,
}

struct SinkState {
    filename: String,
    file_size: u64,
    record_size: u16,
    buf: Vec<u8>,
}

impl DirSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        DirSink {
            base: base.into(),
            state: None,
        }
    }
}

impl RecordSink for DirSink {
    fn open(&mut self, hdr: &FileHdr) -> io::Result<()> {
        // A name with path components could escape the timestamped directory.
        if !safe_filename(&hdr.filename) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsafe output filename {:?}", hdr.filename),
            ));
        }
        let total = hdr.total_records() as usize;
        self.state = Some(SinkState {
            filename: hdr.filename.clone(),
            file_size: hdr.file_size,
            record_size: hdr.record_size,
            buf: vec![0u8; total * hdr.record_size as usize],
        });
        Ok(())
    }

    fn put(&mut self, index: u32, record: &[u8]) {
        let Some(state) = self.state.as_mut() else {
            debug_assert!(false, "put before open");
            return;
        };
        let rs = state.record_size as usize;
        debug_assert_eq!(record.len(), rs);
        let offset = (index as usize - 1) * rs;
        state.buf[offset..offset + rs].copy_from_slice(record);
    }

    fn flush(&mut self) -> io::Result<PathBuf> {
        let state = self
            .state
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "sink was never opened"))?;
        let dir = self.base.join(timestamp_dir_name(&Local::now()));
        fs::create_dir_all(&dir)?;
        let path = dir.join(&state.filename);
        fs::write(&path, &state.buf[..state.file_size as usize])?;
        info!(path = %path.display(), bytes = state.file_size, "file written");
        Ok(path)
    }
}

/// A filename is safe when it names a plain file inside the output directory.
fn safe_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\\')
}

/// `YYYYMMDD-H:MM-AM|PM`, hour 1-12 without zero padding.
fn timestamp_dir_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    let (pm, hour) = now.hour12();
    format!(
        "{:04}{:02}{:02}-{}:{:02}-{}",
        now.year(),
        now.month(),
        now.day(),
        hour,
        now.minute(),
        if pm { "PM" } else { "AM" }
    )
}
