//! Value log implementation.
//!
//! Values live in a single append-only file. SSTables only store the offset and length
//! of each value, so compaction never rewrites value bytes.
//!
//! ## Architecture
//!
//! - **Record Format**: start marker, CRC32 checksum, key, length, value
//! - **Cursors**: `[tail, head)` is the live region; bytes below `tail` were reclaimed
//! - **Recovery**: on open the tail is rediscovered by scanning for a valid record
//! - **Garbage Collection**: the owner re-inserts live values, then the scanned span
//!   is punched out of the file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wisckv::vlog::ValueLog;
//!
//! # fn main() -> Result<(), wisckv::Error> {
//! let mut vlog = ValueLog::open("values.vlog", 1000, true)?;
//! let offset = vlog.append(1, b"value1")?;
//! vlog.flush()?;
//! assert_eq!(vlog.get(offset, 6)?, b"value1");
//! # Ok(())
//! # }
//! ```

pub mod record;

pub use record::{RecordHeader, VLogRecord, RECORD_HEADER_SIZE, START_MARKER};

use crate::error::{Error, Result};
use crate::types::{Key, Value};
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// Append-only value store addressed by byte offset
pub struct ValueLog {
    /// Path to the log file
    path: PathBuf,
    /// Buffered append handle
    writer: BufWriter<File>,
    /// Separate handle for reads and hole punching, with its own file position
    file: File,
    /// Offset of the oldest live record
    tail: u64,
    /// Offset where the next record is appended
    head: u64,
    /// Bytes returned by the last `gc_candidates` call, awaiting reclaim
    pending_gc: u64,
    /// Step used by tail recovery
    scan_chunk: usize,
    /// fsync on flush
    sync: bool,
}

impl ValueLog {
    /// Open or create the log at `path` and recover its cursors
    pub fn open<P: AsRef<Path>>(path: P, scan_chunk: usize, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (writer, file) = Self::open_handles(&path)?;
        let mut vlog = Self {
            path,
            writer,
            file,
            tail: 0,
            head: 0,
            pending_gc: 0,
            scan_chunk: scan_chunk.max(1),
            sync,
        };
        vlog.initialize()?;
        Ok(vlog)
    }

    fn open_handles(path: &Path) -> Result<(BufWriter<File>, File)> {
        let append = OpenOptions::new().create(true).append(true).open(path)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok((BufWriter::new(append), file))
    }

    /// Establish `head` at the end of the file and search for the first valid record
    fn initialize(&mut self) -> Result<()> {
        let len = self.file.metadata()?.len();
        self.head = len;
        self.pending_gc = 0;

        if len == 0 {
            self.tail = 0;
            return Ok(());
        }

        let hint = first_data_offset(&self.file, len)?;
        self.tail = self.scan_for_tail(hint, len)?;
        if self.tail == len {
            warn!("Value log {} holds no valid record", self.path.display());
        }
        info!(
            "Value log {} recovered: tail={}, head={} (hint {})",
            self.path.display(),
            self.tail,
            self.head,
            hint
        );
        Ok(())
    }

    /// Scan `[from, len)` chunk by chunk for a start marker that begins a valid record
    fn scan_for_tail(&mut self, from: u64, len: u64) -> Result<u64> {
        let mut chunk = vec![0u8; self.scan_chunk];
        let mut pos = from;

        while pos < len {
            let n = (len - pos).min(self.scan_chunk as u64) as usize;
            self.file.seek(SeekFrom::Start(pos))?;
            self.file.read_exact(&mut chunk[..n])?;

            let markers: Vec<usize> = chunk[..n]
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b == START_MARKER)
                .map(|(i, _)| i)
                .collect();
            for i in markers {
                let candidate = pos + i as u64;
                if self.probe_record(candidate, len)? {
                    return Ok(candidate);
                }
                debug!("Rejected start marker at offset {}", candidate);
            }
            pos += n as u64;
        }

        Ok(len)
    }

    /// Whether a whole record with a valid checksum starts at `offset`
    fn probe_record(&mut self, offset: u64, len: u64) -> Result<bool> {
        if offset + RECORD_HEADER_SIZE as u64 > len {
            return Ok(false);
        }
        let header = match self.read_header(offset) {
            Ok(header) => header,
            Err(Error::Corruption(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if offset + header.record_size() > len {
            return Ok(false);
        }

        let mut value = vec![0u8; header.length as usize];
        self.file.read_exact(&mut value)?;
        Ok(VLogRecord::from_parts(header, &value).is_ok())
    }

    /// Read and decode the header at `offset`, leaving the file positioned at the value
    fn read_header(&mut self, offset: u64) -> Result<RecordHeader> {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf).map_err(|e| truncated(e, offset))?;
        RecordHeader::decode(&buf).map_err(|e| match e {
            Error::Corruption(msg) => Error::corruption(format!("offset {}: {}", offset, msg)),
            other => other,
        })
    }

    /// Read the whole record starting at `offset`
    fn read_record(&mut self, offset: u64) -> Result<VLogRecord> {
        let header = self.read_header(offset)?;
        if offset + header.record_size() > self.head {
            return Err(Error::corruption(format!(
                "Record at offset {} claims {} bytes past head {}",
                offset, header.length, self.head
            )));
        }
        let mut value = vec![0u8; header.length as usize];
        self.file.read_exact(&mut value).map_err(|e| truncated(e, offset))?;
        VLogRecord::from_parts(header, &value)
    }

    /// Append a record at `head` and return its offset
    pub fn append(&mut self, key: Key, value: &[u8]) -> Result<u64> {
        if value.len() > u32::MAX as usize {
            return Err(Error::invalid_argument(format!(
                "Value of {} bytes exceeds the record length limit",
                value.len()
            )));
        }

        let offset = self.head;
        let encoded = VLogRecord::new(key, value.to_vec()).encode();
        self.writer.write_all(&encoded)?;
        self.head += encoded.len() as u64;
        Ok(offset)
    }

    /// Read the value of `length` bytes stored at `offset`, verifying the record
    pub fn get(&mut self, offset: u64, length: u32) -> Result<Value> {
        self.writer.flush()?;

        if offset + RECORD_HEADER_SIZE as u64 + length as u64 > self.head {
            return Err(Error::corruption(format!(
                "Record at offset {} with length {} extends past head {}",
                offset, length, self.head
            )));
        }

        let record = self.read_record(offset)?;
        if record.value.len() != length as usize {
            return Err(Error::corruption(format!(
                "Record at offset {} has length {}, expected {}",
                offset,
                record.value.len(),
                length
            )));
        }
        Ok(record.value)
    }

    /// Make every appended record durable
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.sync {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Delete the file and start over with an empty log
    pub fn clear(&mut self) -> Result<()> {
        self.writer.flush()?;
        fs::remove_file(&self.path)?;

        let (writer, file) = Self::open_handles(&self.path)?;
        self.writer = writer;
        self.file = file;
        self.tail = 0;
        self.head = 0;
        self.pending_gc = 0;
        info!("Value log {} cleared", self.path.display());
        Ok(())
    }

    /// Decode whole records from `tail` until at least `min_bytes` are covered.
    ///
    /// Returns each record with its offset. The covered span is reclaimed by the
    /// next [`ValueLog::garbage_collection`] call.
    pub fn gc_candidates(&mut self, min_bytes: u64) -> Result<Vec<(VLogRecord, u64)>> {
        self.writer.flush()?;

        let mut candidates = Vec::new();
        let mut pos = self.tail;
        while pos < self.head && pos - self.tail < min_bytes {
            let record = match self.read_record(pos) {
                Ok(record) => record,
                Err(e) if e.is_corruption() => {
                    let next = self.scan_for_tail(pos + 1, self.head)?;
                    warn!("Skipping {} unreadable bytes at offset {}: {}", next - pos, pos, e);
                    pos = next;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let size = record.encoded_size() as u64;
            candidates.push((record, pos));
            pos += size;
        }

        self.pending_gc = pos - self.tail;
        debug!(
            "GC scan from {}: {} records over {} bytes",
            self.tail,
            candidates.len(),
            self.pending_gc
        );
        Ok(candidates)
    }

    /// Reclaim the span returned by the last `gc_candidates` call and advance `tail`
    pub fn garbage_collection(&mut self) -> Result<()> {
        if self.pending_gc == 0 {
            return Ok(());
        }

        let (offset, len) = (self.tail, self.pending_gc);
        if !punch_hole(&self.file, offset, len)? {
            self.zero_fill(offset, len)?;
        }
        if self.sync {
            self.file.sync_all()?;
        }

        self.tail += len;
        self.pending_gc = 0;
        info!("Value log reclaimed {} bytes, tail now {}", len, self.tail);
        Ok(())
    }

    fn zero_fill(&mut self, offset: u64, len: u64) -> Result<()> {
        const ZEROS: [u8; 4096] = [0u8; 4096];

        self.file.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(ZEROS.len() as u64) as usize;
            self.file.write_all(&ZEROS[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Offset of the oldest live record
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Offset where the next record goes
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ValueLog {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

fn truncated(err: io::Error, offset: u64) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::corruption(format!("Record at offset {} is truncated", offset))
    } else {
        Error::Io(err)
    }
}

/// First offset holding data, skipping punched holes
#[cfg(target_os = "linux")]
fn first_data_offset(file: &File, len: u64) -> Result<u64> {
    let ret = unsafe { libc::lseek(file.as_raw_fd(), 0, libc::SEEK_DATA) };
    if ret >= 0 {
        return Ok(ret as u64);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // only holes after offset 0
        Some(libc::ENXIO) => Ok(len),
        Some(libc::EINVAL) | Some(libc::EOPNOTSUPP) => Ok(0),
        _ => Err(Error::Io(err)),
    }
}

#[cfg(not(target_os = "linux"))]
fn first_data_offset(_file: &File, _len: u64) -> Result<u64> {
    Ok(0)
}

/// Deallocate `[offset, offset + len)` keeping the file size. Returns `false` when the
/// filesystem cannot punch holes.
#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, len: u64) -> Result<bool> {
    let ret = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
            offset as libc::off_t,
            len as libc::off_t,
        )
    };
    if ret == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) | Some(libc::EINVAL) => {
            warn!("Hole punching unsupported ({}), zero filling instead", err);
            Ok(false)
        }
        _ => Err(Error::Io(err)),
    }
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _len: u64) -> Result<bool> {
    Ok(false)
}
