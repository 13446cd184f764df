//! On-disk SSTable handle.
//!
//! A table is bound to a path when created and to its content either when it is written
//! or when it is loaded. Loading happens at most once; afterwards lookups never touch disk.

use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::sstable::format::{SSTableContent, SSTableEntry, SSTableHeader};
use crate::sstable::{new_table_filter, HEADER_SIZE};
use crate::types::{Key, Locator};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// SSTable gives read access to one table file and writes it exactly once.
///
/// Usage:
/// ```no_run
/// use wisckv::sstable::{SSTable, SSTableBuilder, SSTableEntry};
///
/// let mut builder = SSTableBuilder::new(0, 408);
/// builder.add(SSTableEntry { key: 7, offset: 0, length: 5 }).unwrap();
///
/// let mut table = SSTable::create("table.sst");
/// table.write(builder.finish(), true).unwrap();
/// assert!(table.get(7).is_some());
///
/// let table = SSTable::open("table.sst").unwrap();
/// assert_eq!(table.header().max_key, 7);
/// ```
#[derive(Debug, Clone)]
pub struct SSTable {
    path: PathBuf,
    content: Option<SSTableContent>,
    filter: Option<BloomFilter>,
}

impl SSTable {
    /// Bind a table to `path` without touching the file system
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), content: None, filter: None }
    }

    /// Bind to an existing file and load it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut table = Self::create(path);
        table.load()?;
        Ok(table)
    }

    /// Read only the header of the table at `path`
    pub fn read_header<P: AsRef<Path>>(path: P) -> Result<SSTableHeader> {
        let mut file = File::open(path.as_ref())?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corruption(format!(
                    "SSTable {} shorter than its header",
                    path.as_ref().display()
                ))
            } else {
                Error::Io(e)
            }
        })?;
        SSTableHeader::decode(&buf)
    }

    /// Path of the table file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the handle at `path` after its file was renamed
    pub fn set_path<P: AsRef<Path>>(&mut self, path: P) {
        self.path = path.as_ref().to_path_buf();
    }

    /// Whether content is attached
    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Persist `content` to the bound path and keep it attached.
    ///
    /// A table is written once; writing a table that already has content fails.
    pub fn write(&mut self, content: SSTableContent, sync: bool) -> Result<()> {
        if self.content.is_some() {
            return Err(Error::invalid_state(format!(
                "SSTable {} already has content",
                self.path.display()
            )));
        }

        let mut file =
            OpenOptions::new().write(true).create(true).truncate(true).open(&self.path)?;
        file.write_all(&content.encode())?;
        if sync {
            file.sync_all()?;
        }

        self.attach(content);
        Ok(())
    }

    /// Read the file into memory unless content is already attached
    pub fn load(&mut self) -> Result<()> {
        if self.content.is_some() {
            return Ok(());
        }

        let data = fs::read(&self.path)?;
        let content = SSTableContent::decode(&data).map_err(|e| match e {
            Error::Corruption(msg) => {
                Error::corruption(format!("{}: {}", self.path.display(), msg))
            }
            other => other,
        })?;
        self.attach(content);
        Ok(())
    }

    fn attach(&mut self, content: SSTableContent) {
        let mut filter = new_table_filter();
        filter.set(&content.filter);
        self.filter = Some(filter);
        self.content = Some(content);
    }

    fn loaded(&self) -> &SSTableContent {
        match &self.content {
            Some(content) => content,
            None => panic!("SSTable {} queried before load or write", self.path.display()),
        }
    }

    /// The table header
    pub fn header(&self) -> SSTableHeader {
        self.loaded().header
    }

    /// All entries in key order, tombstones included
    pub fn entries(&self) -> &[SSTableEntry] {
        &self.loaded().entries
    }

    /// Locator stored for `key`, tombstones included
    pub fn get(&self, key: Key) -> Option<Locator> {
        let content = self.loaded();
        if content.entries.is_empty() || !content.header.covers(key) {
            return None;
        }
        if let Some(filter) = &self.filter {
            if !filter.query(key) {
                return None;
            }
        }

        content
            .entries
            .binary_search_by_key(&key, |e| e.key)
            .ok()
            .map(|idx| content.entries[idx].locator())
    }

    /// Entries with keys in `[low, high]`, tombstones included
    pub fn scan(&self, low: Key, high: Key) -> Vec<SSTableEntry> {
        let content = self.loaded();
        if low > high || !content.header.overlaps(low, high) {
            return Vec::new();
        }

        let start = content.entries.partition_point(|e| e.key < low);
        content.entries[start..].iter().take_while(|e| e.key <= high).copied().collect()
    }
}
