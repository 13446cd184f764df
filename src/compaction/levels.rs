//! Level manager.
//!
//! Owns every SSTable on disk, grouped into `level-<n>` directories. Level 0 receives
//! flushed MemTables and is ordered newest first; deeper levels are produced by
//! compaction only and stay sorted by key without overlap.

use crate::compaction::journal::{self, CompactionRecord, StagedOutput, STAGING_EXTENSION};
use crate::compaction::picker::{find_file, overlapping_run, pick_compaction};
use crate::compaction::CompactionJob;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::sstable::{SSTable, SSTableContent, SSTableEntry, SSTableHeader, SSTABLE_EXTENSION};
use crate::types::Key;
use log::{debug, info};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix of level directory names
pub const LEVEL_DIR_PREFIX: &str = "level-";

/// One table file owned by a level
#[derive(Debug)]
pub struct FileDetail {
    path: PathBuf,
    header: SSTableHeader,
    /// Parsed table, kept for cached levels only
    cache: Option<SSTable>,
}

impl FileDetail {
    /// Path of the table file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header of the table
    pub fn header(&self) -> &SSTableHeader {
        &self.header
    }

    /// Whether the parsed table is held in memory
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// The parsed table, read from disk unless cached
    pub fn table(&self) -> Result<Cow<'_, SSTable>> {
        match &self.cache {
            Some(table) => Ok(Cow::Borrowed(table)),
            None => Ok(Cow::Owned(SSTable::open(&self.path)?)),
        }
    }

    fn file_name(&self) -> Cow<'_, str> {
        self.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    }
}

impl AsRef<SSTableHeader> for FileDetail {
    fn as_ref(&self) -> &SSTableHeader {
        &self.header
    }
}

/// Recency order of level 0: newer generation, then smaller min key, then the longer
/// and lexicographically greater file name.
fn level0_order(a: &FileDetail, b: &FileDetail) -> Ordering {
    b.header
        .generation
        .cmp(&a.header.generation)
        .then_with(|| a.header.min_key.cmp(&b.header.min_key))
        .then_with(|| {
            let (an, bn) = (a.file_name(), b.file_name());
            bn.len().cmp(&an.len()).then_with(|| bn.cmp(&an))
        })
}

/// LevelManager places, finds and compacts SSTables.
pub struct LevelManager {
    /// Table directory
    dir: PathBuf,
    /// Files per level; level 0 newest first, deeper levels by key
    levels: Vec<Vec<FileDetail>>,
    /// Maximum entries per table
    max_key_number: usize,
    /// Levels below this index keep their tables parsed
    cached_levels: usize,
    /// Tombstone dropping window, 0 disables dropping
    tombstone_drop_levels: usize,
    /// fsync written tables and directories
    sync: bool,
    /// Unique per process and open, used in file names
    name_prefix: String,
    /// Sequence number of the next file name
    next_file: u64,
}

impl LevelManager {
    /// Open the table directory, finishing any interrupted compaction first
    pub fn open<P: AsRef<Path>>(dir: P, options: &Options) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            if !options.create_if_missing {
                return Err(Error::invalid_argument(format!(
                    "Table directory {} does not exist",
                    dir.display()
                )));
            }
            fs::create_dir_all(&dir)?;
        }

        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
        let mut manager = Self {
            dir,
            levels: Vec::new(),
            max_key_number: options.max_key_number,
            cached_levels: options.cached_levels,
            tombstone_drop_levels: options.tombstone_drop_levels,
            sync: options.sync_writes,
            name_prefix: format!("{}-{}", nanos, std::process::id()),
            next_file: 0,
        };

        let level_dirs = manager.existing_level_dirs();
        if journal::recover(&manager.dir, &level_dirs)? {
            info!("Finished interrupted compaction in {}", manager.dir.display());
        }
        for (level, level_dir) in level_dirs.iter().enumerate() {
            let files = manager.load_level(level, level_dir)?;
            manager.levels.push(files);
        }

        info!(
            "Opened {} with {} levels and {} tables",
            manager.dir.display(),
            manager.level_count(),
            manager.file_count()
        );
        Ok(manager)
    }

    /// Level directories present on disk, contiguous from level 0
    fn existing_level_dirs(&self) -> Vec<PathBuf> {
        (0..).map(|level| self.level_dir(level)).take_while(|dir| dir.is_dir()).collect()
    }

    fn load_level(&self, level: usize, level_dir: &Path) -> Result<Vec<FileDetail>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(level_dir)? {
            let path = entry?.path();
            if path.extension() != Some(OsStr::new(SSTABLE_EXTENSION)) {
                continue;
            }

            let (header, cache) = if level < self.cached_levels {
                let table = SSTable::open(&path)?;
                (table.header(), Some(table))
            } else {
                (SSTable::read_header(&path)?, None)
            };
            debug!("Found level {} table {} ({} keys)", level, path.display(), header.count);
            files.push(FileDetail { path, header, cache });
        }

        if level == 0 {
            files.sort_by(level0_order);
        } else {
            files.sort_by_key(|f| f.header.min_key);
            let overlap = files.windows(2).find(|w| w[0].header.max_key >= w[1].header.min_key);
            if let Some(pair) = overlap {
                return Err(Error::corruption(format!(
                    "Level {} tables {} and {} overlap",
                    level,
                    pair[0].path.display(),
                    pair[1].path.display()
                )));
            }
        }
        Ok(files)
    }

    fn level_dir(&self, level: usize) -> PathBuf {
        self.dir.join(format!("{}{}", LEVEL_DIR_PREFIX, level))
    }

    /// Create level directories up to and including `level`
    fn create_new_level_if_nonexist(&mut self, level: usize) -> Result<()> {
        while self.levels.len() <= level {
            let level_dir = self.level_dir(self.levels.len());
            fs::create_dir_all(&level_dir)?;
            debug!("Created {}", level_dir.display());
            self.levels.push(Vec::new());
        }
        Ok(())
    }

    fn next_file_name(&mut self) -> String {
        let name = format!("{}-{}", self.name_prefix, self.next_file);
        self.next_file += 1;
        name
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.dir).unwrap_or(path)
    }

    fn sync_level_dir(&self, level: usize) -> Result<()> {
        if self.sync {
            journal::sync_dir(&self.level_dir(level))?;
        }
        Ok(())
    }

    /// Write `content` as the newest level 0 table, then compact as needed
    pub fn write_into_sstable_file(&mut self, content: SSTableContent) -> Result<()> {
        self.create_new_level_if_nonexist(0)?;

        let name = self.next_file_name();
        let path = self.level_dir(0).join(format!("{}.{}", name, SSTABLE_EXTENSION));
        let header = content.header;

        let mut table = SSTable::create(&path);
        table.write(content, self.sync)?;
        self.sync_level_dir(0)?;
        debug!("Flushed generation {} to {}", header.generation, path.display());

        let cache = (self.cached_levels > 0).then_some(table);
        self.levels[0].insert(0, FileDetail { path, header, cache });
        self.check_compaction(0)
    }

    /// Spill `level` into `level + 1` while it holds too many files, cascading down
    pub fn check_compaction(&mut self, level: usize) -> Result<()> {
        let task = match pick_compaction(level, &self.levels[level]) {
            Some(task) => task,
            None => return Ok(()),
        };

        info!(
            "Compacting {} of {} files from level {} into level {}",
            task.inputs.len(),
            self.levels[level].len(),
            level,
            level + 1
        );
        self.create_new_level_if_nonexist(level + 1)?;

        let selected: Vec<PathBuf> =
            task.inputs.iter().map(|&i| self.levels[level][i].path.clone()).collect();
        for path in selected {
            self.merge_down(level, &path)?;
        }

        self.check_compaction(level + 1)
    }

    /// Merge the table at `path` in `level` with its intersecting run in `level + 1`
    fn merge_down(&mut self, level: usize, path: &Path) -> Result<()> {
        let pos = self.levels[level].iter().position(|f| f.path == path).ok_or_else(|| {
            Error::invalid_state(format!("{} left level {} mid-compaction", path.display(), level))
        })?;
        let source = self.levels[level][pos].header;
        let run = overlapping_run(&self.levels[level + 1], source.min_key, source.max_key);
        let drop_tombstones = self.tombstone_drop_levels > 0
            && self.levels.len() <= level + self.tombstone_drop_levels;

        let mut inputs: Vec<&FileDetail> = vec![&self.levels[level][pos]];
        inputs.extend(self.levels[level + 1][run.clone()].iter());
        let generation = inputs.iter().map(|f| f.header.generation).max().unwrap_or(0);
        let input_paths: Vec<PathBuf> = inputs.iter().map(|f| f.path.clone()).collect();

        let outputs = {
            let tables = inputs.iter().map(|f| f.table()).collect::<Result<Vec<_>>>()?;
            let runs: Vec<&[SSTableEntry]> = tables.iter().map(|t| t.entries()).collect();
            CompactionJob::new(runs, generation, self.max_key_number, drop_tombstones).run()?
        };

        // phase one: stage outputs
        let target_level = level + 1;
        let mut record = CompactionRecord {
            inputs: input_paths.iter().map(|p| self.relative(p).to_path_buf()).collect(),
            outputs: Vec::with_capacity(outputs.len()),
        };
        let mut staged_tables = Vec::with_capacity(outputs.len());
        for content in outputs {
            let name = self.next_file_name();
            let level_dir = self.level_dir(target_level);
            let staged = level_dir.join(format!("{}.{}", name, STAGING_EXTENSION));
            let target = level_dir.join(format!("{}.{}", name, SSTABLE_EXTENSION));

            let mut table = SSTable::create(&staged);
            table.write(content, self.sync)?;
            record.outputs.push(StagedOutput {
                staged: self.relative(&staged).to_path_buf(),
                target: self.relative(&target).to_path_buf(),
            });
            staged_tables.push((target, table));
        }
        self.sync_level_dir(target_level)?;

        // phase two: commit, then apply
        record.commit(&self.dir, self.sync)?;
        record.apply(&self.dir)?;
        self.sync_level_dir(level)?;
        self.sync_level_dir(target_level)?;
        CompactionRecord::finish(&self.dir)?;

        let keep_cached = target_level < self.cached_levels;
        let new_files: Vec<FileDetail> = staged_tables
            .into_iter()
            .map(|(target, mut table)| {
                table.set_path(&target);
                let header = table.header();
                FileDetail { path: target, header, cache: keep_cached.then_some(table) }
            })
            .collect();

        info!(
            "Merged level {} table with {} level {} tables into {} tables (generation {}{})",
            level,
            run.len(),
            target_level,
            new_files.len(),
            generation,
            if drop_tombstones { ", tombstones dropped" } else { "" }
        );
        self.levels[level].remove(pos);
        self.levels[target_level].splice(run, new_files);
        Ok(())
    }

    /// Newest entry for `key` on disk, tombstones included
    pub fn find(&self, key: Key) -> Result<Option<SSTableEntry>> {
        for (level, files) in self.levels.iter().enumerate() {
            let candidates: Vec<&FileDetail> = if level == 0 {
                files.iter().filter(|f| f.header.covers(key)).collect()
            } else {
                find_file(files, key).map(|idx| &files[idx]).into_iter().collect()
            };

            for file in candidates {
                if let Some(locator) = file.table()?.get(key) {
                    return Ok(Some(SSTableEntry::new(key, locator)));
                }
            }
        }
        Ok(None)
    }

    /// Newest entry of every key in `[low, high]` on disk, tombstones included
    pub fn scan(&self, low: Key, high: Key) -> Result<BTreeMap<Key, SSTableEntry>> {
        let mut out = BTreeMap::new();
        if low > high {
            return Ok(out);
        }

        for (level, files) in self.levels.iter().enumerate() {
            let candidates = if level == 0 {
                files.iter().filter(|f| f.header.overlaps(low, high)).collect::<Vec<_>>()
            } else {
                files[overlapping_run(files, low, high)].iter().collect()
            };

            for file in candidates {
                for entry in file.table()?.scan(low, high) {
                    out.entry(entry.key).or_insert(entry);
                }
            }
        }
        Ok(out)
    }

    /// Files of `level` in level order.
    ///
    /// # Panics
    ///
    /// Panics if `level` does not exist.
    pub fn level_files(&self, level: usize) -> &[FileDetail] {
        assert!(
            level < self.levels.len(),
            "level {} requested but only {} levels exist",
            level,
            self.levels.len()
        );
        &self.levels[level]
    }

    /// Largest generation of any table on disk
    pub fn max_generation(&self) -> Option<u64> {
        self.levels.iter().flatten().map(|f| f.header.generation).max()
    }

    /// Delete every table and level directory
    pub fn clear(&mut self) -> Result<()> {
        for level in 0..self.levels.len() {
            let level_dir = self.level_dir(level);
            if level_dir.exists() {
                fs::remove_dir_all(&level_dir)?;
            }
        }
        CompactionRecord::finish(&self.dir)?;
        self.levels.clear();
        info!("Removed all tables in {}", self.dir.display());
        Ok(())
    }

    /// Number of levels
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Number of tables across all levels
    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Table directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
