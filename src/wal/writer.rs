//! Append side of the log.
//!
//! Appends are followed by fsync before they are acknowledged; a record is
//! durable or it is not in the log. Segments rotate once they exceed the
//! configured size so retention can drop whole files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::reader::{read_segment, scan_segment};
use super::record::{WalOp, WalRecord};
use super::retention::RetentionBarriers;
use super::{WalError, WalResult};

const DEFAULT_SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct SegmentInfo {
    seq: u64,
    first_tick: u64,
    last_tick: u64,
}

pub struct WalWriter {
    dir: PathBuf,
    file: File,
    current_seq: u64,
    current_size: u64,
    current_first_tick: u64,
    max_segment_size: u64,
    next_tick: u64,
    sealed: Vec<SegmentInfo>,
}

pub(crate) fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("wal-{:08}.log", seq))
}

pub(crate) fn list_segments(dir: &Path) -> WalResult<Vec<u64>> {
    let mut seqs = Vec::new();
    if !dir.exists() {
        return Ok(seqs);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
            if let Ok(seq) = stripped.parse::<u64>() {
                seqs.push(seq);
            }
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

impl WalWriter {
    pub fn open(dir: impl Into<PathBuf>) -> WalResult<Self> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    pub fn open_with_segment_size(dir: impl Into<PathBuf>, max_segment_size: u64) -> WalResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut sealed = Vec::new();
        let mut next_tick: u64 = 1;
        let seqs = list_segments(&dir)?;
        let last_seq = seqs.last().copied();
        for seq in &seqs {
            let path = segment_path(&dir, *seq);
            let records = if Some(*seq) == last_seq {
                // a crash may have torn the tail of the final segment;
                // truncate it away so future replays see a clean log
                let (records, valid_len) = scan_segment(&path)?;
                let on_disk = fs::metadata(&path)?.len();
                if valid_len < on_disk {
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(valid_len)?;
                    file.sync_data()?;
                }
                records
            } else {
                read_segment(&path, *seq, false)?
            };
            if let (Some(first), Some(last)) = (records.first(), records.last()) {
                sealed.push(SegmentInfo {
                    seq: *seq,
                    first_tick: first.tick,
                    last_tick: last.tick,
                });
                next_tick = next_tick.max(last.tick + 1);
            }
        }

        let current_seq = last_seq.map(|s| s + 1).unwrap_or(1);
        let path = segment_path(&dir, current_seq);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            dir,
            file,
            current_seq,
            current_size: 0,
            current_first_tick: next_tick,
            max_segment_size,
            next_tick,
            sealed,
        })
    }

    /// Appends one record, assigns its tick, fsyncs, returns the tick.
    pub fn append(
        &mut self,
        op: WalOp,
        database: &str,
        collection: &str,
        key: &str,
        document: serde_json::Value,
    ) -> WalResult<u64> {
        let tick = self.next_tick;
        let record = WalRecord {
            tick,
            op,
            database: database.to_string(),
            collection: collection.to_string(),
            key: key.to_string(),
            document,
        };
        let bytes = record.encode()?;

        if self.current_size > 0 && self.current_size + bytes.len() as u64 > self.max_segment_size {
            self.rotate(tick)?;
        }

        self.file.write_all(&bytes)?;
        self.file.sync_data()?;
        self.current_size += bytes.len() as u64;
        self.next_tick = tick + 1;
        Ok(tick)
    }

    fn rotate(&mut self, next_first_tick: u64) -> WalResult<()> {
        self.sealed.push(SegmentInfo {
            seq: self.current_seq,
            first_tick: self.current_first_tick,
            last_tick: self.next_tick.saturating_sub(1),
        });
        self.current_seq += 1;
        self.current_size = 0;
        self.current_first_tick = next_first_tick;
        let path = segment_path(&self.dir, self.current_seq);
        self.file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(())
    }

    /// The tick the next append will receive.
    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    /// Last durable tick, 0 if the log is empty.
    pub fn last_tick(&self) -> u64 {
        self.next_tick.saturating_sub(1)
    }

    /// Oldest tick still present in the log.
    pub fn oldest_retained_tick(&self) -> u64 {
        self.sealed
            .first()
            .map(|s| s.first_tick)
            .unwrap_or(self.current_first_tick)
    }

    /// Drops sealed segments whose records all predate `keep_from`, except
    /// segments pinned by a retention barrier.
    pub fn prune(&mut self, keep_from: u64, barriers: &RetentionBarriers) -> WalResult<usize> {
        let effective = match barriers.min_pinned_tick() {
            Some(pinned) => keep_from.min(pinned),
            None => keep_from,
        };
        let mut removed = 0;
        let mut retained = Vec::new();
        for segment in &self.sealed {
            if segment.last_tick < effective {
                let path = segment_path(&self.dir, segment.seq);
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(WalError::Io(e));
                    }
                }
                removed += 1;
            } else {
                retained.push(*segment);
            }
        }
        self.sealed = retained;
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
