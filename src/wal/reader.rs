//! Read side of the log: startup replay and replication tailing.

use std::fs;
use std::path::Path;

use super::record::WalRecord;
use super::writer::{list_segments, segment_path};
use super::{WalError, WalResult};

/// Reads one segment file. A torn record at the end of the file is
/// tolerated when `allow_torn` is set (the crash cut the record short);
/// a checksum mismatch anywhere is corruption.
pub(crate) fn read_segment(path: &Path, seq: u64, allow_torn: bool) -> WalResult<Vec<WalRecord>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(WalError::Io(e)),
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match WalRecord::decode(&bytes[offset..]) {
            Ok(Some((record, consumed))) => {
                records.push(record);
                offset += consumed;
            }
            Ok(None) => {
                if allow_torn {
                    break;
                }
                return Err(WalError::Corruption {
                    segment: seq,
                    offset: offset as u64,
                });
            }
            Err(WalError::Corruption { .. }) => {
                return Err(WalError::Corruption {
                    segment: seq,
                    offset: offset as u64,
                });
            }
            Err(other) => return Err(other),
        }
    }
    Ok(records)
}

/// Lenient scan used when reopening the log for writing: reads the valid
/// record prefix of a segment and reports where it ends, so the writer can
/// truncate a tail torn by a crash.
pub(crate) fn scan_segment(path: &Path) -> WalResult<(Vec<WalRecord>, u64)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(WalError::Io(e)),
    };
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        match WalRecord::decode(&bytes[offset..]) {
            Ok(Some((record, consumed))) => {
                records.push(record);
                offset += consumed;
            }
            // incomplete or checksum-damaged tail: the valid prefix ends here
            Ok(None) | Err(WalError::Corruption { .. }) => break,
            Err(other) => return Err(other),
        }
    }
    Ok((records, offset as u64))
}

/// Result of a bounded read.
#[derive(Debug)]
pub struct ReadOutcome {
    pub records: Vec<WalRecord>,
    /// Highest tick seen in the log (not just in `records`).
    pub last_tick: u64,
    /// Oldest tick still retained.
    pub oldest_tick: u64,
}

pub struct WalReader;

impl WalReader {
    /// Replays the whole retained log in tick order.
    pub fn replay(dir: &Path) -> WalResult<Vec<WalRecord>> {
        Ok(Self::read_from(dir, 0)?.records)
    }

    /// Reads every retained record with tick >= `from_tick`.
    pub fn read_from(dir: &Path, from_tick: u64) -> WalResult<ReadOutcome> {
        let seqs = list_segments(dir)?;
        let last_seq = seqs.last().copied();
        let mut records = Vec::new();
        let mut last_tick = 0;
        let mut oldest_tick = 0;
        for seq in seqs {
            let allow_torn = Some(seq) == last_seq;
            let segment = read_segment(&segment_path(dir, seq), seq, allow_torn)?;
            for record in segment {
                if oldest_tick == 0 {
                    oldest_tick = record.tick;
                }
                last_tick = last_tick.max(record.tick);
                if record.tick >= from_tick {
                    records.push(record);
                }
            }
        }
        Ok(ReadOutcome {
            records,
            last_tick,
            oldest_tick,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::WalOp;
    use crate::wal::WalWriter;
    use serde_json::json;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn fill(dir: &Path, n: usize) -> WalWriter {
        let mut wal = WalWriter::open_with_segment_size(dir, 128).unwrap();
        for i in 0..n {
            wal.append(WalOp::Insert, "_system", "c", &format!("k{}", i), json!({"i": i}))
                .unwrap();
        }
        wal
    }

    #[test]
    fn test_replay_returns_everything_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path(), 25);
        let records = WalReader::replay(dir.path()).unwrap();
        assert_eq!(records.len(), 25);
        for pair in records.windows(2) {
            assert!(pair[0].tick < pair[1].tick);
        }
    }

    #[test]
    fn test_read_from_skips_earlier_ticks() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path(), 10);
        let outcome = WalReader::read_from(dir.path(), 5).unwrap();
        assert!(outcome.records.iter().all(|r| r.tick >= 5));
        assert_eq!(outcome.last_tick, 10);
        assert_eq!(outcome.oldest_tick, 1);
    }

    #[test]
    fn test_torn_tail_ends_replay() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path(), 5);
        // cut the last segment short
        let seqs = list_segments(dir.path()).unwrap();
        let last = segment_path(dir.path(), *seqs.last().unwrap());
        let bytes = fs::read(&last).unwrap();
        fs::write(&last, &bytes[..bytes.len() - 3]).unwrap();

        let records = WalReader::replay(dir.path()).unwrap();
        assert!(records.len() < 5);
    }

    #[test]
    fn test_mid_segment_corruption_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path(), 5);
        let seqs = list_segments(dir.path()).unwrap();
        let first = segment_path(dir.path(), seqs[0]);
        let mut bytes = fs::read(&first).unwrap();
        // flip a bit inside the first record of a non-final position
        bytes[10] ^= 0x01;
        let mut f = OpenOptions::new().write(true).open(&first).unwrap();
        f.write_all(&bytes).unwrap();

        assert!(WalReader::replay(dir.path()).is_err());
    }
}
