//! Transaction log reader and pending-transaction scan.
//!
//! Replay starts at byte 0 and reads frames sequentially, validating
//! the checksum of every frame. A truncated or checksum-invalid frame
//! ends replay: after an unclean shutdown the buffered tail of the log
//! may legitimately be torn, and everything before it is still intact.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::observability::Logger;

use super::errors::{TxLogError, TxLogResult};
use super::record::{FrameKind, LogFrame, Operation};

/// A transaction observed in the log with no terminal frame.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub txid: u64,
    /// Operations in the order they were logged.
    pub operations: Vec<Operation>,
}

/// Sequential frame reader.
pub struct LogReader {
    reader: BufReader<File>,
    offset: u64,
    /// Set once a torn or corrupt frame ends the scan.
    reached_end: bool,
}

impl LogReader {
    pub fn open(path: &Path) -> TxLogResult<Self> {
        let file = File::open(path).map_err(|e| {
            TxLogError::append_failed(
                format!("failed to open transaction log for read: {}", path.display()),
                e,
            )
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            reached_end: false,
        })
    }

    /// Byte offset of the next frame to read.
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at the end of the log, which includes a torn
    /// tail: an incomplete or checksum-invalid trailing frame is logged
    /// and treated as the end.
    pub fn read_next(&mut self) -> TxLogResult<Option<LogFrame>> {
        if self.reached_end {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.reader, &mut len_buf) {
            ReadOutcome::Full => {}
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => {
                self.note_torn_tail("partial length prefix");
                return Ok(None);
            }
            ReadOutcome::Err(e) => {
                return Err(TxLogError::append_failed("log read failed", e))
            }
        }
        let payload_len = u32::from_le_bytes(len_buf) as usize;
        // Frames are small; an absurd length is garbage, not a frame.
        if payload_len > 1024 * 1024 {
            self.note_torn_tail("implausible frame length");
            return Ok(None);
        }

        let mut payload = vec![0u8; payload_len];
        if !matches!(
            read_exact_or_eof(&mut self.reader, &mut payload),
            ReadOutcome::Full
        ) {
            self.note_torn_tail("truncated payload");
            return Ok(None);
        }

        let mut crc_buf = [0u8; 4];
        if !matches!(
            read_exact_or_eof(&mut self.reader, &mut crc_buf),
            ReadOutcome::Full
        ) {
            self.note_torn_tail("truncated checksum");
            return Ok(None);
        }

        let stored_crc = u32::from_le_bytes(crc_buf);
        let computed_crc = crc32fast::hash(&payload);
        if stored_crc != computed_crc {
            self.note_torn_tail("frame checksum mismatch");
            return Ok(None);
        }

        let frame = LogFrame::deserialize_payload(&payload).map_err(|e| {
            TxLogError::corrupted(format!(
                "undecodable frame at offset {}: {}",
                self.offset, e
            ))
        })?;

        self.offset += 4 + payload_len as u64 + 4;
        Ok(Some(frame))
    }

    fn note_torn_tail(&mut self, reason: &str) {
        self.reached_end = true;
        Logger::warn(
            "txlog_torn_tail",
            &[
                ("offset", &self.offset.to_string()),
                ("reason", reason),
            ],
        );
    }

    /// Full sequential replay, grouping operations by transaction id.
    ///
    /// Returns transactions whose last observed status is pending, in
    /// the order they were begun.
    pub fn pending_transactions(mut self) -> TxLogResult<Vec<PendingTransaction>> {
        // txid -> (operations, terminated), insertion-ordered.
        let mut order: Vec<u64> = Vec::new();
        let mut states: std::collections::HashMap<u64, (Vec<Operation>, bool)> =
            std::collections::HashMap::new();

        while let Some(frame) = self.read_next()? {
            match frame.kind {
                FrameKind::Begin => {
                    order.push(frame.txid);
                    states.entry(frame.txid).or_insert((Vec::new(), false));
                }
                FrameKind::Operation => {
                    if let Some(op) = frame.operation {
                        states
                            .entry(frame.txid)
                            .or_insert((Vec::new(), false))
                            .0
                            .push(op);
                    }
                }
                FrameKind::Commit | FrameKind::Rollback => {
                    states.entry(frame.txid).or_insert((Vec::new(), false)).1 = true;
                }
            }
        }

        let mut pending = Vec::new();
        for txid in order {
            if let Some((operations, terminated)) = states.remove(&txid) {
                if !terminated {
                    pending.push(PendingTransaction { txid, operations });
                }
            }
        }
        Ok(pending)
    }
}

enum ReadOutcome {
    Full,
    Eof,
    Partial,
    Err(std::io::Error),
}

/// Read exactly `buf.len()` bytes, distinguishing a clean EOF (no bytes)
/// from a torn tail (some bytes).
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Err(e),
        }
    }
    ReadOutcome::Full
}

#[cfg(test)]
mod tests {
    use super::super::record::{OperationKind, PreImage};
    use super::super::writer::TransactionLog;
    use super::*;
    use tempfile::TempDir;

    fn sample_op(record_id: u64) -> Operation {
        Operation {
            kind: OperationKind::SoftDelete,
            record_id,
            record_index: 0,
            pre: PreImage {
                flags: 0,
                ..PreImage::default()
            },
        }
    }

    #[test]
    fn test_sequential_read_sees_all_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        {
            let mut log = TransactionLog::open(&path).unwrap();
            let txid = log.begin().unwrap();
            log.log_operation(txid, sample_op(5)).unwrap();
            log.commit(txid).unwrap();
        }

        let mut reader = LogReader::open(&path).unwrap();
        let kinds: Vec<FrameKind> = std::iter::from_fn(|| {
            reader.read_next().unwrap().map(|f| f.kind)
        })
        .collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Begin, FrameKind::Operation, FrameKind::Commit]
        );
    }

    #[test]
    fn test_torn_tail_ends_replay_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        {
            let mut log = TransactionLog::open(&path).unwrap();
            let txid = log.begin().unwrap();
            log.commit(txid).unwrap();
        }

        // Append garbage bytes simulating a torn buffered write.
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&[0x21, 0x00, 0x00]);
        std::fs::write(&path, raw).unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        let mut frames = 0;
        while reader.read_next().unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_corrupted_mid_frame_ends_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        let first_frame_len;
        {
            let mut log = TransactionLog::open(&path).unwrap();
            let a = log.begin().unwrap();
            first_frame_len = std::fs::metadata(&path).unwrap().len();
            let b = log.begin().unwrap();
            log.commit(a).unwrap();
            log.commit(b).unwrap();
        }

        // Corrupt a payload byte inside the second frame.
        let mut raw = std::fs::read(&path).unwrap();
        raw[first_frame_len as usize + 6] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let mut reader = LogReader::open(&path).unwrap();
        let mut frames = 0;
        while reader.read_next().unwrap().is_some() {
            frames += 1;
        }
        // Only the frame before the corruption is visible.
        assert_eq!(frames, 1);
    }
}
