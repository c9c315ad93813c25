//! Log frame types and codec.
//!
//! Each frame on disk is:
//!
//! ```text
//! +-------------------+
//! | length   (u32 LE) |  payload bytes, excluding length and crc
//! +-------------------+
//! | payload           |
//! +-------------------+
//! | crc32    (u32 LE) |  over the payload
//! +-------------------+
//! ```
//!
//! Payload:
//!
//! ```text
//! | kind: u8 | txid: u64 | timestamp_micros: i64 | kind-specific |
//! ```
//!
//! Operation frames append the operation kind, the record identity, and
//! the pre-image needed to compensate the operation during recovery.

use std::io::{self, Read};

/// Frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Transaction opened
    Begin = 0,
    /// One logged operation inside a transaction
    Operation = 1,
    /// Transaction reached its success terminal state
    Commit = 2,
    /// Transaction reached its failure terminal state
    Rollback = 3,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameKind::Begin),
            1 => Some(FrameKind::Operation),
            2 => Some(FrameKind::Commit),
            3 => Some(FrameKind::Rollback),
            _ => None,
        }
    }
}

/// Logged operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationKind {
    /// New record created
    Insert = 0,
    /// Record content repointed to a new block
    UpdateContent = 1,
    /// Record flagged deleted
    SoftDelete = 2,
}

impl OperationKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OperationKind::Insert),
            1 => Some(OperationKind::UpdateContent),
            2 => Some(OperationKind::SoftDelete),
            _ => None,
        }
    }
}

/// Pre-operation record state, enough to undo the operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreImage {
    pub content_offset: u64,
    pub content_length: u32,
    pub flags: u16,
    pub modified_micros: i64,
    pub revision: u32,
}

/// One logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub record_id: u64,
    pub record_index: u32,
    pub pre: PreImage,
}

/// Decoded log frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFrame {
    pub kind: FrameKind,
    pub txid: u64,
    pub timestamp_micros: i64,
    /// Present only for `FrameKind::Operation`.
    pub operation: Option<Operation>,
}

impl LogFrame {
    pub fn new(kind: FrameKind, txid: u64, timestamp_micros: i64) -> Self {
        Self {
            kind,
            txid,
            timestamp_micros,
            operation: None,
        }
    }

    pub fn operation(txid: u64, timestamp_micros: i64, operation: Operation) -> Self {
        Self {
            kind: FrameKind::Operation,
            txid,
            timestamp_micros,
            operation: Some(operation),
        }
    }

    /// Serialize the payload (without length prefix or checksum).
    pub fn serialize_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.txid.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_micros.to_le_bytes());

        if let Some(ref op) = self.operation {
            buf.push(op.kind as u8);
            buf.extend_from_slice(&op.record_id.to_le_bytes());
            buf.extend_from_slice(&op.record_index.to_le_bytes());
            buf.extend_from_slice(&op.pre.content_offset.to_le_bytes());
            buf.extend_from_slice(&op.pre.content_length.to_le_bytes());
            buf.extend_from_slice(&op.pre.flags.to_le_bytes());
            buf.extend_from_slice(&op.pre.modified_micros.to_le_bytes());
            buf.extend_from_slice(&op.pre.revision.to_le_bytes());
        }
        buf
    }

    /// Serialize the complete frame: length, payload, checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let payload = self.serialize_payload();
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame
    }

    /// Deserialize a payload previously produced by
    /// [`serialize_payload`](Self::serialize_payload).
    pub fn deserialize_payload(data: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(data);

        let mut byte = [0u8; 1];
        let mut u32buf = [0u8; 4];
        let mut u64buf = [0u8; 8];

        cursor.read_exact(&mut byte)?;
        let kind = FrameKind::from_u8(byte[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame kind: {}", byte[0]),
            )
        })?;
        cursor.read_exact(&mut u64buf)?;
        let txid = u64::from_le_bytes(u64buf);
        cursor.read_exact(&mut u64buf)?;
        let timestamp_micros = i64::from_le_bytes(u64buf);

        let operation = if kind == FrameKind::Operation {
            cursor.read_exact(&mut byte)?;
            let op_kind = OperationKind::from_u8(byte[0]).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown operation kind: {}", byte[0]),
                )
            })?;
            cursor.read_exact(&mut u64buf)?;
            let record_id = u64::from_le_bytes(u64buf);
            cursor.read_exact(&mut u32buf)?;
            let record_index = u32::from_le_bytes(u32buf);
            cursor.read_exact(&mut u64buf)?;
            let content_offset = u64::from_le_bytes(u64buf);
            cursor.read_exact(&mut u32buf)?;
            let content_length = u32::from_le_bytes(u32buf);
            let mut u16buf = [0u8; 2];
            cursor.read_exact(&mut u16buf)?;
            let flags = u16::from_le_bytes(u16buf);
            cursor.read_exact(&mut u64buf)?;
            let modified_micros = i64::from_le_bytes(u64buf);
            cursor.read_exact(&mut u32buf)?;
            let revision = u32::from_le_bytes(u32buf);

            Some(Operation {
                kind: op_kind,
                record_id,
                record_index,
                pre: PreImage {
                    content_offset,
                    content_length,
                    flags,
                    modified_micros,
                    revision,
                },
            })
        } else {
            None
        };

        Ok(Self {
            kind,
            txid,
            timestamp_micros,
            operation,
        })
    }
}
