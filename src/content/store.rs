//! Append-only memory-mapped blob store.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::mapped::{page_align, MappedError};
use crate::observability::Logger;

use super::block::{align_up, BlockHeader, Encoding, BLOCK_HEADER_SIZE};
use super::errors::{ContentError, ContentResult};

/// Address of a stored block: byte offset of its header plus the stored
/// payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLocation {
    pub offset: u64,
    /// Stored payload bytes (post-compression).
    pub length: u32,
}

/// Tuning for a content store instance.
#[derive(Debug, Clone)]
pub struct ContentOptions {
    /// Initial file size in bytes (rounded up to a page).
    pub initial_bytes: u64,
    /// Chunk size for streaming reads.
    pub chunk_bytes: usize,
    /// Compress payloads at or above this size; `None` disables
    /// compression.
    pub compression: Option<CompressionOptions>,
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionOptions {
    pub threshold_bytes: usize,
    pub level: i32,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            initial_bytes: 256 * 1024,
            chunk_bytes: 64 * 1024,
            compression: Some(CompressionOptions {
                threshold_bytes: 4 * 1024,
                level: 3,
            }),
        }
    }
}

/// Append-only store of checksummed, optionally compressed blocks.
///
/// Blocks start at byte 0 with no file header; the write cursor is
/// recovered on open by walking block headers from the start until the
/// first invalid one. That scan is O(file size) but touches only
/// headers.
pub struct ContentStore {
    path: PathBuf,
    file: std::fs::File,
    map: MmapMut,
    write_offset: u64,
    options: ContentOptions,
}

impl ContentStore {
    /// Open or create a content file and recover the write cursor.
    pub fn open(path: &Path, options: ContentOptions) -> ContentResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                MappedError::map_failed(
                    format!("failed to open content file: {}", path.display()),
                    e,
                )
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| MappedError::map_failed("failed to read content metadata", e))?
            .len();

        if file_len == 0 {
            let bytes = page_align(options.initial_bytes.max(1));
            file.set_len(bytes).map_err(|e| {
                MappedError::map_failed(
                    format!("failed to size new content file to {} bytes", bytes),
                    e,
                )
            })?;
        }

        // SAFETY: the engine owns this file exclusively for the lifetime
        // of the store; no other process mutates it.
        let map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| {
            MappedError::map_failed(format!("mmap failed for {}", path.display()), e)
        })?;

        let write_offset = Self::find_write_offset(&map);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            write_offset,
            options,
        })
    }

    /// Walk block headers from byte 0 until the first invalid or
    /// truncated block. Everything past that point is an unclean-shutdown
    /// artifact (or untouched zeroes) and is overwritten by new appends.
    fn find_write_offset(map: &MmapMut) -> u64 {
        let file_len = map.len() as u64;
        let mut offset = 0u64;
        loop {
            if offset + BLOCK_HEADER_SIZE > file_len {
                break;
            }
            let header = match BlockHeader::decode_from(&map[offset as usize..]) {
                Some(h) => h,
                None => break,
            };
            let end = offset + BLOCK_HEADER_SIZE + header.size as u64;
            if end > file_len {
                break;
            }
            offset = align_up(end);
        }
        offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current append cursor.
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Append a payload as a new immutable block.
    ///
    /// The payload is compressed when compression is configured, the
    /// payload is large enough, and compression actually shrinks it.
    pub fn append(&mut self, bytes: &[u8]) -> ContentResult<ContentLocation> {
        let (stored, encoding) = self.codec().encode(bytes)?;
        self.append_encoded(&stored, encoding)
    }

    /// Detached encoder with this store's compression settings, so
    /// compressing a large payload does not require borrowing the
    /// store at all.
    pub fn codec(&self) -> ContentCodec {
        ContentCodec {
            compression: self.options.compression,
        }
    }

    /// Append a payload already encoded by [`ContentCodec::encode`].
    pub fn append_encoded(
        &mut self,
        stored: &[u8],
        encoding: Encoding,
    ) -> ContentResult<ContentLocation> {
        let offset = self.write_offset;
        let total = BLOCK_HEADER_SIZE + stored.len() as u64;
        self.ensure_capacity(offset + total)?;

        let header = BlockHeader {
            crc32: crc32fast::hash(&stored),
            encoding,
            size: stored.len() as u32,
        };

        let start = offset as usize;
        header.encode_into(&mut self.map[start..start + BLOCK_HEADER_SIZE as usize]);
        let payload_start = start + BLOCK_HEADER_SIZE as usize;
        self.map[payload_start..payload_start + stored.len()].copy_from_slice(&stored);

        self.write_offset = align_up(offset + total);

        if let Err(e) = self.map.flush_async_range(start, total as usize) {
            Logger::warn(
                "content_flush_unconfirmed",
                &[
                    ("path", &self.path.display().to_string()),
                    ("offset", &offset.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }

        Ok(ContentLocation {
            offset,
            length: stored.len() as u32,
        })
    }

    fn ensure_capacity(&mut self, required: u64) -> ContentResult<()> {
        let current = self.map.len() as u64;
        if required <= current {
            return Ok(());
        }
        let new_bytes = page_align(required.max(current * 2));

        self.file.set_len(new_bytes).map_err(|e| {
            MappedError::remap_failed(
                format!("failed to extend content file to {} bytes", new_bytes),
                e,
            )
        })?;

        // SAFETY: same exclusivity argument as in `open`. The old mapping
        // stays valid until replaced below.
        let new_map = unsafe { MmapOptions::new().map_mut(&self.file) }.map_err(|e| {
            MappedError::remap_failed(
                format!("remap failed for {}", self.path.display()),
                e,
            )
        })?;
        self.map = new_map;
        Ok(())
    }

    /// Validate the block at `location` and return its decoded payload.
    pub fn read(&self, location: ContentLocation) -> ContentResult<Vec<u8>> {
        let (bytes, _) = self.read_at(location.offset)?;
        Ok(bytes)
    }

    /// Validate the block whose header starts at `offset` and return its
    /// decoded payload plus the full location (length comes from the
    /// header, so chained structures only need to persist offsets).
    pub fn read_at(&self, offset: u64) -> ContentResult<(Vec<u8>, ContentLocation)> {
        let file_len = self.map.len() as u64;
        // checked_add: a corrupt offset near u64::MAX must fail cleanly,
        // not wrap past the bounds check.
        let header_end = offset
            .checked_add(BLOCK_HEADER_SIZE)
            .ok_or_else(|| ContentError::invalid_offset(offset, file_len))?;
        if header_end > file_len {
            return Err(ContentError::invalid_offset(offset, file_len));
        }
        let header = BlockHeader::decode_from(&self.map[offset as usize..])
            .ok_or_else(|| ContentError::corrupted(offset, "bad block magic or encoding"))?;

        let payload_start = header_end;
        let payload_end = payload_start
            .checked_add(header.size as u64)
            .ok_or_else(|| ContentError::invalid_offset(offset, file_len))?;
        if payload_end > file_len {
            return Err(ContentError::invalid_offset(payload_end, file_len));
        }

        let stored = &self.map[payload_start as usize..payload_end as usize];
        let computed = crc32fast::hash(stored);
        if computed != header.crc32 {
            return Err(ContentError::corrupted(
                offset,
                format!(
                    "checksum mismatch: computed {:08x}, stored {:08x}",
                    computed, header.crc32
                ),
            ));
        }

        let bytes = match header.encoding {
            Encoding::Raw => stored.to_vec(),
            Encoding::Zstd => zstd::decode_all(stored)
                .map_err(|e| ContentError::compression(offset, e.to_string()))?,
        };

        Ok((
            bytes,
            ContentLocation {
                offset,
                length: header.size,
            },
        ))
    }

    /// Open a chunked stream over the block at `location`.
    ///
    /// Magic and checksum are validated (and the payload decompressed)
    /// before the first chunk is yielded; a corrupted block never yields
    /// any bytes.
    pub fn stream(&self, location: ContentLocation) -> ContentResult<ContentStream> {
        let bytes = self.read(location)?;
        Ok(ContentStream::new(bytes, self.options.chunk_bytes))
    }

    /// Durable flush of the whole mapping.
    pub fn flush(&self) -> ContentResult<()> {
        self.map
            .flush()
            .map_err(|e| MappedError::sync_failed("content flush unconfirmed", e))?;
        Ok(())
    }
}

/// Stateless payload encoder detached from its store.
#[derive(Debug, Clone, Copy)]
pub struct ContentCodec {
    compression: Option<CompressionOptions>,
}

impl ContentCodec {
    /// Encode a payload exactly as `append` would store it: compressed
    /// when compression is configured, the payload is large enough,
    /// and compression actually shrinks it.
    pub fn encode(&self, bytes: &[u8]) -> ContentResult<(Vec<u8>, Encoding)> {
        if let Some(compression) = self.compression {
            if bytes.len() >= compression.threshold_bytes {
                let compressed = zstd::encode_all(bytes, compression.level)
                    .map_err(|e| ContentError::compression(0, e.to_string()))?;
                if compressed.len() < bytes.len() {
                    return Ok((compressed, Encoding::Zstd));
                }
            }
        }
        Ok((bytes.to_vec(), Encoding::Raw))
    }
}

/// Finite, restartable sequence of byte chunks over one decoded payload.
pub struct ContentStream {
    data: Vec<u8>,
    chunk_bytes: usize,
    pos: usize,
}

impl ContentStream {
    fn new(data: Vec<u8>, chunk_bytes: usize) -> Self {
        Self {
            data,
            chunk_bytes: chunk_bytes.max(1),
            pos: 0,
        }
    }

    /// Total decoded length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rewind to the first chunk.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Consume the stream, returning the full payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Iterator for ContentStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.pos >= self.data.len() {
            return None;
        }
        let end = (self.pos + self.chunk_bytes).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> ContentStore {
        ContentStore::open(&dir.path().join("content.psc"), ContentOptions::default())
            .unwrap()
    }

    #[test]
    fn test_append_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let payload = b"how to optimize swift builds".to_vec();
        let loc = store.append(&payload).unwrap();
        assert_eq!(store.read(loc).unwrap(), payload);
    }

    #[test]
    fn test_blocks_are_aligned() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let a = store.append(b"x").unwrap();
        let b = store.append(b"yy").unwrap();
        assert_eq!(a.offset % 16, 0);
        assert_eq!(b.offset % 16, 0);
        assert!(b.offset > a.offset);
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.psc");
        let loc;
        {
            let mut store =
                ContentStore::open(&path, ContentOptions::default()).unwrap();
            loc = store.append(b"important bytes").unwrap();
            store.flush().unwrap();
        }

        // Flip one payload byte on disk.
        let mut raw = std::fs::read(&path).unwrap();
        let payload_start = (loc.offset + BLOCK_HEADER_SIZE) as usize;
        raw[payload_start] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let store = ContentStore::open(&path, ContentOptions::default()).unwrap();
        let err = store.read(loc).unwrap_err();
        assert!(matches!(err, ContentError::Corrupted { .. }));
        // And a stream over it yields nothing at all.
        assert!(store.stream(loc).is_err());
    }

    #[test]
    fn test_offset_near_u64_max_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for offset in [u64::MAX, u64::MAX - 1, u64::MAX - BLOCK_HEADER_SIZE + 1] {
            let err = store.read_at(offset).unwrap_err();
            assert!(matches!(err, ContentError::InvalidOffset { .. }));
        }
    }

    #[test]
    fn test_encode_then_append_encoded_matches_append() {
        let dir = TempDir::new().unwrap();
        let mut store = ContentStore::open(
            &dir.path().join("content.psc"),
            ContentOptions {
                compression: Some(CompressionOptions {
                    threshold_bytes: 64,
                    level: 3,
                }),
                ..ContentOptions::default()
            },
        )
        .unwrap();

        let payload = "chorus line ".repeat(200).into_bytes();
        let (stored, encoding) = store.codec().encode(&payload).unwrap();
        assert!(stored.len() < payload.len());

        let loc = store.append_encoded(&stored, encoding).unwrap();
        assert_eq!(store.read(loc).unwrap(), payload);
    }

    #[test]
    fn test_compression_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = ContentStore::open(
            &dir.path().join("content.psc"),
            ContentOptions {
                compression: Some(CompressionOptions {
                    threshold_bytes: 64,
                    level: 3,
                }),
                ..ContentOptions::default()
            },
        )
        .unwrap();

        let payload = "repeat me ".repeat(500).into_bytes();
        let loc = store.append(&payload).unwrap();
        // Stored block is smaller than the input.
        assert!((loc.length as usize) < payload.len());
        assert_eq!(store.read(loc).unwrap(), payload);
    }

    #[test]
    fn test_stream_chunks_and_reset() {
        let dir = TempDir::new().unwrap();
        let mut store = ContentStore::open(
            &dir.path().join("content.psc"),
            ContentOptions {
                chunk_bytes: 8,
                compression: None,
                ..ContentOptions::default()
            },
        )
        .unwrap();

        let payload: Vec<u8> = (0u8..30).collect();
        let loc = store.append(&payload).unwrap();

        let mut stream = store.stream(loc).unwrap();
        let chunks: Vec<Vec<u8>> = stream.by_ref().collect();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 8);
        assert_eq!(chunks[3].len(), 6);
        assert_eq!(chunks.concat(), payload);

        stream.reset();
        let again: Vec<u8> = stream.flatten().collect();
        assert_eq!(again, payload);
    }

    #[test]
    fn test_write_offset_recovered_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.psc");

        let expected;
        {
            let mut store =
                ContentStore::open(&path, ContentOptions::default()).unwrap();
            store.append(b"first").unwrap();
            store.append(b"second").unwrap();
            expected = store.write_offset();
            store.flush().unwrap();
        }
        {
            let store = ContentStore::open(&path, ContentOptions::default()).unwrap();
            assert_eq!(store.write_offset(), expected);
        }
    }

    #[test]
    fn test_torn_tail_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.psc");

        let cursor_after_first;
        {
            let mut store =
                ContentStore::open(&path, ContentOptions::default()).unwrap();
            store.append(b"complete block").unwrap();
            cursor_after_first = store.write_offset();
            store.flush().unwrap();
        }

        // Simulate a torn write: a header claiming more bytes than exist.
        {
            let mut raw = std::fs::read(&path).unwrap();
            let header = BlockHeader {
                crc32: 0,
                encoding: Encoding::Raw,
                size: u32::MAX,
            };
            let at = cursor_after_first as usize;
            header.encode_into(&mut raw[at..at + BLOCK_HEADER_SIZE as usize]);
            std::fs::write(&path, raw).unwrap();
        }

        let store = ContentStore::open(&path, ContentOptions::default()).unwrap();
        assert_eq!(store.write_offset(), cursor_after_first);
    }

    #[test]
    fn test_growth_preserves_earlier_blocks() {
        let dir = TempDir::new().unwrap();
        let mut store = ContentStore::open(
            &dir.path().join("content.psc"),
            ContentOptions {
                initial_bytes: 4096,
                compression: None,
                ..ContentOptions::default()
            },
        )
        .unwrap();

        let first = store.append(b"survives growth").unwrap();
        let big = vec![7u8; 64 * 1024];
        let second = store.append(&big).unwrap();

        assert_eq!(store.read(first).unwrap(), b"survives growth");
        assert_eq!(store.read(second).unwrap(), big);
    }
}
