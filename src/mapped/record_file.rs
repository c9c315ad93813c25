//! Page-aligned memory-mapped record file.
//!
//! On-disk layout:
//!
//! ```text
//! +--------------------------+
//! | Header page (4096 bytes) |
//! |   magic: b"PSRF"  (u32)  |
//! |   version: u32           |
//! |   stride: u32            |
//! |   pad: u32               |
//! |   record count: u64      |
//! |   meta: u64              |
//! |   (rest zeroed)          |
//! +--------------------------+
//! | record 0                 |
//! | record 1                 |
//! | ...                      |
//! +--------------------------+
//! ```
//!
//! All integers are little-endian. The file grows in page multiples and
//! never shrinks. Records never move once written.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::observability::Logger;

use super::errors::{MappedError, MappedResult};

/// OS page size assumed for file growth and alignment.
pub const PAGE_SIZE: u64 = 4096;

const MAGIC: u32 = u32::from_le_bytes(*b"PSRF");
const VERSION: u32 = 1;
const HEADER_SIZE: u64 = PAGE_SIZE;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_STRIDE: usize = 8;
const OFF_COUNT: usize = 16;
const OFF_META: usize = 24;

/// Fixed-width binary codec for a record type.
///
/// Implementations define an explicit byte layout; the engine never
/// relies on in-memory struct layout matching the file format.
pub trait FixedRecord: Sized {
    /// Exact encoded size in bytes.
    const STRIDE: usize;

    /// Encode into a buffer of exactly `STRIDE` bytes.
    fn encode_into(&self, buf: &mut [u8]);

    /// Decode from a buffer of exactly `STRIDE` bytes.
    fn decode_from(buf: &[u8]) -> Self;
}

/// Growable memory-mapped store of fixed-stride records.
#[derive(Debug)]
pub struct RecordFile<T: FixedRecord> {
    path: PathBuf,
    file: std::fs::File,
    map: MmapMut,
    /// Number of records written (mirrored in the header).
    len: u64,
    /// Number of records the current mapping can hold.
    capacity: u64,
    _marker: PhantomData<T>,
}

impl<T: FixedRecord> RecordFile<T> {
    /// Open or create a record file with at least `initial_capacity`
    /// record slots.
    ///
    /// # Errors
    ///
    /// - `PS_MAP_FAILED` if the file cannot be created, sized, or mapped
    /// - `PS_FILE_CORRUPTED` if an existing header is invalid
    pub fn open(path: &Path, initial_capacity: u64) -> MappedResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                MappedError::map_failed(
                    format!("failed to open record file: {}", path.display()),
                    e,
                )
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| MappedError::map_failed("failed to read file metadata", e))?
            .len();

        let is_new = file_len == 0;
        if is_new {
            let bytes = Self::size_for(initial_capacity.max(1));
            file.set_len(bytes).map_err(|e| {
                MappedError::map_failed(
                    format!("failed to size new record file to {} bytes", bytes),
                    e,
                )
            })?;
        } else if file_len < HEADER_SIZE {
            return Err(MappedError::corrupted(format!(
                "record file shorter than header: {} bytes",
                file_len
            )));
        }

        // SAFETY: the engine owns this file exclusively for the lifetime
        // of the store; no other process mutates it.
        let mut map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| {
            MappedError::map_failed(format!("mmap failed for {}", path.display()), e)
        })?;

        let (len, capacity) = if is_new {
            map[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
            map[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&VERSION.to_le_bytes());
            map[OFF_STRIDE..OFF_STRIDE + 4]
                .copy_from_slice(&(T::STRIDE as u32).to_le_bytes());
            map[OFF_COUNT..OFF_COUNT + 8].copy_from_slice(&0u64.to_le_bytes());
            map[OFF_META..OFF_META + 8].copy_from_slice(&0u64.to_le_bytes());
            map.flush()
                .map_err(|e| MappedError::map_failed("failed to flush new header", e))?;
            (0, Self::capacity_of(map.len() as u64))
        } else {
            let magic = read_u32(&map, OFF_MAGIC);
            if magic != MAGIC {
                return Err(MappedError::corrupted(format!(
                    "bad record file magic: {:08x}",
                    magic
                )));
            }
            let version = read_u32(&map, OFF_VERSION);
            if version != VERSION {
                return Err(MappedError::corrupted(format!(
                    "unsupported record file version: {}",
                    version
                )));
            }
            let stride = read_u32(&map, OFF_STRIDE) as usize;
            if stride != T::STRIDE {
                return Err(MappedError::corrupted(format!(
                    "stride mismatch: file has {}, expected {}",
                    stride,
                    T::STRIDE
                )));
            }
            let len = read_u64(&map, OFF_COUNT);
            let capacity = Self::capacity_of(map.len() as u64);
            if len > capacity {
                return Err(MappedError::corrupted(format!(
                    "record count {} exceeds capacity {}",
                    len, capacity
                )));
            }
            (len, capacity)
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            len,
            capacity,
            _marker: PhantomData,
        })
    }

    fn size_for(capacity: u64) -> u64 {
        page_align(HEADER_SIZE + capacity * T::STRIDE as u64)
    }

    fn capacity_of(file_bytes: u64) -> u64 {
        file_bytes.saturating_sub(HEADER_SIZE) / T::STRIDE as u64
    }

    /// Number of records written.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record slots available without growing.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opaque per-file metadata word in the header (e.g. a hash seed).
    pub fn meta(&self) -> u64 {
        read_u64(&self.map, OFF_META)
    }

    /// Set the per-file metadata word and flush the header.
    pub fn set_meta(&mut self, meta: u64) -> MappedResult<()> {
        self.map[OFF_META..OFF_META + 8].copy_from_slice(&meta.to_le_bytes());
        self.map
            .flush_range(0, HEADER_SIZE as usize)
            .map_err(|e| MappedError::sync_failed("failed to flush header meta", e))
    }

    fn record_range(&self, index: u64) -> std::ops::Range<usize> {
        let start = (HEADER_SIZE + index * T::STRIDE as u64) as usize;
        start..start + T::STRIDE
    }

    /// Bounds-checked read of the record at `index`.
    ///
    /// # Errors
    ///
    /// `PS_INVALID_INDEX` if `index >= len()`.
    pub fn get(&self, index: u64) -> MappedResult<T> {
        if index >= self.len {
            return Err(MappedError::invalid_index(index, self.len));
        }
        Ok(T::decode_from(&self.map[self.record_range(index)]))
    }

    /// In-place overwrite of the record at `index`, followed by an
    /// asynchronous flush. An unconfirmed flush is logged, not fatal.
    pub fn put(&mut self, index: u64, record: &T) -> MappedResult<()> {
        if index >= self.len {
            return Err(MappedError::invalid_index(index, self.len));
        }
        let range = self.record_range(index);
        record.encode_into(&mut self.map[range.clone()]);
        if let Err(e) = self.map.flush_async_range(range.start, T::STRIDE) {
            Logger::warn(
                "record_flush_unconfirmed",
                &[
                    ("path", &self.path.display().to_string()),
                    ("index", &index.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
        Ok(())
    }

    /// Append a record, growing the file if needed, and return its index.
    ///
    /// # Errors
    ///
    /// `PS_REMAP_FAILED` if growth is required and the remap fails; the
    /// prior mapping stays usable and no record is appended.
    pub fn append(&mut self, record: &T) -> MappedResult<u64> {
        if self.len == self.capacity {
            self.grow(self.len + 1)?;
        }
        let index = self.len;
        let range = self.record_range(index);
        record.encode_into(&mut self.map[range.clone()]);

        self.len += 1;
        self.map[OFF_COUNT..OFF_COUNT + 8].copy_from_slice(&self.len.to_le_bytes());

        if let Err(e) = self.map.flush_async_range(range.start, T::STRIDE) {
            Logger::warn(
                "record_flush_unconfirmed",
                &[
                    ("path", &self.path.display().to_string()),
                    ("index", &index.to_string()),
                    ("error", &e.to_string()),
                ],
            );
        }
        Ok(index)
    }

    /// Grow the file so it can hold at least `min_capacity` records.
    ///
    /// The file is extended in page multiples (at least doubling) and
    /// remapped. Extending happens before the remap, so a failed remap
    /// leaves the prior mapping intact and usable.
    fn grow(&mut self, min_capacity: u64) -> MappedResult<()> {
        let current_bytes = self.map.len() as u64;
        let needed = Self::size_for(min_capacity);
        let new_bytes = page_align(needed.max(current_bytes * 2));

        self.file.set_len(new_bytes).map_err(|e| {
            MappedError::remap_failed(
                format!("failed to extend record file to {} bytes", new_bytes),
                e,
            )
        })?;

        // SAFETY: same exclusivity argument as in `open`. The old mapping
        // remains valid until replaced below.
        let new_map = unsafe { MmapOptions::new().map_mut(&self.file) }.map_err(|e| {
            MappedError::remap_failed(
                format!("remap failed for {}", self.path.display()),
                e,
            )
        })?;

        self.map = new_map;
        self.capacity = Self::capacity_of(new_bytes);
        Ok(())
    }

    /// Asynchronous flush of the whole mapping.
    pub fn flush_async(&self) -> MappedResult<()> {
        self.map
            .flush_async()
            .map_err(|e| MappedError::sync_failed("async flush unconfirmed", e))
    }

    /// Durable flush of the whole mapping.
    pub fn flush(&self) -> MappedResult<()> {
        self.map
            .flush()
            .map_err(|e| MappedError::sync_failed("flush unconfirmed", e))
    }
}

/// Round `n` up to the next multiple of the page size.
pub(crate) fn page_align(n: u64) -> u64 {
    n.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
