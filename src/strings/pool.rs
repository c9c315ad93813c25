//! String pool implementation.
//!
//! On disk the pool is two files:
//! - an entries file (fixed-stride records: hash, offset, length,
//!   refcount), with the per-pool hash seed in the file header's meta
//!   word
//! - a content file of checksummed blocks holding the string bytes
//!
//! Entry indexes are stable and never reused; [`StringId`] is just an
//! entry index.

use std::collections::HashMap;
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::content::{ContentOptions, ContentStore};
use crate::mapped::{FixedRecord, RecordFile};

use super::errors::{StringsError, StringsResult};

/// Handle to an interned string (the pool entry index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(pub u32);

/// One pool entry.
///
/// Layout (24 bytes): hash u64 | content offset u64 | stored length u32 |
/// refcount u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringEntry {
    pub hash: u64,
    pub offset: u64,
    pub length: u32,
    pub refcount: u32,
}

impl FixedRecord for StringEntry {
    const STRIDE: usize = 24;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.refcount.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut u64buf = [0u8; 8];
        u64buf.copy_from_slice(&buf[0..8]);
        let hash = u64::from_le_bytes(u64buf);
        u64buf.copy_from_slice(&buf[8..16]);
        let offset = u64::from_le_bytes(u64buf);
        let mut u32buf = [0u8; 4];
        u32buf.copy_from_slice(&buf[16..20]);
        let length = u32::from_le_bytes(u32buf);
        u32buf.copy_from_slice(&buf[20..24]);
        let refcount = u32::from_le_bytes(u32buf);
        Self {
            hash,
            offset,
            length,
            refcount,
        }
    }
}

/// Interning statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    /// Distinct strings stored.
    pub unique: u64,
    /// Sum of reference counts (total interned, including duplicates).
    pub total_refs: u64,
    /// Entries whose refcount has dropped to zero.
    pub zero_refcount: u64,
    /// Bytes consumed in the pool's content file.
    pub stored_bytes: u64,
    /// total_refs / unique; 1.0 means no deduplication happened.
    pub dedup_ratio: f64,
}

/// Content-addressed string interner with refcounting.
pub struct StringPool {
    entries: RecordFile<StringEntry>,
    content: ContentStore,
    seed: u64,
    /// hash -> entry indexes with that hash (collision list).
    by_hash: HashMap<u64, Vec<u32>>,
    total_refs: u64,
    zero_refcount: u64,
}

impl StringPool {
    /// Open or create a pool from its entries and content file paths.
    ///
    /// A new pool draws a random hash seed and persists it in the
    /// entries file header; reopening reuses the stored seed so hashes
    /// stay comparable across sessions.
    pub fn open(entries_path: &Path, content_path: &Path) -> StringsResult<Self> {
        let mut entries: RecordFile<StringEntry> = RecordFile::open(entries_path, 256)?;
        // Interned strings are short; compression would be pure overhead.
        let content = ContentStore::open(
            content_path,
            ContentOptions {
                compression: None,
                ..ContentOptions::default()
            },
        )?;

        let seed = if entries.meta() == 0 {
            let seed = loop {
                let candidate: u64 = rand::random();
                if candidate != 0 {
                    break candidate;
                }
            };
            entries.set_meta(seed)?;
            seed
        } else {
            entries.meta()
        };

        let mut by_hash: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut total_refs = 0u64;
        let mut zero_refcount = 0u64;
        for index in 0..entries.len() {
            let entry = entries.get(index)?;
            by_hash.entry(entry.hash).or_default().push(index as u32);
            total_refs += entry.refcount as u64;
            if entry.refcount == 0 {
                zero_refcount += 1;
            }
        }

        Ok(Self {
            entries,
            content,
            seed,
            by_hash,
            total_refs,
            zero_refcount,
        })
    }

    /// Number of distinct strings in the pool.
    pub fn unique_count(&self) -> u64 {
        self.entries.len()
    }

    /// Intern a string: returns the existing entry (incrementing its
    /// refcount) when the same bytes are already stored, otherwise
    /// appends a new copy.
    pub fn intern(&mut self, s: &str) -> StringsResult<StringId> {
        let bytes = s.as_bytes();
        let hash = xxh3_64_with_seed(bytes, self.seed);

        if let Some(candidates) = self.by_hash.get(&hash) {
            for &index in candidates {
                let mut entry = self.entries.get(index as u64)?;
                // Hash hit is not enough; byte-verify to survive
                // collisions.
                let (stored, _) = self.content.read_at(entry.offset)?;
                if stored == bytes {
                    if entry.refcount == 0 {
                        self.zero_refcount -= 1;
                    }
                    entry.refcount += 1;
                    self.entries.put(index as u64, &entry)?;
                    self.total_refs += 1;
                    return Ok(StringId(index));
                }
            }
        }

        let location = self.content.append(bytes)?;
        let entry = StringEntry {
            hash,
            offset: location.offset,
            length: location.length,
            refcount: 1,
        };
        let index = self.entries.append(&entry)? as u32;
        self.by_hash.entry(hash).or_default().push(index);
        self.total_refs += 1;
        Ok(StringId(index))
    }

    /// Resolve an interned string back to its text.
    pub fn resolve(&self, id: StringId) -> StringsResult<String> {
        let entry = self
            .entries
            .get(id.0 as u64)
            .map_err(|_| StringsError::EntryNotFound(id.0))?;
        let (bytes, _) = self.content.read_at(entry.offset)?;
        String::from_utf8(bytes).map_err(|_| StringsError::InvalidUtf8(id.0))
    }

    /// Drop one reference. Entries that reach zero references are
    /// flagged for a future compactor, never reclaimed here.
    pub fn release(&mut self, id: StringId) -> StringsResult<()> {
        let mut entry = self
            .entries
            .get(id.0 as u64)
            .map_err(|_| StringsError::EntryNotFound(id.0))?;
        if entry.refcount == 0 {
            return Err(StringsError::RefcountUnderflow(id.0));
        }
        entry.refcount -= 1;
        if entry.refcount == 0 {
            self.zero_refcount += 1;
        }
        self.entries.put(id.0 as u64, &entry)?;
        self.total_refs -= 1;
        Ok(())
    }

    /// Current interning statistics.
    pub fn stats(&self) -> PoolStats {
        let unique = self.entries.len();
        PoolStats {
            unique,
            total_refs: self.total_refs,
            zero_refcount: self.zero_refcount,
            stored_bytes: self.content.write_offset(),
            dedup_ratio: if unique == 0 {
                0.0
            } else {
                self.total_refs as f64 / unique as f64
            },
        }
    }

    /// Durable flush of both backing files.
    pub fn flush(&self) -> StringsResult<()> {
        self.entries.flush()?;
        self.content.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_pool(dir: &TempDir) -> StringPool {
        StringPool::open(
            &dir.path().join("strings.psr"),
            &dir.path().join("strings.psc"),
        )
        .unwrap()
    }

    #[test]
    fn test_intern_resolve_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut pool = open_pool(&dir);

        let id = pool.intern("Swift Optimization").unwrap();
        assert_eq!(pool.resolve(id).unwrap(), "Swift Optimization");
    }

    #[test]
    fn test_interning_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut pool = open_pool(&dir);

        let first = pool.intern("hello").unwrap();
        let bytes_after_first = pool.stats().stored_bytes;

        for _ in 0..4 {
            assert_eq!(pool.intern("hello").unwrap(), first);
        }

        let stats = pool.stats();
        assert_eq!(stats.unique, 1);
        assert_eq!(stats.total_refs, 5);
        assert_eq!(stats.stored_bytes, bytes_after_first);
        assert!((stats.dedup_ratio - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_distinct_strings_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let mut pool = open_pool(&dir);

        let a = pool.intern("alpha").unwrap();
        let b = pool.intern("beta").unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.resolve(a).unwrap(), "alpha");
        assert_eq!(pool.resolve(b).unwrap(), "beta");
    }

    #[test]
    fn test_release_flags_but_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let mut pool = open_pool(&dir);

        let id = pool.intern("ephemeral").unwrap();
        pool.release(id).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.zero_refcount, 1);
        assert_eq!(stats.unique, 1);
        // Still resolvable until a compactor runs.
        assert_eq!(pool.resolve(id).unwrap(), "ephemeral");

        // Releasing below zero is an error.
        assert!(matches!(
            pool.release(id),
            Err(StringsError::RefcountUnderflow(_))
        ));
    }

    #[test]
    fn test_reintern_revives_zero_refcount_entry() {
        let dir = TempDir::new().unwrap();
        let mut pool = open_pool(&dir);

        let id = pool.intern("phoenix").unwrap();
        pool.release(id).unwrap();
        assert_eq!(pool.stats().zero_refcount, 1);

        let again = pool.intern("phoenix").unwrap();
        assert_eq!(again, id);
        assert_eq!(pool.stats().zero_refcount, 0);
    }

    #[test]
    fn test_pool_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let mut pool = open_pool(&dir);
            id = pool.intern("durable").unwrap();
            pool.intern("durable").unwrap();
            pool.flush().unwrap();
        }
        {
            let mut pool = open_pool(&dir);
            assert_eq!(pool.resolve(id).unwrap(), "durable");
            // Same seed, so the same bytes dedup to the same entry.
            assert_eq!(pool.intern("durable").unwrap(), id);
            assert_eq!(pool.stats().total_refs, 3);
        }
    }
}
