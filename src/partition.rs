//! Splits a file size into the chunk set every session works from.

use crate::models::Chunk;

/// Files below this size are split into a fixed number of chunks.
pub const SMALL_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;
/// Chunk count used for files below [`SMALL_FILE_THRESHOLD`].
pub const SMALL_FILE_CHUNKS: u64 = 10;
/// Chunk size used for everything else.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Produces the full, ordered chunk set for a file of `file_size` bytes.
///
/// The result tiles `[0, file_size)` exactly; every chunk starts out
/// NotDownloaded. An empty file yields no chunks.
pub fn partition(file_size: u64) -> Vec<Chunk> {
    if file_size == 0 {
        return Vec::new();
    }

    if file_size < SMALL_FILE_THRESHOLD {
        let block = file_size / SMALL_FILE_CHUNKS;
        if block == 0 {
            return vec![Chunk::new(0, file_size - 1)];
        }
        let mut chunks = Vec::with_capacity(SMALL_FILE_CHUNKS as usize);
        for i in 0..SMALL_FILE_CHUNKS {
            let start = i * block;
            // last chunk absorbs the remainder
            let end = if i == SMALL_FILE_CHUNKS - 1 {
                file_size - 1
            } else {
                start + block - 1
            };
            chunks.push(Chunk::new(start, end));
        }
        return chunks;
    }

    let mut chunks = Vec::with_capacity(file_size.div_ceil(CHUNK_SIZE) as usize);
    let mut start = 0;
    while start < file_size {
        let end = (start + CHUNK_SIZE - 1).min(file_size - 1);
        chunks.push(Chunk::new(start, end));
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_tiles(chunks: &[Chunk], file_size: u64) {
        let mut next = 0;
        for c in chunks {
            assert_eq!(c.start, next, "gap or overlap at {}", c.start);
            assert!(c.end >= c.start);
            assert!(!c.is_downloaded());
            next = c.end + 1;
        }
        assert_eq!(next, file_size);
    }

    #[test]
    fn empty_file_has_no_chunks() {
        assert!(partition(0).is_empty());
    }

    #[test]
    fn tiny_file_is_one_chunk() {
        let chunks = partition(7);
        assert_eq!(chunks, vec![Chunk::new(0, 6)]);
    }

    #[test]
    fn small_file_splits_into_ten() {
        let chunks = partition(5_000_000);
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.len() == 500_000));
        assert_tiles(&chunks, 5_000_000);
    }

    #[test]
    fn small_file_remainder_goes_to_last_chunk() {
        let chunks = partition(1003);
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[9].len(), 103);
        assert_tiles(&chunks, 1003);
    }

    #[test]
    fn large_file_truncates_last_chunk() {
        let chunks = partition(25_000_000);
        assert_eq!(chunks.len(), 24);
        assert!(chunks[..23].iter().all(|c| c.len() == CHUNK_SIZE));
        let last = chunks[23];
        assert_eq!(last.start, 24_117_248);
        assert_eq!(last.end, 24_999_999);
        assert_eq!(last.len(), 882_752);
        assert_tiles(&chunks, 25_000_000);
    }

    #[test]
    fn threshold_switches_to_fixed_chunks() {
        let chunks = partition(SMALL_FILE_THRESHOLD);
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.len() == CHUNK_SIZE));
    }

    proptest! {
        #[test]
        fn chunks_tile_the_file(file_size in 0u64..64 * 1024 * 1024) {
            let chunks = partition(file_size);
            let mut next = 0;
            for c in &chunks {
                prop_assert_eq!(c.start, next);
                prop_assert!(c.end >= c.start);
                next = c.end + 1;
            }
            prop_assert_eq!(next, file_size);
        }
    }
}
