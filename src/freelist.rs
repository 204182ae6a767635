use crate::{
    chunk::{Chunk, Status},
    list::List,
    utils::ALIGNMENT,
};

/// Number of size classes the free chunks are segregated into.
pub const NUM_BUCKETS: usize = 16;

/// Maps a payload size to its size class.
///
/// Sizes are measured in alignment units and every bucket covers twice the
/// range of the previous one. The last bucket takes everything that does not
/// fit in the others:
///
/// ```text
///  bucket:   0      1      2      3          15
///  units:   0..2   2..4   4..8   8..16 ...  32768..
/// ```
///
/// This has to be the only way of choosing a bucket, both when filing a chunk
/// and when looking for one, otherwise chunks get lost.
pub fn bucket_for(size: usize) -> usize {
    let mut units = size / ALIGNMENT;
    let mut bucket = 0;

    while units > 1 && bucket < NUM_BUCKETS - 1 {
        units >>= 1;
        bucket += 1;
    }

    bucket
}

/// Segregated free lists, one [`List`] of free chunks per size class.
///
/// ```text
///  buckets
///  +-----+
///  |  0  | -> None
///  +-----+     +------+    +------+
///  |  1  | --> | Free | -> | Free |
///  +-----+     +------+    +------+
///  | ... |
///  +-----+     +------+
///  | 15  | --> | Free |        (anything bigger than the other classes)
///  +-----+     +------+
/// ```
pub(crate) struct FreeLists {
    buckets: [List; NUM_BUCKETS],
}

impl FreeLists {
    pub const fn new() -> Self {
        Self {
            buckets: [const { List::new() }; NUM_BUCKETS],
        }
    }

    #[inline]
    pub fn bucket(&self, index: usize) -> &List {
        &self.buckets[index]
    }

    /// Total number of free chunks over every bucket.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(List::len).sum()
    }

    /// Files a free `chunk` under the bucket of its current size.
    ///
    /// **SAFETY**: `chunk` must be a free chunk not linked anywhere else.
    pub unsafe fn insert(&mut self, chunk: Chunk) {
        unsafe {
            debug_assert_eq!(chunk.status(), Status::Free);
            let bucket = bucket_for(chunk.size());
            self.buckets[bucket].push_front(chunk);
        }
    }

    /// Takes `chunk` out of its bucket. The chunk must not have been resized
    /// since it was inserted.
    ///
    /// **SAFETY**: `chunk` must be linked in this [`FreeLists`].
    pub unsafe fn remove(&mut self, chunk: Chunk) {
        unsafe {
            let bucket = bucket_for(chunk.size());
            self.buckets[bucket].remove(chunk);
        }
    }

    /// Returns the free chunk that fits `size` with the least slack.
    ///
    /// Buckets are visited from the one `size` maps to upwards. The whole
    /// bucket is scanned because it covers a range of sizes, but the search
    /// stops at the first bucket holding any fit: every chunk further up is
    /// bigger than anything in the current bucket. An exact fit ends the search
    /// right away.
    ///
    /// `size` must already be aligned.
    pub fn best_fit(&self, size: usize) -> Option<Chunk> {
        for list in &self.buckets[bucket_for(size)..] {
            let mut best: Option<(Chunk, usize)> = None;

            for chunk in list {
                let chunk_size = unsafe { chunk.size() };

                if chunk_size < size {
                    continue;
                }

                let diff = chunk_size - size;
                if diff == 0 {
                    return Some(chunk);
                }

                if best.is_none_or(|(_, best_diff)| diff < best_diff) {
                    best = Some((chunk, diff));
                }
            }

            if let Some((chunk, _)) = best {
                return Some(chunk);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OVERHEAD;
    use std::ptr::NonNull;

    /// Lays out free chunks of the given payload sizes back to back.
    fn free_chunks(memory: &mut [usize], sizes: &[usize]) -> Vec<Chunk> {
        let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
        let mut offset = 0;

        sizes
            .iter()
            .map(|&size| {
                let chunk = Chunk::from_header(unsafe { base.add(offset) });
                unsafe { chunk.format(size, Status::Free) };
                offset += OVERHEAD + size;
                chunk
            })
            .collect()
    }

    #[test]
    fn buckets_double_in_range() {
        let unit = ALIGNMENT;

        assert_eq!(bucket_for(0), 0);
        assert_eq!(bucket_for(unit), 0);
        assert_eq!(bucket_for(2 * unit), 1);
        assert_eq!(bucket_for(3 * unit), 1);
        assert_eq!(bucket_for(4 * unit), 2);
        assert_eq!(bucket_for(7 * unit), 2);
        assert_eq!(bucket_for(8 * unit), 3);
        assert_eq!(bucket_for(usize::MAX), NUM_BUCKETS - 1);
    }

    #[test]
    fn bucket_for_is_monotonic() {
        let mut last = 0;

        for size in (0..(1 << 20)).step_by(ALIGNMENT) {
            let bucket = bucket_for(size);
            assert!(bucket >= last);
            assert!(bucket < NUM_BUCKETS);
            last = bucket;
        }
    }

    #[test]
    fn insert_and_remove_track_buckets() {
        let mut memory = vec![0usize; 256];
        let chunks = free_chunks(&mut memory, &[ALIGNMENT, 16 * ALIGNMENT, 16 * ALIGNMENT]);
        let mut lists = FreeLists::new();

        unsafe {
            for &chunk in &chunks {
                lists.insert(chunk);
            }
        }

        assert_eq!(lists.len(), 3);
        assert_eq!(lists.bucket(0).len(), 1);
        assert_eq!(lists.bucket(bucket_for(16 * ALIGNMENT)).len(), 2);

        unsafe { lists.remove(chunks[1]) };

        assert_eq!(lists.len(), 2);
        assert_eq!(lists.bucket(bucket_for(16 * ALIGNMENT)).iter().next(), Some(chunks[2]));
    }

    #[test]
    fn best_fit_prefers_smallest_slack() {
        let mut memory = vec![0usize; 512];
        let chunks = free_chunks(&mut memory, &[64, 256, 128]);
        let mut lists = FreeLists::new();

        unsafe {
            for &chunk in &chunks {
                lists.insert(chunk);
            }
        }

        assert_eq!(lists.best_fit(104), Some(chunks[2]));
        assert_eq!(lists.best_fit(64), Some(chunks[0]));
        assert_eq!(lists.best_fit(512), None);
    }

    #[test]
    fn best_fit_scans_the_whole_bucket() {
        // Both sizes share a bucket; the closer one is filed first so it ends up last.
        let loose = 15 * ALIGNMENT;
        let tight = 13 * ALIGNMENT;
        assert_eq!(bucket_for(loose), bucket_for(tight));

        let mut memory = vec![0usize; 256];
        let chunks = free_chunks(&mut memory, &[tight, loose]);
        let mut lists = FreeLists::new();

        unsafe {
            lists.insert(chunks[0]);
            lists.insert(chunks[1]);
        }

        assert_eq!(lists.best_fit(12 * ALIGNMENT), Some(chunks[0]));
    }

    #[test]
    fn exact_fit_wins() {
        let mut memory = vec![0usize; 256];
        let chunks = free_chunks(&mut memory, &[14 * ALIGNMENT, 12 * ALIGNMENT, 13 * ALIGNMENT]);
        let mut lists = FreeLists::new();

        unsafe {
            for &chunk in &chunks {
                lists.insert(chunk);
            }
        }

        assert_eq!(lists.best_fit(12 * ALIGNMENT), Some(chunks[1]));
    }
}
