use std::ptr::NonNull;

use crate::{
    chunk::{Chunk, OVERHEAD, Status},
    error::Error,
    macros::{debug, warning},
    source::MemorySource,
    utils::{ALIGNMENT, checked_align},
};

/// The single contiguous region every chunk lives in.
///
/// The arena only knows its bounds and the [`MemorySource`] it grows from.
/// Chunks tile it completely, from `start` to `end`:
///
/// ```text
///  start                                                        end
///   +--------+-------------+--------+---------------------------+
///   | Chunk  |    Chunk    | Chunk  |          Chunk            |
///   +--------+-------------+--------+---------------------------+
///                                    <------ last extension ---->
/// ```
///
/// `end` never moves backwards.
pub(crate) struct Arena<S> {
    source: S,
    start: Option<NonNull<u8>>,
    end: usize,
}

impl<S> Arena<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source,
            start: None,
            end: 0,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Address of the first chunk, or 0 before the first extension.
    #[inline]
    pub fn start(&self) -> usize {
        self.start.map_or(0, |start| start.as_ptr() as usize)
    }

    /// Address one past the last byte of the arena, or 0 before the first extension.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start()
    }

    pub fn first_chunk(&self) -> Option<Chunk> {
        self.start.map(Chunk::from_header)
    }

    #[inline]
    pub fn is_first(&self, chunk: Chunk) -> bool {
        chunk.addr() == self.start()
    }

    /// Tells whether a chunk starting at `addr` would be inside the arena.
    #[inline]
    pub fn holds_chunk_at(&self, addr: usize) -> bool {
        self.start.is_some() && addr >= self.start() && addr < self.end
    }
}

impl<S: MemorySource> Arena<S> {
    /// Grows the arena by enough bytes for a chunk with `min_bytes` of payload,
    /// but never by less than `alloc_min`, and returns the new region
    /// formatted as a single free chunk.
    ///
    /// The returned chunk is not linked in any free list and may sit right
    /// after a free chunk, merging them is up to the caller.
    pub fn extend(&mut self, min_bytes: usize, alloc_min: usize) -> Result<Chunk, Error> {
        let exhausted = Error::Exhausted { requested: min_bytes };

        let needed = min_bytes.checked_add(OVERHEAD).ok_or(exhausted.clone())?;
        let len = checked_align(needed.max(alloc_min), ALIGNMENT).ok_or(exhausted.clone())?;

        let Some(region) = self.source.grow(len) else {
            warning!("memory source refused to grow the arena by {len} bytes");
            return Err(exhausted);
        };

        let found = region.as_ptr() as usize;
        let expected = match self.start {
            Some(_) => self.end,
            None => crate::utils::align(found, ALIGNMENT),
        };

        if found != expected {
            // The bytes are lost: they cannot be merged with the rest of the arena.
            warning!("memory source returned region at {found:#x}, arena expected {expected:#x}");
            return Err(Error::Discontiguous { expected, found });
        }

        if self.start.is_none() {
            self.start = Some(region);
        }
        self.end = found + len;

        debug!("arena grown by {len} bytes, now {:#x}..{:#x}", self.start(), self.end);

        let chunk = Chunk::from_header(region);
        unsafe { chunk.format(len - OVERHEAD, Status::Free) };

        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FixedRegion;

    #[test]
    fn first_extension_sets_bounds() {
        let mut memory = vec![0u8; 4096];
        let mut arena = Arena::new(FixedRegion::new(&mut memory));

        assert!(arena.first_chunk().is_none());
        assert_eq!(arena.len(), 0);

        let chunk = arena.extend(100, 1024).unwrap();

        assert_eq!(arena.first_chunk(), Some(chunk));
        assert!(arena.is_first(chunk));
        assert_eq!(arena.len(), 1024);
        unsafe {
            assert_eq!(chunk.size(), 1024 - OVERHEAD);
            assert_eq!(chunk.status(), Status::Free);
            assert_eq!(chunk.end(), arena.end());
        }
    }

    #[test]
    fn big_requests_exceed_the_floor() {
        let mut memory = vec![0u8; 8192];
        let mut arena = Arena::new(FixedRegion::new(&mut memory));

        let chunk = arena.extend(2001, 1024).unwrap();

        unsafe {
            assert!(chunk.size() >= 2001);
            assert_eq!(chunk.size() % ALIGNMENT, 0);
        }
        assert_eq!(arena.len(), checked_align(2001 + OVERHEAD, ALIGNMENT).unwrap());
    }

    #[test]
    fn extensions_are_adjacent() {
        let mut memory = vec![0u8; 4096];
        let mut arena = Arena::new(FixedRegion::new(&mut memory));

        let first = arena.extend(8, 256).unwrap();
        let end = arena.end();
        let second = arena.extend(8, 256).unwrap();

        assert_eq!(second.addr(), end);
        assert!(arena.end() > end);
        unsafe {
            assert_eq!(first.physical_next(), second);
            assert_eq!(second.physical_prev(), first);
        }
        assert!(arena.holds_chunk_at(second.addr()));
        assert!(!arena.holds_chunk_at(arena.end()));
    }

    #[test]
    fn exhaustion_keeps_bounds() {
        let mut memory = vec![0u8; 512];
        let mut arena = Arena::new(FixedRegion::new(&mut memory));

        arena.extend(8, 256).unwrap();
        let end = arena.end();

        assert_eq!(arena.extend(4096, 256), Err(Error::Exhausted { requested: 4096 }));
        assert_eq!(arena.extend(usize::MAX, 256), Err(Error::Exhausted { requested: usize::MAX }));
        assert_eq!(arena.end(), end);
    }

    /// Hands out regions with a hole between them.
    struct Gappy<'a> {
        inner: FixedRegion<'a>,
    }

    unsafe impl MemorySource for Gappy<'_> {
        fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
            self.inner.grow(ALIGNMENT)?;
            self.inner.grow(len)
        }
    }

    #[test]
    fn discontiguous_regions_are_refused() {
        let mut memory = vec![0u8; 4096];
        let mut arena = Arena::new(Gappy {
            inner: FixedRegion::new(&mut memory),
        });

        // The very first region just has to be aligned.
        arena.extend(8, 256).unwrap();
        let end = arena.end();

        let err = arena.extend(8, 256).unwrap_err();
        assert_eq!(
            err,
            Error::Discontiguous {
                expected: end,
                found: end + ALIGNMENT
            }
        );
        assert_eq!(arena.end(), end);
    }
}
