use std::{marker::PhantomData, ptr::NonNull};

use crate::utils::ALIGNMENT;

/// Provider of raw memory for the arena. This is the only way the allocator
/// gets memory: it asks for more bytes at the end of what it already has,
/// in the spirit of moving the program break.
///
/// ```text
///   first grow(a)          grow(b)               grow(c)
///  +--------------+---------------------+-------------------+
///  |      a       |          b          |         c         |
///  +--------------+---------------------+-------------------+
///  ^ start                                                  ^ end
/// ```
///
/// # Safety
///
/// Implementors must guarantee that:
/// - every successful `grow(len)` returns `len` readable and writable bytes
///   that stay valid for as long as the source lives;
/// - the first region is aligned to [`ALIGNMENT`];
/// - every following region starts exactly where the previous one ended.
///
/// The arena checks the last two points again and refuses regions that break
/// them, but it cannot check the first one.
pub unsafe trait MemorySource {
    /// Extends the region by exactly `len` bytes and returns the address of the
    /// first new byte, or `None` if no more memory is available. `len` is always
    /// a multiple of [`ALIGNMENT`].
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// [`MemorySource`] backed by a caller provided buffer, consumed front to back.
///
/// Useful for tests and for environments without an operating system. The
/// start of the buffer is aligned up to [`ALIGNMENT`], so a few bytes may be
/// lost.
pub struct FixedRegion<'a> {
    base: NonNull<u8>,
    capacity: usize,
    used: usize,
    marker: PhantomData<&'a mut [u8]>,
}

// SAFETY: a FixedRegion is an exclusive borrow of its buffer.
unsafe impl Send for FixedRegion<'_> {}

impl<'a> FixedRegion<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        let len = memory.len();
        let base = NonNull::from(memory).cast::<u8>();
        let offset = base.align_offset(ALIGNMENT).min(len);

        Self {
            base: unsafe { base.add(offset) },
            capacity: len - offset,
            used: 0,
            marker: PhantomData,
        }
    }

    /// Bytes that can be handed out in total.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.used
    }
}

unsafe impl MemorySource for FixedRegion<'_> {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let new_used = self.used.checked_add(len)?;
        if new_used > self.capacity {
            return None;
        }

        let addr = unsafe { self.base.add(self.used) };
        self.used = new_used;

        Some(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_contiguous_and_aligned() {
        let mut memory = vec![0u8; 256];
        let mut source = FixedRegion::new(&mut memory);

        let first = source.grow(64).unwrap();
        let second = source.grow(32).unwrap();

        assert_eq!(first.as_ptr() as usize % ALIGNMENT, 0);
        assert_eq!(first.as_ptr() as usize + 64, second.as_ptr() as usize);
        assert_eq!(source.used(), 96);
    }

    #[test]
    fn misaligned_buffers_are_aligned_up() {
        let mut memory = vec![0u8; 128];
        let source = FixedRegion::new(&mut memory[1..]);

        assert_eq!(source.base.as_ptr() as usize % ALIGNMENT, 0);
        assert!(source.capacity() <= 127);
        assert!(source.capacity() >= 127 - ALIGNMENT);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut memory = vec![0u8; 64];
        let mut source = FixedRegion::new(&mut memory);
        let capacity = source.capacity();

        assert!(source.grow(capacity + ALIGNMENT).is_none());
        assert!(source.grow(capacity).is_some());
        assert!(source.grow(ALIGNMENT).is_none());
        assert!(source.grow(usize::MAX).is_none());
    }
}
