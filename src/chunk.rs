use std::{mem, ptr::NonNull};

use crate::utils::ALIGNMENT;

/// Size of the chunk header in bytes: packed size/status word plus the two free list links.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Size of the chunk footer in bytes.
pub(crate) const FOOTER_SIZE: usize = mem::size_of::<Footer>();

/// Bytes every chunk spends on boundary tags, whatever its payload size.
pub(crate) const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// A free remainder smaller than this is not worth its own chunk.
pub(crate) const MIN_SPLIT: usize = OVERHEAD + ALIGNMENT;

const STATUS_MASK: usize = 1;
const SIZE_MASK: usize = !STATUS_MASK;

/// This is the structure of a chunk. Size and status are duplicated in the
/// footer so the chunk that physically precedes any other can be found
/// without walking the heap:
///
/// ```text
/// +---------------------+ <------+
/// |   size  | status    |        |
/// +---------------------+        |
/// |      next_free      |        | -> Header
/// +---------------------+        |
/// |      prev_free      |        |
/// +---------------------+ <------+ <- payload returned to the user
/// |       Payload       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// |   size  | status    |        | -> Footer
/// +---------------------+ <------+
/// ```
///
/// Sizes are always multiples of [`ALIGNMENT`], which leaves the lowest bit of
/// the size word free to store the status.
#[repr(C)]
pub(crate) struct Header {
    size_and_status: usize,
    next_free: Option<Chunk>,
    prev_free: Option<Chunk>,
}

#[repr(C)]
struct Footer {
    size_and_status: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Free = 0,
    InUse = 1,
}

/// Handle to a chunk placed somewhere inside the arena.
///
/// A `Chunk` is only an address. All the accessors are `unsafe` because they
/// read or write the arena through it, so the caller must guarantee that the
/// address really is the header of a chunk inside a live arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Chunk(NonNull<Header>);

impl Chunk {
    /// Chunk whose header starts at `addr`.
    #[inline]
    pub fn from_header(addr: NonNull<u8>) -> Self {
        Self(addr.cast())
    }

    /// Chunk owning `payload`, a pointer previously returned by [`Chunk::payload`].
    ///
    /// **SAFETY**: `payload` must be at least [`HEADER_SIZE`] bytes past the start of
    /// the allocation it belongs to.
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        unsafe { Self::from_header(payload.sub(HEADER_SIZE)) }
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    fn as_bytes(self) -> NonNull<u8> {
        self.0.cast()
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        unsafe { self.as_bytes().add(HEADER_SIZE) }
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { (*self.0.as_ptr()).size_and_status & SIZE_MASK }
    }

    #[inline]
    pub unsafe fn status(self) -> Status {
        unsafe {
            match (*self.0.as_ptr()).size_and_status & STATUS_MASK {
                0 => Status::Free,
                _ => Status::InUse,
            }
        }
    }

    /// Writes the header only. The footer must be kept in sync separately
    /// with [`Chunk::write_footer`].
    #[inline]
    pub unsafe fn set_size_and_status(self, size: usize, status: Status) {
        debug_assert_eq!(size % ALIGNMENT, 0);
        unsafe {
            (*self.0.as_ptr()).size_and_status = (size & SIZE_MASK) | status as usize;
        }
    }

    #[inline]
    fn footer(self, size: usize) -> *mut Footer {
        unsafe { self.as_bytes().add(HEADER_SIZE + size).cast::<Footer>().as_ptr() }
    }

    /// Copies the header's size and status into the footer.
    #[inline]
    pub unsafe fn write_footer(self) {
        unsafe {
            let word = (*self.0.as_ptr()).size_and_status;
            (*self.footer(self.size())).size_and_status = word;
        }
    }

    /// Header and footer in one go. Every state change goes through here.
    #[inline]
    pub unsafe fn format(self, size: usize, status: Status) {
        unsafe {
            self.set_size_and_status(size, status);
            self.write_footer();
        }
    }

    /// Tells whether the footer still agrees with the header.
    #[inline]
    pub unsafe fn footer_matches(self) -> bool {
        unsafe { (*self.0.as_ptr()).size_and_status == (*self.footer(self.size())).size_and_status }
    }

    /// Address of the first byte after this chunk's footer.
    #[inline]
    pub unsafe fn end(self) -> usize {
        unsafe { self.addr() + OVERHEAD + self.size() }
    }

    /// Like [`Chunk::end`], for when the header may hold garbage.
    #[inline]
    pub unsafe fn checked_end(self) -> Option<usize> {
        unsafe {
            self.size()
                .checked_add(OVERHEAD)
                .and_then(|len| self.addr().checked_add(len))
        }
    }

    /// The chunk starting right after this one's footer. The caller has to
    /// check the result against the arena end before touching it.
    #[inline]
    pub unsafe fn physical_next(self) -> Chunk {
        unsafe { Self::from_header(self.as_bytes().add(OVERHEAD + self.size())) }
    }

    /// Size recorded in the footer sitting right before this chunk's header.
    ///
    /// **SAFETY**: this chunk must not be the first one of the arena.
    #[inline]
    pub unsafe fn prev_footer_size(self) -> usize {
        unsafe {
            let footer = self.as_bytes().sub(FOOTER_SIZE).cast::<Footer>();
            (*footer.as_ptr()).size_and_status & SIZE_MASK
        }
    }

    /// The chunk that ends right before this one starts, found through its footer.
    ///
    /// **SAFETY**: this chunk must not be the first one of the arena.
    #[inline]
    pub unsafe fn physical_prev(self) -> Chunk {
        unsafe {
            let size = self.prev_footer_size();
            Self::from_header(self.as_bytes().sub(OVERHEAD + size))
        }
    }

    #[inline]
    pub unsafe fn next_free(self) -> Option<Chunk> {
        unsafe { (*self.0.as_ptr()).next_free }
    }

    #[inline]
    pub unsafe fn prev_free(self) -> Option<Chunk> {
        unsafe { (*self.0.as_ptr()).prev_free }
    }

    #[inline]
    pub unsafe fn set_next_free(self, next: Option<Chunk>) {
        unsafe { (*self.0.as_ptr()).next_free = next }
    }

    #[inline]
    pub unsafe fn set_prev_free(self, prev: Option<Chunk>) {
        unsafe { (*self.0.as_ptr()).prev_free = prev }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word aligned scratch memory for placing chunks by hand.
    fn scratch(words: usize) -> Vec<usize> {
        vec![0usize; words]
    }

    fn chunk_at(memory: &mut [usize], offset: usize) -> Chunk {
        let base = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
        Chunk::from_header(unsafe { base.add(offset) })
    }

    #[test]
    fn overhead_is_word_aligned() {
        assert_eq!(HEADER_SIZE, 3 * ALIGNMENT);
        assert_eq!(FOOTER_SIZE, ALIGNMENT);
        assert_eq!(MIN_SPLIT % ALIGNMENT, 0);
    }

    #[test]
    fn size_and_status_share_one_word() {
        let mut memory = scratch(32);
        let chunk = chunk_at(&mut memory, 0);

        unsafe {
            chunk.format(8 * ALIGNMENT, Status::InUse);
            assert_eq!(chunk.size(), 8 * ALIGNMENT);
            assert_eq!(chunk.status(), Status::InUse);
            assert!(chunk.footer_matches());

            chunk.set_size_and_status(8 * ALIGNMENT, Status::Free);
            assert!(!chunk.footer_matches());
            chunk.write_footer();
            assert!(chunk.footer_matches());
            assert_eq!(chunk.status(), Status::Free);
        }
    }

    #[test]
    fn physical_neighbours() {
        let mut memory = scratch(64);
        let first = chunk_at(&mut memory, 0);
        let first_size = 4 * ALIGNMENT;
        let second = chunk_at(&mut memory, OVERHEAD + first_size);

        unsafe {
            first.format(first_size, Status::Free);
            second.format(2 * ALIGNMENT, Status::InUse);

            assert_eq!(first.physical_next(), second);
            assert_eq!(second.physical_prev(), first);
            assert_eq!(first.end(), second.addr());
            assert_eq!(Chunk::from_payload(second.payload()), second);
        }
    }
}
