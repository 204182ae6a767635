//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

use std::mem;

/// Alignment unit of every chunk and payload: the computer's pointer size.
pub const ALIGNMENT: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This method is used to align chunk sizes to be a multiple of [`ALIGNMENT`]
/// and committed regions to be a multiple of the page size.
pub const fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around the
/// top of the address space.
pub const fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(aligment - 1) {
        Some(value) => Some(value & !(aligment - 1)),
        None => None,
    }
}
