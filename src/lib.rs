//! # segalloc - boundary tag allocator with segregated free lists
//!
//! A general purpose `allocate`/`release` heap managing one contiguous arena
//! that only ever grows. Memory comes from a [`MemorySource`]: the program
//! break ([`Brk`]), a reserved range of address space ([`Reserved`]) or a
//! plain buffer ([`FixedRegion`]).
//!
//! ## Chunks
//!
//! The arena is tiled by chunks. Every chunk carries its size and status at
//! both ends, so both physical neighbours can be found in O(1):
//!
//! ```text
//!   +--------+-------------+--------+--------+---------+--------+
//!   | Header |   Payload   | Footer | Header | Payload | Footer |  ...
//!   +--------+-------------+--------+--------+---------+--------+
//!            ^                      ^
//!   pointer returned to the user    next chunk = payload + size + footer
//! ```
//!
//! ## Free lists
//!
//! Free chunks are linked through their headers into [`NUM_BUCKETS`] lists,
//! each one holding a power of two range of sizes. Allocation looks for the
//! best fit starting at the bucket of the requested size, splits off what is
//! left when it is big enough to be a chunk of its own, and grows the arena
//! when nothing fits. Release merges the chunk with any free neighbour before
//! filing it again.
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{FixedRegion, Heap};
//!
//! let mut memory = vec![0u8; 64 * 1024];
//! let mut heap = Heap::new(FixedRegion::new(&mut memory));
//!
//! let ptr = heap.allocate(100) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!     heap.release(ptr.cast());
//! }
//!
//! heap.verify().unwrap();
//! ```
//!
//! [`SegAlloc`] wraps a heap in a lock and implements
//! [`GlobalAlloc`](std::alloc::GlobalAlloc).
//!
//! ## Limitations
//!
//! - The arena never shrinks and memory is never given back to the system
//!   while the heap lives.
//! - [`Heap`] is single threaded, [`SegAlloc`] serialises every call.

mod arena;
mod chunk;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod list;
mod macros;
mod source;
mod utils;

pub use config::{Config, DEFAULT_ALLOC_MIN};
pub use error::Error;
pub use freelist::{NUM_BUCKETS, bucket_for};
pub use global::SegAlloc;
pub use heap::{Heap, Stats};
#[cfg(unix)]
pub use kernel::Brk;
pub use kernel::{DEFAULT_RESERVE, Reserved};
pub use source::{FixedRegion, MemorySource};
pub use utils::ALIGNMENT;

/// Bytes each chunk spends on its header and footer.
pub const CHUNK_OVERHEAD: usize = chunk::OVERHEAD;

/// Bytes between the start of a chunk and its payload.
pub const HEADER_SIZE: usize = chunk::HEADER_SIZE;
