use std::ptr::{self, NonNull};

use crate::{
    arena::Arena,
    chunk::{Chunk, HEADER_SIZE, MIN_SPLIT, OVERHEAD, Status},
    config::Config,
    error::Error,
    freelist::{FreeLists, NUM_BUCKETS, bucket_for},
    macros::{error, trace},
    source::MemorySource,
    utils::{ALIGNMENT, checked_align},
};

/// Boundary tag allocator over a single growable arena.
///
/// Free chunks are kept in segregated, size classed lists (see
/// [`crate::freelist::bucket_for`]) and served best fit. Released chunks are
/// merged with their free physical neighbours right away, which keeps two free
/// chunks from ever sitting next to each other:
///
/// ```text
///                              allocate(size)
///                                    |
///          +----------- bucket_for(size) .. NUM_BUCKETS ----------+
///          |                                                      |
///     best fit found?  -- no -->  Arena::extend  --> search again |
///          |                                                      |
///         yes                                                     |
///          |                                                      |
///     split if the rest is worth a chunk, hand out the payload <--+
/// ```
///
/// The heap is single threaded. See [`crate::SegAlloc`] for a locked version
/// usable as `#[global_allocator]`.
pub struct Heap<S> {
    arena: Arena<S>,
    free: FreeLists,
    config: Config,
}

/// Snapshot of the heap, computed by walking every chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes obtained from the memory source so far.
    pub arena_bytes: usize,
    pub chunks: usize,
    pub free_chunks: usize,
    /// Payload bytes of free chunks.
    pub free_bytes: usize,
    /// Payload bytes of chunks in use, slack included.
    pub in_use_bytes: usize,
    pub largest_free: usize,
}

// SAFETY: the heap owns its arena, nothing else points into it.
unsafe impl<S: Send> Send for Heap<S> {}

/// Invariant violations are not recoverable: the arena can no longer be trusted.
#[cold]
fn corrupted(err: Error) -> ! {
    error!("{err}, aborting");
    std::process::abort()
}

impl<S> Heap<S> {
    pub const fn new(source: S) -> Self {
        Self::with_config(source, Config::new())
    }

    pub const fn with_config(source: S, config: Config) -> Self {
        Self {
            arena: Arena::new(source),
            free: FreeLists::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        self.arena.source()
    }

    /// Lowest address of the arena, 0 until the first allocation.
    pub fn arena_start(&self) -> usize {
        self.arena.start()
    }

    /// One past the highest address of the arena, 0 until the first allocation.
    pub fn arena_end(&self) -> usize {
        self.arena.end()
    }

    /// Iterates over every chunk in address order.
    fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        let end = self.arena.end();

        std::iter::successors(self.arena.first_chunk(), move |chunk| {
            let next = unsafe { chunk.physical_next() };
            (next.addr() < end).then_some(next)
        })
    }

    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            arena_bytes: self.arena.len(),
            ..Stats::default()
        };

        for chunk in self.chunks() {
            let (size, status) = unsafe { (chunk.size(), chunk.status()) };
            stats.chunks += 1;

            match status {
                Status::Free => {
                    stats.free_chunks += 1;
                    stats.free_bytes += size;
                    stats.largest_free = stats.largest_free.max(size);
                }
                Status::InUse => stats.in_use_bytes += size,
            }
        }

        stats
    }

    /// Walks the whole heap and checks every invariant the allocator relies on:
    ///
    /// - chunks tile the arena exactly, with aligned sizes and headers that
    ///   agree with their footers;
    /// - no two free chunks are physically adjacent;
    /// - every free chunk is linked in the bucket its size maps to, the links
    ///   are consistent in both directions and nothing else is linked.
    ///
    /// This is O(chunks), meant for tests and debugging.
    pub fn verify(&self) -> Result<(), Error> {
        let broken = |chunk: Chunk, reason| Error::Corrupted {
            addr: chunk.addr(),
            reason,
        };

        let end = self.arena.end();
        let mut free_chunks = 0;
        let mut last_free = false;
        let mut cursor = self.arena.first_chunk();

        while let Some(chunk) = cursor {
            unsafe {
                if chunk.checked_end().is_none_or(|chunk_end| chunk_end > end) {
                    return Err(broken(chunk, "chunk runs past the arena end"));
                }
                if chunk.size() % ALIGNMENT != 0 {
                    return Err(broken(chunk, "chunk size is not aligned"));
                }
                if !chunk.footer_matches() {
                    return Err(broken(chunk, "footer does not match header"));
                }

                let free = chunk.status() == Status::Free;
                if free && last_free {
                    return Err(broken(chunk, "adjacent free chunks were not merged"));
                }
                if free {
                    free_chunks += 1;
                }
                last_free = free;

                cursor = (chunk.end() < end).then(|| chunk.physical_next());
            }
        }

        let mut linked = 0;
        for bucket in 0..NUM_BUCKETS {
            let list = self.free.bucket(bucket);
            let mut prev = None;

            for chunk in list {
                unsafe {
                    if !self.arena.holds_chunk_at(chunk.addr()) {
                        return Err(broken(chunk, "free list links outside the arena"));
                    }
                    if chunk.status() != Status::Free {
                        return Err(broken(chunk, "chunk in use is linked in a free list"));
                    }
                    if bucket_for(chunk.size()) != bucket {
                        return Err(broken(chunk, "free chunk filed in the wrong bucket"));
                    }
                    if chunk.prev_free() != prev {
                        return Err(broken(chunk, "free list back link is broken"));
                    }
                }
                prev = Some(chunk);
                linked += 1;
            }

            if linked > free_chunks {
                break;
            }
        }

        if linked != free_chunks || self.free.len() != free_chunks {
            return Err(Error::Corrupted {
                addr: self.arena.start(),
                reason: "free lists and arena disagree on the free chunks",
            });
        }

        Ok(())
    }
}

impl<S: MemorySource> Heap<S> {
    /// Allocates `size` bytes and returns a pointer to them, aligned to the
    /// computer's word size. Returns null if `size` is 0 or no more memory can
    /// be obtained.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        self.try_allocate(size).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    /// Same as [`Heap::allocate`] but tells why nothing was allocated.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, Error> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }

        let size = checked_align(size, ALIGNMENT).ok_or(Error::Exhausted { requested: size })?;

        let chunk = match self.free.best_fit(size) {
            Some(chunk) => chunk,
            None => {
                self.grow(size)?;
                self.free.best_fit(size).unwrap_or_else(|| {
                    corrupted(Error::Corrupted {
                        addr: self.arena.end(),
                        reason: "freshly grown arena cannot satisfy the request",
                    })
                })
            }
        };

        unsafe {
            if chunk.status() != Status::Free || !chunk.footer_matches() {
                corrupted(Error::Corrupted {
                    addr: chunk.addr(),
                    reason: "free list holds a chunk that is not free",
                });
            }

            self.free.remove(chunk);
            self.split(chunk, size);

            trace!("allocate({size}) -> {:#x}", chunk.payload().as_ptr() as usize);

            Ok(chunk.payload())
        }
    }

    /// Releases the chunk whose payload is `ptr`. Null pointers are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` was not returned by this heap or was already released.
    ///
    /// # Safety
    ///
    /// `ptr` must not be used after this call. Pointers that were never
    /// returned by this heap are detected on a best effort basis only: a
    /// pointer into the middle of a live payload may still be mistaken for a
    /// chunk.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        if let Err(err) = unsafe { self.try_release(ptr) } {
            panic!("invalid release: {err}");
        }
    }

    /// Same as [`Heap::release`] but reports usage errors instead of panicking.
    /// The heap is left untouched when an error is returned.
    ///
    /// # Safety
    ///
    /// See [`Heap::release`].
    pub unsafe fn try_release(&mut self, ptr: *mut u8) -> Result<(), Error> {
        let Some(payload) = NonNull::new(ptr) else {
            return Ok(());
        };

        unsafe {
            let chunk = self.chunk_of(payload)?;

            if chunk.status() != Status::InUse {
                return Err(Error::DoubleRelease { addr: chunk.addr() });
            }

            trace!("release({:#x}), {} bytes", payload.as_ptr() as usize, chunk.size());

            chunk.format(chunk.size(), Status::Free);

            let chunk = self.merge_with_prev(chunk);
            let chunk = self.merge_with_next(chunk);

            self.free.insert(chunk);
        }

        Ok(())
    }

    /// Payload bytes available behind `ptr`, which may exceed what was asked
    /// for because of alignment or an unsplit remainder.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live pointer returned by this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, Error> {
        unsafe {
            let chunk = self.chunk_of(ptr)?;
            match chunk.status() {
                Status::InUse => Ok(chunk.size()),
                Status::Free => Err(Error::DoubleRelease { addr: chunk.addr() }),
            }
        }
    }

    /// Recovers the chunk behind a payload pointer, checking as much as can be
    /// checked without trusting anything the pointer leads to.
    unsafe fn chunk_of(&self, payload: NonNull<u8>) -> Result<Chunk, Error> {
        let addr = payload.as_ptr() as usize;
        let foreign = Error::ForeignPointer { addr };

        if addr % ALIGNMENT != 0
            || addr < HEADER_SIZE
            || !self.arena.holds_chunk_at(addr - HEADER_SIZE)
        {
            return Err(foreign);
        }

        unsafe {
            let chunk = Chunk::from_payload(payload);

            if chunk.checked_end().is_none_or(|end| end > self.arena.end()) {
                return Err(foreign);
            }

            // A chunk merged into its free neighbour keeps its old header but
            // its footer has been overwritten, so look at the status first.
            if chunk.status() == Status::Free {
                return Err(Error::DoubleRelease { addr: chunk.addr() });
            }

            if !chunk.footer_matches() {
                return Err(foreign);
            }

            Ok(chunk)
        }
    }

    /// Extends the arena so that a chunk of `size` bytes becomes available and
    /// files the new space in the free lists.
    fn grow(&mut self, size: usize) -> Result<(), Error> {
        let chunk = self.arena.extend(size, self.config.alloc_min())?;

        unsafe {
            // The previous last chunk may be free.
            let chunk = self.merge_with_prev(chunk);
            self.free.insert(chunk);
        }

        Ok(())
    }

    /// Marks `chunk` in use with `size` payload bytes. What is left after
    /// that becomes a new free chunk, unless it is too small to be useful, in
    /// which case it stays inside `chunk` as slack.
    ///
    /// ```text
    ///  +--------+----------------------------+--------+
    ///  | Header |          Payload           | Footer |      before
    ///  +--------+----------------------------+--------+
    ///
    ///  +--------+---------+--------+--------+---------+--------+
    ///  | Header | size    | Footer | Header |  rest   | Footer | after
    ///  +--------+---------+--------+--------+---------+--------+
    ///   in use                       free
    /// ```
    unsafe fn split(&mut self, chunk: Chunk, size: usize) {
        unsafe {
            let available = chunk.size();

            if available - size < MIN_SPLIT {
                chunk.format(available, Status::InUse);
                return;
            }

            chunk.format(size, Status::InUse);

            let rest = chunk.physical_next();
            rest.format(available - size - OVERHEAD, Status::Free);
            self.free.insert(rest);
        }
    }

    /// If the chunk physically before `chunk` is free, absorbs `chunk` into it
    /// and returns the merged chunk, which is left out of the free lists.
    /// `chunk` itself must be free and not linked.
    unsafe fn merge_with_prev(&mut self, chunk: Chunk) -> Chunk {
        unsafe {
            if self.arena.is_first(chunk) {
                return chunk;
            }

            let prev_size = chunk.prev_footer_size();
            let in_bounds = prev_size
                .checked_add(OVERHEAD)
                .and_then(|len| chunk.addr().checked_sub(len))
                .is_some_and(|addr| addr >= self.arena.start());

            if !in_bounds {
                corrupted(Error::Corrupted {
                    addr: chunk.addr(),
                    reason: "previous footer points before the arena start",
                });
            }

            let prev = chunk.physical_prev();
            if !prev.footer_matches() {
                corrupted(Error::Corrupted {
                    addr: prev.addr(),
                    reason: "footer does not match header",
                });
            }

            if prev.status() != Status::Free {
                return chunk;
            }

            self.free.remove(prev);
            prev.format(prev.size() + OVERHEAD + chunk.size(), Status::Free);

            prev
        }
    }

    /// If the chunk physically after `chunk` is free, absorbs it into `chunk`.
    /// `chunk` must be free and not linked.
    unsafe fn merge_with_next(&mut self, chunk: Chunk) -> Chunk {
        unsafe {
            if chunk.end() >= self.arena.end() {
                return chunk;
            }

            let next = chunk.physical_next();
            if next.checked_end().is_none_or(|end| end > self.arena.end())
                || !next.footer_matches()
            {
                corrupted(Error::Corrupted {
                    addr: next.addr(),
                    reason: "next chunk is malformed",
                });
            }

            if next.status() != Status::Free {
                return chunk;
            }

            self.free.remove(next);
            chunk.format(chunk.size() + OVERHEAD + next.size(), Status::Free);

            chunk
        }
    }
}
