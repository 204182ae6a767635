use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
};

use spin::Mutex;

use crate::{
    config::Config,
    error::Error,
    heap::{Heap, Stats},
    kernel::Reserved,
    macros::{self, error},
    source::MemorySource,
    utils::{ALIGNMENT, align},
};

/// Thread safe [`Heap`] that can be installed as the global allocator:
///
/// ```rust,ignore
/// use segalloc::SegAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: SegAlloc = SegAlloc::new();
/// ```
///
/// Every call takes a single lock around the whole heap operation, splitting
/// and merging touch several chunks at once so nothing finer grained is
/// possible.
///
/// Layouts aligned to more than the word size are served from a bigger chunk.
/// The pointer handed out is aligned inside the payload, and the word right
/// before it remembers where the payload starts:
///
/// ```text
///  +--------+---------+---------+---------------------+--------+
///  | Header | padding | payload |  aligned user data  | Footer |
///  |        |         |  addr   |                     |        |
///  +--------+---------+---------+---------------------+--------+
///           ^                   ^
///         payload           returned pointer (multiple of align)
/// ```
pub struct SegAlloc<S = Reserved> {
    heap: Mutex<Heap<S>>,
}

impl SegAlloc<Reserved> {
    /// Allocator backed by a [`Reserved`] range of the default size.
    pub const fn new() -> Self {
        Self::with_source(Reserved::new())
    }
}

impl Default for SegAlloc<Reserved> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SegAlloc<S> {
    pub const fn with_source(source: S) -> Self {
        Self::with_config(source, Config::new())
    }

    pub const fn with_config(source: S, config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::with_config(source, config)),
        }
    }

    pub fn stats(&self) -> Stats {
        self.heap.lock().stats()
    }

    pub fn verify(&self) -> Result<(), Error> {
        self.heap.lock().verify()
    }
}

#[cold]
fn invalid_dealloc(err: Error) -> ! {
    error!("invalid dealloc: {err}, aborting");
    std::process::abort()
}

/// Whether the heap's own alignment is enough for `layout`.
#[inline]
fn naturally_aligned(layout: Layout) -> bool {
    layout.align() <= ALIGNMENT
}

impl<S: MemorySource> SegAlloc<S> {
    /// Allocates `layout` from a locked heap.
    unsafe fn alloc_with(heap: &mut Heap<S>, layout: Layout) -> *mut u8 {
        if naturally_aligned(layout) {
            return heap.allocate(layout.size());
        }

        let Some(size) = layout.size().checked_add(layout.align()) else {
            return ptr::null_mut();
        };

        let payload = heap.allocate(size);
        if payload.is_null() {
            return payload;
        }

        unsafe {
            let addr = align(payload as usize + ALIGNMENT, layout.align());
            let aligned = payload.add(addr - payload as usize);
            aligned.cast::<*mut u8>().sub(1).write(payload);

            aligned
        }
    }

    /// Finds the payload that was handed to the heap for `ptr`.
    unsafe fn payload_of(ptr: *mut u8, layout: Layout) -> *mut u8 {
        if naturally_aligned(layout) {
            ptr
        } else {
            unsafe { ptr.cast::<*mut u8>().sub(1).read() }
        }
    }
}

unsafe impl<S: MemorySource + Send> GlobalAlloc for SegAlloc<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _mute = macros::mute();
        let mut heap = self.heap.lock();
        unsafe { Self::alloc_with(&mut heap, layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _mute = macros::mute();
        let mut heap = self.heap.lock();

        unsafe {
            let payload = Self::payload_of(ptr, layout);
            if let Err(err) = heap.try_release(payload) {
                invalid_dealloc(err);
            }
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let _mute = macros::mute();
        let mut heap = self.heap.lock();

        unsafe {
            if naturally_aligned(layout) {
                if let Some(payload) = ptr::NonNull::new(ptr) {
                    match heap.usable_size(payload) {
                        Ok(usable) if new_size <= usable => return ptr,
                        Ok(_) => {}
                        Err(err) => invalid_dealloc(err),
                    }
                }
            }

            let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
            let new_ptr = Self::alloc_with(&mut heap, new_layout);

            if !new_ptr.is_null() {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));

                let payload = Self::payload_of(ptr, layout);
                if let Err(err) = heap.try_release(payload) {
                    invalid_dealloc(err);
                }
            }

            new_ptr
        }
    }
}
