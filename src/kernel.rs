//! Memory sources backed by the operating system.

use std::ptr::NonNull;

use crate::{
    source::MemorySource,
    utils::{align, checked_align},
};

/// Default size of the virtual range [`Reserved`] sets aside.
pub const DEFAULT_RESERVE: usize = if usize::BITS >= 64 { 1 << 32 } else { 1 << 28 };

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without backing them. It returns
    /// the start of the range or None if the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting from `addr` readable and writable. `addr`
    /// must be page aligned and inside a reserved range.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the whole reservation of size `len` starting from `addr` back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Zero sized handle the platform specific code is implemented on.
struct Kernel;

/// [`MemorySource`] that reserves one big range of address space up front and
/// commits it page by page as the arena grows.
///
/// ```text
///  base                top        committed                 capacity
///   +------------------+----------+--------------------------+
///   |  handed to arena | backed   |     reserved only        |
///   +------------------+----------+--------------------------+
/// ```
///
/// Because the range never moves, the arena stays contiguous no matter what
/// else the process does with its heap. Nothing is reserved until the first
/// call to [`MemorySource::grow`], which lets `new` be `const`.
pub struct Reserved {
    capacity: usize,
    base: Option<NonNull<u8>>,
    committed: usize,
    top: usize,
}

// SAFETY: the reservation is owned exclusively by this value.
unsafe impl Send for Reserved {}

impl Reserved {
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_RESERVE)
    }

    /// A source that never hands out more than `capacity` bytes in total.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            base: None,
            committed: 0,
            top: 0,
        }
    }

    /// Upper bound of the bytes this source can hand out, rounded to pages
    /// once the range has been reserved.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.top
    }

    fn base(&mut self) -> Option<NonNull<u8>> {
        if let Some(base) = self.base {
            return Some(base);
        }

        let len = checked_align(self.capacity, Kernel::page_size())?;
        if len == 0 {
            return None;
        }

        let base = unsafe { Kernel::reserve(len)? };
        self.capacity = len;
        self.base = Some(base);

        Some(base)
    }
}

impl Default for Reserved {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl MemorySource for Reserved {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let base = self.base()?;

        let new_top = self.top.checked_add(len)?;
        if new_top > self.capacity {
            return None;
        }

        if new_top > self.committed {
            // `capacity` is page aligned after reservation so this stays in range.
            let target = align(new_top, Kernel::page_size());
            unsafe {
                if !Kernel::commit(base.add(self.committed), target - self.committed) {
                    return None;
                }
            }
            self.committed = target;
        }

        let addr = unsafe { base.add(self.top) };
        self.top = new_top;

        Some(addr)
    }
}

impl Drop for Reserved {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { Kernel::release(base, self.capacity) }
        }
    }
}

#[cfg(unix)]
pub use unix::Brk;

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};
    use crate::{
        source::MemorySource,
        utils::{ALIGNMENT, align},
    };

    use libc::{intptr_t, mmap, mprotect, munmap, off_t, sbrk, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Not accessible until committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }

    /// [`MemorySource`] that moves the program break with `sbrk(2)`.
    ///
    /// ```text
    ///   Low Address                                  High Address
    ///   +--------+--------+-------------------------+
    ///   |  Data  |  BSS   |         Heap            | -> grows up
    ///   +--------+--------+-------------------------+
    ///                     ^ first break      ^ program break
    /// ```
    ///
    /// The break is process wide. If anything else moves it (the libc `malloc`
    /// does), the next region will not be adjacent to the arena and the arena
    /// refuses it, so prefer [`super::Reserved`] unless this allocator is the
    /// only user of the break.
    pub struct Brk {
        _private: (),
    }

    impl Brk {
        pub const fn new() -> Self {
            Self { _private: () }
        }
    }

    impl Default for Brk {
        fn default() -> Self {
            Self::new()
        }
    }

    unsafe impl MemorySource for Brk {
        fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let current = sbrk(0);
                if current == usize::MAX as *mut c_void {
                    return None;
                }

                // The very first break may be misaligned.
                let padding = align(current as usize, ALIGNMENT) - current as usize;
                let increment = intptr_t::try_from(len.checked_add(padding)?).ok()?;

                let addr = sbrk(increment);
                if addr == usize::MAX as *mut c_void {
                    return None;
                }

                if addr != current {
                    // Someone else moved the break between both calls.
                    return None;
                }

                NonNull::new(addr.cast::<u8>().add(padding))
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr().cast::<c_void>().cast_const()),
                    len,
                    Memory::MEM_COMMIT,
                    protection,
                );

                !committed.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}
