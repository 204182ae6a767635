use crate::{
    chunk::MIN_SPLIT,
    utils::{ALIGNMENT, align},
};

/// Default minimum number of bytes requested from the memory source at once.
pub const DEFAULT_ALLOC_MIN: usize = 1024;

/// Tunables of a [`crate::Heap`].
///
/// Everything is `const` so a configured heap can still live in a `static`:
///
/// ```rust
/// use segalloc::Config;
///
/// const CONFIG: Config = Config::new().with_alloc_min(64 * 1024);
/// assert_eq!(CONFIG.alloc_min(), 64 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    alloc_min: usize,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            alloc_min: DEFAULT_ALLOC_MIN,
        }
    }

    /// Sets the floor of every arena extension. Growing the arena costs a
    /// call into the memory source, so small requests are batched into
    /// extensions of at least this many bytes.
    ///
    /// The value is rounded up to the alignment unit and raised to the size
    /// of the smallest useful chunk.
    pub const fn with_alloc_min(self, bytes: usize) -> Self {
        let bytes = if bytes < MIN_SPLIT { MIN_SPLIT } else { bytes };
        let bytes = if bytes > usize::MAX - ALIGNMENT {
            usize::MAX & !(ALIGNMENT - 1)
        } else {
            align(bytes, ALIGNMENT)
        };

        Self { alloc_min: bytes }
    }

    #[inline]
    pub const fn alloc_min(&self) -> usize {
        self.alloc_min
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
