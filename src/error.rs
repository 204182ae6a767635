use thiserror::Error;

/// Everything that can go wrong while allocating or releasing.
///
/// [`Error::ZeroSize`], [`Error::Exhausted`] and [`Error::Discontiguous`] are
/// ordinary results: the heap is left untouched. [`Error::DoubleRelease`] and
/// [`Error::ForeignPointer`] are caller bugs, detected before anything is
/// modified. [`Error::Corrupted`] means the heap bookkeeping can no longer be
/// trusted; the allocation paths abort the process when they hit it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("zero sized allocation request")]
    ZeroSize,

    #[error("memory source exhausted, could not grow the arena for {requested} bytes")]
    Exhausted { requested: usize },

    #[error("memory source broke contiguity: expected region at {expected:#x}, got {found:#x}")]
    Discontiguous { expected: usize, found: usize },

    #[error("double release of chunk at {addr:#x}")]
    DoubleRelease { addr: usize },

    #[error("pointer {addr:#x} was not returned by this heap")]
    ForeignPointer { addr: usize },

    #[error("heap corruption at {addr:#x}: {reason}")]
    Corrupted { addr: usize, reason: &'static str },
}

impl Error {
    /// Usage errors are the ones caused by handing a bad pointer to `release`.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Error::DoubleRelease { .. } | Error::ForeignPointer { .. })
    }
}
