//! Logging shims over the `log` facade.
//!
//! With the `log` feature disabled nothing is logged at all. With it enabled,
//! logging is still skipped on a thread while it holds the [`SegAlloc`] lock:
//! a logger that allocates would re-enter the allocator and spin on that lock
//! forever.
//!
//! [`SegAlloc`]: crate::SegAlloc

#[cfg(feature = "log")]
use std::cell::Cell;

#[cfg(feature = "log")]
std::thread_local! {
    static MUTED: Cell<bool> = const { Cell::new(false) };
}

/// Keeps logging off on the current thread until dropped.
#[must_use]
pub(crate) struct Mute {
    #[cfg(feature = "log")]
    was_muted: bool,
}

/// Turns logging off on the current thread. Nests: dropping the guard
/// restores whatever was in place before.
#[inline]
pub(crate) fn mute() -> Mute {
    Mute {
        // A thread being torn down counts as muted.
        #[cfg(feature = "log")]
        was_muted: MUTED.try_with(|muted| muted.replace(true)).unwrap_or(true),
    }
}

impl Drop for Mute {
    #[inline]
    fn drop(&mut self) {
        #[cfg(feature = "log")]
        let _ = MUTED.try_with(|muted| muted.set(self.was_muted));
    }
}

/// Whether the shims below may call into the logger on this thread.
#[cfg(feature = "log")]
#[inline]
pub(crate) fn enabled() -> bool {
    MUTED.try_with(|muted| !muted.get()).unwrap_or(false)
}

#[cfg(feature = "log")]
macro_rules! trace {
    ($($arg:tt)+) => {{
        if $crate::macros::enabled() {
            ::log::trace!(target: "segalloc", $($arg)+)
        }
    }};
}

#[cfg(feature = "log")]
macro_rules! debug {
    ($($arg:tt)+) => {{
        if $crate::macros::enabled() {
            ::log::debug!(target: "segalloc", $($arg)+)
        }
    }};
}

#[cfg(feature = "log")]
macro_rules! warning {
    ($($arg:tt)+) => {{
        if $crate::macros::enabled() {
            ::log::warn!(target: "segalloc", $($arg)+)
        }
    }};
}

#[cfg(feature = "log")]
macro_rules! error {
    ($($arg:tt)+) => {{
        if $crate::macros::enabled() {
            ::log::error!(target: "segalloc", $($arg)+)
        }
    }};
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)+) => {{ let _ = ::core::format_args!($($arg)+); }};
}

#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)+) => {{ let _ = ::core::format_args!($($arg)+); }};
}

#[cfg(not(feature = "log"))]
macro_rules! warning {
    ($($arg:tt)+) => {{ let _ = ::core::format_args!($($arg)+); }};
}

#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)+) => {{ let _ = ::core::format_args!($($arg)+); }};
}

pub(crate) use {debug, error, trace, warning};

#[cfg(all(test, feature = "log"))]
mod tests {
    use super::*;

    #[test]
    fn mute_nests_and_restores() {
        assert!(enabled());

        let outer = mute();
        assert!(!enabled());

        let inner = mute();
        assert!(!enabled());
        drop(inner);
        assert!(!enabled());

        drop(outer);
        assert!(enabled());
    }

    #[test]
    fn mute_is_per_thread() {
        let _mute = mute();
        assert!(!enabled());

        let other = std::thread::spawn(enabled).join().unwrap();
        assert!(other);
    }
}
