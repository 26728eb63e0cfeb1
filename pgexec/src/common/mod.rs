//! Supporting utility type.
mod bytestr;

pub use bytestr::ByteStr;

/// Trace when `verbose` feature enabled.
macro_rules! verbose {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        tracing::trace!($($tt)*)
    };
}

/// Create and enter `Span` when `verbose` feature enabled.
macro_rules! span {
    ($($tt:tt)*) => {
        #[cfg(feature = "verbose")]
        let s = tracing::trace_span!($($tt)*);
        #[cfg(feature = "verbose")]
        let _s = s.enter();
    };
}

/// Log at debug level when `log` feature enabled.
macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        log::debug!($($tt)*)
    };
}

/// Log at warn level when `log` feature enabled.
macro_rules! log_warn {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        log::warn!($($tt)*)
    };
}

/// Declare an error type which only carries a static message.
macro_rules! unit_error {
    ($(#[$doc:meta])* $vis:vis struct $name:ident($msg:literal);) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq)]
        $vis struct $name;

        impl std::error::Error for $name { }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($msg)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "\"{self}\"")
            }
        }
    };
}

pub(crate) use verbose;
pub(crate) use span;
pub(crate) use debug;
pub(crate) use log_warn;
pub(crate) use unit_error;
