//! Errors reported while bootstrapping an arena.
//!
//! Only arena setup has a recoverable error path
//! ([`TagHeap::try_setup`](crate::TagHeap::try_setup)). Allocation failure is
//! reported as `None`, and every other precondition violation panics.

use core::fmt;

/// The kinds of errors that can occur when setting up an arena.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[non_exhaustive]
pub enum SetupErrorKind {
    #[display(
        "arena too small after alignment: usable={usable} bytes, \
         required={required} bytes"
    )]
    ArenaTooSmall { usable: usize, required: usize },
    #[display("arena end overflows the address space: base={base:#x}, len={len}")]
    AddressOverflow { base: usize, len: usize },
}

/// The error type returned when an arena cannot be set up.
#[derive(Debug)]
pub struct SetupError {
    #[cfg(feature = "error-with-location")]
    location: &'static core::panic::Location<'static>,
    kind: SetupErrorKind,
}

impl SetupError {
    /// Creates a new error from a known kind of error.
    #[track_caller]
    #[must_use]
    pub fn new(kind: SetupErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "error-with-location")]
            location: core::panic::Location::caller(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> &SetupErrorKind {
        &self.kind
    }

    /// Returns the location where this error was created.
    #[must_use]
    #[cfg(feature = "error-with-location")]
    pub fn location(&self) -> &'static core::panic::Location<'static> {
        self.location
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl From<SetupErrorKind> for SetupError {
    #[track_caller]
    fn from(kind: SetupErrorKind) -> Self {
        Self::new(kind)
    }
}

impl core::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        self.kind.source()
    }
}

/// Stops on an arena setup error that the caller chose not to handle.
#[track_caller]
pub(crate) fn report(err: &SetupError) -> ! {
    #[cfg(feature = "error-with-location")]
    panic!("critical allocator error: {err}\n  at {}", err.location());
    #[cfg(not(feature = "error-with-location"))]
    panic!("critical allocator error: {err}");
}
