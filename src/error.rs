//! Error kinds and the process-wide last-error channel.
//!
//! Failures are never propagated as panics: every fallible entry point
//! records a kind here and signals the caller with a null pointer or `None`,
//! matching the dlerror convention. The channel holds only the most recent
//! kind and is cleared by reading it.

use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

/// Everything that can go wrong while loading maps or libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File not found
    File,
    /// Buffer allocation for file contents failed
    FileMalloc,
    /// Read failed mid-file
    FileRead,
    /// Lookup attempted before any symbol map was parsed
    NoMap,
    /// Symbol map table allocation failed
    MapMalloc,
    /// Symbol map parsed but accepted zero entries
    NoSymbols,
    /// Null image passed to `dl_init`
    DllNull,
    /// Descriptor allocation failed
    DllMalloc,
    /// `.dynamic` constraint violation
    DllFormat,
    /// File API disabled at build time
    NoFileApi,
    /// Symbol not found in the symbol map
    MapSymbol,
    /// Symbol not found in the library
    DllSymbol,
}

impl ErrorKind {
    /// Human-readable message for this kind.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorKind::File => "Unable to find file",
            ErrorKind::FileMalloc => "Unable to allocate buffer to load file into",
            ErrorKind::FileRead => "Failed to read file",
            ErrorKind::NoMap => "No symbol map has been loaded yet",
            ErrorKind::MapMalloc => "Unable to allocate symbol map structures",
            ErrorKind::NoSymbols => "No symbols found in symbol map",
            ErrorKind::DllNull => "Unable to initialize DLL from null pointer",
            ErrorKind::DllMalloc => "Unable to allocate DLL metadata structures",
            ErrorKind::DllFormat => "Unsupported DLL type or format",
            ErrorKind::NoFileApi => "Built without file API support",
            ErrorKind::MapSymbol => "Symbol not found in symbol map",
            ErrorKind::DllSymbol => "Symbol not found in DLL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.message())
    }
}

lazy_static! {
    static ref LAST_ERROR: Mutex<Option<ErrorKind>> = Mutex::new(None);
}

/// Record `kind` as the most recent error and log it.
pub(crate) fn raise(kind: ErrorKind) {
    log::error!("{}", kind.message());
    *LAST_ERROR.lock() = Some(kind);
}

/// Return the message of the most recent error and clear the channel.
///
/// Two consecutive calls with no intervening failure return the message and
/// then `None`.
pub fn last_error() -> Option<&'static str> {
    LAST_ERROR.lock().take().map(ErrorKind::message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_message() {
        let kinds = [
            ErrorKind::File,
            ErrorKind::FileMalloc,
            ErrorKind::FileRead,
            ErrorKind::NoMap,
            ErrorKind::MapMalloc,
            ErrorKind::NoSymbols,
            ErrorKind::DllNull,
            ErrorKind::DllMalloc,
            ErrorKind::DllFormat,
            ErrorKind::NoFileApi,
            ErrorKind::MapSymbol,
            ErrorKind::DllSymbol,
        ];
        for kind in kinds {
            assert!(!kind.message().is_empty());
        }
    }
}
