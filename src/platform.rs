//! Host services the linker depends on but does not implement.
//!
//! The crate only assumes a global allocator; everything else the target has
//! to offer (file I/O, instruction-cache maintenance, interrupt masking) is
//! reached through a [`Platform`] implementation registered at startup. With
//! no platform registered, file operations fail and the cache/critical-section
//! hooks degrade to no-ops, which is what host-side tests want.

use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

#[cfg(feature = "file-api")]
use crate::error::ErrorKind;

/// Failure modes of [`Platform::load_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// File does not exist or cannot be opened
    NotFound,
    /// Buffer allocation for the file contents failed
    OutOfMemory,
    /// A read failed partway through the file
    ReadFailed,
}

/// Services supplied by the surrounding firmware or kernel.
pub trait Platform: Send + Sync {
    /// Load an entire file into a heap buffer. Ownership of the buffer
    /// transfers to the caller.
    fn load_file(&self, path: &str) -> Result<Vec<u8>, FileError>;

    /// Flush the instruction cache after code-adjacent memory was written.
    fn flush_instruction_cache(&self);

    /// Enter an atomic region (typically: mask interrupts).
    fn enter_critical_section(&self) {}

    /// Leave the atomic region entered by `enter_critical_section`.
    fn exit_critical_section(&self) {}
}

lazy_static! {
    static ref PLATFORM: Mutex<Option<&'static dyn Platform>> = Mutex::new(None);
}

/// Register the platform implementation. Call once during startup, before
/// any library or symbol map is loaded.
pub fn set_platform(platform: &'static dyn Platform) {
    *PLATFORM.lock() = Some(platform);
}

fn current() -> Option<&'static dyn Platform> {
    *PLATFORM.lock()
}

/// Load a file through the registered platform, translating failures into
/// error-channel kinds.
#[cfg(feature = "file-api")]
pub(crate) fn load_file(path: &str) -> Result<Vec<u8>, ErrorKind> {
    let platform = current().ok_or(ErrorKind::File)?;

    platform.load_file(path).map_err(|err| match err {
        FileError::NotFound => ErrorKind::File,
        FileError::OutOfMemory => ErrorKind::FileMalloc,
        FileError::ReadFailed => ErrorKind::FileRead,
    })
}

/// Flush the instruction cache inside a critical section.
pub(crate) fn flush_icache() {
    if let Some(platform) = current() {
        platform.enter_critical_section();
        platform.flush_instruction_cache();
        platform.exit_critical_section();
    }
}

#[cfg(test)]
pub(crate) fn clear_platform() {
    *PLATFORM.lock() = None;
}
