//! Dynamic linker for position-independent MIPS shared objects.
//!
//! This crate implements runtime loading and linking of MIPS PIC libraries on
//! bare-metal targets that have no OS-provided loader. It is not a full ELF
//! parser: libraries are expected to begin with the metadata sections
//! (`.dynamic`, `.dynsym`, `.hash`, `.dynstr`, `.got`) laid out in a fixed
//! order by a cooperating linker script, which keeps the loader small enough
//! for heavily constrained targets.
//!
//! ## Features
//! - `.dynamic` interpretation for the MIPS PIC subset (`DT_MIPS_*` tags)
//! - Base-relative GOT and symbol table relocation
//! - Lazy binding through a trampoline installed in `got[0]`
//! - Eager (`Now`) binding by cross-referencing the GOT with the symbol table
//! - Process-wide symbol map parsed from an `nm`-style text dump, backed by
//!   an ELF-format chained hash table
//! - dlerror-style read-and-clear error channel
//!
//! ## Architecture
//! Linking works in phases:
//! 1. Walk the `.dynamic` key/value records to locate the other sections
//! 2. Install the lazy-resolve trampoline and descriptor back-pointer in the
//!    two reserved GOT slots
//! 3. Relocate the remaining GOT entries and all defined symbol values
//! 4. Optionally pre-resolve undefined references against the symbol map
//! 5. Flush the instruction cache and run the library's constructors
//!
//! Host services (file I/O, cache flush, critical sections) are reached
//! through the [`Platform`] trait; the crate itself only assumes a global
//! allocator.
//!
//! ## References
//! - System V ABI: <https://refspecs.linuxfoundation.org/elf/gabi41.pdf>
//! - MIPS psABI: <https://refspecs.linuxfoundation.org/elf/mipsabi.pdf>

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod elf;
pub mod error;
pub mod hash;

mod dll;
mod map;
mod platform;
mod resolve;


pub use dll::{dl_close, dl_init, dl_open, dl_sym, Dll, ResolveMode, RTLD_DEFAULT};
pub use error::{last_error, ErrorKind};
pub use map::{get_symbol_by_name, load_symbol_map, parse_symbol_map, unload_symbol_map};
pub use platform::{set_platform, FileError, Platform};
pub use resolve::{set_resolve_callback, ResolveCallback};

/// An address in the target's 32-bit address space.
///
/// On 32-bit MIPS this is pointer-sized; keeping it a plain `u32` matches the
/// width of every word stored in a library image (GOT entries, `st_value`)
/// regardless of the width of the machine the crate is built for.
pub type Addr = u32;
