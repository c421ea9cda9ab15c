//! Library loading and linking.
//!
//! A library image is not a full ELF file: it begins directly with the
//! `.dynamic` section, followed by `.dynsym`, `.hash`, `.dynstr`, `.got` and
//! the code/data, in that order, as produced by the cooperating linker
//! script. Every pointer-sized word in the image holds a zero-based offset
//! at link time (the link-time base address must be 0), so relocation is a
//! single base addition per GOT entry and per defined symbol.
//!
//! The descriptor returned by [`dl_init`]/[`dl_open`] owns the image buffer
//! (when the loader allocated it) and is itself referenced back from
//! `got[1]`, which is how the lazy-resolve trampoline finds the module it
//! was entered from.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use core::ptr;

use crate::elf::{
    dynamic_tags::*, symbol_type, Elf32Dyn, Elf32Sym, RhfFlags, STN_UNDEF, SYM_ENTRY_SIZE,
};
use crate::error::{raise, ErrorKind};
use crate::hash::elf_hash;
use crate::{map, resolve, Addr};

#[cfg(feature = "file-api")]
use crate::platform;

/// When to bind a module's undefined references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Bind each function on its first call through the trampoline.
    Lazy,
    /// Resolve every undefined reference during `dl_init`.
    Now,
}

/// Sentinel descriptor meaning "this process": [`dl_sym`] on it searches the
/// symbol map instead of a module.
pub const RTLD_DEFAULT: *mut Dll = usize::MAX as *mut Dll;

/// A loaded module.
///
/// All section pointers alias the single image buffer at `base`; the
/// descriptor owns that buffer only when `owned_buffer` is non-null.
#[derive(Debug)]
pub struct Dll {
    /// Image start
    pub base: *mut u8,
    /// Heap buffer freed on close; null when the caller supplied the memory
    pub owned_buffer: *mut u8,
    /// Length of `owned_buffer`
    pub owned_len: usize,
    /// Total image bytes
    pub size: usize,
    /// First GOT word
    pub got: *mut u32,
    /// GOT entries past the two reserved header words
    pub got_length: u32,
    /// `.hash` section
    pub hash: *const u32,
    /// `.dynsym` section
    pub symtab: *mut Elf32Sym,
    /// `.dynstr` section
    pub strtab: *const u8,
    /// Total `.dynsym` entries
    pub symbol_count: u32,
}

impl Dll {
    /// Module base as a target address.
    pub fn base_addr(&self) -> Addr {
        self.base as usize as Addr
    }

    /// Name at the given `.dynstr` offset, bounded by the end of the image.
    pub(crate) unsafe fn str_at(&self, offset: u32) -> &[u8] {
        let start = self.strtab.wrapping_add(offset as usize);
        let end = self.base.wrapping_add(self.size) as *const u8;

        let mut len = 0;
        while start.wrapping_add(len) < end && *start.add(len) != 0 {
            len += 1;
        }
        core::slice::from_raw_parts(start, len)
    }

    /// Recover the host-width pointer behind a relocated in-image address.
    unsafe fn image_ptr(&self, addr: Addr) -> *const u8 {
        self.base.add(addr.wrapping_sub(self.base_addr()) as usize)
    }
}

/// Initialize a module from an image already in memory.
///
/// `image` must be 4-byte aligned. The caller keeps ownership of the buffer;
/// it must stay alive until [`dl_close`]. In [`ResolveMode::Now`] every
/// undefined function/variable reference is resolved immediately and a miss
/// fails the whole load.
///
/// Returns a descriptor, or null with a kind in the error channel.
///
/// # Safety
/// `image` must point to `size` readable and writable bytes laid out by the
/// cooperating linker script. The image's code becomes reachable through the
/// GOT, so the buffer must be executable on the target.
pub unsafe fn dl_init(image: *mut u8, size: usize, mode: ResolveMode) -> *mut Dll {
    if image.is_null() {
        raise(ErrorKind::DllNull);
        return ptr::null_mut();
    }

    let dll = alloc_zeroed(Layout::new::<Dll>()) as *mut Dll;
    if dll.is_null() {
        raise(ErrorKind::DllMalloc);
        return ptr::null_mut();
    }
    dll.write(Dll {
        base: image,
        owned_buffer: ptr::null_mut(),
        owned_len: 0,
        size,
        got: ptr::null_mut(),
        got_length: 0,
        hash: ptr::null(),
        symtab: ptr::null_mut(),
        strtab: ptr::null(),
        symbol_count: 0,
    });
    log::debug!("initializing DLL at {:p}", image);

    // Interpret the .dynamic key/value records to locate the other sections.
    // The list is DT_NULL-terminated, which makes walking it trivial.
    let mut local_gotno: u32 = 0;
    let mut gotsym: u32 = 0;

    let mut offset = 0;
    loop {
        if offset + Elf32Dyn::SIZE > size {
            return fail_free(dll, ErrorKind::DllFormat);
        }
        let entry = *(image.add(offset) as *const Elf32Dyn);
        offset += Elf32Dyn::SIZE;

        if entry.d_tag == DT_NULL {
            break;
        }
        log::debug!(".dynamic {:08x}={:08x}", entry.d_tag, entry.d_val);

        match entry.d_tag {
            DT_PLTGOT => (*dll).got = image.wrapping_add(entry.d_val as usize) as *mut u32,
            DT_HASH => (*dll).hash = image.wrapping_add(entry.d_val as usize) as *const u32,
            DT_STRTAB => (*dll).strtab = image.wrapping_add(entry.d_val as usize),
            DT_SYMTAB => {
                (*dll).symtab = image.wrapping_add(entry.d_val as usize) as *mut Elf32Sym
            }
            // Only 16-byte symbol table entries are supported.
            DT_SYMENT => {
                if entry.d_val as usize != SYM_ENTRY_SIZE {
                    return fail_free(dll, ErrorKind::DllFormat);
                }
            }
            // Runtime linker interface versions other than 1 do not exist
            // in the wild.
            DT_MIPS_RLD_VERSION => {
                if entry.d_val != 1 {
                    return fail_free(dll, ErrorKind::DllFormat);
                }
            }
            // Quickstart shortcut pointers are not supported.
            DT_MIPS_FLAGS => {
                if RhfFlags::from_bits_truncate(entry.d_val).contains(RhfFlags::QUICKSTART) {
                    return fail_free(dll, ErrorKind::DllFormat);
                }
            }
            DT_MIPS_LOCAL_GOTNO => local_gotno = entry.d_val,
            // Images linked at a non-zero base would need their metadata
            // rebased too; the linker script never produces them.
            DT_MIPS_BASE_ADDRESS => {
                if entry.d_val != 0 {
                    return fail_free(dll, ErrorKind::DllFormat);
                }
            }
            DT_MIPS_SYMTABNO => (*dll).symbol_count = entry.d_val,
            DT_MIPS_GOTSYM => gotsym = entry.d_val,
            _ => {} // ignored
        }
    }

    (*dll).got_length = local_gotno
        .wrapping_add((*dll).symbol_count.wrapping_sub(gotsym))
        .wrapping_sub(2);
    log::debug!(
        "{} symbols, {} GOT entries",
        (*dll).symbol_count,
        (*dll).got_length
    );

    if !sections_in_bounds(&*dll) {
        return fail_free(dll, ErrorKind::DllFormat);
    }

    // Relocate the GOT by adding the base address to every entry except the
    // two reserved header words: got[0] is the lazy-resolve trampoline the
    // compiler stubs jump through, and got[1] carries the descriptor so the
    // trampoline can find the module it was entered from.
    let base_addr = (*dll).base_addr();
    let got = (*dll).got;
    *got = resolve::trampoline_addr() as Addr;
    *got.add(1) = dll as usize as Addr;

    for i in 0..(*dll).got_length {
        let slot = got.add(2 + i as usize);
        *slot = (*slot).wrapping_add(base_addr);
    }

    // Fix up the symbol table, and in Now mode cross-reference the GOT with
    // it to resolve undefined references ahead of time. The GOT cursor only
    // moves forward: external entries appear in symbol order.
    let mut got_offset = gotsym;

    for i in 0..(*dll).symbol_count {
        let sym_ptr = (*dll).symtab.add(i as usize);
        if (*sym_ptr).st_value == 0 {
            continue;
        }
        (*sym_ptr).st_value = (*sym_ptr).st_value.wrapping_add(base_addr);
        let sym = *sym_ptr;
        log::trace!(
            "dll sym: {:08x},{:08x} [{}]",
            sym.st_value,
            sym.st_size,
            core::str::from_utf8((*dll).str_at(sym.st_name)).unwrap_or("?")
        );

        if mode != ResolveMode::Now {
            continue;
        }

        for j in got_offset..(*dll).got_length {
            let slot = got.add(2 + j as usize);
            if *slot != sym.st_value {
                continue;
            }
            got_offset = j;

            // Undefined variables and functions still hold their stub
            // address; swap in the real one.
            if !sym.is_defined()
                && matches!(
                    sym.symbol_type(),
                    symbol_type::STT_OBJECT | symbol_type::STT_FUNC
                )
            {
                let name = (*dll).str_at(sym.st_name);
                match resolve::resolve_quiet(dll, name) {
                    Some(address) => *slot = address,
                    None => return fail_free(dll, ErrorKind::MapSymbol),
                }
            }

            break;
        }
    }

    // The GOT now points into code that may still sit in the data cache.
    crate::platform::flush_icache();

    // Run the module's global constructors, last entry first. A regular
    // executable does this in _start(); a library has no entry point, so it
    // happens here.
    if let Some(list_addr) = module_lookup(&*dll, b"__CTOR_LIST__") {
        let list = (*dll).image_ptr(list_addr) as *const u32;
        run_ctor_list(list, |address| unsafe { call_image_fn(address) });
    }

    dll
}

/// Load a module from a file through the registered platform.
///
/// The image buffer becomes owned by the descriptor and is freed by
/// [`dl_close`].
#[cfg(feature = "file-api")]
pub fn dl_open(filename: &str, mode: ResolveMode) -> *mut Dll {
    let data = match platform::load_file(filename) {
        Ok(data) => data,
        Err(kind) => {
            raise(kind);
            return ptr::null_mut();
        }
    };
    log::debug!("loading {} ({} bytes)", filename, data.len());

    let len = data.len();
    let buffer = Box::into_raw(data.into_boxed_slice()) as *mut u8;

    let dll = unsafe { dl_init(buffer, len, mode) };
    unsafe {
        if dll.is_null() {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buffer, len)));
        } else {
            (*dll).owned_buffer = buffer;
            (*dll).owned_len = len;
        }
    }

    dll
}

/// Load a module from a file through the registered platform.
#[cfg(not(feature = "file-api"))]
pub fn dl_open(_filename: &str, _mode: ResolveMode) -> *mut Dll {
    raise(ErrorKind::NoFileApi);
    ptr::null_mut()
}

/// Run the module's destructors and release the descriptor and any buffer
/// it owns. Null and [`RTLD_DEFAULT`] are ignored.
///
/// # Safety
/// `dll` must be null, `RTLD_DEFAULT`, or a live descriptor from
/// [`dl_init`]/[`dl_open`], and must not be used afterwards.
pub unsafe fn dl_close(dll: *mut Dll) {
    if dll.is_null() || dll == RTLD_DEFAULT {
        return;
    }

    if !(*dll).base.is_null() {
        if let Some(list_addr) = module_lookup(&*dll, b"__DTOR_LIST__") {
            let list = (*dll).image_ptr(list_addr) as *const u32;
            run_dtor_list(list, |address| unsafe { call_image_fn(address) });
        }
    }

    if !(*dll).owned_buffer.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            (*dll).owned_buffer,
            (*dll).owned_len,
        )));
    }

    dealloc(dll as *mut u8, Layout::new::<Dll>());
}

/// Resolve a symbol. [`RTLD_DEFAULT`] searches the symbol map; a module
/// descriptor searches the module's own `.hash` chains by name and returns
/// the relocated `st_value`.
///
/// # Safety
/// `dll` must be [`RTLD_DEFAULT`] or a live descriptor.
pub unsafe fn dl_sym(dll: *mut Dll, name: &str) -> Option<Addr> {
    if dll == RTLD_DEFAULT {
        return map::get_symbol_by_name(name);
    }

    match module_lookup(&*dll, name.as_bytes()) {
        Some(value) => {
            log::trace!("dll lookup [{} = {:08x}]", name, value);
            Some(value)
        }
        None => {
            raise(ErrorKind::DllSymbol);
            None
        }
    }
}

unsafe fn fail_free(dll: *mut Dll, kind: ErrorKind) -> *mut Dll {
    dealloc(dll as *mut u8, Layout::new::<Dll>());
    raise(kind);
    ptr::null_mut()
}

/// Walk the module's `.hash` chain for `name`. Chain value 0 (`STN_UNDEF`)
/// terminates; matching is by name, the module carries its own string table.
pub(crate) unsafe fn module_lookup(dll: &Dll, name: &[u8]) -> Option<Addr> {
    let hash_table = dll.hash;
    let nbucket = *hash_table;
    let nchain = *hash_table.add(1);
    if nbucket == 0 {
        return None;
    }

    let mut index = *hash_table.add(2 + (elf_hash(name) % nbucket) as usize);
    while index != STN_UNDEF {
        if index >= nchain || index >= dll.symbol_count {
            return None;
        }

        let sym = *dll.symtab.add(index as usize);
        if dll.str_at(sym.st_name) == name {
            return Some(sym.st_value);
        }

        index = *hash_table.add(2 + nbucket as usize + index as usize);
    }

    None
}

/// Check that everything the loader will write or walk lies inside the
/// image. The fixed layout makes all four sections mandatory.
unsafe fn sections_in_bounds(dll: &Dll) -> bool {
    if dll.got.is_null() || dll.hash.is_null() || dll.symtab.is_null() || dll.strtab.is_null() {
        return false;
    }

    let base = dll.base as usize;
    let size = dll.size as u64;

    let got_off = (dll.got as usize).wrapping_sub(base) as u64;
    if got_off + (2 + dll.got_length as u64) * 4 > size {
        return false;
    }

    let sym_off = (dll.symtab as usize).wrapping_sub(base) as u64;
    if sym_off + dll.symbol_count as u64 * SYM_ENTRY_SIZE as u64 > size {
        return false;
    }

    let hash_off = (dll.hash as usize).wrapping_sub(base) as u64;
    if hash_off + 8 > size {
        return false;
    }
    let nbucket = *dll.hash as u64;
    let nchain = *dll.hash.add(1) as u64;
    if hash_off + (2 + nbucket + nchain) * 4 > size {
        return false;
    }

    let str_off = (dll.strtab as usize).wrapping_sub(base) as u64;
    str_off <= size
}

/// Call constructors in reverse: `list[0]` is the count, entries run from
/// `list[count]` down to `list[1]`.
unsafe fn run_ctor_list(list: *const u32, mut call: impl FnMut(Addr)) {
    let count = *list;
    for i in (1..=count).rev() {
        call(*list.add(i as usize));
    }
}

/// Call destructors forward, `list[1]` through `list[count]`.
unsafe fn run_dtor_list(list: *const u32, mut call: impl FnMut(Addr)) {
    let count = *list;
    for i in 1..=count {
        call(*list.add(i as usize));
    }
}

/// Jump to a function inside a loaded image. Indirect calls go through `t9`
/// on MIPS, which is exactly what PIC callees need to recompute `gp`.
unsafe fn call_image_fn(address: Addr) {
    let function: extern "C" fn() = core::mem::transmute(address as usize);
    function();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn test_ctor_list_runs_in_reverse() {
        let list = [3u32, 11, 22, 33];
        let mut called = Vec::new();
        unsafe { run_ctor_list(list.as_ptr(), |addr| called.push(addr)) };
        assert_eq!(called, [33, 22, 11]);
    }

    #[test]
    fn test_dtor_list_runs_forward() {
        let list = [3u32, 11, 22, 33];
        let mut called = Vec::new();
        unsafe { run_dtor_list(list.as_ptr(), |addr| called.push(addr)) };
        assert_eq!(called, [11, 22, 33]);
    }

    #[test]
    fn test_empty_ctor_list_calls_nothing() {
        let list = [0u32];
        let mut called = Vec::new();
        unsafe { run_ctor_list(list.as_ptr(), |addr| called.push(addr)) };
        unsafe { run_dtor_list(list.as_ptr(), |addr| called.push(addr)) };
        assert!(called.is_empty());
    }
}
