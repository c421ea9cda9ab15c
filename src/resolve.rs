//! Lazy binding: the trampoline installed in `got[0]`, the helper it calls,
//! and the user-pluggable resolver callback.
//!
//! When a function is first called through an unresolved stub, the
//! compiler-generated stub loads `got[0]` and jumps there with the symbol's
//! `.dynsym` index in `t8`. The trampoline preserves the argument registers,
//! asks [`_dl_resolve_helper`] for the real address, and tail-jumps to it
//! with the original arguments intact. The helper patches the matching GOT
//! slot so later calls bypass the trampoline entirely.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::dll::Dll;
use crate::{map, Addr};

/// Resolver invoked for every unresolved reference. Returning `None` means
/// the symbol cannot be resolved.
pub type ResolveCallback = fn(dll: *mut Dll, name: &str) -> Option<Addr>;

lazy_static! {
    static ref RESOLVE_CALLBACK: Mutex<Option<ResolveCallback>> = Mutex::new(None);
}

/// Install (or with `None`, remove) the resolver callback. While no callback
/// is installed, references resolve against the symbol map.
pub fn set_resolve_callback(callback: Option<ResolveCallback>) {
    *RESOLVE_CALLBACK.lock() = callback;
}

/// Resolve `name` through the callback if one is installed, else through the
/// symbol map. Records no error; callers report misses their own way.
pub(crate) fn resolve_quiet(dll: *mut Dll, name: &[u8]) -> Option<Addr> {
    let callback = *RESOLVE_CALLBACK.lock();
    match callback {
        Some(callback) => callback(dll, core::str::from_utf8(name).ok()?),
        None => map::lookup_quiet(name),
    }
}

/// Resolve a symbol on first call and patch its GOT slot.
///
/// Called from the trampoline with the descriptor (stashed in `got[1]`) and
/// the `.dynsym` index the stub left in `t8`. An unresolvable symbol halts
/// the machine: on bare metal there is no process to fail over to, and
/// returning would jump through a stale stub address.
///
/// # Safety
/// `dll` must point to a live descriptor produced by `dl_init` and `index`
/// must be a valid `.dynsym` index for that module.
#[no_mangle]
pub unsafe extern "C" fn _dl_resolve_helper(dll: *mut Dll, index: u32) -> Addr {
    let sym = &*(*dll).symtab.add(index as usize);
    let name = (*dll).str_at(sym.st_name);

    let address = match resolve_quiet(dll, name) {
        Some(address) => address,
        None => {
            log::error!(
                "cannot resolve {}, halting",
                core::str::from_utf8(name).unwrap_or("?")
            );
            loop {
                core::hint::spin_loop();
            }
        }
    };

    // Patch the GOT entry so later calls skip the trampoline. The slot still
    // holds the stub address the symbol was relocated to.
    let got = (*dll).got;
    for i in 0..(*dll).got_length {
        let slot = got.add(2 + i as usize);
        if *slot == sym.st_value {
            *slot = address;
            break;
        }
    }

    log::trace!(
        "resolved [{} = {:08x}]",
        core::str::from_utf8(name).unwrap_or("?"),
        address
    );
    address
}

/// Address of the resolve trampoline, as stored into `got[0]`.
pub(crate) fn trampoline_addr() -> usize {
    _dl_resolve_trampoline as usize
}

// The trampoline proper. Register contract with the compiler-generated lazy
// stubs: t8 = .dynsym index, t7 = the original caller's return address, gp =
// GOT base (per the cooperating linker script), got[1] = descriptor. All
// argument registers are preserved across the helper call and the resolved
// function is entered through t9, as PIC callees require.
#[cfg(target_arch = "mips")]
core::arch::global_asm!(
    r#"
    .section .text
    .globl  _dl_resolve_trampoline
    .type   _dl_resolve_trampoline, @function
    .set    noreorder
_dl_resolve_trampoline:
    addiu   $sp, $sp, -24
    sw      $t7, 20($sp)
    sw      $a3, 16($sp)
    sw      $a2, 12($sp)
    sw      $a1, 8($sp)
    sw      $a0, 4($sp)
    lw      $a0, 4($gp)
    jal     _dl_resolve_helper
    move    $a1, $t8
    move    $t9, $v0
    lw      $a0, 4($sp)
    lw      $a1, 8($sp)
    lw      $a2, 12($sp)
    lw      $a3, 16($sp)
    lw      $ra, 20($sp)
    jr      $t9
    addiu   $sp, $sp, 24
    .set    reorder
    .size   _dl_resolve_trampoline, . - _dl_resolve_trampoline
"#
);

#[cfg(target_arch = "mips")]
extern "C" {
    fn _dl_resolve_trampoline();
}

// Off-target stand-in: never called, exists so got[0] has a stable address
// to hold.
#[cfg(not(target_arch = "mips"))]
#[no_mangle]
extern "C" fn _dl_resolve_trampoline() {}
