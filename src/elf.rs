//! ELF32 structures and constants for the MIPS PIC subset.
//!
//! Only the pieces the loader actually interprets are defined here: the
//! dynamic symbol entry, the `.dynamic` record, the `DT_*` tag space
//! (including the MIPS block) and the `DT_MIPS_FLAGS` bits. Everything is
//! little-endian, matching the target.

use bitflags::bitflags;
use core::mem;

/// Reserved symbol index marking end-of-chain in module `.hash` tables.
pub const STN_UNDEF: u32 = 0;

/// Required size of a `.dynsym` entry.
pub const SYM_ENTRY_SIZE: usize = 16;

/// Dynamic section tags (`DT_*`).
pub mod dynamic_tags {
    pub const DT_NULL: u32 = 0; // End of dynamic section
    pub const DT_NEEDED: u32 = 1; // Name of needed library
    pub const DT_PLTGOT: u32 = 3; // GOT address
    pub const DT_HASH: u32 = 4; // Symbol hash table address
    pub const DT_STRTAB: u32 = 5; // String table address
    pub const DT_SYMTAB: u32 = 6; // Symbol table address
    pub const DT_STRSZ: u32 = 10; // Size of string table
    pub const DT_SYMENT: u32 = 11; // Size of symbol table entry
    pub const DT_INIT: u32 = 12; // Init function address
    pub const DT_FINI: u32 = 13; // Fini function address
    pub const DT_SONAME: u32 = 14; // Name of this shared object

    // MIPS-specific block (0x70000000+)
    pub const DT_MIPS_RLD_VERSION: u32 = 0x7000_0001; // Runtime linker interface version
    pub const DT_MIPS_FLAGS: u32 = 0x7000_0005; // RHF_* flag word
    pub const DT_MIPS_BASE_ADDRESS: u32 = 0x7000_0006; // Link-time base address
    pub const DT_MIPS_LOCAL_GOTNO: u32 = 0x7000_000a; // Number of local GOT entries
    pub const DT_MIPS_SYMTABNO: u32 = 0x7000_0011; // Number of .dynsym entries
    pub const DT_MIPS_UNREFEXTNO: u32 = 0x7000_0012; // First unreferenced external symbol
    pub const DT_MIPS_GOTSYM: u32 = 0x7000_0013; // First symbol with a GOT entry
    pub const DT_MIPS_HIPAGENO: u32 = 0x7000_0014; // Number of GOT page table entries
}

bitflags! {
    /// Flag bits carried by the `DT_MIPS_FLAGS` entry.
    pub struct RhfFlags: u32 {
        /// Object may be quickstarted by the runtime linker (shortcut
        /// pointers baked in at static link time). Unsupported here.
        const QUICKSTART = 0x0001;
        /// Hash size is not a power of two
        const NOTPOT = 0x0002;
        /// Ignore LD_LIBRARY_PATH
        const NO_LIBRARY_REPLACEMENT = 0x0004;
        /// Object may not be moved
        const NO_MOVE = 0x0008;
    }
}

/// Symbol binding types (upper nibble of `st_info`).
pub mod symbol_binding {
    pub const STB_LOCAL: u8 = 0; // Local symbol
    pub const STB_GLOBAL: u8 = 1; // Global symbol
    pub const STB_WEAK: u8 = 2; // Weak symbol
}

/// Symbol types (lower nibble of `st_info`).
pub mod symbol_type {
    pub const STT_NOTYPE: u8 = 0; // No type
    pub const STT_OBJECT: u8 = 1; // Data object
    pub const STT_FUNC: u8 = 2; // Code object (function)
    pub const STT_SECTION: u8 = 3; // Section
    pub const STT_FILE: u8 = 4; // File name
}

/// Dynamic symbol table entry (`Elf32_Sym`, 16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Sym {
    /// Symbol name (string table offset)
    pub st_name: u32,
    /// Symbol value; an image offset at link time, an absolute address once
    /// the loader has added the module base
    pub st_value: u32,
    /// Symbol size
    pub st_size: u32,
    /// Symbol type and binding
    pub st_info: u8,
    /// Symbol visibility
    pub st_other: u8,
    /// Section index
    pub st_shndx: u16,
}

impl Elf32Sym {
    /// Get symbol binding (upper 4 bits of `st_info`)
    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    /// Get symbol type (lower 4 bits of `st_info`)
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Check if symbol is defined (not undefined)
    pub fn is_defined(&self) -> bool {
        self.st_shndx != 0 // SHN_UNDEF
    }
}

/// Dynamic section entry (`Elf32_Dyn`, 8 bytes).
///
/// The tag is kept unsigned so the MIPS block (`0x70000000+`) compares
/// without sign games.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf32Dyn {
    pub d_tag: u32,
    pub d_val: u32,
}

impl Elf32Dyn {
    /// Size of a dynamic entry
    pub const SIZE: usize = mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_sizes() {
        assert_eq!(mem::size_of::<Elf32Sym>(), SYM_ENTRY_SIZE);
        assert_eq!(Elf32Dyn::SIZE, 8);
    }

    #[test]
    fn test_symbol_info_split() {
        let sym = Elf32Sym {
            st_name: 0,
            st_value: 0x1000,
            st_size: 100,
            st_info: (symbol_binding::STB_GLOBAL << 4) | symbol_type::STT_FUNC,
            st_other: 0,
            st_shndx: 1,
        };

        assert_eq!(sym.binding(), symbol_binding::STB_GLOBAL);
        assert_eq!(sym.symbol_type(), symbol_type::STT_FUNC);
        assert!(sym.is_defined());
    }

    #[test]
    fn test_undefined_symbol() {
        let sym = Elf32Sym {
            st_name: 5,
            st_value: 0xc8,
            st_size: 0,
            st_info: (symbol_binding::STB_GLOBAL << 4) | symbol_type::STT_FUNC,
            st_other: 0,
            st_shndx: 0,
        };
        assert!(!sym.is_defined());
    }

    #[test]
    fn test_rhf_flags() {
        let flags = RhfFlags::from_bits_truncate(0x0005);
        assert!(flags.contains(RhfFlags::QUICKSTART));
        assert!(flags.contains(RhfFlags::NO_LIBRARY_REPLACEMENT));
        assert!(!flags.contains(RhfFlags::NOTPOT));
    }
}
