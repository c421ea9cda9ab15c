//! The process-wide symbol map.
//!
//! The map is built from an `nm`-style text dump of the host executable and
//! serves as the default resolution source for every loaded library. It is
//! stored as an ELF-format chained hash table (`[nbucket, nchain, buckets,
//! chains]`) plus a parallel entry array, so lookups walk exactly the same
//! structure a module's `.hash` section would give us.
//!
//! Matching is by hash value only. Re-reading names on every probe would
//! need the dump text kept around; the table deliberately trades a small
//! collision risk for dropping it.

use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{raise, ErrorKind};
use crate::hash::elf_hash;
use crate::Addr;

/// Chain terminator used by the map's hash table.
const CHAIN_END: u32 = 0xffff_ffff;

/// Longest symbol name considered; the rest of the token is ignored.
const NAME_MAX: usize = 63;

#[derive(Debug)]
struct MapEntry {
    hash: u32,
    addr: Addr,
}

#[derive(Debug)]
pub(crate) struct SymbolMap {
    nbucket: u32,
    /// `[nbucket, nchain, bucket[0..nbucket], chain[0..nchain]]`
    hash_table: Vec<u32>,
    entries: Vec<MapEntry>,
}

impl SymbolMap {
    /// Parse an `nm`-style dump into a map. Returns the map and the number
    /// of accepted symbols.
    ///
    /// Each significant line is `NAME TYPE HEXADDR [HEXSIZE ...]`. A line is
    /// accepted iff it has at least three fields, the address is non-zero
    /// and the type letter (case-insensitive) is one of `T`, `R`, `D`, `B`.
    /// Everything else is skipped silently.
    pub(crate) fn parse(text: &[u8]) -> Result<(SymbolMap, u32), ErrorKind> {
        // Quick scan for newlines to (over)estimate the entry count and size
        // the hash table up front. A terminating NUL ends the text early.
        let text = match text.iter().position(|&b| b == 0) {
            Some(end) => &text[..end],
            None => text,
        };
        let capacity = text.iter().filter(|&&b| b == b'\n').count() as u32;
        let nbucket = capacity;
        log::debug!("predicted {} entries, {} hash buckets", capacity, nbucket);

        if capacity == 0 {
            return Err(ErrorKind::NoSymbols);
        }

        let table_len = 2 + (nbucket + capacity) as usize;
        let mut hash_table: Vec<u32> = Vec::new();
        let mut entries: Vec<MapEntry> = Vec::new();
        hash_table
            .try_reserve_exact(table_len)
            .map_err(|_| ErrorKind::MapMalloc)?;
        entries
            .try_reserve_exact(capacity as usize)
            .map_err(|_| ErrorKind::MapMalloc)?;

        hash_table.push(nbucket);
        hash_table.push(capacity);
        hash_table.resize(table_len, CHAIN_END);

        let mut index: u32 = 0;
        for line in text.split(|&b| b == b'\n') {
            // The newline count sized the tables; a trailing line without a
            // terminator has no slot and is dropped.
            if index >= capacity {
                break;
            }

            let mut fields = line
                .split(|b: &u8| b.is_ascii_whitespace())
                .filter(|f| !f.is_empty());

            let (name, type_field, addr_field) = match (fields.next(), fields.next(), fields.next())
            {
                (Some(n), Some(t), Some(a)) => (n, t, a),
                _ => continue,
            };

            let name = &name[..name.len().min(NAME_MAX)];
            let sym_type = type_field[0].to_ascii_uppercase();
            let addr64 = match parse_hex(addr_field) {
                Some(v) => v,
                None => continue,
            };

            // MIPS nm likes to print sign-extended 64-bit addresses; only
            // the low word is meaningful.
            let addr = addr64 as Addr;
            if addr == 0 {
                continue;
            }
            if !matches!(sym_type, b'T' | b'R' | b'D' | b'B') {
                continue;
            }

            let hash = elf_hash(name);
            let bucket = hash % nbucket;
            log::trace!(
                "map sym: {:08x} [{} {}]",
                addr,
                sym_type as char,
                core::str::from_utf8(name).unwrap_or("?")
            );

            entries.push(MapEntry { hash, addr });

            // Append the entry to the tail of its bucket's chain.
            let mut slot = 2 + bucket as usize;
            while hash_table[slot] != CHAIN_END {
                slot = 2 + nbucket as usize + hash_table[slot] as usize;
            }
            hash_table[slot] = index;
            index += 1;
        }

        if index == 0 {
            return Err(ErrorKind::NoSymbols);
        }

        log::debug!("parsed {} symbols from map", index);
        Ok((
            SymbolMap {
                nbucket,
                hash_table,
                entries,
            },
            index,
        ))
    }

    /// Look up a name. The first chained entry whose hash matches wins.
    pub(crate) fn lookup(&self, name: &[u8]) -> Option<Addr> {
        let hash = elf_hash(name);
        let bucket = hash % self.nbucket;

        let mut index = self.hash_table[2 + bucket as usize];
        while index != CHAIN_END {
            let entry = self.entries.get(index as usize)?;
            if entry.hash == hash {
                log::trace!(
                    "map lookup [{} = {:08x}]",
                    core::str::from_utf8(name).unwrap_or("?"),
                    entry.addr
                );
                return Some(entry.addr);
            }
            index = self.hash_table[2 + self.nbucket as usize + index as usize];
        }

        None
    }
}

/// Parse a plain hexadecimal field (no `0x` prefix, as emitted by `nm`).
fn parse_hex(field: &[u8]) -> Option<u64> {
    if field.is_empty() || field.len() > 16 {
        return None;
    }
    let mut value: u64 = 0;
    for &b in field {
        let digit = (b as char).to_digit(16)?;
        value = (value << 4) | digit as u64;
    }
    Some(value)
}

lazy_static! {
    static ref SYMBOL_MAP: Mutex<Option<SymbolMap>> = Mutex::new(None);
}

/// Parse a symbol map from text already in memory, replacing any previously
/// loaded map. Returns the number of accepted symbols.
pub fn parse_symbol_map(text: &[u8]) -> Option<u32> {
    unload_symbol_map();

    match SymbolMap::parse(text) {
        Ok((map, count)) => {
            *SYMBOL_MAP.lock() = Some(map);
            Some(count)
        }
        Err(kind) => {
            raise(kind);
            None
        }
    }
}

/// Load a symbol map from a file through the registered platform.
#[cfg(feature = "file-api")]
pub fn load_symbol_map(filename: &str) -> Option<u32> {
    let text = match crate::platform::load_file(filename) {
        Ok(text) => text,
        Err(kind) => {
            raise(kind);
            return None;
        }
    };

    parse_symbol_map(&text)
}

/// Load a symbol map from a file through the registered platform.
#[cfg(not(feature = "file-api"))]
pub fn load_symbol_map(_filename: &str) -> Option<u32> {
    raise(ErrorKind::NoFileApi);
    None
}

/// Drop the current symbol map, if any.
pub fn unload_symbol_map() {
    *SYMBOL_MAP.lock() = None;
}

/// Resolve a host-executable symbol by name.
pub fn get_symbol_by_name(name: &str) -> Option<Addr> {
    let guard = SYMBOL_MAP.lock();
    let map = match guard.as_ref() {
        Some(map) => map,
        None => {
            drop(guard);
            raise(ErrorKind::NoMap);
            return None;
        }
    };

    match map.lookup(name.as_bytes()) {
        Some(addr) => Some(addr),
        None => {
            drop(guard);
            raise(ErrorKind::MapSymbol);
            None
        }
    }
}

/// Map lookup that records no error. Used by the resolver paths, which
/// decide for themselves how a miss is reported.
pub(crate) fn lookup_quiet(name: &[u8]) -> Option<Addr> {
    SYMBOL_MAP.lock().as_ref()?.lookup(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_text_rodata_data_bss() {
        let text = b"foo T 80010000 10\nbar D 80020000 4\nbaz N 80030000 4\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 2);
        assert_eq!(map.lookup(b"foo"), Some(0x8001_0000));
        assert_eq!(map.lookup(b"bar"), Some(0x8002_0000));
        assert_eq!(map.lookup(b"baz"), None);
    }

    #[test]
    fn test_parse_truncates_64bit_addresses() {
        let text = b"x T ffffffff80040000 4\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 1);
        assert_eq!(map.lookup(b"x"), Some(0x8004_0000));
    }

    #[test]
    fn test_parse_skips_zero_addresses_and_short_lines() {
        let text = b"zero T 0 4\nshort T\nok B 80050000\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 1);
        assert_eq!(map.lookup(b"zero"), None);
        assert_eq!(map.lookup(b"ok"), Some(0x8005_0000));
    }

    #[test]
    fn test_parse_type_letter_is_case_insensitive() {
        let text = b"lower t 80060000\nupper R 80070000\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 2);
        assert_eq!(map.lookup(b"lower"), Some(0x8006_0000));
        assert_eq!(map.lookup(b"upper"), Some(0x8007_0000));
    }

    #[test]
    fn test_parse_stops_at_nul() {
        let text = b"a T 80080000\n\0b T 80090000\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 1);
        assert_eq!(map.lookup(b"b"), None);
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        assert_eq!(SymbolMap::parse(b"").unwrap_err(), ErrorKind::NoSymbols);
        assert_eq!(
            SymbolMap::parse(b"\n\n\n").unwrap_err(),
            ErrorKind::NoSymbols
        );
        // A lone line without a trailing newline never counts as capacity.
        assert_eq!(
            SymbolMap::parse(b"foo T 80010000").unwrap_err(),
            ErrorKind::NoSymbols
        );
    }

    #[test]
    fn test_every_accepted_name_resolves() {
        let text = b"main T 80010000 100\n\
                     _edata R 8001f000\n\
                     buffer B 80020000 800\n\
                     table D 80021000 40\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 4);
        assert_eq!(map.lookup(b"main"), Some(0x8001_0000));
        assert_eq!(map.lookup(b"_edata"), Some(0x8001_f000));
        assert_eq!(map.lookup(b"buffer"), Some(0x8002_0000));
        assert_eq!(map.lookup(b"table"), Some(0x8002_1000));
    }

    #[test]
    fn test_hash_only_match_returns_first_entry() {
        // Two entries with identical names collide by construction; the
        // chain walk stops at the first hash match.
        let text = b"dup T 80010000\ndup T 80020000\n";
        let (map, count) = SymbolMap::parse(text).unwrap();

        assert_eq!(count, 2);
        assert_eq!(map.lookup(b"dup"), Some(0x8001_0000));
    }

    #[test]
    fn test_long_names_hash_on_first_63_bytes() {
        let long: Vec<u8> = (0..80).map(|i| b'a' + (i % 26)).collect();
        let mut text = long.clone();
        text.extend_from_slice(b" T 800a0000\n");

        let (map, _) = SymbolMap::parse(&text).unwrap();
        assert_eq!(map.lookup(&long[..63]), Some(0x800a_0000));
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert_eq!(parse_hex(b"80010000"), Some(0x8001_0000));
        assert_eq!(parse_hex(b"ffffffff80040000"), Some(0xffff_ffff_8004_0000));
        assert_eq!(parse_hex(b""), None);
        assert_eq!(parse_hex(b"80zz0000"), None);
        assert_eq!(parse_hex(b"ffffffff800400001"), None);
    }
}
