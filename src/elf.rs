//! ELF object reader.
//!
//! Extracts the pieces of a compiled eBPF object the load pipeline needs: the
//! license string, the packed map descriptor records of the `maps` section,
//! the raw instruction stream of each requested program section, and the map
//! relocations of the `SHT_REL` section linked to it.

use std::fs;
use std::path::Path;

use object::elf;
use object::read::elf::{ElfFile64, ElfSection64, SectionHeader as _};
use object::{Endianness, Object as _, ObjectSection as _, ObjectSymbol as _, SymbolIndex};

use crate::error::{Error, Result};
use crate::insn::{Insn, INSN_LEN};

/// On-disk size of one map descriptor record (see `bpf_elf_map` in iproute2).
pub(crate) const MAP_DEF_LEN: usize = 28;

const REL_ENTRY_LEN: usize = 16;

const LE: Endianness = Endianness::Little;

/// One 28-byte map descriptor record, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MapDef {
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub flags: u32,
    // Read from the record but not part of map creation.
    #[allow(dead_code)]
    pub id: u32,
    #[allow(dead_code)]
    pub pinning: u32,
}

/// A map reference to patch: which instruction, which declared map, and the
/// symbol name under which the caller will find the resulting descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MapRelocation {
    pub insn_idx: usize,
    pub map_idx: usize,
    pub name: String,
}

/// A parsed eBPF object, borrowing the raw file bytes.
pub(crate) struct ElfObject<'d> {
    file: ElfFile64<'d>,
}

impl<'d> ElfObject<'d> {
    pub(crate) fn parse(data: &'d [u8]) -> Result<Self> {
        let file = ElfFile64::parse(data)?;
        if !file.is_little_endian() {
            return Err(Error::MalformedObject(
                "big-endian object; eBPF objects are little-endian".into(),
            ));
        }
        Ok(Self { file })
    }

    /// The mandatory `license` section, bytes passed verbatim to the kernel
    /// (trailing NUL included).
    pub(crate) fn license(&self) -> Result<&'d [u8]> {
        let section = self
            .file
            .section_by_name("license")
            .ok_or_else(|| Error::MalformedObject("no license section".into()))?;
        let data = section.data()?;
        if data.is_empty() {
            return Err(Error::MalformedObject("empty license section".into()));
        }
        Ok(data)
    }

    /// Map descriptor records from the `maps` section, in declaration order.
    /// An absent section yields an empty vector.
    pub(crate) fn map_defs(&self) -> Result<Vec<MapDef>> {
        let section = match self.file.section_by_name("maps") {
            Some(section) => section,
            None => return Ok(Vec::new()),
        };
        if section.elf_section_header().sh_type(LE) != elf::SHT_PROGBITS {
            return Err(Error::MalformedObject(
                "maps section is not SHT_PROGBITS".into(),
            ));
        }
        let data = section.data()?;
        if data.len() % MAP_DEF_LEN != 0 {
            return Err(Error::MalformedObject(format!(
                "maps section size {} is not a multiple of {MAP_DEF_LEN}",
                data.len()
            )));
        }
        Ok(data
            .chunks_exact(MAP_DEF_LEN)
            .map(|rec| MapDef {
                map_type: le_u32(&rec[0..4]),
                key_size: le_u32(&rec[4..8]),
                value_size: le_u32(&rec[8..12]),
                max_entries: le_u32(&rec[12..16]),
                flags: le_u32(&rec[16..20]),
                id: le_u32(&rec[20..24]),
                pinning: le_u32(&rec[24..28]),
            })
            .collect())
    }

    /// Decoded instructions of the exact-named program section.
    pub(crate) fn instructions(&self, name: &str) -> Result<Vec<Insn>> {
        let data = self.program_section(name)?.data()?;
        if data.len() % INSN_LEN != 0 {
            return Err(Error::MalformedObject(format!(
                "section `{name}` size {} is not a multiple of {INSN_LEN}",
                data.len()
            )));
        }
        Ok(data
            .chunks_exact(INSN_LEN)
            .map(|chunk| {
                let mut raw = [0u8; INSN_LEN];
                raw.copy_from_slice(chunk);
                Insn::from_le_bytes(&raw)
            })
            .collect())
    }

    /// Map relocations of the `SHT_REL` section linked (via `sh_info`) to the
    /// named program section, with symbols resolved. `None` when no such
    /// section exists.
    ///
    /// All sections are scanned: an object can hold several `SHT_REL`
    /// sections and only their `sh_info` tells the target apart.
    pub(crate) fn map_relocations(&self, name: &str) -> Result<Option<Vec<MapRelocation>>> {
        let target = self.program_section(name)?.index().0;

        let mut rel_data = None;
        for section in self.file.sections() {
            let header = section.elf_section_header();
            if header.sh_type(LE) == elf::SHT_REL && header.sh_info(LE) as usize == target {
                rel_data = Some(section.data()?);
            }
        }
        let data = match rel_data {
            Some(data) => data,
            None => return Ok(None),
        };
        if data.len() % REL_ENTRY_LEN != 0 {
            return Err(Error::MalformedObject(format!(
                "relocation section for `{name}` has size {} not a multiple of {REL_ENTRY_LEN}",
                data.len()
            )));
        }

        let mut relocs = Vec::with_capacity(data.len() / REL_ENTRY_LEN);
        for entry in data.chunks_exact(REL_ENTRY_LEN) {
            let offset = le_u64(&entry[0..8]);
            let info = le_u64(&entry[8..16]);

            // The full symbol table keeps the null symbol at index 0, so the
            // relocation's symbol index addresses it directly.
            let sym_idx = (info >> 32) as usize;
            let symbol = self
                .file
                .symbol_by_index(SymbolIndex(sym_idx))
                .map_err(|_| {
                    Error::MalformedObject(format!(
                        "relocation in `{name}` references unknown symbol {sym_idx}"
                    ))
                })?;

            relocs.push(MapRelocation {
                insn_idx: (offset / INSN_LEN as u64) as usize,
                // The symbol value is the map's byte offset in the maps
                // section; the declaration index follows from the record size.
                map_idx: (symbol.address() / MAP_DEF_LEN as u64) as usize,
                name: symbol.name()?.to_string(),
            });
        }
        Ok(Some(relocs))
    }

    fn program_section(&self, name: &str) -> Result<ElfSection64<'d, '_, Endianness>> {
        self.file
            .section_by_name(name)
            .ok_or_else(|| Error::MalformedObject(format!("could not find section `{name}`")))
    }
}

/// Read and decode the instructions of `section` from the object at `path`
/// without touching the kernel. Useful for inspecting a compiled object;
/// pair with [`Insn`]'s `Display` to dump a program.
pub fn read_instructions(path: impl AsRef<Path>, section: &str) -> Result<Vec<Insn>> {
    let data = fs::read(path)?;
    ElfObject::parse(&data)?.instructions(section)
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
