//! Builders for synthetic eBPF object files.
//!
//! Tests assemble the same legacy object layout clang produces for tc-style
//! programs: a `maps` section of packed 28-byte records with one symbol per
//! map, program sections of raw instructions, REL entries binding `lddw`
//! instructions to map symbols, and a NUL-terminated `license`.
// Shared between test crates; not every helper is used by every crate.
#![allow(dead_code)]

use std::io::Write as _;

use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope,
};
use tempfile::NamedTempFile;

pub const MAP_DEF_LEN: usize = 28;

pub struct ProgSection {
    name: String,
    code: Vec<u8>,
    /// (byte offset into the section, map symbol name)
    relocs: Vec<(u64, String)>,
}

/// Builder for a synthetic eBPF object. Starts with a GPL license; everything
/// else is opt-in.
pub struct BpfObject {
    license: Option<Vec<u8>>,
    maps: Vec<(String, Vec<u8>)>,
    raw_maps: Option<Vec<u8>>,
    nobits_maps: Option<u64>,
    sections: Vec<ProgSection>,
}

impl BpfObject {
    pub fn new() -> Self {
        Self {
            license: Some(b"GPL\0".to_vec()),
            maps: Vec::new(),
            raw_maps: None,
            nobits_maps: None,
            sections: Vec::new(),
        }
    }

    pub fn no_license(mut self) -> Self {
        self.license = None;
        self
    }

    pub fn license(mut self, bytes: &[u8]) -> Self {
        self.license = Some(bytes.to_vec());
        self
    }

    /// Declare a map as a named 28-byte record.
    pub fn map(
        mut self,
        name: &str,
        map_type: u32,
        key_size: u32,
        value_size: u32,
        max_entries: u32,
    ) -> Self {
        let mut rec = Vec::with_capacity(MAP_DEF_LEN);
        for field in [map_type, key_size, value_size, max_entries, 0, 0, 0] {
            rec.extend_from_slice(&field.to_le_bytes());
        }
        self.maps.push((name.to_string(), rec));
        self
    }

    /// Use arbitrary bytes as the `maps` section contents.
    pub fn raw_maps(mut self, bytes: &[u8]) -> Self {
        self.raw_maps = Some(bytes.to_vec());
        self
    }

    /// Emit `maps` as an SHT_NOBITS section of the given size.
    pub fn nobits_maps(mut self, size: u64) -> Self {
        self.nobits_maps = Some(size);
        self
    }

    pub fn section(self, name: &str, code: Vec<u8>) -> Self {
        self.section_with_relocs(name, code, &[])
    }

    pub fn section_with_relocs(
        mut self,
        name: &str,
        code: Vec<u8>,
        relocs: &[(u64, &str)],
    ) -> Self {
        self.sections.push(ProgSection {
            name: name.to_string(),
            code,
            relocs: relocs
                .iter()
                .map(|(off, map)| (*off, map.to_string()))
                .collect(),
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::Bpf, Endianness::Little);
        let mut map_symbols = std::collections::HashMap::new();

        if let Some(size) = self.nobits_maps {
            let id = obj.add_section(vec![], b"maps".to_vec(), SectionKind::UninitializedData);
            obj.append_section_bss(id, size, 4);
        } else if let Some(bytes) = self.raw_maps {
            let id = obj.add_section(vec![], b"maps".to_vec(), SectionKind::Data);
            obj.append_section_data(id, &bytes, 4);
        } else if !self.maps.is_empty() {
            let id = obj.add_section(vec![], b"maps".to_vec(), SectionKind::Data);
            for (name, rec) in &self.maps {
                let offset = obj.append_section_data(id, rec, 4);
                let sym = obj.add_symbol(Symbol {
                    name: name.as_bytes().to_vec(),
                    value: offset,
                    size: rec.len() as u64,
                    kind: SymbolKind::Data,
                    scope: SymbolScope::Linkage,
                    weak: false,
                    section: SymbolSection::Section(id),
                    flags: SymbolFlags::None,
                });
                map_symbols.insert(name.clone(), sym);
            }
        }

        for section in &self.sections {
            let id = obj.add_section(vec![], section.name.as_bytes().to_vec(), SectionKind::Text);
            let base = obj.append_section_data(id, &section.code, 8);
            for (offset, map_name) in &section.relocs {
                let symbol = *map_symbols
                    .get(map_name)
                    .unwrap_or_else(|| panic!("no map named {map_name}"));
                obj.add_relocation(
                    id,
                    Relocation {
                        offset: base + offset,
                        symbol,
                        addend: 0,
                        // R_BPF_64_64
                        flags: RelocationFlags::Elf { r_type: 1 },
                    },
                )
                .expect("add relocation");
            }
        }

        if let Some(license) = &self.license {
            let id = obj.add_section(vec![], b"license".to_vec(), SectionKind::Data);
            obj.append_section_data(id, license, 1);
        }

        obj.write().expect("write object")
    }

    /// Build and persist to a temporary file; the file lives as long as the
    /// returned handle.
    pub fn write(self) -> NamedTempFile {
        write_file(&self.build())
    }
}

pub fn write_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    file
}

fn insn(code: u8, dst: u8, src: u8, off: i16, imm: i32) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw[0] = code;
    raw[1] = (src << 4) | (dst & 0x0f);
    raw[2..4].copy_from_slice(&off.to_le_bytes());
    raw[4..8].copy_from_slice(&imm.to_le_bytes());
    raw
}

/// `dst = imm` (64-bit).
pub fn mov64_imm(dst: u8, imm: i32) -> [u8; 8] {
    insn(0xb7, dst, 0, 0, imm)
}

/// `dst = src` (64-bit).
pub fn mov64_reg(dst: u8, src: u8) -> [u8; 8] {
    insn(0xbf, dst, src, 0, 0)
}

/// `dst += imm` (64-bit).
pub fn add64_imm(dst: u8, imm: i32) -> [u8; 8] {
    insn(0x07, dst, 0, 0, imm)
}

/// `*(u64 *)(dst + off) = imm`.
pub fn st_dw(dst: u8, off: i16, imm: i32) -> [u8; 8] {
    insn(0x7a, dst, 0, off, imm)
}

/// Call a BPF helper by number.
pub fn call(func: i32) -> [u8; 8] {
    insn(0x85, 0, 0, 0, func)
}

/// Return from the program.
pub fn exit() -> [u8; 8] {
    insn(0x95, 0, 0, 0, 0)
}

/// `dst = <map fd>` — the two-slot load patched by a map relocation at the
/// instruction's byte offset.
pub fn lddw_map(dst: u8) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&insn(0x18, dst, 0, 0, 0));
    raw
}

/// `mov r0, 0; exit` — the smallest program every type accepts.
pub fn trivial_program() -> Vec<u8> {
    [mov64_imm(0, 0), exit()].concat()
}

/// A classifier that looks up an all-zero key in `map1` and returns 0.
/// Mirrors the reference object's shape: one map relocation at offset 0.
pub fn lookup_program() -> Vec<u8> {
    [
        lddw_map(1).to_vec(),
        st_dw(10, -8, 0).to_vec(),
        mov64_reg(2, 10).to_vec(),
        add64_imm(2, -8).to_vec(),
        call(1).to_vec(), // bpf_map_lookup_elem
        mov64_imm(0, 0).to_vec(),
        exit().to_vec(),
    ]
    .concat()
}
