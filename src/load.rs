//! The load pipeline: materialize declared maps, patch map references into
//! the instruction stream, and load each requested program section.

use std::collections::HashMap;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::elf::{ElfObject, MapDef, MapRelocation};
use crate::error::{Error, Result};
use crate::insn::{Insn, BPF_PSEUDO_MAP_FD};
use crate::maps::{self, MapType};
use crate::sys::{self, Cmd, ProgLoadAttr};

/// Size of the buffer handed to the kernel verifier for its diagnostic log.
const VERIFIER_LOG_LEN: usize = 32_384;

/// Kernel program types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ProgType {
    Unspec = 0,
    SocketFilter = 1,
    Kprobe = 2,
    SchedCls = 3,
    SchedAct = 4,
    Tracepoint = 5,
    Xdp = 6,
}

/// Descriptors produced by a successful [`Loader::load`].
///
/// The caller owns every descriptor in here from the moment `load` returns
/// and is responsible for closing them.
#[derive(Debug, Default)]
pub struct Loaded {
    /// Program section name → program file descriptor.
    pub programs: HashMap<String, RawFd>,
    /// Map symbol name → map file descriptor, for every map referenced by a
    /// loaded section.
    pub maps: HashMap<String, RawFd>,
}

/// Loads eBPF object files.
///
/// ```no_run
/// use bpfld::{Loader, ProgType};
///
/// let loaded = Loader::new()
///     .prog_type(ProgType::SchedCls)
///     .load("bpf/simple_map.o", &["classifier"])?;
/// let map1 = loaded.maps["map1"];
/// # Ok::<(), bpfld::Error>(())
/// ```
#[derive(Debug)]
pub struct Loader {
    prog_type: ProgType,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            prog_type: ProgType::SchedCls,
        }
    }

    /// Program type used for every loaded section. Defaults to
    /// [`ProgType::SchedCls`].
    pub fn prog_type(mut self, prog_type: ProgType) -> Self {
        self.prog_type = prog_type;
        self
    }

    /// Load the programs named by `sections` from the object at `path`,
    /// creating any maps the object declares.
    ///
    /// Maps are created in declaration order and sections are loaded in the
    /// given order. On failure every descriptor created by this call is
    /// closed before the error is returned.
    pub fn load(&self, path: impl AsRef<Path>, sections: &[&str]) -> Result<Loaded> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let obj = ElfObject::parse(&data)?;
        let license = obj.license()?;
        let defs = obj.map_defs()?;
        debug!(
            path = %path.display(),
            sections = sections.len(),
            maps = defs.len(),
            "loading eBPF object"
        );

        let map_fds = create_maps(&defs)?;

        let mut loaded = Loaded::default();
        match self.load_sections(&obj, license, &map_fds, !defs.is_empty(), sections, &mut loaded)
        {
            Ok(()) => Ok(loaded),
            Err(err) => {
                warn!(
                    maps = map_fds.len(),
                    programs = loaded.programs.len(),
                    "load failed, closing descriptors"
                );
                for fd in map_fds {
                    sys::close(fd);
                }
                for fd in loaded.programs.values() {
                    sys::close(*fd);
                }
                Err(err)
            }
        }
    }

    fn load_sections(
        &self,
        obj: &ElfObject<'_>,
        license: &[u8],
        map_fds: &[RawFd],
        have_maps: bool,
        sections: &[&str],
        out: &mut Loaded,
    ) -> Result<()> {
        for &section in sections {
            let mut insns = obj.instructions(section)?;
            let relocs = obj.map_relocations(section)?;
            if have_maps && relocs.is_none() {
                return Err(Error::MalformedObject(format!(
                    "maps are declared but section `{section}` has no relocation section"
                )));
            }
            let relocs = relocs.unwrap_or_default();

            apply_map_relocations(&mut insns, &relocs, map_fds)?;
            debug!(section, relocations = relocs.len(), insns = insns.len(), "section prepared");

            let fd = self.prog_load(section, &insns, license)?;
            info!(section, fd, "loaded eBPF program");
            out.programs.insert(section.to_string(), fd);

            // Repeated relocations against one symbol write the same entry.
            for reloc in &relocs {
                out.maps.insert(reloc.name.clone(), map_fds[reloc.map_idx]);
            }
        }
        Ok(())
    }

    fn prog_load(&self, section: &str, insns: &[Insn], license: &[u8]) -> Result<RawFd> {
        let mut log = vec![0u8; VERIFIER_LOG_LEN];
        let attr = ProgLoadAttr {
            prog_type: self.prog_type as u32,
            insn_cnt: insns.len() as u32,
            insns: insns.as_ptr() as u64,
            license: license.as_ptr() as u64,
            // Level 1 enables verifier logging so rejections carry a
            // diagnostic.
            log_level: 1,
            log_size: VERIFIER_LOG_LEN as u32,
            log_buf: log.as_mut_ptr() as u64,
            kern_version: 0,
        };
        match sys::bpf(Cmd::ProgLoad, &attr) {
            Ok(fd) => Ok(fd as RawFd),
            Err(errno) => {
                let end = log.iter().position(|&b| b == 0).unwrap_or(log.len());
                Err(Error::VerifierRejected {
                    section: section.to_string(),
                    log: String::from_utf8_lossy(&log[..end]).into_owned(),
                    errno,
                })
            }
        }
    }
}

/// Create the declared maps in declaration order, returning descriptors
/// indexed by declaration position. A failure closes the descriptors already
/// created.
fn create_maps(defs: &[MapDef]) -> Result<Vec<RawFd>> {
    let mut fds = Vec::with_capacity(defs.len());
    for def in defs {
        let map_type = MapType::try_from(def.map_type)?;
        match maps::map_create(
            map_type,
            def.key_size,
            def.value_size,
            def.max_entries,
            def.flags,
        ) {
            Ok(fd) => fds.push(fd),
            Err(err) => {
                for fd in fds {
                    sys::close(fd);
                }
                return Err(err);
            }
        }
    }
    Ok(fds)
}

/// Patch each relocated instruction so its source register carries the
/// pseudo-map-fd marker and its immediate the descriptor of the referenced
/// map.
fn apply_map_relocations(
    insns: &mut [Insn],
    relocs: &[MapRelocation],
    map_fds: &[RawFd],
) -> Result<()> {
    for reloc in relocs {
        let insn = insns.get_mut(reloc.insn_idx).ok_or_else(|| {
            Error::MalformedObject(format!(
                "relocation for `{}` targets instruction {} out of range",
                reloc.name, reloc.insn_idx
            ))
        })?;
        let fd = map_fds.get(reloc.map_idx).ok_or_else(|| {
            Error::MalformedObject(format!(
                "relocation for `{}` references map {} out of range",
                reloc.name, reloc.map_idx
            ))
        })?;
        insn.set_src_reg(BPF_PSEUDO_MAP_FD);
        insn.set_imm(*fd);
    }
    Ok(())
}
