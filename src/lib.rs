//! Minimal eBPF ELF object loader for Linux.
//!
//! Takes a compiled eBPF object file, creates the maps its `maps` section
//! declares, rewrites map references in the instruction stream to carry the
//! kernel file descriptors, and loads the requested program sections through
//! the `bpf(2)` syscall. Thin wrappers over the per-map data-plane commands
//! (lookup, update, delete, get-next-key) round out the API.
//!
//! Attaching the loaded programs to hook points (tc, XDP, kprobes) is out of
//! scope; the loader stops at producing file descriptors.
//!
//! ```no_run
//! use bpfld::{map_lookup, Loader};
//!
//! let loaded = Loader::new().load("bpf/simple_map.o", &["classifier"])?;
//!
//! let mut value = [0u8; 16];
//! let found = map_lookup(loaded.maps["map1"], &[0u8; 8], &mut value)?;
//! # Ok::<(), bpfld::Error>(())
//! ```
// eBPF is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]
// Unsafe is required in one narrow, documented site:
//   - sys.rs: the raw bpf(2) syscall and close(2) on load rollback
// All other unsafe is denied.
#![deny(unsafe_code)]

mod elf;
mod error;
mod insn;
mod load;
mod maps;
mod sys;

pub use elf::read_instructions;
pub use error::{Error, Result};
pub use insn::{Insn, BPF_PSEUDO_MAP_FD};
pub use load::{Loaded, Loader, ProgType};
pub use maps::{
    map_create, map_delete, map_lookup, map_next_key, map_update, MapType, MapUpdateFlags,
};
pub use sys::Errno;
