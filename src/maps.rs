//! Map creation and the per-map data-plane operations.
//!
//! Keys and values are opaque byte buffers supplied by the caller; their
//! lengths must match the `key_size` / `value_size` the map was created with,
//! which the kernel enforces on every call.

use std::os::unix::io::RawFd;

use tracing::debug;

use crate::error::{Error, Result};
use crate::sys::{self, Cmd, Errno, MapCreateAttr, MapElemAttr};

/// Kernel map types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MapType {
    Unspec = 0,
    Hash = 1,
    Array = 2,
    ProgArray = 3,
    PerfEventArray = 4,
    PerCpuHash = 5,
    PerCpuArray = 6,
    StackTrace = 7,
    CgroupArray = 8,
}

impl TryFrom<u32> for MapType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => MapType::Unspec,
            1 => MapType::Hash,
            2 => MapType::Array,
            3 => MapType::ProgArray,
            4 => MapType::PerfEventArray,
            5 => MapType::PerCpuHash,
            6 => MapType::PerCpuArray,
            7 => MapType::StackTrace,
            8 => MapType::CgroupArray,
            other => {
                return Err(Error::MalformedObject(format!(
                    "unknown map type {other}"
                )))
            }
        })
    }
}

/// Flags for [`map_update`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u64)]
pub enum MapUpdateFlags {
    /// Create or overwrite (BPF_ANY).
    #[default]
    Any = 0,
    /// Create only; fail if the key exists (BPF_NOEXIST).
    NoExist = 1,
    /// Overwrite only; fail if the key is absent (BPF_EXIST).
    Exist = 2,
}

/// Create a map, returning its file descriptor. The caller owns the
/// descriptor and is responsible for closing it.
pub fn map_create(
    map_type: MapType,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    flags: u32,
) -> Result<RawFd> {
    let attr = MapCreateAttr {
        map_type: map_type as u32,
        key_size,
        value_size,
        max_entries,
        map_flags: flags,
    };
    let fd = sys::bpf(Cmd::MapCreate, &attr)? as RawFd;
    debug!(?map_type, key_size, value_size, max_entries, fd, "created map");
    Ok(fd)
}

/// Insert or update the entry for `key`.
pub fn map_update(fd: RawFd, key: &[u8], value: &[u8], flags: MapUpdateFlags) -> Result<()> {
    let attr = MapElemAttr {
        map_fd: fd as u32,
        key: key.as_ptr() as u64,
        value: value.as_ptr() as u64,
        flags: flags as u64,
    };
    sys::bpf(Cmd::MapUpdateElem, &attr)?;
    Ok(())
}

/// Look up `key`, filling `value` in place on a hit.
///
/// Returns `Ok(false)` when the key is absent; that is a result, not an
/// error.
pub fn map_lookup(fd: RawFd, key: &[u8], value: &mut [u8]) -> Result<bool> {
    let attr = MapElemAttr {
        map_fd: fd as u32,
        key: key.as_ptr() as u64,
        value: value.as_mut_ptr() as u64,
        flags: 0,
    };
    match sys::bpf(Cmd::MapLookupElem, &attr) {
        Ok(_) => Ok(true),
        Err(Errno::NotFound) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}

/// Delete the entry for `key`. Returns `Ok(false)` when there was nothing to
/// delete.
pub fn map_delete(fd: RawFd, key: &[u8]) -> Result<bool> {
    let attr = MapElemAttr {
        map_fd: fd as u32,
        key: key.as_ptr() as u64,
        value: 0,
        flags: 0,
    };
    match sys::bpf(Cmd::MapDeleteElem, &attr) {
        Ok(_) => Ok(true),
        Err(Errno::NotFound) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}

/// Fetch the key ordered after `key` (kernel-defined order) into `next_key`.
///
/// Returns `Ok(false)` when `key` was the last one — including on the first
/// call against an empty map. To enumerate a whole map, seed with a key known
/// to be absent (all-zero works when zero is not a valid key) and feed each
/// returned key back in until this returns `Ok(false)`.
pub fn map_next_key(fd: RawFd, key: &[u8], next_key: &mut [u8]) -> Result<bool> {
    let attr = MapElemAttr {
        map_fd: fd as u32,
        key: key.as_ptr() as u64,
        value: next_key.as_mut_ptr() as u64,
        flags: 0,
    };
    match sys::bpf(Cmd::MapGetNextKey, &attr) {
        Ok(_) => Ok(true),
        Err(Errno::NotFound) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}
