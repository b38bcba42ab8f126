//! The bpf(2) gateway: attribute records, command codes and the raw syscall.
//!
//! Every kernel interaction in this crate funnels through [`bpf`], which packs
//! nothing itself — callers hand it a fully built attribute record and the
//! record's byte size, exactly as the kernel's multiplexed syscall expects.
// The only unsafe code in the crate lives here: the syscall itself and
// close(2) on kernel-owned descriptors.
#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

#[cfg(target_arch = "x86_64")]
const BPF_SYSCALL_NR: libc::c_long = 321;
#[cfg(target_arch = "aarch64")]
const BPF_SYSCALL_NR: libc::c_long = 280;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("bpf(2) syscall number not defined for this architecture");

/// Commands of the multiplexed bpf(2) syscall. Numeric codes are kernel ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum Cmd {
    MapCreate = 0,
    MapLookupElem = 1,
    MapUpdateElem = 2,
    MapDeleteElem = 3,
    MapGetNextKey = 4,
    ProgLoad = 5,
    // Object pinning is not exposed; the codes stay to keep the table
    // congruent with the kernel's.
    #[allow(dead_code)]
    ObjPin = 6,
    #[allow(dead_code)]
    ObjGet = 7,
}

/// Kernel errno, translated into the handful of cases callers act on.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Errno {
    #[error("ENOMEM: out of memory")]
    OutOfMemory,
    #[error("EPERM: permission denied")]
    PermissionDenied,
    #[error("EINVAL: invalid argument")]
    InvalidArgument,
    /// ENOENT. On the lookup, delete and get-next-key paths this encodes
    /// "absent" and is converted to a positive result, never an error.
    #[error("ENOENT: not found")]
    NotFound,
    #[error("errno {0}")]
    Unknown(i32),
}

impl Errno {
    fn last_os_error() -> Self {
        match io::Error::last_os_error().raw_os_error().unwrap_or(0) {
            libc::ENOMEM => Errno::OutOfMemory,
            libc::EPERM => Errno::PermissionDenied,
            libc::EINVAL => Errno::InvalidArgument,
            libc::ENOENT => Errno::NotFound,
            raw => Errno::Unknown(raw),
        }
    }
}

/// Issue the bpf(2) syscall with `cmd` and the given attribute record.
///
/// The record must keep any buffers it points at alive across the call; the
/// kernel may read and write through them before returning.
pub(crate) fn bpf<T>(cmd: Cmd, attr: &T) -> Result<libc::c_long, Errno> {
    let ret = unsafe {
        libc::syscall(
            BPF_SYSCALL_NR,
            cmd as libc::c_long,
            attr as *const T,
            std::mem::size_of::<T>() as libc::c_long,
        )
    };
    if ret < 0 {
        Err(Errno::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Close a kernel descriptor, ignoring errors. Used by load rollback only;
/// descriptors handed to the caller are the caller's to close.
pub(crate) fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// BPF_MAP_CREATE attribute record.
#[repr(C)]
pub(crate) struct MapCreateAttr {
    pub map_type: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub map_flags: u32,
}

/// Attribute record shared by the map element commands. For
/// BPF_MAP_GET_NEXT_KEY the `value` field carries the next-key pointer.
#[repr(C)]
pub(crate) struct MapElemAttr {
    pub map_fd: u32,
    // 4 bytes of implicit padding to pointer alignment
    pub key: u64,
    pub value: u64,
    pub flags: u64,
}

/// BPF_PROG_LOAD attribute record.
#[repr(C)]
pub(crate) struct ProgLoadAttr {
    pub prog_type: u32,
    pub insn_cnt: u32,
    pub insns: u64,
    pub license: u64,
    pub log_level: u32,
    pub log_size: u32,
    pub log_buf: u64,
    pub kern_version: u32,
}
