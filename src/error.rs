use thiserror::Error;

use crate::sys::Errno;

/// Errors surfaced by the loader and the map data-plane wrappers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ELF parse error: {0}")]
    Elf(#[from] object::read::Error),

    #[error("malformed eBPF object: {0}")]
    MalformedObject(String),

    #[error("bpf syscall failed: {0}")]
    Syscall(#[from] Errno),

    /// Program load failure, carrying both the kernel verifier's textual
    /// diagnostic and the definitive errno. The log is informational even
    /// when the errno alone explains the failure.
    #[error("verifier rejected section `{section}` ({errno}): {log}")]
    VerifierRejected {
        section: String,
        log: String,
        errno: Errno,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
