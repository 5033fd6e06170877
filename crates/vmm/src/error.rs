//! Errors reported by the virtual memory subsystem.
//!
//! Only recoverable conditions are errors. Broken invariants (freeing a free frame,
//! evicting from an empty frame table, a core map that disagrees with a page table)
//! panic instead.

use thiserror::Error;

use crate::{ProcessId, VirtualAddress};

/// Errors raised by the storage collaborators (executable image and swap files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The named file does not exist.
    #[error("file not found")]
    NotFound,
    /// A file with the same name already exists.
    #[error("file already exists")]
    AlreadyExists,
    /// The transfer would run past the end of the file.
    #[error("transfer of {len} bytes at offset {offset} is out of range")]
    OutOfRange { offset: usize, len: usize },
    /// Fewer bytes were transferred than requested.
    #[error("short transfer")]
    ShortTransfer,
    /// The device reported a failure.
    #[error("device I/O error")]
    Io,
}

/// Errors returned by the public virtual memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    /// Not enough free frames to populate an eagerly loaded address space.
    #[error("out of memory: {needed} frames needed, {available} free")]
    OutOfMemory { needed: usize, available: usize },
    /// The swap file for the process could not be created or opened.
    #[error("cannot create swap file for process {0}")]
    SwapUnavailable(ProcessId),
    /// The executable image has a bad magic number or a truncated header.
    #[error("invalid executable image")]
    InvalidExecutable,
    /// A read or write on the executable image or a swap file failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The virtual address lies outside the current address space.
    #[error("address {0} is outside the address space")]
    AddressError(VirtualAddress),
    /// A write targeted a read-only page.
    #[error("write to read-only address {0}")]
    ReadOnly(VirtualAddress),
    /// No address space is registered for the process.
    #[error("no address space for process {0}")]
    NoSuchProcess(ProcessId),
    /// An address space is already registered for the process.
    #[error("process {0} already has an address space")]
    ProcessExists(ProcessId),
    /// A translation was requested while no process is running.
    #[error("no process is running")]
    NoCurrentProcess,
}
