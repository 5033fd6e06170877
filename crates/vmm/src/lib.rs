#![cfg_attr(not(test), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The virtual memory subsystem of the Polaris teaching kernel. It provides:
//!
//! - Per-process address spaces with a flat, software-managed page table.
//! - A small translation cache refilled by a software fault handler.
//! - Demand loading of code and data pages straight from the executable image.
//! - A global frame table with FIFO, second-chance and random replacement.
//! - Per-process swap files holding evicted pages.
//!
//! Everything is coordinated by a single [`VirtualMemoryManager`], created once at boot
//! and shared by reference with the rest of the kernel.

extern crate alloc;

mod address;
mod address_space;
mod bitmap;
mod config;
mod error;
mod executable;
mod frame_table;
mod manager;
mod numbers;
mod page_table;
mod physical_memory;
mod stats;
mod storage;
mod swap;
mod tlb;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use config::{EvictionPolicy, UnknownPolicy, VmConfig};
pub use error::{StorageError, VmError};
pub use executable::{Executable, ImageBuilder, NOFF_MAGIC, Segment};
pub use frame_table::{FrameOwner, FrameTable};
pub use manager::VirtualMemoryManager;
pub use numbers::{FrameNumber, PageNumber, ProcessId};
pub use page_table::{PageFlags, PageTable, PageTableEntry};
pub use physical_memory::PhysicalMemory;
pub use stats::Statistics;
pub use storage::{FileSystem, MemFile, MemFileSystem, OpenFile};
pub use swap::SwapStore;
pub use tlb::{TlbSlot, TranslationCache};

/// Size of a page (and of a physical frame) in bytes. Matches one disk sector.
pub const PAGE_SIZE: usize = 128;

/// Bytes reserved for the user stack at the top of every address space.
pub const USER_STACK_SIZE: usize = 1024;
