//! Per-process swap files.
//!
//! A swap file is a flat array of pages, page `v` at bytes `[v * PAGE_SIZE, (v + 1) *
//! PAGE_SIZE)`, with no header. Which pages hold a valid image is tracked by an in-memory
//! bitmap that is never persisted: swap files live only as long as their process.

use alloc::{boxed::Box, format, string::String};

use crate::{
    FileSystem, OpenFile, PAGE_SIZE, PageNumber, ProcessId, StorageError, VmError,
    bitmap::Bitmap,
};

/// Backing storage for the evicted pages of one address space.
pub struct SwapStore {
    name: String,
    file: Box<dyn OpenFile>,
    present: Bitmap,
}

impl SwapStore {
    /// Returns the name of the swap file used by a process.
    pub fn file_name(pid: ProcessId) -> String {
        format!("SWAP.{pid}")
    }

    /// Creates and opens the swap file for a process with room for `page_count` pages.
    pub fn create(
        file_system: &dyn FileSystem,
        pid: ProcessId,
        page_count: usize,
    ) -> Result<Self, VmError> {
        let name = Self::file_name(pid);
        if let Err(err) = file_system.create(&name, page_count * PAGE_SIZE) {
            log::warn!("cannot create {name}: {err}");
            return Err(VmError::SwapUnavailable(pid));
        }
        let Some(file) = file_system.open(&name) else {
            log::warn!("cannot open {name} after creating it");
            let _ = file_system.remove(&name);
            return Err(VmError::SwapUnavailable(pid));
        };

        log::debug!("created {name} for {page_count} pages");
        Ok(Self {
            name,
            file,
            present: Bitmap::new(page_count),
        })
    }

    /// Returns the name of the backing file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the page has been written out at least once.
    pub fn contains(&self, page: PageNumber) -> bool {
        self.present.test(page.as_usize())
    }

    /// Returns the number of pages with a swap image.
    pub fn page_count(&self) -> usize {
        self.present.count_set()
    }

    /// Writes a page image and marks the page present.
    pub fn write_page(&mut self, page: PageNumber, bytes: &[u8]) -> Result<(), StorageError> {
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        self.file.write_all_at(bytes, page.byte_offset())?;
        self.present.mark(page.as_usize());
        Ok(())
    }

    /// Reads back a page image previously written with [`SwapStore::write_page`].
    ///
    /// # Panics
    /// Panics if the page has never been written out.
    pub fn read_page(&mut self, page: PageNumber, bytes: &mut [u8]) -> Result<(), StorageError> {
        assert!(self.contains(page), "page {page} has no swap image");
        self.file.read_exact_at(bytes, page.byte_offset())
    }

    /// Deletes the backing file.
    pub fn remove(self, file_system: &dyn FileSystem) {
        if let Err(err) = file_system.remove(&self.name) {
            log::warn!("cannot remove {}: {err}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemFileSystem;

    #[test]
    fn creates_file_sized_for_address_space() {
        let fs = MemFileSystem::new();
        let swap = SwapStore::create(&fs, ProcessId::new(3), 5).unwrap();
        assert_eq!(swap.name(), "SWAP.3");
        assert_eq!(fs.file("SWAP.3").unwrap().contents().len(), 5 * PAGE_SIZE);
        assert_eq!(swap.page_count(), 0);
    }

    #[test]
    fn pages_round_trip_at_their_offset() {
        let fs = MemFileSystem::new();
        let mut swap = SwapStore::create(&fs, ProcessId::new(1), 4).unwrap();
        let page = [0x5Au8; PAGE_SIZE];

        assert!(!swap.contains(PageNumber::new(2)));
        swap.write_page(PageNumber::new(2), &page).unwrap();
        assert!(swap.contains(PageNumber::new(2)));

        let contents = fs.file("SWAP.1").unwrap().contents();
        assert_eq!(&contents[2 * PAGE_SIZE..3 * PAGE_SIZE], &page[..]);
        assert!(contents[..2 * PAGE_SIZE].iter().all(|&b| b == 0));

        let mut back = [0u8; PAGE_SIZE];
        swap.read_page(PageNumber::new(2), &mut back).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn duplicate_swap_file_is_unavailable() {
        let fs = MemFileSystem::new();
        let _first = SwapStore::create(&fs, ProcessId::new(1), 1).unwrap();
        assert!(matches!(
            SwapStore::create(&fs, ProcessId::new(1), 1),
            Err(VmError::SwapUnavailable(_))
        ));
    }

    #[test]
    fn remove_deletes_backing_file() {
        let fs = MemFileSystem::new();
        let swap = SwapStore::create(&fs, ProcessId::new(9), 1).unwrap();
        swap.remove(&fs);
        assert!(!fs.exists("SWAP.9"));
    }
}
