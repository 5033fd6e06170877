//! Address space management.
//!
//! An address space is the memory of one user process: a flat page table covering the
//! program's code, data and stack, the executable image those pages are filled from, and
//! (when demand loading) the swap file evicted pages are written to. Frames are handed
//! out by the [`VirtualMemoryManager`](crate::VirtualMemoryManager), which owns the frame
//! table; an address space only knows how to fill a frame it has been given.

use core::ops::Range;

use crate::{
    Executable, PAGE_SIZE, PageNumber, PageTable, PageTableEntry, ProcessId, StorageError,
    SwapStore, USER_STACK_SIZE,
};

/// Where the contents of a freshly loaded page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageSource {
    /// Restored from the swap file.
    Swap,
    /// Filled from the executable image, or zero-filled for stack and uninitialized data.
    Image { read_only: bool },
}

/// The virtual memory of one process.
pub struct AddressSpace {
    pid: ProcessId,
    page_table: PageTable,
    executable: Executable,
    swap: Option<SwapStore>,
}

impl AddressSpace {
    /// Returns the number of pages needed to hold an image plus its stack.
    pub fn pages_needed(executable: &Executable) -> usize {
        (executable.size() + USER_STACK_SIZE).div_ceil(PAGE_SIZE)
    }

    /// Creates an address space with every page non-resident.
    pub(crate) fn new(pid: ProcessId, executable: Executable, swap: Option<SwapStore>) -> Self {
        let page_count = Self::pages_needed(&executable);
        Self {
            pid,
            page_table: PageTable::new(page_count),
            executable,
            swap,
        }
    }

    /// Returns the owning process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Returns the number of virtual pages.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns the size of the address space in bytes.
    pub fn size(&self) -> usize {
        self.page_count() * PAGE_SIZE
    }

    /// Returns the page table.
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Returns the entry for a page, or `None` if the page is outside the address space.
    pub fn entry(&self, page: PageNumber) -> Option<&PageTableEntry> {
        self.page_table.get(page)
    }

    /// Returns the entry for a page for modification.
    pub fn entry_mut(&mut self, page: PageNumber) -> Option<&mut PageTableEntry> {
        self.page_table.get_mut(page)
    }

    /// Returns the swap store, if the address space is demand loaded.
    pub fn swap(&self) -> Option<&SwapStore> {
        self.swap.as_ref()
    }

    pub(crate) fn swap_mut(&mut self) -> Option<&mut SwapStore> {
        self.swap.as_mut()
    }

    pub(crate) fn take_swap(&mut self) -> Option<SwapStore> {
        self.swap.take()
    }

    /// Fills a zeroed frame with the contents of `page`.
    ///
    /// A page with a swap image is restored verbatim. Otherwise the bytes overlapping the
    /// code and initialized data segments are read from the image and the rest is left
    /// zero. Only a page lying entirely inside the code segment is read-only; a page
    /// shared between code and anything else stays writable.
    pub(crate) fn populate(
        &mut self,
        page: PageNumber,
        frame: &mut [u8],
    ) -> Result<PageSource, StorageError> {
        debug_assert_eq!(frame.len(), PAGE_SIZE);

        if let Some(swap) = self.swap.as_mut().filter(|swap| swap.contains(page)) {
            log::debug!("process {}: page {page} restored from {}", self.pid, swap.name());
            swap.read_page(page, frame)?;
            return Ok(PageSource::Swap);
        }

        let range = page.byte_offset()..page.byte_offset() + PAGE_SIZE;
        let code = self.executable.code();
        let data = self.executable.init_data();
        let code_overlap = code.overlap(&range);
        let data_overlap = data.overlap(&range);

        if let Some(overlap) = &code_overlap {
            let offset = overlap.start - code.virtual_addr;
            self.executable
                .read_code(&mut frame[local(overlap, &range)], offset)?;
        }
        if let Some(overlap) = &data_overlap {
            let offset = overlap.start - data.virtual_addr;
            self.executable
                .read_data(&mut frame[local(overlap, &range)], offset)?;
        }

        let read_only = code.size > 0 && code.contains(&range);
        let kind = match (code_overlap.is_some(), data_overlap.is_some()) {
            (true, true) => "code+data",
            (true, false) if read_only => "code",
            (true, false) => "code tail",
            (false, true) => "data",
            (false, false) => "zero-fill",
        };
        log::debug!(
            "process {}: page {page} filled from image ({kind}, read_only={read_only})",
            self.pid
        );

        Ok(PageSource::Image { read_only })
    }
}

/// Translates a range of virtual addresses inside `page` to offsets within the frame.
fn local(overlap: &Range<usize>, page: &Range<usize>) -> Range<usize> {
    overlap.start - page.start..overlap.end - page.start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageBuilder, MemFile, MemFileSystem};
    use alloc::boxed::Box;

    fn space(image: Vec<u8>, swap: bool) -> (AddressSpace, MemFileSystem) {
        let fs = MemFileSystem::new();
        let exe = Executable::open(Box::new(MemFile::from_bytes(image))).unwrap();
        let pid = ProcessId::new(1);
        let pages = AddressSpace::pages_needed(&exe);
        let swap = swap.then(|| SwapStore::create(&fs, pid, pages).unwrap());
        (AddressSpace::new(pid, exe, swap), fs)
    }

    fn fill(space: &mut AddressSpace, page: usize) -> ([u8; PAGE_SIZE], PageSource) {
        let mut frame = [0u8; PAGE_SIZE];
        let source = space.populate(PageNumber::new(page), &mut frame).unwrap();
        (frame, source)
    }

    #[test]
    fn sizes_include_stack() {
        let image = ImageBuilder::new().code(&[1; 300]).data(&[2; 20]).bss(10).build();
        let (space, _fs) = space(image, false);
        assert_eq!(space.page_count(), (330 + USER_STACK_SIZE).div_ceil(PAGE_SIZE));
        assert_eq!(space.size(), space.page_count() * PAGE_SIZE);
        assert!(space.page_table().resident().next().is_none());
    }

    #[test]
    fn code_page_is_read_only_copy_of_code() {
        let code: Vec<u8> = (0..=255).collect();
        let image = ImageBuilder::new().code(&code).data(&[0xDD; 16]).build();
        let (mut space, _fs) = space(image, false);

        let (frame, source) = fill(&mut space, 1);
        assert_eq!(source, PageSource::Image { read_only: true });
        assert_eq!(&frame[..], &code[PAGE_SIZE..2 * PAGE_SIZE]);
    }

    #[test]
    fn straddling_page_gets_both_segments_and_is_writable() {
        let code = vec![0xC0; PAGE_SIZE + 28];
        let data = vec![0xDA; 40];
        let image = ImageBuilder::new().code(&code).data(&data).build();
        let (mut space, _fs) = space(image, false);

        let (frame, source) = fill(&mut space, 1);
        assert_eq!(source, PageSource::Image { read_only: false });
        assert!(frame[..28].iter().all(|&b| b == 0xC0));
        assert!(frame[28..68].iter().all(|&b| b == 0xDA));
        assert!(frame[68..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_data_segment_is_read_from_its_offset() {
        let data: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let image = ImageBuilder::new()
            .code(&[0x11; 16])
            .data(&data)
            .data_at(PAGE_SIZE + 64)
            .build();
        let (mut space, _fs) = space(image, false);

        let (frame, _) = fill(&mut space, 1);
        assert!(frame[..64].iter().all(|&b| b == 0));
        assert_eq!(&frame[64..], &data[..PAGE_SIZE - 64]);

        let (frame, _) = fill(&mut space, 2);
        assert_eq!(&frame[..], &data[64..64 + PAGE_SIZE]);

        let (frame, _) = fill(&mut space, 3);
        assert_eq!(&frame[..8], &data[192..]);
        assert!(frame[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stack_pages_are_zero_and_writable() {
        let image = ImageBuilder::new().code(&[0xFF; 64]).data(&[0xEE; 64]).build();
        let (mut space, _fs) = space(image, false);
        let last = space.page_count() - 1;

        let (frame, source) = fill(&mut space, last);
        assert_eq!(source, PageSource::Image { read_only: false });
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn swap_image_takes_precedence_over_executable() {
        let image = ImageBuilder::new().code(&[0xAB; 2 * PAGE_SIZE]).build();
        let (mut space, _fs) = space(image, true);
        let saved = [0x42u8; PAGE_SIZE];
        space
            .swap_mut()
            .unwrap()
            .write_page(PageNumber::new(0), &saved)
            .unwrap();

        let (frame, source) = fill(&mut space, 0);
        assert_eq!(source, PageSource::Swap);
        assert_eq!(frame, saved);
    }
}
