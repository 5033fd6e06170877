//! The virtual memory manager.
//!
//! One [`VirtualMemoryManager`] is created at boot and shared by reference with the rest of
//! the kernel. It owns the frame table, main memory, the translation cache and the
//! registry of live address spaces, so that evicting a page of one process on behalf of
//! another is a single, explicit operation on one structure. Every public operation runs
//! under one lock: a fault, including any eviction and swap traffic it causes, is one
//! critical section.

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{
    AddressSpace, Executable, FileSystem, FrameNumber, FrameOwner, FrameTable, OpenFile,
    PageNumber, PageTableEntry, PhysicalAddress, PhysicalMemory, ProcessId, Statistics,
    SwapStore, TlbSlot, TranslationCache, VirtualAddress, VmConfig, VmError,
    address_space::PageSource,
};

/// Coordinates frames, address spaces, swap files and the translation cache.
pub struct VirtualMemoryManager {
    state: Mutex<VmState>,
}

struct VmState {
    config: VmConfig,
    file_system: Arc<dyn FileSystem>,
    frames: FrameTable,
    memory: PhysicalMemory,
    tlb: TranslationCache,
    spaces: BTreeMap<ProcessId, AddressSpace>,
    current: Option<ProcessId>,
    stats: Statistics,
}

impl VirtualMemoryManager {
    /// Creates the manager with all frames free and no address spaces.
    ///
    /// # Panics
    /// Panics if the configuration has no frames or no translation cache slots.
    pub fn new(config: VmConfig, file_system: Arc<dyn FileSystem>) -> Self {
        assert!(config.num_frames > 0, "main memory needs at least one frame");
        log::info!(
            "virtual memory: {} frames, {} replacement, {} loading, {} cache slots",
            config.num_frames,
            config.eviction_policy,
            if config.demand_loading { "demand" } else { "eager" },
            config.tlb_capacity
        );

        Self {
            state: Mutex::new(VmState {
                config,
                file_system,
                frames: FrameTable::new(
                    config.num_frames,
                    config.eviction_policy,
                    config.random_seed,
                ),
                memory: PhysicalMemory::new(config.num_frames),
                tlb: TranslationCache::new(config.tlb_capacity),
                spaces: BTreeMap::new(),
                current: None,
                stats: Statistics::default(),
            }),
        }
    }

    /// Returns the configuration the manager was created with.
    pub fn config(&self) -> VmConfig {
        self.state.lock().config
    }

    /// Loads a process image and registers its address space.
    ///
    /// With demand loading every page starts non-resident and a swap file is created.
    /// Without it every page is allocated and filled immediately; if there are not enough
    /// free frames nothing is allocated and [`VmError::OutOfMemory`] is returned.
    pub fn create_address_space(
        &self,
        executable: Box<dyn OpenFile>,
        pid: ProcessId,
    ) -> Result<(), VmError> {
        self.state.lock().create_address_space(executable, pid)
    }

    /// Tears down a process's address space, releasing its frames and swap file.
    pub fn destroy_address_space(&self, pid: ProcessId) -> Result<(), VmError> {
        self.state.lock().destroy_address_space(pid)
    }

    /// Switches the running process.
    ///
    /// The translation cache is shared by every process, so all slots are written back
    /// and invalidated.
    pub fn switch_to(&self, pid: ProcessId) -> Result<(), VmError> {
        let mut state = self.state.lock();
        if !state.spaces.contains_key(&pid) {
            return Err(VmError::NoSuchProcess(pid));
        }
        state.flush_tlb();
        state.current = Some(pid);
        log::trace!("switched to process {pid}");
        Ok(())
    }

    /// Returns the running process.
    pub fn current(&self) -> Option<ProcessId> {
        self.state.lock().current
    }

    /// Refills the translation cache after a miss on `vaddr` in the running process.
    pub fn handle_translation_miss(&self, vaddr: VirtualAddress) -> Result<(), VmError> {
        self.state.lock().handle_translation_miss(vaddr)
    }

    /// Makes a page resident, evicting another page if memory is full.
    ///
    /// Loading a page that is already resident returns its entry without any I/O.
    pub fn load_page(&self, pid: ProcessId, page: PageNumber) -> Result<PageTableEntry, VmError> {
        self.state.lock().load_page(pid, page)
    }

    /// Reads memory of the running process through the translation cache.
    pub fn read_virtual(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), VmError> {
        let mut state = self.state.lock();
        for (offset, byte) in buf.iter_mut().enumerate() {
            let paddr = state.translate(vaddr + offset, false)?;
            *byte = state.memory.read_byte(paddr);
        }
        Ok(())
    }

    /// Writes memory of the running process through the translation cache.
    pub fn write_virtual(&self, vaddr: VirtualAddress, buf: &[u8]) -> Result<(), VmError> {
        let mut state = self.state.lock();
        for (offset, &byte) in buf.iter().enumerate() {
            let paddr = state.translate(vaddr + offset, true)?;
            state.memory.write_byte(paddr, byte);
        }
        Ok(())
    }

    /// Returns a copy of a page table entry.
    pub fn page_table_entry(&self, pid: ProcessId, page: PageNumber) -> Option<PageTableEntry> {
        self.state
            .lock()
            .spaces
            .get(&pid)
            .and_then(|space| space.entry(page).copied())
    }

    /// Returns the number of pages in a process's address space.
    pub fn page_count(&self, pid: ProcessId) -> Option<usize> {
        self.state.lock().spaces.get(&pid).map(AddressSpace::page_count)
    }

    /// Returns true if the page has an image in the process's swap file.
    pub fn is_swapped(&self, pid: ProcessId, page: PageNumber) -> bool {
        self.state
            .lock()
            .spaces
            .get(&pid)
            .and_then(AddressSpace::swap)
            .is_some_and(|swap| swap.contains(page))
    }

    /// Returns the page held by a frame.
    pub fn frame_owner(&self, frame: FrameNumber) -> Option<FrameOwner> {
        self.state.lock().frames.owner(frame)
    }

    /// Returns a copy of a frame's contents.
    pub fn frame_contents(&self, frame: FrameNumber) -> Vec<u8> {
        self.state.lock().memory.frame(frame).to_vec()
    }

    /// Returns the number of free frames.
    pub fn free_frames(&self) -> usize {
        self.state.lock().frames.free_count()
    }

    /// Returns a snapshot of the paging counters.
    pub fn statistics(&self) -> Statistics {
        self.state.lock().stats
    }

    /// Destroys every remaining address space and returns the final counters.
    pub fn shutdown(self) -> Statistics {
        let mut state = self.state.into_inner();
        let pids: Vec<ProcessId> = state.spaces.keys().copied().collect();
        for pid in pids {
            if let Err(err) = state.destroy_address_space(pid) {
                log::warn!("cannot tear down process {pid}: {err}");
            }
        }
        log::info!("virtual memory shut down\n{}", state.stats);
        state.stats
    }
}

impl VmState {
    fn create_address_space(
        &mut self,
        executable: Box<dyn OpenFile>,
        pid: ProcessId,
    ) -> Result<(), VmError> {
        if self.spaces.contains_key(&pid) {
            return Err(VmError::ProcessExists(pid));
        }

        let executable = Executable::open(executable)?;
        let pages = AddressSpace::pages_needed(&executable);

        let space = if self.config.demand_loading {
            let swap = SwapStore::create(&*self.file_system, pid, pages)?;
            AddressSpace::new(pid, executable, Some(swap))
        } else {
            let available = self.frames.free_count();
            if available < pages {
                log::warn!("process {pid} needs {pages} frames, only {available} free");
                return Err(VmError::OutOfMemory {
                    needed: pages,
                    available,
                });
            }

            let mut space = AddressSpace::new(pid, executable, None);
            for page in (0..pages).map(PageNumber::new) {
                if let Err(err) = self.fill_new_frame(&mut space, page) {
                    self.release_frames(&space);
                    return Err(err);
                }
            }
            space
        };

        log::info!(
            "process {pid}: address space of {pages} pages ({} bytes)",
            space.size()
        );
        self.spaces.insert(pid, space);
        Ok(())
    }

    fn destroy_address_space(&mut self, pid: ProcessId) -> Result<(), VmError> {
        let mut space = self
            .spaces
            .remove(&pid)
            .ok_or(VmError::NoSuchProcess(pid))?;

        let cached: Vec<usize> = self.tlb.slots_of(pid).collect();
        for index in cached {
            self.tlb.invalidate(index);
        }

        self.release_frames(&space);
        if let Some(swap) = space.take_swap() {
            log::debug!(
                "process {pid}: dropping {} with {} pages",
                swap.name(),
                swap.page_count()
            );
            swap.remove(&*self.file_system);
        }
        if self.current == Some(pid) {
            self.current = None;
        }

        log::info!("process {pid}: address space destroyed");
        Ok(())
    }

    fn handle_translation_miss(&mut self, vaddr: VirtualAddress) -> Result<(), VmError> {
        let pid = self.current.ok_or(VmError::NoCurrentProcess)?;
        let page = PageNumber::from(vaddr);
        let space = self.spaces.get(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        if space.entry(page).is_none() {
            return Err(VmError::AddressError(vaddr));
        }
        if self.tlb.lookup(pid, page).is_some() {
            return Ok(());
        }
        self.stats.tlb_misses += 1;

        let entry = if self.config.demand_loading {
            self.load_page(pid, page)?
        } else {
            let entry = *self.spaces[&pid]
                .entry(page)
                .expect("page was bounds-checked above");
            assert!(
                entry.is_resident(),
                "eagerly loaded page {page} of process {pid} is not resident"
            );
            entry
        };

        let index = self.tlb.next_victim();
        if let Some(old) = self.tlb.invalidate(index) {
            self.write_back(old);
        }
        self.tlb.install(index, pid, page, &entry);
        log::trace!("tlb[{index}] <- process {pid} page {page}");
        Ok(())
    }

    fn load_page(&mut self, pid: ProcessId, page: PageNumber) -> Result<PageTableEntry, VmError> {
        let space = self.spaces.get(&pid).ok_or(VmError::NoSuchProcess(pid))?;
        let entry = space
            .entry(page)
            .ok_or_else(|| VmError::AddressError(page.saturating_start()))?;
        if entry.is_resident() {
            return Ok(*entry);
        }

        let frame = match self.frames.allocate() {
            Some(frame) => frame,
            None => self.evict()?,
        };

        let Self {
            spaces,
            memory,
            frames,
            stats,
            ..
        } = self;
        let space = spaces
            .get_mut(&pid)
            .expect("eviction never removes an address space");
        match map_page(memory, frames, space, page, frame) {
            Ok((entry, source)) => {
                stats.record_load(source);
                Ok(entry)
            }
            Err(err) => {
                frames.free(frame);
                Err(err)
            }
        }
    }

    /// Allocates and fills a frame for `page` of an address space that is not registered yet.
    fn fill_new_frame(&mut self, space: &mut AddressSpace, page: PageNumber) -> Result<(), VmError> {
        let frame = self
            .frames
            .allocate()
            .expect("free frames were counted before filling");
        match map_page(&mut self.memory, &mut self.frames, space, page, frame) {
            Ok((_, source)) => {
                self.stats.record_load(source);
                Ok(())
            }
            Err(err) => {
                self.frames.free(frame);
                Err(err)
            }
        }
    }

    /// Takes a frame away from its owner and hands it out again.
    fn evict(&mut self) -> Result<FrameNumber, VmError> {
        let Self {
            frames,
            tlb,
            spaces,
            ..
        } = self;
        let victim = frames.select_victim(&mut |frame, owner| {
            let cached = tlb.test_and_clear_referenced(frame);
            let entry = spaces
                .get_mut(&owner.pid)
                .and_then(|space| space.entry_mut(owner.page))
                .unwrap_or_else(|| panic!("frame {frame} owned by unknown page {owner:?}"));
            let mapped = entry.flags().is_referenced();
            entry.flags_mut().set_referenced(false);
            cached || mapped
        });
        let owner = self
            .frames
            .owner(victim)
            .unwrap_or_else(|| panic!("frame {victim} selected for eviction has no owner"));

        // Reference state held in the cache must reach the page table before the frame's
        // contents are written out.
        let cached: Vec<usize> = self.tlb.slots_mapping(victim).collect();
        for index in cached {
            if let Some(slot) = self.tlb.invalidate(index) {
                self.write_back(slot);
            }
        }

        let skip_clean = self.config.skip_clean_writeback;
        let space = self
            .spaces
            .get_mut(&owner.pid)
            .unwrap_or_else(|| panic!("frame {victim} owned by unknown process {}", owner.pid));
        let entry = *space
            .entry(owner.page)
            .unwrap_or_else(|| panic!("frame {victim} owned by unknown page {owner:?}"));
        assert_eq!(
            entry.frame(),
            Some(victim),
            "core map and page table disagree about frame {victim}"
        );

        let swap = space.swap_mut().unwrap_or_else(|| {
            panic!("process {} has no swap file to evict into", owner.pid)
        });
        if skip_clean && !entry.flags().is_modified() && swap.contains(owner.page) {
            self.stats.clean_evictions += 1;
            log::debug!(
                "evict frame {victim}: process {} page {} is clean",
                owner.pid,
                owner.page
            );
        } else {
            swap.write_page(owner.page, self.memory.frame(victim))?;
            self.stats.swap_outs += 1;
            log::debug!(
                "evict frame {victim}: process {} page {} written to {}",
                owner.pid,
                owner.page,
                swap.name()
            );
        }

        if let Some(entry) = space.entry_mut(owner.page) {
            entry.unmap();
        }
        self.frames.free(victim);
        self.stats.evictions += 1;

        Ok(self
            .frames
            .allocate()
            .expect("a frame was freed by eviction"))
    }

    /// Translates an address of the running process, refilling the cache on a miss.
    fn translate(&mut self, vaddr: VirtualAddress, write: bool) -> Result<PhysicalAddress, VmError> {
        let pid = self.current.ok_or(VmError::NoCurrentProcess)?;
        let page = PageNumber::from(vaddr);

        let index = match self.tlb.lookup(pid, page) {
            Some(index) => {
                self.stats.tlb_hits += 1;
                index
            }
            None => {
                self.handle_translation_miss(vaddr)?;
                self.tlb
                    .lookup(pid, page)
                    .expect("fault handler installed the translation")
            }
        };

        let slot = *self.tlb.slot(index);
        if write && slot.read_only {
            return Err(VmError::ReadOnly(vaddr));
        }
        self.tlb.touch(index, write);
        Ok(slot.frame.start() + vaddr.page_offset())
    }

    /// Copies a cache slot's reference state back to the entry it was loaded from.
    fn write_back(&mut self, slot: TlbSlot) {
        let entry = self
            .spaces
            .get_mut(&slot.pid)
            .and_then(|space| space.entry_mut(slot.page));
        match entry {
            Some(entry) if entry.frame() == Some(slot.frame) => slot.write_back(entry),
            _ => log::trace!(
                "dropping stale translation for process {} page {}",
                slot.pid,
                slot.page
            ),
        }
    }

    fn flush_tlb(&mut self) {
        for index in 0..self.tlb.capacity() {
            if let Some(slot) = self.tlb.invalidate(index) {
                self.write_back(slot);
            }
        }
    }

    fn release_frames(&mut self, space: &AddressSpace) {
        for (_, frame) in space.page_table().resident() {
            self.frames.free(frame);
        }
    }
}

/// Zeroes `frame`, fills it with `page` and maps it.
fn map_page(
    memory: &mut PhysicalMemory,
    frames: &mut FrameTable,
    space: &mut AddressSpace,
    page: PageNumber,
    frame: FrameNumber,
) -> Result<(PageTableEntry, PageSource), VmError> {
    memory.zero_frame(frame);
    let source = space.populate(page, memory.frame_mut(frame))?;

    let pid = space.pid();
    let entry = space
        .entry_mut(page)
        .expect("page was bounds-checked by the caller");
    let read_only = match source {
        // A restored page keeps the protection it had when it was evicted.
        PageSource::Swap => entry.flags().is_read_only(),
        PageSource::Image { read_only } => read_only,
    };
    entry.map(frame, read_only);
    frames.set_owner(frame, FrameOwner::new(pid, page));

    log::debug!("process {pid}: page {page} -> frame {frame}");
    Ok((*entry, source))
}
