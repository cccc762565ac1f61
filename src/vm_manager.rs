use std::collections::BTreeMap;
use std::fmt::Write as _;

use log::debug;
use parking_lot::Mutex;

use crate::channel::MemphyChannel;
use crate::constants;
use crate::error::{MemError, Result};
use crate::physical::{AccessMode, PhysicalMemory};
use crate::process::{ProcessMemory, Pte};
use crate::region;
use crate::translation;

/// Dimensions of one simulated machine. Constructed explicitly so several
/// independent managers can coexist in one test process.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub page_size: usize,
    pub ram_bytes: usize,
    pub swap_bytes: usize,
    pub max_regions: usize,
    pub max_pages: usize,
    pub initial_break: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            page_size: constants::PAGE_SIZE,
            ram_bytes: constants::RAM_BYTES,
            swap_bytes: constants::SWAP_BYTES,
            max_regions: constants::MAX_REGIONS,
            max_pages: constants::MAX_PAGES,
            initial_break: constants::INITIAL_BREAK,
        }
    }
}

impl VmConfig {
    fn page_bits(&self) -> u32 {
        self.page_size.trailing_zeros()
    }

    /// Ceiling for any area's break: the span the page table can map.
    fn area_limit(&self) -> usize {
        self.max_pages * self.page_size
    }
}

struct ProcessEntry {
    mm: ProcessMemory,
    swap: PhysicalMemory,
}

struct ManagerInner {
    ram: PhysicalMemory,
    procs: BTreeMap<u32, ProcessEntry>,
}

/// The memory manager: one shared RAM store, one swap store per registered
/// process, and the descriptors in between.
///
/// A single exclusive lock serializes every operation across all processes
/// and is held for the operation's full duration, privileged-channel round
/// trips included. A long swap therefore blocks unrelated processes; that
/// total serialization is the concurrency contract, and free lists, extents
/// and page tables are only ever touched under it.
pub struct VmManager {
    config: VmConfig,
    inner: Mutex<ManagerInner>,
}

impl VmManager {
    /// Build a manager for the given machine dimensions.
    ///
    /// # Panics
    ///
    /// Panics if the page size is not a power of two or the store sizes are
    /// not whole numbers of pages.
    pub fn new(config: VmConfig) -> Self {
        assert!(config.page_size.is_power_of_two(), "page size must be a power of two");
        assert!(
            config.ram_bytes > 0 && config.ram_bytes % config.page_size == 0,
            "RAM size must be a whole number of pages"
        );
        assert!(
            config.swap_bytes > 0 && config.swap_bytes % config.page_size == 0,
            "swap size must be a whole number of pages"
        );
        let ram = PhysicalMemory::new(config.ram_bytes, config.page_size, AccessMode::Random);
        VmManager {
            config,
            inner: Mutex::new(ManagerInner { ram, procs: BTreeMap::new() }),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Register a freshly loaded process: a descriptor with area 0 at the
    /// configured initial break, and its own backing store.
    pub fn register_process(&self, pid: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.procs.contains_key(&pid) {
            return Err(MemError::DuplicateProcess);
        }
        let entry = ProcessEntry {
            mm: ProcessMemory::new(
                self.config.max_pages,
                self.config.max_regions,
                self.config.initial_break,
            ),
            swap: PhysicalMemory::new(
                self.config.swap_bytes,
                self.config.page_size,
                AccessMode::Sequential,
            ),
        };
        inner.procs.insert(pid, entry);
        debug!("pid {pid}: registered");
        Ok(())
    }

    /// Run `op` against one process under the manager-wide lock, with the
    /// privileged channel assembled over the shared RAM and the process's
    /// swap store.
    fn with_process<R>(
        &self,
        pid: u32,
        op: impl FnOnce(&mut ProcessMemory, &mut MemphyChannel<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner.procs.get_mut(&pid).ok_or(MemError::UnknownProcess)?;
        let mut channel = MemphyChannel {
            ram: &mut inner.ram,
            swap: &mut entry.swap,
            area_limit: self.config.area_limit(),
        };
        op(&mut entry.mm, &mut channel)
    }

    /// Allocate `size` bytes in the process's area `area_id` and bind the
    /// result to `region_id`. Returns the region's start address.
    pub fn allocate(&self, pid: u32, area_id: usize, region_id: usize, size: usize) -> Result<usize> {
        let page_size = self.config.page_size;
        let addr = self.with_process(pid, |mm, ch| {
            region::allocate(mm, area_id, region_id, size, page_size, ch)
        })?;
        debug!("pid {pid}: region {region_id} = [{addr:#x}, {:#x})", addr + size);
        Ok(addr)
    }

    /// Free the named region, recycling its extent.
    pub fn deallocate(&self, pid: u32, region_id: usize) -> Result<()> {
        self.with_process(pid, |mm, _| region::deallocate(mm, region_id))?;
        debug!("pid {pid}: region {region_id} freed");
        Ok(())
    }

    /// Read one byte at `offset` into the named region.
    pub fn read_byte(&self, pid: u32, region_id: usize, offset: usize) -> Result<u8> {
        let page_bits = self.config.page_bits();
        self.with_process(pid, |mm, ch| {
            let region = region::lookup(mm, region_id)?;
            translation::read_value(mm, region.extent.start + offset, page_bits, ch)
        })
    }

    /// Write one byte at `offset` into the named region.
    pub fn write_byte(&self, pid: u32, region_id: usize, offset: usize, value: u8) -> Result<()> {
        let page_bits = self.config.page_bits();
        self.with_process(pid, |mm, ch| {
            let region = region::lookup(mm, region_id)?;
            translation::write_value(mm, region.extent.start + offset, value, page_bits, ch)
        })
    }

    /// Tear a process down: every resident frame goes back to the RAM free
    /// list, every swapped slot to the process's backing store, and the
    /// descriptor is dropped.
    pub fn release_all(&self, pid: u32) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut entry = inner.procs.remove(&pid).ok_or(MemError::UnknownProcess)?;
        for pte in &entry.mm.page_table {
            match *pte {
                Pte::Resident(frame) => inner.ram.put_free_frame(frame),
                Pte::Swapped(slot) => entry.swap.put_free_frame(slot),
                Pte::Unmapped => {}
            }
        }
        debug!("pid {pid}: released");
        Ok(())
    }

    /// Human-readable listing of every mapped page-table entry.
    pub fn dump_page_table(&self, pid: u32) -> Result<String> {
        let guard = self.inner.lock();
        let entry = guard.procs.get(&pid).ok_or(MemError::UnknownProcess)?;
        let mut out = String::new();
        for (pgn, pte) in entry.mm.page_table.iter().enumerate() {
            match pte {
                Pte::Unmapped => {}
                Pte::Resident(frame) => {
                    let _ = writeln!(out, "page {pgn:04} -> frame {frame:04}");
                }
                Pte::Swapped(slot) => {
                    let _ = writeln!(out, "page {pgn:04} -> swap {slot:04}");
                }
            }
        }
        Ok(out)
    }

    /// Human-readable listing of every non-zero RAM byte.
    pub fn dump_physical(&self) -> String {
        let guard = self.inner.lock();
        let mut out = String::new();
        for (addr, byte) in guard.ram.dump() {
            let _ = writeln!(out, "{addr:08x}: {byte}");
        }
        out
    }

    /// Free frames left in the shared RAM store.
    pub fn free_ram_frames(&self) -> usize {
        self.inner.lock().ram.free_frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Extent;

    /// A tiny machine: 2 RAM frames of 256 bytes, plenty of swap.
    fn tiny() -> VmManager {
        VmManager::new(VmConfig {
            page_size: 256,
            ram_bytes: 2 * 256,
            swap_bytes: 16 * 256,
            max_regions: 8,
            max_pages: 16,
            initial_break: 4 * 256,
        })
    }

    #[test]
    fn test_register_and_duplicate() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        assert_eq!(vm.register_process(1), Err(MemError::DuplicateProcess));
        assert_eq!(vm.allocate(2, 0, 0, 16), Err(MemError::UnknownProcess));
    }

    #[test]
    fn test_write_read_round_trip() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        vm.allocate(1, 0, 0, 300).unwrap();
        vm.write_byte(1, 0, 20, 42).unwrap();
        assert_eq!(vm.read_byte(1, 0, 20).unwrap(), 42);
    }

    #[test]
    fn test_round_trip_survives_eviction() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        // One region spanning three pages on a two-frame machine.
        vm.allocate(1, 0, 0, 3 * 256).unwrap();
        vm.write_byte(1, 0, 5, 0xAA).unwrap();
        vm.write_byte(1, 0, 256, 0xBB).unwrap();
        vm.write_byte(1, 0, 512, 0xCC).unwrap();
        // Page 0 has been swapped out by now; reading it swaps it back.
        assert_eq!(vm.read_byte(1, 0, 5).unwrap(), 0xAA);
        assert_eq!(vm.read_byte(1, 0, 256).unwrap(), 0xBB);
        assert_eq!(vm.read_byte(1, 0, 512).unwrap(), 0xCC);
    }

    #[test]
    fn test_eviction_is_fifo_across_byte_access() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        vm.allocate(1, 0, 0, 3 * 256).unwrap();
        vm.write_byte(1, 0, 0, 1).unwrap();
        vm.write_byte(1, 0, 256, 2).unwrap();
        // Heavy re-use of page 0 must not save it.
        for _ in 0..4 {
            vm.read_byte(1, 0, 0).unwrap();
        }
        vm.write_byte(1, 0, 512, 3).unwrap();
        let table = vm.dump_page_table(1).unwrap();
        assert!(table.contains("page 0000 -> swap"));
        assert!(table.contains("page 0001 -> frame"));
        assert!(table.contains("page 0002 -> frame"));
    }

    #[test]
    fn test_allocation_failure_leaves_state_unchanged() {
        let vm = VmManager::new(VmConfig {
            page_size: 256,
            ram_bytes: 2 * 256,
            swap_bytes: 4 * 256,
            max_regions: 8,
            max_pages: 4, // 1 KiB of address space
            initial_break: 2 * 256,
        });
        vm.register_process(1).unwrap();
        vm.allocate(1, 0, 0, 512).unwrap();
        vm.write_byte(1, 0, 0, 7).unwrap();

        // Both the free extents and the break ceiling are exhausted.
        let err = vm.allocate(1, 0, 1, 1024).unwrap_err();
        assert_eq!(err, MemError::PhysicalMemoryExhausted);

        let guard = vm.inner.lock();
        let entry = guard.procs.get(&1).unwrap();
        assert_eq!(entry.mm.symbols[0].unwrap().extent, Extent::new(0, 512));
        assert!(entry.mm.symbols[1].is_none());
        assert_eq!(entry.mm.area(0).unwrap().brk, 512);
        assert_eq!(entry.mm.page_table[0], Pte::Resident(0));
    }

    #[test]
    fn test_release_all_returns_every_frame() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        vm.allocate(1, 0, 0, 4 * 256).unwrap();
        for page in 0..4 {
            vm.write_byte(1, 0, page * 256, page as u8 + 1).unwrap();
        }
        assert_eq!(vm.free_ram_frames(), 0);
        vm.release_all(1).unwrap();
        assert_eq!(vm.free_ram_frames(), 2);
        assert_eq!(vm.read_byte(1, 0, 0), Err(MemError::UnknownProcess));
    }

    #[test]
    fn test_two_processes_share_ram() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        vm.register_process(2).unwrap();
        vm.allocate(1, 0, 0, 512).unwrap();
        vm.allocate(2, 0, 0, 512).unwrap();
        vm.write_byte(1, 0, 0, 11).unwrap();
        vm.write_byte(2, 0, 0, 22).unwrap();
        assert_eq!(vm.free_ram_frames(), 0);
        // RAM is full of one page from each process. Touching a second page
        // of process 1 evicts process 1's own oldest page into its own swap
        // store; process 2's page stays resident and intact.
        vm.write_byte(1, 0, 256, 33).unwrap();
        assert_eq!(vm.read_byte(2, 0, 0).unwrap(), 22);
        assert_eq!(vm.read_byte(1, 0, 256).unwrap(), 33);
        let table = vm.dump_page_table(1).unwrap();
        assert!(table.contains("page 0000 -> swap"));
    }

    #[test]
    fn test_dump_physical_lists_written_bytes() {
        let vm = tiny();
        vm.register_process(1).unwrap();
        vm.allocate(1, 0, 0, 16).unwrap();
        vm.write_byte(1, 0, 3, 99).unwrap();
        let dump = vm.dump_physical();
        assert!(dump.contains("00000003: 99"));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_unaligned_page_size() {
        VmManager::new(VmConfig { page_size: 100, ..VmConfig::default() });
    }
}
