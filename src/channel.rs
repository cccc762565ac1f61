use crate::error::{MemError, Result};
use crate::physical::PhysicalMemory;

/// Which physical store a frame operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStore {
    Ram,
    Swap,
}

/// A frame in one of the two stores, named by frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRef {
    Ram(usize),
    Swap(usize),
}

/// The privileged memory-mapping channel.
///
/// Region allocation and fault handling never touch physical storage
/// directly; every frame movement, byte IO, break extension and free-frame
/// lease goes through this interface. A failure aborts the in-progress
/// operation and is never retried, with the single exception of the
/// break-extension retry performed by the allocator.
pub trait MappingChannel {
    /// Ask to grow an area's break by `increment` bytes. `old_break` is the
    /// caller's current break pointer.
    fn extend_break(&mut self, area_id: usize, old_break: usize, increment: usize) -> Result<()>;

    /// Copy one page worth of bytes from `src` to `dst`.
    fn swap_frames(&mut self, src: FrameRef, dst: FrameRef) -> Result<()>;

    /// Read one byte at a RAM physical address.
    fn io_read(&mut self, addr: usize) -> Result<u8>;

    /// Write one byte at a RAM physical address.
    fn io_write(&mut self, addr: usize, value: u8) -> Result<()>;

    /// Lease a free frame from the given store.
    fn get_free_frame(&mut self, store: FrameStore) -> Result<usize>;

    /// Return a frame to the given store's free list.
    fn put_free_frame(&mut self, store: FrameStore, frame: usize);
}

/// Production channel: the shared RAM store plus the calling process's swap
/// store, borrowed for the duration of one operation.
pub struct MemphyChannel<'a> {
    pub ram: &'a mut PhysicalMemory,
    pub swap: &'a mut PhysicalMemory,
    /// Upper bound on any area's break, in bytes.
    pub area_limit: usize,
}

impl MemphyChannel<'_> {
    fn copy_byte(&mut self, src: FrameRef, dst: FrameRef, offset: usize) -> Result<()> {
        let page = self.ram.page_size();
        let byte = match src {
            FrameRef::Ram(f) => self.ram.read(f * page + offset)?,
            FrameRef::Swap(f) => self.swap.read(f * page + offset)?,
        };
        match dst {
            FrameRef::Ram(f) => self.ram.write(f * page + offset, byte),
            FrameRef::Swap(f) => self.swap.write(f * page + offset, byte),
        }
    }
}

impl MappingChannel for MemphyChannel<'_> {
    fn extend_break(&mut self, _area_id: usize, old_break: usize, increment: usize) -> Result<()> {
        let page = self.ram.page_size();
        if increment == 0 || increment % page != 0 {
            return Err(MemError::BreakExtensionFailed);
        }
        if old_break + increment > self.area_limit {
            return Err(MemError::PhysicalMemoryExhausted);
        }
        Ok(())
    }

    fn swap_frames(&mut self, src: FrameRef, dst: FrameRef) -> Result<()> {
        for offset in 0..self.ram.page_size() {
            self.copy_byte(src, dst, offset)?;
        }
        Ok(())
    }

    fn io_read(&mut self, addr: usize) -> Result<u8> {
        self.ram.read(addr)
    }

    fn io_write(&mut self, addr: usize, value: u8) -> Result<()> {
        self.ram.write(addr, value)
    }

    fn get_free_frame(&mut self, store: FrameStore) -> Result<usize> {
        match store {
            FrameStore::Ram => self.ram.get_free_frame(),
            FrameStore::Swap => self.swap.get_free_frame(),
        }
    }

    fn put_free_frame(&mut self, store: FrameStore, frame: usize) {
        match store {
            FrameStore::Ram => self.ram.put_free_frame(frame),
            FrameStore::Swap => self.swap.put_free_frame(frame),
        }
    }
}
