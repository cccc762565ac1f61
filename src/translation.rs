use log::debug;

use crate::channel::{FrameRef, FrameStore, MappingChannel};
use crate::error::{MemError, Result};
use crate::process::{ProcessMemory, Pte};

/// A virtual address split into its page number and in-page offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub addr: usize,
    pub pgn: usize,
    pub offset: usize,
}

impl VirtualAddress {
    pub fn decompose(addr: usize, page_bits: u32) -> Self {
        VirtualAddress {
            addr,
            pgn: addr >> page_bits,
            offset: addr & ((1 << page_bits) - 1),
        }
    }
}

impl std::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VA({:#x}) = (pgn={}, offset={})", self.addr, self.pgn, self.offset)
    }
}

/// Make page `pgn` resident and return its frame number.
///
/// A resident page is returned as-is. Otherwise a frame is found: a free RAM
/// frame when one exists, or the frame of the oldest-resident page after
/// swapping that victim out. Victim order is strict FIFO; re-touching a
/// resident page does not protect it from eviction.
pub fn resolve_page(
    mm: &mut ProcessMemory,
    pgn: usize,
    channel: &mut impl MappingChannel,
) -> Result<usize> {
    if pgn >= mm.page_table.len() {
        return Err(MemError::AddressOutOfRange);
    }
    match mm.page_table[pgn] {
        Pte::Resident(frame) => Ok(frame),
        pte => fault_in(mm, pgn, pte, channel),
    }
}

fn fault_in(
    mm: &mut ProcessMemory,
    pgn: usize,
    pte: Pte,
    channel: &mut impl MappingChannel,
) -> Result<usize> {
    if let Ok(frame) = channel.get_free_frame(FrameStore::Ram) {
        if let Pte::Swapped(slot) = pte {
            if let Err(err) = channel.swap_frames(FrameRef::Swap(slot), FrameRef::Ram(frame)) {
                channel.put_free_frame(FrameStore::Ram, frame);
                return Err(err);
            }
            channel.put_free_frame(FrameStore::Swap, slot);
        }
        mm.page_table[pgn] = Pte::Resident(frame);
        mm.fifo.push_front(pgn);
        return Ok(frame);
    }

    // RAM is full: the oldest-resident page gives up its frame.
    let victim = mm.fifo.pop_back().ok_or(MemError::VictimSelectionFailed)?;
    match swap_cycle(mm, pgn, pte, victim, channel) {
        Ok(frame) => {
            debug!("page {pgn} faulted in over victim {victim} (frame {frame})");
            Ok(frame)
        }
        Err(err) => {
            // The fault aborted with nothing committed; the victim is still
            // resident and must keep its place in the residency order.
            mm.fifo.push_back(victim);
            Err(err)
        }
    }
}

fn swap_cycle(
    mm: &mut ProcessMemory,
    pgn: usize,
    pte: Pte,
    victim: usize,
    channel: &mut impl MappingChannel,
) -> Result<usize> {
    let vic_frame = match mm.page_table[victim] {
        Pte::Resident(frame) => frame,
        // The FIFO only ever holds resident pages.
        _ => return Err(MemError::VictimSelectionFailed),
    };

    let slot = channel.get_free_frame(FrameStore::Swap)?;

    if let Pte::Swapped(target) = pte {
        if target == vic_frame || target == slot {
            channel.put_free_frame(FrameStore::Swap, slot);
            return Err(MemError::FrameAliasingError);
        }
    }

    if let Err(err) = channel.swap_frames(FrameRef::Ram(vic_frame), FrameRef::Swap(slot)) {
        channel.put_free_frame(FrameStore::Swap, slot);
        return Err(err);
    }
    if let Pte::Swapped(target) = pte {
        if let Err(err) = channel.swap_frames(FrameRef::Swap(target), FrameRef::Ram(vic_frame)) {
            channel.put_free_frame(FrameStore::Swap, slot);
            return Err(err);
        }
    }

    mm.page_table[victim] = Pte::Swapped(slot);
    mm.page_table[pgn] = Pte::Resident(vic_frame);
    mm.fifo.push_front(pgn);
    if let Pte::Swapped(target) = pte {
        channel.put_free_frame(FrameStore::Swap, target);
    }
    Ok(vic_frame)
}

/// Read one byte at a virtual address, faulting the page in if needed.
pub fn read_value(
    mm: &mut ProcessMemory,
    addr: usize,
    page_bits: u32,
    channel: &mut impl MappingChannel,
) -> Result<u8> {
    let va = VirtualAddress::decompose(addr, page_bits);
    let frame = resolve_page(mm, va.pgn, channel)?;
    channel.io_read((frame << page_bits) + va.offset)
}

/// Write one byte at a virtual address, faulting the page in if needed.
pub fn write_value(
    mm: &mut ProcessMemory,
    addr: usize,
    value: u8,
    page_bits: u32,
    channel: &mut impl MappingChannel,
) -> Result<()> {
    let va = VirtualAddress::decompose(addr, page_bits);
    let frame = resolve_page(mm, va.pgn, channel)?;
    channel.io_write((frame << page_bits) + va.offset, value)
}
