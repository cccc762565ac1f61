use log::debug;

use crate::channel::MappingChannel;
use crate::error::{MemError, Result};
use crate::process::{Extent, ProcessMemory, Region, VirtualArea};

/// Round `size` up to a whole number of pages.
fn page_align(size: usize, page_size: usize) -> usize {
    size.div_ceil(page_size) * page_size
}

/// First-fit scan of the area's free list. Shrinks the winning extent in
/// place, unlinking it when exactly consumed, and returns the start of the
/// carved-out space.
fn take_free_extent(area: &mut VirtualArea, size: usize) -> Option<usize> {
    let idx = area.free.iter().position(|rg| rg.len() >= size)?;
    let start = area.free[idx].start;
    area.free[idx].start += size;
    if area.free[idx].is_empty() {
        area.free.remove(idx);
    }
    Some(start)
}

/// Allocate `size` bytes in `area_id` and bind the result to symbol-table
/// slot `region_id`. Returns the region's start address.
///
/// When no free extent fits, the break is grown by a page-aligned increment
/// through the privileged channel and the scan retried exactly once. The
/// extension is sized to fit, so a second miss means the free list is in an
/// unexpected shape and surfaces as `NoFreeRegion`; the advanced break is
/// not rolled back.
pub fn allocate(
    mm: &mut ProcessMemory,
    area_id: usize,
    region_id: usize,
    size: usize,
    page_size: usize,
    channel: &mut impl MappingChannel,
) -> Result<usize> {
    if region_id >= mm.symbols.len() {
        return Err(MemError::InvalidRegionId);
    }
    if size == 0 {
        return Err(MemError::NoFreeRegion);
    }
    let area = mm.area_mut(area_id).ok_or(MemError::InvalidAreaId)?;

    if let Some(start) = take_free_extent(area, size) {
        mm.symbols[region_id] = Some(Region {
            area_id,
            extent: Extent::new(start, start + size),
        });
        return Ok(start);
    }

    let increment = page_align(size, page_size);
    let old_brk = area.brk;
    channel.extend_break(area_id, old_brk, increment)?;
    area.brk = old_brk + increment;
    area.free.insert(0, Extent::new(old_brk, old_brk + increment));
    debug!("area {area_id}: break grown {old_brk:#x} -> {:#x}", area.brk);

    let start = take_free_extent(area, size).ok_or(MemError::NoFreeRegion)?;
    mm.symbols[region_id] = Some(Region {
        area_id,
        extent: Extent::new(start, start + size),
    });
    Ok(start)
}

/// Unbind `region_id` and push its extent back at the head of the owning
/// area's free list. Most-recently-freed space is reused first; adjacent
/// extents are not merged.
pub fn deallocate(mm: &mut ProcessMemory, region_id: usize) -> Result<()> {
    if region_id >= mm.symbols.len() {
        return Err(MemError::InvalidRegionId);
    }
    let region = mm.symbols[region_id].take().ok_or(MemError::RegionNotAllocated)?;
    let area = mm.area_mut(region.area_id).ok_or(MemError::InvalidAreaId)?;
    area.free.insert(0, region.extent);
    Ok(())
}

/// Resolve a symbol-table slot for byte access.
pub fn lookup(mm: &ProcessMemory, region_id: usize) -> Result<Region> {
    if region_id >= mm.symbols.len() {
        return Err(MemError::InvalidRegionId);
    }
    mm.symbols[region_id].ok_or(MemError::RegionNotAllocated)
}
