use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, MemError>;

/// Failures surfaced by memory operations. All of these are returned to the
/// caller as values; none of them terminates the owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// The requested virtual area does not exist.
    #[error("no virtual area with the requested id")]
    InvalidAreaId,
    /// The region id falls outside the symbol table.
    #[error("region id outside the symbol table")]
    InvalidRegionId,
    /// The symbol-table slot holds no allocated region.
    #[error("region is not allocated")]
    RegionNotAllocated,
    /// No free extent can satisfy the request, even after growing the break.
    #[error("no free region large enough for the request")]
    NoFreeRegion,
    /// The privileged channel refused to extend the area break.
    #[error("break extension failed")]
    BreakExtensionFailed,
    /// A frame is needed but no resident page is available for eviction.
    #[error("no victim page available for eviction")]
    VictimSelectionFailed,
    /// A page's swap slot aliases the frame chosen for it.
    #[error("frame aliases its swap target")]
    FrameAliasingError,
    /// A physical store has no free frames left.
    #[error("physical memory exhausted")]
    PhysicalMemoryExhausted,
    /// An address fell outside a bounded store or page table.
    #[error("address outside the mapped range")]
    AddressOutOfRange,
    /// The process id is not registered with the manager.
    #[error("unknown process")]
    UnknownProcess,
    /// The process id is already registered with the manager.
    #[error("process already registered")]
    DuplicateProcess,
}
