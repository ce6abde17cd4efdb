//! Virtual-memory backends.
//!
//! [`VirtualArray`](crate::VirtualArray) depends only on the [`Backend`]
//! operations below. The variant is picked at build time:
//!
//! - **Unix** (`ImplicitCommit`): the reservation is mapped
//!   read/write up front and the kernel backs each page on first touch.
//! - **Windows** (`ExplicitCommit`): the reservation is
//!   `PAGE_NOACCESS`; the first write to an uncommitted page raises an
//!   access violation which a vectored exception handler turns into a
//!   commit before resuming the faulting instruction.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::ImplicitCommit as Platform;
#[cfg(windows)]
pub(crate) use windows::ExplicitCommit as Platform;

/// How the platform backs reserved pages with physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStrategy {
    /// Pages are committed by demand paging on first touch.
    Implicit,
    /// Pages are committed by a fault handler on first write.
    OnFault,
}

impl CommitStrategy {
    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implicit => "implicit",
            Self::OnFault => "on-fault",
        }
    }
}

impl std::fmt::Display for CommitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit strategy of the backend compiled for this target.
#[must_use]
pub fn strategy() -> CommitStrategy {
    <Platform as Backend>::STRATEGY
}

/// OS page size in bytes, the granularity of commit and residency.
#[must_use]
pub fn page_size() -> usize {
    <Platform as Backend>::page_size()
}

/// A byte range `[start, start + len)` in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) struct Region {
    pub(crate) start: usize,
    pub(crate) len: usize,
}

#[cfg_attr(not(windows), allow(dead_code))]
impl Region {
    pub(crate) fn new(start: *const u8, len: usize) -> Self {
        Self {
            start: start as usize,
            len,
        }
    }

    pub(crate) fn end(self) -> usize {
        self.start + self.len
    }

    pub(crate) fn contains(self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Page-aligned region covering `addr`.
    pub(crate) fn page_of(addr: usize, page_size: usize) -> Self {
        Self {
            start: addr - addr % page_size,
            len: page_size,
        }
    }
}

/// What the fault handler does with an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) enum FaultAction {
    /// Not ours: let the next handler, and finally the OS, see it.
    Search,
    /// Commit this region and resume the faulting store.
    Commit(Region),
}

/// Decide the fate of a fault at `addr`.
///
/// `armed` is the `(owned, slot)` pair of the push running on the faulting
/// thread, if any. Only an access violation inside `owned` is absorbed; a
/// hit inside `slot` commits the whole slot, anything else in `owned`
/// commits the page containing `addr`.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn classify_fault(
    armed: Option<(Region, Region)>,
    is_access_violation: bool,
    addr: usize,
    page_size: usize,
) -> FaultAction {
    let Some((owned, slot)) = armed else {
        return FaultAction::Search;
    };
    if !is_access_violation || !owned.contains(addr) {
        return FaultAction::Search;
    }
    if slot.contains(addr) {
        FaultAction::Commit(slot)
    } else {
        FaultAction::Commit(Region::page_of(addr, page_size))
    }
}

/// The operating-system virtual-memory primitives the array consumes.
///
/// # Safety
///
/// Every `unsafe fn` takes a range previously returned by
/// [`reserve`](Backend::reserve) (or a sub-range of one) that has not yet
/// been released.
pub(crate) trait Backend {
    /// Commit strategy of this backend.
    const STRATEGY: CommitStrategy;

    /// OS page size in bytes.
    fn page_size() -> usize;

    /// Reserve `len` contiguous bytes of address space without committing
    /// physical memory.
    fn reserve(len: usize) -> io::Result<NonNull<u8>>;

    /// Return the whole reservation to the OS.
    unsafe fn release(base: NonNull<u8>, len: usize) -> io::Result<()>;

    /// Drop the physical backing of the reservation, keeping the address
    /// range reserved at the same base.
    unsafe fn discard(base: NonNull<u8>, len: usize) -> io::Result<()>;

    /// Back `region` with physical memory and grant read/write access.
    #[cfg_attr(not(windows), allow(dead_code))]
    unsafe fn commit(region: Region) -> io::Result<()>;

    /// Bytes of the reservation currently backed by physical memory.
    unsafe fn resident_bytes(base: NonNull<u8>, len: usize) -> io::Result<usize>;

    /// Run `write`, which stores one element into `slot`, with first-touch
    /// faults inside `owned` committed transparently.
    unsafe fn construct<R>(owned: Region, slot: Region, write: impl FnOnce() -> R) -> R;
}
