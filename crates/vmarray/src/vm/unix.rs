//! Implicit-commit backend built on `mmap`.
//!
//! The reservation is a private anonymous read/write mapping. Untouched
//! pages cost no physical memory; the kernel zero-fills each one on first
//! touch. Discarding remaps the range with `MAP_FIXED`, atomically swapping
//! fresh untouched pages in at the same address.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use super::{Backend, CommitStrategy, Region};

/// Pages queried per `mincore` call.
const MINCORE_CHUNK_PAGES: usize = 4096;

/// Demand-paged `mmap` reservations.
pub(crate) struct ImplicitCommit;

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_NORESERVE: libc::c_int = libc::MAP_NORESERVE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_NORESERVE: libc::c_int = 0;

fn map_anonymous(hint: *mut libc::c_void, len: usize, fixed: bool) -> io::Result<NonNull<u8>> {
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_NORESERVE;
    if fixed {
        flags |= libc::MAP_FIXED;
    }
    // SAFETY: anonymous mapping; with MAP_FIXED the caller owns `hint..hint+len`.
    let addr = unsafe {
        libc::mmap(
            hint,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    disable_huge_pages(addr, len);
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// Keep commit granularity at the base page size.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn disable_huge_pages(addr: *mut libc::c_void, len: usize) {
    // SAFETY: advisory only, over a mapping we just created.
    let rc = unsafe { libc::madvise(addr, len, libc::MADV_NOHUGEPAGE) };
    if rc != 0 {
        tracing::debug!(
            error = %io::Error::last_os_error(),
            "MADV_NOHUGEPAGE rejected, continuing"
        );
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn disable_huge_pages(_addr: *mut libc::c_void, _len: usize) {}

impl Backend for ImplicitCommit {
    const STRATEGY: CommitStrategy = CommitStrategy::Implicit;

    fn page_size() -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
        *PAGE_SIZE.get_or_init(|| {
            // SAFETY: sysconf has no preconditions.
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
        })
    }

    fn reserve(len: usize) -> io::Result<NonNull<u8>> {
        map_anonymous(ptr::null_mut(), len, false)
    }

    unsafe fn release(base: NonNull<u8>, len: usize) -> io::Result<()> {
        // SAFETY: caller guarantees `base..base+len` is a live reservation.
        if unsafe { libc::munmap(base.as_ptr().cast(), len) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn discard(base: NonNull<u8>, len: usize) -> io::Result<()> {
        let remapped = map_anonymous(base.as_ptr().cast(), len, true)?;
        if remapped != base {
            return Err(io::Error::other(format!(
                "remap moved reservation from {:p} to {:p}",
                base.as_ptr(),
                remapped.as_ptr()
            )));
        }
        Ok(())
    }

    unsafe fn commit(_region: Region) -> io::Result<()> {
        // Read/write from reservation; the kernel commits on first touch.
        Ok(())
    }

    unsafe fn resident_bytes(base: NonNull<u8>, len: usize) -> io::Result<usize> {
        let page = Self::page_size();
        let mut residency = [0; MINCORE_CHUNK_PAGES];
        let mut resident_pages = 0;
        let mut offset = 0;
        while offset < len {
            let span = (len - offset).min(MINCORE_CHUNK_PAGES * page);
            // SAFETY: `base + offset` is page aligned, inside the reservation,
            // and `span` covers at most `residency.len()` pages.
            let rc = unsafe {
                libc::mincore(
                    base.as_ptr().add(offset).cast::<libc::c_void>(),
                    span,
                    residency.as_mut_ptr(),
                )
            };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            resident_pages += residency[..span.div_ceil(page)]
                .iter()
                .filter(|&&b| b & 1 != 0)
                .count();
            offset += span;
        }
        Ok(resident_pages * page)
    }

    unsafe fn construct<R>(_owned: Region, _slot: Region, write: impl FnOnce() -> R) -> R {
        write()
    }
}
