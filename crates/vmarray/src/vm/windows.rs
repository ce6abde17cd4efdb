//! Explicit-commit backend built on `VirtualAlloc` and a vectored
//! exception handler.
//!
//! Reservations are `MEM_RESERVE | PAGE_NOACCESS`. Only the single store
//! of a new element runs "armed": the handler accepts an access violation
//! only when the current thread is armed and the faulting address lies in
//! the armed array's reservation. It then commits the element's slot and
//! resumes the store. Any other fault is passed on untouched.

use std::cell::Cell;
use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::OnceLock;

use windows_sys::Win32::Foundation::EXCEPTION_ACCESS_VIOLATION;
use windows_sys::Win32::System::Diagnostics::Debug::{
    AddVectoredExceptionHandler, EXCEPTION_POINTERS,
};
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_DECOMMIT,
    MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use super::{classify_fault, Backend, CommitStrategy, FaultAction, Region};
use crate::fatal;

const EXCEPTION_CONTINUE_EXECUTION: i32 = -1;
const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

/// Reserve-then-commit-on-fault reservations.
pub(crate) struct ExplicitCommit;

#[derive(Clone, Copy)]
struct Armed {
    owned: Region,
    slot: Region,
}

thread_local! {
    static ARMED: Cell<Option<Armed>> = const { Cell::new(None) };
}

/// Disarms the current thread when dropped.
struct ArmGuard {
    previous: Option<Armed>,
}

impl ArmGuard {
    fn arm(armed: Armed) -> Self {
        let previous = ARMED.with(|cell| cell.replace(Some(armed)));
        compiler_fence(Ordering::SeqCst);
        Self { previous }
    }
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        compiler_fence(Ordering::SeqCst);
        ARMED.with(|cell| cell.set(self.previous));
    }
}

fn install_handler() {
    static HANDLER: OnceLock<usize> = OnceLock::new();
    HANDLER.get_or_init(|| {
        // SAFETY: `commit_on_fault` has the PVECTORED_EXCEPTION_HANDLER ABI
        // and stays valid for the life of the process.
        let handle = unsafe { AddVectoredExceptionHandler(1, Some(commit_on_fault)) };
        fatal::assert_fatal(!handle.is_null(), "failed to install page-fault handler");
        tracing::debug!("installed vectored page-fault handler");
        handle as usize
    });
}

unsafe extern "system" fn commit_on_fault(info: *mut EXCEPTION_POINTERS) -> i32 {
    let armed = ARMED
        .try_with(Cell::get)
        .ok()
        .flatten()
        .map(|armed| (armed.owned, armed.slot));
    // SAFETY: the OS passes a valid EXCEPTION_POINTERS with a valid record.
    let record = unsafe { &*(*info).ExceptionRecord };
    let is_access_violation =
        record.ExceptionCode == EXCEPTION_ACCESS_VIOLATION && record.NumberParameters >= 2;
    let address = record.ExceptionInformation[1];

    let target = match classify_fault(
        armed,
        is_access_violation,
        address,
        ExplicitCommit::page_size(),
    ) {
        FaultAction::Search => return EXCEPTION_CONTINUE_SEARCH,
        FaultAction::Commit(target) => target,
    };
    // SAFETY: `target` lies inside the armed reservation.
    match unsafe { ExplicitCommit::commit(target) } {
        Ok(()) => EXCEPTION_CONTINUE_EXECUTION,
        Err(err) => {
            // Unwinding out of an exception callback is not possible.
            eprintln!("failed to commit page at {address:#x}: {err}");
            std::process::abort();
        }
    }
}

impl Backend for ExplicitCommit {
    const STRATEGY: CommitStrategy = CommitStrategy::OnFault;

    fn page_size() -> usize {
        static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
        *PAGE_SIZE.get_or_init(|| {
            // SAFETY: SYSTEM_INFO is plain data; GetSystemInfo fills it.
            let info = unsafe {
                let mut info: SYSTEM_INFO = mem::zeroed();
                GetSystemInfo(&mut info);
                info
            };
            usize::try_from(info.dwPageSize)
                .ok()
                .filter(|&s| s > 0)
                .unwrap_or(4096)
        })
    }

    fn reserve(len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: a fresh reservation at a system-chosen address.
        let addr = unsafe { VirtualAlloc(ptr::null(), len, MEM_RESERVE, PAGE_NOACCESS) };
        NonNull::new(addr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
    }

    unsafe fn release(base: NonNull<u8>, _len: usize) -> io::Result<()> {
        // SAFETY: MEM_RELEASE requires the base of the reservation and size 0.
        if unsafe { VirtualFree(base.as_ptr().cast(), 0, MEM_RELEASE) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn discard(base: NonNull<u8>, len: usize) -> io::Result<()> {
        // SAFETY: caller guarantees `base..base+len` is a live reservation.
        if unsafe { VirtualFree(base.as_ptr().cast(), len, MEM_DECOMMIT) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn commit(region: Region) -> io::Result<()> {
        // Commits every page overlapping the region.
        // SAFETY: caller guarantees the region lies in a live reservation.
        let addr = unsafe {
            VirtualAlloc(
                region.start as *const c_void,
                region.len.max(1),
                MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if addr.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn resident_bytes(base: NonNull<u8>, len: usize) -> io::Result<usize> {
        let owned = Region::new(base.as_ptr(), len);
        let mut cursor = owned.start;
        let mut committed = 0;
        while cursor < owned.end() {
            // SAFETY: MEMORY_BASIC_INFORMATION is plain data.
            let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
            // SAFETY: querying an address inside our own reservation.
            let written = unsafe {
                VirtualQuery(
                    cursor as *const c_void,
                    &mut info,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                return Err(io::Error::last_os_error());
            }
            let run_end = (info.BaseAddress as usize + info.RegionSize).min(owned.end());
            if info.State == MEM_COMMIT {
                committed += run_end - cursor;
            }
            cursor = run_end;
        }
        Ok(committed)
    }

    unsafe fn construct<R>(owned: Region, slot: Region, write: impl FnOnce() -> R) -> R {
        install_handler();
        let _guard = ArmGuard::arm(Armed { owned, slot });
        write()
    }
}
