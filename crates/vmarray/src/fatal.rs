//! Fatal-assertion boundary.
//!
//! Every contract violation and OS failure on the infallible surface ends
//! here. The condition is logged at `error` level and then raised as a
//! panic, so these functions never return. Built with `panic = "abort"`
//! (the workspace release profile) this terminates the process.

use crate::error::VmError;

/// Abort the current operation with `err`.
#[cold]
#[track_caller]
pub fn raise(err: VmError) -> ! {
    tracing::error!(error = %err, "fatal virtual array condition");
    panic!("{err}");
}

/// Abort the current operation with `msg` unless `cond` holds.
#[inline]
#[track_caller]
pub fn assert_fatal(cond: bool, msg: &str) {
    if !cond {
        fail(msg);
    }
}

#[cold]
#[track_caller]
fn fail(msg: &str) -> ! {
    tracing::error!(reason = msg, "fatal assertion failed");
    panic!("{msg}");
}

/// Unwrap `result`, escalating its error through [`raise`].
#[inline]
#[track_caller]
pub(crate) fn check<T>(result: Result<T, VmError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => raise(err),
    }
}
