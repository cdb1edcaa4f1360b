//! Process hardening for a server that holds plaintext and derived keys in
//! memory while a view is in flight.
//!
//! On Unix:
//!
//! 1. [`disable_core_dumps`] sets `RLIMIT_CORE` to 0 so a crash never writes
//!    revealed secrets or derived keys to a core file.
//! 2. [`lock_memory`] calls `mlockall(MCL_CURRENT | MCL_FUTURE)` so those
//!    pages are never swapped to disk.
//!
//! Both are no-ops elsewhere.

use std::io;

/// Disable core dumps by setting `RLIMIT_CORE` to 0.
///
/// # Errors
///
/// Returns the OS error if `setrlimit` fails.
#[cfg(unix)]
pub fn disable_core_dumps() -> io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `setrlimit` only reads the `rlimit` value passed by reference,
    // which lives for the duration of the call.
    #[allow(unsafe_code)]
    let result = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// No-op on non-Unix platforms.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn disable_core_dumps() -> io::Result<()> {
    Ok(())
}

/// Pin all current and future pages with `mlockall`.
///
/// Requires `CAP_IPC_LOCK` on Linux or root. Set
/// `SHROUD_DISABLE_MLOCK=true` to skip this in development.
///
/// # Errors
///
/// Returns the OS error if `mlockall` fails.
#[cfg(unix)]
pub fn lock_memory() -> io::Result<()> {
    // SAFETY: `mlockall` takes only flag arguments and touches no memory
    // owned by this process.
    #[allow(unsafe_code)]
    let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// No-op on non-Unix platforms.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn lock_memory() -> io::Result<()> {
    Ok(())
}
