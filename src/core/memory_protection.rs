//! Page-locking for resident key material.
//!
//! With the `memlock` feature on unix the master key buffer is `mlock`ed so it
//! is not written out to swap. Everywhere else these are no-ops.

/// Locks `len` bytes starting at `ptr`.
#[cfg(all(unix, feature = "memlock"))]
pub fn lock_memory(ptr: *const u8, len: usize) -> Result<(), std::io::Error> {
    // safety: caller passes a live allocation of at least `len` bytes
    let res = unsafe { libc::mlock(ptr as *const std::ffi::c_void, len as libc::size_t) };
    if res != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, feature = "memlock"))]
pub fn unlock_memory(ptr: *const u8, len: usize) -> Result<(), std::io::Error> {
    let res = unsafe { libc::munlock(ptr as *const std::ffi::c_void, len as libc::size_t) };
    if res != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(all(unix, feature = "memlock")))]
pub fn lock_memory(_ptr: *const u8, _len: usize) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(not(all(unix, feature = "memlock")))]
pub fn unlock_memory(_ptr: *const u8, _len: usize) -> Result<(), std::io::Error> {
    Ok(())
}

/// Best-effort lock of a byte slice; failure (e.g. RLIMIT_MEMLOCK) is logged, not fatal.
pub fn try_lock(bytes: &[u8]) -> bool {
    match lock_memory(bytes.as_ptr(), bytes.len()) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "mlock unavailable for key buffer");
            false
        }
    }
}

pub fn try_unlock(bytes: &[u8]) {
    if let Err(e) = unlock_memory(bytes.as_ptr(), bytes.len()) {
        tracing::debug!(error = %e, "munlock failed for key buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock_small_buffer() {
        let buf = vec![7u8; 32];
        if try_lock(&buf) {
            try_unlock(&buf);
        }
        assert_eq!(buf.len(), 32);
    }
}
