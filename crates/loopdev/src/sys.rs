//! Thin wrappers over the libc calls the worker runtime needs
//!
//! All `unsafe` in the crate lives here.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::engine::PollEntry;

/// Create a non-blocking, close-on-exec pipe
///
/// Returns `(read_end, write_end)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element array for pipe(2) to fill.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe(2) succeeded, both descriptors are open and owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_nonblocking_cloexec(read.as_raw_fd())?;
    set_nonblocking_cloexec(write.as_raw_fd())?;
    Ok((read, write))
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own, with integer arguments only.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Write a single byte, treating a full pipe as success
pub(crate) fn write_byte(fd: RawFd) -> io::Result<()> {
    let byte = 1u8;
    // SAFETY: writes one byte from a valid stack location.
    let n = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err);
        }
    }
    Ok(())
}

/// Read everything currently buffered in a non-blocking descriptor
///
/// Returns the number of bytes discarded.
pub(crate) fn drain(fd: RawFd) -> io::Result<usize> {
    let mut buf = [0u8; 64];
    let mut total = 0;
    loop {
        // SAFETY: reads at most `buf.len()` bytes into a valid buffer.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            total += n as usize;
            continue;
        }
        if n == 0 {
            return Ok(total);
        }
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::WouldBlock => Ok(total),
            io::ErrorKind::Interrupted => continue,
            _ => Err(err),
        };
    }
}

/// Block in poll(2) until an entry is ready or the timeout expires
///
/// `None` waits indefinitely. Returns the number of ready entries (0 on timeout).
/// `EINTR` is returned as an `Interrupted` error for the caller to retry.
pub(crate) fn poll(entries: &mut [PollEntry], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms = timeout_millis(timeout);
    // SAFETY: PollEntry is repr(transparent) over libc::pollfd, so the slice is a
    // valid pollfd array of `entries.len()` elements for the duration of the call.
    let n = unsafe {
        libc::poll(
            entries.as_mut_ptr() as *mut libc::pollfd,
            entries.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// poll(2) timeout for `timeout`, rounded up to whole milliseconds
///
/// A non-zero interval never becomes 0, which would turn the wait into a spin.
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        Some(t) => t
            .as_nanos()
            .div_ceil(1_000_000)
            .min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    }
}

/// Switch the calling thread to round-robin scheduling at maximum priority
///
/// Usually needs CAP_SYS_NICE or an rtprio limit; callers treat failure as a warning.
pub(crate) fn set_realtime_priority() -> io::Result<i32> {
    // SAFETY: sched_param is plain data; the calls only read/write it.
    unsafe {
        let priority = libc::sched_get_priority_max(libc::SCHED_RR);
        if priority < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_write_then_drain() {
        let (read, write) = pipe().unwrap();
        write_byte(write.as_raw_fd()).unwrap();
        write_byte(write.as_raw_fd()).unwrap();
        assert_eq!(drain(read.as_raw_fd()).unwrap(), 2);
        // Nothing left, non-blocking read returns immediately
        assert_eq!(drain(read.as_raw_fd()).unwrap(), 0);
    }

    #[test]
    fn test_timeout_rounds_up_to_millis() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_micros(500))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(5))), 5);
        assert_eq!(timeout_millis(Some(Duration::from_micros(5001))), 6);
        assert_eq!(
            timeout_millis(Some(Duration::from_secs(u64::MAX))),
            libc::c_int::MAX
        );
    }

    #[test]
    fn test_poll_times_out_without_data() {
        let (read, _write) = pipe().unwrap();
        let mut entries = [PollEntry::readable(read.as_raw_fd())];
        let ready = poll(&mut entries, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(ready, 0);
        assert!(!entries[0].is_ready());
    }

    #[test]
    fn test_poll_reports_readable_pipe() {
        let (read, write) = pipe().unwrap();
        write_byte(write.as_raw_fd()).unwrap();
        let mut entries = [PollEntry::readable(read.as_raw_fd())];
        let ready = poll(&mut entries, None).unwrap();
        assert_eq!(ready, 1);
        assert!(entries[0].is_readable());
    }
}
