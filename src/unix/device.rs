//! Unix PTY device
//!
//! Opens and owns a master/slave pair using the POSIX PTY functions.
//!
//! The master descriptor exists exactly once, inside the device. Readers and
//! writers reach it through the device's shared slot and wait on it with
//! `poll`, together with a wake pipe. [`PtyDevice::close`] signals the wake
//! pipe first, so blocked streams return, and then drops the descriptor.
//!
//! # References
//!
//! - posix_openpt(3): https://man7.org/linux/man-pages/man3/posix_openpt.3.html
//! - grantpt(3), unlockpt(3), ptsname(3)
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::libc;
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt, PtyMaster};
use nix::sys::stat::Mode;
use nix::unistd::{pipe, read, write};

use crate::error::{Error, Result};
use crate::retry::{ResizeRetry, RetryOutcome};
use crate::size::WinSize;

/// `ptsname` returns a pointer into a static buffer
static PTSNAME_LOCK: Mutex<()> = Mutex::new(());

/// Wait until any of `fds` is readable
///
/// Returns the descriptors that are readable or hung up. `None` waits
/// indefinitely, zero or a negative value returns immediately and a positive
/// value is the timeout in milliseconds.
pub fn read_ready(fds: &[BorrowedFd<'_>], timeout_ms: Option<i32>) -> Result<Vec<RawFd>> {
    let interest: Vec<(BorrowedFd<'_>, PollFlags)> =
        fds.iter().map(|fd| (*fd, PollFlags::POLLIN)).collect();
    ready(&interest, timeout_ms)
}

fn ready(fds: &[(BorrowedFd<'_>, PollFlags)], timeout_ms: Option<i32>) -> Result<Vec<RawFd>> {
    let timeout = match timeout_ms {
        None => -1,
        Some(ms) if ms <= 0 => 0,
        Some(ms) => ms,
    };

    let mut poll_fds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|(fd, flags)| PollFd::new(fd, *flags))
        .collect();

    loop {
        match poll(&mut poll_fds, timeout) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(Error::errno("poll", e)),
        }
    }

    let ready = PollFlags::POLLIN | PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(fds
        .iter()
        .zip(poll_fds.iter())
        .filter(|(_, pfd)| pfd.revents().is_some_and(|r| r.intersects(ready)))
        .map(|((fd, _), _)| fd.as_raw_fd())
        .collect())
}

/// The single master descriptor and the pipe that cancels waits on it
#[derive(Debug)]
struct Master {
    fd: RwLock<Option<OwnedFd>>,
    closing: AtomicBool,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
}

impl Master {
    fn fd(&self) -> RwLockReadGuard<'_, Option<OwnedFd>> {
        self.fd.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `master` is ready for `interest`
    ///
    /// Returns `false` once the device is closing.
    fn wait(&self, master: BorrowedFd<'_>, interest: PollFlags) -> io::Result<bool> {
        let ready = ready(
            &[(master, interest), (self.wake_read.as_fd(), PollFlags::POLLIN)],
            None,
        )?;
        Ok(!ready.contains(&self.wake_read.as_raw_fd()))
    }

    /// Wake every waiter, then take the descriptor once they have let go
    fn close(&self) -> Option<OwnedFd> {
        if !self.closing.swap(true, Ordering::SeqCst) {
            let _ = write(self.wake_write.as_raw_fd(), &[0]);
        }
        self.fd.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// A pseudo-terminal master/slave pair
///
/// Every descriptor the device opens is close-on-exec; the spawn helper
/// reaches the terminal through the slave name, never through an inherited
/// master.
pub struct PtyDevice {
    master: Arc<Master>,
    slave_name: String,
}

impl PtyDevice {
    /// Allocate a new PTY
    ///
    /// Nothing is left open when any step fails.
    pub fn open() -> Result<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| Error::allocation("posix_openpt", e))?;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| Error::allocation("fcntl(FD_CLOEXEC)", e))?;
        // Streams block in poll, where close() can reach them, never in read/write
        let status = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| Error::allocation("fcntl(F_GETFL)", e))?;
        let status = OFlag::from_bits_truncate(status) | OFlag::O_NONBLOCK;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(status))
            .map_err(|e| Error::allocation("fcntl(O_NONBLOCK)", e))?;
        grantpt(&master).map_err(|e| Error::allocation("grantpt", e))?;
        unlockpt(&master).map_err(|e| Error::allocation("unlockpt", e))?;
        let slave_name = slave_name_of(&master)?;
        let (wake_read, wake_write) = cloexec_pipe()?;

        // SAFETY: into_raw_fd hands over sole ownership of a valid descriptor
        let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

        tracing::debug!("Opened PTY {} (master fd {})", slave_name, master.as_raw_fd());
        Ok(Self {
            master: Arc::new(Master {
                fd: RwLock::new(Some(master)),
                closing: AtomicBool::new(false),
                wake_read,
                wake_write,
            }),
            slave_name,
        })
    }

    /// Path of the slave device, e.g. `/dev/pts/3`
    pub fn slave_name(&self) -> &str {
        &self.slave_name
    }

    /// Number of the master descriptor
    pub fn master_fd(&self) -> Result<RawFd> {
        self.master
            .fd()
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or(Error::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.master.fd().is_none()
    }

    /// Apply `size` with a single `TIOCSWINSZ`
    pub fn set_size(&self, size: WinSize) -> Result<()> {
        self.master_fd()?;
        self.try_set_size(size)
            .map_err(|e| Error::errno("ioctl(TIOCSWINSZ)", e))
    }

    /// Apply `size`, retrying while the child is still attaching
    ///
    /// Failure is only logged.
    pub fn set_size_with_retry(&self, size: WinSize, retry: &ResizeRetry) -> RetryOutcome {
        let outcome = retry.run(|| self.try_set_size(size));
        match outcome {
            RetryOutcome::Applied { attempts } if attempts > 1 => {
                tracing::debug!("Window size {} applied after {} attempts", size, attempts);
            },
            RetryOutcome::Applied { .. } => {},
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::warn!(
                    "Failed to set initial window size {} after {} attempts: {}",
                    size,
                    attempts,
                    last_error
                );
            },
            RetryOutcome::Failed { error, .. } => {
                tracing::warn!("Failed to set initial window size {}: {}", size, error);
            },
        }
        outcome
    }

    /// Current size reported by `TIOCGWINSZ`
    pub fn window_size(&self) -> Result<WinSize> {
        let guard = self.master.fd();
        let fd = guard.as_ref().ok_or(Error::Closed)?.as_raw_fd();
        let mut ws = WinSize::default().to_winsize();
        // SAFETY: TIOCGWINSZ writes a winsize into the provided struct
        let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) };
        if result < 0 {
            return Err(Error::errno("ioctl(TIOCGWINSZ)", Errno::last()));
        }
        Ok(WinSize::from(ws))
    }

    /// A blocking reader over the master that ends when the device is closed
    pub fn reader(&self) -> Result<PtyReader> {
        self.master_fd()?;
        Ok(PtyReader {
            master: Arc::clone(&self.master),
        })
    }

    /// A writer into the master; fails with `NotConnected` once closed
    pub fn writer(&self) -> Result<PtyWriter> {
        self.master_fd()?;
        Ok(PtyWriter {
            master: Arc::clone(&self.master),
        })
    }

    /// Open the slave read-only in this process
    ///
    /// While the returned descriptor is open the master never reports
    /// end-of-file, so output written before the child exits stays readable.
    pub fn open_slave_keepalive(&self) -> Result<OwnedFd> {
        let fd = open(
            self.slave_name.as_str(),
            OFlag::O_RDONLY | OFlag::O_NOCTTY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(|e| Error::allocation("open slave", e))?;
        // SAFETY: open returned a fresh descriptor that nothing else owns
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Release the master and wake blocked readers and writers
    ///
    /// Calling this again is a no-op.
    pub fn close(&mut self) {
        if let Some(master) = self.master.close() {
            tracing::debug!("Closing PTY {}", self.slave_name);
            drop(master);
        }
    }

    fn try_set_size(&self, size: WinSize) -> std::result::Result<(), Errno> {
        let guard = self.master.fd();
        let fd = guard.as_ref().ok_or(Errno::EBADF)?.as_raw_fd();
        let ws = size.to_winsize();
        // SAFETY: TIOCSWINSZ reads a winsize from the provided struct
        let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
        if result < 0 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }
}

impl Drop for PtyDevice {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PtyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyDevice")
            .field("slave_name", &self.slave_name)
            .field("master", &self.master_fd().ok())
            .finish()
    }
}

fn slave_name_of(master: &PtyMaster) -> Result<String> {
    let _guard = PTSNAME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    // SAFETY: the static buffer behind ptsname is only used under the lock
    unsafe { ptsname(master) }.map_err(|e| Error::allocation("ptsname", e))
}

fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) = pipe().map_err(|e| Error::allocation("pipe", e))?;
    // SAFETY: both descriptors were just created and are owned here
    let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(read_end), OwnedFd::from_raw_fd(write_end)) };
    for fd in [&read_end, &write_end] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| Error::allocation("fcntl(FD_CLOEXEC)", e))?;
    }
    Ok((read_end, write_end))
}

/// Blocking reader over a PTY master
///
/// Returns end-of-stream when the slave side is gone (`EIO`) or when the
/// owning device was closed.
#[derive(Debug)]
pub struct PtyReader {
    master: Arc<Master>,
}

impl io::Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let guard = self.master.fd();
        let Some(fd) = guard.as_ref() else {
            return Ok(0);
        };
        loop {
            if !self.master.wait(fd.as_fd(), PollFlags::POLLIN)? {
                return Ok(0);
            }
            match read(fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                // Every slave descriptor is closed
                Err(Errno::EIO) => return Ok(0),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }
}

/// Writer into a PTY master
#[derive(Debug)]
pub struct PtyWriter {
    master: Arc<Master>,
}

impl io::Write for PtyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let guard = self.master.fd();
        let Some(fd) = guard.as_ref() else {
            return Err(Error::Closed.into());
        };
        loop {
            if !self.master.wait(fd.as_fd(), PollFlags::POLLOUT)? {
                return Err(Error::Closed.into());
            }
            match write(fd.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
