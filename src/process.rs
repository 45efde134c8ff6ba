//! Process handle
//!
//! A [`ProcessHandle`] ties one child process to the PTY or pseudo-console
//! it was started on. The platform spawner owns the OS details; this module
//! holds the exit-state machine and the caller-facing surface.

use std::fmt;
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::options::PtyProcessOptions;
use crate::size::WinSize;

#[cfg(unix)]
use crate::unix::spawn::{spawn as spawn_platform, UnixProcess as PlatformProcess};
#[cfg(windows)]
use crate::windows::spawn::{spawn as spawn_platform, WindowsProcess as PlatformProcess};

/// Lifecycle of a spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(i32),
}

impl ProcessState {
    pub fn exit_code(self) -> Option<i32> {
        match self {
            ProcessState::Running => None,
            ProcessState::Exited(code) => Some(code),
        }
    }
}

/// Exit status shared between the waiting thread and the handle
///
/// `Running` moves to `Exited` exactly once.
#[derive(Debug)]
pub(crate) struct ExitState {
    state: Mutex<ProcessState>,
    changed: Condvar,
}

impl ExitState {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::Running),
            changed: Condvar::new(),
        }
    }

    /// Record the exit code; later calls are ignored
    pub(crate) fn set_exited(&self, code: i32) -> bool {
        self.set_exited_with(|| code)
    }

    /// Like [`ExitState::set_exited`], computing the code under the lock
    ///
    /// `reap` runs only while the state is still `Running`, so it excludes
    /// any closure passed to [`ExitState::if_running`].
    pub(crate) fn set_exited_with<F: FnOnce() -> i32>(&self, reap: F) -> bool {
        let mut state = self.lock();
        if *state != ProcessState::Running {
            return false;
        }
        *state = ProcessState::Exited(reap());
        self.changed.notify_all();
        true
    }

    /// Run `f` while holding the lock, only if the process has not exited
    pub(crate) fn if_running<R, F: FnOnce() -> R>(&self, f: F) -> Option<R> {
        let state = self.lock();
        if *state != ProcessState::Running {
            return None;
        }
        Some(f())
    }

    pub(crate) fn get(&self) -> ProcessState {
        *self.lock()
    }

    pub(crate) fn wait(&self) -> i32 {
        let mut state = self.lock();
        loop {
            if let ProcessState::Exited(code) = *state {
                return code;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let ProcessState::Exited(code) = *state {
                return Some(code);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Byte stream read from the child
pub type ProcessReader = Box<dyn io::Read + Send>;
/// Byte stream written to the child
pub type ProcessWriter = Box<dyn io::Write + Send>;

/// A child process attached to a PTY
///
/// Dropping the handle closes the device but does not kill the child.
pub struct ProcessHandle {
    inner: PlatformProcess,
    reader: Option<ProcessReader>,
    writer: Option<ProcessWriter>,
    error_reader: Option<ProcessReader>,
}

impl ProcessHandle {
    /// Start a process as described by `options`
    pub fn spawn(options: &PtyProcessOptions) -> Result<Self> {
        let (inner, streams) = spawn_platform(options)?;
        Ok(Self {
            inner,
            reader: Some(streams.reader),
            writer: Some(streams.writer),
            error_reader: Some(streams.error_reader),
        })
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid()
    }

    /// Resize the terminal
    ///
    /// Does nothing once the device is closed.
    pub fn resize(&self, size: WinSize) -> Result<()> {
        self.inner.resize(size)
    }

    pub fn window_size(&self) -> Result<WinSize> {
        self.inner.window_size()
    }

    pub fn state(&self) -> ProcessState {
        self.inner.exit_state().get()
    }

    /// The exit code, or `None` while the process is running
    pub fn exit_value(&self) -> Option<i32> {
        self.state().exit_code()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Block until the process exits and return its exit code
    pub fn wait_for(&self) -> i32 {
        self.inner.exit_state().wait()
    }

    /// Like [`ProcessHandle::wait_for`], giving up after `timeout`
    pub fn wait_for_timeout(&self, timeout: Duration) -> Option<i32> {
        self.inner.exit_state().wait_timeout(timeout)
    }

    /// Terminate the process; `force` kills it without a chance to clean up
    pub fn destroy(&self, force: bool) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.inner.destroy(force)
    }

    /// The child's output
    pub fn take_reader(&mut self) -> Option<ProcessReader> {
        self.reader.take()
    }

    /// The child's input
    pub fn take_writer(&mut self) -> Option<ProcessWriter> {
        self.writer.take()
    }

    /// The child's separate error output
    ///
    /// Empty unless the process runs in console mode without a merged
    /// error stream.
    pub fn take_error_reader(&mut self) -> Option<ProcessReader> {
        self.error_reader.take()
    }

    /// Byte the terminal sends for Enter
    pub fn enter_key_code(&self) -> u8 {
        b'\r'
    }

    pub fn is_console_mode(&self) -> bool {
        self.inner.is_console_mode()
    }

    /// Release the device; blocked readers see end-of-stream
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid())
            .field("state", &self.state())
            .finish()
    }
}

/// Streams produced by a platform spawner
pub(crate) struct ProcessStreams {
    pub(crate) reader: ProcessReader,
    pub(crate) writer: ProcessWriter,
    pub(crate) error_reader: ProcessReader,
}
