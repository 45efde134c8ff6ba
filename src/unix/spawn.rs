//! Unix process spawner
//!
//! The child is started through the spawn helper, which receives the slave
//! name and master descriptor on its command line, attaches the slave as
//! the child's standard streams and then `exec`s the real command.

use std::ffi::OsString;
use std::fs::File;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as OsCommand, Stdio};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::{NativeDir, NativeResolver, SPAWN_HELPER};
use crate::options::PtyProcessOptions;
use crate::process::{ExitState, ProcessStreams};
use crate::retry::ResizeRetry;
use crate::size::WinSize;
use crate::unix::device::PtyDevice;

/// Argument vector for the spawn helper
///
/// `<helper> <workdir> <0|1> <slave> <master-fd> <err-slave|""> <err-master-fd|-1> <command...>`
pub fn helper_command_line(
    helper: &Path,
    working_dir: &Path,
    console_mode: bool,
    slave_name: &str,
    master_fd: RawFd,
    error_device: Option<(&str, RawFd)>,
    command: &[String],
) -> Vec<OsString> {
    let (err_slave, err_master) = error_device.unwrap_or(("", -1));

    let mut args: Vec<OsString> = Vec::with_capacity(7 + command.len());
    args.push(helper.into());
    args.push(working_dir.into());
    args.push(if console_mode { "1" } else { "0" }.into());
    args.push(slave_name.into());
    args.push(master_fd.to_string().into());
    args.push(err_slave.into());
    args.push(err_master.to_string().into());
    args.extend(command.iter().map(OsString::from));
    args
}

/// A child process running on a [`PtyDevice`]
#[derive(Debug)]
pub struct UnixProcess {
    pid: Pid,
    device: Mutex<PtyDevice>,
    error_device: Option<Mutex<PtyDevice>>,
    exit: Arc<ExitState>,
    console_mode: bool,
}

/// Start the process described by `options`
pub(crate) fn spawn(options: &PtyProcessOptions) -> Result<(UnixProcess, ProcessStreams)> {
    let command = options.command().to_argument_list();
    let Some(program) = command.first().cloned() else {
        return Err(Error::InvalidCommand("empty command".to_string()));
    };

    let helper = resolve_helper(options)?;
    let working_dir = options
        .working_directory()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let device = PtyDevice::open()?;
    let error_device = if options.uses_error_device() {
        Some(PtyDevice::open()?)
    } else {
        None
    };
    let keepalive = if options.is_preserve_output_after_exit() {
        Some(device.open_slave_keepalive()?)
    } else {
        None
    };

    let error_args = match &error_device {
        Some(err) => Some((err.slave_name(), err.master_fd()?)),
        None => None,
    };
    let args = helper_command_line(
        &helper,
        &working_dir,
        options.is_console_mode(),
        device.slave_name(),
        device.master_fd()?,
        error_args,
        &command,
    );

    let streams = ProcessStreams {
        reader: Box::new(device.reader()?),
        writer: Box::new(device.writer()?),
        error_reader: match &error_device {
            Some(err) => Box::new(err.reader()?),
            None => Box::new(std::io::empty()),
        },
    };

    // The helper's own stdio is not the child's: stdin is empty and output
    // is discarded. stderr shares stdout's sink unless an error device exists.
    let sink = File::options().write(true).open("/dev/null")?;
    let stderr = if error_device.is_none() {
        Stdio::from(sink.try_clone()?)
    } else {
        Stdio::null()
    };

    let exit = Arc::new(ExitState::new());
    let reaper = start_reaper(keepalive, Arc::clone(&exit))?;

    tracing::debug!("Spawning {:?} on {}", command, device.slave_name());
    let child = OsCommand::new(&args[0])
        .args(&args[1..])
        .env_clear()
        .envs(options.env_map())
        .current_dir(&working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(stderr)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(mpsc::SendError(mut child)) = reaper.send(child) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::Spawn {
            program,
            source: std::io::Error::other("reaper thread is gone"),
        });
    }

    if let Some(size) = options.initial_size() {
        device.set_size_with_retry(size, &ResizeRetry::default());
    }

    tracing::info!("Started {} (pid {})", program, pid);
    let process = UnixProcess {
        pid,
        device: Mutex::new(device),
        error_device: error_device.map(Mutex::new),
        exit,
        console_mode: options.is_console_mode(),
    };
    Ok((process, streams))
}

fn resolve_helper(options: &PtyProcessOptions) -> Result<PathBuf> {
    match options.resolver() {
        Some(resolver) => resolver.resolve(SPAWN_HELPER),
        None => NativeDir::from_config(Config::global())?.resolve(SPAWN_HELPER),
    }
}

/// Start the thread that waits for the child sent through the returned channel
///
/// The thread exists before the child does, so a child is never started
/// without something to reap it. The child is reaped under the exit-state
/// lock; until then its pid cannot be reused, which keeps signals sent from
/// [`ExitState::if_running`] on the right process. The slave keepalive is
/// released only after the exit has been recorded.
fn start_reaper(keepalive: Option<OwnedFd>, exit: Arc<ExitState>) -> Result<mpsc::Sender<Child>> {
    let (tx, rx) = mpsc::channel::<Child>();
    thread::Builder::new()
        .name("ptybridge-reaper".to_string())
        .spawn(move || {
            // A closed channel means the child was never started
            let Ok(mut child) = rx.recv() else {
                return;
            };
            let pid = child.id();
            let mut reap = || match child.wait() {
                Ok(status) => status
                    .code()
                    .or_else(|| status.signal().map(|signal| 128 + signal))
                    .unwrap_or(-1),
                Err(e) => {
                    tracing::warn!("Failed to wait for pid {}: {}", pid, e);
                    -1
                },
            };
            match wait_exited(pid) {
                Ok(()) => {
                    exit.set_exited_with(reap);
                },
                Err(errno) => {
                    tracing::debug!("waitid({}) failed: {}", pid, errno);
                    let code = reap();
                    exit.set_exited(code);
                },
            }
            tracing::debug!("Process {} exited with {:?}", pid, exit.get());
            drop(keepalive);
        })
        .map_err(Error::Io)?;
    Ok(tx)
}

/// Block until `pid` has exited, leaving it unreaped
fn wait_exited(pid: u32) -> std::result::Result<(), Errno> {
    loop {
        // SAFETY: siginfo_t is plain data that waitid fills in
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: info is a valid, writable siginfo_t
        let result = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        match Errno::result(result) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Signal the process group of `pid`, falling back to the process itself
fn raise(pid: Pid, signal: Signal) -> std::result::Result<(), Errno> {
    killpg(pid, signal).or_else(|_| kill(pid, signal))
}

impl UnixProcess {
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn is_console_mode(&self) -> bool {
        self.console_mode
    }

    pub(crate) fn exit_state(&self) -> &ExitState {
        &self.exit
    }

    /// Resize both devices and notify the process group
    pub fn resize(&self, size: WinSize) -> Result<()> {
        match lock(&self.device).set_size(size) {
            Ok(()) => {},
            Err(Error::Closed) => {
                tracing::debug!("Ignoring resize to {} of a closed device", size);
                return Ok(());
            },
            Err(e) => return Err(e),
        }
        if let Some(err) = &self.error_device {
            if let Err(e) = lock(err).set_size(size) {
                tracing::debug!("Failed to resize error device: {}", e);
            }
        }
        if let Some(Err(e)) = self.exit.if_running(|| raise(self.pid, Signal::SIGWINCH)) {
            tracing::debug!("Failed to send SIGWINCH to {}: {}", self.pid, e);
        }
        Ok(())
    }

    pub fn window_size(&self) -> Result<WinSize> {
        lock(&self.device).window_size()
    }

    /// Send `SIGTERM`, or `SIGKILL` when `force` is set
    pub fn destroy(&self, force: bool) -> Result<()> {
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        match self.exit.if_running(|| raise(self.pid, signal)) {
            None | Some(Ok(())) | Some(Err(Errno::ESRCH)) => Ok(()),
            Some(Err(e)) => Err(Error::errno("kill", e)),
        }
    }

    pub fn close(&self) {
        lock(&self.device).close();
        if let Some(err) = &self.error_device {
            lock(err).close();
        }
    }
}

fn lock(device: &Mutex<PtyDevice>) -> MutexGuard<'_, PtyDevice> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_command_line_without_error_device() {
        let args = helper_command_line(
            Path::new("/opt/app/pty-spawn-helper"),
            Path::new("/home/user"),
            false,
            "/dev/pts/4",
            7,
            None,
            &["echo".to_string(), "hi".to_string()],
        );
        assert_eq!(
            args,
            ["/opt/app/pty-spawn-helper", "/home/user", "0", "/dev/pts/4", "7", "", "-1", "echo", "hi"]
                .map(OsString::from)
        );
    }

    #[test]
    fn test_helper_command_line_with_error_device() {
        let args = helper_command_line(
            Path::new("helper"),
            Path::new("."),
            true,
            "/dev/pts/4",
            7,
            Some(("/dev/pts/5", 9)),
            &["cat".to_string()],
        );
        assert_eq!(args[2], "1");
        assert_eq!(args[5], "/dev/pts/5");
        assert_eq!(args[6], "9");
        assert_eq!(args.len(), 8);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let options = PtyProcessOptions::new(Vec::<String>::new());
        assert!(matches!(spawn(&options), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_missing_helper_fails_before_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let options = PtyProcessOptions::new(["true"])
            .native_resolver(Arc::new(NativeDir::new(dir.path())));
        assert!(matches!(spawn(&options), Err(Error::NativeFileNotFound { .. })));
    }
}
