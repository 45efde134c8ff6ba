//! PTY spawn helper
//!
//! Attaches a PTY slave to the standard streams and `exec`s a command:
//!
//! ```text
//! pty-spawn-helper <workdir> <0|1> <slave> <master-fd> <err-slave|""> <err-master-fd|-1> <command...>
//! ```
//!
//! The second argument selects console mode: no new session, echo off and a
//! separate process group, with stderr on the error slave when one is given.
//! Setup failures exit with 1, a failed `exec` with 127.

#[cfg(unix)]
fn main() {
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    let failure = match helper::Invocation::parse(args) {
        Ok(invocation) => match helper::run(&invocation) {
            Ok(never) => match never {},
            Err(failure) => failure,
        },
        Err(failure) => failure,
    };
    eprintln!("pty-spawn-helper: {}", failure);
    std::process::exit(failure.exit_code());
}

#[cfg(not(unix))]
fn main() {
    eprintln!("pty-spawn-helper is only used on Unix");
    std::process::exit(1);
}

#[cfg(unix)]
mod helper {
    use std::convert::Infallible;
    use std::ffi::{CString, OsString};
    use std::fmt;
    use std::os::fd::RawFd;
    use std::os::unix::ffi::OsStringExt;
    use std::path::PathBuf;

    use nix::errno::Errno;
    use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
    use nix::libc;
    use nix::sys::signal::{signal, SigHandler, Signal};
    use nix::sys::stat::Mode;
    use nix::unistd::{chdir, close, dup2, execvp, setpgid, setsid, Pid};

    const FIXED_ARGS: usize = 6;

    #[derive(Debug)]
    pub enum Failure {
        Usage(String),
        Setup(&'static str, Errno),
        Exec(String, Errno),
    }

    impl Failure {
        pub fn exit_code(&self) -> i32 {
            match self {
                Failure::Usage(_) | Failure::Setup(..) => 1,
                Failure::Exec(..) => 127,
            }
        }
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Failure::Usage(msg) => write!(f, "{}", msg),
                Failure::Setup(step, errno) => write!(f, "{}: {}", step, errno.desc()),
                Failure::Exec(program, errno) => write!(f, "{}: {}", program, errno.desc()),
            }
        }
    }

    #[derive(Debug)]
    pub struct Invocation {
        working_dir: PathBuf,
        console_mode: bool,
        slave: PathBuf,
        master_fd: RawFd,
        error_slave: Option<PathBuf>,
        error_master_fd: RawFd,
        command: Vec<CString>,
    }

    impl Invocation {
        pub fn parse(args: Vec<OsString>) -> Result<Self, Failure> {
            if args.len() <= FIXED_ARGS {
                return Err(Failure::Usage(format!(
                    "expected at least {} arguments, got {}",
                    FIXED_ARGS + 1,
                    args.len()
                )));
            }
            let mut args = args.into_iter();
            let mut next = || args.next().unwrap_or_default();

            let working_dir = PathBuf::from(next());
            let console_mode = parse_int(next(), "console mode")? != 0;
            let slave = PathBuf::from(next());
            let master_fd = parse_int(next(), "master fd")?;
            let error_slave = Some(next())
                .filter(|s| !s.is_empty())
                .map(PathBuf::from);
            let error_master_fd = parse_int(next(), "error master fd")?;

            let command = args
                .map(|arg| {
                    CString::new(arg.into_vec())
                        .map_err(|_| Failure::Usage("argument contains a NUL byte".to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Self {
                working_dir,
                console_mode,
                slave,
                master_fd,
                error_slave,
                error_master_fd,
                command,
            })
        }
    }

    fn parse_int(value: OsString, what: &str) -> Result<i32, Failure> {
        value
            .to_str()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Failure::Usage(format!("invalid {}: {:?}", what, value)))
    }

    pub fn run(inv: &Invocation) -> Result<Infallible, Failure> {
        chdir(&inv.working_dir).map_err(|e| Failure::Setup("chdir", e))?;

        if !inv.console_mode {
            setsid().map_err(|e| Failure::Setup("setsid", e))?;
        }

        // Without O_NOCTTY the first open acquires the controlling terminal
        let slave = open(&inv.slave, OFlag::O_RDWR, Mode::empty())
            .map_err(|e| Failure::Setup("open slave", e))?;
        if !inv.console_mode {
            // SAFETY: TIOCSCTTY takes an int argument and only affects this process
            unsafe {
                libc::ioctl(slave, libc::TIOCSCTTY as _, 0);
            }
        }

        let error_slave = match (&inv.error_slave, inv.console_mode && inv.error_master_fd >= 0) {
            (Some(path), true) => Some(
                open(path, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
                    .map_err(|e| Failure::Setup("open error slave", e))?,
            ),
            _ => None,
        };

        if inv.console_mode {
            set_noecho(slave);
            setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(|e| Failure::Setup("setpgid", e))?;
        }

        dup2(slave, libc::STDIN_FILENO).map_err(|e| Failure::Setup("dup2 stdin", e))?;
        dup2(slave, libc::STDOUT_FILENO).map_err(|e| Failure::Setup("dup2 stdout", e))?;
        dup2(error_slave.unwrap_or(slave), libc::STDERR_FILENO)
            .map_err(|e| Failure::Setup("dup2 stderr", e))?;

        for fd in [Some(slave), error_slave, Some(inv.master_fd), Some(inv.error_master_fd)]
            .into_iter()
            .flatten()
        {
            if fd > libc::STDERR_FILENO {
                let _ = close(fd);
            }
        }
        close_on_exec_from(libc::STDERR_FILENO + 1);

        for sig in [Signal::SIGPIPE, Signal::SIGINT, Signal::SIGQUIT] {
            // SAFETY: SIG_DFL installs no handler code
            let _ = unsafe { signal(sig, SigHandler::SigDfl) };
        }

        let program = inv.command[0].clone();
        let errno = match execvp(&program, &inv.command) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        Err(Failure::Exec(program.to_string_lossy().into_owned(), errno))
    }

    fn set_noecho(fd: RawFd) {
        // SAFETY: termios is plain data and tcgetattr fully initializes it on success
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut termios) < 0 {
                return;
            }
            termios.c_lflag &= !(libc::ECHO | libc::ECHOE | libc::ECHOK | libc::ECHONL);
            libc::tcsetattr(fd, libc::TCSANOW, &termios);
        }
    }

    /// Keep descriptors this process inherited from leaking into the command
    fn close_on_exec_from(first: RawFd) {
        let Ok(entries) = std::fs::read_dir("/dev/fd") else {
            return;
        };
        let fds: Vec<RawFd> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|fd| *fd >= first)
            .collect();
        for fd in fds {
            let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
        }
    }

}
