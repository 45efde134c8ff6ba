//! Error types for PTY and pseudo-console operations

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A raw error code reported by the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeCode {
    /// `errno` value from a POSIX call
    Errno(i32),
    /// `HRESULT` from a Windows pseudo-console call
    HResult(i32),
}

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NativeCode::Errno(errno) => {
                write!(f, "errno={} ({})", errno, io::Error::from_raw_os_error(errno))
            },
            NativeCode::HResult(hr) => write!(f, "HRESULT=0x{:08X}", hr as u32),
        }
    }
}

/// Error type for spawning and driving a PTY-attached process
#[derive(Debug, Error)]
pub enum Error {
    /// The PTY or pseudo-console could not be allocated
    #[error("Failed to allocate pseudo-terminal ({step}): {source}")]
    Allocation {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    /// A native call returned an unexpected error code
    #[error("{call} failed: {code}")]
    Native { call: &'static str, code: NativeCode },

    /// The child process could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Neither the bundled nor the system pseudo-console backend could be loaded
    #[error("Failed to load pseudo-console backend: {0}")]
    LibraryLoad(String),

    /// A bundled native file is missing
    #[error("Native file {name} not found in {}", dir.display())]
    NativeFileNotFound { name: String, dir: PathBuf },

    /// The command cannot be passed to the OS
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The device was already closed
    #[error("Device is closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The native error code carried by this error, if any
    pub fn native_code(&self) -> Option<NativeCode> {
        match self {
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(unix)]
impl Error {
    pub(crate) fn errno(call: &'static str, errno: nix::errno::Errno) -> Self {
        Error::Native {
            call,
            code: NativeCode::Errno(errno as i32),
        }
    }

    pub(crate) fn allocation(step: &'static str, errno: nix::errno::Errno) -> Self {
        Error::Allocation {
            step,
            source: io::Error::from(errno),
        }
    }
}

#[cfg(windows)]
impl Error {
    pub(crate) fn hresult(call: &'static str, err: windows::core::Error) -> Self {
        Error::Native {
            call,
            code: NativeCode::HResult(err.code().0),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Native {
                code: NativeCode::Errno(errno),
                ..
            } => io::Error::from_raw_os_error(errno),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, Error::Closed),
            other => io::Error::other(other),
        }
    }
}

/// Result type for PTY operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hresult_display_is_hex() {
        let code = NativeCode::HResult(0x8007_0057_u32 as i32);
        assert_eq!(code.to_string(), "HRESULT=0x80070057");
    }

    #[test]
    fn test_native_code_accessor() {
        let err = Error::Native {
            call: "ioctl(TIOCSWINSZ)",
            code: NativeCode::Errno(25),
        };
        assert_eq!(err.native_code(), Some(NativeCode::Errno(25)));
        assert!(err.to_string().starts_with("ioctl(TIOCSWINSZ) failed: errno=25"));
        assert_eq!(Error::Closed.native_code(), None);
    }

    #[test]
    fn test_into_io_error_keeps_errno() {
        let err = Error::Native {
            call: "read",
            code: NativeCode::Errno(5),
        };
        assert_eq!(io::Error::from(err).raw_os_error(), Some(5));
        assert_eq!(io::Error::from(Error::Closed).kind(), io::ErrorKind::NotConnected);
    }
}
