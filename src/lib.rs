//! ptybridge
//!
//! Spawns child processes attached to a pseudo-terminal instead of pipes, so
//! the child sees a real terminal while the host reads, writes and resizes
//! the session.
//!
//! - `command`: command representation and command-line quoting
//! - `backend`, `version`, `native`: pseudo-console backend selection
//! - `unix`: PTY device and spawn-helper based spawner
//! - `windows`: pseudo-console device and `CreateProcessW` spawner
//! - `process`: the handle returned to callers
//!
//! ```no_run
//! use std::io::Read;
//!
//! use ptybridge::{ProcessHandle, PtyProcessOptions};
//!
//! let options = PtyProcessOptions::new(["echo", "hi"]).initial_columns(100);
//! let mut process = ProcessHandle::spawn(&options)?;
//! let mut output = String::new();
//! process.take_reader().unwrap().read_to_string(&mut output)?;
//! assert_eq!(process.wait_for(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod native;
pub mod options;
#[cfg(any(unix, windows))]
pub mod process;
pub mod size;
pub mod version;

#[cfg(unix)]
pub mod retry;
#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

pub use backend::{BackendOrigin, BackendResolver, ResolvedBackend};
pub use command::{join_command_line, parse, parse_with, Command, ParseOptions};
pub use config::Config;
pub use error::{Error, NativeCode, Result};
pub use native::{NativeDir, NativeResolver};
pub use options::PtyProcessOptions;
#[cfg(any(unix, windows))]
pub use process::{ProcessHandle, ProcessReader, ProcessState, ProcessWriter};
pub use size::WinSize;
pub use version::WindowsVersion;
