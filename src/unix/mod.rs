//! Unix PTY backend
//!
//! `device` owns the master/slave pair, `spawn` starts the child through the
//! spawn helper and reaps it.

pub mod device;
pub mod spawn;

pub use device::{read_ready, PtyDevice, PtyReader, PtyWriter};
pub use spawn::{helper_command_line, UnixProcess};
