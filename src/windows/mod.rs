//! Windows pseudo-console backend

pub mod console;
pub mod library;
pub mod pipe;
pub mod spawn;

pub use console::ConsoleDevice;
pub use library::{conpty, ConPtyApi, ConPtyLoader};
pub use spawn::WindowsProcess;
