//! Locating bundled native files
//!
//! The spawn helper (Unix) and the bundled `conpty.dll` (Windows) ship next
//! to the application. Unpacking them is the embedding application's job;
//! this module only maps a file name to a path.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};

/// File name of the Unix spawn helper
pub const SPAWN_HELPER: &str = "pty-spawn-helper";

/// File name of the bundled pseudo-console library
pub const BUNDLED_CONPTY: &str = "conpty.dll";

/// Maps a bundled native file name to an existing path
pub trait NativeResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<PathBuf>;
}

/// Resolves native files from one directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDir {
    dir: PathBuf,
}

impl NativeDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The configured local tree if set, otherwise the directory of the
    /// running executable
    pub fn from_config(config: &Config) -> Result<Self> {
        if let Some(dir) = &config.native_dir {
            return Ok(Self::new(dir));
        }
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl NativeResolver for NativeDir {
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::NativeFileNotFound {
                name: name.to_string(),
                dir: self.dir.clone(),
            })
        }
    }
}
