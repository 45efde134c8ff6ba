//! Pseudo-console backend selection
//!
//! Two implementations of the pseudo-console API exist: a bundled
//! `conpty.dll` (newer, but needs OS components only present on recent
//! builds) and the one built into `kernel32`, which is always there. The
//! choice is made once per process:
//!
//! 1. an explicit override disables the bundled backend
//! 2. hosts below [`MIN_BUNDLED_CONPTY_BUILD`] use the system backend
//! 3. otherwise the bundled file is resolved and loaded
//! 4. any failure above falls back to the system backend
//!
//! Only a failure of step 4 is an error, and it is reported to every caller.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::native::{NativeResolver, BUNDLED_CONPTY};
use crate::version::{BuildNumberSource, RegistryBuildNumber, WindowsVersion};

/// First build the bundled backend is loaded on (Windows 10 2004)
pub const MIN_BUNDLED_CONPTY_BUILD: u64 = 19041;

/// Windows `MAX_PATH`
pub const MAX_PATH: usize = 260;

/// Where the loaded backend came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOrigin {
    Bundled,
    System,
}

impl fmt::Display for BackendOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendOrigin::Bundled => f.write_str("bundled"),
            BackendOrigin::System => f.write_str("system"),
        }
    }
}

/// A loaded backend tagged with its origin
#[derive(Debug)]
pub struct ResolvedBackend<B> {
    pub backend: B,
    pub origin: BackendOrigin,
}

/// Loads a backend implementation
pub trait BackendLoader: Send + Sync {
    type Backend: Send + Sync;

    /// Load the bundled library at `path`
    fn load_bundled(&self, path: &Path) -> Result<Self::Backend>;

    /// Load the backend built into the OS
    fn load_system(&self) -> Result<Self::Backend>;
}

/// Lazily selects and caches one backend
pub struct BackendResolver<L: BackendLoader, S = RegistryBuildNumber> {
    loader: L,
    native: Box<dyn NativeResolver>,
    version: WindowsVersion<S>,
    disable_bundled: bool,
    resolved: OnceLock<std::result::Result<ResolvedBackend<L::Backend>, String>>,
}

impl<L, S> BackendResolver<L, S>
where
    L: BackendLoader,
    S: BuildNumberSource,
{
    pub fn new(
        loader: L,
        native: Box<dyn NativeResolver>,
        version: WindowsVersion<S>,
        disable_bundled: bool,
    ) -> Self {
        Self {
            loader,
            native,
            version,
            disable_bundled,
            resolved: OnceLock::new(),
        }
    }

    /// The selected backend, loading it on first use
    ///
    /// Concurrent first callers block until one of them has finished and
    /// then all observe the same instance.
    pub fn resolve(&self) -> Result<&ResolvedBackend<L::Backend>> {
        self.resolved
            .get_or_init(|| self.load())
            .as_ref()
            .map_err(|msg| Error::LibraryLoad(msg.clone()))
    }

    fn load(&self) -> std::result::Result<ResolvedBackend<L::Backend>, String> {
        if let Some(backend) = self.load_bundled() {
            tracing::info!("Using bundled {}", BUNDLED_CONPTY);
            return Ok(ResolvedBackend {
                backend,
                origin: BackendOrigin::Bundled,
            });
        }

        match self.loader.load_system() {
            Ok(backend) => {
                tracing::info!("Using system pseudo-console backend");
                Ok(ResolvedBackend {
                    backend,
                    origin: BackendOrigin::System,
                })
            },
            Err(e) => {
                tracing::error!("Failed to load system pseudo-console backend: {}", e);
                Err(e.to_string())
            },
        }
    }

    fn load_bundled(&self) -> Option<L::Backend> {
        if self.disable_bundled {
            tracing::info!("Bundled {} disabled by configuration", BUNDLED_CONPTY);
            return None;
        }

        if !self.version.is_greater_than_or_equal_to(MIN_BUNDLED_CONPTY_BUILD) {
            tracing::info!(
                "Skipping bundled {}: OS {:?} is older than build {}",
                BUNDLED_CONPTY,
                self.version,
                MIN_BUNDLED_CONPTY_BUILD
            );
            return None;
        }

        let path = match self.native.resolve(BUNDLED_CONPTY) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Failed to resolve bundled {}: {}", BUNDLED_CONPTY, e);
                return None;
            },
        };

        let command_line_len = estimate_open_console_command_line_len(&path);
        if command_line_len >= MAX_PATH {
            tracing::warn!(
                "Skipping bundled {}: OpenConsole.exe command line would be {} characters",
                BUNDLED_CONPTY,
                command_line_len
            );
            return None;
        }

        match self.loader.load_bundled(&path) {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::warn!(
                    "Failed to load bundled {}, falling back to system backend: {}",
                    BUNDLED_CONPTY,
                    e
                );
                None
            },
        }
    }
}

/// Length of the command line `conpty.dll` builds to start `OpenConsole.exe`
/// from its own directory
///
/// `OpenConsole.exe` fails to start when this exceeds `MAX_PATH`.
pub fn estimate_open_console_command_line_len(conpty_dll: &Path) -> usize {
    let path = conpty_dll.to_string_lossy();
    // Split on either separator: the path may be a Windows path on any host
    let dir = path.rfind(['\\', '/']).map_or("", |i| &path[..i]);
    let command_line = format!(
        "\"{}\\OpenConsole.exe\" --headless --width 120 --height 100 --signal 0x950 --server 0x958",
        dir
    );
    // Options newer builds may append
    let reserved = "--resizeQuirk --passthrough ";
    // MAX_PATH counts UTF-16 units
    command_line.encode_utf16().count() + reserved.encode_utf16().count()
}
