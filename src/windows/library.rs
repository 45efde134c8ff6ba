//! Pseudo-console API loading
//!
//! The three pseudo-console entry points are looked up at runtime, either
//! from the bundled `conpty.dll` or from `kernel32.dll`. Which one is used is
//! decided once per process by [`BackendResolver`].

use std::path::Path;
use std::sync::OnceLock;

use libloading::Library;
use windows::core::HRESULT;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{COORD, HPCON};

use crate::backend::{BackendLoader, BackendResolver, ResolvedBackend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::native::{NativeDir, NativeResolver};
use crate::version::WindowsVersion;

const KERNEL32: &str = "kernel32.dll";

type CreatePseudoConsoleFn =
    unsafe extern "system" fn(COORD, HANDLE, HANDLE, u32, *mut HPCON) -> HRESULT;
type ResizePseudoConsoleFn = unsafe extern "system" fn(HPCON, COORD) -> HRESULT;
type ClosePseudoConsoleFn = unsafe extern "system" fn(HPCON);

/// The pseudo-console functions of one loaded library
pub struct ConPtyApi {
    create: CreatePseudoConsoleFn,
    resize: ResizePseudoConsoleFn,
    close: ClosePseudoConsoleFn,
    // Keeps the function pointers above valid
    _library: Library,
}

impl ConPtyApi {
    fn from_library(library: Library) -> Result<Self> {
        // SAFETY: the signatures match the documented pseudo-console API
        unsafe {
            let create = *library
                .get::<CreatePseudoConsoleFn>(b"CreatePseudoConsole\0")
                .map_err(|e| Error::LibraryLoad(e.to_string()))?;
            let resize = *library
                .get::<ResizePseudoConsoleFn>(b"ResizePseudoConsole\0")
                .map_err(|e| Error::LibraryLoad(e.to_string()))?;
            let close = *library
                .get::<ClosePseudoConsoleFn>(b"ClosePseudoConsole\0")
                .map_err(|e| Error::LibraryLoad(e.to_string()))?;
            Ok(Self {
                create,
                resize,
                close,
                _library: library,
            })
        }
    }

    /// # Safety
    ///
    /// `input` and `output` must be valid pipe handles.
    pub(crate) unsafe fn create(
        &self,
        size: COORD,
        input: HANDLE,
        output: HANDLE,
    ) -> std::result::Result<HPCON, HRESULT> {
        let mut console = HPCON::default();
        let hr = (self.create)(size, input, output, 0, &mut console);
        if hr.is_ok() {
            Ok(console)
        } else {
            Err(hr)
        }
    }

    /// # Safety
    ///
    /// `console` must be open.
    pub(crate) unsafe fn resize(&self, console: HPCON, size: COORD) -> std::result::Result<(), HRESULT> {
        let hr = (self.resize)(console, size);
        if hr.is_ok() {
            Ok(())
        } else {
            Err(hr)
        }
    }

    /// # Safety
    ///
    /// `console` must be open and is invalid afterwards.
    pub(crate) unsafe fn close(&self, console: HPCON) {
        (self.close)(console)
    }
}

impl std::fmt::Debug for ConPtyApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConPtyApi").finish_non_exhaustive()
    }
}

/// Loads [`ConPtyApi`] from the bundled file or from `kernel32`
#[derive(Debug, Clone, Copy, Default)]
pub struct ConPtyLoader;

impl BackendLoader for ConPtyLoader {
    type Backend = ConPtyApi;

    fn load_bundled(&self, path: &Path) -> Result<ConPtyApi> {
        // SAFETY: loading runs the library's initialization routine
        let library = unsafe { Library::new(path) }.map_err(|e| Error::LibraryLoad(e.to_string()))?;
        ConPtyApi::from_library(library)
    }

    fn load_system(&self) -> Result<ConPtyApi> {
        // SAFETY: kernel32 is already mapped into every process
        let library = unsafe { Library::new(KERNEL32) }.map_err(|e| Error::LibraryLoad(e.to_string()))?;
        ConPtyApi::from_library(library)
    }
}

/// The process-wide pseudo-console backend
pub fn conpty() -> Result<&'static ResolvedBackend<ConPtyApi>> {
    static RESOLVER: OnceLock<BackendResolver<ConPtyLoader>> = OnceLock::new();

    RESOLVER
        .get_or_init(|| {
            let config = Config::global();
            let native: Box<dyn NativeResolver> = match NativeDir::from_config(config) {
                Ok(dir) => Box::new(dir),
                Err(e) => {
                    tracing::warn!("Cannot locate native files: {}", e);
                    Box::new(NativeDir::new("."))
                },
            };
            BackendResolver::new(
                ConPtyLoader,
                native,
                WindowsVersion::current(),
                config.disable_bundled_conpty,
            )
        })
        .resolve()
}
