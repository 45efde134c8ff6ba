//! Pseudo-console device

use std::os::windows::io::OwnedHandle;

use windows::Win32::System::Console::{COORD, HPCON};

use crate::backend::BackendOrigin;
use crate::error::{Error, NativeCode, Result};
use crate::size::WinSize;
use crate::windows::library::{conpty, ConPtyApi};
use crate::windows::pipe::raw;

/// An open pseudo-console
///
/// The native handle is released exactly once, by [`ConsoleDevice::close`]
/// or on drop.
#[derive(Debug)]
pub struct ConsoleDevice {
    api: &'static ConPtyApi,
    origin: BackendOrigin,
    handle: Option<HPCON>,
    size: WinSize,
}

impl ConsoleDevice {
    /// Create a pseudo-console reading from `input` and writing to `output`
    pub fn create(size: WinSize, input: &OwnedHandle, output: &OwnedHandle) -> Result<Self> {
        let backend = conpty()?;
        // SAFETY: both handles are open pipe ends owned by the caller
        let handle = unsafe { backend.backend.create(coord(size), raw(input), raw(output)) }
            .map_err(|hr| Error::Native {
                call: "CreatePseudoConsole",
                code: NativeCode::HResult(hr.0),
            })?;
        tracing::debug!("Created pseudo-console {} ({} backend)", size, backend.origin);
        Ok(Self {
            api: &backend.backend,
            origin: backend.origin,
            handle: Some(handle),
            size,
        })
    }

    pub(crate) fn handle(&self) -> Result<HPCON> {
        self.handle.ok_or(Error::Closed)
    }

    pub fn origin(&self) -> BackendOrigin {
        self.origin
    }

    /// Last size applied, since the pseudo-console API cannot be queried
    pub fn size(&self) -> WinSize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn resize(&mut self, size: WinSize) -> Result<()> {
        let handle = self.handle()?;
        // SAFETY: the handle is open until close() takes it
        unsafe { self.api.resize(handle, coord(size)) }.map_err(|hr| Error::Native {
            call: "ResizePseudoConsole",
            code: NativeCode::HResult(hr.0),
        })?;
        self.size = size;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("Closing pseudo-console");
            // SAFETY: taken out of self, so this is the only release
            unsafe { self.api.close(handle) };
        }
    }
}

impl Drop for ConsoleDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn coord(size: WinSize) -> COORD {
    let clamp = |v: u16| v.min(i16::MAX as u16) as i16;
    COORD {
        X: clamp(size.columns),
        Y: clamp(size.rows),
    }
}
