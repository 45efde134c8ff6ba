//! Anonymous pipes for the pseudo-console

use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Pipes::CreatePipe;

use crate::error::{Error, Result};

/// Both ends of an anonymous pipe
#[derive(Debug)]
pub struct AnonymousPipe {
    pub read: OwnedHandle,
    pub write: OwnedHandle,
}

impl AnonymousPipe {
    pub fn new() -> Result<Self> {
        let mut read = HANDLE::default();
        let mut write = HANDLE::default();
        // SAFETY: both out-pointers are valid for the duration of the call
        unsafe { CreatePipe(&mut read, &mut write, None, 0) }.map_err(|e| Error::Allocation {
            step: "CreatePipe",
            source: io::Error::other(e),
        })?;
        // SAFETY: CreatePipe returned two fresh handles owned by this process
        unsafe {
            Ok(Self {
                read: OwnedHandle::from_raw_handle(read.0 as RawHandle),
                write: OwnedHandle::from_raw_handle(write.0 as RawHandle),
            })
        }
    }
}

/// Borrow an owned handle as a Win32 `HANDLE`
pub(crate) fn raw(handle: &OwnedHandle) -> HANDLE {
    HANDLE(handle.as_raw_handle() as isize)
}
