//! Windows process spawner
//!
//! The child is created directly with `CreateProcessW`, attached to the
//! pseudo-console through the `PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE`
//! attribute. A waiter thread records the exit code and then closes the
//! pseudo-console.

use std::collections::HashMap;
use std::ffi::{c_void, OsStr};
use std::fs::File;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{FromRawHandle, OwnedHandle, RawHandle};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL, WAIT_OBJECT_0};
use windows::Win32::System::Console::HPCON;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, INFINITE,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
    STARTF_USESTDHANDLES, STARTUPINFOEXW,
};

use crate::error::{Error, Result};
use crate::options::PtyProcessOptions;
use crate::process::{ExitState, ProcessState, ProcessStreams};
use crate::size::WinSize;
use crate::windows::console::ConsoleDevice;
use crate::windows::pipe::{raw, AnonymousPipe};

/// Exit code reported when waiting for the process fails
const WAIT_FAILED_EXIT_CODE: i32 = -100;

/// A child process attached to a [`ConsoleDevice`]
#[derive(Debug)]
pub struct WindowsProcess {
    pid: u32,
    process: Arc<OwnedHandle>,
    console: Arc<Mutex<ConsoleDevice>>,
    exit: Arc<ExitState>,
}

pub(crate) fn spawn(options: &PtyProcessOptions) -> Result<(WindowsProcess, ProcessStreams)> {
    let command = options.command();
    let Some(program) = command.program() else {
        return Err(Error::InvalidCommand("empty command".to_string()));
    };
    let command_line = command.to_command_line();

    let input = AnonymousPipe::new()?;
    let output = AnonymousPipe::new()?;
    let size = options.initial_size().unwrap_or_default();
    let console = ConsoleDevice::create(size, &input.read, &output.write)?;

    let info = start_process(
        console.handle()?,
        &command_line,
        options.working_directory(),
        options.env_map(),
    )
    .map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })?;

    // The console holds its own references to these ends
    drop(input.read);
    drop(output.write);

    // SAFETY: CreateProcessW returned handles owned by this process
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0 as RawHandle) };
    // SAFETY: the thread handle is not used again
    let _ = unsafe { CloseHandle(info.hThread) };

    let process = Arc::new(process);
    let console = Arc::new(Mutex::new(console));
    let exit = Arc::new(ExitState::new());
    start_waiter(
        info.dwProcessId,
        Arc::clone(&process),
        Arc::clone(&console),
        Arc::clone(&exit),
    )?;

    let streams = ProcessStreams {
        reader: Box::new(File::from(output.read)),
        writer: Box::new(File::from(input.write)),
        error_reader: Box::new(std::io::empty()),
    };

    tracing::info!("Started {} (pid {})", program, info.dwProcessId);
    let process = WindowsProcess {
        pid: info.dwProcessId,
        process,
        console,
        exit,
    };
    Ok((process, streams))
}

/// Owns an initialized attribute list buffer
struct AttributeList {
    buffer: Vec<usize>,
}

impl AttributeList {
    fn with_pseudo_console(console: HPCON) -> std::io::Result<Self> {
        let mut size = 0usize;
        // SAFETY: a null list only queries the required size, failure is expected
        let _ = unsafe {
            InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size)
        };

        let words = size.div_ceil(mem::size_of::<usize>());
        let mut list = Self {
            buffer: vec![0usize; words],
        };
        // SAFETY: the buffer is at least `size` bytes and pointer aligned
        unsafe { InitializeProcThreadAttributeList(list.as_raw(), 1, 0, &mut size) }
            .map_err(std::io::Error::other)?;

        // SAFETY: the attribute value is the console handle itself
        unsafe {
            UpdateProcThreadAttribute(
                list.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                Some(console.0 as *const c_void),
                mem::size_of::<HPCON>(),
                None,
                None,
            )
        }
        .map_err(std::io::Error::other)?;

        Ok(list)
    }

    fn as_raw(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr().cast())
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        // SAFETY: the list was initialized in with_pseudo_console
        unsafe { DeleteProcThreadAttributeList(self.as_raw()) };
    }
}

fn start_process(
    console: HPCON,
    command_line: &str,
    directory: Option<&Path>,
    environment: &HashMap<String, String>,
) -> std::io::Result<PROCESS_INFORMATION> {
    let mut attributes = AttributeList::with_pseudo_console(console)?;

    let mut startup = STARTUPINFOEXW::default();
    startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
    // Null standard handles keep the parent's console handles out of the child
    startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
    startup.lpAttributeList = attributes.as_raw();

    let mut command_line = wide(OsStr::new(command_line));
    let directory = directory.map(|d| wide(d.as_os_str()));
    let environment = environment_block(environment);

    let mut info = PROCESS_INFORMATION::default();
    // SAFETY: every buffer outlives the call and is NUL terminated
    unsafe {
        CreateProcessW(
            PCWSTR::null(),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            BOOL::from(false),
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            environment.as_ref().map(|block| block.as_ptr() as *const c_void),
            directory
                .as_ref()
                .map(|d| PCWSTR(d.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            &startup.StartupInfo,
            &mut info,
        )
    }
    .map_err(std::io::Error::other)?;

    Ok(info)
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(iter::once(0)).collect()
}

/// `KEY=VALUE\0...\0\0`, sorted by key; `None` inherits this process's environment
fn environment_block(environment: &HashMap<String, String>) -> Option<Vec<u16>> {
    if environment.is_empty() {
        return None;
    }
    let mut pairs: Vec<(&String, &String)> = environment.iter().collect();
    pairs.sort_by_key(|(key, _)| key.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in pairs {
        block.extend(OsStr::new(&format!("{}={}", key, value)).encode_wide());
        block.push(0);
    }
    block.push(0);
    Some(block)
}

fn start_waiter(
    pid: u32,
    process: Arc<OwnedHandle>,
    console: Arc<Mutex<ConsoleDevice>>,
    exit: Arc<ExitState>,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("ptybridge-waiter-{}", pid))
        .spawn(move || {
            let handle = raw(&process);
            // SAFETY: the process handle stays open while the Arc is held
            let code = if unsafe { WaitForSingleObject(handle, INFINITE) } == WAIT_OBJECT_0 {
                let mut code = 0u32;
                // SAFETY: as above
                match unsafe { GetExitCodeProcess(handle, &mut code) } {
                    Ok(()) => code as i32,
                    Err(e) => {
                        tracing::info!("GetExitCodeProcess({}) failed: {}", pid, e);
                        WAIT_FAILED_EXIT_CODE
                    },
                }
            } else {
                tracing::info!("WaitForSingleObject({}) failed", pid);
                WAIT_FAILED_EXIT_CODE
            };
            tracing::debug!("Process {} exited with {}", pid, code);
            exit.set_exited(code);
            lock(&console).close();
        })
        .map(|_| ())
        .map_err(Error::Io)
}

impl WindowsProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Always false: only the Unix helper has a console mode
    pub fn is_console_mode(&self) -> bool {
        false
    }

    pub(crate) fn exit_state(&self) -> &ExitState {
        &self.exit
    }

    pub fn resize(&self, size: WinSize) -> Result<()> {
        match lock(&self.console).resize(size) {
            Err(Error::Closed) => {
                tracing::debug!("Ignoring resize to {} of a closed pseudo-console", size);
                Ok(())
            },
            other => other,
        }
    }

    pub fn window_size(&self) -> Result<WinSize> {
        Ok(lock(&self.console).size())
    }

    /// `TerminateProcess` with exit code 1; `force` makes no difference here
    pub fn destroy(&self, _force: bool) -> Result<()> {
        if self.exit.get() != ProcessState::Running {
            return Ok(());
        }
        // SAFETY: the process handle is open for the lifetime of self
        unsafe { TerminateProcess(raw(&self.process), 1) }
            .map_err(|e| Error::hresult("TerminateProcess", e))
    }

    pub fn close(&self) {
        lock(&self.console).close();
    }
}

fn lock(console: &Mutex<ConsoleDevice>) -> MutexGuard<'_, ConsoleDevice> {
    console.lock().unwrap_or_else(PoisonError::into_inner)
}
