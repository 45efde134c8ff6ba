//! End-to-end tests against the real spawn helper
//!
//! Every test spawns a short-lived process through `pty-spawn-helper` and
//! reads the PTY until end-of-stream.

#![cfg(unix)]

use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ptybridge::{NativeDir, ProcessHandle, ProcessReader, PtyProcessOptions, WinSize};

const TIMEOUT: Duration = Duration::from_secs(20);

fn options(command: &[&str]) -> PtyProcessOptions {
    let helper = Path::new(env!("CARGO_BIN_EXE_pty-spawn-helper"));
    let dir = helper.parent().expect("helper has a parent directory");
    PtyProcessOptions::new(command)
        .env("PATH", "/usr/local/bin:/usr/bin:/bin")
        .native_resolver(Arc::new(NativeDir::new(dir)))
}

/// Read until end-of-stream, failing the test instead of hanging
fn read_all(mut reader: ProcessReader) -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut output = Vec::new();
        let _ = reader.read_to_end(&mut output);
        let _ = tx.send(output);
    });
    let output = rx.recv_timeout(TIMEOUT).expect("PTY did not reach end-of-stream");
    String::from_utf8_lossy(&output).into_owned()
}

fn run(options: &PtyProcessOptions) -> (String, i32) {
    let mut process = ProcessHandle::spawn(options).expect("Failed to spawn");
    let output = read_all(process.take_reader().unwrap());
    let code = process.wait_for_timeout(TIMEOUT).expect("Process did not exit");
    (output, code)
}

#[test]
fn test_echo_output_and_exit_code() {
    let (output, code) = run(&options(&["echo", "hi"]));
    assert!(output.contains("hi"), "output: {:?}", output);
    assert!(output.contains('\n'), "output: {:?}", output);
    assert_eq!(code, 0);
}

#[test]
fn test_exit_code_is_propagated() {
    let (_, code) = run(&options(&["sh", "-c", "exit 3"]));
    assert_eq!(code, 3);
}

#[test]
fn test_signal_exit_code() {
    let (_, code) = run(&options(&["sh", "-c", "kill -TERM $$"]));
    assert_eq!(code, 128 + 15);
}

#[test]
fn test_raw_command_is_split() {
    let opts = options(&[]);
    let opts = PtyProcessOptions::new("sh -c \"echo split ok\"")
        .environment(opts.env_map().clone())
        .native_resolver(Arc::new(NativeDir::new(
            Path::new(env!("CARGO_BIN_EXE_pty-spawn-helper")).parent().unwrap(),
        )));
    let (output, code) = run(&opts);
    assert!(output.contains("split ok"), "output: {:?}", output);
    assert_eq!(code, 0);
}

#[test]
fn test_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().canonicalize().unwrap();
    let (output, _) = run(&options(&["pwd", "-P"]).directory(dir.path()));
    assert!(
        output.contains(expected.to_str().unwrap()),
        "expected {:?} in {:?}",
        expected,
        output
    );
}

#[test]
fn test_environment_replaces_ambient() {
    std::env::set_var("PTYBRIDGE_AMBIENT_ONLY", "leaked");
    let (output, _) = run(&options(&["env"]).env("PTYBRIDGE_TEST", "1"));
    assert!(output.contains("PTYBRIDGE_TEST=1"), "output: {:?}", output);
    assert!(!output.contains("PTYBRIDGE_AMBIENT_ONLY"), "output: {:?}", output);
}

#[test]
fn test_initial_size_is_applied() {
    let opts = options(&["sh", "-c", "sleep 0.5; stty size"])
        .initial_columns(120)
        .initial_rows(40);
    let (output, _) = run(&opts);
    assert!(output.contains("40 120"), "output: {:?}", output);
}

#[test]
fn test_missing_dimension_defaults() {
    let opts = options(&["sh", "-c", "sleep 0.5; stty size"]).initial_columns(100);
    let (output, _) = run(&opts);
    assert!(output.contains("25 100"), "output: {:?}", output);
}

#[test]
fn test_output_survives_exit() {
    let mut process = ProcessHandle::spawn(&options(&["printf", "done"])).unwrap();
    let reader = process.take_reader().unwrap();
    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(0));
    assert!(!process.is_alive());
    assert_eq!(process.exit_value(), Some(0));

    let output = read_all(reader);
    assert!(output.contains("done"), "output: {:?}", output);
}

#[test]
fn test_write_and_read_back() {
    let mut process = ProcessHandle::spawn(&options(&["head", "-n", "1"])).unwrap();
    let mut writer = process.take_writer().unwrap();
    let reader = process.take_reader().unwrap();

    writer.write_all(b"hello pty\n").unwrap();

    let output = read_all(reader);
    assert!(output.contains("hello pty"), "output: {:?}", output);
    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(0));
}

#[test]
fn test_resize_and_destroy() {
    let mut process = ProcessHandle::spawn(&options(&["sleep", "30"])).unwrap();
    let reader = process.take_reader().unwrap();
    assert!(process.is_alive());
    assert!(process.exit_value().is_none());

    process.resize(WinSize::new(132, 43)).unwrap();
    assert_eq!(process.window_size().unwrap(), WinSize::new(132, 43));

    process.destroy(false).unwrap();
    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(128 + 15));
    read_all(reader);

    // Already exited: no-op
    process.destroy(true).unwrap();
}

#[test]
fn test_force_destroy() {
    let process = ProcessHandle::spawn(&options(&["sleep", "30"])).unwrap();
    process.destroy(true).unwrap();
    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(128 + 9));
}

#[test]
fn test_close_ends_reader_and_ignores_resize() {
    let mut process = ProcessHandle::spawn(&options(&["sleep", "30"])).unwrap();
    let reader = process.take_reader().unwrap();

    process.close();
    read_all(reader);
    process.resize(WinSize::new(90, 30)).unwrap();

    process.destroy(true).unwrap();
    process.wait_for_timeout(TIMEOUT).unwrap();
}

/// Read until `needle` shows up, so the child is known to be on the PTY
fn read_until(reader: &mut ProcessReader, needle: &str) {
    let mut output = Vec::new();
    let mut buf = [0u8; 256];
    while !String::from_utf8_lossy(&output).contains(needle) {
        let n = reader.read(&mut buf).unwrap();
        assert!(n > 0, "end-of-stream before {:?}: {:?}", needle, output);
        output.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_close_hangs_up_child_while_writer_is_held() {
    let opts = options(&["sh", "-c", "echo ready; exec sleep 30"]);
    let mut process = ProcessHandle::spawn(&opts).unwrap();
    let mut writer = process.take_writer().unwrap();
    let mut reader = process.take_reader().unwrap();
    read_until(&mut reader, "ready");

    process.close();

    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(128 + 1));
    let err = writer.write_all(b"after close\n").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}

#[test]
fn test_close_hangs_up_child_without_taken_streams() {
    let opts = options(&["sh", "-c", "echo ready; exec sleep 30"]);
    let mut process = ProcessHandle::spawn(&opts).unwrap();
    let mut reader = process.take_reader().unwrap();
    read_until(&mut reader, "ready");
    drop(reader);

    process.close();

    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(128 + 1));
}

#[test]
fn test_console_mode_separates_stderr() {
    let opts = options(&["sh", "-c", "echo to-out; echo to-err >&2"])
        .console_mode(true)
        .redirect_error_stream(false);
    let mut process = ProcessHandle::spawn(&opts).unwrap();
    assert!(process.is_console_mode());

    let out = read_all(process.take_reader().unwrap());
    let err = read_all(process.take_error_reader().unwrap());
    assert!(out.contains("to-out") && !out.contains("to-err"), "out: {:?}", out);
    assert!(err.contains("to-err"), "err: {:?}", err);
    assert_eq!(process.wait_for_timeout(TIMEOUT), Some(0));
}

#[test]
fn test_merged_stderr_has_empty_error_stream() {
    let mut process = ProcessHandle::spawn(&options(&["sh", "-c", "echo oops >&2"])).unwrap();
    let out = read_all(process.take_reader().unwrap());
    let err = read_all(process.take_error_reader().unwrap());
    assert!(out.contains("oops"), "out: {:?}", out);
    assert!(err.is_empty());
}

#[test]
fn test_exec_failure_exits_127() {
    let (output, code) = run(&options(&["ptybridge-no-such-program"]));
    assert_eq!(code, 127);
    assert!(output.contains("ptybridge-no-such-program"), "output: {:?}", output);
}

#[test]
fn test_enter_key_code() {
    let process = ProcessHandle::spawn(&options(&["true"])).unwrap();
    assert_eq!(process.enter_key_code(), b'\r');
    assert!(process.pid() > 0);
    process.wait_for_timeout(TIMEOUT).unwrap();
}
