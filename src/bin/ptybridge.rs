//! ptybridge - run a command in a pseudo-terminal
//!
//! Relays stdin to the child and the child's output to stdout, then exits
//! with the child's exit code.

use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::thread;

use ptybridge::{ProcessHandle, PtyProcessOptions};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Args {
    cols: Option<u16>,
    rows: Option<u16>,
    dir: Option<String>,
    command: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Option<Args>, String> {
    let mut parsed = Args {
        cols: None,
        rows: None,
        dir: None,
        command: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--cols" => {
                i += 1;
                let value = args.get(i).ok_or("--cols needs a value")?;
                parsed.cols = Some(value.parse().map_err(|_| format!("invalid column count: {}", value))?);
            },
            "-r" | "--rows" => {
                i += 1;
                let value = args.get(i).ok_or("--rows needs a value")?;
                parsed.rows = Some(value.parse().map_err(|_| format!("invalid row count: {}", value))?);
            },
            "-d" | "--dir" => {
                i += 1;
                parsed.dir = Some(args.get(i).ok_or("--dir needs a value")?.clone());
            },
            "-h" | "--help" => return Ok(None),
            "--" => {
                parsed.command = args[i + 1..].to_vec();
                break;
            },
            _ => {
                parsed.command = args[i..].to_vec();
                break;
            },
        }
        i += 1;
    }

    if parsed.command.is_empty() {
        return Err("no command given".to_string());
    }
    Ok(Some(parsed))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            return ExitCode::SUCCESS;
        },
        Err(msg) => {
            eprintln!("ptybridge: {}", msg);
            print_help();
            return ExitCode::from(2);
        },
    };

    let mut options = PtyProcessOptions::new(args.command.clone())
        .inherit_env()
        .env("TERM", "xterm-256color");
    if let Some(cols) = args.cols {
        options = options.initial_columns(cols);
    }
    if let Some(rows) = args.rows {
        options = options.initial_rows(rows);
    }
    if let Some(dir) = &args.dir {
        options = options.directory(dir);
    }

    let mut process = match ProcessHandle::spawn(&options) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to spawn {}: {}", args.command.join(" "), e);
            return ExitCode::FAILURE;
        },
    };
    tracing::info!("Spawned {:?}, pid {}", args.command, process.pid());

    if let Some(mut writer) = process.take_writer() {
        // Detached: blocks on stdin until it closes or the child goes away
        thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if writer.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    },
                }
            }
        });
    }

    if let Some(mut reader) = process.take_reader() {
        let mut stdout = io::stdout();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if stdout.write_all(&buf[..n]).and_then(|_| stdout.flush()).is_err() {
                        break;
                    }
                },
                Err(e) => {
                    tracing::debug!("Read error: {}", e);
                    break;
                },
            }
        }
    }

    let code = process.wait_for();
    tracing::info!("Child exited with code {}", code);
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_help() {
    println!("ptybridge - run a command attached to a pseudo-terminal");
    println!();
    println!("USAGE:");
    println!("    ptybridge [OPTIONS] [--] <command> [args...]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --cols <N>    Initial number of columns");
    println!("    -r, --rows <N>    Initial number of rows");
    println!("    -d, --dir <DIR>   Working directory");
    println!("    -h, --help        Show this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                            Log filter (default: info)");
    println!("    PTYBRIDGE_NATIVE_DIR                Directory holding pty-spawn-helper");
    println!("    PTYBRIDGE_DISABLE_BUNDLED_CONPTY    Use the system pseudo-console on Windows");
}
