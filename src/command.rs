//! Command representation and command-line quoting
//!
//! A command reaches the spawner either as one shell-style string or as an
//! already split argument list. Splitting follows the rules below; joining
//! uses the quoting convention of the Windows process loader
//! (`CommandLineToArgvW`), since that is the only consumer that re-splits a
//! joined command line.
//!
//! Splitting rules:
//! - leading/trailing whitespace is trimmed (unless empty tokens are kept)
//! - tokens are separated by whitespace
//! - a quoted region (`"a b"`) stays in one token, quotes are dropped
//! - `\"` inside or outside quotes produces a literal `"`
//! - any other backslash is literal

use std::fmt;
use std::iter;

/// Options for [`parse_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Keep quote characters (and the backslash of escaped quotes) in tokens
    pub keep_quotes: bool,
    /// Treat `'` as a quote character as well as `"`
    pub support_single_quotes: bool,
    /// Keep empty tokens produced by consecutive separators
    pub keep_empty_tokens: bool,
}

/// Split a command line with default options
pub fn parse(text: &str) -> Vec<String> {
    parse_with(text, ParseOptions::default())
}

/// Split a command line into tokens
pub fn parse_with(text: &str, options: ParseOptions) -> Vec<String> {
    let text = if options.keep_empty_tokens {
        text
    } else {
        text.trim_matches(|c: char| c <= ' ')
    };

    let mut tokens = Vec::new();
    if text.is_empty() {
        return tokens;
    }

    let is_quote = |c: char| c == '"' || (options.support_single_quotes && c == '\'');

    let mut token = String::with_capacity(128);
    let mut in_quotes = false;
    let mut escaped_quote = false;
    let mut current_quote = '\0';
    // A quoted region counts as content even when it is empty
    let mut non_empty = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let toggles = if in_quotes { ch == current_quote } else { is_quote(ch) };
        if toggles {
            if !escaped_quote {
                in_quotes = !in_quotes;
                current_quote = ch;
                non_empty = true;
                if !options.keep_quotes {
                    continue;
                }
            }
            escaped_quote = false;
        } else if ch.is_whitespace() {
            if !in_quotes {
                if options.keep_empty_tokens || !token.is_empty() || non_empty {
                    tokens.push(std::mem::take(&mut token));
                    non_empty = false;
                }
                continue;
            }
        } else if ch == '\\' {
            if let Some(&next) = chars.peek() {
                let escapes = if in_quotes { next == current_quote } else { is_quote(next) };
                if escapes {
                    escaped_quote = true;
                    if !options.keep_quotes {
                        continue;
                    }
                }
            }
        }

        token.push(ch);
    }

    if options.keep_empty_tokens || !token.is_empty() || non_empty {
        tokens.push(token);
    }

    tokens
}

/// Join tokens into one command line for the native process loader
pub fn join_command_line<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut line = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        append_quoted(token.as_ref(), &mut line);
    }
    line
}

fn append_quoted(arg: &str, out: &mut String) {
    if arg.is_empty() {
        out.push_str("\"\"");
        return;
    }
    if !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        out.push_str(arg);
        return;
    }

    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        if c == '\\' {
            backslashes += 1;
            continue;
        }
        // Backslashes are only special when they precede a quote
        let run = if c == '"' { backslashes * 2 + 1 } else { backslashes };
        out.extend(iter::repeat('\\').take(run));
        out.push(c);
        backslashes = 0;
    }
    // A trailing run goes after the closing quote, where it stays literal
    out.push('"');
    out.extend(iter::repeat('\\').take(backslashes));
}

/// A command to run, either as one string or as a list of arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A single shell-style command line
    Raw(String),
    /// An already split argument list
    List(Vec<String>),
}

impl Command {
    /// The command as an argument list
    pub fn to_argument_list(&self) -> Vec<String> {
        match self {
            Command::Raw(text) => parse(text),
            Command::List(args) => args.clone(),
        }
    }

    /// The command as a single command line
    ///
    /// A raw command is returned unchanged, so that whatever quoting the
    /// caller wrote reaches the process loader as-is.
    pub fn to_command_line(&self) -> String {
        match self {
            Command::Raw(text) => text.clone(),
            Command::List(args) => join_command_line(args),
        }
    }

    /// The program (first token), if any
    pub fn program(&self) -> Option<String> {
        self.to_argument_list().into_iter().next()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_line())
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::Raw(text.to_string())
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Command::Raw(text)
    }
}

impl From<Vec<String>> for Command {
    fn from(args: Vec<String>) -> Self {
        Command::List(args)
    }
}

impl From<&[&str]> for Command {
    fn from(args: &[&str]) -> Self {
        Command::List(args.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Command {
    fn from(args: [&str; N]) -> Self {
        Command::List(args.iter().map(|s| s.to_string()).collect())
    }
}
