//! Terminal window size

use std::fmt;

#[cfg(unix)]
use nix::libc;
use serde::{Deserialize, Serialize};

/// Window size in character cells
///
/// Resizing always produces a new value; a `WinSize` is never mutated in
/// place once handed to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WinSize {
    /// Number of columns (characters)
    pub columns: u16,
    /// Number of rows (characters)
    pub rows: u16,
}

impl WinSize {
    /// Columns used when the caller asks for a size but leaves the width out
    pub const DEFAULT_COLUMNS: u16 = 80;
    /// Rows used when the caller asks for a size but leaves the height out
    pub const DEFAULT_ROWS: u16 = 25;

    /// Create a new window size
    pub const fn new(columns: u16, rows: u16) -> Self {
        Self { columns, rows }
    }

    /// Build the initial size from optional caller-supplied dimensions
    ///
    /// Returns `None` when neither dimension was requested.
    pub fn from_requested(columns: Option<u16>, rows: Option<u16>) -> Option<Self> {
        if columns.is_none() && rows.is_none() {
            return None;
        }
        Some(Self::new(
            columns.unwrap_or(Self::DEFAULT_COLUMNS),
            rows.unwrap_or(Self::DEFAULT_ROWS),
        ))
    }

    /// Convert to libc winsize structure
    #[cfg(unix)]
    pub fn to_winsize(self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

impl Default for WinSize {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COLUMNS, Self::DEFAULT_ROWS)
    }
}

impl fmt::Display for WinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "columns={}, rows={}", self.columns, self.rows)
    }
}

#[cfg(unix)]
impl From<libc::winsize> for WinSize {
    fn from(ws: libc::winsize) -> Self {
        Self::new(ws.ws_col, ws.ws_row)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_default_size() {
        let size = WinSize::default();
        assert_eq!(size.columns, 80);
        assert_eq!(size.rows, 25);
    }

    #[test]
    fn test_from_requested() {
        assert_eq!(WinSize::from_requested(None, None), None);
        assert_eq!(WinSize::from_requested(Some(120), None), Some(WinSize::new(120, 25)));
        assert_eq!(WinSize::from_requested(None, Some(40)), Some(WinSize::new(80, 40)));
    }

    #[test]
    fn test_equality_and_hash_by_dimensions() {
        let mut set = HashSet::new();
        set.insert(WinSize::new(80, 24));
        set.insert(WinSize::new(80, 24));
        set.insert(WinSize::new(24, 80));
        assert_eq!(set.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_to_winsize() {
        let ws = WinSize::new(132, 43).to_winsize();
        assert_eq!(ws.ws_col, 132);
        assert_eq!(ws.ws_row, 43);
        assert_eq!(WinSize::from(ws), WinSize::new(132, 43));
    }
}
