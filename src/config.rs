//! Process-wide configuration read from the environment

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Set to `true` to never load the bundled `conpty.dll`
pub const DISABLE_BUNDLED_CONPTY_ENV: &str = "PTYBRIDGE_DISABLE_BUNDLED_CONPTY";

/// Directory holding locally built native files, used instead of the packaged ones
pub const NATIVE_DIR_ENV: &str = "PTYBRIDGE_NATIVE_DIR";

/// Environment overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Skip the bundled pseudo-console backend and always use the system one
    pub disable_bundled_conpty: bool,
    /// Resolve native files from this directory
    pub native_dir: Option<PathBuf>,
}

impl Config {
    /// Read the overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the overrides through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let disable_bundled_conpty = lookup(DISABLE_BUNDLED_CONPTY_ENV)
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        let native_dir = lookup(NATIVE_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            disable_bundled_conpty,
            native_dir,
        }
    }

    /// The configuration of this process, read once on first use
    pub fn global() -> &'static Config {
        static GLOBAL: OnceLock<Config> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Config::from_env();
            tracing::debug!(?config, "Loaded environment overrides");
            config
        })
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}
