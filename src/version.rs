//! Windows version detection
//!
//! The build number is what decides whether the bundled pseudo-console
//! backend can run. `winver` shows e.g. "OS Build 19045.6216": 19045 is the
//! build number, 6216 the update revision.

use std::fmt;
use std::sync::OnceLock;

/// All Windows 11 build numbers are at least this
pub const WIN11_MIN_BUILD_NUMBER: u64 = 22000;

const NAME_PREFIX: &str = "windows";

/// Supplies the OS build number; `None` when it cannot be determined
pub trait BuildNumberSource: Send + Sync {
    fn build_number(&self) -> Option<u64>;
}

impl<F> BuildNumberSource for F
where
    F: Fn() -> Option<u64> + Send + Sync,
{
    fn build_number(&self) -> Option<u64> {
        self()
    }
}

/// Reads `CurrentBuildNumber` from the registry
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryBuildNumber;

impl BuildNumberSource for RegistryBuildNumber {
    #[cfg(windows)]
    fn build_number(&self) -> Option<u64> {
        match registry::read_build_number() {
            Ok(build) => Some(build),
            Err(e) => {
                tracing::warn!("Unrecognized Windows build number: {}", e);
                None
            },
        }
    }

    #[cfg(not(windows))]
    fn build_number(&self) -> Option<u64> {
        None
    }
}

/// OS identity plus a lazily fetched build number
pub struct WindowsVersion<S = RegistryBuildNumber> {
    os_name: Option<String>,
    os_version: Option<String>,
    source: S,
    build_number: OnceLock<Option<u64>>,
}

impl WindowsVersion<RegistryBuildNumber> {
    /// Describe the host OS
    ///
    /// The build number itself is only fetched when a comparison needs it.
    pub fn current() -> Self {
        #[cfg(windows)]
        {
            let (name, version) = registry::read_name_and_version();
            Self::new(name, version, RegistryBuildNumber)
        }
        #[cfg(not(windows))]
        {
            Self::new(Some(std::env::consts::OS.to_string()), None, RegistryBuildNumber)
        }
    }
}

impl<S: BuildNumberSource> WindowsVersion<S> {
    pub fn new(os_name: Option<String>, os_version: Option<String>, source: S) -> Self {
        Self {
            os_name,
            os_version,
            source,
            build_number: OnceLock::new(),
        }
    }

    /// Whether this is Windows with a build number of at least `build_number`
    ///
    /// Always false on other operating systems, and false when the build
    /// number cannot be determined.
    pub fn is_greater_than_or_equal_to(&self, build_number: u64) -> bool {
        if !self.is_windows() {
            return false;
        }
        if build_number <= WIN11_MIN_BUILD_NUMBER && self.is_windows_11_or_newer() {
            // Every Windows 11 build satisfies this, no lookup needed
            return true;
        }
        self.build_number()
            .is_some_and(|current| current >= build_number)
    }

    /// Whether the build number source has been consulted
    pub fn is_build_number_fetched(&self) -> bool {
        self.build_number.get().is_some()
    }

    fn build_number(&self) -> Option<u64> {
        *self.build_number.get_or_init(|| self.source.build_number())
    }

    fn is_windows(&self) -> bool {
        self.os_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().starts_with(NAME_PREFIX))
    }

    fn is_windows_11_or_newer(&self) -> bool {
        let Some(name) = self.os_name.as_deref() else {
            return false;
        };
        let name = name.to_lowercase();
        let generation = name
            .strip_prefix("windows ")
            .unwrap_or(&name)
            .parse::<i64>()
            .unwrap_or(-1);
        generation.max(self.major_version()) >= 11
    }

    fn major_version(&self) -> i64 {
        self.os_version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.parse().ok())
            .unwrap_or(-1)
    }
}

impl<S> fmt::Debug for WindowsVersion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build = match self.build_number.get() {
            Some(Some(build)) => build.to_string(),
            Some(None) => "unknown".to_string(),
            None => "N/A".to_string(),
        };
        write!(
            f,
            "(os name: {:?}, os version: {:?}, build number: {})",
            self.os_name, self.os_version, build
        )
    }
}

#[cfg(windows)]
mod registry {
    use std::io;

    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    const CURRENT_VERSION: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion";

    fn open() -> io::Result<RegKey> {
        RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(CURRENT_VERSION)
    }

    pub(super) fn read_build_number() -> io::Result<u64> {
        let build: String = open()?.get_value("CurrentBuildNumber")?;
        build
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub(super) fn read_name_and_version() -> (Option<String>, Option<String>) {
        let Ok(key) = open() else {
            return (Some("Windows".to_string()), None);
        };
        let name = key
            .get_value::<String, _>("ProductName")
            .unwrap_or_else(|_| "Windows".to_string());
        let major = key.get_value::<u32, _>("CurrentMajorVersionNumber").ok();
        let minor = key.get_value::<u32, _>("CurrentMinorVersionNumber").ok();
        let version = major.map(|major| format!("{}.{}", major, minor.unwrap_or(0)));
        (Some(name), version)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Fixed {
        build: Option<u64>,
        calls: Arc<AtomicUsize>,
    }

    impl BuildNumberSource for Fixed {
        fn build_number(&self) -> Option<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.build
        }
    }

    struct Case {
        version: WindowsVersion<Fixed>,
        calls: Arc<AtomicUsize>,
        expect_fetch: bool,
    }

    fn version(name: Option<&str>, os_version: Option<&str>, build: Option<u64>) -> Case {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Fixed {
            build,
            calls: Arc::clone(&calls),
        };
        Case {
            version: WindowsVersion::new(
                name.map(str::to_string),
                os_version.map(str::to_string),
                source,
            ),
            calls,
            expect_fetch: build.is_some(),
        }
    }

    impl Case {
        fn greater_or_equal(self, build: u64) {
            self.check(build, true);
        }

        fn less(self, build: u64) {
            self.check(build, false);
        }

        fn check(self, build: u64, expected: bool) {
            let actual = self.version.is_greater_than_or_equal_to(build);
            let fetched = self.calls.load(Ordering::SeqCst) > 0;
            assert_eq!(
                (actual, fetched),
                (expected, self.expect_fetch),
                "{:?}.is_greater_than_or_equal_to({})",
                self.version,
                build
            );
        }
    }

    #[test]
    fn test_compare_basic() {
        version(Some("Linux"), Some("6.8.0-1035-aws"), None).less(19041);

        version(Some("Windows 11"), Some("10.0"), None).greater_or_equal(19041);

        version(Some("Windows 10"), Some("10.0"), Some(19045)).greater_or_equal(19041);
        version(Some("Windows 10"), Some("10.0"), Some(19045)).greater_or_equal(19045);
        version(Some("Windows 10"), Some("10.0"), Some(19045)).less(22000);

        version(Some("Windows Server 2022"), Some("10.0"), Some(20348)).greater_or_equal(19041);
        version(Some("Windows Server 2022"), Some("10.0"), Some(20348)).greater_or_equal(20348);
        version(Some("Windows Server 2022"), Some("10.0"), Some(20348)).less(22000);

        version(Some("Windows Server 2019"), Some("10.0"), Some(17763)).less(19041);
        version(Some("Windows Server 2019"), Some("10.0"), Some(17763)).greater_or_equal(17763);
        version(Some("Windows Server 2019"), Some("10.0"), Some(17763)).greater_or_equal(14393);

        version(Some("Windows Server 2016"), Some("10.0"), Some(14393)).less(19041);
        version(Some("Windows Server 2016"), Some("10.0"), Some(14393)).greater_or_equal(10586);
    }

    #[test]
    fn test_compare_version_parsing() {
        version(None, Some("10.0"), None).less(19041);
        version(None, Some("11.0"), None).less(19041);
        version(None, None, None).less(19041);
        version(Some("Windows"), None, Some(18000)).less(19041);
        version(Some("Windows 11"), None, None).greater_or_equal(19041);
        version(Some("Windows  11"), None, Some(18000)).less(19041);

        version(Some("Windows "), Some("10.0"), Some(18000)).less(19041);
        version(Some("Windows "), Some("11.0"), None).greater_or_equal(19041);

        version(Some("Windows"), Some("11"), None).greater_or_equal(19041);
        version(Some("Windows"), Some("11.10"), None).greater_or_equal(19041);
        version(Some("Windows"), Some("11.10.12"), None).greater_or_equal(19041);

        version(Some("Windows"), Some("10"), Some(19045)).greater_or_equal(19041);
        version(Some("Windows"), Some("10.11.12"), Some(19045)).greater_or_equal(19041);

        version(Some("Windows X"), Some("10.0"), Some(18000)).less(19041);
        version(Some("Windows 11.a"), Some("10.0"), Some(18000)).less(19041);
        version(Some("Windows 11a"), Some("10.0"), Some(18000)).less(19041);
        version(Some("Windows 11.0"), Some("10.0"), Some(18000)).less(19041);
        version(Some("Windows 12"), Some("10.0"), None).greater_or_equal(19041);
    }

    #[test]
    fn test_windows_11_above_its_first_build_needs_lookup() {
        let case = version(Some("Windows 11"), Some("10.0"), None);
        assert!(!case.version.is_greater_than_or_equal_to(26100));
        assert!(case.version.is_build_number_fetched());
    }

    #[test]
    fn test_build_number_fetched_once() {
        let case = version(Some("Windows 10"), Some("10.0"), Some(19045));
        assert!(!case.version.is_build_number_fetched());
        assert!(case.version.is_greater_than_or_equal_to(19041));
        assert!(case.version.is_greater_than_or_equal_to(19045));
        assert!(!case.version.is_greater_than_or_equal_to(22000));
        assert!(case.version.is_build_number_fetched());
        assert_eq!(case.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_source() {
        let version = WindowsVersion::new(Some("Windows 10".to_string()), None, || Some(19045_u64));
        assert!(version.is_greater_than_or_equal_to(19041));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_current_host_is_not_windows() {
        let version = WindowsVersion::current();
        assert!(!version.is_greater_than_or_equal_to(0));
        assert!(!version.is_build_number_fetched());
    }
}
