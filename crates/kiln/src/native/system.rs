//! Libraries every host of the target OS provides
//!
//! A library belongs here only if it is universally distributed by the OS and
//! every binary for the target links against it by default. Bundling these
//! breaks more than it fixes (glibc, the dynamic loader, kernel32).

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

static LINUX_SYSTEM_LIBRARIES: &[&str] = &[
    r"^ld-linux.*\.so(\.\d+)*$",
    r"^ld64\.so(\.\d+)*$",
    r"^linux-vdso\.so(\.\d+)*$",
    r"^lib(c|m|dl|rt|pthread|util|resolv|nsl|crypt|anl)\.so(\.\d+)*$",
    r"^libgcc_s\.so(\.\d+)*$",
    r"^libstdc\+\+\.so(\.\d+)*$",
];

static MACOS_SYSTEM_LIBRARIES: &[&str] = &[
    r"^/usr/lib/.*",
    r"^/System/Library/.*",
    r"^libSystem\..*\.dylib$",
    r"^libc\+\+\..*\.dylib$",
    r"^libobjc\..*\.dylib$",
];

static WINDOWS_SYSTEM_LIBRARIES: &[&str] = &[
    r"(?i)^api-ms-win-.*\.dll$",
    r"(?i)^ext-ms-.*\.dll$",
    r"(?i)^(kernel32|kernelbase|user32|gdi32|advapi32|shell32|ole32|oleaut32|ws2_32|ntdll|msvcrt|comctl32|comdlg32|crypt32|bcrypt|secur32|shlwapi|version|winmm|imm32|rpcrt4|setupapi|userenv|iphlpapi|dbghelp|psapi|winspool\.drv)(\.dll)?$",
    r"(?i)^ucrtbase\.dll$",
];

static DEFAULT_SYSTEM_LIBRARIES: Lazy<RegexSet> = Lazy::new(|| {
    let patterns = LINUX_SYSTEM_LIBRARIES
        .iter()
        .chain(MACOS_SYSTEM_LIBRARIES)
        .chain(WINDOWS_SYSTEM_LIBRARIES);
    RegexSet::new(patterns).unwrap_or_else(|_| RegexSet::empty())
});

/// Decides which needed libraries are left to the host
#[derive(Debug, Clone, Default)]
pub struct SystemLibraries {
    extra: Vec<Regex>,
    bundle_everything: bool,
}

impl SystemLibraries {
    /// Build from configured extra patterns
    ///
    /// Invalid extra patterns are returned as an error naming the pattern.
    pub fn new(extra_patterns: &[String], bundle_everything: bool) -> Result<Self, String> {
        let extra = extra_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|err| format!("invalid system library pattern '{pattern}': {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            extra,
            bundle_everything,
        })
    }

    /// Whether a needed library name should be skipped
    pub fn is_system_library(&self, needed: &str) -> bool {
        if self.bundle_everything {
            return false;
        }
        DEFAULT_SYSTEM_LIBRARIES.is_match(needed)
            || self.extra.iter().any(|regex| regex.is_match(needed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_system_libraries() {
        let system = SystemLibraries::default();
        for name in [
            "libc.so.6",
            "libm.so.6",
            "libpthread.so.0",
            "ld-linux-x86-64.so.2",
            "libstdc++.so.6",
            "/usr/lib/libSystem.B.dylib",
            "KERNEL32.dll",
            "api-ms-win-crt-runtime-l1-1-0.dll",
        ] {
            assert!(system.is_system_library(name), "{name} should be skipped");
        }
        for name in [
            "libtorrent-rasterbar.so.2.0",
            "libssl.so.3",
            "libcrypto-3-x64.dll",
            "@rpath/QtCore.framework/Versions/A/QtCore",
            "libcurl.so.4",
        ] {
            assert!(!system.is_system_library(name), "{name} should be bundled");
        }
    }

    #[test]
    fn test_extra_patterns_and_override() -> Result<(), String> {
        let system = SystemLibraries::new(&[r"^libGL\.so".to_owned()], false)?;
        assert!(system.is_system_library("libGL.so.1"));

        let everything = SystemLibraries::new(&[], true)?;
        assert!(!everything.is_system_library("libc.so.6"));

        assert!(SystemLibraries::new(&["(".to_owned()], false).is_err());
        Ok(())
    }
}
