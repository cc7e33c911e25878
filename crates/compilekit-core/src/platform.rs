//! Host OS / architecture detection and release asset naming.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OsFamily {
    Linux,
    Darwin,
    Windows,
    Other,
}

/// C library flavor on Linux
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Libc {
    Glibc,
    Musl,
}

/// CPU architecture, as far as release assets care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
    Other,
}

impl Arch {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Self::X64,
            "aarch64" | "arm64" => Self::Arm64,
            _ => Self::Other,
        }
    }
}

/// Host platform description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: OsFamily,
    pub arch: Arch,
    /// Only set on Linux
    pub libc: Option<Libc>,
}

impl Platform {
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::Darwin,
            "windows" => OsFamily::Windows,
            _ => OsFamily::Other,
        };
        let libc = (os == OsFamily::Linux).then(|| detect_linux_libc(Path::new("/")));
        Platform {
            os,
            arch: Arch::from_name(std::env::consts::ARCH),
            libc,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsFamily::Windows
    }

    /// Upstream release asset for this platform, e.g. `tailwindcss-linux-x64`.
    pub fn standalone_asset_name(&self) -> Option<&'static str> {
        let musl = self.libc == Some(Libc::Musl);
        match (self.os, self.arch) {
            (OsFamily::Darwin, Arch::Arm64) => Some("tailwindcss-macos-arm64"),
            (OsFamily::Darwin, _) => Some("tailwindcss-macos-x64"),
            (OsFamily::Linux, Arch::Arm64) if musl => Some("tailwindcss-linux-arm64-musl"),
            (OsFamily::Linux, Arch::Arm64) => Some("tailwindcss-linux-arm64"),
            (OsFamily::Linux, _) if musl => Some("tailwindcss-linux-x64-musl"),
            (OsFamily::Linux, _) => Some("tailwindcss-linux-x64"),
            (OsFamily::Windows, _) => Some("tailwindcss-windows-x64.exe"),
            (OsFamily::Other, _) => None,
        }
    }

    /// Directories commonly holding node/npm that minimal host PATHs omit.
    pub fn default_search_dirs(&self) -> Vec<PathBuf> {
        let dirs: &[&str] = match self.os {
            OsFamily::Darwin => &["/usr/local/bin", "/opt/homebrew/bin", "/usr/bin", "/bin"],
            OsFamily::Linux => &["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"],
            OsFamily::Windows | OsFamily::Other => &[],
        };
        dirs.iter().map(PathBuf::from).collect()
    }
}

/// musl if the root carries Alpine's marker or a musl dynamic loader.
fn detect_linux_libc(root: &Path) -> Libc {
    if root.join("etc/alpine-release").exists() {
        return Libc::Musl;
    }
    let has_musl_loader = std::fs::read_dir(root.join("lib"))
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("ld-musl-") && name.ends_with(".so.1")
            })
        })
        .unwrap_or(false);
    if has_musl_loader {
        Libc::Musl
    } else {
        Libc::Glibc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn platform(os: OsFamily, arch: Arch, libc: Option<Libc>) -> Platform {
        Platform { os, arch, libc }
    }

    #[test]
    fn test_asset_names() {
        assert_eq!(
            platform(OsFamily::Darwin, Arch::Arm64, None).standalone_asset_name(),
            Some("tailwindcss-macos-arm64")
        );
        assert_eq!(
            platform(OsFamily::Linux, Arch::X64, Some(Libc::Glibc)).standalone_asset_name(),
            Some("tailwindcss-linux-x64")
        );
        assert_eq!(
            platform(OsFamily::Linux, Arch::Arm64, Some(Libc::Musl)).standalone_asset_name(),
            Some("tailwindcss-linux-arm64-musl")
        );
        assert_eq!(
            platform(OsFamily::Windows, Arch::X64, None).standalone_asset_name(),
            Some("tailwindcss-windows-x64.exe")
        );
        assert_eq!(
            platform(OsFamily::Other, Arch::X64, None).standalone_asset_name(),
            None
        );
    }

    #[test]
    fn test_arch_aliases() {
        assert_eq!(Arch::from_name("AMD64"), Arch::X64);
        assert_eq!(Arch::from_name("aarch64"), Arch::Arm64);
        assert_eq!(Arch::from_name("riscv64"), Arch::Other);
    }

    #[test]
    fn test_libc_detection() {
        let root = tempdir().unwrap();
        assert_eq!(detect_linux_libc(root.path()), Libc::Glibc);

        std::fs::create_dir_all(root.path().join("lib")).unwrap();
        std::fs::write(root.path().join("lib/ld-musl-x86_64.so.1"), "").unwrap();
        assert_eq!(detect_linux_libc(root.path()), Libc::Musl);

        let alpine = tempdir().unwrap();
        std::fs::create_dir_all(alpine.path().join("etc")).unwrap();
        std::fs::write(alpine.path().join("etc/alpine-release"), "3.19").unwrap();
        assert_eq!(detect_linux_libc(alpine.path()), Libc::Musl);
    }

    #[test]
    fn test_search_dirs_per_family() {
        let linux = platform(OsFamily::Linux, Arch::X64, Some(Libc::Glibc));
        assert!(linux.default_search_dirs().contains(&PathBuf::from("/usr/local/bin")));

        let mac = platform(OsFamily::Darwin, Arch::Arm64, None);
        assert!(mac.default_search_dirs().contains(&PathBuf::from("/opt/homebrew/bin")));

        let win = platform(OsFamily::Windows, Arch::X64, None);
        assert!(win.default_search_dirs().is_empty());
    }
}
