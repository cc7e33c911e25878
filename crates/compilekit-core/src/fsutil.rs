//! Filesystem helpers shared by the path resolver and the installer.

use std::path::Path;
use std::time::SystemTime;

use crate::error::{CompileKitError, Result};

/// Create `dir` (recursively) and confirm files can be written into it.
///
/// Writability is probed by creating and dropping a temporary file, which
/// reflects ACLs and read-only mounts rather than just mode bits.
pub fn ensure_writable_dir(dir: &Path, what: &str) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        CompileKitError::Io(format!("Failed to create {what} {}: {e}", dir.display()))
    })?;

    if !dir.is_dir() {
        return Err(CompileKitError::Io(format!(
            "{} {} is not a directory",
            capitalize(what),
            dir.display()
        )));
    }

    tempfile::Builder::new()
        .prefix(".compilekit-probe")
        .tempfile_in(dir)
        .map(drop)
        .map_err(|e| {
            CompileKitError::Io(format!(
                "{} {} is not writable. Check permissions. ({e})",
                capitalize(what),
                dir.display()
            ))
        })
}

/// Size and modification time of a file, if it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileSnapshot {
    pub fn take(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(FileSnapshot {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// A regular, readable file with at least one byte.
pub fn is_non_empty_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0 && std::fs::File::open(path).is_ok(),
        Err(_) => false,
    }
}

/// A regular file that can be opened for reading.
pub fn is_readable_file(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

/// Give `path` mode 0755 unless it is already executable by everyone.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o111 != 0 {
        return Ok(());
    }
    let mode = (mode & 0o7777) | 0o100;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        CompileKitError::Io(format!(
            "Failed to make {} executable: {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_writable_dir_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");

        ensure_writable_dir(&nested, "output directory").unwrap();
        assert!(nested.is_dir());
        // probe file must not be left behind
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_writable_dir_rejects_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("taken");
        std::fs::write(&file, "x").unwrap();

        let err = ensure_writable_dir(&file, "output directory").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_snapshot_missing_file() {
        let dir = tempdir().unwrap();
        assert!(FileSnapshot::take(&dir.path().join("missing.css")).is_none());
    }

    #[test]
    fn test_non_empty_file() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.css");
        let full = dir.path().join("full.css");
        std::fs::write(&empty, "").unwrap();
        std::fs::write(&full, "a{}").unwrap();

        assert!(!is_non_empty_file(&empty));
        assert!(is_non_empty_file(&full));
        assert!(!is_non_empty_file(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("tailwindcli");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o744);
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable_keeps_existing_exec_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        for original in [0o700, 0o750, 0o755] {
            let path = dir.path().join(format!("tailwindcli-{original:o}"));
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(original)).unwrap();

            make_executable(&path).unwrap();
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, original);
        }
    }
}
