//! Candidate stylesheet listing for choosing input/output paths.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{CompileKitError, Result};

/// Root-level stylesheet that is never offered as a candidate
const ROOT_STYLESHEET: &str = "style.css";

/// `.css` files under `root` as root-relative, forward-slash paths.
///
/// The root's own `style.css` is skipped. Results are sorted
/// case-insensitively.
pub fn discover_stylesheets(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(CompileKitError::NotFound(format!(
            "Theme directory not found: {}",
            root.display()
        )));
    }

    let mut found: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("css"))
        })
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .filter(|relative| relative != ROOT_STYLESHEET)
        .collect();

    found.sort_by_key(|path| path.to_lowercase());
    Ok(found)
}
