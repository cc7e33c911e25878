//! Input/output path resolution against the trusted root
//!
//! User-supplied relative paths are joined onto the canonical trusted root and
//! checked by string prefix on normalized separators. Any `..` segment is
//! rejected outright, so a resolved path can never climb out of the root.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CompileKitError, Result};
use crate::fsutil;

/// Extensions accepted for both input and output stylesheets
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["css"];

/// Characters stripped from the front of user-supplied relative paths
const LEADING_JUNK: &[char] = &['/', '\\', ' ', '\t', '\n', '\r', '\0', '\x0B'];

/// One compile's worth of configured paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub input_path: String,
    pub output_path: String,
    pub trusted_root: PathBuf,
}

/// Absolute paths handed to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub input_absolute: PathBuf,
    pub output_absolute: PathBuf,
    pub working_directory: PathBuf,
}

/// Validates configured paths and prepares the output directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    allowed_extensions: Vec<String>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_EXTENSIONS)
    }
}

impl PathResolver {
    pub fn new(allowed_extensions: &[&str]) -> Self {
        PathResolver {
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn resolve_request(&self, request: &CompileRequest) -> Result<ResolvedPaths> {
        self.resolve(
            &request.input_path,
            &request.output_path,
            &request.trusted_root,
        )
    }

    /// Resolve `input_rel` and `output_rel` under `trusted_root`.
    ///
    /// The only side effect is creating the output's parent directory.
    pub fn resolve(
        &self,
        input_rel: &str,
        output_rel: &str,
        trusted_root: &Path,
    ) -> Result<ResolvedPaths> {
        let input_rel = input_rel.trim();
        let output_rel = output_rel.trim();

        if input_rel.is_empty() || output_rel.is_empty() {
            return Err(CompileKitError::Config(
                "Input/Output CSS paths must be set.".to_string(),
            ));
        }

        for (label, rel) in [("Input", input_rel), ("Output", output_rel)] {
            if has_parent_segment(rel) {
                return Err(CompileKitError::Security(format!(
                    "{label} CSS path must not contain '..' segments."
                )));
            }
            if !self.has_allowed_extension(rel) {
                return Err(CompileKitError::Config(format!(
                    "{label} file must be a {} file.",
                    self.extension_list()
                )));
            }
        }

        let root_real = trusted_root.canonicalize().map_err(|e| {
            CompileKitError::Environment(format!(
                "Failed to resolve trusted root {}: {e}",
                trusted_root.display()
            ))
        })?;
        let root_prefix = with_trailing_slash(&normalize(&root_real.to_string_lossy()));

        let input_rel = input_rel.trim_start_matches(LEADING_JUNK);
        let output_rel = output_rel.trim_start_matches(LEADING_JUNK);

        let input_joined = normalize(&format!("{root_prefix}{input_rel}"));
        let output_abs = normalize(&format!("{root_prefix}{output_rel}"));

        // Input: must exist and canonicalize inside the root.
        let input_real = Path::new(&input_joined)
            .canonicalize()
            .map_err(|_| CompileKitError::NotFound("Input CSS file does not exist.".to_string()))?;
        let input_norm = normalize(&input_real.to_string_lossy());

        if !input_norm.starts_with(&root_prefix) {
            return Err(CompileKitError::Security(
                "Input CSS path must be inside the trusted root directory.".to_string(),
            ));
        }
        if !fsutil::is_readable_file(&input_real) {
            return Err(CompileKitError::NotFound(
                "Input CSS path is not a readable file.".to_string(),
            ));
        }

        // Output: may not exist yet, literal prefix check on the joined form.
        if !output_abs.starts_with(&root_prefix) {
            return Err(CompileKitError::Security(
                "Output CSS path must be inside the trusted root directory.".to_string(),
            ));
        }

        let output_path = PathBuf::from(&output_abs);
        let output_dir = output_path.parent().ok_or_else(|| {
            CompileKitError::Config("Output CSS path has no parent directory.".to_string())
        })?;
        fsutil::ensure_writable_dir(output_dir, "output directory")?;

        // A symlinked parent or an existing symlinked file could still point away.
        for existing in [output_dir, output_path.as_path()] {
            if let Ok(real) = existing.canonicalize() {
                let real_norm = with_trailing_slash(&normalize(&real.to_string_lossy()));
                if !real_norm.starts_with(&root_prefix) {
                    return Err(CompileKitError::Security(
                        "Output CSS path must be inside the trusted root directory.".to_string(),
                    ));
                }
            }
        }

        let resolved = ResolvedPaths {
            input_absolute: PathBuf::from(input_norm),
            output_absolute: output_path,
            working_directory: PathBuf::from(root_prefix.trim_end_matches('/')),
        };
        debug!("Resolved compile paths: {:?}", resolved);
        Ok(resolved)
    }

    fn has_allowed_extension(&self, rel: &str) -> bool {
        Path::new(rel)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            })
            .unwrap_or(false)
    }

    fn extension_list(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

fn has_parent_segment(rel: &str) -> bool {
    rel.split(['/', '\\']).any(|segment| segment.trim() == "..")
}

/// Forward slashes only, no repeated separators.
///
/// A leading `//` is kept so UNC roots survive.
fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let (head, rest) = if let Some(stripped) = unified.strip_prefix("//") {
        ("//", stripped)
    } else {
        ("", unified.as_str())
    };

    let mut out = String::with_capacity(unified.len());
    out.push_str(head);
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}
