use std::path::{Path, PathBuf};

use crate::error::Result;

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the documents root directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// File size in bytes.
    pub size: u64,
}

impl DiscoveredFile {
    /// The bare file name, e.g. `manual.pdf`.
    pub fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Supported file extensions for document discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions (.pdf, .docx).
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &entry.path(), results)?;
        } else if file_type.is_symlink() {
            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Directory symlinks pointing back into the root would loop.
            if resolved.starts_with(root) && resolved.is_dir() {
                continue;
            }
            if resolved.is_file() && is_supported(&resolved) {
                results.push(make_discovered(root, &entry.path(), &resolved)?);
            }
        } else if file_type.is_file() && is_supported(&entry.path()) {
            let abs = entry.path().canonicalize()?;
            results.push(make_discovered(root, &entry.path(), &abs)?);
        }
    }

    Ok(())
}

/// Whether `path` carries one of the supported document extensions.
///
/// Matching is case-sensitive, like the upload check.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    let size = std::fs::metadata(absolute_path)?.len();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        size,
    })
}
