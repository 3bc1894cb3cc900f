// src/locate/mod.rs
use anyhow::{bail, Context, Result};
use glob::{glob_with, MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

/// CSV files directly inside `folder`, sorted by path. Does not recurse,
/// so an existing output subfolder is never picked up again.
pub fn find_csv_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }

    // folder names like "run [2]" must not be read as glob classes
    let pattern = format!("{}/*.csv", Pattern::escape(&folder.to_string_lossy()));
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut files: Vec<PathBuf> = glob_with(&pattern, options)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    debug!(folder = %folder.display(), count = files.len(), "located CSV files");
    Ok(files)
}
