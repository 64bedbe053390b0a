// Route files: discovery and loading of JSON destination lists

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::AppResult;
use crate::routes::dispatcher::Batch;

/// Find every `.json` file under `dir`, recursively, sorted by path.
///
/// Returns `None` when `dir` does not exist. Symlinks are not followed, so a
/// link back into the tree cannot list the same file twice.
pub fn discover(dir: &Path) -> AppResult<Option<Vec<PathBuf>>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::from)?;
        let is_json = entry.path().extension().is_some_and(|ext| ext == "json");
        if is_json && entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(Some(files))
}

/// Read one route file: a JSON array of destination strings.
pub fn load(path: &Path) -> AppResult<Batch> {
    let data = fs::read_to_string(path)?;
    let destinations: Vec<String> = serde_json::from_str(&data)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Batch { name, destinations })
}
