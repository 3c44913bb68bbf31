//! Filesystem utilities

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Remove a directory with all its contents (if present) and create it empty
pub fn recreate_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        fs::remove_dir_all(path)?;
        info!("Removed directory: {}", path.display());
    }
    fs::create_dir_all(path)
}

/// Files in `dir` (not recursive) with the given extension, sorted case-insensitively
pub fn list_files_with_extension(dir: impl AsRef<Path>, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recreate_dir_clears_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("overview");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stale.csv"), "old").unwrap();

        recreate_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_list_files_sorted_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.parquet", "A.parquet", "c.txt", "a2.PARQUET"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir(tmp.path().join("d.parquet")).unwrap();

        let names: Vec<String> = list_files_with_extension(tmp.path(), "parquet")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["A.parquet", "a2.PARQUET", "b.parquet"]);
    }
}
