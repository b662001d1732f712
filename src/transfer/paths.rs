//! Local path checks run before a transfer is accepted

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::TransferError;

/// A local file or directory selected for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute local path
    pub path: PathBuf,
    /// Path components relative to the selected root, root name first
    pub rel_path: Vec<String>,
    /// True for directory entries (sent without content)
    pub is_dir: bool,
}

impl SourceFile {
    /// Name of the selected root this entry belongs to
    pub fn root_name(&self) -> &str {
        self.rel_path.first().map(String::as_str).unwrap_or_default()
    }

    /// Relative path joined with `/`
    pub fn display_name(&self) -> String {
        self.rel_path.join("/")
    }
}

/// Verify `path` is an existing, writable directory
pub fn check_path_writable(path: &Path) -> Result<(), TransferError> {
    let metadata = fs::metadata(path)
        .map_err(|_| TransferError::Path(format!("No such directory: {}", path.display())))?;
    if !metadata.is_dir() {
        return Err(TransferError::Path(format!(
            "Not a directory: {}",
            path.display()
        )));
    }
    if metadata.permissions().readonly() {
        return Err(TransferError::Path(format!(
            "No permission to write: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Verify every path is readable and expand directories into entries
///
/// Directories are only accepted when `directory` is true.
pub fn check_paths_readable(
    paths: &[PathBuf],
    directory: bool,
) -> Result<Vec<SourceFile>, TransferError> {
    let mut files = Vec::new();
    for path in paths {
        let metadata = fs::metadata(path)
            .map_err(|_| TransferError::Path(format!("No such file: {}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::Path(format!("Invalid path: {}", path.display())))?;

        if metadata.is_dir() {
            if !directory {
                return Err(TransferError::Path(format!(
                    "Is a directory: {}",
                    path.display()
                )));
            }
            collect_dir(path, &mut files)?;
        } else {
            fs::File::open(path).map_err(|_| {
                TransferError::Path(format!("No permission to read: {}", path.display()))
            })?;
            files.push(SourceFile {
                path: path.clone(),
                rel_path: vec![name],
                is_dir: false,
            });
        }
    }
    Ok(files)
}

/// Walk `root` into entries named relative to its parent, directories first
fn collect_dir(root: &Path, files: &mut Vec<SourceFile>) -> Result<(), TransferError> {
    let parent = root.parent().unwrap_or(root);
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root);
            TransferError::Path(format!("No permission to read: {}", path.display()))
        })?;
        let rel_path: Vec<String> = entry
            .path()
            .strip_prefix(parent)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let is_dir = entry.file_type().is_dir();
        if !is_dir {
            fs::File::open(entry.path()).map_err(|_| {
                TransferError::Path(format!(
                    "No permission to read: {}",
                    entry.path().display()
                ))
            })?;
        }
        files.push(SourceFile {
            path: entry.into_path(),
            rel_path,
            is_dir,
        });
    }
    Ok(())
}

/// Fail if two selected roots share a base name
pub fn check_duplicate_names(files: &[SourceFile]) -> Result<(), TransferError> {
    let mut seen = HashSet::new();
    for file in files.iter().filter(|f| f.rel_path.len() == 1) {
        if !seen.insert(file.root_name()) {
            return Err(TransferError::Path(format!(
                "Duplicate name: {}",
                file.root_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_check_path_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_path_writable(dir.path()).is_ok());

        let missing = dir.path().join("missing");
        assert!(matches!(
            check_path_writable(&missing),
            Err(TransferError::Path(_))
        ));

        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        assert!(check_path_writable(&file).is_err());
    }

    #[test]
    fn test_check_paths_readable_rejects_directory_in_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_paths_readable(&[dir.path().to_path_buf()], false).unwrap_err();
        assert!(err.to_string().starts_with("Is a directory"));
    }

    #[test]
    fn test_check_paths_readable_expands_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("README"), b"r").unwrap();
        fs::write(root.join("src/main.rs"), b"m").unwrap();

        let files = check_paths_readable(&[root.clone()], true).unwrap();
        let names: Vec<String> = files.iter().map(|f| f.display_name()).collect();
        assert_eq!(
            names,
            vec!["proj", "proj/README", "proj/src", "proj/src/main.rs"]
        );
        assert!(files[0].is_dir);
        assert!(!files[1].is_dir);
    }

    #[test]
    fn test_check_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/x.txt"), b"1").unwrap();
        fs::write(dir.path().join("b/x.txt"), b"2").unwrap();
        fs::write(dir.path().join("b/y.txt"), b"3").unwrap();

        let unique = check_paths_readable(
            &[dir.path().join("a/x.txt"), dir.path().join("b/y.txt")],
            false,
        )
        .unwrap();
        assert!(check_duplicate_names(&unique).is_ok());

        let dup = check_paths_readable(
            &[dir.path().join("a/x.txt"), dir.path().join("b/x.txt")],
            false,
        )
        .unwrap();
        assert_eq!(
            check_duplicate_names(&dup).unwrap_err().to_string(),
            "Duplicate name: x.txt"
        );
    }
}
