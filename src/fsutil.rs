//! Filesystem helpers used around command execution.
//!
//! Directory walks return entries in lexical order. Symbolic links are
//! reported as files and never followed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};

use crate::error::SupervisorError;
use crate::Result;

/// Directories and files found by [`walk_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    /// Directories, starting with the root itself.
    pub dirs: Vec<PathBuf>,
    /// Non-directory entries.
    pub files: Vec<PathBuf>,
}

/// Walk the tree below `root`.
///
/// Directories whose name is in `exclude` are skipped along with their
/// contents. If `max_depth` is non-zero, directories more than
/// `max_depth` levels below `root` are not entered.
pub fn walk_tree(root: &Path, exclude: &[&str], max_depth: usize) -> Result<TreeListing> {
    let mut listing = TreeListing::default();

    let meta = fs::symlink_metadata(root)?;
    if !meta.is_dir() {
        listing.files.push(root.to_path_buf());
        return Ok(listing);
    }
    if is_excluded(root, exclude) {
        return Ok(listing);
    }

    walk_dir(root, 0, exclude, max_depth, &mut listing)?;
    Ok(listing)
}

fn walk_dir(
    dir: &Path,
    depth: usize,
    exclude: &[&str],
    max_depth: usize,
    listing: &mut TreeListing,
) -> Result<()> {
    listing.dirs.push(dir.to_path_buf());

    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !entry.file_type()?.is_dir() {
            listing.files.push(path);
            continue;
        }
        if max_depth > 0 && depth + 1 > max_depth {
            continue;
        }
        if is_excluded(&path, exclude) {
            debug!(path = %path.display(), "skipping excluded directory");
            continue;
        }
        walk_dir(&path, depth + 1, exclude, max_depth, listing)?;
    }

    Ok(())
}

fn is_excluded(path: &Path, exclude: &[&str]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| exclude.contains(&name))
}

fn matching(paths: Vec<PathBuf>, name_glob: &str) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(name_glob)?;
    Ok(paths
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| pattern.matches(name))
        })
        .collect())
}

/// Find directories below `root` whose name matches `name_glob`.
pub fn find_dirs(
    root: &Path,
    name_glob: &str,
    max_depth: usize,
    exclude: &[&str],
) -> Result<Vec<PathBuf>> {
    matching(walk_tree(root, exclude, max_depth)?.dirs, name_glob)
}

/// Find files below `root` whose name matches `name_glob`.
pub fn find_files(
    root: &Path,
    name_glob: &str,
    max_depth: usize,
    exclude: &[&str],
) -> Result<Vec<PathBuf>> {
    matching(walk_tree(root, exclude, max_depth)?.files, name_glob)
}

/// Delete files found by [`find_files`]. Returns how many were removed;
/// files that cannot be removed are logged and skipped.
pub fn remove_files(
    root: &Path,
    name_glob: &str,
    max_depth: usize,
    exclude: &[&str],
) -> Result<usize> {
    let files = find_files(root, name_glob, max_depth, exclude)?;
    debug!(count = files.len(), pattern = name_glob, "removing files");

    let mut removed = 0;
    for file in files {
        match fs::remove_file(&file) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %file.display(), error = %e, "failed to remove file"),
        }
    }
    Ok(removed)
}

/// Total size in bytes of all files below `root`, skipping excluded
/// directories.
pub fn dir_tree_size(root: &Path, exclude: &[&str]) -> Result<u64> {
    let listing = walk_tree(root, exclude, 0)?;
    let mut total = 0;
    for file in &listing.files {
        total += fs::symlink_metadata(file)?.len();
    }
    Ok(total)
}

/// Number of directory levels between `root` and `path`.
///
/// Equal paths are 0 levels apart. For a file the depth of its parent
/// directory is used. Fails if `path` is not below `root`.
pub fn dir_depth(root: &Path, path: &Path) -> Result<usize> {
    let root = absolute(root)?;
    let path = absolute(path)?;

    if root == path {
        return Ok(0);
    }
    if !path.starts_with(&root) {
        return Err(SupervisorError::NotUnderRoot { root, path });
    }

    let dir = if fs::metadata(&path)?.is_dir() {
        path.as_path()
    } else {
        path.parent().unwrap_or(root.as_path())
    };

    Ok(dir
        .strip_prefix(&root)
        .map(|rel| rel.components().count())
        .unwrap_or(0))
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined;
    let path = if path.is_absolute() {
        path
    } else {
        joined = std::env::current_dir()?.join(path);
        &joined
    };

    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            // `..` at the root stays at the root
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    Ok(clean)
}
