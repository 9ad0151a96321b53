//! Filesystem helpers shared by the stages.
//!
//! Writes go through [`write_if_changed`] so that rebuilding an unchanged
//! image touches nothing.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{IoResultExt, Result};

/// Write `bytes` to `path` unless it already holds exactly those bytes.
///
/// Anything occupying `path` that is not a regular file (a symlink or a
/// directory) is removed first. When `mode` is given it is applied even if the
/// content was already current. Returns whether the content was written.
pub fn write_if_changed(path: &Path, bytes: &[u8], mode: Option<u32>) -> Result<bool> {
    let changed = match fs::symlink_metadata(path) {
        Ok(md) if md.is_file() => fs::read(path).at_path(path)? != bytes,
        Ok(md) if md.is_dir() => {
            fs::remove_dir_all(path).at_path(path)?;
            true
        }
        Ok(_) => {
            fs::remove_file(path).at_path(path)?;
            true
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => return Err(err).at_path(path),
    };

    if changed {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        fs::write(path, bytes).at_path(path)?;
    }
    if let Some(mode) = mode {
        set_mode(path, mode)?;
    }
    Ok(changed)
}

/// Mirror a single file or symlink from `src` to `dst`, keeping its mode.
pub fn sync_entry(src: &Path, dst: &Path) -> Result<bool> {
    let md = fs::symlink_metadata(src).at_path(src)?;
    if md.file_type().is_symlink() {
        let target = fs::read_link(src).at_path(src)?;
        if fs::read_link(dst).ok().as_deref() == Some(target.as_path()) {
            return Ok(false);
        }
        if dst.is_dir() && !dst.is_symlink() {
            fs::remove_dir_all(dst).at_path(dst)?;
        } else if dst.exists() || dst.is_symlink() {
            fs::remove_file(dst).at_path(dst)?;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).at_path(parent)?;
        }
        std::os::unix::fs::symlink(&target, dst).at_path(dst)?;
        return Ok(true);
    }

    let bytes = fs::read(src).at_path(src)?;
    write_if_changed(dst, &bytes, Some(md.permissions().mode() & 0o7777))
}

/// Set permission bits on `path`.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let current = fs::metadata(path).at_path(path)?.permissions().mode() & 0o7777;
    if current != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).at_path(path)?;
    }
    Ok(())
}

/// List every file and symlink under `root`, relative to it, sorted.
///
/// Directories are not listed; they are implied by their contents.
pub fn relative_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        out.push(rel);
    }
    out.sort();
    Ok(out)
}

/// Absolute form of `path` with symlinks resolved as far as it exists.
///
/// The part that does not exist yet is appended with `.` and `..` folded
/// lexically, so a path inside a directory compares as such before it is
/// created.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().at_path(path)?.join(path)
    };
    let components: Vec<Component> = absolute.components().collect();
    for split in (1..=components.len()).rev() {
        let head: PathBuf = components[..split].iter().collect();
        match fs::canonicalize(&head) {
            Ok(mut resolved) => {
                for part in &components[split..] {
                    match part {
                        Component::ParentDir => {
                            resolved.pop();
                        }
                        Component::CurDir => {}
                        other => resolved.push(other),
                    }
                }
                return Ok(resolved);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).at_path(&head),
        }
    }
    Ok(absolute)
}

/// Create `path` and its parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).at_path(path)
}
