//! Duplicate-resolution strategies.
//!
//! Merging module archives and installing the finished image resolve path
//! collisions in opposite directions. Each direction has its own type:
//! merge code takes [`ExcludeDuplicates`], install code takes
//! [`OverwriteExisting`], and neither accepts the other.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// First writer wins: later claims on an already-claimed path are dropped.
///
/// A path also collides with every claimed path above or below it: once
/// `res/data.txt` is claimed, a file entry `res` is a duplicate, and the
/// other way round.
///
/// Claims are made in module declaration order, which makes the merged
/// result independent of archive-internal ordering.
#[derive(Debug, Default)]
pub struct ExcludeDuplicates {
    claimed: BTreeMap<PathBuf, String>,
}

impl ExcludeDuplicates {
    pub const NAME: &'static str = "exclude-duplicates";

    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `owner`.
    ///
    /// Returns `None` when the claim is accepted, or the earlier owner when
    /// the path was already taken and this entry must be skipped.
    pub fn claim(&mut self, path: &Path, owner: &str) -> Option<&str> {
        match self.colliding(path) {
            Some(existing) => self.owner_of(&existing),
            None => {
                self.claimed.insert(path.to_path_buf(), owner.to_string());
                None
            }
        }
    }

    /// The claimed path that `path` collides with, if any.
    fn colliding(&self, path: &Path) -> Option<PathBuf> {
        if let Some(taken) = path
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .find(|p| self.claimed.contains_key(*p))
        {
            return Some(taken.to_path_buf());
        }
        // Paths order by component, so descendants sort right after `path`.
        self.claimed
            .range::<Path, _>((Bound::Excluded(path), Bound::Unbounded))
            .next()
            .map(|(taken, _)| taken)
            .filter(|taken| taken.starts_with(path))
            .cloned()
    }

    /// Owner of an accepted path.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        self.claimed.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Last writer wins: whatever already sits at the destination is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverwriteExisting;

/// What [`OverwriteExisting::make_room`] found at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    Vacant,
    Replaced,
}

impl OverwriteExisting {
    pub const NAME: &'static str = "overwrite-existing";

    /// Clear `dest` so a new entry of the given kind can be written there.
    ///
    /// A directory that will receive a directory is kept (its contents are
    /// merged into). Everything else occupying `dest` is removed.
    pub fn make_room(&self, dest: &Path, incoming_is_dir: bool) -> io::Result<Occupant> {
        let md = match fs::symlink_metadata(dest) {
            Ok(md) => md,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Occupant::Vacant),
            Err(err) => return Err(err),
        };

        if md.is_dir() {
            if incoming_is_dir {
                return Ok(Occupant::Vacant);
            }
            fs::remove_dir_all(dest)?;
        } else {
            fs::remove_file(dest)?;
        }
        Ok(Occupant::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exclude_duplicates_keeps_first_owner() {
        let mut policy = ExcludeDuplicates::new();
        assert_eq!(policy.claim(Path::new("shared.txt"), "a"), None);
        assert_eq!(policy.claim(Path::new("shared.txt"), "b"), Some("a"));
        assert_eq!(policy.claim(Path::new("only-b.txt"), "b"), None);
        assert_eq!(policy.owner_of(Path::new("shared.txt")), Some("a"));
        assert_eq!(policy.len(), 2);
    }

    #[test]
    fn exclude_duplicates_rejects_nested_claims() {
        let mut policy = ExcludeDuplicates::new();
        assert_eq!(policy.claim(Path::new("res/data.txt"), "a"), None);
        assert_eq!(policy.claim(Path::new("res"), "b"), Some("a"));
        assert_eq!(policy.claim(Path::new("res.txt"), "b"), None);

        let mut policy = ExcludeDuplicates::new();
        assert_eq!(policy.claim(Path::new("res"), "a"), None);
        assert_eq!(policy.claim(Path::new("res/x"), "b"), Some("a"));
        assert_eq!(policy.claim(Path::new("res/x/y"), "b"), Some("a"));
        assert_eq!(policy.claim(Path::new("resx/y"), "b"), None);
        assert_eq!(policy.len(), 2);
    }

    #[test]
    fn overwrite_existing_removes_files_and_symlinks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        let link = temp.path().join("link");
        fs::write(&file, "old").unwrap();
        std::os::unix::fs::symlink("file", &link).unwrap();

        let policy = OverwriteExisting;
        assert_eq!(policy.make_room(&link, false).unwrap(), Occupant::Replaced);
        assert!(!link.is_symlink());
        assert!(file.exists(), "symlink target must survive");

        assert_eq!(policy.make_room(&file, false).unwrap(), Occupant::Replaced);
        assert!(!file.exists());

        assert_eq!(
            policy.make_room(&temp.path().join("absent"), false).unwrap(),
            Occupant::Vacant
        );
    }

    #[test]
    fn overwrite_existing_merges_into_directories() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("keep"), "").unwrap();

        let policy = OverwriteExisting;
        assert_eq!(policy.make_room(&dir, true).unwrap(), Occupant::Vacant);
        assert!(dir.join("keep").exists());

        assert_eq!(policy.make_room(&dir, false).unwrap(), Occupant::Replaced);
        assert!(!dir.exists());
    }
}
