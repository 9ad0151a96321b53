//! Module archives: reading tar / tar.zst artifacts and packing trees.
//!
//! Module artifacts are POSIX tar archives, optionally zstd-compressed
//! (`.tar.zst`). Packed output is deterministic: entries are sorted and
//! headers carry zeroed timestamps and ownership, so identical trees always
//! produce identical bytes.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tar::Builder as TarBuilder;

use crate::error::{AssemblyError, IoResultExt, Result};

/// Default permission bits for entries whose header carries none.
const DEFAULT_ENTRY_MODE: u32 = 0o644;

/// One regular file read out of a module archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Normalized relative path (no `.`, `..` or root components).
    pub path: PathBuf,
    pub data: Vec<u8>,
    pub mode: u32,
}

/// Whether `path` names a zstd-compressed archive.
pub fn is_zstd(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

/// Read every regular-file entry from the archive at `path`, in archive order.
pub fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(path).at_path(path)?;
    let reader = BufReader::new(file);
    if is_zstd(path) {
        let decoder = zstd::stream::Decoder::new(reader).at_path(path)?;
        read_tar(decoder, path)
    } else {
        read_tar(reader, path)
    }
}

fn read_tar<R: Read>(reader: R, archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut out = Vec::new();
    for entry in archive.entries().at_path(archive_path)? {
        let mut entry = entry.at_path(archive_path)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path().at_path(archive_path)?.into_owned();
        let path = normalize_entry_path(&raw).ok_or_else(|| {
            AssemblyError::io(
                archive_path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsafe entry path '{}'", raw.display()),
                ),
            )
        })?;
        let mode = entry
            .header()
            .mode()
            .map(|m| m & 0o7777)
            .ok()
            .filter(|m| *m != 0)
            .unwrap_or(DEFAULT_ENTRY_MODE);
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data).at_path(archive_path)?;
        out.push(ArchiveEntry { path, data, mode });
    }
    Ok(out)
}

/// Strip `.` components and reject anything that could escape the merge root.
pub fn normalize_entry_path(raw: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Pack the listed files (relative to `root`) into a zstd-compressed tar.
///
/// `level` is passed straight to zstd. Symlinks are stored as links.
pub fn pack_tar_zst(root: &Path, files: &[PathBuf], level: i32) -> Result<Vec<u8>> {
    let encoder = zstd::stream::Encoder::new(Vec::new(), level).at_path(root)?;
    let mut builder = TarBuilder::new(encoder);

    let mut sorted: Vec<&PathBuf> = files.iter().collect();
    sorted.sort();

    for rel in sorted {
        let src = root.join(rel);
        let md = fs::symlink_metadata(&src).at_path(&src)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(md.permissions().mode() & 0o7777);

        if md.file_type().is_symlink() {
            let target = fs::read_link(&src).at_path(&src)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(&target).at_path(&src)?;
            header.set_cksum();
            builder
                .append_data(&mut header, rel, io::empty())
                .at_path(&src)?;
        } else {
            let mut f = File::open(&src).at_path(&src)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f).at_path(&src)?;
        }
    }

    let encoder = builder.into_inner().at_path(root)?;
    encoder.finish().at_path(root)
}

/// SHA-256 of a file, hex encoded, with its size in bytes.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).at_path(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf).at_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_archive;
    use tempfile::TempDir;

    #[test]
    fn reads_plain_and_zstd_archives() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("a.tar");
        let packed = temp.path().join("a.tar.zst");
        let entries = [("x.class", b"X".as_slice()), ("META-INF/res.txt", b"R".as_slice())];
        write_archive(&plain, &entries);
        write_archive(&packed, &entries);

        for path in [&plain, &packed] {
            let read = read_entries(path).unwrap();
            assert_eq!(read.len(), 2);
            assert_eq!(read[0].path, PathBuf::from("x.class"));
            assert_eq!(read[0].data, b"X");
            assert_eq!(read[1].path, PathBuf::from("META-INF/res.txt"));
        }
    }

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(
            normalize_entry_path(Path::new("./a/./b")),
            Some(PathBuf::from("a/b"))
        );
        assert_eq!(normalize_entry_path(Path::new("../etc/passwd")), None);
        assert_eq!(normalize_entry_path(Path::new("/abs")), None);
        assert_eq!(normalize_entry_path(Path::new(".")), None);
    }

    #[test]
    fn pack_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/a.so"), "a").unwrap();
        fs::write(root.join("conf"), "c").unwrap();
        let files = vec![PathBuf::from("lib/a.so"), PathBuf::from("conf")];

        let first = pack_tar_zst(&root, &files, 3).unwrap();
        let reversed: Vec<PathBuf> = files.iter().rev().cloned().collect();
        let second = pack_tar_zst(&root, &reversed, 3).unwrap();
        assert_eq!(first, second);

        let out = temp.path().join("tree.tar.zst");
        fs::write(&out, &first).unwrap();
        let read = read_entries(&out).unwrap();
        let names: Vec<_> = read.iter().map(|e| e.path.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("conf"), PathBuf::from("lib/a.so")]);
    }

    #[test]
    fn sha256_of_known_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello");
        fs::write(&path, "hello").unwrap();
        let (sha, size) = sha256_file(&path).unwrap();
        assert_eq!(
            sha,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(size, 5);
    }
}
