//! Fixtures shared by unit tests.

use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::archive::is_zstd;

/// Write a tar (or tar.zst, by extension) module archive.
pub(crate) fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
    }
    if is_zstd(path) {
        let out = File::create(path).unwrap();
        let mut encoder = zstd::stream::Encoder::new(out, 3).unwrap();
        std::io::copy(&mut buf.as_slice(), &mut encoder).unwrap();
        encoder.finish().unwrap();
    } else {
        fs::write(path, buf).unwrap();
    }
}

/// Lay out a small base runtime:
/// `rt.base` (core) <- `rt.logging` <- `rt.desktop`.
pub(crate) fn write_base_runtime(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(
        root.join("runtime.toml"),
        r#"schema = 1
name = "testrt"
version = "1.0"
launcher = "bin/java"
core = ["rt.base"]

[[module]]
name = "rt.base"

[[module]]
name = "rt.logging"
requires = ["rt.base"]

[[module]]
name = "rt.desktop"
requires = ["rt.logging"]
"#,
    )
    .unwrap();

    let java = root.join("bin/java");
    fs::write(&java, "#!/bin/sh\necho runtime \"$@\"\n").unwrap();
    fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(root.join("bin/java.debuginfo"), "debug").unwrap();

    let files: &[(&str, &str)] = &[
        ("modules/rt.base/lib/core.bin", "core"),
        ("modules/rt.base/lib/core.debuginfo", "core-debug"),
        ("modules/rt.base/man/rt.1", "manual"),
        ("modules/rt.base/include/rt.h", "header"),
        ("modules/rt.logging/lib/log.bin", "log"),
        ("modules/rt.desktop/lib/ui.bin", "ui"),
    ];
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
