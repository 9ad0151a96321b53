//! Runtime image layout and manifest.
//!
//! ```text
//! <build_dir>/image/
//! ├── bin/                 platform scripts (suffix stripped, 0755)
//! └── runtime/
//!     ├── bin/             runtime executables + one stub per launcher
//!     ├── lib/app/         merged module entries
//!     ├── lib/modules/     runtime modules (trees or <name>.tar.zst)
//!     └── image.json       manifest
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, IoResultExt, Result};
use crate::filesystem::write_if_changed;

pub const IMAGE_SCHEMA: u32 = 1;
pub const MANIFEST_FILE: &str = "image.json";

/// Paths inside one image tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Executable directory for platform scripts.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("runtime")
    }

    /// Runtime executables and launcher stubs.
    pub fn runtime_bin_dir(&self) -> PathBuf {
        self.runtime_dir().join("bin")
    }

    pub fn app_dir(&self) -> PathBuf {
        self.runtime_dir().join("lib/app")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.runtime_dir().join("lib/modules")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.runtime_dir().join(MANIFEST_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
    /// Runtime executable relative to the runtime directory.
    pub launcher: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optimizations {
    pub strip_debug: bool,
    pub strip_docs: bool,
    pub compression: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherRecord {
    pub name: String,
    pub entry_class: String,
    pub module: String,
    #[serde(default)]
    pub runtime_flags: Vec<String>,
    pub primary: bool,
}

/// Persisted description of an assembled image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub schema: u32,
    pub runtime: RuntimeInfo,
    pub runtime_modules: BTreeSet<String>,
    /// Application module id -> archive sha256.
    pub app_modules: BTreeMap<String, String>,
    pub optimizations: Optimizations,
    #[serde(default)]
    pub launchers: Vec<LauncherRecord>,
}

impl ImageManifest {
    /// Load the manifest at `path`, or `None` if there is none yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AssemblyError::io(path, err)),
        };
        let manifest = serde_json::from_slice(&bytes).map_err(|err| {
            AssemblyError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        Ok(Some(manifest))
    }

    /// Write the manifest as pretty JSON. Unchanged content is not rewritten.
    pub fn store(&self, path: &Path) -> Result<bool> {
        let mut json = serde_json::to_vec_pretty(self).map_err(|err| {
            AssemblyError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, err))
        })?;
        json.push(b'\n');
        write_if_changed(path, &json, Some(0o644))
    }

    pub fn primary_launcher(&self) -> Option<&LauncherRecord> {
        self.launchers.iter().find(|l| l.primary)
    }
}

/// An assembled image: where it is and what it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeImage {
    pub layout: ImageLayout,
    pub manifest: ImageManifest,
}

impl RuntimeImage {
    /// Open an image previously written to `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let layout = ImageLayout::new(root);
        let manifest_path = layout.manifest_path();
        let manifest = ImageManifest::load(&manifest_path)?.ok_or_else(|| {
            AssemblyError::unavailable("runtime image", &manifest_path, "manifest not found")
        })?;
        Ok(Self { layout, manifest })
    }

    /// Persist the current manifest.
    pub fn save(&self) -> Result<bool> {
        self.manifest.store(&self.layout.manifest_path())
    }

    /// Absolute path of the runtime executable.
    pub fn runtime_launcher(&self) -> PathBuf {
        self.layout.runtime_dir().join(&self.manifest.runtime.launcher)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.layout.runtime_bin_dir(),
            self.layout.app_dir(),
            self.layout.modules_dir(),
        ] {
            fs::create_dir_all(&dir).at_path(&dir)?;
        }
        Ok(())
    }
}
