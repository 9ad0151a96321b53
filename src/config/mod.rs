//! Assembly configuration (`assembly.toml`).
//!
//! Relative paths are resolved against the directory holding the config
//! file. The install target may also come from outside the file; see
//! [`AssemblyConfig::with_install_dir`].

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AssemblyError, IoResultExt, Result};

pub const DEFAULT_BUILD_DIR: &str = "build";
pub const DEFAULT_ARTIFACTS_DIR: &str = "build/libs";
pub const DEFAULT_COMPRESSION: u8 = 0;
pub const MAX_COMPRESSION: u8 = 9;

/// Name of the assembled image directory under the build directory.
pub const IMAGE_DIR_NAME: &str = "image";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssemblyToml {
    build_dir: Option<String>,
    artifacts_dir: Option<String>,
    base_runtime: String,
    scripts_dir: String,
    install_dir: Option<String>,
    #[serde(default)]
    image: ImageToml,
    modules: Vec<ModuleToml>,
    launcher: LauncherToml,
    #[serde(default)]
    secondary_launchers: Vec<LauncherToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    #[serde(default = "default_true")]
    strip_debug: bool,
    #[serde(default = "default_true")]
    strip_docs: bool,
    #[serde(default)]
    compression: Option<u8>,
    #[serde(default)]
    additive: bool,
    #[serde(default)]
    extra_modules: Vec<String>,
}

impl Default for ImageToml {
    fn default() -> Self {
        Self {
            strip_debug: true,
            strip_docs: true,
            compression: None,
            additive: false,
            extra_modules: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleToml {
    id: String,
    archive: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LauncherToml {
    name: String,
    entry_class: String,
    module: Option<String>,
    #[serde(default)]
    runtime_flags: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Runtime trimming and merge options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOptions {
    pub strip_debug: bool,
    pub strip_docs: bool,
    /// 0 stores runtime modules as plain trees, 1-9 packs them with zstd.
    pub compression: u8,
    /// Keep previously merged content across runs instead of rebuilding.
    pub additive: bool,
    /// Runtime modules requested beyond those the artifacts declare.
    pub extra_modules: Vec<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            strip_debug: true,
            strip_docs: true,
            compression: DEFAULT_COMPRESSION,
            additive: false,
            extra_modules: Vec::new(),
        }
    }
}

/// One project module and where its archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub id: String,
    /// Explicit archive path; `None` means the conventional location.
    pub archive: Option<PathBuf>,
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            archive: None,
        }
    }
}

/// A named entry point bound to a module's entry class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSpec {
    pub name: String,
    pub entry_class: String,
    pub module: String,
    pub runtime_flags: Vec<String>,
}

impl LauncherSpec {
    pub fn new(
        name: impl Into<String>,
        entry_class: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entry_class: entry_class.into(),
            module: module.into(),
            runtime_flags: Vec::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime_flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

/// The primary launcher plus the enumerated secondary launchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSet {
    pub primary: LauncherSpec,
    pub secondary: Vec<LauncherSpec>,
}

impl LauncherSet {
    /// Primary first, then secondaries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &LauncherSpec> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }
}

/// Fully resolved assembly configuration.
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    pub build_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub base_runtime: PathBuf,
    pub scripts_dir: PathBuf,
    pub install_dir: Option<PathBuf>,
    pub image: ImageOptions,
    pub modules: Vec<ModuleSpec>,
    pub launchers: LauncherSet,
}

impl AssemblyConfig {
    /// Read and validate `assembly.toml` at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).at_path(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&raw, base_dir).map_err(|err| match err {
            AssemblyError::Config(msg) => {
                AssemblyError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Parse configuration text, resolving relative paths against `base_dir`.
    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self> {
        let parsed: AssemblyToml =
            toml::from_str(raw).map_err(|err| AssemblyError::Config(err.to_string()))?;

        let compression = parsed.image.compression.unwrap_or(DEFAULT_COMPRESSION);
        if compression > MAX_COMPRESSION {
            return Err(AssemblyError::Config(format!(
                "image.compression must be between 0 and {MAX_COMPRESSION}, got {compression}"
            )));
        }

        if parsed.modules.is_empty() {
            return Err(AssemblyError::Config(
                "at least one [[modules]] entry is required".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        let mut modules = Vec::with_capacity(parsed.modules.len());
        for module in parsed.modules {
            let id = module.id.trim().to_string();
            if id.is_empty() {
                return Err(AssemblyError::Config("module id must not be empty".to_string()));
            }
            if !seen.insert(id.clone()) {
                return Err(AssemblyError::ConfigConflict(format!(
                    "module '{id}' is declared more than once"
                )));
            }
            modules.push(ModuleSpec {
                id,
                archive: module.archive.map(|a| resolve_path(base_dir, &a)),
            });
        }

        // The primary launcher defaults to the first declared module.
        let default_module = modules[0].id.clone();
        let primary = launcher_from_toml(parsed.launcher, Some(&default_module))?;
        let secondary = parsed
            .secondary_launchers
            .into_iter()
            .map(|l| launcher_from_toml(l, None))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            build_dir: resolve_path(
                base_dir,
                parsed.build_dir.as_deref().unwrap_or(DEFAULT_BUILD_DIR),
            ),
            artifacts_dir: resolve_path(
                base_dir,
                parsed.artifacts_dir.as_deref().unwrap_or(DEFAULT_ARTIFACTS_DIR),
            ),
            base_runtime: resolve_path(base_dir, &parsed.base_runtime),
            scripts_dir: resolve_path(base_dir, &parsed.scripts_dir),
            install_dir: parsed.install_dir.map(|d| resolve_path(base_dir, &d)),
            image: ImageOptions {
                strip_debug: parsed.image.strip_debug,
                strip_docs: parsed.image.strip_docs,
                compression,
                additive: parsed.image.additive,
                extra_modules: parsed.image.extra_modules,
            },
            modules,
            launchers: LauncherSet { primary, secondary },
        })
    }

    /// Override the install target. `None` keeps whatever the file set.
    pub fn with_install_dir(mut self, install_dir: Option<PathBuf>) -> Self {
        if install_dir.is_some() {
            self.install_dir = install_dir;
        }
        self
    }

    /// Root of the assembled image tree.
    pub fn image_root(&self) -> PathBuf {
        self.build_dir.join(IMAGE_DIR_NAME)
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id.clone()).collect()
    }
}

fn launcher_from_toml(raw: LauncherToml, default_module: Option<&str>) -> Result<LauncherSpec> {
    let module = match (raw.module, default_module) {
        (Some(module), _) => module,
        (None, Some(default)) => default.to_string(),
        (None, None) => {
            return Err(AssemblyError::Config(format!(
                "secondary launcher '{}' must name its module",
                raw.name
            )))
        }
    };
    Ok(LauncherSpec {
        name: raw.name,
        entry_class: raw.entry_class,
        module,
        runtime_flags: raw.runtime_flags,
    })
}

fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
