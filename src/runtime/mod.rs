//! Base runtime description and runtime-module closure.
//!
//! A base runtime is a directory holding `runtime.toml`, the runtime's own
//! executables under `bin/` and one directory per runtime module under
//! `modules/<name>/`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::archive::normalize_entry_path;
use crate::error::{AssemblyError, Result};

pub const RUNTIME_MANIFEST: &str = "runtime.toml";
pub const SUPPORTED_SCHEMA: u32 = 1;

const WHAT: &str = "base runtime";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeManifestToml {
    schema: u32,
    name: String,
    version: String,
    launcher: String,
    #[serde(default)]
    core: Vec<String>,
    #[serde(default, rename = "module")]
    modules: Vec<RuntimeModuleToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuntimeModuleToml {
    name: String,
    #[serde(default)]
    requires: Vec<String>,
}

/// A loaded, validated base runtime.
#[derive(Debug, Clone)]
pub struct BaseRuntime {
    root: PathBuf,
    name: String,
    version: String,
    launcher: PathBuf,
    core: Vec<String>,
    modules: BTreeMap<String, Vec<String>>,
}

impl BaseRuntime {
    /// Load and validate the base runtime rooted at `root`.
    ///
    /// Every failure here means the runtime is unavailable or incompatible
    /// and is reported as [`AssemblyError::ResourceUnavailable`].
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(AssemblyError::unavailable(WHAT, root, "directory not found"));
        }
        let manifest_path = root.join(RUNTIME_MANIFEST);
        let raw = fs::read_to_string(&manifest_path).map_err(|err| {
            AssemblyError::unavailable(WHAT, &manifest_path, format!("reading manifest: {err}"))
        })?;
        let parsed: RuntimeManifestToml = toml::from_str(&raw).map_err(|err| {
            AssemblyError::unavailable(WHAT, &manifest_path, format!("parsing manifest: {err}"))
        })?;

        if parsed.schema != SUPPORTED_SCHEMA {
            return Err(AssemblyError::unavailable(
                WHAT,
                &manifest_path,
                format!(
                    "unsupported manifest schema {} (expected {})",
                    parsed.schema, SUPPORTED_SCHEMA
                ),
            ));
        }

        let launcher = normalize_entry_path(Path::new(&parsed.launcher)).ok_or_else(|| {
            AssemblyError::unavailable(
                WHAT,
                &manifest_path,
                format!("launcher '{}' must be a relative path", parsed.launcher),
            )
        })?;
        if !root.join(&launcher).is_file() {
            return Err(AssemblyError::unavailable(
                WHAT,
                root.join(&launcher),
                "runtime launcher executable not found",
            ));
        }

        let mut modules = BTreeMap::new();
        for module in parsed.modules {
            if modules.insert(module.name.clone(), module.requires).is_some() {
                return Err(AssemblyError::unavailable(
                    WHAT,
                    &manifest_path,
                    format!("module '{}' is declared twice", module.name),
                ));
            }
        }
        for (name, requires) in &modules {
            if let Some(missing) = requires.iter().find(|r| !modules.contains_key(*r)) {
                return Err(AssemblyError::unavailable(
                    WHAT,
                    &manifest_path,
                    format!("module '{name}' requires undeclared module '{missing}'"),
                ));
            }
            let dir = root.join("modules").join(name);
            if !dir.is_dir() {
                return Err(AssemblyError::unavailable(
                    WHAT,
                    dir,
                    format!("content directory for module '{name}' not found"),
                ));
            }
        }
        if let Some(missing) = parsed.core.iter().find(|c| !modules.contains_key(*c)) {
            return Err(AssemblyError::unavailable(
                WHAT,
                &manifest_path,
                format!("core module '{missing}' is not declared"),
            ));
        }

        debug!(
            runtime = %parsed.name,
            version = %parsed.version,
            modules = modules.len(),
            "loaded base runtime"
        );

        Ok(Self {
            root: root.to_path_buf(),
            name: parsed.name,
            version: parsed.version,
            launcher,
            core: parsed.core,
            modules,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Launcher executable, relative to the runtime root (e.g. `bin/java`).
    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn module_dir(&self, name: &str) -> PathBuf {
        self.root.join("modules").join(name)
    }

    pub fn provides(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Close `requested` plus the core modules over `requires`.
    ///
    /// A requested module the base runtime does not provide makes the
    /// runtime incompatible with the application.
    pub fn resolve_closure<'a, I>(&self, requested: I) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut queue: VecDeque<String> = self.core.iter().cloned().collect();
        for name in requested {
            if !self.provides(name) {
                return Err(AssemblyError::unavailable(
                    WHAT,
                    &self.root,
                    format!(
                        "module '{name}' is not provided by runtime '{} {}'",
                        self.name, self.version
                    ),
                ));
            }
            queue.push_back(name.to_string());
        }

        let mut closure = BTreeSet::new();
        while let Some(name) = queue.pop_front() {
            if !closure.insert(name.clone()) {
                continue;
            }
            if let Some(requires) = self.modules.get(&name) {
                queue.extend(requires.iter().cloned());
            }
        }
        Ok(closure)
    }
}
