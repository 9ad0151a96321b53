//! Launcher Registrar.
//!
//! Every launcher becomes a small shell stub in `runtime/bin/<name>` that
//! execs the runtime executable with the launcher's flags and entry class.
//! The whole set is validated before the first stub is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{AssemblyConfig, LauncherSet, LauncherSpec};
use crate::error::{AssemblyError, Result};
use crate::filesystem::write_if_changed;
use crate::image::{LauncherRecord, RuntimeImage};
use crate::stages::{Stage, StageContext, StageId};

pub const LAUNCHER_MODE: u32 = 0o755;

/// Check the launcher set for errors and collisions.
///
/// Every violation is a configuration conflict, raised before any file is
/// written.
///
/// `runtime_launcher` is the file name of the runtime executable; a launcher
/// stub with the same name would overwrite it.
pub fn validate_launchers(
    launchers: &LauncherSet,
    modules: &[String],
    runtime_launcher: Option<&str>,
) -> Result<()> {
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    let mut bindings: BTreeMap<(&str, &str), &str> = BTreeMap::new();

    for launcher in launchers.iter() {
        check_name(&launcher.name)?;
        if [&launcher.entry_class, &launcher.module]
            .iter()
            .any(|field| field.chars().any(char::is_control))
        {
            return Err(AssemblyError::ConfigConflict(format!(
                "launcher '{}' has control characters in its entry class or module",
                launcher.name
            )));
        }
        if launcher.entry_class.trim().is_empty() {
            return Err(AssemblyError::ConfigConflict(format!(
                "launcher '{}' has an empty entry class",
                launcher.name
            )));
        }
        if !modules.iter().any(|m| *m == launcher.module) {
            return Err(AssemblyError::ConfigConflict(format!(
                "launcher '{}' refers to unknown module '{}'",
                launcher.name, launcher.module
            )));
        }
        if runtime_launcher == Some(launcher.name.as_str()) {
            return Err(AssemblyError::ConfigConflict(format!(
                "launcher '{}' would replace the runtime executable of the same name",
                launcher.name
            )));
        }
        if names.insert(&launcher.name, &launcher.module).is_some() {
            return Err(AssemblyError::ConfigConflict(format!(
                "launcher name '{}' is registered more than once",
                launcher.name
            )));
        }
        let binding = (launcher.module.as_str(), launcher.entry_class.as_str());
        if let Some(existing) = bindings.insert(binding, &launcher.name) {
            return Err(AssemblyError::ConfigConflict(format!(
                "launchers '{existing}' and '{}' both bind {}/{}",
                launcher.name, launcher.module, launcher.entry_class
            )));
        }
    }
    Ok(())
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.chars().any(|c| c.is_whitespace() || c.is_control());
    if bad {
        return Err(AssemblyError::ConfigConflict(format!(
            "launcher name '{name}' is not a valid file name"
        )));
    }
    Ok(())
}

/// Write one stub per launcher and record the set in the image manifest.
///
/// Launchers from an earlier additive run that are not part of this set are
/// kept in the manifest, demoted to secondary. Returns the stub paths.
pub fn register_launchers(
    image: &mut RuntimeImage,
    launchers: &LauncherSet,
    modules: &[String],
) -> Result<Vec<PathBuf>> {
    let runtime_name = Path::new(&image.manifest.runtime.launcher)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    validate_launchers(launchers, modules, runtime_name.as_deref())?;

    let bin_dir = image.layout.runtime_bin_dir();
    let mut written = Vec::new();
    for launcher in launchers.iter() {
        let path = bin_dir.join(&launcher.name);
        let stub = render_stub(launcher, &image.manifest.runtime.launcher);
        let changed = write_if_changed(&path, stub.as_bytes(), Some(LAUNCHER_MODE))?;
        debug!(launcher = %launcher.name, path = %path.display(), changed, "launcher stub");
        written.push(path);
    }

    let mut records: Vec<LauncherRecord> = launchers
        .iter()
        .map(|l| LauncherRecord {
            name: l.name.clone(),
            entry_class: l.entry_class.clone(),
            module: l.module.clone(),
            runtime_flags: l.runtime_flags.clone(),
            primary: l.name == launchers.primary.name,
        })
        .collect();
    for mut prior in std::mem::take(&mut image.manifest.launchers) {
        if records.iter().all(|r| r.name != prior.name) {
            prior.primary = false;
            records.push(prior);
        }
    }
    image.manifest.launchers = records;
    image.save()?;

    info!(
        primary = %launchers.primary.name,
        secondary = launchers.secondary.len(),
        "launchers registered"
    );
    Ok(written)
}

/// Shell stub for `launcher`; `runtime_launcher` is relative to the runtime dir.
pub fn render_stub(launcher: &LauncherSpec, runtime_launcher: &str) -> String {
    let mut exec = format!("exec \"$DIR/{runtime_launcher}\"");
    for flag in &launcher.runtime_flags {
        exec.push(' ');
        exec.push_str(&shell_quote(flag));
    }
    exec.push_str(" -cp \"$DIR/lib/app\" ");
    exec.push_str(&shell_quote(&launcher.entry_class));
    exec.push_str(" \"$@\"");

    format!(
        "#!/bin/sh\n\
         # {name}: {class} ({module})\n\
         DIR=\"$(cd \"$(dirname \"$0\")/..\" && pwd)\"\n\
         {exec}\n",
        name = launcher.name,
        class = launcher.entry_class,
        module = launcher.module,
    )
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

pub struct RegisterLaunchers;

impl Stage for RegisterLaunchers {
    fn id(&self) -> StageId {
        StageId::RegisterLaunchers
    }

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()> {
        let modules = config.module_ids();
        let image = ctx.image_mut()?;
        register_launchers(image, &config.launchers, &modules)?;
        Ok(())
    }
}
