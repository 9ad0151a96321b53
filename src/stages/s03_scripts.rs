//! Executable Script Installer.
//!
//! Copies platform scripts from the template directory into `<image>/bin`,
//! dropping the `.sh` suffix and marking them executable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, IoResultExt, Result};
use crate::filesystem::{ensure_dir, write_if_changed};
use crate::stages::{Stage, StageContext, StageId};

pub const SCRIPT_SUFFIX: &str = ".sh";
pub const SCRIPT_MODE: u32 = 0o755;

/// Installed command name for a template file name.
pub fn command_name(file_name: &str) -> &str {
    file_name
        .strip_suffix(SCRIPT_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(file_name)
}

/// Map each template in `scripts_dir` to the command name it installs as.
///
/// Only regular files (or links to them) at the top level are templates.
pub fn plan_scripts(scripts_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    if !scripts_dir.is_dir() {
        return Err(AssemblyError::unavailable(
            "script template directory",
            scripts_dir,
            "directory not found",
        ));
    }

    let mut commands: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in fs::read_dir(scripts_dir).at_path(scripts_dir)? {
        let entry = entry.at_path(scripts_dir)?;
        let source = entry.path();
        if !source.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let command = command_name(&file_name).to_string();
        if let Some(previous) = commands.insert(command.clone(), source.clone()) {
            return Err(AssemblyError::ConfigConflict(format!(
                "scripts '{}' and '{}' both install as '{command}'",
                previous.display(),
                source.display()
            )));
        }
    }
    Ok(commands)
}

/// Install every template in `scripts_dir` into `bin_dir`.
///
/// Returns the installed paths in name order.
pub fn install_scripts(scripts_dir: &Path, bin_dir: &Path) -> Result<Vec<PathBuf>> {
    let commands = plan_scripts(scripts_dir)?;

    ensure_dir(bin_dir)?;
    let mut installed = Vec::with_capacity(commands.len());
    for (command, source) in commands {
        let dest = bin_dir.join(&command);
        let bytes = fs::read(&source).at_path(&source)?;
        let changed = write_if_changed(&dest, &bytes, Some(SCRIPT_MODE))?;
        debug!(script = %command, from = %source.display(), changed, "installed script");
        installed.push(dest);
    }

    info!(
        count = installed.len(),
        bin = %bin_dir.display(),
        "platform scripts installed"
    );
    Ok(installed)
}

pub struct InstallScripts;

impl Stage for InstallScripts {
    fn id(&self) -> StageId {
        StageId::InstallScripts
    }

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()> {
        let bin_dir = ctx.image()?.layout.bin_dir();
        install_scripts(&config.scripts_dir, &bin_dir)?;
        Ok(())
    }
}
