//! Preflight checks for assembly inputs.
//!
//! Validates everything the stages will need before the graph runs, and
//! reports every problem at once instead of stopping at the first.
//!
//! # Example
//!
//! ```rust,ignore
//! use image_assembler::preflight::check_inputs;
//!
//! let problems = check_inputs(&config);
//! for problem in &problems {
//!     eprintln!("{problem}");
//! }
//! ```

use std::path::Path;

use tracing::debug;

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, Result};
use crate::runtime::BaseRuntime;
use crate::stages::s00_collect::collect_artifacts;
use crate::stages::s02_launchers::validate_launchers;
use crate::stages::s03_scripts::plan_scripts;
use crate::stages::s04_install::check_target_outside;

/// Check `config` against the filesystem. An empty result means ready.
pub fn check_inputs(config: &AssemblyConfig) -> Vec<AssemblyError> {
    let mut problems = Vec::new();

    // Per module, so every missing archive is listed.
    for module in &config.modules {
        if let Err(err) = collect_artifacts(std::slice::from_ref(module), &config.artifacts_dir) {
            problems.push(err);
        }
    }

    let runtime_name = match BaseRuntime::load(&config.base_runtime) {
        Ok(base) => {
            let extra = config.image.extra_modules.iter().map(String::as_str);
            if let Err(err) = base.resolve_closure(extra) {
                problems.push(err);
            }
            base.launcher()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        }
        Err(err) => {
            problems.push(err);
            None
        }
    };

    let modules = config.module_ids();
    if let Err(err) = validate_launchers(&config.launchers, &modules, runtime_name.as_deref()) {
        problems.push(err);
    }

    if let Err(err) = plan_scripts(&config.scripts_dir) {
        problems.push(err);
    }

    if let Some(target) = &config.install_dir {
        if let Err(err) = check_install_target(&config.image_root(), target) {
            problems.push(err);
        }
    }

    debug!(problems = problems.len(), "preflight finished");
    problems
}

/// Fail with the first problem, if any.
pub fn ensure_ready(config: &AssemblyConfig) -> Result<()> {
    match check_inputs(config).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn check_install_target(image_root: &Path, target: &Path) -> Result<()> {
    check_target_outside(image_root, target)?;
    if target.exists() && !target.is_dir() {
        return Err(AssemblyError::unavailable(
            "install target",
            target,
            "exists and is not a directory",
        ));
    }
    Ok(())
}
