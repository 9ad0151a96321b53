//! Installer: copy the finished image to the install target.
//!
//! Only scheduled when an install target is configured. Existing files at
//! the target are overwritten; files the image does not contain are left
//! alone.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::config::AssemblyConfig;
use crate::error::{AssemblyError, IoResultExt, Result};
use crate::filesystem::resolve_path;
use crate::policy::{Occupant, OverwriteExisting};
use crate::stages::{Stage, StageContext, StageId};

/// What an install run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallSummary {
    /// Files and symlinks written.
    pub copied: usize,
    /// Of those, how many replaced something already at the target.
    pub replaced: usize,
}

/// Recursively copy `image_root` into `target`.
pub fn install_image(image_root: &Path, target: &Path) -> Result<InstallSummary> {
    if !image_root.is_dir() {
        return Err(AssemblyError::unavailable(
            "runtime image",
            image_root,
            "image directory not found",
        ));
    }
    check_target_outside(image_root, target)?;

    let policy = OverwriteExisting;
    let mut summary = InstallSummary::default();
    copy_tree(image_root, target, &policy, &mut summary)?;

    info!(
        target = %target.display(),
        copied = summary.copied,
        replaced = summary.replaced,
        policy = OverwriteExisting::NAME,
        "image installed"
    );
    Ok(summary)
}

/// Refuse a target that is the image itself or lies anywhere below it.
///
/// Both sides are resolved first, so a target that does not exist yet or is
/// spelled through `..` or a symlink is still caught.
pub fn check_target_outside(image_root: &Path, target: &Path) -> Result<()> {
    let source = resolve_path(image_root)?;
    let resolved = resolve_path(target)?;
    if resolved.starts_with(&source) {
        return Err(AssemblyError::Config(format!(
            "install target '{}' lies inside the image '{}'",
            target.display(),
            image_root.display()
        )));
    }
    Ok(())
}

fn copy_tree(
    src: &Path,
    dst: &Path,
    policy: &OverwriteExisting,
    summary: &mut InstallSummary,
) -> Result<()> {
    // List the source before touching the destination.
    let mut entries = fs::read_dir(src)
        .at_path(src)?
        .collect::<std::io::Result<Vec<_>>>()
        .at_path(src)?;
    entries.sort_by_key(|e| e.file_name());

    policy.make_room(dst, true).at_path(dst)?;
    fs::create_dir_all(dst).at_path(dst)?;

    for entry in entries {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().at_path(&src_path)?;

        if file_type.is_dir() {
            copy_tree(&src_path, &dst_path, policy, summary)?;
            continue;
        }

        let occupant = policy.make_room(&dst_path, false).at_path(&dst_path)?;
        if file_type.is_symlink() {
            let link = fs::read_link(&src_path).at_path(&src_path)?;
            std::os::unix::fs::symlink(&link, &dst_path).at_path(&dst_path)?;
        } else {
            // fs::copy carries the permission bits across.
            fs::copy(&src_path, &dst_path).at_path(&dst_path)?;
        }
        if occupant == Occupant::Replaced {
            summary.replaced += 1;
            debug!(path = %dst_path.display(), "replaced existing file");
        }
        summary.copied += 1;
    }
    Ok(())
}

pub struct InstallImage;

impl Stage for InstallImage {
    fn id(&self) -> StageId {
        StageId::Install
    }

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()> {
        let Some(target) = &config.install_dir else {
            return Err(AssemblyError::Graph(
                "install stage scheduled without an install target".to_string(),
            ));
        };
        let image_root = ctx.image()?.layout.root().to_path_buf();
        install_image(&image_root, target)?;
        Ok(())
    }
}
