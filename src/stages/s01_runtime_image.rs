//! Merged-Runtime Builder.
//!
//! Produces `<image>/runtime`: the runtime executables, the minimal closure of
//! runtime modules the artifacts need, and one merged application tree built
//! from every module archive under the exclude-duplicates policy.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path};

use tracing::{debug, info};

use crate::archive::{pack_tar_zst, ArchiveEntry};
use crate::config::{AssemblyConfig, ImageOptions};
use crate::error::{IoResultExt, Result};
use crate::filesystem::{relative_files, sync_entry, write_if_changed};
use crate::image::{
    ImageLayout, ImageManifest, Optimizations, RuntimeImage, RuntimeInfo, IMAGE_SCHEMA,
};
use crate::policy::ExcludeDuplicates;
use crate::runtime::BaseRuntime;
use crate::stages::s00_collect::ModuleArtifact;
use crate::stages::{Stage, StageContext, StageId};

/// Archive entry listing the runtime modules a module needs, one per line.
pub const RUNTIME_REQUIRES_ENTRY: &str = "META-INF/runtime-requires";

const DEBUG_SUFFIXES: &[&str] = &["debuginfo", "dbg", "pdb", "sym"];
const DOC_DIRS: &[&str] = &["man", "include", "doc", "docs"];

/// Counts from merging module entries into the application tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub written: usize,
    pub unchanged: usize,
    pub skipped_duplicates: usize,
}

/// Build (or, in additive mode, extend) the runtime image at `image_root`.
pub fn build_runtime_image(
    base: &BaseRuntime,
    artifacts: &[ModuleArtifact],
    options: &ImageOptions,
    image_root: &Path,
) -> Result<RuntimeImage> {
    // Read everything up front: a corrupt archive must fail before the
    // image is touched.
    let loaded = artifacts
        .iter()
        .map(|artifact| Ok((artifact, artifact.entries()?)))
        .collect::<Result<Vec<_>>>()?;

    let mut requested: BTreeSet<String> = options.extra_modules.iter().cloned().collect();
    for (_, entries) in &loaded {
        requested.extend(declared_requirements(entries));
    }
    let closure = base.resolve_closure(requested.iter().map(String::as_str))?;
    debug!(modules = ?closure, "resolved runtime module closure");

    let layout = ImageLayout::new(image_root);
    let previous = if options.additive {
        ImageManifest::load(&layout.manifest_path())?
    } else {
        if image_root.exists() {
            fs::remove_dir_all(image_root).at_path(image_root)?;
        }
        None
    };

    let mut manifest = ImageManifest {
        schema: IMAGE_SCHEMA,
        runtime: RuntimeInfo {
            name: base.name().to_string(),
            version: base.version().to_string(),
            launcher: base.launcher().to_string_lossy().into_owned(),
        },
        runtime_modules: closure.clone(),
        app_modules: artifacts
            .iter()
            .map(|a| (a.module.clone(), a.sha256.clone()))
            .collect(),
        optimizations: Optimizations {
            strip_debug: options.strip_debug,
            strip_docs: options.strip_docs,
            compression: options.compression,
        },
        launchers: Vec::new(),
    };
    if let Some(previous) = previous {
        manifest.runtime_modules.extend(previous.runtime_modules);
        for (module, sha) in previous.app_modules {
            manifest.app_modules.entry(module).or_insert(sha);
        }
        manifest.launchers = previous.launchers;
    }

    let image = RuntimeImage { layout, manifest };
    image.ensure_dirs()?;

    let bin_src = base.bin_dir();
    let copied = copy_trimmed_tree(&bin_src, &image.layout.runtime_bin_dir(), options)?;
    debug!(files = copied, "copied runtime executables");

    for name in &closure {
        install_runtime_module(base, name, &image.layout, options)?;
    }

    let stats = merge_entries(&loaded, &image.layout.app_dir())?;
    image.save()?;

    info!(
        image = %image_root.display(),
        runtime = %format!("{} {}", base.name(), base.version()),
        runtime_modules = closure.len(),
        app_modules = artifacts.len(),
        written = stats.written,
        unchanged = stats.unchanged,
        skipped_duplicates = stats.skipped_duplicates,
        additive = options.additive,
        "runtime image built"
    );
    Ok(image)
}

/// Module names listed in the requirements entry of one archive.
pub fn declared_requirements(entries: &[ArchiveEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.path == Path::new(RUNTIME_REQUIRES_ENTRY))
        .flat_map(|e| {
            String::from_utf8_lossy(&e.data)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Merge every artifact's entries into `app_dir`, first writer winning.
///
/// Content already in `app_dir` from an earlier additive run counts as an
/// earlier writer: an entry that would have to replace a directory, or sit
/// below an existing file, is skipped. Merging never removes anything.
pub fn merge_entries(
    loaded: &[(&ModuleArtifact, Vec<ArchiveEntry>)],
    app_dir: &Path,
) -> Result<MergeStats> {
    let mut policy = ExcludeDuplicates::new();
    let mut stats = MergeStats::default();

    for (artifact, entries) in loaded {
        for entry in entries {
            if let Some(owner) = policy.claim(&entry.path, &artifact.module) {
                debug!(
                    entry = %entry.path.display(),
                    kept = owner,
                    dropped = %artifact.module,
                    policy = ExcludeDuplicates::NAME,
                    "duplicate entry skipped"
                );
                stats.skipped_duplicates += 1;
                continue;
            }
            if blocked_on_disk(app_dir, &entry.path)? {
                debug!(
                    entry = %entry.path.display(),
                    dropped = %artifact.module,
                    policy = ExcludeDuplicates::NAME,
                    "entry collides with existing image content, skipped"
                );
                stats.skipped_duplicates += 1;
                continue;
            }
            let dest = app_dir.join(&entry.path);
            if write_if_changed(&dest, &entry.data, Some(entry.mode))? {
                stats.written += 1;
            } else {
                stats.unchanged += 1;
            }
        }
    }
    Ok(stats)
}

/// Whether writing `rel` under `app_dir` would clobber a directory or need
/// to turn an existing file into one.
fn blocked_on_disk(app_dir: &Path, rel: &Path) -> Result<bool> {
    let dest = app_dir.join(rel);
    match fs::symlink_metadata(&dest) {
        Ok(md) => return Ok(md.is_dir()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).at_path(&dest),
    }
    // The nearest existing ancestor decides; it has to be a real directory.
    for ancestor in rel.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        let dir = app_dir.join(ancestor);
        match fs::symlink_metadata(&dir) {
            Ok(md) => return Ok(!md.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).at_path(&dir),
        }
    }
    Ok(false)
}

/// Whether the trimming options drop `rel` from the image.
pub fn is_trimmed(rel: &Path, options: &ImageOptions) -> bool {
    if options.strip_debug
        && rel
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| DEBUG_SUFFIXES.contains(&ext))
    {
        return true;
    }
    if options.strip_docs {
        if let Some(parent) = rel.parent() {
            return parent.components().any(|c| match c {
                Component::Normal(part) => part.to_str().is_some_and(|p| DOC_DIRS.contains(&p)),
                _ => false,
            });
        }
    }
    false
}

fn copy_trimmed_tree(src: &Path, dst: &Path, options: &ImageOptions) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for rel in relative_files(src)? {
        if is_trimmed(&rel, options) {
            continue;
        }
        sync_entry(&src.join(&rel), &dst.join(&rel))?;
        copied += 1;
    }
    Ok(copied)
}

fn install_runtime_module(
    base: &BaseRuntime,
    name: &str,
    layout: &ImageLayout,
    options: &ImageOptions,
) -> Result<()> {
    let src = base.module_dir(name);
    if options.compression == 0 {
        let copied = copy_trimmed_tree(&src, &layout.modules_dir().join(name), options)?;
        debug!(module = name, files = copied, "installed runtime module");
        return Ok(());
    }

    let files: Vec<_> = relative_files(&src)?
        .into_iter()
        .filter(|rel| !is_trimmed(rel, options))
        .collect();
    let packed = pack_tar_zst(&src, &files, i32::from(options.compression))?;
    let dest = layout.modules_dir().join(format!("{name}.tar.zst"));
    let changed = write_if_changed(&dest, &packed, Some(0o644))?;
    debug!(
        module = name,
        files = files.len(),
        level = options.compression,
        changed,
        "packed runtime module"
    );
    Ok(())
}

pub struct BuildRuntimeImage;

impl Stage for BuildRuntimeImage {
    fn id(&self) -> StageId {
        StageId::BuildRuntimeImage
    }

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()> {
        let base = BaseRuntime::load(&config.base_runtime)?;
        let image = build_runtime_image(
            &base,
            ctx.artifacts()?.as_slice(),
            &config.image,
            &config.image_root(),
        )?;
        ctx.image = Some(image);
        Ok(())
    }
}
