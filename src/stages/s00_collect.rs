//! Artifact Collector: one archive per project module.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{self, ArchiveEntry};
use crate::config::{AssemblyConfig, ModuleSpec};
use crate::error::{AssemblyError, Result};
use crate::stages::{Stage, StageContext, StageId};

/// A module's archive as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
    pub module: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

impl ModuleArtifact {
    /// Read the archive's regular-file entries.
    pub fn entries(&self) -> Result<Vec<ArchiveEntry>> {
        archive::read_entries(&self.path)
    }
}

/// Collected artifacts, in module declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedArtifacts {
    artifacts: Vec<ModuleArtifact>,
}

impl CollectedArtifacts {
    pub fn as_slice(&self) -> &[ModuleArtifact] {
        &self.artifacts
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleArtifact> {
        self.artifacts.iter()
    }

    pub fn get(&self, module: &str) -> Option<&ModuleArtifact> {
        self.artifacts.iter().find(|a| a.module == module)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Conventional archive locations for `module`, in lookup order.
pub fn conventional_candidates(artifacts_dir: &Path, module: &str) -> [PathBuf; 2] {
    [
        artifacts_dir.join(format!("{module}.tar")),
        artifacts_dir.join(format!("{module}.tar.zst")),
    ]
}

/// Locate and fingerprint every module's archive.
///
/// The first module without an archive stops collection; nothing
/// downstream may proceed with a partial set.
pub fn collect_artifacts(modules: &[ModuleSpec], artifacts_dir: &Path) -> Result<CollectedArtifacts> {
    let mut seen = BTreeSet::new();
    let mut artifacts = Vec::with_capacity(modules.len());

    for module in modules {
        if !seen.insert(module.id.as_str()) {
            return Err(AssemblyError::ConfigConflict(format!(
                "module '{}' is listed more than once",
                module.id
            )));
        }

        let checked: Vec<PathBuf> = match &module.archive {
            Some(explicit) => vec![explicit.clone()],
            None => conventional_candidates(artifacts_dir, &module.id).to_vec(),
        };
        let Some(path) = checked.iter().find(|p| p.is_file()).cloned() else {
            return Err(AssemblyError::MissingArtifact {
                module: module.id.clone(),
                checked,
            });
        };

        let (sha256, size_bytes) = archive::sha256_file(&path)?;
        debug!(module = %module.id, path = %path.display(), %sha256, "collected artifact");
        artifacts.push(ModuleArtifact {
            module: module.id.clone(),
            path,
            sha256,
            size_bytes,
        });
    }

    Ok(CollectedArtifacts { artifacts })
}

pub struct CollectArtifacts;

impl Stage for CollectArtifacts {
    fn id(&self) -> StageId {
        StageId::CollectArtifacts
    }

    fn run(&self, config: &AssemblyConfig, ctx: &mut StageContext) -> Result<()> {
        let collected = collect_artifacts(&config.modules, &config.artifacts_dir)?;
        info!(modules = collected.len(), "all module artifacts present");
        ctx.artifacts = Some(collected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_archive;
    use tempfile::TempDir;

    #[test]
    fn collects_in_declaration_order() {
        let temp = TempDir::new().unwrap();
        let libs = temp.path().join("libs");
        write_archive(&libs.join("b.tar"), &[("y.class", b"Y")]);
        write_archive(&libs.join("a.tar.zst"), &[("x.class", b"X")]);

        let modules = [ModuleSpec::new("b"), ModuleSpec::new("a")];
        let collected = collect_artifacts(&modules, &libs).unwrap();

        let ids: Vec<_> = collected.iter().map(|a| a.module.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(collected.get("a").unwrap().path, libs.join("a.tar.zst"));
        assert_eq!(collected.get("b").unwrap().sha256.len(), 64);
    }

    #[test]
    fn collection_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let libs = temp.path().join("libs");
        write_archive(&libs.join("a.tar"), &[("x.class", b"X")]);
        write_archive(&libs.join("b.tar"), &[("y.class", b"Y")]);
        let modules = [ModuleSpec::new("a"), ModuleSpec::new("b")];

        let first = collect_artifacts(&modules, &libs).unwrap();
        let second = collect_artifacts(&modules, &libs).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_archive_path_wins() {
        let temp = TempDir::new().unwrap();
        let custom = temp.path().join("elsewhere/cli.tar");
        write_archive(&custom, &[("m.class", b"M")]);

        let modules = [ModuleSpec {
            id: "cli".into(),
            archive: Some(custom.clone()),
        }];
        let collected = collect_artifacts(&modules, &temp.path().join("libs")).unwrap();
        assert_eq!(collected.get("cli").unwrap().path, custom);
    }

    #[test]
    fn missing_archive_fails_fast() {
        let temp = TempDir::new().unwrap();
        let libs = temp.path().join("libs");
        write_archive(&libs.join("a.tar"), &[("x.class", b"X")]);

        let modules = [ModuleSpec::new("a"), ModuleSpec::new("ghost")];
        let err = collect_artifacts(&modules, &libs).unwrap_err();
        match err {
            AssemblyError::MissingArtifact { module, checked } => {
                assert_eq!(module, "ghost");
                assert_eq!(checked.len(), 2);
                assert_eq!(checked[0], libs.join("ghost.tar"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_module_is_a_conflict() {
        let temp = TempDir::new().unwrap();
        let libs = temp.path().join("libs");
        write_archive(&libs.join("a.tar"), &[("x.class", b"X")]);

        let modules = [ModuleSpec::new("a"), ModuleSpec::new("a")];
        assert!(matches!(
            collect_artifacts(&modules, &libs).unwrap_err(),
            AssemblyError::ConfigConflict(_)
        ));
    }
}
