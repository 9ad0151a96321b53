//! Full pipeline runs against a throwaway workspace.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use image_assembler::filesystem::relative_files;
use image_assembler::image::ImageLayout;
use image_assembler::pipeline::report::REPORT_FILE;
use image_assembler::runtime::BaseRuntime;
use image_assembler::stages::s01_runtime_image::build_runtime_image;
use image_assembler::{AssemblyConfig, Orchestrator, StageGraph, StageId, StageOutcome};
use tempfile::TempDir;

fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut builder = tar::Builder::new(fs::File::create(path).unwrap());
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

fn write_runtime(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::create_dir_all(root.join("modules/rt.base/lib")).unwrap();
    fs::create_dir_all(root.join("modules/rt.base/man")).unwrap();
    fs::write(
        root.join("runtime.toml"),
        "schema = 1\nname = \"e2e\"\nversion = \"21\"\nlauncher = \"bin/java\"\ncore = [\"rt.base\"]\n\n[[module]]\nname = \"rt.base\"\n",
    )
    .unwrap();
    fs::write(root.join("bin/java"), "#!/bin/sh\n").unwrap();
    fs::set_permissions(root.join("bin/java"), fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(root.join("modules/rt.base/lib/core.bin"), "core").unwrap();
    fs::write(root.join("modules/rt.base/man/rt.1"), "manual").unwrap();
}

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    /// Modules `lsp` then `cli`, both carrying `shared.txt`.
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write_runtime(&root.join("runtime"));
        write_tar(
            &root.join("build/libs/lsp.tar"),
            &[("x.class", b"X"), ("shared.txt", b"A")],
        );
        write_tar(
            &root.join("build/libs/cli.tar"),
            &[("y.class", b"Y"), ("shared.txt", b"B")],
        );
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::write(root.join("scripts/app.sh"), "#!/bin/sh\nexec runtime/bin/app \"$@\"\n").unwrap();
        Self { temp }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn config(&self, additive: bool) -> AssemblyConfig {
        let raw = format!(
            r#"
base_runtime = "runtime"
scripts_dir = "scripts"

[image]
additive = {additive}

[[modules]]
id = "lsp"

[[modules]]
id = "cli"

[launcher]
name = "app"
entry_class = "org.app.Main"
runtime_flags = ["--enable-preview"]

[[secondary_launchers]]
name = "tool"
entry_class = "org.app.Tool"
module = "cli"
runtime_flags = ["--enable-preview"]
"#
        );
        let path = self.root().join("assembly.toml");
        fs::write(&path, raw).unwrap();
        AssemblyConfig::load(&path).unwrap()
    }

    fn layout(&self) -> ImageLayout {
        ImageLayout::new(self.root().join("build/image"))
    }
}

fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    relative_files(root)
        .unwrap()
        .into_iter()
        .map(|rel| {
            let bytes = fs::read(root.join(&rel)).unwrap();
            (rel, bytes)
        })
        .collect()
}

#[test]
fn assembles_image_without_install_target() {
    let ws = Workspace::new();
    let config = ws.config(false);
    assert!(!StageGraph::for_config(&config).unwrap().contains(StageId::Install));

    let report = Orchestrator::new(config).unwrap().run().unwrap();
    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.stages.len(), 4);
    assert_eq!(report.outcome(StageId::Install), None);

    let layout = ws.layout();
    let app = layout.app_dir();
    assert_eq!(fs::read(app.join("x.class")).unwrap(), b"X");
    assert_eq!(fs::read(app.join("y.class")).unwrap(), b"Y");
    assert_eq!(fs::read_to_string(app.join("shared.txt")).unwrap(), "A");

    let bin = layout.runtime_bin_dir();
    let app_stub = fs::read_to_string(bin.join("app")).unwrap();
    assert!(app_stub.contains("--enable-preview -cp \"$DIR/lib/app\" org.app.Main"));
    assert!(bin.join("tool").is_file());
    assert!(bin.join("java").is_file());

    let script = layout.bin_dir().join("app");
    let mode = fs::metadata(&script).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
    assert!(!layout.bin_dir().join("app.sh").exists());

    assert!(layout.modules_dir().join("rt.base/lib/core.bin").is_file());
    assert!(!layout.modules_dir().join("rt.base/man").exists());
    assert!(ws.root().join("build").join(REPORT_FILE).is_file());
}

#[test]
fn installs_identical_copy_and_overwrites_on_reinstall() {
    let ws = Workspace::new();
    let target = ws.root().join("dist");
    let config = ws.config(false).with_install_dir(Some(target.clone()));
    assert!(StageGraph::for_config(&config).unwrap().contains(StageId::Install));

    let orchestrator = Orchestrator::new(config).unwrap();
    let report = orchestrator.run().unwrap();
    assert!(report.succeeded(), "{report:?}");
    let image_root = ws.layout().root().to_path_buf();
    assert_eq!(snapshot(&image_root), snapshot(&target));

    // Change the source of an image file, rebuild, and reinstall.
    write_tar(
        &ws.root().join("build/libs/lsp.tar"),
        &[("x.class", b"X2"), ("shared.txt", b"A")],
    );
    let report = orchestrator.run().unwrap();
    assert!(report.succeeded(), "{report:?}");
    assert_eq!(
        fs::read(target.join("runtime/lib/app/x.class")).unwrap(),
        b"X2"
    );
    assert_eq!(snapshot(&image_root), snapshot(&target));
}

#[test]
fn additive_rerun_is_byte_identical() {
    let ws = Workspace::new();
    let orchestrator = Orchestrator::new(ws.config(true)).unwrap();

    assert!(orchestrator.run().unwrap().succeeded());
    let first = snapshot(ws.layout().root());
    assert!(orchestrator.run().unwrap().succeeded());
    let second = snapshot(ws.layout().root());
    assert_eq!(first, second);
}

#[test]
fn launcher_collision_leaves_previous_image_untouched() {
    let ws = Workspace::new();
    assert!(Orchestrator::new(ws.config(false)).unwrap().run().unwrap().succeeded());
    let before = snapshot(ws.layout().root());

    let mut config = ws.config(false);
    config.launchers.secondary[0].name = "app".into();
    let report = Orchestrator::new(config).unwrap().run().unwrap();
    assert!(!report.succeeded());
    assert!(matches!(
        report.outcome(StageId::RegisterLaunchers),
        Some(StageOutcome::Failed { kind, .. }) if kind == "configuration-conflict"
    ));
    for stage in [StageId::CollectArtifacts, StageId::BuildRuntimeImage, StageId::InstallScripts] {
        assert_eq!(
            report.outcome(stage),
            Some(&StageOutcome::Blocked {
                by: "register-launchers".into()
            })
        );
    }
    assert_eq!(snapshot(ws.layout().root()), before);
}

#[test]
fn install_target_inside_image_fails_with_report() {
    let ws = Workspace::new();
    let target = ws.layout().root().join("dist");
    let config = ws.config(false).with_install_dir(Some(target.clone()));

    let report = Orchestrator::new(config).unwrap().run().unwrap();
    assert!(matches!(
        report.outcome(StageId::Install),
        Some(StageOutcome::Failed { kind, .. }) if kind == "invalid-configuration"
    ));
    assert_eq!(report.outcome(StageId::InstallScripts), Some(&StageOutcome::Succeeded));
    assert!(!target.exists());
    assert!(ws.root().join("build").join(REPORT_FILE).is_file());
}

#[test]
fn additive_run_with_no_modules_changes_nothing() {
    let ws = Workspace::new();
    assert!(Orchestrator::new(ws.config(true)).unwrap().run().unwrap().succeeded());
    let before = snapshot(ws.layout().root());

    let base = BaseRuntime::load(&ws.root().join("runtime")).unwrap();
    let image = build_runtime_image(
        &base,
        &[],
        &ws.config(true).image,
        ws.layout().root(),
    )
    .unwrap();
    assert_eq!(image.manifest.app_modules.len(), 2);
    assert_eq!(snapshot(ws.layout().root()), before);
}

#[test]
fn missing_artifact_blocks_everything_downstream() {
    let ws = Workspace::new();
    fs::remove_file(ws.root().join("build/libs/cli.tar")).unwrap();

    let report = Orchestrator::new(ws.config(false)).unwrap().run().unwrap();
    assert!(matches!(
        report.outcome(StageId::CollectArtifacts),
        Some(StageOutcome::Failed { kind, .. }) if kind == "missing-artifact"
    ));
    assert_eq!(
        report.outcome(StageId::BuildRuntimeImage),
        Some(&StageOutcome::Blocked {
            by: "collect-artifacts".into()
        })
    );
    assert!(!ws.layout().root().exists());
}
