#![cfg(unix)]

use std::{
    fs::{self, File},
    io::Write,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use apkpipe_build::{
    BuildEvent, BuildPipeline, BuildQueue, BuildRequest, ChannelSink, CustomKeystore,
    EventSink, KeystoreKind, KeystoreManager, NullSink, SigningConfig, Stage, StageStatus,
    Variant,
};
use apkpipe_toolchain::{ToolInvocation, ToolchainInfo, APKSIGNER, D8};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use zip::{write::FileOptions, ZipArchive, ZipWriter};

const AAPT2: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$@" >> "$dir/aapt2.args"
cmd="$1"; shift
out=""; gen=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    --java) gen="$2"; shift ;;
  esac
  shift
done
case "$cmd" in
  compile) echo compiled > "$out" ;;
  link)
    mkdir -p "$gen/com/example/app"
    echo "package com.example.app; public final class R {}" > "$gen/com/example/app/R.java"
    cp "$dir/skeleton.apk" "$out" ;;
  *) echo "unknown command $cmd" >&2; exit 2 ;;
esac
"#;

const FAILING_AAPT2: &str = r#"#!/bin/sh
case "$1" in
  compile)
    while [ $# -gt 0 ]; do [ "$1" = "-o" ] && out="$2"; shift; done
    echo compiled > "$out" ;;
  link) echo "resource linking failed" >&2; exit 3 ;;
esac
"#;

/// Links the package but emits no `R.java`.
const SOURCELESS_AAPT2: &str = r#"#!/bin/sh
dir=$(dirname "$0")
cmd="$1"; shift
while [ $# -gt 0 ]; do [ "$1" = "-o" ] && out="$2"; shift; done
case "$cmd" in
  compile) echo compiled > "$out" ;;
  link) cp "$dir/skeleton.apk" "$out" ;;
esac
"#;

/// Exits cleanly without writing a single class file.
const SILENT_JAVAC: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/javac.args"
"#;

const JAVAC: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/javac.args"
out=""
for arg in "$@"; do
  if [ "$prev" = "-d" ]; then out="$arg"; fi
  case "$arg" in
    *.java) name=$(basename "$arg" .java); touch "$out/$name.class" ;;
  esac
  prev="$arg"
done
"#;

const D8_TOOL: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/d8.args"
out=""
while [ $# -gt 0 ]; do
  [ "$1" = "--output" ] && out="$2"
  shift
done
printf 'dex\n035' > "$out/classes.dex"
"#;

const ZIPALIGN: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/zipalign.args"
cp "$3" "$4"
"#;

const APKSIGNER_TOOL: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/apksigner.args"
out=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    *) input="$1" ;;
  esac
  shift
done
cp "$input" "$out"
"#;

const KEYTOOL: &str = r#"#!/bin/sh
ks=""
while [ $# -gt 0 ]; do
  [ "$1" = "-keystore" ] && ks="$2"
  shift
done
echo "alias=androiddebugkey" > "$ks"
"#;

/// Launches the jar-packaged tools by dispatching to the native stand-ins.
const JAVA: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$@" >> "$dir/java.args"
case "$2" in
  -cp) shift 4; exec "$dir/d8" "$@" ;;
  -jar) shift 3; exec "$dir/apksigner" "$@" ;;
esac
exit 1
"#;

struct Fixture {
    _tmp: TempDir,
    tools: PathBuf,
    base: PathBuf,
    project: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let tools = tmp.path().join("tools");
        let base = tmp.path().join("base");
        let project = tmp.path().join("MyApp");
        fs::create_dir_all(&tools).unwrap();
        fs::create_dir_all(&base).unwrap();

        for (name, body) in [
            ("aapt2", AAPT2),
            ("javac", JAVAC),
            ("d8", D8_TOOL),
            ("zipalign", ZIPALIGN),
            ("apksigner", APKSIGNER_TOOL),
            ("keytool", KEYTOOL),
            ("java", JAVA),
        ] {
            write_script(&tools.join(name), body);
        }
        fs::write(tools.join("android.jar"), b"").unwrap();
        fs::write(tools.join("d8.jar"), b"").unwrap();
        fs::write(tools.join("apksigner.jar"), b"").unwrap();
        write_skeleton_apk(&tools.join("skeleton.apk"));

        let main = project.join("app/src/main");
        fs::create_dir_all(main.join("res/values")).unwrap();
        fs::write(
            main.join("AndroidManifest.xml"),
            r#"<manifest package="com.example.app"/>"#,
        )
        .unwrap();
        fs::write(
            main.join("res/values/strings.xml"),
            r#"<resources><string name="app_name">MyApp</string></resources>"#,
        )
        .unwrap();

        Self {
            _tmp: tmp,
            tools,
            base,
            project,
        }
    }

    fn toolchain(&self) -> ToolchainInfo {
        ToolchainInfo {
            java: self.tools.join("java"),
            javac: self.tools.join("javac"),
            keytool: Some(self.tools.join("keytool")),
            tools_dir: self.tools.clone(),
            aapt2: self.tools.join("aapt2"),
            zipalign: self.tools.join("zipalign"),
            android_jar: self.tools.join("android.jar"),
            dexer: Some(ToolInvocation::Direct {
                program: self.tools.join("d8"),
            }),
            signer: Some(ToolInvocation::Direct {
                program: self.tools.join("apksigner"),
            }),
        }
    }

    fn pipeline_with(&self, toolchain: ToolchainInfo, sink: Arc<dyn EventSink>) -> BuildPipeline {
        BuildPipeline::new(
            toolchain,
            Arc::new(KeystoreManager::for_base_dir(&self.base)),
            sink,
        )
    }

    fn pipeline(&self) -> BuildPipeline {
        self.pipeline_with(self.toolchain(), Arc::new(NullSink))
    }

    fn args(&self, tool: &str) -> String {
        fs::read_to_string(self.tools.join(format!("{tool}.args"))).unwrap_or_default()
    }

    fn work_dir(&self) -> PathBuf {
        self.project.join("app/build_manual")
    }

    fn custom_keystore(&self) -> SigningConfig {
        let path = self.base.join("release.jks");
        fs::write(&path, b"release").unwrap();
        SigningConfig {
            auto_sign: true,
            custom_keystore: Some(CustomKeystore {
                path: path.to_string_lossy().to_string(),
                store_password: "storepw".into(),
                key_alias: "upload".into(),
                key_password: "keypw".into(),
            }),
        }
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn write_skeleton_apk(path: &Path) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    zip.start_file("AndroidManifest.xml", FileOptions::default())
        .unwrap();
    zip.write_all(b"binary manifest").unwrap();
    zip.start_file("resources.arsc", FileOptions::default())
        .unwrap();
    zip.write_all(b"resource table").unwrap();
    zip.finish().unwrap();
}

fn entry_names(apk: &Path) -> Vec<String> {
    let archive = ZipArchive::new(File::open(apk).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

fn drain(rx: &mut UnboundedReceiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn stage_events(events: &[BuildEvent]) -> Vec<(Stage, StageStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            BuildEvent::Stage { stage, status } => Some((*stage, *status)),
            _ => None,
        })
        .collect()
}

fn full_run() -> Vec<(Stage, StageStatus)> {
    Stage::ALL
        .iter()
        .flat_map(|stage| {
            [
                (*stage, StageStatus::Started),
                (*stage, StageStatus::Succeeded),
            ]
        })
        .collect()
}

#[tokio::test]
async fn generated_sources_alone_build_a_signed_package() {
    let fx = Fixture::new();
    let (sink, mut rx) = ChannelSink::new();
    let pipeline = fx.pipeline_with(fx.toolchain(), Arc::new(sink));

    let result = pipeline
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    let package = fx.project.join("output_debug.apk");
    assert_eq!(result.package.as_deref(), Some(package.as_path()));
    assert_eq!(result.keystore, Some(KeystoreKind::Debug));
    assert_eq!(result.sha256.as_ref().map(String::len), Some(64));
    assert_eq!(result.size_bytes, Some(fs::metadata(&package).unwrap().len()));

    let names = entry_names(&package);
    assert_eq!(names.iter().filter(|n| *n == "classes.dex").count(), 1);
    assert!(names.contains(&"resources.arsc".to_string()));

    let javac = fx.args("javac");
    assert!(javac.contains("-source 1.8 -target 1.8"));
    assert!(javac.contains("R.java"));
    assert!(fx.args("d8").contains("--min-api 21 --lib"));
    assert!(fx.args("zipalign").starts_with("-f 4 "));
    let signer = fx.args("apksigner");
    assert!(signer.contains(&format!(
        "--ks {} --ks-pass pass:android",
        fx.base.join("debug.keystore").display()
    )));
    assert!(!signer.contains("--ks-key-alias"));

    assert!(result.log.iter().any(|l| l.starts_with("Step 7: ")));
    assert!(result
        .log
        .iter()
        .any(|l| l.starts_with("DEBUG BUILD SUCCESSFUL! APK at:")));
    assert!(result.log.iter().all(|l| !l.contains("pass:android")));

    let events = drain(&mut rx);
    assert_eq!(stage_events(&events), full_run());
    assert_eq!(
        events.iter().rev().find_map(|e| match e {
            BuildEvent::Progress { percent } => Some(*percent),
            _ => None,
        }),
        Some(100)
    );
}

#[tokio::test]
async fn release_with_missing_custom_keystore_falls_back_to_debug() {
    let fx = Fixture::new();
    let signing = SigningConfig {
        auto_sign: true,
        custom_keystore: Some(CustomKeystore {
            path: fx.base.join("nope.jks").to_string_lossy().to_string(),
            store_password: "storepw".into(),
            key_alias: "upload".into(),
            key_password: "keypw".into(),
        }),
    };

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Release).with_signing(signing))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    assert_eq!(
        result.package,
        Some(fx.project.join("output_release.apk"))
    );
    assert_eq!(result.keystore, Some(KeystoreKind::Debug));
    assert!(result
        .log
        .iter()
        .any(|l| l.starts_with("Warning: Custom keystore info incomplete")));
    assert!(fx.args("apksigner").contains("pass:android"));
    assert!(fx.base.join("debug.keystore").is_file());
}

#[tokio::test]
async fn release_with_custom_keystore_signs_with_it() {
    let fx = Fixture::new();
    let signing = fx.custom_keystore();

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Release).with_signing(signing))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    assert_eq!(result.keystore, Some(KeystoreKind::Custom));
    let signer = fx.args("apksigner");
    assert!(signer.contains("--ks-pass pass:storepw --ks-key-alias upload --key-pass pass:keypw"));
    assert!(!fx.base.join("debug.keystore").exists());
}

#[tokio::test]
async fn debug_with_auto_sign_ignores_custom_keystore() {
    let fx = Fixture::new();
    let signing = fx.custom_keystore();

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Debug).with_signing(signing))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    assert_eq!(result.keystore, Some(KeystoreKind::Debug));
    assert!(fx.args("apksigner").contains("debug.keystore"));
    assert!(!result.log.iter().any(|l| l.starts_with("Warning:")));
}

#[tokio::test]
async fn failing_stage_reports_stderr_and_keeps_work_dir() {
    let fx = Fixture::new();
    write_script(&fx.tools.join("aapt2"), FAILING_AAPT2);
    let (sink, mut rx) = ChannelSink::new();
    let pipeline = fx.pipeline_with(fx.toolchain(), Arc::new(sink));

    let result = pipeline
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage(), Some(Stage::LinkResources));
    let message = result.message();
    assert!(message.contains("exit code 3"), "{message}");
    assert!(message.contains("resource linking failed"), "{message}");
    assert!(fx.work_dir().join("compiled_res.zip").is_file());
    assert!(!fx.project.join("output_debug.apk").exists());
    assert!(fx.args("javac").is_empty());

    let stages = stage_events(&drain(&mut rx));
    assert_eq!(
        stages.last(),
        Some(&(Stage::LinkResources, StageStatus::Failed))
    );
    assert!(!stages.iter().any(|(stage, _)| *stage == Stage::CompileSources));
}

#[tokio::test]
async fn rebuild_reuses_work_dir_without_stale_classes() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline();
    let req = BuildRequest::new(&fx.project, Variant::Debug);

    assert!(pipeline.run(&req).await.success);
    fs::write(fx.work_dir().join("obj/Stale.class"), b"").unwrap();
    fs::remove_file(fx.tools.join("d8.args")).unwrap();

    let second = pipeline.run(&req).await;
    assert!(second.success, "rebuild failed: {:?}", second.log);
    assert!(!fx.args("d8").contains("Stale.class"));
    let names = entry_names(&fx.project.join("output_debug.apk"));
    assert_eq!(names.iter().filter(|n| *n == "classes.dex").count(), 1);
}

#[tokio::test]
async fn missing_signer_fails_the_sign_stage() {
    let fx = Fixture::new();
    let mut toolchain = fx.toolchain();
    toolchain.signer = None;

    let result = fx
        .pipeline_with(toolchain, Arc::new(NullSink))
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage(), Some(Stage::Sign));
    assert!(result.message().contains("apksigner"));
    assert!(fx.work_dir().join("aligned.apk").is_file());
}

#[tokio::test]
async fn jar_packaged_tools_run_through_java() {
    let fx = Fixture::new();
    let mut toolchain = fx.toolchain();
    toolchain.dexer = Some(ToolInvocation::for_path(
        &fx.tools.join("d8.jar"),
        &D8,
        &toolchain.java,
    ));
    toolchain.signer = Some(ToolInvocation::for_path(
        &fx.tools.join("apksigner.jar"),
        &APKSIGNER,
        &toolchain.java,
    ));

    let result = fx
        .pipeline_with(toolchain, Arc::new(NullSink))
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    let java = fx.args("java");
    assert!(java.contains("-Xmx1024M -cp"));
    assert!(java.contains("com.android.tools.r8.D8 --min-api 21"));
    assert!(java.contains("-Xmx1024M -jar"));
}

#[tokio::test]
async fn queued_builds_of_one_project_do_not_interleave() {
    let fx = Fixture::new();
    let (sink, mut rx) = ChannelSink::new();
    let queue = BuildQueue::new(fx.pipeline_with(fx.toolchain(), Arc::new(sink)));

    let first = queue.submit(BuildRequest::new(&fx.project, Variant::Debug));
    let second = queue.submit(BuildRequest::new(&fx.project, Variant::Release));
    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert!(first.success && second.success);

    let mut expected = full_run();
    expected.extend(full_run());
    assert_eq!(stage_events(&drain(&mut rx)), expected);
    assert!(!queue.is_busy(&fx.project));
}

#[tokio::test]
async fn link_without_generated_sources_fails_before_compiling() {
    let fx = Fixture::new();
    write_script(&fx.tools.join("aapt2"), SOURCELESS_AAPT2);

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage(), Some(Stage::LinkResources));
    let message = result.message();
    assert!(message.contains("no Java sources"), "{message}");
    assert!(fx.work_dir().join("unsigned.apk").is_file());
    assert!(fx.args("javac").is_empty());
    assert!(!fx.project.join("output_debug.apk").exists());
}

#[tokio::test]
async fn compile_without_class_files_fails_the_dex_stage() {
    let fx = Fixture::new();
    write_script(&fx.tools.join("javac"), SILENT_JAVAC);

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Debug))
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_stage(), Some(Stage::Dex));
    let message = result.message();
    assert!(message.contains("no class files found"), "{message}");
    assert!(fx.args("javac").contains("R.java"));
    assert!(fx.args("d8").is_empty());
    assert!(!fx.work_dir().join("classes.dex").exists());
}

#[tokio::test]
async fn store_password_with_slashes_reaches_the_signer_verbatim() {
    let fx = Fixture::new();
    let mut signing = fx.custom_keystore();
    if let Some(custom) = signing.custom_keystore.as_mut() {
        custom.store_password = "s3cr/../et".into();
        custom.key_password = "k//ey/".into();
    }

    let result = fx
        .pipeline()
        .run(&BuildRequest::new(&fx.project, Variant::Release).with_signing(signing))
        .await;

    assert!(result.success, "build failed: {:?}", result.log);
    assert_eq!(result.keystore, Some(KeystoreKind::Custom));
    let signer = fx.args("apksigner");
    assert!(
        signer.contains("--ks-pass pass:s3cr/../et --ks-key-alias upload --key-pass pass:k//ey/"),
        "{signer}"
    );
    assert!(result.log.iter().all(|l| !l.contains("s3cr")));
}
