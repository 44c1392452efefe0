use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use apkpipe_toolchain::{hashing, tools::path_arg, CommandRunner, LogLevel, LogSink, ToolchainInfo};
use serde::Serialize;
use tracing::{info, warn};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::config::{BuildRequest, Variant};
use crate::error::{BuildError, StageContext, StageError};
use crate::events::{BuildLog, EventSink, StageStatus};
use crate::keystore::{Keystore, KeystoreManager};
use crate::project::{
    collect_files, remove_stale_file, reset_dir, ProjectLayout, StageArtifacts, DEX_ENTRY_NAME,
};
use crate::signing::{select_keystore, signer_args, KeystoreChoice, KeystoreKind};
use crate::stage::Stage;

pub const MIN_API_LEVEL: u32 = 21;
pub const JAVA_RELEASE: &str = "1.8";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BuildFailure {
    pub stage: Option<Stage>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildResult {
    pub success: bool,
    pub project_root: PathBuf,
    pub variant: Variant,
    pub package: Option<PathBuf>,
    pub failure: Option<BuildFailure>,
    pub keystore: Option<KeystoreKind>,
    pub sha256: Option<String>,
    pub size_bytes: Option<u64>,
    pub log: Vec<String>,
}

impl BuildResult {
    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().and_then(|f| f.stage)
    }

    pub fn message(&self) -> String {
        match (&self.failure, &self.package) {
            (Some(failure), _) => failure.message.clone(),
            (None, Some(package)) => format!("APK at: {}", package.display()),
            (None, None) => String::new(),
        }
    }
}

struct Completed {
    package: PathBuf,
    keystore: KeystoreKind,
}

/// Runs the seven build stages for one project against a resolved toolchain.
pub struct BuildPipeline {
    toolchain: Arc<ToolchainInfo>,
    keystores: Arc<KeystoreManager>,
    sink: Arc<dyn EventSink>,
}

impl BuildPipeline {
    pub fn new(
        toolchain: ToolchainInfo,
        keystores: Arc<KeystoreManager>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            toolchain: Arc::new(toolchain),
            keystores,
            sink,
        }
    }

    /// Never returns early on failure: every outcome ends up in the result.
    pub async fn run(&self, req: &BuildRequest) -> BuildResult {
        let log = BuildLog::new(self.sink.clone());
        let mut keystore = None;
        let outcome = self.execute(req, &log, &mut keystore).await;

        match outcome {
            Ok(done) => {
                let digest = match hashing::sha256_file(&done.package) {
                    Ok(digest) => Some(digest),
                    Err(err) => {
                        log.warn(&format!(
                            "could not hash {}: {err}",
                            done.package.display()
                        ));
                        None
                    }
                };
                log.info(&format!(
                    "{} BUILD SUCCESSFUL! APK at: {}",
                    req.variant.label().to_uppercase(),
                    done.package.display()
                ));
                info!(
                    project = %req.project_root.display(),
                    variant = %req.variant,
                    "build succeeded"
                );
                let (sha256, size_bytes) = digest.unzip();
                BuildResult {
                    success: true,
                    project_root: req.project_root.clone(),
                    variant: req.variant,
                    package: Some(done.package),
                    failure: None,
                    keystore: Some(done.keystore),
                    sha256,
                    size_bytes,
                    log: log.into_lines(),
                }
            }
            Err(err) => {
                let stage = err.stage();
                if let Some(stage) = stage {
                    log.stage(stage, StageStatus::Failed);
                }
                let message = err.to_string();
                log.log(LogLevel::Error, &format!("BUILD FAILED: {message}"));
                warn!(
                    project = %req.project_root.display(),
                    variant = %req.variant,
                    "build failed: {message}"
                );
                BuildResult {
                    success: false,
                    project_root: req.project_root.clone(),
                    variant: req.variant,
                    package: None,
                    failure: Some(BuildFailure { stage, message }),
                    keystore,
                    sha256: None,
                    size_bytes: None,
                    log: log.into_lines(),
                }
            }
        }
    }

    async fn execute(
        &self,
        req: &BuildRequest,
        log: &BuildLog,
        chosen: &mut Option<KeystoreKind>,
    ) -> Result<Completed, BuildError> {
        let layout = ProjectLayout::new(&req.project_root);
        layout.validate()?;
        fs::create_dir_all(&layout.work_dir).map_err(|err| {
            BuildError::InvalidProject(format!(
                "cannot create work directory {}: {err}",
                layout.work_dir.display()
            ))
        })?;

        let artifacts = StageArtifacts::new(&layout, req.variant);
        let runner = CommandRunner::new(log);
        let tc = &*self.toolchain;
        log.info(&format!(
            "Starting {} build of {}",
            req.variant,
            layout.root.display()
        ));

        self.begin(log, Stage::CompileResources, "Compiling resources...");
        runner
            .run(&[
                path_arg(&tc.aapt2),
                "compile".into(),
                "--dir".into(),
                path_arg(&layout.res_dir),
                "-o".into(),
                path_arg(&artifacts.compiled_resources),
            ])
            .await
            .at(Stage::CompileResources)?;
        self.finish(log, Stage::CompileResources);

        self.begin(log, Stage::LinkResources, "Linking resources and generating R.java...");
        reset_dir(&artifacts.generated_sources)
            .map_err(|err| StageError::io("reset generated source directory", err))
            .at(Stage::LinkResources)?;
        runner
            .run(&[
                path_arg(&tc.aapt2),
                "link".into(),
                "-I".into(),
                path_arg(&tc.android_jar),
                "--manifest".into(),
                path_arg(&layout.manifest),
                path_arg(&artifacts.compiled_resources),
                "-o".into(),
                path_arg(&artifacts.unsigned_package),
                "--java".into(),
                path_arg(&artifacts.generated_sources),
                "--auto-add-overlay".into(),
            ])
            .await
            .at(Stage::LinkResources)?;
        let generated = collect_files(&artifacts.generated_sources, "java");
        if generated.is_empty() {
            return Err(StageError::Output(format!(
                "linker generated no Java sources in {}",
                artifacts.generated_sources.display()
            )))
            .at(Stage::LinkResources);
        }
        self.finish(log, Stage::LinkResources);

        self.begin(log, Stage::CompileSources, "Compiling Java sources...");
        reset_dir(&artifacts.class_dir)
            .map_err(|err| StageError::io("reset class output directory", err))
            .at(Stage::CompileSources)?;
        let mut sources = collect_files(&layout.java_src, "java");
        sources.extend(generated);
        let mut javac = vec![
            path_arg(&tc.javac),
            "-source".into(),
            JAVA_RELEASE.into(),
            "-target".into(),
            JAVA_RELEASE.into(),
            "-d".into(),
            path_arg(&artifacts.class_dir),
            "-cp".into(),
            path_arg(&tc.android_jar),
        ];
        javac.extend(sources.iter().map(|p| path_arg(p)));
        runner.run(&javac).await.at(Stage::CompileSources)?;
        self.finish(log, Stage::CompileSources);

        self.begin(log, Stage::Dex, "Converting classes to DEX...");
        let classes = collect_files(&artifacts.class_dir, "class");
        if classes.is_empty() {
            return Err(StageError::Output(format!(
                "no class files found in {}",
                artifacts.class_dir.display()
            )))
            .at(Stage::Dex);
        }
        let dexer = tc.dexer().at(Stage::Dex)?;
        remove_stale_file(&artifacts.dex_file)
            .map_err(|err| StageError::io("remove previous classes.dex", err))
            .at(Stage::Dex)?;
        let mut dex_args = vec![
            "--min-api".to_string(),
            MIN_API_LEVEL.to_string(),
            "--lib".into(),
            path_arg(&tc.android_jar),
            "--output".into(),
            path_arg(&layout.work_dir),
        ];
        dex_args.extend(classes.iter().map(|p| path_arg(p)));
        runner.run(&dexer.command(dex_args)).await.at(Stage::Dex)?;
        if !artifacts.dex_file.is_file() {
            return Err(StageError::Output(format!(
                "dexer produced no {}",
                artifacts.dex_file.display()
            )))
            .at(Stage::Dex);
        }
        self.finish(log, Stage::Dex);

        self.begin(log, Stage::Merge, "Adding classes.dex to APK...");
        append_entry(&artifacts.unsigned_package, &artifacts.dex_file, DEX_ENTRY_NAME)
            .at(Stage::Merge)?;
        self.finish(log, Stage::Merge);

        self.begin(log, Stage::Align, "Aligning APK...");
        runner
            .run(&[
                path_arg(&tc.zipalign),
                "-f".into(),
                "4".into(),
                path_arg(&artifacts.unsigned_package),
                path_arg(&artifacts.aligned_package),
            ])
            .await
            .at(Stage::Align)?;
        self.finish(log, Stage::Align);

        let choice = select_keystore(req.variant, &req.signing, Path::is_file);
        let kind = choice.kind();
        *chosen = Some(kind);
        let keystore = match choice {
            KeystoreChoice::Custom(keystore) => {
                self.begin(log, Stage::Sign, "Signing APK (Custom keystore)...");
                keystore
            }
            KeystoreChoice::Debug { fallback } => {
                self.begin(log, Stage::Sign, "Signing APK (Debug keystore)...");
                if let Some(reason) = fallback {
                    log.warn(&format!(
                        "Custom keystore info incomplete ({reason}). Falling back to debug keystore."
                    ));
                }
                self.debug_keystore(log).await?
            }
        };
        let signer = tc.signer().at(Stage::Sign)?;
        runner
            .run(&signer.command(signer_args(
                &keystore,
                &artifacts.final_package,
                &artifacts.aligned_package,
            )))
            .await
            .at(Stage::Sign)?;
        if !artifacts.final_package.is_file() {
            return Err(StageError::Output(format!(
                "signer produced no {}",
                artifacts.final_package.display()
            )))
            .at(Stage::Sign);
        }
        self.finish(log, Stage::Sign);

        Ok(Completed {
            package: artifacts.final_package,
            keystore: kind,
        })
    }

    async fn debug_keystore(&self, log: &BuildLog) -> Result<Keystore, BuildError> {
        self.keystores
            .ensure(self.toolchain.keytool.as_deref(), log)
            .await
            .at(Stage::Sign)
    }

    fn begin(&self, log: &BuildLog, stage: Stage, what: &str) {
        log.stage(stage, StageStatus::Started);
        log.info(&format!("Step {}: {what}", stage.number()));
    }

    fn finish(&self, log: &BuildLog, stage: Stage) {
        log.stage(stage, StageStatus::Succeeded);
        log.progress(stage.percent_done());
    }
}

/// Adds `file` to an existing archive under `entry_name` without rewriting the
/// entries already present.
pub(crate) fn append_entry(archive: &Path, file: &Path, entry_name: &str) -> Result<(), StageError> {
    let existing = File::open(archive)
        .map_err(|err| StageError::io(format!("open {}", archive.display()), err))?;
    if ZipArchive::new(existing)?
        .file_names()
        .any(|name| name == entry_name)
    {
        return Err(StageError::Output(format!(
            "{} already contains {entry_name}",
            archive.display()
        )));
    }

    let handle = OpenOptions::new()
        .read(true)
        .write(true)
        .open(archive)
        .map_err(|err| StageError::io(format!("open {} for append", archive.display()), err))?;
    let mut writer = ZipWriter::new_append(handle)?;
    writer.start_file(
        entry_name,
        FileOptions::default().compression_method(CompressionMethod::Stored),
    )?;
    let mut input =
        File::open(file).map_err(|err| StageError::io(format!("open {}", file.display()), err))?;
    io::copy(&mut input, &mut writer)
        .map_err(|err| StageError::io(format!("write {entry_name}"), err))?;
    writer.finish()?;
    Ok(())
}
