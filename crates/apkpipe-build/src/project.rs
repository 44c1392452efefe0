use std::{
    fs, io,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::config::Variant;
use crate::error::BuildError;

pub const WORK_DIR_NAME: &str = "build_manual";
pub const DEX_ENTRY_NAME: &str = "classes.dex";

/// Where a generated project keeps its inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub app_dir: PathBuf,
    pub res_dir: PathBuf,
    pub manifest: PathBuf,
    pub java_src: PathBuf,
    pub work_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: &Path) -> Self {
        let app_dir = root.join("app");
        let src_main = app_dir.join("src").join("main");
        Self {
            root: root.to_path_buf(),
            res_dir: src_main.join("res"),
            manifest: src_main.join("AndroidManifest.xml"),
            java_src: src_main.join("java"),
            work_dir: app_dir.join(WORK_DIR_NAME),
            app_dir,
        }
    }

    /// The skeleton must be generated before stage 1 runs.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.root.is_dir() {
            return Err(BuildError::InvalidProject(format!(
                "project directory not found: {}",
                self.root.display()
            )));
        }
        if !self.manifest.is_file() {
            return Err(BuildError::InvalidProject(format!(
                "manifest not found: {}",
                self.manifest.display()
            )));
        }
        if !self.res_dir.is_dir() {
            return Err(BuildError::InvalidProject(format!(
                "resource directory not found: {}",
                self.res_dir.display()
            )));
        }
        Ok(())
    }
}

/// Intermediate files of one run. All of them live in the project's reused
/// work directory except the final package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageArtifacts {
    pub compiled_resources: PathBuf,
    pub unsigned_package: PathBuf,
    pub generated_sources: PathBuf,
    pub class_dir: PathBuf,
    pub dex_file: PathBuf,
    pub aligned_package: PathBuf,
    pub final_package: PathBuf,
}

impl StageArtifacts {
    pub fn new(layout: &ProjectLayout, variant: Variant) -> Self {
        let work = &layout.work_dir;
        Self {
            compiled_resources: work.join("compiled_res.zip"),
            unsigned_package: work.join("unsigned.apk"),
            generated_sources: work.join("gen"),
            class_dir: work.join("obj"),
            dex_file: work.join(DEX_ENTRY_NAME),
            aligned_package: work.join("aligned.apk"),
            final_package: layout.root.join(variant.output_file_name()),
        }
    }
}

/// Recreates a stage-owned output directory so nothing from an earlier run
/// can leak into the next stage.
pub(crate) fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

pub(crate) fn remove_stale_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Files under `dir` with the given extension, in a stable order.
pub(crate) fn collect_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .collect()
}
