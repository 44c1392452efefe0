use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::info;
use zip::ZipArchive;

use crate::hashing::sha256_file;
use crate::log::LogSink;
use crate::tools::exe_name;

pub const BUILD_TOOLS_ARCHIVE_ENV: &str = "APKPIPE_BUILD_TOOLS_ARCHIVE";
pub const PLATFORM_ARCHIVE_ENV: &str = "APKPIPE_PLATFORM_ARCHIVE";

const BUILD_TOOL_FILES: &[&str] = &[
    "aapt2",
    "aapt2.exe",
    "zipalign",
    "zipalign.exe",
    "d8",
    "d8.bat",
    "apksigner",
    "apksigner.bat",
];
const BUILD_TOOL_JARS: &[&str] = &["d8.jar", "apksigner.jar"];
const PLATFORM_LIBRARY: &str = "android.jar";

/// Provisions the minimal SDK binary set into a tools directory.
pub trait SdkInstaller: Send + Sync {
    fn ensure_installed(&self, tools_dir: &Path, sink: &dyn LogSink) -> Result<(), String>;
}

/// Binaries every build needs before stage 1 can start.
pub fn minimal_tool_paths(tools_dir: &Path) -> Vec<PathBuf> {
    vec![
        tools_dir.join(exe_name("aapt2")),
        tools_dir.join(exe_name("zipalign")),
        tools_dir.join(PLATFORM_LIBRARY),
    ]
}

pub fn missing_minimal_tools(tools_dir: &Path) -> Vec<PathBuf> {
    minimal_tool_paths(tools_dir)
        .into_iter()
        .filter(|path| !path.is_file())
        .collect()
}

/// Installer used when no SDK source is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredInstaller;

impl SdkInstaller for UnconfiguredInstaller {
    fn ensure_installed(&self, tools_dir: &Path, _sink: &dyn LogSink) -> Result<(), String> {
        let missing = missing_minimal_tools(tools_dir);
        if missing.is_empty() {
            return Ok(());
        }
        Err(format!(
            "missing {} and no SDK archives configured (set {BUILD_TOOLS_ARCHIVE_ENV} and {PLATFORM_ARCHIVE_ENV})",
            join_paths(&missing)
        ))
    }
}

#[derive(Clone, Debug)]
pub struct ArchiveSource {
    pub path: PathBuf,
    pub sha256: Option<String>,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    fn verify(&self) -> Result<(), String> {
        let Some(expected) = self.sha256.as_deref() else {
            return Ok(());
        };
        let (actual, _) = sha256_file(&self.path)
            .map_err(|e| format!("hashing {} failed: {e}", self.path.display()))?;
        if actual.eq_ignore_ascii_case(expected.trim()) {
            Ok(())
        } else {
            Err(format!(
                "sha256 mismatch for {}: expected {}, got {actual}",
                self.path.display(),
                expected.trim()
            ))
        }
    }
}

/// Extracts the minimal tool set from locally available build-tools and
/// platform archives.
#[derive(Clone, Debug, Default)]
pub struct ArchiveInstaller {
    pub build_tools: Option<ArchiveSource>,
    pub platform: Option<ArchiveSource>,
}

impl ArchiveInstaller {
    pub fn from_env() -> Self {
        Self {
            build_tools: apkpipe_util::env_trimmed(BUILD_TOOLS_ARCHIVE_ENV)
                .map(|path| ArchiveSource::new(apkpipe_util::expand_user(&path))),
            platform: apkpipe_util::env_trimmed(PLATFORM_ARCHIVE_ENV)
                .map(|path| ArchiveSource::new(apkpipe_util::expand_user(&path))),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.build_tools.is_some() && self.platform.is_some()
    }
}

impl SdkInstaller for ArchiveInstaller {
    fn ensure_installed(&self, tools_dir: &Path, sink: &dyn LogSink) -> Result<(), String> {
        if missing_minimal_tools(tools_dir).is_empty() {
            sink.info("Minimal tools already installed.");
            return Ok(());
        }
        let build_tools = self
            .build_tools
            .as_ref()
            .ok_or_else(|| format!("no build-tools archive configured ({BUILD_TOOLS_ARCHIVE_ENV})"))?;
        let platform = self
            .platform
            .as_ref()
            .ok_or_else(|| format!("no platform archive configured ({PLATFORM_ARCHIVE_ENV})"))?;

        fs::create_dir_all(tools_dir)
            .map_err(|e| format!("failed to create {}: {e}", tools_dir.display()))?;

        build_tools.verify()?;
        sink.info(&format!(
            "Extracting build tools from {}...",
            build_tools.path.display()
        ));
        let count = extract_matching(&build_tools.path, tools_dir, build_tool_destination)
            .map_err(|e| format!("extracting {} failed: {e}", build_tools.path.display()))?;
        info!("extracted {count} build tool files into {}", tools_dir.display());

        platform.verify()?;
        sink.info(&format!(
            "Extracting {PLATFORM_LIBRARY} from {}...",
            platform.path.display()
        ));
        extract_matching(&platform.path, tools_dir, platform_destination)
            .map_err(|e| format!("extracting {} failed: {e}", platform.path.display()))?;

        let missing = missing_minimal_tools(tools_dir);
        if !missing.is_empty() {
            return Err(format!(
                "archives did not provide {}",
                join_paths(&missing)
            ));
        }
        sink.info("Minimal SDK setup complete.");
        Ok(())
    }
}

fn build_tool_destination(entry: &Path) -> Option<PathBuf> {
    let file_name = entry.file_name()?.to_str()?;
    let parent = entry
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|p| p.to_str())
        .unwrap_or_default();
    if BUILD_TOOL_FILES.contains(&file_name) {
        return Some(PathBuf::from(file_name));
    }
    if parent == "lib" && BUILD_TOOL_JARS.contains(&file_name) {
        return Some(PathBuf::from(file_name));
    }
    if parent == "lib64" {
        return Some(Path::new("lib64").join(file_name));
    }
    None
}

fn platform_destination(entry: &Path) -> Option<PathBuf> {
    let file_name = entry.file_name()?.to_str()?;
    (file_name == PLATFORM_LIBRARY).then(|| PathBuf::from(file_name))
}

fn extract_matching(
    archive_path: &Path,
    dest: &Path,
    select: fn(&Path) -> Option<PathBuf>,
) -> io::Result<usize> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(io::Error::other)?;
    let mut extracted = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(io::Error::other)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().and_then(select) else {
            continue;
        };
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        set_executable(&target, entry.unix_mode())?;
        extracted += 1;
    }
    Ok(extracted)
}

#[cfg(unix)]
fn set_executable(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.extension().is_some_and(|ext| ext == "jar") {
        return Ok(());
    }
    let mode = mode.map(|m| m & 0o777).filter(|m| m & 0o111 != 0).unwrap_or(0o755);
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
