use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::ToolchainError;
use crate::installer::{missing_minimal_tools, SdkInstaller};
use crate::log::LogSink;
use crate::tools::{exe_name, resolve_invocation, ToolInvocation, ToolSpec, APKSIGNER, D8};

const KEYTOOL_SCAN_MAX_DEPTH: usize = 4;
const KEYTOOL_SCAN_MAX_ENTRIES: usize = 20_000;

#[cfg(windows)]
const JDK_INSTALL_ROOTS: &[&str] = &["C:\\Program Files\\Java", "C:\\Program Files (x86)\\Java"];
#[cfg(target_os = "macos")]
const JDK_INSTALL_ROOTS: &[&str] = &["/Library/Java/JavaVirtualMachines", "/opt/homebrew/opt"];
#[cfg(all(unix, not(target_os = "macos")))]
const JDK_INSTALL_ROOTS: &[&str] = &["/usr/lib/jvm", "/usr/java", "/opt/java", "/opt/jdk"];

/// Everything a build needs from the host, resolved once up front.
#[derive(Clone, Debug)]
pub struct ToolchainInfo {
    pub java: PathBuf,
    pub javac: PathBuf,
    pub keytool: Option<PathBuf>,
    pub tools_dir: PathBuf,
    pub aapt2: PathBuf,
    pub zipalign: PathBuf,
    pub android_jar: PathBuf,
    pub dexer: Option<ToolInvocation>,
    pub signer: Option<ToolInvocation>,
}

impl ToolchainInfo {
    pub fn dexer(&self) -> Result<&ToolInvocation, ToolchainError> {
        self.dexer.as_ref().ok_or_else(|| self.not_found(&D8))
    }

    pub fn signer(&self) -> Result<&ToolInvocation, ToolchainError> {
        self.signer.as_ref().ok_or_else(|| self.not_found(&APKSIGNER))
    }

    fn not_found(&self, spec: &ToolSpec) -> ToolchainError {
        ToolchainError::ToolNotFound {
            name: spec.name.to_string(),
            dir: self.tools_dir.clone(),
        }
    }
}

pub struct ToolchainResolver<'a> {
    tools_dir: PathBuf,
    search_path: Option<OsString>,
    java_home: Option<PathBuf>,
    fallback_roots: Vec<PathBuf>,
    installer: &'a dyn SdkInstaller,
    sink: &'a dyn LogSink,
}

impl<'a> ToolchainResolver<'a> {
    pub fn new(tools_dir: PathBuf, installer: &'a dyn SdkInstaller, sink: &'a dyn LogSink) -> Self {
        Self {
            tools_dir,
            search_path: std::env::var_os("PATH"),
            java_home: std::env::var_os("JAVA_HOME").map(PathBuf::from),
            fallback_roots: JDK_INSTALL_ROOTS.iter().map(PathBuf::from).collect(),
            installer,
            sink,
        }
    }

    /// Replaces the executable search path (a `PATH`-style list).
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.java_home = java_home;
        self
    }

    pub fn with_fallback_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.fallback_roots = roots;
        self
    }

    pub fn resolve(&self) -> Result<ToolchainInfo, ToolchainError> {
        self.sink.info("Checking system dependencies...");

        let java = self.find_on_path("java");
        let javac = self.find_on_path("javac");
        let keytool = self.find_keytool(javac.as_deref());

        self.sink.info(&format!("Java: {}", found_label(java.as_deref())));
        self.sink.info(&format!("Javac: {}", found_label(javac.as_deref())));
        self.sink
            .info(&format!("Keytool: {}", found_label(keytool.as_deref())));

        let (java, javac) = match (java, javac) {
            (Some(java), Some(javac)) => (java, javac),
            _ => {
                return Err(ToolchainError::ToolchainMissing(
                    "Java JDK is missing. Please install a JDK (8, 11 or 17) and put java and javac on PATH."
                        .into(),
                ))
            }
        };

        if keytool.is_none() {
            self.sink.warn(
                "keytool not found; the debug keystore cannot be created if it does not exist yet.",
            );
        }

        if !missing_minimal_tools(&self.tools_dir).is_empty() {
            self.sink
                .info("Minimal tools not found. Starting SDK provisioning...");
            self.installer
                .ensure_installed(&self.tools_dir, self.sink)
                .map_err(ToolchainError::DownloadFailure)?;
            let missing = missing_minimal_tools(&self.tools_dir);
            if !missing.is_empty() {
                return Err(ToolchainError::DownloadFailure(format!(
                    "installer reported success but {} is still missing",
                    missing[0].display()
                )));
            }
        }

        let dexer = self.lookup_tool(&D8, &java);
        let signer = self.lookup_tool(&APKSIGNER, &java);

        self.sink.info("Minimal tools and Java are ready.");
        Ok(ToolchainInfo {
            java,
            javac,
            keytool,
            aapt2: self.tools_dir.join(exe_name("aapt2")),
            zipalign: self.tools_dir.join(exe_name("zipalign")),
            android_jar: self.tools_dir.join("android.jar"),
            tools_dir: self.tools_dir.clone(),
            dexer,
            signer,
        })
    }

    fn lookup_tool(&self, spec: &ToolSpec, java: &Path) -> Option<ToolInvocation> {
        match resolve_invocation(&self.tools_dir, spec, java) {
            Ok(invocation) => {
                self.sink
                    .info(&format!("{}: {invocation}", spec.name));
                Some(invocation)
            }
            Err(err) => {
                self.sink.warn(&format!("{err}"));
                None
            }
        }
    }

    fn find_on_path(&self, name: &str) -> Option<PathBuf> {
        let paths = self.search_path.as_ref()?;
        let file_name = exe_name(name);
        std::env::split_paths(paths)
            .map(|dir| dir.join(&file_name))
            .find(|candidate| is_executable(candidate))
    }

    fn find_keytool(&self, javac: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = self.find_on_path("keytool") {
            return Some(path);
        }
        let file_name = exe_name("keytool");

        let beside_javac = javac
            .and_then(|javac| javac.parent())
            .map(|dir| dir.join(&file_name));
        let in_java_home = self
            .java_home
            .as_ref()
            .map(|home| home.join("bin").join(&file_name));
        if let Some(path) = beside_javac
            .into_iter()
            .chain(in_java_home)
            .find(|candidate| is_executable(candidate))
        {
            return Some(path);
        }

        self.fallback_roots
            .iter()
            .filter(|root| root.is_dir())
            .find_map(|root| scan_for_file(root, &file_name))
    }
}

/// Bounded walk of one install root; gives up after a fixed depth and number
/// of visited entries.
fn scan_for_file(root: &Path, file_name: &str) -> Option<PathBuf> {
    debug!("scanning {} for {file_name}", root.display());
    WalkDir::new(root)
        .max_depth(KEYTOOL_SCAN_MAX_DEPTH)
        .into_iter()
        .filter_map(Result::ok)
        .take(KEYTOOL_SCAN_MAX_ENTRIES)
        .find(|entry| entry.file_name() == file_name && is_executable(entry.path()))
        .map(|entry| entry.into_path())
}

fn found_label(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("Found ({})", path.display()),
        None => "MISSING".into(),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
