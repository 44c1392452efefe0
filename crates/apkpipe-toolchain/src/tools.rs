use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::ToolchainError;

pub const JVM_HEAP_CEILING: &str = "-Xmx1024M";

#[cfg(windows)]
const SCRIPT_EXTENSION: &str = ".bat";
#[cfg(not(windows))]
const SCRIPT_EXTENSION: &str = ".sh";

/// How a jar-packaged tool is entered once the JVM is up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JvmEntry {
    MainClass(&'static str),
    ExecutableJar,
}

#[derive(Clone, Copy, Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub entry: JvmEntry,
}

pub const D8: ToolSpec = ToolSpec {
    name: "d8",
    entry: JvmEntry::MainClass("com.android.tools.r8.D8"),
};

pub const APKSIGNER: ToolSpec = ToolSpec {
    name: "apksigner",
    entry: JvmEntry::ExecutableJar,
};

/// Resolved launch strategy for an SDK tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolInvocation {
    Direct {
        program: PathBuf,
    },
    JvmLaunch {
        java: PathBuf,
        archive: PathBuf,
        entry: JvmEntry,
    },
}

impl ToolInvocation {
    pub fn for_path(tool: &Path, spec: &ToolSpec, java: &Path) -> Self {
        let is_jar = tool
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("jar"))
            .unwrap_or(false);
        if is_jar {
            ToolInvocation::JvmLaunch {
                java: java.to_path_buf(),
                archive: tool.to_path_buf(),
                entry: spec.entry,
            }
        } else {
            ToolInvocation::Direct {
                program: tool.to_path_buf(),
            }
        }
    }

    pub fn command<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = match self {
            ToolInvocation::Direct { program } => vec![path_arg(program)],
            ToolInvocation::JvmLaunch {
                java,
                archive,
                entry,
            } => {
                let mut cmd = vec![path_arg(java), JVM_HEAP_CEILING.to_string()];
                match entry {
                    JvmEntry::MainClass(class) => {
                        cmd.push("-cp".into());
                        cmd.push(path_arg(archive));
                        cmd.push((*class).to_string());
                    }
                    JvmEntry::ExecutableJar => {
                        cmd.push("-jar".into());
                        cmd.push(path_arg(archive));
                    }
                }
                cmd
            }
        };
        cmd.extend(args.into_iter().map(Into::into));
        cmd
    }

    pub fn path(&self) -> &Path {
        match self {
            ToolInvocation::Direct { program } => program,
            ToolInvocation::JvmLaunch { archive, .. } => archive,
        }
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolInvocation::Direct { program } => write!(f, "{}", program.display()),
            ToolInvocation::JvmLaunch { archive, .. } => {
                write!(f, "{} (via java)", archive.display())
            }
        }
    }
}

pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn exe_name(name: &str) -> String {
    format!("{name}{}", std::env::consts::EXE_SUFFIX)
}

/// Candidate file names for a tool, in lookup priority order.
pub fn tool_candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut extensions = vec![".jar"];
    if !std::env::consts::EXE_SUFFIX.is_empty() {
        extensions.push(std::env::consts::EXE_SUFFIX);
    }
    extensions.push(SCRIPT_EXTENSION);
    extensions.push("");
    extensions
        .into_iter()
        .map(|ext| dir.join(format!("{name}{ext}")))
        .collect()
}

pub fn find_tool(dir: &Path, name: &str) -> Option<PathBuf> {
    tool_candidates(dir, name)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

pub fn resolve_invocation(
    dir: &Path,
    spec: &ToolSpec,
    java: &Path,
) -> Result<ToolInvocation, ToolchainError> {
    let path = find_tool(dir, spec.name).ok_or_else(|| ToolchainError::ToolNotFound {
        name: spec.name.to_string(),
        dir: dir.to_path_buf(),
    })?;
    Ok(ToolInvocation::for_path(&path, spec, java))
}
