use std::{
    path::{Component, Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::error::{RunError, EMPTY_STDERR};
use crate::log::LogSink;

#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one external tool to completion and captures its output.
pub struct CommandRunner<'a> {
    sink: &'a dyn LogSink,
}

impl<'a> CommandRunner<'a> {
    pub fn new(sink: &'a dyn LogSink) -> Self {
        Self { sink }
    }

    pub async fn run(&self, argv: &[String]) -> Result<CapturedOutput, RunError> {
        let argv: Vec<String> = argv.iter().map(|arg| normalize_arg(arg)).collect();
        let (program, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;

        self.sink
            .info(&format!("Executing: {}", render_command_line(&argv)));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|cause| RunError::Launch {
                program: program.clone(),
                cause,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let trimmed = stderr.trim();
            return Err(RunError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: if trimmed.is_empty() {
                    EMPTY_STDERR.to_string()
                } else {
                    trimmed.to_string()
                },
            });
        }
        Ok(CapturedOutput { stdout, stderr })
    }
}

/// Prefix of inline secrets handed to the signer (`pass:<password>`).
pub const SECRET_PREFIX: &str = "pass:";

pub fn looks_like_path(value: &str) -> bool {
    !value.starts_with(SECRET_PREFIX)
        && (value.contains('/') || value.contains(std::path::MAIN_SEPARATOR))
}

pub fn normalize_arg(value: &str) -> String {
    if looks_like_path(value) {
        normalize_path_str(value)
    } else {
        value.to_string()
    }
}

/// Lexically resolves `.` and `..` and unifies separators. The filesystem is
/// never consulted, so paths that do not exist yet normalize too.
pub fn normalize_path_str(value: &str) -> String {
    let unified = if cfg!(windows) {
        value.replace('/', "\\")
    } else {
        value.to_string()
    };

    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(&unified).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        ".".to_string()
    } else {
        out.to_string_lossy().to_string()
    }
}

pub fn render_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            let shown = if arg.starts_with(SECRET_PREFIX) {
                format!("{SECRET_PREFIX}****")
            } else {
                arg.clone()
            };
            if shown.chars().any(char::is_whitespace) {
                format!("\"{shown}\"")
            } else {
                shown
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
