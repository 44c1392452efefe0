use std::{io, path::PathBuf};

use thiserror::Error;

pub const EMPTY_STDERR: &str = "Unknown error (empty stderr)";

/// Failure of a single external process.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,
    #[error("command failed with exit code {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("failed to execute {program}: {cause}")]
    Launch { program: String, cause: io::Error },
}

impl RunError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("{0}")]
    ToolchainMissing(String),
    #[error("tool {name} not found in {}", dir.display())]
    ToolNotFound { name: String, dir: PathBuf },
    #[error("failed to provision SDK tools: {0}")]
    DownloadFailure(String),
}
