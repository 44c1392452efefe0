use std::io;

use apkpipe_toolchain::{RunError, ToolchainError};
use thiserror::Error;

use crate::keystore::KeystoreError;
use crate::stage::Stage;

/// What went wrong inside one stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Tool(#[from] ToolchainError),
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("package archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("{0}")]
    Output(String),
}

impl StageError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        StageError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid project: {0}")]
    InvalidProject(String),
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },
}

impl BuildError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BuildError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub(crate) trait StageContext<T> {
    fn at(self, stage: Stage) -> Result<T, BuildError>;
}

impl<T, E: Into<StageError>> StageContext<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, BuildError> {
        self.map_err(|err| BuildError::Stage {
            stage,
            source: err.into(),
        })
    }
}
