//! The seven-stage package build: signing policy, debug keystore handling,
//! progress events, per-project queueing and build history.

pub mod config;
mod error;
pub mod events;
pub mod history;
pub mod keystore;
pub mod pipeline;
pub mod project;
pub mod queue;
pub mod signing;
mod stage;

pub use config::{BuildRequest, CustomKeystore, ProjectConfig, SigningConfig, Variant};
pub use error::{BuildError, StageError};
pub use events::{BuildEvent, ChannelSink, EventSink, NullSink, StageStatus, TracingSink};
pub use history::{BuildHistory, BuildRecord};
pub use keystore::{Keystore, KeystoreError, KeystoreManager};
pub use pipeline::{BuildFailure, BuildPipeline, BuildResult};
pub use queue::BuildQueue;
pub use signing::{select_keystore, KeystoreChoice, KeystoreKind, SigningConfigIncomplete};
pub use stage::Stage;
