//! Host toolchain plumbing for the package build: running external tools,
//! locating the JDK and SDK binaries, and provisioning the minimal SDK set.

mod error;
pub mod hashing;
pub mod installer;
mod log;
pub mod resolver;
pub mod runner;
pub mod tools;

pub use error::{RunError, ToolchainError};
pub use installer::{ArchiveInstaller, SdkInstaller, UnconfiguredInstaller};
pub use log::{LogLevel, LogSink, TracingLog};
pub use resolver::{ToolchainInfo, ToolchainResolver};
pub use runner::{CapturedOutput, CommandRunner};
pub use tools::{JvmEntry, ToolInvocation, ToolSpec, APKSIGNER, D8};
