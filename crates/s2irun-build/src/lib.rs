//! s2irun build execution
//!
//! This crate runs source-to-image builds for s2irun: source acquisition
//! through git, build strategies executed against a Docker daemon,
//! daemon-less builds through a kaniko-compatible executor, and result
//! reporting to the target registry.

pub mod auth;
pub mod context;
pub mod docker;
pub mod error;
pub mod fetch;
pub mod git;
pub mod progress;
pub mod reporter;
pub mod rootless;
pub mod runner;
pub mod scripts;
pub mod strategy;
mod util;

pub use auth::RegistryAuth;
pub use context::ContextBuilder;
pub use docker::{DockerGateway, ImageMetadata};
pub use error::{BuildError, ErrorKind, Result};
pub use git::{CloneConfig, Git, Scm, SourceInfo};
pub use progress::BuildProgress;
pub use reporter::{FileResultSink, OutputResultInfo, RegistryClient, ResultSink, TagInfo};
pub use rootless::RootlessExecutor;
pub use runner::{CommandOpts, CommandRunner, SystemCommandRunner};
pub use strategy::{BuildResult, StrategyExecutor, StrategyKind};
