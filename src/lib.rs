//! container-magic - compile a per-project `cm.yaml` into container build files
//!
//! One YAML document describes a project's image stages, its user accounts
//! and its commands. The compiler resolves the stage graph, expands each
//! stage's steps into Dockerfile instructions while tracking which account is
//! active, and renders a multi-stage Dockerfile together with a Justfile,
//! `build.sh`, `run.sh` and one script per standalone command.
//!
//! # Example Usage
//!
//! ```no_run
//! use container_magic::{Generator, MagicConfig};
//!
//! fn regenerate() -> anyhow::Result<()> {
//!     let settings = MagicConfig::from_env()?;
//!     let report = Generator::new("my-project", settings).generate()?;
//!     for file in &report.written {
//!         println!("wrote {}", file.path);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`model`]: the parsed configuration document
//! - [`validation`]: cross-field checks on a parsed project
//! - [`graph`]: stage inheritance and package-manager detection
//! - [`account`]: resolution of `user` entries into identities
//! - [`plan`]: step classification and the per-target build plan compiler
//! - [`render`]: Dockerfile, Justfile and script renderers
//! - [`generate`]: the load, compile, render and write pipeline
//! - [`runtime`]: container runtime detection and image builds

pub mod account;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod generate;
pub mod graph;
pub mod model;
pub mod plan;
pub mod render;
pub mod runtime;
pub mod scaffold;
pub mod util;
pub mod validation;

pub use account::ResolvedAccount;
pub use cache::{AssetStore, LocalAssetCache, StaticAssetStore};
pub use config::{MagicConfig, SettingsError};
pub use error::{CompileError, ConfigError};
pub use generate::{load_project, GenerationReport, Generator};
pub use graph::StageGraph;
pub use model::ProjectConfig;
pub use plan::{BuildPlan, BuildTarget, Compilation, Compiler, Warning};
pub use render::CompiledProject;
pub use runtime::{ContainerRuntime, RuntimeBackend};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
