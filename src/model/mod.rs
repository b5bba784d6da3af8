//! Project model: the raw `cm.yaml` document and its validated form

pub mod account;
pub mod document;
pub mod project;

pub use account::{AccountConfig, AccountEntry};
pub use document::Document;
pub use project::{
    find_config_file, BaseRef, CachedAsset, CommandDef, PackageSet, ProjectConfig, ProjectInfo,
    RuntimeSettings, Stage, CONFIG_FILE, DEFAULT_TARGET, LEGACY_CONFIG_FILE,
};
