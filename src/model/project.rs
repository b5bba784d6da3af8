use crate::error::{ConfigError, StageReferenceError};
use crate::graph::{PackageManager, StageGraph};
use crate::model::account::AccountConfig;
use crate::model::document::{CommandDoc, Document, StageDoc};
use crate::runtime::{RunFeature, RuntimeBackend};
use crate::validation::Validator;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Preferred configuration file name
pub const CONFIG_FILE: &str = "cm.yaml";
/// Accepted for projects created before the short name existed
pub const LEGACY_CONFIG_FILE: &str = "container-magic.yaml";

pub const DEFAULT_TARGET: &str = "production";

/// Steps run by a stage built directly on an external image when it declares none
pub const DEFAULT_BASE_STEPS: &[&str] = &[
    "install_system_packages",
    "install_pip_packages",
    "copy_cached_assets",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub workspace: String,
    pub auto_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    pub backend: RuntimeBackend,
    pub privileged: bool,
    pub features: Vec<RunFeature>,
}

/// What a stage is built on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum BaseRef {
    Image(String),
    Stage(String),
}

impl BaseRef {
    /// Declared stage names win over image-looking tokens; anything else must
    /// carry a tag, registry path or digest to be treated as an image.
    pub fn classify(
        stage: &str,
        token: &str,
        stage_names: &[&str],
    ) -> Result<Self, StageReferenceError> {
        if stage_names.contains(&token) {
            Ok(BaseRef::Stage(token.to_string()))
        } else if looks_like_image(token) {
            Ok(BaseRef::Image(token.to_string()))
        } else {
            Err(StageReferenceError::UnknownStageReference {
                stage: stage.to_string(),
                reference: token.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BaseRef::Image(image) | BaseRef::Stage(image) => image,
        }
    }
}

pub fn looks_like_image(token: &str) -> bool {
    token == "scratch" || token.contains(':') || token.contains('/') || token.contains('@')
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSet {
    pub apt: Vec<String>,
    pub apk: Vec<String>,
    pub dnf: Vec<String>,
    pub pip: Vec<String>,
}

impl PackageSet {
    /// Non-empty system package lists, in a fixed order
    pub fn system_lists(&self) -> Vec<(PackageManager, &[String])> {
        PackageManager::ALL
            .iter()
            .map(|manager| (*manager, self.system(*manager)))
            .filter(|(_, packages)| !packages.is_empty())
            .collect()
    }

    pub fn system(&self, manager: PackageManager) -> &[String] {
        match manager {
            PackageManager::Apt => &self.apt,
            PackageManager::Apk => &self.apk,
            PackageManager::Dnf => &self.dnf,
        }
    }

    /// `self` followed by `other`, list by list
    pub fn merged_with(&self, other: &PackageSet) -> PackageSet {
        let concat = |a: &[String], b: &[String]| a.iter().chain(b).cloned().collect::<Vec<_>>();
        PackageSet {
            apt: concat(&self.apt, &other.apt),
            apk: concat(&self.apk, &other.apk),
            dnf: concat(&self.dnf, &other.dnf),
            pip: concat(&self.pip, &other.pip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedAsset {
    pub url: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    pub base: BaseRef,
    pub package_manager: Option<PackageManager>,
    pub shell: Option<String>,
    pub packages: PackageSet,
    pub env: BTreeMap<String, String>,
    pub cached_assets: Vec<CachedAsset>,
    pub steps: Vec<String>,
}

impl Stage {
    fn from_document(
        name: &str,
        doc: &StageDoc,
        stage_names: &[&str],
    ) -> Result<Self, ConfigError> {
        let token = doc.from.as_deref().ok_or_else(|| ConfigError::MissingRequiredField {
            context: format!("stages.{}", name),
            field: "from".to_string(),
        })?;
        let base = BaseRef::classify(name, token, stage_names)?;

        let steps = match (&doc.steps, &base) {
            (Some(steps), _) => steps.clone(),
            (None, BaseRef::Image(_)) => DEFAULT_BASE_STEPS.iter().map(|s| s.to_string()).collect(),
            (None, BaseRef::Stage(_)) => Vec::new(),
        };

        Ok(Stage {
            name: name.to_string(),
            base,
            package_manager: doc.package_manager,
            shell: doc.shell.clone(),
            packages: PackageSet {
                apt: doc.packages.apt.clone(),
                apk: doc.packages.apk.clone(),
                dnf: doc.packages.dnf.clone(),
                pip: doc.packages.pip.clone(),
            },
            env: doc
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
            cached_assets: doc
                .cached_assets
                .iter()
                .map(|asset| CachedAsset {
                    url: asset.url.clone(),
                    dest: asset.dest.clone(),
                })
                .collect(),
            steps,
        })
    }
}

/// A helper command run inside the development container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDef {
    pub name: String,
    pub command: String,
    pub description: Option<String>,
    pub env: BTreeMap<String, String>,
    pub standalone: bool,
}

impl CommandDef {
    fn from_document(name: &str, doc: &CommandDoc) -> Self {
        CommandDef {
            name: name.to_string(),
            command: doc.command.clone(),
            description: doc.description.clone(),
            env: doc
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
            standalone: doc.standalone,
        }
    }
}

/// Validated project model
///
/// Construction either succeeds completely or reports the first problem found;
/// a partially valid model is never returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
    pub project: ProjectInfo,
    pub accounts: AccountConfig,
    pub runtime: RuntimeSettings,
    pub stages: Vec<Stage>,
    pub commands: Vec<CommandDef>,
    pub default_target: String,
}

impl ProjectConfig {
    /// Parses and validates a `cm.yaml` document
    ///
    /// # Arguments
    ///
    /// * `content` - YAML text of the configuration file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed YAML, unknown fields or any
    /// validation finding; all findings are reported together.
    ///
    /// # Example
    ///
    /// ```
    /// use container_magic::ProjectConfig;
    ///
    /// let project = ProjectConfig::from_yaml_str(
    ///     "project:\n  name: demo\nstages:\n  production:\n    from: debian:bookworm\n",
    /// )
    /// .unwrap();
    /// assert_eq!(project.default_target, "production");
    /// ```
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let document =
            Document::from_yaml_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_document(&document)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading project configuration");
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_document(document: &Document) -> Result<Self, ConfigError> {
        Validator::default().validate(document)?;

        let section = document
            .project
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequiredField {
                context: "document".to_string(),
                field: "project".to_string(),
            })?;
        let name = section
            .name
            .clone()
            .ok_or_else(|| ConfigError::MissingRequiredField {
                context: "project".to_string(),
                field: "name".to_string(),
            })?;

        let stage_names: Vec<&str> = document.stages.iter().map(|(n, _)| n.as_str()).collect();
        let stages = document
            .stages
            .iter()
            .map(|(stage_name, doc)| Stage::from_document(stage_name, doc, &stage_names))
            .collect::<Result<Vec<_>, _>>()?;

        let config = ProjectConfig {
            project: ProjectInfo {
                name,
                workspace: section.workspace.clone(),
                auto_update: section.auto_update,
            },
            accounts: AccountConfig::from_document(&document.user)?,
            runtime: RuntimeSettings {
                backend: document.runtime.backend,
                privileged: document.runtime.privileged,
                features: document.runtime.features.clone(),
            },
            stages,
            commands: document
                .commands
                .iter()
                .map(|(cmd_name, doc)| CommandDef::from_document(cmd_name, doc))
                .collect(),
            default_target: default_target(document),
        };

        StageGraph::resolve(&config.stages)?;
        Ok(config)
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn has_stage(&self, name: &str) -> bool {
        self.stage(name).is_some()
    }

    /// Account entry governing a stage built as its own target: the stage's
    /// own `user` entry when present, the default target's otherwise.
    pub fn account_target_for(&self, stage: &str) -> String {
        if self.accounts.contains(stage) {
            stage.to_string()
        } else {
            self.default_target.clone()
        }
    }

    pub fn standalone_commands(&self) -> impl Iterator<Item = &CommandDef> {
        self.commands.iter().filter(|command| command.standalone)
    }
}

/// Explicit `build_script.default_target`, else `production`, else the last
/// declared stage
fn default_target(document: &Document) -> String {
    if let Some(target) = &document.build_script.default_target {
        return target.clone();
    }
    if document.stages.iter().any(|(name, _)| name == DEFAULT_TARGET) {
        return DEFAULT_TARGET.to_string();
    }
    document
        .stages
        .last()
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| DEFAULT_TARGET.to_string())
}

/// Locate the project configuration file in `dir`
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    [CONFIG_FILE, LEGACY_CONFIG_FILE]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
