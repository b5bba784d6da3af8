use crate::error::{ConfigError, StageReferenceError};
use crate::model::account::AccountEntry;
use crate::model::document::Document;
use regex::Regex;
use std::sync::OnceLock;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, document: &Document) -> Result<(), ConfigError>;
}

fn project_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid project name pattern"))
}

fn stage_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$").expect("valid stage name pattern"))
}

fn command_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("valid command name pattern"))
}

/// Recipe and script names generated for every project
const RESERVED_COMMAND_NAMES: &[&str] = &["default", "build", "build-production", "run", "shell"];

pub struct ProjectSectionRule;

impl ValidationRule for ProjectSectionRule {
    fn name(&self) -> &'static str {
        "ProjectSection"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        let project = document
            .project
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequiredField {
                context: "document".to_string(),
                field: "project".to_string(),
            })?;

        let name = project
            .name
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequiredField {
                context: "project".to_string(),
                field: "name".to_string(),
            })?;
        if !project_name_pattern().is_match(name) {
            return Err(ConfigError::InvalidProjectName(name.to_string()));
        }

        let workspace = project.workspace.trim();
        if workspace.is_empty()
            || workspace.starts_with('/')
            || workspace.split('/').any(|part| part == "..")
        {
            return Err(ConfigError::InvalidValue {
                field: "project.workspace".to_string(),
                message: format!(
                    "'{}' must be a non-empty path relative to the project directory",
                    project.workspace
                ),
            });
        }
        Ok(())
    }
}

pub struct StagesRule;

impl ValidationRule for StagesRule {
    fn name(&self) -> &'static str {
        "Stages"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        if document.stages.is_empty() {
            return Err(ConfigError::MissingRequiredField {
                context: "document".to_string(),
                field: "stages".to_string(),
            });
        }

        for (name, stage) in &document.stages {
            if !stage_name_pattern().is_match(name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("stages.{}", name),
                    message: "stage names must start with a letter and contain only letters, digits, '.', '_' or '-'".to_string(),
                });
            }
            match stage.from.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err(ConfigError::MissingRequiredField {
                        context: format!("stages.{}", name),
                        field: "from".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

pub struct CachedAssetsRule;

impl ValidationRule for CachedAssetsRule {
    fn name(&self) -> &'static str {
        "CachedAssets"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        for (name, stage) in &document.stages {
            for (i, asset) in stage.cached_assets.iter().enumerate() {
                if !(asset.url.starts_with("http://") || asset.url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("stages.{}.cached_assets[{}].url", name, i),
                        message: format!("'{}' is not an http(s) URL", asset.url),
                    });
                }
                if !asset.dest.starts_with('/') {
                    return Err(ConfigError::InvalidValue {
                        field: format!("stages.{}.cached_assets[{}].dest", name, i),
                        message: format!("'{}' must be an absolute path", asset.dest),
                    });
                }
            }
        }
        Ok(())
    }
}

pub struct AccountEntriesRule;

impl ValidationRule for AccountEntriesRule {
    fn name(&self) -> &'static str {
        "AccountEntries"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        for (target, entry) in &document.user {
            AccountEntry::from_document(target, entry.as_ref())?;
        }
        Ok(())
    }
}

pub struct CommandsRule;

impl ValidationRule for CommandsRule {
    fn name(&self) -> &'static str {
        "Commands"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        for (name, command) in &document.commands {
            if !command_name_pattern().is_match(name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("commands.{}", name),
                    message: "command names must start with a letter and contain only letters, digits, '_' or '-'".to_string(),
                });
            }
            if RESERVED_COMMAND_NAMES.contains(&name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("commands.{}", name),
                    message: format!("'{}' clashes with a generated recipe or script", name),
                });
            }
            if command.command.trim().is_empty() {
                return Err(ConfigError::MissingRequiredField {
                    context: format!("commands.{}", name),
                    field: "command".to_string(),
                });
            }
        }
        Ok(())
    }
}

pub struct DefaultTargetRule;

impl ValidationRule for DefaultTargetRule {
    fn name(&self) -> &'static str {
        "DefaultTarget"
    }

    fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        if let Some(target) = &document.build_script.default_target {
            if !document.stages.iter().any(|(name, _)| name == target) {
                return Err(StageReferenceError::UnknownTarget(target.clone()).into());
            }
        }
        Ok(())
    }
}
