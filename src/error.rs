//! Error taxonomy for configuration loading and build plan compilation
//!
//! Hard errors abort compilation of the affected (stage, target) pair and never
//! leave a partial plan behind. Non-fatal findings are reported as
//! [`crate::plan::Warning`] values instead.

use thiserror::Error;

/// Malformed or ambiguous configuration document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration from {path}: {message}")]
    Io { path: String, message: String },

    #[error("Field '{field}' of {context} is ambiguous: {hint}")]
    AmbiguousField {
        context: String,
        field: String,
        hint: String,
    },

    #[error("Missing required field '{field}' in {context}")]
    MissingRequiredField { context: String, field: String },

    #[error("Invalid project name '{0}': only alphanumeric characters, hyphens and underscores are allowed")]
    InvalidProjectName(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error(transparent)]
    Account(#[from] AccountResolutionError),

    #[error(transparent)]
    StageReference(#[from] StageReferenceError),
}

/// Unresolvable or cyclic stage references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageReferenceError {
    #[error("Stage '{stage}' is based on '{reference}', which is neither an image nor a declared stage")]
    UnknownStageReference { stage: String, reference: String },

    #[error("Circular stage reference detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Build target '{0}' does not name a declared stage")]
    UnknownTarget(String),
}

/// Account configuration that cannot yield an identity for a build target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountResolutionError {
    #[error("user.{target}: 'host: true' cannot be combined with {}", .fields.join(", "))]
    MutuallyExclusiveFields { target: String, fields: Vec<String> },

    #[error("Stage '{stage}' uses '{step}' but no user is configured for target '{target}'. Define user.{target}")]
    MissingAccount {
        stage: String,
        step: String,
        target: String,
    },

    #[error("user.{target}: uid/gid/home are set but 'name' is missing, so the identity cannot be resolved")]
    MissingName { target: String },
}

/// A single step declaration that cannot be classified or expanded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("Stage '{stage}': empty step declaration")]
    Empty { stage: String },

    #[error("Stage '{stage}': unknown step '{token}' (did you mean '{suggestion}'?)")]
    UnknownBuiltin {
        stage: String,
        token: String,
        suggestion: String,
    },

    #[error("Stage '{stage}': multi-line step mixes in a '{keyword}' instruction on line {line}; only chained commands may be joined")]
    MixedBlock {
        stage: String,
        keyword: String,
        line: usize,
    },

    #[error("Stage '{stage}': '{keyword}' needs at least one source and a destination")]
    MissingArguments { stage: String, keyword: String },

    #[error("Stage '{stage}': '{keyword}' takes no arguments (got '{arguments}')")]
    UnexpectedArguments {
        stage: String,
        keyword: String,
        arguments: String,
    },

    #[error("Stage '{stage}': '{keyword}' cannot be used inside a step list")]
    ForbiddenInstruction { stage: String, keyword: String },
}

/// Any hard failure while compiling a build plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    StageReference(#[from] StageReferenceError),

    #[error(transparent)]
    Account(#[from] AccountResolutionError),

    #[error(transparent)]
    Step(#[from] StepError),

    /// A shared stage compiles to different text for different build targets,
    /// which a single Dockerfile cannot express
    #[error(
        "Stage '{stage}' compiles differently for build targets {}: either every target built on it needs a user account or none does",
        targets.join(", ")
    )]
    DivergentStage { stage: String, targets: Vec<String> },
}
