//! Step classification
//!
//! A step is one entry of a stage's step list. Classification is purely
//! syntactic; what a step expands to depends on the account context and is
//! decided by the compiler.

use crate::error::StepError;
use serde::Serialize;
use std::fmt;

/// Container build instructions that pass through unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RawKeyword {
    Run,
    Env,
    Workdir,
    Copy,
    Add,
    User,
    Expose,
    Label,
    Volume,
    Entrypoint,
    Cmd,
    Shell,
    Stopsignal,
    Arg,
    Healthcheck,
    Onbuild,
}

impl RawKeyword {
    const ALL: [RawKeyword; 16] = [
        RawKeyword::Run,
        RawKeyword::Env,
        RawKeyword::Workdir,
        RawKeyword::Copy,
        RawKeyword::Add,
        RawKeyword::User,
        RawKeyword::Expose,
        RawKeyword::Label,
        RawKeyword::Volume,
        RawKeyword::Entrypoint,
        RawKeyword::Cmd,
        RawKeyword::Shell,
        RawKeyword::Stopsignal,
        RawKeyword::Arg,
        RawKeyword::Healthcheck,
        RawKeyword::Onbuild,
    ];

    /// Keywords are matched case-sensitively, so `run` or `Copy` never pass through
    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|keyword| keyword.as_str() == token)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawKeyword::Run => "RUN",
            RawKeyword::Env => "ENV",
            RawKeyword::Workdir => "WORKDIR",
            RawKeyword::Copy => "COPY",
            RawKeyword::Add => "ADD",
            RawKeyword::User => "USER",
            RawKeyword::Expose => "EXPOSE",
            RawKeyword::Label => "LABEL",
            RawKeyword::Volume => "VOLUME",
            RawKeyword::Entrypoint => "ENTRYPOINT",
            RawKeyword::Cmd => "CMD",
            RawKeyword::Shell => "SHELL",
            RawKeyword::Stopsignal => "STOPSIGNAL",
            RawKeyword::Arg => "ARG",
            RawKeyword::Healthcheck => "HEALTHCHECK",
            RawKeyword::Onbuild => "ONBUILD",
        }
    }
}

impl fmt::Display for RawKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instructions that may never appear in a step list
const FORBIDDEN_KEYWORDS: &[&str] = &["FROM", "MAINTAINER"];

/// Sources and destination of a copy step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyArgs {
    pub sources: Vec<String>,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "builtin", rename_all = "snake_case")]
pub enum BuiltIn {
    InstallSystemPackages,
    InstallPipPackages,
    CreateUser,
    BecomeUser,
    BecomeRoot,
    Copy(CopyArgs),
    CopyAsUser(CopyArgs),
    CopyAsRoot(CopyArgs),
    CopyWorkspace,
    CopyCachedAssets,
}

impl BuiltIn {
    pub fn keyword(&self) -> &'static str {
        match self {
            BuiltIn::InstallSystemPackages => "install_system_packages",
            BuiltIn::InstallPipPackages => "install_pip_packages",
            BuiltIn::CreateUser => "create_user",
            BuiltIn::BecomeUser => "become_user",
            BuiltIn::BecomeRoot => "become_root",
            BuiltIn::Copy(_) => "copy",
            BuiltIn::CopyAsUser(_) => "copy_as_user",
            BuiltIn::CopyAsRoot(_) => "copy_as_root",
            BuiltIn::CopyWorkspace => "copy_workspace",
            BuiltIn::CopyCachedAssets => "copy_cached_assets",
        }
    }
}

pub const BUILTIN_KEYWORDS: &[&str] = &[
    "install_system_packages",
    "install_pip_packages",
    "create_user",
    "become_user",
    "become_root",
    "copy",
    "copy_as_user",
    "copy_as_root",
    "copy_workspace",
    "copy_cached_assets",
];

/// Older spellings still accepted, mapped to their current keyword
pub const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("switch_user", "become_user"),
    ("switch_root", "become_root"),
];

/// Tokens at least this long are checked for near misses of a built-in keyword
const NEAR_MISS_MIN_LEN: usize = 5;
const NEAR_MISS_MAX_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    BuiltIn(BuiltIn),
    RawPassthrough { keyword: RawKeyword, arguments: String },
    ImplicitRun { command: String },
    MultiLineBlock { commands: Vec<String> },
}

/// A classified step, with the legacy alias it was written as (if any)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedStep {
    pub step: Step,
    pub legacy_alias: Option<(&'static str, &'static str)>,
}

impl ClassifiedStep {
    fn plain(step: Step) -> Self {
        Self {
            step,
            legacy_alias: None,
        }
    }
}

/// Classify one step declaration of `stage`
pub fn classify(stage: &str, raw: &str) -> Result<ClassifiedStep, StepError> {
    let lines = logical_lines(raw);

    match lines.len() {
        0 => Err(StepError::Empty {
            stage: stage.to_string(),
        }),
        1 => classify_line(stage, &lines[0]),
        _ => classify_block(stage, &lines).map(ClassifiedStep::plain),
    }
}

/// Non-empty trimmed lines, with trailing-backslash continuations folded in
fn logical_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let (text, continues) = match line.strip_suffix('\\') {
            Some(head) => (head.trim_end(), true),
            None => (line, false),
        };
        let joined = match pending.take() {
            Some(prefix) => format!("{} {}", prefix, text),
            None => text.to_string(),
        };
        if continues {
            pending = Some(joined);
        } else {
            lines.push(joined);
        }
    }
    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}

fn split_keyword(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim()),
        None => (line, ""),
    }
}

fn classify_line(stage: &str, line: &str) -> Result<ClassifiedStep, StepError> {
    let (keyword, arguments) = split_keyword(line);

    if FORBIDDEN_KEYWORDS.contains(&keyword) {
        return Err(StepError::ForbiddenInstruction {
            stage: stage.to_string(),
            keyword: keyword.to_string(),
        });
    }

    if let Some(raw) = RawKeyword::parse(keyword) {
        return Ok(ClassifiedStep::plain(Step::RawPassthrough {
            keyword: raw,
            arguments: arguments.to_string(),
        }));
    }

    if let Some((alias, replacement)) = LEGACY_ALIASES
        .iter()
        .copied()
        .find(|(alias, _)| *alias == keyword)
    {
        let builtin = parse_builtin(stage, replacement, arguments)?;
        return Ok(ClassifiedStep {
            step: Step::BuiltIn(builtin),
            legacy_alias: Some((alias, replacement)),
        });
    }

    if BUILTIN_KEYWORDS.contains(&keyword) {
        return parse_builtin(stage, keyword, arguments)
            .map(|builtin| ClassifiedStep::plain(Step::BuiltIn(builtin)));
    }

    if arguments.is_empty() {
        if let Some(suggestion) = near_miss(keyword) {
            return Err(StepError::UnknownBuiltin {
                stage: stage.to_string(),
                token: keyword.to_string(),
                suggestion: suggestion.to_string(),
            });
        }
    }

    Ok(ClassifiedStep::plain(Step::ImplicitRun {
        command: line.to_string(),
    }))
}

fn classify_block(stage: &str, lines: &[String]) -> Result<Step, StepError> {
    let mut commands = Vec::with_capacity(lines.len());

    for (index, line) in lines.iter().enumerate() {
        let (keyword, arguments) = split_keyword(line);
        let is_instruction = RawKeyword::parse(keyword).is_some()
            || FORBIDDEN_KEYWORDS.contains(&keyword)
            || BUILTIN_KEYWORDS.contains(&keyword)
            || LEGACY_ALIASES.iter().any(|(alias, _)| *alias == keyword);

        match RawKeyword::parse(keyword) {
            Some(RawKeyword::Run) if !arguments.is_empty() => commands.push(arguments.to_string()),
            _ if is_instruction => {
                return Err(StepError::MixedBlock {
                    stage: stage.to_string(),
                    keyword: keyword.to_string(),
                    line: index + 1,
                })
            }
            _ => commands.push(line.clone()),
        }
    }

    Ok(Step::MultiLineBlock { commands })
}

fn parse_builtin(stage: &str, keyword: &str, arguments: &str) -> Result<BuiltIn, StepError> {
    let copy_args = || -> Result<CopyArgs, StepError> {
        let mut parts: Vec<String> = arguments.split_whitespace().map(String::from).collect();
        if parts.len() < 2 {
            return Err(StepError::MissingArguments {
                stage: stage.to_string(),
                keyword: keyword.to_string(),
            });
        }
        let dest = parts.pop().unwrap_or_default();
        Ok(CopyArgs {
            sources: parts,
            dest,
        })
    };

    let no_args = |builtin: BuiltIn| -> Result<BuiltIn, StepError> {
        if arguments.is_empty() {
            Ok(builtin)
        } else {
            Err(StepError::UnexpectedArguments {
                stage: stage.to_string(),
                keyword: keyword.to_string(),
                arguments: arguments.to_string(),
            })
        }
    };

    match keyword {
        "install_system_packages" => no_args(BuiltIn::InstallSystemPackages),
        "install_pip_packages" => no_args(BuiltIn::InstallPipPackages),
        "create_user" => no_args(BuiltIn::CreateUser),
        "become_user" => no_args(BuiltIn::BecomeUser),
        "become_root" => no_args(BuiltIn::BecomeRoot),
        "copy" => copy_args().map(BuiltIn::Copy),
        "copy_as_user" => copy_args().map(BuiltIn::CopyAsUser),
        "copy_as_root" => copy_args().map(BuiltIn::CopyAsRoot),
        "copy_workspace" => no_args(BuiltIn::CopyWorkspace),
        "copy_cached_assets" => no_args(BuiltIn::CopyCachedAssets),
        other => Err(StepError::UnknownBuiltin {
            stage: stage.to_string(),
            token: other.to_string(),
            suggestion: near_miss(other).unwrap_or("").to_string(),
        }),
    }
}

/// Closest built-in keyword (or alias) a bare token is probably a typo of
fn near_miss(token: &str) -> Option<&'static str> {
    if token.len() < NEAR_MISS_MIN_LEN || (!token.contains('_') && !token.starts_with("copy")) {
        return None;
    }
    let lowered = token.to_lowercase();
    BUILTIN_KEYWORDS
        .iter()
        .chain(LEGACY_ALIASES.iter().map(|(alias, _)| alias))
        .map(|keyword| (*keyword, strsim::levenshtein(&lowered, keyword)))
        .filter(|(_, distance)| *distance <= NEAR_MISS_MAX_DISTANCE)
        .min_by_key(|(_, distance)| *distance)
        .map(|(keyword, _)| keyword)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn step(raw: &str) -> Step {
        classify("base", raw).unwrap().step
    }

    #[parameterized(
        install_system = { "install_system_packages", BuiltIn::InstallSystemPackages },
        install_pip = { "install_pip_packages", BuiltIn::InstallPipPackages },
        create_user = { "create_user", BuiltIn::CreateUser },
        become_user = { "become_user", BuiltIn::BecomeUser },
        become_root = { "become_root", BuiltIn::BecomeRoot },
        copy_workspace = { "copy_workspace", BuiltIn::CopyWorkspace },
        copy_cached_assets = { "copy_cached_assets", BuiltIn::CopyCachedAssets },
    )]
    fn test_argumentless_builtins(raw: &str, expected: BuiltIn) {
        assert_eq!(step(raw), Step::BuiltIn(expected));
    }

    #[test]
    fn test_copy_arguments() {
        assert_eq!(
            step("copy a.txt b.txt /app/"),
            Step::BuiltIn(BuiltIn::Copy(CopyArgs {
                sources: vec!["a.txt".to_string(), "b.txt".to_string()],
                dest: "/app/".to_string(),
            }))
        );
        assert!(matches!(
            step("copy_as_root config /etc/app"),
            Step::BuiltIn(BuiltIn::CopyAsRoot(_))
        ));
    }

    #[test]
    fn test_copy_without_arguments_fails() {
        assert_eq!(
            classify("base", "copy").unwrap_err(),
            StepError::MissingArguments {
                stage: "base".to_string(),
                keyword: "copy".to_string(),
            }
        );
        assert!(classify("base", "copy_as_user onlyone").is_err());
    }

    #[test]
    fn test_builtin_rejects_arguments() {
        assert!(matches!(
            classify("base", "create_user now"),
            Err(StepError::UnexpectedArguments { .. })
        ));
    }

    #[parameterized(
        run = { "RUN make", RawKeyword::Run, "make" },
        env = { "ENV MY_VAR=value", RawKeyword::Env, "MY_VAR=value" },
        workdir = { "WORKDIR /app", RawKeyword::Workdir, "/app" },
        cmd = { "CMD [\"python\", \"app.py\"]", RawKeyword::Cmd, "[\"python\", \"app.py\"]" },
        healthcheck = { "HEALTHCHECK CMD curl -f http://localhost/", RawKeyword::Healthcheck, "CMD curl -f http://localhost/" },
        stopsignal = { "STOPSIGNAL SIGTERM", RawKeyword::Stopsignal, "SIGTERM" },
    )]
    fn test_raw_passthrough(raw: &str, keyword: RawKeyword, arguments: &str) {
        assert_eq!(
            step(raw),
            Step::RawPassthrough {
                keyword,
                arguments: arguments.to_string(),
            }
        );
    }

    #[test]
    fn test_raw_keywords_are_case_sensitive() {
        assert_eq!(
            step("run make"),
            Step::ImplicitRun {
                command: "run make".to_string()
            }
        );
    }

    #[test]
    fn test_from_is_forbidden() {
        assert!(matches!(
            classify("base", "FROM alpine"),
            Err(StepError::ForbiddenInstruction { ref keyword, .. }) if keyword == "FROM"
        ));
    }

    #[test]
    fn test_implicit_run() {
        assert_eq!(
            step("echo hello"),
            Step::ImplicitRun {
                command: "echo hello".to_string()
            }
        );
        assert_eq!(
            step("  pip install -e .  "),
            Step::ImplicitRun {
                command: "pip install -e .".to_string()
            }
        );
    }

    #[test]
    fn test_legacy_aliases() {
        let classified = classify("base", "switch_user").unwrap();
        assert_eq!(classified.step, Step::BuiltIn(BuiltIn::BecomeUser));
        assert_eq!(classified.legacy_alias, Some(("switch_user", "become_user")));

        let classified = classify("base", "switch_root").unwrap();
        assert_eq!(classified.step, Step::BuiltIn(BuiltIn::BecomeRoot));
    }

    #[parameterized(
        transposed = { "become_usr", "become_user" },
        missing_letter = { "create_usr", "create_user" },
        extra_letter = { "copy_workspacee", "copy_workspace" },
    )]
    fn test_near_miss_is_rejected(raw: &str, suggestion: &str) {
        assert_eq!(
            classify("base", raw).unwrap_err(),
            StepError::UnknownBuiltin {
                stage: "base".to_string(),
                token: raw.to_string(),
                suggestion: suggestion.to_string(),
            }
        );
    }

    #[test]
    fn test_short_or_unrelated_tokens_run() {
        assert!(matches!(step("make"), Step::ImplicitRun { .. }));
        assert!(matches!(step("pytest"), Step::ImplicitRun { .. }));
        assert!(matches!(step("ldconfig"), Step::ImplicitRun { .. }));
    }

    #[test]
    fn test_multi_line_block() {
        assert_eq!(
            step("apt-get update\napt-get install -y curl\n"),
            Step::MultiLineBlock {
                commands: vec![
                    "apt-get update".to_string(),
                    "apt-get install -y curl".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_multi_line_block_strips_run_prefix() {
        assert_eq!(
            step("RUN echo one\nRUN echo two"),
            Step::MultiLineBlock {
                commands: vec!["echo one".to_string(), "echo two".to_string()]
            }
        );
    }

    #[test]
    fn test_multi_line_block_folds_continuations() {
        assert_eq!(
            step("pip install \\\n  numpy \\\n  scipy\necho done"),
            Step::MultiLineBlock {
                commands: vec!["pip install numpy scipy".to_string(), "echo done".to_string()]
            }
        );
    }

    #[test]
    fn test_single_logical_line_is_not_a_block() {
        assert_eq!(
            step("pip install \\\n  numpy"),
            Step::ImplicitRun {
                command: "pip install numpy".to_string()
            }
        );
    }

    #[test]
    fn test_mixed_block_is_rejected() {
        assert_eq!(
            classify("base", "echo one\nCOPY a b").unwrap_err(),
            StepError::MixedBlock {
                stage: "base".to_string(),
                keyword: "COPY".to_string(),
                line: 2,
            }
        );
        assert!(matches!(
            classify("base", "echo one\nbecome_user"),
            Err(StepError::MixedBlock { .. })
        ));
    }

    #[test]
    fn test_empty_step() {
        assert!(matches!(classify("base", "   \n "), Err(StepError::Empty { .. })));
    }
}
