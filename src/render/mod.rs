//! Renderers for the generated build files
//!
//! Every renderer is a pure function of a [`CompiledProject`]; writing the
//! results to disk is left to [`crate::generate`].

pub mod dockerfile;
pub mod justfile;
pub mod scripts;

pub use dockerfile::render_dockerfile;
pub use justfile::render_justfile;
pub use scripts::{render_build_script, render_run_script, render_standalone_script};

use crate::account::ResolvedAccount;
use crate::graph::StageGraph;
use crate::model::{ProjectConfig, RuntimeSettings};
use crate::plan::{BuildArgs, Compilation, StagePlan, Warning};
use crate::runtime::ContainerRuntime;

/// Marker carried by every generated file
pub const GENERATED_MARKER: &str = "Generated by container-magic";

/// Name of the stage the Justfile builds and runs for day-to-day work
pub const DEVELOPMENT_STAGE: &str = "development";

/// First line(s) of a generated file, as `#` comments
pub fn header(config_file: &str) -> String {
    format!(
        "# {} from {}. Do not edit; run 'cm update' instead.\n",
        GENERATED_MARKER, config_file
    )
}

/// A cached asset and the build-context path it is stored at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: String,
    pub path: String,
}

/// Everything the renderers need: the project and one compilation per build target
#[derive(Debug, Clone)]
pub struct CompiledProject {
    pub project: ProjectConfig,
    pub graph: StageGraph,
    pub compilations: Vec<Compilation>,
    pub assets: Vec<AssetRef>,
    /// File name of the configuration the project was loaded from
    pub config_file: String,
    /// SHA-256 of the configuration file contents, hex encoded
    pub config_hash: String,
}

impl CompiledProject {
    pub fn name(&self) -> &str {
        &self.project.project.name
    }

    pub fn default_target(&self) -> &str {
        &self.project.default_target
    }

    /// Compilation of the default target
    pub fn primary(&self) -> Option<&Compilation> {
        self.compilation_for(self.default_target())
    }

    /// Compilation whose terminal stage is `stage`
    pub fn compilation_for(&self, stage: &str) -> Option<&Compilation> {
        self.compilations
            .iter()
            .find(|compilation| compilation.plan.target.stage == stage)
    }

    /// Plan of `stage` as written to the Dockerfile
    ///
    /// [`crate::generate::compile_project`] rejects projects whose chains
    /// disagree on a shared stage, so any chain through the stage gives the
    /// same text. Account details (context, identity) are taken from the
    /// stage's own target first, then the default target.
    pub fn stage_plan(&self, stage: &str) -> Option<&StagePlan> {
        if let Some(plan) = self
            .compilation_for(stage)
            .and_then(|compilation| compilation.plan.stage(stage))
        {
            return Some(plan);
        }
        if let Some(plan) = self.primary().and_then(|compilation| compilation.plan.stage(stage)) {
            return Some(plan);
        }
        self.compilations
            .iter()
            .find_map(|compilation| compilation.plan.stage(stage))
    }

    fn compilation_for_account(&self, stage: &str) -> Option<&Compilation> {
        let account_target = self.project.account_target_for(stage);
        self.compilation_for(stage).or_else(|| {
            self.compilations
                .iter()
                .find(|compilation| compilation.plan.target.account == account_target)
        })
    }

    /// Build arguments for building `stage` as a target
    pub fn build_args_for(&self, stage: &str) -> Option<&BuildArgs> {
        self.compilation_for_account(stage)
            .map(|compilation| &compilation.plan.build_args)
    }

    pub fn account_for(&self, stage: &str) -> Option<&ResolvedAccount> {
        self.compilation_for_account(stage)
            .map(|compilation| &compilation.plan.account)
    }

    /// `development` when declared, the default target otherwise
    pub fn development_stage(&self) -> &str {
        if self.project.has_stage(DEVELOPMENT_STAGE) {
            DEVELOPMENT_STAGE
        } else {
            self.default_target()
        }
    }

    /// Shell of the image built for `stage`
    pub fn shell_for(&self, stage: &str) -> &str {
        self.graph
            .get(stage)
            .map(|resolved| resolved.shell.as_str())
            .unwrap_or("/bin/sh")
    }

    /// Warnings of all compilations, duplicates removed, first occurrence order
    pub fn warnings(&self) -> Vec<&Warning> {
        let mut seen: Vec<&Warning> = Vec::new();
        for warning in self.compilations.iter().flat_map(|c| c.warnings.iter()) {
            if !seen.contains(&warning) {
                seen.push(warning);
            }
        }
        seen
    }
}

/// Appends every line, each newline-terminated
pub(crate) fn push_lines<I, S>(out: &mut String, lines: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
}

/// Double-quoted shell word; `$` expansions are kept
pub fn double_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Single-quoted shell word; nothing inside is expanded
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Escape just's interpolation braces
pub fn just_escape(value: &str) -> String {
    value.replace("{{", "{{{{")
}

/// Options for the `RUN_ARGS` array of a generated run command
pub(crate) struct RunSetup<'a> {
    pub runtime: &'a RuntimeSettings,
    pub account: &'a ResolvedAccount,
    pub workspace: &'a str,
    /// Bind-mount the host workspace over the one baked into the image
    pub mount_workspace: bool,
}

impl RunSetup<'_> {
    pub fn container_workspace(&self) -> String {
        format!("{}/{}", self.account.home_shell_expr(), self.workspace)
    }

    /// Bash lines building `RUN_ARGS`; `RUNTIME` must be set beforehand
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            "RUN_ARGS=(--rm)".to_string(),
            "if [ -t 0 ] && [ -t 1 ]; then".to_string(),
            "    RUN_ARGS+=(-it)".to_string(),
            "fi".to_string(),
        ];
        if self.runtime.privileged {
            lines.push("RUN_ARGS+=(--privileged)".to_string());
        }
        if matches!(self.account, ResolvedAccount::HostCaptured) {
            lines.push(format!(
                "if [ \"$RUNTIME\" = \"{}\" ]; then",
                ContainerRuntime::Podman.command()
            ));
            lines.push("    RUN_ARGS+=(--userns=keep-id)".to_string());
            lines.push("fi".to_string());
        }

        let workspace = self.container_workspace();
        if self.mount_workspace {
            lines.push(format!(
                "RUN_ARGS+=(-v {})",
                double_quote(&format!("$(pwd)/{}:{}", self.workspace, workspace))
            ));
        }
        lines.push(format!("RUN_ARGS+=(-w {})", double_quote(&workspace)));

        let home = self.account.home_shell_expr();
        for feature in &self.runtime.features {
            lines.extend(feature.shell_lines(&home));
        }
        lines
    }
}

/// `<shell> -c '<command> "$@"' <name>` words running a custom command
pub(crate) fn command_invocation(shell: &str, command: &str, name: &str) -> String {
    format!(
        "{} -c {} {}",
        shell,
        single_quote(&format!("{} \"$@\"", command)),
        name
    )
}

/// Indent every line by `width` spaces, leaving empty lines empty
pub(crate) fn indent(lines: &[String], width: usize) -> String {
    let pad = " ".repeat(width);
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                "\n".to_string()
            } else {
                format!("{}{}\n", pad, line)
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::CompiledProject;
    use crate::cache::StaticAssetStore;
    use crate::generate::{compile_project, config_hash};
    use crate::model::{ProjectConfig, CONFIG_FILE};

    pub fn compile(yaml: &str) -> CompiledProject {
        let project = ProjectConfig::from_yaml_str(yaml).unwrap();
        compile_project(
            project,
            CONFIG_FILE,
            config_hash(yaml.as_bytes()),
            &StaticAssetStore::default(),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FixedIdentity;
    use crate::runtime::{RunFeature, RuntimeBackend};

    fn settings(privileged: bool, features: Vec<RunFeature>) -> RuntimeSettings {
        RuntimeSettings {
            backend: RuntimeBackend::Auto,
            privileged,
            features,
        }
    }

    #[test]
    fn test_double_quote() {
        assert_eq!(double_quote("plain"), "\"plain\"");
        assert_eq!(double_quote("a \"b\""), "\"a \\\"b\\\"\"");
        assert_eq!(double_quote("$HOME/x"), "\"$HOME/x\"");
        assert_eq!(double_quote("`id`"), "\"\\`id\\`\"");
    }

    #[test]
    fn test_single_quote() {
        assert_eq!(single_quote("echo hi"), "'echo hi'");
        assert_eq!(single_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_just_escape() {
        assert_eq!(just_escape("echo {{x}}"), "echo {{{{x}}");
    }

    #[test]
    fn test_command_invocation() {
        assert_eq!(
            command_invocation("/bin/bash", "python train.py", "train"),
            "/bin/bash -c 'python train.py \"$@\"' train"
        );
    }

    #[test]
    fn test_run_setup_fixed_account() {
        let runtime = settings(true, vec![]);
        let account = ResolvedAccount::Fixed(FixedIdentity::new("app", 1000, 1000, "/home/app"));
        let setup = RunSetup {
            runtime: &runtime,
            account: &account,
            workspace: "workspace",
            mount_workspace: false,
        };
        let lines = setup.lines();
        assert_eq!(lines[0], "RUN_ARGS=(--rm)");
        assert!(lines.contains(&"RUN_ARGS+=(--privileged)".to_string()));
        assert!(lines.contains(&"RUN_ARGS+=(-w \"/home/app/workspace\")".to_string()));
        assert!(!lines.iter().any(|l| l.contains("keep-id")));
    }

    #[test]
    fn test_run_setup_host_account_mounts_workspace() {
        let runtime = settings(false, vec![RunFeature::Gpu]);
        let account = ResolvedAccount::HostCaptured;
        let setup = RunSetup {
            runtime: &runtime,
            account: &account,
            workspace: "src",
            mount_workspace: true,
        };
        let lines = setup.lines();
        assert!(lines.contains(&"RUN_ARGS+=(-v \"$(pwd)/src:/home/$(id -un)/src\")".to_string()));
        assert!(lines.iter().any(|l| l.contains("--userns=keep-id")));
        assert!(lines.iter().any(|l| l.contains("--gpus all")));
        assert!(!lines.iter().any(|l| l.contains("--privileged")));
    }

    #[test]
    fn test_indent_keeps_blank_lines_empty() {
        let lines = vec!["a".to_string(), String::new(), "b".to_string()];
        assert_eq!(indent(&lines, 4), "    a\n\n    b\n");
    }
}
