//! Container runtime selection and invocation

use crate::plan::{BuildArgValue, BuildArgs, HostProbe};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

pub mod feature;

pub use feature::RunFeature;

/// Backend requested by the project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    #[default]
    Auto,
    Docker,
    Podman,
}

impl RuntimeBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Some(RuntimeBackend::Auto),
            "docker" => Some(RuntimeBackend::Docker),
            "podman" => Some(RuntimeBackend::Podman),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeBackend::Auto => "auto",
            RuntimeBackend::Docker => "docker",
            RuntimeBackend::Podman => "podman",
        }
    }

    /// Concrete runtime on this host; `auto` prefers docker over podman
    pub fn resolve(&self) -> Result<ContainerRuntime> {
        match self {
            RuntimeBackend::Docker => Ok(ContainerRuntime::Docker),
            RuntimeBackend::Podman => Ok(ContainerRuntime::Podman),
            RuntimeBackend::Auto => ContainerRuntime::detect()
                .context("Neither docker nor podman was found on PATH"),
        }
    }

    /// Bash lines setting `RUNTIME` to the command to invoke
    pub fn shell_detection(&self) -> Vec<String> {
        match self {
            RuntimeBackend::Auto => vec![
                "if command -v docker >/dev/null 2>&1; then".to_string(),
                "    RUNTIME=docker".to_string(),
                "elif command -v podman >/dev/null 2>&1; then".to_string(),
                "    RUNTIME=podman".to_string(),
                "else".to_string(),
                "    echo \"Error: neither docker nor podman found\" >&2".to_string(),
                "    exit 1".to_string(),
                "fi".to_string(),
            ],
            backend => vec![format!("RUNTIME={}", backend.as_str())],
        }
    }

    /// Right-hand side of a Justfile `runtime := ...` assignment
    pub fn just_expression(&self) -> String {
        match self {
            RuntimeBackend::Auto => {
                "`command -v docker >/dev/null 2>&1 && echo docker || echo podman`".to_string()
            }
            backend => format!("\"{}\"", backend.as_str()),
        }
    }
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    pub fn command(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// First runtime answering `--version`, docker first
    pub fn detect() -> Option<Self> {
        [ContainerRuntime::Docker, ContainerRuntime::Podman]
            .into_iter()
            .find(|runtime| runtime.is_available())
    }

    pub fn is_available(&self) -> bool {
        Command::new(self.command())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Value of a host probe on the invoking host
pub fn resolve_host_value(probe: HostProbe) -> Result<String> {
    match probe.id_flags() {
        Some(flag) => run_id(flag),
        None => Ok(format!("/home/{}", run_id("-un")?)),
    }
}

fn run_id(flag: &str) -> Result<String> {
    let output = Command::new("id")
        .arg(flag)
        .output()
        .with_context(|| format!("Failed to run 'id {}'", flag))?;
    if !output.status.success() {
        bail!("'id {}' exited with {}", flag, output.status);
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        bail!("'id {}' printed nothing", flag);
    }
    Ok(value)
}

/// `NAME=value` pairs with host probes evaluated now
pub fn resolve_build_args(args: &BuildArgs) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            let value = match &arg.value {
                BuildArgValue::Literal(value) => value.clone(),
                BuildArgValue::FromHost(probe) => resolve_host_value(*probe)?,
            };
            Ok((arg.name.clone(), value))
        })
        .collect()
}

/// A single image build
#[derive(Debug, Clone)]
pub struct ImageBuild<'a> {
    pub context_dir: &'a Path,
    pub dockerfile: &'a Path,
    pub target: &'a str,
    pub tags: Vec<String>,
    pub build_args: Vec<(String, String)>,
}

impl ImageBuild<'_> {
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            self.dockerfile.display().to_string(),
            "--target".to_string(),
            self.target.to_string(),
        ];
        for tag in &self.tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        for (name, value) in &self.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", name, value));
        }
        args.push(self.context_dir.display().to_string());
        args
    }

    /// Run the build, streaming the runtime's output
    pub fn run(&self, runtime: ContainerRuntime) -> Result<()> {
        let args = self.command_args();
        debug!(runtime = %runtime, ?args, "Invoking container build");
        info!(target = self.target, tags = ?self.tags, "Building image");

        let status = Command::new(runtime.command())
            .args(&args)
            .status()
            .with_context(|| format!("Failed to start '{}'", runtime.command()))?;
        if !status.success() {
            bail!("{} build of target '{}' failed with {}", runtime, self.target, status);
        }
        Ok(())
    }
}

/// Image tag of a stage built for a project
pub fn image_tag(project: &str, stage: &str) -> String {
    format!("{}:{}", project, stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_backend() {
        assert_eq!(RuntimeBackend::parse("Docker"), Some(RuntimeBackend::Docker));
        assert_eq!(RuntimeBackend::parse(" podman "), Some(RuntimeBackend::Podman));
        assert_eq!(RuntimeBackend::parse("auto"), Some(RuntimeBackend::Auto));
        assert_eq!(RuntimeBackend::parse("lxc"), None);
        assert_eq!(RuntimeBackend::default(), RuntimeBackend::Auto);
    }

    #[test]
    fn test_explicit_backend_resolves_without_probing() {
        assert_eq!(RuntimeBackend::Podman.resolve().unwrap(), ContainerRuntime::Podman);
        assert_eq!(RuntimeBackend::Docker.resolve().unwrap(), ContainerRuntime::Docker);
    }

    #[test]
    fn test_shell_detection() {
        assert_eq!(RuntimeBackend::Docker.shell_detection(), vec!["RUNTIME=docker"]);
        let auto = RuntimeBackend::Auto.shell_detection();
        assert!(auto[0].contains("command -v docker"));
        assert!(auto.iter().any(|line| line.contains("RUNTIME=podman")));
    }

    #[test]
    fn test_just_expression() {
        assert_eq!(RuntimeBackend::Podman.just_expression(), "\"podman\"");
        assert!(RuntimeBackend::Auto.just_expression().starts_with('`'));
    }

    #[test]
    fn test_backend_deserializes_lowercase() {
        let backend: RuntimeBackend = serde_yaml::from_str("podman").unwrap();
        assert_eq!(backend, RuntimeBackend::Podman);
        assert!(serde_yaml::from_str::<RuntimeBackend>("lxc").is_err());
    }

    #[test]
    fn test_build_command_args() {
        let context = PathBuf::from("/work/demo");
        let dockerfile = PathBuf::from("/work/demo/Dockerfile");
        let build = ImageBuild {
            context_dir: &context,
            dockerfile: &dockerfile,
            target: "production",
            tags: vec!["demo:production".to_string(), "demo:latest".to_string()],
            build_args: vec![("USER_NAME".to_string(), "app".to_string())],
        };
        assert_eq!(
            build.command_args(),
            vec![
                "build",
                "--file",
                "/work/demo/Dockerfile",
                "--target",
                "production",
                "--tag",
                "demo:production",
                "--tag",
                "demo:latest",
                "--build-arg",
                "USER_NAME=app",
                "/work/demo",
            ]
        );
    }

    #[test]
    fn test_literal_build_args_resolve_verbatim() {
        use crate::account::{FixedIdentity, ResolvedAccount};
        let args = BuildArgs::emit(&ResolvedAccount::Fixed(FixedIdentity::new(
            "app", 1000, 1000, "/home/app",
        )));
        let resolved = resolve_build_args(&args).unwrap();
        assert_eq!(resolved[0], ("USER_NAME".to_string(), "app".to_string()));
        assert_eq!(resolved[3], ("USER_HOME".to_string(), "/home/app".to_string()));
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(image_tag("demo", "development"), "demo:development");
    }
}
