use super::{header, push_lines, CompiledProject};
use crate::plan::build_args::ACCOUNT_ARGS;
use crate::plan::instruction::quote_env_value;
use crate::plan::BuildArgValue;
use tracing::debug;

/// Global `ARG` declarations with the default target's literal values
///
/// Host-captured values have no default; they are always passed at build time.
fn global_args(compiled: &CompiledProject) -> Vec<String> {
    let primary_args = compiled.primary().map(|c| &c.plan.build_args);
    ACCOUNT_ARGS
        .iter()
        .filter_map(|name| {
            match primary_args.and_then(|args| args.get(name)) {
                Some(BuildArgValue::Literal(value)) => {
                    Some(format!("ARG {}={}", name, quote_env_value(value)))
                }
                Some(BuildArgValue::FromHost(_)) => Some(format!("ARG {}", name)),
                None => compiled
                    .compilations
                    .iter()
                    .any(|c| c.plan.build_args.get(name).is_some())
                    .then(|| format!("ARG {}", name)),
            }
        })
        .collect()
}

/// Renders the multi-stage Dockerfile
///
/// Global `ARG` defaults come first, then every stage reachable from a build
/// target in dependency order. Stages no target passes through are left out.
///
/// # Arguments
///
/// * `compiled` - Project with every build target compiled
///
/// # Example
///
/// ```
/// use container_magic::cache::StaticAssetStore;
/// use container_magic::generate::compile_project;
/// use container_magic::render::render_dockerfile;
/// use container_magic::ProjectConfig;
///
/// let project = ProjectConfig::from_yaml_str(
///     "project:\n  name: demo\nstages:\n  production:\n    from: alpine:3.19\n",
/// )
/// .unwrap();
/// let compiled =
///     compile_project(project, "cm.yaml", "hash".into(), &StaticAssetStore::default()).unwrap();
/// assert!(render_dockerfile(&compiled).contains("FROM alpine:3.19 AS production\n"));
/// ```
pub fn render_dockerfile(compiled: &CompiledProject) -> String {
    let mut out = header(&compiled.config_file);

    let args = global_args(compiled);
    if !args.is_empty() {
        out.push('\n');
        push_lines(&mut out, args);
    }

    for resolved in compiled.graph.stages() {
        let Some(stage) = compiled.stage_plan(&resolved.name) else {
            debug!(stage = %resolved.name, "Stage is not part of any build target, skipping");
            continue;
        };
        out.push('\n');
        out.push_str(&stage.dockerfile_text());
    }
    out
}
