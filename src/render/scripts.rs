//! Standalone shell scripts: `build.sh`, `run.sh` and one script per
//! standalone custom command. They only need bash and a container runtime.

use super::{
    command_invocation, double_quote, header, indent, push_lines, AssetRef, CompiledProject, RunSetup,
};
use crate::account::ResolvedAccount;
use crate::model::CommandDef;

const SHEBANG: &str = "#!/usr/bin/env bash\n";

/// Bash lines downloading every asset that is not in the build context yet
pub(crate) fn fetch_asset_lines(assets: &[AssetRef]) -> Vec<String> {
    let mut lines = vec![
        "fetch_asset() {".to_string(),
        "    local url=\"$1\" path=\"$2\"".to_string(),
        "    if [ ! -f \"$path\" ]; then".to_string(),
        "        echo \"Downloading $url\" >&2".to_string(),
        "        mkdir -p \"$(dirname \"$path\")\"".to_string(),
        "        curl -fsSL \"$url\" -o \"$path.partial\"".to_string(),
        "        mv \"$path.partial\" \"$path\"".to_string(),
        "    fi".to_string(),
        "}".to_string(),
    ];
    for asset in assets {
        lines.push(format!(
            "fetch_asset {} {}",
            double_quote(&asset.url),
            double_quote(&asset.path)
        ));
    }
    lines
}

fn run_setup<'a>(compiled: &'a CompiledProject, account: &'a ResolvedAccount) -> RunSetup<'a> {
    RunSetup {
        runtime: &compiled.project.runtime,
        account,
        workspace: &compiled.project.project.workspace,
        mount_workspace: false,
    }
}

fn preamble(compiled: &CompiledProject, out: &mut String) {
    out.push_str(SHEBANG);
    out.push_str(&header(&compiled.config_file));
    out.push_str("set -euo pipefail\n\n");
}

/// `build.sh`: builds any stage, the default target unless one is given
pub fn render_build_script(compiled: &CompiledProject) -> String {
    let stages: Vec<&str> = compiled
        .graph
        .stages()
        .iter()
        .map(|stage| stage.name.as_str())
        .collect();
    let default_target = compiled.default_target();

    let mut out = String::new();
    preamble(compiled, &mut out);
    out.push_str(&format!("IMAGE_NAME={}\n", double_quote(compiled.name())));
    out.push_str(&format!("DEFAULT_TARGET={}\n", double_quote(default_target)));
    out.push_str(&format!(
        "AVAILABLE_TARGETS=({})\n",
        stages
            .iter()
            .map(|stage| double_quote(stage))
            .collect::<Vec<_>>()
            .join(" ")
    ));

    out.push_str("\nusage() {\n");
    out.push_str("    echo \"Usage: $0 [TARGET]\"\n");
    out.push_str("    echo \"\"\n");
    out.push_str(&format!(
        "    echo \"Build a stage of the {} image.\"\n",
        compiled.name()
    ));
    out.push_str("    echo \"\"\n");
    out.push_str("    echo \"Targets:\"\n");
    for stage in &stages {
        if *stage == default_target {
            out.push_str(&format!("    echo \"  {} (default)\"\n", stage));
        } else {
            out.push_str(&format!("    echo \"  {}\"\n", stage));
        }
    }
    out.push_str("}\n\n");

    out.push_str("TARGET=\"${1:-$DEFAULT_TARGET}\"\n");
    out.push_str("case \"$TARGET\" in\n");
    out.push_str("    -h|--help)\n        usage\n        exit 0\n        ;;\n");
    out.push_str("esac\n\n");

    out.push_str("valid=false\n");
    out.push_str("for available in \"${AVAILABLE_TARGETS[@]}\"; do\n");
    out.push_str("    if [ \"$available\" = \"$TARGET\" ]; then\n        valid=true\n    fi\n");
    out.push_str("done\n");
    out.push_str("if [ \"$valid\" != true ]; then\n");
    out.push_str("    echo \"Invalid target: $TARGET\" >&2\n");
    out.push_str("    usage >&2\n");
    out.push_str("    exit 1\n");
    out.push_str("fi\n\n");

    out.push_str("cd \"$(dirname \"$0\")\"\n\n");
    push_lines(&mut out, compiled.project.runtime.backend.shell_detection());

    if !compiled.assets.is_empty() {
        out.push('\n');
        push_lines(&mut out, fetch_asset_lines(&compiled.assets));
    }

    out.push_str("\nBUILD_ARGS=()\n");
    let with_args: Vec<(&str, Vec<String>)> = stages
        .iter()
        .filter_map(|stage| {
            compiled
                .build_args_for(stage)
                .filter(|args| !args.is_empty())
                .map(|args| (*stage, args.shell_flags()))
        })
        .collect();
    if !with_args.is_empty() {
        out.push_str("case \"$TARGET\" in\n");
        for (stage, flags) in with_args {
            out.push_str(&format!("    {})\n", stage));
            out.push_str(&format!("        BUILD_ARGS+=({})\n", flags.join(" ")));
            out.push_str("        ;;\n");
        }
        out.push_str("esac\n");
    }

    out.push_str("\nTAGS=(--tag \"$IMAGE_NAME:$TARGET\")\n");
    out.push_str("if [ \"$TARGET\" = \"$DEFAULT_TARGET\" ]; then\n");
    out.push_str("    TAGS+=(--tag \"$IMAGE_NAME:latest\")\n");
    out.push_str("fi\n\n");
    out.push_str("echo \"Building $IMAGE_NAME:$TARGET with $RUNTIME\"\n");
    out.push_str(
        "\"$RUNTIME\" build --target \"$TARGET\" \"${TAGS[@]}\" ${BUILD_ARGS[@]+\"${BUILD_ARGS[@]}\"} .\n",
    );
    out
}

fn image_lines(compiled: &CompiledProject, out: &mut String) {
    out.push_str(&format!("IMAGE_NAME={}\n", double_quote(compiled.name())));
    out.push_str(&format!("IMAGE_TAG={}\n", double_quote(compiled.default_target())));
    out.push('\n');
    push_lines(out, compiled.project.runtime.backend.shell_detection());
    out.push('\n');
}

fn env_lines(command: &CommandDef, array: &str) -> Vec<String> {
    command
        .env
        .iter()
        .map(|(key, value)| {
            format!(
                "{}+=(\"-e\" {})",
                array,
                double_quote(&format!("{}={}", key, value))
            )
        })
        .collect()
}

/// `run.sh`: runs the default target's image, dispatching custom commands by name
pub fn render_run_script(compiled: &CompiledProject) -> String {
    let default_target = compiled.default_target();
    let account = compiled
        .account_for(default_target)
        .cloned()
        .unwrap_or(ResolvedAccount::None);
    let setup = run_setup(compiled, &account);
    let shell = compiled.shell_for(default_target);

    let mut out = String::new();
    preamble(compiled, &mut out);
    image_lines(compiled, &mut out);
    push_lines(&mut out, setup.lines());

    if !compiled.project.commands.is_empty() {
        out.push_str("\n# Custom command handlers\n");
    }
    for command in &compiled.project.commands {
        let mut body = vec!["local -a args=(\"${RUN_ARGS[@]}\")".to_string()];
        body.extend(env_lines(command, "args"));
        body.push(format!(
            "\"$RUNTIME\" run \"${{args[@]}}\" \"$IMAGE_NAME:$IMAGE_TAG\" {} \"$@\"",
            command_invocation(shell, &command.command, &command.name)
        ));
        out.push_str(&format!("run_{}() {{\n", command.name.replace('-', "_")));
        out.push_str(&indent(&body, 4));
        out.push_str("}\n\n");
    }
    if compiled.project.commands.is_empty() {
        out.push('\n');
    }

    out.push_str("usage() {\n");
    out.push_str("    echo \"Usage: $0 [COMMAND] [ARGS...]\"\n");
    out.push_str("    echo \"\"\n");
    out.push_str("    echo \"Without arguments, starts the image's default command.\"\n");
    if !compiled.project.commands.is_empty() {
        out.push_str("    echo \"\"\n");
        out.push_str("    echo \"Commands:\"\n");
        for command in &compiled.project.commands {
            let line = match &command.description {
                Some(description) => format!("  {}  {}", command.name, description),
                None => format!("  {}", command.name),
            };
            out.push_str(&format!("    echo {}\n", double_quote(&line)));
        }
    }
    out.push_str("}\n\n");

    out.push_str("case \"${1:-}\" in\n");
    for command in &compiled.project.commands {
        out.push_str(&format!("    {})\n", command.name));
        out.push_str("        shift\n");
        out.push_str(&format!(
            "        run_{} \"$@\"\n",
            command.name.replace('-', "_")
        ));
        out.push_str("        ;;\n");
    }
    out.push_str("    -h|--help)\n        usage\n        ;;\n");
    out.push_str("    \"\")\n");
    out.push_str("        \"$RUNTIME\" run \"${RUN_ARGS[@]}\" \"$IMAGE_NAME:$IMAGE_TAG\"\n");
    out.push_str("        ;;\n");
    out.push_str("    *)\n");
    out.push_str("        \"$RUNTIME\" run \"${RUN_ARGS[@]}\" \"$IMAGE_NAME:$IMAGE_TAG\" \"$@\"\n");
    out.push_str("        ;;\n");
    out.push_str("esac\n");
    out
}

/// Script running one custom command in the default target's image
pub fn render_standalone_script(compiled: &CompiledProject, command: &CommandDef) -> String {
    let default_target = compiled.default_target();
    let account = compiled
        .account_for(default_target)
        .cloned()
        .unwrap_or(ResolvedAccount::None);
    let setup = run_setup(compiled, &account);
    let shell = compiled.shell_for(default_target);

    let mut out = String::new();
    out.push_str(SHEBANG);
    out.push_str(&header(&compiled.config_file));
    if let Some(description) = &command.description {
        let description: Vec<&str> = description.split_whitespace().collect();
        out.push_str(&format!("# {}\n", description.join(" ")));
    }
    out.push_str("set -euo pipefail\n\n");
    image_lines(compiled, &mut out);
    push_lines(&mut out, setup.lines());
    push_lines(&mut out, env_lines(command, "RUN_ARGS"));
    out.push('\n');
    out.push_str(&format!(
        "\"$RUNTIME\" run \"${{RUN_ARGS[@]}}\" \"$IMAGE_NAME:$IMAGE_TAG\" {} \"$@\"\n",
        command_invocation(shell, &command.command, &command.name)
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::compile;

    const PROJECT: &str = r#"
project:
  name: demo
user:
  development:
    host: true
  production:
    name: app
stages:
  base:
    from: python:3.11-slim
    steps:
      - create_user
  development:
    from: base
    steps:
      - become_user
  production:
    from: base
    steps:
      - become_user
commands:
  train:
    command: python train.py
    description: Train the model
    standalone: true
    env:
      EPOCHS: 10
  clean-cache:
    command: rm -rf .cache
"#;

    #[test]
    fn test_build_script_targets() {
        let script = render_build_script(&compile(PROJECT));
        assert!(script.starts_with("#!/usr/bin/env bash\n# Generated by container-magic"));
        assert!(script.contains("DEFAULT_TARGET=\"production\"\n"));
        assert!(script.contains("AVAILABLE_TARGETS=(\"base\" \"development\" \"production\")\n"));
        assert!(script.contains("    echo \"  production (default)\"\n"));
        assert!(script.contains("    echo \"  base\"\n"));
        assert!(script.contains("echo \"Invalid target: $TARGET\" >&2"));
    }

    #[test]
    fn test_build_script_args_per_target() {
        let script = render_build_script(&compile(PROJECT));
        assert!(script.contains(
            "    development)\n        BUILD_ARGS+=(--build-arg USER_NAME=\"$(id -un)\""
        ));
        assert!(script.contains("    production)\n        BUILD_ARGS+=(--build-arg USER_NAME=\"app\""));
        // base has no user entry of its own, so it builds with production's account
        assert!(script.contains("    base)\n        BUILD_ARGS+=(--build-arg USER_NAME=\"app\""));
        assert!(script.contains("${BUILD_ARGS[@]+\"${BUILD_ARGS[@]}\"}"));
    }

    #[test]
    fn test_build_script_without_accounts() {
        let script = render_build_script(&compile(
            r#"
project:
  name: plain
stages:
  production:
    from: alpine:3.19
"#,
        ));
        assert!(script.contains("BUILD_ARGS=()\n\nTAGS="));
        assert!(!script.contains("fetch_asset"));
    }

    #[test]
    fn test_build_script_fetches_assets() {
        let compiled = compile(
            r#"
project:
  name: ml
stages:
  production:
    from: python:3.11-slim
    cached_assets:
      - url: https://example.com/model.bin
        dest: /opt/model.bin
"#,
        );
        let script = render_build_script(&compiled);
        let path = &compiled.assets[0].path;
        assert!(script.contains(&format!(
            "fetch_asset \"https://example.com/model.bin\" \"{}\"\n",
            path
        )));
    }

    #[test]
    fn test_run_script_dispatch() {
        let script = render_run_script(&compile(PROJECT));
        assert!(script.contains("IMAGE_NAME=\"demo\"\nIMAGE_TAG=\"production\"\n"));
        assert!(script.contains("RUN_ARGS+=(-w \"/home/app/workspace\")\n"));
        assert!(script.contains("# Custom command handlers\nrun_train() {\n"));
        assert!(script.contains("    args+=(\"-e\" \"EPOCHS=10\")\n"));
        assert!(script.contains("run_clean_cache() {\n"));
        assert!(script.contains("case \"${1:-}\" in\n    train)\n        shift\n        run_train \"$@\"\n"));
        assert!(script.contains("    clean-cache)\n        shift\n        run_clean_cache \"$@\"\n"));
        assert!(script.contains("echo \"  train  Train the model\""));
    }

    #[test]
    fn test_standalone_script() {
        let compiled = compile(PROJECT);
        let command = compiled.project.commands[0].clone();
        let script = render_standalone_script(&compiled, &command);
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("# Train the model\n"));
        assert!(script.contains("IMAGE_NAME=\"demo\"\n"));
        assert!(script.contains("RUN_ARGS+=(\"-e\" \"EPOCHS=10\")\n"));
        assert!(script.contains(
            "\"$IMAGE_NAME:$IMAGE_TAG\" /bin/bash -c 'python train.py \"$@\"' train \"$@\"\n"
        ));
    }

    #[test]
    fn test_run_script_without_account_uses_root() {
        let script = render_run_script(&compile(
            r#"
project:
  name: plain
  workspace: code
stages:
  production:
    from: alpine:3.19
"#,
        ));
        assert!(script.contains("RUN_ARGS+=(-w \"/root/code\")\n"));
        assert!(!script.contains("# Custom command handlers"));
        assert!(script.contains("RUNTIME=docker") || script.contains("command -v docker"));
    }
}
