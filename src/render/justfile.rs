use super::scripts::fetch_asset_lines;
use super::{command_invocation, double_quote, header, indent, just_escape, CompiledProject, RunSetup};
use crate::account::ResolvedAccount;
use crate::runtime::image_tag;

const RECIPE_INDENT: usize = 4;

fn shebang_body(lines: Vec<String>) -> String {
    let mut body = vec![
        "#!/usr/bin/env bash".to_string(),
        "set -euo pipefail".to_string(),
    ];
    body.extend(lines);
    indent(&body, RECIPE_INDENT)
}

fn build_recipe(compiled: &CompiledProject, stage: &str, extra_tags: &[String]) -> String {
    let mut words = vec![
        "{{runtime}}".to_string(),
        "build".to_string(),
        "--target".to_string(),
        stage.to_string(),
        "--tag".to_string(),
        format!("{{{{project}}}}:{}", stage),
    ];
    for tag in extra_tags {
        words.push("--tag".to_string());
        words.push(tag.clone());
    }
    if let Some(args) = compiled.build_args_for(stage) {
        words.extend(args.shell_flags().iter().map(|flag| just_escape(flag)));
    }
    words.push(".".to_string());
    format!("{}{}\n", " ".repeat(RECIPE_INDENT), words.join(" "))
}

fn check_config_recipe(compiled: &CompiledProject) -> String {
    let config = &compiled.config_file;
    let mut lines = vec![
        format!(
            "current=\"$( (sha256sum {0} 2>/dev/null || shasum -a 256 {0}) | cut -d' ' -f1)\"",
            config
        ),
        "if [ \"$current\" != \"{{config_hash}}\" ]; then".to_string(),
    ];
    if compiled.project.project.auto_update {
        lines.push(format!(
            "    echo \"{} changed, regenerating build files\" >&2",
            config
        ));
        lines.push("    cm update".to_string());
    } else {
        lines.push(format!(
            "    echo \"Warning: {} changed since the build files were generated; run 'cm update'\" >&2",
            config
        ));
    }
    lines.push("fi".to_string());
    shebang_body(lines)
}

/// Renders the Justfile
///
/// # Arguments
///
/// * `compiled` - Project with every build target compiled
///
/// # Returns
///
/// Recipes for building and running the development image, building the
/// production image and every custom command. Each recipe first checks that
/// the configuration still matches the hash it was generated from.
pub fn render_justfile(compiled: &CompiledProject) -> String {
    let project = &compiled.project;
    let development = compiled.development_stage();
    let production = compiled.default_target();
    let account = compiled
        .account_for(development)
        .cloned()
        .unwrap_or(ResolvedAccount::None);
    let setup = RunSetup {
        runtime: &project.runtime,
        account: &account,
        workspace: &project.project.workspace,
        mount_workspace: true,
    };
    let image = format!("{{{{project}}}}:{}", development);
    let shell = compiled.shell_for(development);
    let runtime_line = "RUNTIME=\"{{runtime}}\"".to_string();
    let prerequisites = if compiled.assets.is_empty() {
        "_check-config"
    } else {
        "_check-config _fetch-assets"
    };

    let mut out = header(&compiled.config_file);
    out.push('\n');
    out.push_str("set shell := [\"bash\", \"-euo\", \"pipefail\", \"-c\"]\n\n");
    out.push_str(&format!("project := {}\n", double_quote(compiled.name())));
    out.push_str(&format!("runtime := {}\n", project.runtime.backend.just_expression()));
    out.push_str(&format!("config_hash := {}\n", double_quote(&compiled.config_hash)));

    out.push_str("\n# List available recipes\ndefault:\n    @just --list\n");

    out.push_str(&format!(
        "\n# Check whether {} changed since generation\n",
        compiled.config_file
    ));
    out.push_str("_check-config:\n");
    out.push_str(&check_config_recipe(compiled));

    if !compiled.assets.is_empty() {
        out.push_str("\n# Download cached assets missing from the build context\n");
        out.push_str("_fetch-assets:\n");
        out.push_str(&shebang_body(fetch_asset_lines(&compiled.assets)));
    }

    out.push_str(&format!("\n# Build the {} image\n", development));
    out.push_str(&format!("build: {}\n", prerequisites));
    out.push_str(&build_recipe(compiled, development, &[]));

    out.push_str(&format!("\n# Build the {} image\n", production));
    out.push_str(&format!("build-production: {}\n", prerequisites));
    out.push_str(&build_recipe(
        compiled,
        production,
        &[image_tag("{{project}}", "latest")],
    ));

    let mut run_lines = vec![runtime_line.clone()];
    run_lines.extend(setup.lines());
    run_lines.push(format!("\"$RUNTIME\" run \"${{RUN_ARGS[@]}}\" {} {{{{args}}}}", image));
    out.push_str(&format!("\n# Run a command in the {} container\n", development));
    out.push_str("run *args: _check-config\n");
    out.push_str(&shebang_body(run_lines));

    let mut shell_lines = vec![runtime_line.clone()];
    shell_lines.extend(setup.lines());
    shell_lines.push(format!("\"$RUNTIME\" run \"${{RUN_ARGS[@]}}\" {} {}", image, shell));
    out.push_str(&format!("\n# Open an interactive shell in the {} container\n", development));
    out.push_str("shell: _check-config\n");
    out.push_str(&shebang_body(shell_lines));

    if !project.commands.is_empty() {
        out.push_str("\n# Custom Commands\n");
    }
    for command in &project.commands {
        let description = command
            .description
            .as_deref()
            .map(|d| d.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_else(|| format!("Run {} in the {} container", command.name, development));

        let mut lines = vec![runtime_line.clone()];
        lines.extend(setup.lines());
        for (key, value) in &command.env {
            lines.push(format!(
                "RUN_ARGS+=(\"-e\" {})",
                just_escape(&double_quote(&format!("{}={}", key, value)))
            ));
        }
        lines.push(format!(
            "\"$RUNTIME\" run \"${{RUN_ARGS[@]}}\" {} {} {{{{args}}}}",
            image,
            just_escape(&command_invocation(shell, &command.command, &command.name))
        ));

        out.push_str(&format!("\n# {}\n", description));
        out.push_str(&format!("{} *args: _check-config\n", command.name));
        out.push_str(&shebang_body(lines));
    }
    out
}
