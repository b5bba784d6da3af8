//! `cm init`: starter configuration for a new project

use crate::graph::detect_package_manager;
use crate::model::{ProjectConfig, CONFIG_FILE};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Bare names expanded to their `latest` tag
const IMAGE_SHORTCUTS: &[&str] = &["python", "ubuntu", "debian", "alpine"];

/// Base image for a template argument: `python` becomes `python:latest`
pub fn resolve_image(template: &str) -> String {
    if IMAGE_SHORTCUTS.contains(&template) {
        format!("{}:latest", template)
    } else {
        template.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub image: String,
    pub name: String,
    /// Leave out the explanatory comments
    pub compact: bool,
}

impl InitOptions {
    pub fn new(template: &str, name: impl Into<String>) -> Self {
        Self {
            image: resolve_image(template),
            name: name.into(),
            compact: false,
        }
    }
}

/// Starter `cm.yaml` contents
pub fn render_config(options: &InitOptions) -> String {
    let manager = detect_package_manager(&options.image);
    let python = options.image.to_lowercase().contains("python");
    let comment = |out: &mut String, text: &str| {
        if !options.compact {
            out.push_str(text);
            out.push('\n');
        }
    };

    let mut out = String::new();
    comment(&mut out, "# container-magic project configuration");
    comment(&mut out, "# Run 'cm update' after editing to regenerate the build files.");
    comment(&mut out, "");
    out.push_str("project:\n");
    out.push_str(&format!("  name: {}\n", options.name));
    out.push_str("  workspace: workspace\n");
    out.push_str("  auto_update: true\n\n");

    out.push_str("user:\n");
    comment(&mut out, "  # Development images run as you, so workspace files keep your ownership");
    out.push_str("  development:\n    host: true\n");
    out.push_str("  production:\n    name: app\n\n");

    out.push_str("stages:\n");
    out.push_str("  base:\n");
    out.push_str(&format!("    from: {}\n", options.image));
    out.push_str("    packages:\n");
    out.push_str(&format!("      {}: []\n", manager.as_str()));
    if python {
        out.push_str("      pip: []\n");
    }
    out.push_str("    steps:\n");
    out.push_str("      - install_system_packages\n");
    if python {
        out.push_str("      - install_pip_packages\n");
    }
    out.push_str("      - create_user\n\n");

    out.push_str("  development:\n    from: base\n    steps:\n      - become_user\n\n");
    out.push_str("  production:\n    from: base\n    steps:\n      - copy_workspace\n      - become_user\n");

    if !options.compact {
        out.push_str("\n# commands:\n");
        out.push_str("#   hello:\n");
        out.push_str("#     command: echo hello\n");
        out.push_str("#     description: Say hello from the container\n");
        out.push_str("#     standalone: true\n");
    }
    out
}

/// Write `cm.yaml` and the workspace directory into `dir`
///
/// Refuses to overwrite an existing configuration. The returned path is the
/// written configuration file.
pub fn write_project(dir: &Path, options: &InitOptions) -> Result<PathBuf> {
    let content = render_config(options);
    ProjectConfig::from_yaml_str(&content)
        .with_context(|| format!("Cannot create project '{}'", options.name))?;

    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let workspace = dir.join("workspace");
    fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create {}", workspace.display()))?;

    info!(path = %config_path.display(), image = %options.image, "Created project configuration");
    Ok(config_path)
}
