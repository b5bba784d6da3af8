//! Output formatting for multiple formats
//!
//! Plans, generation reports, cache listings and settings can be printed as
//! JSON, YAML or human-readable text. Machine formats go to stdout untouched
//! so they can be piped.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cache::CachedFile;
use crate::config::MagicConfig;
use crate::generate::GenerationReport;
use crate::plan::Compilation;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn serialize<T: Serialize>(&self, value: &T, what: &str) -> Result<Option<String>> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value)
                .map(Some)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .map(Some)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            OutputFormat::Human => Ok(None),
        }
    }

    /// Formats a compiled build plan with its warnings
    pub fn format_plan(&self, compilation: &Compilation) -> Result<String> {
        if let Some(output) = self.serialize(compilation, "build plan")? {
            return Ok(output);
        }

        let mut output = String::new();
        output.push_str(&compilation.plan.to_string());
        if !compilation.warnings.is_empty() {
            output.push_str("\n\u{26A0} Warnings:\n");
            for warning in &compilation.warnings {
                output.push_str(&format!("  - {}\n", warning));
            }
        }
        Ok(output)
    }

    /// Formats the result of a generation run
    pub fn format_report(&self, report: &GenerationReport) -> Result<String> {
        if let Some(output) = self.serialize(report, "generation report")? {
            return Ok(output);
        }

        let mut output = String::new();
        output.push_str(&format!("\u{2713} Generated build files for {}\n", report.project));
        for (i, file) in report.written.iter().enumerate() {
            let connector = if i + 1 == report.written.len() && report.removed.is_empty() {
                "\u{2514}"
            } else {
                "\u{251C}"
            };
            output.push_str(&format!("{}\u{2500} {}\n", connector, file.path));
        }
        for (i, removed) in report.removed.iter().enumerate() {
            let connector = if i + 1 == report.removed.len() {
                "\u{2514}"
            } else {
                "\u{251C}"
            };
            output.push_str(&format!("{}\u{2500} {} (removed)\n", connector, removed));
        }
        if !report.warnings.is_empty() {
            output.push_str("\n\u{26A0} Warnings:\n");
            for warning in &report.warnings {
                output.push_str(&format!("  - {}\n", warning));
            }
        }
        Ok(output)
    }

    /// Formats the contents of the asset cache
    pub fn format_cache_list(&self, files: &[CachedFile]) -> Result<String> {
        if let Some(output) = self.serialize(&files, "cache listing")? {
            return Ok(output);
        }

        if files.is_empty() {
            return Ok("No cached assets found\n".to_string());
        }
        let mut output = format!("Cached assets ({}):\n", files.len());
        for file in files {
            let name = file
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            output.push_str(&format!(
                "  \u{2022} {} ({:.2} MB)\n",
                name,
                file.size as f64 / (1024.0 * 1024.0)
            ));
            output.push_str(&format!("    Key:  {}\n", file.key));
            output.push_str(&format!("    Path: {}\n", file.path.display()));
        }
        Ok(output)
    }

    /// Formats tool settings
    pub fn format_config(&self, config: &MagicConfig) -> Result<String> {
        let config_map = config.to_display_map();
        if let Some(output) = self.serialize(&config_map, "settings")? {
            return Ok(output);
        }

        let mut output = String::new();
        output.push_str("container-magic Settings\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        for (key, value) in &config_map {
            output.push_str(&format!("  {:<22} {}\n", key, value));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StaticAssetStore;
    use crate::generate::GeneratedFile;
    use crate::graph::StageGraph;
    use crate::model::ProjectConfig;
    use crate::plan::{BuildTarget, Compiler, Warning};
    use std::path::PathBuf;

    fn compilation() -> Compilation {
        let project = ProjectConfig::from_yaml_str(
            r#"
project:
  name: demo
user:
  production:
    name: app
stages:
  production:
    from: alpine:3.19
    steps:
      - become_user
"#,
        )
        .unwrap();
        let graph = StageGraph::resolve(&project.stages).unwrap();
        let assets = StaticAssetStore::default();
        Compiler::new(&project, &graph, &assets)
            .compile(&BuildTarget::for_stage(&project, "production"))
            .unwrap()
    }

    #[test]
    fn test_plan_human() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_plan(&compilation())
            .unwrap();
        assert!(output.contains("Build plan for production"));
        assert!(output.contains("FROM alpine:3.19 AS production"));
        assert!(output.contains("USER ${USER_NAME}"));
        assert!(output.contains("Warnings:"));
    }

    #[test]
    fn test_plan_json() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_plan(&compilation())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["plan"]["target"]["stage"], "production");
        assert_eq!(value["plan"]["stages"][0]["name"], "production");
        assert_eq!(value["warnings"][0]["kind"], "become_user_without_create");
    }

    #[test]
    fn test_plan_yaml() {
        let output = OutputFormatter::new(OutputFormat::Yaml)
            .format_plan(&compilation())
            .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        assert_eq!(value["plan"]["target"]["account"], "production");
    }

    #[test]
    fn test_report_human() {
        let report = GenerationReport {
            project: "demo".to_string(),
            written: vec![GeneratedFile {
                path: "Dockerfile".to_string(),
                contents: String::new(),
                executable: false,
            }],
            removed: vec!["old.sh".to_string()],
            warnings: vec![Warning::AssetNotCached {
                stage: "base".to_string(),
                url: "https://example.com/a".to_string(),
            }],
        };
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_report(&report)
            .unwrap();
        assert!(output.contains("Generated build files for demo"));
        assert!(output.contains("\u{251C}\u{2500} Dockerfile\n"));
        assert!(output.contains("\u{2514}\u{2500} old.sh (removed)\n"));
        assert!(output.contains("https://example.com/a"));
    }

    #[test]
    fn test_cache_list() {
        let formatter = OutputFormatter::new(OutputFormat::Human);
        assert_eq!(formatter.format_cache_list(&[]).unwrap(), "No cached assets found\n");

        let files = vec![CachedFile {
            key: "0123456789abcdef".to_string(),
            path: PathBuf::from(".cm-cache/assets/0123456789abcdef/model.bin"),
            size: 2 * 1024 * 1024,
        }];
        let output = formatter.format_cache_list(&files).unwrap();
        assert!(output.contains("Cached assets (1):"));
        assert!(output.contains("model.bin (2.00 MB)"));

        let json = OutputFormatter::new(OutputFormat::Json)
            .format_cache_list(&files)
            .unwrap();
        assert!(json.contains("\"key\": \"0123456789abcdef\""));
    }

    #[test]
    fn test_config_formats() {
        let config = MagicConfig {
            log_level: "info".to_string(),
            runtime: None,
            cache_dir: PathBuf::from(".cm-cache"),
            download_timeout_secs: 30,
        };
        let human = OutputFormatter::new(OutputFormat::Human)
            .format_config(&config)
            .unwrap();
        assert!(human.contains("container-magic Settings"));
        assert!(human.contains("cache_dir"));

        let json = OutputFormatter::new(OutputFormat::Json)
            .format_config(&config)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["download_timeout_secs"], "30");
    }
}
