//! Generation pipeline
//!
//! Load `cm.yaml`, validate it, compile every build target, render the build
//! files and write them next to the configuration. Compilation of all targets
//! finishes before anything is written, so a failing target never leaves a
//! half-updated set of files behind.

use crate::cache::{AssetStore, LocalAssetCache};
use crate::config::MagicConfig;
use crate::error::CompileError;
use crate::graph::StageGraph;
use crate::model::{find_config_file, ProjectConfig, CONFIG_FILE};
use crate::plan::{BuildTarget, Compilation, Compiler, Warning};
use crate::render::{self, AssetRef, CompiledProject, GENERATED_MARKER};
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DOCKERFILE: &str = "Dockerfile";
pub const JUSTFILE: &str = "Justfile";
pub const BUILD_SCRIPT: &str = "build.sh";
pub const RUN_SCRIPT: &str = "run.sh";
const GITIGNORE: &str = ".gitignore";

pub fn config_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Targets compiled for a project: the default target, every stage with its
/// own `user` entry and every leaf stage, in declaration order
pub fn build_targets(project: &ProjectConfig, graph: &StageGraph) -> Vec<BuildTarget> {
    let leaves: BTreeSet<&str> = graph.leaves().iter().map(|s| s.name.as_str()).collect();
    project
        .stages
        .iter()
        .map(|stage| stage.name.as_str())
        .filter(|name| {
            *name == project.default_target
                || project.accounts.contains(name)
                || leaves.contains(name)
        })
        .map(|name| BuildTarget::for_stage(project, name))
        .collect()
}

/// Compile every build target of `project`
///
/// # Arguments
///
/// * `project` - Validated configuration
/// * `config_file` - File name the configuration was read from, quoted in headers
/// * `config_hash` - Digest of the configuration file, see [`config_hash`]
/// * `assets` - Cache consulted for `copy_cached_assets`
///
/// # Errors
///
/// The first target that fails to compile aborts the whole project. A stage
/// shared by several targets must compile to the same text for all of them,
/// otherwise [`CompileError::DivergentStage`] is returned.
pub fn compile_project(
    project: ProjectConfig,
    config_file: &str,
    config_hash: String,
    assets: &dyn AssetStore,
) -> Result<CompiledProject, CompileError> {
    let graph = StageGraph::resolve(&project.stages)?;
    let targets = build_targets(&project, &graph);
    debug!(targets = targets.len(), "Compiling build targets");

    let compilations = {
        let compiler = Compiler::new(&project, &graph, assets);
        targets
            .iter()
            .map(|target| compiler.compile(target))
            .collect::<Result<Vec<_>, _>>()?
    };
    check_shared_stages(&graph, &compilations)?;

    let mut seen = BTreeSet::new();
    let asset_refs = project
        .stages
        .iter()
        .flat_map(|stage| stage.cached_assets.iter())
        .filter(|asset| seen.insert(asset.url.clone()))
        .map(|asset| AssetRef {
            url: asset.url.clone(),
            path: assets.relative_path(&asset.url),
        })
        .collect();

    Ok(CompiledProject {
        project,
        graph,
        compilations,
        assets: asset_refs,
        config_file: config_file.to_string(),
        config_hash,
    })
}

/// Every stage is written to the Dockerfile once, so all compilations that
/// pass through a stage must agree on its text
fn check_shared_stages(
    graph: &StageGraph,
    compilations: &[Compilation],
) -> Result<(), CompileError> {
    for resolved in graph.stages() {
        let renderings: Vec<(&str, String)> = compilations
            .iter()
            .filter_map(|compilation| {
                compilation
                    .plan
                    .stage(&resolved.name)
                    .map(|stage| (compilation.plan.target.stage.as_str(), stage.dockerfile_text()))
            })
            .collect();
        let Some((_, first)) = renderings.first() else {
            continue;
        };
        if renderings.iter().any(|(_, text)| text != first) {
            return Err(CompileError::DivergentStage {
                stage: resolved.name.clone(),
                targets: renderings.iter().map(|(target, _)| target.to_string()).collect(),
            });
        }
    }
    Ok(())
}

/// A rendered file, relative to the project directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    #[serde(skip)]
    pub contents: String,
    pub executable: bool,
}

impl GeneratedFile {
    fn new(path: impl Into<String>, contents: String, executable: bool) -> Self {
        Self {
            path: path.into(),
            contents,
            executable,
        }
    }
}

/// Every file generated for a compiled project
pub fn render_files(compiled: &CompiledProject) -> Vec<GeneratedFile> {
    let mut files = vec![
        GeneratedFile::new(DOCKERFILE, render::render_dockerfile(compiled), false),
        GeneratedFile::new(JUSTFILE, render::render_justfile(compiled), false),
        GeneratedFile::new(BUILD_SCRIPT, render::render_build_script(compiled), true),
        GeneratedFile::new(RUN_SCRIPT, render::render_run_script(compiled), true),
    ];
    files.extend(compiled.project.standalone_commands().map(|command| {
        GeneratedFile::new(
            format!("{}.sh", command.name),
            render::render_standalone_script(compiled, command),
            true,
        )
    }));
    files
}

/// A configuration file as read from disk
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub config: ProjectConfig,
    pub path: PathBuf,
    pub hash: String,
}

impl LoadedProject {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| CONFIG_FILE.to_string())
    }
}

pub fn load_project(project_dir: &Path) -> Result<LoadedProject> {
    let path = find_config_file(project_dir).with_context(|| {
        format!(
            "No {} found in {} (run 'cm init' to create one)",
            CONFIG_FILE,
            project_dir.display()
        )
    })?;
    let content =
        fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&content);
    let config = ProjectConfig::from_yaml_str(&text)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    info!(path = %path.display(), project = %config.project.name, "Loaded project");
    Ok(LoadedProject {
        config,
        path,
        hash: config_hash(&content),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub project: String,
    pub written: Vec<GeneratedFile>,
    pub removed: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// Runs the pipeline for one project directory
pub struct Generator {
    project_dir: PathBuf,
    settings: MagicConfig,
}

impl Generator {
    pub fn new(project_dir: impl Into<PathBuf>, settings: MagicConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            settings,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn asset_cache(&self) -> LocalAssetCache {
        LocalAssetCache::new(&self.project_dir, self.settings.cache_dir_str())
            .with_timeout(self.settings.download_timeout())
    }

    pub fn load(&self) -> Result<LoadedProject> {
        load_project(&self.project_dir)
    }

    pub fn compile(&self) -> Result<CompiledProject> {
        let loaded = self.load()?;
        let file_name = loaded.file_name();
        let cache = self.asset_cache();
        compile_project(loaded.config, &file_name, loaded.hash, &cache)
            .with_context(|| format!("Failed to compile {}", file_name))
    }

    /// Compile, render and write every generated file
    ///
    /// Nothing is written unless every build target compiles. Stale standalone
    /// scripts carrying the generated-file marker are removed afterwards.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use container_magic::{Generator, MagicConfig};
    ///
    /// let settings = MagicConfig::from_env()?;
    /// let report = Generator::new("./my-project", settings).generate()?;
    /// println!("{} files written", report.written.len());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn generate(&self) -> Result<GenerationReport> {
        let compiled = self.compile()?;
        let warnings: Vec<Warning> = compiled.warnings().into_iter().cloned().collect();
        for warning in &warnings {
            warn!("{}", warning);
        }

        let files = render_files(&compiled);
        for file in &files {
            write_file(&self.project_dir, file)?;
        }

        let keep: BTreeSet<String> = files.iter().map(|file| file.path.clone()).collect();
        let removed = remove_orphaned_scripts(&self.project_dir, &keep)?;

        if ensure_gitignore(&self.project_dir, &self.settings.cache_dir_str())? {
            debug!("Added asset cache to {}", GITIGNORE);
        }

        info!(
            project = %compiled.name(),
            written = files.len(),
            removed = removed.len(),
            "Generated build files"
        );
        Ok(GenerationReport {
            project: compiled.name().to_string(),
            written: files,
            removed,
            warnings,
        })
    }
}

fn write_file(project_dir: &Path, file: &GeneratedFile) -> Result<()> {
    let path = project_dir.join(&file.path);
    fs::write(&path, &file.contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if file.executable {
        set_executable(&path)?;
    }
    debug!(path = %path.display(), "Wrote generated file");
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Delete generated `*.sh` scripts that no longer belong to a standalone command
///
/// Only files carrying the generated marker are touched; hand-written scripts
/// stay.
fn remove_orphaned_scripts(project_dir: &Path, keep: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    let entries = fs::read_dir(project_dir)
        .with_context(|| format!("Failed to read {}", project_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".sh") || keep.contains(&name) || !entry.file_type()?.is_file() {
            continue;
        }
        let generated = fs::read_to_string(entry.path())
            .map(|content| content.lines().take(3).any(|line| line.contains(GENERATED_MARKER)))
            .unwrap_or(false);
        if generated {
            fs::remove_file(entry.path())
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            info!(script = %name, "Removed orphaned command script");
            removed.push(name);
        }
    }
    removed.sort();
    Ok(removed)
}

/// Make sure the asset cache is ignored by git; returns whether the file changed
fn ensure_gitignore(project_dir: &Path, cache_dir: &str) -> Result<bool> {
    let path = project_dir.join(GITIGNORE);
    let entry = format!("{}/", cache_dir.trim_end_matches('/'));
    let existing = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        String::new()
    };

    let already = existing
        .lines()
        .map(str::trim)
        .any(|line| line == entry || line == cache_dir || line == format!("/{}", entry));
    if already {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated.push('\n');
    fs::write(&path, updated).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
