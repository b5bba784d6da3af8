//! Command handlers
//!
//! Each handler runs one subcommand and returns the process exit code.
//! Errors are printed with their full context chain.

use crate::cli::commands::{
    BuildArgs, CacheCommands, CacheListArgs, ConfigArgs, InitArgs, PlanArgs, ProjectArgs, RunArgs,
};
use crate::cli::output::{OutputFormat, OutputFormatter};
use crate::config::MagicConfig;
use crate::generate::{load_project, Generator, DOCKERFILE};
use crate::plan::{BuildTarget, Compilation, Compiler};
use crate::render::CompiledProject;
use crate::runtime::{image_tag, resolve_build_args, ImageBuild};
use crate::scaffold::{write_project, InitOptions};
use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

const JUST: &str = "just";

fn exit_code(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub fn handle_init(args: &InitArgs, settings: &MagicConfig, quiet: bool) -> i32 {
    exit_code(run_init(args, settings, quiet))
}

fn run_init(args: &InitArgs, settings: &MagicConfig, quiet: bool) -> Result<i32> {
    let parent = match &args.path {
        Some(path) => path.clone(),
        None => env::current_dir().context("Failed to determine the current directory")?,
    };

    let (dir, name) = if args.here {
        let name = match &args.name {
            Some(name) => name.clone(),
            None => directory_name(&parent)?,
        };
        (parent, name)
    } else {
        let Some(name) = &args.name else {
            bail!("A project name is required (or pass --here to initialise an existing directory)");
        };
        let dir = parent.join(name);
        if dir.exists() {
            bail!("{} already exists", dir.display());
        }
        (dir, name.clone())
    };

    let mut options = InitOptions::new(&args.template, name);
    options.compact = args.compact;
    write_project(&dir, &options)?;

    let report = Generator::new(&dir, settings.clone()).generate()?;
    if !quiet {
        println!("\u{2713} Created project '{}' from {}", report.project, options.image);
        print!("{}", OutputFormatter::new(OutputFormat::Human).format_report(&report)?);
        println!();
        println!("Next steps:");
        if !args.here {
            println!("  cd {}", dir.display());
        }
        println!("  just build");
        println!("  just shell");
    }
    Ok(0)
}

fn directory_name(dir: &Path) -> Result<String> {
    let absolute = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    absolute
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .with_context(|| format!("Cannot derive a project name from {}", absolute.display()))
}

pub fn handle_update(args: &ProjectArgs, settings: &MagicConfig, quiet: bool) -> i32 {
    exit_code(run_update(&args.dir(), settings, quiet))
}

fn run_update(dir: &Path, settings: &MagicConfig, quiet: bool) -> Result<i32> {
    let report = Generator::new(dir, settings.clone()).generate()?;
    if !quiet {
        print!("{}", OutputFormatter::new(OutputFormat::Human).format_report(&report)?);
    }
    Ok(0)
}

pub fn handle_plan(args: &PlanArgs, settings: &MagicConfig) -> i32 {
    exit_code(run_plan(args, settings))
}

fn run_plan(args: &PlanArgs, settings: &MagicConfig) -> Result<i32> {
    let generator = Generator::new(args.project.dir(), settings.clone());
    let compiled = generator.compile()?;
    let compilation = compile_target(&generator, &compiled, args.target.as_deref())?;
    let formatter = OutputFormatter::new(args.format.into());
    print!("{}", formatter.format_plan(&compilation)?);
    Ok(0)
}

/// Compile `target` (or the default target) of an already validated project
fn compile_target(
    generator: &Generator,
    compiled: &CompiledProject,
    target: Option<&str>,
) -> Result<Compilation> {
    let stage = target.unwrap_or_else(|| compiled.default_target());
    let cache = generator.asset_cache();
    let compilation = Compiler::new(&compiled.project, &compiled.graph, &cache)
        .compile(&BuildTarget::for_stage(&compiled.project, stage))
        .with_context(|| {
            let available: Vec<&str> = compiled
                .project
                .stages
                .iter()
                .map(|declared| declared.name.as_str())
                .collect();
            format!("Cannot plan '{}' (available: {})", stage, available.join(", "))
        })?;
    Ok(compilation)
}

pub fn handle_build(args: &BuildArgs, settings: &MagicConfig, quiet: bool) -> i32 {
    exit_code(run_build(args, settings, quiet))
}

fn run_build(args: &BuildArgs, settings: &MagicConfig, quiet: bool) -> Result<i32> {
    let dir = args.project.dir();
    let generator = Generator::new(&dir, settings.clone());

    if !args.no_fetch {
        let compiled = generator.compile()?;
        fetch_assets(&generator, &compiled, quiet)?;
    }

    generator.generate()?;
    let compiled = generator.compile()?;
    let compilation = compile_target(&generator, &compiled, args.target.as_deref())?;
    let target = compilation.plan.target.stage.clone();

    let backend = settings.effective_runtime(compiled.project.runtime.backend);
    let runtime = backend.resolve()?;
    debug!(%backend, %runtime, "Resolved container runtime");

    let mut tags = vec![image_tag(compiled.name(), &target)];
    if target == compiled.default_target() {
        tags.push(image_tag(compiled.name(), "latest"));
    }

    let dockerfile = dir.join(DOCKERFILE);
    let build = ImageBuild {
        context_dir: &dir,
        dockerfile: &dockerfile,
        target: &target,
        tags,
        build_args: resolve_build_args(&compilation.plan.build_args)?,
    };
    build.run(runtime)?;

    if !quiet {
        println!("\u{2713} Built {}", build.tags.join(", "));
    }
    Ok(0)
}

/// Download every asset the project declares; returns how many were fetched
fn fetch_assets(generator: &Generator, compiled: &CompiledProject, quiet: bool) -> Result<usize> {
    let cache = generator.asset_cache();
    for asset in &compiled.assets {
        let path = cache.fetch(&asset.url)?;
        if !quiet {
            println!("\u{2713} {} -> {}", asset.url, asset.path);
        }
        debug!(url = %asset.url, path = %path.display(), "Asset ready");
    }
    info!(count = compiled.assets.len(), "Assets fetched");
    Ok(compiled.assets.len())
}

pub fn handle_run(args: &RunArgs) -> i32 {
    let mut just_args = vec!["run".to_string()];
    just_args.extend(args.command.iter().cloned());
    exit_code(run_just(&args.project.dir(), &just_args))
}

pub fn handle_shell(args: &ProjectArgs) -> i32 {
    exit_code(run_just(&args.dir(), &["shell".to_string()]))
}

/// Run a Justfile recipe in the project directory and pass its exit code through
fn run_just(dir: &Path, args: &[String]) -> Result<i32> {
    load_project(dir)?;
    if !just_available() {
        bail!("'{}' is not installed; see https://github.com/casey/just", JUST);
    }

    debug!(dir = %dir.display(), ?args, "Delegating to just");
    let status = Command::new(JUST)
        .args(args)
        .current_dir(dir)
        .status()
        .with_context(|| format!("Failed to start '{}'", JUST))?;
    Ok(status.code().unwrap_or(1))
}

fn just_available() -> bool {
    Command::new(JUST)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub fn handle_cache(command: &CacheCommands, settings: &MagicConfig, quiet: bool) -> i32 {
    let result = match command {
        CacheCommands::Fetch(args) => run_cache_fetch(&args.dir(), settings, quiet),
        CacheCommands::List(args) => run_cache_list(args, settings),
        CacheCommands::Clear(args) => run_cache_clear(&args.dir(), settings, quiet),
        CacheCommands::Path(args) => {
            let cache = Generator::new(args.dir(), settings.clone()).asset_cache();
            println!("{}", cache.root().display());
            Ok(0)
        }
    };
    exit_code(result)
}

fn run_cache_fetch(dir: &Path, settings: &MagicConfig, quiet: bool) -> Result<i32> {
    let generator = Generator::new(dir, settings.clone());
    let compiled = generator.compile()?;
    let count = fetch_assets(&generator, &compiled, quiet)?;
    if !quiet && count == 0 {
        println!("No cached assets declared in {}", compiled.config_file);
    }
    Ok(0)
}

fn run_cache_list(args: &CacheListArgs, settings: &MagicConfig) -> Result<i32> {
    let cache = Generator::new(args.project.dir(), settings.clone()).asset_cache();
    let files = cache.list()?;
    print!("{}", OutputFormatter::new(args.format.into()).format_cache_list(&files)?);
    Ok(0)
}

fn run_cache_clear(dir: &Path, settings: &MagicConfig, quiet: bool) -> Result<i32> {
    let cache = Generator::new(dir, settings.clone()).asset_cache();
    let removed = cache.clear()?;
    if !quiet {
        if removed {
            println!("\u{2713} Cleared {}", cache.root().display());
        } else {
            println!("Cache is already empty");
        }
    }
    Ok(0)
}

pub fn handle_config(args: &ConfigArgs, settings: &MagicConfig) -> i32 {
    exit_code(
        OutputFormatter::new(args.format.into())
            .format_config(settings)
            .map(|output| {
                print!("{}", output);
                0
            }),
    )
}
