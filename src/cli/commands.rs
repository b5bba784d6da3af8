use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Compile a cm.yaml project into container build files
#[derive(Parser, Debug)]
#[command(
    name = "cm",
    about = "Compile a cm.yaml project into container build files",
    version,
    long_about = "cm turns a single cm.yaml into a multi-stage Dockerfile, a Justfile for \
                  day-to-day development and standalone build.sh / run.sh scripts.\n\n\
                  Examples:\n  \
                  cm init python my-project\n  \
                  cm update\n  \
                  cm plan --target development\n  \
                  cm build"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Create a new project",
        long_about = "Writes a starter cm.yaml and workspace directory, then generates the \
                      build files.\n\n\
                      Examples:\n  \
                      cm init python my-project\n  \
                      cm init ubuntu:24.04 tools --path ~/src\n  \
                      cm init alpine --here --compact"
    )]
    Init(InitArgs),

    #[command(
        about = "Regenerate the build files from cm.yaml",
        visible_alias = "generate"
    )]
    Update(ProjectArgs),

    #[command(
        about = "Show the compiled build plan of a target",
        long_about = "Compiles one build target and prints its plan: the stage chain, \
                      emitted instructions, account context transitions and build arguments.\n\n\
                      Examples:\n  \
                      cm plan\n  \
                      cm plan --target development --format json"
    )]
    Plan(PlanArgs),

    #[command(about = "Fetch cached assets, regenerate and build an image")]
    Build(BuildArgs),

    #[command(about = "Run a command in the development container (via just)")]
    Run(RunArgs),

    #[command(about = "Open a shell in the development container (via just)")]
    Shell(ProjectArgs),

    /// Manage the asset cache
    #[command(subcommand)]
    Cache(CacheCommands),

    #[command(about = "Show tool settings")]
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(
        short = 'p',
        long,
        value_name = "DIR",
        help = "Project directory (defaults to current directory)"
    )]
    pub path: Option<PathBuf>,
}

impl ProjectArgs {
    pub fn dir(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(
        value_name = "IMAGE",
        help = "Base image, or one of python, ubuntu, debian, alpine"
    )]
    pub template: String,

    #[arg(
        value_name = "NAME",
        help = "Project name (defaults to the directory name with --here)"
    )]
    pub name: Option<String>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Parent directory to create the project in"
    )]
    pub path: Option<PathBuf>,

    #[arg(long, help = "Initialise the current (or --path) directory instead of a new one")]
    pub here: bool,

    #[arg(long, help = "Write cm.yaml without explanatory comments")]
    pub compact: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(
        short = 't',
        long,
        value_name = "STAGE",
        help = "Stage to compile (defaults to the default target)"
    )]
    pub target: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(
        short = 't',
        long,
        value_name = "STAGE",
        help = "Stage to build (defaults to the default target)"
    )]
    pub target: Option<String>,

    #[arg(long, help = "Skip downloading cached assets")]
    pub no_fetch: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Command and arguments to run"
    )]
    pub command: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommands {
    #[command(about = "Download every cached asset declared in cm.yaml")]
    Fetch(ProjectArgs),

    #[command(about = "List cached assets")]
    List(CacheListArgs),

    #[command(about = "Remove the asset cache")]
    Clear(ProjectArgs),

    #[command(about = "Print the asset cache directory")]
    Path(ProjectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CacheListArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
