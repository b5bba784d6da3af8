use container_magic::cli::commands::{CliArgs, Commands};
use container_magic::cli::handlers::{
    handle_build, handle_cache, handle_config, handle_init, handle_plan, handle_run, handle_shell,
    handle_update,
};
use container_magic::util::logging::{self, LoggingConfig};
use container_magic::{MagicConfig, VERSION};

use clap::Parser;
use tracing::{debug, Level};

fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("container-magic v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let settings = match MagicConfig::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let exit_code = match &args.command {
        Commands::Init(init_args) => handle_init(init_args, &settings, args.quiet),
        Commands::Update(project_args) => handle_update(project_args, &settings, args.quiet),
        Commands::Plan(plan_args) => handle_plan(plan_args, &settings),
        Commands::Build(build_args) => handle_build(build_args, &settings, args.quiet),
        Commands::Run(run_args) => handle_run(run_args),
        Commands::Shell(project_args) => handle_shell(project_args),
        Commands::Cache(cache_command) => handle_cache(cache_command, &settings, args.quiet),
        Commands::Config(config_args) => handle_config(config_args, &settings),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let config = if let Some(level_str) = &args.log_level {
        LoggingConfig::with_level(logging::parse_level(level_str))
    } else if args.verbose {
        LoggingConfig::with_level(Level::DEBUG)
    } else if args.quiet {
        LoggingConfig::with_level(Level::ERROR)
    } else {
        logging::config_from_env()
    };
    logging::init_logging(config);
}
