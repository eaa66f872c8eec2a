use m2k_planner::cli::commands::{CliArgs, Commands};
use m2k_planner::cli::handlers::{handle_plan, handle_transformers};
use m2k_planner::util::logging::{init_logging, LoggingConfig};
use m2k_planner::{PlannerConfig, VERSION};

use clap::Parser;
use tracing::debug;

fn main() {
    let args = CliArgs::parse();
    init_logging(LoggingConfig::from_flags(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("m2k-planner v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let config = match PlannerConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    debug!("{}", config);

    let exit_code = match &args.command {
        Commands::Plan(plan_args) => handle_plan(plan_args, &config),
        Commands::Transformers(list_args) => handle_transformers(list_args, &config),
    };

    std::process::exit(exit_code);
}
