use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Transformer-driven service discovery for source trees
#[derive(Parser, Debug)]
#[command(
    name = "m2k-planner",
    about = "Discover the services in a source tree and write a plan",
    version,
    long_about = "m2k-planner walks a source tree, runs the selected transformers on every \
                  directory it keeps and writes the services they detect as a plan document \
                  for downstream artifact generation."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
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
        about = "Detect services and write a plan",
        long_about = "Initializes the transformers, walks the source tree and writes the \
                      named services as a plan.\n\n\
                      Examples:\n  \
                      m2k-planner plan\n  \
                      m2k-planner plan ./src --name shop --format json\n  \
                      m2k-planner plan ./src --transformers ./my-transformers -o plan.yaml\n  \
                      m2k-planner plan ./src --selector 'm2k-planner.io/language in (go,java)'"
    )]
    Plan(PlanArgs),

    #[command(
        about = "List the active and deselected transformers",
        long_about = "Loads and initializes the transformers exactly as `plan` would and \
                      prints which ones are active.\n\n\
                      Examples:\n  \
                      m2k-planner transformers\n  \
                      m2k-planner transformers --transformers ./my-transformers --format yaml"
    )]
    Transformers(TransformersArgs),
}

/// Options shared by every command that initializes transformers
#[derive(Parser, Debug, Clone, Default)]
pub struct TransformerSourceArgs {
    #[arg(
        short = 't',
        long,
        value_name = "DIR",
        help = "Directory of transformer YAML files, searched before the built-in ones"
    )]
    pub transformers: Option<PathBuf>,

    #[arg(
        short = 's',
        long,
        value_name = "EXPR",
        help = "Label selector choosing which transformers to initialize"
    )]
    pub selector: Option<String>,

    #[arg(long, help = "Do not load the built-in transformers")]
    pub no_builtin: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        value_name = "PATH",
        help = "Source directory (defaults to current directory)"
    )]
    pub source: Option<PathBuf>,

    #[arg(
        short = 'n',
        long,
        value_name = "NAME",
        help = "Project name (defaults to the source directory name)"
    )]
    pub name: Option<String>,

    #[command(flatten)]
    pub transformer_source: TransformerSourceArgs,

    #[arg(
        long,
        value_name = "EXPR",
        help = "Label selector restricting which initialized transformers detect services"
    )]
    pub transformer_selector: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Timeout for each transformer command (overrides M2K_PLANNER_EXEC_TIMEOUT)"
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "yaml",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct TransformersArgs {
    #[command(flatten)]
    pub transformer_source: TransformerSourceArgs,

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
