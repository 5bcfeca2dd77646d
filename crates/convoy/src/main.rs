mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Provision and tear down EC2 deployment fleets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List or run pipelines
    #[command(subcommand)]
    Pipelines(PipelineCommands),
    /// Show built-in documentation
    #[command(subcommand)]
    Describe(DescribeCommands),
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum PipelineCommands {
    /// List every registered pipeline
    List,
    /// Run a pipeline
    Run {
        /// Pipeline name (see `convoy pipelines list`)
        name: String,
        /// Pipeline options as `--key value` pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Print the outcome as JSON on the last line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DescribeCommands {
    /// Print a pipeline's description
    Pipeline {
        /// Pipeline name
        name: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Version => {
            println!("convoy {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Pipelines(PipelineCommands::List) => {
            commands::pipelines::handle_list()?;
        }
        Commands::Pipelines(PipelineCommands::Run { name, args, json }) => {
            commands::pipelines::handle_run(&name, &args, json).await?;
        }
        Commands::Describe(DescribeCommands::Pipeline { name }) => {
            commands::describe::handle_pipeline(&name)?;
        }
    }

    Ok(())
}
