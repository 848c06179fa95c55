//! bnb4 - convert Hugging Face models to 4-bit bitsandbytes checkpoints from
//! the terminal.

mod handlers;
mod sink;

use std::path::PathBuf;
use std::process::ExitCode;

use bnb4_core::config::default_data_dir;
use bnb4_core::ConverterBuilder;
use clap::{Parser, Subcommand};
use console::Style;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::handlers::ConvertArgs;

#[derive(Parser, Debug)]
#[command(name = "bnb4")]
#[command(about = "Convert Hugging Face models to 4-bit bitsandbytes checkpoints")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Data directory for the helper script and Python environment
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (defaults to gui_settings.json in the working directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Python interpreter to use instead of the managed environment
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in model catalog
    Models,
    /// Download, quantize and save a model
    Convert(ConvertArgs),
    /// Create the Python environment the converter runs in
    Setup,
    /// Show GPU and environment information
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Job text goes to the terminal through the progress bar; tracing only
    // carries diagnostics, on stderr.
    let log_level = if cli.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", Style::new().red().bold().apply_to("error:"), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut builder = ConverterBuilder::new(cli.data_dir.unwrap_or_else(default_data_dir));
    if let Some(settings) = cli.settings {
        builder = builder.settings_path(settings);
    }
    if let Some(python) = cli.python {
        builder = builder.python(python);
    }

    match cli.command {
        Command::Models => {
            handlers::list_models(&bnb4_core::ModelCatalog::builtin());
            Ok(ExitCode::SUCCESS)
        }
        Command::Convert(args) => handlers::handle_convert(builder, args).await,
        Command::Setup => {
            handlers::handle_setup(builder.build()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Info => {
            handlers::handle_info(&builder.build()?).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}
