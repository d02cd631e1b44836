//! mocktest CLI: take timed mock exams from the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod console;

#[derive(Parser)]
#[command(
    name = "mocktest",
    version,
    about = "Timed mock exams with negative marking"
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new timed session
    Take {
        /// Exam id on the configured service, or path to an exam .toml file
        #[arg(long)]
        exam: String,
    },

    /// Continue the session saved by an earlier run
    Resume,

    /// Show the saved session and its question palette
    Status,

    /// Compute a negative-marking score from question counts
    Score {
        #[arg(long)]
        total: usize,

        #[arg(long, default_value = "0")]
        correct: usize,

        #[arg(long, default_value = "0")]
        incorrect: usize,

        /// Defaults to whatever is left of the total
        #[arg(long)]
        unanswered: Option<usize>,

        /// Pass mark in percent (default: from config)
        #[arg(long)]
        passing: Option<f64>,

        /// Print the breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate exam TOML files
    Validate {
        /// Path to an exam file or directory
        #[arg(long)]
        exam: PathBuf,
    },

    /// Throw away the saved session
    Discard,

    /// Create a starter config and example exam
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mocktest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Take { exam } => commands::take::execute(exam, config).await,
        Commands::Resume => commands::resume::execute(config).await,
        Commands::Status => commands::status::execute(config),
        Commands::Score {
            total,
            correct,
            incorrect,
            unanswered,
            passing,
            json,
        } => commands::score::execute(
            commands::score::Counts {
                total,
                correct,
                incorrect,
                unanswered,
            },
            passing,
            json,
            config,
        ),
        Commands::Validate { exam } => commands::validate::execute(exam),
        Commands::Discard => commands::discard::execute(config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
