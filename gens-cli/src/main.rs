use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gens_core::TrackKind;
use std::path::PathBuf;

mod commands;
mod config;
mod error;

use config::Config;
use error::{print_error_and_exit, CliError};

#[derive(Parser)]
#[command(name = "gens")]
#[command(about = "Gens - multi-resolution genomic track cache and aggregation engine")]
#[command(version)]
#[command(long_about = "
Gens serves coverage, B-allele frequency and annotation tracks at the
resolution a viewport needs, from a shared tile cache.

Examples:
  gens config --example --output gens.toml
  gens load
  gens query --sample S1 --kind coverage --region 'chr1:1,000,000-2,000,000' --width 1000
  gens highlight --sample S1 --region '1:0-5000000'
  gens replay --requests requests.jsonl --repeat 4
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of threads to use
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load configured sample tracks and report accepted and rejected rows
    Load {
        /// Only load this sample
        #[arg(long)]
        sample: Option<String>,
    },

    /// Resolve one track request and print the response as JSON
    Query {
        /// Sample identifier
        #[arg(long, required = true)]
        sample: String,

        /// Case identifier carried along with the request
        #[arg(long)]
        case: Option<String>,

        /// Track kind (coverage, baf, gene, variant, sample-annotation, overview)
        #[arg(long, required = true)]
        kind: TrackKind,

        /// Region such as chr1:1,000,000-2,000,000
        #[arg(long, required = true)]
        region: String,

        /// Viewport width in points (defaults to general.viewport_width)
        #[arg(long)]
        width: Option<u64>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print annotation highlight ranges for a region
    Highlight {
        /// Sample identifier
        #[arg(long, required = true)]
        sample: String,

        /// Annotation track kind
        #[arg(long, default_value = "sample-annotation")]
        kind: TrackKind,

        /// Region such as chr1:1,000,000-2,000,000
        #[arg(long, required = true)]
        region: String,

        /// Viewport width in points (defaults to general.viewport_width)
        #[arg(long)]
        width: Option<u64>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Replay a JSON-lines request log concurrently and report cache statistics
    Replay {
        /// Request log, one JSON track request per line
        #[arg(long, required = true)]
        requests: PathBuf,

        /// Number of passes over the log
        #[arg(long, default_value = "1")]
        repeat: usize,

        /// Only load this sample before replaying
        #[arg(long)]
        sample: Option<String>,
    },

    /// Print or write a configuration file
    Config {
        /// Print an example configuration with a sample entry
        #[arg(long)]
        example: bool,

        /// Write the configuration to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: u8, quiet: bool) -> Result<()> {
    if quiet {
        std::env::set_var("RUST_LOG", "error");
    } else {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    let threads = cli.threads.unwrap_or(config.general.threads);
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to set thread count")?;
    }

    let default_width = config.general.viewport_width;
    match cli.command {
        Commands::Load { sample } => commands::load::execute(&config, sample)?,

        Commands::Query {
            sample,
            case,
            kind,
            region,
            width,
            pretty,
        } => {
            let (service, _) = commands::load::build_service(&config, Some(&sample))?;
            commands::query::execute(
                &service,
                sample,
                case,
                kind,
                &region,
                width.unwrap_or(default_width),
                pretty,
            )?;
        }

        Commands::Highlight {
            sample,
            kind,
            region,
            width,
            pretty,
        } => {
            let (service, _) = commands::load::build_service(&config, Some(&sample))?;
            commands::query::execute_highlight(
                &service,
                sample,
                kind,
                &region,
                width.unwrap_or(default_width),
                pretty,
            )?;
        }

        Commands::Replay {
            requests,
            repeat,
            sample,
        } => {
            let (service, _) = commands::load::build_service(&config, sample.as_deref())?;
            commands::replay::execute(&service, &requests, repeat)?;
        }

        Commands::Config { example, output } => {
            let content = if example {
                Config::example_toml()?
            } else {
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .map_err(|e| CliError::io(format!("{}: {}", path.display(), e)))?;
                    log::info!("Configuration written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = setup_logging(cli.verbose, cli.quiet) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<CliError>() {
            Some(cli_error) => print_error_and_exit(cli_error),
            None => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}
