mod commands;
mod reader;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "schemaid",
    version,
    about = "schemaid: keep stable id:uid identifiers for an object database schema"
)]
struct Cli {
    /// Log every merge decision (same as RUST_LOG=schemaid=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile candidate schema files with the model file
    Reconcile {
        /// Input path: a file, a directory, a glob or `dir/...` (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Model file (defaults to schemaid-model.json next to the sources)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Seed for reproducible uids
        #[arg(long)]
        seed: Option<u64>,

        /// Reconcile but don't write the model file
        #[arg(long)]
        dry_run: bool,

        /// Keep entities the given sources don't declare
        #[arg(long)]
        partial: bool,

        /// Output format: human (default) or json
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Check a model file against the identifier invariants
    Check {
        /// Model file
        #[arg(default_value = schemaid_core::MODEL_FILE_NAME)]
        model: PathBuf,

        /// Output format: human (default) or json
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// List the entities, properties and identifiers of a model file
    Inspect {
        /// Model file
        #[arg(default_value = schemaid_core::MODEL_FILE_NAME)]
        model: PathBuf,

        /// Output format: human (default) or json
        #[arg(long, default_value = "human")]
        format: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "schemaid=debug"
    } else {
        "schemaid=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Reconcile {
            path,
            model,
            seed,
            dry_run,
            partial,
            format,
        } => {
            let args = commands::reconcile::ReconcileArgs {
                path,
                model,
                seed,
                dry_run,
                partial,
            };
            match commands::reconcile::run_reconcile(&args, &format) {
                Ok(output) => {
                    println!("{output}");
                }
                Err(e) => {
                    eprintln!("Error: {e:#}");
                    process::exit(1);
                }
            }
        }
        Commands::Check { model, format } => match commands::check::run_check(&model, &format) {
            Ok((output, violation_count)) => {
                println!("{output}");
                if violation_count > 0 {
                    process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        },
        Commands::Inspect { model, format } => {
            match commands::inspect::run_inspect(&model, &format) {
                Ok(output) => {
                    println!("{output}");
                }
                Err(e) => {
                    eprintln!("Error: {e:#}");
                    process::exit(1);
                }
            }
        }
    }
}
