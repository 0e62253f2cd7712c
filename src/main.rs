mod commands;
mod config;
mod diagnostics;
mod error;
mod graph;
mod mover;
mod paths;
mod report;
mod rewrite;
mod scanner;
mod transaction;
mod types;
mod validate;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use crate::commands::MoveFlags;

/// Command-line arguments.
#[derive(Parser)]
#[command(
    name = "mdmove",
    version,
    about = "Move and join markdown files without breaking the links between them"
)]
struct Cli {
    /// Operation to run.
    #[command(subcommand)]
    command: Commands,
    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
    /// Project root to scan for documents. FILE arguments of `check`,
    /// `deps`, and `dependents` are relative to it
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Operations.
#[derive(Subcommand)]
enum Commands {
    /// Move documents, rewriting every link to and from them
    Move {
        /// Sources followed by the destination (a directory for several sources)
        #[arg(required = true, num_args = 2.., value_name = "SOURCE... DEST")]
        paths: Vec<PathBuf>,
        /// Shared move flags.
        #[command(flatten)]
        flags: MoveFlags,
    },
    /// Concatenate documents into one, redirecting links to them
    Join {
        /// Documents to join, in order
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// The new document
        #[arg(long)]
        into: PathBuf,
        /// Order sources so referenced documents come first
        #[arg(long)]
        topological: bool,
        /// Leave the sources and the links to them alone
        #[arg(long)]
        keep_sources: bool,
        /// Shared move flags.
        #[command(flatten)]
        flags: MoveFlags,
    },
    /// Report broken local links (exit 2 if any)
    Check {
        /// Documents to check, relative to the root (defaults to the whole project)
        files: Vec<PathBuf>,
    },
    /// List what a document references
    Deps {
        /// Document to inspect, relative to the root
        file: PathBuf,
        /// Follow references transitively
        #[arg(long)]
        transitive: bool,
    },
    /// List the documents that reference a file
    Dependents {
        /// File to inspect, relative to the root (any path, not only documents)
        file: PathBuf,
        /// Follow references transitively
        #[arg(long)]
        transitive: bool,
    },
    /// List reference cycles
    Cycles,
    /// Print documents so each comes before the documents it references
    Order,
}

/// Parse arguments, run one command, map errors to diagnostics.
fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let verbose = cli.verbose > 0;

    let result = match &cli.command {
        Commands::Move { paths, flags } => match paths.split_last() {
            Some((destination, sources)) => {
                commands::move_files(&cli.root, sources, destination, flags, cli.json, verbose)
            },
            None => Err(error::Error::EmptyPath),
        },
        Commands::Join { sources, into, topological, keep_sources, flags } => commands::join(
            &cli.root,
            sources,
            into,
            flags,
            *topological,
            *keep_sources,
            cli.json,
            verbose,
        ),
        Commands::Check { files } => commands::check(&cli.root, files, cli.json),
        Commands::Deps { file, transitive } => commands::deps(&cli.root, file, *transitive, cli.json),
        Commands::Dependents { file, transitive } => {
            commands::dependents(&cli.root, file, *transitive, cli.json)
        },
        Commands::Cycles => commands::cycles(&cli.root, cli.json),
        Commands::Order => commands::order(&cli.root, cli.json),
    };

    return match result {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::FAILURE
        },
    };
}

/// Install a stderr log subscriber. `RUST_LOG` directives are honoured;
/// each `-v` raises the floor one level above warnings.
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time();

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    return;
}
