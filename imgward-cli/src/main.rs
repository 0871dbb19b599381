//! Imgward CLI - known-bad image matching for moderators.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use imgward_core::{Label, ScopeRef};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;
use utils::Output;

const EXIT_CODES_HELP: &str = "Exit codes:
  0   Success, no action warranted
  1   General error
  64  Usage or configuration error
  65  Match found (an action was decided)
  66  Input file or directory unreadable
  69  Reconciliation corpus unavailable
  74  Store or whitelist I/O error";

#[derive(Parser)]
#[command(name = "imgward")]
#[command(author, version, about = "Known-bad image fingerprint matching", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// JSON configuration file (defaults, then file, then IMGWARD_* env)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Suppress human-readable output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision pipeline over files as one event
    Scan {
        /// Image files (attachments of the event)
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Channel the event was posted in
        #[arg(long, value_name = "ID", conflicts_with = "thread")]
        channel: Option<String>,

        /// Thread the event was posted in
        #[arg(long, value_name = "ID")]
        thread: Option<String>,
    },

    /// Fingerprint files and add them to the store
    Ingest {
        /// Image files to learn
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Operator label for every file
        #[arg(long, value_enum)]
        label: LabelArg,

        /// Where the files were found (defaults to the file name)
        #[arg(long, value_name = "REF")]
        provenance: Option<String>,
    },

    /// Manage the content whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },

    /// Whitelist enforced images that match no known-bad reference
    Reconcile {
        /// Directory of images that were acted on
        #[arg(long, value_name = "DIR")]
        observed: PathBuf,

        /// Directory of known-bad images (defaults to the store's phish records)
        #[arg(long, value_name = "DIR")]
        reference: Option<PathBuf>,

        /// Keep running, one cycle per reconcile.intervalSecs, until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Inspect and maintain the fingerprint store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// Whitelist files by content and perceptual hash
    Add {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// List whitelist entries
    List,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Record counts by label
    Stats,
    /// Write a snapshot of every record
    Export {
        /// Output file (`.cbor` for CBOR); stdout when omitted
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Merge records that share a content hash
    Compact,
}

#[derive(Clone, Copy, ValueEnum)]
enum LabelArg {
    Phish,
    Benign,
    Unlabeled,
}

impl From<LabelArg> for Label {
    fn from(arg: LabelArg) -> Self {
        match arg {
            LabelArg::Phish => Label::Phish,
            LabelArg::Benign => Label::Benign,
            LabelArg::Unlabeled => Label::Unlabeled,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "imgward_core=info,imgward=info,warn",
        _ => "imgward_core=debug,imgward=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };
    let config = utils::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            files,
            channel,
            thread,
        } => {
            let scope = match (channel, thread) {
                (_, Some(thread)) => ScopeRef::thread(thread),
                (Some(channel), None) => ScopeRef::channel(channel),
                (None, None) => ScopeRef::channel("cli"),
            };
            commands::scan::execute(&config, files, scope, out).await
        }
        Commands::Ingest {
            files,
            label,
            provenance,
        } => commands::ingest::execute(&config, files, label.into(), provenance, out),
        Commands::Whitelist { action } => match action {
            WhitelistAction::Add { files } => commands::whitelist::add(&config, files, out),
            WhitelistAction::List => commands::whitelist::list(&config, out),
        },
        Commands::Reconcile {
            observed,
            reference,
            watch,
        } => commands::reconcile::execute(&config, observed, reference, watch, out).await,
        Commands::Store { action } => match action {
            StoreAction::Stats => commands::store::stats(&config, out),
            StoreAction::Export { out: path } => commands::store::export(&config, path, out),
            StoreAction::Compact => commands::store::compact(&config, out),
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version come through here too.
            let code = if err.use_stderr() {
                exit_codes::USAGE_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let exit = ExitCode::from_anyhow(&err);
            if let Some(message) = exit.message {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            exit.code
        }
    };
    std::process::exit(code);
}
