//! Thin CLI wrapper over `concord-api`: every subcommand's semantics
//! derive entirely from the dispatcher/query contracts it calls.
//!
//! Exit codes: 0 ok, 1 user error, 2 cluster error.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use concord_api::Node;
use concord_core::{Config, Error};
use concord_engine::PredicateRegistry;
use concord_index::{ExtractorRegistry, IndexDescriptor};

#[derive(Parser)]
#[command(name = "concord", about = "Embedded replicated key-value store")]
struct Cli {
    /// Logical cluster name for this node.
    #[arg(long, default_value = "concord")]
    cluster_name: String,

    /// Data directory used for local snapshot operations.
    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print point-in-time node statistics.
    Status,
    /// List cluster membership as seen by this node.
    Members,
    /// Manage secondary indexes.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Snapshot backup operations.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Generate a TLS certificate for inter-node transport.
    GenCert,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Register a new secondary index.
    Create {
        name: String,
        extractor_id: String,
        #[arg(long, default_value_t = true)]
        reindex: bool,
    },
    /// Remove a secondary index.
    Drop { name: String },
    /// Rebuild a secondary index from scratch.
    Reindex { name: String },
}

#[derive(Subcommand)]
enum BackupAction {
    Create,
    List,
    Restore,
    Verify,
    Cleanup,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Backup { .. } | Commands::GenCert) {
        eprintln!(
            "not implemented in this build: backup scheduling/retention and certificate \
             generation are operational tooling out of this core's scope"
        );
        return ExitCode::from(1);
    }

    let config = Config::new(cli.cluster_name, cli.data_dir);
    let node = match Node::start("cli", config, ExtractorRegistry::new(), PredicateRegistry::new()) {
        Ok(node) => node,
        Err(err) => {
            eprintln!("failed to start node: {err}");
            return exit_code_for(&err);
        }
    };

    match run(&node, cli.command) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("{err}");
            exit_code_for(&err)
        }
    }
}

fn run(node: &Node, command: Commands) -> concord_core::Result<()> {
    match command {
        Commands::Status => {
            let stats = node.stats();
            println!(
                "size={} memory_usage={} index_count={} last_applied_index={} last_applied_term={}",
                stats.size, stats.memory_usage, stats.index_count, stats.last_applied_index, stats.last_applied_term
            );
            Ok(())
        }
        Commands::Members => {
            for member in node.members() {
                println!("{member}");
            }
            Ok(())
        }
        Commands::Index { action } => match action {
            IndexAction::Create { name, extractor_id, reindex } => {
                let descriptor = IndexDescriptor { name, extractor_id, reindex_on_create: reindex };
                node.index_create(descriptor, reindex)
            }
            IndexAction::Drop { name } => node.index_drop(name),
            IndexAction::Reindex { name } => node.index_reindex(name),
        },
        Commands::Backup { .. } | Commands::GenCert => unreachable!("handled before node startup"),
    }
}

fn exit_code_for(err: &Error) -> ExitCode {
    if err.is_validation() || err.is_conditional() || matches!(err, Error::InvalidConfig(_)) {
        ExitCode::from(1)
    } else {
        ExitCode::from(2)
    }
}
