use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Arbor: persistent content-addressed B+Tree store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (holds objects/, HEAD and arbor.toml)
    #[arg(long, global = true, default_value = ".arbor")]
    pub store: PathBuf,

    /// Tree version to operate on; defaults to HEAD, or the empty tree
    #[arg(long, global = true)]
    pub root: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a store and commit an empty tree
    Init(InitArgs),
    /// Insert or overwrite a key
    Put(PutArgs),
    /// Print the value stored under a key
    Get(GetArgs),
    /// Remove a key
    Delete(DeleteArgs),
    /// List entries in key order
    Scan(ScanArgs),
    /// Print the page structure of the tree
    Dump(DumpArgs),
    /// Show tree, store and cache statistics
    Stats(StatsArgs),
    /// Check the structural invariants of the tree
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing arbor.toml with defaults
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct PutArgs {
    pub key: String,
    pub value: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub key: String,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Start at the first key >= this one
    #[arg(long)]
    pub from: Option<String>,
    /// Stop after this many entries
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
    /// Fetch pages in batches of roughly this many entries
    #[arg(long)]
    pub bulk: Option<usize>,
}

#[derive(Args)]
pub struct DumpArgs {}

#[derive(Args)]
pub struct StatsArgs {}

#[derive(Args)]
pub struct VerifyArgs {}
