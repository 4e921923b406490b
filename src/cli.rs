use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "manifest-harvester",
    about = "Harvest dependency manifests into per-ecosystem frequency tables",
    version
)]
pub struct Cli {
    /// JSON-lines export of the manifest query (`{"path": ..., "content": ...}` per line)
    #[arg(long, value_name = "FILE")]
    pub rows: PathBuf,

    /// Config file [default: ./.manifest-harvester/config.toml, fallback ~/.config/manifest-harvester/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory backing the object store (overrides `store.root`)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Scratch directory for staging and unpacking batches (overrides `job.working_dir`)
    #[arg(long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Dependency sets listed per ecosystem
    #[arg(long, default_value_t = 10, value_name = "N")]
    pub top: usize,

    /// Debug logging and full batch listing
    #[arg(short, long)]
    pub verbose: bool,

    /// Only warnings in the log and a one-line summary
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}
