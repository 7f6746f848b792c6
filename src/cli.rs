//! CLI struct definitions for the Gantry command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "gantry",
    version = env!("CARGO_PKG_VERSION"),
    about = "Gantry governs packetized agent work: dependency-gated claims, supervisor approval, and an auditable state document.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Project root holding `.gantry/` (defaults to current working directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum ExportFormat {
    Json,
    Csv,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Seed packet state from the work breakdown definition
    Init {
        /// Definition to install as `.gantry/definition.json` before seeding.
        #[clap(long)]
        definition: Option<PathBuf>,
    },
    /// Claim a ready packet
    Claim {
        packet_id: String,
        #[clap(long)]
        agent: Option<String>,
    },
    /// Mark an in-progress packet done
    Done {
        packet_id: String,
        #[clap(long)]
        agent: Option<String>,
        #[clap(long, default_value = "")]
        notes: String,
    },
    /// Attach notes to a packet without changing its status
    Note {
        packet_id: String,
        #[clap(long)]
        agent: Option<String>,
        #[clap(long)]
        notes: String,
    },
    /// Mark an in-progress packet failed
    Fail {
        packet_id: String,
        #[clap(long)]
        agent: Option<String>,
        #[clap(long, default_value = "")]
        reason: String,
    },
    /// Return an in-progress packet to pending
    Reset { packet_id: String },
    /// List packets that can be claimed now
    Ready,
    /// Summarise packet status per work area
    Status,
    /// Show one packet
    Show { packet_id: String },
    /// Show the most recent audit entries
    Log {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// Set the audit log integrity mode: 'plain' or 'hash-chain'
    LogMode { mode: String },
    /// Verify audit log integrity
    VerifyLog,
    /// Query and export the audit trail
    Audit(AuditCli),
    /// Dependency graph queries
    Graph(GraphCli),
    /// Close out a level-2 work area
    Closeout {
        area_id: String,
        #[clap(long)]
        agent: Option<String>,
        /// Path to the drift assessment document.
        #[clap(long)]
        assessment: String,
        #[clap(long, default_value = "")]
        notes: String,
    },
    /// Print version
    Version,
}

#[derive(clap::Args, Debug, Default)]
pub(crate) struct AuditFilter {
    #[clap(long)]
    pub packet: Option<String>,
    #[clap(long)]
    pub agent: Option<String>,
    #[clap(long)]
    pub event: Option<String>,
    /// Inclusive lower bound (RFC 3339 or YYYY-MM-DD).
    #[clap(long)]
    pub since: Option<String>,
    /// Inclusive upper bound (RFC 3339 or YYYY-MM-DD).
    #[clap(long)]
    pub until: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AuditCli {
    #[clap(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AuditCommand {
    /// Filter audit entries
    Query {
        #[clap(flatten)]
        filter: AuditFilter,
        /// 1-based page number.
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = 50)]
        page_size: usize,
    },
    /// Export filtered audit entries
    Export {
        #[clap(flatten)]
        filter: AuditFilter,
        #[clap(long = "to", value_enum, default_value_t = ExportFormat::Json)]
        to: ExportFormat,
        /// Write to a file instead of stdout.
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Every entry recorded for one packet, in order
    Provenance { packet_id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct GraphCli {
    #[clap(subcommand)]
    pub command: GraphCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum GraphCommand {
    /// Transitive prerequisites, nearest first
    Upstream { packet_id: String },
    /// Transitive dependents
    Downstream { packet_id: String },
    /// Packets affected if this one fails
    Impact { packet_id: String },
    /// Longest dependency chain
    CriticalPath,
}
