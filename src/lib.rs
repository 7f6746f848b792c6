//! Gantry: governance for packetized agent work.
//!
//! A project is split into work areas, each holding work packets joined by
//! prerequisite edges. Agents claim packets, record progress, and finish
//! them; every request passes a supervisor gate and a state-machine check
//! before anything is written.
//!
//! # Architecture
//!
//! ## The Thin Waist
//!
//! All state mutations route through [`core::broker::StateBroker`] for:
//! - Serialization (in-process mutex plus a cross-process lock file)
//! - Load → validate → mutate → atomic save as one transaction
//! - A `tracing` event per transaction
//!
//! ## Layout
//!
//! - [`core`]: state model, store, migration, broker, engine, config
//! - [`plugins`]: dependency graph analysis, supervisor policy, audit trail
//!
//! # Examples
//!
//! ```bash
//! gantry init --definition wbs.json
//! gantry ready
//! gantry claim WP-1 --agent codex
//! gantry done WP-1 --agent codex --notes "implemented parser"
//! gantry status --format json
//! ```

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{
    AuditCommand, AuditFilter, Cli, Command, ExportFormat, GraphCommand, OutputFormat,
};
use crate::core::config::{GantryConfig, load_config};
use crate::core::definition::Definition;
use crate::core::engine::{EngineOptions, GovernanceEngine, TransitionOutcome};
use crate::core::error::GantryError;
use crate::core::output;
use crate::core::state::{AuditEvent, LogIntegrityMode};
use crate::core::store::JsonFileStore;
use crate::core::time::command_envelope;
use crate::plugins::audit::{self, AuditQuery};
use crate::plugins::policy::DeterministicSupervisor;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the `tracing` filter directive.
pub const LOG_ENV: &str = "GANTRY_LOG";

/// How a command finished when no fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// The engine refused the request; nothing was written.
    Rejected,
}

pub type ProjectEngine = GovernanceEngine<JsonFileStore>;

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV)
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Build the engine for a project root from its config and definition.
pub fn open_project(root: &Path, config: &GantryConfig) -> Result<ProjectEngine, GantryError> {
    let definition = Definition::load(&config.definition_path(root))?;
    let store = JsonFileStore::new(config.state_path(root))
        .with_lock(config.store.lock)
        .with_default_mode(config.audit.default_mode);
    Ok(GovernanceEngine::new(definition, store)
        .with_supervisor(DeterministicSupervisor::new(config.supervisor))
        .with_options(EngineOptions {
            verify_assessment: config.closeout.verify_assessment,
        }))
}

/// Validate `source` and install it as the project's definition file.
fn install_definition(source: &Path, target: &Path) -> Result<(), GantryError> {
    let definition = Definition::load(source)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, serde_json::to_string_pretty(&definition)? + "\n")?;
    tracing::info!(
        source = %source.display(),
        target = %target.display(),
        packets = definition.packets.len(),
        "installed definition"
    );
    Ok(())
}

struct Printer {
    format: OutputFormat,
    cmd: &'static str,
}

impl Printer {
    fn json(&self, status: &str, extra: serde_json::Value) -> Result<(), GantryError> {
        let envelope = command_envelope(self.cmd, status, extra);
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        Ok(())
    }

    fn outcome(&self, outcome: &TransitionOutcome) -> Result<RunStatus, GantryError> {
        match self.format {
            OutputFormat::Json => {
                let status = if outcome.success { "ok" } else { "rejected" };
                self.json(status, json!({ "outcome": outcome }))?;
            }
            OutputFormat::Text => println!("{}", output::outcome_line(outcome)),
        }
        Ok(if outcome.success {
            RunStatus::Success
        } else {
            RunStatus::Rejected
        })
    }

    /// JSON envelope or caller-rendered text for a read-only result.
    fn view<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        text: impl FnOnce(&T),
    ) -> Result<RunStatus, GantryError> {
        match self.format {
            OutputFormat::Json => {
                let mut extra = serde_json::Map::new();
                extra.insert(key.to_string(), serde_json::to_value(value)?);
                self.json("ok", serde_json::Value::Object(extra))?;
            }
            OutputFormat::Text => text(value),
        }
        Ok(RunStatus::Success)
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Init { .. } => "init",
        Command::Claim { .. } => "claim",
        Command::Done { .. } => "done",
        Command::Note { .. } => "note",
        Command::Fail { .. } => "fail",
        Command::Reset { .. } => "reset",
        Command::Ready => "ready",
        Command::Status => "status",
        Command::Show { .. } => "show",
        Command::Log { .. } => "log",
        Command::LogMode { .. } => "log-mode",
        Command::VerifyLog => "verify-log",
        Command::Audit(_) => "audit",
        Command::Graph(_) => "graph",
        Command::Closeout { .. } => "closeout",
        Command::Version => "version",
    }
}

fn build_query(filter: &AuditFilter) -> Result<AuditQuery, GantryError> {
    let mut query = AuditQuery::new();
    if let Some(packet) = &filter.packet {
        query = query.packet(packet);
    }
    if let Some(agent) = &filter.agent {
        query = query.agent(agent);
    }
    if let Some(event) = &filter.event {
        let event: AuditEvent = event.parse()?;
        query = query.event(event);
    }
    if let Some(since) = &filter.since {
        query = query.since(since)?;
    }
    if let Some(until) = &filter.until {
        query = query.until(until)?;
    }
    Ok(query)
}

pub fn run() -> Result<RunStatus, GantryError> {
    let cli = Cli::parse();
    init_logging();

    let printer = Printer {
        format: cli.format,
        cmd: command_name(&cli.command),
    };

    if let Command::Version = cli.command {
        return printer.view("version", &env!("CARGO_PKG_VERSION"), |v| {
            println!("v{}", v)
        });
    }

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = load_config(&root)?;

    if let Command::Init {
        definition: Some(source),
    } = &cli.command
    {
        install_definition(source, &config.definition_path(&root))?;
    }
    let engine = open_project(&root, &config)?;
    let agent_of = |a: &Option<String>| a.clone().unwrap_or_default();

    match cli.command {
        Command::Version => Ok(RunStatus::Success),
        Command::Init { .. } => {
            let seeded = engine.init()?;
            let total = engine.definition().packets.len();
            printer.view("seeded", &seeded, |n| {
                println!(
                    "{} Initialized {} ({} new, {} total)",
                    "✓".bright_green(),
                    engine.store().path().display(),
                    n,
                    total
                )
            })
        }
        Command::Claim {
            ref packet_id,
            agent: ref a,
        } => printer.outcome(&engine.claim(packet_id, &agent_of(a))?),
        Command::Done {
            ref packet_id,
            agent: ref a,
            ref notes,
        } => printer.outcome(&engine.done(packet_id, &agent_of(a), notes)?),
        Command::Note {
            ref packet_id,
            agent: ref a,
            ref notes,
        } => printer.outcome(&engine.note(packet_id, &agent_of(a), notes)?),
        Command::Fail {
            ref packet_id,
            agent: ref a,
            ref reason,
        } => printer.outcome(&engine.fail(packet_id, &agent_of(a), reason)?),
        Command::Reset { ref packet_id } => printer.outcome(&engine.reset(packet_id)?),
        Command::Closeout {
            ref area_id,
            agent: ref a,
            ref assessment,
            ref notes,
        } => printer.outcome(&engine.closeout_l2(area_id, &agent_of(a), assessment, notes)?),
        Command::LogMode { ref mode } => {
            let mode: LogIntegrityMode = mode.parse()?;
            printer.outcome(&engine.set_log_mode(mode)?)
        }
        Command::Ready => {
            let ready = engine.ready()?;
            printer.view("ready", &ready, |packets| {
                if packets.is_empty() {
                    println!("No packets ready.");
                }
                for p in packets {
                    println!(
                        "  {:<14} {:<8} {}",
                        p.id.bright_white(),
                        p.wbs_ref,
                        output::compact_line(&p.title, 60)
                    );
                }
            })
        }
        Command::Status => {
            let report = engine.status()?;
            printer.view("status", &report, |r| {
                for area in &r.areas {
                    let closed = if area.closeout.is_some() {
                        " [closed]".bright_green().to_string()
                    } else {
                        String::new()
                    };
                    println!("{} {}{}", area.id.bold(), area.title, closed);
                    for view in &area.packets {
                        println!("{}", output::packet_line(view));
                    }
                }
                let counts = r
                    .counts
                    .iter()
                    .map(|(s, n)| format!("{}={}", s, n))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!();
                println!(
                    "{} | log: {} ({} events)",
                    counts, r.log_integrity_mode, r.events
                );
            })
        }
        Command::Show { ref packet_id } => match engine.packet(packet_id)? {
            Some(view) => printer.view("packet", &view, |v| {
                println!("{}", output::packet_line(v));
                if !v.dependencies.is_empty() {
                    println!("  depends on: {}", v.dependencies.join(", "));
                }
                if let Some(notes) = &v.notes {
                    println!("  notes: {}", output::compact_line(notes, 120));
                }
            }),
            None => Err(GantryError::NotFound(format!("packet {}", packet_id))),
        },
        Command::Log { limit } => {
            let entries = engine.log(limit)?;
            printer.view("entries", &entries, |es| {
                for e in es {
                    println!("{}", output::entry_line(e));
                }
            })
        }
        Command::VerifyLog => {
            let report = engine.verify_log()?;
            let status = if report.valid {
                RunStatus::Success
            } else {
                RunStatus::Rejected
            };
            printer.view("verification", &report, |r| {
                if r.valid {
                    println!(
                        "{} log verified ({} events, {} hashed, mode {})",
                        "✓".bright_green(),
                        r.events,
                        r.hashed_events,
                        r.mode
                    );
                } else {
                    println!(
                        "{} log verification failed: {}",
                        "✗".bright_red(),
                        output::preview_messages(&r.issues, 5, 120)
                    );
                }
            })?;
            Ok(status)
        }
        Command::Audit(audit_cli) => match audit_cli.command {
            AuditCommand::Query {
                filter,
                page,
                page_size,
            } => {
                let matched = engine.query_log(&build_query(&filter)?)?;
                let shown = audit::paginate(&matched, page.saturating_sub(1), page_size);
                printer.view("entries", &shown, |es| {
                    for e in es {
                        println!("{}", output::entry_line(e));
                    }
                    println!("({} of {} matching)", es.len(), matched.len());
                })
            }
            AuditCommand::Export { filter, to, output } => {
                let matched = engine.query_log(&build_query(&filter)?)?;
                let refs: Vec<_> = matched.iter().collect();
                let body = match to {
                    ExportFormat::Json => audit::export_json(&refs)?,
                    ExportFormat::Csv => audit::export_csv(&refs),
                };
                match output {
                    Some(path) => {
                        fs::write(&path, &body)?;
                        printer.view("exported", &matched.len(), |n| {
                            println!("Exported {} entries to {}", n, path.display())
                        })
                    }
                    None => {
                        print!("{}", body);
                        Ok(RunStatus::Success)
                    }
                }
            }
            AuditCommand::Provenance { packet_id } => {
                let entries = engine.provenance(&packet_id)?;
                printer.view("entries", &entries, |es| {
                    for e in es {
                        println!("{}", output::entry_line(e));
                    }
                })
            }
        },
        Command::Graph(graph_cli) => match graph_cli.command {
            GraphCommand::Upstream { packet_id } => {
                let nodes = engine.upstream(&packet_id)?;
                printer.view("upstream", &nodes, |n| println!("{}", n.join(" ")))
            }
            GraphCommand::Downstream { packet_id } => {
                let nodes = engine.downstream(&packet_id)?;
                printer.view("downstream", &nodes, |n| {
                    println!("{}", n.iter().cloned().collect::<Vec<_>>().join(" "))
                })
            }
            GraphCommand::Impact { packet_id } => {
                let nodes = engine.impact(&packet_id)?;
                printer.view("impact", &nodes, |n| {
                    println!("{}", n.iter().cloned().collect::<Vec<_>>().join(" "))
                })
            }
            GraphCommand::CriticalPath => {
                let path = engine.critical_path()?;
                printer.view("critical_path", &path, |p| println!("{}", p.join(" -> ")))
            }
        },
    }
}
