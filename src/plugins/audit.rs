//! Audit trail: integrity chain, filtered queries, and export.
//!
//! Read access treats plain and hash-chained logs the same way; the chain
//! fields are simply absent on plain entries.

use crate::core::error::GantryError;
use crate::core::state::{AuditEntry, AuditEvent, LogIntegrityMode};
use crate::core::time::{new_event_id, parse_ts};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over the entry's core fields and its chain position.
pub fn entry_hash(entry: &AuditEntry) -> String {
    let canonical = serde_json::json!({
        "packet_id": entry.packet_id,
        "event": entry.event.as_str(),
        "agent": entry.agent,
        "timestamp": entry.timestamp,
        "notes": entry.notes,
        "event_id": entry.event_id,
        "hash_index": entry.hash_index,
        "prev_hash": entry.prev_hash,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Attach chain fields so the entry extends `log` in `mode`.
pub fn seal_entry(log: &[AuditEntry], mut entry: AuditEntry, mode: LogIntegrityMode) -> AuditEntry {
    if mode == LogIntegrityMode::Plain {
        return entry;
    }
    let hashed: Vec<&AuditEntry> = log.iter().filter(|e| e.hash.is_some()).collect();
    let prev_hash = hashed
        .last()
        .and_then(|e| e.hash.clone())
        .unwrap_or_default();
    entry.event_id = Some(new_event_id());
    entry.hash_index = Some(hashed.len() as u64 + 1);
    entry.prev_hash = Some(prev_hash);
    entry.hash = Some(entry_hash(&entry));
    entry
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogVerification {
    pub valid: bool,
    pub mode: LogIntegrityMode,
    pub events: usize,
    pub hashed_events: usize,
    pub issues: Vec<String>,
}

/// Recompute every hashed entry and check the links between them.
pub fn verify_log(entries: &[AuditEntry], mode: LogIntegrityMode) -> LogVerification {
    let mut issues = Vec::new();
    let mut prev = String::new();
    let mut expected_index = 1u64;
    let mut hashed_events = 0usize;

    for (pos, entry) in entries.iter().enumerate() {
        let Some(stored) = entry.hash.as_deref() else {
            if hashed_events > 0 && mode == LogIntegrityMode::HashChain {
                issues.push(format!("entry {}: unhashed entry after chain start", pos));
            }
            continue;
        };
        hashed_events += 1;
        if entry.hash_index != Some(expected_index) {
            issues.push(format!(
                "entry {}: hash_index gap (expected {}, found {:?})",
                pos, expected_index, entry.hash_index
            ));
        }
        if entry.prev_hash.as_deref().unwrap_or("") != prev {
            issues.push(format!("entry {}: prev_hash mismatch", pos));
        }
        if entry_hash(entry) != stored {
            issues.push(format!("entry {}: hash mismatch", pos));
        }
        prev = stored.to_string();
        expected_index = entry.hash_index.unwrap_or(expected_index) + 1;
    }

    LogVerification {
        valid: issues.is_empty(),
        mode,
        events: entries.len(),
        hashed_events,
        issues,
    }
}

/// `current` must keep every entry of `previous`, unchanged and in order.
pub fn validate_append_only(previous: &[AuditEntry], current: &[AuditEntry]) -> Result<(), String> {
    if current.len() < previous.len() {
        return Err("Audit log shrank; append-only invariant violated".to_string());
    }
    match previous.iter().zip(current).position(|(a, b)| a != b) {
        Some(idx) => Err(format!(
            "Audit log mutated at index {}; append-only invariant violated",
            idx
        )),
        None => Ok(()),
    }
}

/// Ordered lifecycle events for one packet (or `AREA-<id>` scope).
pub fn provenance_chain<'a>(entries: &'a [AuditEntry], packet_id: &str) -> Vec<&'a AuditEntry> {
    entries.iter().filter(|e| e.packet_id == packet_id).collect()
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub packet_id: Option<String>,
    pub agent: Option<String>,
    pub event: Option<AuditEvent>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet(mut self, packet_id: &str) -> Self {
        self.packet_id = Some(packet_id.to_string());
        self
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn event(mut self, event: AuditEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Inclusive lower bound; accepts RFC 3339 or `YYYY-MM-DD`.
    pub fn since(mut self, raw: &str) -> Result<Self, GantryError> {
        self.since = Some(parse_bound(raw)?);
        Ok(self)
    }

    /// Inclusive upper bound; accepts RFC 3339 or `YYYY-MM-DD`.
    pub fn until(mut self, raw: &str) -> Result<Self, GantryError> {
        self.until = Some(parse_bound(raw)?);
        Ok(self)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.packet_id.as_deref().is_some_and(|p| p != entry.packet_id) {
            return false;
        }
        if self
            .agent
            .as_deref()
            .is_some_and(|a| entry.agent.as_deref() != Some(a))
        {
            return false;
        }
        if self.event.is_some_and(|ev| ev != entry.event) {
            return false;
        }
        if self.since.is_some() || self.until.is_some() {
            let Some(ts) = parse_ts(&entry.timestamp) else {
                return false;
            };
            if self.since.is_some_and(|s| ts < s) || self.until.is_some_and(|u| ts > u) {
                return false;
            }
        }
        true
    }

    pub fn run<'a>(&self, entries: &'a [AuditEntry]) -> Vec<&'a AuditEntry> {
        entries.iter().filter(|e| self.matches(e)).collect()
    }
}

fn parse_bound(raw: &str) -> Result<DateTime<Utc>, GantryError> {
    parse_ts(raw).ok_or_else(|| {
        GantryError::ValidationError(format!(
            "invalid date '{}': expected RFC 3339 or YYYY-MM-DD",
            raw
        ))
    })
}

/// Zero-based page of `page_size` entries.
pub fn paginate<T: Clone>(entries: &[T], page: usize, page_size: usize) -> Vec<T> {
    let start = page.saturating_mul(page_size);
    entries.iter().skip(start).take(page_size).cloned().collect()
}

pub fn export_json(entries: &[&AuditEntry]) -> Result<String, GantryError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

pub const CSV_HEADER: &str = "timestamp,packet_id,event,agent,notes,event_id,hash";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Flat tabular export with RFC 4180 quoting.
pub fn export_csv(entries: &[&AuditEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for e in entries {
        let row = [
            e.timestamp.as_str(),
            e.packet_id.as_str(),
            e.event.as_str(),
            e.agent.as_deref().unwrap_or(""),
            e.notes.as_deref().unwrap_or(""),
            e.event_id.as_deref().unwrap_or(""),
            e.hash.as_deref().unwrap_or(""),
        ]
        .map(csv_field);
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}
