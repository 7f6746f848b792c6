//! Schema evolution for the governance state document.
//!
//! Migrations are pure `old_shape -> new_shape` transforms over raw JSON,
//! keyed by the version they upgrade from and applied in order until the
//! document reaches [`STATE_VERSION`]. Each step backfills missing fields
//! with safe defaults and is idempotent.
//!
//! Documents newer than this build are rejected, never interpreted.

use crate::core::error::GantryError;
use crate::core::state::STATE_VERSION;
use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;

/// Version assigned to documents written before versioning existed.
pub const LEGACY_VERSION: &str = "0.0";

/// Migration definition
pub struct Migration {
    /// Version the document must be at for this step to apply
    pub from_version: &'static str,
    /// Version the document is at afterwards
    pub to_version: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Pure transform; `now` backfills missing timestamps
    pub up: fn(JsonValue, &str) -> Result<JsonValue, GantryError>,
}

/// All migrations in chronological order
pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        from_version: LEGACY_VERSION,
        to_version: "1.0",
        description: "Backfill versioned shape, normalise legacy statuses and log events",
        up: migrate_legacy_to_1_0,
    }]
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse_version =
        |v: &str| -> Vec<u32> { v.split('.').filter_map(|s| s.parse::<u32>().ok()).collect() };

    let a_parts = parse_version(a);
    let b_parts = parse_version(b);

    for (a_part, b_part) in a_parts.iter().zip(b_parts.iter()) {
        match a_part.cmp(b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a_parts.len().cmp(&b_parts.len())
}

fn document_version(doc: &JsonValue) -> Result<String, GantryError> {
    match doc.get("version") {
        None | Some(JsonValue::Null) => Ok(LEGACY_VERSION.to_string()),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(LEGACY_VERSION.to_string()),
        Some(JsonValue::String(s)) => Ok(s.trim().to_string()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(GantryError::MigrationError(format!(
            "version field must be a string, found {}",
            other
        ))),
    }
}

/// Bring a raw document up to [`STATE_VERSION`].
pub fn migrate_document(mut doc: JsonValue, now: &str) -> Result<JsonValue, GantryError> {
    if !doc.is_object() {
        return Err(GantryError::MigrationError(
            "state document must be a JSON object".to_string(),
        ));
    }
    let mut version = document_version(&doc)?;

    if compare_versions(&version, STATE_VERSION) == Ordering::Greater {
        return Err(GantryError::ForwardIncompatibleVersion {
            found: version,
            supported: STATE_VERSION.to_string(),
        });
    }

    let migrations = all_migrations();
    while version != STATE_VERSION {
        let step = migrations
            .iter()
            .find(|m| m.from_version == version)
            .ok_or_else(|| {
                GantryError::MigrationError(format!(
                    "no migration path from version {} to {}",
                    version, STATE_VERSION
                ))
            })?;
        tracing::debug!(
            from = step.from_version,
            to = step.to_version,
            "{}",
            step.description
        );
        doc = (step.up)(doc, now)?;
        version = step.to_version.to_string();
    }

    // Current-version documents still get missing fields backfilled.
    backfill_current(&mut doc, now)?;
    Ok(doc)
}

fn as_object_mut(doc: &mut JsonValue) -> Result<&mut Map<String, JsonValue>, GantryError> {
    doc.as_object_mut().ok_or_else(|| {
        GantryError::MigrationError("state document must be a JSON object".to_string())
    })
}

fn backfill_current(doc: &mut JsonValue, now: &str) -> Result<(), GantryError> {
    let obj = as_object_mut(doc)?;
    obj.insert("version".into(), json!(STATE_VERSION));
    let created = obj
        .get("created_at")
        .filter(|v| v.is_string())
        .cloned()
        .unwrap_or_else(|| json!(now));
    obj.insert("created_at".into(), created.clone());
    if !obj.get("updated_at").is_some_and(JsonValue::is_string) {
        obj.insert("updated_at".into(), created);
    }
    for (key, default) in [
        ("packets", json!({})),
        ("log", json!([])),
        ("area_closeouts", json!({})),
        ("log_integrity_mode", json!("plain")),
    ] {
        match obj.get(key) {
            None | Some(JsonValue::Null) => {
                obj.insert(key.into(), default);
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn legacy_status(raw: Option<&JsonValue>) -> &'static str {
    match raw.and_then(JsonValue::as_str).map(str::to_ascii_lowercase).as_deref() {
        Some("in_progress") | Some("in-progress") | Some("started") | Some("claimed") => {
            "in_progress"
        }
        Some("done") | Some("completed") | Some("complete") => "done",
        Some("failed") | Some("fail") => "failed",
        // `blocked` used to be stored; it is a derived view now.
        _ => "pending",
    }
}

fn legacy_event(raw: &str) -> &'static str {
    match raw {
        "claim" | "started" | "claimed" => "claim",
        "done" | "completed" => "done",
        "fail" | "failed" => "fail",
        "reset" => "reset",
        "closeout" | "area_closed" => "closeout",
        _ => "note",
    }
}

fn migrate_legacy_to_1_0(mut doc: JsonValue, now: &str) -> Result<JsonValue, GantryError> {
    backfill_current(&mut doc, now)?;
    let obj = as_object_mut(&mut doc)?;

    if let Some(packets) = obj.get_mut("packets").and_then(JsonValue::as_object_mut) {
        for packet in packets.values_mut() {
            let Some(p) = packet.as_object_mut() else {
                continue;
            };
            let status = legacy_status(p.get("status"));
            p.insert("status".into(), json!(status));
            for key in ["assigned_to", "started_at", "completed_at", "notes"] {
                p.entry(key).or_insert(JsonValue::Null);
            }
            p.entry("area_id").or_insert_with(|| json!(""));
            p.entry("dependencies").or_insert_with(|| json!([]));
        }
    }

    if let Some(log) = obj.get_mut("log").and_then(JsonValue::as_array_mut) {
        for entry in log.iter_mut() {
            let Some(e) = entry.as_object_mut() else {
                continue;
            };
            let raw_event = e
                .get("event")
                .and_then(JsonValue::as_str)
                .unwrap_or("note")
                .to_string();
            let event = legacy_event(&raw_event);
            if event == "note" && raw_event != "note" && raw_event != "noted" {
                e.insert("legacy_event".into(), json!(raw_event));
            }
            e.insert("event".into(), json!(event));
            e.entry("packet_id").or_insert_with(|| json!(""));
            e.entry("agent").or_insert(JsonValue::Null);
            e.entry("notes").or_insert(JsonValue::Null);
            e.entry("timestamp").or_insert_with(|| json!(now));
        }
    }

    obj.insert("version".into(), json!("1.0"));
    Ok(doc)
}
