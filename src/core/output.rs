//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps command result output bounded and readable while preserving signal.

use crate::core::engine::{PacketView, TransitionOutcome};
use crate::core::state::{AuditEntry, DerivedStatus};
use colored::{ColoredString, Colorize};

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

pub fn status_badge(status: DerivedStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        DerivedStatus::Pending => label.bright_white(),
        DerivedStatus::Blocked => label.bright_yellow(),
        DerivedStatus::InProgress => label.bright_cyan(),
        DerivedStatus::Done => label.bright_green(),
        DerivedStatus::Failed => label.bright_red(),
    }
}

pub fn outcome_line(outcome: &TransitionOutcome) -> String {
    if outcome.success {
        format!("{} {}", "✓".bright_green(), outcome.message)
    } else {
        format!("{} {}", "✗".bright_red(), outcome.message)
    }
}

pub fn packet_line(view: &PacketView) -> String {
    let owner = view
        .assigned_to
        .as_deref()
        .map(|a| format!(" @{}", a))
        .unwrap_or_default();
    format!(
        "  {:<14} {:<12} {}{}",
        view.id,
        status_badge(view.status),
        compact_line(&view.title, 60),
        owner.dimmed()
    )
}

pub fn entry_line(entry: &AuditEntry) -> String {
    let notes = entry
        .notes
        .as_deref()
        .map(|n| compact_line(n, 80))
        .unwrap_or_default();
    format!(
        "{} {:<10} {:<8} {:<12} {}",
        entry.timestamp.dimmed(),
        entry.packet_id,
        entry.event.as_str(),
        entry.agent.as_deref().unwrap_or("-"),
        notes
    )
}
