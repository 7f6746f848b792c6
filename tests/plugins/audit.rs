use gantry::core::state::{AuditEntry, AuditEvent, LogIntegrityMode};
use gantry::plugins::audit::{
    AuditQuery, CSV_HEADER, export_csv, export_json, paginate, provenance_chain, seal_entry,
    validate_append_only, verify_log,
};

fn entry(packet: &str, event: AuditEvent, agent: &str, ts: &str, notes: Option<&str>) -> AuditEntry {
    AuditEntry::new(packet, event, Some(agent), ts.to_string(), notes)
}

fn sample() -> Vec<AuditEntry> {
    vec![
        entry("A", AuditEvent::Claim, "alice", "2026-02-01T09:00:00.000000Z", Some("Claimed by alice")),
        entry("A", AuditEvent::Done, "alice", "2026-02-02T17:30:00.000000Z", Some("tests, docs")),
        entry("B", AuditEvent::Claim, "bob", "2026-02-03T08:15:00.000000Z", None),
        entry("B", AuditEvent::Note, "carol", "2026-02-05T12:00:00.000000Z", Some("said \"ok\"")),
    ]
}

fn chained(entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
    let mut log = Vec::new();
    for e in entries {
        let sealed = seal_entry(&log, e, LogIntegrityMode::HashChain);
        log.push(sealed);
    }
    log
}

#[test]
fn chained_log_verifies() {
    let log = chained(sample());
    let report = verify_log(&log, LogIntegrityMode::HashChain);
    assert!(report.valid, "{:?}", report.issues);
    assert_eq!(report.hashed_events, 4);
    assert_eq!(log[0].prev_hash.as_deref(), Some(""));
    assert_eq!(log[3].hash_index, Some(4));
    assert!(log.iter().all(|e| e.event_id.is_some()));
}

#[test]
fn edited_entry_is_detected() {
    let mut log = chained(sample());
    log[1].notes = Some("nothing to see".to_string());
    let report = verify_log(&log, LogIntegrityMode::HashChain);
    assert!(!report.valid);
    assert!(report.issues.iter().any(|i| i.contains("entry 1: hash mismatch")));
}

#[test]
fn removed_entry_breaks_the_chain() {
    let mut log = chained(sample());
    log.remove(1);
    let report = verify_log(&log, LogIntegrityMode::HashChain);
    assert!(!report.valid);
    assert!(report.issues.iter().any(|i| i.contains("hash_index gap")));
    assert!(report.issues.iter().any(|i| i.contains("prev_hash mismatch")));
}

#[test]
fn unsealed_entry_after_chain_start_is_flagged() {
    let mut log = chained(sample());
    log.push(entry("C", AuditEvent::Claim, "dave", "2026-02-06T00:00:00.000000Z", None));
    let report = verify_log(&log, LogIntegrityMode::HashChain);
    assert!(report.issues.iter().any(|i| i.contains("unhashed entry after chain start")));

    // Plain logs have nothing to verify.
    let plain = verify_log(&sample(), LogIntegrityMode::Plain);
    assert!(plain.valid);
    assert_eq!(plain.hashed_events, 0);
}

#[test]
fn append_only_rejects_rewrites() {
    let before = sample();
    let mut after = before.clone();
    after.push(entry("C", AuditEvent::Claim, "dave", "2026-02-06T00:00:00.000000Z", None));
    assert!(validate_append_only(&before, &after).is_ok());

    after[0].agent = Some("mallory".to_string());
    assert!(validate_append_only(&before, &after).unwrap_err().contains("index 0"));
    assert!(validate_append_only(&before, &before[..2]).unwrap_err().contains("shrank"));
}

#[test]
fn query_filters_combine() {
    let log = sample();
    let by_packet = AuditQuery::new().packet("B").run(&log);
    assert_eq!(by_packet.len(), 2);

    let by_agent = AuditQuery::new().agent("alice").event(AuditEvent::Done).run(&log);
    assert_eq!(by_agent.len(), 1);
    assert_eq!(by_agent[0].timestamp, "2026-02-02T17:30:00.000000Z");

    let window = AuditQuery::new()
        .since("2026-02-02")
        .unwrap()
        .until("2026-02-04T00:00:00Z")
        .unwrap()
        .run(&log);
    let packets: Vec<&str> = window.iter().map(|e| e.packet_id.as_str()).collect();
    assert_eq!(packets, vec!["A", "B"]);

    assert!(AuditQuery::new().since("last tuesday").is_err());
}

#[test]
fn query_reads_chained_and_plain_entries_alike() {
    let plain = sample();
    let sealed = chained(sample());
    let query = AuditQuery::new().agent("bob");
    assert_eq!(query.run(&plain).len(), query.run(&sealed).len());
    assert_eq!(provenance_chain(&sealed, "A").len(), 2);
}

#[test]
fn csv_export_quotes_fields() {
    let log = sample();
    let refs: Vec<&AuditEntry> = log.iter().collect();
    let csv = export_csv(&refs);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 5);
    assert!(lines[2].ends_with(",\"tests, docs\",,"));
    assert!(lines[4].contains("\"said \"\"ok\"\"\""));
}

#[test]
fn json_export_keeps_chain_fields() {
    let log = chained(sample());
    let refs: Vec<&AuditEntry> = log.iter().take(2).collect();
    let raw = export_json(&refs).unwrap();
    let parsed: Vec<AuditEntry> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed, log[..2].to_vec());
}

#[test]
fn pagination_is_zero_based() {
    let log = sample();
    assert_eq!(paginate(&log, 0, 3).len(), 3);
    assert_eq!(paginate(&log, 1, 3).len(), 1);
    assert!(paginate(&log, 2, 3).is_empty());
}
