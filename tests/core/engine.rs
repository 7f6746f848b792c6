use gantry::core::definition::Definition;
use gantry::core::engine::{EngineOptions, GovernanceEngine, REQUIRED_DRIFT_SECTIONS};
use gantry::core::error::{ErrorCode, GantryError};
use gantry::core::state::{AuditEvent, DerivedStatus, LogIntegrityMode, PacketStatus};
use gantry::core::store::{MemoryStore, StateStore};
use gantry::core::time::FixedClock;
use gantry::plugins::policy::{
    Action, ActionAllowList, DeterministicSupervisor, UnanimousSupervisor,
};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const NOW: &str = "2026-02-16T05:43:12.000000Z";

fn definition() -> Definition {
    Definition::from_json(
        r#"{
            "metadata": {"project_name": "demo"},
            "work_areas": [
                {"id": "1.0", "title": "Core"},
                {"id": "2.0", "title": "Docs"}
            ],
            "packets": [
                {"id": "A", "wbs_ref": "1.1", "area_id": "1.0", "title": "Schema"},
                {"id": "B", "wbs_ref": "1.2", "area_id": "1.0", "title": "Parser"},
                {"id": "C", "wbs_ref": "1.3", "area_id": "1.0", "title": "Engine"},
                {"id": "D", "wbs_ref": "1.4", "area_id": "1.0", "title": "Exporter"},
                {"id": "E", "wbs_ref": "2.1", "area_id": "2.0", "title": "Guide"}
            ],
            "dependencies": {"B": ["A"], "C": ["B"], "D": ["A"]}
        }"#,
    )
    .unwrap()
}

fn engine() -> GovernanceEngine<MemoryStore> {
    let clock = Arc::new(FixedClock::at_epoch_secs(1_771_220_592));
    let store = MemoryStore::new().with_clock(clock.clone());
    let engine = GovernanceEngine::new(definition(), store).with_clock(clock);
    engine.init().unwrap();
    engine
}

fn status_of(engine: &GovernanceEngine<MemoryStore>, id: &str) -> PacketStatus {
    engine.store().load().unwrap().packets[id].status
}

fn finish(engine: &GovernanceEngine<MemoryStore>, id: &str) {
    assert!(engine.claim(id, "agent").unwrap().success);
    assert!(engine.done(id, "agent", "evidence").unwrap().success);
}

#[test]
fn init_seeds_pending_packets_and_is_repeatable() {
    let engine = engine();
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets.len(), 5);
    assert_eq!(state.packets["C"].dependencies, vec!["B".to_string()]);
    assert_eq!(state.packets["E"].area_id, "2.0");
    assert!(state.log.is_empty());

    finish(&engine, "A");
    assert_eq!(engine.init().unwrap(), 0);
    assert_eq!(status_of(&engine, "A"), PacketStatus::Done);
}

#[test]
fn claim_requires_every_dependency_done() {
    let engine = engine();
    let out = engine.claim("B", "agent").unwrap();
    assert!(!out.success);
    assert_eq!(out.code, Some(ErrorCode::DependencyUnsatisfied));
    assert!(out.message.starts_with("E-003 DependencyUnsatisfied"));
    assert!(out.message.contains("blocked by A"));

    finish(&engine, "A");
    let out = engine.claim("B", "agent").unwrap();
    assert!(out.success, "{}", out.message);
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets["B"].assigned_to.as_deref(), Some("agent"));
    assert_eq!(state.packets["B"].started_at.as_deref(), Some(NOW));
}

#[test]
fn failed_dependency_keeps_dependents_blocked() {
    let engine = engine();
    engine.claim("A", "agent").unwrap();
    let out = engine.fail("A", "agent", "schema rejected").unwrap();
    assert!(out.success);
    assert_eq!(out.message, "A failed; blocked: B, C, D");

    let out = engine.claim("B", "agent").unwrap();
    assert_eq!(out.code, Some(ErrorCode::DependencyUnsatisfied));
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets["A"].notes.as_deref(), Some("schema rejected"));
    assert_eq!(state.log.last().unwrap().event, AuditEvent::Fail);
}

#[test]
fn claim_twice_is_invalid_transition() {
    let engine = engine();
    engine.claim("A", "agent").unwrap();
    let out = engine.claim("A", "other").unwrap();
    assert_eq!(out.code, Some(ErrorCode::InvalidTransition));
    assert!(out.message.starts_with("E-004 InvalidTransition"));
}

#[test]
fn unknown_packet_is_e001() {
    let engine = engine();
    for out in [
        engine.claim("GHOST", "agent").unwrap(),
        engine.note("GHOST", "agent", "hi").unwrap(),
        engine.reset("GHOST").unwrap(),
    ] {
        assert_eq!(out.code, Some(ErrorCode::UnknownPacket));
        assert!(out.message.starts_with("E-001 UnknownPacket"));
    }
}

#[test]
fn reset_only_from_in_progress() {
    let engine = engine();
    let out = engine.reset("A").unwrap();
    assert_eq!(out.code, Some(ErrorCode::InvalidTransition));

    engine.claim("A", "agent").unwrap();
    assert!(engine.reset("A").unwrap().success);
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets["A"].status, PacketStatus::Pending);
    assert!(state.packets["A"].assigned_to.is_none());
    assert!(state.packets["A"].started_at.is_none());
    assert_eq!(state.log.last().unwrap().event, AuditEvent::Reset);

    finish(&engine, "A");
    assert_eq!(
        engine.reset("A").unwrap().code,
        Some(ErrorCode::InvalidTransition)
    );

    engine.claim("E", "agent").unwrap();
    engine.fail("E", "agent", "abandoned").unwrap();
    assert_eq!(
        engine.reset("E").unwrap().code,
        Some(ErrorCode::InvalidTransition)
    );
}

#[test]
fn done_without_notes_is_denied_in_every_status() {
    let engine = engine();
    let check = |id: &str| {
        let out = engine.done(id, "agent", "  ").unwrap();
        assert_eq!(out.code, Some(ErrorCode::PolicyDenied));
        assert_eq!(out.message, "Supervisor denied: completion notes required");
    };
    check("A");
    engine.claim("A", "agent").unwrap();
    check("A");
    engine.done("A", "agent", "evidence").unwrap();
    check("A");
    check("GHOST");
}

#[test]
fn done_by_another_agent_is_actor_mismatch() {
    let engine = engine();
    engine.claim("A", "alice").unwrap();
    let out = engine.done("A", "bob", "evidence").unwrap();
    assert_eq!(out.code, Some(ErrorCode::ActorMismatch));
    assert!(out.message.starts_with("E-001 ActorMismatch"));
    assert_eq!(status_of(&engine, "A"), PacketStatus::InProgress);
}

#[test]
fn done_before_claim_is_invalid_transition() {
    let engine = engine();
    let out = engine.done("A", "agent", "evidence").unwrap();
    assert_eq!(out.code, Some(ErrorCode::InvalidTransition));
}

#[test]
fn note_works_in_any_status_without_changing_it() {
    let engine = engine();
    assert!(engine.note("B", "agent", "waiting on A").unwrap().success);
    assert_eq!(status_of(&engine, "B"), PacketStatus::Pending);

    finish(&engine, "A");
    assert!(engine.note("A", "reviewer", "looks good").unwrap().success);
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets["A"].status, PacketStatus::Done);
    assert_eq!(state.packets["A"].notes.as_deref(), Some("looks good"));
    assert_eq!(state.log.last().unwrap().agent.as_deref(), Some("reviewer"));
}

#[test]
fn rejected_request_leaves_document_untouched() {
    let engine = engine();
    let before = engine.store().raw().unwrap();
    engine.claim("B", "agent").unwrap();
    engine.claim("A", "").unwrap();
    engine.reset("A").unwrap();
    assert_eq!(engine.store().raw().unwrap(), before);
}

#[test]
fn ready_lists_unblocked_pending_in_definition_order() {
    let engine = engine();
    let ids: Vec<String> = engine.ready().unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["A", "E"]);

    finish(&engine, "A");
    let ready = engine.ready().unwrap();
    let ids: Vec<&str> = ready.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "D", "E"]);
    assert_eq!(ready[0].wbs_ref, "1.2");
}

#[test]
fn status_counts_derived_statuses() {
    let engine = engine();
    engine.claim("A", "agent").unwrap();
    let report = engine.status().unwrap();
    assert_eq!(report.counts.get(&DerivedStatus::InProgress), Some(&1));
    assert_eq!(report.counts.get(&DerivedStatus::Blocked), Some(&3));
    assert_eq!(report.counts.get(&DerivedStatus::Pending), Some(&1));
    assert_eq!(report.areas.len(), 2);
    assert_eq!(report.areas[0].packets.len(), 4);
    assert_eq!(report.events, 1);
    assert_eq!(report.closed_areas, 0);
}

#[test]
fn closeout_requires_terminal_packets() {
    let engine = engine();
    let out = engine
        .closeout_l2("1.0", "lead", "docs/drift.md", "")
        .unwrap();
    assert_eq!(out.code, Some(ErrorCode::InvalidTransition));
    assert!(out.message.contains("A(pending)"));

    let out = engine.closeout_l2("9", "lead", "docs/drift.md", "").unwrap();
    assert_eq!(out.code, Some(ErrorCode::UnknownPacket));
}

#[test]
fn closeout_records_area_and_audits_under_area_scope() {
    let engine = engine();
    finish(&engine, "E");
    let out = engine
        .closeout_l2("2", "lead", "docs/drift.md", "no drift")
        .unwrap();
    assert!(out.success, "{}", out.message);
    assert_eq!(out.message, "Level-2 area 2.0 closed");

    let state = engine.store().load().unwrap();
    let record = &state.area_closeouts["2.0"];
    assert_eq!(record.closed_by, "lead");
    assert_eq!(record.closed_at, NOW);
    assert_eq!(record.area_title.as_deref(), Some("Docs"));
    let last = state.log.last().unwrap();
    assert_eq!(last.packet_id, "AREA-2.0");
    assert_eq!(last.event, AuditEvent::Closeout);
    assert_eq!(
        last.notes.as_deref(),
        Some("Drift assessment: docs/drift.md | no drift")
    );

    let again = engine.closeout_l2("2.0", "lead", "docs/drift.md", "").unwrap();
    assert_eq!(again.code, Some(ErrorCode::InvalidTransition));
}

#[test]
fn closeout_verifies_assessment_when_enabled() {
    let tmp = tempdir().unwrap();
    let engine = engine().with_options(EngineOptions {
        verify_assessment: true,
    });
    finish(&engine, "E");

    let partial = tmp.path().join("partial.md");
    fs::write(&partial, "## Scope Reviewed\nall\n").unwrap();
    let out = engine
        .closeout_l2("2.0", "lead", partial.to_str().unwrap(), "")
        .unwrap();
    assert!(!out.success);
    assert!(out.message.contains("missing required section: ## Drift Assessment"));

    let missing = tmp.path().join("absent.md");
    let out = engine
        .closeout_l2("2.0", "lead", missing.to_str().unwrap(), "")
        .unwrap();
    assert!(out.message.contains("assessment file not found"));

    let full = tmp.path().join("full.md");
    let body: String = REQUIRED_DRIFT_SECTIONS
        .iter()
        .map(|s| format!("{}\nok\n\n", s.to_uppercase()))
        .collect();
    fs::write(&full, body).unwrap();
    let out = engine
        .closeout_l2("2.0", "lead", full.to_str().unwrap(), "")
        .unwrap();
    assert!(out.success, "{}", out.message);
}

#[test]
fn hash_chain_mode_seals_new_entries() {
    let engine = engine();
    finish(&engine, "E");
    assert!(engine.set_log_mode(LogIntegrityMode::HashChain).unwrap().success);
    finish(&engine, "A");

    let report = engine.verify_log().unwrap();
    assert!(report.valid, "{:?}", report.issues);
    assert_eq!(report.events, 4);
    assert_eq!(report.hashed_events, 2);

    let log = engine.log(2).unwrap();
    assert_eq!(log[0].hash_index, Some(1));
    assert_eq!(log[1].prev_hash, log[0].hash);

    let same = engine.set_log_mode(LogIntegrityMode::HashChain).unwrap();
    assert!(same.message.contains("already"));
}

#[test]
fn provenance_and_graph_queries_read_live_state() {
    let engine = engine();
    finish(&engine, "A");
    engine.note("A", "reviewer", "checked").unwrap();
    let events: Vec<AuditEvent> = engine
        .provenance("A")
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(
        events,
        vec![AuditEvent::Claim, AuditEvent::Done, AuditEvent::Note]
    );

    assert_eq!(engine.upstream("C").unwrap(), vec!["B", "A"]);
    let downstream: Vec<String> = engine.downstream("A").unwrap().into_iter().collect();
    assert_eq!(downstream, vec!["B", "C", "D"]);
    assert_eq!(engine.impact("B").unwrap().len(), 1);
    assert_eq!(engine.critical_path().unwrap(), vec!["A", "B", "C"]);
}

#[test]
fn graph_queries_on_unknown_packet_are_not_found() {
    let engine = engine();
    for result in [
        engine.upstream("GHOST").map(|v| v.len()),
        engine.downstream("GHOST").map(|v| v.len()),
        engine.impact("GHOST").map(|v| v.len()),
    ] {
        match result {
            Err(GantryError::NotFound(what)) => assert_eq!(what, "packet GHOST"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}

#[test]
fn legacy_document_gets_edges_from_definition() {
    let store = MemoryStore::new().with_document(serde_json::json!({
        "packets": {
            "A": {"status": "pending"},
            "B": {"status": "pending"}
        },
        "log": []
    }));
    let engine = GovernanceEngine::new(definition(), store);

    // No init: edges must still come from the definition.
    let out = engine.claim("B", "agent").unwrap();
    assert!(!out.success);
    assert_eq!(out.code, Some(ErrorCode::DependencyUnsatisfied));
    assert!(engine.store().load().unwrap().log.is_empty());

    let ready: Vec<String> = engine.ready().unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ready, vec!["A", "E"]);
    assert_eq!(engine.upstream("B").unwrap(), vec!["A"]);

    assert!(engine.claim("A", "agent").unwrap().success);
    let state = engine.store().load().unwrap();
    assert_eq!(state.packets["A"].area_id, "1.0");
    assert_eq!(state.packets["B"].dependencies, vec!["A".to_string()]);
    assert_eq!(state.packets.len(), 5);
    assert_eq!(state.packets["C"].status, PacketStatus::Pending);
    assert_eq!(engine.init().unwrap(), 0);
}

#[test]
fn pluggable_supervisor_composes_denials() {
    let supervisor = UnanimousSupervisor::new()
        .with(DeterministicSupervisor::default())
        .with(ActionAllowList::new().allow(Action::Claim, &["lead"]));
    let engine = engine().with_supervisor(supervisor);

    let out = engine.claim("A", "agent").unwrap();
    assert_eq!(out.code, Some(ErrorCode::PolicyDenied));
    assert_eq!(out.message, "Supervisor denied: agent 'agent' may not claim");

    assert!(engine.claim("A", "lead").unwrap().success);
    let out = engine.done("A", "lead", "").unwrap();
    assert_eq!(out.message, "Supervisor denied: completion notes required");
}
