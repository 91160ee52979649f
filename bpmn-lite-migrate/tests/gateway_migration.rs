mod common;

use bpmn_lite_migrate::types::VariableMap;
use bpmn_lite_migrate::{
    ActivityMapping, HistoryEvent, MigrationConfig, MigrationDocument, MigrationEngine,
    MigrationError,
};
use common::*;
use serde_json::json;

#[test]
fn test_exclusive_gateway_takes_default_flow_without_variables() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(EXCLUSIVE_GATEWAY);
    let pid = h.start_at(&source, &["userTask1Id"]);

    let doc = MigrationDocument::to_process("gatewayProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "exclusiveGw"));
    assert!(h.engine.validate_migration(&h.tree, pid, &doc).valid);

    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();
    assert_eq!(active_activities(&migrated, pid), vec!["defaultFlowTask"]);
    assert!(migrated.history().iter().any(|e| matches!(
        e,
        HistoryEvent::GatewayTaken { gateway_id, flow_ids, .. }
            if gateway_id == "exclusiveGw" && flow_ids == &vec!["defaultFlow".to_string()]
    )));
}

#[test]
fn test_exclusive_gateway_follows_instance_variable() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(EXCLUSIVE_GATEWAY);
    let pid = h.start_with(
        &source,
        &["userTask1Id"],
        VariableMap::from([("input".to_string(), json!(1))]),
    );

    let doc = MigrationDocument::to_process("gatewayProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "exclusiveGw"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();
    assert_eq!(active_activities(&migrated, pid), vec!["theTask1"]);
}

#[test]
fn test_exclusive_gateway_sees_document_variables() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(EXCLUSIVE_GATEWAY);
    let pid = h.start_at(&source, &["userTask1Id"]);

    let doc = MigrationDocument::to_process("gatewayProcess", None)
        .with_instance_variable("input", 1)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "exclusiveGw"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();
    assert_eq!(active_activities(&migrated, pid), vec!["theTask1"]);
}

#[test]
fn test_parallel_fork_creates_token_per_flow() {
    let mut h = Harness::new();
    let source = h.deploy(ONE_TASK);
    h.deploy(PARALLEL_GATEWAY);
    let pid = h.start_at(&source, &["theTask"]);

    let doc = MigrationDocument::to_process("parallelProcess", None)
        .with_mapping(ActivityMapping::one_to_one("theTask", "fork"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();

    assert_eq!(active_activities(&migrated, pid), vec!["taskA", "taskB"]);
    let root = migrated.root_execution(pid).unwrap().id;
    assert!(migrated
        .active_leaves(pid)
        .iter()
        .all(|e| e.parent_id == Some(root)));
}

#[test]
fn test_join_waits_while_branch_can_reach_it() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(PARALLEL_GATEWAY);
    let pid = h.start_at(&source, &["userTask1Id", "userTask2Id"]);

    let doc = MigrationDocument::to_process("parallelProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "taskA"))
        .with_mapping(ActivityMapping::one_to_one("userTask2Id", "join"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();

    assert_eq!(active_activities(&migrated, pid), vec!["taskA"]);
    let waiting: Vec<_> = migrated
        .executions_of(pid)
        .into_iter()
        .filter(|e| e.activity() == Some("join"))
        .collect();
    assert_eq!(waiting.len(), 1);
    assert!(!waiting[0].active);
}

#[test]
fn test_unreachable_join_is_discarded() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(PARALLEL_GATEWAY);
    let pid = h.start_at(&source, &["userTask1Id", "userTask2Id"]);

    let doc = MigrationDocument::to_process("parallelProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "afterJoin"))
        .with_mapping(ActivityMapping::one_to_one("userTask2Id", "join"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();

    assert_eq!(active_activities(&migrated, pid), vec!["afterJoin"]);
    assert!(migrated
        .executions_of(pid)
        .iter()
        .all(|e| e.activity() != Some("join")));

    let keep_joins = MigrationEngine::new(h.repo.clone()).with_config(MigrationConfig {
        discard_moot_joins: false,
        ..MigrationConfig::default()
    });
    let kept = keep_joins.migrate(&h.tree, pid, &doc).unwrap();
    assert!(kept
        .executions_of(pid)
        .iter()
        .any(|e| e.activity() == Some("join")));
}

#[test]
fn test_gateway_chain_depth_is_bounded() {
    let mut h = Harness::new();
    let source = h.deploy(ONE_TASK);
    h.deploy(
        r#"
key: chained
nodes:
  - { id: start, kind: StartEvent }
  - { id: gw1, kind: ExclusiveGateway }
  - { id: gw2, kind: ExclusiveGateway }
  - { id: gw3, kind: ExclusiveGateway }
  - { id: done, kind: UserTask }
flows:
  - { from: start, to: gw1 }
  - { from: gw1, to: gw2 }
  - { from: gw2, to: gw3 }
  - { from: gw3, to: done }
"#,
    );
    let pid = h.start_at(&source, &["theTask"]);
    let doc = MigrationDocument::to_process("chained", None)
        .with_mapping(ActivityMapping::one_to_one("theTask", "gw1"));

    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();
    assert_eq!(active_activities(&migrated, pid), vec!["done"]);

    let shallow = MigrationEngine::new(h.repo.clone()).with_config(MigrationConfig {
        max_routing_depth: 1,
        ..MigrationConfig::default()
    });
    let err = shallow.migrate(&h.tree, pid, &doc).unwrap_err();
    assert!(err.to_string().contains("exceeded the maximum depth of 1"));
}

#[test]
fn test_inclusive_gateway_takes_every_flow_that_holds() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(INCLUSIVE_GATEWAY);
    let pid = h.start_with(
        &source,
        &["userTask1Id"],
        VariableMap::from([("amount".to_string(), json!(500))]),
    );

    let doc = MigrationDocument::to_process("inclusiveProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "inclusiveGw"));
    let migrated = h.engine.migrate(&h.tree, pid, &doc).unwrap();

    assert_eq!(active_activities(&migrated, pid), vec!["largeTask", "smallTask"]);
    assert!(migrated.history().iter().any(|e| matches!(
        e,
        HistoryEvent::GatewayTaken { gateway_id, flow_ids, .. }
            if gateway_id == "inclusiveGw" && flow_ids == &vec!["toSmall".to_string(), "toLarge".to_string()]
    )));

    let small = h.engine.migrate(&h.tree, pid, &doc.clone().with_instance_variable("amount", 5)).unwrap();
    assert_eq!(active_activities(&small, pid), vec!["smallTask"]);
}

#[test]
fn test_inclusive_gateway_without_matching_flow_fails() {
    let mut h = Harness::new();
    let source = h.deploy(TWO_TASKS);
    h.deploy(INCLUSIVE_GATEWAY);
    let pid = h.start_at(&source, &["userTask1Id"]);

    let doc = MigrationDocument::to_process("inclusiveProcess", None)
        .with_mapping(ActivityMapping::one_to_one("userTask1Id", "inclusiveGw"));
    let err = h.engine.migrate_in_place(&mut h.tree, pid, &doc).unwrap_err();

    assert!(matches!(err, MigrationError::NoOutgoingFlow { ref element_id } if element_id == "inclusiveGw"));
    assert!(err.to_string().starts_with("No outgoing sequence flow"));
    assert_eq!(active_activities(&h.tree, pid), vec!["userTask1Id"]);
}
