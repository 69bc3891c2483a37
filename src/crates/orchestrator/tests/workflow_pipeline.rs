//! End-to-end runs of the calendar pipeline against in-process fakes

mod common;

use checkpoint::{ReviewStore, WorkflowStatus};
use common::*;
use integration::DataKind;
use orchestrator::{ReviewService, WorkflowError};
use serde_json::json;

#[tokio::test]
async fn test_empty_critical_kind_fails_validation() {
    let source = FakeSource::healthy();
    source.answer(DataKind::Segments, Answer::Records(Vec::new()));
    let h = harness(source);

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Validating);
    assert_eq!(failure.kind(), "data");
    match &failure.error {
        WorkflowError::DataValidation(e) => assert_eq!(e.kinds(), vec![DataKind::Segments]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.generator.calls(), 0);
    assert!(h.store.list(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_below_minimum_fails_compliance_and_persists_nothing() {
    let h = harness(FakeSource::healthy());
    h.generator.reply(plan_text()).reply(calendar(1).to_string());

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::ComplianceCheck);
    assert_eq!(failure.kind(), "compliance");
    assert!(failure.error.to_string().contains("sms: 1 observed vs 3 required"));
    assert!(h.store.list(&Default::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_run_edit_approve_resume() {
    let h = harness(FakeSource::healthy());
    h.generator.reply(plan_text()).reply(format!("```json\n{}\n```", calendar(3)));

    let record = h
        .orchestrator
        .run("Acme Outdoor", range())
        .await
        .into_result()
        .unwrap();
    assert_eq!(record.status, WorkflowStatus::PendingReview);
    assert_eq!(record.account_alias, "acme");
    assert!(record.workflow_id.starts_with("acme-2025-12-01-2025-12-31-"));
    assert_eq!(record.stage2_output.len(), 7);
    assert_eq!(record.stage1_output, plan_text());

    let review = ReviewService::new(h.orchestrator.clone());
    let edited = review
        .replace_artifact(&record.workflow_id, calendar(4), Some("editor@acme.test"))
        .await
        .unwrap();
    assert_eq!(edited.stage2_output.len(), 8);
    assert!(edited.review.has_external_edits());

    review.approve(&record.workflow_id, "lead@acme.test").await.unwrap();

    h.generator.reply(briefs_for(4));
    let done = review.resume(&record.workflow_id).await.unwrap();

    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.stage3_output.as_deref(), Some(briefs_for(4).as_str()));
    assert!(done.advisories.iter().all(|a| !a.contains("do not reference")));

    // Briefs are generated from the edited artifact.
    let requests = h.generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[2].context.contains("VIP Text 4"));
    assert!(requests[0].context.contains("Acme Outdoor"));

    let stored = h.store.get(&record.workflow_id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.review.reviewer_id.as_deref(), Some("lead@acme.test"));
}

#[tokio::test]
async fn test_non_critical_failure_degrades_and_continues() {
    let source = FakeSource::healthy();
    source.answer(DataKind::Metrics, Answer::Fail("metrics backend down".to_string()));
    let h = harness(source);
    h.generator.reply(plan_text()).reply(calendar(3).to_string());

    let record = h.orchestrator.run("acme", range()).await.into_result().unwrap();

    assert_eq!(record.status, WorkflowStatus::PendingReview);
    assert!(record
        .advisories
        .iter()
        .any(|a| a.starts_with("metrics unavailable") && a.contains("metrics backend down")));
}

#[tokio::test]
async fn test_critical_fetch_error_fails_in_fetching() {
    let source = FakeSource::healthy();
    source.answer(DataKind::Campaigns, Answer::Fail("account suspended".to_string()));
    let h = harness(source);

    let failure = match h.orchestrator.run("acme", range()).await.failure() {
        Some(failure) => (failure.state, failure.kind()),
        None => panic!("run should fail"),
    };
    assert_eq!(failure, (WorkflowStatus::Fetching, "integration"));
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_transient_timeout_is_retried() {
    let source = FakeSource::healthy();
    source.answer(
        DataKind::Segments,
        Answer::TimeoutThen(1, vec![json!({"id": "seg-1", "name": "Engaged 30d"})]),
    );
    let h = harness(source);
    h.generator.reply(plan_text()).reply(calendar(3).to_string());

    let outcome = h.orchestrator.run("acme", range()).await;

    assert!(outcome.is_pending_review());
    assert_eq!(h.source.calls(DataKind::Segments), 2);
}

#[tokio::test]
async fn test_persistent_timeout_exhausts_retries() {
    let source = FakeSource::healthy();
    source.answer(DataKind::Segments, Answer::TimeoutThen(10, Vec::new()));
    let h = harness(source);

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Fetching);
    assert_eq!(h.source.calls(DataKind::Segments), 3);
}

#[tokio::test]
async fn test_repeat_runs_share_cached_fetches() {
    let h = harness(FakeSource::healthy());
    h.generator
        .reply(plan_text())
        .reply(calendar(3).to_string())
        .reply(plan_text())
        .reply(calendar(3).to_string());

    assert!(h.orchestrator.run("acme", range()).await.is_pending_review());
    // Workflow ids carry millisecond timestamps.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(h.orchestrator.run("acme", range()).await.is_pending_review());

    for kind in DataKind::ALL {
        assert_eq!(h.source.calls(kind), 1, "{kind} fetched more than once");
    }
}

#[tokio::test]
async fn test_unknown_account_fails_before_fetching() {
    let h = harness(FakeSource::healthy());

    let outcome = h.orchestrator.run("globex", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Created);
    assert_eq!(failure.kind(), "account_configuration");
    assert_eq!(h.source.calls(DataKind::Segments), 0);
}

#[tokio::test]
async fn test_short_plan_fails_stage1() {
    let h = harness(FakeSource::healthy());
    h.generator.reply("Send some emails.");

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Stage1);
    assert_eq!(failure.kind(), "generation_output");
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_unparseable_calendar_fails_stage2() {
    let h = harness(FakeSource::healthy());
    h.generator.reply(plan_text()).reply("Here is your calendar, it is great.");

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Stage2);
    assert_eq!(failure.kind(), "generation_output");
}

#[tokio::test]
async fn test_generation_error_is_attributed_to_stage() {
    let h = harness(FakeSource::healthy());
    h.generator.fail("overloaded");

    let outcome = h.orchestrator.run("acme", range()).await;

    let failure = outcome.failure().expect("run should fail");
    assert_eq!(failure.state, WorkflowStatus::Stage1);
    assert_eq!(failure.kind(), "generation");
}

#[tokio::test]
async fn test_out_of_range_items_are_advisories() {
    let h = harness(FakeSource::healthy());
    let mut document = calendar(3);
    document["items"]
        .as_array_mut()
        .unwrap()
        .push(item("email", "2026-01-02", "New Year Kickoff"));
    h.generator.reply(plan_text()).reply(document.to_string());

    let record = h.orchestrator.run("acme", range()).await.into_result().unwrap();

    assert_eq!(record.stage2_output.len(), 8);
    assert!(record.advisories.iter().any(|a| a.contains("New Year Kickoff")));
}

#[tokio::test]
async fn test_item_field_problems_are_advisories() {
    let h = harness(FakeSource::healthy());
    let mut document = calendar(3);
    let items = document["items"].as_array_mut().unwrap();
    items[0]["send_time"] = json!("10:00");
    items[0]["audience"] = json!({"segment_name": "Engaged 90d"});
    items[1]["send_time"] = json!("25:99");
    items[2]["audience"] = json!(["vip", "lapsed"]);
    h.generator.reply(plan_text()).reply(document.to_string());

    let record = h.orchestrator.run("acme", range()).await.into_result().unwrap();

    assert_eq!(record.status, WorkflowStatus::PendingReview);
    assert!(record
        .advisories
        .iter()
        .any(|a| a == "item 'Stocking Stuffers': send_time \"25:99\" is not HH:MM"));
    assert!(record
        .advisories
        .iter()
        .any(|a| a == "item 'Last Shipping Day': audience must be an object, got array"));
    assert!(!record.advisories.iter().any(|a| a.contains("Gift Guide Launch")));
}
