//! Retry Integration Tests
//!
//! Transient provider failures are retried within the policy budget;
//! permanent ones fail the run on the first attempt.

mod common;

use common::{fast_retry, seed_record, FakePlaces, FakeProperty, Harness};
use hearth::config::EnrichmentSettings;
use hearth::domain::{fields, Event, EventName, RunEventKind, RunStatus, StepStatus, UsageKind};

fn harness(places: FakePlaces) -> Harness {
    let harness = Harness::build(
        FakeProperty::default(),
        places,
        EnrichmentSettings::default(),
        fast_retry(),
    );
    seed_record(&harness.store, "R1", "u1", 40.0, -75.0, 300000.0);
    harness
}

fn enrich() -> Event {
    Event::new(EventName::EnrichRecord)
        .with(fields::RECORD_ID, "R1")
        .with(fields::OWNER_ID, "u1")
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = harness(FakePlaces::flaky(2));

    let run = harness.run(enrich()).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(harness.places.calls(), 3);

    let step = run.step("nearby-places").unwrap();
    assert_eq!(step.status, StepStatus::Succeeded);
    assert_eq!(step.attempts, 3);
    assert!(step.error.is_none());

    let journal = harness.store.run_events(&run.id).unwrap();
    let retries: Vec<_> = journal
        .iter()
        .filter(|e| e.kind == RunEventKind::StepRetrying)
        .collect();
    assert_eq!(retries.len(), 2);
    assert_eq!(retries[0].attempt, Some(1));
    assert!(retries[0].error.as_deref().unwrap_or_default().contains("503"));

    assert_eq!(
        harness.store.usage("u1", UsageKind::Enrichments).unwrap(),
        1
    );
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let harness = harness(FakePlaces::flaky(10));

    let run = harness.run(enrich()).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failed_step.as_deref(), Some("nearby-places"));
    assert!(run
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("gave up after 3 attempts"));
    assert_eq!(harness.places.calls(), 3);

    // Earlier steps keep their committed effects
    let record = harness.store.get_record("R1").unwrap().unwrap();
    assert!(record.financing.is_some());
    assert!(record.nearby_places.is_none());
    assert_eq!(
        harness.store.usage("u1", UsageKind::Enrichments).unwrap(),
        0
    );

    let step = run.step("nearby-places").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let harness = harness(FakePlaces::rejecting());

    let run = harness.run(enrich()).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(harness.places.calls(), 1);
    assert_eq!(run.step("nearby-places").unwrap().attempts, 1);

    let journal = harness.store.run_events(&run.id).unwrap();
    assert!(!journal.iter().any(|e| e.kind == RunEventKind::StepRetrying));
}

#[tokio::test]
async fn test_persisted_attempts_count_against_budget() {
    let harness = harness(FakePlaces::default());

    let (run, _) = harness.dispatcher.accept(&enrich()).unwrap();

    // Attempts made by a process that crashed mid-step
    for _ in 0..3 {
        harness.store.begin_attempt(&run.id, "fetch-details").unwrap();
    }

    let run = harness.executor.execute(&run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failed_step.as_deref(), Some("fetch-details"));
    assert!(run
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("exhausted its retry budget"));
    assert_eq!(harness.places.calls(), 0);
}

#[tokio::test]
async fn test_failed_run_is_not_retried_on_redelivery() {
    let harness = harness(FakePlaces::rejecting());

    let first = harness.run(enrich()).await;
    assert_eq!(first.status, RunStatus::Failed);

    let second = harness.run(enrich()).await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, RunStatus::Failed);
    assert_eq!(harness.places.calls(), 1);
}
