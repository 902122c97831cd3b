use crate::helpers::{CallLog, Harness};
use stagehand::core::{Condition, Pipeline, RunPhase, RunStatus, Stage, Step, TriggerFilter};
use stagehand::persistence::PersistenceBackend;

fn pipeline(log: &CallLog) -> Pipeline {
    Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_stage(Stage::new("merge").with_step(Step::new("merge", log.step("merge", 0))))
        .with_stage(
            Stage::new("packages")
                .with_condition(Condition::branch("staging"))
                .with_step(Step::new("build", log.step("build", 0))),
        )
}

#[tokio::test]
async fn non_trigger_branch_runs_nothing() {
    let harness = Harness::new();
    let log = CallLog::new();

    let run = harness.run(&pipeline(&log), "feature-x").await;

    assert_eq!(run.phase, RunPhase::Rejected);
    assert_eq!(run.status(), RunStatus::Rejected);
    assert_eq!(run.exit_code(), 0);
    assert!(run.stages.is_empty());
    assert!(log.calls().is_empty());
    assert!(harness.notifier.reports().is_empty());
    assert!(harness.history.list_pipelines().await.unwrap().is_empty());
}

#[tokio::test]
async fn trigger_branch_is_admitted_and_notified_once() {
    let harness = Harness::new();
    let log = CallLog::new();

    let run = harness.run(&pipeline(&log), "staging").await;

    assert_eq!(run.phase, RunPhase::Archived);
    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(log.calls(), vec!["merge", "build"]);

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, RunStatus::Succeeded);
    assert_eq!(reports[0].stages.len(), 2);

    let archived = harness.history.list_runs("cifra").await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].run_id, run.run_id);
}

#[tokio::test]
async fn branch_match_is_exact() {
    let harness = Harness::new();
    let log = CallLog::new();

    for branch in ["Staging", "staging-2", "origin/staging"] {
        let run = harness.run(&pipeline(&log), branch).await;
        assert_eq!(run.status(), RunStatus::Rejected, "branch {}", branch);
    }
    assert!(log.calls().is_empty());
}
