use crate::helpers::{CallLog, Harness};
use stagehand::core::{
    CancellationToken, FailureReason, Pipeline, RunStatus, Stage, StageOutcome, Step,
    TriggerFilter,
};
use std::time::Duration;

#[tokio::test]
async fn cancelling_a_run_skips_the_rest_and_still_notifies() {
    let harness = Harness::new();
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_stage(Stage::new("merge").with_step(Step::new("merge", log.step("merge", 0))))
        .with_stage(
            Stage::new("packages")
                .with_step(Step::new("build", log.slow_step("build", Duration::from_secs(30))))
                .with_step(Step::new("tag", log.step("tag", 0))),
        )
        .with_stage(Stage::new("pypi").with_step(Step::new("upload", log.step("upload", 0))));

    let token = CancellationToken::new();
    let ctx = harness.context("staging").with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let run = harness.engine().execute(&pipeline, &ctx).await;
    canceller.await.unwrap();

    assert_eq!(log.calls(), vec!["merge", "build"]);
    assert!(run.stage("merge").unwrap().outcome.is_succeeded());

    let failure = run.stage("packages").unwrap().outcome.failure().unwrap().clone();
    assert_eq!(failure.step, "build");
    assert_eq!(failure.reason, FailureReason::Cancelled);
    assert_eq!(failure.exit_code, 130);

    match &run.stage("pypi").unwrap().outcome {
        StageOutcome::Skipped { reason } => assert_eq!(reason, "run cancelled"),
        other => panic!("expected pypi to be skipped, got {:?}", other),
    }

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert_eq!(run.exit_code(), 130);

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, RunStatus::Cancelled);
}

#[tokio::test]
async fn stage_budget_exhaustion_fails_with_timeout_code() {
    let harness = Harness::new();
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_stage(
            Stage::new("packages")
                .with_timeout(Duration::from_millis(100))
                .with_step(Step::new("build", log.slow_step("build", Duration::from_secs(30))))
                .with_step(Step::new("tag", log.step("tag", 0))),
        )
        .with_stage(Stage::new("docs").with_step(Step::new("docs", log.step("docs", 0))));

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(log.calls(), vec!["build", "docs"]);
    let (stage, failure) = run.first_failure().unwrap();
    assert_eq!(stage.stage, "packages");
    assert_eq!(failure.reason, FailureReason::TimedOut);
    assert_eq!(run.exit_code(), 124);
    assert_eq!(run.status(), RunStatus::Failed);
    assert!(run.stage("docs").unwrap().outcome.is_succeeded());
}
