use crate::helpers::{CallLog, Harness};
use stagehand::core::{
    Condition, FailureReason, Pipeline, RunStatus, Stage, StageOutcome, Step, TriggerFilter,
};

#[tokio::test]
async fn failing_step_stops_the_stage() {
    let harness = Harness::new();
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("prepare", log.step("prepare", 0)))
            .with_step(Step::new("build", log.step("build", 3)))
            .with_step(Step::new("tag", log.step("tag", 0))),
    );

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(log.calls(), vec!["prepare", "build"]);
    let (stage, failure) = run.first_failure().unwrap();
    assert_eq!(stage.stage, "packages");
    assert_eq!(failure.index, 2);
    assert_eq!(failure.step, "build");
    assert_eq!(failure.reason, FailureReason::NonZeroExit);
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.exit_code(), 3);
}

#[tokio::test]
async fn skipped_stage_leaves_workspace_untouched() {
    let harness = Harness::new();
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("manpage")
            .with_condition(Condition::Never)
            .with_step(Step::new("render", log.writing_step("render", "man/cifra.1"))),
    );

    let before = harness.workspace_entries();
    for _ in 0..2 {
        let run = harness.run(&pipeline, "staging").await;
        assert!(matches!(
            run.stage("manpage").unwrap().outcome,
            StageOutcome::Skipped { .. }
        ));
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.exit_code(), 0);
    }

    assert!(log.calls().is_empty());
    assert_eq!(harness.workspace_entries(), before);
}

#[tokio::test]
async fn independent_stage_runs_after_a_failure() {
    let harness = Harness::new();
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_stage(Stage::new("merge").with_step(Step::new("merge", log.step("merge", 2))))
        .with_stage(Stage::new("docs").with_step(Step::new("docs", log.step("docs", 0))))
        .with_stage(
            Stage::new("packages")
                .with_condition(Condition::stage_succeeded("merge"))
                .with_step(Step::new("build", log.step("build", 0))),
        )
        .with_stage(Stage::new("lint").with_step(Step::new("lint", log.step("lint", 5))));

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(log.calls(), vec!["merge", "docs", "lint"]);
    assert!(run.stage("docs").unwrap().outcome.is_succeeded());
    assert!(!run.stage("packages").unwrap().outcome.is_admitted());
    assert!(run.stage("lint").unwrap().outcome.is_failed());
    assert_eq!(run.failed_count(), 2);
    assert_eq!(run.exit_code(), 2);

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, RunStatus::Failed);
    assert_eq!(reports[0].exit_code, 2);
}

#[tokio::test]
async fn steps_see_their_own_environment() {
    let harness = Harness::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_env("PIPELINE_LEVEL", "pipeline")
        .with_stage(
            Stage::new("env")
                .with_env("STAGE_LEVEL", "stage")
                .with_step(
                    Step::new(
                        "dump",
                        std::sync::Arc::new(stagehand::execution::ShellCommand::new(
                            "echo \"$PIPELINE_LEVEL $STAGE_LEVEL $STEP_LEVEL\" > env.txt",
                        )),
                    )
                    .with_env("STEP_LEVEL", "step"),
                ),
        );

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    let written = std::fs::read_to_string(harness.path("env.txt")).unwrap();
    assert_eq!(written.trim(), "pipeline stage step");
}
