use crate::helpers::{CallLog, Harness, MockProvider};
use stagehand::core::{
    Condition, DeployOutcome, Deployment, Pipeline, RunStatus, SecretRef, Stage, Step,
    TriggerFilter,
};

fn deployment(name: &str, provider: &str) -> Deployment {
    Deployment::new(name, provider).with_artifacts(["packages/*"])
}

#[tokio::test]
async fn failed_deployment_does_not_block_its_sibling() {
    let broken = MockProvider::failing();
    let healthy = MockProvider::new();
    let harness = Harness::new()
        .with_provider("broken", broken.clone())
        .with_provider("healthy", healthy.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("build", log.writing_step("build", "packages/cifra.deb")))
            .with_deployment(deployment("d1", "broken"))
            .with_deployment(deployment("d2", "healthy")),
    );

    let run = harness.run(&pipeline, "staging").await;

    let stage = run.stage("packages").unwrap();
    assert!(stage.outcome.is_succeeded());
    assert_eq!(stage.deployments.len(), 2);
    assert_eq!(stage.deployments[0].deployment, "d1");
    assert!(stage.deployments[0].is_failed());
    assert_eq!(stage.deployments[1].deployment, "d2");
    assert!(stage.deployments[1].is_delivered());
    assert_eq!(broken.deliveries().len(), 1);
    assert_eq!(healthy.deliveries().len(), 1);

    assert_eq!(run.failed_deployments(), 1);
    assert_eq!(run.status(), RunStatus::Succeeded);
    let report = &harness.notifier.reports()[0];
    assert_eq!(report.stages[0].deployments.len(), 2);
}

#[tokio::test]
async fn failed_stage_never_deploys() {
    let github = MockProvider::new();
    let harness = Harness::new().with_provider("github_releases", github.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("build", log.writing_step("build", "packages/cifra.deb")))
            .with_step(Step::new("verify", log.step("verify", 1)))
            .with_deployment(deployment("github", "github_releases")),
    );

    let run = harness.run(&pipeline, "staging").await;

    let stage = run.stage("packages").unwrap();
    assert!(stage.outcome.is_failed());
    assert!(stage.deployments.is_empty());
    assert!(stage.artifacts.is_empty());
    assert!(github.deliveries().is_empty());
}

#[tokio::test]
async fn deployment_condition_is_evaluated_per_deployment() {
    let github = MockProvider::new();
    let harness = Harness::new().with_provider("github_releases", github.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("build", log.writing_step("build", "packages/cifra.deb")))
            .with_deployment(deployment("nightly", "github_releases").with_condition(Condition::Never))
            .with_deployment(
                deployment("release", "github_releases")
                    .with_condition(Condition::branch("staging")),
            ),
    );

    let run = harness.run(&pipeline, "staging").await;

    let stage = run.stage("packages").unwrap();
    assert!(matches!(
        stage.deployments[0].outcome,
        DeployOutcome::Skipped { .. }
    ));
    assert!(stage.deployments[1].is_delivered());
    let deliveries = github.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].deployment, "release");
}

#[tokio::test]
async fn artifacts_produced_upstream_are_relayed() {
    let pypi = MockProvider::new();
    let harness = Harness::new().with_provider("pypi", pypi.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging"))
        .with_stage(
            Stage::new("wheels")
                .with_artifact("dist/*.whl")
                .with_step(Step::new("wheel", log.writing_step("wheel", "dist/cifra-1.2-py3-none-any.whl"))),
        )
        .with_stage(
            Stage::new("publish")
                .with_condition(Condition::stage_succeeded("wheels"))
                .with_step(Step::new("check", log.step("check", 0)))
                .with_deployment(
                    Deployment::new("pypi", "pypi")
                        .with_artifacts(["dist/*"])
                        .with_credential("username", SecretRef::new("PYPI_USERNAME"))
                        .with_credential("password", SecretRef::new("PYPI_PASSWORD")),
                ),
        );

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    let wheels = run.stage("wheels").unwrap();
    assert_eq!(
        wheels.artifacts,
        vec![harness.path("dist/cifra-1.2-py3-none-any.whl")]
    );

    let deliveries = pypi.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].stage, "publish");
    assert_eq!(
        deliveries[0].artifacts,
        vec![harness.path("dist/cifra-1.2-py3-none-any.whl")]
    );
    assert_eq!(deliveries[0].credential_keys, vec!["password", "username"]);
}

#[tokio::test]
async fn missing_secret_fails_only_that_deployment() {
    let github = MockProvider::new();
    let harness = Harness::new().with_provider("github_releases", github.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("build", log.writing_step("build", "packages/cifra.deb")))
            .with_deployment(
                deployment("github", "github_releases")
                    .with_credential("api_key", SecretRef::new("NOT_CONFIGURED")),
            ),
    );

    let run = harness.run(&pipeline, "staging").await;

    let stage = run.stage("packages").unwrap();
    assert!(stage.outcome.is_succeeded());
    assert!(stage.deployments[0].is_failed());
    assert!(github.deliveries().is_empty());
}

#[tokio::test]
async fn deployment_may_require_its_own_stage() {
    let github = MockProvider::new();
    let harness = Harness::new().with_provider("github_releases", github.clone());
    let log = CallLog::new();
    let pipeline = Pipeline::new("cifra", TriggerFilter::new("staging")).with_stage(
        Stage::new("packages")
            .with_step(Step::new("build", log.writing_step("build", "packages/cifra.deb")))
            .with_deployment(
                deployment("github", "github_releases")
                    .with_condition(Condition::stage_succeeded("packages")),
            ),
    );

    let run = harness.run(&pipeline, "staging").await;

    assert!(run.stage("packages").unwrap().deployments[0].is_delivered());
    assert_eq!(github.deliveries().len(), 1);
    assert!(pipeline.plan(&harness.context("staging").trigger).stages[0].deployments[0].fires);
}
