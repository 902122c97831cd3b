use crate::helpers::{Harness, MockProvider};
use stagehand::core::{PipelineConfig, RunStatus, StageOutcome};
use stagehand::execution::RunReport;

fn release_yaml(build_command: &str) -> String {
    format!(
        r#"
name: cifra
trigger:
  branch: staging
variables:
  version: 1.2
stages:
  - name: merge
    steps:
      - name: merge
        run: "touch merged"
  - name: manpage
    artifacts: ["man/*"]
    steps:
      - name: render
        run: "mkdir -p man && echo '.TH CIFRA 1' > man/cifra.1"
  - name: packages
    condition: {{ stage_succeeded: merge }}
    artifacts: ["packages/*"]
    steps:
      - name: postinst
        script: ci_scripts/postinst.sh
        args: ["{{{{ version }}}}"]
      - name: build
        run: "{build_command}"
      - name: tag
        run: "touch tag-v{{{{ version }}}} && printf '%s' \"$GITHUB_TOKEN\" > tag.token"
        credentials: {{ GITHUB_TOKEN: GITHUB_TOKEN }}
    deployments:
      - name: github
        provider: github_releases
        credentials: {{ api_key: GITHUB_TOKEN }}
        artifacts: ["packages/*"]
  - name: pypi
    condition: {{ stage_succeeded: packages }}
    steps:
      - name: sdist
        run: "mkdir -p dist && touch dist/cifra-{{{{ version }}}}.tar.gz"
    deployments:
      - name: pypi
        provider: pypi
        credentials: {{ username: PYPI_USERNAME, password: PYPI_PASSWORD }}
        artifacts: ["dist/*"]
notifications:
  - kind: file
    path: reports/last-run.json
  - kind: command
    command: "printf '%s' \"$PIPELINE_STATUS\" > notified.status"
"#
    )
}

const BUILD_OK: &str = "mkdir -p packages && touch packages/cifra_{{ version }}_amd64.deb";

struct Release {
    harness: Harness,
    github: MockProvider,
    pypi: MockProvider,
}

fn release() -> Release {
    let github = MockProvider::new();
    let pypi = MockProvider::new();
    let harness = Harness::new()
        .with_provider("github_releases", github.clone())
        .with_provider("pypi", pypi.clone());

    let scripts = harness.path("ci_scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(
        scripts.join("postinst.sh"),
        "#!/bin/sh\necho \"$1\" > postinst.version\n",
    )
    .unwrap();

    Release {
        harness,
        github,
        pypi,
    }
}

#[tokio::test]
async fn full_release_on_staging() {
    let Release {
        harness,
        github,
        pypi,
    } = release();
    let pipeline = PipelineConfig::from_yaml(&release_yaml(BUILD_OK))
        .unwrap()
        .to_pipeline()
        .unwrap();

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(run.exit_code(), 0);
    assert_eq!(run.succeeded_count(), 4);

    assert!(harness.path("merged").exists());
    assert!(harness.path("tag-v1.2").exists());
    let token = std::fs::read_to_string(harness.path("tag.token")).unwrap();
    assert_eq!(token, "gh-token");
    let version = std::fs::read_to_string(harness.path("postinst.version")).unwrap();
    assert_eq!(version.trim(), "1.2");
    assert_eq!(
        run.stage("manpage").unwrap().artifacts,
        vec![harness.path("man/cifra.1")]
    );

    let github_deliveries = github.deliveries();
    assert_eq!(github_deliveries.len(), 1);
    assert_eq!(
        github_deliveries[0].artifacts,
        vec![harness.path("packages/cifra_1.2_amd64.deb")]
    );
    assert_eq!(github_deliveries[0].credential_keys, vec!["api_key"]);

    let pypi_deliveries = pypi.deliveries();
    assert_eq!(pypi_deliveries.len(), 1);
    assert_eq!(
        pypi_deliveries[0].artifacts,
        vec![harness.path("dist/cifra-1.2.tar.gz")]
    );

    let report: RunReport = serde_json::from_str(
        &std::fs::read_to_string(harness.path("reports/last-run.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.run_id, run.run_id);
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(harness.notifier.reports().len(), 1);
}

#[tokio::test]
async fn package_build_failure_stops_tagging_and_release() {
    let Release {
        harness,
        github,
        pypi,
    } = release();
    let pipeline = PipelineConfig::from_yaml(&release_yaml("exit 1"))
        .unwrap()
        .to_pipeline()
        .unwrap();

    let run = harness.run(&pipeline, "staging").await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.exit_code(), 1);

    let (stage, failure) = run.first_failure().unwrap();
    assert_eq!(stage.stage, "packages");
    assert_eq!(failure.step, "build");
    assert_eq!(failure.index, 2);

    assert!(harness.path("postinst.version").exists());
    assert!(!harness.path("tag-v1.2").exists());
    assert!(github.deliveries().is_empty());

    assert!(matches!(
        run.stage("pypi").unwrap().outcome,
        StageOutcome::Skipped { .. }
    ));
    assert!(pypi.deliveries().is_empty());

    let reports = harness.notifier.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].exit_code, 1);
    assert!(harness.path("reports/last-run.json").exists());
    assert_eq!(
        std::fs::read_to_string(harness.path("notified.status")).unwrap(),
        "failed"
    );
}

#[tokio::test]
async fn feature_branch_push_is_ignored() {
    let Release {
        harness,
        github,
        pypi,
    } = release();
    let pipeline = PipelineConfig::from_yaml(&release_yaml(BUILD_OK))
        .unwrap()
        .to_pipeline()
        .unwrap();

    let run = harness.run(&pipeline, "feature-x").await;

    assert_eq!(run.status(), RunStatus::Rejected);
    assert!(run.stages.is_empty());
    assert!(!harness.path("merged").exists());
    assert!(!harness.path("reports/last-run.json").exists());
    assert!(github.deliveries().is_empty());
    assert!(pypi.deliveries().is_empty());
}
