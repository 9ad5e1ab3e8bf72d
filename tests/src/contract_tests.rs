use crate::stub_jobmanager::{StubJobManager, SEEDED_JOB_ID, STUB_AUTH_KEY, STUB_MAILINATOR_TOKEN};
use contract_replay::{
    BodyMatcher, Cancellation, CaseStatus, Environment, ExpectedResponse, FailureKind, HttpClient,
    HyperHttpClient, Inbox, Interaction, LoggingHttpClient, ReplayConfiguration, ReplayExecutor, Reporter,
    Settings,
};
use forum_services::{
    config::{IIIF, SECRETS, SERVICES},
    functional::{self, COMPLETION_INBOX},
    iiif::INFO_JSON,
    interactions::jobmanager_interactions,
    jobmanager,
    runner::{self, RunOptions, Suite},
    states::{forum_state_registry, KNOWN_ID, KNOWN_JOB},
};
use serde_json::json;
use std::{collections::BTreeMap, net::TcpListener, sync::Arc};

fn settings_for(stub: &StubJobManager) -> Settings {
    let vars = [
        ("DIRECT_SERVICE", stub.base_url().to_string()),
        ("JOBMANAGER_AUTH_KEY", STUB_AUTH_KEY.to_string()),
        ("MAILINATOR_TOKEN", STUB_MAILINATOR_TOKEN.to_string()),
    ]
    .into_iter()
    .collect::<BTreeMap<_, _>>();

    Settings::load(Some(Environment::Stage), None, SERVICES, SECRETS, |name| {
        vars.get(name).cloned()
    })
    .unwrap()
}

fn http() -> Arc<dyn HttpClient + Send + Sync> {
    Arc::new(LoggingHttpClient::new(HyperHttpClient::new()))
}

fn executor(stub: &StubJobManager, provider_base_url: &str) -> ReplayExecutor {
    let registry = forum_state_registry(stub.job_manager_client(), STUB_AUTH_KEY).unwrap();
    let mut configuration = ReplayConfiguration::new(provider_base_url);
    configuration.set_environment(Environment::Stage);
    configuration.set_http_client(http());

    ReplayExecutor::new(configuration, Arc::new(registry))
}

/// A local address nothing listens on.
fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", address)
}

#[tokio::test]
async fn every_contract_passes_and_no_job_is_left_behind() {
    let stub = StubJobManager::start();
    let options = RunOptions {
        suite: Suite::All,
        parallelism: 4,
        ..RunOptions::default()
    };

    let report = runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();

    let failed = report
        .results()
        .filter(|result| result.is_failed())
        .map(|result| format!("{}: {:?}", result.description, result.failure))
        .collect::<Vec<_>>();
    assert!(failed.is_empty(), "{:#?}", failed);
    assert_eq!(report.total(), 10 + functional::check_count());
    assert_eq!(report.passed(), report.total());
    assert_eq!(stub.job_ids(), vec![SEEDED_JOB_ID]);
}

#[tokio::test]
async fn functional_checks_read_the_completion_email() {
    let stub = StubJobManager::start();
    let options = RunOptions {
        suite: Suite::Functional,
        ..RunOptions::default()
    };

    let report = runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();

    assert_eq!(report.total(), functional::check_count());
    assert!(report.is_success(), "{:#?}", report.results().collect::<Vec<_>>());
    assert_eq!(stub.job_ids(), vec![SEEDED_JOB_ID]);
    let mailinator_reads = stub
        .requests()
        .into_iter()
        .filter(|request| request.path.starts_with("/api/v2/domains/public/"))
        .collect::<Vec<_>>();
    assert!(!mailinator_reads.is_empty());
    assert!(mailinator_reads
        .iter()
        .all(|request| request.query.get("token").map(String::as_str) == Some(STUB_MAILINATOR_TOKEN)));
    assert!(stub.inbox().latest_message(COMPLETION_INBOX).await.unwrap().is_none());
}

#[tokio::test]
async fn info_json_naming_another_record_fails_the_iiif_suite() {
    let stub = StubJobManager::start();
    stub.misreport_iiif_identifier("2020%2F01%2F01%2F00%2Fsomething-else");
    let options = RunOptions {
        suite: Suite::Iiif,
        ..RunOptions::default()
    };

    let report = runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();

    assert_eq!(report.suites[0].name, IIIF);
    assert_eq!(report.failures(), 1);
    let failed = report.results().find(|result| result.is_failed()).unwrap();
    assert_eq!(failed.description, INFO_JSON);
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::AssertionMismatch);
    assert_eq!(failure.diff[0].path, "$.@id");
}

#[tokio::test]
async fn placeholders_reach_the_provider_resolved() {
    let stub = StubJobManager::start();
    let options = RunOptions {
        suite: Suite::Jobmanager,
        ..RunOptions::default()
    };

    runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();

    let update = stub
        .requests()
        .into_iter()
        .find(|request| request.path == "/update")
        .unwrap();
    let id = &update.query["id"];
    assert!(id.parse::<i64>().unwrap() >= 2000, "unexpected id {}", id);
    assert_eq!(update.query["percentage"], "50");
}

#[tokio::test]
async fn session_cookie_is_sent_on_replayed_requests_only() {
    let stub = StubJobManager::start();
    let options = RunOptions {
        suite: Suite::Jobmanager,
        session_cookie: Some("forum_session=abc123".to_string()),
        ..RunOptions::default()
    };

    runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();

    let requests = stub.requests();
    let cookie_of = |path: &str| {
        requests
            .iter()
            .filter(|request| request.path == path)
            .map(|request| request.cookie.clone())
            .collect::<Vec<_>>()
    };

    assert!(cookie_of("/update")
        .iter()
        .all(|cookie| cookie.as_deref() == Some("forum_session=abc123")));
    // /new is hit by state setups without the cookie and by one replay with it.
    let new_cookies = cookie_of("/new");
    assert!(new_cookies.contains(&None));
    assert!(new_cookies.contains(&Some("forum_session=abc123".to_string())));
}

#[tokio::test]
async fn assertion_failures_still_purge_the_state_job() {
    let stub = StubJobManager::start();
    let wrong_expectation = Interaction::new(
        "progress updates report failure",
        Some(KNOWN_JOB.to_string()),
        jobmanager::update(contract_replay::placeholder(KNOWN_ID), 50),
        ExpectedResponse::new(200).with_body(BodyMatcher::Exact(json!({ "status": "Failure" }))),
    );
    let reporter = Reporter::new();

    executor(&stub, stub.base_url())
        .verify_suite("jobmanager", &[wrong_expectation], &reporter, &Cancellation::never())
        .await
        .unwrap();

    let report = reporter.finalize();
    let result = report.results().next().unwrap();
    assert_eq!(result.status, CaseStatus::Failed);
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::AssertionMismatch);
    assert_eq!(failure.diff[0].path, "$.status");
    assert_eq!(stub.job_ids(), vec![SEEDED_JOB_ID]);
}

#[tokio::test]
async fn unreachable_providers_still_purge_the_state_job() {
    let stub = StubJobManager::start();
    let interactions = jobmanager_interactions()
        .unwrap()
        .into_iter()
        .filter(|interaction| interaction.provider_state() == Some(KNOWN_JOB))
        .collect::<Vec<_>>();
    let reporter = Reporter::new();

    executor(&stub, &closed_port())
        .verify_suite("jobmanager", &interactions, &reporter, &Cancellation::never())
        .await
        .unwrap();

    let report = reporter.finalize();
    assert_eq!(report.failures(), interactions.len());
    assert!(report.results().all(|result| {
        result.failure.as_ref().map(|failure| failure.kind) == Some(FailureKind::Transport)
    }));
    assert_eq!(stub.job_ids(), vec![SEEDED_JOB_ID]);
}

#[tokio::test]
async fn cancelled_runs_create_no_jobs() {
    let stub = StubJobManager::start();
    let (handle, cancellation) = contract_replay::cancellation();
    handle.cancel();

    let report = runner::run(
        &settings_for(&stub),
        &RunOptions::default(),
        http(),
        &cancellation,
    )
    .await
    .into_result()
    .unwrap();

    assert_eq!(report.skipped(), report.total());
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn junit_report_names_every_interaction() {
    let stub = StubJobManager::start();
    let options = RunOptions {
        suite: Suite::Jobmanager,
        ..RunOptions::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junit_reports").join("contract_results.xml");

    let report = runner::run(&settings_for(&stub), &options, http(), &Cancellation::never())
        .await
        .into_result()
        .unwrap();
    report.write_junit(&path).unwrap();

    let xml = std::fs::read_to_string(&path).unwrap();
    assert!(xml.contains(r#"<testsuite name="jobmanager" tests="8" failures="0""#));
    assert!(xml.contains(r#"name="a request to remove job permanently""#));
}
