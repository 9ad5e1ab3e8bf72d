use crate::stub_jobmanager::{
    shared_stub, StubJobManager, NOTIFICATION_SUBJECT, SEEDED_JOB_ID, STUB_AUTH_KEY,
};
use contract_replay::{
    provider_state_test, run_in_state, wait_for_message, Exchange, HttpClient, HyperHttpClient,
    Inbox, Method, PollPolicy, Request, StateRegistry,
};
use forum_services::{
    jobmanager::{self, Envelope},
    states::{forum_state_registry, AUTH_KEY, KNOWN_ID, KNOWN_JOB, STATE_JOB_EMAIL},
};
use futures::FutureExt;
use serde_json::Value;
use std::time::Duration;

async fn shared_registry() -> StateRegistry {
    forum_state_registry(shared_stub().job_manager_client(), STUB_AUTH_KEY).unwrap()
}

fn quick() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(20), 50)
}

fn known_id(exchange: &Exchange) -> i64 {
    exchange.stashed(KNOWN_ID).unwrap().parse().unwrap()
}

async fn call(base_url: &str, request: Request) -> Envelope<Value> {
    HyperHttpClient::new()
        .make_request(base_url, &request)
        .await
        .unwrap()
        .json()
        .unwrap()
}

#[provider_state_test("a job with a known id exists", shared_registry)]
async fn known_job_is_visible_through_status(exchange: &mut Exchange) {
    let id = known_id(exchange);

    let job = shared_stub()
        .job_manager_client()
        .job_status(id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.email, STATE_JOB_EMAIL);
    assert!(job.notify);
    assert_eq!(exchange.stashed(AUTH_KEY), Some(STUB_AUTH_KEY));
}

#[provider_state_test("a job with a known id exists", shared_registry)]
async fn progress_updates_mark_the_job_active(exchange: &mut Exchange) {
    let stub = shared_stub();
    let id = known_id(exchange);

    let updated = call(stub.base_url(), jobmanager::update(id, 50)).await;
    assert!(updated.is_success());

    let job = stub
        .job_manager_client()
        .wait_for_job_status(id, "Active", quick())
        .await
        .unwrap();
    assert_eq!(job.percentage, 50);
}

#[provider_state_test("a job with a known id exists", shared_registry)]
async fn out_of_range_percentages_are_refused(exchange: &mut Exchange) {
    let refused = call(shared_stub().base_url(), jobmanager::update(known_id(exchange), 150)).await;

    assert!(!refused.is_success());
    assert_eq!(refused.message.as_deref(), Some("Percentage not between 0 and 100"));
}

#[provider_state_test("a job with a known id exists", shared_registry)]
async fn missing_parameters_are_listed(exchange: &mut Exchange) {
    let base_url = shared_stub().base_url();

    let request = Request::new(Method::Get, "/delete").with_query("id", known_id(exchange).to_string());
    let refused = call(base_url, request).await;
    assert_eq!(refused.message.as_deref(), Some("Missing required parameters: ['message']"));

    let refused = call(base_url, Request::new(Method::Get, "/delete")).await;
    assert_eq!(
        refused.message.as_deref(),
        Some("Missing required parameters: ['id', 'message']")
    );
}

#[provider_state_test("a job with a known id exists", shared_registry)]
async fn purging_needs_the_auth_key(exchange: &mut Exchange) {
    let refused = call(shared_stub().base_url(), jobmanager::purge(known_id(exchange), "not-the-key")).await;

    assert_eq!(refused.message.as_deref(), Some("Invalid auth_key provided"));
}

#[test]
fn state_teardown_runs_when_the_body_panics() {
    let stub = StubJobManager::start();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.block_on(async {
            let registry = forum_state_registry(stub.job_manager_client(), STUB_AUTH_KEY).unwrap();
            run_in_state(&registry, KNOWN_JOB, |exchange| {
                async move {
                    assert!(exchange.stashed(KNOWN_ID).is_none(), "deliberate failure");
                }
                .boxed_local()
            })
            .await
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(stub.job_ids(), vec![SEEDED_JOB_ID]);
}

#[tokio::test]
async fn completing_a_notified_job_sends_an_email() {
    let stub = StubJobManager::start();
    let registry = forum_state_registry(stub.job_manager_client(), STUB_AUTH_KEY).unwrap();
    let base_url = stub.base_url().to_string();
    let inbox = stub.inbox();

    run_in_state(&registry, KNOWN_JOB, move |exchange| {
        async move {
            let id = known_id(exchange);
            let completed = call(&base_url, jobmanager::completed(id, "Job completed")).await;
            assert!(completed.is_success());

            let message = wait_for_message(&inbox, STATE_JOB_EMAIL, quick()).await.unwrap();
            assert_eq!(message.subject, NOTIFICATION_SUBJECT);
            assert!(message.body.contains(&id.to_string()));
            assert!(message.body.contains("Job completed"));
        }
        .boxed_local()
    })
    .await
    .unwrap();

    assert_eq!(stub.inbox().delete_all(STATE_JOB_EMAIL).await.unwrap(), 1);
}
