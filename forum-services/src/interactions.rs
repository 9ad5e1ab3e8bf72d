use crate::{
    jobmanager::{self, NewJob},
    states::{AUTH_KEY, KNOWN_ID, KNOWN_JOB, KNOWN_JOB_NO_TEARDOWN, VALID_INPUT},
};
use contract_replay::{placeholder, BodyMatcher, Error, ExpectedResponse, Interaction, Request};
use serde_json::json;

pub const CONSUMER: &str = "forum-ui";
pub const PROVIDER: &str = "forum-jobmanager-service";

pub const NEW_JOB_EMAIL: &str = "contract-tests@example.org";

fn success() -> ExpectedResponse {
    ExpectedResponse::new(200).with_body(BodyMatcher::Exact(json!({ "status": "Success" })))
}

fn on_known_job(description: &str, provider_state: &str, request: Request) -> Interaction {
    Interaction::new(description, Some(provider_state.to_string()), request, success())
}

/// The job manager contract as the forum UI relies on it.
pub fn jobmanager_interactions() -> Result<Vec<Interaction>, Error> {
    let known_id = placeholder(KNOWN_ID);
    let auth_key = placeholder(AUTH_KEY);

    let status = Interaction::builder("valid id")
        .request("GET", "/status", [("id", "1")])
        .will_respond_with(ExpectedResponse::new(200).with_body(BodyMatcher::Like(json!({
            "status": "Success",
            "data": [{
                "status": "Completed",
                "last_updated": "12/13/2014 20:15",
                "message": "Job completed",
                "job_type": "OAI",
                "submitted": "12/13/2014 20:10",
                "email": "someone@example.org",
                "notify": true,
                "percentage": 100,
                "id": 1
            }]
        }))))
        .build()?;

    let new_job = Interaction::new(
        VALID_INPUT,
        Some(VALID_INPUT.to_string()),
        jobmanager::new_job(&NewJob::new(NEW_JOB_EMAIL, "OAI", true)),
        ExpectedResponse::new(200).with_body(BodyMatcher::Like(json!({
            "status": "Success",
            "data": { "job_id": 2004 }
        }))),
    );

    Ok(vec![
        status,
        new_job,
        on_known_job(
            "a request to remove job permanently",
            KNOWN_JOB_NO_TEARDOWN,
            jobmanager::purge(&known_id, &auth_key),
        ),
        on_known_job(
            "a request to set deleted status of job",
            KNOWN_JOB,
            jobmanager::delete(&known_id, "Problem with processing"),
        ),
        on_known_job(
            "a request to update the progress of job",
            KNOWN_JOB,
            jobmanager::update(&known_id, 50),
        ),
        on_known_job(
            "mark job status as completed",
            KNOWN_JOB,
            jobmanager::completed(&known_id, "Job completed"),
        ),
        on_known_job(
            "mark job status as failure",
            KNOWN_JOB,
            jobmanager::error(&known_id, "Problem with processing"),
        ),
        on_known_job(
            "a request to update the notification status",
            KNOWN_JOB,
            jobmanager::flip_notify(&known_id, false),
        ),
    ])
}
