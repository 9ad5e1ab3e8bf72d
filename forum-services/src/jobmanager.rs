//! The forum job manager: request builders and a small client on top of them.
//!
//! Every endpoint is a GET taking its arguments as query parameters and answers HTTP 200
//! with a `{"status": "Success" | "Failure", ...}` envelope.

use contract_replay::{wait_until, Error, HttpClient, Method, PollPolicy, Request, ResponseData};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub const SUCCESS: &str = "Success";
pub const FAILURE: &str = "Failure";

const NOT_FOUND_MESSAGE: &str = "Unable to find job(s)";

fn get<S: Into<String>>(path: S) -> Request {
    Request::new(Method::Get, path)
}

pub fn status<I: ToString>(id: I) -> Request {
    get("/status").with_query("id", id.to_string())
}

pub fn status_for_email(email: &str) -> Request {
    get("/status").with_query("email", email)
}

pub fn new_job(job: &NewJob) -> Request {
    get("/new")
        .with_query("email", job.email.as_str())
        .with_query("job_type", job.job_type.as_str())
        .with_query("notify", flag(job.notify))
}

pub fn purge<I: ToString>(id: I, auth_key: &str) -> Request {
    get("/purge")
        .with_query("id", id.to_string())
        .with_query("auth_key", auth_key)
}

pub fn delete<I: ToString>(id: I, message: &str) -> Request {
    get("/delete")
        .with_query("id", id.to_string())
        .with_query("message", message)
}

pub fn update<I: ToString>(id: I, percentage: u32) -> Request {
    get("/update")
        .with_query("id", id.to_string())
        .with_query("percentage", percentage.to_string())
}

pub fn completed<I: ToString>(id: I, message: &str) -> Request {
    get("/completed")
        .with_query("id", id.to_string())
        .with_query("message", message)
}

pub fn error<I: ToString>(id: I, message: &str) -> Request {
    get("/error")
        .with_query("id", id.to_string())
        .with_query("message", message)
}

pub fn flip_notify<I: ToString>(id: I, notify: bool) -> Request {
    get("/flip_notify")
        .with_query("id", id.to_string())
        .with_query("notify", flag(notify))
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Arguments of `/new`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NewJob {
    pub email: String,
    pub job_type: String,
    pub notify: bool,
}

impl NewJob {
    pub fn new<S1: Into<String>, S2: Into<String>>(email: S1, job_type: S2, notify: bool) -> Self {
        Self {
            email: email.into(),
            job_type: job_type.into(),
            notify,
        }
    }
}

/// The response envelope shared by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS
    }

    pub fn into_data(self) -> Result<T, Error> {
        if !self.is_success() {
            return Err(Error::ServiceFailure(
                self.message.unwrap_or(self.status),
            ));
        }

        self.data
            .ok_or_else(|| Error::ServiceFailure(String::from("successful response without data")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedJob {
    pub job_id: i64,
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    pub id: i64,
    pub status: String,
    pub message: String,
    pub job_type: String,
    pub email: String,
    pub notify: bool,
    pub percentage: u32,
    pub submitted: String,
    pub last_updated: String,
}

/// Reads the id out of a `/new` response.
pub fn parse_job_id(response: &ResponseData) -> Result<i64, Error> {
    let envelope: Envelope<CreatedJob> = response.json()?;
    Ok(envelope.into_data()?.job_id)
}

#[derive(Clone)]
pub struct JobManagerClient {
    http: Arc<dyn HttpClient + Send + Sync>,
    base_url: String,
}

impl fmt::Debug for JobManagerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManagerClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl JobManagerClient {
    pub fn new<S: Into<String>>(http: Arc<dyn HttpClient + Send + Sync>, base_url: S) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends any job-manager request and reads the envelope, whatever its status.
    pub async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<Envelope<T>, Error> {
        let response = self
            .http
            .make_request(&self.base_url, request)
            .await?
            .error_for_status()?;

        response.json()
    }

    pub async fn create_job(&self, job: &NewJob) -> Result<i64, Error> {
        let created: Envelope<CreatedJob> = self.call(&new_job(job)).await?;
        let id = created.into_data()?.job_id;

        tracing::debug!(job_id = id, job_type = %job.job_type, "created job");
        Ok(id)
    }

    pub async fn purge_job(&self, id: i64, auth_key: &str) -> Result<(), Error> {
        let purged: Envelope<serde_json::Value> = self.call(&purge(id, auth_key)).await?;
        if !purged.is_success() {
            return Err(Error::ServiceFailure(format!(
                "purging job {} failed: {}",
                id,
                purged.message.unwrap_or(purged.status)
            )));
        }

        tracing::debug!(job_id = id, "purged job");
        Ok(())
    }

    /// `None` when the job manager does not know the job.
    pub async fn job_status(&self, id: i64) -> Result<Option<JobRecord>, Error> {
        let jobs = self.jobs(&status(id)).await?;
        Ok(jobs.into_iter().find(|job| job.id == id))
    }

    pub async fn jobs_for_email(&self, email: &str) -> Result<Vec<JobRecord>, Error> {
        self.jobs(&status_for_email(email)).await
    }

    async fn jobs(&self, request: &Request) -> Result<Vec<JobRecord>, Error> {
        let envelope: Envelope<Vec<JobRecord>> = self.call(request).await?;

        if envelope.status == FAILURE && envelope.message.as_deref() == Some(NOT_FOUND_MESSAGE) {
            return Ok(Vec::new());
        }

        envelope.into_data()
    }

    /// Polls `/status` until the job reports `wanted`.
    pub async fn wait_for_job_status(
        &self,
        id: i64,
        wanted: &str,
        policy: PollPolicy,
    ) -> Result<JobRecord, Error> {
        let what = format!("job {} to reach status {}", id, wanted);

        wait_until(policy, &what, move || async move {
            Ok(self
                .job_status(id)
                .await?
                .filter(|job| job.status == wanted))
        })
        .await
    }
}
