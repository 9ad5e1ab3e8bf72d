//! Functional checks of the job manager beyond its contract: the failure message of each
//! endpoint, the state a job ends up in, and the email a completed job sends.
//!
//! Every job a check creates is purged once the check is over, even when it panicked.

use crate::jobmanager::{self, Envelope, JobManagerClient, JobRecord, NewJob, FAILURE, SUCCESS};
use contract_replay::{
    panic_message, wait_for_message, Cancellation, Error, Failure, Inbox, Method, Mismatch,
    PollPolicy, ReplayPhase, Reporter, Request, VerificationResult,
};
use futures::FutureExt;
use serde_json::Value;
use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Instant};

pub const SUITE: &str = "jobmanager-functional";

/// The Mailinator address completion emails are sent to.
pub const COMPLETION_INBOX: &str = "fsrv_jobmanager_completed@mailinator.com";
pub const NOTIFICATION_SUBJECT: &str = "Your Forum media files are ready";

const QUIET_EMAIL: &str = "fsrv_not_existed@mailinator.com";
const JOB_TYPE: &str = "OAI";
const UNKNOWN_JOB: i64 = -1;
const BAD_JOB_ID: &str = "Unable to update database - bad job id?";
const NOT_FOUND: &str = "Unable to find job(s)";
const DELETE_MESSAGE: &str = "Job no more required, please delete";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Check {
    UnknownJobStatus,
    CreatedJobIsVisible,
    NewListsMissingParameters,
    PurgeRemovesJob,
    PurgeNeedsAuthKey,
    PurgeUnknownJob,
    DeleteMarksJobDeleted,
    UpdateMarksJobActive,
    UpdateRefusesPercentage,
    CompletionSendsEmail,
}

const CHECKS: &[Check] = &[
    Check::UnknownJobStatus,
    Check::CreatedJobIsVisible,
    Check::NewListsMissingParameters,
    Check::PurgeRemovesJob,
    Check::PurgeNeedsAuthKey,
    Check::PurgeUnknownJob,
    Check::DeleteMarksJobDeleted,
    Check::UpdateMarksJobActive,
    Check::UpdateRefusesPercentage,
    Check::CompletionSendsEmail,
];

impl Check {
    fn description(self) -> &'static str {
        match self {
            Check::UnknownJobStatus => "status of an unknown job is a failure",
            Check::CreatedJobIsVisible => "a created job is visible through status",
            Check::NewListsMissingParameters => "creating a job without parameters lists them all",
            Check::PurgeRemovesJob => "purging removes the job",
            Check::PurgeNeedsAuthKey => "purging with a wrong auth key is refused",
            Check::PurgeUnknownJob => "purging an unknown job is refused",
            Check::DeleteMarksJobDeleted => "deleting marks the job deleted",
            Check::UpdateMarksJobActive => "progress updates mark the job active",
            Check::UpdateRefusesPercentage => "out of range percentages are refused",
            Check::CompletionSendsEmail => "completing a notified job sends an email",
        }
    }
}

/// How many checks [`FunctionalSuite::run`] records.
pub fn check_count() -> usize {
    CHECKS.len()
}

pub struct FunctionalSuite {
    client: JobManagerClient,
    inbox: Arc<dyn Inbox>,
    auth_key: String,
    job_poll: PollPolicy,
    mail_poll: PollPolicy,
}

impl fmt::Debug for FunctionalSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionalSuite")
            .field("client", &self.client)
            .field("job_poll", &self.job_poll)
            .field("mail_poll", &self.mail_poll)
            .finish()
    }
}

impl FunctionalSuite {
    pub fn new<S: Into<String>>(client: JobManagerClient, inbox: Arc<dyn Inbox>, auth_key: S) -> Self {
        Self {
            client,
            inbox,
            auth_key: auth_key.into(),
            job_poll: PollPolicy::job_status(),
            mail_poll: PollPolicy::email(),
        }
    }

    pub fn set_poll_policies(&mut self, job_poll: PollPolicy, mail_poll: PollPolicy) {
        self.job_poll = job_poll;
        self.mail_poll = mail_poll;
    }

    /// Runs every check in order and records one result per check under [`SUITE`].
    pub async fn run(&self, reporter: &Reporter, cancellation: &Cancellation) {
        tracing::info!(suite = SUITE, checks = CHECKS.len(), base_url = self.client.base_url(), "running functional checks");

        for check in CHECKS {
            let result = self.run_one(*check, cancellation).await;
            reporter.record(SUITE, result);
        }
    }

    async fn run_one(&self, check: Check, cancellation: &Cancellation) -> VerificationResult {
        let description = check.description();
        if cancellation.is_cancelled() {
            tracing::info!(check = description, "skipped, the run was cancelled");
            return VerificationResult::skipped(description);
        }

        let started = Instant::now();
        let mut created = Vec::new();
        let outcome = tokio::select! {
            outcome = AssertUnwindSafe(self.run_check(check, &mut created)).catch_unwind() => {
                outcome.unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))))
            }
            _ = cancellation.cancelled() => Err(Error::Cancelled),
        };

        for id in created {
            if let Err(e) = self.client.purge_job(id, &self.auth_key).await {
                tracing::warn!(check = description, job_id = id, error = %e, "could not purge job");
            }
        }

        let duration = started.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!(check = description, "passed");
                VerificationResult::passed(description, duration)
            }
            Err(e) => {
                tracing::warn!(check = description, error = %e, "failed");
                let phase = match e {
                    Error::AssertionMismatch(_) => ReplayPhase::Asserting,
                    _ => ReplayPhase::Dispatching,
                };
                VerificationResult::failed(description, duration, Failure::from_error(&e, phase, String::new()))
            }
        }
    }

    async fn create(&self, created: &mut Vec<i64>, email: &str, notify: bool) -> Result<i64, Error> {
        let id = self
            .client
            .create_job(&NewJob::new(email, JOB_TYPE, notify))
            .await?;
        created.push(id);
        Ok(id)
    }

    async fn known_job(&self, id: i64) -> Result<JobRecord, Error> {
        self.client.job_status(id).await?.ok_or_else(|| {
            Error::AssertionMismatch(vec![Mismatch::new("$.data", format!("job {}", id), "<absent>")])
        })
    }

    async fn run_check(&self, check: Check, created: &mut Vec<i64>) -> Result<(), Error> {
        match check {
            Check::UnknownJobStatus => {
                let envelope = self.client.call::<Value>(&jobmanager::status(UNKNOWN_JOB)).await?;
                expect_failure(&envelope, NOT_FOUND)
            }
            Check::CreatedJobIsVisible => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let job = self.known_job(id).await?;
                expect_eq("$.data[0].email", QUIET_EMAIL, job.email.as_str())?;
                expect_eq("$.data[0].job_type", JOB_TYPE, job.job_type.as_str())?;
                expect_eq("$.data[0].notify", false, job.notify)
            }
            Check::NewListsMissingParameters => {
                let envelope = self
                    .client
                    .call::<Value>(&Request::new(Method::Get, "/new"))
                    .await?;
                expect_failure(&envelope, "Missing required parameters: ['email', 'job_type', 'notify']")
            }
            Check::PurgeRemovesJob => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let envelope = self
                    .client
                    .call::<Value>(&jobmanager::purge(id, &self.auth_key))
                    .await?;
                expect_success(&envelope)?;
                created.retain(|created| *created != id);

                let remaining = self.client.job_status(id).await?.map(|job| job.id);
                expect_eq("$.data", None, remaining)
            }
            Check::PurgeNeedsAuthKey => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let envelope = self
                    .client
                    .call::<Value>(&jobmanager::purge(id, "invalid_key"))
                    .await?;
                expect_failure(&envelope, "Invalid auth_key provided")
            }
            Check::PurgeUnknownJob => {
                let envelope = self
                    .client
                    .call::<Value>(&jobmanager::purge(UNKNOWN_JOB, &self.auth_key))
                    .await?;
                expect_failure(&envelope, BAD_JOB_ID)
            }
            Check::DeleteMarksJobDeleted => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let envelope = self
                    .client
                    .call::<Value>(&jobmanager::delete(id, DELETE_MESSAGE))
                    .await?;
                expect_success(&envelope)?;

                let job = self.known_job(id).await?;
                expect_eq("$.data[0].status", "Deleted", job.status.as_str())?;
                expect_eq("$.data[0].message", DELETE_MESSAGE, job.message.as_str())
            }
            Check::UpdateMarksJobActive => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let envelope = self.client.call::<Value>(&jobmanager::update(id, 50)).await?;
                expect_success(&envelope)?;

                let job = self.client.wait_for_job_status(id, "Active", self.job_poll).await?;
                expect_eq("$.data[0].percentage", 50, job.percentage)
            }
            Check::UpdateRefusesPercentage => {
                let id = self.create(created, QUIET_EMAIL, false).await?;
                let envelope = self.client.call::<Value>(&jobmanager::update(id, 150)).await?;
                expect_failure(&envelope, "Percentage not between 0 and 100")
            }
            Check::CompletionSendsEmail => self.completion_sends_email(created).await,
        }
    }

    async fn completion_sends_email(&self, created: &mut Vec<i64>) -> Result<(), Error> {
        self.inbox.delete_all(COMPLETION_INBOX).await?;

        let id = self.create(created, COMPLETION_INBOX, true).await?;
        let message = format!("Job ID: {} Completed with No Errors", id);
        let envelope = self
            .client
            .call::<Value>(&jobmanager::completed(id, &message))
            .await?;
        expect_success(&envelope)?;

        let job = self
            .client
            .wait_for_job_status(id, "Completed", self.job_poll)
            .await?;
        expect_eq("$.data[0].message", message.as_str(), job.message.as_str())?;
        expect_eq("$.data[0].percentage", 100, job.percentage)?;

        let mail = wait_for_message(self.inbox.as_ref(), COMPLETION_INBOX, self.mail_poll).await?;
        self.inbox.delete_all(COMPLETION_INBOX).await?;

        expect_eq("email.subject", NOTIFICATION_SUBJECT, mail.subject.as_str())?;
        if !mail.body.contains(&message) {
            return Err(Error::AssertionMismatch(vec![Mismatch::new(
                "email.body",
                format!("text containing {:?}", message),
                mail.body,
            )]));
        }
        Ok(())
    }
}

fn expect_eq<T: PartialEq + fmt::Debug>(path: &str, expected: T, actual: T) -> Result<(), Error> {
    if expected == actual {
        return Ok(());
    }

    Err(Error::AssertionMismatch(vec![Mismatch::new(
        path,
        format!("{:?}", expected),
        format!("{:?}", actual),
    )]))
}

fn expect_success(envelope: &Envelope<Value>) -> Result<(), Error> {
    expect_eq("$.status", SUCCESS, envelope.status.as_str())
}

fn expect_failure(envelope: &Envelope<Value>, message: &str) -> Result<(), Error> {
    expect_eq("$.status", FAILURE, envelope.status.as_str())?;
    expect_eq("$.message", Some(message), envelope.message.as_deref())
}
