use crate::jobmanager::{parse_job_id, JobManagerClient, NewJob};
use async_trait::async_trait;
use contract_replay::{Error, Exchange, ProviderState, StateRegistry};

pub const KNOWN_JOB: &str = "a job with a known id exists";
pub const KNOWN_JOB_NO_TEARDOWN: &str = "a job with a known id exists with no tear down";
pub const VALID_INPUT: &str = "jm_valid_input";

/// Stash keys, referenced from requests as `**known_id**` and `**auth_key**`.
pub const KNOWN_ID: &str = "known_id";
pub const AUTH_KEY: &str = "auth_key";

pub const STATE_JOB_EMAIL: &str = "fsrv@ithaka.org";
pub const STATE_JOB_TYPE: &str = "BulkExport";

/// Creates a job and stashes its id. Purges it again on teardown unless `tear_down` is off,
/// which is for interactions that delete the job themselves.
#[derive(Debug)]
pub struct KnownJobState {
    client: JobManagerClient,
    auth_key: String,
    tear_down: bool,
}

impl KnownJobState {
    pub fn new<S: Into<String>>(client: JobManagerClient, auth_key: S, tear_down: bool) -> Self {
        Self {
            client,
            auth_key: auth_key.into(),
            tear_down,
        }
    }
}

#[async_trait]
impl ProviderState for KnownJobState {
    async fn set_up(&self, exchange: &mut Exchange) -> Result<(), Error> {
        let id = self
            .client
            .create_job(&NewJob::new(STATE_JOB_EMAIL, STATE_JOB_TYPE, true))
            .await?;

        exchange.stash(KNOWN_ID, id);
        exchange.stash(AUTH_KEY, &self.auth_key);
        Ok(())
    }

    async fn tear_down(&self, exchange: &Exchange) -> Result<(), Error> {
        if !self.tear_down {
            return Ok(());
        }

        match exchange.stashed(KNOWN_ID) {
            Some(id) => self.client.purge_job(parse_id(id)?, &self.auth_key).await,
            None => Ok(()),
        }
    }
}

/// For interactions that create a job themselves: teardown purges the job named in the
/// captured response.
#[derive(Debug)]
pub struct CreatedJobState {
    client: JobManagerClient,
    auth_key: String,
}

impl CreatedJobState {
    pub fn new<S: Into<String>>(client: JobManagerClient, auth_key: S) -> Self {
        Self {
            client,
            auth_key: auth_key.into(),
        }
    }
}

#[async_trait]
impl ProviderState for CreatedJobState {
    async fn tear_down(&self, exchange: &Exchange) -> Result<(), Error> {
        let response = match exchange.response() {
            Some(response) => response,
            None => {
                tracing::debug!("no response captured, nothing to purge");
                return Ok(());
            }
        };

        let id = parse_job_id(response)?;
        self.client.purge_job(id, &self.auth_key).await
    }
}

fn parse_id(id: &str) -> Result<i64, Error> {
    id.parse()
        .map_err(|_| Error::Configuration(format!("stashed job id '{}' is not a number", id)))
}

/// Every job manager provider state.
pub fn forum_state_registry(client: JobManagerClient, auth_key: &str) -> Result<StateRegistry, Error> {
    let mut registry = StateRegistry::new();
    registry.register(KNOWN_JOB, KnownJobState::new(client.clone(), auth_key, true))?;
    registry.register(
        KNOWN_JOB_NO_TEARDOWN,
        KnownJobState::new(client.clone(), auth_key, false),
    )?;
    registry.register(VALID_INPUT, CreatedJobState::new(client, auth_key))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contract_replay::{HttpClient, Request, ResponseData};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recording {
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl HttpClient for Recording {
        async fn make_request(&self, _base_url: &str, request: &Request) -> Result<ResponseData, Error> {
            self.seen.lock().unwrap().push(request.clone());
            let body = match request.path.as_str() {
                "/new" => r#"{"status": "Success", "data": {"job_id": 2004}}"#,
                _ => r#"{"status": "Success"}"#,
            };
            Ok(ResponseData {
                status_code: 200,
                body: body.into(),
                ..ResponseData::default()
            })
        }
    }

    fn registry() -> (StateRegistry, Arc<Recording>) {
        let http = Arc::new(Recording::default());
        let client = JobManagerClient::new(http.clone(), "http://jobs");
        (forum_state_registry(client, "secret").unwrap(), http)
    }

    fn paths(http: &Recording) -> Vec<String> {
        http.seen
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.path_and_query())
            .collect()
    }

    fn state(registry: &StateRegistry, name: &str) -> Arc<dyn ProviderState> {
        match registry.lookup(Some(name)).unwrap() {
            contract_replay::StateLookup::Found(state) => state,
            contract_replay::StateLookup::NotFound => panic!("{} is not registered", name),
        }
    }

    #[tokio::test]
    async fn known_job_is_created_then_purged() {
        let (registry, http) = registry();
        let known_job = state(&registry, KNOWN_JOB);
        let mut exchange = Exchange::default();

        known_job.set_up(&mut exchange).await.unwrap();
        assert_eq!(exchange.stashed(KNOWN_ID), Some("2004"));
        assert_eq!(exchange.stashed(AUTH_KEY), Some("secret"));

        known_job.tear_down(&exchange).await.unwrap();
        assert_eq!(
            paths(&http),
            vec![
                "/new?email=fsrv%40ithaka.org&job_type=BulkExport&notify=true".to_string(),
                "/purge?id=2004&auth_key=secret".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn no_tear_down_leaves_the_job_alone() {
        let (registry, http) = registry();
        let known_job = state(&registry, KNOWN_JOB_NO_TEARDOWN);
        let mut exchange = Exchange::default();

        known_job.set_up(&mut exchange).await.unwrap();
        known_job.tear_down(&exchange).await.unwrap();

        assert_eq!(paths(&http).len(), 1);
    }

    #[tokio::test]
    async fn created_jobs_are_purged_from_the_captured_response() {
        let (registry, http) = registry();
        let valid_input = state(&registry, VALID_INPUT);
        let mut exchange = Exchange::default();

        valid_input.set_up(&mut exchange).await.unwrap();
        valid_input.tear_down(&exchange).await.unwrap();
        assert!(paths(&http).is_empty());

        exchange.set_response(ResponseData {
            status_code: 200,
            body: r#"{"status": "Success", "data": {"job_id": 31}}"#.into(),
            ..ResponseData::default()
        });
        valid_input.tear_down(&exchange).await.unwrap();
        assert_eq!(paths(&http), vec!["/purge?id=31&auth_key=secret".to_string()]);
    }
}
