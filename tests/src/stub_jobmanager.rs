//! An in-memory job manager served by hyper on a local port, together with the two IIIF
//! routes and the slice of the Mailinator v2 API the notification checks read.
//!
//! The job manager answers the way the real service does: always HTTP 200, with a
//! `{"status": "Success" | "Failure", ...}` envelope.

use async_trait::async_trait;
use contract_replay::{Error, HyperHttpClient, Inbox, MailMessage};
use forum_services::jobmanager::{JobManagerClient, JobRecord};
use hyper::{
    header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, COOKIE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    convert::Infallible,
    net::SocketAddr,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread,
};
use tokio::{runtime::Runtime, sync::oneshot};
use url::form_urlencoded;

pub const STUB_AUTH_KEY: &str = "stub-auth-key";
pub const STUB_MAILINATOR_TOKEN: &str = "stub-mailinator-token";
pub const SEEDED_JOB_ID: i64 = 1;
pub const NOTIFICATION_SUBJECT: &str = "Your Forum media files are ready";

const FIRST_NEW_ID: i64 = 2000;
const TIMESTAMP: &str = "12/13/2014 20:15";
const IIIF_PREFIX: &str = "/iiif/fpx/";
const INBOXES_PREFIX: &str = "/api/v2/domains/public/inboxes/";
const MESSAGES_PREFIX: &str = "/api/v2/domains/public/messages/";

lazy_static! {
    static ref SHARED: StubJobManager = StubJobManager::start();
}

/// One stub for the whole test binary, for tests that only touch their own jobs.
pub fn shared_stub() -> &'static StubJobManager {
    &SHARED
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub cookie: Option<String>,
}

#[derive(Debug)]
struct Mail {
    to: String,
    message: MailMessage,
}

#[derive(Debug)]
struct JobStore {
    jobs: BTreeMap<i64, JobRecord>,
    next_id: i64,
    mails: Vec<Mail>,
    next_mail: usize,
    requests: Vec<RecordedRequest>,
    iiif_identifier: Option<String>,
}

impl Default for JobStore {
    fn default() -> Self {
        let mut jobs = BTreeMap::new();
        jobs.insert(
            SEEDED_JOB_ID,
            JobRecord {
                id: SEEDED_JOB_ID,
                status: "Completed".to_string(),
                message: "Job completed".to_string(),
                job_type: "OAI".to_string(),
                email: "seed@example.org".to_string(),
                notify: false,
                percentage: 100,
                submitted: TIMESTAMP.to_string(),
                last_updated: TIMESTAMP.to_string(),
            },
        );

        Self {
            jobs,
            next_id: FIRST_NEW_ID,
            mails: Vec::new(),
            next_mail: 0,
            requests: Vec::new(),
            iiif_identifier: None,
        }
    }
}

type Params = BTreeMap<String, String>;

fn success() -> Value {
    json!({ "status": "Success" })
}

fn failure(message: &str) -> Value {
    json!({ "status": "Failure", "message": message })
}

fn bad_job_id() -> Value {
    failure("Unable to update database - bad job id?")
}

/// The values of `names`, or the failure naming every missing one.
fn require<'a>(params: &'a Params, names: &[&str]) -> Result<Vec<&'a str>, Value> {
    let missing = names
        .iter()
        .filter(|name| params.get(**name).map_or(true, |value| value.is_empty()))
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(failure(&format!(
            "Missing required parameters: [{}]",
            missing.join(", ")
        )));
    }

    Ok(names.iter().map(|name| params[*name].as_str()).collect())
}

fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

impl JobStore {
    fn job_mut(&mut self, id: &str) -> Result<&mut JobRecord, Value> {
        let job = match id.parse::<i64>() {
            Ok(id) => self.jobs.get_mut(&id),
            Err(_) => None,
        };
        job.ok_or_else(bad_job_id)
    }

    fn route(&mut self, path: &str, params: &Params) -> Result<Value, Value> {
        match path {
            "/status" => self.status(params),
            "/new" => self.new_job(params),
            "/purge" => self.purge(params),
            "/delete" => self.set_status(params, "message", "Deleted"),
            "/completed" => self.finish(params, "Completed"),
            "/error" => self.finish(params, "Error"),
            "/update" => self.update(params),
            "/flip_notify" => self.flip_notify(params),
            _ => Err(failure("Unknown endpoint")),
        }
    }

    fn status(&self, params: &Params) -> Result<Value, Value> {
        let jobs = match (params.get("id"), params.get("email")) {
            (Some(id), _) => id
                .parse::<i64>()
                .ok()
                .and_then(|id| self.jobs.get(&id))
                .into_iter()
                .cloned()
                .collect::<Vec<_>>(),
            (None, Some(email)) => self
                .jobs
                .values()
                .filter(|job| &job.email == email)
                .cloned()
                .collect(),
            (None, None) => return Err(failure("Missing required parameters: ['id']")),
        };

        if jobs.is_empty() {
            return Err(failure("Unable to find job(s)"));
        }
        Ok(json!({ "status": "Success", "data": jobs }))
    }

    fn new_job(&mut self, params: &Params) -> Result<Value, Value> {
        let values = require(params, &["email", "job_type", "notify"])?;
        let id = self.next_id;
        self.next_id += 1;

        self.jobs.insert(
            id,
            JobRecord {
                id,
                status: "Submitted".to_string(),
                message: String::new(),
                job_type: values[1].to_string(),
                email: values[0].to_string(),
                notify: truthy(values[2]),
                percentage: 0,
                submitted: TIMESTAMP.to_string(),
                last_updated: TIMESTAMP.to_string(),
            },
        );

        Ok(json!({ "status": "Success", "data": { "job_id": id } }))
    }

    fn purge(&mut self, params: &Params) -> Result<Value, Value> {
        let values = require(params, &["id", "auth_key"])?;
        if values[1] != STUB_AUTH_KEY {
            return Err(failure("Invalid auth_key provided"));
        }

        let id = values[0].parse::<i64>().map_err(|_| bad_job_id())?;
        self.jobs.remove(&id).map(|_| success()).ok_or_else(bad_job_id)
    }

    fn set_status(&mut self, params: &Params, argument: &str, status: &str) -> Result<Value, Value> {
        let values = require(params, &["id", argument])?;
        let job = self.job_mut(values[0])?;
        job.status = status.to_string();
        job.message = values[1].to_string();
        Ok(success())
    }

    fn finish(&mut self, params: &Params, status: &str) -> Result<Value, Value> {
        self.set_status(params, "message", status)?;

        let job = self.job_mut(&params["id"])?;
        if status == "Completed" {
            job.percentage = 100;
        }
        let job = job.clone();
        if job.notify {
            self.next_mail += 1;
            self.mails.push(Mail {
                to: job.email.clone(),
                message: MailMessage {
                    id: format!("mail-{}", self.next_mail),
                    subject: NOTIFICATION_SUBJECT.to_string(),
                    from: "forum@example.org".to_string(),
                    body: format!("Job {}: {}", job.id, job.message),
                },
            });
        }
        Ok(success())
    }

    fn update(&mut self, params: &Params) -> Result<Value, Value> {
        let values = require(params, &["id", "percentage"])?;
        let percentage = values[1]
            .parse::<u32>()
            .ok()
            .filter(|percentage| *percentage <= 100)
            .ok_or_else(|| failure("Percentage not between 0 and 100"))?;

        let job = self.job_mut(values[0])?;
        job.status = "Active".to_string();
        job.percentage = percentage;
        Ok(success())
    }

    fn flip_notify(&mut self, params: &Params) -> Result<Value, Value> {
        let values = require(params, &["id", "notify"])?;
        let notify = truthy(values[1]);
        self.job_mut(values[0])?.notify = notify;
        Ok(success())
    }
}

fn json_response(value: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    response
}

fn iiif_response(host: &str, path: &str, reported_identifier: Option<&str>) -> Response<Body> {
    let rest = &path[IIIF_PREFIX.len()..];
    let (identifier, tail) = rest.split_once('/').unwrap_or((rest, ""));
    let identifier = reported_identifier.unwrap_or(identifier);

    let mut response = match tail {
        "info.json" => json_response(&json!({
            "@context": "http://iiif.io/api/image/2/context.json",
            "@id": format!("http://{}{}{}", host, IIIF_PREFIX, identifier),
            "protocol": "http://iiif.io/api/image",
            "width": 3000,
            "height": 2000,
        })),
        "full/full/0/default.jpg" => {
            let mut image = Response::new(Body::from(vec![0xFF, 0xD8, 0xFF, 0xE0]));
            image
                .headers_mut()
                .insert(CONTENT_TYPE, "image/jpeg".parse().unwrap());
            image
        }
        _ => {
            let mut missing = Response::new(Body::empty());
            *missing.status_mut() = StatusCode::NOT_FOUND;
            missing
        }
    };

    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, "*".parse().unwrap());
    response
}

fn status_response(status: StatusCode, value: &Value) -> Response<Body> {
    let mut response = json_response(value);
    *response.status_mut() = status;
    response
}

fn mailinator_user(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

fn mailinator_response(store: &mut JobStore, method: &Method, path: &str, params: &Params) -> Response<Body> {
    if params.get("token").map(String::as_str) != Some(STUB_MAILINATOR_TOKEN) {
        return status_response(StatusCode::UNAUTHORIZED, &json!({ "message": "Invalid token" }));
    }

    if let Some(user) = path.strip_prefix(INBOXES_PREFIX) {
        let limit = params
            .get("limit")
            .and_then(|limit| limit.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let msgs = store
            .mails
            .iter()
            .rev()
            .filter(|mail| mailinator_user(&mail.to) == user)
            .take(limit)
            .map(|mail| json!({ "id": mail.message.id, "subject": mail.message.subject, "from": mail.message.from }))
            .collect::<Vec<_>>();
        return json_response(&json!({ "domain": "public", "to": user, "msgs": msgs }));
    }

    let id = path.strip_prefix(MESSAGES_PREFIX).unwrap_or_default();
    let position = match store.mails.iter().position(|mail| mail.message.id == id) {
        Some(position) => position,
        None => return status_response(StatusCode::NOT_FOUND, &json!({ "message": "Not found" })),
    };

    if *method == Method::DELETE {
        store.mails.remove(position);
        return json_response(&json!({ "status": "ok" }));
    }

    let message = &store.mails[position].message;
    json_response(&json!({
        "id": message.id,
        "subject": message.subject,
        "from": message.from,
        "parts": [{ "headers": {}, "body": message.body }],
    }))
}

fn handle(request: &Request<Body>, store: &Mutex<JobStore>) -> Response<Body> {
    let path = request.uri().path().to_string();
    let params: Params = form_urlencoded::parse(request.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    let mut store = lock(store);
    store.requests.push(RecordedRequest {
        path: path.clone(),
        query: params.clone(),
        cookie: request
            .headers()
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    });

    if path.starts_with(IIIF_PREFIX) {
        let host = request
            .headers()
            .get(hyper::header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        return iiif_response(host, &path, store.iiif_identifier.as_deref());
    }

    if path.starts_with(INBOXES_PREFIX) || path.starts_with(MESSAGES_PREFIX) {
        return mailinator_response(&mut store, request.method(), &path, &params);
    }

    match store.route(&path, &params) {
        Ok(value) | Err(value) => json_response(&value),
    }
}

fn lock(store: &Mutex<JobStore>) -> MutexGuard<'_, JobStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A running stub. Dropping it stops the server.
#[derive(Debug)]
pub struct StubJobManager {
    base_url: String,
    store: Arc<Mutex<JobStore>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl StubJobManager {
    /// Serves a fresh store on its own thread and runtime, bound to a free local port.
    pub fn start() -> Self {
        let store = Arc::new(Mutex::new(JobStore::default()));
        let (address_sender, address_receiver) = mpsc::channel();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
        let served = store.clone();

        thread::spawn(move || {
            Runtime::new().unwrap().block_on(async move {
                let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(
                    make_service_fn(move |_| {
                        let store = served.clone();
                        async move {
                            Ok::<_, Infallible>(service_fn(move |request| {
                                let response = handle(&request, &store);
                                async move { Ok::<_, Infallible>(response) }
                            }))
                        }
                    }),
                );

                address_sender.send(server.local_addr()).unwrap();

                let graceful = server.with_graceful_shutdown(async {
                    let _ = shutdown_receiver.await;
                });
                if let Err(e) = graceful.await {
                    eprintln!("stub job manager error: {}", e);
                }
            });
        });

        let address = address_receiver.recv().unwrap();

        Self {
            base_url: format!("http://{}", address),
            store,
            shutdown: Mutex::new(Some(shutdown_sender)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A client with its own connection pool, so it is safe to use from any runtime.
    pub fn job_manager_client(&self) -> JobManagerClient {
        JobManagerClient::new(Arc::new(HyperHttpClient::new()), self.base_url.as_str())
    }

    pub fn job_ids(&self) -> Vec<i64> {
        lock(&self.store).jobs.keys().copied().collect()
    }

    pub fn job(&self, id: i64) -> Option<JobRecord> {
        lock(&self.store).jobs.get(&id).cloned()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.store).requests.clone()
    }

    /// Makes `info.json` name `identifier` instead of the record it was asked for.
    pub fn misreport_iiif_identifier(&self, identifier: &str) {
        lock(&self.store).iiif_identifier = Some(identifier.to_string());
    }

    pub fn inbox(&self) -> StubInbox {
        StubInbox {
            store: self.store.clone(),
        }
    }
}

impl Drop for StubJobManager {
    fn drop(&mut self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

/// The notification emails the stub has sent.
#[derive(Debug, Clone)]
pub struct StubInbox {
    store: Arc<Mutex<JobStore>>,
}

#[async_trait]
impl Inbox for StubInbox {
    async fn latest_message(&self, user: &str) -> Result<Option<MailMessage>, Error> {
        Ok(lock(&self.store)
            .mails
            .iter()
            .rev()
            .find(|mail| mail.to == user)
            .map(|mail| mail.message.clone()))
    }

    async fn delete_message(&self, user: &str, id: &str) -> Result<(), Error> {
        lock(&self.store)
            .mails
            .retain(|mail| !(mail.to == user && mail.message.id == id));
        Ok(())
    }
}
