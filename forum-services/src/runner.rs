use crate::{
    config::{self, JOBMANAGER, JOBMANAGER_AUTH_KEY, MAILINATOR, MAILINATOR_TOKEN},
    functional::FunctionalSuite,
    iiif::{self, SAMPLE_DATE_PATH, SAMPLE_UUID},
    interactions::{self, CONSUMER},
    jobmanager::JobManagerClient,
    mailinator::MailinatorInbox,
    states::forum_state_registry,
};
use contract_replay::{
    Cancellation, Environment, EnvironmentResolver, Error, HttpClient, Interaction, InteractionStore,
    PactFileStore, ReplayConfiguration, ReplayExecutor, Report, Reporter, Settings, StateRegistry,
    DEFAULT_READ_TIMEOUT,
};
use std::{path::PathBuf, sync::Arc, time::Duration};

pub const IIIF_PROVIDER: &str = "forum-iiif-service";

#[derive(Debug, Copy, Clone, Eq, PartialEq, clap::ValueEnum)]
pub enum Suite {
    Jobmanager,
    Iiif,
    /// Job-manager behaviour beyond the contract, including the completion email.
    Functional,
    All,
}

impl Suite {
    fn includes(self, other: Suite) -> bool {
        self == Suite::All || self == other
    }
}

/// Knobs of one run that do not come from [`Settings`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub suite: Suite,
    pub parallelism: usize,
    pub allow_production: bool,
    pub session_cookie: Option<String>,
    pub pact_dir: Option<PathBuf>,
    pub fail_if_pact_changed: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            suite: Suite::All,
            parallelism: 1,
            allow_production: false,
            session_cookie: None,
            pact_dir: None,
            fail_if_pact_changed: false,
        }
    }
}

/// What a run produced. The report holds every result recorded before a fatal error.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    /// The configuration, unknown-state or production-guard error that stopped the run.
    pub aborted: Option<Error>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<Report, Error> {
        match self.aborted {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

struct PlannedSuite {
    name: &'static str,
    provider: &'static str,
    base_url: String,
    registry: StateRegistry,
    interactions: Vec<Interaction>,
}

struct Plan {
    contracts: Vec<PlannedSuite>,
    functional: Option<(String, FunctionalSuite)>,
}

/// Runs the selected suites: IIIF first, then the job-manager contract, then the functional
/// job-manager checks.
///
/// Failing interactions only show up in the report. A fatal problem stops the run and is
/// returned next to the results recorded until then.
pub async fn run(
    settings: &Settings,
    options: &RunOptions,
    http: Arc<dyn HttpClient + Send + Sync>,
    cancellation: &Cancellation,
) -> RunOutcome {
    let reporter = Reporter::new();
    let aborted = run_suites(settings, options, http, cancellation, &reporter)
        .await
        .err();

    RunOutcome {
        report: reporter.finalize(),
        aborted,
    }
}

async fn run_suites(
    settings: &Settings,
    options: &RunOptions,
    http: Arc<dyn HttpClient + Send + Sync>,
    cancellation: &Cancellation,
    reporter: &Reporter,
) -> Result<(), Error> {
    let environment = settings.environment();
    let dispatch_timeout = settings.read_timeout().unwrap_or(DEFAULT_READ_TIMEOUT);
    let plan = plan(settings, options, http.clone())?;

    if let Some(directory) = &options.pact_dir {
        for suite in &plan.contracts {
            let store = PactFileStore::in_directory(directory, CONSUMER, suite.provider);
            if options.fail_if_pact_changed {
                store.check_data_unchanged(&suite.interactions)?;
            } else {
                store.save_interactions(&suite.interactions)?;
            }
        }
    }

    for suite in plan.contracts {
        let configuration = replay_configuration(
            &suite.base_url,
            environment,
            options,
            http.clone(),
            dispatch_timeout,
        );
        let executor = ReplayExecutor::new(configuration, Arc::new(suite.registry));

        executor
            .verify_suite(suite.name, &suite.interactions, reporter, cancellation)
            .await?;
    }

    if let Some((base_url, functional)) = plan.functional {
        replay_configuration(&base_url, environment, options, http, dispatch_timeout)
            .check_production_guard()?;
        functional.run(reporter, cancellation).await;
    }

    Ok(())
}

fn jobmanager_base_url(settings: &Settings, resolver: &EnvironmentResolver) -> Result<String, Error> {
    match settings.provider_base_url() {
        Some(url) => Ok(url.to_string()),
        None => Ok(resolver.resolve(JOBMANAGER, settings.environment())?.to_string()),
    }
}

fn plan(
    settings: &Settings,
    options: &RunOptions,
    http: Arc<dyn HttpClient + Send + Sync>,
) -> Result<Plan, Error> {
    let environment = settings.environment();
    let resolver = settings.resolver(config::service_urls());
    let mut contracts = Vec::new();

    if options.suite.includes(Suite::Iiif) {
        contracts.push(PlannedSuite {
            name: config::IIIF,
            provider: IIIF_PROVIDER,
            base_url: resolver.resolve(config::IIIF, environment)?.to_string(),
            registry: StateRegistry::new(),
            interactions: iiif::iiif_interactions(SAMPLE_DATE_PATH, SAMPLE_UUID),
        });
    }

    if options.suite.includes(Suite::Jobmanager) {
        let base_url = jobmanager_base_url(settings, &resolver)?;
        let auth_key = settings.require_secret(&JOBMANAGER_AUTH_KEY)?;
        let client = JobManagerClient::new(http.clone(), base_url.as_str());

        contracts.push(PlannedSuite {
            name: JOBMANAGER,
            provider: interactions::PROVIDER,
            registry: forum_state_registry(client, auth_key)?,
            interactions: interactions::jobmanager_interactions()?,
            base_url,
        });
    }

    let functional = if options.suite.includes(Suite::Functional) {
        let base_url = jobmanager_base_url(settings, &resolver)?;
        let auth_key = settings.require_secret(&JOBMANAGER_AUTH_KEY)?;
        let inbox = MailinatorInbox::new(
            http.clone(),
            resolver.resolve(MAILINATOR, environment)?,
            settings.require_secret(&MAILINATOR_TOKEN)?,
        );
        let client = JobManagerClient::new(http, base_url.as_str());

        Some((base_url, FunctionalSuite::new(client, Arc::new(inbox), auth_key)))
    } else {
        None
    };

    Ok(Plan {
        contracts,
        functional,
    })
}

fn replay_configuration(
    base_url: &str,
    environment: Environment,
    options: &RunOptions,
    http: Arc<dyn HttpClient + Send + Sync>,
    dispatch_timeout: Duration,
) -> ReplayConfiguration {
    let mut configuration = ReplayConfiguration::new(base_url);
    configuration.set_environment(environment);
    configuration.set_allow_production(options.allow_production);
    configuration.set_parallelism(options.parallelism);
    configuration.set_dispatch_timeout(dispatch_timeout);
    configuration.set_http_client(http);

    if let Some(cookie) = &options.session_cookie {
        configuration.add_request_mutations(|mutations| mutations.set_header("cookie", cookie.as_str()));
    }

    configuration
}
