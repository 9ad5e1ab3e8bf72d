use crate::{
    cancellation::Cancellation,
    error::Error,
    exchange::Exchange,
    http_client::HttpClient,
    interaction::Interaction,
    provider_state::{ProviderState, StateLookup, StateRegistry},
    replay_configuration::ReplayConfiguration,
    matching::sha256_hex,
    report::{Failure, Reporter, VerificationResult},
};
use futures::{stream, FutureExt, StreamExt};
use std::{
    any::Any,
    collections::{HashMap, HashSet},
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Instant,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Where a replay is in its lifecycle. A failure report names the phase the replay stopped in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReplayPhase {
    Init,
    StateSetup,
    Resolving,
    Dispatching,
    AwaitingResponse,
    Asserting,
    StateTeardown,
    Done,
    Failed,
}

impl ReplayPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayPhase::Init => "init",
            ReplayPhase::StateSetup => "state_setup",
            ReplayPhase::Resolving => "resolving",
            ReplayPhase::Dispatching => "dispatching",
            ReplayPhase::AwaitingResponse => "awaiting_response",
            ReplayPhase::Asserting => "asserting",
            ReplayPhase::StateTeardown => "state_teardown",
            ReplayPhase::Done => "done",
            ReplayPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for ReplayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One async lock per provider state name, so interactions sharing a state never overlap.
#[derive(Debug, Default)]
struct StateLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StateLocks {
    async fn acquire(&self, name: Option<&str>) -> Option<OwnedMutexGuard<()>> {
        let name = name.filter(|name| !name.is_empty())?;
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(name.to_string()).or_default().clone()
        };

        Some(lock.lock_owned().await)
    }
}

/// Replays interactions against the configured provider.
///
/// Every replay runs setup, placeholder resolution, dispatch and assertion in that order and
/// then tears the provider state down, whatever happened before. Failures are turned into
/// [`VerificationResult`]s; only misconfiguration detected up front aborts a suite.
#[derive(Debug)]
pub struct ReplayExecutor {
    configuration: Arc<ReplayConfiguration>,
    registry: Arc<StateRegistry>,
    http_client: Arc<dyn HttpClient + Send + Sync>,
    state_locks: StateLocks,
}

impl ReplayExecutor {
    pub fn new(configuration: ReplayConfiguration, registry: Arc<StateRegistry>) -> Self {
        let http_client = configuration.http_client();

        Self {
            configuration: Arc::new(configuration),
            registry,
            http_client,
            state_locks: StateLocks::default(),
        }
    }

    pub fn configuration(&self) -> &ReplayConfiguration {
        &self.configuration
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// Checks what can be checked before anything is sent: every declared state is
    /// registered and descriptions are unique.
    pub fn validate(&self, interactions: &[Interaction]) -> Result<(), Error> {
        let mut descriptions = HashSet::new();

        for interaction in interactions {
            self.registry.lookup(interaction.provider_state())?;

            if !descriptions.insert(interaction.description()) {
                return Err(Error::Configuration(format!(
                    "interaction description \"{}\" is used more than once",
                    interaction.description()
                )));
            }
        }

        Ok(())
    }

    /// Replays every interaction of `suite` and records the outcomes in `reporter`.
    ///
    /// Returns an error only for problems that stop the suite before the first replay.
    pub async fn verify_suite(
        &self,
        suite: &str,
        interactions: &[Interaction],
        reporter: &Reporter,
        cancellation: &Cancellation,
    ) -> Result<(), Error> {
        self.validate(interactions)?;

        if interactions
            .iter()
            .any(|interaction| interaction.provider_state().is_some())
        {
            self.configuration.check_production_guard()?;
        }

        tracing::info!(
            suite,
            interactions = interactions.len(),
            parallelism = self.configuration.parallelism(),
            provider = self.configuration.provider_base_url(),
            "verifying suite"
        );

        stream::iter(interactions)
            .for_each_concurrent(self.configuration.parallelism(), |interaction| async move {
                let result = self.replay(interaction, cancellation).await;
                reporter.record(suite, result);
            })
            .await;

        Ok(())
    }

    pub async fn replay(&self, interaction: &Interaction, cancellation: &Cancellation) -> VerificationResult {
        let description = interaction.description();

        if cancellation.is_cancelled() {
            tracing::info!(interaction = description, "skipped, the run was cancelled");
            return VerificationResult::skipped(description);
        }

        let _state_guard = self.state_locks.acquire(interaction.provider_state()).await;
        if cancellation.is_cancelled() {
            tracing::info!(interaction = description, "skipped, cancelled while waiting for its state");
            return VerificationResult::skipped(description);
        }
        let started = Instant::now();

        let state = match self.registry.lookup(interaction.provider_state()) {
            Ok(StateLookup::Found(state)) => Some(state),
            Ok(StateLookup::NotFound) => None,
            Err(e) => {
                let failure = Failure::from_error(&e, ReplayPhase::Init, String::new());
                return VerificationResult::failed(description, started.elapsed(), failure);
            }
        };

        let mut exchange = Exchange::new(interaction.render());
        let mut phase = ReplayPhase::Init;

        let outcome = AssertUnwindSafe(self.run_phases(
            interaction,
            state.as_deref(),
            &mut exchange,
            &mut phase,
            cancellation,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));

        if let Some(state) = &state {
            tear_down(interaction, state.as_ref(), &exchange).await;
        }

        let duration = started.elapsed();
        match outcome {
            Ok(()) => {
                tracing::info!(interaction = description, phase = %ReplayPhase::Done, "passed");
                VerificationResult::passed(description, duration)
            }
            Err(e) => {
                tracing::warn!(
                    interaction = description,
                    phase = %phase,
                    error = %e,
                    "failed"
                );
                let failure = Failure::from_error(&e, phase, describe(&exchange));
                VerificationResult::failed(description, duration, failure)
            }
        }
    }

    async fn run_phases(
        &self,
        interaction: &Interaction,
        state: Option<&dyn ProviderState>,
        exchange: &mut Exchange,
        phase: &mut ReplayPhase,
        cancellation: &Cancellation,
    ) -> Result<(), Error> {
        let description = interaction.description();

        if let Some(state) = state {
            *phase = ReplayPhase::StateSetup;
            tracing::debug!(interaction = description, phase = %phase);
            state.set_up(exchange).await.map_err(|e| match e {
                Error::ProviderState { .. } | Error::Cancelled => e,
                e => Error::ProviderState {
                    state: interaction.provider_state().unwrap_or_default().to_string(),
                    message: e.to_string(),
                },
            })?;
        }

        *phase = ReplayPhase::Resolving;
        tracing::debug!(interaction = description, phase = %phase);
        let original_query = exchange.request.query_string();
        exchange.resolve_placeholders()?;
        let rewritten_query = exchange.request.query_string();
        if original_query != rewritten_query {
            tracing::warn!(
                interaction = description,
                original = %original_query,
                rewritten = %rewritten_query,
                "provider state rewrote the request query"
            );
        }

        for mutation in self.configuration.request_mutations() {
            mutation.mutate(&mut exchange.request);
        }

        *phase = ReplayPhase::Dispatching;
        tracing::debug!(interaction = description, phase = %phase, request = %exchange.request);
        let request = &exchange.request;
        let dispatch = self
            .http_client
            .make_request(self.configuration.provider_base_url(), request);

        let response = tokio::select! {
            result = tokio::time::timeout(self.configuration.dispatch_timeout(), dispatch) => match result {
                Ok(response) => response?,
                Err(_) => {
                    return Err(Error::Timeout {
                        what: format!("response to {}", request),
                        attempts: 1,
                    })
                }
            },
            _ = cancellation.cancelled() => return Err(Error::Cancelled),
        };

        *phase = ReplayPhase::AwaitingResponse;
        exchange.set_response(response);

        *phase = ReplayPhase::Asserting;
        tracing::debug!(interaction = description, phase = %phase);
        if let Some(response) = exchange.response() {
            let mismatches = interaction.expected_response().verify(response);
            if !mismatches.is_empty() {
                return Err(Error::AssertionMismatch(mismatches));
            }
        }

        Ok(())
    }
}

async fn tear_down(interaction: &Interaction, state: &dyn ProviderState, exchange: &Exchange) {
    let description = interaction.description();
    tracing::debug!(interaction = description, phase = %ReplayPhase::StateTeardown);

    if let Err(problem) = guarded_tear_down(state, exchange).await {
        tracing::warn!(
            interaction = description,
            state = interaction.provider_state().unwrap_or_default(),
            "teardown failed: {}",
            problem
        );
    }
}

/// Runs teardown with panics caught; the error is the teardown's failure or panic message.
pub(crate) async fn guarded_tear_down(state: &dyn ProviderState, exchange: &Exchange) -> Result<(), String> {
    match AssertUnwindSafe(state.tear_down(exchange)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn describe(exchange: &Exchange) -> String {
    let mut context = format!("request: {}\n", exchange.request);
    for (name, value) in &exchange.request.headers {
        context.push_str(&format!("  {}: {}\n", name, value));
    }

    match exchange.response() {
        Some(response) => {
            context.push_str(&format!("response: {}\n", response.status_code));
            for (name, value) in &response.headers {
                context.push_str(&format!("  {}: {}\n", name, value));
            }
            context.push_str(&body_summary(&response.body));
        }
        None => context.push_str("response: <none>"),
    }

    context
}

/// Printable bodies verbatim; anything else by size and checksum.
fn body_summary(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => text.to_string(),
        _ => format!("<{} bytes, sha256 {}>", body.len(), sha256_hex(body)),
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
