use crate::{
    environment::Environment,
    error::Error,
    http_client::{HttpClient, HyperHttpClient, DEFAULT_READ_TIMEOUT},
    mutations::{MutationsBuilder, RequestMutation},
};
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct ReplayConfiguration {
    provider_base_url: String,
    environment: Option<Environment>,
    allow_production: bool,
    parallelism: usize,
    dispatch_timeout: Duration,
    http_client: Option<Arc<dyn HttpClient + Send + Sync>>,
    request_mutations: Vec<RequestMutation>,
}

impl ReplayConfiguration {
    pub fn new<S: Into<String>>(provider_base_url: S) -> Self {
        Self {
            provider_base_url: provider_base_url.into(),
            environment: None,
            allow_production: false,
            parallelism: 1,
            dispatch_timeout: DEFAULT_READ_TIMEOUT,
            http_client: None,
            request_mutations: Vec::new(),
        }
    }

    pub fn provider_base_url(&self) -> &str {
        &self.provider_base_url
    }

    pub fn set_provider_base_url<S: Into<String>>(&mut self, provider_base_url: S) {
        self.provider_base_url = provider_base_url.into();
    }

    pub fn environment(&self) -> Option<Environment> {
        self.environment
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = Some(environment);
    }

    pub fn allow_production(&self) -> bool {
        self.allow_production
    }

    pub fn set_allow_production(&mut self, value: bool) {
        self.allow_production = value;
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Number of interactions replayed at once. Zero is treated as one.
    pub fn set_parallelism(&mut self, parallelism: usize) {
        self.parallelism = parallelism.max(1);
    }

    pub fn dispatch_timeout(&self) -> Duration {
        self.dispatch_timeout
    }

    pub fn set_dispatch_timeout(&mut self, timeout: Duration) {
        self.dispatch_timeout = timeout;
    }

    pub fn http_client(&self) -> Arc<dyn HttpClient + Send + Sync> {
        self.http_client
            .clone()
            .unwrap_or_else(|| Arc::new(HyperHttpClient::with_read_timeout(self.dispatch_timeout)))
    }

    pub fn set_http_client(&mut self, http_client: Arc<dyn HttpClient + Send + Sync>) {
        self.http_client = Some(http_client);
    }

    pub fn add_request_mutations<F: FnOnce(&mut MutationsBuilder) -> &mut MutationsBuilder>(
        &mut self,
        func: F,
    ) {
        let mut mutations = MutationsBuilder::new();
        let _ = func(&mut mutations);
        self.request_mutations
            .extend(mutations.into_request_mutations());
    }

    pub fn request_mutations(&self) -> &[RequestMutation] {
        &self.request_mutations
    }

    /// Refuses production unless it was explicitly allowed.
    pub fn check_production_guard(&self) -> Result<(), Error> {
        match self.environment {
            Some(environment) if environment.is_production() && !self.allow_production => {
                Err(Error::ProductionRefused)
            }
            _ => Ok(()),
        }
    }
}
