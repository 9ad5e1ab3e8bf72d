use crate::{
    environment::{Environment, EnvironmentResolver},
    error::Error,
};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path, time::Duration};

pub const ENVIRONMENT_VARIABLE: &str = "ENVIRONMENT";
pub const DIRECT_SERVICE_VARIABLE: &str = "DIRECT_SERVICE";
pub const PROVIDER_BASE_URL_VARIABLE: &str = "PACT_PROVIDER_BASE_URL";
pub const READ_TIMEOUT_VARIABLE: &str = "CONTRACT_READ_TIMEOUT_SEC";
pub const DEFAULT_CONFIG_FILE: &str = "env_config.json";

/// The optional JSON config file. Unknown keys are kept so that secrets can be looked up by
/// name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub environment: Option<String>,
    pub direct_service: Option<String>,
    pub base_urls: BTreeMap<String, String>,
    pub read_timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConfigFile {
    /// Returns `None` when there is no file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, Error> {
        let text = match fs::read_to_string(path.as_ref()) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&text).map(Some).map_err(|e| {
            Error::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.extra.get(key) {
            Some(Value::String(value)) => non_empty(value.clone()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        }
    }
}

/// A secret and where to find it.
#[derive(Debug, Copy, Clone)]
pub struct SecretSource {
    /// Key in the config file, also the name the secret is looked up by.
    pub key: &'static str,
    pub variable: &'static str,
}

/// Configuration for one run, built once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    environment: Environment,
    direct_service: Option<String>,
    base_url_overrides: BTreeMap<String, String>,
    provider_base_url: Option<String>,
    read_timeout: Option<Duration>,
    secrets: BTreeMap<String, String>,
}

impl Settings {
    /// Layers the explicit environment, the variables read through `var` and the config
    /// file, in that order of precedence.
    pub fn load<F>(
        explicit_environment: Option<Environment>,
        file: Option<&ConfigFile>,
        services: &[&str],
        secrets: &[SecretSource],
        var: F,
    ) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).and_then(non_empty);
        let empty = ConfigFile::default();
        let file = file.unwrap_or(&empty);

        let environment = match explicit_environment {
            Some(environment) => environment,
            None => var(ENVIRONMENT_VARIABLE)
                .or_else(|| file.environment.clone().and_then(non_empty))
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "no environment selected: pass one explicitly, set {} or add \"environment\" to {}",
                        ENVIRONMENT_VARIABLE, DEFAULT_CONFIG_FILE
                    ))
                })?
                .parse()?,
        };

        let mut base_url_overrides = file.base_urls.clone();
        for service in services {
            if let Some(url) = var(&EnvironmentResolver::override_variable(service)) {
                base_url_overrides.insert(service.to_string(), url);
            }
        }

        let read_timeout = match var(READ_TIMEOUT_VARIABLE) {
            Some(text) => Some(parse_timeout(&text)?),
            None => file.read_timeout_secs.map(Duration::from_secs),
        }
        .filter(|timeout| !timeout.is_zero());

        let secrets = secrets
            .iter()
            .filter_map(|source| {
                var(source.variable)
                    .or_else(|| file.string(source.key))
                    .map(|value| (source.key.to_string(), value))
            })
            .collect();

        Ok(Self {
            environment,
            direct_service: var(DIRECT_SERVICE_VARIABLE)
                .or_else(|| file.direct_service.clone().and_then(non_empty)),
            base_url_overrides,
            provider_base_url: var(PROVIDER_BASE_URL_VARIABLE),
            read_timeout,
            secrets,
        })
    }

    pub fn from_process_env(
        explicit_environment: Option<Environment>,
        file: Option<&ConfigFile>,
        services: &[&str],
        secrets: &[SecretSource],
    ) -> Result<Self, Error> {
        Self::load(explicit_environment, file, services, secrets, |name| {
            std::env::var(name).ok()
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn provider_base_url(&self) -> Option<&str> {
        self.provider_base_url.as_deref()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    /// Requires the secret, naming both places it could have come from.
    pub fn require_secret(&self, source: &SecretSource) -> Result<&str, Error> {
        self.secret(source.key).ok_or_else(|| {
            Error::Configuration(format!(
                "missing secret: set {} or \"{}\" in {}",
                source.variable, source.key, DEFAULT_CONFIG_FILE
            ))
        })
    }

    /// Applies the configured overrides on top of the environment tables in `base`.
    pub fn resolver(&self, base: EnvironmentResolver) -> EnvironmentResolver {
        let resolver = self
            .base_url_overrides
            .iter()
            .fold(base, |resolver, (service, url)| {
                resolver.with_override(service.as_str(), url.as_str())
            });

        match &self.direct_service {
            Some(direct) => resolver.with_direct_service(direct.as_str()),
            None => resolver,
        }
    }
}

fn parse_timeout(text: &str) -> Result<Duration, Error> {
    text.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            Error::Configuration(format!(
                "{} must be a whole number of seconds, got '{}'",
                READ_TIMEOUT_VARIABLE, text
            ))
        })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
