use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A deployment the contracts can be replayed against.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Stage,
    #[serde(alias = "production")]
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Stage => "stage",
            Environment::Prod => "prod",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Prod
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stage" => Ok(Environment::Stage),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(Error::Configuration(format!(
                "unknown environment '{}', expected 'stage' or 'prod'",
                s
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URLs per service and environment.
///
/// Built once before a run. A direct service URL wins over everything, then per-service
/// overrides, then the environment tables.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    tables: BTreeMap<Environment, BTreeMap<String, String>>,
    overrides: BTreeMap<String, String>,
    direct_service: Option<String>,
}

impl EnvironmentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service<S: Into<String>, U: Into<String>>(
        mut self,
        environment: Environment,
        service: S,
        base_url: U,
    ) -> Self {
        self.tables
            .entry(environment)
            .or_default()
            .insert(service.into(), base_url.into());
        self
    }

    pub fn with_override<S: Into<String>, U: Into<String>>(mut self, service: S, base_url: U) -> Self {
        self.overrides.insert(service.into(), base_url.into());
        self
    }

    /// Routes every service to `base_url`, e.g. a local stub or a tunnel.
    pub fn with_direct_service<U: Into<String>>(mut self, base_url: U) -> Self {
        self.direct_service = Some(base_url.into());
        self
    }

    pub fn resolve(&self, service: &str, environment: Environment) -> Result<&str, Error> {
        if let Some(direct) = &self.direct_service {
            return Ok(direct);
        }

        self.overrides
            .get(service)
            .or_else(|| {
                self.tables
                    .get(&environment)
                    .and_then(|table| table.get(service))
            })
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownService {
                service: service.to_string(),
                environment,
            })
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        let mut names = self
            .tables
            .values()
            .flat_map(|table| table.keys())
            .chain(self.overrides.keys())
            .map(String::as_str)
            .collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        names.into_iter()
    }

    /// Name of the environment variable overriding `service`, e.g. `BASEJOBMANAGERURL`.
    pub fn override_variable(service: &str) -> String {
        format!("BASE{}URL", service.replace('_', "").to_ascii_uppercase())
    }
}
