use contract_replay::{ConfigFile, Environment, EnvironmentResolver, Error, SecretSource, Settings};
use std::path::Path;

pub const JOBMANAGER: &str = "jobmanager";
pub const IIIF: &str = "iiif";
pub const APPSGATEWAY: &str = "appsgateway";
pub const MAILINATOR: &str = "mailinator";

pub const SERVICES: &[&str] = &[JOBMANAGER, IIIF, APPSGATEWAY, MAILINATOR];

pub const JOBMANAGER_AUTH_KEY: SecretSource = SecretSource {
    key: "jobmanager_auth_key",
    variable: "JOBMANAGER_AUTH_KEY",
};

pub const MAILINATOR_TOKEN: SecretSource = SecretSource {
    key: "mailinator_token",
    variable: "MAILINATOR_TOKEN",
};

pub const SECRETS: &[SecretSource] = &[JOBMANAGER_AUTH_KEY, MAILINATOR_TOKEN];

const STAGE_URLS: &[(&str, &str)] = &[
    (JOBMANAGER, "https://forum-job-manager-service.apps.test.cirrostratus.org"),
    (IIIF, "http://sharedshelf.stage.artstor.org"),
    (APPSGATEWAY, "https://test.forum.jstor.org"),
    (MAILINATOR, "https://api.mailinator.com"),
];

const PROD_URLS: &[(&str, &str)] = &[
    (JOBMANAGER, "https://forum-job-manager-service.apps.prod.cirrostratus.org"),
    (IIIF, "http://catalog.sharedshelf.artstor.org"),
    (APPSGATEWAY, "https://forum.jstor.org"),
    (MAILINATOR, "https://api.mailinator.com"),
];

/// The stage and prod URL of every forum service.
pub fn service_urls() -> EnvironmentResolver {
    let tables = [(Environment::Stage, STAGE_URLS), (Environment::Prod, PROD_URLS)];

    tables
        .iter()
        .flat_map(|(environment, urls)| urls.iter().map(move |entry| (*environment, entry)))
        .fold(EnvironmentResolver::new(), |resolver, (environment, (service, url))| {
            resolver.with_service(environment, *service, *url)
        })
}

/// Reads the optional config file at `config_path` and layers the process environment on top.
pub fn load_settings(explicit_environment: Option<Environment>, config_path: &Path) -> Result<Settings, Error> {
    let file = ConfigFile::load(config_path)?;
    if file.is_none() {
        tracing::debug!(path = %config_path.display(), "no config file");
    }

    Settings::from_process_env(explicit_environment, file.as_ref(), SERVICES, SECRETS)
}
