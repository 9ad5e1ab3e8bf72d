use clap::Parser;
use contract_replay::{
    cancellation, Environment, HyperHttpClient, LoggingHttpClient, Report, DEFAULT_CONFIG_FILE,
    DEFAULT_READ_TIMEOUT,
};
use forum_services::{
    config,
    runner::{self, RunOptions, Suite},
    telemetry,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};

/// Replays the forum service contracts (and the functional job-manager checks) against live
/// providers and writes a JUnit report.
#[derive(Debug, Parser)]
#[command(name = "forum-contracts", version)]
struct Cli {
    /// stage or prod; falls back to $ENVIRONMENT and then the config file
    #[arg(long, short, value_parser = parse_environment)]
    environment: Option<Environment>,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "all")]
    suite: Suite,

    /// Defaults to tmp/junit_reports/contract_results_<unix time>.xml
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Allow provider states, which create and purge real jobs, to run against prod
    #[arg(long)]
    allow_production: bool,

    /// Also write the interactions as pact files into this directory
    #[arg(long)]
    pact_dir: Option<PathBuf>,

    /// Compare the interactions with the pact files in --pact-dir instead of rewriting them
    #[arg(long, requires = "pact_dir")]
    fail_if_pact_changed: bool,

    /// Sent as the Cookie header of every replayed request
    #[arg(long, env = "FORUM_SESSION_COOKIE", hide_env_values = true)]
    session_cookie: Option<String>,
}

fn parse_environment(value: &str) -> Result<Environment, String> {
    value.parse().map_err(|e: contract_replay::Error| e.to_string())
}

fn default_report_path() -> PathBuf {
    PathBuf::from("tmp")
        .join("junit_reports")
        .join(format!("contract_results_{}.xml", chrono::Utc::now().timestamp()))
}

fn summarize(report: &Report) {
    for result in report.results().filter(|result| result.is_failed()) {
        if let Some(failure) = &result.failure {
            tracing::error!(
                interaction = %result.description,
                kind = failure.kind.as_str(),
                phase = %failure.phase,
                "{}",
                failure.message
            );
        }
    }

    tracing::info!(
        total = report.total(),
        passed = report.passed(),
        failed = report.failures(),
        skipped = report.skipped(),
        "contract run finished"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing("info");
    let cli = Cli::parse();

    let settings = match config::load_settings(cli.environment, &cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let http = Arc::new(LoggingHttpClient::new(HyperHttpClient::with_read_timeout(
        settings.read_timeout().unwrap_or(DEFAULT_READ_TIMEOUT),
    )));

    let (handle, cancellation) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight teardowns");
            handle.cancel();
        }
    });

    let options = RunOptions {
        suite: cli.suite,
        parallelism: cli.parallelism,
        allow_production: cli.allow_production,
        session_cookie: cli.session_cookie,
        pact_dir: cli.pact_dir,
        fail_if_pact_changed: cli.fail_if_pact_changed,
    };

    tracing::info!(environment = %settings.environment(), suite = ?options.suite, "starting contract run");

    let outcome = runner::run(&settings, &options, http, &cancellation).await;
    let report = outcome.report;
    summarize(&report);

    let report_path = cli.report.unwrap_or_else(default_report_path);
    if let Err(e) = report.write_junit(&report_path) {
        tracing::error!(error = %e, path = %report_path.display(), "could not write the report");
        return ExitCode::from(2);
    }

    if let Some(e) = outcome.aborted {
        tracing::error!(error = %e, "contract run aborted");
        return ExitCode::from(2);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
