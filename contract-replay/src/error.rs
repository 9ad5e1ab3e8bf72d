use crate::{environment::Environment, matching::Mismatch};
use hyper::http;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{0}' is not a HTTP method the replay engine understands")]
    UnsupportedMethod(String),
    #[error("provider state \"{0}\" is already registered")]
    DuplicateState(String),
    #[error("provider state \"{0}\" is not registered")]
    UnknownState(String),
    #[error("provider state \"{state}\" failed: {message}")]
    ProviderState { state: String, message: String },
    #[error("placeholder **{0}** has no stashed value")]
    UnresolvedPlaceholder(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response does not match the contract: {}", format_mismatches(.0))]
    AssertionMismatch(Vec<Mismatch>),
    #[error("timed out waiting for {what} after {attempts} attempt(s)")]
    Timeout { what: String, attempts: u32 },
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("service reported a failure: {0}")]
    ServiceFailure(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no base URL is configured for service \"{service}\" in {environment}")]
    UnknownService {
        service: String,
        environment: Environment,
    },
    #[error("refusing to replay provider states against production")]
    ProductionRefused,
    #[error("the run was cancelled")]
    Cancelled,
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] hyper::header::InvalidHeaderName),
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] hyper::header::InvalidHeaderValue),
    #[error("http error: {0}")]
    HttpError(#[from] http::Error),
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("xml error: {0}")]
    XmlError(#[from] quick_xml::Error),
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

fn format_mismatches(mismatches: &[Mismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coarse classification of why an interaction failed, used as the report's failure type.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureKind {
    UnresolvedPlaceholder,
    Transport,
    AssertionMismatch,
    Timeout,
    ProviderState,
    Cancelled,
    Panicked,
    Other,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::UnresolvedPlaceholder => "unresolved_placeholder",
            FailureKind::Transport => "transport_error",
            FailureKind::AssertionMismatch => "assertion_mismatch",
            FailureKind::Timeout => "timeout",
            FailureKind::ProviderState => "provider_state",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Panicked => "panicked",
            FailureKind::Other => "failed",
        }
    }
}

impl Error {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::UnresolvedPlaceholder(_) => FailureKind::UnresolvedPlaceholder,
            Error::Transport(_) => FailureKind::Transport,
            Error::AssertionMismatch(_) => FailureKind::AssertionMismatch,
            Error::Timeout { .. } => FailureKind::Timeout,
            Error::ProviderState { .. }
            | Error::UnknownState(_)
            | Error::UnexpectedStatus { .. }
            | Error::ServiceFailure(_) => FailureKind::ProviderState,
            Error::Cancelled => FailureKind::Cancelled,
            Error::Panicked(_) => FailureKind::Panicked,
            _ => FailureKind::Other,
        }
    }

    /// Structured diff carried by an assertion failure, empty for every other error.
    pub fn mismatches(&self) -> &[Mismatch] {
        match self {
            Error::AssertionMismatch(mismatches) => mismatches,
            _ => &[],
        }
    }
}
