mod cancellation;
mod data;
mod environment;
mod error;
mod exchange;
mod executor;
mod http_client;
mod inbox;
mod interaction;
mod matching;
mod mutations;
mod pact_file;
mod placeholder;
mod poll;
mod provider_state;
mod replay_configuration;
mod report;
mod scoped;
mod settings;
mod util;

pub use cancellation::{cancellation, Cancellation, CancellationHandle};
pub use contract_replay_codegen::provider_state_test;
pub use data::{Body, Method, Request, ResponseData};
pub use environment::{Environment, EnvironmentResolver};
pub use error::{Error, FailureKind};
pub use exchange::Exchange;
pub use executor::{panic_message, ReplayExecutor, ReplayPhase};
pub use http_client::{HttpClient, HyperHttpClient, LoggingHttpClient, DEFAULT_READ_TIMEOUT};
pub use inbox::{wait_for_message, Inbox, MailMessage, MAX_DELETIONS};
pub use interaction::{Interaction, InteractionBuilder};
pub use matching::{sha256_hex, BodyMatcher, ExpectedResponse, Mismatch};
pub use mutations::{HeadersMutation, MutationsBuilder, RequestMutation};
pub use pact_file::{InteractionStore, PactFileStore};
pub use placeholder::{placeholder, placeholders};
pub use poll::{wait_until, PollPolicy};
pub use provider_state::{NoOpState, ProviderState, StateLookup, StateRegistry};
pub use replay_configuration::ReplayConfiguration;
pub use report::{CaseStatus, Failure, Report, Reporter, SuiteReport, VerificationResult};
pub use scoped::run_in_state;
pub use settings::{ConfigFile, SecretSource, Settings, DEFAULT_CONFIG_FILE};
