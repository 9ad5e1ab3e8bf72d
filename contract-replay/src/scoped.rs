use crate::{
    error::Error,
    exchange::Exchange,
    executor::{guarded_tear_down, panic_message},
    provider_state::{StateLookup, StateRegistry},
};
use futures::{future::LocalBoxFuture, FutureExt};
use std::panic::{self, AssertUnwindSafe};

/// Runs `body` inside the provider state `state_name`.
///
/// The body gets a fresh [`Exchange`] holding whatever setup stashed. Teardown runs whether
/// setup and the body return or panic; a panic is resumed once teardown is done, so test
/// assertions keep failing the test. A failed setup skips the body and is returned after
/// teardown. Teardown failures and panics are logged.
pub async fn run_in_state<F>(registry: &StateRegistry, state_name: &str, body: F) -> Result<(), Error>
where
    F: for<'a> FnOnce(&'a mut Exchange) -> LocalBoxFuture<'a, ()>,
{
    let state = match registry.lookup(Some(state_name))? {
        StateLookup::Found(state) => state,
        StateLookup::NotFound => {
            return Err(Error::Configuration(String::from(
                "a state-scoped test needs a state name",
            )))
        }
    };

    let mut exchange = Exchange::default();
    let setup = AssertUnwindSafe(state.set_up(&mut exchange)).catch_unwind().await;

    let outcome = match &setup {
        Ok(Ok(())) => AssertUnwindSafe(body(&mut exchange)).catch_unwind().await,
        _ => Ok(()),
    };

    if let Err(problem) = guarded_tear_down(state.as_ref(), &exchange).await {
        tracing::warn!(state = state_name, "teardown failed: {}", problem);
    }

    let setup = match setup {
        Ok(setup) => setup,
        Err(payload) => {
            tracing::debug!(state = state_name, panic = %panic_message(payload.as_ref()), "setup panicked");
            panic::resume_unwind(payload);
        }
    };

    if let Err(payload) = outcome {
        tracing::debug!(state = state_name, panic = %panic_message(payload.as_ref()), "test body panicked");
        panic::resume_unwind(payload);
    }

    setup.map_err(|e| Error::ProviderState {
        state: state_name.to_string(),
        message: e.to_string(),
    })
}
