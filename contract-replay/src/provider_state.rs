use crate::{error::Error, exchange::Exchange};
use async_trait::async_trait;
use std::{collections::HashMap, fmt, sync::Arc};

/// A named precondition with its setup and teardown procedures.
///
/// `set_up` runs right before placeholder resolution and may stash values or edit
/// `exchange.request`. `tear_down` runs once the replay is over, whatever its outcome, and
/// sees the captured response if there is one.
#[async_trait]
pub trait ProviderState: Send + Sync {
    async fn set_up(&self, _exchange: &mut Exchange) -> Result<(), Error> {
        Ok(())
    }

    async fn tear_down(&self, _exchange: &Exchange) -> Result<(), Error> {
        Ok(())
    }
}

/// A state with nothing to set up or tear down.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpState;

impl ProviderState for NoOpState {}

pub enum StateLookup {
    /// The interaction declares no state.
    NotFound,
    Found(Arc<dyn ProviderState>),
}

impl fmt::Debug for StateLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateLookup::NotFound => f.write_str("NotFound"),
            StateLookup::Found(_) => f.write_str("Found(..)"),
        }
    }
}

/// Provider states by name. Filled once before a run and only read afterwards.
#[derive(Default)]
pub struct StateRegistry {
    states: HashMap<String, Arc<dyn ProviderState>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N: Into<String>, S: ProviderState + 'static>(
        &mut self,
        name: N,
        state: S,
    ) -> Result<(), Error> {
        let name = name.into();
        if self.states.contains_key(&name) {
            return Err(Error::DuplicateState(name));
        }

        self.states.insert(name, Arc::new(state));
        Ok(())
    }

    /// `None` and the empty name mean "no state needed" and yield [`StateLookup::NotFound`];
    /// a name nobody registered is a misconfiguration.
    pub fn lookup(&self, name: Option<&str>) -> Result<StateLookup, Error> {
        match name {
            None | Some("") => Ok(StateLookup::NotFound),
            Some(name) => self
                .states
                .get(name)
                .cloned()
                .map(StateLookup::Found)
                .ok_or_else(|| Error::UnknownState(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names().collect::<Vec<_>>();
        names.sort_unstable();
        f.debug_struct("StateRegistry").field("states", &names).finish()
    }
}
