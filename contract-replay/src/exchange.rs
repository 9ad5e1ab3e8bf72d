use crate::{
    data::{Request, ResponseData},
    error::Error,
    placeholder,
};
use std::collections::BTreeMap;

/// Per-interaction context threaded through setup, replay and teardown.
///
/// An exchange belongs to exactly one replay: it starts with a working copy of the
/// interaction's request, collects whatever values the provider state stashes, and ends up
/// holding the captured response (if dispatch got that far).
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    pub request: Request,
    response: Option<ResponseData>,
    stash: BTreeMap<String, String>,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            stash: BTreeMap::new(),
        }
    }

    pub fn stash<K: Into<String>, V: ToString>(&mut self, key: K, value: V) {
        self.stash.insert(key.into(), value.to_string());
    }

    pub fn stashed(&self, key: &str) -> Option<&str> {
        self.stash.get(key).map(String::as_str)
    }

    pub fn stashed_values(&self) -> &BTreeMap<String, String> {
        &self.stash
    }

    pub fn response(&self) -> Option<&ResponseData> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: ResponseData) {
        self.response = Some(response);
    }

    /// Rewrites the request's `**name**` tokens with the stashed values.
    pub fn resolve_placeholders(&mut self) -> Result<(), Error> {
        placeholder::resolve(&mut self.request, &self.stash)
    }
}
