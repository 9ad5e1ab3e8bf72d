use crate::{
    data::{Body, Method, Request},
    error::Error,
    matching::ExpectedResponse,
};
use hyper::body::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;

/// One described request and the response the consumer expects for it.
///
/// Immutable once built: replays work on the copy returned by [`Interaction::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    description: String,
    provider_state: Option<String>,
    request: Request,
    expected_response: ExpectedResponse,
}

impl Interaction {
    pub fn new<S: Into<String>>(
        description: S,
        provider_state: Option<String>,
        request: Request,
        expected_response: ExpectedResponse,
    ) -> Self {
        Self {
            description: description.into(),
            provider_state: provider_state.filter(|name| !name.is_empty()),
            request,
            expected_response,
        }
    }

    pub fn builder<S: Into<String>>(description: S) -> InteractionBuilder {
        InteractionBuilder::new(description)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn provider_state(&self) -> Option<&str> {
        self.provider_state.as_deref()
    }

    pub fn request_template(&self) -> &Request {
        &self.request
    }

    pub fn expected_response(&self) -> &ExpectedResponse {
        &self.expected_response
    }

    /// A fresh working copy of the request template. Has no side effects.
    pub fn render(&self) -> Request {
        self.request.clone()
    }
}

/// Builds an [`Interaction`] in the order a contract reads:
/// `given(..).upon_receiving(..).request(..).will_respond_with(..)`.
#[derive(Debug, Clone)]
pub struct InteractionBuilder {
    description: String,
    provider_state: Option<String>,
    method: Option<String>,
    path: String,
    params: Vec<(String, Value)>,
    headers: BTreeMap<String, String>,
    raw_body: Option<Bytes>,
    expected_response: ExpectedResponse,
}

impl InteractionBuilder {
    fn new<S: Into<String>>(description: S) -> Self {
        Self {
            description: description.into(),
            provider_state: None,
            method: None,
            path: String::from("/"),
            params: Vec::new(),
            headers: BTreeMap::new(),
            raw_body: None,
            expected_response: ExpectedResponse::new(200),
        }
    }

    pub fn given<S: Into<String>>(mut self, provider_state: S) -> Self {
        self.provider_state = Some(provider_state.into());
        self
    }

    pub fn upon_receiving<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Parameters become the body for POST and PUT and the query for every other verb.
    pub fn request<M, P, I, K, V>(mut self, method: M, path: P, params: I) -> Self
    where
        M: Into<String>,
        P: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.method = Some(method.into());
        self.path = path.into();
        self.params = params
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    pub fn header<S1: AsRef<str>, S2: Into<String>>(mut self, name: S1, value: S2) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sends `body` verbatim instead of encoding the parameters.
    pub fn raw_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    pub fn will_respond_with(mut self, expected_response: ExpectedResponse) -> Self {
        self.expected_response = expected_response;
        self
    }

    pub fn build(self) -> Result<Interaction, Error> {
        let method: Method = self
            .method
            .as_deref()
            .ok_or_else(|| {
                Error::Configuration(format!("interaction '{}' has no request", self.description))
            })?
            .parse()?;

        let mut request = Request::new(method, self.path);
        request.headers = self.headers;

        if let Some(raw_body) = self.raw_body {
            request.query = self
                .params
                .iter()
                .map(|(key, value)| (key.clone(), crate::data::field_text(value).into_owned()))
                .collect();
            request.body = Some(Body::Raw(raw_body));
        } else if method.carries_body() {
            request.body = Some(Body::Fields(self.params.into_iter().collect()));
        } else {
            request.query = self
                .params
                .into_iter()
                .map(|(key, value)| {
                    let text = crate::data::field_text(&value).into_owned();
                    (key, text)
                })
                .collect();
        }

        Ok(Interaction::new(
            self.description,
            self.provider_state,
            request,
            self.expected_response,
        ))
    }
}
