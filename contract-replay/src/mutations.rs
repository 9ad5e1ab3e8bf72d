use crate::data::Request;
use regex::Regex;
use std::{collections::BTreeMap, fmt::Debug};

/// Edits the headers of an outgoing request. Header names are lowercase.
pub trait HeadersMutation: Debug {
    fn mutate(&self, headers: &mut BTreeMap<String, String>);
}

#[derive(Debug)]
pub struct SetHeaderMutation {
    header_name: String,
    header_value: String,
}

impl SetHeaderMutation {
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, value: S2) -> Self {
        Self {
            header_name: name.into().to_ascii_lowercase(),
            header_value: value.into(),
        }
    }
}

impl HeadersMutation for SetHeaderMutation {
    fn mutate(&self, headers: &mut BTreeMap<String, String>) {
        headers.insert(self.header_name.clone(), self.header_value.clone());
    }
}

#[derive(Debug)]
pub struct RemoveHeadersMutation {
    headers: Vec<String>,
}

impl RemoveHeadersMutation {
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(headers: I) -> Self {
        Self {
            headers: headers
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl HeadersMutation for RemoveHeadersMutation {
    fn mutate(&self, headers: &mut BTreeMap<String, String>) {
        for header_name in &self.headers {
            headers.remove(header_name);
        }
    }
}

#[derive(Debug)]
pub struct RemoveHeadersRegexMutation {
    patterns: Vec<Regex>,
}

impl RemoveHeadersRegexMutation {
    pub fn new<I: IntoIterator<Item = Regex>>(patterns: I) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }
}

impl HeadersMutation for RemoveHeadersRegexMutation {
    fn mutate(&self, headers: &mut BTreeMap<String, String>) {
        headers.retain(|name, _| !self.patterns.iter().any(|pattern| pattern.is_match(name)));
    }
}

/// A mutation applied to every replayed request once its placeholders are resolved.
#[derive(Debug)]
pub struct RequestMutation {
    mutation: Box<dyn HeadersMutation + Send + Sync>,
}

impl RequestMutation {
    pub fn mutate(&self, request: &mut Request) {
        self.mutation.mutate(&mut request.headers);
    }
}

#[derive(Default)]
pub struct MutationsBuilder {
    mutations: Vec<Box<dyn HeadersMutation + Send + Sync>>,
}

impl MutationsBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `header_name`, replacing any value the request already carries.
    pub fn set_header<S1: Into<String>, S2: Into<String>>(
        &mut self,
        header_name: S1,
        header_value: S2,
    ) -> &mut Self {
        self.add_headers_mutation(SetHeaderMutation::new(header_name, header_value))
    }

    pub fn remove_headers<S: Into<String>, I: IntoIterator<Item = S>>(
        &mut self,
        headers: I,
    ) -> &mut Self {
        self.add_headers_mutation(RemoveHeadersMutation::new(headers))
    }

    pub fn remove_headers_regex<I: IntoIterator<Item = Regex>>(
        &mut self,
        patterns: I,
    ) -> &mut Self {
        self.add_headers_mutation(RemoveHeadersRegexMutation::new(patterns))
    }

    pub fn add_headers_mutation<HM: HeadersMutation + Send + Sync + 'static>(
        &mut self,
        mutation: HM,
    ) -> &mut Self {
        self.mutations.push(Box::new(mutation));
        self
    }

    pub fn into_request_mutations(self) -> Vec<RequestMutation> {
        self.mutations
            .into_iter()
            .map(|mutation| RequestMutation { mutation })
            .collect()
    }
}
