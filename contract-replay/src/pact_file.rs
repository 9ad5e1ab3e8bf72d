use crate::{
    data::{Body, Method, Request},
    error::Error,
    interaction::Interaction,
    matching::{BodyMatcher, ExpectedResponse},
};
use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};
use url::form_urlencoded;

const PACT_SPECIFICATION_VERSION: &str = "2.0.0";
const BODY_RULE: &str = "$.body";
const PRESENT_REGEX: &str = "(?s).+";

/// Persistent storage for a provider's interactions.
pub trait InteractionStore: Debug {
    fn load_interactions(&self) -> Result<Vec<Interaction>, Error>;

    fn save_interactions(&self, interactions: &[Interaction]) -> Result<(), Error>;

    /// Fails with a configuration error when `interactions` differ from the stored ones.
    fn check_data_unchanged(&self, interactions: &[Interaction]) -> Result<(), Error>;
}

/// A Pact v2 JSON file named `<consumer>-<provider>.json`.
#[derive(Debug, Clone)]
pub struct PactFileStore {
    path: PathBuf,
    consumer: String,
    provider: String,
}

impl PactFileStore {
    pub fn new<P: Into<PathBuf>, S1: Into<String>, S2: Into<String>>(
        path: P,
        consumer: S1,
        provider: S2,
    ) -> Self {
        Self {
            path: path.into(),
            consumer: consumer.into(),
            provider: provider.into(),
        }
    }

    pub fn in_directory<P: AsRef<Path>, S1: Into<String>, S2: Into<String>>(
        directory: P,
        consumer: S1,
        provider: S2,
    ) -> Self {
        let consumer = consumer.into();
        let provider = provider.into();
        let path = directory
            .as_ref()
            .join(format!("{}-{}.json", consumer, provider));

        Self::new(path, consumer, provider)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document(&self, interactions: &[Interaction]) -> Result<PactDocument, Error> {
        Ok(PactDocument {
            consumer: Pacticipant {
                name: self.consumer.clone(),
            },
            provider: Pacticipant {
                name: self.provider.clone(),
            },
            interactions: interactions
                .iter()
                .map(PactInteraction::try_from)
                .collect::<Result<_, _>>()?,
            metadata: json!({ "pactSpecification": { "version": PACT_SPECIFICATION_VERSION } }),
        })
    }
}

impl InteractionStore for PactFileStore {
    fn load_interactions(&self) -> Result<Vec<Interaction>, Error> {
        let text = fs::read_to_string(&self.path)?;
        let document: PactDocument = serde_json::from_str(&text)?;

        document
            .interactions
            .into_iter()
            .map(Interaction::try_from)
            .collect()
    }

    fn save_interactions(&self, interactions: &[Interaction]) -> Result<(), Error> {
        let document = self.document(interactions)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&document)?)?;

        tracing::info!(
            path = %self.path.display(),
            interactions = interactions.len(),
            "wrote pact file"
        );
        Ok(())
    }

    fn check_data_unchanged(&self, interactions: &[Interaction]) -> Result<(), Error> {
        let stored = self.load_interactions()?;

        if stored.as_slice() == interactions {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "interactions differ from {}",
                self.path.display()
            )))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PactDocument {
    consumer: Pacticipant,
    provider: Pacticipant,
    #[serde(default)]
    interactions: Vec<PactInteraction>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pacticipant {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PactInteraction {
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider_state: Option<String>,
    request: PactRequest,
    response: PactResponse,
}

#[derive(Debug, Serialize, Deserialize)]
struct PactRequest {
    method: String,
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PactResponse {
    status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    matching_rules: BTreeMap<String, Value>,
}

impl TryFrom<&Interaction> for PactInteraction {
    type Error = Error;

    fn try_from(interaction: &Interaction) -> Result<Self, Self::Error> {
        let template = interaction.request_template();
        let expected = interaction.expected_response();

        let request = PactRequest {
            method: template.method.as_str().to_ascii_lowercase(),
            path: template.path.clone(),
            query: Some(template.query_string()).filter(|query| !query.is_empty()),
            headers: template.headers.clone(),
            body: match &template.body {
                None => None,
                Some(Body::Fields(fields)) => Some(Value::Object(fields.clone().into_iter().collect())),
                Some(Body::Raw(bytes)) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            },
        };

        let mut matching_rules = BTreeMap::new();
        let body = match expected.body() {
            None => None,
            Some(BodyMatcher::Exact(value)) => Some(value.clone()),
            Some(BodyMatcher::Like(value)) => {
                matching_rules.insert(BODY_RULE.to_string(), json!({ "match": "type" }));
                Some(value.clone())
            }
            Some(BodyMatcher::Present) => {
                matching_rules.insert(
                    BODY_RULE.to_string(),
                    json!({ "match": "regex", "regex": PRESENT_REGEX }),
                );
                None
            }
            Some(BodyMatcher::Sha256(_)) => {
                return Err(Error::Configuration(format!(
                    "interaction \"{}\" uses a checksum matcher, which a pact file cannot express",
                    interaction.description()
                )))
            }
        };

        for (path, pattern) in expected.field_patterns() {
            matching_rules.insert(
                format!("{}{}", BODY_RULE, path.trim_start_matches('$')),
                json!({ "match": "regex", "regex": pattern }),
            );
        }

        Ok(PactInteraction {
            description: interaction.description().to_string(),
            provider_state: interaction.provider_state().map(str::to_string),
            request,
            response: PactResponse {
                status: expected.status(),
                headers: expected.headers().clone(),
                body,
                matching_rules,
            },
        })
    }
}

impl TryFrom<PactInteraction> for Interaction {
    type Error = Error;

    fn try_from(pact: PactInteraction) -> Result<Self, Self::Error> {
        let method: Method = pact.request.method.parse()?;

        let mut request = Request::new(method, pact.request.path);
        if let Some(query) = &pact.request.query {
            request.query = form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect();
        }
        request.headers = pact
            .request
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        request.body = pact.request.body.map(|body| match body {
            Value::Object(fields) => Body::Fields(fields.into_iter().collect()),
            Value::String(text) => Body::Raw(Bytes::from(text)),
            other => Body::Raw(Bytes::from(other.to_string())),
        });

        let rule = pact
            .response
            .matching_rules
            .get(BODY_RULE)
            .and_then(|rule| rule.get("match"))
            .and_then(Value::as_str);
        let matcher = match (rule, pact.response.body) {
            (Some("type"), body) => Some(BodyMatcher::Like(body.unwrap_or(Value::Null))),
            (Some("regex"), _) => Some(BodyMatcher::Present),
            (_, Some(body)) => Some(BodyMatcher::Exact(body)),
            (_, None) => None,
        };

        let mut expected = pact
            .response
            .headers
            .into_iter()
            .fold(ExpectedResponse::new(pact.response.status), |expected, (name, value)| {
                expected.with_header(name, value)
            });
        if let Some(matcher) = matcher {
            expected = expected.with_body(matcher);
        }
        for (key, rule) in &pact.response.matching_rules {
            let field = match key.strip_prefix(BODY_RULE) {
                Some(field) if field.starts_with('.') => field,
                _ => continue,
            };
            if let Some(pattern) = rule.get("regex").and_then(Value::as_str) {
                expected = expected.with_field_pattern(format!("${}", field), pattern);
            }
        }

        Ok(Interaction::new(
            pact.description,
            pact.provider_state,
            request,
            expected,
        ))
    }
}
