use crate::error::Error;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{borrow::Cow, collections::BTreeMap, fmt, str::FromStr};
use url::form_urlencoded;

/// The HTTP verbs an interaction may use.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Put,
    Post,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// POST and PUT carry their parameters as a body, every other verb as a query.
    pub fn carries_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(Error::UnsupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for hyper::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => hyper::Method::GET,
            Method::Put => hyper::Method::PUT,
            Method::Post => hyper::Method::POST,
            Method::Delete => hyper::Method::DELETE,
            Method::Head => hyper::Method::HEAD,
            Method::Options => hyper::Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Structured fields, sent as JSON when the request declares a JSON content type and
    /// form-encoded otherwise.
    Fields(BTreeMap<String, Value>),
    Raw(Bytes),
}

/// A concrete request. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Body>,
}

impl Request {
    pub fn new<S: Into<String>>(method: Method, path: S) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query<S1: Into<String>, S2: Into<String>>(mut self, name: S1, value: S2) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header<S1: AsRef<str>, S2: Into<String>>(mut self, name: S1, value: S2) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish()
    }

    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    fn wants_json(&self) -> bool {
        self.header("content-type")
            .map(|content_type| content_type.contains("json"))
            .unwrap_or(false)
    }

    /// Encodes the body for the wire.
    pub fn encoded_body(&self) -> Result<Option<Bytes>, Error> {
        match &self.body {
            None => Ok(None),
            Some(Body::Raw(bytes)) => Ok(Some(bytes.clone())),
            Some(Body::Fields(fields)) if self.wants_json() => {
                Ok(Some(Bytes::from(serde_json::to_vec(fields)?)))
            }
            Some(Body::Fields(fields)) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter().map(|(key, value)| (key, field_text(value))))
                    .finish();
                Ok(Some(Bytes::from(encoded)))
            }
        }
    }

    /// The parameters in text form: the query for bodiless verbs, the body otherwise.
    pub fn parameters_text(&self) -> String {
        match &self.body {
            Some(Body::Fields(fields)) => serde_json::to_string(fields).unwrap_or_default(),
            Some(Body::Raw(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            None => self.query_string(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_and_query())
    }
}

pub(crate) fn field_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl ResponseData {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Turns a non-2xx response into an error that still carries the status and body.
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::UnexpectedStatus {
                status: self.status_code,
                body: self.body_text().into_owned(),
            })
        }
    }
}

impl fmt::Display for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code, self.body_text())
    }
}
