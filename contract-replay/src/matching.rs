use crate::data::ResponseData;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt};

const ABSENT: &str = "<absent>";

/// How an expected response body is compared with the actual one.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyMatcher {
    /// Values must be equal. Object keys the expectation does not mention are ignored.
    Exact(Value),
    /// Values must have the same shape: same JSON types, same object keys, and every array
    /// element shaped like the first expected element.
    Like(Value),
    /// Any non-empty body.
    Present,
    /// SHA-256 of the raw body bytes, hex encoded.
    Sha256(String),
}

/// One difference between the expected and the actual response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Mismatch {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    pub fn new<P: Into<String>, E: Into<String>, A: Into<String>>(
        path: P,
        expected: E,
        actual: A,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.path, self.expected, self.actual
        )
    }
}

/// The response an interaction expects from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Option<BodyMatcher>,
    /// Regular expressions that string fields of a JSON body must match, keyed by path.
    field_patterns: BTreeMap<String, String>,
}

impl ExpectedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
            field_patterns: BTreeMap::new(),
        }
    }

    /// Requires the string at `path` (`$.key.key`) to match `pattern` somewhere. Applies on
    /// top of the body matcher.
    pub fn with_field_pattern<P: Into<String>, R: Into<String>>(mut self, path: P, pattern: R) -> Self {
        self.field_patterns.insert(path.into(), pattern.into());
        self
    }

    pub fn field_patterns(&self) -> &BTreeMap<String, String> {
        &self.field_patterns
    }

    pub fn with_body(mut self, matcher: BodyMatcher) -> Self {
        self.body = Some(matcher);
        self
    }

    pub fn with_header<S1: AsRef<str>, S2: Into<String>>(mut self, name: S1, value: S2) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&BodyMatcher> {
        self.body.as_ref()
    }

    /// Compares `actual` against this expectation. An empty result means it matched.
    pub fn verify(&self, actual: &ResponseData) -> Vec<Mismatch> {
        let mut mismatches = Vec::new();

        if self.status != actual.status_code {
            mismatches.push(Mismatch::new(
                "status",
                self.status.to_string(),
                actual.status_code.to_string(),
            ));
        }

        for (name, expected) in &self.headers {
            match actual.header(name) {
                Some(value) if value.trim() == expected.trim() => {}
                Some(value) => {
                    mismatches.push(Mismatch::new(format!("header:{}", name), expected, value))
                }
                None => {
                    mismatches.push(Mismatch::new(format!("header:{}", name), expected, ABSENT))
                }
            }
        }

        if let Some(matcher) = &self.body {
            matcher.check(&actual.body, &mut mismatches);
        }

        if !self.field_patterns.is_empty() {
            let body = parse_body(&actual.body);
            for (path, pattern) in &self.field_patterns {
                check_pattern(&body, path, pattern, &mut mismatches);
            }
        }

        mismatches
    }
}

fn check_pattern(body: &Value, path: &str, pattern: &str, mismatches: &mut Vec<Mismatch>) {
    let expected = format!("a string matching /{}/", pattern);
    let regex = match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => {
            mismatches.push(Mismatch::new(path, expected, format!("<invalid pattern: {}>", e)));
            return;
        }
    };

    match field(body, path) {
        Some(Value::String(text)) if regex.is_match(text) => {}
        Some(value) => mismatches.push(Mismatch::new(path, expected, value.to_string())),
        None => mismatches.push(Mismatch::new(path, expected, ABSENT)),
    }
}

fn field<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.trim_start_matches('$')
        .split('.')
        .filter(|key| !key.is_empty())
        .try_fold(body, |value, key| value.get(key))
}

impl BodyMatcher {
    pub fn check(&self, body: &[u8], mismatches: &mut Vec<Mismatch>) {
        match self {
            BodyMatcher::Exact(expected) => compare_exact(expected, &parse_body(body), "$", mismatches),
            BodyMatcher::Like(expected) => compare_like(expected, &parse_body(body), "$", mismatches),
            BodyMatcher::Present => {
                if body.iter().all(u8::is_ascii_whitespace) {
                    mismatches.push(Mismatch::new("$", "any body", "<empty>"));
                }
            }
            BodyMatcher::Sha256(expected) => {
                let actual = sha256_hex(body);
                if !actual.eq_ignore_ascii_case(expected.trim()) {
                    mismatches.push(Mismatch::new("sha256($)", expected.as_str(), actual));
                }
            }
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// Bodies that are not JSON are compared as a JSON string holding their text.
fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn compare_exact(expected: &Value, actual: &Value, path: &str, mismatches: &mut Vec<Mismatch>) {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            for (key, expected_value) in expected {
                let child = format!("{}.{}", path, key);
                match actual.get(key) {
                    Some(actual_value) => {
                        compare_exact(expected_value, actual_value, &child, mismatches)
                    }
                    None => mismatches.push(Mismatch::new(child, expected_value.to_string(), ABSENT)),
                }
            }
        }
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() != actual.len() {
                mismatches.push(Mismatch::new(
                    path,
                    format!("{} element(s)", expected.len()),
                    format!("{} element(s)", actual.len()),
                ));
                return;
            }
            for (index, (expected_item, actual_item)) in expected.iter().zip(actual).enumerate() {
                compare_exact(
                    expected_item,
                    actual_item,
                    &format!("{}[{}]", path, index),
                    mismatches,
                );
            }
        }
        (expected, actual) => {
            if expected != actual {
                mismatches.push(Mismatch::new(path, expected.to_string(), actual.to_string()));
            }
        }
    }
}

fn compare_like(expected: &Value, actual: &Value, path: &str, mismatches: &mut Vec<Mismatch>) {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            for (key, expected_value) in expected {
                let child = format!("{}.{}", path, key);
                match actual.get(key) {
                    Some(actual_value) => compare_like(expected_value, actual_value, &child, mismatches),
                    None => mismatches.push(Mismatch::new(
                        child,
                        format!("a {}", kind(expected_value)),
                        ABSENT,
                    )),
                }
            }
        }
        (Value::Array(expected), Value::Array(actual)) => {
            if let Some(template) = expected.first() {
                for (index, actual_item) in actual.iter().enumerate() {
                    compare_like(template, actual_item, &format!("{}[{}]", path, index), mismatches);
                }
            }
        }
        (expected, actual) => {
            if kind(expected) != kind(actual) {
                mismatches.push(Mismatch::new(
                    path,
                    format!("a {}", kind(expected)),
                    format!("{} {}", kind(actual), actual),
                ));
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
