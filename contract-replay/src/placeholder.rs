//! Substitution of `**name**` tokens in an outgoing request.
//!
//! Only the query and the body are scanned. A token without a stashed value fails the whole
//! resolution before anything is rewritten, so a half-resolved request never reaches the wire.

use crate::{
    data::{Body, Request},
    error::Error,
};
use hyper::body::Bytes;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\*\*(?P<name>[A-Za-z0-9_.\-]+)\*\*").unwrap();
}

/// Renders the token for `name`, e.g. `**known_id**`.
pub fn placeholder(name: &str) -> String {
    format!("**{}**", name)
}

/// Names of all tokens present in the query and body of `request`.
pub fn placeholders(request: &Request) -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    for (_, value) in &request.query {
        collect_names(value, &mut names);
    }

    match &request.body {
        Some(Body::Fields(fields)) => {
            for value in fields.values() {
                collect_value_names(value, &mut names);
            }
        }
        Some(Body::Raw(bytes)) => {
            if let Ok(text) = std::str::from_utf8(bytes) {
                collect_names(text, &mut names);
            }
        }
        None => {}
    }

    names
}

/// Replaces every token in the query and body of `request` with its value from `values`.
pub fn resolve(request: &mut Request, values: &BTreeMap<String, String>) -> Result<(), Error> {
    let names = placeholders(request);
    if let Some(missing) = names.iter().find(|name| !values.contains_key(*name)) {
        return Err(Error::UnresolvedPlaceholder(missing.clone()));
    }
    if names.is_empty() {
        return Ok(());
    }

    for (_, value) in request.query.iter_mut() {
        substitute(value, values);
    }

    match &mut request.body {
        Some(Body::Fields(fields)) => {
            for value in fields.values_mut() {
                substitute_value(value, values);
            }
        }
        Some(Body::Raw(bytes)) => {
            let replaced = std::str::from_utf8(bytes)
                .ok()
                .filter(|text| PLACEHOLDER_REGEX.is_match(text))
                .map(|text| replace_tokens(text, values));
            if let Some(text) = replaced {
                *bytes = Bytes::from(text);
            }
        }
        None => {}
    }

    Ok(())
}

fn collect_names(text: &str, names: &mut BTreeSet<String>) {
    for captures in PLACEHOLDER_REGEX.captures_iter(text) {
        names.insert(captures["name"].to_string());
    }
}

fn collect_value_names(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(text) => collect_names(text, names),
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_value_names(item, names)),
        Value::Object(fields) => fields
            .values()
            .for_each(|item| collect_value_names(item, names)),
        _ => {}
    }
}

fn replace_tokens(text: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(text, |captures: &Captures| {
            values.get(&captures["name"]).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn substitute(text: &mut String, values: &BTreeMap<String, String>) {
    if PLACEHOLDER_REGEX.is_match(text) {
        *text = replace_tokens(text, values);
    }
}

fn substitute_value(value: &mut Value, values: &BTreeMap<String, String>) {
    match value {
        Value::String(text) => substitute(text, values),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| substitute_value(item, values)),
        Value::Object(fields) => fields
            .values_mut()
            .for_each(|item| substitute_value(item, values)),
        _ => {}
    }
}
