use crate::error::Error;
use hyper::{
    header::{HeaderName, HeaderValue},
    HeaderMap,
};
use std::collections::BTreeMap;

/// Collects response headers under lowercase names, joining repeated headers with ", ".
pub fn extract_headers(header_map: &HeaderMap) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::<String, String>::new();

    // it currently ignores header values with opaque characters
    for (name, value) in header_map {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }

    headers
}

pub fn put_headers<'a, I: IntoIterator<Item = (&'a String, &'a String)>>(
    header_map: &mut HeaderMap<HeaderValue>,
    headers: I,
) -> Result<(), Error> {
    for (key, value) in headers {
        let header_name = HeaderName::from_lowercase(key.to_lowercase().as_bytes())?;
        let header_value = HeaderValue::from_str(value)?;
        header_map.insert(header_name, header_value);
    }

    Ok(())
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
