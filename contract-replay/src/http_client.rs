use crate::{
    data::{Body, Request, ResponseData},
    error::Error,
    util,
};
use async_trait::async_trait;
use hyper::{body, client::HttpConnector, header::CONTENT_TYPE, Client};
use hyper_tls::HttpsConnector;
use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant},
};

/// Backend jobs can take minutes to answer.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[async_trait]
pub trait HttpClient: Debug {
    /// Sends `request` to `base_url`. Non-2xx responses are returned as data.
    async fn make_request(&self, base_url: &str, request: &Request) -> Result<ResponseData, Error>;
}

#[async_trait]
impl<T: HttpClient + Send + Sync + ?Sized> HttpClient for Arc<T> {
    async fn make_request(&self, base_url: &str, request: &Request) -> Result<ResponseData, Error> {
        (**self).make_request(base_url, request).await
    }
}

#[derive(Debug, Clone)]
pub struct HyperHttpClient {
    client: Client<HttpsConnector<HttpConnector>>,
    read_timeout: Duration,
}

impl HyperHttpClient {
    pub fn new() -> Self {
        Self::with_read_timeout(DEFAULT_READ_TIMEOUT)
    }

    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            client: Client::builder().build(HttpsConnector::new()),
            read_timeout,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    async fn send(&self, url: &str, request: &Request) -> Result<ResponseData, Error> {
        let mut request_builder = hyper::Request::builder()
            .uri(url)
            .method(hyper::Method::from(request.method));

        if let Some(headers_mut) = request_builder.headers_mut() {
            util::put_headers(
                headers_mut,
                request
                    .headers
                    .iter()
                    .filter(|(header_name, _)| header_name.as_str() != "host"),
            )?;

            if matches!(request.body, Some(Body::Fields(_))) && !headers_mut.contains_key(CONTENT_TYPE) {
                headers_mut.insert(CONTENT_TYPE, FORM_CONTENT_TYPE.parse()?);
            }
        }

        let http_request = request_builder.body(match request.encoded_body()? {
            Some(bytes) => hyper::Body::from(bytes),
            None => hyper::Body::empty(),
        })?;

        let response = self.client.request(http_request).await?;

        let status_code = response.status().as_u16();
        let headers = util::extract_headers(response.headers());
        let body = body::to_bytes(response.into_body()).await?;

        Ok(ResponseData {
            status_code,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for HyperHttpClient {
    async fn make_request(&self, base_url: &str, request: &Request) -> Result<ResponseData, Error> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), request.path_and_query());

        match tokio::time::timeout(self.read_timeout, self.send(&url, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                what: format!("response to {}", request),
                attempts: 1,
            }),
        }
    }
}

impl Default for HyperHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs one event per request around any [`HttpClient`].
#[derive(Debug, Clone)]
pub struct LoggingHttpClient<C> {
    inner: C,
}

impl<C> LoggingHttpClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: HttpClient + Send + Sync> HttpClient for LoggingHttpClient<C> {
    async fn make_request(&self, base_url: &str, request: &Request) -> Result<ResponseData, Error> {
        let started = Instant::now();
        let result = self.inner.make_request(base_url, request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let method = request.method.as_str();
        let url = format!("{}{}", base_url.trim_end_matches('/'), request.path);
        let params = util::truncate(&request.parameters_text(), 30);
        let cookie = util::truncate(request.header("cookie").unwrap_or_default(), 20);

        match &result {
            Ok(response) if response.status_code >= 500 => tracing::warn!(
                method,
                %url,
                status = response.status_code,
                elapsed_ms,
                %params,
                %cookie,
                headers = ?response.headers,
                body = %response.body_text(),
                "provider answered with a server error"
            ),
            Ok(response) => tracing::info!(
                method,
                %url,
                status = response.status_code,
                elapsed_ms,
                %params,
                %cookie,
                "request completed"
            ),
            Err(e) => tracing::warn!(
                method,
                %url,
                elapsed_ms,
                %params,
                %cookie,
                error = %e,
                "request failed"
            ),
        }

        result
    }
}
