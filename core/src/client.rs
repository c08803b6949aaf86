//! HTTP client built from `HttpClientConfig`.
//!
//! # Design
//! `Transport` is the single I/O seam: it turns an `HttpRequest` into an
//! `HttpResponse`. `HttpClient` is the production implementation on a ureq
//! agent. Non-2xx statuses come back as data, not errors, so status handling
//! stays in `parse_response`.

use std::time::Duration;

use tracing::{debug, warn};
use ureq::RequestBuilder;

use crate::cache::ResponseCache;
use crate::config::HttpClientConfig;
use crate::error::RequestError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes a request and returns the raw response.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError>;
}

impl<F> Transport for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, RequestError> + Send + Sync,
{
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        self(request)
    }
}

/// ureq-backed client with timeouts, a disk cache and connection retry.
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    cache: Option<ResponseCache>,
    retry_on_connection_failure: bool,
    connect_timeout: Duration,
    write_timeout: Duration,
    read_timeout: Duration,
}

impl HttpClient {
    pub fn build(config: &HttpClientConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(config.connect_timeout))
            .timeout_send_request(Some(config.write_timeout))
            .timeout_send_body(Some(config.write_timeout))
            .timeout_recv_response(Some(config.read_timeout))
            .timeout_recv_body(Some(config.read_timeout))
            .build()
            .new_agent();

        let cache = config.cache.as_ref().and_then(|c| {
            ResponseCache::open(&c.dir, c.max_size)
                .map_err(|e| {
                    warn!(dir = %c.dir.display(), error = %e, "response cache disabled");
                })
                .ok()
        });

        Self {
            agent,
            cache,
            retry_on_connection_failure: config.retry_on_connection_failure,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            read_timeout: config.read_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn retries_on_connection_failure(&self) -> bool {
        self.retry_on_connection_failure
    }

    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ureq::Error> {
        let body = request.body.as_deref().unwrap_or("");
        let result = match request.method {
            HttpMethod::Get => apply_headers(self.agent.get(&request.url), request).call(),
            HttpMethod::Post => apply_headers(self.agent.post(&request.url), request).send(body),
            HttpMethod::Put => apply_headers(self.agent.put(&request.url), request).send(body),
            HttpMethod::Delete => {
                apply_headers(self.agent.delete(&request.url), request)
                    .force_send_body()
                    .send(body)
            }
        };
        let mut response = result?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.body_mut().read_to_string()?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn send_with_retry(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        match self.send(request) {
            Ok(response) => Ok(response),
            Err(e) if self.retry_on_connection_failure && is_connection_failure(&e) => {
                warn!(url = %request.url, error = %e, "connection failed, retrying once");
                self.send(request).map_err(RequestError::from)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for HttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RequestError> {
        let cache = self
            .cache
            .as_ref()
            .filter(|_| request.method == HttpMethod::Get);

        if let Some(cache) = cache {
            match cache.get(&request.url) {
                Ok(Some(hit)) => {
                    debug!(url = %request.url, "served from cache");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!(url = %request.url, error = %e, "cache read failed"),
            }
        }

        debug!(method = %request.method, url = %request.url, "--> request");
        let response = self.send_with_retry(request)?;
        debug!(status = response.status, url = %request.url, bytes = response.body.len(), "<-- response");

        if let Some(cache) = cache {
            if let Err(e) = cache.put(&request.url, &response) {
                warn!(url = %request.url, error = %e, "cache write failed");
            }
        }
        Ok(response)
    }
}

fn apply_headers<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn is_connection_failure(err: &ureq::Error) -> bool {
    matches!(err, ureq::Error::ConnectionFailed | ureq::Error::Io(_))
}
