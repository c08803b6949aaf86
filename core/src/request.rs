//! Generic request executor.
//!
//! # Design
//! Each API call is an `Endpoint`: a url, a method, optional params and an
//! optional header hook, plus the response type it decodes into. `Request`
//! wraps an endpoint with client settings and a listener, and is consumed by
//! `in_flight`, so settings cannot change after the client is built and each
//! request dispatches exactly once.
//!
//! The pure halves are public: `build_request` produces the `HttpRequest`
//! that will go on the wire and `parse_response` turns an `HttpResponse` into
//! the endpoint's response type.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::callback::{Callback, Delivery, Listener, ListenerSlot};
use crate::client::{HttpClient, Transport};
use crate::config::HttpClientConfig;
use crate::context::AppContext;
use crate::error::RequestError;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse, Params};
use crate::types::ApiResponse;

pub const HEADER_USER_AGENT: &str = "User-Agent";
pub const HEADER_USER_AGENT_VALUE: &str = "GifFun Android";
pub const HEADER_APP_VERSION: &str = "appv";
pub const HEADER_APP_SIGN: &str = "apps";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// One API call: where it goes, how, and what comes back.
pub trait Endpoint {
    type Response: ApiResponse;

    fn url(&self, ctx: &AppContext) -> String;

    fn method(&self) -> HttpMethod;

    /// Parameters for this call. Read once when the `Request` is created.
    fn params(&self) -> Option<Params> {
        None
    }

    /// Extra headers, added after the standard ones.
    fn headers(&self, _ctx: &AppContext, _headers: &mut Headers) {}
}

/// A single, not yet dispatched call to an endpoint.
pub struct Request<E: Endpoint> {
    ctx: Arc<AppContext>,
    endpoint: E,
    params: Option<Params>,
    config: HttpClientConfig,
    listener: ListenerSlot<E::Response>,
}

impl<E: Endpoint> Request<E> {
    /// Create a request with 10 s timeouts, the disk cache and connection
    /// retry enabled.
    pub fn new(ctx: Arc<AppContext>, endpoint: E) -> Self {
        let config = HttpClientConfig::for_app(ctx.config());
        let params = endpoint.params();
        Self {
            ctx,
            endpoint,
            params,
            config,
            listener: ListenerSlot::empty(),
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    pub fn client_config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Replace the client settings wholesale.
    pub fn with_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach `callback`, replacing any previous one.
    pub fn set_listener<C>(&mut self, callback: C, delivery: Delivery) -> &mut Self
    where
        C: Callback<E::Response>,
    {
        self.listener.replace(Some(Listener {
            callback: Box::new(callback),
            delivery,
        }));
        self
    }

    pub fn clear_listener(&mut self) -> &mut Self {
        self.listener.replace(None);
        self
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_set()
    }

    pub fn connect_timeout(&mut self, seconds: u64) -> &mut Self {
        self.config.connect_timeout = Duration::from_secs(seconds);
        self
    }

    pub fn write_timeout(&mut self, seconds: u64) -> &mut Self {
        self.config.write_timeout = Duration::from_secs(seconds);
        self
    }

    pub fn read_timeout(&mut self, seconds: u64) -> &mut Self {
        self.config.read_timeout = Duration::from_secs(seconds);
        self
    }

    /// Assemble the outgoing request.
    ///
    /// GET parameters are appended to the URL as a query string; every other
    /// method sends them as a form body. Parameters without a value are left
    /// out in both cases.
    pub fn build_request(&self) -> HttpRequest {
        let method = self.endpoint.method();
        let mut headers = Headers::new();
        headers
            .add(HEADER_USER_AGENT, HEADER_USER_AGENT_VALUE)
            .add(HEADER_APP_VERSION, self.ctx.app_version())
            .add(HEADER_APP_SIGN, self.ctx.app_sign());
        self.endpoint.headers(&self.ctx, &mut headers);

        let mut url = self.endpoint.url(&self.ctx);
        let encoded = self.params.as_ref().map(Params::encode).unwrap_or_default();
        let body = if method.has_form_body() {
            headers.add("Content-Type", FORM_CONTENT_TYPE);
            Some(encoded)
        } else {
            if !encoded.is_empty() {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(&encoded);
            }
            None
        };

        HttpRequest {
            method,
            url,
            headers: headers.into_vec(),
            body,
        }
    }

    /// Build the HTTP client from the current settings and dispatch.
    pub fn in_flight(self) -> Result<(), RequestError>
    where
        E: 'static,
    {
        let client = HttpClient::build(&self.config);
        self.in_flight_with(Arc::new(client))
    }

    /// Dispatch on a worker thread through `transport`. Returns once the
    /// worker is started; the outcome goes to the listener.
    pub fn in_flight_with(self, transport: Arc<dyn Transport>) -> Result<(), RequestError>
    where
        E: 'static,
    {
        let request = self.build_request();
        let main = self.ctx.main_handle().clone();
        let mut listener = self.listener;
        debug!(method = %request.method, url = %request.url, "dispatching request");

        thread::Builder::new()
            .name("giffun-net".to_string())
            .spawn(move || {
                let outcome = transport
                    .execute(&request)
                    .and_then(parse_response::<E::Response>);
                if let Err(e) = &outcome {
                    warn!(method = %request.method, url = %request.url, error = %e, "request failed");
                }
                listener.notify(outcome, &main);
            })
            .map(|_| ())
            .map_err(|e| RequestError::Dispatch(e.to_string()))
    }
}

/// Decode a response: 2xx bodies are parsed as JSON into `T`, anything else
/// is a `Status` error.
pub fn parse_response<T: DeserializeOwned>(response: HttpResponse) -> Result<T, RequestError> {
    if !response.is_success() {
        return Err(RequestError::Status {
            code: response.status,
        });
    }
    Ok(serde_json::from_str(&response.body)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::mpsc;

    use super::*;
    use crate::callback::callback;
    use crate::config::AppConfig;
    use crate::context::App;
    use crate::types::Envelope;

    struct Echo {
        method: HttpMethod,
        params: Option<Params>,
    }

    impl Endpoint for Echo {
        type Response = Envelope;

        fn url(&self, _ctx: &AppContext) -> String {
            "https://x/y".to_string()
        }

        fn method(&self) -> HttpMethod {
            self.method
        }

        fn params(&self) -> Option<Params> {
            self.params.clone()
        }
    }

    fn app() -> App {
        App::from_config(AppConfig {
            version_name: "1.2.3".to_string(),
            ..AppConfig::default()
        })
    }

    fn request(app: &App, method: HttpMethod, params: Option<Params>) -> Request<Echo> {
        Request::new(Arc::clone(app.context()), Echo { method, params })
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn standard_headers_always_present() {
        let app = app();
        let req = request(&app, HttpMethod::Get, None).build_request();
        assert_eq!(req.header("User-Agent"), Some("GifFun Android"));
        assert_eq!(req.header("appv"), Some("1.2.3"));
        assert_eq!(req.header("apps"), Some(app.context().app_sign().as_str()));
    }

    #[test]
    fn get_params_become_query_pairs() {
        let app = app();
        let params: Params = [("a", "1"), ("b", "2")].into_iter().collect();
        let req = request(&app, HttpMethod::Get, Some(params)).build_request();

        let (base, query) = req.url.split_once('?').unwrap();
        assert_eq!(base, "https://x/y");
        let pairs: HashSet<&str> = query.split('&').collect();
        assert_eq!(pairs, HashSet::from(["a=1", "b=2"]));
        assert!(req.body.is_none());
    }

    #[test]
    fn get_without_params_keeps_url() {
        let app = app();
        let req = request(&app, HttpMethod::Get, Some(Params::new())).build_request();
        assert_eq!(req.url, "https://x/y");
    }

    #[test]
    fn form_methods_skip_absent_values() {
        let app = app();
        for method in [HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete] {
            let mut params = Params::new();
            params.insert("a", "1").insert_opt("b", None);
            let req = request(&app, method, Some(params)).build_request();
            assert_eq!(req.url, "https://x/y", "{method}");
            assert_eq!(req.body.as_deref(), Some("a=1"), "{method}");
            assert_eq!(
                req.header("content-type"),
                Some("application/x-www-form-urlencoded")
            );
        }
    }

    #[test]
    fn timeouts_update_config_before_dispatch() {
        let app = app();
        let mut req = request(&app, HttpMethod::Get, None);
        assert_eq!(req.client_config().connect_timeout, Duration::from_secs(10));
        req.connect_timeout(3).write_timeout(4).read_timeout(5);
        assert_eq!(req.client_config().connect_timeout, Duration::from_secs(3));
        assert_eq!(req.client_config().write_timeout, Duration::from_secs(4));
        assert_eq!(req.client_config().read_timeout, Duration::from_secs(5));
        assert!(req.client_config().retry_on_connection_failure);
    }

    #[test]
    fn params_are_read_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(Arc<AtomicUsize>);

        impl Endpoint for Counting {
            type Response = Envelope;

            fn url(&self, _ctx: &AppContext) -> String {
                "https://x/y".to_string()
            }

            fn method(&self) -> HttpMethod {
                HttpMethod::Get
            }

            fn params(&self) -> Option<Params> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some([("a", "1")].into_iter().collect())
            }
        }

        let app = app();
        let calls = Arc::new(AtomicUsize::new(0));
        let req = Request::new(Arc::clone(app.context()), Counting(Arc::clone(&calls)));
        req.build_request();
        req.build_request();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_success_body() {
        let env: Envelope = parse_response(ok(r#"{"status":0,"msg":"<ok>"}"#)).unwrap();
        assert_eq!(env.message, "<ok>");
    }

    #[test]
    fn parse_non_success_status() {
        let mut resp = ok("");
        resp.status = 500;
        let err = parse_response::<Envelope>(resp).unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    #[test]
    fn parse_malformed_body() {
        let err = parse_response::<Envelope>(ok("not json")).unwrap_err();
        assert!(matches!(err, RequestError::Parse(_)));
    }

    #[test]
    fn calling_thread_delivery_runs_on_worker() {
        let app = app();
        let (tx, rx) = mpsc::channel();
        let transport: Arc<dyn Transport> =
            Arc::new(|_: &HttpRequest| -> Result<HttpResponse, RequestError> {
                Ok(ok(r#"{"status":0,"msg":"done"}"#))
            });

        let mut req = request(&app, HttpMethod::Get, None);
        let tx_err = tx.clone();
        req.set_listener(
            callback(
                move |env: Envelope| tx.send((thread::current().id(), Ok(env))).unwrap(),
                move |e| tx_err.send((thread::current().id(), Err(e))).unwrap(),
            ),
            Delivery::CallingThread,
        );
        req.in_flight_with(transport).unwrap();

        let (thread_id, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread_id, thread::current().id());
        assert_eq!(outcome.unwrap().message, "done");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn main_thread_delivery_runs_on_looper() {
        let app = app();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let transport: Arc<dyn Transport> =
            Arc::new(|_: &HttpRequest| -> Result<HttpResponse, RequestError> {
                Err(RequestError::Transport("connection reset".to_string()))
            });

        let mut req = request(&app, HttpMethod::Post, None);
        let ok_seen = Arc::clone(&seen);
        let err_seen = Arc::clone(&seen);
        req.set_listener(
            callback(
                move |_: Envelope| ok_seen.lock().unwrap().push(("ok", thread::current().id())),
                move |_| err_seen.lock().unwrap().push(("err", thread::current().id())),
            ),
            Delivery::MainThread,
        );
        req.in_flight_with(transport).unwrap();

        assert!(app
            .looper()
            .run_until(Duration::from_secs(5), || !seen.lock().unwrap().is_empty()));
        app.looper().run_for(Duration::from_millis(50));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("err", thread::current().id()));
    }
}
