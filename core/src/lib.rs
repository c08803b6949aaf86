//! Networking layer for the GifFun client.
//!
//! # Overview
//! `App::start` builds the shared `AppContext` and the main-thread looper.
//! API calls are `Endpoint` implementations run through `Request`, which
//! adds the standard headers, encodes parameters, dispatches on a worker
//! thread and delivers the decoded response to a `Callback` on the thread the
//! `Delivery` policy names. `Uploader` pushes files to object storage.
//!
//! # Design
//! - No globals: the context is created once and passed by `Arc`.
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`);
//!   the only I/O seam is `Transport`, implemented for real by `HttpClient`.
//! - A request is consumed by `in_flight`, so it dispatches once and reports
//!   at most one outcome.

pub mod cache;
pub mod callback;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod looper;
pub mod request;
pub mod sign;
pub mod types;
pub mod upload;

pub use cache::ResponseCache;
pub use callback::{callback, Callback, Delivery, FnCallback};
pub use client::{HttpClient, Transport};
pub use config::{AppConfig, CacheConfig, HttpClientConfig};
pub use context::{App, AppContext, PackageInfo, PackageManager, StaticPackageManager};
pub use error::{CacheError, ConfigError, ContextError, RequestError};
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse, Params};
pub use looper::{MainHandle, MainLooper};
pub use request::{parse_response, Endpoint, Request};
pub use types::{ApiResponse, Envelope};
pub use upload::{
    FormUploader, UploadClient, UploadCompletion, UploadInfo, UploadListener, UploadOptions,
    Uploader,
};
