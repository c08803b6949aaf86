//! File upload to Qiniu-style object storage.
//!
//! # Design
//! `UploadClient` is the seam to the storage SDK: a blocking `put` that
//! returns the assigned key and an `UploadInfo`. `FormUploader` implements it
//! on the Qiniu upload manager's form uploader, wiring progress and
//! cancellation through the SDK callbacks. `Uploader` runs a put on a worker thread,
//! forwards progress, routes the outcome to an `UploadListener`, and owns the
//! cancellation flag every upload it starts consults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use mime::Mime;
use qiniu_upload_manager::apis::http_client::{
    Endpoint, Region, ResponseError, ResponseErrorKind,
};
use qiniu_upload_manager::{
    FormUploader as QiniuFormUploader, ObjectParams, SinglePartUploader, UploadManager,
    UploadTokenSigner, UploaderWithCallbacks,
};
use qiniu_upload_token::StaticUploadTokenProvider;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::AppContext;

pub const STATUS_OK: i32 = 200;
pub const STATUS_NETWORK_ERROR: i32 = -1;
pub const STATUS_CANCELLED: i32 = -2;
pub const STATUS_INVALID_FILE: i32 = -3;
pub const STATUS_INVALID_ARGUMENT: i32 = -4;
pub const STATUS_INVALID_TOKEN: i32 = -5;

const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Completion details for one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadInfo {
    /// HTTP status, or one of the negative `STATUS_*` codes for local failures.
    pub status_code: i32,
    /// `X-Reqid` returned by the storage service.
    pub req_id: Option<String>,
    pub error: Option<String>,
    pub response: Option<Value>,
    pub host: String,
    pub duration: Duration,
}

impl UploadInfo {
    fn local(status_code: i32, error: impl Into<String>, host: &str) -> Self {
        Self {
            status_code,
            req_id: None,
            error: Some(error.into()),
            response: None,
            host: host.to_string(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == STATUS_OK && self.error.is_none() && self.req_id.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status_code == STATUS_CANCELLED
    }

    pub fn is_network_broken(&self) -> bool {
        self.status_code == STATUS_NETWORK_ERROR
    }
}

/// Progress handler: receives the object key and the fraction sent, 0.0..=1.0.
pub type ProgressHandler = Arc<dyn Fn(&str, f64) + Send + Sync>;

/// Per-upload options handed to the `UploadClient`.
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub mime_type: Option<String>,
    pub progress: Option<ProgressHandler>,
    /// Polled while the file streams; once set the upload stops.
    pub cancelled: Arc<AtomicBool>,
}

impl UploadOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of `UploadClient::put`.
#[derive(Debug, Clone)]
pub struct UploadCompletion {
    pub key: String,
    pub info: Option<UploadInfo>,
}

/// The storage SDK seam.
pub trait UploadClient: Send + Sync {
    fn put(&self, file: &Path, key: &str, token: &str, options: &UploadOptions) -> UploadCompletion;
}

/// Receives upload outcomes. Called on the upload worker thread.
pub trait UploadListener: Send + Sync {
    fn on_success(&self, key: &str);
    fn on_failure(&self, info: &UploadInfo);
    fn on_progress(&self, percent: f64);
}

/// Form upload through the Qiniu SDK: one multipart POST carrying the token,
/// key and file to the configured upload host.
#[derive(Debug, Clone)]
pub struct FormUploader {
    host: String,
    endpoint: Option<Endpoint>,
    use_https: bool,
}

impl FormUploader {
    /// `host` is a URL such as `https://upload.qiniup.com`. Only its scheme and
    /// authority are used; a host without a scheme is reached over HTTPS.
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        let (use_https, authority) = split_host(&host);
        let endpoint = match authority.parse::<Endpoint>() {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(%host, error = %e, "invalid upload host");
                None
            }
        };
        Self {
            host,
            endpoint,
            use_https,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn finish(
        &self,
        key: &str,
        started: Instant,
        result: Result<Value, ResponseError>,
        req_id: Option<String>,
        options: &UploadOptions,
    ) -> UploadCompletion {
        let duration = started.elapsed();
        let info = match result {
            Ok(body) => {
                let assigned = body
                    .get("key")
                    .and_then(Value::as_str)
                    .unwrap_or(key)
                    .to_string();
                return UploadCompletion {
                    key: assigned,
                    info: Some(UploadInfo {
                        status_code: STATUS_OK,
                        req_id,
                        error: None,
                        response: Some(body),
                        host: self.host.clone(),
                        duration,
                    }),
                };
            }
            Err(_) if options.is_cancelled() => {
                UploadInfo::local(STATUS_CANCELLED, CANCELLED_MESSAGE, &self.host)
            }
            Err(e) => {
                // Body read failures and dropped connections land here with no
                // status, so they can never pass as a successful upload.
                let status_code = match e.kind() {
                    ResponseErrorKind::StatusCodeError(code) => i32::from(code.as_u16()),
                    _ => STATUS_NETWORK_ERROR,
                };
                UploadInfo {
                    status_code,
                    req_id: e
                        .x_reqid()
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                        .or(req_id),
                    ..UploadInfo::local(status_code, e.to_string(), &self.host)
                }
            }
        };
        UploadCompletion {
            key: key.to_string(),
            info: Some(UploadInfo { duration, ..info }),
        }
    }
}

/// `(use_https, authority)` from an upload host URL.
fn split_host(host: &str) -> (bool, &str) {
    let (use_https, rest) = match host.split_once("://") {
        Some((scheme, rest)) => (!scheme.eq_ignore_ascii_case("http"), rest),
        None => (true, host),
    };
    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    (use_https, authority)
}

impl UploadClient for FormUploader {
    fn put(&self, file: &Path, key: &str, token: &str, options: &UploadOptions) -> UploadCompletion {
        let fail = |code, msg: String| UploadCompletion {
            key: key.to_string(),
            info: Some(UploadInfo::local(code, msg, &self.host)),
        };
        if file.as_os_str().is_empty() {
            return fail(STATUS_INVALID_ARGUMENT, "no file path".to_string());
        }
        let Some(endpoint) = self.endpoint.clone() else {
            return fail(STATUS_INVALID_ARGUMENT, format!("invalid upload host {}", self.host));
        };
        if token.is_empty() {
            return fail(STATUS_INVALID_TOKEN, "no token".to_string());
        }
        if options.is_cancelled() {
            return fail(STATUS_CANCELLED, CANCELLED_MESSAGE.to_string());
        }
        let total = match fs::metadata(file) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => return fail(STATUS_INVALID_FILE, "file is empty".to_string()),
            Err(e) => return fail(STATUS_INVALID_FILE, format!("{}: {e}", file.display())),
        };

        let manager = UploadManager::builder(UploadTokenSigner::new_upload_token_provider(
            StaticUploadTokenProvider::new(token.to_string()),
        ))
        .use_https(self.use_https)
        .build();
        let mut uploader = QiniuFormUploader::new(manager);

        let cancelled = Arc::clone(&options.cancelled);
        uploader.on_before_request(move |_| {
            if cancelled.load(Ordering::SeqCst) {
                Err(anyhow!(CANCELLED_MESSAGE))
            } else {
                Ok(())
            }
        });

        let cancelled = Arc::clone(&options.cancelled);
        let progress = options.progress.clone();
        let progress_key = key.to_string();
        uploader.on_upload_progress(move |transfer| {
            if let Some(progress) = &progress {
                let sent = transfer.transferred_bytes();
                let of = transfer.total_bytes().filter(|t| *t > 0).unwrap_or(total);
                progress(&progress_key, (sent as f64 / of as f64).min(1.0));
            }
            // A listener may cancel from inside its progress callback.
            if cancelled.load(Ordering::SeqCst) {
                return Err(anyhow!(CANCELLED_MESSAGE));
            }
            Ok(())
        });

        let req_id = Arc::new(OnceLock::new());
        let seen = Arc::clone(&req_id);
        uploader.on_response_ok(move |parts| {
            if let Some(value) = parts.headers().get("x-reqid").and_then(|v| v.to_str().ok()) {
                seen.get_or_init(|| value.to_string());
            }
            Ok(())
        });

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());
        let mut params = ObjectParams::builder();
        params
            .region_provider(
                Region::builder("giffun")
                    .add_up_preferred_endpoint(endpoint)
                    .build(),
            )
            .object_name(key.to_string())
            .file_name(file_name);
        if let Some(mime) = options.mime_type.as_deref() {
            match mime.parse::<Mime>() {
                Ok(mime) => {
                    params.content_type(mime);
                }
                Err(e) => warn!(%mime, error = %e, "ignoring invalid mime type"),
            }
        }

        debug!(host = %self.host, %key, bytes = total, "form upload started");
        let started = Instant::now();
        let result = uploader.upload_path(file, params.build());
        self.finish(key, started, result, req_id.get().cloned(), options)
    }
}

/// Runs uploads in the background and reports to an `UploadListener`.
#[derive(Clone)]
pub struct Uploader {
    client: Arc<dyn UploadClient>,
    cancelled: Arc<AtomicBool>,
}

impl Uploader {
    pub fn new(client: impl UploadClient + 'static) -> Self {
        Self {
            client: Arc::new(client),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uploader posting to the context's configured upload host.
    pub fn for_app(ctx: &AppContext) -> Self {
        Self::new(FormUploader::new(ctx.upload_host()))
    }

    /// Upload `file_path` as `key`. The returned handle finishes after the
    /// listener has been told the outcome.
    pub fn upload(
        &self,
        file_path: impl Into<PathBuf>,
        key: impl Into<String>,
        token: impl Into<String>,
        listener: Option<Arc<dyn UploadListener>>,
    ) -> io::Result<JoinHandle<()>> {
        let file_path = file_path.into();
        let key = key.into();
        let token = token.into();
        let client = Arc::clone(&self.client);
        let options = UploadOptions {
            mime_type: None,
            progress: listener.clone().map(|l| {
                Arc::new(move |_: &str, percent: f64| l.on_progress(percent)) as ProgressHandler
            }),
            cancelled: Arc::clone(&self.cancelled),
        };

        thread::Builder::new()
            .name("giffun-upload".to_string())
            .spawn(move || {
                let completion = client.put(&file_path, &key, &token, &options);
                let (Some(listener), Some(info)) = (listener, completion.info) else {
                    return;
                };
                if info.is_ok() {
                    info!(key = %completion.key, elapsed = ?info.duration, "upload finished");
                    listener.on_success(&completion.key);
                } else {
                    warn!(
                        key = %completion.key,
                        status = info.status_code,
                        error = ?info.error,
                        "upload failed"
                    );
                    listener.on_failure(&info);
                }
            })
    }

    /// Ask in-flight and future uploads from this uploader to stop. The
    /// client checks the flag between chunks; it does not interrupt I/O.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl UploadListener for Recorder {
        fn on_success(&self, key: &str) {
            self.0.lock().unwrap().push(format!("success {key}"));
        }

        fn on_failure(&self, info: &UploadInfo) {
            self.0.lock().unwrap().push(format!("failure {}", info.status_code));
        }

        fn on_progress(&self, percent: f64) {
            self.0.lock().unwrap().push(format!("progress {percent:.1}"));
        }
    }

    struct Scripted(Option<UploadInfo>);

    impl UploadClient for Scripted {
        fn put(
            &self,
            _file: &Path,
            key: &str,
            _token: &str,
            options: &UploadOptions,
        ) -> UploadCompletion {
            if let Some(progress) = &options.progress {
                progress(key, 0.5);
                progress(key, 1.0);
            }
            UploadCompletion {
                key: format!("assigned/{key}"),
                info: self.0.clone(),
            }
        }
    }

    fn info(status_code: i32, req_id: Option<&str>) -> UploadInfo {
        UploadInfo {
            status_code,
            req_id: req_id.map(str::to_string),
            error: None,
            response: None,
            host: "test".to_string(),
            duration: Duration::ZERO,
        }
    }

    fn run(client: Scripted) -> Vec<String> {
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn UploadListener> = recorder.clone();
        Uploader::new(client)
            .upload("/tmp/a.gif", "a.gif", "token", Some(listener))
            .unwrap()
            .join()
            .unwrap();
        let log = recorder.0.lock().unwrap().clone();
        log
    }

    #[test]
    fn ok_info_routes_to_success_with_assigned_key() {
        let log = run(Scripted(Some(info(200, Some("req-1")))));
        assert_eq!(log, vec!["progress 0.5", "progress 1.0", "success assigned/a.gif"]);
    }

    #[test]
    fn non_ok_info_routes_to_failure() {
        let log = run(Scripted(Some(info(401, Some("req-2")))));
        assert_eq!(log.last().unwrap(), "failure 401");

        let log = run(Scripted(Some(info(200, None))));
        assert_eq!(log.last().unwrap(), "failure 200");
    }

    #[test]
    fn missing_info_reports_nothing_but_progress() {
        let log = run(Scripted(None));
        assert_eq!(log, vec!["progress 0.5", "progress 1.0"]);
    }

    #[test]
    fn cancel_is_shared_and_sticky() {
        let uploader = Uploader::new(Scripted(None));
        let other = uploader.clone();
        assert!(!uploader.is_cancelled());
        other.cancel();
        assert!(uploader.is_cancelled());
    }

    #[test]
    fn form_uploader_rejects_bad_input_locally() {
        let uploader = FormUploader::new("http://127.0.0.1:1");
        let options = UploadOptions::default();

        let done = uploader.put(Path::new("/definitely/missing"), "k", "t", &options);
        assert_eq!(done.info.unwrap().status_code, STATUS_INVALID_FILE);

        let done = uploader.put(Path::new("/definitely/missing"), "k", "", &options);
        assert_eq!(done.info.unwrap().status_code, STATUS_INVALID_TOKEN);

        let done = uploader.put(Path::new(""), "k", "t", &options);
        assert_eq!(done.info.unwrap().status_code, STATUS_INVALID_ARGUMENT);

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"gif").unwrap();
        options.cancelled.store(true, Ordering::SeqCst);
        let done = uploader.put(file.path(), "k", "t", &options);
        assert!(done.info.unwrap().is_cancelled());
    }
}
