//! Application context and startup.
//!
//! # Design
//! There is no process-wide singleton. `App::start` runs once at startup on
//! the thread that will act as the main thread, builds an `AppContext`, and
//! the caller passes `Arc<AppContext>` to every request and upload it creates.
//! Derived values (debug flag, base URL) are fixed at construction.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::ContextError;
use crate::looper::{MainHandle, MainLooper};
use crate::sign;

/// Package lookup flag: include signing certificates.
pub const GET_SIGNATURES: u32 = 0x0000_0040;
/// Package lookup flag: include signing certificates (current form).
pub const GET_SIGNING_CERTIFICATES: u32 = 0x0800_0000;

/// Metadata describing the running application package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub package_name: String,
    pub version_name: String,
    /// Only populated when a signature flag was requested.
    pub signatures: Vec<Vec<u8>>,
}

/// Platform package metadata lookup.
pub trait PackageManager: Send + Sync {
    fn package_info(&self, package_name: &str, flags: u32) -> Result<PackageInfo, ContextError>;
}

/// `PackageManager` serving a single package described by config.
#[derive(Debug, Clone)]
pub struct StaticPackageManager {
    info: PackageInfo,
}

impl StaticPackageManager {
    pub fn new(info: PackageInfo) -> Self {
        Self { info }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let signatures = config
            .signatures
            .iter()
            .filter_map(|s| match hex::decode(s) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(signature = %s, error = %e, "ignoring malformed signing certificate");
                    None
                }
            })
            .collect();
        Self::new(PackageInfo {
            package_name: config.package_name.clone(),
            version_name: config.version_name.clone(),
            signatures,
        })
    }
}

impl PackageManager for StaticPackageManager {
    fn package_info(&self, package_name: &str, flags: u32) -> Result<PackageInfo, ContextError> {
        if package_name != self.info.package_name {
            return Err(ContextError::PackageNotFound(package_name.to_string()));
        }
        let mut info = self.info.clone();
        if flags & (GET_SIGNATURES | GET_SIGNING_CERTIFICATES) == 0 {
            info.signatures.clear();
        }
        Ok(info)
    }
}

/// Process-wide state, created once by `App::start`.
pub struct AppContext {
    debug: bool,
    base_url: String,
    package_name: String,
    device_name: String,
    upload_host: String,
    config: AppConfig,
    packages: Box<dyn PackageManager>,
    main: MainHandle,
}

impl AppContext {
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Development endpoint in debug builds, production otherwise.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn upload_host(&self) -> &str {
        &self.upload_host
    }

    /// `"<brand> <model>"`, or `"unknown"` when the platform reports nothing.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn main_handle(&self) -> &MainHandle {
        &self.main
    }

    /// Look up this app's package. Lookup failures pass through unchanged.
    pub fn package_info(&self, flags: u32) -> Result<PackageInfo, ContextError> {
        self.packages.package_info(&self.package_name, flags)
    }

    /// Version name sent in the `appv` header.
    pub fn app_version(&self) -> String {
        let version = match self.package_info(0) {
            Ok(info) => info.version_name,
            Err(e) => {
                warn!(error = %e, "failed to read app version");
                String::new()
            }
        };
        if version.is_empty() {
            "unknown".to_string()
        } else {
            version
        }
    }

    /// Uppercase hex MD5 of the signing certificates, empty when unavailable.
    pub fn app_signature(&self) -> String {
        match self.package_info(GET_SIGNING_CERTIFICATES) {
            Ok(info) => sign::signature_digest(&info.signatures),
            Err(_) => String::new(),
        }
    }

    /// Value of the `apps` header identifying an official build.
    pub fn app_sign(&self) -> String {
        sign::app_sign(&self.app_signature(), &self.app_version())
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("debug", &self.debug)
            .field("base_url", &self.base_url)
            .field("package_name", &self.package_name)
            .finish_non_exhaustive()
    }
}

/// Startup result: the shared context plus the main-thread looper.
pub struct App {
    context: Arc<AppContext>,
    looper: MainLooper,
}

impl App {
    /// Initialize the application on the current thread, which becomes the
    /// main thread.
    pub fn start(config: AppConfig, packages: impl PackageManager + 'static) -> Self {
        let looper = MainLooper::new();
        let base_url = if config.debug {
            config.dev_base_url.clone()
        } else {
            config.prod_base_url.clone()
        };
        let device_name = format!("{} {}", config.device_brand, config.device_model)
            .trim()
            .to_string();
        let context = AppContext {
            debug: config.debug,
            base_url,
            package_name: config.package_name.clone(),
            device_name: if device_name.is_empty() {
                "unknown".to_string()
            } else {
                device_name
            },
            upload_host: config.upload_host.clone(),
            packages: Box::new(packages),
            main: looper.handle(),
            config,
        };
        info!(
            debug = context.debug,
            base_url = %context.base_url,
            package = %context.package_name,
            "application started"
        );
        Self {
            context: Arc::new(context),
            looper,
        }
    }

    /// `start` with a package manager derived from the config itself.
    pub fn from_config(config: AppConfig) -> Self {
        let packages = StaticPackageManager::from_config(&config);
        Self::start(config, packages)
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn looper(&self) -> &MainLooper {
        &self.looper
    }
}
