use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_API_ROOT: &str = "/pulp/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TASK_POLL_INTERVAL_MS: u64 = 1000;

/// Fully resolved connection settings for one invocation.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub pulp_url: String,
    pub api_root: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub validate_certs: bool,
    pub ca_cert: Option<PathBuf>,
    pub timeout_secs: u64,
    pub task_timeout_secs: u64,
    pub task_poll_interval_ms: u64,
}

impl ConnectionConfig {
    pub fn new(pulp_url: impl Into<String>) -> Self {
        Self {
            pulp_url: pulp_url.into(),
            api_root: DEFAULT_API_ROOT.to_string(),
            username: None,
            password: None,
            validate_certs: true,
            ca_cert: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            task_poll_interval_ms: DEFAULT_TASK_POLL_INTERVAL_MS,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            pulp_url = %self.pulp_url,
            api_root = %self.api_root,
            username = self.username.as_deref().unwrap_or("<none>"),
            validate_certs = self.validate_certs,
            "Loaded connection config"
        );
        debug!(?self, "Connection config loaded (full debug)");
    }
}

// Hand-written so the password never reaches a log line.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("pulp_url", &self.pulp_url)
            .field("api_root", &self.api_root)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("validate_certs", &self.validate_certs)
            .field("ca_cert", &self.ca_cert)
            .field("timeout_secs", &self.timeout_secs)
            .field("task_timeout_secs", &self.task_timeout_secs)
            .field("task_poll_interval_ms", &self.task_poll_interval_ms)
            .finish()
    }
}
