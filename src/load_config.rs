/// `load_config` module: resolves the connection settings for one invocation.
///
/// Settings are layered, later layers winning:
/// 1. the optional YAML config file (`--config`),
/// 2. environment variables (`PULP_URL`, `PULP_USERNAME`, `PULP_PASSWORD`,
///    `PULP_VALIDATE_CERTS`, `PULP_CA_CERT`),
/// 3. connection parameters from a module arguments file,
/// 4. command line flags.
///
/// A missing `pulp_url` after all layers is a setup failure.
use anyhow::Result;
use clap::Args;
use pulp_squeezer_core::config::ConnectionConfig;
use pulp_squeezer_core::SqueezerError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Connection parameters as they appear on the command line and in module arguments.
#[derive(Debug, Clone, Default, Args, Deserialize)]
#[serde(default)]
pub struct ConnectionArgs {
    /// URL of the Pulp API server
    #[arg(long, global = true)]
    pub pulp_url: Option<String>,
    /// Username for basic authentication
    #[arg(long, global = true)]
    pub username: Option<String>,
    /// Password for basic authentication
    #[arg(long, global = true)]
    pub password: Option<String>,
    /// Verify the server certificate
    #[arg(long, global = true)]
    pub validate_certs: Option<bool>,
    /// CA bundle to trust in addition to the system roots
    #[arg(long, global = true)]
    pub ca_cert: Option<PathBuf>,
    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

/// The YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub pulp_url: Option<String>,
    pub api_root: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub validate_certs: Option<bool>,
    pub ca_cert: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub task_timeout: Option<u64>,
    pub task_poll_interval_ms: Option<u64>,
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(SqueezerError::Setup(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
            .into());
        }
    };
    match serde_yaml::from_str::<Option<ConfigFile>>(&content) {
        Ok(parsed) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(parsed.unwrap_or_default())
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(SqueezerError::Setup(format!("failed to parse config YAML: {e}")).into())
        }
    }
}

fn env_args() -> Result<ConnectionArgs> {
    let validate_certs = match std::env::var("PULP_VALIDATE_CERTS") {
        Ok(raw) => Some(raw.parse::<bool>().map_err(|_| {
            SqueezerError::Setup(format!("PULP_VALIDATE_CERTS must be true or false, got '{raw}'"))
        })?),
        Err(_) => None,
    };
    Ok(ConnectionArgs {
        pulp_url: std::env::var("PULP_URL").ok(),
        username: std::env::var("PULP_USERNAME").ok(),
        password: std::env::var("PULP_PASSWORD").ok(),
        validate_certs,
        ca_cert: std::env::var("PULP_CA_CERT").ok().map(PathBuf::from),
        timeout: None,
    })
}

fn apply(file: &mut ConfigFile, args: &ConnectionArgs) {
    if args.pulp_url.is_some() {
        file.pulp_url = args.pulp_url.clone();
    }
    if args.username.is_some() {
        file.username = args.username.clone();
    }
    if args.password.is_some() {
        file.password = args.password.clone();
    }
    if args.validate_certs.is_some() {
        file.validate_certs = args.validate_certs;
    }
    if args.ca_cert.is_some() {
        file.ca_cert = args.ca_cert.clone();
    }
    if args.timeout.is_some() {
        file.timeout = args.timeout;
    }
}

/// Resolves the connection config; `overrides` are applied in order after the environment.
pub fn load_config(config_path: Option<&Path>, overrides: &[&ConnectionArgs]) -> Result<ConnectionConfig> {
    let mut merged = match config_path {
        Some(path) => read_config_file(path)?,
        None => ConfigFile::default(),
    };
    apply(&mut merged, &env_args()?);
    for args in overrides {
        apply(&mut merged, args);
    }

    let Some(pulp_url) = merged.pulp_url.filter(|url| !url.trim().is_empty()) else {
        error!("No pulp_url configured");
        return Err(SqueezerError::Setup(
            "pulp_url is required (flag, PULP_URL or config file)".into(),
        )
        .into());
    };

    let mut config = ConnectionConfig::new(pulp_url);
    if let Some(api_root) = merged.api_root {
        config.api_root = api_root;
    }
    config.username = merged.username;
    config.password = merged.password;
    if let Some(validate_certs) = merged.validate_certs {
        config.validate_certs = validate_certs;
    }
    config.ca_cert = merged.ca_cert;
    if let Some(timeout) = merged.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(task_timeout) = merged.task_timeout {
        config.task_timeout_secs = task_timeout;
    }
    if let Some(interval) = merged.task_poll_interval_ms {
        config.task_poll_interval_ms = interval;
    }

    config.trace_loaded();
    Ok(config)
}
