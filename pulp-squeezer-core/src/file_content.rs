//! Local pre-checks for the file content module.
//!
//! Everything here runs before a single request is sent: required parameters, the local file,
//! its SHA-256 and the comparison against an explicitly supplied digest. The output is the
//! natural key and creation defaults the reconciler needs.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::contract::{Attributes, NaturalKey, TargetState};
use crate::error::SqueezerError;
use crate::params::require_for_state;

pub const DEFAULT_CHUNK_SIZE: u64 = 33_554_432;

static SHA256_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("static regex is valid"));

/// Parameters of the file content module.
#[derive(Debug, Clone)]
pub struct FileContentParams {
    pub sha256: Option<String>,
    pub relative_path: Option<String>,
    pub file: Option<PathBuf>,
    pub chunk_size: u64,
    pub repository: Option<String>,
    pub state: Option<TargetState>,
}

impl Default for FileContentParams {
    fn default() -> Self {
        Self {
            sha256: None,
            relative_path: None,
            file: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            repository: None,
            state: None,
        }
    }
}

/// Key and creation defaults derived from validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedContent {
    pub natural_key: NaturalKey,
    pub defaults: Attributes,
}

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<String, SqueezerError> {
    let io_err = |source| SqueezerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(io_err)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validates the parameters and computes the natural key and creation defaults.
pub fn prepare(params: &FileContentParams) -> Result<PreparedContent, SqueezerError> {
    match params.state {
        Some(TargetState::Present) => require_for_state(
            params.state,
            &[
                ("file", params.file.is_some()),
                ("relative_path", params.relative_path.is_some()),
                ("repository", params.repository.is_some()),
            ],
        )?,
        Some(TargetState::Absent) => require_for_state(
            params.state,
            &[
                ("relative_path", params.relative_path.is_some()),
                ("repository", params.repository.is_some()),
            ],
        )?,
        None => {}
    }

    if params.chunk_size == 0 {
        return Err(SqueezerError::InvalidParameter {
            parameter: "chunk_size".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let mut sha256 = match &params.sha256 {
        Some(given) if !SHA256_HEX.is_match(given) => {
            return Err(SqueezerError::InvalidParameter {
                parameter: "sha256".into(),
                reason: format!("'{given}' is not a hex encoded sha256 digest"),
            });
        }
        Some(given) => Some(given.to_ascii_lowercase()),
        None => None,
    };

    if let Some(file) = &params.file {
        if !file.exists() {
            error!(path = %file.display(), "Upload file does not exist");
            return Err(SqueezerError::FileNotFound(file.clone()));
        }
        let file_sha256 = sha256_file(file)?;
        debug!(path = %file.display(), sha256 = %file_sha256, "Computed file checksum");
        match &sha256 {
            Some(expected) if *expected != file_sha256 => {
                error!(expected = %expected, actual = %file_sha256, "File checksum mismatch");
                return Err(SqueezerError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: file_sha256,
                });
            }
            Some(_) => {}
            None => sha256 = Some(file_sha256),
        }
    }

    if sha256.is_none() && params.state == Some(TargetState::Absent) {
        return Err(SqueezerError::MissingIdentifier(
            "One of 'file' and 'sha256' is required if 'state' is 'absent'.".into(),
        ));
    }

    let natural_key = NaturalKey::new()
        .field("sha256", sha256)
        .field("relative_path", params.relative_path.clone());

    let mut defaults = Attributes::new();
    defaults.insert(
        "file".into(),
        params
            .file
            .as_ref()
            .map(|f| Value::String(f.display().to_string()))
            .unwrap_or(Value::Null),
    );
    defaults.insert("chunk_size".into(), Value::from(params.chunk_size));

    info!(key = %natural_key, "Prepared file content parameters");
    Ok(PreparedContent {
        natural_key,
        defaults,
    })
}
