//! Module runners: parameter validation, key/attribute construction and the call into the
//! reconciler, one function per module.

use std::path::PathBuf;

use clap::Args;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use pulp_squeezer_core::contract::{Attributes, EntityContext, NaturalKey, TargetState};
use pulp_squeezer_core::file_content::{prepare, FileContentParams, DEFAULT_CHUNK_SIZE};
use pulp_squeezer_core::params::require_for_state;
use pulp_squeezer_core::reconcile::{process, ProcessOptions};
use pulp_squeezer_core::report::ModuleReport;
use pulp_squeezer_core::SqueezerError;

use crate::client::PulpClient;
use crate::file_content::FileContentContext;
use crate::repository::{RepositoryContext, RepositoryKind};

/// Run-wide switches, the equivalents of Ansible's `--check` and `--diff`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub check_mode: bool,
    pub diff: bool,
}

#[derive(Debug, Clone, Default, Args, Deserialize)]
pub struct RepositoryParams {
    /// Name of the repository to query or manipulate
    #[arg(long)]
    pub name: Option<String>,
    /// Description of the repository
    #[arg(long)]
    pub description: Option<String>,
    /// State the repository should be in; omit to only query
    #[arg(long)]
    pub state: Option<TargetState>,
}

#[derive(Debug, Clone, Default, Args, Deserialize)]
pub struct FileContentArgs {
    /// sha256 digest of the file content to query or manipulate
    #[arg(long, alias = "digest")]
    #[serde(alias = "digest")]
    pub sha256: Option<String>,
    /// Relative path of the file content unit
    #[arg(long)]
    pub relative_path: Option<String>,
    /// Local file to upload as the new content unit
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Chunk size in bytes used to upload the file [default: 33554432]
    #[arg(long)]
    pub chunk_size: Option<u64>,
    /// Name of the file repository the content should be present in or absent from
    #[arg(long)]
    pub repository: Option<String>,
    /// State the content should be in; omit to only query
    #[arg(long)]
    pub state: Option<TargetState>,
}

impl From<FileContentArgs> for FileContentParams {
    fn from(args: FileContentArgs) -> Self {
        FileContentParams {
            sha256: args.sha256,
            relative_path: args.relative_path,
            file: args.file,
            chunk_size: args.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            repository: args.repository,
            state: args.state,
        }
    }
}

/// Reconciles one repository (or lists all) through any repository-shaped context.
///
/// With `clear_on_empty`, an empty `description` is sent as null and clears the field;
/// otherwise it is sent as the empty string.
pub async fn repository_module<C>(
    ctx: &C,
    params: &RepositoryParams,
    clear_on_empty: bool,
    options: RunOptions,
) -> Result<ModuleReport, SqueezerError>
where
    C: EntityContext + ?Sized,
{
    require_for_state(params.state, &[("name", params.name.is_some())])?;

    let natural_key = NaturalKey::new().field("name", params.name.clone());
    let mut desired = Attributes::new();
    if let Some(description) = &params.description {
        let value = if clear_on_empty && description.is_empty() {
            Value::Null
        } else {
            Value::String(description.clone())
        };
        desired.insert("description".into(), value);
    }

    let outcome = process(
        ctx,
        &natural_key,
        &desired,
        &Attributes::new(),
        params.state,
        ProcessOptions {
            check_mode: options.check_mode,
        },
    )
    .await?;
    info!(entity = ctx.entity_singular(), changed = outcome.changed(), "Repository module finished");
    Ok(ModuleReport::from_outcome(
        outcome,
        ctx.entity_singular(),
        ctx.entity_plural(),
        options.diff,
    ))
}

/// Runs the generic repository module for the given plugin kind.
pub async fn run_repository(
    client: &PulpClient,
    kind: RepositoryKind,
    params: &RepositoryParams,
    options: RunOptions,
) -> Result<ModuleReport, SqueezerError> {
    let ctx = RepositoryContext::new(client.clone(), kind);
    repository_module(&ctx, params, true, options).await
}

/// Runs the ansible repository module; an empty description is kept as is.
pub async fn run_ansible_repository(
    client: &PulpClient,
    params: &RepositoryParams,
    options: RunOptions,
) -> Result<ModuleReport, SqueezerError> {
    let ctx = RepositoryContext::new(client.clone(), RepositoryKind::Ansible);
    repository_module(&ctx, params, false, options).await
}

/// Runs the file content module. Local checks happen before the first request.
pub async fn run_file_content(
    client: &PulpClient,
    params: &FileContentParams,
    options: RunOptions,
) -> Result<ModuleReport, SqueezerError> {
    let prepared = prepare(params)?;

    let mut ctx = FileContentContext::new(client.clone());
    if let Some(name) = &params.repository {
        let repositories = RepositoryContext::new(client.clone(), RepositoryKind::File);
        let key = NaturalKey::new().field("name", Some(name.as_str()));
        let repository = repositories
            .find(&key)
            .await?
            .ok_or_else(|| SqueezerError::NotFound {
                entity: "file repository".into(),
                key: key.to_string(),
            })?;
        ctx = ctx.with_repository(repository);
    }

    let outcome = process(
        &ctx,
        &prepared.natural_key,
        &Attributes::new(),
        &prepared.defaults,
        params.state,
        ProcessOptions {
            check_mode: options.check_mode,
        },
    )
    .await?;
    info!(changed = outcome.changed(), "File content module finished");
    Ok(ModuleReport::from_outcome(
        outcome,
        ctx.entity_singular(),
        ctx.entity_plural(),
        options.diff,
    ))
}
