//! File content units, optionally scoped to one file repository.
//!
//! Content units are immutable and shared between repositories, so "present" and "absent"
//! are about repository membership when a repository is given: `create` adds an existing
//! unit (or uploads a new one) and `delete` removes the unit from the repository.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use pulp_squeezer_core::contract::{entity_href, Attributes, Entity, EntityContext, NaturalKey};
use pulp_squeezer_core::file_content::DEFAULT_CHUNK_SIZE;
use pulp_squeezer_core::SqueezerError;

use crate::client::{created_resource, PulpClient, Settled};

const CONTENT_ENDPOINT: &str = "content/file/files/";
const ARTIFACTS_ENDPOINT: &str = "artifacts/";
const UPLOADS_ENDPOINT: &str = "uploads/";

pub struct FileContentContext {
    client: PulpClient,
    repository: Option<Entity>,
}

fn string_attribute<'a>(attributes: &'a Attributes, field: &str) -> Option<&'a str> {
    attributes.get(field).and_then(Value::as_str)
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> SqueezerError + '_ {
    move |source| SqueezerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileContentContext {
    pub fn new(client: PulpClient) -> Self {
        Self {
            client,
            repository: None,
        }
    }

    /// Scopes lookups and membership changes to `repository`.
    pub fn with_repository(mut self, repository: Entity) -> Self {
        self.repository = Some(repository);
        self
    }

    fn content_path(&self) -> String {
        self.client.api_path(CONTENT_ENDPOINT)
    }

    fn repository_href(&self) -> Result<Option<&str>, SqueezerError> {
        self.repository.as_ref().map(entity_href).transpose()
    }

    fn version_filter(&self) -> Vec<(String, String)> {
        self.repository
            .as_ref()
            .and_then(|r| r.get("latest_version_href"))
            .and_then(Value::as_str)
            .map(|href| vec![("repository_version".to_string(), href.to_string())])
            .unwrap_or_default()
    }

    async fn find_with(
        &self,
        key: &NaturalKey,
        scope: Vec<(String, String)>,
    ) -> Result<Option<Entity>, SqueezerError> {
        let mut filters = key.to_filters();
        filters.extend(scope);
        let mut hits = self.client.list(&self.content_path(), &filters).await?;
        match hits.len() {
            0 => Ok(None),
            1 => Ok(hits.pop()),
            count => Err(SqueezerError::AmbiguousKey {
                entity: "file content".into(),
                key: key.to_string(),
                count,
            }),
        }
    }

    async fn modify_repository(&self, change: &str, content_href: &str) -> Result<(), SqueezerError> {
        let Some(repository_href) = self.repository_href()? else {
            return Err(SqueezerError::Unsupported(
                "file content can only be added to or removed from a repository".into(),
            ));
        };
        info!(repository = repository_href, content = content_href, change, "Modifying repository content");
        let mut body = serde_json::Map::new();
        body.insert(change.to_string(), json!([content_href]));
        let response = self
            .client
            .post(&format!("{repository_href}modify/"), &Value::Object(body))
            .await?;
        self.client.settle(response).await.map(|_| ())
    }

    async fn find_artifact(&self, sha256: &str) -> Result<Option<String>, SqueezerError> {
        let filters = vec![("sha256".to_string(), sha256.to_string())];
        let artifacts = self
            .client
            .list(&self.client.api_path(ARTIFACTS_ENDPOINT), &filters)
            .await?;
        artifacts
            .first()
            .map(|artifact| entity_href(artifact).map(str::to_string))
            .transpose()
    }

    /// Uploads `path` in `chunk_size` pieces and commits it into an artifact.
    async fn upload_artifact(
        &self,
        path: &Path,
        sha256: &str,
        size: u64,
        chunk_size: u64,
    ) -> Result<String, SqueezerError> {
        let response = self
            .client
            .post(&self.client.api_path(UPLOADS_ENDPOINT), &json!({ "size": size }))
            .await?;
        let upload = match self.client.settle(response).await? {
            Settled::Entity(upload) => upload,
            other => {
                return Err(SqueezerError::MalformedResponse(format!(
                    "creating an upload returned {other:?}"
                )))
            }
        };
        let upload_href = entity_href(&upload)?.to_string();
        info!(upload = %upload_href, size, chunk_size, "Started chunked upload");

        let mut file = tokio::fs::File::open(path).await.map_err(io_error(path))?;
        let mut offset = 0u64;
        while offset < size {
            let length = chunk_size.min(size - offset);
            let mut chunk = vec![0u8; length as usize];
            file.read_exact(&mut chunk).await.map_err(io_error(path))?;
            let range = format!("bytes {}-{}/{}", offset, offset + length - 1, size);
            let form = Form::new().part("file", Part::bytes(chunk).file_name("chunk"));
            self.client.put_chunk(&upload_href, form, &range).await?;
            offset += length;
        }

        let response = self
            .client
            .post(&format!("{upload_href}commit/"), &json!({ "sha256": sha256 }))
            .await?;
        match self.client.settle(response).await? {
            Settled::Task(task) => created_resource(&task, ARTIFACTS_ENDPOINT),
            Settled::Entity(artifact) => entity_href(&artifact).map(str::to_string),
            Settled::Empty => Err(SqueezerError::MalformedResponse(
                "committing an upload returned no body".into(),
            )),
        }
    }

    async fn content_from(&self, settled: Settled) -> Result<Entity, SqueezerError> {
        match settled {
            Settled::Entity(content) => Ok(content),
            Settled::Task(task) => {
                let href = created_resource(&task, CONTENT_ENDPOINT)?;
                self.client.get_entity(&href).await
            }
            Settled::Empty => Err(SqueezerError::MalformedResponse(
                "creating file content returned no body".into(),
            )),
        }
    }

    async fn create_from_artifact(
        &self,
        relative_path: &str,
        artifact_href: &str,
    ) -> Result<Entity, SqueezerError> {
        let mut body = json!({ "relative_path": relative_path, "artifact": artifact_href });
        if let Some(repository_href) = self.repository_href()? {
            body["repository"] = json!(repository_href);
        }
        let response = self.client.post(&self.content_path(), &body).await?;
        let settled = self.client.settle(response).await?;
        self.content_from(settled).await
    }

    async fn create_from_file(&self, relative_path: &str, path: &Path) -> Result<Entity, SqueezerError> {
        let bytes = tokio::fs::read(path).await.map_err(io_error(path))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mut form = Form::new()
            .text("relative_path", relative_path.to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));
        if let Some(repository_href) = self.repository_href()? {
            form = form.text("repository", repository_href.to_string());
        }
        let response = self.client.post_multipart(&self.content_path(), form).await?;
        let settled = self.client.settle(response).await?;
        self.content_from(settled).await
    }
}

#[async_trait]
impl EntityContext for FileContentContext {
    fn entity_singular(&self) -> &'static str {
        "content"
    }

    fn entity_plural(&self) -> &'static str {
        "contents"
    }

    async fn list(&self, filter: &NaturalKey) -> Result<Vec<Entity>, SqueezerError> {
        let mut filters = filter.to_filters();
        filters.extend(self.version_filter());
        self.client.list(&self.content_path(), &filters).await
    }

    async fn find(&self, key: &NaturalKey) -> Result<Option<Entity>, SqueezerError> {
        self.find_with(key, self.version_filter()).await
    }

    async fn create(&self, attributes: &Attributes) -> Result<Entity, SqueezerError> {
        let relative_path = string_attribute(attributes, "relative_path").ok_or_else(|| {
            SqueezerError::MissingIdentifier("'relative_path' is required to create file content".into())
        })?;
        let sha256 = string_attribute(attributes, "sha256").ok_or_else(|| {
            SqueezerError::MissingIdentifier("'sha256' is required to create file content".into())
        })?;

        // The unit may already exist outside this repository; reuse it.
        let key = NaturalKey::new()
            .field("sha256", Some(sha256))
            .field("relative_path", Some(relative_path));
        if let Some(existing) = self.find_with(&key, Vec::new()).await? {
            info!(key = %key, "Content unit exists, adding it to the repository");
            self.modify_repository("add_content_units", entity_href(&existing)?)
                .await?;
            return Ok(existing);
        }

        let file = string_attribute(attributes, "file").map(Path::new).ok_or_else(|| {
            SqueezerError::MissingIdentifier("a local 'file' is required to create new content".into())
        })?;
        let chunk_size = attributes
            .get("chunk_size")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let size = tokio::fs::metadata(file).await.map_err(io_error(file))?.len();

        if let Some(artifact_href) = self.find_artifact(sha256).await? {
            info!(artifact = %artifact_href, "Artifact exists, creating content from it");
            return self.create_from_artifact(relative_path, &artifact_href).await;
        }
        if size <= chunk_size {
            info!(path = %file.display(), size, "Uploading file content in one request");
            self.create_from_file(relative_path, file).await
        } else {
            let artifact_href = self.upload_artifact(file, sha256, size, chunk_size).await?;
            self.create_from_artifact(relative_path, &artifact_href).await
        }
    }

    async fn update(&self, entity: &Entity, diff: &Attributes) -> Result<Entity, SqueezerError> {
        if diff.is_empty() {
            return Ok(entity.clone());
        }
        Err(SqueezerError::Unsupported(
            "file content units are immutable".into(),
        ))
    }

    async fn delete(&self, entity: &Entity) -> Result<(), SqueezerError> {
        let href = entity_href(entity)?;
        if self.repository.is_none() {
            warn!(href, "Refusing to delete content without a repository");
        }
        self.modify_repository("remove_content_units", href).await
    }
}
