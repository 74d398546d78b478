//! Repository contexts, one per plugin kind.

use async_trait::async_trait;
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use pulp_squeezer_core::contract::{entity_href, Attributes, Entity, EntityContext, NaturalKey};
use pulp_squeezer_core::SqueezerError;

use crate::client::{created_resource, PulpClient, Settled};

/// Content plugin a repository belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    File,
    Ansible,
    Python,
    Rpm,
    Container,
}

impl RepositoryKind {
    pub fn plugin(self) -> &'static str {
        match self {
            RepositoryKind::File => "file",
            RepositoryKind::Ansible => "ansible",
            RepositoryKind::Python => "python",
            RepositoryKind::Rpm => "rpm",
            RepositoryKind::Container => "container",
        }
    }

    /// Endpoint relative to `api/v3/`.
    pub fn endpoint(self) -> String {
        let plugin = self.plugin();
        format!("repositories/{plugin}/{plugin}/")
    }
}

pub struct RepositoryContext {
    client: PulpClient,
    kind: RepositoryKind,
}

impl RepositoryContext {
    pub fn new(client: PulpClient, kind: RepositoryKind) -> Self {
        Self { client, kind }
    }

    fn endpoint_path(&self) -> String {
        self.client.api_path(&self.kind.endpoint())
    }

    async fn entity_after(&self, settled: Settled, href: Option<&str>) -> Result<Entity, SqueezerError> {
        match (settled, href) {
            (Settled::Entity(entity), _) => Ok(entity),
            (_, Some(href)) => self.client.get_entity(href).await,
            (Settled::Task(task), None) => {
                let href = created_resource(&task, &self.kind.endpoint())?;
                self.client.get_entity(&href).await
            }
            (Settled::Empty, None) => Err(SqueezerError::MalformedResponse(format!(
                "creating a {} repository returned no body",
                self.kind.plugin()
            ))),
        }
    }
}

#[async_trait]
impl EntityContext for RepositoryContext {
    fn entity_singular(&self) -> &'static str {
        "repository"
    }

    fn entity_plural(&self) -> &'static str {
        "repositories"
    }

    async fn list(&self, filter: &NaturalKey) -> Result<Vec<Entity>, SqueezerError> {
        self.client.list(&self.endpoint_path(), &filter.to_filters()).await
    }

    async fn find(&self, key: &NaturalKey) -> Result<Option<Entity>, SqueezerError> {
        let mut hits = self.client.list(&self.endpoint_path(), &key.to_filters()).await?;
        match hits.len() {
            0 => Ok(None),
            1 => Ok(hits.pop()),
            count => Err(SqueezerError::AmbiguousKey {
                entity: format!("{} repository", self.kind.plugin()),
                key: key.to_string(),
                count,
            }),
        }
    }

    async fn create(&self, attributes: &Attributes) -> Result<Entity, SqueezerError> {
        info!(plugin = self.kind.plugin(), "Creating repository");
        let response = self
            .client
            .post(&self.endpoint_path(), &Value::Object(attributes.clone()))
            .await?;
        let settled = self.client.settle(response).await?;
        self.entity_after(settled, None).await
    }

    async fn update(&self, entity: &Entity, diff: &Attributes) -> Result<Entity, SqueezerError> {
        if diff.is_empty() {
            return Ok(entity.clone());
        }
        let href = entity_href(entity)?;
        info!(plugin = self.kind.plugin(), href, "Updating repository");
        let response = self.client.patch(href, &Value::Object(diff.clone())).await?;
        let settled = self.client.settle(response).await?;
        self.entity_after(settled, Some(href)).await
    }

    async fn delete(&self, entity: &Entity) -> Result<(), SqueezerError> {
        let href = entity_href(entity)?;
        info!(plugin = self.kind.plugin(), href, "Deleting repository");
        match self.client.delete(href).await {
            Ok(response) => self.client.settle(response).await.map(|_| ()),
            Err(e) if e.is_remote_not_found() => {
                warn!(href, "Repository already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
