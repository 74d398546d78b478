//! # Pulp REST client
//!
//! A thin wrapper around `reqwest` that knows the handful of Pulp conventions the entity
//! contexts rely on:
//!
//! - hrefs are server-relative (`/pulp/api/v3/...`) and resolved against `pulp_url`;
//! - list endpoints are paginated with `limit`/`offset` and a `next` link;
//! - mutating calls may answer `202 {"task": href}`, which is polled until the task is done;
//! - any non-2xx status is a [`SqueezerError::Remote`] carrying the response body.
//!
//! There are no retries: a failed call fails the invocation.

use std::time::Duration;

use pulp_squeezer_core::config::ConnectionConfig;
use pulp_squeezer_core::contract::Entity;
use pulp_squeezer_core::SqueezerError;
use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info};

const PAGE_SIZE: usize = 100;

/// What a mutating call produced once any task it spawned has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// The server answered synchronously with the entity.
    Entity(Entity),
    /// The server spawned a task; this is the finished task.
    Task(Entity),
    /// Empty response body.
    Empty,
}

#[derive(Clone)]
pub struct PulpClient {
    http: reqwest::Client,
    base_url: String,
    api_root: String,
    username: Option<String>,
    password: Option<String>,
    task_timeout: Duration,
    task_poll_interval: Duration,
}

impl PulpClient {
    pub fn new(config: &ConnectionConfig) -> Result<Self, SqueezerError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.validate_certs);

        if let Some(ca_cert) = &config.ca_cert {
            let pem = std::fs::read(ca_cert).map_err(|e| {
                SqueezerError::Setup(format!("cannot read ca_cert {}: {e}", ca_cert.display()))
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                SqueezerError::Setup(format!("invalid ca_cert {}: {e}", ca_cert.display()))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let http = builder
            .build()
            .map_err(|e| SqueezerError::Setup(format!("failed to build HTTP client: {e}")))?;

        let mut api_root = config.api_root.clone();
        if !api_root.starts_with('/') {
            api_root.insert(0, '/');
        }
        if !api_root.ends_with('/') {
            api_root.push('/');
        }

        info!(
            pulp_url = %config.pulp_url,
            api_root = %api_root,
            authenticated = config.username.is_some(),
            "Initialized PulpClient"
        );
        Ok(PulpClient {
            http,
            base_url: config.pulp_url.trim_end_matches('/').to_string(),
            api_root,
            username: config.username.clone(),
            password: config.password.clone(),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            task_poll_interval: Duration::from_millis(config.task_poll_interval_ms),
        })
    }

    /// Server-relative path of a v3 endpoint, e.g. `api_path("artifacts/")`.
    pub fn api_path(&self, endpoint: &str) -> String {
        format!("{}api/v3/{}", self.api_root, endpoint)
    }

    fn url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{}", self.base_url, href)
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    async fn execute(
        &self,
        method: Method,
        url: String,
        request: RequestBuilder,
    ) -> Result<Option<Value>, SqueezerError> {
        debug!(%method, %url, "Sending request");
        let response = request.send().await.map_err(|e| {
            error!(error = ?e, %method, %url, "Request failed to complete");
            SqueezerError::Transport(format!("{method} {url}: {e}"))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SqueezerError::Transport(format!("{method} {url}: {e}")))?;

        if !status.is_success() {
            error!(status = status.as_u16(), %method, %url, body = %body, "Pulp API returned error");
            return Err(SqueezerError::Remote {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), %method, %url, "Request succeeded");
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| SqueezerError::MalformedResponse(format!("{method} {url}: {e}")))
    }

    async fn send_json(
        &self,
        method: Method,
        href: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, SqueezerError> {
        let url = self.url(href);
        let mut request = self.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(method, url, request).await
    }

    pub async fn get(&self, href: &str, query: &[(String, String)]) -> Result<Value, SqueezerError> {
        let url = self.url(href);
        let request = self.request(Method::GET, &url).query(query);
        self.execute(Method::GET, url.clone(), request)
            .await?
            .ok_or_else(|| SqueezerError::MalformedResponse(format!("GET {url}: empty body")))
    }

    pub async fn get_entity(&self, href: &str) -> Result<Entity, SqueezerError> {
        match self.get(href, &[]).await? {
            Value::Object(entity) => Ok(entity),
            other => Err(SqueezerError::MalformedResponse(format!(
                "GET {href}: expected an object, got {other}"
            ))),
        }
    }

    /// Every entity on a list endpoint matching `filters`, following `next` links.
    pub async fn list(
        &self,
        endpoint: &str,
        filters: &[(String, String)],
    ) -> Result<Vec<Entity>, SqueezerError> {
        let mut query: Vec<(String, String)> = filters.to_vec();
        query.push(("limit".into(), PAGE_SIZE.to_string()));
        query.push(("offset".into(), "0".into()));

        let mut entities = Vec::new();
        let mut next = Some(endpoint.to_string());
        let mut first = true;
        while let Some(href) = next.take() {
            // `next` links already carry the full query string.
            let page = if first {
                self.get(&href, &query).await?
            } else {
                self.get(&href, &[]).await?
            };
            first = false;

            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SqueezerError::MalformedResponse(format!("GET {href}: no results array"))
                })?;
            for result in results {
                match result {
                    Value::Object(entity) => entities.push(entity.clone()),
                    other => {
                        return Err(SqueezerError::MalformedResponse(format!(
                            "GET {href}: expected objects in results, got {other}"
                        )))
                    }
                }
            }
            next = page.get("next").and_then(Value::as_str).map(str::to_string);
        }
        debug!(endpoint, count = entities.len(), "Listed entities");
        Ok(entities)
    }

    pub async fn post(&self, href: &str, body: &Value) -> Result<Option<Value>, SqueezerError> {
        self.send_json(Method::POST, href, Some(body)).await
    }

    pub async fn patch(&self, href: &str, body: &Value) -> Result<Option<Value>, SqueezerError> {
        self.send_json(Method::PATCH, href, Some(body)).await
    }

    pub async fn delete(&self, href: &str) -> Result<Option<Value>, SqueezerError> {
        self.send_json(Method::DELETE, href, None).await
    }

    pub async fn post_multipart(
        &self,
        href: &str,
        form: Form,
    ) -> Result<Option<Value>, SqueezerError> {
        let url = self.url(href);
        let request = self.request(Method::POST, &url).multipart(form);
        self.execute(Method::POST, url, request).await
    }

    /// Sends one chunk of a chunked upload.
    pub async fn put_chunk(
        &self,
        href: &str,
        form: Form,
        content_range: &str,
    ) -> Result<Option<Value>, SqueezerError> {
        let url = self.url(href);
        let request = self
            .request(Method::PUT, &url)
            .header(reqwest::header::CONTENT_RANGE, content_range)
            .multipart(form);
        self.execute(Method::PUT, url, request).await
    }

    /// Waits for a spawned task, if the response names one.
    pub async fn settle(&self, response: Option<Value>) -> Result<Settled, SqueezerError> {
        match response {
            None => Ok(Settled::Empty),
            Some(Value::Object(body)) => match body.get("task").and_then(Value::as_str) {
                Some(task_href) => self.wait_for_task(task_href).await.map(Settled::Task),
                None => Ok(Settled::Entity(body)),
            },
            Some(other) => Err(SqueezerError::MalformedResponse(format!(
                "expected an object response, got {other}"
            ))),
        }
    }

    /// Polls a task until it completes, fails or the task deadline expires.
    pub async fn wait_for_task(&self, task_href: &str) -> Result<Entity, SqueezerError> {
        let deadline = Instant::now() + self.task_timeout;
        info!(task = task_href, "Waiting for task");
        loop {
            let task = self.get_entity(task_href).await?;
            let state = task
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            match state.as_str() {
                "completed" => {
                    info!(task = task_href, "Task completed");
                    return Ok(task);
                }
                "failed" | "canceled" => {
                    let message = task
                        .get("error")
                        .and_then(|e| e.get("description"))
                        .and_then(Value::as_str)
                        .unwrap_or("no error reported")
                        .to_string();
                    error!(task = task_href, state = %state, message = %message, "Task did not complete");
                    return Err(SqueezerError::TaskFailed {
                        task: task_href.to_string(),
                        state,
                        message,
                    });
                }
                _ => debug!(task = task_href, state = %state, "Task still running"),
            }
            if Instant::now() >= deadline {
                return Err(SqueezerError::TaskTimeout {
                    task: task_href.to_string(),
                    seconds: self.task_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.task_poll_interval).await;
        }
    }
}

/// First href in a finished task's `created_resources` that lives under `endpoint`.
pub fn created_resource(task: &Entity, endpoint: &str) -> Result<String, SqueezerError> {
    task.get("created_resources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|href| href.contains(endpoint))
        .map(str::to_string)
        .ok_or_else(|| {
            SqueezerError::MalformedResponse(format!("task created no resource under {endpoint}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(pulp_url: &str, api_root: &str) -> PulpClient {
        let mut config = ConnectionConfig::new(pulp_url);
        config.api_root = api_root.to_string();
        PulpClient::new(&config).unwrap()
    }

    #[test]
    fn api_root_is_normalised() {
        let client = client("https://pulp.example.org/", "pulp");
        assert_eq!(client.api_path("artifacts/"), "/pulp/api/v3/artifacts/");
        assert_eq!(
            client.url("/pulp/api/v3/tasks/1/"),
            "https://pulp.example.org/pulp/api/v3/tasks/1/"
        );
        assert_eq!(
            client.url("http://other/pulp/api/v3/tasks/1/"),
            "http://other/pulp/api/v3/tasks/1/"
        );
    }

    #[test]
    fn created_resource_picks_matching_endpoint() {
        let task = match json!({
            "created_resources": [
                "/pulp/api/v3/repositories/file/file/1/versions/2/",
                "/pulp/api/v3/content/file/files/9/"
            ]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert_eq!(
            created_resource(&task, "content/file/files/").unwrap(),
            "/pulp/api/v3/content/file/files/9/"
        );
        assert!(created_resource(&task, "artifacts/").is_err());
    }

    #[test]
    fn unreadable_ca_cert_is_a_setup_failure() {
        let mut config = ConnectionConfig::new("https://pulp.example.org");
        config.ca_cert = Some("/nonexistent/ca.pem".into());
        let err = PulpClient::new(&config).err().unwrap();
        assert!(err.is_setup());
    }
}
