use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const HEALTHCHECKS_BASE_URL: &str = "https://healthchecks.io";
const GRACE_SECONDS: u32 = 3600;
const TIMEZONE: &str = "America/New_York";

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("healthchecks request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("healthchecks returned status {status} for {action}")]
    Status { action: &'static str, status: u16 },
    #[error("healthchecks response carried no check id")]
    MissingId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub name: String,
    pub slug: String,
    pub tags: Vec<String>,
    pub schedule: String,
}

/// External liveness monitor attached to a subscription.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Returns the id of the new check.
    async fn create(&self, spec: &CheckSpec) -> Result<String, MonitorError>;
    async fn delete(&self, id: &str) -> Result<(), MonitorError>;
    async fn pause(&self, id: &str) -> Result<(), MonitorError>;
    async fn resume(&self, id: &str) -> Result<(), MonitorError>;
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    api_key: &'a str,
    name: &'a str,
    slug: &'a str,
    tags: String,
    grace: u32,
    schedule: &'a str,
    tz: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    ping_url: String,
}

/// healthchecks.io v3 management API.
#[derive(Debug, Clone)]
pub struct HealthchecksClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HealthchecksClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, MonitorError> {
        Self::with_base_url(api_key, HEALTHCHECKS_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, MonitorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn check_url(&self, id: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/api/v3/checks/{id}/{action}", self.base_url),
            None => format!("{}/api/v3/checks/{id}", self.base_url),
        }
    }

    async fn expect_ok(
        &self,
        request: reqwest::RequestBuilder,
        action: &'static str,
    ) -> Result<(), MonitorError> {
        let resp = request.header("X-Api-Key", &self.api_key).send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(MonitorError::Status { action, status });
        }
        Ok(())
    }
}

#[async_trait]
impl HealthMonitor for HealthchecksClient {
    async fn create(&self, spec: &CheckSpec) -> Result<String, MonitorError> {
        let body = CreateRequest {
            api_key: &self.api_key,
            name: &spec.name,
            slug: &spec.slug,
            tags: spec.tags.join(" "),
            grace: GRACE_SECONDS,
            schedule: &spec.schedule,
            tz: TIMEZONE,
        };
        let resp = self
            .client
            .post(format!("{}/api/v3/checks/", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status > 201 {
            return Err(MonitorError::Status { action: "create", status });
        }

        let created: CreateResponse = resp.json().await?;
        let id = created
            .ping_url
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or(MonitorError::MissingId)?
            .to_string();
        info!(check_id = %id, name = %spec.name, "created health check");
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<(), MonitorError> {
        self.expect_ok(self.client.delete(self.check_url(id, None)), "delete")
            .await
    }

    async fn pause(&self, id: &str) -> Result<(), MonitorError> {
        self.expect_ok(self.client.post(self.check_url(id, Some("pause"))), "pause")
            .await
    }

    async fn resume(&self, id: &str) -> Result<(), MonitorError> {
        self.expect_ok(self.client.post(self.check_url(id, Some("resume"))), "resume")
            .await
    }
}
