//! HTTP client for the Datadog v1 events API

use super::EventSink;
use crate::error::{Error, Result};
use crate::types::{NotificationEvent, Severity};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "DD-API-KEY";
const APP_KEY_HEADER: &str = "DD-APPLICATION-KEY";

#[derive(Serialize)]
struct EventCreateRequest<'a> {
    title: &'a str,
    text: &'a str,
    host: &'a str,
    tags: &'a [String],
    alert_type: Severity,
    priority: &'static str,
}

#[derive(Deserialize)]
struct EventCreateResponse {
    #[serde(default)]
    status: Option<String>,
}

/// Client for posting events to Datadog
pub struct DatadogClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl DatadogClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        app_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spotdrain/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            app_key: app_key.into(),
        })
    }
}

#[async_trait]
impl EventSink for DatadogClient {
    async fn create_event(&self, event: &NotificationEvent) -> Result<String> {
        let url = format!("{}/api/v1/events", self.base_url);
        debug!("Posting Datadog event to {}", url);

        let body = EventCreateRequest {
            title: &event.title,
            text: &event.body,
            host: &event.host,
            tags: &event.tags,
            alert_type: event.severity,
            priority: "normal",
        };

        let response = self
            .http_client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(APP_KEY_HEADER, &self.app_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::from_response("create Datadog event", response).await);
        }

        let created: EventCreateResponse =
            response.json().await.map_err(|e| Error::ParseError {
                operation: "create Datadog event",
                message: e.to_string(),
            })?;
        Ok(created.status.unwrap_or_else(|| "unknown".to_string()))
    }
}
