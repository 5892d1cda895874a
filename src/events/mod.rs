//! Observability event for a handled interruption

mod datadog;

pub use datadog::DatadogClient;

use crate::error::Result;
use crate::types::{InstanceIdentity, NotificationEvent, Severity};
use async_trait::async_trait;
use tracing::info;

pub const EVENT_TITLE: &str = "Spot-Instance-Termination-Notice";
pub const EVENT_TEXT: &str = "This instance has received a termination notice from AWS EC2";
pub const SERVICE_TAG: &str = "service:spotdrain";
pub const EVENT_TYPE_TAG: &str = "spotdrain:termination_notice";

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event, returning the sink's status string
    async fn create_event(&self, event: &NotificationEvent) -> Result<String>;
}

/// Build the termination-notice event for this host
pub fn termination_event(identity: &InstanceIdentity, env: Option<&str>) -> NotificationEvent {
    let mut tags = vec![SERVICE_TAG.to_string(), EVENT_TYPE_TAG.to_string()];
    if let Some(env) = env {
        tags.push(format!("env:{env}"));
    }

    NotificationEvent {
        title: EVENT_TITLE.to_string(),
        body: EVENT_TEXT.to_string(),
        host: identity.to_string(),
        tags,
        severity: Severity::Warning,
    }
}

/// Emit the termination-notice event
pub async fn notify(
    sink: &dyn EventSink,
    identity: &InstanceIdentity,
    env: Option<&str>,
) -> Result<()> {
    let event = termination_event(identity, env);
    let status = sink.create_event(&event).await?;
    info!("Sent Datadog event: {}", status);
    Ok(())
}
