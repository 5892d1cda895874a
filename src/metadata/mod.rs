//! Instance metadata: eligibility, identity and interruption polling
//!
//! The metadata source distinguishes "no such value" from a failed request.
//! The interruption poller depends on that: a missing notice is the steady
//! state, while any other failure must stop the daemon.

mod imds;

pub use imds::ImdsClient;

use crate::error::{Error, Result};
use crate::types::{InstanceIdentity, InterruptionNotice, PollOutcome};
use async_trait::async_trait;
use tracing::{debug, info};

pub const LIFE_CYCLE_PATH: &str = "instance-life-cycle";
pub const INSTANCE_ID_PATH: &str = "instance-id";
pub const INSTANCE_ACTION_PATH: &str = "spot/instance-action";

/// Life cycle marker of a preemptible instance
pub const SPOT_LIFE_CYCLE: &str = "spot";

/// Response from a single metadata lookup
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Metadata {
    Found(String),
    NotFound,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Look up a single metadata path, e.g. `instance-id`
    async fn get_metadata(&self, path: &str) -> Result<Metadata>;
}

async fn require(source: &dyn MetadataSource, path: &'static str) -> Result<String> {
    match source.get_metadata(path).await? {
        Metadata::Found(value) => Ok(value),
        Metadata::NotFound => Err(Error::ParseError {
            operation: path,
            message: "metadata path not found".to_string(),
        }),
    }
}

/// Whether this instance runs on spot capacity
pub async fn is_preemptible(source: &dyn MetadataSource) -> Result<bool> {
    let life_cycle = require(source, LIFE_CYCLE_PATH).await?;
    debug!("Instance life cycle: {}", life_cycle.trim());
    Ok(life_cycle.trim().eq_ignore_ascii_case(SPOT_LIFE_CYCLE))
}

/// Identity the scheduler knows this instance by
pub async fn instance_identity(source: &dyn MetadataSource) -> Result<InstanceIdentity> {
    let id = require(source, INSTANCE_ID_PATH).await?;
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::ParseError {
            operation: INSTANCE_ID_PATH,
            message: "empty instance id".to_string(),
        });
    }
    Ok(InstanceIdentity::new(id))
}

/// Check once whether an interruption notice has been published
pub async fn poll_interruption(source: &dyn MetadataSource) -> Result<PollOutcome> {
    match source.get_metadata(INSTANCE_ACTION_PATH).await? {
        Metadata::NotFound => {
            debug!("No interruption notice available");
            Ok(PollOutcome::NotMarked)
        }
        Metadata::Found(body) => {
            let notice: InterruptionNotice =
                serde_json::from_str(&body).map_err(|e| Error::ParseError {
                    operation: INSTANCE_ACTION_PATH,
                    message: e.to_string(),
                })?;
            info!(
                "Instance is marked for interruption! Action: {}, Time: {}",
                notice.action, notice.time
            );
            Ok(PollOutcome::Marked(notice))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned responses per path; unknown paths yield a server error
    struct StaticSource(Mutex<HashMap<&'static str, Result<Metadata>>>);

    impl StaticSource {
        fn new(entries: Vec<(&'static str, Result<Metadata>)>) -> Self {
            Self(Mutex::new(entries.into_iter().collect()))
        }
    }

    #[async_trait]
    impl MetadataSource for StaticSource {
        async fn get_metadata(&self, path: &str) -> Result<Metadata> {
            match self.0.lock().unwrap().remove(path) {
                Some(result) => result,
                None => Err(Error::Api {
                    operation: "query instance metadata",
                    status: 500,
                    body: String::new(),
                }),
            }
        }
    }

    fn found(value: &str) -> Result<Metadata> {
        Ok(Metadata::Found(value.to_string()))
    }

    #[tokio::test]
    async fn test_spot_is_preemptible_case_insensitive() {
        for value in ["spot", "SPOT", "Spot\n"] {
            let source = StaticSource::new(vec![(LIFE_CYCLE_PATH, found(value))]);
            assert!(is_preemptible(&source).await.unwrap(), "{value:?}");
        }
    }

    #[tokio::test]
    async fn test_on_demand_is_not_preemptible() {
        let source = StaticSource::new(vec![(LIFE_CYCLE_PATH, found("on-demand"))]);
        assert!(!is_preemptible(&source).await.unwrap());
    }

    #[tokio::test]
    async fn test_eligibility_error_is_fatal() {
        let source = StaticSource::new(vec![]);
        assert!(is_preemptible(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_life_cycle_is_fatal() {
        let source = StaticSource::new(vec![(LIFE_CYCLE_PATH, Ok(Metadata::NotFound))]);
        assert!(is_preemptible(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_identity_is_trimmed() {
        let source = StaticSource::new(vec![(INSTANCE_ID_PATH, found("i-0abc\n"))]);
        let id = instance_identity(&source).await.unwrap();
        assert_eq!(id.as_str(), "i-0abc");
    }

    #[tokio::test]
    async fn test_empty_identity_is_fatal() {
        let source = StaticSource::new(vec![(INSTANCE_ID_PATH, found("  "))]);
        assert!(instance_identity(&source).await.is_err());
    }

    #[tokio::test]
    async fn test_absent_notice_is_not_marked() {
        let source = StaticSource::new(vec![(INSTANCE_ACTION_PATH, Ok(Metadata::NotFound))]);
        assert_eq!(
            poll_interruption(&source).await.unwrap(),
            PollOutcome::NotMarked
        );
    }

    #[tokio::test]
    async fn test_notice_is_marked() {
        let source = StaticSource::new(vec![(
            INSTANCE_ACTION_PATH,
            found(r#"{"action": "terminate", "time": "2017-09-18T08:22:00Z"}"#),
        )]);
        match poll_interruption(&source).await.unwrap() {
            PollOutcome::Marked(notice) => assert_eq!(notice.action, "terminate"),
            other => panic!("expected a notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_notice_is_error_not_absence() {
        let source = StaticSource::new(vec![(INSTANCE_ACTION_PATH, found("not json"))]);
        let err = poll_interruption(&source).await.unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[tokio::test]
    async fn test_transport_error_is_error_not_absence() {
        let source = StaticSource::new(vec![]);
        let err = poll_interruption(&source).await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }
}
