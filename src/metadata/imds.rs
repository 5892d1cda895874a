//! HTTP client for the EC2 instance metadata service
//!
//! Requests use an IMDSv2 session token. Endpoints that refuse the token
//! request with 403, 404 or 405 are queried without one (IMDSv1).

use super::{Metadata, MetadataSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TOKEN_PATH: &str = "/latest/api/token";
const METADATA_PREFIX: &str = "/latest/meta-data";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Lifetime requested for a session token (the IMDS maximum)
const TOKEN_TTL: Duration = Duration::from_secs(21600);

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct SessionToken {
    value: String,
    expires_at: Instant,
}

impl SessionToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

enum TokenState {
    Token(SessionToken),
    /// The endpoint does not issue tokens; query without one
    Unsupported,
}

/// Token request statuses that mean "no IMDSv2 here" rather than a failure
fn is_tokenless_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED
    )
}

/// Client for the instance metadata service
pub struct ImdsClient {
    http_client: Client,
    endpoint: String,
    token: Mutex<Option<TokenState>>,
}

impl ImdsClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spotdrain/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    /// Current session token, or `None` when the endpoint only speaks IMDSv1
    async fn session_token(&self) -> Result<Option<String>> {
        let mut cached = self.token.lock().await;
        match cached.as_ref() {
            Some(TokenState::Token(token)) if token.is_fresh() => {
                return Ok(Some(token.value.clone()))
            }
            Some(TokenState::Unsupported) => return Ok(None),
            _ => {}
        }

        let url = format!("{}{}", self.endpoint, TOKEN_PATH);
        debug!("Requesting IMDS session token from {}", url);

        let response = self
            .http_client
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL.as_secs().to_string())
            .send()
            .await?;

        if is_tokenless_status(response.status()) {
            warn!(
                "IMDS token request returned {}, falling back to IMDSv1",
                response.status()
            );
            *cached = Some(TokenState::Unsupported);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::from_response("fetch IMDS session token", response).await);
        }

        let value = response.text().await?.trim().to_string();
        if value.is_empty() {
            return Err(Error::ParseError {
                operation: "fetch IMDS session token",
                message: "empty token".to_string(),
            });
        }

        *cached = Some(TokenState::Token(SessionToken {
            value: value.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        }));
        Ok(Some(value))
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn fetch(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}/{}", self.endpoint, METADATA_PREFIX, path);
        let token = self.session_token().await?;
        debug!("Querying instance metadata {}", url);

        let mut request = self.http_client.get(&url);
        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl MetadataSource for ImdsClient {
    async fn get_metadata(&self, path: &str) -> Result<Metadata> {
        let mut response = self.fetch(path).await?;

        // A rejected token has expired server-side; fetch a new one once.
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("IMDS rejected session token, refreshing");
            self.invalidate_token().await;
            response = self.fetch(path).await?;
        }

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Metadata::NotFound),
            status if status.is_success() => Ok(Metadata::Found(response.text().await?)),
            _ => Err(Error::from_response("query instance metadata", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer, token: &str) {
        Mock::given(method("PUT"))
            .and(path(TOKEN_PATH))
            .and(header(TOKEN_TTL_HEADER, "21600"))
            .respond_with(ResponseTemplate::new(200).set_body_string(token))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> ImdsClient {
        ImdsClient::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_found_value_uses_session_token() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/instance-id"))
            .and(header(TOKEN_HEADER, "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("i-0abc"))
            .mount(&server)
            .await;

        let result = client(&server).get_metadata("instance-id").await.unwrap();
        assert_eq!(result, Metadata::Found("i-0abc".to_string()));
    }

    #[tokio::test]
    async fn test_not_found_is_distinct_from_error() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/spot/instance-action"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server)
            .get_metadata("spot/instance-action")
            .await
            .unwrap();
        assert_eq!(result, Metadata::NotFound);
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let server = MockServer::start().await;
        mount_token(&server, "tok-1").await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/spot/instance-action"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_metadata("spot/instance-action")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_token_is_cached_between_requests() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("tok-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/instance-id"))
            .respond_with(ResponseTemplate::new(200).set_body_string("i-0abc"))
            .expect(2)
            .mount(&server)
            .await;

        let imds = client(&server);
        imds.get_metadata("instance-id").await.unwrap();
        imds.get_metadata("instance-id").await.unwrap();
    }

    #[tokio::test]
    async fn test_token_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).get_metadata("instance-id").await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_tokenless_endpoint_falls_back_to_imdsv1() {
        for status in [403u16, 404, 405] {
            let server = MockServer::start().await;
            Mock::given(method("PUT"))
                .and(path(TOKEN_PATH))
                .respond_with(ResponseTemplate::new(status))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/latest/meta-data/instance-life-cycle"))
                .respond_with(ResponseTemplate::new(200).set_body_string("spot"))
                .expect(2)
                .mount(&server)
                .await;

            let imds = client(&server);
            for _ in 0..2 {
                let result = imds.get_metadata("instance-life-cycle").await.unwrap();
                assert_eq!(result, Metadata::Found("spot".to_string()), "status {status}");
            }

            let requests = server.received_requests().await.unwrap_or_default();
            assert!(requests
                .iter()
                .filter(|r| r.method.as_str() == "GET")
                .all(|r| !r.headers.contains_key(TOKEN_HEADER)));
            server.verify().await;
        }
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("tok-1"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/instance-id"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/instance-id"))
            .respond_with(ResponseTemplate::new(200).set_body_string("i-0abc"))
            .mount(&server)
            .await;

        let result = client(&server).get_metadata("instance-id").await.unwrap();
        assert_eq!(result, Metadata::Found("i-0abc".to_string()));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        // TEST-NET range, not routable
        let imds = ImdsClient::new("http://192.0.2.1:9999", Duration::from_millis(200)).unwrap();
        let err = imds.get_metadata("instance-id").await.unwrap_err();
        assert!(matches!(err, Error::HttpError(_)));
    }
}
