//! HTTP transport to the coordinator.

use async_trait::async_trait;
use fleet_core::agent::WorkChannel;
use fleet_core::ports::CoordinatorTransport;
use fleet_core::protocol::{LivenessSignal, RegistrationAck, RegistrationRequest, Rejection};
use fleet_core::{Error, Result};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// JSON-over-HTTP coordinator client.
///
/// Routes:
/// - `POST /api/v1/agents/register`
/// - `POST /api/v1/agents/{name}/heartbeat`
/// - `DELETE /api/v1/agents/{name}`
pub struct HttpCoordinator {
    client: Client,
    registration_timeout: Duration,
    request_timeout: Duration,
}

impl HttpCoordinator {
    pub fn new(registration_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("fleet-agent/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(registration_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            registration_timeout,
            request_timeout,
        })
    }

    fn classify(&self, err: reqwest::Error, timeout: Duration) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                seconds: timeout.as_secs(),
            }
        } else {
            Error::Unreachable(err.to_string())
        }
    }
}

/// `{base}/api/v1/{segments...}`, keeping any path prefix on `base`.
fn api_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidConfig(format!("coordinator address cannot be a base: {}", base)))?
        .pop_if_empty()
        .extend(["api", "v1"])
        .extend(segments);
    Ok(url)
}

/// Map a non-success status to an error.
///
/// 5xx and 429 mean the coordinator is up but not serving; 408 is a timeout;
/// any other 4xx is a refusal.
async fn status_error(response: Response, timeout: Duration) -> Error {
    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Error::Unreachable(format!("coordinator answered {}", status));
    }
    if status == StatusCode::REQUEST_TIMEOUT {
        return Error::Timeout {
            seconds: timeout.as_secs(),
        };
    }

    let body = response.text().await.unwrap_or_default();
    let reason = match serde_json::from_str::<Rejection>(&body) {
        Ok(rejection) => rejection.reason,
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.trim().to_string(),
    };
    Error::Rejected { reason }
}

#[async_trait]
impl CoordinatorTransport for HttpCoordinator {
    async fn register(
        &self,
        address: &Url,
        request: &RegistrationRequest,
    ) -> Result<RegistrationAck> {
        let url = api_url(address, &["agents", "register"])?;
        debug!(url = %url, "Sending registration");

        let response = self
            .client
            .post(url)
            .timeout(self.registration_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e, self.registration_timeout))?;

        if !response.status().is_success() {
            return Err(status_error(response, self.registration_timeout).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.classify(e, self.registration_timeout))?;
        serde_json::from_str(&body).map_err(|e| Error::Rejected {
            reason: format!("malformed registration ack: {}", e),
        })
    }

    async fn send_liveness(&self, channel: &WorkChannel, signal: &LivenessSignal) -> Result<()> {
        let url = api_url(&channel.address, &["agents", &channel.agent_name, "heartbeat"])?;

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .bearer_auth(&channel.token)
            .json(signal)
            .send()
            .await
            .map_err(|e| self.classify(e, self.request_timeout))?;

        if !response.status().is_success() {
            return Err(status_error(response, self.request_timeout).await);
        }
        Ok(())
    }

    async fn deregister(&self, channel: &WorkChannel) -> Result<()> {
        let url = api_url(&channel.address, &["agents", &channel.agent_name])?;

        let response = self
            .client
            .delete(url)
            .timeout(self.request_timeout)
            .bearer_auth(&channel.token)
            .send()
            .await
            .map_err(|e| self.classify(e, self.request_timeout))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(response, self.request_timeout).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_keeps_prefix() {
        let base = Url::parse("http://ci-master.internal/fleet/").unwrap();
        let url = api_url(&base, &["agents", "register"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://ci-master.internal/fleet/api/v1/agents/register"
        );
    }

    #[test]
    fn test_api_url_encodes_agent_name() {
        let base = Url::parse("https://ci-master.internal").unwrap();
        let url = api_url(&base, &["agents", "linux gpu/3", "heartbeat"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://ci-master.internal/api/v1/agents/linux%20gpu%2F3/heartbeat"
        );
    }
}
