// src/http.rs

use crate::config::EngineConfig;
use crate::session::SetupError;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{debug, info};

/// Builds the HTTP client shared by every session of an engine.
///
/// Without an explicit proxy in the config, reqwest picks up the system proxy
/// settings (`HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY`, ...) on its own.
pub fn build_client(config: &EngineConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout());

    match &config.proxy {
        Some(proxy) => {
            info!(proxy = %proxy, "using configured proxy");
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }
        None => debug!("no proxy configured, using system settings"),
    }

    builder.build()
}

/// Resolves the remote size with a HEAD request that must answer within
/// `timeout`.
pub async fn content_length(client: &Client, url: &str, timeout: Duration) -> Result<u64, SetupError> {
    let resp = client.head(url).timeout(timeout).send().await?;
    if !resp.status().is_success() {
        return Err(SetupError::BadStatus { status: resp.status() });
    }
    // read the header directly: for HEAD replies the body length is always zero
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(SetupError::MissingContentLength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn head_reports_content_length() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1234]))
            .mount(&server)
            .await;

        let client = build_client(&EngineConfig::default()).unwrap();
        let size = content_length(&client, &format!("{}/file.bin", server.uri()), Duration::from_secs(5)).await.unwrap();
        assert_eq!(size, 1234);
    }

    #[tokio::test]
    async fn head_failure_is_a_setup_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_client(&EngineConfig::default()).unwrap();
        let err = content_length(&client, &server.uri(), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SetupError::BadStatus { .. }));
    }

    #[tokio::test]
    async fn stalled_head_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let client = build_client(&EngineConfig::default()).unwrap();
        let started = std::time::Instant::now();
        let err = content_length(&client, &server.uri(), Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, SetupError::Network(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
