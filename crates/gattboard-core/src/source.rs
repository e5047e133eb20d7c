//! Primary snapshot source

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::config::PrimaryConfig;
use crate::error::{Result, SyncError};
use crate::snapshot::DataSnapshot;

/// Something that can produce the current snapshot
#[async_trait]
pub trait PrimarySource: Send + Sync {
    /// Fetch a fresh snapshot; any transport or decoding failure is
    /// [`SyncError::SourceUnavailable`]
    async fn fetch(&self) -> Result<DataSnapshot>;
}

/// Authenticated JSON endpoint (e.g. a Home Assistant entity state)
pub struct HttpPrimarySource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPrimarySource {
    pub fn new(config: &PrimaryConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = config.auth.as_deref() {
            let mut value = HeaderValue::from_str(&authorization_value(auth))
                .map_err(|e| SyncError::source_unavailable(format!("invalid auth header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(SyncError::source_unavailable)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

/// Bearer-style header value; values that already carry a scheme are kept
pub fn authorization_value(auth: &str) -> String {
    let auth = auth.trim();
    if auth.contains(' ') {
        auth.to_string()
    } else {
        format!("Bearer {auth}")
    }
}

#[async_trait]
impl PrimarySource for HttpPrimarySource {
    async fn fetch(&self) -> Result<DataSnapshot> {
        debug!("Fetching snapshot from {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(SyncError::source_unavailable)?
            .error_for_status()
            .map_err(SyncError::source_unavailable)?;

        let body = response
            .bytes()
            .await
            .map_err(SyncError::source_unavailable)?;

        let document: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| SyncError::source_unavailable(format!("invalid JSON body: {e}")))?;

        DataSnapshot::from_value(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_value() {
        assert_eq!(authorization_value("abc"), "Bearer abc");
        assert_eq!(authorization_value("Bearer abc"), "Bearer abc");
        assert_eq!(authorization_value(" Token xyz "), "Token xyz");
    }

    #[tokio::test]
    async fn test_connection_refused_is_source_unavailable() {
        let config = PrimaryConfig {
            endpoint: "http://127.0.0.1:9/api/states/sensor.board".to_string(),
            auth: Some("secret".to_string()),
            timeout_secs: 2,
            ..PrimaryConfig::default()
        };
        let source = HttpPrimarySource::new(&config).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    }
}
