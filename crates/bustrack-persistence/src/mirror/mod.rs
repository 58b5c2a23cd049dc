//! Mirror store backends
//!
//! - `HttpDocumentMirror`: posts one JSON document per sample to a document
//!   collection endpoint
//! - `NoopMirror`: used when mirroring is disabled

use std::time::Duration;

use async_trait::async_trait;
use bustrack_common::{PositionSample, TrackerError, now_millis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::traits::MirrorStore;

/// Default document collection name
pub const DEFAULT_MIRROR_COLLECTION: &str = "bus_locations";

/// Document written to the mirror: the canonical sample plus the server time
/// the copy was made.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorDocument {
    #[serde(flatten)]
    pub sample: PositionSample,
    pub recorded_at: i64,
}

impl MirrorDocument {
    pub fn new(sample: &PositionSample) -> Self {
        Self {
            sample: sample.clone(),
            recorded_at: now_millis(),
        }
    }
}

/// HTTP document-collection mirror
///
/// Every accepted sample becomes a new document created with
/// `POST {endpoint}/{collection}`.
pub struct HttpDocumentMirror {
    client: reqwest::Client,
    collection_url: String,
}

impl HttpDocumentMirror {
    pub fn new(endpoint: &str, collection: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(TrackerError::ConfigError("mirror endpoint is empty".to_string()).into());
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            collection_url: format!("{}/{}", endpoint, collection.trim_matches('/')),
        })
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }
}

#[async_trait]
impl MirrorStore for HttpDocumentMirror {
    fn name(&self) -> &'static str {
        "http-document"
    }

    async fn mirror_sample(&self, sample: &PositionSample) -> anyhow::Result<()> {
        let document = MirrorDocument::new(sample);

        let response = self
            .client
            .post(&self.collection_url)
            .json(&document)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::MirrorError(format!(
                "{} responded with {}",
                self.collection_url, status
            ))
            .into());
        }

        debug!(bus_id = sample.bus_id, timestamp = sample.timestamp, "Sample mirrored");
        Ok(())
    }
}

/// Mirror that accepts and discards every sample
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMirror;

#[async_trait]
impl MirrorStore for NoopMirror {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn mirror_sample(&self, _sample: &PositionSample) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PositionSample {
        PositionSample {
            bus_id: 4,
            latitude: 1.5,
            longitude: 2.5,
            speed: 20.0,
            heading: 180.0,
            timestamp: 1234,
        }
    }

    #[test]
    fn test_document_flattens_sample() {
        let json = serde_json::to_value(MirrorDocument::new(&sample())).unwrap();
        assert_eq!(json["busId"], 4);
        assert_eq!(json["heading"], 180.0);
        assert_eq!(json["timestamp"], 1234);
        assert!(json["recordedAt"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_collection_url() {
        let mirror =
            HttpDocumentMirror::new("http://mirror.local/", "bus_locations", Duration::from_secs(1))
                .unwrap();
        assert_eq!(mirror.collection_url(), "http://mirror.local/bus_locations");
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        assert!(HttpDocumentMirror::new("", "bus_locations", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let mirror = HttpDocumentMirror::new(
            "http://127.0.0.1:1",
            DEFAULT_MIRROR_COLLECTION,
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(mirror.mirror_sample(&sample()).await.is_err());
    }

    #[tokio::test]
    async fn test_noop_mirror() {
        assert!(NoopMirror.mirror_sample(&sample()).await.is_ok());
        assert_eq!(NoopMirror.name(), "noop");
    }
}
