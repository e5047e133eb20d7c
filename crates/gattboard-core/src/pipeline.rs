//! Data refresh pipeline
//!
//! Fetch the primary snapshot, fill missing departure attributes from the
//! timetable fallback and serialize the result for publishing.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::departures::FallbackSource;
use crate::error::Result;
use crate::snapshot::DataSnapshot;
use crate::source::PrimarySource;

/// Outcome of one refresh
#[derive(Debug, Clone)]
pub struct RefreshOutput {
    /// Final document after fallback merging
    pub snapshot: DataSnapshot,
    /// Serialized document, ready for chunking
    pub payload: Vec<u8>,
    /// Whether the timetable fallback was consulted
    pub fallback_used: bool,
}

/// Produces a publishable snapshot from the configured sources
pub struct RefreshPipeline {
    primary: Arc<dyn PrimarySource>,
    fallback: Arc<dyn FallbackSource>,
    trigger_attribute: String,
    /// Line identifier to the attribute it fills
    lines: BTreeMap<String, String>,
    line_ids: Vec<String>,
    count: usize,
}

impl RefreshPipeline {
    pub fn new(
        primary: Arc<dyn PrimarySource>,
        fallback: Arc<dyn FallbackSource>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            trigger_attribute: config.primary.trigger_attribute.clone(),
            lines: config.fallback.lines.clone(),
            line_ids: config.fallback.line_ids(),
            count: config.fallback.count,
        }
    }

    /// Run one refresh. Errors from either source propagate unchanged.
    pub async fn refresh(&self) -> Result<RefreshOutput> {
        let mut snapshot = self.primary.fetch().await?;

        let fallback_used = snapshot.is_attribute_falsy(&self.trigger_attribute);
        if fallback_used {
            info!(
                "Attribute {} is empty, resolving departures from timetable",
                self.trigger_attribute
            );
            let departures = self.fallback.departures(&self.line_ids, self.count).await?;
            self.merge(&mut snapshot, &departures);
        }

        let payload = snapshot.to_bytes()?;
        debug!("Refreshed snapshot: {} bytes", payload.len());

        Ok(RefreshOutput {
            snapshot,
            payload,
            fallback_used,
        })
    }

    /// Write resolved departures into the attributes that are still empty.
    ///
    /// Attributes the primary source already filled are left as they are.
    pub fn merge(&self, snapshot: &mut DataSnapshot, departures: &BTreeMap<String, String>) {
        for (line, attribute) in &self.lines {
            if !snapshot.is_attribute_falsy(attribute) {
                continue;
            }
            if let Some(value) = departures.get(line) {
                debug!("Filling {} from line {}: {:?}", attribute, line, value);
                snapshot.set_attribute(attribute, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticPrimary(serde_json::Value);

    #[async_trait]
    impl PrimarySource for StaticPrimary {
        async fn fetch(&self) -> Result<DataSnapshot> {
            DataSnapshot::from_value(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CountingFallback {
        calls: AtomicUsize,
        requested: Mutex<Option<(Vec<String>, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl FallbackSource for CountingFallback {
        async fn departures(
            &self,
            lines: &[String],
            count: usize,
        ) -> Result<BTreeMap<String, String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.requested.lock().unwrap() = Some((lines.to_vec(), count));
            if self.fail {
                return Err(SyncError::fallback_unavailable("HTTP status 503"));
            }
            Ok([("197", "07:15|07:30"), ("201", "08:00|08:20")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect())
        }
    }

    fn pipeline(doc: serde_json::Value, fallback: Arc<CountingFallback>) -> RefreshPipeline {
        RefreshPipeline::new(Arc::new(StaticPrimary(doc)), fallback, &SyncConfig::default())
    }

    #[tokio::test]
    async fn test_empty_trigger_invokes_fallback() {
        let fallback = Arc::new(CountingFallback::default());
        let output = pipeline(
            json!({"attributes": {"bus_197": "", "bus_201": "08:00"}}),
            fallback.clone(),
        )
        .refresh()
        .await
        .unwrap();

        assert!(output.fallback_used);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fallback.requested.lock().unwrap().clone(),
            Some((vec!["197".to_string(), "201".to_string()], 3))
        );
        assert_eq!(
            output.snapshot.as_value(),
            &json!({"attributes": {"bus_197": "07:15|07:30", "bus_201": "08:00"}})
        );
    }

    #[tokio::test]
    async fn test_filled_trigger_skips_fallback() {
        let fallback = Arc::new(CountingFallback::default());
        let output = pipeline(
            json!({"attributes": {"bus_197": "07:15", "bus_201": ""}}),
            fallback.clone(),
        )
        .refresh()
        .await
        .unwrap();

        assert!(!output.fallback_used);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert_eq!(output.snapshot.attribute("bus_201"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_missing_trigger_invokes_fallback() {
        let fallback = Arc::new(CountingFallback::default());
        let output = pipeline(json!({"attributes": {}}), fallback.clone())
            .refresh()
            .await
            .unwrap();

        assert!(output.fallback_used);
        assert_eq!(output.snapshot.attribute("bus_201"), Some(&json!("08:00|08:20")));
    }

    #[tokio::test]
    async fn test_fallback_failure_propagates() {
        let fallback = Arc::new(CountingFallback {
            fail: true,
            ..Default::default()
        });
        let err = pipeline(json!({"attributes": {"bus_197": null}}), fallback)
            .refresh()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::FallbackUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_payload_is_serialized_snapshot() {
        let fallback = Arc::new(CountingFallback::default());
        let output = pipeline(json!({"attributes": {"bus_197": "06:00"}}), fallback)
            .refresh()
            .await
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&output.payload).unwrap();
        assert_eq!(&parsed, output.snapshot.as_value());
    }
}
