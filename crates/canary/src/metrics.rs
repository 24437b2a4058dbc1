//! Metrics Aggregator (C7). A Monitor builds one `PollMetrics` per tick,
//! accumulating scalar values and histogram value/count pairs exactly as the
//! external sink expects (§4.7, §9's "dynamic dict-of-dicts -> typed enum"
//! redesign), then hands the finished `MetricsBatch` to a `MetricsSink`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::SinkError;
use crate::model::StreamType;

/// A metric's value: a single scalar, or a histogram maintained as parallel
/// value/count arrays (a new observation either bumps an existing bucket's
/// count or appends a new value with count 1).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricValue {
    Scalar(f64),
    Histogram { values: Vec<f64>, counts: Vec<u64> },
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub dimensions: Vec<(String, String)>,
    pub value: MetricValue,
}

/// One tick's worth of metrics, ready to publish (§4.7: "a single batch per tick").
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsBatch {
    pub records: Vec<MetricRecord>,
}

/// Names of the histogram-valued metrics (§4.7); everything else recorded
/// through `PollMetrics::scalar` is scalar.
pub const HISTOGRAM_METRICS: &[&str] = &[
    "segmentresponsetime",
    "segmentsize",
    "segmentduration",
    "discontinuity",
    "adbreak",
    "addurationadvertised",
    "addurationactual",
    "addurationdelta",
    "adavailnum",
    "ptsdelta",
];

/// Builder owned by one Monitor tick. `endpoint`/`stream_type` become the
/// fixed {Endpoint, Type} dimensions on every record (§4.7).
pub struct PollMetrics {
    endpoint: String,
    stream_type: StreamType,
    scalars: Vec<(String, f64)>,
    histograms: Vec<(String, Vec<f64>, Vec<u64>)>,
}

impl PollMetrics {
    pub fn new(endpoint: impl Into<String>, stream_type: StreamType) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream_type,
            scalars: Vec::new(),
            histograms: Vec::new(),
        }
    }

    pub fn scalar(&mut self, name: &str, value: f64) {
        if let Some(existing) = self.scalars.iter_mut().find(|(n, _)| n == name) {
            existing.1 = value;
        } else {
            self.scalars.push((name.to_string(), value));
        }
    }

    /// Per-category error counters (`<cat>4xx`, `<cat>5xx`, `<cat>timeouterror`)
    /// are histograms of a constant 1.0, one observation per occurrence.
    pub fn observe(&mut self, name: &str, value: f64) {
        if let Some((_, values, counts)) = self.histograms.iter_mut().find(|(n, _, _)| n == name) {
            if let Some(pos) = values.iter().position(|v| (v - value).abs() < f64::EPSILON) {
                counts[pos] += 1;
            } else {
                values.push(value);
                counts.push(1);
            }
        } else {
            self.histograms.push((name.to_string(), vec![value], vec![1]));
        }
    }

    pub fn finish(self) -> MetricsBatch {
        let dims = vec![
            ("Endpoint".to_string(), self.endpoint.clone()),
            ("Type".to_string(), self.stream_type.as_str().to_string()),
        ];
        let mut records = Vec::with_capacity(self.scalars.len() + self.histograms.len());
        for (name, value) in self.scalars {
            records.push(MetricRecord { name, dimensions: dims.clone(), value: MetricValue::Scalar(value) });
        }
        for (name, values, counts) in self.histograms {
            records.push(MetricRecord { name, dimensions: dims.clone(), value: MetricValue::Histogram { values, counts } });
        }
        MetricsBatch { records }
    }
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Hls => "hls",
            StreamType::Dash => "dash",
            StreamType::Smooth => "smooth",
        }
    }
}

/// External metrics-sink protocol (§6, §4.7). A real backend (a remote TSDB
/// client) is out of scope here and lives behind this trait.
#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, batch: MetricsBatch) -> Result<(), SinkError>;
}

/// Default sink: logs the batch at INFO via `tracing`. Since there is no
/// real TSDB in this workspace, this is what "metrics on" means out of the box.
#[derive(Debug, Default)]
pub struct TracingMetricsSink {
    pub namespace: String,
}

impl TracingMetricsSink {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into() }
    }
}

#[async_trait::async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn publish(&self, batch: MetricsBatch) -> Result<(), SinkError> {
        for record in &batch.records {
            match &record.value {
                MetricValue::Scalar(v) => info!(
                    namespace = %self.namespace,
                    metric = %record.name,
                    dimensions = ?record.dimensions,
                    value = v,
                    "metric"
                ),
                MetricValue::Histogram { values, counts } => info!(
                    namespace = %self.namespace,
                    metric = %record.name,
                    dimensions = ?record.dimensions,
                    values = ?values,
                    counts = ?counts,
                    "metric"
                ),
            }
        }
        Ok(())
    }
}

/// Optional sink appending newline-delimited JSON to a file, composable with
/// `TracingMetricsSink` via `CompositeMetricsSink` (§4.7: "both are concrete
/// implementations behind the trait so a real backend can be swapped in").
pub struct NdjsonFileMetricsSink {
    path: PathBuf,
}

impl NdjsonFileMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl MetricsSink for NdjsonFileMetricsSink {
    async fn publish(&self, batch: MetricsBatch) -> Result<(), SinkError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(SinkError::BlobPersist)?;
        for record in &batch.records {
            let line = serde_json::to_string(record)
                .map_err(|e| SinkError::MetricsPublish(e.to_string()))?;
            file.write_all(line.as_bytes()).await.map_err(SinkError::BlobPersist)?;
            file.write_all(b"\n").await.map_err(SinkError::BlobPersist)?;
        }
        Ok(())
    }
}

/// Fans a batch out to every sink in the list via the same `Arc<dyn Trait>`
/// composition idiom used elsewhere in this crate, rather than a hand-rolled
/// multiplexer.
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait::async_trait]
impl MetricsSink for CompositeMetricsSink {
    async fn publish(&self, batch: MetricsBatch) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.publish(batch.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_accumulates_repeated_values() {
        let mut m = PollMetrics::new("rendition-a", StreamType::Hls);
        m.observe("segmentduration", 6.0);
        m.observe("segmentduration", 6.0);
        m.observe("segmentduration", 5.0);
        let batch = m.finish();
        let rec = batch.records.iter().find(|r| r.name == "segmentduration").unwrap();
        match &rec.value {
            MetricValue::Histogram { values, counts } => {
                let pos6 = values.iter().position(|v| *v == 6.0).unwrap();
                assert_eq!(counts[pos6], 2);
                let pos5 = values.iter().position(|v| *v == 5.0).unwrap();
                assert_eq!(counts[pos5], 1);
            }
            _ => panic!("expected histogram"),
        }
    }

    #[test]
    fn scalar_overwrites_within_one_tick() {
        let mut m = PollMetrics::new("rendition-a", StreamType::Dash);
        m.scalar("stale", 0.0);
        m.scalar("stale", 1.0);
        let batch = m.finish();
        let rec = batch.records.iter().find(|r| r.name == "stale").unwrap();
        assert!(matches!(rec.value, MetricValue::Scalar(v) if v == 1.0));
    }

    #[test]
    fn dimensions_carry_endpoint_and_type() {
        let mut m = PollMetrics::new("rendition-a", StreamType::Smooth);
        m.scalar("inputbuffersize", 10.0);
        let batch = m.finish();
        let rec = &batch.records[0];
        assert!(rec.dimensions.contains(&("Endpoint".to_string(), "rendition-a".to_string())));
        assert!(rec.dimensions.contains(&("Type".to_string(), "smooth".to_string())));
    }

    #[tokio::test]
    async fn tracing_sink_never_fails() {
        let sink = TracingMetricsSink::new("canary");
        let mut m = PollMetrics::new("r", StreamType::Hls);
        m.scalar("stale", 0.0);
        assert!(sink.publish(m.finish()).await.is_ok());
    }

    #[tokio::test]
    async fn ndjson_sink_appends_lines() {
        let dir = std::env::temp_dir().join(format!("canary-metrics-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("metrics.ndjson");
        let sink = NdjsonFileMetricsSink::new(path.clone());
        let mut m = PollMetrics::new("r", StreamType::Hls);
        m.scalar("stale", 0.0);
        sink.publish(m.finish()).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
