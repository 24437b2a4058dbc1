//! Blob persistence (§6): saving raw manifest/segment/tracking bodies to
//! disk is an external collaborator per §1's scope note, but the on-disk
//! layout is specified, so it gets a narrow trait here plus a concrete
//! filesystem implementation.
//!
//! Layout: `<root>/{manifests,segments,tracking,logs}/<endpoint-or-rendition>/[YYYY-MM-DD/]<UTC-timestamp>_<suffix>`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobCategory {
    Manifest,
    Segment,
    Tracking,
    Log,
}

impl BlobCategory {
    fn dir_name(&self) -> &'static str {
        match self {
            BlobCategory::Manifest => "manifests",
            BlobCategory::Segment => "segments",
            BlobCategory::Tracking => "tracking",
            BlobCategory::Log => "logs",
        }
    }
}

#[async_trait::async_trait]
pub trait BlobSink: Send + Sync {
    /// Persists `bytes` for `endpoint_or_rendition` under `category`, naming
    /// the file `<timestamp>_<suffix>` (plus `.gz` if this sink compresses).
    async fn save(
        &self,
        category: BlobCategory,
        endpoint_or_rendition: &str,
        suffix: &str,
        bytes: &[u8],
    ) -> Result<(), SinkError>;
}

/// Never persists anything. The default when none of `save-manifests` /
/// `save-segments` / `save-tracking` are enabled.
#[derive(Debug, Default)]
pub struct NoopBlobSink;

#[async_trait::async_trait]
impl BlobSink for NoopBlobSink {
    async fn save(&self, _category: BlobCategory, _name: &str, _suffix: &str, _bytes: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Filesystem implementation of the §6 on-disk layout.
pub struct FileBlobSink {
    root: PathBuf,
    day_partitioned: bool,
    gzip: bool,
}

impl FileBlobSink {
    pub fn new(root: impl Into<PathBuf>, day_partitioned: bool, gzip: bool) -> Self {
        Self { root: root.into(), day_partitioned, gzip }
    }

    fn path_for(&self, category: BlobCategory, name: &str, suffix: &str, now: DateTime<Utc>) -> PathBuf {
        let mut dir = self.root.join(category.dir_name()).join(sanitize(name));
        if self.day_partitioned {
            dir = dir.join(now.format("%Y-%m-%d").to_string());
        }
        let timestamp = now.format("%Y_%m_%d_%H_%M_%S_%f").to_string();
        let filename = if self.gzip {
            format!("{timestamp}_{suffix}.gz")
        } else {
            format!("{timestamp}_{suffix}")
        };
        dir.join(filename)
    }
}

#[async_trait::async_trait]
impl BlobSink for FileBlobSink {
    async fn save(&self, category: BlobCategory, name: &str, suffix: &str, bytes: &[u8]) -> Result<(), SinkError> {
        let now = Utc::now();
        let path = self.path_for(category, name, suffix, now);
        let gzip = self.gzip;
        let payload = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_blob(&path, &payload, gzip))
            .await
            .map_err(|e| SinkError::BlobPersist(std::io::Error::other(e)))??;
        Ok(())
    }
}

fn write_blob(path: &Path, bytes: &[u8], gzip: bool) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?;
    } else {
        let mut file = file;
        file.write_all(bytes)?;
    }
    Ok(())
}

/// Endpoint/rendition names can contain characters that are awkward in path
/// segments (e.g. a DASH representation id with a `/`); replace anything
/// outside `[A-Za-z0-9._-]` with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_sink_writes_expected_layout() {
        let dir = std::env::temp_dir().join(format!("canary-sink-test-{}", std::process::id()));
        let sink = FileBlobSink::new(&dir, true, false);
        sink.save(BlobCategory::Manifest, "my-endpoint", "manifest.m3u8", b"#EXTM3U\n").await.unwrap();

        let manifests_dir = dir.join("manifests").join("my-endpoint");
        let day_dir = std::fs::read_dir(&manifests_dir).unwrap().next().unwrap().unwrap();
        assert!(day_dir.file_type().unwrap().is_dir());
        let mut entries = std::fs::read_dir(day_dir.path()).unwrap();
        let file = entries.next().unwrap().unwrap();
        assert!(file.file_name().to_string_lossy().ends_with("_manifest.m3u8"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn noop_sink_always_succeeds() {
        let sink = NoopBlobSink;
        assert!(sink.save(BlobCategory::Segment, "r", "seg.ts", b"data").await.is_ok());
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("video/1"), "video_1");
        assert_eq!(sanitize("a.b-c_d"), "a.b-c_d");
    }
}
