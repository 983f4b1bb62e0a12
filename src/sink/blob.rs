//! Buffered object-store dialect.
//!
//! Each flushed batch becomes one immutable object: the NDJSON payload is
//! gzip-compressed and written under a random, timestamped key below the
//! configured root, e.g. `events/1454684704-dHkqQwBraJmtxcEnnoqv.json.gz`.
//! Keys never collide in practice and never get overwritten, so concurrent
//! saves from every worker need no coordination.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::debug;

use super::{Result, Sink};
use crate::config::BlobConfig;

/// Length of the random component of an object key.
const KEY_RANDOM_LEN: usize = 20;

/// Object-store sink writing gzip-compressed NDJSON batches.
pub struct BlobSink {
    /// Object store root directory.
    root: PathBuf,

    /// Key prefix prepended to every object name.
    prefix: String,
}

impl BlobSink {
    /// Creates the sink, ensuring the object root exists.
    pub async fn new(config: &BlobConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.path).await?;
        Ok(BlobSink {
            root: config.path.clone(),
            prefix: config.prefix.clone(),
        })
    }

    /// Generates a fresh object key: `<prefix><unix-ts>-<random>.json.gz`.
    fn random_object_key(&self) -> String {
        let random: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(KEY_RANDOM_LEN)
            .map(char::from)
            .collect();
        format!("{}{}-{}.json.gz", self.prefix, Utc::now().timestamp(), random)
    }

    /// Gzip-compresses a payload.
    fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()
    }
}

#[async_trait]
impl Sink for BlobSink {
    fn is_buffered(&self) -> bool {
        true
    }

    async fn save(&self, payload: Bytes) -> Result<()> {
        let key = self.random_object_key();
        let object = self.root.join(&key);
        if let Some(parent) = object.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let compressed = Self::compress(&payload)?;
        tokio::fs::write(&object, compressed).await?;

        debug!(key = %key, bytes = payload.len(), "Saved batch object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use flate2::read::GzDecoder;

    async fn sink_in(dir: &tempfile::TempDir, prefix: &str) -> BlobSink {
        BlobSink::new(&BlobConfig {
            path: dir.path().to_path_buf(),
            prefix: prefix.to_string(),
        })
        .await
        .unwrap()
    }

    fn written_objects(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn save_writes_one_decodable_gzip_object() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir, "").await;

        sink.save(Bytes::from_static(b"{\"event\":\"a\"}\n{\"event\":\"b\"}\n"))
            .await
            .unwrap();

        let objects = written_objects(dir.path());
        assert_eq!(objects.len(), 1);
        assert!(objects[0].to_str().unwrap().ends_with(".json.gz"));

        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(&objects[0]).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "{\"event\":\"a\"}\n{\"event\":\"b\"}\n");
    }

    #[tokio::test]
    async fn save_honors_key_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir, "events/daily/").await;

        sink.save(Bytes::from_static(b"{}\n")).await.unwrap();

        let objects = written_objects(dir.path());
        assert_eq!(objects.len(), 1);
        let relative = objects[0].strip_prefix(dir.path()).unwrap();
        assert!(relative.starts_with("events/daily"));
    }

    #[tokio::test]
    async fn object_keys_are_unique_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir, "").await;

        for _ in 0..5 {
            sink.save(Bytes::from_static(b"{}\n")).await.unwrap();
        }

        assert_eq!(written_objects(dir.path()).len(), 5);
    }

    #[tokio::test]
    async fn new_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("store/objects");

        BlobSink::new(&BlobConfig {
            path: nested.clone(),
            prefix: String::new(),
        })
        .await
        .unwrap();

        assert!(nested.is_dir());
    }
}
