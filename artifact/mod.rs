//! # Artifact Loader
//!
//! Fetches a serialized predictor, refuses anything that looks like a web page
//! or fails the optional checksum, and decodes it into a `PredictionEngine`.
//! Both steps are memoized for the life of the loader: bytes by source, engines
//! by the digest of their bytes.

pub mod cache;
pub mod fetch;
pub mod model;

use crate::predict::PredictionEngine;
use cache::MemoCache;
use fetch::{SourceTransport, Transport, reject_markup, sha256_hex, verify_checksum};
use log::info;
use model::{ModelError, decode_artifact};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound for the download and for decoding, unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Could not download the model: {0}")]
    Transport(String),
    #[error("The model source '{location}' returned a web page, not a model file ({reason}).")]
    WrongArtifact { location: String, reason: String },
    #[error("Model checksum mismatch: expected {expected}, got {actual}.")]
    Integrity { expected: String, actual: String },
    #[error("Could not deserialize the model: {0}")]
    Deserialization(#[from] ModelError),
    #[error("Deserializing the model did not finish within {0:?}.")]
    DeserializeTimeout(Duration),
    #[error("Could not start the model decoder: {0}")]
    Worker(#[source] std::io::Error),
}

/// Owns the transport, the integrity settings and both memo caches.
pub struct ArtifactLoader<T: Transport = SourceTransport> {
    transport: T,
    expected_sha256: String,
    timeout: Duration,
    bytes: MemoCache<String, Vec<u8>>,
    engines: MemoCache<String, PredictionEngine>,
}

impl ArtifactLoader<SourceTransport> {
    /// A loader that reads URLs over HTTP and other sources from disk.
    pub fn from_settings(expected_sha256: &str, timeout: Duration) -> Result<Self, LoadError> {
        Ok(Self::new(SourceTransport::new(timeout)?, expected_sha256, timeout))
    }
}

impl<T: Transport> ArtifactLoader<T> {
    pub fn new(transport: T, expected_sha256: &str, timeout: Duration) -> Self {
        Self {
            transport,
            expected_sha256: expected_sha256.trim().to_string(),
            timeout,
            bytes: MemoCache::new(),
            engines: MemoCache::new(),
        }
    }

    /// Downloaded bytes for `source`, fetched at most once per loader.
    pub fn fetch_bytes(&self, source: &str) -> Result<Arc<Vec<u8>>, LoadError> {
        self.bytes.get_or_load(source.to_string(), || {
            info!("Downloading model from {source}...");
            let started = Instant::now();
            let fetched = self.transport.fetch(source)?;
            reject_markup(&fetched, source)?;
            verify_checksum(&fetched.body, &self.expected_sha256)?;
            info!(
                "Downloaded {} bytes in {:.2?}.",
                fetched.body.len(),
                started.elapsed()
            );
            Ok(fetched.body)
        })
    }

    /// The engine decoded from `bytes`, decoded at most once per distinct content.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<Arc<PredictionEngine>, LoadError> {
        let digest = sha256_hex(bytes);
        self.engines.get_or_load(digest, || {
            let started = Instant::now();
            let model = decode_with_deadline(bytes.to_vec(), self.timeout)?;
            let engine = PredictionEngine::new(Box::new(model));
            info!(
                "Deserialized {} in {:.2?}.",
                engine.describe(),
                started.elapsed()
            );
            Ok(engine)
        })
    }

    pub fn load(&self, source: &str) -> Result<Arc<PredictionEngine>, LoadError> {
        let bytes = self.fetch_bytes(source)?;
        self.deserialize(&bytes)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Decodes on a worker thread and gives up once `timeout` has passed. An
/// abandoned worker finishes in the background and its result is dropped.
fn decode_with_deadline(
    bytes: Vec<u8>,
    timeout: Duration,
) -> Result<model::ModelArtifact, LoadError> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("artifact-decode".to_string())
        .spawn(move || {
            // The receiver is gone if the deadline already passed.
            let _ = tx.send(decode_artifact(&bytes));
        })
        .map_err(LoadError::Worker)?;

    match rx.recv_timeout(timeout) {
        Ok(decoded) => Ok(decoded?),
        Err(RecvTimeoutError::Timeout) => Err(LoadError::DeserializeTimeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(LoadError::Deserialization(
            ModelError::Invalid("the decoder stopped without producing a model".to_string()),
        )),
    }
}
