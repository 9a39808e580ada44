//! Retrieving artifact bytes and the checks applied to them before decoding.

use super::LoadError;
use log::{debug, info};
use memchr::memmem;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use std::fs;
use std::time::Duration;

const HTTP_USER_AGENT: &str = "carprice-http-client/1.0";

/// How many leading bytes are inspected for a markup signature.
const SNIFF_LEN: usize = 256;

/// A downloaded payload and the content type the server declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Something that can turn a source location into bytes.
pub trait Transport: Send + Sync {
    fn fetch(&self, source: &str) -> Result<FetchedArtifact, LoadError>;
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Unauthenticated HTTP(S) GET with a bounded timeout.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, LoadError> {
        let client = Client::builder()
            .user_agent(HTTP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, source: &str) -> Result<FetchedArtifact, LoadError> {
        let response = self
            .client
            .get(source)
            .send()
            .map_err(|e| LoadError::Transport(format!("Request to {source} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Transport(format!("HTTP {status} for {source}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|e| LoadError::Transport(format!("Failed to read body of {source}: {e}")))?
            .to_vec();
        debug!("GET {source}: {status}, content type {content_type:?}.");
        Ok(FetchedArtifact { content_type, body })
    }
}

/// Reads a local artifact file. There is no declared content type.
pub struct FileTransport;

impl Transport for FileTransport {
    fn fetch(&self, source: &str) -> Result<FetchedArtifact, LoadError> {
        let body = fs::read(source)
            .map_err(|e| LoadError::Transport(format!("Failed to read {source}: {e}")))?;
        Ok(FetchedArtifact {
            content_type: None,
            body,
        })
    }
}

/// Routes URLs to HTTP and everything else to the filesystem.
pub struct SourceTransport {
    http: HttpTransport,
}

impl SourceTransport {
    pub fn new(timeout: Duration) -> Result<Self, LoadError> {
        Ok(Self {
            http: HttpTransport::new(timeout)?,
        })
    }
}

impl Transport for SourceTransport {
    fn fetch(&self, source: &str) -> Result<FetchedArtifact, LoadError> {
        if is_remote(source) {
            self.http.fetch(source)
        } else {
            FileTransport.fetch(source)
        }
    }
}

/// Why a payload looks like a web page, if it does.
pub fn markup_signal(artifact: &FetchedArtifact) -> Option<&'static str> {
    if let Some(content_type) = &artifact.content_type {
        if content_type.to_ascii_lowercase().contains("text/html") {
            return Some("content type is text/html");
        }
    }
    looks_like_markup(&artifact.body).then_some("payload starts like an HTML document")
}

/// True when the payload prefix carries an HTML document signature.
pub fn looks_like_markup(body: &[u8]) -> bool {
    let prefix = &body[..body.len().min(SNIFF_LEN)];
    let start = prefix
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    let head = prefix[start..].to_ascii_lowercase();
    head.starts_with(b"<!doctype html") || memmem::find(&head, b"<html").is_some()
}

pub fn reject_markup(artifact: &FetchedArtifact, source: &str) -> Result<(), LoadError> {
    match markup_signal(artifact) {
        Some(reason) => Err(LoadError::WrongArtifact {
            location: source.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compares the digest of `bytes` with `expected`, ignoring case and
/// surrounding whitespace. An empty expectation accepts anything.
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), LoadError> {
    let expected = expected.trim();
    if expected.is_empty() {
        info!("No expected checksum configured; skipping integrity check.");
        return Ok(());
    }
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        info!("Checksum verified ({actual}).");
        Ok(())
    } else {
        Err(LoadError::Integrity {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactLoader, DEFAULT_TIMEOUT};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::NamedTempFile;

    fn payload(content_type: Option<&str>, body: &[u8]) -> FetchedArtifact {
        FetchedArtifact {
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
        }
    }

    #[test]
    fn markup_is_sniffed_from_the_prefix() {
        assert!(looks_like_markup(b"<!DOCTYPE html><html><body>404</body></html>"));
        assert!(looks_like_markup(b"\n  <!doctype HTML>"));
        assert!(looks_like_markup(b"<head></head><HTML lang=en>"));
        assert!(!looks_like_markup(br#"{"kind": "ensemble"}"#));
        assert!(!looks_like_markup(&[0x1f, 0x8b, 0x08, 0x00]));
        assert!(!looks_like_markup(b""));

        // A tag past the sniff window does not count.
        let mut late = vec![b' '; SNIFF_LEN];
        late.extend_from_slice(b"<html>");
        assert!(!looks_like_markup(&late));
    }

    #[test]
    fn html_content_type_is_rejected_even_for_binary_bodies() {
        let artifact = payload(Some("text/html; charset=utf-8"), &[0x1f, 0x8b]);
        let err = reject_markup(&artifact, "https://example.org/model").unwrap_err();
        assert!(matches!(err, LoadError::WrongArtifact { ref reason, .. } if reason.contains("text/html")));

        let artifact = payload(Some("application/octet-stream"), b"<!doctype html>");
        assert!(reject_markup(&artifact, "x").is_err());

        let artifact = payload(Some("application/json"), b"{}");
        assert!(reject_markup(&artifact, "x").is_ok());
    }

    #[test]
    fn checksum_comparison_ignores_case() {
        let digest = sha256_hex(b"model");
        assert_eq!(digest.len(), 64);
        assert!(verify_checksum(b"model", &digest.to_uppercase()).is_ok());
        assert!(verify_checksum(b"model", &format!("  {digest}\n")).is_ok());
        assert!(verify_checksum(b"model", "").is_ok());

        let err = verify_checksum(b"model", "deadbeef").unwrap_err();
        assert!(matches!(err, LoadError::Integrity { ref actual, .. } if *actual == digest));
    }

    #[test]
    fn remote_sources_are_recognised_by_scheme() {
        assert!(is_remote("https://host/model.json"));
        assert!(is_remote("HTTP://host/model.json"));
        assert!(!is_remote("models/model.json"));
        assert!(!is_remote("/tmp/https-model.json"));
    }

    #[test]
    fn local_files_are_read_without_a_content_type() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{}").unwrap();
        let path = file.path().to_str().unwrap();

        let fetched = FileTransport.fetch(path).unwrap();
        assert_eq!(fetched, payload(None, b"{}"));

        let err = FileTransport.fetch("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, LoadError::Transport(_)));
    }

    /// Answers a single request on a loopback port with a canned response and
    /// returns the URL to ask for.
    fn serve_once(status: &'static str, content_type: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(body).unwrap();
        });
        format!("http://127.0.0.1:{port}/model.json")
    }

    fn loopback_transport() -> HttpTransport {
        let client = Client::builder()
            .no_proxy()
            .user_agent(HTTP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        HttpTransport { client }
    }

    #[test]
    fn http_client_builds_with_the_default_timeout() {
        assert!(HttpTransport::new(DEFAULT_TIMEOUT).is_ok());
    }

    #[test]
    fn http_error_status_is_a_transport_failure() {
        let url = serve_once("404 Not Found", "text/plain", b"missing");
        let err = loopback_transport().fetch(&url).unwrap_err();
        assert!(
            matches!(err, LoadError::Transport(ref message) if message.contains("404")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn http_success_keeps_the_declared_content_type() {
        let url = serve_once("200 OK", "application/octet-stream", b"{\"kind\": \"ensemble\"}");
        let fetched = loopback_transport().fetch(&url).unwrap();
        assert_eq!(
            fetched,
            payload(Some("application/octet-stream"), b"{\"kind\": \"ensemble\"}")
        );
    }

    #[test]
    fn html_served_over_http_is_rejected_by_the_loader() {
        let url = serve_once("200 OK", "text/html; charset=utf-8", b"<!DOCTYPE html><html></html>");
        let loader = ArtifactLoader::new(loopback_transport(), "", DEFAULT_TIMEOUT);
        let err = loader.fetch_bytes(&url).unwrap_err();
        assert!(matches!(err, LoadError::WrongArtifact { ref location, .. } if *location == url));
    }
}
