//! Byte range transports.

use std::{collections::HashMap, fmt::Debug, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::byte_range::ByteRange;

/// Fetches whole objects or byte ranges of objects by url.
///
/// Implementations are only ever called from the background [`IoExecutor`](crate::executor::IoExecutor).
#[async_trait]
pub trait ByteRangeFetcher: Send + Sync + Debug {
    /// Fetch the bytes of `url`, or only `range` of them.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the object does not exist and
    /// [`Error::Network`](crate::Error::Network) on transport failures.
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> crate::Result<Bytes>;
}

/// An in-process fetcher serving objects from memory.
///
/// Every request is recorded, and objects can be made slow or failing, which makes
/// this the transport of choice for tests.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    objects: RwLock<HashMap<String, Bytes>>,
    failing: RwLock<HashMap<String, String>>,
    delay: RwLock<Option<Duration>>,
    requests: Mutex<Vec<(String, Option<ByteRange>)>>,
}

impl MemoryFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `url`, replacing any previous object.
    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<Bytes>) -> &Self {
        self.objects.write().insert(url.into(), bytes.into());
        self
    }

    /// Make every request for `url` fail with a network error.
    pub fn set_failing(&self, url: impl Into<String>, message: impl Into<String>) -> &Self {
        self.failing.write().insert(url.into(), message.into());
        self
    }

    /// Stop failing requests for `url`.
    pub fn clear_failing(&self, url: &str) -> &Self {
        self.failing.write().remove(url);
        self
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) -> &Self {
        *self.delay.write() = delay;
        self
    }

    /// All requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(String, Option<ByteRange>)> {
        self.requests.lock().clone()
    }

    /// Number of requests received for `url`.
    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|(u, _)| u == url).count()
    }
}

#[async_trait]
impl ByteRangeFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> crate::Result<Bytes> {
        self.requests.lock().push((url.to_string(), range));
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failing.read().get(url) {
            return Err(crate::Error::Network(format!("{url}: {message}")));
        }
        let object = self
            .objects
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(url.to_string()))?;
        let Some(range) = range else {
            return Ok(object);
        };
        let len = object.len() as u64;
        if range.start > len {
            return Err(crate::Error::general(format!(
                "byte range {range} is outside of {url} ({len} bytes)"
            )));
        }
        let end = range.end.min(len);
        Ok(object.slice(range.start as usize..end as usize))
    }
}

/// Fetches objects over HTTP(S) with `Range` requests.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
#[allow(clippy::needless_pass_by_value)]
fn handle_reqwest_error(err: reqwest::Error) -> crate::Error {
    crate::Error::Network(err.to_string())
}

#[cfg(feature = "http")]
impl HttpFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client, e.g. with custom timeouts or proxies.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl ByteRangeFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> crate::Result<Bytes> {
        use reqwest::{StatusCode, header::RANGE};

        let mut request = self.client.get(url);
        if let Some(range) = range {
            let Some(header) = range.to_http_header() else {
                return Ok(Bytes::new());
            };
            request = request.header(RANGE, header);
        }
        let response = request.send().await.map_err(handle_reqwest_error)?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => response.bytes().await.map_err(handle_reqwest_error),
            StatusCode::OK => {
                let bytes = response.bytes().await.map_err(handle_reqwest_error)?;
                // the server ignored the range and sent the whole object
                Ok(match range {
                    Some(range) => {
                        let len = bytes.len() as u64;
                        bytes.slice(range.start.min(len) as usize..range.end.min(len) as usize)
                    }
                    None => bytes,
                })
            }
            StatusCode::NOT_FOUND => Err(crate::Error::NotFound(url.to_string())),
            status => Err(crate::Error::Network(format!(
                "the http server responded with status {status} for {url}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetcher_ranges() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("mem://a", &b"0123456789"[..]);
        let all = fetcher.fetch("mem://a", None).await.unwrap();
        assert_eq!(&all[..], b"0123456789");
        let part = fetcher
            .fetch("mem://a", Some(ByteRange::new(2, 5)))
            .await
            .unwrap();
        assert_eq!(&part[..], b"234");
        let tail = fetcher
            .fetch("mem://a", Some(ByteRange::new(8, 20)))
            .await
            .unwrap();
        assert_eq!(&tail[..], b"89");
        assert_eq!(fetcher.request_count("mem://a"), 3);
    }

    #[tokio::test]
    async fn memory_fetcher_errors() {
        let fetcher = MemoryFetcher::new();
        let missing = fetcher.fetch("mem://missing", None).await.unwrap_err();
        assert!(missing.is_not_found());
        fetcher.insert("mem://a", &b"x"[..]);
        fetcher.set_failing("mem://a", "connection reset");
        assert!(fetcher.fetch("mem://a", None).await.unwrap_err().is_transient());
        fetcher.clear_failing("mem://a");
        assert!(fetcher.fetch("mem://a", None).await.is_ok());
    }
}
