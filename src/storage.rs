//! zarrs storage over the keys of a reference manifest.
//!
//! Every key resolves through the manifest: inline values are served directly, byte-range and
//! whole-object refs are fetched through the executor, and relative urls are read from the
//! members of the tar archive holding the manifest.

use std::borrow::Cow;

use bytes::Bytes;
use zarrs::storage::{
    AsyncMaybeBytesIterator, AsyncReadableStorageTraits, MaybeBytes, StorageError, StoreKey,
    byte_range::{ByteRange as StoreByteRange, ByteRangeIterator},
};

use crate::{
    byte_range::ByteRange,
    executor::IoExecutor,
    manifest::{RefValue, ReferenceManifest, sanitize_non_finite},
    single_flight::SingleFlight,
    tar::TarIndex,
};

/// The keys of a reference manifest as a read-only zarr store.
///
/// Whole values are fetched once and kept, including the knowledge that a key is absent.
#[derive(Debug)]
pub struct ReferenceStore {
    url: String,
    manifest: ReferenceManifest,
    archive: Option<TarIndex>,
    executor: IoExecutor,
    values: SingleFlight<String, Option<Bytes>>,
}

impl ReferenceStore {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        manifest: ReferenceManifest,
        archive: Option<TarIndex>,
        executor: IoExecutor,
    ) -> Self {
        Self {
            url: url.into(),
            manifest,
            archive,
            executor,
            values: SingleFlight::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn manifest(&self) -> &ReferenceManifest {
        &self.manifest
    }

    /// Whether the manifest was read from a tar archive.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.archive.is_some()
    }

    /// Number of keys read or known to be absent.
    #[must_use]
    pub fn cached_values(&self) -> usize {
        self.values.len()
    }

    /// Fetch `range` of a ref target, resolving templates and archive members.
    async fn fetch_target(&self, url: &str, range: Option<ByteRange>) -> crate::Result<Bytes> {
        let url = self.manifest.resolve_url(url);
        if url.is_empty() {
            return self.executor.fetch_bytes(&self.url, range, None).await;
        }
        if let Some(member) = url.strip_prefix("./") {
            let archive = self.archive.as_ref().ok_or_else(|| {
                crate::Error::NotFound(format!("{url} is relative but {} is not an archive", self.url))
            })?;
            let member = archive.byte_range_for_file(member)?;
            let range = match range {
                Some(range) => member.sub_range(range.start..range.end),
                None => member,
            };
            return self.executor.fetch_bytes(&self.url, Some(range), None).await;
        }
        self.executor.fetch_bytes(&url, range, None).await
    }

    /// `range` of the bytes of `key` (relative to the value's start), uncached.
    ///
    /// Returns `Ok(None)` if the manifest has no such key.
    ///
    /// # Errors
    /// Propagates fetch errors and [`Error::InvalidManifest`](crate::Error::InvalidManifest).
    pub async fn read_range(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> crate::Result<Option<Bytes>> {
        let Some(value) = self.manifest.get(key) else {
            return Ok(None);
        };
        let bytes = match value {
            RefValue::Inline(bytes) => match range {
                Some(range) => {
                    let len = bytes.len() as u64;
                    bytes.slice(range.start.min(len) as usize..range.end.min(len) as usize)
                }
                None => bytes.clone(),
            },
            RefValue::Range {
                url,
                offset,
                length,
            } => {
                let target = ByteRange::from_offset_length(*offset, *length)?;
                let target = match range {
                    Some(range) => target.sub_range(range.start..range.end),
                    None => target,
                };
                self.fetch_target(url, Some(target)).await?
            }
            RefValue::Whole { url } => self.fetch_target(url, range).await?,
        };
        Ok(Some(bytes))
    }

    /// The bytes of `key`, fetched at most once across concurrent and later callers.
    ///
    /// # Errors
    /// Returns the fetch error, wrapped in [`Error::Shared`](crate::Error::Shared).
    pub async fn read(&self, key: &str) -> crate::Result<Option<Bytes>> {
        self.values
            .get_or_fetch(key.to_string(), || self.read_range(key, None))
            .await
    }
}

fn storage_error(error: crate::Error) -> StorageError {
    StorageError::Other(error.to_string())
}

/// Quote bare non-finite numbers in array metadata so it parses as strict JSON.
fn finite_metadata(key: &StoreKey, bytes: Bytes) -> Bytes {
    let is_metadata = matches!(key.as_str().rsplit('/').next(), Some(".zarray" | ".zattrs"));
    if !is_metadata {
        return bytes;
    }
    let sanitized = match sanitize_non_finite(&bytes) {
        Cow::Owned(sanitized) => Some(sanitized),
        Cow::Borrowed(_) => None,
    };
    sanitized.map_or(bytes, Bytes::from)
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl AsyncReadableStorageTraits for ReferenceStore {
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let value = self.read(key.as_str()).await.map_err(storage_error)?;
        Ok(value.map(|bytes| finite_metadata(key, bytes)))
    }

    async fn get_partial(
        &self,
        key: &StoreKey,
        byte_range: StoreByteRange,
    ) -> Result<MaybeBytes, StorageError> {
        if let StoreByteRange::FromStart(offset, Some(length)) = byte_range {
            let range = ByteRange::from_offset_length(offset, length).map_err(storage_error)?;
            return self
                .read_range(key.as_str(), Some(range))
                .await
                .map_err(storage_error);
        }
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        let len = bytes.len() as u64;
        let range = byte_range.to_range(len);
        if range.start > range.end || range.end > len {
            return Err(StorageError::Other(format!(
                "byte range {range:?} is out of bounds for {key} of {len} bytes"
            )));
        }
        Ok(Some(bytes.slice(range.start as usize..range.end as usize)))
    }

    async fn get_partial_many<'a>(
        &'a self,
        _key: &StoreKey,
        _byte_ranges: ByteRangeIterator<'a>,
    ) -> Result<AsyncMaybeBytesIterator<'a>, StorageError> {
        Err(StorageError::Unsupported(
            "get_partial_many not supported".into(),
        ))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        Ok(self.get(key).await?.map(|bytes| bytes.len() as u64))
    }

    fn supports_get_partial(&self) -> bool {
        false
    }
}
