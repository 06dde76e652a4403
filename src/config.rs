//! Reader configuration.

use std::time::Duration;

/// Configuration options shared by the executor and the file readers.
///
/// A [`ReaderConfig`] is handed explicitly to [`IoExecutor::spawn`](crate::executor::IoExecutor::spawn)
/// and [`FileRegistry::new`](crate::registry::FileRegistry::new); there is no process-wide instance.
///
/// ## Request Timeout
/// > default: 60 seconds
///
/// Every request posted to the background executor fails with
/// [`Error::Timeout`](crate::Error::Timeout) if no response arrives within this duration.
///
/// ## Archive Prefix Size
/// > default: `1536` (three tar blocks)
///
/// Number of leading bytes fetched from a reference file system URL to decide whether it is
/// a tar container. The first block holds the ustar header and the next two hold the
/// descriptor of the index member.
///
/// ## Chunk Size
/// > default: `102400`
///
/// Read granularity hint forwarded with every plain-file request to the
/// [`HierarchyBackend`](crate::backend::HierarchyBackend).
///
/// ## Manifest Member
/// > default: `"lindi.json"`
///
/// Name of the tar member holding the reference file system manifest.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    request_timeout: Duration,
    archive_prefix_size: u64,
    chunk_size: u64,
    manifest_member: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            archive_prefix_size: 512 * 3,
            chunk_size: 1024 * 100,
            manifest_member: "lindi.json".to_string(),
        }
    }
}

impl ReaderConfig {
    /// Get the [request timeout](#request-timeout) configuration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Set the [request timeout](#request-timeout) configuration.
    pub fn set_request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Get the [archive prefix size](#archive-prefix-size) configuration.
    #[must_use]
    pub fn archive_prefix_size(&self) -> u64 {
        self.archive_prefix_size
    }

    /// Set the [archive prefix size](#archive-prefix-size) configuration.
    pub fn set_archive_prefix_size(&mut self, archive_prefix_size: u64) -> &mut Self {
        self.archive_prefix_size = archive_prefix_size;
        self
    }

    /// Get the [chunk size](#chunk-size) configuration.
    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Set the [chunk size](#chunk-size) configuration.
    pub fn set_chunk_size(&mut self, chunk_size: u64) -> &mut Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Get the [manifest member](#manifest-member) configuration.
    #[must_use]
    pub fn manifest_member(&self) -> &str {
        &self.manifest_member
    }

    /// Set the [manifest member](#manifest-member) configuration.
    pub fn set_manifest_member(&mut self, manifest_member: impl Into<String>) -> &mut Self {
        self.manifest_member = manifest_member.into();
        self
    }
}
