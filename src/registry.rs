//! Per-url memoization of opened files.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use parking_lot::Mutex;

use crate::{
    config::ReaderConfig,
    executor::IoExecutor,
    hierarchy::HierarchicalFile,
    merged::MergedFile,
    reference_fs::ReferenceFileSystem,
    remote_file::{RemoteFile, RemoteFiles},
    single_flight::SingleFlight,
};

/// How the object at a url is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// A plain hierarchical file read through the executor's backend.
    Hdf5,
    /// A LINDI reference file system, plain JSON or in a tar archive.
    Lindi,
}

impl FromStr for StorageKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h5" | "hdf5" | "zarr" => Ok(Self::Hdf5),
            "lindi" => Ok(Self::Lindi),
            _ => Err(crate::Error::general(format!("unknown storage kind {s:?}"))),
        }
    }
}

/// Opens files by url, returning the same instance (and so the same caches) for the same url.
///
/// Registries are independent of each other, so tests can each use their own.
#[derive(Debug)]
pub struct FileRegistry {
    executor: IoExecutor,
    config: ReaderConfig,
    remote_files: Arc<RemoteFiles>,
    reference_file_systems: SingleFlight<String, Arc<ReferenceFileSystem>>,
    merged: Mutex<HashMap<Vec<(String, StorageKind)>, Arc<MergedFile>>>,
}

impl FileRegistry {
    #[must_use]
    pub fn new(executor: IoExecutor, config: ReaderConfig) -> Self {
        let remote_files = Arc::new(RemoteFiles::new(executor.clone(), config.clone()));
        Self {
            executor,
            config,
            remote_files,
            reference_file_systems: SingleFlight::new(),
            merged: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn executor(&self) -> &IoExecutor {
        &self.executor
    }

    /// The plain remote file at `url`.
    ///
    /// # Errors
    /// See [`RemoteFiles::open`].
    pub fn open(&self, url: &str) -> crate::Result<Arc<RemoteFile>> {
        self.remote_files.open(url)
    }

    /// The reference file system at `url`.
    ///
    /// Concurrent calls for the same url share a single construction.
    ///
    /// # Errors
    /// Returns the construction error, see [`ReferenceFileSystem::create`]. Transient errors
    /// are not remembered.
    pub async fn open_reference_fs(&self, url: &str) -> crate::Result<Arc<ReferenceFileSystem>> {
        self.reference_file_systems
            .get_or_fetch(url.to_string(), || async {
                let file_system = ReferenceFileSystem::create(
                    url,
                    self.executor.clone(),
                    self.remote_files.clone(),
                    &self.config,
                )
                .await?;
                Ok(Arc::new(file_system))
            })
            .await
    }

    /// Open `url` as `kind`.
    ///
    /// # Errors
    /// See [`FileRegistry::open`] and [`FileRegistry::open_reference_fs`].
    pub async fn open_kind(
        &self,
        url: &str,
        kind: StorageKind,
    ) -> crate::Result<Arc<dyn HierarchicalFile>> {
        let file: Arc<dyn HierarchicalFile> = match kind {
            StorageKind::Hdf5 => self.open(url)?,
            StorageKind::Lindi => self.open_reference_fs(url).await?,
        };
        Ok(file)
    }

    /// One file merging `sources` in order, see [`MergedFile`].
    ///
    /// A single source is returned as is.
    ///
    /// # Errors
    /// Returns an error if `sources` is empty or a source cannot be opened.
    pub async fn open_merged(
        &self,
        sources: &[(&str, StorageKind)],
    ) -> crate::Result<Arc<dyn HierarchicalFile>> {
        match sources {
            [] => Err(crate::Error::general("at least one url is required")),
            [(url, kind)] => self.open_kind(url, *kind).await,
            sources => {
                let key: Vec<(String, StorageKind)> = sources
                    .iter()
                    .map(|(url, kind)| ((*url).to_string(), *kind))
                    .collect();
                if let Some(merged) = self.merged.lock().get(&key) {
                    return Ok(merged.clone());
                }
                let files = futures::future::try_join_all(
                    sources.iter().map(|(url, kind)| self.open_kind(url, *kind)),
                )
                .await?;
                let merged = self
                    .merged
                    .lock()
                    .entry(key)
                    .or_insert_with(|| Arc::new(MergedFile::new(files)))
                    .clone();
                Ok(merged)
            }
        }
    }
}
