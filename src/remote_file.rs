//! Plain remote hierarchical files.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    config::ReaderConfig,
    data::DatasetValue,
    executor::IoExecutor,
    hierarchy::HierarchicalFile,
    model::{DataRequest, DatasetDescriptor, GroupNode, absolute_path, normalize_path},
    single_flight::SingleFlight,
};

/// Resolve a metadata lookup into a cacheable answer.
///
/// Transient failures stay errors so that they are not cached. Any other failure is
/// remembered as absence.
fn definite<T>(url: &str, path: &str, result: crate::Result<Option<T>>) -> crate::Result<Option<T>> {
    match result {
        Err(e) if !e.is_transient() => {
            log::warn!("treating {path} of {url} as absent: {e}");
            Ok(None)
        }
        result => result,
    }
}

/// A plain remote file read through the [`IoExecutor`].
///
/// Groups and datasets are fetched once per path, however many callers ask concurrently.
#[derive(Debug)]
pub struct RemoteFile {
    url: String,
    executor: IoExecutor,
    chunk_size: u64,
    groups: SingleFlight<String, Option<GroupNode>>,
    datasets: SingleFlight<String, Option<DatasetDescriptor>>,
}

impl RemoteFile {
    #[must_use]
    pub fn new(url: impl Into<String>, executor: IoExecutor, config: &ReaderConfig) -> Self {
        Self {
            url: url.into(),
            executor,
            chunk_size: config.chunk_size(),
            groups: SingleFlight::new(),
            datasets: SingleFlight::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HierarchicalFile for RemoteFile {
    async fn get_group(&self, path: &str) -> Option<GroupNode> {
        let path = absolute_path(normalize_path(path));
        let result = self
            .groups
            .get_or_fetch(path.clone(), || async {
                let group = self
                    .executor
                    .get_group(&self.url, &path, self.chunk_size, None)
                    .await;
                definite(&self.url, &path, group)
            })
            .await;
        result.unwrap_or_else(|e| {
            log::warn!("group {path} of {} is unavailable: {e}", self.url);
            None
        })
    }

    async fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        let path = absolute_path(normalize_path(path));
        let result = self
            .datasets
            .get_or_fetch(path.clone(), || async {
                let dataset = self
                    .executor
                    .get_dataset(&self.url, &path, self.chunk_size, None)
                    .await;
                definite(&self.url, &path, dataset)
            })
            .await;
        result.unwrap_or_else(|e| {
            log::warn!("dataset {path} of {} is unavailable: {e}", self.url);
            None
        })
    }

    async fn get_dataset_data(
        &self,
        path: &str,
        request: &DataRequest,
    ) -> crate::Result<Option<DatasetValue>> {
        let path = absolute_path(normalize_path(path));
        let slice = request.slice_ranges(&path)?;
        if request.is_canceled() {
            return Err(crate::Error::Canceled);
        }
        let Some(dataset) = self.get_dataset(&path).await else {
            return Ok(None);
        };
        let data = self
            .executor
            .get_dataset_data(&self.url, &path, slice, request.canceler.as_ref())
            .await?;
        Ok(data.map(|data| {
            let is_scalar = dataset.is_scalar() && dataset.num_elements() == 1;
            DatasetValue::from_array(data, is_scalar).with_big_int_policy(request.allow_big_int)
        }))
    }

    fn urls(&self) -> Vec<String> {
        vec![self.url.clone()]
    }
}

/// The [`RemoteFile`]s opened so far, one per url.
#[derive(Debug)]
pub struct RemoteFiles {
    executor: IoExecutor,
    config: ReaderConfig,
    files: Mutex<HashMap<String, Arc<RemoteFile>>>,
}

impl RemoteFiles {
    #[must_use]
    pub fn new(executor: IoExecutor, config: ReaderConfig) -> Self {
        Self {
            executor,
            config,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The file at `url`, created on first use.
    ///
    /// # Errors
    /// Returns [`Error::Unsupported`](crate::Error::Unsupported) if the executor has no
    /// backend to read plain files with.
    pub fn open(&self, url: &str) -> crate::Result<Arc<RemoteFile>> {
        if !self.executor.has_backend() {
            return Err(crate::Error::Unsupported(format!(
                "cannot open plain file {url}: no hierarchy backend is configured"
            )));
        }
        Ok(self
            .files
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(RemoteFile::new(url, self.executor.clone(), &self.config)))
            .clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
