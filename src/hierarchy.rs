use std::fmt::Debug;

use async_trait::async_trait;

use crate::{
    data::DatasetValue,
    model::{DataRequest, DatasetDescriptor, GroupNode},
};

/// Read access to a tree of groups and datasets.
///
/// Paths are `/`-separated; a leading slash is optional and the root is `/`.
#[async_trait]
pub trait HierarchicalFile: Send + Sync + Debug {
    /// The group at `path`.
    ///
    /// Failures to read metadata are logged and reported as `None`, like a missing group.
    async fn get_group(&self, path: &str) -> Option<GroupNode>;

    /// The dataset at `path`, with the same failure handling as [`HierarchicalFile::get_group`].
    async fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor>;

    /// The values of the dataset at `path`, or `None` if there is no such dataset.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`](crate::Error::InvalidSlice) or
    /// [`Error::UnsupportedSlice`](crate::Error::UnsupportedSlice) for bad slices before any
    /// request is made, [`Error::Canceled`](crate::Error::Canceled) if the request's canceler
    /// has fired, and errors fetching or decoding the values.
    async fn get_dataset_data(
        &self,
        path: &str,
        request: &DataRequest,
    ) -> crate::Result<Option<DatasetValue>>;

    /// The urls of every object backing this file.
    fn urls(&self) -> Vec<String>;
}
