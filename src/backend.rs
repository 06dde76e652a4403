//! Readers of plain hierarchical files.
//!
//! Parsing a plain HDF5-like file from byte ranges is delegated to a [`HierarchyBackend`],
//! which the [`IoExecutor`](crate::executor::IoExecutor) calls off the caller's task.

use std::{collections::HashMap, fmt::Debug, ops::Range, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::{
    data::{ArrayData, NumpyDtype},
    decoder::resolve_selection,
    model::{
        Attributes, DatasetDescriptor, DatasetEntry, GroupNode, SubgroupEntry, absolute_path,
        name_from_path, normalize_path, parent_path,
    },
};

/// Reads the group tree and dataset values of plain remote files.
///
/// `Ok(None)` means the path definitely does not exist or is of the other node kind.
#[async_trait]
pub trait HierarchyBackend: Send + Sync + Debug {
    /// The group at `path` of the file at `url`.
    ///
    /// `chunk_size` is the preferred read granularity in bytes.
    async fn get_group(
        &self,
        url: &str,
        path: &str,
        chunk_size: u64,
    ) -> crate::Result<Option<GroupNode>>;

    /// The dataset at `path` of the file at `url`.
    async fn get_dataset(
        &self,
        url: &str,
        path: &str,
        chunk_size: u64,
    ) -> crate::Result<Option<DatasetDescriptor>>;

    /// The values of the dataset at `path`, restricted to `slice` on the leading dimensions.
    async fn get_dataset_data(
        &self,
        url: &str,
        path: &str,
        slice: Option<&[Range<u64>]>,
    ) -> crate::Result<Option<ArrayData>>;
}

/// A backend operation, as recorded by [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    Group,
    Dataset,
    DatasetData,
}

#[derive(Debug)]
struct StoredDataset {
    descriptor: DatasetDescriptor,
    data: Bytes,
    dtype: NumpyDtype,
}

#[derive(Debug, Default)]
struct MemoryHierarchy {
    groups: HashMap<String, GroupNode>,
    datasets: HashMap<String, StoredDataset>,
}

impl MemoryHierarchy {
    /// Create the group at `path` and its ancestors, linking each into its parent.
    fn ensure_group(&mut self, path: &str) {
        if self.groups.contains_key(path) {
            return;
        }
        self.groups.insert(
            path.to_string(),
            GroupNode {
                path: absolute_path(path),
                subgroups: Vec::new(),
                datasets: Vec::new(),
                attrs: Attributes::new(),
            },
        );
        if let Some(parent) = parent_path(path) {
            self.ensure_group(parent);
            if let Some(parent) = self.groups.get_mut(parent) {
                parent.subgroups.push(SubgroupEntry {
                    name: name_from_path(path).to_string(),
                    path: absolute_path(path),
                    attrs: Attributes::new(),
                });
            }
        }
    }
}

/// An in-process [`HierarchyBackend`] built from explicit groups and datasets.
///
/// Every call is recorded, and calls can be delayed or made to fail, so tests can
/// observe how often the readers reach the backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: RwLock<HashMap<String, MemoryHierarchy>>,
    calls: Mutex<Vec<(BackendOperation, String, String)>>,
    delay: RwLock<Option<Duration>>,
    failure: RwLock<Option<String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group (and any missing ancestors) to the file at `url`.
    pub fn add_group(&self, url: &str, path: &str, attrs: Attributes) -> &Self {
        let path = normalize_path(path);
        let mut files = self.files.write();
        let file = files.entry(url.to_string()).or_default();
        file.ensure_group(path);
        if let Some(group) = file.groups.get_mut(path) {
            group.attrs = attrs.clone();
        }
        if let Some(parent) = parent_path(path).and_then(|p| file.groups.get_mut(p)) {
            for entry in &mut parent.subgroups {
                if entry.path == absolute_path(path) {
                    entry.attrs = attrs.clone();
                }
            }
        }
        self
    }

    /// Add a row-major dataset to the file at `url`.
    ///
    /// # Errors
    /// Returns an error if `data` does not hold exactly the number of elements of `shape`.
    pub fn add_dataset(
        &self,
        url: &str,
        path: &str,
        shape: Vec<u64>,
        attrs: Attributes,
        data: &ArrayData,
    ) -> crate::Result<&Self> {
        let num_elements: u64 = shape.iter().product();
        if data.len() as u64 != num_elements {
            return Err(crate::Error::general(format!(
                "{} elements do not fill shape {shape:?}",
                data.len()
            )));
        }
        let path = normalize_path(path);
        let dtype = NumpyDtype::native(data.data_type());
        let descriptor = DatasetDescriptor {
            name: name_from_path(path).to_string(),
            path: absolute_path(path),
            shape,
            dtype: dtype.to_string(),
            attrs,
        };

        let mut files = self.files.write();
        let file = files.entry(url.to_string()).or_default();
        let parent = parent_path(path).unwrap_or_default();
        file.ensure_group(parent);
        if let Some(group) = file.groups.get_mut(parent) {
            group.datasets.retain(|d| d.path != descriptor.path);
            group.datasets.push(DatasetEntry {
                name: descriptor.name.clone(),
                path: descriptor.path.clone(),
                shape: descriptor.shape.clone(),
                dtype: descriptor.dtype.clone(),
                attrs: descriptor.attrs.clone(),
            });
        }
        file.datasets.insert(
            path.to_string(),
            StoredDataset {
                descriptor,
                data: data.to_ne_bytes().into(),
                dtype,
            },
        );
        Ok(self)
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) -> &Self {
        *self.delay.write() = delay;
        self
    }

    /// Make every call fail with a network error until reset with `None`.
    pub fn set_failure(&self, message: Option<String>) -> &Self {
        *self.failure.write() = message;
        self
    }

    /// Number of calls of `operation` for `path` on any file.
    #[must_use]
    pub fn call_count(&self, operation: BackendOperation, path: &str) -> usize {
        let path = normalize_path(path);
        self.calls
            .lock()
            .iter()
            .filter(|(op, _, p)| *op == operation && p == path)
            .count()
    }

    async fn enter(&self, operation: BackendOperation, url: &str, path: &str) -> crate::Result<()> {
        self.calls
            .lock()
            .push((operation, url.to_string(), normalize_path(path).to_string()));
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.read().clone();
        match failure {
            Some(message) => Err(crate::Error::Network(format!("{url}: {message}"))),
            None => Ok(()),
        }
    }
}

/// Copy `selection` out of a dense row-major array of `shape`.
fn extract_selection(
    src: &[u8],
    shape: &[u64],
    selection: &[Range<u64>],
    element_size: usize,
) -> Vec<u8> {
    let mut out = Vec::new();
    copy_rows(src, shape, selection, element_size, &mut out);
    out
}

fn copy_rows(
    src: &[u8],
    shape: &[u64],
    selection: &[Range<u64>],
    element_size: usize,
    out: &mut Vec<u8>,
) {
    let Some((rows, inner)) = selection.split_first() else {
        out.extend_from_slice(&src[..element_size]);
        return;
    };
    let inner_shape = &shape[1..];
    let row_len = inner_shape.iter().product::<u64>() as usize * element_size;
    let whole_rows = inner
        .iter()
        .zip(inner_shape)
        .all(|(range, &extent)| range.start == 0 && range.end == extent);
    for row in rows.clone() {
        let row = &src[row as usize * row_len..(row as usize + 1) * row_len];
        if whole_rows {
            out.extend_from_slice(row);
        } else {
            copy_rows(row, inner_shape, inner, element_size, out);
        }
    }
}

#[async_trait]
impl HierarchyBackend for MemoryBackend {
    async fn get_group(
        &self,
        url: &str,
        path: &str,
        _chunk_size: u64,
    ) -> crate::Result<Option<GroupNode>> {
        self.enter(BackendOperation::Group, url, path).await?;
        let files = self.files.read();
        let file = files
            .get(url)
            .ok_or_else(|| crate::Error::NotFound(url.to_string()))?;
        Ok(file.groups.get(normalize_path(path)).cloned())
    }

    async fn get_dataset(
        &self,
        url: &str,
        path: &str,
        _chunk_size: u64,
    ) -> crate::Result<Option<DatasetDescriptor>> {
        self.enter(BackendOperation::Dataset, url, path).await?;
        let files = self.files.read();
        let file = files
            .get(url)
            .ok_or_else(|| crate::Error::NotFound(url.to_string()))?;
        Ok(file
            .datasets
            .get(normalize_path(path))
            .map(|d| d.descriptor.clone()))
    }

    async fn get_dataset_data(
        &self,
        url: &str,
        path: &str,
        slice: Option<&[Range<u64>]>,
    ) -> crate::Result<Option<ArrayData>> {
        self.enter(BackendOperation::DatasetData, url, path).await?;
        let files = self.files.read();
        let file = files
            .get(url)
            .ok_or_else(|| crate::Error::NotFound(url.to_string()))?;
        let Some(dataset) = file.datasets.get(normalize_path(path)) else {
            return Ok(None);
        };
        let shape = &dataset.descriptor.shape;
        let element_size = dataset.dtype.data_type.size();
        let selection = resolve_selection(path, shape, slice)?;
        let bytes = extract_selection(&dataset.data, shape, &selection, element_size);
        ArrayData::from_ne_bytes(dataset.dtype.data_type, &bytes).map(Some)
    }
}
