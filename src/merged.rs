//! Overlay of several hierarchies.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    data::DatasetValue,
    hierarchy::HierarchicalFile,
    model::{DataRequest, DatasetDescriptor, GroupNode},
};

/// Several files read as one, earlier files taking precedence.
///
/// Groups are merged: subgroups and datasets are the union by name over all files,
/// attributes are the union by key with the first file's value winning, and a dataset
/// listed by several files is taken whole from the first. Datasets and their data are
/// read from the first file that has them, so a sparse patch file can be placed in
/// front of a base file.
#[derive(Debug, Clone)]
pub struct MergedFile {
    files: Vec<Arc<dyn HierarchicalFile>>,
}

impl MergedFile {
    #[must_use]
    pub fn new(files: Vec<Arc<dyn HierarchicalFile>>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[Arc<dyn HierarchicalFile>] {
        &self.files
    }
}

/// Merge `other` into `group`, keeping what `group` already has.
fn merge_group(group: &mut GroupNode, other: GroupNode) {
    for (key, value) in other.attrs {
        group.attrs.entry(key).or_insert(value);
    }
    for subgroup in other.subgroups {
        match group.subgroups.iter_mut().find(|s| s.name == subgroup.name) {
            Some(existing) => {
                for (key, value) in subgroup.attrs {
                    existing.attrs.entry(key).or_insert(value);
                }
            }
            None => group.subgroups.push(subgroup),
        }
    }
    for dataset in other.datasets {
        if !group.datasets.iter().any(|d| d.name == dataset.name) {
            group.datasets.push(dataset);
        }
    }
}

#[async_trait]
impl HierarchicalFile for MergedFile {
    async fn get_group(&self, path: &str) -> Option<GroupNode> {
        let mut merged: Option<GroupNode> = None;
        for file in &self.files {
            let Some(group) = file.get_group(path).await else {
                continue;
            };
            match &mut merged {
                Some(merged) => merge_group(merged, group),
                None => merged = Some(group),
            }
        }
        merged
    }

    async fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        for file in &self.files {
            if let Some(dataset) = file.get_dataset(path).await {
                return Some(dataset);
            }
        }
        None
    }

    async fn get_dataset_data(
        &self,
        path: &str,
        request: &DataRequest,
    ) -> crate::Result<Option<DatasetValue>> {
        for file in &self.files {
            if request.is_canceled() {
                return Err(crate::Error::Canceled);
            }
            if let Some(value) = file.get_dataset_data(path, request).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn urls(&self) -> Vec<String> {
        self.files.iter().flat_map(|f| f.urls()).collect()
    }
}
