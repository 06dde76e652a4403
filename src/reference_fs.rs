//! LINDI reference file systems.
//!
//! A reference file system is a zarr v2 hierarchy whose keys are listed in a JSON
//! manifest. The manifest is either the object at the url itself or the `lindi.json`
//! member of a tar archive at the url.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    byte_range::ByteRange,
    config::ReaderConfig,
    data::DatasetValue,
    decoder::ChunkedArrayDecoder,
    executor::IoExecutor,
    hierarchy::HierarchicalFile,
    manifest::{
        NodeIndex, NodeKind, ReferenceManifest, external_hdf5_key, parse_json_lenient, zarray_key,
        zattrs_key,
    },
    metadata::{ExternalLink, ZarrArrayMetadata},
    model::{
        Attributes, DataRequest, DatasetDescriptor, DatasetEntry, GroupNode, SubgroupEntry,
        absolute_path, is_scalar_flagged, name_from_path, normalize_path,
    },
    remote_file::RemoteFiles,
    single_flight::SingleFlight,
    storage::ReferenceStore,
    tar::{self, ArchiveKind, TarIndex},
};

/// A child of a group, as listed in the group's node.
enum ChildEntry {
    Group(SubgroupEntry),
    Dataset(DatasetEntry),
}

/// A virtual zarr hierarchy described by a reference manifest.
#[derive(Debug)]
pub struct ReferenceFileSystem {
    store: Arc<ReferenceStore>,
    index: NodeIndex,
    remote_files: Arc<RemoteFiles>,
    decoder: ChunkedArrayDecoder,
    metadata: SingleFlight<String, Option<Arc<Value>>>,
}

impl ReferenceFileSystem {
    /// Fetch and index the manifest at `url`.
    ///
    /// Datasets redirected to plain files are read through `remote_files`.
    ///
    /// # Errors
    /// Returns [`Error::CorruptArchive`](crate::Error::CorruptArchive) if the object looks like
    /// an archive but is not one, [`Error::NotFound`](crate::Error::NotFound) if an archive has
    /// no manifest member, [`Error::InvalidManifest`](crate::Error::InvalidManifest) if the
    /// manifest does not parse, and fetch errors.
    pub async fn create(
        url: &str,
        executor: IoExecutor,
        remote_files: Arc<RemoteFiles>,
        config: &ReaderConfig,
    ) -> crate::Result<Self> {
        let prefix_size = config.archive_prefix_size();
        let prefix = executor
            .fetch_bytes(url, Some(ByteRange::new(0, prefix_size)), None)
            .await?;
        let (document, archive) = match tar::detect_archive(url, &prefix)? {
            ArchiveKind::Tar => {
                let archive = TarIndex::load(url, &prefix, &executor).await?;
                let member = archive.byte_range_for_file(config.manifest_member())?;
                let document = executor.fetch_bytes(url, Some(member), None).await?;
                (document, Some(archive))
            }
            // a short prefix is the whole object
            ArchiveKind::Plain if (prefix.len() as u64) < prefix_size => (prefix, None),
            ArchiveKind::Plain => (executor.fetch_bytes(url, None, None).await?, None),
        };

        let manifest = ReferenceManifest::from_slice(&document)?;
        let index = NodeIndex::build(manifest.refs.keys().map(String::as_str));
        log::info!(
            "opened reference file system {url}: {} refs, {} nodes{}",
            manifest.refs.len(),
            index.len(),
            if archive.is_some() { ", in a tar archive" } else { "" }
        );
        let store = Arc::new(ReferenceStore::new(url, manifest, archive, executor));
        Ok(Self {
            decoder: ChunkedArrayDecoder::new(store.clone()),
            store,
            index,
            remote_files,
            metadata: SingleFlight::new(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        self.store.url()
    }

    #[must_use]
    pub fn manifest(&self) -> &ReferenceManifest {
        self.store.manifest()
    }

    /// Whether the manifest was read from a tar archive.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.store.is_archive()
    }

    /// The manifest's keys as a zarrs store.
    #[must_use]
    pub fn store(&self) -> &Arc<ReferenceStore> {
        &self.store
    }

    /// The parsed JSON document at `key`, cached.
    async fn metadata_json(&self, key: String) -> crate::Result<Option<Arc<Value>>> {
        self.metadata
            .get_or_fetch(key.clone(), || async {
                match self.store.read(&key).await? {
                    Some(bytes) => Ok(Some(Arc::new(parse_json_lenient(&bytes)?))),
                    None => Ok(None),
                }
            })
            .await
    }

    /// The attributes of the node at `node` (normalized path); empty if absent or unreadable.
    async fn attrs(&self, node: &str) -> Attributes {
        match self.metadata_json(zattrs_key(node)).await {
            Ok(Some(value)) => match value.as_ref() {
                Value::Object(attrs) => attrs.clone(),
                other => {
                    log::warn!("ignoring non-object attributes of /{node}: {other}");
                    Attributes::new()
                }
            },
            Ok(None) => Attributes::new(),
            Err(e) => {
                log::warn!("attributes of /{node} in {} are unavailable: {e}", self.url());
                Attributes::new()
            }
        }
    }

    async fn zarray(&self, node: &str) -> Option<ZarrArrayMetadata> {
        let value = match self.metadata_json(zarray_key(node)).await {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("array metadata of /{node} in {} is unavailable: {e}", self.url());
                return None;
            }
        };
        match serde_json::from_value(value.as_ref().clone()) {
            Ok(zarray) => Some(zarray),
            Err(e) => {
                log::warn!("invalid array metadata of /{node} in {}: {e}", self.url());
                None
            }
        }
    }

    async fn external_hdf5(&self, node: &str) -> Option<ExternalLink> {
        let value = match self.metadata_json(external_hdf5_key(node)).await {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("redirect of /{node} in {} is unavailable: {e}", self.url());
                return None;
            }
        };
        match serde_json::from_value(value.as_ref().clone()) {
            Ok(link) => Some(link),
            Err(e) => {
                log::warn!("ignoring malformed .external_hdf5 of /{node}: {e}");
                None
            }
        }
    }

    async fn read_external(
        &self,
        link: &ExternalLink,
        request: &DataRequest,
    ) -> crate::Result<Option<DatasetValue>> {
        log::debug!("reading {} from {}", link.name, link.url);
        self.remote_files
            .open(&link.url)?
            .get_dataset_data(&link.name, request)
            .await
    }

    /// The listing entry of `child`; `None` for arrays with unreadable metadata.
    async fn child_entry(&self, child: &str) -> Option<ChildEntry> {
        match self.index.kind(child)? {
            NodeKind::Group => Some(ChildEntry::Group(SubgroupEntry {
                name: name_from_path(child).to_string(),
                path: absolute_path(child),
                attrs: self.attrs(child).await,
            })),
            NodeKind::Array => {
                let (zarray, attrs) = tokio::join!(self.zarray(child), self.attrs(child));
                Some(ChildEntry::Dataset(zarray?.entry(&absolute_path(child), attrs)))
            }
        }
    }
}

#[async_trait]
impl HierarchicalFile for ReferenceFileSystem {
    async fn get_group(&self, path: &str) -> Option<GroupNode> {
        let node = normalize_path(path);
        if self.index.kind(node) != Some(NodeKind::Group) {
            return None;
        }
        let children = self.index.children(node);
        let (entries, attrs) = tokio::join!(
            futures::future::join_all(children.iter().map(|child| self.child_entry(child))),
            self.attrs(node)
        );
        let mut subgroups = Vec::new();
        let mut datasets = Vec::new();
        for entry in entries.into_iter().flatten() {
            match entry {
                ChildEntry::Group(group) => subgroups.push(group),
                ChildEntry::Dataset(dataset) => datasets.push(dataset),
            }
        }
        Some(GroupNode {
            path: absolute_path(node),
            subgroups,
            datasets,
            attrs,
        })
    }

    async fn get_dataset(&self, path: &str) -> Option<DatasetDescriptor> {
        let node = normalize_path(path);
        if self.index.kind(node) != Some(NodeKind::Array) {
            return None;
        }
        let zarray = self.zarray(node).await?;
        Some(zarray.describe(&absolute_path(node), self.attrs(node).await))
    }

    async fn get_dataset_data(
        &self,
        path: &str,
        request: &DataRequest,
    ) -> crate::Result<Option<DatasetValue>> {
        let node = normalize_path(path);
        let slice = request.slice_ranges(&absolute_path(node))?;
        if request.is_canceled() {
            return Err(crate::Error::Canceled);
        }
        if let Some(link) = self.external_hdf5(node).await {
            return self.read_external(&link, request).await;
        }
        if self.index.kind(node) != Some(NodeKind::Array) {
            return Ok(None);
        }
        let attrs = self.attrs(node).await;
        if let Some(link) = ExternalLink::from_attributes(&attrs) {
            return self.read_external(&link, request).await;
        }
        let Some(zarray) = self.zarray(node).await else {
            return Ok(None);
        };
        let data = self
            .decoder
            .decode(
                node,
                &zarray,
                slice.as_deref(),
                request.canceler.as_ref(),
            )
            .await?;
        let is_scalar = is_scalar_flagged(&attrs) && zarray.num_elements() == 1;
        Ok(Some(
            DatasetValue::from_array(data, is_scalar).with_big_int_policy(request.allow_big_int),
        ))
    }

    fn urls(&self) -> Vec<String> {
        vec![self.url().to_string()]
    }
}
