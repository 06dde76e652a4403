mod common;

use std::sync::Arc;

use common::{attrs, fixture, le_bytes_i32, manifest, zarray};
use lindi_remote::{ArrayData, DataRequest, HierarchicalFile, StorageKind};
use serde_json::{Value, json};

const H5_URL: &str = "https://example.org/base.nwb";
const PATCH_URL: &str = "https://example.org/patch.lindi.json";
const BLOB_URL: &str = "https://example.org/patch.bin";

/// A plain base file and a LINDI patch that overrides its title and adds `/extra`.
fn layered() -> common::Fixture {
    let f = fixture();
    f.backend
        .add_group(H5_URL, "/", attrs(json!({"title": "base", "session": 3})))
        .add_dataset(
            H5_URL,
            "/data",
            vec![3],
            attrs(json!({})),
            &ArrayData::Int32(vec![1, 2, 3]),
        )
        .unwrap();
    f.fetcher.insert(BLOB_URL, le_bytes_i32(&[7, 8]));
    f.fetcher.insert(
        PATCH_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            ".zattrs": "{\"title\": \"patched\"}",
            "extra/.zarray": zarray(&[2], &[2], "<i4", Value::Null),
            "extra/0": [BLOB_URL, 0, 8],
        })),
    );
    f
}

#[tokio::test]
async fn earlier_files_take_precedence() {
    let f = layered();
    let merged = f
        .registry
        .open_merged(&[(PATCH_URL, StorageKind::Lindi), (H5_URL, StorageKind::Hdf5)])
        .await
        .unwrap();
    assert_eq!(merged.urls(), vec![PATCH_URL.to_string(), H5_URL.to_string()]);

    let root = merged.get_group("/").await.unwrap();
    assert_eq!(root.attrs, attrs(json!({"title": "patched", "session": 3})));
    let mut names: Vec<_> = root.datasets.iter().map(|d| d.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["data", "extra"]);

    let data = merged
        .get_dataset_data("/data", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data.into_array().unwrap(), ArrayData::Int32(vec![1, 2, 3]));
    let extra = merged
        .get_dataset_data("/extra", &DataRequest::new().with_slice(vec![1..2]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(extra.into_array().unwrap(), ArrayData::Int32(vec![8]));

    assert!(merged.get_dataset("/extra").await.is_some());
    assert!(merged.get_dataset("/missing").await.is_none());
    assert!(
        merged
            .get_dataset_data("/missing", &DataRequest::new())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn merged_files_are_memoized() {
    let f = layered();
    let sources = [(PATCH_URL, StorageKind::Lindi), (H5_URL, StorageKind::Hdf5)];
    let a = f.registry.open_merged(&sources).await.unwrap();
    let b = f.registry.open_merged(&sources).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let reversed = f
        .registry
        .open_merged(&[(H5_URL, StorageKind::Hdf5), (PATCH_URL, StorageKind::Lindi)])
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &reversed));
    let root = reversed.get_group("/").await.unwrap();
    assert_eq!(root.attrs["title"], json!("base"));
}

#[tokio::test]
async fn single_source_is_not_wrapped() {
    let f = layered();
    let file = f
        .registry
        .open_merged(&[(H5_URL, StorageKind::Hdf5)])
        .await
        .unwrap();
    assert_eq!(file.urls(), vec![H5_URL.to_string()]);
    let direct: Arc<dyn HierarchicalFile> = f.registry.open(H5_URL).unwrap();
    assert!(Arc::ptr_eq(&file, &direct));
}

#[tokio::test]
async fn bad_sources() {
    let f = layered();
    assert!(f.registry.open_merged(&[]).await.is_err());

    let err = f
        .registry
        .open_merged(&[
            ("https://example.org/gone.lindi.json", StorageKind::Lindi),
            (H5_URL, StorageKind::Hdf5),
        ])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn shared_dataset_comes_from_the_first_file() {
    let f = layered();
    let shadow = "https://example.org/shadow.lindi.json";
    f.fetcher.insert(
        shadow,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "data/.zarray": zarray(&[2], &[2], "<i4", Value::Null),
            "data/0": [BLOB_URL, 0, 8],
        })),
    );
    let merged = f
        .registry
        .open_merged(&[(shadow, StorageKind::Lindi), (H5_URL, StorageKind::Hdf5)])
        .await
        .unwrap();

    let data = merged.get_dataset("/data").await.unwrap();
    assert_eq!(data.shape, vec![2]);
    let root = merged.get_group("/").await.unwrap();
    assert_eq!(root.datasets.len(), 1);
    assert_eq!(root.datasets[0].shape, vec![2]);
    let values = merged
        .get_dataset_data("/data", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(values.into_array().unwrap(), ArrayData::Int32(vec![7, 8]));
}
