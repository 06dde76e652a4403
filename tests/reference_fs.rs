mod common;

use std::{collections::HashSet, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::{
    attrs, fixture, fixture_without_backend, gzip, le_bytes_f64, le_bytes_i32, lindi_tar,
    manifest, zarray,
};
use lindi_remote::{
    ArrayData, DataRequest, DatasetValue, Error, HierarchicalFile, Scalar, StorageKind,
    backend::BackendOperation,
};
use serde_json::{Value, json};

const LINDI_URL: &str = "https://example.org/file.lindi.json";
const BLOB_URL: &str = "https://example.org/blob.bin";
const H5_URL: &str = "https://example.org/file.nwb";

fn base64_ref(bytes: &[u8]) -> Value {
    Value::String(format!("base64:{}", STANDARD.encode(bytes)))
}

/// `/grp/data` is six doubles in two gzipped chunks stored in the blob.
fn gzipped_fixture() -> common::Fixture {
    let f = fixture();
    let chunk0 = gzip(&le_bytes_f64(&[0.0, 1.0, 2.0]));
    let chunk1 = gzip(&le_bytes_f64(&[3.0, 4.0, 5.0]));
    let mut blob = chunk0.clone();
    blob.extend_from_slice(&chunk1);
    f.fetcher.insert(BLOB_URL, blob);
    f.fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            ".zattrs": "{\"title\": \"session\"}",
            "grp/.zgroup": "{\"zarr_format\": 2}",
            "grp/.zattrs": "{\"neurodata_type\": \"TimeSeries\"}",
            "grp/data/.zarray": zarray(&[6], &[3], "<f8", json!({"id": "gzip", "level": 5})),
            "grp/data/.zattrs": "{\"unit\": \"volts\"}",
            "grp/data/0": [BLOB_URL, 0, chunk0.len()],
            "grp/data/1": [BLOB_URL, chunk0.len(), chunk1.len()],
        })),
    );
    f
}

#[tokio::test]
async fn group_tree() {
    let f = gzipped_fixture();
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    assert!(!file.is_archive());

    let root = file.get_group("/").await.unwrap();
    assert_eq!(root.path, "/");
    assert_eq!(root.attrs, attrs(json!({"title": "session"})));
    assert_eq!(root.subgroups.len(), 1);
    assert_eq!(root.subgroups[0].name, "grp");
    assert_eq!(root.subgroups[0].path, "/grp");
    assert_eq!(
        root.subgroups[0].attrs,
        attrs(json!({"neurodata_type": "TimeSeries"}))
    );

    let group = file.get_group("grp").await.unwrap();
    assert_eq!(group.path, "/grp");
    assert_eq!(group.datasets.len(), 1);
    assert_eq!(group.datasets[0].path, "/grp/data");
    assert_eq!(group.datasets[0].shape, vec![6]);
    assert_eq!(group.datasets[0].dtype, "<f8");

    let dataset = file.get_dataset("/grp/data").await.unwrap();
    assert_eq!(dataset.name, "data");
    assert_eq!(dataset.attrs, attrs(json!({"unit": "volts"})));

    assert!(file.get_group("/grp/data").await.is_none());
    assert!(file.get_dataset("/grp").await.is_none());
    assert!(file.get_group("/missing").await.is_none());
}

#[tokio::test]
async fn gzipped_chunks() {
    let f = gzipped_fixture();
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();

    let all = file
        .get_dataset_data("/grp/data", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        all,
        DatasetValue::Array(ArrayData::Float64(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]))
    );

    let requests = f.fetcher.request_count(BLOB_URL);
    let slice = file
        .get_dataset_data("/grp/data", &DataRequest::new().with_slice(vec![2..5]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        slice.into_array().unwrap(),
        ArrayData::Float64(vec![2.0, 3.0, 4.0])
    );
    // fetched chunks are reused
    assert_eq!(f.fetcher.request_count(BLOB_URL), requests);
}

#[tokio::test]
async fn missing_dataset_is_none() {
    let f = gzipped_fixture();
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    let value = file
        .get_dataset_data("/grp/nothing", &DataRequest::new())
        .await
        .unwrap();
    assert!(value.is_none());
}

#[tokio::test]
async fn too_many_sliced_dimensions() {
    let f = gzipped_fixture();
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    let requests = f.fetcher.requests().len();
    let request = DataRequest::new().with_slice(vec![0..1, 0..1, 0..1, 0..1]);
    let err = file.get_dataset_data("/grp/data", &request).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedSlice { ndim: 4, max: 3, .. }));
    assert_eq!(f.fetcher.requests().len(), requests);
}

#[tokio::test]
async fn scalars_and_big_ints() {
    let f = fixture();
    let big: Vec<u8> = [7i64, 1 << 40].iter().flat_map(|v| v.to_le_bytes()).collect();
    f.fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "rate/.zarray": zarray(&[1], &[1], "<i4", Value::Null),
            "rate/.zattrs": "{\"_SCALAR\": true}",
            "rate/0": base64_ref(&le_bytes_i32(&[42])),
            "ids/.zarray": zarray(&[2], &[2], "<i8", Value::Null),
            "ids/0": base64_ref(&big),
        })),
    );
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();

    let rate = file
        .get_dataset_data("/rate", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rate.as_scalar(), Some(Scalar::Int32(42)));

    let narrowed = file
        .get_dataset_data("/ids", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(narrowed.into_array().unwrap(), ArrayData::Int32(vec![7, 0]));

    let wide = file
        .get_dataset_data("/ids", &DataRequest::new().with_allow_big_int(true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wide.into_array().unwrap(), ArrayData::Int64(vec![7, 1 << 40]));
}

#[tokio::test]
async fn missing_chunks_use_fill_value() {
    let f = fixture();
    f.fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "sparse/.zarray": zarray(&[4], &[2], "<i4", Value::Null),
            "sparse/0": base64_ref(&le_bytes_i32(&[5, 6])),
        })),
    );
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    let value = file
        .get_dataset_data("/sparse", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.into_array().unwrap(), ArrayData::Int32(vec![5, 6, 0, 0]));
}

#[tokio::test]
async fn templated_urls() {
    let f = fixture();
    f.fetcher.insert(BLOB_URL, le_bytes_i32(&[9, 1, 2, 3]));
    let document = serde_json::to_vec(&json!({
        "version": 1,
        "templates": {"u": BLOB_URL},
        "refs": {
            ".zgroup": "{\"zarr_format\": 2}",
            "x/.zarray": zarray(&[3], &[3], "<i4", Value::Null),
            "x/0": ["{{u}}", 4, 12],
        },
    }))
    .unwrap();
    f.fetcher.insert(LINDI_URL, document);
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    let value = file
        .get_dataset_data("/x", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.into_array().unwrap(), ArrayData::Int32(vec![1, 2, 3]));
    assert_eq!(f.fetcher.request_count(BLOB_URL), 1);
}

#[tokio::test]
async fn tar_archive_members() {
    let f = fixture();
    let chunk = gzip(&le_bytes_f64(&[1.5, 2.5]));
    let document = manifest(json!({
        ".zgroup": "{\"zarr_format\": 2}",
        "a/.zarray": zarray(&[2], &[2], "<f8", json!({"id": "gzip", "level": 1})),
        "a/0": ["./blobs/a0"],
        "b/.zarray": zarray(&[2], &[2], "<i4", Value::Null),
        "b/0": ["./blobs/b0", 4, 8],
    }));
    let b0 = le_bytes_i32(&[0, 10, 20]);
    let archive = lindi_tar(&[
        ("lindi.json", document.as_slice()),
        ("blobs/a0", chunk.as_slice()),
        ("blobs/b0", b0.as_slice()),
    ]);
    f.fetcher.insert(LINDI_URL, archive);

    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    assert!(file.is_archive());
    let group = file.get_group("/").await.unwrap();
    assert_eq!(group.datasets.len(), 2);

    let a = file
        .get_dataset_data("/a", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.into_array().unwrap(), ArrayData::Float64(vec![1.5, 2.5]));
    let b = file
        .get_dataset_data("/b", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.into_array().unwrap(), ArrayData::Int32(vec![10, 20]));
}

#[tokio::test]
async fn archive_without_manifest_member() {
    let f = fixture();
    f.fetcher
        .insert(LINDI_URL, lindi_tar(&[("other.json", b"{}".as_slice())]));
    let err = f.registry.open_reference_fs(LINDI_URL).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn corrupt_archive() {
    let f = fixture();
    let mut object = vec![b'{'; 2048];
    object[100] = 0;
    f.fetcher.insert(LINDI_URL, object);
    let err = f.registry.open_reference_fs(LINDI_URL).await.unwrap_err();
    assert!(matches!(err.unshared(), Error::CorruptArchive { .. }));
}

#[tokio::test]
async fn redirects_to_plain_files() {
    let f = fixture();
    f.backend
        .add_dataset(
            H5_URL,
            "/acquisition/ts",
            vec![4],
            attrs(json!({})),
            &ArrayData::Float32(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .unwrap();
    let link = json!({"url": H5_URL, "name": "/acquisition/ts"});
    f.fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "sidecar/.external_hdf5": link.to_string(),
            "linked/.zarray": zarray(&[4], &[4], "<f4", Value::Null),
            "linked/.zattrs": json!({"_EXTERNAL_ARRAY_LINK": link}).to_string(),
        })),
    );
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();

    let sidecar = file
        .get_dataset_data("/sidecar", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        sidecar.into_array().unwrap(),
        ArrayData::Float32(vec![1.0, 2.0, 3.0, 4.0])
    );

    let linked = file
        .get_dataset_data("/linked", &DataRequest::new().with_slice(vec![1..3]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(linked.into_array().unwrap(), ArrayData::Float32(vec![2.0, 3.0]));
    assert_eq!(
        f.backend
            .call_count(BackendOperation::DatasetData, "/acquisition/ts"),
        2
    );
    // the plain file behind both redirects is opened once
    let plain = f.registry.open(H5_URL).unwrap();
    assert!(plain.get_dataset("/acquisition/ts").await.is_some());
    assert_eq!(
        f.backend.call_count(BackendOperation::Dataset, "/acquisition/ts"),
        1
    );
}

#[tokio::test]
async fn concurrent_opens_share_one_construction() {
    let f = gzipped_fixture();
    let (a, b) = tokio::join!(
        f.registry.open_reference_fs(LINDI_URL),
        f.registry.open_reference_fs(LINDI_URL)
    );
    assert!(std::sync::Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(f.fetcher.request_count(LINDI_URL), 1);

    let kind: StorageKind = "lindi".parse().unwrap();
    let file = f.registry.open_kind(LINDI_URL, kind).await.unwrap();
    assert_eq!(file.urls(), vec![LINDI_URL.to_string()]);
    assert_eq!(f.fetcher.request_count(LINDI_URL), 1);
}

/// Appends `bytes` to `blob` and returns the `[url, offset, length]` ref to them.
fn append_ref(blob: &mut Vec<u8>, bytes: &[u8]) -> Value {
    let offset = blob.len();
    blob.extend_from_slice(bytes);
    json!([BLOB_URL, offset, bytes.len()])
}

fn zarray_bytes(shape: &[u64], chunks: &[u64], dtype: &str) -> Vec<u8> {
    let document = zarray(shape, chunks, dtype, Value::Null);
    document.as_str().unwrap().as_bytes().to_vec()
}

#[tokio::test]
async fn concurrent_reads_fetch_each_key_once() {
    let f = fixture();
    let mut blob = Vec::new();
    let zarray_ref = append_ref(&mut blob, &zarray_bytes(&[4], &[2], "<i4"));
    let zattrs_ref = append_ref(&mut blob, br#"{"unit": "counts"}"#);
    let chunk0 = append_ref(&mut blob, &le_bytes_i32(&[1, 2]));
    let chunk1 = append_ref(&mut blob, &le_bytes_i32(&[3, 4]));
    f.fetcher.insert(BLOB_URL, blob);
    f.fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "x/.zarray": zarray_ref,
            "x/.zattrs": zattrs_ref,
            "x/0": chunk0,
            "x/1": chunk1,
        })),
    );
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    f.fetcher.set_delay(Some(Duration::from_millis(20)));

    let full = DataRequest::new();
    let part = DataRequest::new().with_slice(vec![1..3]);
    let (a, b, c, root, dataset) = tokio::join!(
        file.get_dataset_data("/x", &full),
        file.get_dataset_data("/x", &full),
        file.get_dataset_data("/x", &part),
        file.get_group("/"),
        file.get_dataset("/x"),
    );
    let all = ArrayData::Int32(vec![1, 2, 3, 4]);
    assert_eq!(a.unwrap().unwrap().into_array().unwrap(), all);
    assert_eq!(b.unwrap().unwrap().into_array().unwrap(), all);
    assert_eq!(
        c.unwrap().unwrap().into_array().unwrap(),
        ArrayData::Int32(vec![2, 3])
    );
    assert_eq!(root.unwrap().datasets[0].attrs, attrs(json!({"unit": "counts"})));
    assert_eq!(dataset.unwrap().shape, vec![4]);

    // one request per metadata key and per chunk
    let ranges: Vec<_> = f
        .fetcher
        .requests()
        .into_iter()
        .filter(|(url, _)| url == BLOB_URL)
        .map(|(_, range)| range)
        .collect();
    assert_eq!(ranges.len(), 4);
    assert_eq!(ranges.iter().collect::<HashSet<_>>().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn group_children_are_read_concurrently() {
    let f = fixture();
    let mut blob = Vec::new();
    let mut refs = serde_json::Map::new();
    refs.insert(".zgroup".into(), json!("{\"zarr_format\": 2}"));
    refs.insert(".zattrs".into(), append_ref(&mut blob, br#"{"title": "wide"}"#));
    for i in 0..8 {
        let zarray = zarray_bytes(&[2], &[2], "<f8");
        refs.insert(format!("d{i}/.zarray"), append_ref(&mut blob, &zarray));
        let attrs = format!(r#"{{"index": {i}}}"#);
        refs.insert(format!("d{i}/.zattrs"), append_ref(&mut blob, attrs.as_bytes()));
    }
    f.fetcher.insert(BLOB_URL, blob);
    f.fetcher.insert(LINDI_URL, manifest(Value::Object(refs)));
    let file = f.registry.open_reference_fs(LINDI_URL).await.unwrap();
    f.fetcher.set_delay(Some(Duration::from_millis(100)));

    let start = tokio::time::Instant::now();
    let root = file.get_group("/").await.unwrap();
    // every metadata fetch overlaps, so the listing costs one round trip
    assert!(start.elapsed() < Duration::from_millis(200));
    assert_eq!(root.attrs, attrs(json!({"title": "wide"})));
    let names: Vec<_> = root.datasets.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, ["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"]);
    assert_eq!(root.datasets[3].attrs, attrs(json!({"index": 3})));
    assert_eq!(f.fetcher.request_count(BLOB_URL), 17);
}

#[tokio::test]
async fn redirects_without_a_plain_file_reader() {
    let (fetcher, registry) = fixture_without_backend();
    let link = json!({"url": H5_URL, "name": "/acquisition/ts"});
    fetcher.insert(BLOB_URL, le_bytes_i32(&[1, 2]));
    fetcher.insert(
        LINDI_URL,
        manifest(json!({
            ".zgroup": "{\"zarr_format\": 2}",
            "sidecar/.external_hdf5": link.to_string(),
            "local/.zarray": zarray(&[2], &[2], "<i4", Value::Null),
            "local/0": [BLOB_URL, 0, 8],
        })),
    );
    let file = registry.open_reference_fs(LINDI_URL).await.unwrap();
    let err = file
        .get_dataset_data("/sidecar", &DataRequest::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    // arrays stored in the reference file system are unaffected
    let local = file
        .get_dataset_data("/local", &DataRequest::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(local.into_array().unwrap(), ArrayData::Int32(vec![1, 2]));
}
