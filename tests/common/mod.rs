#![allow(dead_code)]

use std::{io::Write, sync::Arc};

use flate2::{Compression, write::GzEncoder};
use lindi_remote::{
    FileRegistry, IoExecutor, ReaderConfig, backend::MemoryBackend, fetch::MemoryFetcher,
    model::Attributes,
};
use serde_json::Value;

pub struct Fixture {
    pub fetcher: Arc<MemoryFetcher>,
    pub backend: Arc<MemoryBackend>,
    pub registry: FileRegistry,
}

pub fn fixture() -> Fixture {
    fixture_with(ReaderConfig::default())
}

pub fn fixture_with(config: ReaderConfig) -> Fixture {
    env_logger::try_init().ok();
    let fetcher = Arc::new(MemoryFetcher::new());
    let backend = Arc::new(MemoryBackend::new());
    let executor = IoExecutor::spawn(fetcher.clone(), Some(backend.clone()), &config);
    let registry = FileRegistry::new(executor, config);
    Fixture {
        fetcher,
        backend,
        registry,
    }
}

/// A registry that can read reference file systems but no plain files.
pub fn fixture_without_backend() -> (Arc<MemoryFetcher>, FileRegistry) {
    env_logger::try_init().ok();
    let config = ReaderConfig::default();
    let fetcher = Arc::new(MemoryFetcher::new());
    let executor = IoExecutor::spawn(fetcher.clone(), None, &config);
    (fetcher, FileRegistry::new(executor, config))
}

pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().expect("attributes should be an object")
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("write to vec");
    encoder.finish().expect("finish gzip stream")
}

pub fn le_bytes_f64(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn le_bytes_i32(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A manifest document with the given refs.
pub fn manifest(refs: Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({"version": 1, "refs": refs})).expect("serialize")
}

/// A `.zarray` document as a ref value.
///
/// `compressor` is a numcodecs configuration such as `{"id": "gzip", "level": 5}`, or null.
pub fn zarray(shape: &[u64], chunks: &[u64], dtype: &str, compressor: Value) -> Value {
    Value::String(
        serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": dtype,
            "compressor": compressor,
            "fill_value": 0,
            "filters": null,
            "order": "C",
        })
        .to_string(),
    )
}

const BLOCK: usize = 512;
const SLOT: usize = 1024;

fn ustar_header(name: &str) -> Vec<u8> {
    let mut header = vec![0u8; BLOCK];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");
    header
}

fn pad(bytes: &mut Vec<u8>, len: usize, with: u8) {
    let padded = len.max(bytes.len()).div_ceil(BLOCK) * BLOCK;
    bytes.resize(padded, with);
}

/// A LINDI tar archive holding `members` after the descriptor and index members.
///
/// The descriptor and index are padded to fixed slots so that member offsets can be
/// computed before the index is written.
pub fn lindi_tar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let index_offset = BLOCK + SLOT + BLOCK;
    let mut offset = index_offset + SLOT;
    let mut files = Vec::new();
    for (name, data) in members {
        let data_offset = offset + BLOCK;
        files.push(serde_json::json!({"n": name, "d": data_offset, "s": data.len()}));
        offset = data_offset + data.len().div_ceil(BLOCK) * BLOCK;
    }
    let mut index = serde_json::to_vec(&serde_json::json!({"files": files})).expect("serialize");
    assert!(index.len() <= SLOT, "too many members for the index slot");
    let index_len = index.len();
    pad(&mut index, SLOT, b' ');
    let mut descriptor = serde_json::to_vec(
        &serde_json::json!({"index": {"n": ".tar_index.json", "d": index_offset, "s": index_len}}),
    )
    .expect("serialize");
    pad(&mut descriptor, SLOT, b' ');

    let mut archive = ustar_header(".tar_entry.json");
    archive.extend_from_slice(&descriptor);
    archive.extend_from_slice(&ustar_header(".tar_index.json"));
    archive.extend_from_slice(&index);
    for (name, data) in members {
        archive.extend_from_slice(&ustar_header(name));
        let mut data = data.to_vec();
        pad(&mut data, 0, 0);
        archive.extend_from_slice(&data);
    }
    archive.extend_from_slice(&[0u8; 2 * BLOCK]);
    archive
}
