//! Reading slices of zarr v2 arrays through zarrs.

use std::{ops::Range, sync::Arc};

use zarrs::array::{Array, ArraySubset};

use crate::{
    data::{ArrayData, DataType},
    executor::Canceler,
    metadata::ZarrArrayMetadata,
    model::absolute_path,
    storage::ReferenceStore,
};

/// Maximum number of dimensions that can be sliced in one request.
pub const MAX_SLICE_DIMS: usize = 3;

/// Per-dimension ranges to read: `slice` on the leading dimensions, clamped to `shape`,
/// and the full extent of the remaining dimensions.
pub(crate) fn resolve_selection(
    path: &str,
    shape: &[u64],
    slice: Option<&[Range<u64>]>,
) -> crate::Result<Vec<Range<u64>>> {
    let slice = slice.unwrap_or_default();
    if slice.len() > MAX_SLICE_DIMS {
        return Err(crate::Error::UnsupportedSlice {
            path: path.to_string(),
            ndim: slice.len(),
            max: MAX_SLICE_DIMS,
        });
    }
    if slice.len() > shape.len() {
        return Err(crate::Error::InvalidSlice(format!(
            "{} sliced dimensions for {path} with shape {shape:?}",
            slice.len()
        )));
    }
    Ok(shape
        .iter()
        .enumerate()
        .map(|(dim, &extent)| match slice.get(dim) {
            Some(range) => {
                let end = range.end.min(extent);
                range.start.min(end)..end
            }
            None => 0..extent,
        })
        .collect())
}

/// Retrieve into the buffer type of `data_type`.
macro_rules! retrieve_typed {
    ($data_type:expr, $retrieve:expr) => {
        match $data_type {
            DataType::Bool => ArrayData::Bool($retrieve),
            DataType::Int8 => ArrayData::Int8($retrieve),
            DataType::Int16 => ArrayData::Int16($retrieve),
            DataType::Int32 => ArrayData::Int32($retrieve),
            DataType::Int64 => ArrayData::Int64($retrieve),
            DataType::UInt8 => ArrayData::UInt8($retrieve),
            DataType::UInt16 => ArrayData::UInt16($retrieve),
            DataType::UInt32 => ArrayData::UInt32($retrieve),
            DataType::UInt64 => ArrayData::UInt64($retrieve),
            DataType::Float32 => ArrayData::Float32($retrieve),
            DataType::Float64 => ArrayData::Float64($retrieve),
        }
    };
}

/// Reads slices of the zarr v2 arrays in a [`ReferenceStore`].
///
/// Stored chunks are fetched once and kept by the store, so repeated and overlapping
/// reads only decode again. Chunks absent from the manifest read as the fill value.
#[derive(Debug)]
pub struct ChunkedArrayDecoder {
    store: Arc<ReferenceStore>,
}

impl ChunkedArrayDecoder {
    #[must_use]
    pub fn new(store: Arc<ReferenceStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ReferenceStore> {
        &self.store
    }

    /// Fetch the chunks intersecting `subset` concurrently, before zarrs reads them.
    async fn fetch_chunks(
        &self,
        array: &Array<ReferenceStore>,
        subset: &ArraySubset,
        canceler: Option<&Canceler>,
    ) -> crate::Result<()> {
        let Some(chunks) = array
            .chunks_in_array_subset(subset)
            .map_err(|e| crate::Error::general(e.to_string()))?
        else {
            return Ok(());
        };
        let indices = chunks.indices();
        let keys: Vec<_> = indices
            .into_iter()
            .map(|chunk| array.chunk_key(&chunk))
            .collect();
        log::debug!("reading {} chunks for {subset:?}", keys.len());
        futures::future::try_join_all(keys.iter().map(|key| async move {
            if canceler.is_some_and(Canceler::is_canceled) {
                return Err(crate::Error::Canceled);
            }
            if self.store.read(key.as_str()).await?.is_none() {
                log::debug!("chunk {} is not stored, using the fill value", key.as_str());
            }
            Ok(())
        }))
        .await?;
        Ok(())
    }

    /// Read `slice` of the array at `path` (no leading slash) described by `zarray`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedSlice`](crate::Error::UnsupportedSlice) if more than
    /// [`MAX_SLICE_DIMS`] dimensions are sliced, fetch errors, and zarrs metadata and codec
    /// errors.
    pub async fn decode(
        &self,
        path: &str,
        zarray: &ZarrArrayMetadata,
        slice: Option<&[Range<u64>]>,
        canceler: Option<&Canceler>,
    ) -> crate::Result<ArrayData> {
        let array_path = absolute_path(path);
        let selection = resolve_selection(&array_path, &zarray.shape, slice)?;
        let data_type = zarray.numpy_dtype()?.data_type;
        if canceler.is_some_and(Canceler::is_canceled) {
            return Err(crate::Error::Canceled);
        }
        if selection.iter().any(|range| range.is_empty()) {
            return ArrayData::from_ne_bytes(data_type, &[]);
        }

        let array = Array::async_open(self.store.clone(), &array_path).await?;
        let subset = ArraySubset::new_with_ranges(&selection);
        self.fetch_chunks(&array, &subset, canceler).await?;

        let is_full = selection
            .iter()
            .zip(array.shape())
            .all(|(range, &extent)| range.start == 0 && range.end == extent);
        let data = if is_full && zarray.is_single_chunk() {
            // the decoded chunk is returned as is, without assembly into a subset
            let origin = vec![0; array.dimensionality()];
            retrieve_typed!(data_type, array.async_retrieve_chunk(&origin).await?)
        } else {
            retrieve_typed!(data_type, array.async_retrieve_array_subset(&subset).await?)
        };
        Ok(data)
    }
}
