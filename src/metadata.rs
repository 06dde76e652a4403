use serde::{Deserialize, Serialize};

use crate::{
    data::NumpyDtype,
    model::{Attributes, DatasetDescriptor, DatasetEntry, name_from_path},
};

/// Attribute redirecting a dataset's data to an array in a plain remote file.
pub const EXTERNAL_ARRAY_LINK_ATTRIBUTE: &str = "_EXTERNAL_ARRAY_LINK";

/// The parts of zarr v2 array metadata (`.zarray`) that describe an array in the tree.
///
/// Decoding reads the full document through zarrs, so codecs, fill value and layout are
/// not kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZarrArrayMetadata {
    #[serde(default)]
    pub zarr_format: Option<u64>,
    #[serde(default)]
    pub shape: Vec<u64>,
    #[serde(default)]
    pub chunks: Option<Vec<u64>>,
    #[serde(default)]
    pub dtype: String,
}

impl ZarrArrayMetadata {
    /// Parse the dtype string.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDataType`](crate::Error::UnsupportedDataType) for non-numeric dtypes.
    pub fn numpy_dtype(&self) -> crate::Result<NumpyDtype> {
        self.dtype.parse()
    }

    /// The chunk shape, checked against the array shape.
    ///
    /// # Errors
    /// Returns an error if `chunks` is missing, has the wrong dimensionality or contains a zero.
    pub fn chunk_shape(&self) -> crate::Result<&[u64]> {
        let chunks = self
            .chunks
            .as_deref()
            .ok_or_else(|| crate::Error::general("no chunk shape in array metadata"))?;
        if chunks.len() != self.shape.len() {
            return Err(crate::Error::general(format!(
                "chunk shape {chunks:?} does not match array shape {:?}",
                self.shape
            )));
        }
        if chunks.contains(&0) {
            return Err(crate::Error::general("zero chunk size"));
        }
        Ok(chunks)
    }

    /// Whether the whole array is stored in one chunk.
    #[must_use]
    pub fn is_single_chunk(&self) -> bool {
        self.chunk_shape().is_ok_and(|chunks| chunks == self.shape.as_slice())
    }

    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Describe the array at `path` (with leading slash) for the tree API.
    #[must_use]
    pub fn describe(&self, path: &str, attrs: Attributes) -> DatasetDescriptor {
        DatasetDescriptor {
            name: name_from_path(path).to_string(),
            path: path.to_string(),
            shape: self.shape.clone(),
            dtype: self.dtype.clone(),
            attrs,
        }
    }

    /// The entry of this array in its parent group's listing.
    #[must_use]
    pub fn entry(&self, path: &str, attrs: Attributes) -> DatasetEntry {
        let DatasetDescriptor {
            name,
            path,
            shape,
            dtype,
            attrs,
        } = self.describe(path, attrs);
        DatasetEntry {
            name,
            path,
            shape,
            dtype,
            attrs,
        }
    }
}

/// A pointer to a dataset inside a plain remote file.
///
/// Used both as the value of the [`EXTERNAL_ARRAY_LINK_ATTRIBUTE`] attribute and as the
/// content of a `.external_hdf5` sidecar key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub url: String,
    /// Path of the dataset inside the remote file.
    pub name: String,
}

impl ExternalLink {
    /// Read the link from a dataset's attributes, if present and well formed.
    #[must_use]
    pub fn from_attributes(attrs: &Attributes) -> Option<Self> {
        let value = attrs.get(EXTERNAL_ARRAY_LINK_ATTRIBUTE)?;
        match serde_json::from_value(value.clone()) {
            Ok(link) => Some(link),
            Err(e) => {
                log::warn!("ignoring malformed {EXTERNAL_ARRAY_LINK_ATTRIBUTE}: {e}");
                None
            }
        }
    }
}
