//! The typed tree returned by every reader.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{decoder::MAX_SLICE_DIMS, executor::Canceler};

/// Unordered string-keyed attributes of a group or dataset.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Attribute marking a length-1 dataset that should be read back as a scalar.
pub const SCALAR_ATTRIBUTE: &str = "_SCALAR";

/// A group in the hierarchy with its immediate children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub path: String,
    pub subgroups: Vec<SubgroupEntry>,
    pub datasets: Vec<DatasetEntry>,
    pub attrs: Attributes,
}

/// A child group as listed by its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupEntry {
    pub name: String,
    pub path: String,
    pub attrs: Attributes,
}

/// A child dataset as listed by its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub name: String,
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    pub attrs: Attributes,
}

/// A dataset's shape, element type and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub path: String,
    pub shape: Vec<u64>,
    pub dtype: String,
    pub attrs: Attributes,
}

impl DatasetDescriptor {
    /// Total number of elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Whether the attributes flag this dataset as a scalar.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        is_scalar_flagged(&self.attrs)
    }
}

pub(crate) fn is_scalar_flagged(attrs: &Attributes) -> bool {
    attrs
        .get(SCALAR_ATTRIBUTE)
        .is_some_and(|v| v.as_bool().unwrap_or(false))
}

/// Strip leading slashes; the root is the empty string.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// The public form of a normalized path, with a leading slash. The root is `/`.
pub(crate) fn absolute_path(normalized: &str) -> String {
    format!("/{normalized}")
}

/// The parent of a normalized path, or `None` for the root.
pub(crate) fn parent_path(normalized: &str) -> Option<&str> {
    if normalized.is_empty() {
        return None;
    }
    Some(normalized.rsplit_once('/').map_or("", |(parent, _)| parent))
}

/// The last component of a `/`-separated path.
pub(crate) fn name_from_path(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Per-dimension `[start, end)` bounds of a read, applied to the leading dimensions.
///
/// Bounds are kept as given so that non-finite values can be reported when the
/// request is made rather than silently truncated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SliceSpec {
    bounds: Vec<(f64, f64)>,
}

impl SliceSpec {
    #[must_use]
    pub fn new(bounds: Vec<(f64, f64)>) -> Self {
        Self { bounds }
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.bounds.len()
    }

    #[must_use]
    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Convert to integer ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`](crate::Error::InvalidSlice) if a bound is non-finite,
    /// negative or fractional, or if a start exceeds its end.
    pub fn to_ranges(&self) -> crate::Result<Vec<Range<u64>>> {
        self.bounds
            .iter()
            .map(|&(start, end)| {
                if !start.is_finite() || !end.is_finite() {
                    return Err(crate::Error::InvalidSlice(format!(
                        "non-finite bound [{start}, {end})"
                    )));
                }
                if start < 0.0 || end < 0.0 || start.fract() != 0.0 || end.fract() != 0.0 {
                    return Err(crate::Error::InvalidSlice(format!(
                        "bounds must be non-negative integers, got [{start}, {end})"
                    )));
                }
                if start > end {
                    return Err(crate::Error::InvalidSlice(format!(
                        "start {start} is after end {end}"
                    )));
                }
                Ok(start as u64..end as u64)
            })
            .collect()
    }
}

impl From<Vec<Range<u64>>> for SliceSpec {
    fn from(value: Vec<Range<u64>>) -> Self {
        Self::new(
            value
                .into_iter()
                .map(|r| (r.start as f64, r.end as f64))
                .collect(),
        )
    }
}

/// Options of a dataset data read.
#[derive(Debug, Clone, Default)]
pub struct DataRequest {
    pub slice: Option<SliceSpec>,
    /// Keep 64-bit integers instead of narrowing them to 32 bits.
    pub allow_big_int: bool,
    pub canceler: Option<Canceler>,
}

impl DataRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_slice(mut self, slice: impl Into<SliceSpec>) -> Self {
        self.slice = Some(slice.into());
        self
    }

    #[must_use]
    pub fn with_allow_big_int(mut self, allow_big_int: bool) -> Self {
        self.allow_big_int = allow_big_int;
        self
    }

    #[must_use]
    pub fn with_canceler(mut self, canceler: Canceler) -> Self {
        self.canceler = Some(canceler);
        self
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceler.as_ref().is_some_and(Canceler::is_canceled)
    }

    /// Validate the slice, if any, for a read of the dataset at `path`.
    pub(crate) fn slice_ranges(&self, path: &str) -> crate::Result<Option<Vec<Range<u64>>>> {
        let Some(slice) = &self.slice else {
            return Ok(None);
        };
        if slice.ndim() > MAX_SLICE_DIMS {
            log::warn!("refusing to slice {} dimensions of {path}", slice.ndim());
            return Err(crate::Error::UnsupportedSlice {
                path: path.to_string(),
                ndim: slice.ndim(),
                max: MAX_SLICE_DIMS,
            });
        }
        slice.to_ranges().map(Some)
    }
}
