//! Byte ranges.

use std::ops::Range;

/// A half-open range of bytes `[start, end)` within a remote object.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Create a byte range from an offset and a length.
    ///
    /// # Errors
    /// Returns [`Error::InvalidManifest`](crate::Error::InvalidManifest) if the range ends
    /// past `u64::MAX`.
    pub fn from_offset_length(offset: u64, length: u64) -> crate::Result<Self> {
        let end = offset.checked_add(length).ok_or_else(|| {
            crate::Error::InvalidManifest(format!(
                "range of {length} bytes at offset {offset} overflows"
            ))
        })?;
        Ok(Self { start: offset, end })
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// A sub-range relative to the start of this range, clamped to it.
    #[must_use]
    pub fn sub_range(&self, relative: Range<u64>) -> Self {
        let start = self.start.saturating_add(relative.start).min(self.end);
        let end = self.start.saturating_add(relative.end).min(self.end).max(start);
        Self { start, end }
    }

    /// The value of an HTTP `Range` header selecting these bytes.
    ///
    /// `None` for an empty range, which no header can express.
    #[must_use]
    pub fn to_http_header(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!("bytes={}-{}", self.start, self.end - 1))
    }
}

impl From<Range<u64>> for ByteRange {
    fn from(value: Range<u64>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
