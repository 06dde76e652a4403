//! Byte-range access to members of a remote ustar archive.
//!
//! A LINDI archive is laid out so that its members can be located without
//! reading the whole stream:
//!
//! - block 0 is the ustar header of the first member,
//! - the first member's data (starting at byte 512) is a small JSON descriptor
//!   `{"index": {"d": <data offset>, "s": <size>}}` naming the index member,
//! - the index member holds `{"files": [{"n": <name>, "d": <data offset>, "s": <size>}, ...]}`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{byte_range::ByteRange, executor::IoExecutor};

/// Size of a tar block.
pub const BLOCK_SIZE: usize = 512;
/// Offset of the `ustar` magic within a header block.
pub const MAGIC_OFFSET: usize = 257;

const MAGIC: &[u8] = b"ustar";
/// Largest descriptor read from the first member.
const DESCRIPTOR_SIZE: usize = 1024;

/// Outcome of inspecting the first bytes of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// A ustar archive.
    Tar,
    /// Not an archive; the object is the manifest itself.
    Plain,
}

/// Decide whether `prefix` starts a ustar archive.
///
/// Text manifests never contain a null byte, so a header without the ustar
/// magic that does contain one is an archive in an unsupported or damaged format.
///
/// # Errors
/// Returns [`Error::CorruptArchive`](crate::Error::CorruptArchive) in that case.
pub fn detect_archive(url: &str, prefix: &[u8]) -> crate::Result<ArchiveKind> {
    let Some(header) = prefix.get(..BLOCK_SIZE) else {
        return Ok(ArchiveKind::Plain);
    };
    let magic = &header[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()];
    // POSIX writes "ustar\0", GNU writes "ustar "
    let terminator = header[MAGIC_OFFSET + MAGIC.len()];
    if magic == MAGIC && (terminator == 0 || terminator == b' ') {
        return Ok(ArchiveKind::Tar);
    }
    if header.contains(&0) {
        return Err(crate::Error::CorruptArchive {
            url: url.to_string(),
            reason: "null byte in header but no ustar magic".to_string(),
        });
    }
    Ok(ArchiveKind::Plain)
}

#[derive(Debug, Deserialize)]
struct MemberRef {
    #[serde(rename = "d")]
    data_offset: u64,
    #[serde(rename = "s")]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    index: MemberRef,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(rename = "n")]
    name: String,
    #[serde(flatten)]
    member: MemberRef,
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    files: Vec<IndexEntry>,
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Name-to-byte-range index of the members of a remote archive.
#[derive(Debug, Clone)]
pub struct TarIndex {
    url: String,
    files: HashMap<String, ByteRange>,
}

impl TarIndex {
    /// Locate the index member from the descriptor following the first header.
    ///
    /// # Errors
    /// Returns [`Error::CorruptArchive`](crate::Error::CorruptArchive) if the descriptor is
    /// missing or not valid JSON.
    pub fn index_member_range(url: &str, prefix: &[u8]) -> crate::Result<ByteRange> {
        let corrupt = |reason: String| crate::Error::CorruptArchive {
            url: url.to_string(),
            reason,
        };
        let end = prefix.len().min(BLOCK_SIZE + DESCRIPTOR_SIZE);
        let descriptor = prefix
            .get(BLOCK_SIZE..end)
            .ok_or_else(|| corrupt("archive is too short to hold a descriptor".to_string()))?;
        let descriptor: Descriptor = serde_json::from_slice(trim_padding(descriptor))
            .map_err(|e| corrupt(format!("invalid descriptor: {e}")))?;
        ByteRange::from_offset_length(descriptor.index.data_offset, descriptor.index.size)
            .map_err(|e| corrupt(format!("invalid descriptor: {e}")))
    }

    /// Build the index from the content of the index member.
    ///
    /// # Errors
    /// Returns [`Error::CorruptArchive`](crate::Error::CorruptArchive) if the document is malformed.
    pub fn from_index_document(url: &str, document: &[u8]) -> crate::Result<Self> {
        let document: IndexDocument =
            serde_json::from_slice(trim_padding(document)).map_err(|e| {
                crate::Error::CorruptArchive {
                    url: url.to_string(),
                    reason: format!("invalid index: {e}"),
                }
            })?;
        let files = document
            .files
            .into_iter()
            .map(|entry| {
                let range =
                    ByteRange::from_offset_length(entry.member.data_offset, entry.member.size)
                        .map_err(|e| crate::Error::CorruptArchive {
                            url: url.to_string(),
                            reason: format!("invalid index entry {}: {e}", entry.name),
                        })?;
                Ok((entry.name, range))
            })
            .collect::<crate::Result<_>>()?;
        Ok(Self {
            url: url.to_string(),
            files,
        })
    }

    /// Read the descriptor from `prefix` and fetch the index member.
    ///
    /// # Errors
    /// Propagates fetch failures and [`Error::CorruptArchive`](crate::Error::CorruptArchive).
    pub async fn load(url: &str, prefix: &[u8], executor: &IoExecutor) -> crate::Result<Self> {
        let index_range = Self::index_member_range(url, prefix)?;
        let document = executor.fetch_bytes(url, Some(index_range), None).await?;
        let index = Self::from_index_document(url, &document)?;
        log::debug!("tar index of {url} lists {} members", index.len());
        Ok(index)
    }

    /// The url of the archive.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Absolute byte range of a member's data.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if no member has that name.
    pub fn byte_range_for_file(&self, name: &str) -> crate::Result<ByteRange> {
        self.files
            .get(name)
            .copied()
            .ok_or_else(|| crate::Error::NotFound(format!("{name} in archive {}", self.url)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
