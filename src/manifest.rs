//! Reference file system manifests.
//!
//! A manifest maps virtual zarr keys to their bytes:
//!
//! ```json
//! {
//!     "version": 1,
//!     "templates": {"u": "https://example.org/file.nwb"},
//!     "refs": {
//!         ".zgroup": "{\"zarr_format\": 2}",
//!         "data/.zarray": "{\"shape\": [100], \"chunks\": [50], ...}",
//!         "data/0": ["{{u}}", 2048, 400],
//!         "data/1": ["https://example.org/other.bin"],
//!         "tiny/0": "base64:AAAAAAAA8D8="
//!     }
//! }
//! ```

use std::collections::{BTreeSet, HashMap};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::byte_range::ByteRange;

const ZGROUP: &str = ".zgroup";
const ZARRAY: &str = ".zarray";
const ZATTRS: &str = ".zattrs";

/// Where the bytes of one manifest key live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum RefValue {
    /// Bytes stored in the manifest itself.
    Inline(Bytes),
    /// `[url, offset, length]`. An empty url refers to the manifest's own object.
    Range {
        url: String,
        offset: u64,
        length: u64,
    },
    /// `[url]`, the whole object.
    Whole { url: String },
}

impl TryFrom<Value> for RefValue {
    type Error = crate::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => match s.strip_prefix("base64:") {
                Some(encoded) => STANDARD
                    .decode(encoded)
                    .map(|b| Self::Inline(b.into()))
                    .map_err(|e| crate::Error::InvalidManifest(format!("invalid base64 ref: {e}"))),
                None => Ok(Self::Inline(Bytes::from(s))),
            },
            Value::Array(items) => {
                let url = items
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| crate::Error::InvalidManifest("ref url must be a string".into()))?
                    .to_string();
                match items.len() {
                    1 => Ok(Self::Whole { url }),
                    3 => {
                        let integer = |item: &Value, field: &str| {
                            item.as_u64().ok_or_else(|| {
                                crate::Error::InvalidManifest(format!(
                                    "ref {field} must be an integer, got {item}"
                                ))
                            })
                        };
                        let offset = integer(&items[1], "offset")?;
                        let length = integer(&items[2], "length")?;
                        ByteRange::from_offset_length(offset, length)?;
                        Ok(Self::Range {
                            url,
                            offset,
                            length,
                        })
                    }
                    n => Err(crate::Error::InvalidManifest(format!(
                        "ref arrays have 1 or 3 items, got {n}"
                    ))),
                }
            }
            other => Ok(Self::Inline(Bytes::from(serde_json::to_vec(&other)?))),
        }
    }
}

/// A parsed reference file system manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceManifest {
    #[serde(default)]
    pub version: Option<Value>,
    pub refs: HashMap<String, RefValue>,
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl ReferenceManifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    /// Returns [`Error::InvalidManifest`](crate::Error::InvalidManifest) if the document is not
    /// JSON, has no `refs` object or holds a malformed ref.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(&sanitize_non_finite(bytes))
            .map_err(|e| crate::Error::InvalidManifest(e.to_string()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RefValue> {
        self.refs.get(key)
    }

    /// Substitute `{{name}}` templates in a ref url.
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        if self.templates.is_empty() || !(url.contains("{{") && url.contains("}}")) {
            return url.to_string();
        }
        let mut resolved = url.to_string();
        for (name, value) in &self.templates {
            resolved = resolved.replace(&format!("{{{{{name}}}}}"), value);
        }
        resolved
    }
}

/// Parse JSON metadata, accepting bare `NaN`, `Infinity` and `-Infinity` tokens.
///
/// Non-finite numbers become the strings `"NaN"`, `"Infinity"` and `"-Infinity"`,
/// which is how zarr encodes non-finite fill values.
///
/// # Errors
/// Returns an error if the text is not otherwise valid JSON.
pub fn parse_json_lenient(bytes: &[u8]) -> crate::Result<Value> {
    Ok(serde_json::from_slice(&sanitize_non_finite(bytes))?)
}

pub(crate) fn sanitize_non_finite(bytes: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    const TOKENS: [&[u8]; 3] = [b"-Infinity", b"Infinity", b"NaN"];
    let might_contain = |t: &[u8]| bytes.windows(t.len()).any(|w| w == t);
    if !TOKENS.iter().any(|t| might_contain(*t)) {
        return std::borrow::Cow::Borrowed(bytes);
    }
    let mut out = Vec::with_capacity(bytes.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    'outer: while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_string = false;
            }
        } else if c == b'"' {
            in_string = true;
        } else {
            for token in TOKENS {
                if bytes[i..].starts_with(token) {
                    out.push(b'"');
                    out.extend_from_slice(token);
                    out.push(b'"');
                    i += token.len();
                    continue 'outer;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    std::borrow::Cow::Owned(out)
}

/// Whether a virtual path is a group or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Array,
}

/// Parent-to-children index of a manifest, built once from its keys.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    kinds: HashMap<String, NodeKind>,
    children: HashMap<String, Vec<String>>,
}

impl NodeIndex {
    /// Classify every path that has zarr metadata keys.
    ///
    /// A path with `.zgroup` is a group; otherwise a path with `.zarray` is an array.
    /// Paths with only `.zattrs` are not nodes.
    pub fn build<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut kinds: HashMap<String, NodeKind> = HashMap::new();
        for key in keys {
            let (node, last) = match key.rsplit_once('/') {
                Some(parts) => parts,
                None => ("", key),
            };
            match last {
                ZGROUP => {
                    kinds.insert(node.to_string(), NodeKind::Group);
                }
                ZARRAY => {
                    kinds.entry(node.to_string()).or_insert(NodeKind::Array);
                }
                _ => {}
            }
        }

        let mut children: HashMap<String, BTreeSet<String>> = HashMap::new();
        for node in kinds.keys().filter(|n| !n.is_empty()) {
            let parent = node.rsplit_once('/').map_or("", |(p, _)| p);
            children
                .entry(parent.to_string())
                .or_default()
                .insert(node.clone());
        }
        Self {
            kinds,
            children: children
                .into_iter()
                .map(|(parent, c)| (parent, c.into_iter().collect()))
                .collect(),
        }
    }

    /// The kind of node at `path` (no leading slash, root is `""`).
    #[must_use]
    pub fn kind(&self, path: &str) -> Option<NodeKind> {
        self.kinds.get(path).copied()
    }

    /// Child node paths of `path`, sorted.
    #[must_use]
    pub fn children(&self, path: &str) -> &[String] {
        self.children.get(path).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// The manifest key of a metadata document of the node at `path`.
pub(crate) fn metadata_key(path: &str, document: &str) -> String {
    if path.is_empty() {
        document.to_string()
    } else {
        format!("{path}/{document}")
    }
}

pub(crate) fn zarray_key(path: &str) -> String {
    metadata_key(path, ZARRAY)
}

pub(crate) fn zattrs_key(path: &str) -> String {
    metadata_key(path, ZATTRS)
}

pub(crate) fn external_hdf5_key(path: &str) -> String {
    metadata_key(path, ".external_hdf5")
}
