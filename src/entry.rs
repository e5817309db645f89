use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::any::Any;
use std::sync::Arc;

use crate::error::CacheError;

/// Where a cached value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Fetched from the remote content API.
    #[default]
    Api,
    /// Derived locally from other data.
    Computed,
    /// Written by the user (e.g. an optimistic mutation).
    User,
}

/// Bookkeeping attached to every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Length of the JSON form of the value, used as a byte-size proxy.
    /// Zero when the value could not be serialized.
    pub size: usize,
    pub source: EntrySource,
}

/// Options for `CacheManager::set`.
///
/// Unset fields fall back to the manager defaults: configured TTL, no tags,
/// version 1, source `api`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl_ms: Option<i64>,
    pub tags: Vec<String>,
    pub version: Option<u64>,
    pub source: Option<EntrySource>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn source(mut self, source: EntrySource) -> Self {
        self.source = Some(source);
        self
    }
}

/// Type-erased value storage.
///
/// Values written in this process keep their typed form (reads downcast and
/// clone, no JSON round-trip) alongside the JSON used for size accounting and
/// persistence. Values loaded from durable storage only have the JSON form
/// and are deserialized on read.
#[derive(Clone)]
pub(crate) enum StoredValue {
    Typed {
        value: Arc<dyn Any + Send + Sync>,
        /// `None` when the value failed to serialize; such entries are not persisted.
        json: Option<Arc<RawValue>>,
    },
    Serialized(Arc<RawValue>),
}

/// A single cache entry.
#[derive(Clone)]
pub struct CacheEntry {
    pub(crate) value: StoredValue,
    /// Write time in milliseconds since the UNIX epoch.
    pub timestamp: i64,
    /// Validity window in milliseconds.
    pub ttl: i64,
    pub tags: Vec<String>,
    pub version: u64,
    pub metadata: EntryMetadata,
    /// Write order, used to break timestamp ties during eviction.
    pub(crate) seq: u64,
}

impl CacheEntry {
    /// Build an entry from a typed value, computing its JSON form and size.
    pub(crate) fn from_typed<V>(
        value: V,
        timestamp: i64,
        opts: &SetOptions,
        default_ttl: i64,
    ) -> Self
    where
        V: Serialize + Send + Sync + 'static,
    {
        let json: Option<Arc<RawValue>> =
            serde_json::value::to_raw_value(&value).ok().map(Arc::from);
        let size = json.as_ref().map(|raw| raw.get().len()).unwrap_or(0);

        CacheEntry {
            value: StoredValue::Typed {
                value: Arc::new(value),
                json,
            },
            timestamp,
            ttl: opts.ttl_ms.unwrap_or(default_ttl),
            tags: opts.tags.clone(),
            version: opts.version.unwrap_or(1),
            metadata: EntryMetadata {
                size,
                source: opts.source.unwrap_or_default(),
            },
            seq: 0,
        }
    }

    /// An entry is expired once strictly more than `ttl` has elapsed since its write.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp > self.ttl
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Read the value as `V`.
    ///
    /// Typed values are downcast; if the stored type differs but a JSON form
    /// exists, it is deserialized instead.
    pub(crate) fn read<V>(&self) -> Result<V, CacheError>
    where
        V: Clone + DeserializeOwned + 'static,
    {
        match &self.value {
            StoredValue::Typed { value, json } => {
                if let Some(typed) = value.downcast_ref::<V>() {
                    return Ok(typed.clone());
                }
                match json {
                    Some(raw) => decode(raw),
                    None => Err(CacheError::Serialization(
                        "Type downcast failed".to_string(),
                    )),
                }
            }
            StoredValue::Serialized(raw) => decode(raw),
        }
    }

    pub(crate) fn json(&self) -> Option<&Arc<RawValue>> {
        match &self.value {
            StoredValue::Typed { json, .. } => json.as_ref(),
            StoredValue::Serialized(raw) => Some(raw),
        }
    }

    /// Convert to the persisted form. Returns `None` when there is no JSON form.
    pub(crate) fn to_persisted(&self) -> Option<PersistedEntry> {
        let data = self.json()?.clone();
        Some(PersistedEntry {
            data,
            timestamp: self.timestamp,
            ttl: self.ttl,
            tags: self.tags.clone(),
            version: self.version,
            metadata: self.metadata.clone(),
        })
    }

    pub(crate) fn from_persisted(entry: PersistedEntry, seq: u64) -> Self {
        CacheEntry {
            value: StoredValue::Serialized(entry.data),
            timestamp: entry.timestamp,
            ttl: entry.ttl,
            tags: entry.tags,
            version: entry.version,
            metadata: entry.metadata,
            seq,
        }
    }
}

fn decode<V: DeserializeOwned>(raw: &RawValue) -> Result<V, CacheError> {
    serde_json::from_str(raw.get())
        .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))
}

/// On-disk form of a single entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub data: Arc<RawValue>,
    pub timestamp: i64,
    pub ttl: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

fn default_version() -> u64 {
    1
}

/// Current persisted document format.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The whole persisted cache: a format version plus `[key, entry]` pairs.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PersistedCache {
    pub version: u32,
    pub entries: Vec<(String, PersistedEntry)>,
}

impl PersistedCache {
    /// Decode a persisted document, rejecting other format versions.
    pub(crate) fn decode(raw: &str) -> Result<Self, CacheError> {
        #[derive(Deserialize)]
        struct Header {
            version: u32,
        }

        let header: Header = serde_json::from_str(raw)
            .map_err(|e| CacheError::Serialization(format!("unreadable cache document: {}", e)))?;
        if header.version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedFormat {
                found: header.version,
                expected: FORMAT_VERSION,
            });
        }

        serde_json::from_str(raw)
            .map_err(|e| CacheError::Serialization(format!("Deserialization failed: {}", e)))
    }

    pub(crate) fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self)
            .map_err(|e| CacheError::Serialization(format!("Serialization failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Article {
        slug: String,
        views: u32,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not serializable"))
        }
    }

    fn article() -> Article {
        Article {
            slug: "hello".into(),
            views: 3,
        }
    }

    #[test]
    fn test_typed_entry_reads_back_without_json() {
        let entry = CacheEntry::from_typed(article(), 100, &SetOptions::new(), 5_000);
        assert_eq!(entry.read::<Article>().unwrap(), article());
        assert_eq!(entry.ttl, 5_000);
        assert_eq!(entry.version, 1);
        assert_eq!(entry.metadata.source, EntrySource::Api);
    }

    #[test]
    fn test_size_is_json_length() {
        let entry = CacheEntry::from_typed(article(), 0, &SetOptions::new(), 1);
        let expected = serde_json::to_string(&article()).unwrap().len();
        assert_eq!(entry.metadata.size, expected);
    }

    #[test]
    fn test_unserializable_value_has_zero_size() {
        let entry = CacheEntry::from_typed(Unserializable, 0, &SetOptions::new(), 1);
        assert_eq!(entry.metadata.size, 0);
        assert!(entry.to_persisted().is_none());
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::from_typed(1u32, 1_000, &SetOptions::new().ttl_ms(50), 0);
        assert!(!entry.is_expired(1_050));
        assert!(entry.is_expired(1_051));
    }

    #[test]
    fn test_serialized_entry_reads_via_json() {
        let typed = CacheEntry::from_typed(article(), 7, &SetOptions::new().tag("articles"), 10);
        let persisted = typed.to_persisted().unwrap();
        let restored = CacheEntry::from_persisted(persisted, 1);

        assert_eq!(restored.read::<Article>().unwrap(), article());
        assert_eq!(restored.tags, vec!["articles".to_string()]);
        assert_eq!(restored.timestamp, 7);
    }

    #[test]
    fn test_document_rejects_other_versions() {
        let raw = r#"{"version":99,"entries":[]}"#;
        assert!(matches!(
            PersistedCache::decode(raw),
            Err(CacheError::UnsupportedFormat { found: 99, .. })
        ));

        // Legacy bare array of pairs has no header at all.
        let legacy = r#"[["k",{"data":1,"timestamp":0,"ttl":1}]]"#;
        assert!(matches!(
            PersistedCache::decode(legacy),
            Err(CacheError::Serialization(_))
        ));
    }
}
