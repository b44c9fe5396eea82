//! Shared family glossary: fixed zh↔vi term pairs stored in the KV store.
//!
//! The whole glossary lives as one JSON array under a single configured key.
//! Reads go through a short in-process TTL cache; writes are write-through,
//! so a successful save refreshes the local snapshot immediately. In a
//! multi-instance deployment other instances still converge within the TTL.

use crate::kv::KvStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One normalized glossary entry. `zh` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// Traditional Chinese term, acts as the unique key.
    pub zh: String,

    /// Vietnamese term. May be empty; such entries are kept in storage but
    /// excluded from translation prompts.
    pub vi: String,

    /// Free-form classification tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Optional free-text annotation.
    #[serde(default)]
    pub note: Option<String>,
}

/// A glossary entry as supplied by clients or read back from storage,
/// before normalization. Accepts the legacy `en` field name for the
/// Vietnamese term.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGlossaryEntry {
    #[serde(default)]
    pub zh: String,

    #[serde(default)]
    pub vi: Option<String>,

    /// Legacy field name for the target term, coerced into `vi`.
    #[serde(default)]
    pub en: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub note: Option<String>,
}

impl From<GlossaryEntry> for RawGlossaryEntry {
    fn from(e: GlossaryEntry) -> Self {
        RawGlossaryEntry {
            zh: e.zh,
            vi: Some(e.vi),
            en: None,
            tags: e.tags,
            note: e.note,
        }
    }
}

/// How an import interacts with the existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Merge incoming entries into the current collection; incoming wins on
    /// key conflicts.
    Append,
    /// Discard the current collection and store the incoming entries.
    Replace,
}

/// Normalizes raw entries into the canonical collection:
/// - trims `zh` and `vi`, coercing the legacy `en` field into `vi`
/// - drops entries with an empty `zh`
/// - deduplicates by `zh`, last write wins, first-occurrence order preserved
/// - trims tags, drops empty ones, sorts and deduplicates them
pub fn normalize(items: Vec<RawGlossaryEntry>) -> Vec<GlossaryEntry> {
    let mut out: Vec<GlossaryEntry> = Vec::with_capacity(items.len());
    let mut index_by_zh: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for it in items {
        let zh = it.zh.trim().to_string();
        if zh.is_empty() {
            continue;
        }

        let vi = it.vi.or(it.en).unwrap_or_default().trim().to_string();

        let mut tags: Vec<String> = it
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        tags.sort();
        tags.dedup();

        let entry = GlossaryEntry {
            zh: zh.clone(),
            vi,
            tags,
            note: it.note,
        };

        match index_by_zh.get(&zh) {
            Some(&i) => out[i] = entry,
            None => {
                index_by_zh.insert(zh, out.len());
                out.push(entry);
            }
        }
    }

    out
}

/// Cached glossary snapshot with its refresh time.
struct CachedSnapshot {
    at: Instant,
    entries: Vec<GlossaryEntry>,
}

/// Glossary collection backed by the KV store, with a TTL read cache.
///
/// Cheap to clone; the KV handle and the cache are shared across clones.
#[derive(Clone)]
pub struct GlossaryStore {
    kv: Arc<dyn KvStore>,
    key: String,
    ttl: Duration,
    cache: Arc<Mutex<Option<CachedSnapshot>>>,
}

impl GlossaryStore {
    /// Creates a store over the given KV backend.
    ///
    /// # Arguments
    ///
    /// * `kv` - Key-value backend holding the glossary JSON.
    /// * `key` - KV key under which the JSON array is stored.
    /// * `ttl` - How long a cached snapshot stays valid.
    pub fn new(kv: Arc<dyn KvStore>, key: &str, ttl: Duration) -> Self {
        Self {
            kv,
            key: key.to_string(),
            ttl,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the glossary, served from cache when the snapshot is younger
    /// than the TTL.
    pub async fn load(&self) -> Result<Vec<GlossaryEntry>> {
        {
            let cache = self.cache.lock().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.at.elapsed() < self.ttl {
                    debug!("Glossary cache hit ({} entries)", snapshot.entries.len());
                    return Ok(snapshot.entries.clone());
                }
            }
        }

        self.load_force().await
    }

    /// Fetches the glossary from the KV store, bypassing the cache.
    ///
    /// An absent key is initialized to an empty array. Malformed stored JSON
    /// degrades to the empty collection instead of failing the caller.
    pub async fn load_force(&self) -> Result<Vec<GlossaryEntry>> {
        let raw = self.kv.get_raw(&self.key).await?;

        let entries = match raw {
            None => {
                info!("Glossary key '{}' absent, initializing empty", self.key);
                self.kv.set_raw(&self.key, "[]").await?;
                Vec::new()
            }
            Some(raw) => match serde_json::from_str::<Vec<RawGlossaryEntry>>(&raw) {
                Ok(items) => normalize(items),
                Err(e) => {
                    warn!("Stored glossary JSON is malformed, treating as empty: {}", e);
                    Vec::new()
                }
            },
        };

        self.update_cache(entries.clone()).await;
        Ok(entries)
    }

    /// Normalizes and writes the full collection, replacing any prior value.
    /// The read cache is refreshed on success (write-through).
    pub async fn save(&self, entries: Vec<RawGlossaryEntry>) -> Result<Vec<GlossaryEntry>> {
        let normalized = normalize(entries);
        let json = serde_json::to_string(&normalized)?;
        self.kv.set_raw(&self.key, &json).await?;

        self.update_cache(normalized.clone()).await;
        Ok(normalized)
    }

    /// Merges a single entry into the collection by key and saves.
    pub async fn upsert(&self, entry: RawGlossaryEntry) -> Result<Vec<GlossaryEntry>> {
        let mut items: Vec<RawGlossaryEntry> = self
            .load_force()
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        items.push(entry);
        self.save(items).await
    }

    /// Removes the entry with the given key, if present, and saves.
    pub async fn delete(&self, zh: &str) -> Result<Vec<GlossaryEntry>> {
        let items: Vec<RawGlossaryEntry> = self
            .load_force()
            .await?
            .into_iter()
            .filter(|e| e.zh != zh)
            .map(Into::into)
            .collect();
        self.save(items).await
    }

    /// Imports a batch of entries.
    ///
    /// `Replace` stores the normalized batch verbatim; `Append` merges it
    /// into the current collection with incoming entries winning conflicts.
    pub async fn import(
        &self,
        items: Vec<RawGlossaryEntry>,
        mode: ImportMode,
    ) -> Result<Vec<GlossaryEntry>> {
        match mode {
            ImportMode::Replace => self.save(items).await,
            ImportMode::Append => {
                let mut merged: Vec<RawGlossaryEntry> = self
                    .load_force()
                    .await?
                    .into_iter()
                    .map(Into::into)
                    .collect();
                merged.extend(items);
                self.save(merged).await
            }
        }
    }

    /// Clears the whole collection.
    pub async fn reset(&self) -> Result<()> {
        self.save(Vec::new()).await?;
        Ok(())
    }

    async fn update_cache(&self, entries: Vec<GlossaryEntry>) {
        let mut cache = self.cache.lock().await;
        *cache = Some(CachedSnapshot {
            at: Instant::now(),
            entries,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::testing::MemoryKv;

    fn raw(zh: &str, vi: &str) -> RawGlossaryEntry {
        RawGlossaryEntry {
            zh: zh.to_string(),
            vi: Some(vi.to_string()),
            ..Default::default()
        }
    }

    fn store() -> GlossaryStore {
        GlossaryStore::new(
            Arc::new(MemoryKv::new()),
            "family_glossary_v1",
            Duration::from_secs(20),
        )
    }

    #[test]
    fn normalize_dedups_last_write_wins() {
        let out = normalize(vec![raw("晚安", "X"), raw("晚安", "ngủ ngon nha")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].vi, "ngủ ngon nha");
    }

    #[test]
    fn normalize_preserves_first_occurrence_order() {
        let out = normalize(vec![raw("a", "1"), raw("b", "2"), raw("a", "3")]);
        assert_eq!(out[0].zh, "a");
        assert_eq!(out[0].vi, "3");
        assert_eq!(out[1].zh, "b");
    }

    #[test]
    fn normalize_drops_empty_key_keeps_empty_value() {
        let out = normalize(vec![raw("  ", "x"), raw("吃飯", "  ")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].zh, "吃飯");
        assert_eq!(out[0].vi, "");
    }

    #[test]
    fn normalize_coerces_legacy_en_field() {
        let entry = RawGlossaryEntry {
            zh: "健保卡".to_string(),
            vi: None,
            en: Some("thẻ bảo hiểm y tế".to_string()),
            ..Default::default()
        };
        let out = normalize(vec![entry]);
        assert_eq!(out[0].vi, "thẻ bảo hiểm y tế");
    }

    #[test]
    fn normalize_cleans_tags() {
        let entry = RawGlossaryEntry {
            tags: vec!["  food ".to_string(), "".to_string(), "food".to_string()],
            ..raw("飯", "cơm")
        };
        let out = normalize(vec![entry]);
        assert_eq!(out[0].tags, vec!["food"]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(vec![raw(" a ", " 1 "), raw("b", "2"), raw("a", "3")]);
        let twice = normalize(once.clone().into_iter().map(Into::into).collect());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn load_initializes_absent_key_to_empty() {
        let kv = Arc::new(MemoryKv::new());
        let store = GlossaryStore::new(kv.clone(), "k", Duration::from_secs(20));

        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(kv.get_raw("k").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn malformed_stored_json_degrades_to_empty() {
        let kv = Arc::new(MemoryKv::new());
        kv.seed("k", "{not json");
        let store = GlossaryStore::new(kv, "k", Duration::from_secs(20));

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_twice_keeps_last_entry() {
        let store = store();
        store.upsert(raw("A", "X")).await.unwrap();
        store.upsert(raw("A", "Y")).await.unwrap();

        let items = store.load().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].vi, "Y");
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = store();
        store.upsert(raw("a", "1")).await.unwrap();
        store.upsert(raw("b", "2")).await.unwrap();
        store.delete("a").await.unwrap();

        let items = store.load().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].zh, "b");
    }

    #[tokio::test]
    async fn import_replace_discards_existing() {
        let store = store();
        store.upsert(raw("old", "1")).await.unwrap();
        store
            .import(vec![raw("new", "2")], ImportMode::Replace)
            .await
            .unwrap();

        let items = store.load().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].zh, "new");
    }

    #[tokio::test]
    async fn import_append_merges_incoming_wins() {
        let store = store();
        store.upsert(raw("a", "old")).await.unwrap();
        store
            .import(vec![raw("a", "new"), raw("b", "2")], ImportMode::Append)
            .await
            .unwrap();

        let items = store.load().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].vi, "new");
    }

    #[tokio::test]
    async fn reset_then_load_is_empty() {
        let store = store();
        store.upsert(raw("a", "1")).await.unwrap();
        store.reset().await.unwrap();

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_reimport_replace_round_trips() {
        let store = store();
        store.upsert(raw("早安", "chào buổi sáng")).await.unwrap();
        store.upsert(raw("晚安", "ngủ ngon nha")).await.unwrap();

        let exported = store.load().await.unwrap();
        let reimported = store
            .import(
                exported.clone().into_iter().map(Into::into).collect(),
                ImportMode::Replace,
            )
            .await
            .unwrap();
        assert_eq!(exported, reimported);
    }

    #[tokio::test]
    async fn save_is_write_through_visible_within_ttl() {
        let store = store();
        store.load().await.unwrap();
        store.upsert(raw("a", "1")).await.unwrap();

        // Within the TTL window; write-through means the save is visible.
        let items = store.load().await.unwrap();
        assert_eq!(items.len(), 1);
    }
}
