use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::gateway::RemoteGateway;
use crate::journal::persist::write_verified;
use crate::remote::RemoteError;

pub const ID_CACHE_FILE: &str = "id-map.json";

/// Ids per mapping request.
const MAPPING_BATCH: usize = 100;

/// Legacy ids are the all-digit identifiers of the previous API generation.
pub fn is_legacy_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdCacheFile {
    #[serde(default)]
    mappings: BTreeMap<String, Option<String>>,
}

/// Canonicalizes task ids across the legacy and current encodings.
///
/// Lookups go through a memo cache persisted next to the journal. Both
/// hits and "no mapping" answers are memoized; transient failures are not.
#[derive(Debug, Default)]
pub struct IdNormalizer {
    cache_path: Option<PathBuf>,
    mappings: BTreeMap<String, Option<String>>,
    dirty: bool,
}

impl IdNormalizer {
    /// Normalizer with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(state_dir: &Path) -> Self {
        let cache_path = state_dir.join(ID_CACHE_FILE);
        let mappings = match fs::read_to_string(&cache_path) {
            Ok(text) => match serde_json::from_str::<IdCacheFile>(&text) {
                Ok(file) => file.mappings,
                Err(err) => {
                    tracing::warn!(path = %cache_path.display(), error = %err, "ignoring unreadable id cache");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            cache_path: Some(cache_path),
            mappings,
            dirty: false,
        }
    }

    pub fn cached_len(&self) -> usize {
        self.mappings.len()
    }

    /// Memoized answer for `id`, without touching the network.
    pub fn cached(&self, id: &str) -> Option<Option<&str>> {
        self.mappings.get(id).map(|value| value.as_deref())
    }

    pub fn remember(&mut self, legacy: &str, canonical: Option<&str>) {
        let value = canonical.map(str::to_string);
        if self.mappings.get(legacy) != Some(&value) {
            self.mappings.insert(legacy.to_string(), value);
            self.dirty = true;
        }
    }

    /// Canonical id for a legacy `id`, or `None` when the service has no
    /// mapping. Canonical ids are returned unchanged.
    pub async fn legacy_to_canonical(
        &mut self,
        gateway: &RemoteGateway,
        id: &str,
    ) -> Result<Option<String>, RemoteError> {
        if !is_legacy_id(id) {
            return Ok(Some(id.to_string()));
        }
        if let Some(cached) = self.cached(id) {
            return Ok(cached.map(str::to_string));
        }
        let resolved = self.resolve(gateway, &[id.to_string()]).await?;
        Ok(resolved.get(id).cloned())
    }

    /// Canonical form of `id`, keeping the legacy id when no mapping exists.
    pub async fn canonicalize(
        &mut self,
        gateway: &RemoteGateway,
        id: &str,
    ) -> Result<String, RemoteError> {
        Ok(self
            .legacy_to_canonical(gateway, id)
            .await?
            .unwrap_or_else(|| id.to_string()))
    }

    /// Batched form of [`canonicalize`](Self::canonicalize); the result maps
    /// every input id to its canonical form.
    pub async fn canonicalize_many(
        &mut self,
        gateway: &RemoteGateway,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, RemoteError> {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| is_legacy_id(id) && self.cached(id).is_none())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            self.resolve(gateway, &unknown).await?;
        }
        Ok(ids
            .iter()
            .map(|id| {
                let canonical = match self.cached(id) {
                    Some(Some(mapped)) => mapped.to_string(),
                    _ => id.clone(),
                };
                (id.clone(), canonical)
            })
            .collect())
    }

    async fn resolve(
        &mut self,
        gateway: &RemoteGateway,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, RemoteError> {
        let mut resolved = BTreeMap::new();
        for chunk in ids.chunks(MAPPING_BATCH) {
            let found = gateway.map_legacy_ids(chunk).await?;
            for id in chunk {
                let canonical = found.get(id).cloned();
                self.remember(id, canonical.as_deref());
                if let Some(canonical) = canonical {
                    resolved.insert(id.clone(), canonical);
                }
            }
        }
        Ok(resolved)
    }

    /// Persists the memo cache if it changed.
    pub fn save(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.cache_path else {
            self.dirty = false;
            return Ok(());
        };
        let file = IdCacheFile {
            mappings: self.mappings.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        write_verified(path, &bytes)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn legacy_ids_are_all_digits() {
        assert!(is_legacy_id("123456"));
        assert!(!is_legacy_id("6X7rM8997g3RQmvh"));
        assert!(!is_legacy_id(""));
        assert!(!is_legacy_id("12a"));
    }

    #[test]
    fn cache_persists_across_instances() {
        let temp = TempDir::new().expect("tempdir");
        let mut ids = IdNormalizer::open(temp.path());
        ids.remember("123", Some("abc"));
        ids.remember("456", None);
        ids.save().expect("save");

        let reopened = IdNormalizer::open(temp.path());
        assert_eq!(reopened.cached("123"), Some(Some("abc")));
        assert_eq!(reopened.cached("456"), Some(None));
        assert_eq!(reopened.cached("789"), None);
    }
}
