use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_yaml::Value;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Failed to read document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    /// Vault-relative path using `/` separators.
    pub path: String,
    pub modified_at: DateTime<Utc>,
}

/// Result of listing the collection. Entries that could not be listed are
/// skipped and counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentListing {
    pub documents: Vec<DocumentHandle>,
    pub failures: usize,
}

/// Read-only view of the note collection.
pub trait DocumentStore: Send + Sync {
    fn list_documents(&self) -> Result<DocumentListing, DocumentError>;

    fn read(&self, path: &str) -> Result<String, DocumentError>;

    fn frontmatter_field(&self, path: &str, key: &str) -> Result<Option<String>, DocumentError> {
        let text = self.read(path)?;
        Ok(front_matter_field(&text, key))
    }

    /// Resolves a durable note identifier (stored in front matter) to its current path.
    fn find_by_note_id(&self, key: &str, note_id: &str) -> Result<Option<String>, DocumentError> {
        for handle in self.list_documents()?.documents {
            match self.frontmatter_field(&handle.path, key) {
                Ok(Some(value)) if value == note_id => return Ok(Some(handle.path)),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %handle.path, error = %err, "skipping unreadable document");
                }
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Error)]
pub enum FrontMatterError {
    #[error("Missing front matter delimiter")]
    MissingFrontMatter,
    #[error("Missing closing --- for front matter")]
    MissingFrontMatterEnd,
}

pub fn split_front_matter(text: &str) -> Result<(String, String), FrontMatterError> {
    if !text.starts_with("---") {
        return Err(FrontMatterError::MissingFrontMatter);
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || lines[0].trim() != "---" {
        return Err(FrontMatterError::MissingFrontMatter);
    }
    let mut end_idx = None;
    for (idx, line) in lines.iter().enumerate().skip(1) {
        if line.trim() == "---" {
            end_idx = Some(idx);
            break;
        }
    }
    let end_idx = end_idx.ok_or(FrontMatterError::MissingFrontMatterEnd)?;
    let front = lines[1..end_idx].join("\n");
    let body = lines[end_idx + 1..].join("\n");
    Ok((front, body))
}

/// Reads one scalar front matter field; documents without front matter have none.
pub fn front_matter_field(text: &str, key: &str) -> Option<String> {
    let (front, _) = split_front_matter(text).ok()?;
    parse_front_matter(&front)
        .get(key)
        .and_then(value_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_front_matter(front: &str) -> HashMap<String, Value> {
    if let Ok(Value::Mapping(map)) = serde_yaml::from_str::<Value>(front) {
        let mut data = HashMap::new();
        for (key, value) in map {
            if let Some(key_str) = value_to_string(&key) {
                data.insert(key_str, value);
            }
        }
        if !data.is_empty() {
            return data;
        }
    }
    parse_front_matter_loose(front)
}

// Editors leave half-valid YAML behind; fall back to `key: value` lines.
fn parse_front_matter_loose(front: &str) -> HashMap<String, Value> {
    let mut data = HashMap::new();
    for line in front.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || line.starts_with([' ', '\t']) {
            continue;
        }
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest.trim().trim_matches(|c| c == '"' || c == '\'');
        if value.is_empty() {
            continue;
        }
        data.insert(key.trim().to_string(), Value::String(value.to_string()));
    }
    data
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(val) => Some(val.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(val) => Some(val.to_string()),
        Value::Null => None,
        _ => serde_yaml::to_string(value).ok().map(|s| s.trim().to_string()),
    }
}

/// Markdown files under a vault directory. Dot-directories (`.obsidian`,
/// `.tasksync`, `.git`) are skipped.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

impl DocumentStore for FsDocumentStore {
    fn list_documents(&self) -> Result<DocumentListing, DocumentError> {
        let mut handles = Vec::new();
        let mut failures = 0;
        let walker = WalkDir::new(&self.root).into_iter().filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        path = ?err.path(),
                        error = %err,
                        "skipping vault entry that could not be listed"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map(|ext| ext != "md").unwrap_or(true) {
                continue;
            }
            let Some(rel) = self.relative(path) else {
                continue;
            };
            let modified_at = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
            handles.push(DocumentHandle {
                path: rel,
                modified_at,
            });
        }
        handles.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(DocumentListing {
            documents: handles,
            failures,
        })
    }

    fn read(&self, path: &str) -> Result<String, DocumentError> {
        fs::read_to_string(self.absolute(path)).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DocumentError::NotFound(path.to_string())
            } else {
                DocumentError::Io {
                    path: path.to_string(),
                    source,
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct MemoryDocument {
    text: String,
    modified_at: DateTime<Utc>,
}

/// In-memory note collection for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<String, MemoryDocument>>,
    reads: Mutex<usize>,
    failing_reads: Mutex<BTreeSet<String>>,
    list_failures: Mutex<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, text: &str, modified_at: DateTime<Utc>) {
        let mut docs = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        docs.insert(
            path.to_string(),
            MemoryDocument {
                text: text.to_string(),
                modified_at,
            },
        );
    }

    pub fn remove(&self, path: &str) -> bool {
        let mut docs = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        docs.remove(path).is_some()
    }

    /// Moves a document to a new path, keeping its content.
    pub fn rename(&self, from: &str, to: &str, modified_at: DateTime<Utc>) -> bool {
        let mut docs = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match docs.remove(from) {
            Some(mut doc) => {
                doc.modified_at = modified_at;
                docs.insert(to.to_string(), doc);
                true
            }
            None => false,
        }
    }

    /// Makes every read of `path` fail as if permission were denied, while
    /// the document stays listed.
    pub fn fail_reads(&self, path: &str) {
        match self.failing_reads.lock() {
            Ok(mut guard) => guard.insert(path.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(path.to_string()),
        };
    }

    pub fn clear_failures(&self) {
        match self.failing_reads.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        self.set_list_failures(0);
    }

    /// Entries every listing reports as skipped.
    pub fn set_list_failures(&self, count: usize) {
        match self.list_failures.lock() {
            Ok(mut guard) => *guard = count,
            Err(poisoned) => *poisoned.into_inner() = count,
        }
    }

    /// Number of `read` calls served so far.
    pub fn read_count(&self) -> usize {
        match self.reads.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn list_documents(&self) -> Result<DocumentListing, DocumentError> {
        let failures = match self.list_failures.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let docs = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let documents = docs
            .iter()
            .map(|(path, doc)| DocumentHandle {
                path: path.clone(),
                modified_at: doc.modified_at,
            })
            .collect();
        Ok(DocumentListing {
            documents,
            failures,
        })
    }

    fn read(&self, path: &str) -> Result<String, DocumentError> {
        match self.reads.lock() {
            Ok(mut guard) => *guard += 1,
            Err(poisoned) => *poisoned.into_inner() += 1,
        }
        let failing = match self.failing_reads.lock() {
            Ok(guard) => guard.contains(path),
            Err(poisoned) => poisoned.into_inner().contains(path),
        };
        if failing {
            return Err(DocumentError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }
        let docs = match self.documents.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        docs.get(path)
            .map(|doc| doc.text.clone())
            .ok_or_else(|| DocumentError::NotFound(path.to_string()))
    }
}
