//! File-backed conversation persistence.
//!
//! The whole corpus lives in one JSON document. Every operation re-reads the
//! document from disk under a single mutex, so external edits to the file are
//! always observed. Writes go through a temp file + rename so readers never see
//! a partially written document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::errors::PersistenceError;
use crate::persistence::{ConversationData, ConversationPersistence, PersistenceKey};

const PERSISTENCE_DOCUMENT_SCHEMA_VERSION: u32 = 1;

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn persistence_document_schema_version() -> u32 {
    PERSISTENCE_DOCUMENT_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct PersistenceDocument {
    #[serde(default = "persistence_document_schema_version")]
    schema_version: u32,
    #[serde(default)]
    states: BTreeMap<String, String>,
    #[serde(default)]
    data: BTreeMap<String, ConversationData>,
}

impl Default for PersistenceDocument {
    fn default() -> Self {
        Self {
            schema_version: PERSISTENCE_DOCUMENT_SCHEMA_VERSION,
            states: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }
}

/// Durable backend storing every conversation in one JSON file.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>, PersistenceError> {
        self.lock
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned("file persistence"))
    }

    fn read_document(&self) -> Result<PersistenceDocument, PersistenceError> {
        if !self.path.exists() {
            let document = PersistenceDocument::default();
            self.write_document(&document)?;
            tracing::debug!(path = %self.path.display(), "created persistence file");
            return Ok(document);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(PersistenceDocument::default());
        }
        let document: PersistenceDocument =
            serde_json::from_str(&raw).map_err(|source| PersistenceError::Decode {
                path: self.path.clone(),
                source,
            })?;
        if document.schema_version != PERSISTENCE_DOCUMENT_SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchemaVersion {
                path: self.path.clone(),
                found: document.schema_version,
                expected: PERSISTENCE_DOCUMENT_SCHEMA_VERSION,
            });
        }
        Ok(document)
    }

    fn write_document(&self, document: &PersistenceDocument) -> Result<(), PersistenceError> {
        let encoded = serde_json::to_string_pretty(document).map_err(PersistenceError::Encode)?;
        write_text_atomic(&self.path, &encoded)
    }

    fn update_document(
        &self,
        apply: impl FnOnce(&mut PersistenceDocument),
    ) -> Result<(), PersistenceError> {
        let _guard = self.acquire()?;
        let mut document = self.read_document()?;
        apply(&mut document);
        self.write_document(&document)
    }
}

impl ConversationPersistence for FilePersistence {
    fn get_state(&self, key: &PersistenceKey) -> Result<String, PersistenceError> {
        let _guard = self.acquire()?;
        let document = self.read_document()?;
        Ok(document
            .states
            .get(&key.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn set_state(&self, key: &PersistenceKey, state: &str) -> Result<(), PersistenceError> {
        self.update_document(|document| {
            document.states.insert(key.to_string(), state.to_string());
        })
    }

    fn get_data(&self, key: &PersistenceKey) -> Result<ConversationData, PersistenceError> {
        let _guard = self.acquire()?;
        let mut document = self.read_document()?;
        Ok(document.data.remove(&key.to_string()).unwrap_or_default())
    }

    fn set_data(
        &self,
        key: &PersistenceKey,
        data: ConversationData,
    ) -> Result<(), PersistenceError> {
        self.update_document(|document| {
            document.data.insert(key.to_string(), data);
        })
    }
}

fn write_text_atomic(path: &Path, content: &str) -> Result<(), PersistenceError> {
    let io_error = |path: &Path, source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|source| io_error(parent_dir, source))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("telemux-persistence"),
        std::process::id(),
        TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content).map_err(|source| io_error(&temp_path, source))?;
    if let Err(source) = std::fs::rename(&temp_path, path) {
        if let Err(cleanup) = std::fs::remove_file(&temp_path) {
            tracing::warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
        }
        return Err(io_error(path, source));
    }
    Ok(())
}
