use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Typed JSON document bound to a single file path
#[derive(Debug, Clone)]
pub struct DocumentStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DocumentStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file yields the default value.
    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Read the document, degrading to the default value on any failure
    pub fn load_or_default(&self) -> T {
        match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                error!("{:#}; using empty document", e);
                T::default()
            }
        }
    }

    /// Serialize and atomically replace the document on disk
    pub fn save(&self, doc: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)
            .with_context(|| format!("Failed to serialize {}", self.path.display()))?;
        write_text_atomic(&self.path, &content)?;
        debug!("Saved {}", self.path.display());
        Ok(())
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write text through a temp file + rename
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("Destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("Destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("Failed to create {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document");
    // Unique per process and call
    let temp_path = parent_dir.join(format!(
        ".{}.tmp-{}-{}-{}",
        file_name,
        std::process::id(),
        Utc::now().timestamp_micros(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temporary file {}", temp_path.display()))?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let store: DocumentStore<Vec<String>> = DocumentStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store: DocumentStore<BTreeMap<String, u32>> =
            DocumentStore::new(dir.path().join("nested").join("doc.json"));
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1);
        store.save(&doc).unwrap();

        assert_eq!(store.load().unwrap().get("a"), Some(&1));
        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_two_handles_write_same_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let writers: Vec<_> = (0..2)
            .map(|n| {
                let store: DocumentStore<Vec<u32>> = DocumentStore::new(&path);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.save(&vec![n, i]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store: DocumentStore<Vec<u32>> = DocumentStore::new(&path);
        assert_eq!(store.load().unwrap().len(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error_but_degrades() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").unwrap();
        let store: DocumentStore<BTreeMap<String, u32>> = DocumentStore::new(&path);
        assert!(store.load().is_err());
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn test_write_into_directory_fails() {
        let dir = tempdir().unwrap();
        assert!(write_text_atomic(dir.path(), "x").is_err());
    }
}
