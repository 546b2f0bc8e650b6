//! Config entry persistence.
//! An entry is stored as a JSON envelope `{ version, title, data }`.
//! `JsonFileStore` writes a temp file in the target directory and renames it over the entry, so a crash never
//! leaves a half-written entry and a failed write leaves no temp file behind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use crate::config::ConfigRecord;

/// One persisted config entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub version: u32,
    #[serde(default)]
    pub title: String,
    pub data: ConfigRecord,
}

/// Storage backend for a single config entry.
pub trait ConfigStore {
    fn load(&self) -> Result<StoredEntry>;

    /// Replaces the stored data, version and title in one write.
    fn update(&self, record: &ConfigRecord, version: u32, title: &str) -> Result<()>;
}

// *************** JSON file ***************

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<StoredEntry> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config entry: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config entry: {}", self.path.display()))
    }

    fn update(&self, record: &ConfigRecord, version: u32, title: &str) -> Result<()> {
        let entry = StoredEntry {
            version,
            title: title.to_string(),
            data: record.clone(),
        };
        let json = serde_json::to_string_pretty(&entry).context("Failed to serialize config entry")?;

        let dir = self.dir();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        // dropped (and deleted) on every early return below
        let mut tmp_file = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp_file
            .write_all(json.as_bytes())
            .context("Failed to write config entry temp file")?;
        tmp_file
            .as_file()
            .sync_all()
            .context("Failed to flush config entry to disk")?;

        tmp_file.persist(&self.path).with_context(|| {
            format!("Failed to replace config entry {}", self.path.display())
        })?;

        tracing::debug!("Saved config entry v{} to {}", version, self.path.display());
        Ok(())
    }
}

// *************** In-memory ***************

/// Holds the entry in memory; for embedding and tests.
pub struct MemoryStore {
    entry: Mutex<StoredEntry>,
}

impl MemoryStore {
    pub fn new(entry: StoredEntry) -> Self {
        Self {
            entry: Mutex::new(entry),
        }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<StoredEntry> {
        let entry = self
            .entry
            .lock()
            .map_err(|_| anyhow::anyhow!("Config entry lock poisoned"))?;
        Ok(entry.clone())
    }

    fn update(&self, record: &ConfigRecord, version: u32, title: &str) -> Result<()> {
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| anyhow::anyhow!("Config entry lock poisoned"))?;
        *entry = StoredEntry {
            version,
            title: title.to_string(),
            data: record.clone(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_load_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.json");
        fs::write(
            &path,
            json!({
                "version": 1,
                "title": "Palgate",
                "data": { "phone_number": "555", "device_id": "gate1", "token": "t" }
            })
            .to_string(),
        )
        .unwrap();

        let entry = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.title, "Palgate");
        assert_eq!(entry.data.device_id.as_deref(), Some("gate1"));
    }

    #[test]
    fn test_update_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("entry.json"));
        let record = ConfigRecord {
            phone_number: Some("555".to_string()),
            device_ids: Some(vec![Some("g1".to_string())]),
            ..Default::default()
        };

        store.update(&record, 4, "555").unwrap();
        let entry = store.load().unwrap();

        assert_eq!(entry.version, 4);
        assert_eq!(entry.title, "555");
        assert_eq!(entry.data, record);
        assert_eq!(file_names(&dir.path().join("nested")), ["entry.json"]);
    }

    #[test]
    fn test_failed_update_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory where the entry file should go makes the rename fail
        let path = dir.path().join("entry.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let err = JsonFileStore::new(&path)
            .update(&ConfigRecord::default(), 4, "t")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to replace config entry"));
        assert_eq!(file_names(dir.path()), ["entry.json"]);
    }

    #[test]
    fn test_unparsed_values_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.json");
        let data = json!({
            "phone_number": 972500000000u64,
            "device_ids": [null],
            "token": "t",
            "advanced": { "seconds_to_open": 10 }
        });
        fs::write(
            &path,
            json!({ "version": 3, "title": "Palgate", "data": data }).to_string(),
        )
        .unwrap();

        let store = JsonFileStore::new(&path);
        let entry = store.load().unwrap();
        store.update(&entry.data, entry.version, &entry.title).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["data"], data);
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(format!("{:#}", err).contains("absent.json"));
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::new(&path).load().is_err());
    }

    #[test]
    fn test_memory_store_update() {
        let store = MemoryStore::new(StoredEntry {
            version: 1,
            title: String::new(),
            data: ConfigRecord::default(),
        });
        let record = ConfigRecord {
            token: Some("t".to_string()),
            ..Default::default()
        };
        store.update(&record, 4, "title").unwrap();

        let entry = store.load().unwrap();
        assert_eq!(entry.version, 4);
        assert_eq!(entry.title, "title");
        assert_eq!(entry.data, record);
    }
}
