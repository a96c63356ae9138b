//! Persistence for the relay registry and the reading log
//!
//! The registry is one JSON document replaced atomically on every commit, so
//! a crash leaves either the old or the new registry on disk, never a mix.
//! Readings are appended to a JSON-lines file and never rewritten.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::data::registry::Registry;
use crate::data::types::Reading;
use crate::error::{MeterGuardError, Result};

/// Transactional storage for the relay/group registry
pub trait RegistryStore: Send {
    /// Load the committed registry, `None` when nothing was provisioned yet
    fn load(&mut self) -> Result<Option<Registry>>;

    /// Replace the committed registry as one unit
    fn commit(&mut self, registry: &Registry) -> Result<()>;
}

/// Append-only storage for meter readings
pub trait ReadingStore: Send {
    fn append(&mut self, reading: &Reading) -> Result<()>;

    /// The newest `limit` readings, oldest first
    fn load_recent(&mut self, limit: usize) -> Result<Vec<Reading>>;
}

/// Write `bytes` to `path` via temp file, fsync and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| MeterGuardError::FileWrite { path: temp_path.clone(), source: e })?;

    file.write_all(bytes)
        .map_err(|e| MeterGuardError::FileWrite { path: temp_path.clone(), source: e })?;

    file.sync_all()
        .map_err(|e| MeterGuardError::FileWrite { path: temp_path.clone(), source: e })?;

    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| MeterGuardError::FileWrite { path: path.to_path_buf(), source: e })?;

    Ok(())
}

// ============================================================================
// JSON file backends
// ============================================================================

/// Registry stored as a single JSON document
pub struct JsonRegistryStore {
    path: PathBuf,
}

impl JsonRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonRegistryStore {
    fn load(&mut self) -> Result<Option<Registry>> {
        if !self.path.exists() {
            debug!("No registry found at {:?}", self.path);
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| MeterGuardError::FileRead { path: self.path.clone(), source: e })?;

        let registry: Registry = serde_json::from_str(&contents)?;
        registry.validate()?;

        info!("Loaded registry with {} relays from {:?}", registry.relays().count(), self.path);
        Ok(Some(registry))
    }

    fn commit(&mut self, registry: &Registry) -> Result<()> {
        let json = serde_json::to_vec_pretty(registry)?;
        write_atomic(&self.path, &json)?;
        debug!("Committed registry to {:?}", self.path);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ReadingLine {
    timestamp: chrono::DateTime<chrono::Utc>,
    value_kwh: f64,
}

/// Readings stored one JSON object per line
pub struct JsonlReadingStore {
    path: PathBuf,
}

impl JsonlReadingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// True when the file is non-empty and its last byte is not a newline
fn ends_mid_line(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl ReadingStore for JsonlReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&ReadingLine {
            timestamp: reading.timestamp,
            value_kwh: reading.value,
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MeterGuardError::FileWrite { path: self.path.clone(), source: e })?;

        // A crash mid-append leaves a partial line; close it off so the
        // new record starts on its own line
        let torn = ends_mid_line(&mut file)
            .map_err(|e| MeterGuardError::FileWrite { path: self.path.clone(), source: e })?;
        let mut record = String::with_capacity(line.len() + 2);
        if torn {
            warn!("Terminating partial reading line in {:?}", self.path);
            record.push('\n');
        }
        record.push_str(&line);
        record.push('\n');

        file.write_all(record.as_bytes())
            .map_err(|e| MeterGuardError::FileWrite { path: self.path.clone(), source: e })?;
        file.sync_data()
            .map_err(|e| MeterGuardError::FileWrite { path: self.path.clone(), source: e })?;

        Ok(())
    }

    fn load_recent(&mut self, limit: usize) -> Result<Vec<Reading>> {
        if !self.path.exists() || limit == 0 {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| MeterGuardError::FileRead { path: self.path.clone(), source: e })?;

        let mut recent: VecDeque<Reading> = VecDeque::with_capacity(limit);
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReadingLine>(line) {
                Ok(parsed) => {
                    if recent.len() == limit {
                        recent.pop_front();
                    }
                    recent.push_back(Reading {
                        timestamp: parsed.timestamp,
                        value: parsed.value_kwh,
                    });
                }
                Err(e) => {
                    // A torn final line after power loss is expected
                    warn!("Skipping unreadable reading at {:?}:{}: {}", self.path, line_no + 1, e);
                }
            }
        }

        Ok(recent.into())
    }
}

// ============================================================================
// In-memory backends
// ============================================================================

/// Registry kept in memory; clones share the same contents
#[derive(Clone, Default)]
pub struct MemoryRegistryStore {
    committed: Arc<Mutex<Option<Registry>>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed registry
    pub fn committed(&self) -> Option<Registry> {
        self.committed.lock().clone()
    }

    /// Make subsequent commits fail, simulating a storage fault
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn load(&mut self) -> Result<Option<Registry>> {
        Ok(self.committed.lock().clone())
    }

    fn commit(&mut self, registry: &Registry) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(MeterGuardError::store("commit rejected"));
        }
        *self.committed.lock() = Some(registry.clone());
        Ok(())
    }
}

/// Reading log kept in memory; clones share the same contents
#[derive(Clone, Default)]
pub struct MemoryReadingStore {
    readings: Arc<Mutex<Vec<Reading>>>,
    fail_appends: Arc<AtomicBool>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl ReadingStore for MemoryReadingStore {
    fn append(&mut self, reading: &Reading) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(MeterGuardError::store("append rejected"));
        }
        self.readings.lock().push(reading.clone());
        Ok(())
    }

    fn load_recent(&mut self, limit: usize) -> Result<Vec<Reading>> {
        let readings = self.readings.lock();
        let start = readings.len().saturating_sub(limit);
        Ok(readings[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reading(secs: i64, value: f64) -> Reading {
        Reading {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            value,
        }
    }

    #[test]
    fn test_registry_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonRegistryStore::new(dir.path().join("registry.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_registry_store_commit_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");
        let mut store = JsonRegistryStore::new(&path);

        let mut registry = Registry::provision(&[17, 27]).unwrap();
        registry.set_state(2, true).unwrap();
        store.commit(&registry).unwrap();

        assert!(!path.with_extension("tmp").exists());
        let loaded = JsonRegistryStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_registry_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonRegistryStore::new(&path).load(),
            Err(MeterGuardError::JsonParse(_))
        ));
    }

    #[test]
    fn test_reading_store_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlReadingStore::new(dir.path().join("readings.jsonl"));
        for i in 0..5 {
            store.append(&reading(i, i as f64 * 10.0)).unwrap();
        }

        let recent = store.load_recent(3).unwrap();
        let values: Vec<f64> = recent.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_reading_store_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let mut store = JsonlReadingStore::new(&path);
        store.append(&reading(0, 1.0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"timestamp\":\"2023-").unwrap();
        drop(file);

        let recent = store.load_recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 1.0);
    }

    #[test]
    fn test_append_after_torn_line_starts_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let mut store = JsonlReadingStore::new(&path);
        store.append(&reading(0, 1.0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"timestamp\":\"2023-").unwrap();
        drop(file);

        store.append(&reading(60, 2.0)).unwrap();
        store.append(&reading(120, 3.0)).unwrap();

        let values: Vec<f64> = store.load_recent(10).unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
    }

    #[test]
    fn test_memory_registry_store_failure_injection() {
        let store = MemoryRegistryStore::new();
        let mut handle = store.clone();
        let registry = Registry::provision(&[17]).unwrap();

        store.set_fail_commits(true);
        assert!(handle.commit(&registry).is_err());
        assert!(store.committed().is_none());

        store.set_fail_commits(false);
        handle.commit(&registry).unwrap();
        assert_eq!(store.committed(), Some(registry));
    }
}
