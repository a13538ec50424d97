use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::KeyValueStore;

/// Key/value store backed by a single JSON object on disk.
///
/// Each write re-reads the file and replays only this instance's pending
/// edits on top of it, so two stores sharing a path keep each other's keys.
/// The file is replaced through a sibling temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    /// `Some` is a write, `None` a delete.
    pending: BTreeMap<String, Option<String>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies pending edits to the current file contents. Edits stay queued
    /// when the write fails and are retried by the next flush.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut entries = self.load();
        for (key, edit) in &self.pending {
            match edit {
                Some(value) => entries.insert(key.clone(), Value::String(value.clone())),
                None => entries.remove(key),
            };
        }
        self.replace_file(&entries)?;
        self.pending.clear();
        Ok(())
    }

    fn stage(&mut self, key: &str, edit: Option<&str>) -> anyhow::Result<()> {
        let current = self.load().get(key).and_then(Value::as_str).map(str::to_string);
        if current.as_deref() == edit && !self.pending.contains_key(key) {
            return Ok(());
        }
        self.pending.insert(key.to_string(), edit.map(str::to_string));
        self.flush()
    }

    /// Missing, unreadable and non-object files all read as empty.
    fn load(&self) -> Map<String, Value> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|value| match value {
                Value::Object(entries) => Some(entries),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn replace_file(&self, entries: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut staged = self.path.clone().into_os_string();
        staged.push(".tmp");
        let staged = PathBuf::from(staged);

        let mut file = File::create(&staged)?;
        file.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&staged, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&mut self, key: &str) -> Option<String> {
        if let Some(edit) = self.pending.get(key) {
            return edit.clone();
        }
        self.load().get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.stage(key, Some(value))
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.stage(key, None)
    }
}
