//! Write-or-delete sync between a workspace and its key/value store.
//!
//! Every call is best effort: a failing store logs a warning and the
//! workspace carries on with its in-memory state.

use platemorph_contracts::assets::ImageAsset;
use platemorph_contracts::attributes::AttributeSelection;
use platemorph_contracts::store::{
    KeyValueStore, ATTRIBUTES_KEY, REFERENCE_KEY, TARGET_KEY, WORKSPACE_KEYS,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::ingest::normalize_bytes;

/// What a store held at startup. Missing or malformed entries come back as
/// empty slots and the default selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    pub reference: Option<ImageAsset>,
    pub target: Option<ImageAsset>,
    pub selection: AttributeSelection,
    /// Keys that were present and well-formed. Assets count only when their
    /// payload still decodes as an image.
    pub restored: Vec<&'static str>,
}

pub fn load_snapshot(store: &mut dyn KeyValueStore) -> WorkspaceSnapshot {
    let mut restored = Vec::new();
    let reference = read_entry(store, REFERENCE_KEY, &mut restored, revalidate_asset);
    let target = read_entry(store, TARGET_KEY, &mut restored, revalidate_asset);
    let selection = read_entry(
        store,
        ATTRIBUTES_KEY,
        &mut restored,
        Ok::<AttributeSelection, anyhow::Error>,
    )
    .unwrap_or_default();
    WorkspaceSnapshot {
        reference,
        target,
        selection,
        restored,
    }
}

fn read_entry<T: DeserializeOwned>(
    store: &mut dyn KeyValueStore,
    key: &'static str,
    restored: &mut Vec<&'static str>,
    validate: impl FnOnce(T) -> anyhow::Result<T>,
) -> Option<T> {
    let raw = store.get(key)?;
    let parsed = serde_json::from_str::<T>(&raw)
        .map_err(anyhow::Error::from)
        .and_then(validate);
    match parsed {
        Ok(value) => {
            restored.push(key);
            Some(value)
        }
        Err(err) => {
            warn!(key, error = %format!("{err:#}"), "ignoring malformed persisted entry");
            None
        }
    }
}

/// Re-runs ingestion over a stored asset so a corrupt payload never reaches
/// a slot. Also fills in a missing aspect ratio.
fn revalidate_asset(asset: ImageAsset) -> anyhow::Result<ImageAsset> {
    let bytes = asset.decode_bytes()?;
    Ok(normalize_bytes(&bytes, Some(&asset.mime_type), &asset.name)?)
}

pub fn sync_persistence(
    store: &mut dyn KeyValueStore,
    reference: Option<&ImageAsset>,
    target: Option<&ImageAsset>,
    selection: &AttributeSelection,
) {
    write_or_delete(store, REFERENCE_KEY, reference);
    write_or_delete(store, TARGET_KEY, target);
    write_or_delete(store, ATTRIBUTES_KEY, Some(selection));
}

pub fn clear_persistence(store: &mut dyn KeyValueStore) {
    for key in WORKSPACE_KEYS {
        if let Err(err) = store.remove(key) {
            warn!(key, error = %format!("{err:#}"), "failed to clear persisted entry");
        }
    }
}

fn write_or_delete<T: Serialize>(store: &mut dyn KeyValueStore, key: &str, value: Option<&T>) {
    let outcome = match value {
        Some(value) => match serde_json::to_string(value) {
            Ok(raw) => store.set(key, &raw),
            Err(err) => Err(err.into()),
        },
        None => store.remove(key),
    };
    if let Err(err) = outcome {
        warn!(key, error = %format!("{err:#}"), "workspace persistence write failed");
    }
}
