use anyhow::{Context, Result};
use inventory_setups_core::{InventorySetup, PersistenceError, SetupRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::config_store::ConfigStore;
use crate::keys::{MIGRATED_V2, MIGRATED_V3, SETUPS_V1, SETUPS_V2};
use crate::setups::save_setups;
use crate::{LegacyV2Policy, PersistenceConfig};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Rewrite the single-blob V1 collection as per-setup keys.
    V1ToV3,
    /// Rewrite the single-blob V2 collection as per-setup keys.
    V2ToV3,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MigrationStatus {
    pub migrated_v2: bool,
    pub migrated_v3: bool,
    pub legacy_v1_present: bool,
    pub legacy_v2_present: bool,
    pub pending: Vec<MigrationStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MigrationReport {
    pub applied: Vec<MigrationStep>,
    pub removed_legacy_v1: bool,
    pub removed_legacy_v2: bool,
}

fn marker_present<S: ConfigStore>(store: &S, group: &str, marker: &str) -> Result<bool> {
    let value = store
        .get(group, marker)
        .with_context(|| format!("failed to read marker {marker}"))?;
    Ok(value.is_some_and(|value| !value.is_empty()))
}

fn set_marker<S: ConfigStore>(store: &mut S, group: &str, marker: &str) -> Result<()> {
    let applied_at = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    store
        .set(group, marker, &applied_at)
        .with_context(|| format!("failed to record marker {marker}"))
}

fn key_present<S: ConfigStore>(store: &S, group: &str, key: &str) -> Result<bool> {
    let value = store
        .get(group, key)
        .with_context(|| format!("failed to read {key}"))?;
    Ok(value.is_some())
}

fn load_legacy_blob<S, T>(store: &S, group: &str, key: &str) -> Result<Vec<T>>
where
    S: ConfigStore,
    T: DeserializeOwned,
{
    let raw = store
        .get(group, key)
        .with_context(|| format!("failed to read {key}"))?;
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    let key = key.to_string();
    let decoded = serde_json::from_str::<Option<Vec<T>>>(&raw)
        .map_err(|source| PersistenceError::MalformedLegacyCollection { key, source })?;
    Ok(decoded.unwrap_or_default())
}

fn load_v1_setups<S: ConfigStore>(store: &S, group: &str) -> Result<Vec<InventorySetup>> {
    load_legacy_blob(store, group, SETUPS_V1)
}

fn load_v2_setups<S: ConfigStore>(store: &S, group: &str) -> Result<Vec<InventorySetup>> {
    let records: Vec<SetupRecord> = load_legacy_blob(store, group, SETUPS_V2)?;
    Ok(records.into_iter().map(SetupRecord::into_setup).collect())
}

/// Report marker state and which steps the next [`migrate`] would run.
///
/// # Errors
/// Returns an error when the store cannot be read.
pub fn status<S: ConfigStore>(store: &S, group: &str) -> Result<MigrationStatus> {
    let migrated_v2 = marker_present(store, group, MIGRATED_V2)?;
    let migrated_v3 = marker_present(store, group, MIGRATED_V3)?;

    let mut pending = Vec::new();
    if !migrated_v2 {
        pending.push(MigrationStep::V1ToV3);
    } else if !migrated_v3 {
        pending.push(MigrationStep::V2ToV3);
    }

    Ok(MigrationStatus {
        migrated_v2,
        migrated_v3,
        legacy_v1_present: key_present(store, group, SETUPS_V1)?,
        legacy_v2_present: key_present(store, group, SETUPS_V2)?,
        pending,
    })
}

/// Bring legacy setup data forward to the per-setup format.
///
/// Each step runs only while its marker is absent, and markers are written
/// after the migrated setups, so a step interrupted partway runs again in full
/// on the next call. The V1 step sets both markers.
///
/// # Errors
/// Returns an error when the store fails or a legacy blob cannot be decoded;
/// markers for the failing step stay unset.
pub fn migrate<S: ConfigStore>(
    store: &mut S,
    config: &PersistenceConfig,
) -> Result<MigrationReport> {
    let group = config.group.as_str();
    let mut report = MigrationReport::default();

    if !marker_present(store, group, MIGRATED_V2)? {
        info!("migrating setups from V1 to V3");
        let legacy = load_v1_setups(store, group)?;
        save_setups(store, group, &legacy).context("failed to write V1 setups as V3")?;
        set_marker(store, group, MIGRATED_V2)?;
        set_marker(store, group, MIGRATED_V3)?;
        info!(setups = legacy.len(), "migrated setups from V1 to V3");
        report.applied.push(MigrationStep::V1ToV3);
    }

    if key_present(store, group, SETUPS_V1)? {
        info!(key = SETUPS_V1, "removing legacy V1 setups key");
        store
            .unset(group, SETUPS_V1)
            .with_context(|| format!("failed to remove {SETUPS_V1}"))?;
        report.removed_legacy_v1 = true;
    }

    if !marker_present(store, group, MIGRATED_V3)? {
        info!("migrating setups from V2 to V3");
        let legacy = load_v2_setups(store, group)?;
        save_setups(store, group, &legacy).context("failed to write V2 setups as V3")?;
        set_marker(store, group, MIGRATED_V3)?;
        info!(setups = legacy.len(), "migrated setups from V2 to V3");
        report.applied.push(MigrationStep::V2ToV3);
    }

    if config.legacy_v2_policy == LegacyV2Policy::Remove
        && marker_present(store, group, MIGRATED_V3)?
        && key_present(store, group, SETUPS_V2)?
    {
        info!(key = SETUPS_V2, "removing legacy V2 setups key");
        store
            .unset(group, SETUPS_V2)
            .with_context(|| format!("failed to remove {SETUPS_V2}"))?;
        report.removed_legacy_v2 = true;
    }

    Ok(report)
}
