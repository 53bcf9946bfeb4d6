use std::collections::{BTreeSet, HashSet};

use anyhow::{anyhow, Context, Result};
use inventory_setups_core::{decode_setup, encode_setup, InventorySetup, SetupHash};
use tracing::{debug, error, info, warn};

use crate::config_store::{whole_key, ConfigStore};
use crate::keys::{SETUPS_ORDER_V3, SETUPS_V3_PREFIX};

fn setup_key(hash: &str) -> String {
    format!("{SETUPS_V3_PREFIX}{hash}")
}

fn stored_hashes<S: ConfigStore>(store: &S, group: &str) -> Result<BTreeSet<String>> {
    let prefix = whole_key(group, SETUPS_V3_PREFIX);
    let keys = store
        .list_keys(&prefix)
        .with_context(|| format!("failed to list setup keys under {prefix}"))?;
    Ok(keys
        .iter()
        .filter_map(|key| key.strip_prefix(&prefix))
        .map(str::to_string)
        .collect())
}

/// Persist `setups` one key per setup and rewrite the order list.
///
/// Keys are recomputed from each setup's current name, so a renamed setup is
/// written under a new key and its old key is removed with the other stale ones.
/// Returns the order list that was written.
///
/// # Errors
/// Returns an error when encoding fails or the store rejects a write.
pub fn save_setups<S: ConfigStore>(
    store: &mut S,
    group: &str,
    setups: &[InventorySetup],
) -> Result<Vec<SetupHash>> {
    let mut stale = stored_hashes(store, group)?;
    let mut written = HashSet::with_capacity(setups.len());
    let mut order = Vec::with_capacity(setups.len());

    for setup in setups {
        let hash = setup.hash();
        let first_copy = written.insert(hash.clone());
        if !first_copy {
            warn!(
                name = %setup.name,
                hash = %hash,
                "duplicate setup name; later copy overwrites earlier"
            );
        }
        stale.remove(hash.as_str());

        let key = setup_key(hash.as_str());
        let data = encode_setup(setup)
            .with_context(|| format!("failed to encode setup {:?}", setup.name))?;
        store
            .set(group, &key, &data)
            .with_context(|| format!("failed to write {key}"))?;

        if first_copy {
            order.push(hash);
        }
    }

    for hash in &stale {
        let key = setup_key(hash);
        debug!(key = %key, "removing setup no longer in collection");
        store
            .unset(group, &key)
            .with_context(|| format!("failed to remove {key}"))?;
    }

    let order_json = serde_json::to_string(&order).context("failed to encode setup order")?;
    store
        .set(group, SETUPS_ORDER_V3, &order_json)
        .with_context(|| format!("failed to write {SETUPS_ORDER_V3}"))?;

    debug!(written = order.len(), stale = stale.len(), "saved setups");
    Ok(order)
}

/// Read the persisted order list. Absent or undecodable lists read as empty.
///
/// # Errors
/// Returns an error only when the store itself fails.
pub fn load_order<S: ConfigStore>(store: &S, group: &str) -> Result<Vec<String>> {
    let raw = store
        .get(group, SETUPS_ORDER_V3)
        .with_context(|| format!("failed to read {SETUPS_ORDER_V3}"))?;
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    match serde_json::from_str::<Option<Vec<String>>>(&raw) {
        Ok(order) => Ok(order.unwrap_or_default()),
        Err(err) => {
            warn!(key = SETUPS_ORDER_V3, error = %err, "ignoring malformed setup order");
            Ok(Vec::new())
        }
    }
}

fn load_setup<S: ConfigStore>(store: &S, group: &str, hash: &str) -> Result<InventorySetup> {
    let key = setup_key(hash);
    let raw = store
        .get(group, &key)
        .with_context(|| format!("failed to read {key}"))?
        .ok_or_else(|| anyhow!("setup key {key} was listed but has no value"))?;

    decode_setup(&key, &raw).map_err(|err| {
        error!(key = %key, error = %err, "failed to decode stored setup");
        anyhow::Error::new(err)
    })
}

/// Rebuild the ordered setup collection from the per-setup keys.
///
/// Setups named by the order list come first, in that order; entries whose key
/// no longer exists are skipped. Setups missing from the order list (left by an
/// interrupted save) follow in ascending hash order so repeated loads agree.
///
/// # Errors
/// Returns an error when the store fails or any stored setup cannot be decoded.
pub fn load_setups<S: ConfigStore>(store: &S, group: &str) -> Result<Vec<InventorySetup>> {
    let mut remaining = stored_hashes(store, group)?;
    let order = load_order(store, group)?;
    let mut setups = Vec::with_capacity(remaining.len());

    for hash in &order {
        if remaining.remove(hash) {
            setups.push(load_setup(store, group, hash)?);
        } else {
            warn!(hash = %hash, "dropping stale setup order entry");
        }
    }

    for hash in &remaining {
        info!(key = %setup_key(hash), "loading setup that was missing from the order key");
        setups.push(load_setup(store, group, hash)?);
    }

    Ok(setups)
}
