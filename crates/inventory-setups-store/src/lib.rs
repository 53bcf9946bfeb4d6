//! Persistence for inventory setups and their sections on top of a flat,
//! group-scoped string key-value store.
//!
//! Setups live one per key under `setupsV3_<hash>` with a separate order list;
//! older single-blob formats are migrated forward on load.

use anyhow::{Context, Result};
use inventory_setups_core::{InventorySetup, InventorySetupsSection, ItemEnricher};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod config_store;
pub mod enrich;
pub mod migration;
pub mod sections;
pub mod setups;

pub use config_store::{whole_key, ConfigStore, MemoryConfigStore, SqliteConfigStore};
pub use migration::{MigrationReport, MigrationStatus, MigrationStep};
pub use sections::SetupIndex;

pub mod keys {
    pub const MIGRATED_V2: &str = "migratedV2";
    pub const MIGRATED_V3: &str = "migratedV3";
    /// Legacy V1: every setup in one JSON array.
    pub const SETUPS_V1: &str = "setups";
    /// Legacy V2: every setup in one JSON array, current field shapes.
    pub const SETUPS_V2: &str = "setupsV2";
    pub const SETUPS_V3_PREFIX: &str = "setupsV3_";
    pub const SETUPS_ORDER_V3: &str = "setupsOrderV3";
    pub const SECTIONS: &str = "sections";
}

pub const DEFAULT_GROUP: &str = "inventorysetups";

/// What to do with the raw V2 blob once V3 migration has completed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LegacyV2Policy {
    #[default]
    Retain,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub group: String,
    pub legacy_v2_policy: LegacyV2Policy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            legacy_v2_policy: LegacyV2Policy::default(),
        }
    }
}

impl PersistenceConfig {
    /// # Errors
    /// Returns an error when `raw` is not a valid config document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse persistence config")
    }
}

/// Collections rebuilt by [`PersistentDataManager::load_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedState {
    pub setups: Vec<InventorySetup>,
    pub sections: Vec<InventorySetupsSection>,
    pub index: SetupIndex,
    pub migration: MigrationReport,
}

pub struct PersistentDataManager<S, E> {
    store: S,
    enricher: E,
    config: PersistenceConfig,
}

impl<S: ConfigStore, E: ItemEnricher> PersistentDataManager<S, E> {
    pub fn new(store: S, enricher: E, config: PersistenceConfig) -> Self {
        Self {
            store,
            enricher,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Migrate legacy data, then rebuild setups and sections from the store.
    ///
    /// Every call returns freshly built collections; nothing is carried over
    /// from a previous load.
    ///
    /// # Errors
    /// Returns an error when the store fails, a migration step fails, or any
    /// stored setup cannot be decoded.
    pub fn load_config(&mut self) -> Result<LoadedState> {
        let migration = migration::migrate(&mut self.store, &self.config)?;
        let group = self.config.group.as_str();

        let mut loaded = setups::load_setups(&self.store, group)?;
        for setup in &mut loaded {
            enrich::process_setup(setup, &self.enricher);
        }
        let mut index = SetupIndex::from_setups(&loaded);

        let mut loaded_sections = sections::load_sections(&self.store, group)?;
        sections::reconcile_sections(&mut loaded_sections, &mut index);

        debug!(
            setups = loaded.len(),
            sections = loaded_sections.len(),
            "loaded inventory setups"
        );
        Ok(LoadedState {
            setups: loaded,
            sections: loaded_sections,
            index,
            migration,
        })
    }

    /// Write whichever collections are given.
    ///
    /// # Errors
    /// Returns an error when encoding fails or the store rejects a write.
    pub fn update_config(
        &mut self,
        setups: Option<&[InventorySetup]>,
        sections: Option<&[InventorySetupsSection]>,
    ) -> Result<()> {
        if let Some(setups) = setups {
            self.save_setups(setups)?;
        }
        if let Some(sections) = sections {
            self.save_sections(sections)?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when encoding fails or the store rejects a write.
    pub fn save_setups(&mut self, setups: &[InventorySetup]) -> Result<()> {
        setups::save_setups(&mut self.store, &self.config.group, setups)?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when encoding fails or the store rejects the write.
    pub fn save_sections(&mut self, sections: &[InventorySetupsSection]) -> Result<()> {
        sections::save_sections(&mut self.store, &self.config.group, sections)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn migration_status(&self) -> Result<MigrationStatus> {
        migration::status(&self.store, &self.config.group)
    }
}
