use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use inventory_setups_core::{InventorySetup, InventorySetupsSection};
use tracing::{debug, warn};

use crate::config_store::ConfigStore;
use crate::keys::SECTIONS;

/// Name lookups over the most recently loaded setups and sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupIndex {
    positions: HashMap<String, usize>,
    sections: BTreeMap<String, Vec<String>>,
}

impl SetupIndex {
    #[must_use]
    pub fn from_setups(setups: &[InventorySetup]) -> Self {
        let mut index = Self::default();
        for (position, setup) in setups.iter().enumerate() {
            let name = setup.name.clone();
            index.positions.entry(name).or_insert(position);
        }
        index
    }

    #[must_use]
    pub fn contains(&self, setup_name: &str) -> bool {
        self.positions.contains_key(setup_name)
    }

    #[must_use]
    pub fn position(&self, setup_name: &str) -> Option<usize> {
        self.positions.get(setup_name).copied()
    }

    pub fn add_section(&mut self, section: &InventorySetupsSection) {
        self.sections.insert(section.name.clone(), section.setups.clone());
    }

    #[must_use]
    pub fn section_members(&self, section_name: &str) -> Option<&[String]> {
        self.sections.get(section_name).map(Vec::as_slice)
    }

    /// Sections listing `setup_name`, in section-name order.
    #[must_use]
    pub fn sections_containing(&self, setup_name: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|(_, members)| members.iter().any(|member| member == setup_name))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Read the stored sections. Absent or undecodable data reads as no sections.
///
/// # Errors
/// Returns an error only when the store itself fails.
pub fn load_sections<S: ConfigStore>(
    store: &S,
    group: &str,
) -> Result<Vec<InventorySetupsSection>> {
    let raw = store
        .get(group, SECTIONS)
        .with_context(|| format!("failed to read {SECTIONS}"))?;
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(Vec::new());
    };

    match serde_json::from_str::<Option<Vec<InventorySetupsSection>>>(&raw) {
        Ok(sections) => Ok(sections.unwrap_or_default()),
        Err(err) => {
            warn!(key = SECTIONS, error = %err, "ignoring malformed sections");
            Ok(Vec::new())
        }
    }
}

/// Drop duplicate and dangling members from each section and record the result
/// in `index`.
pub fn reconcile_sections(sections: &mut [InventorySetupsSection], index: &mut SetupIndex) {
    for section in sections.iter_mut() {
        let removed = section.reconcile_members(|name| index.contains(name));
        if removed > 0 {
            debug!(section = %section.name, removed, "dropped section members");
        }
        index.add_section(section);
    }
}

/// # Errors
/// Returns an error when encoding fails or the store rejects the write.
pub fn save_sections<S: ConfigStore>(
    store: &mut S,
    group: &str,
    sections: &[InventorySetupsSection],
) -> Result<()> {
    let json = serde_json::to_string(sections).context("failed to encode sections")?;
    store
        .set(group, SECTIONS, &json)
        .with_context(|| format!("failed to write {SECTIONS}"))
}
