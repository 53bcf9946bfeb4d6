use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("malformed setup stored under {key}: {source}")]
    MalformedSetup {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed legacy collection stored under {key}: {source}")]
    MalformedLegacyCollection {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::MalformedSetup { key, .. } | Self::MalformedLegacyCollection { key, .. } => key,
        }
    }
}

/// Storage key suffix derived from a setup name.
///
/// The suffix is the 128-bit XXH3 digest of the UTF-8 name rendered as 32
/// lowercase hex characters. Names are never escaped, so any string (the
/// empty one included) maps to a key. Two distinct names sharing a digest is
/// accepted as a residual risk; nothing here detects it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetupHash(String);

impl SetupHash {
    pub const WIDTH: usize = 32;

    #[must_use]
    pub fn of_name(name: &str) -> Self {
        Self(hex::encode(xxh3_128(name.as_bytes()).to_be_bytes()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SetupHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum StackCompare {
    None,
    Standard,
    GreaterThan,
    LessThan,
}

fn default_quantity() -> i32 {
    1
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_quantity(quantity: &i32) -> bool {
    *quantity == 1
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// One slot of a setup container. `name` is display-only: it is resolved from
/// `id` every time a setup is loaded and is never written in the current format.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetupItem {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default)]
    pub stack_compare: Option<StackCompare>,
}

impl SetupItem {
    #[must_use]
    pub fn new(id: i32, quantity: i32) -> Self {
        Self {
            id,
            name: String::new(),
            quantity,
            fuzzy: false,
            stack_compare: None,
        }
    }
}

/// A user-authored inventory setup.
///
/// The serde shape here is the legacy V1 blob layout, where whole setups were
/// stored as one JSON array. The current per-setup format is [`SetupRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventorySetup {
    pub name: String,
    #[serde(default)]
    pub inventory: Vec<SetupItem>,
    #[serde(default)]
    pub equipment: Vec<SetupItem>,
    #[serde(rename = "rune_pouch", default)]
    pub rune_pouch: Option<Vec<SetupItem>>,
    #[serde(default)]
    pub bolt_pouch: Option<Vec<SetupItem>>,
    #[serde(default)]
    pub quiver: Option<Vec<SetupItem>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub additional_filtered_items: Option<BTreeMap<i32, SetupItem>>,
    #[serde(default)]
    pub highlight_color: Option<String>,
    #[serde(default)]
    pub highlight_difference: bool,
    #[serde(default)]
    pub filter_bank: bool,
    #[serde(default)]
    pub unordered_highlight: bool,
    #[serde(default)]
    pub spellbook: i32,
    #[serde(default)]
    pub favorite: bool,
}

impl InventorySetup {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inventory: Vec::new(),
            equipment: Vec::new(),
            rune_pouch: None,
            bolt_pouch: None,
            quiver: None,
            notes: None,
            additional_filtered_items: None,
            highlight_color: None,
            highlight_difference: false,
            filter_bank: false,
            unordered_highlight: false,
            spellbook: 0,
            favorite: false,
        }
    }

    #[must_use]
    pub fn hash(&self) -> SetupHash {
        SetupHash::of_name(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ItemRecord {
    pub id: i32,
    #[serde(
        rename = "q",
        default = "default_quantity",
        skip_serializing_if = "is_default_quantity"
    )]
    pub quantity: i32,
    #[serde(rename = "f", default, skip_serializing_if = "is_false")]
    pub fuzzy: bool,
    #[serde(rename = "sc", default, skip_serializing_if = "Option::is_none")]
    pub stack_compare: Option<StackCompare>,
}

impl From<&SetupItem> for ItemRecord {
    fn from(item: &SetupItem) -> Self {
        Self {
            id: item.id,
            quantity: item.quantity,
            fuzzy: item.fuzzy,
            stack_compare: item.stack_compare,
        }
    }
}

impl From<ItemRecord> for SetupItem {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.id,
            name: String::new(),
            quantity: record.quantity,
            fuzzy: record.fuzzy,
            stack_compare: record.stack_compare,
        }
    }
}

/// Current on-disk shape of a single setup, shared by the V2 blob and the
/// per-setup V3 keys. Absent optional fields are omitted when encoding.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SetupRecord {
    pub name: String,
    #[serde(rename = "inv", default)]
    pub inventory: Vec<ItemRecord>,
    #[serde(rename = "eq", default)]
    pub equipment: Vec<ItemRecord>,
    #[serde(rename = "rp", default, skip_serializing_if = "Option::is_none")]
    pub rune_pouch: Option<Vec<ItemRecord>>,
    #[serde(rename = "bp", default, skip_serializing_if = "Option::is_none")]
    pub bolt_pouch: Option<Vec<ItemRecord>>,
    #[serde(rename = "qv", default, skip_serializing_if = "Option::is_none")]
    pub quiver: Option<Vec<ItemRecord>>,
    #[serde(rename = "notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "afi", default, skip_serializing_if = "Option::is_none")]
    pub additional_filtered_items: Option<BTreeMap<i32, ItemRecord>>,
    #[serde(rename = "hc", default, skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<String>,
    #[serde(rename = "hd", default, skip_serializing_if = "is_false")]
    pub highlight_difference: bool,
    #[serde(rename = "fb", default, skip_serializing_if = "is_false")]
    pub filter_bank: bool,
    #[serde(rename = "uh", default, skip_serializing_if = "is_false")]
    pub unordered_highlight: bool,
    #[serde(rename = "sb", default, skip_serializing_if = "is_zero")]
    pub spellbook: i32,
    #[serde(rename = "fav", default, skip_serializing_if = "is_false")]
    pub favorite: bool,
}

fn records_from(items: &[SetupItem]) -> Vec<ItemRecord> {
    items.iter().map(ItemRecord::from).collect()
}

fn items_from(records: Vec<ItemRecord>) -> Vec<SetupItem> {
    records.into_iter().map(SetupItem::from).collect()
}

fn keyed_records(items: &BTreeMap<i32, SetupItem>) -> BTreeMap<i32, ItemRecord> {
    items
        .iter()
        .map(|(id, item)| (*id, ItemRecord::from(item)))
        .collect()
}

fn keyed_items(records: BTreeMap<i32, ItemRecord>) -> BTreeMap<i32, SetupItem> {
    records
        .into_iter()
        .map(|(id, record)| (id, SetupItem::from(record)))
        .collect()
}

impl SetupRecord {
    #[must_use]
    pub fn from_setup(setup: &InventorySetup) -> Self {
        Self {
            name: setup.name.clone(),
            inventory: records_from(&setup.inventory),
            equipment: records_from(&setup.equipment),
            rune_pouch: setup.rune_pouch.as_deref().map(records_from),
            bolt_pouch: setup.bolt_pouch.as_deref().map(records_from),
            quiver: setup.quiver.as_deref().map(records_from),
            notes: setup.notes.clone(),
            additional_filtered_items: setup.additional_filtered_items.as_ref().map(keyed_records),
            highlight_color: setup.highlight_color.clone(),
            highlight_difference: setup.highlight_difference,
            filter_bank: setup.filter_bank,
            unordered_highlight: setup.unordered_highlight,
            spellbook: setup.spellbook,
            favorite: setup.favorite,
        }
    }

    #[must_use]
    pub fn into_setup(self) -> InventorySetup {
        InventorySetup {
            name: self.name,
            inventory: items_from(self.inventory),
            equipment: items_from(self.equipment),
            rune_pouch: self.rune_pouch.map(items_from),
            bolt_pouch: self.bolt_pouch.map(items_from),
            quiver: self.quiver.map(items_from),
            notes: self.notes,
            additional_filtered_items: self.additional_filtered_items.map(keyed_items),
            highlight_color: self.highlight_color,
            highlight_difference: self.highlight_difference,
            filter_bank: self.filter_bank,
            unordered_highlight: self.unordered_highlight,
            spellbook: self.spellbook,
            favorite: self.favorite,
        }
    }
}

/// Encode one setup in the current per-setup format.
///
/// # Errors
/// Returns an error when serialization fails.
pub fn encode_setup(setup: &InventorySetup) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SetupRecord::from_setup(setup))
}

/// Decode one setup stored in the current per-setup format under `key`.
///
/// # Errors
/// Returns [`PersistenceError::MalformedSetup`] when `raw` is not a valid record.
pub fn decode_setup(key: &str, raw: &str) -> Result<InventorySetup, PersistenceError> {
    serde_json::from_str::<SetupRecord>(raw)
        .map(SetupRecord::into_setup)
        .map_err(|source| PersistenceError::MalformedSetup {
            key: key.to_string(),
            source,
        })
}

/// A named group of setups. Members are referenced by setup name, not owned.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct InventorySetupsSection {
    pub name: String,
    #[serde(rename = "isMaximized", default)]
    pub maximized: bool,
    #[serde(default)]
    pub setups: Vec<String>,
}

impl InventorySetupsSection {
    #[must_use]
    pub fn new(name: impl Into<String>, setups: Vec<String>) -> Self {
        Self {
            name: name.into(),
            maximized: true,
            setups,
        }
    }

    /// Drop repeated member names (first occurrence wins) and any member for
    /// which `exists` returns false. Returns the number of entries removed.
    pub fn reconcile_members(&mut self, exists: impl Fn(&str) -> bool) -> usize {
        let before = self.setups.len();
        let mut seen = HashSet::with_capacity(before);
        self.setups.retain(|name| seen.insert(name.clone()) && exists(name));
        before - self.setups.len()
    }
}

/// Domain lookups consulted while a freshly loaded setup is prepared for use.
pub trait ItemEnricher {
    /// Rune pouch contents implied by the inventory, if it carries a rune pouch.
    fn rune_pouch(&self, inventory: &[SetupItem]) -> Option<Vec<SetupItem>>;

    /// Bolt pouch contents implied by the inventory, if it carries a bolt pouch.
    fn bolt_pouch(&self, inventory: &[SetupItem]) -> Option<Vec<SetupItem>>;

    /// Quiver contents implied by inventory and equipment together.
    fn quiver(&self, inventory: &[SetupItem], equipment: &[SetupItem]) -> Option<Vec<SetupItem>>;

    /// Display name for an item id.
    fn item_name(&self, item_id: i32) -> String;
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    fn mk_setup(name: &str) -> InventorySetup {
        let mut setup = InventorySetup::new(name);
        setup.inventory = vec![SetupItem::new(12_791, 1), SetupItem::new(-1, 0)];
        setup.equipment = vec![SetupItem::new(4151, 1)];
        setup.rune_pouch = Some(vec![SetupItem::new(556, 1000)]);
        setup.notes = Some("bring stams".to_string());
        setup.additional_filtered_items =
            Some(BTreeMap::from([(995, SetupItem::new(995, 10_000))]));
        setup.favorite = true;
        setup
    }

    #[test]
    fn setup_hash_is_fixed_width_lowercase_hex() {
        let lower_hex = |c: char| c.is_ascii_hexdigit() && !c.is_ascii_uppercase();
        for name in ["", "Zulrah", "ünïcödé 🗡", "a.b/c\\d\"e"] {
            let hash = SetupHash::of_name(name);
            assert_eq!(hash.as_str().len(), SetupHash::WIDTH);
            assert!(hash.as_str().chars().all(lower_hex));
        }
    }

    #[test]
    fn setup_hash_separates_similar_names() {
        let hash = SetupHash::of_name;
        assert_ne!(hash("Vorkath"), hash("vorkath"));
        assert_ne!(hash("Vorkath"), hash("Vorkath "));
        assert_ne!(hash(""), hash(" "));
    }

    #[test]
    fn current_format_omits_absent_fields_and_drops_item_names() -> Result<(), serde_json::Error> {
        let mut setup = InventorySetup::new("Barrows");
        let mut item = SetupItem::new(4151, 1);
        item.name = "Abyssal whip".to_string();
        setup.inventory = vec![item];

        let expected = r#"{"name":"Barrows","inv":[{"id":4151}],"eq":[]}"#;
        assert_eq!(encode_setup(&setup)?, expected);
        Ok(())
    }

    #[test]
    fn current_format_preserves_everything_but_names() -> Result<(), PersistenceError> {
        let setup = mk_setup("Zulrah");
        let encoded = match encode_setup(&setup) {
            Ok(encoded) => encoded,
            Err(err) => panic!("encode failed: {err}"),
        };
        let decoded = decode_setup("setupsV3_x", &encoded)?;
        assert_eq!(decoded, setup);
        Ok(())
    }

    #[test]
    fn decode_tolerates_missing_optional_fields() -> Result<(), PersistenceError> {
        let decoded = decode_setup("k", r#"{"name":"Bare"}"#)?;
        assert_eq!(decoded, InventorySetup::new("Bare"));
        Ok(())
    }

    #[test]
    fn decode_reports_offending_key() {
        let err = match decode_setup("setupsV3_abc", "{not json") {
            Ok(setup) => panic!("expected decode failure, got {setup:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, PersistenceError::MalformedSetup { .. }));
        assert_eq!(err.key(), "setupsV3_abc");
        assert!(err.to_string().contains("setupsV3_abc"));
    }

    #[test]
    fn legacy_v1_layout_decodes_long_field_names() -> Result<(), serde_json::Error> {
        let raw = r##"[{
            "name": "Old",
            "inventory": [
                {"id": 385, "name": "Shark", "quantity": 1, "stackCompare": "None"}
            ],
            "equipment": [],
            "rune_pouch": null,
            "boltPouch": [
                {"id": 9144, "name": "Runite bolts", "quantity": 50, "fuzzy": true}
            ],
            "additionalFilteredItems": {
                "995": {"id": 995, "name": "Coins", "quantity": 1}
            },
            "highlightColor": "#ff0000",
            "filterBank": true
        }]"##;
        let setups: Vec<InventorySetup> = serde_json::from_str(raw)?;
        assert_eq!(setups.len(), 1);
        let old = &setups[0];
        assert_eq!(old.inventory[0].stack_compare, Some(StackCompare::None));
        assert_eq!(old.rune_pouch, None);
        assert_eq!(old.bolt_pouch.as_ref().map(Vec::len), Some(1));
        assert!(old.notes.is_none());
        assert!(old.filter_bank);
        assert_eq!(old.highlight_color.as_deref(), Some("#ff0000"));
        let extra = old
            .additional_filtered_items
            .as_ref()
            .and_then(|items| items.get(&995));
        assert_eq!(extra.map(|item| item.name.as_str()), Some("Coins"));
        Ok(())
    }

    #[test]
    fn section_reconcile_dedupes_then_filters_missing() {
        let mut section = InventorySetupsSection::new("Bossing", names(&["A", "A", "B"]));
        let removed = section.reconcile_members(|name| name == "A");
        assert_eq!(section.setups, names(&["A"]));
        assert_eq!(removed, 2);
    }

    #[test]
    fn section_reconcile_keeps_first_occurrence_order() {
        let mut section = InventorySetupsSection::new("Skilling", names(&["C", "A", "C", "B"]));
        section.reconcile_members(|_| true);
        assert_eq!(section.setups, names(&["C", "A", "B"]));
    }

    #[test]
    fn section_json_uses_is_maximized() -> Result<(), serde_json::Error> {
        let section: InventorySetupsSection =
            serde_json::from_str(r#"{"name":"S","isMaximized":false,"setups":["x"]}"#)?;
        assert!(!section.maximized);
        let encoded = serde_json::to_string(&section)?;
        assert!(encoded.contains("\"isMaximized\":false"));
        Ok(())
    }

    proptest! {
        #[test]
        fn property_setup_hash_is_deterministic(name in ".*") {
            let first = SetupHash::of_name(&name);
            let second = SetupHash::of_name(&name);
            prop_assert_eq!(first.as_str().len(), SetupHash::WIDTH);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn property_reconciled_members_are_unique_and_known(
            members in proptest::collection::vec("[a-e]", 0..12),
            known in proptest::collection::hash_set("[a-e]", 0..4),
        ) {
            let mut section = InventorySetupsSection::new("s", members.clone());
            section.reconcile_members(|name| known.contains(name));

            let unique: HashSet<&String> = section.setups.iter().collect();
            prop_assert_eq!(unique.len(), section.setups.len());
            prop_assert!(section.setups.iter().all(|name| known.contains(name)));

            let expected: Vec<String> = {
                let mut seen = HashSet::new();
                members
                    .into_iter()
                    .filter(|m| seen.insert(m.clone()) && known.contains(m))
                    .collect()
            };
            prop_assert_eq!(section.setups, expected);
        }
    }
}
