use std::collections::BTreeMap;

use inventory_setups_core::{InventorySetup, ItemEnricher, SetupItem};

fn resolve_names<E: ItemEnricher + ?Sized>(items: &mut [SetupItem], enricher: &E) {
    for item in items {
        item.name = enricher.item_name(item.id);
    }
}

/// Prepare a freshly decoded setup for use.
///
/// Pouch and quiver containers are backfilled only when absent. Missing notes
/// and additional filtered items become empty. Item names are then resolved for
/// the inventory, equipment, both pouches and the additional filtered items.
pub fn process_setup<E: ItemEnricher + ?Sized>(setup: &mut InventorySetup, enricher: &E) {
    if setup.rune_pouch.is_none() {
        setup.rune_pouch = enricher.rune_pouch(&setup.inventory);
    }
    if setup.bolt_pouch.is_none() {
        setup.bolt_pouch = enricher.bolt_pouch(&setup.inventory);
    }
    if setup.quiver.is_none() {
        setup.quiver = enricher.quiver(&setup.inventory, &setup.equipment);
    }
    setup.notes.get_or_insert_with(String::new);
    let additional = setup
        .additional_filtered_items
        .get_or_insert_with(BTreeMap::new);

    for item in additional.values_mut() {
        item.name = enricher.item_name(item.id);
    }
    resolve_names(&mut setup.inventory, enricher);
    resolve_names(&mut setup.equipment, enricher);
    if let Some(rune_pouch) = setup.rune_pouch.as_mut() {
        resolve_names(rune_pouch, enricher);
    }
    if let Some(bolt_pouch) = setup.bolt_pouch.as_mut() {
        resolve_names(bolt_pouch, enricher);
    }
}
