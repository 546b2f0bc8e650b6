//! Config entry lifecycle: migrate on load, set up the cover platform, unload, reload.

use anyhow::{Context, Result};

use crate::api::GateClientFactory;
use crate::config::ConfigRecord;
use crate::entity::{EntityHost, setup_covers};
use crate::migration::{MigrationDefaults, migrate};
use crate::store::ConfigStore;

/// Migrates the stored entry if it predates the current schema and persists the result.
/// Returns whether anything was written.
pub fn migrate_entry<S>(store: &S, defaults: &MigrationDefaults) -> Result<bool>
where
    S: ConfigStore + ?Sized,
{
    let entry = store.load()?;
    let outcome = migrate(&entry.data, entry.version, Some(&entry.title), defaults);
    if !outcome.changed {
        return Ok(false);
    }

    let title = outcome.title.unwrap_or(entry.title);
    store
        .update(&outcome.record, outcome.version, &title)
        .context("Failed to persist migrated config entry")?;
    Ok(true)
}

/// Brings the entry up to date, then registers its hub and covers.
/// Returns the record the entities were built from.
pub fn setup_entry<S, H, F>(store: &S, host: &mut H, factory: &F) -> Result<ConfigRecord>
where
    S: ConfigStore + ?Sized,
    H: EntityHost + ?Sized,
    F: GateClientFactory + ?Sized,
{
    migrate_entry(store, &MigrationDefaults::default())?;

    let entry = store.load()?;
    setup_covers(&entry.data, host, factory)?;
    Ok(entry.data)
}

/// Removes the entities belonging to `record`. False when none were loaded.
pub fn unload_entry<H>(host: &mut H, record: &ConfigRecord) -> bool
where
    H: EntityHost + ?Sized,
{
    match record.phone_number.as_deref() {
        Some(phone_number) => host.unload(phone_number),
        None => false,
    }
}

pub fn reload_entry<S, H, F>(store: &S, host: &mut H, factory: &F) -> Result<ConfigRecord>
where
    S: ConfigStore + ?Sized,
    H: EntityHost + ?Sized,
    F: GateClientFactory + ?Sized,
{
    let current = store.load()?;
    unload_entry(host, &current.data);
    setup_entry(store, host, factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CURRENT_VERSION;
    use crate::entity::EntityRegistry;
    use crate::entity::tests::{FakeFactory, v4_record};
    use crate::store::{JsonFileStore, MemoryStore, StoredEntry};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn legacy_store() -> MemoryStore {
        MemoryStore::new(StoredEntry {
            version: 1,
            title: "Palgate".to_string(),
            data: serde_json::from_value(json!({
                "phone_number": "555",
                "device_id": "gate1",
                "token": "t"
            }))
            .unwrap(),
        })
    }

    #[test]
    fn test_migrate_entry_persists_once() {
        let store = legacy_store();

        assert!(migrate_entry(&store, &MigrationDefaults::default()).unwrap());
        let entry = store.load().unwrap();
        assert_eq!(entry.version, CURRENT_VERSION);
        assert_eq!(entry.title, "555");
        assert_eq!(entry.data.device_ids, Some(vec![Some("gate1".to_string())]));

        assert!(!migrate_entry(&store, &MigrationDefaults::default()).unwrap());
        assert_eq!(store.load().unwrap(), entry);
    }

    #[test]
    fn test_migrate_entry_keeps_unparsed_advanced_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.json");
        std::fs::write(
            &path,
            json!({
                "version": 3,
                "title": "Palgate",
                "data": {
                    "phone_number": "555",
                    "device_ids": ["g1"],
                    "token": "t",
                    "token_type": "1",
                    "advanced": { "seconds_to_open": 10 }
                }
            })
            .to_string(),
        )
        .unwrap();
        let store = JsonFileStore::new(&path);

        assert!(migrate_entry(&store, &MigrationDefaults::default()).unwrap());

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["version"], json!(4));
        assert_eq!(written["data"]["advanced"], json!({ "seconds_to_open": 10 }));
        assert_eq!(written["data"]["device_ids"], json!(["g1"]));
    }

    #[test]
    fn test_migrate_entry_with_numeric_phone_number() {
        let store = MemoryStore::new(StoredEntry {
            version: 1,
            title: "Palgate".to_string(),
            data: serde_json::from_value(json!({
                "phone_number": 972500000000u64,
                "device_id": "gate1",
                "token": "t"
            }))
            .unwrap(),
        });

        assert!(migrate_entry(&store, &MigrationDefaults::default()).unwrap());
        let entry = store.load().unwrap();
        assert_eq!(entry.version, CURRENT_VERSION);
        assert_eq!(entry.title, "Palgate");
        assert_eq!(
            serde_json::to_value(&entry.data).unwrap()["phone_number"],
            json!(972500000000u64)
        );
    }

    #[test]
    fn test_setup_entry_migrates_legacy_record() {
        let store = legacy_store();
        let mut registry = EntityRegistry::new();
        let factory = FakeFactory::default();

        let record = setup_entry(&store, &mut registry, &factory).unwrap();

        assert_eq!(record.token_type.as_deref(), Some("1"));
        assert_eq!(registry.registered(), ["hub_555", "gate1"]);
        assert_eq!(store.load().unwrap().version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_setup_entry_wires_covers_to_clients() {
        let store = MemoryStore::new(StoredEntry {
            version: 4,
            title: "972500000000".to_string(),
            data: v4_record(&["g1", "g2"]),
        });
        let mut registry = EntityRegistry::new();
        let factory = FakeFactory::default();
        setup_entry(&store, &mut registry, &factory).unwrap();

        registry.cover("g2").unwrap().open_cover().await.unwrap();
        assert_eq!(factory.gate("g2").opens.load(Ordering::SeqCst), 1);
        assert_eq!(factory.gate("g1").opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unload_and_reload() {
        let store = legacy_store();
        let mut registry = EntityRegistry::new();
        let factory = FakeFactory::default();

        let record = setup_entry(&store, &mut registry, &factory).unwrap();
        assert!(unload_entry(&mut registry, &record));
        assert!(registry.registered().is_empty());
        assert!(!unload_entry(&mut registry, &record));

        setup_entry(&store, &mut registry, &factory).unwrap();
        reload_entry(&store, &mut registry, &factory).unwrap();
        assert_eq!(registry.registered(), ["hub_555", "gate1"]);
    }

    #[test]
    fn test_setup_twice_without_unload_fails() {
        let store = legacy_store();
        let mut registry = EntityRegistry::new();
        let factory = FakeFactory::default();

        setup_entry(&store, &mut registry, &factory).unwrap();
        assert!(setup_entry(&store, &mut registry, &factory).is_err());
    }
}
