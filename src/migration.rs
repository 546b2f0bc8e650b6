//! Config entry schema migration.
//! Brings a stored record from any legacy version (1, 2, 3) up to `CURRENT_VERSION` in one pass.
//! Each gate applies when the input version is below its threshold, in ascending order.
//! Missing fields are defaulted, never rejected. Records at or past the current version are returned as-is.

use serde_json::Number;

use crate::config::{
    AdvancedConfig, ConfigRecord, CURRENT_VERSION, DEFAULT_TOKEN_TYPE, KEY_ADVANCED,
    KEY_DEVICE_IDS, KEY_TOKEN_TYPE, SECONDS_OPEN, SECONDS_TO_CLOSE, SECONDS_TO_OPEN,
};

/// Timing values written into the `advanced` block when a record predates version 3.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationDefaults {
    pub seconds_to_open: Number,
    pub seconds_open: Number,
    pub seconds_to_close: Number,
}

impl Default for MigrationDefaults {
    fn default() -> Self {
        Self {
            seconds_to_open: SECONDS_TO_OPEN.into(),
            seconds_open: SECONDS_OPEN.into(),
            seconds_to_close: SECONDS_TO_CLOSE.into(),
        }
    }
}

impl MigrationDefaults {
    fn advanced(&self) -> AdvancedConfig {
        AdvancedConfig {
            seconds_to_open: self.seconds_to_open.clone(),
            seconds_open: self.seconds_open.clone(),
            seconds_to_close: self.seconds_to_close.clone(),
            allow_invert_as_stop: false,
        }
    }
}

/// Result of [`migrate`]. `title` is what the store should show for the entry afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationOutcome {
    pub changed: bool,
    pub record: ConfigRecord,
    pub version: u32,
    pub title: Option<String>,
}

/// Migrates `record` stored at `version` to the current schema.
///
/// - `< 2`: `token_type` is set to `"1"`, overwriting any value already there.
/// - `< 3`: `advanced` is replaced wholesale with `defaults` and `allow_invert_as_stop = false`.
/// - `< 4`: `device_ids` is derived from `device_id` when the key is absent. With no `device_id`
///   either, the list is left empty.
///
/// Keys no gate touches are carried over as stored, including values that did not parse.
/// The input is not modified.
pub fn migrate(
    record: &ConfigRecord,
    version: u32,
    title: Option<&str>,
    defaults: &MigrationDefaults,
) -> MigrationOutcome {
    if version >= CURRENT_VERSION {
        return MigrationOutcome {
            changed: false,
            record: record.clone(),
            version,
            title: title.map(str::to_string),
        };
    }

    let mut migrated = record.clone();

    if version < 2 {
        tracing::debug!("Applying schema gate <2: token_type = {:?}", DEFAULT_TOKEN_TYPE);
        migrated.extra.remove(KEY_TOKEN_TYPE);
        migrated.token_type = Some(DEFAULT_TOKEN_TYPE.to_string());
    }

    if version < 3 {
        tracing::debug!("Applying schema gate <3: advanced = defaults");
        migrated.extra.remove(KEY_ADVANCED);
        migrated.advanced = Some(defaults.advanced());
    }

    // multiple gates per phone number
    if version < 4 && !migrated.has_key(KEY_DEVICE_IDS) {
        let device_ids: Vec<Option<String>> =
            migrated.device_id.iter().cloned().map(Some).collect();
        if device_ids.is_empty() {
            tracing::warn!("Legacy config entry has no device_id; device_ids left empty");
        } else {
            tracing::debug!("Applying schema gate <4: device_ids = {:?}", device_ids);
        }
        migrated.device_ids = Some(device_ids);
    }

    let title = migrated
        .phone_number
        .clone()
        .or_else(|| title.map(str::to_string));

    tracing::info!(
        "Migrated config entry from version {} to {}",
        version,
        CURRENT_VERSION
    );

    MigrationOutcome {
        changed: true,
        record: migrated,
        version: CURRENT_VERSION,
        title,
    }
}
