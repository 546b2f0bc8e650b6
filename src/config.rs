//! Config module.
//! Typed view of the persisted Palgate config entry data (phone number, gate ids, credentials, timings).
//! Uses serde for JSON serialization; every field is optional because older schema versions lack some of them.
//! A stored value that does not fit its typed field (wrong type, partial `advanced` block) stays in `extra`
//! under its own key, so reading never fails and writing back never drops it.

use anyhow::{Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Integration domain, used as the namespace of device identifiers.
pub const DOMAIN: &str = "palgate";

/// Schema version written by this crate.
pub const CURRENT_VERSION: u32 = 4;

pub const DEFAULT_TOKEN_TYPE: &str = "1";

pub const SECONDS_TO_OPEN: u64 = 25;
pub const SECONDS_OPEN: u64 = 45;
pub const SECONDS_TO_CLOSE: u64 = 35;

pub const KEY_PHONE_NUMBER: &str = "phone_number";
pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_DEVICE_IDS: &str = "device_ids";
pub const KEY_TOKEN: &str = "token";
pub const KEY_TOKEN_TYPE: &str = "token_type";
pub const KEY_ADVANCED: &str = "advanced";

// *************** Record Types ***************

/// Gate timing parameters and stop behaviour (schema version 3+).
/// Timings keep the number exactly as stored (`10` stays an integer, `10.5` a float).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConfig {
    pub seconds_to_open: Number,
    pub seconds_open: Number,
    pub seconds_to_close: Number,
    #[serde(default)]
    pub allow_invert_as_stop: bool,
}

/// Data of one config entry. Which fields are guaranteed depends on the entry's schema version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ConfigRecord {
    pub phone_number: Option<String>,
    /// Legacy single gate id (before version 4).
    pub device_id: Option<String>,
    /// `null` entries are what older installs wrote for a missing `device_id`.
    pub device_ids: Option<Vec<Option<String>>>,
    pub token: Option<String>,
    pub token_type: Option<String>,
    pub advanced: Option<AdvancedConfig>,
    /// Unknown keys, and known keys whose stored value did not parse.
    pub extra: Map<String, Value>,
}

fn take_typed<T: DeserializeOwned>(map: &mut Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match T::deserialize(value) {
        Ok(typed) => {
            map.remove(key);
            Some(typed)
        }
        Err(e) => {
            tracing::warn!("Keeping unrecognised {} value as stored: {}", key, e);
            None
        }
    }
}

fn put_typed<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(json) = value.and_then(|v| serde_json::to_value(v).ok()) {
        map.insert(key.to_string(), json);
    }
}

impl From<Map<String, Value>> for ConfigRecord {
    fn from(mut extra: Map<String, Value>) -> Self {
        Self {
            phone_number: take_typed(&mut extra, KEY_PHONE_NUMBER),
            device_id: take_typed(&mut extra, KEY_DEVICE_ID),
            device_ids: take_typed(&mut extra, KEY_DEVICE_IDS),
            token: take_typed(&mut extra, KEY_TOKEN),
            token_type: take_typed(&mut extra, KEY_TOKEN_TYPE),
            advanced: take_typed(&mut extra, KEY_ADVANCED),
            extra,
        }
    }
}

impl From<ConfigRecord> for Map<String, Value> {
    fn from(record: ConfigRecord) -> Self {
        // typed values win over a raw value left under the same key
        let mut map = record.extra;
        put_typed(&mut map, KEY_PHONE_NUMBER, record.phone_number);
        put_typed(&mut map, KEY_DEVICE_ID, record.device_id);
        put_typed(&mut map, KEY_DEVICE_IDS, record.device_ids);
        put_typed(&mut map, KEY_TOKEN, record.token);
        put_typed(&mut map, KEY_TOKEN_TYPE, record.token_type);
        put_typed(&mut map, KEY_ADVANCED, record.advanced);
        map
    }
}

impl ConfigRecord {
    /// True when `key` is stored at all, typed or raw.
    pub fn has_key(&self, key: &str) -> bool {
        let typed = match key {
            KEY_PHONE_NUMBER => self.phone_number.is_some(),
            KEY_DEVICE_ID => self.device_id.is_some(),
            KEY_DEVICE_IDS => self.device_ids.is_some(),
            KEY_TOKEN => self.token.is_some(),
            KEY_TOKEN_TYPE => self.token_type.is_some(),
            KEY_ADVANCED => self.advanced.is_some(),
            _ => false,
        };
        typed || self.extra.contains_key(key)
    }

    /// Gate ids served by this entry: the non-null `device_ids`, else the legacy `device_id`.
    pub fn gate_ids(&self) -> Vec<String> {
        let ids: Vec<String> = self
            .device_ids
            .iter()
            .flatten()
            .flatten()
            .cloned()
            .collect();
        if ids.is_empty() {
            self.device_id.iter().cloned().collect()
        } else {
            ids
        }
    }

    /// Checks the record carries everything the cover platform needs.
    /// Migration never calls this; it only defaults.
    pub fn validate(&self) -> Result<()> {
        if self.phone_number.as_deref().is_none_or(str::is_empty) {
            bail!("Config entry has no phone number");
        }
        if self.token.as_deref().is_none_or(str::is_empty) {
            bail!("Config entry has no API token");
        }
        if self.token_type.is_none() {
            bail!("Config entry has no token type (schema older than version 2?)");
        }
        if self.advanced.is_none() {
            bail!("Config entry has no usable advanced block (schema older than version 3?)");
        }

        let gate_ids = self.gate_ids();
        if gate_ids.is_empty() {
            bail!("Config entry has no gate ids");
        }
        if gate_ids.iter().any(|id| id.trim().is_empty()) {
            bail!("Config entry contains an empty gate id: {:?}", gate_ids);
        }

        Ok(())
    }
}
