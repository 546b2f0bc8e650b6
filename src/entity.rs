//! Hub and cover entities.
//! A hub stands for the phone number every gate of an entry is linked to; it has no controls.
//! Each gate id becomes a cover entity attached to the hub through `via_device`,
//! forwarding open/stop and its state queries to a [`GateClient`].

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::api::{GateClient, GateClientFactory, GateSettings};
use crate::config::{ConfigRecord, DOMAIN};

const MANUFACTURER: &str = "Palgate";
const COVER_ICON: &str = "mdi:boom-gate-outline";

/// `(domain, id)` pair identifying a device.
pub type DeviceIdent = (String, String);

fn ident(id: &str) -> DeviceIdent {
    (DOMAIN.to_string(), id.to_string())
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<DeviceIdent>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub via_device: Option<DeviceIdent>,
}

// *************** Hub ***************

/// Inert grouping entity for one phone number.
#[derive(Clone, Debug, PartialEq)]
pub struct PalgateHub {
    pub unique_id: String,
    pub device_info: DeviceInfo,
}

impl PalgateHub {
    pub fn new(phone_number: &str) -> Self {
        Self {
            unique_id: format!("hub_{}", phone_number),
            device_info: DeviceInfo {
                identifiers: vec![ident(phone_number)],
                name: format!("Palgate {}", phone_number),
                manufacturer: MANUFACTURER.to_string(),
                model: "Hub".to_string(),
                via_device: None,
            },
        }
    }

    pub fn ident(&self) -> &DeviceIdent {
        &self.device_info.identifiers[0]
    }
}

// *************** Cover ***************

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverDeviceClass {
    Garage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CoverDescription {
    pub key: String,
    pub name: String,
    pub icon: String,
    pub device_class: CoverDeviceClass,
}

impl CoverDescription {
    pub fn gate(device_id: &str) -> Self {
        Self {
            key: device_id.to_string(),
            name: device_id.to_string(),
            icon: COVER_ICON.to_string(),
            device_class: CoverDeviceClass::Garage,
        }
    }
}

/// Observable state of a cover, folded from the client's three queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for CoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverState::Opening => write!(f, "opening"),
            CoverState::Open => write!(f, "open"),
            CoverState::Closing => write!(f, "closing"),
            CoverState::Closed => write!(f, "closed"),
        }
    }
}

pub struct PalgateCover {
    client: Arc<dyn GateClient>,
    pub description: CoverDescription,
    pub unique_id: String,
    pub device_info: DeviceInfo,
}

impl PalgateCover {
    pub fn new(client: Arc<dyn GateClient>, description: CoverDescription, hub: &DeviceIdent) -> Self {
        Self {
            unique_id: description.key.clone(),
            device_info: DeviceInfo {
                identifiers: vec![ident(&description.key)],
                name: MANUFACTURER.to_string(),
                manufacturer: MANUFACTURER.to_string(),
                model: MANUFACTURER.to_string(),
                via_device: Some(hub.clone()),
            },
            client,
            description,
        }
    }

    pub fn is_opening(&self) -> bool {
        self.client.is_opening()
    }

    pub fn is_closing(&self) -> bool {
        self.client.is_closing()
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn state(&self) -> CoverState {
        if self.is_opening() {
            CoverState::Opening
        } else if self.is_closing() {
            CoverState::Closing
        } else if self.is_closed() {
            CoverState::Closed
        } else {
            CoverState::Open
        }
    }

    pub async fn open_cover(&self) -> Result<()> {
        self.client
            .open_gate()
            .await
            .with_context(|| format!("Failed to open {}", self.unique_id))
    }

    /// Stops the gate by inverting it; only works when the entry allows invert-as-stop.
    pub async fn stop_cover(&self) -> Result<()> {
        self.client
            .invert_gate()
            .await
            .with_context(|| format!("Failed to stop {}", self.unique_id))
    }
}

impl fmt::Debug for PalgateCover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PalgateCover")
            .field("unique_id", &self.unique_id)
            .field("description", &self.description)
            .field("device_info", &self.device_info)
            .finish_non_exhaustive()
    }
}

// *************** Host ***************

/// Where entities get registered.
pub trait EntityHost {
    fn add_hub(&mut self, hub: PalgateHub) -> Result<()>;
    fn add_covers(&mut self, covers: Vec<PalgateCover>) -> Result<()>;

    /// Removes the hub for `phone_number` and every cover attached to it.
    /// Returns false when nothing was registered for it.
    fn unload(&mut self, phone_number: &str) -> bool;
}

/// In-memory [`EntityHost`] keyed by unique id.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    hubs: BTreeMap<String, PalgateHub>,
    covers: BTreeMap<String, PalgateCover>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hub(&self, unique_id: &str) -> Option<&PalgateHub> {
        self.hubs.get(unique_id)
    }

    pub fn cover(&self, unique_id: &str) -> Option<&PalgateCover> {
        self.covers.get(unique_id)
    }

    /// Covers in registration order.
    pub fn covers(&self) -> impl Iterator<Item = &PalgateCover> {
        self.order.iter().filter_map(|id| self.covers.get(id))
    }

    /// Unique ids of every live entity, in registration order.
    pub fn registered(&self) -> &[String] {
        &self.order
    }

    fn ensure_free(&self, unique_id: &str) -> Result<()> {
        if self.hubs.contains_key(unique_id) || self.covers.contains_key(unique_id) {
            bail!("Entity {} is already registered", unique_id);
        }
        Ok(())
    }
}

impl EntityHost for EntityRegistry {
    fn add_hub(&mut self, hub: PalgateHub) -> Result<()> {
        self.ensure_free(&hub.unique_id)?;
        tracing::debug!("Registered hub {}", hub.unique_id);
        self.order.push(hub.unique_id.clone());
        self.hubs.insert(hub.unique_id.clone(), hub);
        Ok(())
    }

    fn add_covers(&mut self, covers: Vec<PalgateCover>) -> Result<()> {
        // all or nothing
        for (i, cover) in covers.iter().enumerate() {
            self.ensure_free(&cover.unique_id)?;
            if covers[..i].iter().any(|c| c.unique_id == cover.unique_id) {
                bail!("Duplicate gate id {} in config entry", cover.unique_id);
            }
        }
        for cover in covers {
            tracing::debug!("Registered cover {}", cover.unique_id);
            self.order.push(cover.unique_id.clone());
            self.covers.insert(cover.unique_id.clone(), cover);
        }
        Ok(())
    }

    fn unload(&mut self, phone_number: &str) -> bool {
        let hub = PalgateHub::new(phone_number);
        let hub_ident = hub.ident().clone();

        let removed_hub = self.hubs.remove(&hub.unique_id).is_some();
        let before = self.covers.len();
        self.covers
            .retain(|_, cover| cover.device_info.via_device.as_ref() != Some(&hub_ident));
        let removed_covers = before - self.covers.len();

        let (hubs, covers) = (&self.hubs, &self.covers);
        self.order
            .retain(|id| hubs.contains_key(id) || covers.contains_key(id));

        tracing::debug!(
            "Unloaded hub {} ({} covers)",
            hub.unique_id,
            removed_covers
        );
        removed_hub || removed_covers > 0
    }
}

// *************** Platform Setup ***************

/// Registers the hub, then one cover per gate id of `record`.
pub fn setup_covers<H, F>(record: &ConfigRecord, host: &mut H, factory: &F) -> Result<usize>
where
    H: EntityHost + ?Sized,
    F: GateClientFactory + ?Sized,
{
    record.validate().context("Cannot set up Palgate covers")?;
    let settings = GateSettings::from_record(record)?;

    let hub = PalgateHub::new(&settings.phone_number);
    let hub_ident = hub.ident().clone();
    host.add_hub(hub)?;

    let covers: Vec<PalgateCover> = record
        .gate_ids()
        .iter()
        .map(|device_id| {
            PalgateCover::new(
                factory.create(device_id, &settings),
                CoverDescription::gate(device_id),
                &hub_ident,
            )
        })
        .collect();

    let count = covers.len();
    if let Err(e) = host.add_covers(covers) {
        host.unload(&settings.phone_number);
        return Err(e);
    }
    tracing::info!(
        "Set up {} Palgate gate(s) for {}",
        count,
        settings.phone_number
    );
    Ok(count)
}
