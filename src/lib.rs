//! Palgate garage-gate integration: config entry migration, gate API client, hub and cover entities.

pub mod api;
pub mod config;
pub mod entity;
pub mod integration;
pub mod migration;
pub mod store;
