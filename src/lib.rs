//! # rapd-panel
//!
//! Backend and polling client for the RAPD crystallography control panel.
//!
//! - [`dashboard`]: Axum server exposing cursor-based status endpoints and
//!   the settings/reprocess mutations.
//! - [`db`]: PostgreSQL result store access.
//! - [`classify`]: pure status-to-label decision tables.
//! - [`protocol`]: JSON wire types shared by server and client.
//! - [`merge`] and [`poller`]: client-side panel state and poll loop.

pub mod classify;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod merge;
pub mod poller;
pub mod prom_metrics;
pub mod protocol;
pub mod settings;
