//! Entitlement and payment ledger for a media catalog.
//!
//! Users buy catalog items (movies, seasons, episodes, courses) from a
//! multi-currency prepaid wallet or through an external card gateway, then
//! stream them under the purchased terms: an optional expiry window and an
//! optional metered view allotment. Money movement is ordered before every
//! entitlement write, replays of gateway notifications are absorbed
//! idempotently, and a purchase that fails after its money step is parked in
//! the audit ledger for the reconciliation worker to finish.

pub mod api;
pub mod catalog;
pub mod config;
pub mod currency;
pub mod database;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
