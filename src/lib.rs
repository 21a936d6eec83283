//! Air quality relay: ingests regional index and concentration uploads,
//! serves them back with color-coded indices.

pub mod classify;
pub mod concentrations;
pub mod configuration;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod export;
pub mod payload;
pub mod routes;
pub mod store;
