//! Chain activity ingestion
//!
//! Keeps a durable, deduplicated record of the transactions touching a set of watched wallets
//! across several chains and alerts on genuinely new activity.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod models;
pub mod notify;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;
