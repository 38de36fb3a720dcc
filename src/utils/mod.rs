//! Utility module for the ingestion engine.
//!
//! Re-exports formatting helpers shared by adapters and sinks.
/// Exact decimal formatting of integer base-unit amounts
pub mod amount;

pub use amount::format_token_amount;
