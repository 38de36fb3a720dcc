//! Canonical data model shared by every chain adapter
//!
//! Adapters normalize whatever their chain's API returns into these types. The engine only ever
//! reasons about `CanonicalTransaction` and `WalletChainState`, never about raw chain payloads.

/// Canonical transaction, wallet state and monitor types
mod types;

pub use types::*;
