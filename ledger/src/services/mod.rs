//! # External Service Contracts
//!
//! The validator core talks to four out-of-process collaborators — the
//! register-storage service, the wallet service, the blueprint service,
//! and the peer service — plus a key-value store for its own persisted
//! state. Each is a narrow trait: the core depends on capabilities, not
//! implementations, and tests swap them wholesale for in-memory fakes.
//!
//! The in-memory implementations in this module are not test-only
//! conveniences. Dev mode runs the full node against them, which keeps
//! them honest: they implement the same semantics the production clients
//! must, including the height/emptiness edge cases the docket builder
//! depends on.

pub mod blueprint;
pub mod kv;
pub mod peer;
pub mod register_store;
pub mod wallet;

use thiserror::Error;

pub use blueprint::{BlueprintService, InMemoryBlueprintService};
pub use kv::{KeyValueStore, MemoryKvStore, SledKvStore};
pub use peer::{BehaviorKind, NullPeerService, PeerService};
pub use register_store::{InMemoryRegisterStore, RegisterStore};
pub use wallet::{Ed25519Wallet, WalletClient, WalletSignature};

/// Failure of an external service call.
///
/// `Transient` is the one retryable variant: the caller may retry or
/// degrade (e.g. chain validation reports a non-fatal error instead of
/// rejecting the transaction). Everything else is fatal to the operation
/// that issued the call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The service could not be reached or timed out; retry may succeed.
    #[error("transient service failure: {0}")]
    Transient(String),
    /// The service rejected the request.
    #[error("service call failed: {0}")]
    Failed(String),
}

impl ServiceError {
    /// Whether a retry is a reasonable response to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
