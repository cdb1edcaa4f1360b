//! Core library for Shroud.
//!
//! Contains password-based key derivation, the authenticated cipher, the
//! persisted record model, the access gate, the access log, and the
//! lifecycle coordinator and retention sweeper that enforce view budgets,
//! burn-on-read and trash retention. This crate depends on `shroud-storage`
//! for the storage backend trait and knows nothing about HTTP.

pub mod audit;
pub mod audit_file;
pub mod cipher;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod kdf;
pub mod record;
pub mod store;
pub mod sweeper;

pub use coordinator::{
    CreateSecret, LifecycleCoordinator, PolicyUpdate, RevealedSecret, ViewOutcome,
};
pub use error::EngineError;
pub use gate::Denial;
pub use sweeper::{RetentionSweeper, SweepReport};
