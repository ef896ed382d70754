//! Market regime classification with signed, independently verifiable
//! predictions.
//!
//! Price history flows through [`features`] (z-scored indicators), the
//! [`regime`] classifier and persistence filter, and out through [`attest`]
//! as Ed25519-signed records kept in the [`database`] ledger.

pub mod attest;
pub mod config;
pub mod data;
pub mod database;
pub mod engine;
pub mod error;
pub mod features;
pub mod indicators;
pub mod regime;
pub mod types;

pub use error::{RegimeError, Result, StoreError};
