//! # Coffer Provider
//!
//! The shared contract every Coffer storage backend implements: the
//! [`StorageProvider`] trait, the [`ErrorKind`]/[`ProviderError`] taxonomy,
//! cooperative cancellation and deadlines via [`CancellationToken`],
//! [`Deadline`] and [`OpContext`], advertised [`Capabilities`], and the
//! [`TypedStore`] facade that maps an entity type onto byte-level storage
//! using `coffer_codec`.
//!
//! This crate has no concrete backend of its own; `coffer_core` and
//! `coffer_providers` each implement [`StorageProvider`] against it, and
//! `coffer_txn` coordinates transactions across whichever instances a
//! caller has enlisted.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancellation;
mod capability;
mod entity;
mod error;
mod provider;
mod settings;

pub use cancellation::{CancellationToken, Deadline, OpContext};
pub use capability::{Capabilities, Capability};
pub use entity::TypedStore;
pub use error::{ErrorKind, ProviderError, ProviderResult};
pub use provider::{Record, RecordFilter, StorageProvider};
pub use settings::ProviderSettings;
