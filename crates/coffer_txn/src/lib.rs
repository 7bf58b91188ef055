//! # Coffer Txn
//!
//! A coordinator-driven two-phase commit transaction manager over any
//! number of enlisted [`coffer_provider::StorageProvider`] instances.
//!
//! Not distributed: the coordinator and every participant live in one
//! process address space. The protocol is the textbook one anyway, so that
//! a single participant's failure to prepare aborts the whole transaction
//! and rolls back the others, and so that a crash between prepare and
//! commit recovers deterministically from the durable intent log.
//!
//! ```no_run
//! use coffer_provider::OpContext;
//! use coffer_providers::{InMemoryProvider};
//! use coffer_txn::{CoordinatorSettings, TransactionCoordinator, TransactionSettings};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let coordinator = TransactionCoordinator::open(CoordinatorSettings::new(dir.path().join("intent.log")))?;
//! let txn = coordinator.begin(TransactionSettings::default());
//! let p1 = txn.enlist(Arc::new(InMemoryProvider::new("p1")))?;
//! let p2 = txn.enlist(Arc::new(InMemoryProvider::new("p2")))?;
//! p1.save("a", b"vA", &OpContext::none())?;
//! p2.save("b", b"vB", &OpContext::none())?;
//! coordinator.commit(&txn)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coordinator;
mod error;
mod intent_log;
mod resource;
mod settings;
mod state;
mod transaction;

pub use coordinator::{PendingRecovery, RecoveryReport, TransactionCoordinator};
pub use error::{TxError, TxResult};
pub use resource::EnlistedResource;
pub use settings::{CoordinatorSettings, Isolation, TransactionSettings};
pub use state::TxState;
pub use transaction::{Transaction, TransactionId};
