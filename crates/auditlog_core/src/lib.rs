//! # auditlog core
//!
//! A high-throughput, multi-producer append-only audit log engine.
//!
//! Producers submit [`Record`]s describing operations on regulated data. The
//! engine buffers them in a bounded lock-free queue, batches them per
//! destination, compresses and optionally encrypts each batch, and persists
//! the result to size-bounded segment files.
//!
//! ```no_run
//! use auditlog_core::{Action, Engine, EngineConfig, Record};
//!
//! let engine = Engine::new(EngineConfig::new("./logs"))?;
//! engine.start()?;
//!
//! engine.append(Record::new(Action::Read, "/customers/42", "svc-billing", "cust-42"))?;
//! engine.append_to(
//!     Record::new(Action::Delete, "/customers/42", "svc-gdpr", "cust-42"),
//!     "erasure",
//! )?;
//!
//! engine.stop(true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Durability boundary: `append` returning `Ok` means the record is in the
//! queue, not on disk. `stop(true)` returning `Ok` means every accepted
//! record has been flushed to its segment.

#![warn(missing_docs)]

mod config;
mod engine;
mod error;
pub mod queue;
mod record;
mod writer;

pub use auditlog_codec::EncryptionKey;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{AppendError, BatchAppendError, CoreError, CoreResult};
pub use queue::{BoundedQueue, ProducerToken};
pub use record::{Action, Record};
