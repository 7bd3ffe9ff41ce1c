//! # auditlog storage
//!
//! Append-only segment file storage for the audit log engine.
//!
//! The [`SegmentStore`] persists opaque, already-encoded blobs. It does not
//! interpret payloads: framing, rotation, destination routing, and the
//! bounded open-file cache are its whole job. Encoding (serialization,
//! compression, encryption) happens upstream in the writer pool.
//!
//! ## On-disk layout
//!
//! ```text
//! <base_path>/<destination>_<index>.log
//! segment := frame*
//! frame   := len: u32 LE || payload (len bytes)
//! ```
//!
//! Destinations may contain `/` (subdirectories are created on demand);
//! traversal segments and absolute paths are rejected.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod store;

pub use error::{StorageError, StorageResult};
pub use store::{SegmentMetadata, SegmentStore, StoreOptions, FRAME_HEADER_SIZE};
