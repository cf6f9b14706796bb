//! Upload subsystem.
//!
//! Moves finished trace artifacts into durable object storage.
//!
//! - [`ObjectStore`]: the storage API seam; [`S3ObjectStore`] is the production
//!   implementation.
//! - [`ArtifactUploader`]: picks single-request or multipart transfer, retries
//!   failed attempts with backoff and aborts abandoned multipart sessions.

pub mod object_store;
pub mod s3_store;
pub mod uploader;

#[cfg(test)]
pub mod memory_store;

pub use object_store::{ObjectStore, PartToken};
pub use s3_store::S3ObjectStore;
pub use uploader::{ArtifactUploader, TransferStrategy, UploadReceipt, CHUNK_THRESHOLD};
