//! Object Store Trait
//!
//! The storage API contract the uploader needs: single-request puts, chunked
//! (multipart) sessions, and a cheap probe used at startup.
//!
//! Every object written through this trait is private. Single puts stream the
//! file from disk with an exact length; parts are buffered (one part at a time).
//! Implementations must send the length rather than stream with unknown size.

use std::path::Path;

use async_trait::async_trait;

use crate::error_handling::types::StoreError;

/// Receipt for one uploaded part; completion must list them in part order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartToken {
    pub part_number: i32,
    pub etag: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams the first `length` bytes of the file at `path` to `key` in a
    /// single request. A file shorter than `length` fails the request.
    async fn put_object(
        &self,
        key: &str,
        path: &Path,
        length: u64,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Opens a multipart session for `key` and returns its upload id.
    async fn create_multipart(&self, key: &str, content_type: &str) -> Result<String, StoreError>;

    /// Uploads one part (1-based `part_number`) of an open session.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartToken, StoreError>;

    /// Commits the object from the ordered list of parts.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartToken],
    ) -> Result<(), StoreError>;

    /// Discards an uncommitted multipart session and its parts.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;

    /// Lists at most one object to check bucket access.
    async fn probe(&self) -> Result<(), StoreError>;
}
