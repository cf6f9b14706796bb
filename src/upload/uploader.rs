//! Artifact transfer to the object store.
//!
//! Small traces go up in a single request; anything above [`CHUNK_THRESHOLD`]
//! goes through a multipart session with parts of exactly that size (the last
//! one may be shorter). Each attempt is all-or-nothing: a failed multipart
//! attempt aborts its session before the next attempt starts over.
//!
//! The uploader never deletes the local file. Deletion belongs to whoever
//! knows that every reader is done with it (see `pipeline::cycle`).

use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::object_store::{ObjectStore, PartToken};
use crate::artifact::TraceArtifact;
use crate::error_handling::policy::{Backoff, Classified, ErrorPolicy};
use crate::error_handling::types::UploadError;

pub const MIB: u64 = 1024 * 1024;
/// Size boundary between single-request and multipart transfer; also the part size.
pub const CHUNK_THRESHOLD: u64 = 5 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    SinglePart,
    Multipart { parts: u64 },
}

/// Picks the transfer strategy for an artifact of `size` bytes.
pub fn plan_transfer(size: u64) -> TransferStrategy {
    if size <= CHUNK_THRESHOLD {
        TransferStrategy::SinglePart
    } else {
        TransferStrategy::Multipart {
            parts: size.div_ceil(CHUNK_THRESHOLD),
        }
    }
}

/// Part sizes for a multipart transfer of `size` bytes.
pub fn part_sizes(size: u64) -> Vec<u64> {
    let mut sizes = Vec::new();
    let mut remaining = size;
    while remaining > 0 {
        let part = remaining.min(CHUNK_THRESHOLD);
        sizes.push(part);
        remaining -= part;
    }
    sizes
}

/// Proof that an artifact is durable in the object store.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub artifact: TraceArtifact,
    pub strategy: TransferStrategy,
    pub attempts: u32,
}

pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    hostname: String,
    max_attempts: u32,
    backoff: Backoff,
}

impl ArtifactUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        hostname: String,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        Self {
            store,
            hostname,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Transfers the trace at `path`, retrying with backoff on failure.
    ///
    /// Returns only once the store has acknowledged the whole object.
    pub async fn upload(&self, cycle: u64, path: &Path) -> Result<UploadReceipt, UploadError> {
        let artifact = TraceArtifact::inspect(cycle, path, &self.hostname)
            .await
            .map_err(|e| {
                error!("[cycle {}] Cannot stat {}: {}", cycle, path.display(), e);
                UploadError::IoError(e)
            })?;
        let strategy = plan_transfer(artifact.size);

        info!(
            "[cycle {}] Starting upload of {} ({} bytes, {:?}) to {}",
            cycle,
            path.display(),
            artifact.size,
            strategy,
            artifact.remote_key
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transfer(&artifact, strategy).await {
                Ok(()) => {
                    info!(
                        "[cycle {}] Finished upload of {} after {} attempt(s)",
                        cycle, artifact.remote_key, attempt
                    );
                    return Ok(UploadReceipt {
                        artifact,
                        strategy,
                        attempts: attempt,
                    });
                }
                Err(e) if attempt < self.max_attempts && e.policy() == ErrorPolicy::RetryWithBackoff => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "[cycle {}] Upload attempt {}/{} failed: {} - retrying in {:?}",
                        cycle, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "[cycle {}] Upload of {} failed after {} attempt(s): {}",
                        cycle, artifact.remote_key, attempt, e
                    );
                    return Err(UploadError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
            }
        }
    }

    async fn transfer(
        &self,
        artifact: &TraceArtifact,
        strategy: TransferStrategy,
    ) -> Result<(), UploadError> {
        match strategy {
            TransferStrategy::SinglePart => self.put_single(artifact).await,
            TransferStrategy::Multipart { .. } => {
                let mut file = File::open(&artifact.local_path).await?;
                self.put_multipart(&mut file, artifact).await
            }
        }
    }

    async fn put_single(&self, artifact: &TraceArtifact) -> Result<(), UploadError> {
        check_size(artifact).await?;
        self.store
            .put_object(
                &artifact.remote_key,
                &artifact.local_path,
                artifact.size,
                &artifact.content_type,
            )
            .await?;
        // Growth during the request means the stored object is truncated.
        check_size(artifact).await
    }

    async fn put_multipart(
        &self,
        file: &mut File,
        artifact: &TraceArtifact,
    ) -> Result<(), UploadError> {
        let upload_id = self
            .store
            .create_multipart(&artifact.remote_key, &artifact.content_type)
            .await?;
        debug!(
            "[cycle {}] Opened multipart session {} for {}",
            artifact.cycle, upload_id, artifact.remote_key
        );
        let session = MultipartSession {
            store: self.store.clone(),
            cycle: artifact.cycle,
            key: artifact.remote_key.clone(),
            upload_id,
            open: true,
        };

        let result = match self.upload_parts(file, artifact, &session.upload_id).await {
            Ok(parts) => self
                .store
                .complete_multipart(&artifact.remote_key, &session.upload_id, &parts)
                .await
                .map_err(UploadError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                session.committed();
                Ok(())
            }
            Err(e) => {
                warn!(
                    "[cycle {}] Aborting multipart session {} after error: {}",
                    artifact.cycle, session.upload_id, e
                );
                session.abort().await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        file: &mut File,
        artifact: &TraceArtifact,
        upload_id: &str,
    ) -> Result<Vec<PartToken>, UploadError> {
        let mut parts = Vec::new();
        let mut sent: u64 = 0;

        for (index, size) in part_sizes(artifact.size).into_iter().enumerate() {
            let mut body = vec![0u8; size as usize];
            if let Err(e) = file.read_exact(&mut body).await {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Err(UploadError::SizeMismatch {
                        expected: artifact.size,
                        actual: file.metadata().await?.len(),
                    });
                }
                return Err(UploadError::IoError(e));
            }
            let part_number = index as i32 + 1;
            let token = self
                .store
                .upload_part(&artifact.remote_key, upload_id, part_number, body)
                .await?;
            sent += size;
            debug!(
                "[cycle {}] Uploaded part {} ({} bytes, {}/{} total)",
                artifact.cycle, part_number, size, sent, artifact.size
            );
            parts.push(token);
        }

        let mut rest = [0u8; 1];
        if file.read(&mut rest).await? > 0 {
            return Err(UploadError::SizeMismatch {
                expected: artifact.size,
                actual: file.metadata().await?.len(),
            });
        }
        Ok(parts)
    }
}

async fn check_size(artifact: &TraceArtifact) -> Result<(), UploadError> {
    let actual = tokio::fs::metadata(&artifact.local_path).await?.len();
    if actual != artifact.size {
        return Err(UploadError::SizeMismatch {
            expected: artifact.size,
            actual,
        });
    }
    Ok(())
}

/// An open multipart session. Dropping it while still open (the upload task
/// was cancelled mid-transfer) aborts the session in the background.
struct MultipartSession {
    store: Arc<dyn ObjectStore>,
    cycle: u64,
    key: String,
    upload_id: String,
    open: bool,
}

impl MultipartSession {
    fn committed(mut self) {
        self.open = false;
    }

    async fn abort(mut self) {
        self.open = false;
        if let Err(e) = self.store.abort_multipart(&self.key, &self.upload_id).await {
            warn!(
                "[cycle {}] Failed to abort multipart session {}: {}",
                self.cycle, self.upload_id, e
            );
        }
    }
}

impl Drop for MultipartSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!(
                    "[cycle {}] Multipart session {} left open: no runtime to abort it",
                    self.cycle, self.upload_id
                );
                return;
            }
        };
        warn!(
            "[cycle {}] Upload cancelled, aborting multipart session {}",
            self.cycle, self.upload_id
        );
        let store = self.store.clone();
        let cycle = self.cycle;
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            if let Err(e) = store.abort_multipart(&key, &upload_id).await {
                warn!(
                    "[cycle {}] Failed to abort multipart session {}: {}",
                    cycle, upload_id, e
                );
            }
        });
    }
}
